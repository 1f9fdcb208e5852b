use std::fmt;
use std::sync::Arc;

use crudkit_contracts::{FindParams, LookupResponse, Record, StrategyKind, ValidateResponse};

/// Payload of the condition hook, fired once per lookup after the builtin
/// strategy condition has been added (or skipped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionEvent<'a> {
    /// Column the `value` role resolved to.
    pub field: &'a str,
    /// `None` when the term was empty and the blank-value filter was applied.
    pub strategy: Option<StrategyKind>,
    pub term: &'a str,
}

/// Extension points of the lookup action.
///
/// Every method receives the in-flight state by value and returns the state
/// the action continues with. The defaults hand it back untouched.
pub trait LookupListener: Send + Sync {
    fn lookup_condition(&self, _event: &ConditionEvent<'_>, params: FindParams) -> FindParams {
        params
    }

    fn before_lookup(&self, _find_method: &str, params: FindParams) -> FindParams {
        params
    }

    fn after_lookup(&self, items: Vec<Record>) -> Vec<Record> {
        items
    }

    fn before_render(&self, response: LookupResponse) -> LookupResponse {
        response
    }
}

/// Extension points of the validate action.
pub trait ValidateListener: Send + Sync {
    fn before_validate(&self, _id: Option<&str>) {}

    fn after_validate(&self, _id: Option<&str>, _success: bool) {}

    fn before_render(&self, response: ValidateResponse) -> ValidateResponse {
        response
    }
}

/// Registered listeners, invoked in registration order.
#[derive(Clone, Default)]
pub struct Hooks {
    lookup: Vec<Arc<dyn LookupListener>>,
    validate: Vec<Arc<dyn ValidateListener>>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("lookup", &self.lookup.len())
            .field("validate", &self.validate.len())
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_lookup(mut self, listener: impl LookupListener + 'static) -> Self {
        self.lookup.push(Arc::new(listener));
        self
    }

    pub fn on_validate(mut self, listener: impl ValidateListener + 'static) -> Self {
        self.validate.push(Arc::new(listener));
        self
    }

    pub(crate) fn lookup_condition(
        &self,
        event: &ConditionEvent<'_>,
        params: FindParams,
    ) -> FindParams {
        self.lookup
            .iter()
            .fold(params, |acc, l| l.lookup_condition(event, acc))
    }

    pub(crate) fn before_lookup(&self, find_method: &str, params: FindParams) -> FindParams {
        self.lookup
            .iter()
            .fold(params, |acc, l| l.before_lookup(find_method, acc))
    }

    pub(crate) fn after_lookup(&self, items: Vec<Record>) -> Vec<Record> {
        self.lookup.iter().fold(items, |acc, l| l.after_lookup(acc))
    }

    pub(crate) fn lookup_before_render(&self, response: LookupResponse) -> LookupResponse {
        self.lookup
            .iter()
            .fold(response, |acc, l| l.before_render(acc))
    }

    pub(crate) fn before_validate(&self, id: Option<&str>) {
        for l in &self.validate {
            l.before_validate(id);
        }
    }

    pub(crate) fn after_validate(&self, id: Option<&str>, success: bool) {
        for l in &self.validate {
            l.after_validate(id, success);
        }
    }

    pub(crate) fn validate_before_render(&self, response: ValidateResponse) -> ValidateResponse {
        self.validate
            .iter()
            .fold(response, |acc, l| l.before_render(acc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crudkit_contracts::DEFAULT_FIND_METHOD;
    use std::sync::Mutex;

    struct Tag(&'static str);

    impl LookupListener for Tag {
        fn before_lookup(&self, _find_method: &str, mut params: FindParams) -> FindParams {
            params.fields.push(self.0.to_string());
            params
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ValidateListener for Arc<Recorder> {
        fn before_validate(&self, id: Option<&str>) {
            self.0.lock().unwrap().push(format!("before:{id:?}"));
        }

        fn after_validate(&self, id: Option<&str>, success: bool) {
            self.0.lock().unwrap().push(format!("after:{id:?}:{success}"));
        }
    }

    fn params() -> FindParams {
        FindParams {
            find_method: DEFAULT_FIND_METHOD.to_string(),
            fields: vec![],
            distinct: true,
            conditions: vec![],
            order: vec![],
            limit: None,
            page: 1,
        }
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let hooks = Hooks::new().on_lookup(Tag("first")).on_lookup(Tag("second"));
        let out = hooks.before_lookup("all", params());
        assert_eq!(out.fields, vec!["first", "second"]);
    }

    #[test]
    fn empty_registry_is_identity() {
        let hooks = Hooks::new();
        assert_eq!(hooks.before_lookup("all", params()), params());
        let response = ValidateResponse {
            success: true,
            message: None,
            id: None,
        };
        assert_eq!(hooks.validate_before_render(response.clone()), response);
    }

    #[test]
    fn validate_notifications_reach_every_listener() {
        let recorder = Arc::new(Recorder::default());
        let hooks = Hooks::new().on_validate(recorder.clone());
        hooks.before_validate(Some("7"));
        hooks.after_validate(Some("7"), true);
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec!["before:Some(\"7\")", "after:Some(\"7\"):true"]
        );
        assert_eq!(format!("{hooks:?}"), "Hooks { lookup: 0, validate: 1 }");
    }
}
