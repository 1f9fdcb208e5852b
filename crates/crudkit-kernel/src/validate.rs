use crudkit_config::{KeyType, ValidateIdMode, ValidateOptions};
use crudkit_contracts::{FieldErrors, Record, ValidateResponse};
use serde_json::Value;
use thiserror::Error;

use crate::hooks::Hooks;
use crate::{Check, CheckKind, ModelMeta};

#[derive(Debug, Error, PartialEq)]
pub enum ValidateError {
    #[error("{message}")]
    Validation { message: String, errors: FieldErrors },
}

/// What the validate handler saw of the inbound request.
#[derive(Debug, Clone, Default)]
pub struct ValidateRequest {
    pub is_api: bool,
    pub is_post: bool,
    pub id: Option<String>,
    pub data: Record,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidateOutcome {
    /// Not an API request; the router decides what happens next.
    NotHandled,
    /// The identifier does not have the primary key's shape.
    InvalidId,
    Rendered(ValidateResponse),
}

/// Validate action bound to one model.
#[derive(Debug, Clone, Copy)]
pub struct ValidateAction<'a> {
    model: &'a ModelMeta,
}

impl<'a> ValidateAction<'a> {
    pub fn new(model: &'a ModelMeta) -> Self {
        Self { model }
    }

    pub fn handle(
        &self,
        request: &ValidateRequest,
        hooks: &Hooks,
    ) -> Result<ValidateOutcome, ValidateError> {
        if !request.is_api {
            tracing::debug!(model = %self.model.name, "validate skipped for non-api request");
            return Ok(ValidateOutcome::NotHandled);
        }

        let settings = &self.model.validate;
        let id = request.id.as_deref().filter(|id| !id.is_empty());
        if let Some(id) = id {
            if !validate_id(id, settings.validate_id, self.model.key_type) {
                tracing::debug!(model = %self.model.name, id, "validate rejected identifier");
                return Ok(ValidateOutcome::InvalidId);
            }
        }

        let mut response = ValidateResponse {
            success: true,
            message: None,
            id: id.map(str::to_string),
        };

        if request.is_post {
            hooks.before_validate(id);
            let errors = validate_record(self.model, &request.data, &settings.validate_options);
            if !errors.is_empty() {
                tracing::debug!(model = %self.model.name, fields = errors.len(), "validation failed");
                return Err(ValidateError::Validation {
                    message: render_message(&settings.messages.error, &self.model.label),
                    errors,
                });
            }
            hooks.after_validate(id, true);
            response.message = Some(render_message(
                &settings.messages.success,
                &self.model.label,
            ));
        }

        Ok(ValidateOutcome::Rendered(
            hooks.validate_before_render(response),
        ))
    }
}

/// Checks that `id` has the shape of the model's primary key. Integer keys
/// are unsigned digit strings of any length.
pub fn validate_id(id: &str, mode: ValidateIdMode, key_type: KeyType) -> bool {
    let expected = match mode {
        ValidateIdMode::Disabled => return true,
        ValidateIdMode::Integer => KeyType::Integer,
        ValidateIdMode::Uuid => KeyType::Uuid,
        ValidateIdMode::Auto => key_type,
    };
    match expected {
        KeyType::Integer => !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()),
        KeyType::Uuid => uuid::Uuid::try_parse(id).is_ok(),
        KeyType::String => true,
    }
}

pub fn render_message(template: &str, name: &str) -> String {
    template.replace("{name}", name)
}

/// Evaluates the model's rules against submitted data. Nothing is written.
pub fn validate_record(model: &ModelMeta, data: &Record, options: &ValidateOptions) -> FieldErrors {
    let mut errors = FieldErrors::new();
    for field_rules in &model.rules {
        if let Some(only) = &options.fields {
            if !only.iter().any(|f| *f == field_rules.field) {
                continue;
            }
        }
        let value = data.get(&field_rules.field).filter(|v| !v.is_null());
        let messages: Vec<String> = field_rules
            .checks
            .iter()
            .filter_map(|check| failed_message(check, value))
            .collect();
        if !messages.is_empty() {
            errors.insert(field_rules.field.clone(), messages);
        }
    }
    errors
}

fn failed_message(check: &Check, value: Option<&Value>) -> Option<String> {
    let passed = match (&check.kind, value) {
        (CheckKind::Required, v) => v.is_some(),
        // Absent optional values are not checked any further.
        (_, None) => true,
        (CheckKind::NotBlank, Some(Value::String(s))) => !s.trim().is_empty(),
        (CheckKind::NotBlank, Some(_)) => true,
        (CheckKind::MinLength(min), Some(v)) => text_len(v) >= *min,
        (CheckKind::MaxLength(max), Some(v)) => text_len(v) <= *max,
        (CheckKind::Pattern(re), Some(Value::String(s))) => re.is_match(s),
        (CheckKind::Pattern(re), Some(v)) => re.is_match(&v.to_string()),
        (CheckKind::Numeric, Some(Value::Number(_))) => true,
        (CheckKind::Numeric, Some(Value::String(s))) => s.trim().parse::<f64>().is_ok(),
        (CheckKind::Numeric, Some(_)) => false,
        (CheckKind::InList(values), Some(v)) => values.contains(v),
    };
    if passed {
        return None;
    }
    Some(
        check
            .message
            .clone()
            .unwrap_or_else(|| default_message(&check.kind)),
    )
}

fn text_len(value: &Value) -> usize {
    match value {
        Value::String(s) => s.chars().count(),
        other => other.to_string().chars().count(),
    }
}

fn default_message(kind: &CheckKind) -> String {
    match kind {
        CheckKind::Required => "This field is required".to_string(),
        CheckKind::NotBlank => "This field cannot be left blank".to_string(),
        CheckKind::MinLength(min) => format!("Must be at least {min} characters long"),
        CheckKind::MaxLength(max) => format!("Must be no longer than {max} characters"),
        CheckKind::Pattern(_) => "Has an invalid format".to_string(),
        CheckKind::Numeric => "Must be a number".to_string(),
        CheckKind::InList(_) => "Must be one of the allowed values".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::users;
    use crate::hooks::ValidateListener;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Spy(Mutex<Vec<String>>);

    impl ValidateListener for Arc<Spy> {
        fn before_validate(&self, id: Option<&str>) {
            self.0.lock().unwrap().push(format!("before:{}", id.unwrap_or("-")));
        }

        fn after_validate(&self, id: Option<&str>, success: bool) {
            self.0
                .lock()
                .unwrap()
                .push(format!("after:{}:{success}", id.unwrap_or("-")));
        }

        fn before_render(&self, mut response: ValidateResponse) -> ValidateResponse {
            self.0.lock().unwrap().push("render".to_string());
            response.message = response.message.map(|m| m.to_uppercase());
            response
        }
    }

    fn data(v: Value) -> Record {
        v.as_object().cloned().expect("object")
    }

    fn api_post(id: Option<&str>, body: Value) -> ValidateRequest {
        ValidateRequest {
            is_api: true,
            is_post: true,
            id: id.map(str::to_string),
            data: data(body),
        }
    }

    #[test]
    fn non_api_request_is_not_handled_and_fires_nothing() {
        let model = users();
        let spy = Arc::new(Spy::default());
        let hooks = Hooks::new().on_validate(spy.clone());
        let mut request = api_post(Some("1"), json!({"name": ""}));
        request.is_api = false;
        let outcome = ValidateAction::new(&model).handle(&request, &hooks).unwrap();
        assert_eq!(outcome, ValidateOutcome::NotHandled);
        assert!(spy.0.lock().unwrap().is_empty());
    }

    #[test]
    fn invalid_id_short_circuits_without_hooks() {
        let model = users();
        let spy = Arc::new(Spy::default());
        let hooks = Hooks::new().on_validate(spy.clone());
        let outcome = ValidateAction::new(&model)
            .handle(&api_post(Some("abc"), json!({"name": "Al"})), &hooks)
            .unwrap();
        assert_eq!(outcome, ValidateOutcome::InvalidId);
        assert!(spy.0.lock().unwrap().is_empty());
    }

    #[test]
    fn valid_submission_fires_hooks_and_renders_message() {
        let model = users();
        let spy = Arc::new(Spy::default());
        let hooks = Hooks::new().on_validate(spy.clone());
        let outcome = ValidateAction::new(&model)
            .handle(&api_post(Some("7"), json!({"name": "Alice"})), &hooks)
            .unwrap();
        assert_eq!(
            outcome,
            ValidateOutcome::Rendered(ValidateResponse {
                success: true,
                message: Some("SUCCESSFULLY VALIDATED USER".to_string()),
                id: Some("7".to_string()),
            })
        );
        assert_eq!(
            *spy.0.lock().unwrap(),
            vec!["before:7", "after:7:true", "render"]
        );
    }

    #[test]
    fn failed_validation_reports_fields_and_skips_after_hook() {
        let model = users();
        let spy = Arc::new(Spy::default());
        let hooks = Hooks::new().on_validate(spy.clone());
        let err = ValidateAction::new(&model)
            .handle(
                &api_post(None, json!({"name": "Bartholomew", "email": "nope"})),
                &hooks,
            )
            .unwrap_err();
        let ValidateError::Validation { message, errors } = err;
        assert_eq!(message, "Could not validate user");
        assert_eq!(errors["name"], vec!["name is too long"]);
        assert_eq!(errors["email"], vec!["Has an invalid format"]);
        assert_eq!(*spy.0.lock().unwrap(), vec!["before:-"]);
    }

    #[test]
    fn non_post_api_request_only_renders() {
        let model = users();
        let spy = Arc::new(Spy::default());
        let hooks = Hooks::new().on_validate(spy.clone());
        let mut request = api_post(None, json!({}));
        request.is_post = false;
        let outcome = ValidateAction::new(&model).handle(&request, &hooks).unwrap();
        assert_eq!(
            outcome,
            ValidateOutcome::Rendered(ValidateResponse {
                success: true,
                message: None,
                id: None,
            })
        );
        assert_eq!(*spy.0.lock().unwrap(), vec!["render"]);
    }

    #[test]
    fn id_shapes_follow_mode_and_key_type() {
        let uuid = uuid::Uuid::new_v4().to_string();
        assert!(validate_id("42", ValidateIdMode::Auto, KeyType::Integer));
        assert!(!validate_id("4x", ValidateIdMode::Auto, KeyType::Integer));
        assert!(validate_id(&uuid, ValidateIdMode::Auto, KeyType::Uuid));
        assert!(!validate_id("42", ValidateIdMode::Auto, KeyType::Uuid));
        assert!(validate_id("anything", ValidateIdMode::Auto, KeyType::String));
        assert!(!validate_id("DE", ValidateIdMode::Integer, KeyType::String));
        assert!(validate_id(&uuid, ValidateIdMode::Uuid, KeyType::Integer));
        assert!(validate_id("nope", ValidateIdMode::Disabled, KeyType::Uuid));
    }

    #[test]
    fn integer_ids_are_plain_digits() {
        let integer = |id: &str| validate_id(id, ValidateIdMode::Auto, KeyType::Integer);
        assert!(integer("0"));
        assert!(integer("123456789012345678901234567890"));
        assert!(!integer("+5"));
        assert!(!integer("-3"));
        assert!(!integer(" 7"));
        assert!(!integer("1.5"));
        assert!(!integer(""));
    }

    #[test]
    fn rules_cover_presence_length_and_format() {
        let model = users();
        let opts = ValidateOptions::default();

        let missing = validate_record(&model, &data(json!({"email": null})), &opts);
        assert_eq!(missing["name"], vec!["This field is required"]);
        assert!(!missing.contains_key("email"));

        let ok = validate_record(
            &model,
            &data(json!({"name": "Ann", "email": "ann@example.com"})),
            &opts,
        );
        assert!(ok.is_empty());

        let only_email = ValidateOptions {
            fields: Some(vec!["email".to_string()]),
        };
        assert!(validate_record(&model, &data(json!({})), &only_email).is_empty());
    }

    #[test]
    fn builtin_checks_use_default_messages() {
        let blank = Check {
            kind: CheckKind::NotBlank,
            message: None,
        };
        assert_eq!(
            failed_message(&blank, Some(&json!("  "))).as_deref(),
            Some("This field cannot be left blank")
        );
        let numeric = Check {
            kind: CheckKind::Numeric,
            message: None,
        };
        assert_eq!(failed_message(&numeric, Some(&json!("1.5"))), None);
        assert_eq!(failed_message(&numeric, Some(&json!(3))), None);
        assert!(failed_message(&numeric, Some(&json!("x"))).is_some());
        let min = Check {
            kind: CheckKind::MinLength(3),
            message: None,
        };
        assert_eq!(
            failed_message(&min, Some(&json!("ab"))).as_deref(),
            Some("Must be at least 3 characters long")
        );
        let list = Check {
            kind: CheckKind::InList(vec![json!("asia"), json!("europe")]),
            message: Some("unknown region".to_string()),
        };
        assert_eq!(failed_message(&list, Some(&json!("europe"))), None);
        assert_eq!(
            failed_message(&list, Some(&json!("mars"))).as_deref(),
            Some("unknown region")
        );
        assert_eq!(failed_message(&list, None), None);
    }
}
