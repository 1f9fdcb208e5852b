mod store;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use crudkit_config::Config;
use crudkit_contracts::{ErrorEnvelope, LookupResponse, Record, API_VERSION};
use crudkit_kernel::{
    Hooks, LookupAction, LookupError, LookupQuery, ModelMeta, RecordSource, ValidateAction,
    ValidateError, ValidateOutcome, ValidateRequest,
};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::store::StoreBackend;

pub async fn serve(cfg: Config) -> Result<(), String> {
    serve_with_hooks(cfg, Hooks::new()).await
}

pub async fn serve_with_hooks(cfg: Config, hooks: Hooks) -> Result<(), String> {
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;

    let app = build_app_with_hooks(cfg, hooks)?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    tracing::info!(%addr, "crudkit listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| format!("serve failed: {e}"))
}

pub fn build_app(cfg: Config) -> Result<Router, String> {
    build_app_with_hooks(cfg, Hooks::new())
}

pub fn build_app_with_hooks(cfg: Config, hooks: Hooks) -> Result<Router, String> {
    let state = AppState::new(cfg, hooks)?;
    Ok(Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/v1/models", get(models))
        .route("/v1/models/{model}/lookup", get(lookup))
        .route("/v1/models/{model}/validate", get(validate).post(validate))
        .route(
            "/v1/models/{model}/validate/{id}",
            get(validate_with_id).post(validate_with_id),
        )
        .with_state(state))
}

#[derive(Clone)]
struct AppState {
    models: Arc<HashMap<String, ModelMeta>>,
    store: Arc<Mutex<StoreBackend>>,
    hooks: Arc<Hooks>,
}

impl AppState {
    fn new(cfg: Config, hooks: Hooks) -> Result<Self, String> {
        let mut models = HashMap::with_capacity(cfg.models.len());
        for model in &cfg.models {
            let meta = ModelMeta::from_config(model)
                .map_err(|e| format!("model {}: {e}", model.name))?;
            models.insert(model.name.clone(), meta);
        }
        let store = StoreBackend::open(&cfg)?;
        tracing::info!(
            store = store.kind(),
            models = models.len(),
            ?hooks,
            "crudkit state ready"
        );
        Ok(Self {
            models: Arc::new(models),
            store: Arc::new(Mutex::new(store)),
            hooks: Arc::new(hooks),
        })
    }

    fn model(&self, name: &str) -> Result<&ModelMeta, Response> {
        self.models.get(name).ok_or_else(|| {
            error_response(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("unknown model {name}"),
            )
        })
    }
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn models(State(state): State<AppState>) -> Json<Value> {
    let mut names: Vec<&String> = state.models.keys().collect();
    names.sort();
    let models: Vec<Value> = names
        .into_iter()
        .filter_map(|name| state.models.get(name))
        .map(|m| {
            json!({
                "name": m.name,
                "label": m.label,
                "primary_key": m.primary_key,
                "display_field": m.display_field,
                "lookup": {
                    "roles": m.lookup.fields.keys().collect::<Vec<_>>(),
                    "default_strategy": m.lookup.default_strategy,
                    "strategy": m.lookup.strategy,
                    "view_var": m.lookup.view_var,
                }
            })
        })
        .collect();
    Json(json!({ "version": API_VERSION, "models": models }))
}

async fn lookup(
    State(state): State<AppState>,
    Path(model): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let meta = match state.model(&model) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let query = LookupQuery::new(params);

    match run_lookup(&state, meta, &query).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => lookup_error_response(&model, e),
    }
}

/// The store is locked for the search alone; hooks and shaping run unlocked.
async fn run_lookup(
    state: &AppState,
    meta: &ModelMeta,
    query: &LookupQuery,
) -> Result<LookupResponse, LookupError> {
    let mut action = LookupAction::new(meta);
    let params = action.find_params(query, &state.hooks)?;
    let rows = {
        let store = state.store.lock().await;
        store.find(meta, &params)
    }
    .map_err(LookupError::Store)?;
    action.finish(rows, &state.hooks)
}

fn lookup_error_response(model: &str, err: LookupError) -> Response {
    match err {
        LookupError::BadRequest(msg) => {
            tracing::warn!(model, error = %msg, "lookup rejected");
            error_response(StatusCode::BAD_REQUEST, "bad_request", msg)
        }
        LookupError::Misconfigured(_) | LookupError::Projection { .. } => {
            tracing::error!(model, error = %err, "lookup misconfigured");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration_error",
                err.to_string(),
            )
        }
        LookupError::Store(_) => {
            tracing::error!(model, error = %err, "lookup search failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_error",
                err.to_string(),
            )
        }
    }
}

async fn validate(
    State(state): State<AppState>,
    Path(model): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_validate(&state, &model, None, &method, &headers, &body)
}

async fn validate_with_id(
    State(state): State<AppState>,
    Path((model, id)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_validate(&state, &model, Some(id), &method, &headers, &body)
}

fn handle_validate(
    state: &AppState,
    model: &str,
    id: Option<String>,
    method: &Method,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    let meta = match state.model(model) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let is_api = is_api_request(headers);
    let is_post = method == Method::POST;
    let data = if is_api && is_post && !body.is_empty() {
        match serde_json::from_slice::<Record>(body) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(model, error = %e, "validate body rejected");
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "bad_request",
                    format!("request body must be a JSON object: {e}"),
                );
            }
        }
    } else {
        Record::new()
    };

    let request = ValidateRequest {
        is_api,
        is_post,
        id: id.clone(),
        data,
    };
    match ValidateAction::new(meta).handle(&request, &state.hooks) {
        Ok(ValidateOutcome::NotHandled) => StatusCode::NOT_FOUND.into_response(),
        Ok(ValidateOutcome::InvalidId) => {
            tracing::warn!(model, id = ?id, "validate rejected identifier");
            error_response(
                StatusCode::NOT_FOUND,
                "invalid_id",
                format!("invalid id {}", id.unwrap_or_default()),
            )
        }
        Ok(ValidateOutcome::Rendered(resp)) => Json(resp).into_response(),
        Err(ValidateError::Validation { message, errors }) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorEnvelope::validation(message, errors)),
        )
            .into_response(),
    }
}

/// JSON-speaking clients are API clients; browsers posting forms are not.
fn is_api_request(headers: &HeaderMap) -> bool {
    let mentions_json = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase().contains("application/json"))
            .unwrap_or(false)
    };
    mentions_json(header::ACCEPT) || mentions_json(header::CONTENT_TYPE)
}

fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (status, Json(ErrorEnvelope::new(code, message))).into_response()
}
