use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{FromRequest, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::{Form, Json};
use serde_json::{json, Value};
use tracing::{info, warn};

use weft_engine::context::CONTENT_FIELDS;

use crate::state::AppState;

type JsonResponse = (StatusCode, Json<Value>);

// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "workflow": state.engine.definition().name,
    }))
}

/// POST /webhook: run the workflow on an inbound message.
/// Requires `Authorization: Bearer <token>` when `gateway.token` is set.
/// Accepts JSON or form-encoded bodies; every answer is JSON.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
) -> JsonResponse {
    if let Some(ref expected) = state.config.token {
        if bearer(&headers) != Some(expected.as_str()) {
            warn!("Webhook rejected: bad or missing token");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "success": false, "error": "Unauthorized" })),
            );
        }
    }

    let body = match payload(&headers, request).await {
        Ok(body) => body,
        Err(error) => {
            warn!(error = %error, "Webhook rejected: unreadable body");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "error": error })),
            );
        }
    };

    if !has_message(&body) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "No message" })),
        );
    }

    let report = state.engine.run(body).await;
    let trace_id = report.context.trace_id().to_string();
    info!(trace_id = %trace_id, status = %report.status, steps = report.steps, "Webhook handled");

    (
        StatusCode::OK,
        Json(json!({
            "success": report.succeeded(),
            "response": report.reply(&state.replies),
            "trace_id": trace_id,
        })),
    )
}

async fn payload(headers: &HeaderMap, request: Request) -> Result<Value, String> {
    let is_form = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

    if is_form {
        let Form(fields) = Form::<HashMap<String, String>>::from_request(request, &())
            .await
            .map_err(|rejection| rejection.body_text())?;
        Ok(json!(fields))
    } else {
        let Json(body) = Json::<Value>::from_request(request, &())
            .await
            .map_err(|rejection| rejection.body_text())?;
        Ok(body)
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn has_message(body: &Value) -> bool {
    CONTENT_FIELDS
        .iter()
        .any(|field| body.get(field).and_then(Value::as_str).is_some_and(|s| !s.is_empty()))
}
