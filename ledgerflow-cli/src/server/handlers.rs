//! Route handlers
//!
//! Pipeline work is blocking (DuckDB, dbt, blocking HTTP to the LLM), so every
//! handler that touches the warehouse hops onto the blocking pool.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use ledgerflow_core::services::LogEvent;
use ledgerflow_core::{Institution, ProcessRequest};

use super::error::ApiError;
use super::AppState;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Runs are synchronous, so any job a client can name has already finished
pub async fn job_status(Path(job_id): Path<String>) -> Json<Value> {
    Json(json!({
        "job_id": job_id,
        "status": "completed",
        "progress": 100,
    }))
}

/// Parse the request body by hand so every malformed input maps to a 400
fn parse_process_request(body: &[u8]) -> Result<ProcessRequest, ApiError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|_| ApiError::BadRequest("Request body must be a JSON object".to_string()))?;

    let institution = value
        .get("institution")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::BadRequest("Missing required field: institution".to_string()))?;
    let institution: Institution = institution.parse()?;

    let file_paths = value
        .get("file_paths")
        .and_then(Value::as_array)
        .ok_or_else(|| ApiError::BadRequest("Missing required field: file_paths".to_string()))?
        .iter()
        .map(|p| {
            p.as_str()
                .map(str::to_string)
                .ok_or_else(|| ApiError::BadRequest("file_paths must be strings".to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let force_reprocess = value
        .get("force_reprocess")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(ProcessRequest {
        institution,
        file_paths,
        force_reprocess,
    })
}

pub async fn process_data(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let request = parse_process_request(&body)?;
    let ctx = state.context().await?;

    let result = tokio::task::spawn_blocking(move || {
        ctx.logging
            .record(LogEvent::new("request_received").with_command("process-data"));
        ctx.pipeline()?.process(&request)
    })
    .await??;

    Ok(Json(json!({
        "status": "success",
        "message": format!(
            "Processed {} files, inserted {} rows, categorized {} descriptions",
            result.files_processed, result.rows_inserted, result.new_categories
        ),
        "result": result,
    })))
}

pub async fn init_categories(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let ctx = state.context().await?;
    let result = tokio::task::spawn_blocking(move || ctx.taxonomy_service.init()).await??;

    let message = if result.already_initialized {
        "Categories already initialized".to_string()
    } else {
        format!("Inserted {} categories", result.inserted)
    };
    Ok(Json(json!({
        "status": "success",
        "message": message,
        "inserted": result.inserted,
    })))
}

pub async fn forget_file(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let value: Value = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("Request body must be a JSON object".to_string()))?;
    let file_path = value
        .get("file_path")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::BadRequest("Missing required field: file_path".to_string()))?
        .to_string();

    let ctx = state.context().await?;
    let result =
        tokio::task::spawn_blocking(move || ctx.pipeline()?.forget_file(&file_path)).await??;

    Ok(Json(json!({
        "status": "success",
        "message": format!("Deleted {} rows from {}", result.rows_deleted, result.file_path),
        "result": result,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_process_request() {
        let request = parse_process_request(
            br#"{"institution":"AMEX","file_paths":["a.csv"],"auth_token":"x"}"#,
        )
        .unwrap();
        assert_eq!(request.institution, Institution::Amex);
        assert_eq!(request.file_paths, vec!["a.csv".to_string()]);
        assert!(!request.force_reprocess);
    }

    #[test]
    fn test_parse_process_request_rejects_bad_input() {
        for body in [
            &b"not json"[..],
            br#"{"file_paths":[]}"#,
            br#"{"institution":"amex"}"#,
            br#"{"institution":"chase","file_paths":[]}"#,
            br#"{"institution":"amex","file_paths":[1]}"#,
        ] {
            assert!(matches!(
                parse_process_request(body),
                Err(ApiError::BadRequest(_))
            ));
        }
    }
}
