use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::{AppState, VERSION};

/// GET /v1/healthcheck
pub async fn healthcheck(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "available",
        "system_info": {
            "environment": state.config.env.to_string(),
            "version": VERSION,
        }
    }))
}
