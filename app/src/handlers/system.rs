use axum::{response::IntoResponse, Json};
use serde_json::json;

pub async fn root() -> &'static str {
    "Welcome to the Greeting Card Organizer API"
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
