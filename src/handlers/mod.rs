//! # API Handlers
//!
//! HTTP endpoint handlers for the marketsync operator API.

use crate::models::ServiceInfo;
use axum::response::Json;

pub mod accounts;
pub mod actions;
pub mod jobs;
pub mod progress;
pub mod system;
pub mod types;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}
