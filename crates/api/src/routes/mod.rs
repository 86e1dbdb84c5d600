//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod orders;

use serde::Serialize;

/// Success body shared by the order endpoints.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub status: &'static str,
    pub message: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            status: "success",
            message: message.into(),
            data,
        }
    }
}
