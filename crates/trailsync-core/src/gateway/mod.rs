//! Remote backend boundary.
//!
//! The engine only ever talks to the backend through [`RemoteGateway::send`];
//! per-entity routing lives in [`handlers`], and [`HttpGateway`] is the
//! production transport.

mod handlers;
mod http;
#[cfg(test)]
pub(crate) mod mock;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{EntityType, Operation};

pub use handlers::{entity_id_of, handler_for, pulled_entities, EntityHandler};
pub use http::HttpGateway;

/// Transport verb. `Upload` carries file content alongside metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayMethod {
    Get,
    Post,
    Put,
    Delete,
    Upload,
}

impl fmt::Display for GatewayMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Upload => "UPLOAD",
        };
        f.write_str(name)
    }
}

/// One backend call: method, endpoint and JSON payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub method: GatewayMethod,
    /// Path relative to the API base, may include a query string
    pub path: String,
    pub body: serde_json::Value,
}

impl GatewayRequest {
    pub fn new(method: GatewayMethod, path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }
}

/// How a delivery failure is treated by the drain loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Credentials rejected; halts the pass, never retried automatically
    Authorization,
    /// Network or server trouble; retried within the budget
    Transient,
    /// Payload rejected; retried within the budget but logged as a poison candidate
    Validation,
}

/// Errors surfaced by a [`RemoteGateway`]
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Request timed out")]
    Timeout,
    #[error("{operation} is not supported for {entity_type}")]
    Unsupported {
        entity_type: EntityType,
        operation: Operation,
    },
    #[error("Invalid gateway payload: {0}")]
    InvalidPayload(String),
    #[error("Gateway is not configured: {0}")]
    NotConfigured(String),
}

impl GatewayError {
    pub const fn classify(&self) -> FailureKind {
        match self {
            Self::Status { status, .. } => match *status {
                401 | 403 => FailureKind::Authorization,
                400 | 404 | 409 | 410 | 413 | 422 => FailureKind::Validation,
                _ => FailureKind::Transient,
            },
            Self::Transport(_) | Self::Timeout | Self::NotConfigured(_) => FailureKind::Transient,
            Self::Unsupported { .. } | Self::InvalidPayload(_) => FailureKind::Validation,
        }
    }

    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if let Some(status) = error.status() {
            Self::Status {
                status: status.as_u16(),
                message: error.to_string(),
            }
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Authenticated CRUD-style access to the remote backend.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Perform one request and return the decoded JSON response body.
    async fn send(&self, request: GatewayRequest) -> Result<serde_json::Value, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> GatewayError {
        GatewayError::Status {
            status: code,
            message: String::new(),
        }
    }

    #[test]
    fn classify_maps_status_codes() {
        assert_eq!(status(401).classify(), FailureKind::Authorization);
        assert_eq!(status(403).classify(), FailureKind::Authorization);
        assert_eq!(status(422).classify(), FailureKind::Validation);
        assert_eq!(status(500).classify(), FailureKind::Transient);
        assert_eq!(status(503).classify(), FailureKind::Transient);
        assert_eq!(status(429).classify(), FailureKind::Transient);
    }

    #[test]
    fn classify_treats_transport_as_transient() {
        assert_eq!(GatewayError::Timeout.classify(), FailureKind::Transient);
        assert_eq!(
            GatewayError::Transport("connection reset".to_string()).classify(),
            FailureKind::Transient
        );
        assert_eq!(
            GatewayError::Unsupported {
                entity_type: EntityType::UserProfile,
                operation: Operation::Delete,
            }
            .classify(),
            FailureKind::Validation
        );
    }
}
