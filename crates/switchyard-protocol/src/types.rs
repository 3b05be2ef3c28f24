//! Connect results and instance descriptions.

use serde::{Deserialize, Serialize};

use crate::identity::{Identity, INHERIT_USER_ID, INVALID_INSTANCE_ID};

/// Outcome of a connect request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectResult {
    Succeeded,
    AccessDenied,
    InvalidArgument,
}

impl ConnectResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectResult::Succeeded => "SUCCEEDED",
            ConnectResult::AccessDenied => "ACCESS_DENIED",
            ConnectResult::InvalidArgument => "INVALID_ARGUMENT",
        }
    }
}

/// What a connect callback receives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub result: ConnectResult,
    pub user_id: String,
    pub instance_id: u32,
}

impl ConnectResponse {
    pub fn succeeded(user_id: impl Into<String>, instance_id: u32) -> Self {
        Self {
            result: ConnectResult::Succeeded,
            user_id: user_id.into(),
            instance_id,
        }
    }

    /// Rejection carrying the inherit user and the invalid instance id.
    pub fn rejected(result: ConnectResult) -> Self {
        Self {
            result,
            user_id: INHERIT_USER_ID.to_string(),
            instance_id: INVALID_INSTANCE_ID,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == ConnectResult::Succeeded
    }
}

/// Snapshot of a registered instance, as seen by listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: u32,
    pub identity: Identity,
    /// Process id, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}
