use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MessageKind, Role, Sticker};

// -- JWT Claims --

/// Bearer-token claims shared between the REST middleware and the WebSocket
/// gateway. Canonical definition lives here in parlor-types to eliminate
/// duplication. Token issuance is external; the server only verifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub display_name: String,
    pub role: Role,
    pub exp: usize,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub kind: MessageKind,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

// -- Upload --

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub sticker: Sticker,
    pub url: String,
}

/// Body shape for every error the upload endpoint reports.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
