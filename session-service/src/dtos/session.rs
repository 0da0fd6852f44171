use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{Device, SessionView};

#[derive(Debug, Default, Deserialize, Validate)]
pub struct DeviceInfo {
    #[serde(default)]
    #[validate(length(max = 64))]
    pub platform: String,

    #[serde(default)]
    #[validate(length(max = 32))]
    pub viewport: String,

    #[serde(default)]
    #[validate(length(max = 16))]
    pub language: String,

    #[serde(default)]
    #[validate(length(max = 64))]
    pub timezone: String,
}

impl DeviceInfo {
    pub fn into_device(self, user_agent: Option<String>) -> Device {
        Device {
            platform: self.platform,
            viewport: self.viewport,
            language: self.language,
            timezone: self.timezone,
            user_agent: user_agent.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(max = 1024, message = "email is too long"))]
    pub email: String,

    #[validate(length(max = 1024, message = "password is too long"))]
    pub password: String,

    #[validate(length(max = 256, message = "client_id is too long"))]
    pub client_id: String,

    #[serde(default)]
    #[validate(nested)]
    pub device: DeviceInfo,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1, max = 4096, message = "refresh_token is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionView>,
}
