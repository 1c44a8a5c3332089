//! HTTP client for the controller's JSON API.

use super::models::{DeviceState, ModeRequest, PidSaveRequest, ProfileSaveRequest};
use crate::config::ControllerConfig;
use crate::pins::PinMap;
use async_trait::async_trait;
use thiserror::Error;

pub const STATE_PATH: &str = "/api/state";
pub const START_PATH: &str = "/api/start";
pub const STOP_PATH: &str = "/api/stop";
pub const MODE_PATH: &str = "/api/mode";
pub const PROFILE_ADD_PATH: &str = "/api/profile/add";
pub const PROFILE_SAVE_PATH: &str = "/api/profile/save";
pub const PROFILE_LOAD_PATH: &str = "/api/profile/load";
pub const PINS_PATH: &str = "/api/pins";
pub const PID_PATH: &str = "/api/pid";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("controller answered {path} with HTTP {status}")]
    Status { path: String, status: u16 },
    #[error("state payload is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Operations the dashboard performs against the controller.
#[async_trait]
pub trait ControllerApi: Send + Sync {
    async fn fetch_state(&self) -> Result<DeviceState, ApiError>;
    async fn start(&self) -> Result<(), ApiError>;
    async fn stop(&self) -> Result<(), ApiError>;
    async fn set_mode(&self, request: ModeRequest) -> Result<(), ApiError>;
    async fn add_profile_step(&self) -> Result<(), ApiError>;
    async fn save_profile(&self, request: &ProfileSaveRequest) -> Result<(), ApiError>;
    async fn load_profile(&self, name: &str) -> Result<(), ApiError>;
    async fn save_pins(&self, pins: &PinMap) -> Result<(), ApiError>;
    async fn save_pid(&self, request: PidSaveRequest) -> Result<(), ApiError>;
}

/// `ControllerApi` over plain HTTP with reqwest.
#[derive(Debug, Clone)]
pub struct HttpControllerApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpControllerApi {
    pub fn new(config: &ControllerConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn check(path: &str, response: &reqwest::Response) -> Result<(), ApiError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ApiError::Status { path: path.to_string(), status: status.as_u16() })
        }
    }

    /// Send a mutation. The response body is not interpreted.
    async fn send(&self, path: &str, request: reqwest::RequestBuilder) -> Result<(), ApiError> {
        tracing::debug!("-> {}", path);
        let response = request.send().await?;
        Self::check(path, &response)
    }
}

#[async_trait]
impl ControllerApi for HttpControllerApi {
    async fn fetch_state(&self) -> Result<DeviceState, ApiError> {
        let response = self.client.get(self.url(STATE_PATH)).send().await?;
        Self::check(STATE_PATH, &response)?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn start(&self) -> Result<(), ApiError> {
        self.send(START_PATH, self.client.post(self.url(START_PATH))).await
    }

    async fn stop(&self) -> Result<(), ApiError> {
        self.send(STOP_PATH, self.client.post(self.url(STOP_PATH))).await
    }

    async fn set_mode(&self, request: ModeRequest) -> Result<(), ApiError> {
        self.send(MODE_PATH, self.client.post(self.url(MODE_PATH)).json(&request)).await
    }

    async fn add_profile_step(&self) -> Result<(), ApiError> {
        self.send(PROFILE_ADD_PATH, self.client.post(self.url(PROFILE_ADD_PATH))).await
    }

    async fn save_profile(&self, request: &ProfileSaveRequest) -> Result<(), ApiError> {
        self.send(PROFILE_SAVE_PATH, self.client.post(self.url(PROFILE_SAVE_PATH)).json(request))
            .await
    }

    async fn load_profile(&self, name: &str) -> Result<(), ApiError> {
        let request = self.client.get(self.url(PROFILE_LOAD_PATH)).query(&[("name", name)]);
        self.send(PROFILE_LOAD_PATH, request).await
    }

    async fn save_pins(&self, pins: &PinMap) -> Result<(), ApiError> {
        self.send(PINS_PATH, self.client.post(self.url(PINS_PATH)).json(pins)).await
    }

    async fn save_pid(&self, request: PidSaveRequest) -> Result<(), ApiError> {
        self.send(PID_PATH, self.client.post(self.url(PID_PATH)).json(&request)).await
    }
}
