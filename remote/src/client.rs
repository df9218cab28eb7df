use std::time::Duration;

use reqwest::StatusCode;
use thermostat_common::{
    protocol::{interpret_data_response, interpret_setpoint_response, setpoint_request},
    AuthenticatedEnvelope, Authenticator, Endpoint, ProtocolError, ThermostatData,
};
use thiserror::Error;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to controller failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("controller answered with status {0}")]
    Status(StatusCode),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// HTTP client for one controller.
#[derive(Debug, Clone)]
pub struct RemoteController {
    base_url: String,
    http: reqwest::Client,
    auth: Authenticator,
}

impl RemoteController {
    pub fn new(host: &str, port: u16, auth: Authenticator) -> Result<Self, ClientError> {
        Self::with_base_url(format!("http://{host}:{port}"), auth)
    }

    pub fn with_base_url(base_url: impl Into<String>, auth: Authenticator) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            auth,
        })
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }

    /// Asks the controller to change the setpoint of `name` and returns the
    /// unit's state as reported in the signed response.
    ///
    /// A controller that rejected the change still answers; the returned record
    /// then shows the unchanged setpoint.
    pub async fn update_remote_setpoint(
        &self,
        name: &str,
        setpoint: f64,
        endpoint: Endpoint,
    ) -> Result<ThermostatData, ClientError> {
        let request = setpoint_request(&self.auth, name, setpoint)?;
        debug!("POST {} for {name} -> {setpoint}", self.url(endpoint));
        let response = self
            .http
            .post(self.url(endpoint))
            .json(&request)
            .send()
            .await?;
        let envelope = Self::envelope(response).await?;
        Ok(interpret_setpoint_response(&self.auth, endpoint, &envelope, name)?)
    }

    /// Fetches and authenticates the state of every unit.
    pub async fn get_remote_data(&self) -> Result<Vec<ThermostatData>, ClientError> {
        debug!("GET {}", self.url(Endpoint::Data));
        let response = self.http.get(self.url(Endpoint::Data)).send().await?;
        let envelope = Self::envelope(response).await?;
        Ok(interpret_data_response(&self.auth, &envelope)?)
    }

    async fn envelope(response: reqwest::Response) -> Result<AuthenticatedEnvelope, ClientError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status));
        }
        let body = response.bytes().await?;
        AuthenticatedEnvelope::from_slice(&body)
            .map_err(|err| ClientError::Protocol(ProtocolError::Authentication(err)))
    }
}
