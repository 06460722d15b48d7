use std::time::Duration;

use serde::Serialize;

use crate::api::{AgentError, ResultEnvelope};

/// Thin HTTP client for the agent's control server on a forwarded port.
#[derive(Debug, Clone)]
pub struct AgentClient {
    base_url: String,
    http: ureq::Agent,
}

impl AgentClient {
    pub fn new(local_port: u16, timeout: Duration) -> Self {
        Self::with_base_url(format!("http://127.0.0.1:{local_port}"), timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            http: ureq::AgentBuilder::new()
                .timeout(timeout)
                .timeout_connect(timeout)
                .build(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn get(&self, path: &str) -> Result<String, AgentError> {
        let response = self
            .http
            .get(&self.url(path))
            .call()
            .map_err(|e| map_error(path, e))?;
        read_body(path, response)
    }

    pub fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<String, AgentError> {
        let response = self
            .http
            .post(&self.url(path))
            .send_json(body)
            .map_err(|e| map_error(path, e))?;
        read_body(path, response)
    }

    /// GET/POST whose reply wraps a string in `{"result": ...}`.
    pub fn get_result(&self, path: &str) -> Result<String, AgentError> {
        parse_envelope(path, &self.get(path)?)
    }

    pub fn post_for_result<T: Serialize>(&self, path: &str, body: &T) -> Result<String, AgentError> {
        parse_envelope(path, &self.post_json(path, body)?)
    }
}

fn read_body(path: &str, response: ureq::Response) -> Result<String, AgentError> {
    response
        .into_string()
        .map_err(|e| AgentError::Disconnected(format!("{path}: {e}")))
}

fn map_error(path: &str, err: ureq::Error) -> AgentError {
    match err {
        ureq::Error::Status(status, response) => AgentError::Status {
            path: path.to_string(),
            status,
            body: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(t) => AgentError::Disconnected(format!("{path}: {t}")),
    }
}

pub(crate) fn parse_envelope(path: &str, body: &str) -> Result<String, AgentError> {
    serde_json::from_str::<ResultEnvelope>(body)
        .map(|env| env.result)
        .map_err(|e| AgentError::Malformed {
            path: path.to_string(),
            reason: e.to_string(),
        })
}

/// Device output directory announced by `/init`, from a body of the
/// form `outputDir:<path>`.
pub fn parse_output_dir(body: &str) -> Option<String> {
    let rest = body.trim_start().strip_prefix("outputDir:")?;
    let dir = rest.lines().next()?.trim();
    (!dir.is_empty()).then(|| dir.to_string())
}
