//! HTTP transport over reqwest

use crate::transport::error::{TransportError, TransportResult};
use crate::transport::PeerTransport;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Body text kept in error messages
const MAX_ERROR_BODY: usize = 256;

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn send(&self, url: &str, envelope: &Value) -> TransportResult<()> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;

        let response = self
            .client
            .post(url)
            .json(envelope)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }

        Err(TransportError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
