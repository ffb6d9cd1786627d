use crate::config::HttpConfig;
use crate::record::LogRecord;
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// HTTP implementation of [`Transport`] that POSTs each record as JSON
/// to a configured endpoint.
///
/// The client carries the configured per-request timeout and has
/// proxying disabled. Basic-auth credentials are attached only when
/// both username and password are configured.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    config: HttpConfig,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .no_proxy()
            .build()
            .expect("build http client");
        Self { client, config }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, record: &LogRecord) -> Result<(), TransportError> {
        let mut request = self.client.post(&self.config.url).json(record);

        if let (Some(user), Some(password)) = (&self.config.username, &self.config.password) {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            Err(TransportError::Status { status, body })
        }
    }
}
