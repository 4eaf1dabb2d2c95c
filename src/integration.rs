use std::time::Duration;

use log::{info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::config::IntegrationConfig;
use crate::data::ExportRecord;

#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("endpoint answered {0}")]
    Status(reqwest::StatusCode),
}

/// An external system that receives the exported rows.
pub trait RecordSink {
    fn name(&self) -> &str;

    fn push(&self, source: &str, records: &[ExportRecord]) -> Result<(), IntegrationError>;
}

#[derive(Serialize)]
struct Payload<'a> {
    source: &'a str,
    records: &'a [ExportRecord],
}

/// Posts the rows as JSON to an HTTP endpoint, with an optional bearer token.
pub struct WebhookSink {
    client: reqwest::blocking::Client,
    endpoint: String,
    token: Option<String>,
}

impl WebhookSink {
    pub fn new(config: &IntegrationConfig) -> Result<WebhookSink, IntegrationError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(WebhookSink {
            client,
            endpoint: config.endpoint.clone(),
            token: config.token.clone(),
        })
    }
}

impl RecordSink for WebhookSink {
    fn name(&self) -> &str {
        &self.endpoint
    }

    fn push(&self, source: &str, records: &[ExportRecord]) -> Result<(), IntegrationError> {
        let mut request = self.client.post(&self.endpoint).json(&Payload { source, records });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(IntegrationError::Status(response.status()));
        }

        Ok(())
    }
}

/// Pushes to `sink` and reports whether it worked. Failures are only logged:
/// the local export has already been written by the time this runs.
pub fn push_best_effort(sink: &dyn RecordSink, source: &str, records: &[ExportRecord]) -> bool {
    match sink.push(source, records) {
        Ok(()) => {
            info!("pushed {} rows to {}", records.len(), sink.name());
            true
        },
        Err(err) => {
            warn!("could not push rows to {}: {}", sink.name(), err);
            false
        },
    }
}
