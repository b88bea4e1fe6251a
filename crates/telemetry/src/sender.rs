// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound transport seam: one trait, one HTTP implementation.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use vigil_core::TelemetryPayload;

/// A single failed delivery attempt.
#[derive(Debug, Error)]
#[error("send failed: {0}")]
pub struct SendFailed(pub String);

/// Transport for telemetry payloads. The client is generic over this so
/// tests exercise the pipeline against a scripted sender.
#[async_trait]
pub trait Sender: Send + Sync + 'static {
    async fn post(&self, payload: &TelemetryPayload) -> Result<(), SendFailed>;
}

/// HTTPS POST sender. Success is any 2xx status.
pub struct HttpSender {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSender {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Result<Self, SendFailed> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SendFailed(format!("building http client: {}", e)))?;
        Ok(Self { client, endpoint: endpoint.into() })
    }
}

#[async_trait]
impl Sender for HttpSender {
    async fn post(&self, payload: &TelemetryPayload) -> Result<(), SendFailed> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| SendFailed(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SendFailed(format!("endpoint returned {}", status)))
        }
    }
}
