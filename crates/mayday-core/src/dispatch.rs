//! Emergency case broadcast.
//!
//! One confirmation, one submission. There is no automatic retry: a failed
//! broadcast returns the session to chat, and only an explicit re-confirmation
//! submits again. Downstream responder notification is the backend's concern.

use crate::classifier::lock_ignore_poison;
use crate::error::{CoreError, CoreResult};
use crate::types::{CaseReceipt, EmergencyCase};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// Submits a finalized case to the dispatch backend.
#[async_trait]
pub trait DispatchBackend: Send + Sync {
    async fn submit(&self, case: &EmergencyCase) -> CoreResult<CaseReceipt>;
}

#[derive(Serialize)]
struct DispatchRequest<'a> {
    category: &'a str,
    #[serde(rename = "serviceId")]
    service_id: &'a str,
    description: &'a str,
    lat: f64,
    lng: f64,
    address: &'a str,
}

#[derive(Deserialize)]
struct DispatchResponse {
    #[serde(default)]
    data: Option<DispatchData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct DispatchData {
    id: serde_json::Value,
}

/// Production dispatch backend over HTTP. Single attempt per call.
#[derive(Debug, Clone)]
pub struct HttpDispatch {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpDispatch {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CoreError::Broadcast(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl DispatchBackend for HttpDispatch {
    async fn submit(&self, case: &EmergencyCase) -> CoreResult<CaseReceipt> {
        let body = DispatchRequest {
            category: &case.category_name,
            service_id: &case.service_id,
            description: &case.description,
            lat: case.lat,
            lng: case.lng,
            address: &case.address,
        };

        let mut req = self.client.post(&self.url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let res = req
            .send()
            .await
            .map_err(|e| CoreError::Broadcast(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(CoreError::Broadcast(format!(
                "dispatch returned {}: {}",
                status, body
            )));
        }

        let parsed = res
            .json::<DispatchResponse>()
            .await
            .map_err(|e| CoreError::Broadcast(e.to_string()))?;
        if let Some(err) = parsed.error {
            return Err(CoreError::Broadcast(err));
        }
        let data = parsed
            .data
            .ok_or_else(|| CoreError::Broadcast("dispatch response missing data".to_string()))?;
        let id = match data.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        info!("case created: {}", id);
        Ok(CaseReceipt { id })
    }
}

/// Recording dispatch for tests: captures every submission and replays queued
/// outcomes.
#[derive(Default)]
pub struct RecordingDispatch {
    submissions: Mutex<Vec<EmergencyCase>>,
    outcomes: Mutex<VecDeque<Result<String, String>>>,
}

impl RecordingDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful outcome with the given case id.
    pub fn push_success(&self, id: impl Into<String>) {
        lock_ignore_poison(&self.outcomes).push_back(Ok(id.into()));
    }

    /// Queue a failure for the next submission.
    pub fn push_failure(&self, message: impl Into<String>) {
        lock_ignore_poison(&self.outcomes).push_back(Err(message.into()));
    }

    pub fn submissions(&self) -> Vec<EmergencyCase> {
        lock_ignore_poison(&self.submissions).clone()
    }
}

#[async_trait]
impl DispatchBackend for RecordingDispatch {
    async fn submit(&self, case: &EmergencyCase) -> CoreResult<CaseReceipt> {
        lock_ignore_poison(&self.submissions).push(case.clone());
        match lock_ignore_poison(&self.outcomes).pop_front() {
            Some(Ok(id)) => Ok(CaseReceipt { id }),
            Some(Err(msg)) => Err(CoreError::Broadcast(msg)),
            None => Ok(CaseReceipt {
                id: "case-0".to_string(),
            }),
        }
    }
}
