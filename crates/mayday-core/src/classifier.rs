//! Remote classifier bridge: one conversational turn in, assistant reply out.
//!
//! The classifier receives the full ordered transcript plus the best-known
//! location string and answers with the next assistant message, optionally
//! tagging the conversation with a [`DetectedCategory`]. The session machine
//! decides whether the confidence clears its threshold; this module only
//! moves bytes.

use crate::error::{CoreError, CoreResult};
use crate::types::{DetectedCategory, Message};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// What the classifier sends back for one turn.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierReply {
    /// The assistant message to append and narrate.
    #[serde(rename = "assistantResponse")]
    pub assistant_response: String,
    /// Present once the backend believes it recognized an emergency category.
    #[serde(rename = "detectedCategory", default)]
    pub detected_category: Option<DetectedCategory>,
}

/// One conversational turn against the remote classifier.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Send the ordered transcript and the best-known address string.
    async fn classify(&self, messages: &[Message], location: &str) -> CoreResult<ClassifierReply>;
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    messages: Vec<WireMessage<'a>>,
    location: &'a str,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Production classifier over HTTP.
#[derive(Debug, Clone)]
pub struct HttpClassifier {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpClassifier {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CoreError::Classifier(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, messages: &[Message], location: &str) -> CoreResult<ClassifierReply> {
        let body = ClassifyRequest {
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            location,
        };

        let mut req = self.client.post(&self.url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let res = req
            .send()
            .await
            .map_err(|e| CoreError::Classifier(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(CoreError::Classifier(format!(
                "classifier returned {}: {}",
                status, body
            )));
        }
        let reply = res
            .json::<ClassifierReply>()
            .await
            .map_err(|e| CoreError::Classifier(e.to_string()))?;
        Ok(reply)
    }
}

/// Scripted classifier for tests and offline demos: pops one queued outcome
/// per call and records what it was asked.
#[derive(Default)]
pub struct ScriptedClassifier {
    replies: Mutex<VecDeque<Result<ClassifierReply, String>>>,
    calls: Mutex<Vec<(usize, String)>>,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain assistant reply with no category.
    pub fn push_reply(&self, text: impl Into<String>) {
        self.push(Ok(ClassifierReply {
            assistant_response: text.into(),
            detected_category: None,
        }));
    }

    /// Queue a reply carrying a detected category.
    pub fn push_detection(&self, text: impl Into<String>, category: DetectedCategory) {
        self.push(Ok(ClassifierReply {
            assistant_response: text.into(),
            detected_category: Some(category),
        }));
    }

    /// Queue a failure for the next call.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.push(Err(message.into()));
    }

    fn push(&self, outcome: Result<ClassifierReply, String>) {
        lock_ignore_poison(&self.replies).push_back(outcome);
    }

    /// (message count, location string) for each call made so far.
    pub fn calls(&self) -> Vec<(usize, String)> {
        lock_ignore_poison(&self.calls).clone()
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, messages: &[Message], location: &str) -> CoreResult<ClassifierReply> {
        lock_ignore_poison(&self.calls).push((messages.len(), location.to_string()));
        match lock_ignore_poison(&self.replies).pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(msg)) => Err(CoreError::Classifier(msg)),
            None => Ok(ClassifierReply {
                assistant_response: "Can you tell me more?".to_string(),
                detected_category: None,
            }),
        }
    }
}

pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}
