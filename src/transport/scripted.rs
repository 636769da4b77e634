//! In-process transport with scripted outcomes
//!
//! Records every envelope it is asked to send. Each URL answers from a
//! queue of scripted outcomes, falling back to a default once the queue is
//! empty. Used by tests and local simulations.

use crate::transport::error::{TransportError, TransportResult};
use crate::transport::PeerTransport;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

/// One envelope handed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct SentEnvelope {
    pub url: String,
    pub envelope: Value,
    pub delivered: bool,
}

#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<TransportResult<()>>>>,
    unreachable: Mutex<Vec<String>>,
    sent: Mutex<Vec<SentEnvelope>>,
}

impl ScriptedTransport {
    /// Transport on which every send succeeds unless scripted otherwise
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next outcome for `url`
    pub fn push_outcome(&self, url: &str, outcome: TransportResult<()>) {
        self.scripts
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Queue `n` rejections for `url`
    pub fn fail_next(&self, url: &str, n: usize) {
        for _ in 0..n {
            self.push_outcome(
                url,
                Err(TransportError::Rejected {
                    status: 503,
                    body: "unavailable".into(),
                }),
            );
        }
    }

    /// Make `url` unreachable once its scripted outcomes run out
    pub fn set_unreachable(&self, url: &str) {
        self.unreachable.lock().push(url.to_string());
    }

    pub fn set_reachable(&self, url: &str) {
        self.unreachable.lock().retain(|u| u != url);
    }

    /// Everything sent so far, in order
    pub fn sent(&self) -> Vec<SentEnvelope> {
        self.sent.lock().clone()
    }

    /// Envelopes sent to `url`
    pub fn sent_to(&self, url: &str) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter(|s| s.url == url)
            .map(|s| s.envelope.clone())
            .collect()
    }
}

#[async_trait]
impl PeerTransport for ScriptedTransport {
    async fn send(&self, url: &str, envelope: &Value) -> TransportResult<()> {
        let scripted = self
            .scripts
            .lock()
            .get_mut(url)
            .and_then(|queue| queue.pop_front());

        let outcome = match scripted {
            Some(outcome) => outcome,
            None if self.unreachable.lock().iter().any(|u| u == url) => {
                Err(TransportError::Unreachable("connection refused".into()))
            }
            None => Ok(()),
        };

        self.sent.lock().push(SentEnvelope {
            url: url.to_string(),
            envelope: envelope.clone(),
            delivered: outcome.is_ok(),
        });

        outcome
    }
}
