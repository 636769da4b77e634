//! Background loop scheduling
//!
//! Starts the retry and presence loops on the runtime and stops them
//! through a shared shutdown signal.

use crate::relay::{RelayEvent, RelayNode};
use crate::worker::presence::PresenceBroadcaster;
use crate::worker::retry::RetryWorker;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub struct Scheduler {
    node: Arc<RelayNode>,
    events: Option<mpsc::UnboundedReceiver<RelayEvent>>,
}

impl Scheduler {
    pub fn new(node: Arc<RelayNode>) -> Self {
        Self { node, events: None }
    }

    /// Wake the retry worker on node events instead of waiting for its tick
    ///
    /// `events` must be the receiving end of the channel passed to
    /// [`RelayNode::with_events`].
    pub fn with_events(mut self, events: mpsc::UnboundedReceiver<RelayEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Spawn both loops
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = self.node.config();

        let retry = RetryWorker::new(self.node.clone());
        let retry_task = tokio::spawn(retry.run(
            config.retry_interval,
            self.events,
            shutdown_rx.clone(),
        ));

        let presence = PresenceBroadcaster::new(self.node.clone());
        let presence_task = tokio::spawn(presence.run(shutdown_rx));

        SchedulerHandle {
            shutdown: shutdown_tx,
            tasks: vec![retry_task, presence_task],
        }
    }
}

/// Handle to running background loops
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signal both loops and wait for them to finish their current tick
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("Background loop panicked: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::relay::{PeerSpec, RelayNodeBuilder};
    use crate::store::DeliveryState;
    use crate::transport::ScriptedTransport;
    use std::time::Duration;

    #[tokio::test]
    async fn test_staged_message_wakes_retry_worker() {
        let transport = Arc::new(ScriptedTransport::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let mut config = crate::relay::RelayConfig {
            node_id: "A".into(),
            default_peer: Some("http://hub:8080/".into()),
            retry_interval: Duration::from_secs(3600),
            presence_interval: Duration::from_secs(3600),
            route_max_age: Duration::from_secs(7200),
            ..Default::default()
        };
        config.peers.push(PeerSpec::new("B", "http://b:8080/"));

        let node = Arc::new(
            RelayNodeBuilder::new()
                .config(config)
                .build(transport.clone())
                .unwrap()
                .with_events(tx),
        );
        let handle = Scheduler::new(node.clone()).with_events(rx).start();

        let msg = Message::parse(br#"{"msgid":"m1","dest":"B","ttl":2}"#, 5).unwrap();
        node.accept(msg, None).unwrap();

        let mut delivered = false;
        for _ in 0..100 {
            if node
                .delivery_status("m1")
                .is_some_and(|s| s.state == DeliveryState::Sent)
            {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(delivered);

        handle.shutdown().await;
        assert!(transport.sent().iter().any(|s| s.envelope["msgid"] == "m1"));
    }
}
