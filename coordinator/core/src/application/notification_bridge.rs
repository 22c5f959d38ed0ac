// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Change Notification Bridge
//!
//! Drains a store's change feed into a [`PublishSink`]. Publishing never
//! blocks the feed and nothing is acknowledged. Against the strong backend the
//! bridge follows the active handle and resubscribes after every mode switch.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::events::{ChangeStream, PublishSink};
use crate::infrastructure::repositories::FailoverGridStore;

pub struct NotificationBridge {
    sink: Arc<dyn PublishSink>,
    resubscribe_delay: Duration,
    shutdown_token: CancellationToken,
}

impl NotificationBridge {
    pub fn new(sink: Arc<dyn PublishSink>) -> Self {
        Self {
            sink,
            resubscribe_delay: Duration::from_secs(3),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = token;
        self
    }

    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Forward until the stream ends or shutdown. Returns events forwarded.
    pub async fn forward(&self, mut stream: ChangeStream) -> u64 {
        let mut forwarded = 0u64;
        loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some(event) => {
                        self.sink.publish(event);
                        forwarded += 1;
                    }
                    None => break,
                },
                _ = self.shutdown_token.cancelled() => break,
            }
        }
        forwarded
    }

    /// Forward one fixed stream in the background.
    pub fn start(self: Arc<Self>, stream: ChangeStream) -> JoinHandle<()> {
        tokio::spawn(async move {
            let forwarded = self.forward(stream).await;
            info!(forwarded, "Change feed ended");
        })
    }

    /// Follow the active handle of a failover store, resubscribing whenever
    /// the mode changes or the feed drops.
    pub fn start_following(self: Arc<Self>, store: Arc<FailoverGridStore>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut mode_rx = store.subscribe_mode();

            loop {
                if self.shutdown_token.is_cancelled() {
                    break;
                }
                let active = store.active();
                let _ = mode_rx.borrow_and_update();

                match active.store.watch().await {
                    Ok(stream) => {
                        info!(mode = %active.mode, "Subscribed to change feed");
                        tokio::select! {
                            forwarded = self.forward(stream) => {
                                debug!(forwarded, mode = %active.mode, "Change feed ended, resubscribing");
                                self.pause().await;
                            }
                            changed = mode_rx.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                                info!("Active backend changed, resubscribing change feed");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(mode = %active.mode, "Change feed subscription failed: {}", e);
                        tokio::select! {
                            _ = self.pause() => {}
                            _ = mode_rx.changed() => {}
                        }
                    }
                }
            }
            info!("Notification bridge stopped");
        })
    }

    async fn pause(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.resubscribe_delay) => {}
            _ = self.shutdown_token.cancelled() => {}
        }
    }
}
