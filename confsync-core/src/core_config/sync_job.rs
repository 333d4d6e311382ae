//! Outgoing sync pass
//!
//! ```text
//!   pending_changes ──▶ transport.store (per variant, with timeout)
//!                              │
//!                              ▼
//!           transport.delete(obsolete hashes)
//!                              │
//!                              ▼
//!      marking_as_pushed + persist dumps (one write transaction)
//! ```
//!
//! A push that fails to send is left pending on its config object and is
//! regenerated by the next run.

use crate::core_config::coordinator::ConfigSync;
use crate::core_config::errors::{SyncError, SyncResult};
use crate::core_config::handlers::SyncScheduler;
use crate::core_config::types::SharedConfigMessage;
use crate::core_config::variant::Namespace;
use crate::core_store::dumps;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Swarm response to a stored message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreResponse {
    pub hash: String,
}

/// Network collaborator for config messages
#[async_trait]
pub trait ConfigTransport: Send + Sync {
    async fn store(
        &self,
        public_key: &str,
        namespace: Namespace,
        message: &SharedConfigMessage,
    ) -> SyncResult<StoreResponse>;

    async fn delete(&self, public_key: &str, hashes: &[String]) -> SyncResult<()>;
}

/// Outcome of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pushed: usize,
    pub failed: usize,
    pub deleted: usize,
}

/// Sends pending config changes for an account
pub struct ConfigSyncJob {
    sync: Arc<ConfigSync>,
    transport: Arc<dyn ConfigTransport>,
    request_timeout: Duration,
}

async fn with_timeout<T>(
    request_timeout: Duration,
    call: impl Future<Output = SyncResult<T>>,
) -> SyncResult<T> {
    tokio::time::timeout(request_timeout, call).await.map_err(|_| SyncError::Timeout)?
}

impl ConfigSyncJob {
    pub fn new(
        sync: Arc<ConfigSync>,
        transport: Arc<dyn ConfigTransport>,
        request_timeout: Duration,
    ) -> Self {
        ConfigSyncJob { sync, transport, request_timeout }
    }

    /// Run one sync pass for `public_key`
    pub async fn run(&self, public_key: &str) -> SyncResult<SyncReport> {
        let pending = {
            let sync = self.sync.clone();
            let account = public_key.to_string();
            tokio::task::spawn_blocking(move || {
                sync.store().read(|conn| sync.pending_changes(conn, &account))
            })
            .await
            .map_err(|e| SyncError::Internal(format!("Task join error: {}", e)))??
        };

        let mut report = SyncReport::default();
        if pending.is_empty() {
            debug!(public_key, "No config changes to push");
            return Ok(report);
        }

        let mut stored = Vec::new();
        let mut obsolete = Vec::new();
        for change in pending {
            let variant = change.message.kind;
            let result = with_timeout(
                self.request_timeout,
                self.transport.store(public_key, change.namespace, &change.message),
            )
            .await;
            match result {
                Ok(response) => {
                    debug!(%variant, seq_no = change.message.seq_no, hash = %response.hash, "Stored config message");
                    obsolete.extend(change.obsolete_hashes);
                    stored.push((change.message, response.hash));
                }
                Err(err) => {
                    warn!(%variant, error = %err, "Failed to store config message");
                    report.failed += 1;
                }
            }
        }

        obsolete.sort();
        obsolete.dedup();
        if !obsolete.is_empty() {
            match with_timeout(self.request_timeout, self.transport.delete(public_key, &obsolete)).await {
                Ok(()) => report.deleted = obsolete.len(),
                Err(err) => warn!(count = obsolete.len(), error = %err, "Failed to delete obsolete config messages"),
            }
        }

        report.pushed = stored.len();
        if !stored.is_empty() {
            let sync = self.sync.clone();
            let account = public_key.to_string();
            tokio::task::spawn_blocking(move || {
                sync.store().write(|tx| {
                    for (message, hash) in &stored {
                        if let Some(dump) = sync.marking_as_pushed(message, hash, &account)? {
                            dumps::upsert(tx, &dump)?;
                        }
                    }
                    Ok(())
                })
            })
            .await
            .map_err(|e| SyncError::Internal(format!("Task join error: {}", e)))??;
        }

        info!(public_key, pushed = report.pushed, failed = report.failed, deleted = report.deleted,
            "Config sync pass finished");
        Ok(report)
    }

    /// Run a pass for every account received on `requests` until all
    /// senders are gone
    pub async fn serve(&self, mut requests: mpsc::UnboundedReceiver<String>) {
        while let Some(public_key) = requests.recv().await {
            if let Err(err) = self.run(&public_key).await {
                warn!(public_key = %public_key, error = %err, "Config sync pass failed");
            }
        }
        debug!("Config sync request channel closed");
    }
}

/// Scheduler that hands sync requests to [`ConfigSyncJob::serve`]
#[derive(Debug, Clone)]
pub struct ChannelScheduler {
    requests: mpsc::UnboundedSender<String>,
}

impl ChannelScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (requests, receiver) = mpsc::unbounded_channel();
        (ChannelScheduler { requests }, receiver)
    }
}

impl SyncScheduler for ChannelScheduler {
    fn enqueue_sync(&self, public_key: &str) {
        if self.requests.send(public_key.to_string()).is_err() {
            warn!(public_key, "Config sync worker is gone, dropping request");
        }
    }
}
