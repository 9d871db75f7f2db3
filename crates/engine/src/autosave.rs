//! Progressive save coordinator.
//!
//! Drafts are saved section by section as the user types (debounced
//! autosave) and once more, explicitly, when a sub-step is submitted.
//! The coordinator skips writes whose content hash matches the last
//! successful save, keeps at most one save in flight per step key and
//! never retries on its own: the local draft stays the source of truth.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use onboard_client::{ClientError, OnboardingBackend, SaveResponse};
use onboard_core::hashing::payload_hash;
use onboard_core::plan::{EntityKind, StepPosition};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::scheduler::{Debouncer, Scheduler};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

const EVENT_CAPACITY: usize = 256;

/// Where a section payload is saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SaveTarget {
    pub position: StepPosition,
    pub entity: EntityKind,
}

impl SaveTarget {
    pub fn new(position: StepPosition, entity: EntityKind) -> Self {
        Self { position, entity }
    }

    /// Step key used for debouncing and dedupe, e.g. `"2-contact"`.
    pub fn key(&self) -> String {
        self.position.key()
    }
}

/// A save the backend accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveReceipt {
    pub key: String,
    pub hash: String,
    pub response: SaveResponse,
}

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The backend answered `success: false`.
    #[error("Save rejected: {message}")]
    Rejected { message: String },
}

impl SaveError {
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Client(e) if e.is_network())
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Client(e) if e.is_auth())
    }
}

/// Lifecycle notifications for background saves.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveEvent {
    /// Content unchanged since the last successful save.
    Skipped { key: String },
    /// Another save for the key was still in flight.
    Dropped { key: String },
    Saved { key: String, hash: String },
    Failed { key: String, error: String, network: bool },
}

struct Inner {
    backend: Arc<dyn OnboardingBackend>,
    debouncer: Debouncer<String>,
    request_timeout: Duration,
    last_saved: Mutex<HashMap<String, String>>,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    events: broadcast::Sender<SaveEvent>,
}

/// Cheap to clone; clones share bookkeeping.
#[derive(Clone)]
pub struct SaveCoordinator {
    inner: Arc<Inner>,
}

impl SaveCoordinator {
    pub fn new(
        backend: Arc<dyn OnboardingBackend>,
        scheduler: Arc<dyn Scheduler>,
        debounce: Duration,
        request_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                backend,
                debouncer: Debouncer::new(scheduler, debounce),
                request_timeout,
                last_saved: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SaveEvent> {
        self.inner.events.subscribe()
    }

    /// Hash of the last payload the backend accepted for `key`.
    pub fn last_saved_hash(&self, key: &str) -> Option<String> {
        lock(&self.inner.last_saved).get(key).cloned()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.inner.debouncer.is_pending(&key.to_string())
    }

    /// Queue a background save. Restarts the key's debounce timer.
    pub fn autosave(&self, target: SaveTarget, payload: Value) {
        let coordinator = self.clone();
        self.inner.debouncer.call(
            target.key(),
            Box::pin(async move {
                coordinator.run_autosave(target, payload).await;
            }),
        );
    }

    /// Save right away, cancelling any pending autosave for the key.
    ///
    /// Always reaches the backend, even when the content is unchanged.
    /// Waits for a save already in flight for the same key.
    pub async fn save_now(&self, target: SaveTarget, payload: &Value) -> Result<SaveReceipt, SaveError> {
        let key = target.key();
        self.inner.debouncer.cancel(&key);

        let slot = self.key_lock(&key);
        let _guard = slot.lock().await;
        self.send(target, payload).await
    }

    /// Drop bookkeeping for one key.
    pub fn forget(&self, key: &str) {
        self.inner.debouncer.cancel(&key.to_string());
        lock(&self.inner.last_saved).remove(key);
    }

    /// Drop all bookkeeping, e.g. when the wizard restarts.
    pub fn reset(&self) {
        self.inner.debouncer.cancel_all();
        lock(&self.inner.last_saved).clear();
    }

    // ---- private helpers ----

    async fn run_autosave(&self, target: SaveTarget, payload: Value) {
        let key = target.key();
        if self.last_saved_hash(&key).as_deref() == Some(payload_hash(&payload).as_str()) {
            tracing::debug!(step_key = %key, "Autosave skipped, content unchanged");
            self.publish(SaveEvent::Skipped { key });
            return;
        }

        let slot = self.key_lock(&key);
        let Ok(_guard) = slot.try_lock() else {
            tracing::debug!(step_key = %key, "Autosave dropped, save already in flight");
            self.publish(SaveEvent::Dropped { key });
            return;
        };

        match self.send(target, &payload).await {
            Ok(receipt) => self.publish(SaveEvent::Saved {
                key,
                hash: receipt.hash,
            }),
            Err(e) => {
                tracing::warn!(step_key = %key, error = %e, "Autosave failed");
                self.publish(SaveEvent::Failed {
                    key,
                    error: e.to_string(),
                    network: e.is_network(),
                });
            }
        }
    }

    async fn send(&self, target: SaveTarget, payload: &Value) -> Result<SaveReceipt, SaveError> {
        let key = target.key();
        let hash = payload_hash(payload);

        let request =
            self.inner
                .backend
                .save_section(target.entity, target.position.sub_step, payload);
        let response = match tokio::time::timeout(self.inner.request_timeout, request).await {
            Ok(result) => result?,
            Err(_) => return Err(ClientError::Timeout.into()),
        };

        if !response.success {
            let message = response
                .message
                .clone()
                .unwrap_or_else(|| "The server rejected this section".to_string());
            return Err(SaveError::Rejected { message });
        }

        lock(&self.inner.last_saved).insert(key.clone(), hash.clone());
        tracing::info!(step_key = %key, entity = %target.entity, "Section saved");
        Ok(SaveReceipt {
            key,
            hash,
            response,
        })
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.inner.in_flight)
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    fn publish(&self, event: SaveEvent) {
        let _ = self.inner.events.send(event);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
