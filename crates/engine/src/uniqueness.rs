//! Debounced, stale-safe uniqueness checks for names, emails and tax ids.
//!
//! Every check for a field key captures a fresh generation number. A
//! response is applied only if its generation is still the newest for
//! that key, so a slow answer for an old value can never overwrite the
//! outcome of the value the user typed last.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use onboard_client::{ClientError, FieldCheckResponse, OnboardingBackend};
use onboard_core::fields::{self, CheckContext, FieldKey, ValidationOutcome};
use tokio::sync::broadcast;

use crate::scheduler::{Debouncer, Scheduler};

/// Default delay between the last keystroke and the lookup.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(600);

/// Default bound on one availability lookup.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_CAPACITY: usize = 256;

/// One availability check request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    pub key: FieldKey,
    pub value: String,
    pub context: CheckContext,
    /// The value is already known to belong to the user (skip mode).
    pub confirmed: bool,
}

impl CheckRequest {
    pub fn new(key: FieldKey, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
            context: CheckContext::default(),
            confirmed: false,
        }
    }

    pub fn with_context(mut self, context: CheckContext) -> Self {
        self.context = context;
        self
    }

    pub fn confirmed(mut self, confirmed: bool) -> Self {
        self.confirmed = confirmed;
        self
    }
}

/// Result of one [`UniquenessValidator::check_unique`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The outcome became the field's current state.
    Applied(ValidationOutcome),
    /// A newer check was issued meanwhile; this result was discarded.
    Stale,
}

/// Broadcast whenever a field's outcome changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationEvent {
    pub key: FieldKey,
    pub generation: u64,
    pub outcome: ValidationOutcome,
    /// The lookup failed because the credential was rejected.
    pub auth_expired: bool,
}

#[derive(Debug, Default)]
struct FieldState {
    generation: u64,
    value: String,
    outcome: ValidationOutcome,
}

struct Inner {
    backend: Arc<dyn OnboardingBackend>,
    debouncer: Debouncer<FieldKey>,
    request_timeout: Duration,
    fields: Mutex<HashMap<FieldKey, FieldState>>,
    events: broadcast::Sender<ValidationEvent>,
}

/// Availability checker shared by all forms of a wizard.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct UniquenessValidator {
    inner: Arc<Inner>,
}

impl UniquenessValidator {
    pub fn new(
        backend: Arc<dyn OnboardingBackend>,
        scheduler: Arc<dyn Scheduler>,
        debounce: Duration,
    ) -> Self {
        Self::with_timeout(backend, scheduler, debounce, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
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
                fields: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ValidationEvent> {
        self.inner.events.subscribe()
    }

    /// Current outcome for `key`; idle when never checked.
    pub fn outcome(&self, key: &FieldKey) -> ValidationOutcome {
        self.fields()
            .get(key)
            .map(|state| state.outcome.clone())
            .unwrap_or_default()
    }

    /// Settled outcome for `key`, provided it was computed for `value`.
    pub fn outcome_for(&self, key: &FieldKey, value: &str) -> Option<ValidationOutcome> {
        self.fields()
            .get(key)
            .filter(|state| state.value == value.trim() && state.outcome.has_checked)
            .map(|state| state.outcome.clone())
    }

    /// Newest generation issued for `key`.
    pub fn generation(&self, key: &FieldKey) -> u64 {
        self.fields().get(key).map_or(0, |state| state.generation)
    }

    pub fn is_pending(&self, key: &FieldKey) -> bool {
        self.inner.debouncer.is_pending(key)
    }

    /// Debounced entry point: (re)starts the key's timer and runs
    /// [`check_unique`](Self::check_unique) once input settles.
    ///
    /// Any response still in flight for the key becomes stale immediately.
    pub fn schedule_check(&self, request: CheckRequest) {
        let key = request.key;
        self.invalidate(&key, &request.value);
        let validator = self.clone();
        tracing::debug!(field = %key, "Scheduling uniqueness check");
        self.inner.debouncer.call(
            key,
            Box::pin(async move {
                validator.check_unique(request).await;
            }),
        );
    }

    /// Check a value immediately.
    pub async fn check_unique(&self, request: CheckRequest) -> CheckOutcome {
        let CheckRequest {
            key,
            value,
            context,
            confirmed,
        } = request;
        let generation = self.invalidate(&key, &value);
        let value = value.trim();

        if value.is_empty() {
            return self.apply(key, generation, ValidationOutcome::empty(), false);
        }
        if confirmed {
            tracing::debug!(field = %key, "Value already confirmed, skipping lookup");
            return self.apply(key, generation, ValidationOutcome::available(), false);
        }
        if let Err(message) = fields::check_syntax(key.kind, value) {
            return self.apply(key, generation, ValidationOutcome::invalid(message), false);
        }

        self.apply(key, generation, ValidationOutcome::checking(), false);

        let lookup = self.inner.backend.check_field(key.kind, value, &context);
        let result = match tokio::time::timeout(self.inner.request_timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        };

        let (outcome, auth_expired) = match result {
            Ok(response) => (outcome_from_response(response), false),
            Err(e) if e.is_auth() => {
                tracing::warn!(field = %key, error = %e, "Uniqueness check rejected credentials");
                (ValidationOutcome::network_failure(), true)
            }
            Err(e) if e.is_network() => {
                tracing::warn!(field = %key, error = %e, "Uniqueness check failed");
                (ValidationOutcome::network_failure(), false)
            }
            Err(e) => (ValidationOutcome::invalid(e.user_message()), false),
        };

        self.apply(key, generation, outcome, auth_expired)
    }

    /// Drop the key's pending check and make any in-flight response stale.
    pub fn cancel(&self, key: &FieldKey) {
        self.inner.debouncer.cancel(key);
        let mut fields = self.fields();
        let state = fields.entry(*key).or_default();
        state.generation += 1;
        state.value.clear();
        state.outcome = ValidationOutcome::idle();
    }

    /// Forget every field. In-flight responses are discarded.
    pub fn reset(&self) {
        self.inner.debouncer.cancel_all();
        for state in self.fields().values_mut() {
            state.generation += 1;
            state.value.clear();
            state.outcome = ValidationOutcome::idle();
        }
    }

    // ---- private helpers ----

    fn fields(&self) -> MutexGuard<'_, HashMap<FieldKey, FieldState>> {
        self.inner
            .fields
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a new generation for `key` tracking `value`.
    fn invalidate(&self, key: &FieldKey, value: &str) -> u64 {
        let mut fields = self.fields();
        let state = fields.entry(*key).or_default();
        state.generation += 1;
        state.value = value.trim().to_string();
        state.outcome = ValidationOutcome::idle();
        state.generation
    }

    fn apply(
        &self,
        key: FieldKey,
        generation: u64,
        outcome: ValidationOutcome,
        auth_expired: bool,
    ) -> CheckOutcome {
        {
            let mut fields = self.fields();
            let state = fields.entry(key).or_default();
            if state.generation != generation {
                tracing::debug!(
                    field = %key,
                    generation,
                    latest = state.generation,
                    "Discarding stale uniqueness response",
                );
                return CheckOutcome::Stale;
            }
            state.outcome = outcome.clone();
        }

        // Zero subscribers is fine.
        let _ = self.inner.events.send(ValidationEvent {
            key,
            generation,
            outcome: outcome.clone(),
            auth_expired,
        });
        CheckOutcome::Applied(outcome)
    }
}

fn outcome_from_response(response: FieldCheckResponse) -> ValidationOutcome {
    if response.is_valid && response.is_available {
        ValidationOutcome::available()
    } else {
        ValidationOutcome::taken(
            response
                .message
                .unwrap_or_else(|| "This value is already in use".to_string()),
        )
    }
}
