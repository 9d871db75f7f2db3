//! Wizard orchestrator.
//!
//! [`Wizard`] owns the [`OnboardingSession`] and wires the pure core
//! (flow controller, inheritance mapper, constraint checks) to the
//! asynchronous parts: debounced uniqueness checks, progressive saves and
//! the persisted session store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use onboard_client::{ClientError, OnboardingBackend, SaveResponse};
use onboard_core::entity::{check_section_shape, validate_section, ScheduleSection};
use onboard_core::error::CoreError;
use onboard_core::fields::{CheckContext, FieldKey, FieldKind, ValidationOutcome};
use onboard_core::flow::{self, Direction, Progress, Transition};
use onboard_core::inheritance::{inherited_draft, overlay};
use onboard_core::plan::{EntityKind, PlanType, StepPosition, SubStep};
use onboard_core::session::{OnboardingSession, OwnerIdentity, PendingSync, SessionStatus};
use onboard_core::working_hours::{
    validate_schedule_shape, validate_working_hours, HoursReport, WeeklySchedule,
};
use serde_json::{Map, Value};

use crate::autosave::{self, SaveCoordinator, SaveError, SaveTarget};
use crate::config::WizardConfig;
use crate::error::WizardError;
use crate::scheduler::Scheduler;
use crate::store::SessionStore;
use crate::uniqueness::{self, CheckOutcome, CheckRequest, UniquenessValidator};

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// Everything a wizard needs from the outside world.
#[derive(Clone)]
pub struct WizardDeps {
    pub backend: Arc<dyn OnboardingBackend>,
    pub scheduler: Arc<dyn Scheduler>,
    pub store: SessionStore,
    pub validation_debounce: Duration,
    pub autosave_debounce: Duration,
    pub request_timeout: Duration,
}

impl WizardDeps {
    pub fn new(
        backend: Arc<dyn OnboardingBackend>,
        scheduler: Arc<dyn Scheduler>,
        store: SessionStore,
    ) -> Self {
        Self {
            backend,
            scheduler,
            store,
            validation_debounce: uniqueness::DEFAULT_DEBOUNCE,
            autosave_debounce: autosave::DEFAULT_DEBOUNCE,
            request_timeout: uniqueness::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Take debounce delays and the request timeout from `config`.
    pub fn with_config(mut self, config: &WizardConfig) -> Self {
        self.validation_debounce = config.validation_debounce;
        self.autosave_debounce = config.autosave_debounce;
        self.request_timeout = config.request_timeout;
        self
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Non-blocking problem encountered while submitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveWarning {
    /// Step key of the section, or `complete:{entity}` for finalization.
    pub target: String,
    pub message: String,
}

/// Outcome of a successful [`Wizard::submit`].
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitReport {
    pub submitted: StepPosition,
    pub transition: Transition,
    /// Whether the backend confirmed the section save.
    pub saved: bool,
    /// Entity finalized because the submit left its step.
    pub finalized: Option<EntityKind>,
    pub warnings: Vec<SaveWarning>,
}

impl SubmitReport {
    pub fn is_complete(&self) -> bool {
        self.transition == Transition::Complete
    }
}

/// Outcome of [`Wizard::flush_unsynced`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entries the backend confirmed.
    pub flushed: Vec<PendingSync>,
    /// Entries the backend refused. They are not retried.
    pub dropped: Vec<PendingSync>,
    pub warnings: Vec<SaveWarning>,
}

impl FlushReport {
    fn warn(&mut self, item: PendingSync, message: String) {
        self.warnings.push(SaveWarning {
            target: item.to_string(),
            message,
        });
    }
}

/// Result of sending one unsynced entry again.
enum Replay {
    Synced,
    Refused(String),
    Unreachable(String),
}

// ---------------------------------------------------------------------------
// Wizard
// ---------------------------------------------------------------------------

pub struct Wizard {
    session: OnboardingSession,
    backend: Arc<dyn OnboardingBackend>,
    validator: UniquenessValidator,
    saver: SaveCoordinator,
    store: SessionStore,
    request_timeout: Duration,
    terminated: bool,
}

impl Wizard {
    /// Begin a new session for `plan` and persist it.
    pub async fn start(
        plan: PlanType,
        owner: Option<OwnerIdentity>,
        deps: WizardDeps,
    ) -> Result<Self, WizardError> {
        let mut session = OnboardingSession::new(plan);
        if let Some(owner) = owner {
            session = session.with_owner(owner);
        }
        let wizard = Self::with_session(session, deps);
        wizard.store.save(&wizard.session).await?;
        tracing::info!(
            session_id = %wizard.session.id,
            plan = %plan,
            step_key = %wizard.session.step_key(),
            "Onboarding started",
        );
        Ok(wizard)
    }

    /// Continue the persisted session, if there is one.
    pub async fn resume(deps: WizardDeps) -> Result<Option<Self>, WizardError> {
        match deps.store.load().await? {
            Some(session) => Ok(Some(Self::with_session(session, deps))),
            None => Ok(None),
        }
    }

    pub fn with_session(session: OnboardingSession, deps: WizardDeps) -> Self {
        let validator = UniquenessValidator::with_timeout(
            deps.backend.clone(),
            deps.scheduler.clone(),
            deps.validation_debounce,
            deps.request_timeout,
        );
        let saver = SaveCoordinator::new(
            deps.backend.clone(),
            deps.scheduler,
            deps.autosave_debounce,
            deps.request_timeout,
        );
        Self {
            session,
            backend: deps.backend,
            validator,
            saver,
            store: deps.store,
            request_timeout: deps.request_timeout,
            terminated: false,
        }
    }

    // ---- accessors ----

    pub fn session(&self) -> &OnboardingSession {
        &self.session
    }

    pub fn position(&self) -> StepPosition {
        self.session.current
    }

    pub fn plan_type(&self) -> PlanType {
        self.session.plan_type
    }

    pub fn current_entity(&self) -> Result<EntityKind, WizardError> {
        Ok(self.session.current_entity()?)
    }

    pub fn progress(&self) -> Progress {
        flow::progress(self.session.plan_type, self.session.completed())
    }

    pub fn is_complete(&self) -> bool {
        self.session.status == SessionStatus::Completed
    }

    /// Set after the backend rejected the user's credentials.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Sections and entities accepted locally but not confirmed by the
    /// backend.
    pub fn unsynced(&self) -> &BTreeSet<PendingSync> {
        self.session.unsynced()
    }

    pub fn validator(&self) -> &UniquenessValidator {
        &self.validator
    }

    pub fn saver(&self) -> &SaveCoordinator {
        &self.saver
    }

    // ---- drafts ----

    /// Draft for the current sub-step: the section derived from the parent
    /// entity, overlaid by the user's own edits.
    pub fn draft(&self) -> Result<Value, WizardError> {
        let base = self.inherited_section()?;
        let edits = self
            .session
            .payload(self.session.current)
            .cloned()
            .unwrap_or(Value::Null);
        Ok(overlay(base, &edits))
    }

    /// Record edits to the current sub-step.
    ///
    /// The edits are persisted locally and queued for a background save.
    /// On a schedule sub-step the working hours are checked right away and
    /// the report is returned for inline display. Edits whose fields do not
    /// have the section's types are rejected and not recorded.
    pub async fn edit(&mut self, payload: Value) -> Result<Option<HoursReport>, WizardError> {
        self.ensure_active()?;
        let position = self.session.current;
        let entity = self.session.current_entity()?;
        check_section_shape(position.sub_step, &payload).map_err(inline)?;

        self.session.record_payload(position, payload)?;
        self.store.save(&self.session).await?;

        let draft = self.draft()?;
        self.saver
            .autosave(SaveTarget::new(position, entity), draft.clone());

        if position.sub_step != SubStep::Schedule {
            return Ok(None);
        }
        let schedule = decode_schedule(&draft)?;
        let parent = self.parent_hours(entity)?;
        let report = validate_schedule_shape(&schedule)
            .merge(validate_working_hours(&schedule, parent.as_ref()));
        Ok(Some(report))
    }

    // ---- uniqueness ----

    /// Queue a debounced availability check for a field of the current
    /// sub-step. Values the user already owns are not looked up.
    pub fn check_field(
        &self,
        kind: FieldKind,
        value: &str,
        context: CheckContext,
    ) -> Result<(), WizardError> {
        self.ensure_active()?;
        self.validator.schedule_check(self.check_request(kind, value, context));
        Ok(())
    }

    /// Check a field of the current sub-step immediately.
    pub async fn check_field_now(
        &self,
        kind: FieldKind,
        value: &str,
        context: CheckContext,
    ) -> Result<CheckOutcome, WizardError> {
        self.ensure_active()?;
        Ok(self
            .validator
            .check_unique(self.check_request(kind, value, context))
            .await)
    }

    /// Latest outcome for a field of the current sub-step.
    pub fn field_outcome(&self, kind: FieldKind) -> ValidationOutcome {
        self.validator
            .outcome(&FieldKey::new(self.session.current, kind))
    }

    fn check_request(&self, kind: FieldKind, value: &str, context: CheckContext) -> CheckRequest {
        let position = self.session.current;
        CheckRequest::new(FieldKey::new(position, kind), value)
            .with_context(context)
            .confirmed(self.session.is_confirmed(position.step, kind, value))
    }

    // ---- navigation ----

    /// Submit the current sub-step and move on.
    ///
    /// Runs the section checks, the working-hours constraint and the
    /// uniqueness gate, then saves. A network failure does not block: the
    /// draft is kept locally, the sub-step counts as complete and the report
    /// carries a warning. Backend rejections and constraint violations
    /// block; a rejected credential terminates the wizard.
    ///
    /// Data left unsynced by earlier submits is sent again first.
    pub async fn submit(&mut self, payload: Value) -> Result<SubmitReport, WizardError> {
        self.ensure_active()?;
        let position = self.session.current;
        let entity = self.session.current_entity()?;
        let draft = overlay(self.inherited_section()?, &payload);

        validate_section(entity, position.sub_step, &draft).map_err(inline)?;
        if position.sub_step == SubStep::Schedule {
            let schedule = decode_schedule(&draft)?;
            let report = validate_working_hours(&schedule, self.parent_hours(entity)?.as_ref());
            if !report.is_valid {
                tracing::info!(
                    step_key = %position,
                    violations = report.violations.len(),
                    "Working hours outside parent schedule",
                );
                return Err(WizardError::Constraint(report));
            }
        }
        self.uniqueness_gate(position, entity, &draft)?;

        self.session.record_payload(position, draft.clone())?;
        self.store.save(&self.session).await?;

        let mut warnings = Vec::new();
        if !self.session.is_synced() {
            warnings.extend(self.flush_unsynced().await?.warnings);
        }

        let saved = match self.saver.save_now(SaveTarget::new(position, entity), &draft).await {
            Ok(_) => {
                self.session.mark_synced(PendingSync::Section(position));
                true
            }
            Err(SaveError::Rejected { message }) => {
                tracing::info!(step_key = %position, reason = %message, "Section rejected");
                return Err(WizardError::BackendRejection(message));
            }
            Err(SaveError::Client(e)) if e.is_auth() => return Err(self.terminate(&e)),
            Err(SaveError::Client(e)) if e.is_network() => {
                tracing::warn!(step_key = %position, error = %e, "Section kept locally, save failed");
                self.session.mark_unsynced(PendingSync::Section(position));
                warnings.push(SaveWarning {
                    target: position.key(),
                    message: format!("Saved on this device only; the server could not be reached ({e})"),
                });
                false
            }
            Err(SaveError::Client(e)) => return Err(WizardError::BackendRejection(e.user_message())),
        };

        self.session.mark_completed(position)?;
        let transition = flow::advance(&self.session, Direction::Next)?;
        let mut finalized = None;

        match transition {
            Transition::Moved { to, crossed_step } => {
                if crossed_step {
                    self.finalize(entity, &mut warnings).await?;
                    finalized = Some(entity);
                }
                self.session.move_to(to)?;
                self.store.save(&self.session).await?;
                tracing::info!(
                    session_id = %self.session.id,
                    from = %position,
                    to = %to,
                    "Advanced to next sub-step",
                );
            }
            Transition::Complete => {
                self.finalize(entity, &mut warnings).await?;
                finalized = Some(entity);
                self.finish().await?;
            }
            Transition::Stayed(_) => self.store.save(&self.session).await?,
        }

        Ok(SubmitReport {
            submitted: position,
            transition,
            saved,
            finalized,
            warnings,
        })
    }

    /// Go back one sub-step. Stays put on the first one.
    pub async fn back(&mut self) -> Result<Transition, WizardError> {
        self.ensure_active()?;
        let transition = flow::advance(&self.session, Direction::Previous)?;
        if let Transition::Moved { to, .. } = transition {
            self.session.move_to(to)?;
            self.store.save(&self.session).await?;
            tracing::debug!(step_key = %to, "Moved back");
        }
        Ok(transition)
    }

    /// Discard all progress and start the same plan over.
    pub async fn restart(&mut self) -> Result<(), WizardError> {
        self.store.clear().await?;
        self.saver.reset();
        self.validator.reset();
        self.session.reset();
        self.store.save(&self.session).await?;
        tracing::info!(session_id = %self.session.id, "Onboarding restarted");
        Ok(())
    }

    /// Send every section and finalization the backend has not confirmed
    /// yet, in order: sections first, then completions.
    ///
    /// Stops at the first unreachable request and keeps the rest for a later
    /// attempt. Entries the backend refuses are dropped with a warning. Works
    /// on a completed session too; its local data is cleared once nothing is
    /// left to send.
    pub async fn flush_unsynced(&mut self) -> Result<FlushReport, WizardError> {
        if self.terminated {
            return Err(WizardError::Terminated);
        }
        let mut report = FlushReport::default();
        let pending: Vec<PendingSync> = self.session.unsynced().iter().copied().collect();
        if pending.is_empty() {
            return Ok(report);
        }

        for item in pending {
            match self.replay(item).await {
                Ok(Replay::Synced) => {
                    self.session.mark_synced(item);
                    report.flushed.push(item);
                }
                Ok(Replay::Refused(message)) => {
                    tracing::warn!(entry = %item, reason = %message, "Unsynced entry refused, dropping it");
                    self.session.mark_synced(item);
                    report.dropped.push(item);
                    report.warn(item, message);
                }
                Ok(Replay::Unreachable(message)) => {
                    tracing::warn!(entry = %item, reason = %message, "Server still unreachable, keeping unsynced data");
                    report.warn(item, message);
                    break;
                }
                Err(e) => {
                    self.store.save(&self.session).await?;
                    return Err(self.terminate(&e));
                }
            }
        }

        if self.is_complete() && self.session.is_synced() {
            self.store.clear().await?;
        } else {
            self.store.save(&self.session).await?;
        }
        tracing::info!(
            session_id = %self.session.id,
            flushed = report.flushed.len(),
            dropped = report.dropped.len(),
            remaining = self.session.unsynced().len(),
            "Unsynced data flushed",
        );
        Ok(report)
    }

    /// Merge the backend's record of completed sub-steps into the local
    /// session. The local set never shrinks.
    ///
    /// Unsynced data is flushed first. Returns how many sub-steps were newly
    /// marked complete.
    pub async fn sync_progress(&mut self) -> Result<usize, WizardError> {
        if self.terminated {
            return Err(WizardError::Terminated);
        }
        self.flush_unsynced().await?;
        let plan = self.session.plan_type;

        let remote = match self.with_timeout(self.backend.progress()).await {
            Ok(remote) => remote,
            Err(e) if e.is_auth() => return Err(self.terminate(&e)),
            Err(e) => return Err(WizardError::Network(e.to_string())),
        };

        if let Some(raw) = remote.plan_type.as_deref() {
            match raw.parse::<PlanType>() {
                Ok(remote_plan) if remote_plan == plan => {}
                _ => {
                    tracing::warn!(local = %plan, remote = %raw, "Remote progress is for another plan");
                    return Ok(0);
                }
            }
        }

        let mut merged = 0;
        for position in remote.completed_positions() {
            if plan.contains(position) && self.session.mark_completed(position)? {
                merged += 1;
            }
        }

        if merged > 0 {
            if flow::is_plan_complete(plan, self.session.completed()) {
                self.finish().await?;
            } else {
                let resume = flow::resume_position(plan, self.session.completed());
                if self.session.is_completed(self.session.current) {
                    self.session.move_to(resume)?;
                }
                self.store.save(&self.session).await?;
            }
        }

        tracing::info!(
            merged,
            step_key = %self.session.step_key(),
            "Progress reconciled with backend",
        );
        Ok(merged)
    }

    // ---- private helpers ----

    fn ensure_active(&self) -> Result<(), WizardError> {
        if self.terminated {
            return Err(WizardError::Terminated);
        }
        if self.is_complete() {
            return Err(WizardError::Validation(
                "Onboarding is already complete".to_string(),
            ));
        }
        Ok(())
    }

    /// Section of the current sub-step derived from the parent entity, or an
    /// empty object when nothing is inherited.
    fn inherited_section(&self) -> Result<Value, WizardError> {
        let entity = self.session.current_entity()?;
        match inherited_draft(&self.session, entity)? {
            Some(snapshot) => Ok(snapshot.section_payload(self.session.current.sub_step)?),
            None => Ok(Value::Object(Map::new())),
        }
    }

    fn parent_hours(&self, entity: EntityKind) -> Result<Option<WeeklySchedule>, WizardError> {
        Ok(inherited_draft(&self.session, entity)?.and_then(|s| s.parent_working_hours))
    }

    /// Block submission when a unique field's latest settled check, for the
    /// value being submitted, found it taken. Lookup failures do not block.
    fn uniqueness_gate(
        &self,
        position: StepPosition,
        entity: EntityKind,
        draft: &Value,
    ) -> Result<(), WizardError> {
        for (kind, value) in unique_fields(entity, position.sub_step, draft) {
            if self.session.is_confirmed(position.step, kind, &value) {
                continue;
            }
            let Some(outcome) = self.validator.outcome_for(&FieldKey::new(position, kind), &value)
            else {
                continue;
            };
            if !outcome.is_valid && !outcome.is_network_failure() {
                return Err(WizardError::Validation(
                    outcome
                        .message
                        .unwrap_or_else(|| format!("{kind} is not available")),
                ));
            }
        }
        Ok(())
    }

    async fn finalize(
        &mut self,
        entity: EntityKind,
        warnings: &mut Vec<SaveWarning>,
    ) -> Result<(), WizardError> {
        let item = PendingSync::Completion(entity);
        match self.complete_entity(entity).await {
            Ok(response) if response.success => {
                self.session.mark_synced(item);
                tracing::info!(entity = %entity, "Entity setup finalized");
            }
            Ok(response) => {
                let message = refusal_message(response, entity);
                tracing::warn!(entity = %entity, reason = %message, "Entity finalization refused");
                self.session.mark_unsynced(item);
                warnings.push(SaveWarning {
                    target: item.to_string(),
                    message,
                });
            }
            Err(e) if e.is_auth() => return Err(self.terminate(&e)),
            Err(e) => {
                tracing::warn!(entity = %entity, error = %e, "Entity finalization failed");
                self.session.mark_unsynced(item);
                warnings.push(SaveWarning {
                    target: item.to_string(),
                    message: e.user_message(),
                });
            }
        }
        Ok(())
    }

    async fn complete_entity(&self, entity: EntityKind) -> Result<SaveResponse, ClientError> {
        self.with_timeout(self.backend.complete_entity(entity)).await
    }

    async fn with_timeout<T>(
        &self,
        request: impl std::future::Future<Output = Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// Send one unsynced entry again. Only a rejected credential is an
    /// error.
    async fn replay(&self, item: PendingSync) -> Result<Replay, ClientError> {
        match item {
            PendingSync::Section(position) => {
                let Some(entity) = self.session.plan_type.entity_for(position.step) else {
                    return Ok(Replay::Refused(format!("Step {} is not part of this plan", position.step)));
                };
                let Some(payload) = self.session.payload(position) else {
                    return Ok(Replay::Refused("No local data left for this section".to_string()));
                };
                match self.saver.save_now(SaveTarget::new(position, entity), payload).await {
                    Ok(_) => Ok(Replay::Synced),
                    Err(SaveError::Rejected { message }) => Ok(Replay::Refused(message)),
                    Err(SaveError::Client(e)) => classify(e),
                }
            }
            PendingSync::Completion(entity) => match self.complete_entity(entity).await {
                Ok(response) if response.success => Ok(Replay::Synced),
                Ok(response) => Ok(Replay::Refused(refusal_message(response, entity))),
                Err(e) => classify(e),
            },
        }
    }

    /// Mark the session finished. Local storage is cleared unless some
    /// data never reached the backend.
    async fn finish(&mut self) -> Result<(), WizardError> {
        self.session.mark_finished();
        self.validator.reset();
        self.saver.reset();
        if self.session.is_synced() {
            self.store.clear().await?;
        } else {
            self.store.save(&self.session).await?;
            tracing::warn!(
                unsynced = self.session.unsynced().len(),
                "Keeping local onboarding data until it reaches the server",
            );
        }
        tracing::info!(session_id = %self.session.id, plan = %self.session.plan_type, "Onboarding complete");
        Ok(())
    }

    fn terminate(&mut self, err: &ClientError) -> WizardError {
        self.terminated = true;
        tracing::warn!(session_id = %self.session.id, error = %err, "Credentials rejected, wizard stopped");
        WizardError::Auth(err.user_message())
    }
}

/// Map form-local core errors to inline validation errors.
fn inline(err: CoreError) -> WizardError {
    match err {
        CoreError::Validation(message) => WizardError::Validation(message),
        other => WizardError::Core(other),
    }
}

fn refusal_message(response: SaveResponse, entity: EntityKind) -> String {
    response
        .message
        .unwrap_or_else(|| format!("The server did not finalize the {entity}"))
}

fn classify(err: ClientError) -> Result<Replay, ClientError> {
    if err.is_auth() {
        Err(err)
    } else if err.is_network() {
        Ok(Replay::Unreachable(err.user_message()))
    } else {
        Ok(Replay::Refused(err.user_message()))
    }
}

fn decode_schedule(draft: &Value) -> Result<WeeklySchedule, WizardError> {
    serde_json::from_value::<ScheduleSection>(draft.clone())
        .map(|section| section.working_hours)
        .map_err(|e| WizardError::Validation(format!("Malformed schedule data: {e}")))
}

/// Uniquely-owned fields present in a section payload.
fn unique_fields(entity: EntityKind, sub_step: SubStep, draft: &Value) -> Vec<(FieldKind, String)> {
    let (kind, field) = match sub_step {
        SubStep::Overview => (FieldKind::name_of(entity), "name"),
        SubStep::Contact => (FieldKind::Email, "email"),
        SubStep::Legal => (FieldKind::TaxId, "taxId"),
        SubStep::Services | SubStep::Schedule => return Vec::new(),
    };
    draft
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| vec![(kind, v.to_string())])
        .unwrap_or_default()
}
