//! In-memory model of one onboarding session.
//!
//! The session is an explicit value owned by its caller and passed to
//! every component that needs it. Persistence lives in the engine's
//! session store.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::entity::EntitySnapshot;
use crate::error::CoreError;
use crate::fields::FieldKind;
use crate::flow;
use crate::plan::{EntityKind, PlanType, StepPosition, SubStep};

/// Status values for an onboarding session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
}

/// The user running the wizard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerIdentity {
    pub user_id: String,
    #[serde(default)]
    pub email: String,
}

/// Data accepted locally that the backend has not confirmed yet.
///
/// Sections order before completions, so replaying a sorted set sends an
/// entity's sections before finalizing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PendingSync {
    Section(StepPosition),
    Completion(EntityKind),
}

const COMPLETION_PREFIX: &str = "complete:";

impl fmt::Display for PendingSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Section(position) => write!(f, "{position}"),
            Self::Completion(entity) => write!(f, "{COMPLETION_PREFIX}{entity}"),
        }
    }
}

impl FromStr for PendingSync {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(entity) = s.strip_prefix(COMPLETION_PREFIX) else {
            return s.parse().map(Self::Section);
        };
        [EntityKind::Organization, EntityKind::Complex, EntityKind::Clinic]
            .into_iter()
            .find(|kind| kind.as_str() == entity)
            .map(Self::Completion)
            .ok_or_else(|| CoreError::Validation(format!("Unknown sync entry '{s}'")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnboardingSession {
    pub id: Uuid,
    pub plan_type: PlanType,
    pub current: StepPosition,
    pub status: SessionStatus,
    pub owner: Option<OwnerIdentity>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    completed: BTreeSet<StepPosition>,
    form_data: BTreeMap<String, Value>,
    confirmed: HashMap<FieldKind, BTreeSet<String>>,
    unsynced: BTreeSet<PendingSync>,
}

impl OnboardingSession {
    /// Start a session at the first sub-step of `plan`.
    pub fn new(plan: PlanType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            plan_type: plan,
            current: plan.first_position(),
            status: SessionStatus::InProgress,
            owner: None,
            started_at: now,
            updated_at: now,
            completed: BTreeSet::new(),
            form_data: BTreeMap::new(),
            confirmed: HashMap::new(),
            unsynced: BTreeSet::new(),
        }
    }

    pub fn with_owner(mut self, owner: OwnerIdentity) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Reattach persisted unsynced entries. Sections outside the plan are
    /// dropped.
    pub fn with_unsynced(mut self, unsynced: impl IntoIterator<Item = PendingSync>) -> Self {
        let plan = self.plan_type;
        self.unsynced = unsynced
            .into_iter()
            .filter(|item| match item {
                PendingSync::Section(position) => plan.contains(*position),
                PendingSync::Completion(entity) => plan.step_of(*entity).is_some(),
            })
            .collect();
        self
    }

    /// Rebuild a persisted session, resuming at the first incomplete pair.
    ///
    /// Completed pairs and payload keys that do not belong to `plan` are
    /// dropped.
    pub fn restore(
        id: Uuid,
        plan: PlanType,
        owner: Option<OwnerIdentity>,
        completed: BTreeSet<StepPosition>,
        form_data: BTreeMap<String, Value>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let completed: BTreeSet<_> = completed.into_iter().filter(|p| plan.contains(*p)).collect();
        let form_data: BTreeMap<_, _> = form_data
            .into_iter()
            .filter(|(key, _)| {
                key.parse::<StepPosition>()
                    .is_ok_and(|p| plan.contains(p))
            })
            .collect();
        let status = if flow::is_plan_complete(plan, &completed) {
            SessionStatus::Completed
        } else {
            SessionStatus::InProgress
        };
        Self {
            id,
            plan_type: plan,
            current: flow::resume_position(plan, &completed),
            status,
            owner,
            started_at,
            updated_at: Utc::now(),
            completed,
            form_data,
            confirmed: HashMap::new(),
            unsynced: BTreeSet::new(),
        }
    }

    /// Key of the current sub-step's payload.
    pub fn step_key(&self) -> String {
        self.current.key()
    }

    /// Entity provisioned by the current step.
    pub fn current_entity(&self) -> Result<EntityKind, CoreError> {
        self.plan_type
            .entity_for(self.current.step)
            .ok_or_else(|| self.unknown(self.current))
    }

    fn unknown(&self, position: StepPosition) -> CoreError {
        CoreError::UnknownPosition {
            plan: self.plan_type.as_str(),
            position: position.key(),
        }
    }

    /// Move to a position of this session's plan.
    pub fn move_to(&mut self, position: StepPosition) -> Result<(), CoreError> {
        if !self.plan_type.contains(position) {
            return Err(self.unknown(position));
        }
        self.current = position;
        self.touch();
        Ok(())
    }

    // ---- completion ----

    pub fn completed(&self) -> &BTreeSet<StepPosition> {
        &self.completed
    }

    pub fn is_completed(&self, position: StepPosition) -> bool {
        self.completed.contains(&position)
    }

    /// Record a completed pair. The set only ever grows until [`reset`](Self::reset).
    pub fn mark_completed(&mut self, position: StepPosition) -> Result<bool, CoreError> {
        if !self.plan_type.contains(position) {
            return Err(self.unknown(position));
        }
        let inserted = self.completed.insert(position);
        self.touch();
        Ok(inserted)
    }

    pub fn mark_finished(&mut self) {
        self.status = SessionStatus::Completed;
        self.touch();
    }

    // ---- payloads ----

    pub fn form_data(&self) -> &BTreeMap<String, Value> {
        &self.form_data
    }

    pub fn payload(&self, position: StepPosition) -> Option<&Value> {
        self.form_data.get(&position.key())
    }

    pub fn record_payload(&mut self, position: StepPosition, payload: Value) -> Result<(), CoreError> {
        if !self.plan_type.contains(position) {
            return Err(self.unknown(position));
        }
        self.form_data.insert(position.key(), payload);
        self.touch();
        Ok(())
    }

    /// The saved snapshot of `entity`, if this plan provisions it and any
    /// of its sections has data.
    pub fn snapshot_of(&self, entity: EntityKind) -> Result<Option<EntitySnapshot>, CoreError> {
        let Some(step) = self.plan_type.step_of(entity) else {
            return Ok(None);
        };
        let prefix = format!("{step}-");
        if !self.form_data.keys().any(|k| k.starts_with(&prefix)) {
            return Ok(None);
        }
        EntitySnapshot::from_form_data(entity, step, &self.form_data).map(Some)
    }

    // ---- confirmed values ----

    /// Mark `value` as belonging to one of the user's own entities.
    pub fn confirm_value(&mut self, kind: FieldKind, value: &str) {
        self.confirmed
            .entry(kind)
            .or_default()
            .insert(value.trim().to_string());
    }

    /// Whether `value` is already known to belong to the user for `kind`
    /// on `step`.
    ///
    /// Explicitly confirmed values count everywhere. Values submitted in
    /// completed sub-steps count only on the step that owns them, so a
    /// parent's email or tax id typed into a child step is still looked up.
    pub fn is_confirmed(&self, step: u8, kind: FieldKind, value: &str) -> bool {
        let value = value.trim();
        if value.is_empty() {
            return false;
        }
        if self
            .confirmed
            .get(&kind)
            .is_some_and(|set| set.contains(value))
        {
            return true;
        }
        self.completed_values(step, kind).any(|v| v == value)
    }

    fn completed_values(&self, step: u8, kind: FieldKind) -> impl Iterator<Item = &str> + '_ {
        let (sub_step, field) = match kind {
            FieldKind::OrganizationName | FieldKind::ComplexName | FieldKind::ClinicName => {
                (SubStep::Overview, "name")
            }
            FieldKind::Email => (SubStep::Contact, "email"),
            FieldKind::TaxId => (SubStep::Legal, "taxId"),
        };
        let plan = self.plan_type;
        self.completed
            .iter()
            .filter(move |p| p.step == step && p.sub_step == sub_step)
            .filter(move |p| {
                !kind.is_name() || plan.entity_for(p.step).map(FieldKind::name_of) == Some(kind)
            })
            .filter_map(move |p| self.form_data.get(&p.key()))
            .filter_map(move |payload| payload.get(field).and_then(Value::as_str))
            .map(str::trim)
    }

    // ---- unsynced data ----

    pub fn unsynced(&self) -> &BTreeSet<PendingSync> {
        &self.unsynced
    }

    pub fn is_synced(&self) -> bool {
        self.unsynced.is_empty()
    }

    /// Record that `item` still has to reach the backend.
    pub fn mark_unsynced(&mut self, item: PendingSync) -> bool {
        let inserted = self.unsynced.insert(item);
        self.touch();
        inserted
    }

    /// Record that the backend confirmed `item`.
    pub fn mark_synced(&mut self, item: PendingSync) -> bool {
        let removed = self.unsynced.remove(&item);
        if removed {
            self.touch();
        }
        removed
    }

    // ---- lifecycle ----

    /// Clear all progress and payloads, returning to the first sub-step.
    /// The plan type is kept.
    pub fn reset(&mut self) {
        self.completed.clear();
        self.form_data.clear();
        self.confirmed.clear();
        self.unsynced.clear();
        self.current = self.plan_type.first_position();
        self.status = SessionStatus::InProgress;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
