//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use onboard_client::{
    ClientError, FieldCheckResponse, OnboardingBackend, PlanInfo, ProgressResponse, SaveResponse,
};
use onboard_core::fields::{CheckContext, FieldKind};
use onboard_core::plan::{EntityKind, PlanType, SubStep};
use onboard_core::working_hours::WeeklySchedule;
use onboard_engine::scheduler::ManualScheduler;
use onboard_engine::store::{MemoryStore, SessionStore};
use onboard_engine::{Wizard, WizardDeps};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Fake backend
// ---------------------------------------------------------------------------

/// How the fake answers section saves.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveMode {
    Accept,
    NetworkDown,
    Unauthorized,
    Reject(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveCall {
    pub entity: EntityKind,
    pub section: SubStep,
    pub payload: Value,
}

/// In-memory backend recording every call.
pub struct FakeBackend {
    pub checks: Mutex<Vec<(FieldKind, String)>>,
    pub saves: Mutex<Vec<SaveCall>>,
    pub completions: Mutex<Vec<EntityKind>>,
    taken: Mutex<HashMap<String, String>>,
    check_delays: Mutex<HashMap<String, Duration>>,
    check_error: Mutex<Option<fn() -> ClientError>>,
    save_mode: Mutex<SaveMode>,
    save_delay: Mutex<Duration>,
    progress: Mutex<ProgressResponse>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            checks: Mutex::new(Vec::new()),
            saves: Mutex::new(Vec::new()),
            completions: Mutex::new(Vec::new()),
            taken: Mutex::new(HashMap::new()),
            check_delays: Mutex::new(HashMap::new()),
            check_error: Mutex::new(None),
            save_mode: Mutex::new(SaveMode::Accept),
            save_delay: Mutex::new(Duration::ZERO),
            progress: Mutex::new(ProgressResponse::default()),
        }
    }
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Report `value` as already registered with `message`.
    pub fn mark_taken(&self, value: &str, message: &str) {
        self.taken
            .lock()
            .unwrap()
            .insert(value.to_string(), message.to_string());
    }

    /// Delay the availability answer for `value`.
    pub fn delay_check(&self, value: &str, delay: Duration) {
        self.check_delays
            .lock()
            .unwrap()
            .insert(value.to_string(), delay);
    }

    pub fn fail_checks_with(&self, make: fn() -> ClientError) {
        *self.check_error.lock().unwrap() = Some(make);
    }

    pub fn set_save_mode(&self, mode: SaveMode) {
        *self.save_mode.lock().unwrap() = mode;
    }

    pub fn set_save_delay(&self, delay: Duration) {
        *self.save_delay.lock().unwrap() = delay;
    }

    pub fn set_progress(&self, progress: ProgressResponse) {
        *self.progress.lock().unwrap() = progress;
    }

    pub fn check_count(&self) -> usize {
        self.checks.lock().unwrap().len()
    }

    pub fn checked_values(&self) -> Vec<String> {
        self.checks
            .lock()
            .unwrap()
            .iter()
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().unwrap().len()
    }

    pub fn last_save(&self) -> Option<SaveCall> {
        self.saves.lock().unwrap().last().cloned()
    }

    pub fn saves_for(&self, entity: EntityKind, section: SubStep) -> Vec<Value> {
        self.saves
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.entity == entity && c.section == section)
            .map(|c| c.payload.clone())
            .collect()
    }

    pub fn completed_entities(&self) -> Vec<EntityKind> {
        self.completions.lock().unwrap().clone()
    }
}

pub fn network_down() -> ClientError {
    ClientError::Api {
        status: 503,
        body: "service unavailable".into(),
    }
}

pub fn token_expired() -> ClientError {
    ClientError::Unauthorized {
        status: 401,
        body: r#"{"error":"Token expired"}"#.into(),
    }
}

#[async_trait]
impl OnboardingBackend for FakeBackend {
    async fn check_field(
        &self,
        kind: FieldKind,
        value: &str,
        _context: &CheckContext,
    ) -> Result<FieldCheckResponse, ClientError> {
        self.checks.lock().unwrap().push((kind, value.to_string()));
        let delay = self.check_delays.lock().unwrap().get(value).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = *self.check_error.lock().unwrap();
        if let Some(make) = failure {
            return Err(make());
        }
        let taken = self.taken.lock().unwrap().get(value).cloned();
        Ok(match taken {
            Some(message) => FieldCheckResponse {
                is_valid: false,
                is_available: false,
                message: Some(message),
            },
            None => FieldCheckResponse {
                is_valid: true,
                is_available: true,
                message: None,
            },
        })
    }

    async fn save_section(
        &self,
        entity: EntityKind,
        section: SubStep,
        payload: &Value,
    ) -> Result<SaveResponse, ClientError> {
        self.saves.lock().unwrap().push(SaveCall {
            entity,
            section,
            payload: payload.clone(),
        });
        let delay = *self.save_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mode = self.save_mode.lock().unwrap().clone();
        match mode {
            SaveMode::Accept => Ok(SaveResponse {
                success: true,
                message: None,
                data: json!({ "id": format!("{entity}-1") }),
                can_proceed: true,
            }),
            SaveMode::NetworkDown => Err(network_down()),
            SaveMode::Unauthorized => Err(token_expired()),
            SaveMode::Reject(message) => Ok(SaveResponse {
                success: false,
                message: Some(message),
                data: Value::Null,
                can_proceed: false,
            }),
        }
    }

    async fn complete_entity(&self, entity: EntityKind) -> Result<SaveResponse, ClientError> {
        let mode = self.save_mode.lock().unwrap().clone();
        match mode {
            SaveMode::NetworkDown => Err(network_down()),
            SaveMode::Unauthorized => Err(token_expired()),
            _ => {
                self.completions.lock().unwrap().push(entity);
                Ok(SaveResponse {
                    success: true,
                    message: None,
                    data: Value::Null,
                    can_proceed: true,
                })
            }
        }
    }

    async fn progress(&self) -> Result<ProgressResponse, ClientError> {
        Ok(self.progress.lock().unwrap().clone())
    }

    async fn plans(&self) -> Result<Vec<PlanInfo>, ClientError> {
        Ok(vec![PlanInfo {
            name: "Solo Clinic".into(),
            plan_type: "clinic".into(),
            features: vec![],
        }])
    }
}

// ---------------------------------------------------------------------------
// Wizard harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub scheduler: Arc<ManualScheduler>,
    pub kv: Arc<MemoryStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            backend: FakeBackend::new(),
            scheduler: Arc::new(ManualScheduler::new()),
            kv: Arc::new(MemoryStore::new()),
        }
    }

    pub fn deps(&self) -> WizardDeps {
        WizardDeps::new(
            self.backend.clone(),
            self.scheduler.clone(),
            SessionStore::new(self.kv.clone()),
        )
    }

    pub async fn start(&self, plan: PlanType) -> Wizard {
        Wizard::start(plan, None, self.deps()).await.unwrap()
    }
}

// ---------------------------------------------------------------------------
// Section payloads
// ---------------------------------------------------------------------------

pub fn organization_overview() -> Value {
    json!({
        "name": "Northcare Holding",
        "legalName": "Northcare Holding Co.",
        "description": "Regional healthcare group",
        "ceoName": "Dana Haddad"
    })
}

pub fn complex_overview() -> Value {
    json!({ "name": "East Medical Complex", "managerName": "Lina Saleh" })
}

pub fn clinic_overview() -> Value {
    json!({ "name": "East Dental Clinic", "headDoctorName": "Dr. Omar Nasser" })
}

pub fn contact(email: &str) -> Value {
    json!({
        "email": email,
        "phone": "+966500000000",
        "address": { "city": "Riyadh", "street": "King Fahd Rd" }
    })
}

pub fn legal(tax_id: &str, license: &str) -> Value {
    json!({
        "taxId": tax_id,
        "commercialRegistration": "CR-1010",
        "licenseNumber": license
    })
}

pub fn services() -> Value {
    json!({
        "services": [
            { "name": "Cleaning", "category": "dental", "durationMinutes": 30 },
            { "name": "Whitening", "durationMinutes": 60, "priceCents": 45000 }
        ]
    })
}

pub fn schedule(open: &str, close: &str) -> Value {
    json!({ "workingHours": WeeklySchedule::uniform(open, close) })
}
