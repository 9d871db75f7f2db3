//! Entity drafts: the per-section form payloads of an organization,
//! complex or clinic, and the structural checks run before a section is
//! submitted.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::error::CoreError;
use crate::fields;
use crate::plan::{EntityKind, StepPosition, SubStep};
use crate::working_hours::{validate_schedule_shape, WeeklySchedule};

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct OverviewSection {
    #[validate(length(min = 2, max = 100, message = "Name must be 2-100 characters"))]
    pub name: String,
    pub legal_name: String,
    #[validate(length(max = 2000))]
    pub description: String,
    pub ceo_name: String,
    pub manager_name: String,
    pub head_doctor_name: String,
    pub specialties: Vec<String>,
    pub inherits_from_parent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct Address {
    pub street: String,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
    pub region: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactSection {
    #[validate(email(message = "A valid email address is required"))]
    pub email: String,
    #[validate(length(min = 7, max = 20, message = "Phone must be 7-20 characters"))]
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(url(message = "Website must be a valid URL"))]
    pub website: Option<String>,
    #[validate(nested)]
    pub address: Address,
    pub inherits_from_parent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct LegalSection {
    pub tax_id: String,
    #[validate(length(min = 1, message = "Commercial registration is required"))]
    pub commercial_registration: String,
    pub license_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_expiry: Option<NaiveDate>,
    pub inherits_from_parent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOffering {
    #[validate(length(min = 1, message = "Service name is required"))]
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[validate(range(min = 5, max = 480, message = "Duration must be 5-480 minutes"))]
    pub duration_minutes: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_cents: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct ServicesSection {
    #[validate(length(min = 1, message = "At least one service is required"), nested)]
    pub services: Vec<ServiceOffering>,
}

/// Payload of a `schedule` sub-step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleSection {
    pub working_hours: WeeklySchedule,
    /// Read-only reference to the parent's hours, present when inherited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_working_hours: Option<WeeklySchedule>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// All sections of one entity draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    pub kind: EntityKind,
    #[serde(default)]
    pub overview: OverviewSection,
    #[serde(default)]
    pub contact: ContactSection,
    #[serde(default)]
    pub legal: LegalSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<ServicesSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_hours: Option<WeeklySchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_working_hours: Option<WeeklySchedule>,
}

impl EntitySnapshot {
    pub fn empty(kind: EntityKind) -> Self {
        Self {
            kind,
            overview: OverviewSection::default(),
            contact: ContactSection::default(),
            legal: LegalSection::default(),
            services: None,
            working_hours: None,
            parent_working_hours: None,
        }
    }

    /// Whether any section was copied from a parent entity.
    pub fn inherits_from_parent(&self) -> bool {
        self.overview.inherits_from_parent
            || self.contact.inherits_from_parent
            || self.legal.inherits_from_parent
    }

    /// Rebuild a snapshot from the payloads stored under `step`'s keys.
    ///
    /// Missing sections stay at their defaults.
    pub fn from_form_data(
        kind: EntityKind,
        step: u8,
        form_data: &BTreeMap<String, Value>,
    ) -> Result<Self, CoreError> {
        let section = |sub: SubStep| form_data.get(&StepPosition::new(step, sub).key());

        let mut snapshot = Self::empty(kind);
        if let Some(v) = section(SubStep::Overview) {
            snapshot.overview = decode(SubStep::Overview, v)?;
        }
        if let Some(v) = section(SubStep::Contact) {
            snapshot.contact = decode(SubStep::Contact, v)?;
        }
        if let Some(v) = section(SubStep::Legal) {
            snapshot.legal = decode(SubStep::Legal, v)?;
        }
        if let Some(v) = section(SubStep::Services) {
            snapshot.services = Some(decode(SubStep::Services, v)?);
        }
        if let Some(v) = section(SubStep::Schedule) {
            let schedule: ScheduleSection = decode(SubStep::Schedule, v)?;
            snapshot.working_hours = Some(schedule.working_hours);
            snapshot.parent_working_hours = schedule.parent_working_hours;
        }
        Ok(snapshot)
    }

    /// Serialize one section as a form payload.
    pub fn section_payload(&self, sub_step: SubStep) -> Result<Value, CoreError> {
        let value = match sub_step {
            SubStep::Overview => serde_json::to_value(&self.overview),
            SubStep::Contact => serde_json::to_value(&self.contact),
            SubStep::Legal => serde_json::to_value(&self.legal),
            SubStep::Services => {
                serde_json::to_value(self.services.clone().unwrap_or_default())
            }
            SubStep::Schedule => serde_json::to_value(ScheduleSection {
                working_hours: self.working_hours.clone().unwrap_or_else(WeeklySchedule::closed),
                parent_working_hours: self.parent_working_hours.clone(),
            }),
        };
        value.map_err(|e| CoreError::Internal(format!("Failed to encode {sub_step} section: {e}")))
    }
}

fn decode<T: DeserializeOwned>(sub_step: SubStep, payload: &Value) -> Result<T, CoreError> {
    serde_json::from_value(payload.clone()).map_err(|e| {
        CoreError::Validation(format!("Malformed {sub_step} data: {e}"))
    })
}

fn check<T: Validate>(section: &T) -> Result<(), CoreError> {
    section
        .validate()
        .map_err(|err| CoreError::Validation(err.to_string()))
}

/// Check that an in-progress edit decodes as its section type.
///
/// Partial sections are fine since every field has a default; wrong
/// types are not, because the stored payload is later decoded to derive
/// child drafts.
pub fn check_section_shape(sub_step: SubStep, payload: &Value) -> Result<(), CoreError> {
    match sub_step {
        SubStep::Overview => decode::<OverviewSection>(sub_step, payload).map(drop),
        SubStep::Contact => decode::<ContactSection>(sub_step, payload).map(drop),
        SubStep::Legal => decode::<LegalSection>(sub_step, payload).map(drop),
        SubStep::Services => decode::<ServicesSection>(sub_step, payload).map(drop),
        SubStep::Schedule => decode::<ScheduleSection>(sub_step, payload).map(drop),
    }
}

// ---------------------------------------------------------------------------
// Section validation
// ---------------------------------------------------------------------------

/// Validate a sub-step payload for `kind` before it is submitted.
///
/// This performs the form-local checks only. Uniqueness and the parent
/// working-hours constraint are checked separately.
pub fn validate_section(kind: EntityKind, sub_step: SubStep, payload: &Value) -> Result<(), CoreError> {
    if !payload.is_object() {
        return Err(CoreError::Validation(format!(
            "{} data must be a JSON object",
            sub_step.label()
        )));
    }

    match sub_step {
        SubStep::Overview => {
            let overview: OverviewSection = decode(sub_step, payload)?;
            check(&overview)?;
            let responsible = match kind {
                EntityKind::Organization => ("ceoName", &overview.ceo_name),
                EntityKind::Complex => ("managerName", &overview.manager_name),
                EntityKind::Clinic => ("headDoctorName", &overview.head_doctor_name),
            };
            if responsible.1.trim().is_empty() {
                return Err(CoreError::Validation(format!(
                    "{} overview requires '{}'",
                    kind, responsible.0
                )));
            }
        }
        SubStep::Contact => {
            let contact: ContactSection = decode(sub_step, payload)?;
            check(&contact)?;
        }
        SubStep::Legal => {
            let legal: LegalSection = decode(sub_step, payload)?;
            check(&legal)?;
            if !fields::is_valid_tax_id(&legal.tax_id) {
                return Err(CoreError::Validation(format!(
                    "Tax id must be {}-{} digits",
                    fields::TAX_ID_MIN_DIGITS,
                    fields::TAX_ID_MAX_DIGITS
                )));
            }
            if kind != EntityKind::Organization && legal.license_number.trim().is_empty() {
                return Err(CoreError::Validation(format!(
                    "{kind} legal information requires 'licenseNumber'"
                )));
            }
        }
        SubStep::Services => {
            if kind != EntityKind::Clinic {
                return Err(CoreError::Validation(format!(
                    "Services can only be configured for a clinic, not a {kind}"
                )));
            }
            let services: ServicesSection = decode(sub_step, payload)?;
            check(&services)?;
        }
        SubStep::Schedule => {
            if !kind.has_working_hours() {
                return Err(CoreError::Validation(format!(
                    "Working hours are not configured for a {kind}"
                )));
            }
            let schedule: ScheduleSection = decode(sub_step, payload)?;
            let report = validate_schedule_shape(&schedule.working_hours);
            if !report.is_valid {
                let messages: Vec<_> = report.violations.into_iter().map(|v| v.message).collect();
                return Err(CoreError::Validation(messages.join("; ")));
            }
        }
    }

    Ok(())
}
