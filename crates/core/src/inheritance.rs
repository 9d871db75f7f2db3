//! Parent-to-child inheritance mapper.
//!
//! When a plan provisions nested entities, the child's draft is seeded
//! from the parent's saved data. Person fields are renamed to the child's
//! role, identity-defining fields are cleared so the child must enter its
//! own, and the parent's working hours travel along as a read-only bound
//! for the child's schedule.

use serde_json::Value;

use crate::entity::{ContactSection, EntitySnapshot, LegalSection, OverviewSection};
use crate::error::CoreError;
use crate::plan::EntityKind;
use crate::session::OnboardingSession;

// ---------------------------------------------------------------------------
// Rename tables
// ---------------------------------------------------------------------------

/// Person fields of the overview section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonField {
    CeoName,
    ManagerName,
    HeadDoctorName,
}

impl PersonField {
    fn get(self, overview: &OverviewSection) -> &str {
        match self {
            Self::CeoName => &overview.ceo_name,
            Self::ManagerName => &overview.manager_name,
            Self::HeadDoctorName => &overview.head_doctor_name,
        }
    }

    fn get_mut(self, overview: &mut OverviewSection) -> &mut String {
        match self {
            Self::CeoName => &mut overview.ceo_name,
            Self::ManagerName => &mut overview.manager_name,
            Self::HeadDoctorName => &mut overview.head_doctor_name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rename {
    pub from: PersonField,
    pub to: PersonField,
}

const ORGANIZATION_TO_COMPLEX: &[Rename] = &[Rename {
    from: PersonField::CeoName,
    to: PersonField::ManagerName,
}];

const COMPLEX_TO_CLINIC: &[Rename] = &[Rename {
    from: PersonField::ManagerName,
    to: PersonField::HeadDoctorName,
}];

const ORGANIZATION_TO_CLINIC: &[Rename] = &[Rename {
    from: PersonField::CeoName,
    to: PersonField::ManagerName,
}];

/// Rename table for a supported `(parent, child)` pair.
pub fn rename_table(parent: EntityKind, child: EntityKind) -> Option<&'static [Rename]> {
    match (parent, child) {
        (EntityKind::Organization, EntityKind::Complex) => Some(ORGANIZATION_TO_COMPLEX),
        (EntityKind::Complex, EntityKind::Clinic) => Some(COMPLEX_TO_CLINIC),
        (EntityKind::Organization, EntityKind::Clinic) => Some(ORGANIZATION_TO_CLINIC),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

/// Derive a child draft from a parent's saved snapshot.
///
/// Pure: the same parent always yields an equal draft. Cleared fields:
/// overview `name`, contact `email` and `website`, legal `licenseNumber`
/// and `licenseExpiry`. Every section that receives copied data is marked
/// `inheritsFromParent`.
pub fn map_parent_to_child(
    parent: &EntitySnapshot,
    parent_kind: EntityKind,
    child_kind: EntityKind,
) -> Result<EntitySnapshot, CoreError> {
    if parent.kind != parent_kind {
        return Err(CoreError::Validation(format!(
            "Parent snapshot is a {}, expected a {parent_kind}",
            parent.kind
        )));
    }
    let renames = rename_table(parent_kind, child_kind).ok_or_else(|| {
        CoreError::Validation(format!(
            "A {child_kind} cannot inherit from a {parent_kind}"
        ))
    })?;

    let source = &parent.overview;
    let legal_name = if source.legal_name.trim().is_empty() {
        source.name.clone()
    } else {
        source.legal_name.clone()
    };

    let mut overview = OverviewSection {
        name: String::new(),
        legal_name,
        description: source.description.clone(),
        specialties: source.specialties.clone(),
        inherits_from_parent: true,
        ..OverviewSection::default()
    };
    for rename in renames {
        *rename.to.get_mut(&mut overview) = rename.from.get(source).to_string();
    }

    let contact = ContactSection {
        email: String::new(),
        phone: parent.contact.phone.clone(),
        website: None,
        address: parent.contact.address.clone(),
        inherits_from_parent: true,
    };

    let legal = LegalSection {
        license_number: String::new(),
        license_expiry: None,
        inherits_from_parent: true,
        ..parent.legal.clone()
    };

    Ok(EntitySnapshot {
        kind: child_kind,
        overview,
        contact,
        legal,
        services: None,
        working_hours: None,
        parent_working_hours: parent.working_hours.clone(),
    })
}

/// Seed draft for `child` from the nearest parent in `session` that has
/// saved data.
///
/// A clinic under the organization plan inherits from the complex step
/// when that step has data, otherwise directly from the organization.
/// Returns `None` when the plan provisions no parent for `child`.
pub fn inherited_draft(
    session: &OnboardingSession,
    child: EntityKind,
) -> Result<Option<EntitySnapshot>, CoreError> {
    for &parent in child.parents() {
        if let Some(snapshot) = session.snapshot_of(parent)? {
            return map_parent_to_child(&snapshot, parent, child).map(Some);
        }
    }
    Ok(None)
}

/// Lay the user's own edits over a freshly derived draft.
///
/// Object keys present in `edits` win over `base`; anything else in
/// `base` is kept. A non-object `edits` value replaces `base` entirely,
/// and `null` leaves `base` untouched.
pub fn overlay(base: Value, edits: &Value) -> Value {
    match (base, edits) {
        (Value::Object(mut merged), Value::Object(user)) => {
            for (key, value) in user {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (base, Value::Null) => base,
        (_, edits) => edits.clone(),
    }
}
