//! Uniquely-owned fields and their validation outcomes.
//!
//! Names, emails and tax ids must be unique across the platform. This
//! module holds the local syntax rules applied before any availability
//! lookup, and the outcome type the uniqueness validator reports.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::ValidateEmail;

use crate::plan::{EntityKind, StepPosition};

pub const NAME_MIN_CHARS: usize = 2;
pub const NAME_MAX_CHARS: usize = 100;
pub const TAX_ID_MIN_DIGITS: usize = 10;
pub const TAX_ID_MAX_DIGITS: usize = 15;

/// Message reported when availability could not be determined.
pub const NETWORK_FAILURE_MESSAGE: &str = "unable to validate, try again";

// ---------------------------------------------------------------------------
// Field kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    OrganizationName,
    ComplexName,
    ClinicName,
    Email,
    TaxId,
}

impl FieldKind {
    /// Path segment used by the validation endpoint.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OrganizationName => "organization-name",
            Self::ComplexName => "complex-name",
            Self::ClinicName => "clinic-name",
            Self::Email => "email",
            Self::TaxId => "tax-id",
        }
    }

    /// The name field kind for an entity.
    pub fn name_of(entity: EntityKind) -> Self {
        match entity {
            EntityKind::Organization => Self::OrganizationName,
            EntityKind::Complex => Self::ComplexName,
            EntityKind::Clinic => Self::ClinicName,
        }
    }

    pub fn is_name(self) -> bool {
        matches!(
            self,
            Self::OrganizationName | Self::ComplexName | Self::ClinicName
        )
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one field of one form: the sub-step it lives on plus its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldKey {
    pub position: StepPosition,
    pub kind: FieldKind,
}

impl FieldKey {
    pub fn new(position: StepPosition, kind: FieldKind) -> Self {
        Self { position, kind }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.position, self.kind)
    }
}

/// Extra identifiers forwarded with an availability lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckContext {
    /// Id of the entity being edited, excluded from the lookup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_id: Option<String>,
    /// Id of the parent entity, for names that only need to be unique
    /// within a parent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// State of one field's availability check.
///
/// `is_checking` and `has_checked` are never both set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub is_checking: bool,
    pub has_checked: bool,
    pub is_valid: bool,
    pub is_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ValidationOutcome {
    /// Nothing has been checked yet.
    pub fn idle() -> Self {
        Self {
            is_checking: false,
            has_checked: false,
            is_valid: true,
            is_available: false,
            message: None,
        }
    }

    /// A lookup is in flight.
    pub fn checking() -> Self {
        Self {
            is_checking: true,
            ..Self::idle()
        }
    }

    /// Empty input; the field is treated as optional.
    pub fn empty() -> Self {
        Self {
            has_checked: true,
            ..Self::idle()
        }
    }

    pub fn available() -> Self {
        Self {
            is_checking: false,
            has_checked: true,
            is_valid: true,
            is_available: true,
            message: None,
        }
    }

    pub fn taken(message: impl Into<String>) -> Self {
        Self {
            is_checking: false,
            has_checked: true,
            is_valid: false,
            is_available: false,
            message: Some(message.into()),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::taken(message)
    }

    pub fn network_failure() -> Self {
        Self::invalid(NETWORK_FAILURE_MESSAGE)
    }

    pub fn is_network_failure(&self) -> bool {
        self.message.as_deref() == Some(NETWORK_FAILURE_MESSAGE)
    }
}

impl Default for ValidationOutcome {
    fn default() -> Self {
        Self::idle()
    }
}

// ---------------------------------------------------------------------------
// Syntax rules
// ---------------------------------------------------------------------------

static TAX_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^[0-9]{{{TAX_ID_MIN_DIGITS},{TAX_ID_MAX_DIGITS}}}$")).expect("valid regex")
});

pub fn is_valid_tax_id(value: &str) -> bool {
    TAX_ID_RE.is_match(value)
}

/// Check a non-empty value's syntax for `kind`.
///
/// Returns a user-facing message on failure.
pub fn check_syntax(kind: FieldKind, value: &str) -> Result<(), String> {
    let value = value.trim();
    match kind {
        FieldKind::OrganizationName | FieldKind::ComplexName | FieldKind::ClinicName => {
            let len = value.chars().count();
            if !(NAME_MIN_CHARS..=NAME_MAX_CHARS).contains(&len) {
                return Err(format!(
                    "Name must be {NAME_MIN_CHARS}-{NAME_MAX_CHARS} characters"
                ));
            }
        }
        FieldKind::Email => {
            if !value.to_string().validate_email() {
                return Err("Enter a valid email address".to_string());
            }
        }
        FieldKind::TaxId => {
            if !is_valid_tax_id(value) {
                return Err(format!(
                    "Tax id must be {TAX_ID_MIN_DIGITS}-{TAX_ID_MAX_DIGITS} digits"
                ));
            }
        }
    }
    Ok(())
}
