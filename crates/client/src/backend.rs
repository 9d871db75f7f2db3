//! Backend abstraction consumed by the onboarding engine.

use async_trait::async_trait;
use onboard_core::fields::{CheckContext, FieldKind};
use onboard_core::plan::{EntityKind, SubStep};
use serde_json::Value;

use crate::api::{ClientError, OnboardingApi};
use crate::types::{FieldCheckResponse, PlanInfo, ProgressResponse, SaveResponse};

/// Remote operations the wizard depends on.
///
/// Implemented by [`OnboardingApi`] for production and by in-memory fakes
/// in tests.
#[async_trait]
pub trait OnboardingBackend: Send + Sync {
    async fn check_field(
        &self,
        kind: FieldKind,
        value: &str,
        context: &CheckContext,
    ) -> Result<FieldCheckResponse, ClientError>;

    async fn save_section(
        &self,
        entity: EntityKind,
        section: SubStep,
        payload: &Value,
    ) -> Result<SaveResponse, ClientError>;

    async fn complete_entity(&self, entity: EntityKind) -> Result<SaveResponse, ClientError>;

    async fn progress(&self) -> Result<ProgressResponse, ClientError>;

    async fn plans(&self) -> Result<Vec<PlanInfo>, ClientError>;
}

#[async_trait]
impl OnboardingBackend for OnboardingApi {
    async fn check_field(
        &self,
        kind: FieldKind,
        value: &str,
        context: &CheckContext,
    ) -> Result<FieldCheckResponse, ClientError> {
        OnboardingApi::check_field(self, kind, value, context).await
    }

    async fn save_section(
        &self,
        entity: EntityKind,
        section: SubStep,
        payload: &Value,
    ) -> Result<SaveResponse, ClientError> {
        OnboardingApi::save_section(self, entity, section, payload).await
    }

    async fn complete_entity(&self, entity: EntityKind) -> Result<SaveResponse, ClientError> {
        OnboardingApi::complete_entity(self, entity).await
    }

    async fn progress(&self) -> Result<ProgressResponse, ClientError> {
        OnboardingApi::progress(self).await
    }

    async fn plans(&self) -> Result<Vec<PlanInfo>, ClientError> {
        OnboardingApi::plans(self).await
    }
}
