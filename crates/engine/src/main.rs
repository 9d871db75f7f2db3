use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use onboard_client::{OnboardingApi, OnboardingBackend};
use onboard_engine::scheduler::TokioScheduler;
use onboard_engine::store::{FileStore, SessionStore};
use onboard_engine::{Wizard, WizardConfig, WizardDeps, WizardError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "onboard_engine=debug,onboard_client=info".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    // --- Configuration ---
    let config = WizardConfig::from_env().context("Invalid onboarding configuration")?;
    tracing::info!(
        api_url = %config.api_url,
        store = %config.session_store_dir.display(),
        "Loaded onboarding configuration",
    );

    // --- Backend ---
    let api = OnboardingApi::new(
        config.api_url.clone(),
        config.api_token.clone(),
        config.request_timeout,
    )
    .context("Failed to build HTTP client")?;
    let backend: Arc<dyn OnboardingBackend> = Arc::new(api);

    match backend.plans().await {
        Ok(plans) => {
            for plan in &plans {
                tracing::info!(
                    name = %plan.name,
                    plan_type = %plan.plan_type,
                    features = plan.features.len(),
                    "Subscription plan available",
                );
            }
        }
        Err(e) => tracing::warn!(error = %e, "Could not list subscription plans"),
    }

    // --- Session ---
    let store = SessionStore::new(Arc::new(FileStore::new(&config.session_store_dir)));
    let deps = WizardDeps::new(backend, Arc::new(TokioScheduler), store).with_config(&config);

    let Some(mut wizard) = Wizard::resume(deps).await? else {
        tracing::info!("No saved onboarding session; select a plan to begin");
        return Ok(());
    };

    match wizard.sync_progress().await {
        Ok(_) => {}
        Err(WizardError::Network(reason)) => {
            tracing::warn!(reason = %reason, "Backend unreachable, resuming from local progress");
        }
        Err(e) => return Err(e).context("Failed to reconcile onboarding progress"),
    }
    if !wizard.unsynced().is_empty() {
        tracing::warn!(
            unsynced = wizard.unsynced().len(),
            "Some onboarding data has not reached the server yet",
        );
    }

    let progress = wizard.progress();
    if wizard.is_complete() {
        tracing::info!(plan = %wizard.plan_type(), "Onboarding already complete");
    } else {
        tracing::info!(
            plan = %wizard.plan_type(),
            step_key = %wizard.position(),
            completed = progress.completed,
            total = progress.total,
            percent = progress.percent(),
            "Resuming onboarding",
        );
    }

    Ok(())
}
