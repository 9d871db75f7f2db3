//! End-to-end wizard flows against an in-memory backend.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use onboard_client::ProgressResponse;
use onboard_core::fields::{CheckContext, FieldKind, ValidationOutcome};
use onboard_core::flow::Transition;
use onboard_core::plan::{EntityKind, PlanType, StepPosition, SubStep};
use onboard_core::session::PendingSync;
use onboard_core::working_hours::ViolationKind;
use onboard_engine::scheduler::ManualScheduler;
use onboard_engine::store::{FileStore, SessionStore};
use onboard_engine::uniqueness::CheckOutcome;
use onboard_engine::{Wizard, WizardDeps, WizardError};
use serde_json::json;

use common::{
    clinic_overview, complex_overview, contact, legal, organization_overview, schedule, services,
    FakeBackend, Harness, SaveMode,
};

fn pos(step: u8, sub_step: SubStep) -> StepPosition {
    StepPosition::new(step, sub_step)
}

/// Submit every clinic sub-step of `step` with valid data.
async fn complete_clinic_step(wizard: &mut Wizard, step: u8) {
    assert_eq!(wizard.position(), pos(step, SubStep::Overview));
    wizard.submit(clinic_overview()).await.unwrap();
    wizard.submit(contact("front@eastdental.example")).await.unwrap();
    wizard.submit(services()).await.unwrap();
    wizard.submit(legal("3001234599", "CLN-77")).await.unwrap();
}

// ---------------------------------------------------------------------------
// Plans end to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clinic_plan_runs_to_completion() {
    let h = Harness::new();
    let mut wizard = h.start(PlanType::Clinic).await;
    assert_eq!(wizard.position(), pos(1, SubStep::Overview));
    assert!(!h.kv.is_empty().await);

    complete_clinic_step(&mut wizard, 1).await;
    assert_eq!(wizard.position(), pos(1, SubStep::Schedule));
    assert_eq!(wizard.progress().completed, 4);

    let report = wizard.submit(schedule("08:00", "17:00")).await.unwrap();
    assert!(report.is_complete());
    assert!(report.saved);
    assert_eq!(report.finalized, Some(EntityKind::Clinic));
    assert!(report.warnings.is_empty());

    assert!(wizard.is_complete());
    assert_eq!(wizard.progress().percent(), 100);
    assert_eq!(h.backend.completed_entities(), vec![EntityKind::Clinic]);
    assert_eq!(h.backend.save_count(), 5);
    assert!(h.kv.is_empty().await);

    let err = wizard.submit(clinic_overview()).await.unwrap_err();
    assert_matches!(err, WizardError::Validation(_));
}

#[tokio::test]
async fn organization_plan_prefills_complex_from_organization() {
    assert_eq!("company".parse::<PlanType>().unwrap(), PlanType::Organization);

    let h = Harness::new();
    let mut wizard = h.start(PlanType::Organization).await;
    assert_eq!(wizard.current_entity().unwrap(), EntityKind::Organization);

    wizard.submit(organization_overview()).await.unwrap();
    wizard.submit(contact("hq@northcare.example")).await.unwrap();
    let report = wizard.submit(legal("3001234567", "")).await.unwrap();

    assert_eq!(
        report.transition,
        Transition::Moved {
            to: pos(2, SubStep::Overview),
            crossed_step: true
        }
    );
    assert_eq!(report.finalized, Some(EntityKind::Organization));
    assert_eq!(h.backend.completed_entities(), vec![EntityKind::Organization]);
    assert_eq!(wizard.current_entity().unwrap(), EntityKind::Complex);

    let draft = wizard.draft().unwrap();
    assert_eq!(draft["managerName"], "Dana Haddad");
    assert_eq!(draft["legalName"], "Northcare Holding Co.");
    assert_eq!(draft["name"], "");
    assert_eq!(draft["inheritsFromParent"], true);

    // Only the complex's own name has to be entered.
    let report = wizard
        .submit(json!({ "name": "East Medical Complex" }))
        .await
        .unwrap();
    assert!(report.saved);
    let saved = h.backend.saves_for(EntityKind::Complex, SubStep::Overview);
    assert_eq!(saved[0]["managerName"], "Dana Haddad");
    assert_eq!(saved[0]["name"], "East Medical Complex");

    let draft = wizard.draft().unwrap();
    assert_eq!(draft["email"], "");
    assert_eq!(draft["phone"], "+966500000000");
    assert_eq!(draft["address"]["city"], "Riyadh");
}

#[tokio::test]
async fn owned_email_is_only_skipped_on_its_own_step() {
    let h = Harness::new();
    let mut wizard = h.start(PlanType::Organization).await;

    wizard.submit(organization_overview()).await.unwrap();
    wizard.submit(contact("hq@northcare.example")).await.unwrap();
    wizard.submit(legal("3001234567", "")).await.unwrap();
    wizard.submit(complex_overview()).await.unwrap();
    assert_eq!(wizard.position(), pos(2, SubStep::Contact));

    // The organization now owns the address on the server.
    h.backend
        .mark_taken("hq@northcare.example", "This email is already registered");

    // Reusing the parent's email for the complex is still looked up.
    let outcome = wizard
        .check_field_now(FieldKind::Email, "hq@northcare.example", CheckContext::default())
        .await
        .unwrap();
    assert_matches!(outcome, CheckOutcome::Applied(o) if !o.is_valid);
    assert_eq!(h.backend.check_count(), 1);
    let err = wizard.submit(contact("hq@northcare.example")).await.unwrap_err();
    assert_matches!(err, WizardError::Validation(ref m) if m == "This email is already registered");
    assert_eq!(wizard.position(), pos(2, SubStep::Contact));

    // Back on the organization's own contact, the value is known.
    wizard.back().await.unwrap();
    wizard.back().await.unwrap();
    wizard.back().await.unwrap();
    assert_eq!(wizard.position(), pos(1, SubStep::Contact));
    let outcome = wizard
        .check_field_now(FieldKind::Email, "hq@northcare.example", CheckContext::default())
        .await
        .unwrap();
    assert_eq!(outcome, CheckOutcome::Applied(ValidationOutcome::available()));
    assert_eq!(h.backend.check_count(), 1);
    wizard.submit(contact("hq@northcare.example")).await.unwrap();
    assert_eq!(wizard.position(), pos(1, SubStep::Legal));
}

// ---------------------------------------------------------------------------
// Working-hours constraint
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clinic_hours_must_fit_inside_complex_hours() {
    let h = Harness::new();
    let mut wizard = h.start(PlanType::Complex).await;

    wizard.submit(complex_overview()).await.unwrap();
    wizard.submit(contact("east@northcare.example")).await.unwrap();
    wizard.submit(legal("3001234567", "CPX-1")).await.unwrap();
    let report = wizard.submit(schedule("08:00", "18:00")).await.unwrap();
    assert_eq!(report.finalized, Some(EntityKind::Complex));

    let draft = wizard.draft().unwrap();
    assert_eq!(draft["headDoctorName"], "Lina Saleh");

    complete_clinic_step(&mut wizard, 2).await;

    let inline = wizard
        .edit(schedule("07:00", "17:00"))
        .await
        .unwrap()
        .expect("schedule edits are checked inline");
    assert!(!inline.is_valid);
    assert!(inline
        .violations
        .iter()
        .all(|v| v.kind == ViolationKind::OpensBeforeParent));

    let err = wizard.submit(schedule("07:00", "17:00")).await.unwrap_err();
    assert_matches!(err, WizardError::Constraint(ref report) if report.violations.len() == 7);
    assert_eq!(wizard.position(), pos(2, SubStep::Schedule));
    assert!(h.backend.saves_for(EntityKind::Clinic, SubStep::Schedule).is_empty());

    let report = wizard.submit(schedule("09:00", "17:00")).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(
        h.backend.completed_entities(),
        vec![EntityKind::Complex, EntityKind::Clinic]
    );
}

#[tokio::test]
async fn standalone_clinic_schedule_has_no_parent_bound() {
    let h = Harness::new();
    let mut wizard = h.start(PlanType::Clinic).await;
    complete_clinic_step(&mut wizard, 1).await;

    let inline = wizard.edit(schedule("06:00", "23:00")).await.unwrap();
    assert_matches!(inline, Some(report) if report.is_valid);

    let inline = wizard.edit(schedule("17:00", "08:00")).await.unwrap();
    assert_matches!(inline, Some(report) if !report.is_valid);
}

#[tokio::test]
async fn malformed_parent_edit_is_not_recorded() {
    let h = Harness::new();
    let mut wizard = h.start(PlanType::Complex).await;
    wizard.submit(complex_overview()).await.unwrap();
    wizard.submit(contact("east@northcare.example")).await.unwrap();
    wizard.submit(legal("3001234567", "CPX-1")).await.unwrap();
    wizard.submit(schedule("08:00", "18:00")).await.unwrap();

    wizard.back().await.unwrap();
    assert_eq!(wizard.position(), pos(1, SubStep::Schedule));
    let err = wizard
        .edit(json!({ "workingHours": null }))
        .await
        .unwrap_err();
    assert_matches!(err, WizardError::Validation(ref m) if m.contains("schedule"));
    let stored = wizard.session().payload(pos(1, SubStep::Schedule)).unwrap();
    assert_eq!(stored["workingHours"].as_array().map(Vec::len), Some(7));

    // The clinic still inherits from the stored complex.
    let resumed = Wizard::resume(h.deps()).await.unwrap().unwrap();
    assert_eq!(resumed.position(), pos(2, SubStep::Overview));
    assert_eq!(resumed.draft().unwrap()["headDoctorName"], "Lina Saleh");
}

// ---------------------------------------------------------------------------
// Failure policy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn network_failure_keeps_draft_and_advances() {
    let h = Harness::new();
    let mut wizard = h.start(PlanType::Clinic).await;
    h.backend.set_save_mode(SaveMode::NetworkDown);

    let report = wizard.submit(clinic_overview()).await.unwrap();
    assert!(!report.saved);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].target, "1-overview");
    assert_eq!(wizard.position(), pos(1, SubStep::Contact));
    let overview = PendingSync::Section(pos(1, SubStep::Overview));
    assert!(wizard.unsynced().contains(&overview));

    // The next submit sends the kept overview again before its own section.
    h.backend.set_save_mode(SaveMode::Accept);
    let report = wizard.submit(contact("front@eastdental.example")).await.unwrap();
    assert!(report.saved);
    assert!(report.warnings.is_empty());
    assert!(wizard.unsynced().is_empty());
    let overviews = h.backend.saves_for(EntityKind::Clinic, SubStep::Overview);
    assert_eq!(overviews.len(), 2);
    assert_eq!(overviews[1]["name"], "East Dental Clinic");

    wizard.submit(services()).await.unwrap();
    wizard.submit(legal("3001234599", "CLN-77")).await.unwrap();
    let report = wizard.submit(schedule("08:00", "17:00")).await.unwrap();

    assert!(report.is_complete());
    assert!(wizard.is_complete());
    assert!(h.kv.is_empty().await);
}

#[tokio::test]
async fn failed_finalization_is_a_warning() {
    let h = Harness::new();
    let mut wizard = h.start(PlanType::Clinic).await;
    complete_clinic_step(&mut wizard, 1).await;

    h.backend.set_save_mode(SaveMode::NetworkDown);
    let report = wizard.submit(schedule("08:00", "17:00")).await.unwrap();
    assert!(report.is_complete());
    let targets: Vec<_> = report.warnings.iter().map(|w| w.target.as_str()).collect();
    assert_eq!(targets, vec!["1-schedule", "complete:clinic"]);
    assert!(wizard
        .unsynced()
        .contains(&PendingSync::Completion(EntityKind::Clinic)));
    assert!(h.backend.completed_entities().is_empty());
    // Unsynced data stays on the device.
    assert!(!h.kv.is_empty().await);
}

#[tokio::test]
async fn unsynced_data_is_sent_after_resume() {
    let h = Harness::new();
    let mut wizard = h.start(PlanType::Clinic).await;
    complete_clinic_step(&mut wizard, 1).await;
    h.backend.set_save_mode(SaveMode::NetworkDown);
    wizard.submit(schedule("08:00", "17:00")).await.unwrap();
    drop(wizard);

    let mut wizard = Wizard::resume(h.deps()).await.unwrap().unwrap();
    assert!(wizard.is_complete());
    assert_eq!(
        wizard.unsynced().iter().copied().collect::<Vec<_>>(),
        vec![
            PendingSync::Section(pos(1, SubStep::Schedule)),
            PendingSync::Completion(EntityKind::Clinic),
        ]
    );

    // Still down: the first entry fails and the rest wait.
    let report = wizard.flush_unsynced().await.unwrap();
    assert!(report.flushed.is_empty());
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].target, "1-schedule");
    assert_eq!(wizard.unsynced().len(), 2);
    assert!(!h.kv.is_empty().await);

    h.backend.set_save_mode(SaveMode::Accept);
    let saves_before = h.backend.save_count();
    let report = wizard.flush_unsynced().await.unwrap();
    assert_eq!(report.flushed.len(), 2);
    assert!(report.warnings.is_empty());
    assert!(wizard.unsynced().is_empty());
    assert_eq!(h.backend.save_count(), saves_before + 1);
    assert_eq!(h.backend.completed_entities(), vec![EntityKind::Clinic]);
    assert!(h.kv.is_empty().await);
    assert!(Wizard::resume(h.deps()).await.unwrap().is_none());
}

#[tokio::test]
async fn sync_progress_flushes_unsynced_sections() {
    let h = Harness::new();
    let mut wizard = h.start(PlanType::Clinic).await;
    h.backend.set_save_mode(SaveMode::NetworkDown);
    wizard.submit(clinic_overview()).await.unwrap();
    drop(wizard);

    h.backend.set_save_mode(SaveMode::Accept);
    let mut wizard = Wizard::resume(h.deps()).await.unwrap().unwrap();
    assert_eq!(wizard.unsynced().len(), 1);

    assert_eq!(wizard.sync_progress().await.unwrap(), 0);
    assert!(wizard.unsynced().is_empty());
    assert_eq!(h.backend.saves_for(EntityKind::Clinic, SubStep::Overview).len(), 2);

    let resumed = Wizard::resume(h.deps()).await.unwrap().unwrap();
    assert!(resumed.unsynced().is_empty());
    assert_eq!(resumed.position(), pos(1, SubStep::Contact));
}

#[tokio::test]
async fn refused_unsynced_section_is_dropped_with_a_warning() {
    let h = Harness::new();
    let mut wizard = h.start(PlanType::Clinic).await;
    h.backend.set_save_mode(SaveMode::NetworkDown);
    wizard.submit(clinic_overview()).await.unwrap();

    h.backend
        .set_save_mode(SaveMode::Reject("Clinic name is reserved".into()));
    let report = wizard.flush_unsynced().await.unwrap();
    let overview = PendingSync::Section(pos(1, SubStep::Overview));
    assert_eq!(report.dropped, vec![overview]);
    assert_eq!(report.warnings[0].message, "Clinic name is reserved");
    assert!(wizard.unsynced().is_empty());
    assert_eq!(wizard.progress().completed, 1);
}

#[tokio::test]
async fn backend_rejection_blocks_the_sub_step() {
    let h = Harness::new();
    let mut wizard = h.start(PlanType::Clinic).await;
    h.backend
        .set_save_mode(SaveMode::Reject("Clinic name is reserved".into()));

    let err = wizard.submit(clinic_overview()).await.unwrap_err();
    assert_matches!(err, WizardError::BackendRejection(ref m) if m == "Clinic name is reserved");
    assert_eq!(err.to_string(), "Clinic name is reserved");
    assert_eq!(wizard.position(), pos(1, SubStep::Overview));
    assert_eq!(wizard.progress().completed, 0);
    assert!(!wizard.is_terminated());
}

#[tokio::test]
async fn expired_credentials_terminate_the_wizard() {
    let h = Harness::new();
    let mut wizard = h.start(PlanType::Clinic).await;
    h.backend.set_save_mode(SaveMode::Unauthorized);

    let err = wizard.submit(clinic_overview()).await.unwrap_err();
    assert_matches!(err, WizardError::Auth(_));
    assert!(wizard.is_terminated());

    assert_matches!(
        wizard.submit(clinic_overview()).await,
        Err(WizardError::Terminated)
    );
    assert_matches!(wizard.back().await, Err(WizardError::Terminated));
    assert_matches!(wizard.sync_progress().await, Err(WizardError::Terminated));

    // The draft survives for the next sign-in.
    let resumed = Wizard::resume(h.deps()).await.unwrap().unwrap();
    assert_eq!(resumed.position(), pos(1, SubStep::Overview));
    assert_eq!(resumed.draft().unwrap()["name"], "East Dental Clinic");
}

#[tokio::test]
async fn invalid_section_is_reported_inline() {
    let h = Harness::new();
    let mut wizard = h.start(PlanType::Clinic).await;

    let err = wizard
        .submit(json!({ "name": "E", "headDoctorName": "Dr. Omar Nasser" }))
        .await
        .unwrap_err();
    assert_matches!(err, WizardError::Validation(ref m) if m.contains("Name must be 2-100 characters"));

    let err = wizard
        .submit(json!({ "name": "East Dental Clinic" }))
        .await
        .unwrap_err();
    assert_matches!(err, WizardError::Validation(ref m) if m.contains("headDoctorName"));

    assert_eq!(h.backend.save_count(), 0);
}

#[tokio::test]
async fn taken_name_blocks_submission() {
    let h = Harness::new();
    h.backend
        .mark_taken("East Dental Clinic", "A clinic with this name already exists");
    let mut wizard = h.start(PlanType::Clinic).await;

    let outcome = wizard
        .check_field_now(FieldKind::ClinicName, "East Dental Clinic", CheckContext::default())
        .await
        .unwrap();
    assert_matches!(outcome, CheckOutcome::Applied(o) if !o.is_valid);
    assert!(!wizard.field_outcome(FieldKind::ClinicName).is_valid);

    let err = wizard.submit(clinic_overview()).await.unwrap_err();
    assert_matches!(
        err,
        WizardError::Validation(ref m) if m == "A clinic with this name already exists"
    );

    // A different name has not been checked and goes through.
    wizard
        .submit(json!({ "name": "East Dental Care", "headDoctorName": "Dr. Omar Nasser" }))
        .await
        .unwrap();
    assert_eq!(wizard.position(), pos(1, SubStep::Contact));
}

#[tokio::test]
async fn unreachable_lookup_does_not_block() {
    let h = Harness::new();
    h.backend.fail_checks_with(common::network_down);
    let mut wizard = h.start(PlanType::Clinic).await;

    let outcome = wizard
        .check_field_now(FieldKind::ClinicName, "East Dental Clinic", CheckContext::default())
        .await
        .unwrap();
    assert_matches!(outcome, CheckOutcome::Applied(o) if o.is_network_failure());

    wizard.submit(clinic_overview()).await.unwrap();
    assert_eq!(wizard.position(), pos(1, SubStep::Contact));
}

// ---------------------------------------------------------------------------
// Navigation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn back_and_restart() {
    let h = Harness::new();
    let mut wizard = h.start(PlanType::Clinic).await;

    assert_eq!(
        wizard.back().await.unwrap(),
        Transition::Stayed(pos(1, SubStep::Overview))
    );

    wizard.submit(clinic_overview()).await.unwrap();
    assert_eq!(
        wizard.back().await.unwrap(),
        Transition::Moved {
            to: pos(1, SubStep::Overview),
            crossed_step: false
        }
    );
    assert_eq!(wizard.draft().unwrap()["name"], "East Dental Clinic");
    assert_eq!(wizard.progress().completed, 1);

    let session_id = wizard.session().id;
    wizard.restart().await.unwrap();
    assert_eq!(wizard.session().id, session_id);
    assert_eq!(wizard.position(), pos(1, SubStep::Overview));
    assert_eq!(wizard.progress().completed, 0);
    assert!(wizard.session().form_data().is_empty());
    assert_eq!(wizard.saver().last_saved_hash("1-overview"), None);

    let resumed = Wizard::resume(h.deps()).await.unwrap().unwrap();
    assert_eq!(resumed.plan_type(), PlanType::Clinic);
    assert_eq!(resumed.progress().completed, 0);
}

#[tokio::test]
async fn resume_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FakeBackend::new();
    let deps = || {
        WizardDeps::new(
            backend.clone(),
            Arc::new(ManualScheduler::new()),
            SessionStore::new(Arc::new(FileStore::new(dir.path()))),
        )
    };

    let mut wizard = Wizard::start(PlanType::Clinic, None, deps()).await.unwrap();
    wizard.submit(clinic_overview()).await.unwrap();
    wizard.submit(contact("front@eastdental.example")).await.unwrap();
    wizard.edit(json!({ "services": [] })).await.unwrap();
    let session_id = wizard.session().id;
    drop(wizard);

    let resumed = Wizard::resume(deps()).await.unwrap().unwrap();
    assert_eq!(resumed.session().id, session_id);
    assert_eq!(resumed.position(), pos(1, SubStep::Services));
    assert_eq!(resumed.progress().completed, 2);
    assert_eq!(resumed.draft().unwrap(), json!({ "services": [] }));
}

#[tokio::test]
async fn nothing_to_resume() {
    let h = Harness::new();
    assert!(Wizard::resume(h.deps()).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Progress sync
// ---------------------------------------------------------------------------

fn remote(plan: &str, completed: &[&str]) -> ProgressResponse {
    ProgressResponse {
        plan_type: Some(plan.to_string()),
        completed_steps: completed.iter().map(|s| s.to_string()).collect(),
        ..ProgressResponse::default()
    }
}

#[tokio::test]
async fn sync_progress_merges_and_never_shrinks() {
    let h = Harness::new();
    let mut wizard = h.start(PlanType::Clinic).await;

    h.backend
        .set_progress(remote("clinic", &["1-overview", "1-contact", "3-legal"]));
    assert_eq!(wizard.sync_progress().await.unwrap(), 2);
    assert_eq!(wizard.position(), pos(1, SubStep::Services));

    h.backend.set_progress(remote("clinic", &["1-overview"]));
    assert_eq!(wizard.sync_progress().await.unwrap(), 0);
    assert_eq!(wizard.progress().completed, 2);

    h.backend
        .set_progress(remote("complex", &["1-services", "1-legal"]));
    assert_eq!(wizard.sync_progress().await.unwrap(), 0);
    assert_eq!(wizard.progress().completed, 2);

    let resumed = Wizard::resume(h.deps()).await.unwrap().unwrap();
    assert_eq!(resumed.position(), pos(1, SubStep::Services));
}

#[tokio::test]
async fn sync_progress_can_finish_the_session() {
    let h = Harness::new();
    let mut wizard = h.start(PlanType::Clinic).await;
    h.backend.set_progress(remote(
        "clinic",
        &["1-overview", "1-contact", "1-services", "1-legal", "1-schedule"],
    ));

    assert_eq!(wizard.sync_progress().await.unwrap(), 5);
    assert!(wizard.is_complete());
    assert!(h.kv.is_empty().await);
}

// ---------------------------------------------------------------------------
// Autosave through the wizard
// ---------------------------------------------------------------------------

#[tokio::test]
async fn edits_are_autosaved_once_per_change() {
    let h = Harness::new();
    let mut wizard = h.start(PlanType::Clinic).await;

    assert_eq!(wizard.edit(json!({ "name": "East" })).await.unwrap(), None);
    h.scheduler.advance(Duration::from_secs(1)).await;
    wizard.edit(clinic_overview()).await.unwrap();
    h.scheduler.advance(Duration::from_secs(2)).await;
    assert_eq!(h.backend.save_count(), 1);
    assert_eq!(h.backend.last_save().unwrap().payload, clinic_overview());

    wizard.edit(clinic_overview()).await.unwrap();
    h.scheduler.advance(Duration::from_secs(2)).await;
    assert_eq!(h.backend.save_count(), 1);

    // The edit is on disk before any save reaches the backend.
    wizard.edit(json!({ "name": "East Dental" })).await.unwrap();
    let resumed = Wizard::resume(h.deps()).await.unwrap().unwrap();
    assert_eq!(resumed.draft().unwrap()["name"], "East Dental");
}
