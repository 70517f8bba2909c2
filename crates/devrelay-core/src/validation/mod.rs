//! Human validation gate (C4).
//!
//! A validation pauses a run at `human_validation` until an authorized
//! responder approves, rejects, or the deadline lapses. Responses from
//! anyone other than the task's recorded creator are recorded but not
//! acted on (§7's "unauthorized responder" edge case).

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use sqlx::PgPool;

use devrelay_db::models::{AuditSeverity, HumanValidation, HumanValidationResponse, Task, ValidationStatus};
use devrelay_db::queries::{audit, validations as db};

use crate::collaborators::Notifier;

/// How long a validation stays open before it is auto-expired.
pub fn default_validation_window() -> Duration {
    Duration::hours(48)
}

/// How long before expiry a reminder notification is sent.
pub fn reminder_lead_time() -> Duration {
    Duration::hours(4)
}

/// A validation abandoned after this many rejections is not retried again.
pub const MAX_REJECTIONS: i32 = 3;

#[allow(clippy::too_many_arguments)]
pub async fn request_validation(
    pool: &PgPool,
    notifier: &dyn Notifier,
    task: &Task,
    run_id: i64,
    step_id: i64,
    title: &str,
    generated_code: serde_json::Value,
    summary: &str,
    files_modified: &[String],
    tracker_update_id: &str,
    parent_validation_id: Option<i64>,
) -> Result<HumanValidation> {
    let expires_at = Utc::now() + default_validation_window();
    let validation = db::insert_validation(
        pool,
        task.id,
        run_id,
        step_id,
        title,
        generated_code,
        summary,
        files_modified,
        tracker_update_id,
        task.creator_id.as_deref(),
        task.creator_email.as_deref(),
        task.creator_name.as_deref(),
        expires_at,
        parent_validation_id,
    )
    .await
    .context("failed to insert human validation")?;

    notifier
        .notify_validation_requested(&validation)
        .await
        .context("failed to notify validation requested")?;

    Ok(validation)
}

/// Whether `responder` (by id or email) is authorized to act on
/// `validation` -- the task's recorded creator, or anyone when the task
/// recorded no creator at all.
pub fn is_authorized_responder(validation: &HumanValidation, responder_id: Option<&str>, responder_email: Option<&str>) -> bool {
    if validation.creator_id.is_none() && validation.creator_email.is_none() {
        return true;
    }
    if let (Some(expected), Some(actual)) = (validation.creator_id.as_deref(), responder_id) {
        if expected == actual {
            return true;
        }
    }
    if let (Some(expected), Some(actual)) = (validation.creator_email.as_deref(), responder_email) {
        if expected.eq_ignore_ascii_case(actual) {
            return true;
        }
    }
    false
}

/// Outcome the engine should act on after a response is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Approved; merge the PR and continue.
    ApprovedMerge,
    /// Approved but the responder asked to hold off on merging.
    ApprovedNoMerge,
    /// Rejected with instructions to retry generation.
    RejectedRetry,
    /// Rejected too many times; stop trying.
    Abandoned,
    /// Recorded, but the responder was not authorized -- no state change.
    Unauthorized,
}

#[allow(clippy::too_many_arguments)]
pub async fn record_response(
    pool: &PgPool,
    notifier: &dyn Notifier,
    validation: &HumanValidation,
    response_status: ValidationStatus,
    comments: Option<&str>,
    modification_instructions: Option<&str>,
    should_merge: bool,
    should_retry_workflow: bool,
    validation_duration_seconds: i64,
    responder_id: Option<&str>,
    responder_email: Option<&str>,
    responder_name: Option<&str>,
) -> Result<(HumanValidationResponse, ValidationOutcome)> {
    if !is_authorized_responder(validation, responder_id, responder_email) {
        db::record_unauthorized_attempt(pool, validation.id)
            .await
            .context("failed to record unauthorized validation attempt")?;
        let response = db::insert_response(
            pool,
            validation.id,
            response_status,
            comments,
            modification_instructions,
            false,
            false,
            false,
            validation_duration_seconds,
            responder_id,
            responder_email,
            responder_name,
        )
        .await
        .context("failed to insert unauthorized validation response")?;

        audit::record(
            pool,
            responder_id.or(responder_email).unwrap_or("unknown"),
            "unauthorized_reply_attempt",
            &format!("human_validation:{}", validation.id),
            AuditSeverity::Medium,
            Some(serde_json::json!({
                "validation_id": validation.id,
                "task_id": validation.task_id,
                "expected_creator_id": validation.creator_id,
                "expected_creator_email": validation.creator_email,
                "responder_id": responder_id,
                "responder_email": responder_email,
            })),
        )
        .await
        .context("failed to record unauthorized reply audit entry")?;

        notifier
            .notify_unauthorized_reply(validation, responder_id, responder_email, responder_name)
            .await
            .context("failed to notify unauthorized reply")?;

        return Ok((response, ValidationOutcome::Unauthorized));
    }

    let should_continue = response_status == ValidationStatus::Approved || should_retry_workflow;
    let response = db::insert_response(
        pool,
        validation.id,
        response_status,
        comments,
        modification_instructions,
        should_merge,
        should_continue,
        should_retry_workflow,
        validation_duration_seconds,
        responder_id,
        responder_email,
        responder_name,
    )
    .await
    .context("failed to insert validation response")?;

    db::mark_status(pool, validation.id, response_status)
        .await
        .context("failed to update validation status")?;

    let outcome = match response_status {
        ValidationStatus::Approved if should_merge => ValidationOutcome::ApprovedMerge,
        ValidationStatus::Approved => ValidationOutcome::ApprovedNoMerge,
        ValidationStatus::Rejected => {
            let rejections = db::increment_rejection_count(pool, validation.id)
                .await
                .context("failed to increment rejection count")?;
            if rejections >= MAX_REJECTIONS {
                db::mark_status(pool, validation.id, ValidationStatus::Abandoned).await.ok();
                ValidationOutcome::Abandoned
            } else {
                ValidationOutcome::RejectedRetry
            }
        }
        _ => ValidationOutcome::Abandoned,
    };

    Ok((response, outcome))
}

/// Sweep pending validations for those that have crossed their deadline,
/// marking them `expired`. Returns the validations that were expired.
pub async fn sweep_expired(pool: &PgPool) -> Result<Vec<HumanValidation>> {
    let expired = db::list_expired(pool).await.context("failed to list expired validations")?;
    for validation in &expired {
        db::mark_status(pool, validation.id, ValidationStatus::Expired).await.ok();
    }
    Ok(expired)
}

/// Send reminder notifications for validations approaching their deadline
/// that have not already received one.
pub async fn sweep_reminders(pool: &PgPool, notifier: &dyn Notifier) -> Result<usize> {
    let pending = db::list_pending(pool).await.context("failed to list pending validations")?;
    let now = Utc::now();
    let mut sent = 0;
    for validation in pending {
        if validation.reminder_sent_at.is_some() {
            continue;
        }
        if validation.expires_at - now <= reminder_lead_time() {
            notifier.notify_validation_reminder(&validation).await.ok();
            db::mark_reminder_sent(pool, validation.id).await.ok();
            sent += 1;
        }
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_validation(creator_id: Option<&str>, creator_email: Option<&str>) -> HumanValidation {
        HumanValidation {
            id: 1,
            task_id: 1,
            run_id: 1,
            step_id: 1,
            title: "t".into(),
            generated_code: serde_json::json!({}),
            summary: "s".into(),
            files_modified: vec![],
            status: ValidationStatus::Pending,
            rejection_count: 0,
            is_retry: false,
            parent_validation_id: None,
            tracker_update_id: "u1".into(),
            creator_id: creator_id.map(str::to_string),
            creator_email: creator_email.map(str::to_string),
            creator_name: None,
            unauthorized_attempts: 0,
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::hours(1),
            reminder_sent_at: None,
        }
    }

    #[test]
    fn matching_creator_id_is_authorized() {
        let v = sample_validation(Some("user-1"), None);
        assert!(is_authorized_responder(&v, Some("user-1"), None));
    }

    #[test]
    fn mismatched_id_and_email_is_unauthorized() {
        let v = sample_validation(Some("user-1"), Some("a@example.com"));
        assert!(!is_authorized_responder(&v, Some("user-2"), Some("b@example.com")));
    }

    #[test]
    fn email_match_is_case_insensitive() {
        let v = sample_validation(None, Some("A@Example.com"));
        assert!(is_authorized_responder(&v, None, Some("a@example.com")));
    }

    #[test]
    fn no_recorded_creator_allows_anyone() {
        let v = sample_validation(None, None);
        assert!(is_authorized_responder(&v, Some("anyone"), None));
    }
}
