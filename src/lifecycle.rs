// src/lifecycle.rs
//! Service-request lifecycle state machine.
//!
//! Five different write paths (scheduling, sample custody, manual data entry,
//! lab results, reporting) all move the owning `ServiceRequest` through its
//! status sequence. Instead of each handler writing the status column inline,
//! every coordinated write maps its trigger to a [`LifecycleEvent`] and calls
//! [`apply_transition`] inside its own transaction, so the entity write and
//! the status write commit or roll back together.
//!
//! The table is deliberately unguarded: status is a coarse progress indicator
//! for customers, and the last committed trigger wins regardless of workflow
//! order.

use sqlx::{Sqlite, Transaction};

use crate::error::{ApiError, ApiResult};
use crate::models::RequestStatus;

/// A lifecycle-relevant write against one of the leaf stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A technician was assigned to the request.
    ScheduleAssigned,
    /// The active schedule was cancelled; the request re-enters the queue.
    ScheduleCancelled,
    /// Staff entered a manual measurement for the request.
    ManualReadingRecorded,
    /// A sample log advanced to `Analyzed`.
    SampleAnalyzed,
    /// A sample log advanced to `Done`.
    SampleDone,
    /// A lab result was submitted for one of the request's samples.
    LabResultRecorded,
    /// A report was generated, closing the request.
    ReportGenerated,
}

impl LifecycleEvent {
    /// The status the owning request takes when this event commits.
    pub fn target_status(&self) -> RequestStatus {
        match self {
            LifecycleEvent::ScheduleAssigned => RequestStatus::Scheduled,
            LifecycleEvent::ScheduleCancelled => RequestStatus::Requested,
            LifecycleEvent::ManualReadingRecorded => RequestStatus::DataProcessing,
            LifecycleEvent::SampleAnalyzed => RequestStatus::Analyzed,
            LifecycleEvent::SampleDone => RequestStatus::DataProcessing,
            LifecycleEvent::LabResultRecorded => RequestStatus::Analyzed,
            LifecycleEvent::ReportGenerated => RequestStatus::Completed,
        }
    }
}

/// Writes the status dictated by `event` onto the request, inside the
/// caller's transaction.
///
/// Fails with `NotFound` when the request row does not exist, which aborts
/// the surrounding coordinated write; the triggering entity row is rolled
/// back with it. The only precondition is existence - see the module docs
/// for why there is no ordering guard.
pub async fn apply_transition(
    tx: &mut Transaction<'_, Sqlite>,
    request_id: &str,
    event: LifecycleEvent,
) -> ApiResult<RequestStatus> {
    let status = event.target_status();

    let result = sqlx::query("UPDATE service_requests SET status = ? WHERE id = ?")
        .bind(status)
        .bind(request_id)
        .execute(&mut **tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::request_not_found(request_id));
    }

    log::info!(
        "Request {} moved to {} ({:?})",
        request_id,
        status.as_str(),
        event
    );
    Ok(status)
}
