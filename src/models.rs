// src/models.rs
//! Data model for the environmental services platform.
//!
//! `ServiceRequest` is the root entity; schedules, sample logs, manual
//! readings, lab results and reports hold a non-owning reference to it.
//! The request `status` column is the one piece of shared mutable state,
//! written exclusively through `lifecycle::apply_transition`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

// ==================== STATUS ENUMS ====================

/// Progress indicator on a service request.
///
/// Advisory, not a workflow enforcer: no guard prevents out-of-order
/// transitions and the last committed coordinated write wins.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
    sqlx::Type, strum::Display, strum::EnumString,
)]
#[sqlx(type_name = "TEXT")]
pub enum RequestStatus {
    Requested,
    Scheduled,
    Analyzed,
    DataProcessing,
    Completed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Requested => "Requested",
            RequestStatus::Scheduled => "Scheduled",
            RequestStatus::Analyzed => "Analyzed",
            RequestStatus::DataProcessing => "DataProcessing",
            RequestStatus::Completed => "Completed",
        }
    }
}

/// Chain-of-custody state of one physical sample.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
    sqlx::Type, strum::Display, strum::EnumString,
)]
#[sqlx(type_name = "TEXT")]
pub enum SampleStatus {
    Field,
    InTransit,
    ReceivedAtLab,
    Analyzed,
    Done,
}

impl SampleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleStatus::Field => "Field",
            SampleStatus::InTransit => "InTransit",
            SampleStatus::ReceivedAtLab => "ReceivedAtLab",
            SampleStatus::Analyzed => "Analyzed",
            SampleStatus::Done => "Done",
        }
    }
}

// ==================== SERVICE REQUEST ====================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ServiceRequest {
    pub id: String,
    pub user_id: String,
    pub service_type: String,
    pub location: String,
    pub preferred_date: NaiveDate,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRequestRequest {
    #[validate(length(min = 1, max = 100, message = "Service type must be 1-100 characters"))]
    pub service_type: String,

    #[validate(length(min = 1, max = 255, message = "Location must be 1-255 characters"))]
    pub location: String,

    pub preferred_date: NaiveDate,
}

/// Admin/staff queue row: request joined with the requester's name.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct RequestSummary {
    pub id: String,
    pub service_type: String,
    pub location: String,
    pub status: RequestStatus,
    pub customer_name: String,
    pub created_at: DateTime<Utc>,
}

// ==================== SCHEDULE ====================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Schedule {
    pub id: String,
    pub request_id: String,
    pub technician_id: String,
    pub scheduled_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AssignScheduleRequest {
    #[validate(length(min = 1, message = "Request ID is required"))]
    pub request_id: String,

    #[validate(length(min = 1, message = "Technician ID is required"))]
    pub technician_id: String,

    pub scheduled_date: NaiveDate,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateScheduleRequest {
    #[validate(length(min = 1, message = "Technician ID is required"))]
    pub technician_id: String,

    pub scheduled_date: NaiveDate,
}

/// Admin schedule board row.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ScheduleOverview {
    pub id: String,
    pub request_id: String,
    pub scheduled_date: NaiveDate,
    pub service_type: String,
    pub request_status: RequestStatus,
    pub technician_id: String,
    pub technician_name: String,
    pub customer_organization: Option<String>,
}

// ==================== SAMPLE LOG ====================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SampleLog {
    pub id: String,
    pub request_id: String,
    pub sample_code: String,
    pub technician_id: String,
    pub status: SampleStatus,
    pub logged_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LogSampleRequest {
    #[validate(length(min = 1, message = "Request ID is required"))]
    pub request_id: String,

    #[validate(length(min = 1, max = 100, message = "Sample code must be 1-100 characters"))]
    pub sample_code: String,

    /// Custody state at log time; defaults to `Field`.
    pub status: Option<SampleStatus>,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceSampleStatusRequest {
    pub status: SampleStatus,
}

/// Lab-receipt queue row.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PendingSample {
    pub id: String,
    pub sample_code: String,
    pub request_id: String,
}

// ==================== MANUAL READING ====================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ManualReading {
    pub id: String,
    pub request_id: String,
    pub technician_id: String,
    pub parameter: String,
    pub value: f64,
    pub unit: String,
    pub reading_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateManualReadingRequest {
    #[validate(length(min = 1, message = "Request ID is required"))]
    pub request_id: String,

    #[validate(length(min = 1, max = 100, message = "Parameter must be 1-100 characters"))]
    pub parameter: String,

    pub value: f64,

    #[validate(length(min = 1, max = 20, message = "Unit must be 1-20 characters"))]
    pub unit: String,
}

/// Manual-data board row: reading joined with the owning request's status.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ManualReadingWithStatus {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub reading: ManualReading,
    pub request_status: RequestStatus,
}

// ==================== LAB RESULT ====================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LabResult {
    pub id: String,
    pub request_id: String,
    pub sample_code: String,
    pub parameter: String,
    pub value: f64,
    pub unit: String,
    pub test_date: DateTime<Utc>,
    pub analyst_name: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateLabResultRequest {
    #[validate(length(min = 1, message = "Sample code is required"))]
    pub sample_code: String,

    #[validate(length(min = 1, max = 100, message = "Parameter must be 1-100 characters"))]
    pub parameter: String,

    pub value: f64,

    #[validate(length(min = 1, max = 20, message = "Unit must be 1-20 characters"))]
    pub unit: String,

    pub test_date: DateTime<Utc>,

    #[validate(length(min = 1, max = 255, message = "Analyst name must be 1-255 characters"))]
    pub analyst_name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateLabResultRequest {
    #[validate(length(min = 1, max = 100, message = "Parameter must be 1-100 characters"))]
    pub parameter: String,

    pub value: f64,

    #[validate(length(min = 1, max = 20, message = "Unit must be 1-20 characters"))]
    pub unit: String,

    pub test_date: DateTime<Utc>,

    #[validate(length(min = 1, max = 255, message = "Analyst name must be 1-255 characters"))]
    pub analyst_name: String,
}

// ==================== REPORT ====================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Report {
    pub id: String,
    pub request_id: String,
    pub generated_by: String,
    pub file_name: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateReportRequest {
    #[validate(length(min = 1, message = "Request ID is required"))]
    pub request_id: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ReportMetadata {
    pub id: String,
    pub file_name: String,
}

// ==================== SENSORS ====================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Sensor {
    pub id: String,
    pub user_id: String,
    pub serial_number: String,
    pub sensor_type: String,
    pub location: String,
    pub install_date: NaiveDate,
    pub status: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSensorRequest {
    #[validate(length(min = 1, message = "Owner user ID is required"))]
    pub user_id: String,

    #[validate(length(min = 1, max = 100, message = "Serial number must be 1-100 characters"))]
    pub serial_number: String,

    #[validate(length(min = 1, max = 100, message = "Sensor type must be 1-100 characters"))]
    pub sensor_type: String,

    #[validate(length(min = 1, max = 255, message = "Location must be 1-255 characters"))]
    pub location: String,

    pub install_date: NaiveDate,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateSensorRequest {
    #[validate(length(min = 1, max = 100, message = "Serial number must be 1-100 characters"))]
    pub serial_number: String,

    #[validate(length(min = 1, max = 100, message = "Sensor type must be 1-100 characters"))]
    pub sensor_type: String,

    #[validate(length(min = 1, max = 255, message = "Location must be 1-255 characters"))]
    pub location: String,

    pub install_date: NaiveDate,

    #[validate(length(min = 1, max = 50, message = "Status must be 1-50 characters"))]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SensorReading {
    pub id: String,
    pub sensor_id: String,
    pub parameter: String,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct IngestReadingRequest {
    #[validate(length(min = 1, max = 100, message = "Parameter must be 1-100 characters"))]
    pub parameter: String,

    pub value: f64,

    /// Capture time; defaults to now when the pipeline omits it.
    pub recorded_at: Option<DateTime<Utc>>,
}

// ==================== ANALYTICS ====================

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TrendPoint {
    pub date: String,
    pub value: f64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct WorkloadDay {
    pub scheduled_date: NaiveDate,
    pub jobs: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn request_status_round_trips_as_text() {
        assert_eq!(RequestStatus::DataProcessing.as_str(), "DataProcessing");
        assert_eq!(
            RequestStatus::from_str("Analyzed").unwrap(),
            RequestStatus::Analyzed
        );
        assert!(RequestStatus::from_str("Dianalisis").is_err());
    }

    #[test]
    fn sample_status_round_trips_as_text() {
        assert_eq!(SampleStatus::ReceivedAtLab.as_str(), "ReceivedAtLab");
        assert_eq!(SampleStatus::from_str("Done").unwrap(), SampleStatus::Done);
    }
}
