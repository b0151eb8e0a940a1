// src/render.rs - Document rendering collaborator for report generation
//
// Stand-in for the external rendering service: formats the request, its lab
// results and manual readings into a plain-text document on disk. Layout
// internals are out of scope for the lifecycle core; what matters is that
// rendering happens before the report metadata commits, so a render failure
// leaves no report row and no status change.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{ApiError, ApiResult};
use crate::models::{LabResult, ManualReading, ServiceRequest};

/// Deterministic per request, so regeneration overwrites the old document.
pub fn report_file_name(request_id: &str) -> String {
    format!("report-{}.txt", request_id)
}

pub fn render_report_document(
    reports_dir: &Path,
    request: &ServiceRequest,
    lab_results: &[LabResult],
    manual_readings: &[ManualReading],
) -> ApiResult<PathBuf> {
    fs::create_dir_all(reports_dir).map_err(|err| {
        ApiError::InternalServerError(format!("Cannot create reports directory: {}", err))
    })?;

    let path = reports_dir.join(report_file_name(&request.id));
    let mut file = fs::File::create(&path).map_err(|err| {
        ApiError::InternalServerError(format!("Cannot create report file: {}", err))
    })?;

    let mut write = |line: String| -> ApiResult<()> {
        writeln!(file, "{}", line)
            .map_err(|err| ApiError::InternalServerError(format!("Report write failed: {}", err)))
    };

    write("ENVIRONMENTAL TESTING REPORT".to_string())?;
    write("============================".to_string())?;
    write(format!("Request ID:   {}", request.id))?;
    write(format!("Service type: {}", request.service_type))?;
    write(format!("Location:     {}", request.location))?;
    write(format!("Requested on: {}", request.created_at.format("%Y-%m-%d")))?;
    write(String::new())?;

    write("Laboratory analysis results:".to_string())?;
    if lab_results.is_empty() {
        write("  (none recorded)".to_string())?;
    }
    for result in lab_results {
        write(format!(
            "  - {}: {} {} (sample {}, analyst {})",
            result.parameter, result.value, result.unit, result.sample_code, result.analyst_name
        ))?;
    }
    write(String::new())?;

    write("Manual field readings:".to_string())?;
    if manual_readings.is_empty() {
        write("  (none recorded)".to_string())?;
    }
    for reading in manual_readings {
        write(format!(
            "  - {}: {} {} at {}",
            reading.parameter,
            reading.value,
            reading.unit,
            reading.reading_time.format("%Y-%m-%d %H:%M")
        ))?;
    }

    Ok(path)
}
