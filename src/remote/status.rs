//! Status extraction from build host responses.
//!
//! The build host answers the command POST with a small JSON-ish body. Only
//! the `"status":` field is read, and it is read textually: the value runs
//! from the marker up to the next `}`.

use crate::models::RemoteOutcome;

const STATUS_MARKER: &str = "\"status\":";
const FAILURE_SENTINEL: &str = "false";

/// Text between the first `"status":` and the next `}`, with surrounding
/// whitespace and quotes removed. `None` when the marker is absent.
pub fn extract_status(body: &str) -> Option<String> {
    let (_, rest) = body.split_once(STATUS_MARKER)?;
    let value = match rest.find('}') {
        Some(end) => &rest[..end],
        None => rest,
    };
    Some(value.trim().trim_matches('"').trim().to_string())
}

/// Classify a command response body.
pub fn interpret(body: &str) -> RemoteOutcome {
    match extract_status(body) {
        Some(status) if status == FAILURE_SENTINEL => {
            RemoteOutcome::RemoteFailure(format!("build host reported status {}", status))
        }
        Some(status) => RemoteOutcome::Ok(status),
        None => RemoteOutcome::RemoteFailure(format!(
            "no status in build host response: {}",
            body.trim()
        )),
    }
}
