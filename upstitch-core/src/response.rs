//! Response payloads for the upload endpoint

use crate::UploadOutcome;

const SUCCESS_BODY: &str = r#"{"success": true}"#;

/// Render an outcome as the body the upload widget expects.
///
/// Success is always `{"success": true}`; failure is `{"error": "<message>"}`
/// with the message escaped as a JSON string.
pub fn encode(outcome: &UploadOutcome) -> String {
    match (&outcome.error, outcome.success) {
        (None, true) => SUCCESS_BODY.to_string(),
        (error, _) => {
            let message = error.as_deref().unwrap_or("Upload failed");
            // Serializing a &str cannot fail
            let quoted = serde_json::to_string(message)
                .unwrap_or_else(|_| String::from("\"Upload failed\""));
            format!(r#"{{"error": {}}}"#, quoted)
        }
    }
}
