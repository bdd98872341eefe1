//! Custom error types for bhunt.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while auditing storage.
///
/// Remote failures are classified by how the walker reacts to them:
/// `Throttled` is retried, `PermissionDenied` is skipped (or abandons a
/// subscription at key retrieval), the remaining remote variants are
/// skipped, and `Authentication` ends the run.
#[derive(Error, Debug)]
pub enum Error {
    #[error("[{resource}] rate limited, retry after {}s", retry_after.as_secs())]
    Throttled {
        resource: String,
        retry_after: Duration,
    },

    #[error("[{resource}] permission denied: {message}")]
    PermissionDenied { resource: String, message: String },

    #[error("[{0}] not found")]
    NotFound(String),

    #[error("[{resource}] request failed with status {status}: {message}")]
    Remote {
        resource: String,
        status: u16,
        message: String,
    },

    #[error("[{resource}] transport error: {message}")]
    Transport { resource: String, message: String },

    #[error("[{resource}] unexpected response: {message}")]
    Decode { resource: String, message: String },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Report error: {0}")]
    Report(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Prompt failed: {0}")]
    Prompt(String),

    #[error("Operation cancelled by user")]
    Cancelled,
}

impl Error {
    /// Classify an HTTP failure by status code.
    ///
    /// `retry_after` is the server-provided wait in seconds, if any.
    pub fn from_status(
        resource: impl Into<String>,
        status: u16,
        retry_after: Option<u64>,
        body: &str,
    ) -> Self {
        let resource = resource.into();
        let message = summarize_body(body);

        match status {
            429 | 503 => Error::Throttled {
                resource,
                retry_after: Duration::from_secs(retry_after.unwrap_or(0)),
            },
            401 | 403 => Error::PermissionDenied { resource, message },
            404 => Error::NotFound(resource),
            _ => Error::Remote {
                resource,
                status,
                message,
            },
        }
    }

    pub fn transport<E: std::fmt::Display>(resource: &str, err: E) -> Self {
        Error::Transport {
            resource: resource.to_string(),
            message: err.to_string(),
        }
    }

    pub fn decode<E: std::fmt::Display>(resource: &str, err: E) -> Self {
        Error::Decode {
            resource: resource.to_string(),
            message: err.to_string(),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Error::PermissionDenied { .. })
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, Error::Throttled { .. })
    }

    /// Short reason used in one-line skip diagnostics.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Throttled { .. } => "rate limited",
            Error::PermissionDenied { .. } => "permission denied",
            Error::NotFound(_) => "not found",
            Error::Remote { .. } | Error::Transport { .. } | Error::Decode { .. } => {
                "remote error"
            }
            Error::Authentication(_) => "authentication failed",
            _ => "error",
        }
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Error::Report(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Report(e.to_string())
    }
}

impl From<dialoguer::Error> for Error {
    fn from(e: dialoguer::Error) -> Self {
        Error::Prompt(e.to_string())
    }
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Pull the human-readable message out of an ARM or blob service error body.
///
/// ARM answers `{"error":{"code":..,"message":..}}`, the blob service answers
/// `<Error><Code>..</Code><Message>..</Message></Error>`.
fn summarize_body(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body)
        && let Some(msg) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
    {
        return msg.to_string();
    }

    if let Some(start) = body.find("<Message>") {
        let rest = &body[start + "<Message>".len()..];
        if let Some(end) = rest.find("</Message>") {
            return rest[..end].lines().next().unwrap_or_default().trim().to_string();
        }
    }

    let line = body.lines().next().unwrap_or_default().trim();
    if line.is_empty() {
        "no details".to_string()
    } else {
        line.chars().take(200).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_throttled_with_retry_after() {
        let err = Error::from_status("subscriptions", 429, Some(17), "");
        match err {
            Error::Throttled { retry_after, .. } => assert_eq!(retry_after.as_secs(), 17),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_from_status_server_busy_is_throttled() {
        let err = Error::from_status("account", 503, None, "");
        assert!(err.is_throttled());
        assert_eq!(err.to_string(), "[account] rate limited, retry after 0s");
    }

    #[test]
    fn test_from_status_permission_denied() {
        let body = r#"{"error":{"code":"AuthorizationFailed","message":"The client does not have authorization"}}"#;
        let err = Error::from_status("rg/acct", 403, None, body);
        assert!(err.is_permission_denied());
        assert_eq!(
            err.to_string(),
            "[rg/acct] permission denied: The client does not have authorization"
        );
    }

    #[test]
    fn test_from_status_blob_xml_message() {
        let body = "<?xml version=\"1.0\"?><Error><Code>AuthenticationFailed</Code><Message>Server failed to authenticate the request.\nRequestId:abc</Message></Error>";
        let err = Error::from_status("acct", 403, None, body);
        assert_eq!(
            err.to_string(),
            "[acct] permission denied: Server failed to authenticate the request."
        );
    }

    #[test]
    fn test_from_status_not_found_and_remote() {
        assert!(matches!(
            Error::from_status("x", 404, None, ""),
            Error::NotFound(_)
        ));
        let err = Error::from_status("x", 500, None, "boom");
        assert_eq!(err.to_string(), "[x] request failed with status 500: boom");
        assert_eq!(err.reason(), "remote error");
    }

    #[test]
    fn test_error_display_cancelled() {
        assert_eq!(Error::Cancelled.to_string(), "Operation cancelled by user");
    }
}
