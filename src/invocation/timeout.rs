//! Effective timeout resolution.
//!
//! The request-level timeout wins when present; otherwise the tool default
//! applies. Durations use humantime syntax (`100ms`, `5s`, `1m30s`).

use std::time::Duration;

use crate::types::{Error, Result};

/// Resolve the effective process timeout.
///
/// - non-empty `request` that fails to parse → [`Error::Validation`]
/// - empty `request`, non-empty `tool_default` that fails to parse →
///   [`Error::Configuration`]
/// - both empty → `Duration::ZERO` (no timeout enforced)
pub fn resolve_timeout(request: &str, tool_default: &str) -> Result<Duration> {
    let request = request.trim();
    if !request.is_empty() {
        return humantime::parse_duration(request)
            .map_err(|e| Error::validation(format!("invalid timeout {:?}: {}", request, e)));
    }

    let tool_default = tool_default.trim();
    if !tool_default.is_empty() {
        return humantime::parse_duration(tool_default).map_err(|e| {
            Error::configuration(format!("invalid timeout config {:?}: {}", tool_default, e))
        });
    }

    Ok(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_overrides_tool_default() {
        assert_eq!(
            resolve_timeout("250ms", "5s").unwrap(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_tool_default_used_when_request_empty() {
        assert_eq!(resolve_timeout("", "5s").unwrap(), Duration::from_secs(5));
        assert_eq!(resolve_timeout("  ", "1m 30s").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_both_empty_means_no_timeout() {
        assert_eq!(resolve_timeout("", "").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_invalid_request_timeout_is_validation_failure() {
        let err = resolve_timeout("invalid_duration", "5s").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("invalid timeout"));

        // Even when the tool default is broken too.
        let err = resolve_timeout("invalid_duration", "also bad").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_invalid_tool_timeout_is_configuration_failure() {
        let err = resolve_timeout("", "forever").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("invalid timeout config"));
    }

    #[test]
    fn test_invalid_tool_timeout_ignored_when_request_valid() {
        assert_eq!(resolve_timeout("2s", "forever").unwrap(), Duration::from_secs(2));
    }
}
