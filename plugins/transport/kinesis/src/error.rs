use stream_api::{ErrorKind, StreamError};

use crate::wire::ErrorBody;

/// Classify a provider error code.
pub(crate) fn kind_for_code(code: &str) -> Option<ErrorKind> {
    let kind = match code {
        "ProvisionedThroughputExceededException"
        | "LimitExceededException"
        | "ThrottlingException"
        | "KMSThrottlingException" => ErrorKind::Throttled,
        "ResourceNotFoundException"
        | "ResourceInUseException"
        | "InvalidArgumentException"
        | "ValidationException"
        | "ExpiredIteratorException"
        | "ExpiredNextTokenException" => ErrorKind::Logic,
        "UnrecognizedClientException"
        | "AccessDeniedException"
        | "InvalidSignatureException"
        | "IncompleteSignature"
        | "MissingAuthenticationToken"
        | "ExpiredTokenException" => ErrorKind::Config,
        "InternalFailure" | "ServiceUnavailable" => ErrorKind::Io,
        _ => return None,
    };
    Some(kind)
}

/// Build a [`StreamError`] from a non-2xx response.
pub(crate) fn from_response(status: u16, body: &[u8]) -> StreamError {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    // "__type" may carry a namespace: "com.amazonaws.kinesis#ResourceNotFoundException".
    let code = parsed
        .error_type
        .as_deref()
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_string());
    let message = parsed
        .message
        .unwrap_or_else(|| format!("HTTP {status}: {}", String::from_utf8_lossy(body).trim()));

    let kind = code
        .as_deref()
        .and_then(kind_for_code)
        .unwrap_or(if status >= 500 { ErrorKind::Io } else { ErrorKind::Logic });

    let err = match kind {
        ErrorKind::Throttled => StreamError::throttled(message),
        ErrorKind::Config => StreamError::config(message),
        ErrorKind::Io => StreamError::io(message),
        ErrorKind::Format => StreamError::format_err(message),
        ErrorKind::Logic => StreamError::new(message),
    };
    match code {
        Some(code) => err.with_code(code),
        None => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_exceeded_is_throttled() {
        let err = from_response(
            400,
            br#"{"__type":"ProvisionedThroughputExceededException","message":"Rate exceeded for shard"}"#,
        );
        assert_eq!(err.kind(), ErrorKind::Throttled);
        assert_eq!(err.code(), Some("ProvisionedThroughputExceededException"));
        assert_eq!(err.message(), "Rate exceeded for shard");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_namespaced_type_is_stripped() {
        let err = from_response(
            400,
            br#"{"__type":"com.amazonaws.kinesis.v20131202#ResourceNotFoundException","message":"Stream ticks not found"}"#,
        );
        assert_eq!(err.kind(), ErrorKind::Logic);
        assert_eq!(err.code(), Some("ResourceNotFoundException"));
    }

    #[test]
    fn test_auth_failure_is_config() {
        let err = from_response(400, br#"{"__type":"UnrecognizedClientException","message":"bad token"}"#);
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unparseable_5xx_is_io() {
        let err = from_response(503, b"<html>Service Unavailable</html>");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.code().is_none());
        assert!(err.message().contains("503"));
    }

    #[test]
    fn test_unknown_4xx_code_is_logic() {
        let err = from_response(400, br#"{"__type":"SomethingNewException"}"#);
        assert_eq!(err.kind(), ErrorKind::Logic);
        assert_eq!(err.code(), Some("SomethingNewException"));
    }
}
