/// Category of a stream error. Lets the caller decide how to react
/// (fail fast, back off, skip the record).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration or credentials: permanent, fail at startup.
    Config,
    /// Network or service failure: transient, may retry.
    Io,
    /// Provider throttling (throughput or request limits): transient.
    Throttled,
    /// Payload could not be encoded/decoded: bad input, skip record.
    Format,
    /// Logical error (unknown stream, invalid request, invalid state).
    Logic,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Throttled => f.write_str("throttled"),
            ErrorKind::Format => f.write_str("format"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

/// Ошибка транспорта: любой сбой вызова к stream-сервису
/// (соединение, throttling, ошибка сервиса).
///
/// Несёт `ErrorKind` для классификации, сообщение и, если провайдер
/// его вернул, код ошибки (например `ProvisionedThroughputExceededException`).
#[derive(Clone, PartialEq, Eq)]
pub struct StreamError {
    kind: ErrorKind,
    message: String,
    code: Option<String>,
}

impl StreamError {
    /// Generic logic error (default kind).
    pub fn new(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Logic, message: msg.into(), code: None }
    }

    /// Configuration error: permanent, fail at startup.
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into(), code: None }
    }

    /// I/O error: transient, may retry.
    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into(), code: None }
    }

    /// Throttling error: transient, back off before retrying.
    pub fn throttled(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Throttled, message: msg.into(), code: None }
    }

    /// Format/parse error: bad input, skip record.
    pub fn format_err(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: msg.into(), code: None }
    }

    /// Attach the provider's error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Prepend context to the message, keeping kind and code.
    pub fn with_context(mut self, ctx: impl std::fmt::Display) -> Self {
        self.message = format!("{ctx}: {}", self.message);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// `true` для транзиентных ошибок (Io, Throttled).
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Io | ErrorKind::Throttled)
    }
}

impl std::fmt::Debug for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {} ({code})", self.kind, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{code}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for StreamError {}

impl From<String> for StreamError {
    fn from(s: String) -> Self { Self::new(s) }
}

impl From<&str> for StreamError {
    fn from(s: &str) -> Self { Self::new(s) }
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self { Self::io(e.to_string()) }
}

impl From<serde_json::Error> for StreamError {
    fn from(e: serde_json::Error) -> Self { Self::format_err(e.to_string()) }
}

impl From<std::str::Utf8Error> for StreamError {
    fn from(e: std::str::Utf8Error) -> Self { Self::format_err(e.to_string()) }
}

impl From<std::string::FromUtf8Error> for StreamError {
    fn from(e: std::string::FromUtf8Error) -> Self { Self::format_err(e.to_string()) }
}
