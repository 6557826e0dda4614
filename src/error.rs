use thiserror::Error;

use crate::retry::FailureClass;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    InvalidUrl,
    UnsupportedScheme,
    RedirectLimit,
    Dns,
    Connect,
    Tls,
    Timeout,
    Io,
    BodyWrite,
    Decode,
    BodyTooLarge,
    Cancelled,
    Interrupted,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::InvalidUrl => "invalid_url",
            Self::UnsupportedScheme => "unsupported_scheme",
            Self::RedirectLimit => "redirect_limit",
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Timeout => "timeout",
            Self::Io => "io",
            Self::BodyWrite => "body_write",
            Self::Decode => "decode",
            Self::BodyTooLarge => "body_too_large",
            Self::Cancelled => "cancelled",
            Self::Interrupted => "interrupted",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    Transport,
    Server,
    Parse,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Server => "server",
            Self::Parse => "parse",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Terminal failure of one `execute` call.
///
/// `Transport` covers everything that kept the round trip from completing,
/// `Server` a non-success status, and `Parse` a body the parser rejected.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("http request failed ({kind}) for {url}: {message}")]
    Transport {
        kind: TransportErrorKind,
        url: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("http status error {status} for {url}: {message}")]
    Server {
        status: u16,
        url: String,
        message: String,
    },
    #[error("failed to parse response from {url}: {message}")]
    Parse {
        url: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl Error {
    pub(crate) fn transport(
        kind: TransportErrorKind,
        url: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transport {
            kind,
            url: url.into(),
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn transport_with_source(
        kind: TransportErrorKind,
        url: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        let source = source.into();
        Self::Transport {
            kind,
            url: url.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Server { .. } => ErrorCode::Server,
            Self::Parse { .. } => ErrorCode::Parse,
        }
    }

    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Transport { url, .. } | Self::Server { url, .. } | Self::Parse { url, .. } => url,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transport { message, .. }
            | Self::Server { message, .. }
            | Self::Parse { message, .. } => message,
        }
    }

    /// Classification handed to the retry policy. Parse failures have none.
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            Self::Transport { kind, .. } => Some(FailureClass::Transport(*kind)),
            Self::Server { status, .. } => Some(FailureClass::Status(*status)),
            Self::Parse { .. } => None,
        }
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct ParseError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn into_error(self, url: &str) -> Error {
        Error::Parse {
            url: url.to_owned(),
            message: self.message,
            source: self.source,
        }
    }
}

impl From<serde_json::Error> for ParseError {
    fn from(source: serde_json::Error) -> Self {
        Self::with_source(format!("invalid json body: {source}"), source)
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorCode, ParseError, TransportErrorKind};
    use crate::retry::FailureClass;

    #[test]
    fn parse_failures_have_no_retry_classification() {
        let error = ParseError::new("bad body").into_error("http://example.test/");
        assert_eq!(error.code(), ErrorCode::Parse);
        assert!(error.failure_class().is_none());
    }

    #[test]
    fn server_failures_classify_by_status() {
        let error = Error::Server {
            status: 503,
            url: "http://example.test/".to_owned(),
            message: "busy".to_owned(),
        };
        assert_eq!(error.failure_class(), Some(FailureClass::Status(503)));
        assert_eq!(error.status(), Some(503));
        assert_eq!(
            error.to_string(),
            "http status error 503 for http://example.test/: busy"
        );
    }

    #[test]
    fn transport_error_keeps_source_message() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let error =
            Error::transport_with_source(TransportErrorKind::Connect, "http://example.test/", io);
        assert_eq!(error.message(), "refused");
        assert_eq!(error.transport_kind(), Some(TransportErrorKind::Connect));
        assert!(std::error::Error::source(&error).is_some());
    }
}
