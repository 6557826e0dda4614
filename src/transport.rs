use std::io::{self, Read};
use std::time::Duration;

use bytes::Bytes;
use http::Method;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, LOCATION};
use url::Url;

use crate::content_encoding::BodyReader;
use crate::error::TransportErrorKind;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const DEFAULT_USER_AGENT: &str = concat!("reqflow/", env!("CARGO_PKG_VERSION"));
const DEFAULT_ACCEPT_ENCODING: &str = "gzip, deflate";

#[derive(Debug)]
pub struct OutgoingRequest<'a> {
    pub method: &'a Method,
    pub url: &'a Url,
    pub headers: &'a [(String, String)],
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    /// Present only for methods that carry a body.
    pub body: Option<Bytes>,
}

/// Response of one attempt; the body stream is released when this is dropped.
pub struct ConnectionResult {
    status: u16,
    content_type: Option<String>,
    content_encoding: Option<String>,
    location: Option<String>,
    body: BodyReader<'static>,
}

impl std::fmt::Debug for ConnectionResult {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ConnectionResult")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("content_encoding", &self.content_encoding)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl ConnectionResult {
    pub fn new(status: u16, body: impl Read + Send + 'static) -> Self {
        Self {
            status,
            content_type: None,
            content_encoding: None,
            location: None,
            body: Box::new(body),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_content_encoding(mut self, content_encoding: impl Into<String>) -> Self {
        self.content_encoding = Some(content_encoding.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.content_encoding.as_deref()
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub(crate) fn into_body(self) -> BodyReader<'static> {
        self.body
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct TransportError {
    kind: TransportErrorKind,
    #[source]
    source: BoxError,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub(crate) fn into_source(self) -> BoxError {
        self.source
    }
}

pub trait Transport: Send + Sync {
    fn send(&self, request: OutgoingRequest<'_>) -> Result<ConnectionResult, TransportError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TlsVerification {
    #[default]
    Platform,
    /// Accept any server certificate. Only meant for development builds
    /// talking to self-signed endpoints.
    Disabled,
}

#[derive(Clone, Debug)]
pub struct UreqTransportBuilder {
    user_agent: String,
    tls_verification: TlsVerification,
}

impl Default for UreqTransportBuilder {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            tls_verification: TlsVerification::Platform,
        }
    }
}

impl UreqTransportBuilder {
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn tls_verification(mut self, tls_verification: TlsVerification) -> Self {
        self.tls_verification = tls_verification;
        self
    }

    pub fn build(self) -> UreqTransport {
        let tls_builder = ureq::tls::TlsConfig::builder()
            .disable_verification(self.tls_verification == TlsVerification::Disabled);
        #[cfg(all(feature = "tls-native", not(feature = "tls-rustls")))]
        let tls_builder = tls_builder.provider(ureq::tls::TlsProvider::NativeTls);
        let tls_config = tls_builder.build();
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(0)
            .max_redirects_will_error(false)
            .user_agent(self.user_agent.as_str())
            .tls_config(tls_config)
            .build();
        UreqTransport {
            agent: config.new_agent(),
        }
    }
}

/// Blocking HTTP/1.1 transport backed by a `ureq` agent.
///
/// Redirects and decompression are left to the executor.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("UreqTransport").finish_non_exhaustive()
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl UreqTransport {
    pub fn builder() -> UreqTransportBuilder {
        UreqTransportBuilder::default()
    }

    fn run<S: ureq::AsSendBody>(
        &self,
        request: ureq::http::Request<S>,
        connect_timeout: Option<Duration>,
        read_timeout: Option<Duration>,
    ) -> Result<ureq::http::Response<ureq::Body>, TransportError> {
        let mut configured = self.agent.configure_request(request);
        if let Some(connect_timeout) = connect_timeout {
            configured = configured.timeout_connect(Some(connect_timeout));
        }
        if let Some(read_timeout) = read_timeout {
            configured = configured
                .timeout_recv_response(Some(read_timeout))
                .timeout_recv_body(Some(read_timeout));
        }
        self.agent
            .run(configured.build())
            .map_err(|source| TransportError::new(classify_ureq_transport_error(&source), source))
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: OutgoingRequest<'_>) -> Result<ConnectionResult, TransportError> {
        let mut builder = ureq::http::Request::builder()
            .method(request.method.clone())
            .uri(request.url.as_str());
        for (name, value) in request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let has_accept_encoding = request
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(ACCEPT_ENCODING.as_str()));
        if !has_accept_encoding {
            builder = builder.header(ACCEPT_ENCODING, DEFAULT_ACCEPT_ENCODING);
        }

        let response = match request.body {
            Some(body) => {
                let http_request = builder
                    .body(body.to_vec())
                    .map_err(|source| TransportError::new(TransportErrorKind::Other, source))?;
                self.run(http_request, request.connect_timeout, request.read_timeout)?
            }
            None => {
                let http_request = builder
                    .body(())
                    .map_err(|source| TransportError::new(TransportErrorKind::Other, source))?;
                self.run(http_request, request.connect_timeout, request.read_timeout)?
            }
        };

        let header_text = |name: http::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(ToOwned::to_owned)
        };
        let status = response.status().as_u16();
        let content_type = header_text(CONTENT_TYPE);
        let content_encoding = header_text(CONTENT_ENCODING);
        let location = header_text(LOCATION);

        Ok(ConnectionResult {
            status,
            content_type,
            content_encoding,
            location,
            body: Box::new(response.into_body().into_reader()),
        })
    }
}

pub(crate) fn classify_ureq_transport_error(error: &ureq::Error) -> TransportErrorKind {
    match error {
        ureq::Error::HostNotFound => TransportErrorKind::Dns,
        ureq::Error::Tls(_) => TransportErrorKind::Tls,
        #[cfg(feature = "tls-rustls")]
        ureq::Error::Rustls(_) => TransportErrorKind::Tls,
        #[cfg(feature = "tls-native")]
        ureq::Error::NativeTls(_) => TransportErrorKind::Tls,
        ureq::Error::ConnectProxyFailed(_) | ureq::Error::ConnectionFailed => {
            TransportErrorKind::Connect
        }
        ureq::Error::Timeout(_) => TransportErrorKind::Timeout,
        ureq::Error::BadUri(_) => TransportErrorKind::InvalidUrl,
        ureq::Error::Io(source) => classify_io_error_kind(source.kind()),
        _ => TransportErrorKind::Other,
    }
}

fn classify_io_error_kind(kind: io::ErrorKind) -> TransportErrorKind {
    match kind {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportErrorKind::Timeout,
        io::ErrorKind::NotFound => TransportErrorKind::Dns,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::AddrNotAvailable => TransportErrorKind::Connect,
        _ => TransportErrorKind::Io,
    }
}

pub(crate) fn classify_io_error(error: &io::Error) -> TransportErrorKind {
    match wrapped_ureq_error(error) {
        Some(ureq_error) => classify_ureq_transport_error(ureq_error),
        None => classify_io_error_kind(error.kind()),
    }
}

fn wrapped_ureq_error(io_error: &io::Error) -> Option<&ureq::Error> {
    io_error
        .get_ref()
        .and_then(|source| source.downcast_ref::<ureq::Error>())
}
