use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::Method;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use url::Url;

use crate::ReqflowResult;
use crate::config::ExecutorConfig;
use crate::content_encoding::{
    ContentEncoding, LimitedReadError, decode_content_encoding, read_prefix, read_to_end_limited,
    resolve_charset,
};
use crate::error::{Error, ErrorCode, TransportErrorKind};
use crate::logging::Logger;
use crate::parse::{ResponseBody, ResponseParser};
use crate::request::{RequestSpec, method_requires_body};
use crate::retry::{CancelToken, RetryPolicy, RetryWait, ThreadSleep};
use crate::transport::{
    ConnectionResult, OutgoingRequest, Transport, UreqTransport, classify_io_error,
};
use crate::util::{
    append_query_pairs, is_http_scheme, redirect_method, resolve_redirect_url, same_origin,
    TRUNCATION_MARKER, truncate_body,
};

const UNKNOWN_SERVER_ERROR: &str = "Unknown server error.";

pub struct HttpExecutorBuilder {
    transport: Option<Arc<dyn Transport>>,
    config: ExecutorConfig,
    retry_wait: Arc<dyn RetryWait>,
    default_retry_policy: Option<RetryPolicy>,
}

impl Default for HttpExecutorBuilder {
    fn default() -> Self {
        Self {
            transport: None,
            config: ExecutorConfig::default(),
            retry_wait: Arc::new(ThreadSleep),
            default_retry_policy: None,
        }
    }
}

impl HttpExecutorBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn retry_wait(mut self, retry_wait: Arc<dyn RetryWait>) -> Self {
        self.retry_wait = retry_wait;
        self
    }

    pub fn default_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.default_retry_policy = Some(retry_policy);
        self
    }

    pub fn build(self) -> HttpExecutor {
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(UreqTransport::default()));
        HttpExecutor {
            transport,
            logger: self.config.logger(),
            config: self.config,
            retry_wait: self.retry_wait,
            default_retry_policy: self.default_retry_policy,
        }
    }
}

/// Runs one logical request (its redirect chain and retries) to completion.
///
/// `execute` blocks the calling thread until the request settles. The
/// executor holds no per-call state, so one value can serve many threads.
#[derive(Clone)]
pub struct HttpExecutor {
    transport: Arc<dyn Transport>,
    config: ExecutorConfig,
    logger: Logger,
    retry_wait: Arc<dyn RetryWait>,
    default_retry_policy: Option<RetryPolicy>,
}

impl std::fmt::Debug for HttpExecutor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpExecutor")
            .field("config", &self.config)
            .field("default_retry_policy", &self.default_retry_policy)
            .finish_non_exhaustive()
    }
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::builder().build()
    }
}

struct ChainReport<T> {
    result: ReqflowResult<T>,
    final_url: String,
}

enum Hop<T> {
    Settled(ReqflowResult<T>),
    Redirect { status: u16, from: Url, to: Url },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HopOutcome {
    Success,
    Redirect,
    Failure(ErrorCode),
}

impl HopOutcome {
    fn of<T>(hop: &Hop<T>) -> Self {
        match hop {
            Hop::Settled(Ok(_)) => Self::Success,
            Hop::Settled(Err(error)) => Self::Failure(error.code()),
            Hop::Redirect { .. } => Self::Redirect,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Redirect => "redirect",
            Self::Failure(ErrorCode::Transport) => "request_failure",
            Self::Failure(ErrorCode::Server) => "response_failure",
            Self::Failure(ErrorCode::Parse) => "parse_failure",
        }
    }
}

impl HttpExecutor {
    pub fn builder() -> HttpExecutorBuilder {
        HttpExecutorBuilder::default()
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn execute<T, P>(&self, spec: &RequestSpec, parser: &P) -> ReqflowResult<T>
    where
        P: ResponseParser<T> + ?Sized,
    {
        self.run(spec, parser, self.retry_wait.as_ref())
    }

    /// Like [`execute`](Self::execute), but `cancel` can stop the call
    /// between attempts or during a backoff wait.
    pub fn execute_cancellable<T, P>(
        &self,
        spec: &RequestSpec,
        parser: &P,
        cancel: &CancelToken,
    ) -> ReqflowResult<T>
    where
        P: ResponseParser<T> + ?Sized,
    {
        self.run(spec, parser, cancel)
    }

    fn run<T, P>(&self, spec: &RequestSpec, parser: &P, wait: &dyn RetryWait) -> ReqflowResult<T>
    where
        P: ResponseParser<T> + ?Sized,
    {
        let retry_policy = spec
            .retry_policy_value()
            .cloned()
            .or_else(|| self.default_retry_policy.clone())
            .unwrap_or_else(RetryPolicy::disabled);
        let mut budget = retry_policy.budget();
        let effective_url = append_query_pairs(spec.url(), spec.query());

        loop {
            if wait.is_cancelled() {
                return Err(Error::transport(
                    TransportErrorKind::Cancelled,
                    effective_url,
                    "request cancelled",
                ));
            }

            let report = self.follow_redirects(spec, parser, &effective_url);
            let error = match report.result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            let Some(failure) = error.failure_class() else {
                return Err(error);
            };
            if budget.authorize(failure, wait) {
                self.logger.warn(format_args!(
                    "request to {} failed ({}); retrying, {} retries left",
                    report.final_url,
                    error,
                    budget.remaining()
                ));
                continue;
            }
            return Err(error);
        }
    }

    /// Walks one redirect chain. Every hop is a separate attempt and gets
    /// its own timing line.
    fn follow_redirects<T, P>(
        &self,
        spec: &RequestSpec,
        parser: &P,
        effective_url: &str,
    ) -> ChainReport<T>
    where
        P: ResponseParser<T> + ?Sized,
    {
        let max_redirects = spec.max_redirects_value();
        let mut current_url = effective_url.to_owned();
        let mut method = spec.method().clone();
        let mut headers = spec.header_pairs().to_vec();
        let mut depth = 0_usize;

        loop {
            if depth > max_redirects {
                let error = Error::transport(
                    TransportErrorKind::RedirectLimit,
                    current_url.clone(),
                    format!("too many redirects (limit {max_redirects})"),
                );
                return ChainReport {
                    result: Err(error),
                    final_url: current_url,
                };
            }

            self.logger
                .debug(format_args!("start http request: {method} {current_url}"));
            let started = Instant::now();
            let (status, hop) = self.send_hop(spec, parser, &method, &headers, &current_url);
            self.log_timing(started.elapsed(), status, HopOutcome::of(&hop), &current_url);

            match hop {
                Hop::Settled(result) => {
                    return ChainReport {
                        result,
                        final_url: current_url,
                    };
                }
                Hop::Redirect { status, from, to } => {
                    if !same_origin(&from, &to) {
                        headers
                            .retain(|(name, _)| !name.eq_ignore_ascii_case(AUTHORIZATION.as_str()));
                    }
                    method = redirect_method(&method, status);
                    self.logger.debug(format_args!(
                        "following redirect {status} from {current_url} to {to}"
                    ));
                    current_url = to.into();
                    depth += 1;
                }
            }
        }
    }

    fn send_hop<T, P>(
        &self,
        spec: &RequestSpec,
        parser: &P,
        method: &Method,
        headers: &[(String, String)],
        current_url: &str,
    ) -> (Option<u16>, Hop<T>)
    where
        P: ResponseParser<T> + ?Sized,
    {
        let url = match parse_target_url(current_url) {
            Ok(url) => url,
            Err(error) => return (None, Hop::Settled(Err(error))),
        };
        let response = match self.open(spec, method, &url, headers) {
            Ok(response) => response,
            Err(error) => return (None, Hop::Settled(Err(error))),
        };
        let status = response.status();
        self.logger
            .debug(format_args!("request to {current_url} responded with {status}"));

        if self.config.success_policy.is_success(status) {
            let result = self.read_success(response, parser, current_url);
            return (Some(status), Hop::Settled(result));
        }

        if !(300..400).contains(&status) {
            let error = self.server_failure(response, current_url);
            return (Some(status), Hop::Settled(Err(error)));
        }

        let Some(location) = response.location().map(ToOwned::to_owned) else {
            let error = Error::Server {
                status,
                url: current_url.to_owned(),
                message: "redirected without a new location".to_owned(),
            };
            return (Some(status), Hop::Settled(Err(error)));
        };
        drop(response);

        match resolve_redirect_url(&url, &location) {
            Some(to) => (Some(status), Hop::Redirect { status, from: url, to }),
            None => {
                let error = Error::transport(
                    TransportErrorKind::InvalidUrl,
                    current_url,
                    format!("invalid redirect location {location}"),
                );
                (Some(status), Hop::Settled(Err(error)))
            }
        }
    }

    fn open(
        &self,
        spec: &RequestSpec,
        method: &Method,
        url: &Url,
        headers: &[(String, String)],
    ) -> ReqflowResult<ConnectionResult> {
        let (connect_timeout, read_timeout) = spec.timeouts();
        let mut attempt_headers = headers.to_vec();
        let body = if method_requires_body(method) {
            if let Some(content_type) = spec.request_content_type() {
                attempt_headers
                    .retain(|(name, _)| !name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));
                attempt_headers.push((CONTENT_TYPE.as_str().to_owned(), content_type.to_owned()));
            }
            Some(render_body(spec, url)?)
        } else {
            None
        };

        let sent = catch_unwind(AssertUnwindSafe(|| {
            self.transport.send(OutgoingRequest {
                method,
                url,
                headers: &attempt_headers,
                connect_timeout,
                read_timeout,
                body,
            })
        }));
        match sent {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(error)) => {
                let kind = error.kind();
                Err(Error::transport_with_source(
                    kind,
                    url.as_str(),
                    error.into_source(),
                ))
            }
            Err(_) => Err(Error::transport(
                TransportErrorKind::Other,
                url.as_str(),
                "transport panicked",
            )),
        }
    }

    fn read_success<T, P>(
        &self,
        response: ConnectionResult,
        parser: &P,
        url: &str,
    ) -> ReqflowResult<T>
    where
        P: ResponseParser<T> + ?Sized,
    {
        let status = response.status();
        let content_type = response.content_type().map(ToOwned::to_owned);
        let encoding = response.content_encoding().map(ToOwned::to_owned);
        let max_bytes = self.config.max_body_bytes;
        let read = catch_unwind(AssertUnwindSafe(|| {
            read_decoded_body(response, encoding.as_deref(), max_bytes)
        }));
        let bytes = match read {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(LimitedReadError::Io(error))) => {
                return Err(body_read_error(encoding.as_deref(), error, url));
            }
            Ok(Err(LimitedReadError::TooLarge { actual_bytes })) => {
                return Err(Error::transport(
                    TransportErrorKind::BodyTooLarge,
                    url,
                    format!("response body exceeds {max_bytes} bytes (read {actual_bytes})"),
                ));
            }
            Err(_) => {
                return Err(Error::transport(
                    TransportErrorKind::Other,
                    url,
                    "response body read panicked",
                ));
            }
        };

        let body = ResponseBody::new(status, content_type, bytes, self.config.default_charset);
        match catch_unwind(AssertUnwindSafe(|| parser.parse(&body))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(error.into_error(url)),
            Err(_) => Err(Error::transport(
                TransportErrorKind::Other,
                url,
                "response parser panicked",
            )),
        }
    }

    fn server_failure(&self, response: ConnectionResult, url: &str) -> Error {
        let status = response.status();
        let charset = resolve_charset(response.content_type(), self.config.default_charset);
        let encoding = response.content_encoding().map(ToOwned::to_owned);
        let max_chars = self.config.max_error_body_chars;
        let max_bytes = self.config.max_error_body_bytes();
        let prefix = catch_unwind(AssertUnwindSafe(|| {
            read_error_body(response, encoding.as_deref(), max_bytes)
        }));
        let message = match prefix {
            Ok(Ok((bytes, false))) if !bytes.is_empty() => {
                truncate_body(&charset.decode(&bytes), max_chars)
            }
            Ok(Ok((bytes, true))) => {
                let kept: String = charset.decode(&bytes).chars().take(max_chars).collect();
                format!("{kept}{TRUNCATION_MARKER}")
            }
            _ => UNKNOWN_SERVER_ERROR.to_owned(),
        };
        Error::Server {
            status,
            url: url.to_owned(),
            message,
        }
    }

    fn log_timing(&self, elapsed: Duration, status: Option<u16>, outcome: HopOutcome, url: &str) {
        let line = timing_line(elapsed, status, outcome, url);
        match outcome {
            HopOutcome::Success | HopOutcome::Redirect => self.logger.debug(format_args!("{line}")),
            HopOutcome::Failure(_) => self.logger.error(format_args!("{line}")),
        }
    }
}

fn timing_line(elapsed: Duration, status: Option<u16>, outcome: HopOutcome, url: &str) -> String {
    let status = status.map_or_else(|| "-".to_owned(), |status| status.to_string());
    format!(
        "request took {} ms ({status}) outcome={} url={url}",
        elapsed.as_millis(),
        outcome.label()
    )
}

fn parse_target_url(url_text: &str) -> ReqflowResult<Url> {
    let url = Url::parse(url_text).map_err(|source| {
        Error::transport_with_source(TransportErrorKind::InvalidUrl, url_text, source)
    })?;
    if !is_http_scheme(&url) {
        return Err(Error::transport(
            TransportErrorKind::UnsupportedScheme,
            url_text,
            format!("unsupported protocol [{}]", url.scheme()),
        ));
    }
    Ok(url)
}

fn render_body(spec: &RequestSpec, url: &Url) -> ReqflowResult<Bytes> {
    match catch_unwind(AssertUnwindSafe(|| spec.render_body())) {
        Ok(Ok(body)) => Ok(body),
        Ok(Err(source)) => Err(Error::transport_with_source(
            TransportErrorKind::BodyWrite,
            url.as_str(),
            source,
        )),
        Err(_) => Err(Error::transport(
            TransportErrorKind::BodyWrite,
            url.as_str(),
            "request body writer panicked",
        )),
    }
}

fn read_decoded_body(
    response: ConnectionResult,
    encoding: Option<&str>,
    max_bytes: usize,
) -> Result<Bytes, LimitedReadError> {
    let mut reader =
        decode_content_encoding(encoding, response.into_body()).map_err(LimitedReadError::Io)?;
    read_to_end_limited(&mut reader, max_bytes).map(Bytes::from)
}

fn read_error_body(
    response: ConnectionResult,
    encoding: Option<&str>,
    max_bytes: usize,
) -> io::Result<(Vec<u8>, bool)> {
    let reader = decode_content_encoding(encoding, response.into_body())?;
    read_prefix(reader, max_bytes)
}

fn body_read_error(encoding: Option<&str>, error: io::Error, url: &str) -> Error {
    let compressed = ContentEncoding::from_header(encoding) != ContentEncoding::Identity;
    let corrupt = matches!(
        error.kind(),
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof
    );
    let kind = if compressed && corrupt {
        TransportErrorKind::Decode
    } else {
        classify_io_error(&error)
    };
    Error::transport_with_source(kind, url, error)
}

pub struct HttpRequest<T> {
    spec: RequestSpec,
    parser: Arc<dyn ResponseParser<T>>,
}

impl<T> Clone for HttpRequest<T> {
    fn clone(&self) -> Self {
        Self {
            spec: self.spec.clone(),
            parser: Arc::clone(&self.parser),
        }
    }
}

impl<T> std::fmt::Debug for HttpRequest<T> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRequest")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

impl<T> HttpRequest<T> {
    pub fn new<P>(spec: RequestSpec, parser: P) -> Self
    where
        P: ResponseParser<T> + 'static,
    {
        Self {
            spec,
            parser: Arc::new(parser),
        }
    }

    pub fn spec(&self) -> &RequestSpec {
        &self.spec
    }

    pub fn id(&self) -> String {
        self.spec.id()
    }

    pub fn execute(&self, executor: &HttpExecutor) -> ReqflowResult<T> {
        executor.execute(&self.spec, self.parser.as_ref())
    }
}
