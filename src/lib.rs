//! `reqflow` is a blocking HTTP request execution engine.
//!
//! One [`HttpExecutor`] runs a [`RequestSpec`] through its whole redirect and
//! retry chain, decodes the body (`gzip`, `deflate`, declared charset) and
//! hands it to a [`ResponseParser`]. Every call ends in a value or in one of
//! three [`Error`] categories: transport, server status, or parse.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use reqflow::prelude::{Backoff, HttpExecutor, JsonParser, RequestSpec, RetryPolicy};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Profile {
//!     id: String,
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = HttpExecutor::builder().build();
//!
//!     let spec = RequestSpec::get("https://api.example.com/v1/profile")
//!         .query_pair("expand", "teams")
//!         .header("Accept", "application/json")
//!         .connect_timeout(Duration::from_secs(3))
//!         .read_timeout(Duration::from_secs(10))
//!         .retry_policy(RetryPolicy::server_errors(3, Backoff::InverseLinear { factor: 1.0 }));
//!
//!     let profile: Profile = executor.execute(&spec, &JsonParser::new())?;
//!     println!("profile id={}", profile.id);
//!     Ok(())
//! }
//! ```
//!
//! # Asynchronous use
//!
//! [`Dispatcher`] runs the same blocking call on a [`TaskExecutor`] and
//! delivers the outcome on a [`CompletionContext`], exactly once.

#[cfg(all(not(feature = "tls-rustls"), not(feature = "tls-native")))]
compile_error!("reqflow requires one TLS backend feature: enable `tls-rustls` or `tls-native`");

mod config;
mod content_encoding;
mod dispatch;
mod error;
mod executor;
mod logging;
mod parse;
mod request;
mod retry;
mod transport;
mod util;

pub use crate::config::{ExecutorConfig, SuccessPolicy, Timeout};
pub use crate::content_encoding::{
    Charset, ContentEncoding, decode_content_encoding, resolve_charset,
};
pub use crate::dispatch::{
    CompletionContext, CompletionQueue, Dispatcher, Immediate, QueueHandle, ResponseListener,
    Task, TaskExecutor, ThreadPerTask,
};
pub use crate::error::{Error, ErrorCode, ParseError, TransportErrorKind};
pub use crate::executor::{HttpExecutor, HttpExecutorBuilder, HttpRequest};
pub use crate::logging::{BuildKind, LogPolicy, Logger};
pub use crate::parse::{BytesParser, JsonParser, ResponseBody, ResponseParser, TextParser};
pub use crate::request::{BodyWriter, DEFAULT_MAX_REDIRECTS, RequestSpec};
pub use crate::retry::{
    Backoff, BackoffStrategy, CancelToken, DEFAULT_MAX_RETRIES, FailureClass, RetryBudget,
    RetryClassifier, RetryPolicy, RetryWait, ServerErrorClassifier, ThreadSleep,
    TransportAndServerErrorClassifier, WaitInterrupted,
};
pub use crate::transport::{
    ConnectionResult, OutgoingRequest, TlsVerification, Transport, TransportError, UreqTransport,
    UreqTransportBuilder,
};
pub use crate::util::append_query_pairs;

pub type ReqflowResult<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Backoff, BytesParser, CancelToken, Dispatcher, Error, ErrorCode, ExecutorConfig,
        HttpExecutor, HttpRequest, JsonParser, LogPolicy, ParseError, ReqflowResult,
        RequestSpec, ResponseBody, ResponseListener, ResponseParser, RetryPolicy, SuccessPolicy,
        TextParser, Timeout, TransportErrorKind,
    };
}
