use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::Method;

use crate::config::Timeout;
use crate::retry::RetryPolicy;

pub const DEFAULT_MAX_REDIRECTS: usize = 1;

pub trait BodyWriter: Send + Sync {
    fn write_body(&self, channel: &mut dyn Write) -> io::Result<()>;
}

impl<F> BodyWriter for F
where
    F: Fn(&mut dyn Write) -> io::Result<()> + Send + Sync,
{
    fn write_body(&self, channel: &mut dyn Write) -> io::Result<()> {
        self(channel)
    }
}

struct StaticBody(Bytes);

impl BodyWriter for StaticBody {
    fn write_body(&self, channel: &mut dyn Write) -> io::Result<()> {
        channel.write_all(&self.0)
    }
}

#[derive(Clone)]
pub struct RequestSpec {
    url: String,
    method: Method,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    content_type: Option<String>,
    connect_timeout: Timeout,
    read_timeout: Timeout,
    body_writer: Option<Arc<dyn BodyWriter>>,
    max_redirects: usize,
    retry_policy: Option<RetryPolicy>,
    request_id: Option<String>,
}

impl std::fmt::Debug for RequestSpec {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestSpec")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("query", &self.query)
            .field("content_type", &self.content_type)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("has_body_writer", &self.body_writer.is_some())
            .field("max_redirects", &self.max_redirects)
            .field("retry_policy", &self.retry_policy)
            .field("request_id", &self.request_id)
            .finish()
    }
}

impl RequestSpec {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: Vec::new(),
            query: Vec::new(),
            content_type: None,
            connect_timeout: Timeout::PlatformDefault,
            read_timeout: Timeout::PlatformDefault,
            body_writer: None,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            retry_policy: None,
            request_id: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    /// Sets a header; an existing header with the same name is overwritten.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => *entry = (name, value),
            None => self.headers.push((name, value)),
        }
        self
    }

    pub fn headers<K, V, I>(self, headers: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        headers
            .into_iter()
            .fold(self, |spec, (name, value)| spec.header(name, value))
    }

    /// Sets a query parameter; names are unique and keep their first position.
    pub fn query_pair(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.query.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.query.push((name, value)),
        }
        self
    }

    pub fn query_pairs<K, V, I>(self, pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        pairs
            .into_iter()
            .fold(self, |spec, (name, value)| spec.query_pair(name, value))
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.connect_timeout = timeout.into();
        self
    }

    pub fn read_timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.read_timeout = timeout.into();
        self
    }

    pub fn body_writer<W>(mut self, writer: W) -> Self
    where
        W: BodyWriter + 'static,
    {
        self.body_writer = Some(Arc::new(writer));
        self
    }

    pub fn body(self, body: impl Into<Bytes>) -> Self {
        self.body_writer(StaticBody(body.into()))
    }

    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }

    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn header_pairs(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn request_content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn connect_timeout_value(&self) -> Timeout {
        self.connect_timeout
    }

    pub fn read_timeout_value(&self) -> Timeout {
        self.read_timeout
    }

    pub fn max_redirects_value(&self) -> usize {
        self.max_redirects
    }

    pub fn retry_policy_value(&self) -> Option<&RetryPolicy> {
        self.retry_policy.as_ref()
    }

    /// Identifier handed to async listeners; defaults to `METHOD url`.
    pub fn id(&self) -> String {
        match &self.request_id {
            Some(request_id) => request_id.clone(),
            None => format!("{} {}", self.method, self.url),
        }
    }

    pub(crate) fn timeouts(&self) -> (Option<Duration>, Option<Duration>) {
        (self.connect_timeout.duration(), self.read_timeout.duration())
    }

    /// Runs the body writer into a fresh buffer.
    ///
    /// The buffer is flushed and dropped here whether or not the writer fails.
    pub(crate) fn render_body(&self) -> io::Result<Bytes> {
        let mut channel = io::BufWriter::new(Vec::new());
        if let Some(writer) = &self.body_writer {
            writer.write_body(&mut channel)?;
        }
        channel.flush()?;
        let buffer = channel.into_inner().map_err(io::IntoInnerError::into_error)?;
        Ok(Bytes::from(buffer))
    }
}

pub(crate) fn method_requires_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}
