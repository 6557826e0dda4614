use std::time::Duration;

use crate::content_encoding::Charset;
use crate::logging::{BuildKind, LogPolicy, Logger};

const DEFAULT_MAX_ERROR_BODY_CHARS: usize = 2048;
const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Per-request timeout value; `PlatformDefault` leaves the transport setting alone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Timeout {
    #[default]
    PlatformDefault,
    After(Duration),
}

impl Timeout {
    pub const fn duration(self) -> Option<Duration> {
        match self {
            Self::PlatformDefault => None,
            Self::After(duration) => Some(duration),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self::After(duration)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SuccessPolicy {
    /// 200 OK through 202 Accepted.
    #[default]
    Accepted,
    OkOnly,
    AnySuccess,
}

impl SuccessPolicy {
    pub const fn is_success(self, status: u16) -> bool {
        match self {
            Self::Accepted => status >= 200 && status <= 202,
            Self::OkOnly => status == 200,
            Self::AnySuccess => status >= 200 && status <= 299,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    pub success_policy: SuccessPolicy,
    pub log_policy: LogPolicy,
    pub build_kind: BuildKind,
    pub max_error_body_chars: usize,
    pub max_body_bytes: usize,
    pub default_charset: Charset,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            success_policy: SuccessPolicy::default(),
            log_policy: LogPolicy::default(),
            build_kind: BuildKind::default(),
            max_error_body_chars: DEFAULT_MAX_ERROR_BODY_CHARS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            default_charset: Charset::Utf8,
        }
    }
}

impl ExecutorConfig {
    pub fn with_success_policy(mut self, success_policy: SuccessPolicy) -> Self {
        self.success_policy = success_policy;
        self
    }

    pub fn with_log_policy(mut self, log_policy: LogPolicy) -> Self {
        self.log_policy = log_policy;
        self
    }

    pub fn with_build_kind(mut self, build_kind: BuildKind) -> Self {
        self.build_kind = build_kind;
        self
    }

    pub fn with_max_error_body_chars(mut self, max_error_body_chars: usize) -> Self {
        self.max_error_body_chars = max_error_body_chars.max(1);
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes.max(1);
        self
    }

    pub(crate) fn max_error_body_bytes(&self) -> usize {
        self.max_error_body_chars.saturating_mul(4)
    }

    pub fn with_default_charset(mut self, default_charset: Charset) -> Self {
        self.default_charset = default_charset;
        self
    }

    pub(crate) fn logger(&self) -> Logger {
        Logger::new(self.log_policy, self.build_kind)
    }
}

#[cfg(test)]
mod tests {
    use super::{SuccessPolicy, Timeout};
    use std::time::Duration;

    #[test]
    fn accepted_policy_spans_ok_through_accepted() {
        let policy = SuccessPolicy::default();
        assert!(policy.is_success(200));
        assert!(policy.is_success(202));
        assert!(!policy.is_success(204));
        assert!(!policy.is_success(199));
    }

    #[test]
    fn ok_only_policy_rejects_created() {
        assert!(SuccessPolicy::OkOnly.is_success(200));
        assert!(!SuccessPolicy::OkOnly.is_success(201));
        assert!(SuccessPolicy::AnySuccess.is_success(204));
    }

    #[test]
    fn platform_default_timeout_has_no_duration() {
        assert_eq!(Timeout::PlatformDefault.duration(), None);
        assert_eq!(
            Timeout::from(Duration::from_secs(3)).duration(),
            Some(Duration::from_secs(3))
        );
    }
}
