use std::fmt;

use tracing::Level;

pub(crate) const LOG_TARGET: &str = "reqflow";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BuildKind {
    #[default]
    Development,
    Production,
}

impl BuildKind {
    /// Convenience for hosts that tie the build kind to `debug_assertions`.
    pub const fn current() -> Self {
        if cfg!(debug_assertions) {
            Self::Development
        } else {
            Self::Production
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogPolicy {
    /// Everything in development builds, nothing in production builds.
    #[default]
    Adaptive,
    /// Warnings and errors always, everything in development builds.
    Medium,
    /// Everything regardless of build kind.
    Aggressive,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Logger {
    policy: LogPolicy,
    build_kind: BuildKind,
}

impl Logger {
    pub const fn new(policy: LogPolicy, build_kind: BuildKind) -> Self {
        Self { policy, build_kind }
    }

    pub const fn policy(&self) -> LogPolicy {
        self.policy
    }

    pub const fn build_kind(&self) -> BuildKind {
        self.build_kind
    }

    pub fn enabled(&self, level: Level) -> bool {
        let development = self.build_kind == BuildKind::Development;
        match self.policy {
            LogPolicy::Aggressive => true,
            LogPolicy::Adaptive => development,
            LogPolicy::Medium => development || level <= Level::WARN,
        }
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        if self.enabled(Level::DEBUG) {
            tracing::debug!(target: LOG_TARGET, "{}", args);
        }
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        if self.enabled(Level::INFO) {
            tracing::info!(target: LOG_TARGET, "{}", args);
        }
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        if self.enabled(Level::WARN) {
            tracing::warn!(target: LOG_TARGET, "{}", args);
        }
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        if self.enabled(Level::ERROR) {
            tracing::error!(target: LOG_TARGET, "{}", args);
        }
    }
}
