use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::TransportErrorKind;
use crate::util::lock_unpoisoned;

pub const DEFAULT_MAX_RETRIES: usize = 3;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    Transport(TransportErrorKind),
    Status(u16),
}

pub trait RetryClassifier: Send + Sync {
    fn should_retry(&self, failure: FailureClass) -> bool;
}

impl<F> RetryClassifier for F
where
    F: Fn(FailureClass) -> bool + Send + Sync,
{
    fn should_retry(&self, failure: FailureClass) -> bool {
        self(failure)
    }
}

#[derive(Default)]
pub struct ServerErrorClassifier;

impl RetryClassifier for ServerErrorClassifier {
    fn should_retry(&self, failure: FailureClass) -> bool {
        matches!(failure, FailureClass::Status(status) if is_transient_server_status(status))
    }
}

#[derive(Default)]
pub struct TransportAndServerErrorClassifier;

impl RetryClassifier for TransportAndServerErrorClassifier {
    fn should_retry(&self, failure: FailureClass) -> bool {
        match failure {
            FailureClass::Status(status) => is_transient_server_status(status),
            FailureClass::Transport(kind) => is_transient_transport_kind(kind),
        }
    }
}

pub trait BackoffStrategy: Send + Sync {
    fn delay(&self, remaining: usize) -> Duration;
}

#[derive(Clone, Default)]
pub enum Backoff {
    #[default]
    None,
    Fixed(Duration),
    /// `(factor / remaining + remaining / 10)` seconds: waits grow as the budget runs out.
    InverseLinear {
        factor: f64,
    },
    Custom(Arc<dyn BackoffStrategy>),
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => formatter.write_str("None"),
            Self::Fixed(delay) => formatter.debug_tuple("Fixed").field(delay).finish(),
            Self::InverseLinear { factor } => formatter
                .debug_struct("InverseLinear")
                .field("factor", factor)
                .finish(),
            Self::Custom(_) => formatter.write_str("Custom(..)"),
        }
    }
}

impl Backoff {
    pub fn delay(&self, remaining: usize) -> Duration {
        let delay = match self {
            Self::None => Duration::ZERO,
            Self::Fixed(delay) => *delay,
            Self::InverseLinear { factor } => {
                let remaining = remaining.max(1) as f64;
                let millis = (factor.max(0.0) / remaining + remaining / 10.0) * 1000.0;
                if millis.is_finite() && millis < MAX_BACKOFF.as_millis() as f64 {
                    Duration::from_millis(millis.round() as u64)
                } else {
                    MAX_BACKOFF
                }
            }
            Self::Custom(strategy) => strategy.delay(remaining),
        };
        delay.min(MAX_BACKOFF)
    }
}

/// Stateless retry policy: a predicate, an attempt budget and a backoff curve.
///
/// The policy itself never changes during execution, so one value can be
/// shared by any number of concurrent calls. Each call tracks its own
/// [`RetryBudget`].
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    backoff: Backoff,
    classifier: Arc<dyn RetryClassifier>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: usize,
        backoff: Backoff,
        classifier: Arc<dyn RetryClassifier>,
    ) -> Self {
        Self {
            max_retries,
            backoff,
            classifier,
        }
    }

    pub fn disabled() -> Self {
        Self::server_errors(0, Backoff::None)
    }

    /// Retries the transient 5xx family: 500, 501, 502, 503, 504 and 505.
    pub fn server_errors(max_retries: usize, backoff: Backoff) -> Self {
        Self::new(max_retries, backoff, Arc::new(ServerErrorClassifier))
    }

    pub fn transport_and_server_errors(max_retries: usize, backoff: Backoff) -> Self {
        Self::new(
            max_retries,
            backoff,
            Arc::new(TransportAndServerErrorClassifier),
        )
    }

    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn RetryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn configured_max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn should_retry(&self, failure: FailureClass) -> bool {
        self.classifier.should_retry(failure)
    }

    pub fn backoff_for(&self, remaining: usize) -> Duration {
        self.backoff.delay(remaining)
    }

    pub fn budget(&self) -> RetryBudget<'_> {
        RetryBudget::new(self)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::server_errors(DEFAULT_MAX_RETRIES, Backoff::InverseLinear { factor: 1.0 })
    }
}

#[derive(Debug)]
pub struct RetryBudget<'a> {
    policy: &'a RetryPolicy,
    remaining: usize,
}

impl<'a> RetryBudget<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            remaining: policy.max_retries,
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Decides whether `failure` earns another attempt.
    ///
    /// On `true` the backoff wait has already elapsed and one retry has been
    /// spent. An interrupted wait empties the budget and returns `false`.
    pub fn authorize(&mut self, failure: FailureClass, wait: &dyn RetryWait) -> bool {
        if self.remaining == 0 || !self.policy.should_retry(failure) {
            return false;
        }
        let delay = self.policy.backoff_for(self.remaining);
        match wait.wait(delay) {
            Ok(()) => {
                self.remaining -= 1;
                true
            }
            Err(WaitInterrupted) => {
                self.remaining = 0;
                false
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitInterrupted;

pub trait RetryWait: Send + Sync {
    fn wait(&self, delay: Duration) -> Result<(), WaitInterrupted>;

    fn is_cancelled(&self) -> bool {
        false
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleep;

impl RetryWait for ThreadSleep {
    fn wait(&self, delay: Duration) -> Result<(), WaitInterrupted> {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(())
    }
}

/// Cancellation handle shared between an execution and whoever may stop it.
///
/// Cancelling wakes any backoff wait in progress and stops further attempts.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    condvar: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let mut cancelled = lock_unpoisoned(&self.inner.cancelled);
        *cancelled = true;
        self.inner.condvar.notify_all();
    }
}

impl RetryWait for CancelToken {
    fn wait(&self, delay: Duration) -> Result<(), WaitInterrupted> {
        // A delay too large for `Instant` waits until cancelled.
        let deadline = Instant::now().checked_add(delay);
        let mut cancelled = lock_unpoisoned(&self.inner.cancelled);
        loop {
            if *cancelled {
                return Err(WaitInterrupted);
            }
            let Some(deadline) = deadline else {
                cancelled = match self.inner.condvar.wait(cancelled) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                continue;
            };
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            cancelled = match self.inner.condvar.wait_timeout(cancelled, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn is_cancelled(&self) -> bool {
        *lock_unpoisoned(&self.inner.cancelled)
    }
}

pub(crate) fn is_transient_server_status(status: u16) -> bool {
    (500..=505).contains(&status)
}

fn is_transient_transport_kind(kind: TransportErrorKind) -> bool {
    matches!(
        kind,
        TransportErrorKind::Dns
            | TransportErrorKind::Connect
            | TransportErrorKind::Timeout
            | TransportErrorKind::Io
    )
}
