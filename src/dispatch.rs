//! Runs blocking executions on a worker and hands the outcome to a
//! completion context.
//!
//! The bridge adds no retry or parsing behaviour of its own: every request
//! goes through [`HttpExecutor`] exactly as a blocking call would, and the
//! listener sees exactly one `on_success` or `on_failure`.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::marker::PhantomData;
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::ReqflowResult;
use crate::error::{Error, TransportErrorKind};
use crate::executor::{HttpExecutor, HttpRequest};
use crate::util::lock_unpoisoned;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait TaskExecutor: Send + Sync {
    fn spawn(&self, task: Task);
}

pub trait CompletionContext: Send + Sync {
    fn deliver(&self, callback: Task);
}

/// Receives the outcome of one asynchronous execution.
///
/// Both methods consume the listener, so at most one of them can ever run.
pub trait ResponseListener<T>: Send + 'static {
    fn on_success(self, value: T, request_id: &str);
    fn on_failure(self, error: Error, request_id: &str);
}

impl<T, F> ResponseListener<T> for F
where
    F: FnOnce(ReqflowResult<T>, &str) + Send + 'static,
{
    fn on_success(self, value: T, request_id: &str) {
        self(Ok(value), request_id)
    }

    fn on_failure(self, error: Error, request_id: &str) {
        self(Err(error), request_id)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ThreadPerTask {
    name: Option<String>,
}

impl ThreadPerTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

impl TaskExecutor for ThreadPerTask {
    fn spawn(&self, task: Task) {
        let slot = Arc::new(Mutex::new(Some(task)));
        let worker_slot = Arc::clone(&slot);
        let mut builder = std::thread::Builder::new();
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }
        let spawned = builder.spawn(move || {
            let task = lock_unpoisoned(&worker_slot).take();
            if let Some(task) = task {
                task();
            }
        });
        if spawned.is_err() {
            // No thread available: run on the caller instead of losing the task.
            let task = lock_unpoisoned(&slot).take();
            if let Some(task) = task {
                task();
            }
        }
    }
}

#[cfg(feature = "tokio")]
impl TaskExecutor for tokio::runtime::Handle {
    fn spawn(&self, task: Task) {
        drop(self.spawn_blocking(task));
    }
}

/// Delivers on whichever thread finished the execution.
#[derive(Clone, Copy, Debug, Default)]
pub struct Immediate;

impl CompletionContext for Immediate {
    fn deliver(&self, callback: Task) {
        callback();
    }
}

/// Event queue owned by one thread, which drains it with
/// [`run_pending`](Self::run_pending) or [`run_next`](Self::run_next).
pub struct CompletionQueue {
    sender: mpsc::Sender<Task>,
    receiver: mpsc::Receiver<Task>,
}

impl std::fmt::Debug for CompletionQueue {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("CompletionQueue").finish_non_exhaustive()
    }
}

impl Default for CompletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver }
    }

    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            sender: self.sender.clone(),
        }
    }

    /// Runs every callback already queued and returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(callback) => {
                    callback();
                    ran += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return ran,
            }
        }
    }

    pub fn run_next(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(callback) => {
                callback();
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueueHandle {
    sender: mpsc::Sender<Task>,
}

impl CompletionContext for QueueHandle {
    fn deliver(&self, callback: Task) {
        // Queue owner gone; deliver here so the listener still hears back.
        if let Err(mpsc::SendError(callback)) = self.sender.send(callback) {
            callback();
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    executor: Arc<HttpExecutor>,
    task_executor: Arc<dyn TaskExecutor>,
    completion: Arc<dyn CompletionContext>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Dispatcher")
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Delivers on the worker thread until a completion context is set.
    pub fn new(executor: HttpExecutor, task_executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            executor: Arc::new(executor),
            task_executor,
            completion: Arc::new(Immediate),
        }
    }

    pub fn completion(mut self, completion: Arc<dyn CompletionContext>) -> Self {
        self.completion = completion;
        self
    }

    pub fn executor(&self) -> &HttpExecutor {
        &self.executor
    }

    pub fn execute_async<T, L>(&self, request: HttpRequest<T>, listener: L)
    where
        T: Send + 'static,
        L: ResponseListener<T>,
    {
        let executor = Arc::clone(&self.executor);
        let guard = DeliveryGuard {
            pending: Some((listener, Arc::clone(&self.completion))),
            request_id: request.id(),
            url: request.spec().url().to_owned(),
            _value: PhantomData,
        };
        self.task_executor.spawn(Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(|| request.execute(&executor)))
                .unwrap_or_else(|_| {
                    Err(Error::transport(
                        TransportErrorKind::Interrupted,
                        request.spec().url(),
                        "request execution was interrupted",
                    ))
                });
            guard.deliver(result);
        }));
    }
}

/// Owns the listener until the outcome is handed over. A task dropped
/// before it ran still reports `Interrupted`.
struct DeliveryGuard<T, L>
where
    T: Send + 'static,
    L: ResponseListener<T>,
{
    pending: Option<(L, Arc<dyn CompletionContext>)>,
    request_id: String,
    url: String,
    _value: PhantomData<fn() -> T>,
}

impl<T, L> DeliveryGuard<T, L>
where
    T: Send + 'static,
    L: ResponseListener<T>,
{
    fn deliver(mut self, result: ReqflowResult<T>) {
        self.send(result);
    }

    fn send(&mut self, result: ReqflowResult<T>) {
        let Some((listener, completion)) = self.pending.take() else {
            return;
        };
        let request_id = std::mem::take(&mut self.request_id);
        completion.deliver(Box::new(move || match result {
            Ok(value) => listener.on_success(value, &request_id),
            Err(error) => listener.on_failure(error, &request_id),
        }));
    }
}

impl<T, L> Drop for DeliveryGuard<T, L>
where
    T: Send + 'static,
    L: ResponseListener<T>,
{
    fn drop(&mut self) {
        if self.pending.is_none() {
            return;
        }
        let error = Error::transport(
            TransportErrorKind::Interrupted,
            self.url.as_str(),
            "execution context was torn down before the request completed",
        );
        self.send(Err(error));
    }
}
