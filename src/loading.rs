//! Progressive loading sessions.
//!
//! A session delivers a small initial batch as soon as it is available and
//! then the remaining matches in larger batches, on a background task. The
//! caller consumes the batches from a [`BatchStream`] while the session record
//! ([`LoadingSession`]) reports progress and the final outcome. Sessions can
//! be cancelled by id at any time; cancellation is cooperative and observed
//! between batches.
//!
//! Batches travel through a bounded channel, so a slow consumer holds back the
//! producer instead of letting batches pile up in memory. Store calls run on
//! the blocking pool.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Notify, mpsc, watch};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

use crate::error::{FilingsError, Result};
use crate::filter::Predicate;
use crate::query::QueryService;
use crate::schema::JobFiling;
use crate::store::RecordStore;

pub type Batch = Vec<JobFiling>;

/// Cancellation token shared between a session's owner and its worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<CancelState>);

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn cancel(&self) {
        if !self.0.cancelled.swap(true, Ordering::SeqCst) {
            self.0.notify.notify_waiters();
        }
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }
    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.0.notify.notified();
            tokio::pin!(notified);
            // register before checking the flag so a concurrent cancel is not missed
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Opaque session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);
impl SessionId {
    pub fn value(&self) -> u64 {
        self.0
    }
}
impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        SessionId(id)
    }
}
impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadingStatus {
    Running,
    Completed,
    Cancelled,
    Failed(String),
}

/// Progress and outcome of one loading session.
///
/// At most one of `is_completed`, `is_cancelled` and `error_message` is ever
/// set, and `end_time` is set exactly when one of them is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingSession {
    pub id: SessionId,
    pub total_records: usize,
    pub loaded_records: usize,
    pub is_completed: bool,
    pub is_cancelled: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl LoadingSession {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            total_records: 0,
            loaded_records: 0,
            is_completed: false,
            is_cancelled: false,
            start_time: Utc::now(),
            end_time: None,
            error_message: None,
        }
    }
    pub fn status(&self) -> LoadingStatus {
        if let Some(message) = &self.error_message {
            LoadingStatus::Failed(message.clone())
        } else if self.is_cancelled {
            LoadingStatus::Cancelled
        } else if self.is_completed {
            LoadingStatus::Completed
        } else {
            LoadingStatus::Running
        }
    }
    pub fn is_terminal(&self) -> bool {
        self.status() != LoadingStatus::Running
    }
    pub fn progress_percent(&self) -> f64 {
        if self.total_records == 0 {
            return if self.is_completed { 100.0 } else { 0.0 };
        }
        self.loaded_records as f64 * 100.0 / self.total_records as f64
    }
    // the terminal transitions only apply to a running session
    fn complete(&mut self) {
        if !self.is_terminal() {
            self.is_completed = true;
            self.end_time = Some(Utc::now());
        }
    }
    fn cancel(&mut self) {
        if !self.is_terminal() {
            self.is_cancelled = true;
            self.end_time = Some(Utc::now());
        }
    }
    fn fail(&mut self, message: String) {
        if !self.is_terminal() {
            self.error_message = Some(message);
            self.end_time = Some(Utc::now());
        }
    }
}

/// Delivered as the last stream item when a session fails.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("loading session {session} failed: {message}")]
pub struct LoadError {
    pub session: SessionId,
    pub message: String,
}

/// Largest batch a session may be asked to deliver in one piece.
pub const MAX_BATCH_SIZE: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub initial_batch_size: usize,
    pub subsequent_batch_size: usize,
}
impl Default for LoadOptions {
    fn default() -> Self {
        Self { initial_batch_size: 1000, subsequent_batch_size: 5000 }
    }
}
impl LoadOptions {
    fn validate(&self) -> Result<()> {
        if self.initial_batch_size == 0 || self.subsequent_batch_size == 0 {
            return Err(FilingsError::InvalidArgument("batch sizes must be positive".into()));
        }
        if self.initial_batch_size > MAX_BATCH_SIZE || self.subsequent_batch_size > MAX_BATCH_SIZE {
            return Err(FilingsError::InvalidArgument(format!(
                "batch sizes may not exceed {}",
                MAX_BATCH_SIZE
            )));
        }
        Ok(())
    }
}

/// Receiving end of a session. Yields batches in order; a final `Err` item
/// means the session failed. Ends without an error once the session is
/// cancelled. Dropping the stream cancels the session.
pub struct BatchStream {
    id: SessionId,
    inner: ReceiverStream<std::result::Result<Batch, LoadError>>,
    cancel: CancelToken,
}

impl BatchStream {
    pub fn id(&self) -> SessionId {
        self.id
    }
    pub async fn next_batch(&mut self) -> Option<std::result::Result<Batch, LoadError>> {
        if self.cancel.is_cancelled() {
            self.inner.close();
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.inner.close();
                None
            }
            item = self.inner.next() => item,
        }
    }
}

impl Stream for BatchStream {
    type Item = std::result::Result<Batch, LoadError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

struct ActiveLoad {
    cancel: CancelToken,
    done: watch::Sender<bool>,
}

#[derive(Default)]
struct Registry {
    sessions: Mutex<HashMap<SessionId, LoadingSession>>,
    active: Mutex<HashMap<SessionId, ActiveLoad>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Registry {
    fn update(&self, id: SessionId, change: impl FnOnce(&mut LoadingSession)) {
        if let Some(session) = lock(&self.sessions).get_mut(&id) {
            change(session);
        }
    }
    fn finish(&self, id: SessionId) {
        if let Some(load) = lock(&self.active).remove(&id) {
            load.done.send_replace(true);
        }
    }
}

enum Outcome {
    Completed,
    Cancelled,
}

/// Starts, tracks and cancels progressive loading sessions.
pub struct ProgressiveLoader<S> {
    queries: QueryService<S>,
    capacity: usize,
    next_id: AtomicU64,
    registry: Arc<Registry>,
}

impl<S: RecordStore> ProgressiveLoader<S> {
    /// `capacity` bounds the number of undelivered batches per session.
    pub fn new(queries: QueryService<S>, capacity: usize) -> Self {
        Self {
            queries,
            capacity: capacity.max(1),
            next_id: AtomicU64::new(0),
            registry: Arc::new(Registry::default()),
        }
    }

    pub fn queries(&self) -> &QueryService<S> {
        &self.queries
    }

    /// Starts a session on the current tokio runtime and returns its stream.
    pub fn start(&self, predicate: Option<Predicate>, options: LoadOptions) -> Result<(BatchStream, SessionId)> {
        options.validate()?;
        let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let cancel = CancelToken::new();
        let (done, _) = watch::channel(false);
        lock(&self.registry.sessions).insert(id, LoadingSession::new(id));
        lock(&self.registry.active).insert(id, ActiveLoad { cancel: cancel.clone(), done });

        let (sender, receiver) = mpsc::channel(self.capacity);
        let predicate = predicate.unwrap_or_default();
        info!(session = %id, filter = %predicate, initial = options.initial_batch_size, subsequent = options.subsequent_batch_size, "loading session started");
        tokio::spawn(run_session(
            self.queries.clone(),
            Arc::clone(&self.registry),
            id,
            predicate,
            options,
            cancel.clone(),
            sender,
        ));
        let stream = BatchStream { id, inner: ReceiverStream::new(receiver), cancel };
        Ok((stream, id))
    }

    /// Requests cancellation. Returns false when the session is unknown or
    /// already finished.
    pub fn cancel(&self, id: SessionId) -> bool {
        let active = lock(&self.registry.active);
        match active.get(&id) {
            Some(load) => {
                load.cancel.cancel();
                self.registry.update(id, LoadingSession::cancel);
                info!(session = %id, "loading session cancelled");
                true
            }
            None => false,
        }
    }

    /// Snapshot of a session's state.
    pub fn state(&self, id: SessionId) -> Option<LoadingSession> {
        lock(&self.registry.sessions).get(&id).cloned()
    }

    /// Waits until the session's worker has finished and returns its final state.
    pub async fn wait(&self, id: SessionId) -> Option<LoadingSession> {
        let receiver = lock(&self.registry.active).get(&id).map(|load| load.done.subscribe());
        if let Some(mut receiver) = receiver {
            // an error means the worker is gone, which is just as final
            let _ = receiver.wait_for(|done| *done).await;
        }
        self.state(id)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = lock(&self.registry.sessions).keys().copied().collect();
        ids.sort();
        ids
    }

    /// Forgets finished sessions that ended at least `max_age` ago. Running
    /// sessions are never removed.
    pub fn sweep(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut sessions = lock(&self.registry.sessions);
        let before = sessions.len();
        sessions.retain(|_, session| match session.end_time {
            Some(end) if session.is_terminal() => end > cutoff,
            _ => true,
        });
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, remaining = sessions.len(), "swept finished loading sessions");
        }
        removed
    }
}

async fn run_session<S: RecordStore>(
    queries: QueryService<S>,
    registry: Arc<Registry>,
    id: SessionId,
    predicate: Predicate,
    options: LoadOptions,
    cancel: CancelToken,
    sender: mpsc::Sender<std::result::Result<Batch, LoadError>>,
) {
    match load(&queries, &registry, id, predicate, options, &cancel, &sender).await {
        Ok(Outcome::Completed) => {
            registry.update(id, LoadingSession::complete);
            info!(session = %id, "loading session completed");
        }
        Ok(Outcome::Cancelled) => {
            registry.update(id, LoadingSession::cancel);
            debug!(session = %id, "loading session stopped after cancellation");
        }
        Err(e) => {
            error!(session = %id, error = %e, "loading session failed");
            let message = e.to_string();
            registry.update(id, |s| s.fail(message.clone()));
            let item = Err(LoadError { session: id, message });
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = sender.send(item) => {}
            }
        }
    }
    registry.finish(id);
}

async fn load<S: RecordStore>(
    queries: &QueryService<S>,
    registry: &Registry,
    id: SessionId,
    predicate: Predicate,
    options: LoadOptions,
    cancel: &CancelToken,
    sender: &mpsc::Sender<std::result::Result<Batch, LoadError>>,
) -> Result<Outcome> {
    let first = {
        let queries = queries.clone();
        let predicate = predicate.clone();
        let size = options.initial_batch_size;
        blocking(cancel, move || queries.get_page(1, size, Some(&predicate))).await?
    };
    let Some(first) = first else {
        return Ok(Outcome::Cancelled);
    };
    let delivered = first.items.len();
    let total = first.total_count;
    registry.update(id, |s| {
        s.total_records = total;
        s.loaded_records = delivered;
    });
    debug!(session = %id, total, delivered, "initial batch ready");
    if !push(sender, cancel, first.items).await {
        return Ok(Outcome::Cancelled);
    }
    if delivered >= total {
        return Ok(Outcome::Completed);
    }

    let batches = {
        let queries = queries.clone();
        let token = cancel.clone();
        let size = options.subsequent_batch_size;
        blocking(cancel, move || queries.batches(size, Some(predicate), Some(token))).await?
    };
    let Some(batches) = batches else {
        return Ok(Outcome::Cancelled);
    };
    let mut batches = batches.starting_at(delivered);
    loop {
        let (next, rest) = tokio::task::spawn_blocking(move || {
            let next = batches.next();
            (next, batches)
        })
        .await?;
        batches = rest;
        let Some(batch) = next else { break };
        let batch = batch?;
        let size = batch.len();
        registry.update(id, |s| s.loaded_records += size);
        debug!(session = %id, size, "batch ready");
        if !push(sender, cancel, batch).await {
            return Ok(Outcome::Cancelled);
        }
    }
    if cancel.is_cancelled() {
        Ok(Outcome::Cancelled)
    } else {
        Ok(Outcome::Completed)
    }
}

/// Runs a store call on the blocking pool unless the session is already cancelled.
async fn blocking<T, F>(cancel: &CancelToken, work: F) -> Result<Option<T>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    if cancel.is_cancelled() {
        return Ok(None);
    }
    tokio::task::spawn_blocking(work).await?.map(Some)
}

/// Hands a batch to the consumer. False when the session was cancelled or
/// the consumer went away.
async fn push(
    sender: &mpsc::Sender<std::result::Result<Batch, LoadError>>,
    cancel: &CancelToken,
    batch: Batch,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = sender.send(Ok(batch)) => sent.is_ok(),
    }
}
