//! Single-settlement completion handles.
//!
//! [`deferred`] returns a pair: the [`Deferred`] half stays with the session
//! and settles the call, the [`ResponseHandle`] half goes to the caller and is
//! awaited. A deferred settles at most once; later attempts are ignored.
//!
//! Dropping the `Deferred` without settling it leaves the handle's
//! [`state`](ResponseHandle::state) at [`DeferredState::Pending`] for good,
//! while awaiting it yields [`SessionError::Abandoned`] instead of hanging.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Result, SessionError};

const PENDING: u8 = 0;
const FULFILLED: u8 = 1;
const REJECTED: u8 = 2;

/// Settlement state of a deferred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredState {
    /// Not settled yet
    Pending,
    /// Resolved with a value
    Fulfilled,
    /// Rejected with an error
    Rejected,
}

impl DeferredState {
    fn load(state: &AtomicU8) -> Self {
        match state.load(Ordering::Acquire) {
            FULFILLED => DeferredState::Fulfilled,
            REJECTED => DeferredState::Rejected,
            _ => DeferredState::Pending,
        }
    }
}

type RejectObserver = Box<dyn FnOnce(&SessionError) + Send>;

struct DeferredInner<T> {
    tx: Option<oneshot::Sender<Result<T>>>,
    observers: Vec<RejectObserver>,
    timer: Option<JoinHandle<()>>,
}

impl<T> Drop for DeferredInner<T> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Settling side of a request
pub struct Deferred<T> {
    inner: Arc<Mutex<DeferredInner<T>>>,
    state: Arc<AtomicU8>,
}

/// Awaitable side of a request
#[derive(Debug)]
pub struct ResponseHandle<T> {
    state: Arc<AtomicU8>,
    rx: oneshot::Receiver<Result<T>>,
}

/// Create an unsettled deferred without a timeout
pub fn deferred<T: Send + 'static>() -> (Deferred<T>, ResponseHandle<T>) {
    let (tx, rx) = oneshot::channel();
    let state = Arc::new(AtomicU8::new(PENDING));
    let inner = Arc::new(Mutex::new(DeferredInner {
        tx: Some(tx),
        observers: Vec::new(),
        timer: None,
    }));

    (
        Deferred {
            inner,
            state: state.clone(),
        },
        ResponseHandle { state, rx },
    )
}

/// Create a deferred that rejects with [`SessionError::Timeout`] carrying
/// `message` unless settled within `timeout`.
///
/// Must be called from within a Tokio runtime.
pub fn deferred_with_timeout<T: Send + 'static>(
    timeout: Duration,
    message: impl Into<String>,
) -> (Deferred<T>, ResponseHandle<T>) {
    let (deferred, handle) = deferred();
    let message = message.into();
    let weak: Weak<Mutex<DeferredInner<T>>> = Arc::downgrade(&deferred.inner);
    let state = deferred.state.clone();

    let timer = tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some(inner) = weak.upgrade() {
            debug!("Deferred timed out after {:?}", timeout);
            settle(&inner, &state, Err(SessionError::Timeout(message)));
        }
    });
    deferred.inner.lock().timer = Some(timer);

    (deferred, handle)
}

fn settle<T>(inner: &Mutex<DeferredInner<T>>, state: &AtomicU8, outcome: Result<T>) -> bool {
    let mut guard = inner.lock();
    let Some(tx) = guard.tx.take() else {
        return false;
    };
    if let Some(timer) = guard.timer.take() {
        timer.abort();
    }
    let observers = std::mem::take(&mut guard.observers);
    drop(guard);

    match &outcome {
        Ok(_) => state.store(FULFILLED, Ordering::Release),
        Err(error) => {
            state.store(REJECTED, Ordering::Release);
            for observer in observers {
                observer(error);
            }
        }
    }

    // The caller may have dropped its handle; the settlement still counts.
    let _ = tx.send(outcome);
    true
}

impl<T> Deferred<T> {
    /// Fulfil with `value`; returns false if already settled
    pub fn resolve(&self, value: T) -> bool {
        settle(&self.inner, &self.state, Ok(value))
    }

    /// Reject with `error`; returns false if already settled
    pub fn reject(&self, error: SessionError) -> bool {
        settle(&self.inner, &self.state, Err(error))
    }

    /// Current settlement state
    pub fn state(&self) -> DeferredState {
        DeferredState::load(&self.state)
    }

    /// Register an observer called with the error if this deferred is rejected.
    ///
    /// Observers never change the settled value. Observers added after
    /// settlement are not called.
    pub fn on_reject<F>(&self, observer: F)
    where
        F: FnOnce(&SessionError) + Send + 'static,
    {
        let mut guard = self.inner.lock();
        if guard.tx.is_some() {
            guard.observers.push(Box::new(observer));
        }
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("state", &self.state())
            .finish()
    }
}

impl<T> ResponseHandle<T> {
    /// Current settlement state
    pub fn state(&self) -> DeferredState {
        DeferredState::load(&self.state)
    }
}

impl<T> Future for ResponseHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(SessionError::Abandoned)))
    }
}
