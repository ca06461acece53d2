//! Lazy deduplicated loading on top of a cache entry.
//!
//! A [`LazyValue`] couples an entry handle, a fixed argument tuple, and a
//! loader. Any operation that needs data either reuses the cached value,
//! joins the in-flight shared load, or starts a new one; the loader is
//! invoked at most once per outstanding load no matter how many callers
//! race. Values produced by a load are published to the store as they
//! arrive, so passive observers of the entry see them too. Loader errors are
//! confined to the subscriptions joined to the failing load; they never
//! reach observers that only follow the store.

use crate::handle::EntryHandle;
use crate::streams::Distinct;
use futures::future::{self, Either};
use futures::ready;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use recache_core::{Error, Result, Value};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{broadcast, Notify};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// Values buffered per load subscriber before a slow one starts skipping.
const LOAD_CHANNEL_CAPACITY: usize = 256;

/// A loader produces a stream of values for one argument tuple. It must be
/// safe to invoke concurrently for different entries; the dedup engine
/// guarantees at most one invocation per outstanding load per entry.
pub type Loader<T, A> = Arc<dyn Fn(&A) -> BoxStream<'static, Result<T>> + Send + Sync>;

type LoadResult<T> = std::result::Result<T, Arc<Error>>;

/// Cache of a single request with specific arguments.
pub struct LazyValue<T, A> {
    handle: EntryHandle<T>,
    args: A,
    loader: Loader<T, A>,
    in_flight: Arc<Mutex<Option<Arc<SharedLoad<T>>>>>,
}

impl<T, A: Clone> Clone for LazyValue<T, A> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            args: self.args.clone(),
            loader: Arc::clone(&self.loader),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<T, A> LazyValue<T, A>
where
    T: Value + PartialEq,
    A: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(handle: EntryHandle<T>, args: A, loader: Loader<T, A>) -> Self {
        Self {
            handle,
            args,
            loader,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// The arguments this entry is bound to.
    #[must_use]
    pub fn args(&self) -> &A {
        &self.args
    }

    /// The underlying cache key.
    #[must_use]
    pub fn key(&self) -> &str {
        self.handle.key()
    }

    /// First value of [`LazyValue::observe`]: the cached value when present,
    /// otherwise the first value of a started-or-joined load.
    pub async fn get(&self) -> Result<T> {
        let mut observed = Box::pin(self.observe());
        match observed.next().await {
            Some(result) => result,
            None => Err(Error::empty_load(self.handle.key())),
        }
    }

    /// Observe this entry, loading if necessary.
    ///
    /// The stream starts with the current value (loading one when the entry
    /// is empty), then follows every later publication to the entry —
    /// manual sets, updates, and reloads alike. Adjacent duplicate values
    /// are suppressed. An error from a load this subscription joined ends
    /// the stream; errors from loads triggered elsewhere do not surface
    /// here.
    pub fn observe(&self) -> impl Stream<Item = Result<T>> + Send + 'static {
        let this = self.clone();
        let first = stream::once(async move { this.ensure_first_value().await });
        let live = match self.handle.observe() {
            Ok(values) => Either::Left(values.map(Ok)),
            Err(error) => Either::Right(stream::once(future::ready(Err(error)))),
        };
        Distinct::new(stream::select(first, live))
    }

    /// Ensure a value exists, loading one when the entry is empty.
    pub async fn update_if_empty(&self) -> Result<()> {
        self.get().await.map(|_| ())
    }

    /// Unconditionally start (or join) a load and observe only its output.
    /// Previously cached values are not replayed.
    pub fn force_update_and_observe(&self) -> impl Stream<Item = Result<T>> + Send + 'static {
        self.join_or_start()
    }

    /// First value produced by [`LazyValue::force_update_and_observe`].
    pub async fn force_update_and_get(&self) -> Result<T> {
        let mut loaded = Box::pin(self.force_update_and_observe());
        match loaded.next().await {
            Some(result) => result,
            None => Err(Error::empty_load(self.handle.key())),
        }
    }

    /// Run a load to completion, discarding its values.
    pub async fn force_update(&self) -> Result<()> {
        let mut loaded = Box::pin(self.force_update_and_observe());
        while let Some(item) = loaded.next().await {
            item?;
        }
        Ok(())
    }

    /// Reload only if a value was loaded before; a no-op on an empty entry.
    pub async fn update_if_needed(&self) -> Result<()> {
        if self.has_value() {
            self.force_update().await
        } else {
            Ok(())
        }
    }

    /// Overwrite the current value. A load already in flight may overwrite
    /// it again when it completes.
    pub fn set(&self, value: T) -> Result<()> {
        self.handle.set(value)
    }

    /// See [`EntryHandle::update`].
    pub fn update(&self, f: impl FnOnce(Option<T>) -> Option<T>) -> Result<()> {
        self.handle.update(f)
    }

    /// See [`EntryHandle::update_if_present`].
    pub fn update_if_present(&self, f: impl FnOnce(T) -> T) -> Result<()> {
        self.handle.update_if_present(f)
    }

    /// Reset the entry to absent. Does not cancel an in-flight load.
    pub fn clear(&self) {
        self.handle.clear();
    }

    /// Current value without subscribing or loading.
    pub fn peek(&self) -> Result<Option<T>> {
        self.handle.peek()
    }

    #[must_use]
    pub fn has_value(&self) -> bool {
        self.handle.has_value()
    }

    async fn ensure_first_value(self) -> Result<T> {
        if let Some(value) = self.handle.peek()? {
            return Ok(value);
        }
        let mut subscription = Box::pin(self.join_or_start());
        match subscription.next().await {
            Some(result) => result,
            None => Err(Error::empty_load(self.handle.key())),
        }
    }

    /// Join the in-flight shared load, or install and spawn a new one. The
    /// check-and-install is a single critical section, so racing callers
    /// agree on one load and the loader runs once.
    fn join_or_start(&self) -> LoadSubscription<T> {
        let mut cell = self.in_flight.lock();
        if let Some(load) = cell.as_ref() {
            if let Some(subscription) = load.try_subscribe(self.handle.key()) {
                debug!(key = %self.handle.key(), "joining in-flight load");
                return subscription;
            }
            // The previous load is winding down with no subscribers left;
            // replace it. Its teardown only clears the cell it installed.
        }
        let (load, subscription, tx) = SharedLoad::start(self.handle.key());
        *cell = Some(Arc::clone(&load));
        drop(cell);

        debug!(key = %self.handle.key(), "starting load");
        let source = (self.loader)(&self.args);
        tokio::spawn(drive(
            load,
            tx,
            source,
            self.handle.clone(),
            Arc::clone(&self.in_flight),
        ));
        subscription
    }
}

/// One shared load: a fan-out channel of loader output plus subscriber
/// accounting for last-subscriber cancellation.
struct SharedLoad<T> {
    /// Taken (and dropped) on teardown; a `None` here means the load is
    /// finished and can no longer be joined.
    tx: Mutex<Option<broadcast::Sender<LoadResult<T>>>>,
    subscribers: AtomicUsize,
    cancel: Notify,
}

impl<T: Value> SharedLoad<T> {
    /// Create a load with its first subscription already attached, so the
    /// first loader value cannot be missed.
    fn start(key: &str) -> (
        Arc<Self>,
        LoadSubscription<T>,
        broadcast::Sender<LoadResult<T>>,
    ) {
        let (tx, rx) = broadcast::channel(LOAD_CHANNEL_CAPACITY);
        let load = Arc::new(Self {
            tx: Mutex::new(Some(tx.clone())),
            subscribers: AtomicUsize::new(1),
            cancel: Notify::new(),
        });
        let subscription = LoadSubscription {
            inner: BroadcastStream::new(rx),
            guard: SubscriberGuard {
                load: Arc::clone(&load),
            },
            key: key.to_string(),
            done: false,
        };
        (load, subscription, tx)
    }

    /// Subscribe to a live load. Refuses loads that already finished or
    /// whose last subscriber detached (those are being torn down).
    fn try_subscribe(self: &Arc<Self>, key: &str) -> Option<LoadSubscription<T>> {
        let tx = self.tx.lock();
        let tx = tx.as_ref()?;
        let mut count = self.subscribers.load(Ordering::Acquire);
        loop {
            if count == 0 {
                return None;
            }
            match self.subscribers.compare_exchange(
                count,
                count + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => count = current,
            }
        }
        Some(LoadSubscription {
            inner: BroadcastStream::new(tx.subscribe()),
            guard: SubscriberGuard {
                load: Arc::clone(self),
            },
            key: key.to_string(),
            done: false,
        })
    }
}

/// Decrements the subscriber count on drop; the last one to detach cancels
/// the load.
struct SubscriberGuard<T> {
    load: Arc<SharedLoad<T>>,
}

impl<T> Drop for SubscriberGuard<T> {
    fn drop(&mut self) {
        if self.load.subscribers.fetch_sub(1, Ordering::AcqRel) == 1 {
            // notify_one stores a permit, so the drive task sees the
            // cancellation even if it is not parked on `notified` right now.
            self.load.cancel.notify_one();
        }
    }
}

pin_project! {
    /// Subscription to one shared load. Yields every value the load
    /// produces after the subscription was taken, then ends when the load
    /// terminates. A load error is relayed once and ends the stream.
    struct LoadSubscription<T> {
        #[pin]
        inner: BroadcastStream<LoadResult<T>>,
        guard: SubscriberGuard<T>,
        key: String,
        done: bool,
    }
}

impl<T: Value> Stream for LoadSubscription<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }
        loop {
            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(Ok(value))) => return Poll::Ready(Some(Ok(value))),
                Some(Ok(Err(shared))) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(Error::load_failed(this.key.clone(), shared))));
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(key = %this.key, skipped, "load subscriber lagged; skipping values");
                }
                None => {
                    *this.done = true;
                    return Poll::Ready(None);
                }
            }
        }
    }
}

/// Drives one loader stream: publishes every value to the store, fans it out
/// to load subscribers, and tears the load down on completion, error,
/// cancellation, or when every subscriber is gone. Teardown clears the
/// in-flight cell (only if it still holds this load) and drops the channel
/// senders, ending all subscriptions.
async fn drive<T: Value>(
    load: Arc<SharedLoad<T>>,
    tx: broadcast::Sender<LoadResult<T>>,
    mut source: BoxStream<'static, Result<T>>,
    handle: EntryHandle<T>,
    in_flight: Arc<Mutex<Option<Arc<SharedLoad<T>>>>>,
) {
    loop {
        tokio::select! {
            _ = load.cancel.notified() => {
                debug!(key = %handle.key(), "load cancelled, all subscribers detached");
                break;
            }
            item = source.next() => match item {
                Some(Ok(value)) => {
                    // Publish to the store first so a caller woken by the
                    // fan-out already finds the value cached.
                    if let Err(error) = handle.set(value.clone()) {
                        let _ = tx.send(Err(Arc::new(error)));
                        break;
                    }
                    if tx.send(Ok(value)).is_err() {
                        break;
                    }
                }
                Some(Err(error)) => {
                    // Failed loads never publish to the store; only load
                    // subscribers see the error.
                    debug!(key = %handle.key(), %error, "load failed");
                    let _ = tx.send(Err(Arc::new(error)));
                    break;
                }
                None => {
                    debug!(key = %handle.key(), "load complete");
                    break;
                }
            }
        }
    }
    {
        let mut cell = in_flight.lock();
        if cell
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &load))
        {
            *cell = None;
        }
    }
    // Dropping the last senders closes every subscription stream.
    load.tx.lock().take();
}
