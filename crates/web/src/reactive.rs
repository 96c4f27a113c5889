//! Asynchronous values a route may return.
//!
//! - [`Deferred`]: a future resolving once, driven by the worker executor.
//! - [`Mono`]: a single-value source pushing to a [`MonoObserver`].
//! - [`Flux`]: a multi-value source pushing to a [`Subscriber`] with unbounded demand.
//!
//! Terminal callbacks consume their receiver (`self: Box<Self>`), so a source cannot signal
//! completion twice.

use crate::error::Error;
use crate::executor::spawn_detached;
use futures::channel::oneshot;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use http::StatusCode;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

/// A value that resolves exactly once.
pub struct Deferred<T> {
    future: BoxFuture<'static, Result<T, Error>>,
}

impl<T: Send + 'static> Deferred<T> {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        Self { future: Box::pin(future) }
    }

    pub fn ready(value: T) -> Self {
        Self::new(futures::future::ready(Ok(value)))
    }

    pub fn failed(error: Error) -> Self {
        Self::new(futures::future::ready(Err(error)))
    }

    /// A deferred value completed through the returned [`Promise`], from any thread.
    pub fn pending() -> (Promise<T>, Self) {
        let (tx, rx) = oneshot::channel();
        let deferred = Self::new(async move {
            rx.await
                .unwrap_or_else(|_canceled| Err(Error::status(StatusCode::INTERNAL_SERVER_ERROR, "promise dropped without a value")))
        });
        (Promise { tx }, deferred)
    }

    pub fn map<U, F>(self, f: F) -> Deferred<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        Deferred::new(self.future.map(|result| result.map(f)))
    }
}

impl<T> Future for Deferred<T> {
    type Output = Result<T, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").finish_non_exhaustive()
    }
}

/// The completing half of [`Deferred::pending`].
pub struct Promise<T> {
    tx: oneshot::Sender<Result<T, Error>>,
}

impl<T> Promise<T> {
    pub fn complete(self, value: T) {
        // the deferred side was dropped, nobody waits for the value
        let _ = self.tx.send(Ok(value));
    }

    pub fn fail(self, error: Error) {
        let _ = self.tx.send(Err(error));
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").field("canceled", &self.tx.is_canceled()).finish()
    }
}

/// Receives the outcome of a [`Mono`].
pub trait MonoObserver<T>: Send + 'static {
    fn on_success(self: Box<Self>, value: T);

    fn on_error(self: Box<Self>, error: Error);
}

type MonoSource<T> = Box<dyn FnOnce(Box<dyn MonoObserver<T>>) + Send>;

/// A source of exactly one value or one error.
pub struct Mono<T> {
    source: MonoSource<T>,
}

impl<T: Send + 'static> Mono<T> {
    fn new(source: impl FnOnce(Box<dyn MonoObserver<T>>) + Send + 'static) -> Self {
        Self { source: Box::new(source) }
    }

    pub fn just(value: T) -> Self {
        Self::new(move |observer| observer.on_success(value))
    }

    pub fn error(error: Error) -> Self {
        Self::new(move |observer| observer.on_error(error))
    }

    /// Polls the future once subscribed, on the current runtime or the shared scheduler.
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, Error>> + Send + 'static,
    {
        Self::new(move |observer| {
            spawn_detached(Box::pin(async move {
                match future.await {
                    Ok(value) => observer.on_success(value),
                    Err(e) => observer.on_error(e),
                }
            }))
        })
    }

    /// A mono completed through a [`MonoSink`], possibly from another thread.
    pub fn create<F>(f: F) -> Self
    where
        F: FnOnce(MonoSink<T>) + Send + 'static,
    {
        Self::new(move |observer| f(MonoSink { observer: Some(observer) }))
    }

    pub fn map<U, F>(self, f: F) -> Mono<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        Mono::new(move |observer| self.subscribe(Box::new(MapObserver { inner: observer, f })))
    }

    pub fn subscribe(self, observer: Box<dyn MonoObserver<T>>) {
        (self.source)(observer)
    }

    /// Views the mono as a stream of at most one item.
    pub fn into_flux(self) -> Flux<T> {
        Flux::new(move |mut subscriber| {
            let subscription = Subscription::new();
            subscriber.on_subscribe(&subscription);
            self.subscribe(Box::new(MonoToFlux { subscriber, subscription }))
        })
    }
}

impl<T> fmt::Debug for Mono<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mono").finish_non_exhaustive()
    }
}

struct MapObserver<U, F> {
    inner: Box<dyn MonoObserver<U>>,
    f: F,
}

impl<T, U, F> MonoObserver<T> for MapObserver<U, F>
where
    U: 'static,
    F: FnOnce(T) -> U + Send + 'static,
{
    fn on_success(self: Box<Self>, value: T) {
        let this = *self;
        this.inner.on_success((this.f)(value))
    }

    fn on_error(self: Box<Self>, error: Error) {
        self.inner.on_error(error)
    }
}

struct MonoToFlux<T> {
    subscriber: Box<dyn Subscriber<T>>,
    subscription: Subscription,
}

impl<T: Send + 'static> MonoObserver<T> for MonoToFlux<T> {
    fn on_success(self: Box<Self>, value: T) {
        let mut this = *self;
        if this.subscription.is_cancelled() {
            return;
        }
        this.subscriber.on_next(value);
        if !this.subscription.is_cancelled() {
            this.subscriber.on_complete();
        }
    }

    fn on_error(self: Box<Self>, error: Error) {
        if !self.subscription.is_cancelled() {
            self.subscriber.on_error(error);
        }
    }
}

/// The producing half of [`Mono::create`].
///
/// Dropping the sink without a value fails the mono.
pub struct MonoSink<T: 'static> {
    observer: Option<Box<dyn MonoObserver<T>>>,
}

impl<T: 'static> MonoSink<T> {
    pub fn success(mut self, value: T) {
        if let Some(observer) = self.observer.take() {
            observer.on_success(value);
        }
    }

    pub fn error(mut self, error: Error) {
        if let Some(observer) = self.observer.take() {
            observer.on_error(error);
        }
    }
}

impl<T: 'static> Drop for MonoSink<T> {
    fn drop(&mut self) {
        if let Some(observer) = self.observer.take() {
            observer.on_error(Error::status(StatusCode::INTERNAL_SERVER_ERROR, "mono dropped without a value"));
        }
    }
}

impl<T: 'static> fmt::Debug for MonoSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonoSink").field("completed", &self.observer.is_none()).finish()
    }
}

/// Cancels a running [`Flux`].
#[derive(Debug, Clone, Default)]
pub struct Subscription {
    cancelled: Arc<AtomicBool>,
}

impl Subscription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops the delivery of items; no terminal signal follows a cancel.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Receives the items of a [`Flux`], followed by one terminal signal.
///
/// Demand is unbounded: items are pushed as soon as the source has them.
pub trait Subscriber<T>: Send + 'static {
    fn on_subscribe(&mut self, subscription: &Subscription) {
        let _ = subscription;
    }

    fn on_next(&mut self, item: T);

    fn on_error(self: Box<Self>, error: Error);

    fn on_complete(self: Box<Self>);
}

type FluxSource<T> = Box<dyn FnOnce(Box<dyn Subscriber<T>>) + Send>;

/// A source of any number of items followed by completion or an error.
pub struct Flux<T> {
    source: FluxSource<T>,
}

impl<T: Send + 'static> Flux<T> {
    fn new(source: impl FnOnce(Box<dyn Subscriber<T>>) + Send + 'static) -> Self {
        Self { source: Box::new(source) }
    }

    /// Pushes the items on the subscribing thread.
    pub fn iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        let items = items.into_iter();
        Self::new(move |mut subscriber| {
            let subscription = Subscription::new();
            subscriber.on_subscribe(&subscription);
            for item in items {
                if subscription.is_cancelled() {
                    return;
                }
                subscriber.on_next(item);
            }
            if !subscription.is_cancelled() {
                subscriber.on_complete();
            }
        })
    }

    pub fn just(value: T) -> Self {
        Self::iter(Some(value))
    }

    pub fn empty() -> Self {
        Self::iter(None)
    }

    pub fn error(error: Error) -> Self {
        Self::new(move |mut subscriber| {
            subscriber.on_subscribe(&Subscription::new());
            subscriber.on_error(error);
        })
    }

    /// Drives the stream once subscribed, on the current runtime or the shared scheduler.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, Error>> + Send + 'static,
    {
        let mut stream: BoxStream<'static, Result<T, Error>> = stream.boxed();
        Self::new(move |mut subscriber| {
            let subscription = Subscription::new();
            subscriber.on_subscribe(&subscription);
            spawn_detached(Box::pin(async move {
                while let Some(item) = stream.next().await {
                    if subscription.is_cancelled() {
                        return;
                    }
                    match item {
                        Ok(item) => subscriber.on_next(item),
                        Err(e) => return subscriber.on_error(e),
                    }
                }
                if !subscription.is_cancelled() {
                    subscriber.on_complete();
                }
            }))
        })
    }

    /// A flux fed through a [`FluxSink`], possibly from another thread.
    pub fn create<F>(f: F) -> Self
    where
        F: FnOnce(FluxSink<T>) + Send + 'static,
    {
        Self::new(move |mut subscriber| {
            let subscription = Subscription::new();
            subscriber.on_subscribe(&subscription);
            f(FluxSink { subscriber: Some(subscriber), subscription })
        })
    }

    pub fn map<U, F>(self, f: F) -> Flux<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + 'static,
    {
        Flux::new(move |subscriber| self.subscribe(Box::new(MapSubscriber { inner: subscriber, f })))
    }

    pub fn subscribe(self, subscriber: Box<dyn Subscriber<T>>) {
        (self.source)(subscriber)
    }
}

impl<T> fmt::Debug for Flux<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flux").finish_non_exhaustive()
    }
}

struct MapSubscriber<U, F> {
    inner: Box<dyn Subscriber<U>>,
    f: F,
}

impl<T, U, F> Subscriber<T> for MapSubscriber<U, F>
where
    U: 'static,
    F: Fn(T) -> U + Send + 'static,
{
    fn on_subscribe(&mut self, subscription: &Subscription) {
        self.inner.on_subscribe(subscription);
    }

    fn on_next(&mut self, item: T) {
        self.inner.on_next((self.f)(item));
    }

    fn on_error(self: Box<Self>, error: Error) {
        self.inner.on_error(error);
    }

    fn on_complete(self: Box<Self>) {
        self.inner.on_complete();
    }
}

/// The producing half of [`Flux::create`].
///
/// Dropping the sink without a terminal signal fails the flux.
pub struct FluxSink<T: 'static> {
    subscriber: Option<Box<dyn Subscriber<T>>>,
    subscription: Subscription,
}

impl<T: 'static> FluxSink<T> {
    /// Emits an item, returns `false` once the subscriber cancelled.
    pub fn next(&mut self, item: T) -> bool {
        if self.subscription.is_cancelled() {
            return false;
        }
        if let Some(subscriber) = self.subscriber.as_mut() {
            subscriber.on_next(item);
        }
        !self.subscription.is_cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.subscription.is_cancelled()
    }

    pub fn complete(mut self) {
        if let Some(subscriber) = self.subscriber.take() {
            if !self.subscription.is_cancelled() {
                subscriber.on_complete();
            }
        }
    }

    pub fn error(mut self, error: Error) {
        if let Some(subscriber) = self.subscriber.take() {
            if !self.subscription.is_cancelled() {
                subscriber.on_error(error);
            }
        }
    }
}

impl<T: 'static> Drop for FluxSink<T> {
    fn drop(&mut self) {
        if let Some(subscriber) = self.subscriber.take() {
            if !self.subscription.is_cancelled() {
                subscriber.on_error(Error::status(StatusCode::INTERNAL_SERVER_ERROR, "flux dropped without completing"));
            }
        }
    }
}

impl<T: 'static> fmt::Debug for FluxSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FluxSink").field("subscription", &self.subscription).finish_non_exhaustive()
    }
}
