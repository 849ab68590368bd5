//! Subscriptions
//!
//! `subscribe` is the entry point used by rendering layers: it creates a
//! [`Subscriber`] and attaches it to a source. Signal-shaped sources are
//! linked through the dependency graph; reactive objects go through the
//! [`PropertyStore`], for one property or all of them.

use std::fmt::Debug;

use super::computed::Computed;
use super::proxy::{DeepRef, Reactive};
use super::scope::EffectScope;
use super::signal::{Callable, Readable, Signal, SignalCore};
use super::store::{Delivery, PropertyKey, PropertyStore};
use super::subscriber::{Subscriber, SubscriberOptions, SubscriptionHandle, Trigger};
use crate::error::ErrorHandler;

/// Something a [`Subscriber`] can be attached to.
pub trait Source {
    /// Attach `subscriber`. `property` narrows the subscription on sources
    /// with properties and is ignored elsewhere; `batch` selects deferred
    /// delivery.
    fn attach(&self, subscriber: &Subscriber, property: Option<&str>, batch: bool);
}

fn attach_readable<R: Readable + ?Sized>(source: &R, subscriber: &Subscriber) {
    subscriber.track(|| {
        source.read();
    });
}

impl<T: Clone + 'static> Source for Signal<T> {
    fn attach(&self, subscriber: &Subscriber, _property: Option<&str>, _batch: bool) {
        attach_readable(self, subscriber);
    }
}

impl<T: Clone + 'static> Source for Computed<T> {
    fn attach(&self, subscriber: &Subscriber, _property: Option<&str>, _batch: bool) {
        attach_readable(self, subscriber);
    }
}

impl<T: Clone + 'static> Source for Callable<T> {
    fn attach(&self, subscriber: &Subscriber, _property: Option<&str>, _batch: bool) {
        attach_readable(self, subscriber);
    }
}

impl Source for DeepRef {
    fn attach(&self, subscriber: &Subscriber, _property: Option<&str>, _batch: bool) {
        attach_readable(self, subscriber);
    }
}

impl Source for SignalCore {
    fn attach(&self, subscriber: &Subscriber, _property: Option<&str>, _batch: bool) {
        subscriber.track(|| self.track());
    }
}

impl Source for Reactive {
    fn attach(&self, subscriber: &Subscriber, property: Option<&str>, batch: bool) {
        let delivery = if batch {
            Delivery::Batched
        } else {
            Delivery::Immediate
        };
        PropertyStore::listen(self.target_id(), PropertyKey::from(property), subscriber, delivery);
    }
}

/// Options for [`subscribe`] and [`watch_property`].
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Only hear about this property (reactive objects only).
    pub property: Option<String>,

    /// Auto-dispose after this many invocations (`0` = unbounded).
    pub limit: usize,

    pub scope: Option<EffectScope>,
    pub detached: bool,

    /// Deliver on the next flush, once per flush.
    pub batch: bool,

    pub on_error: Option<ErrorHandler>,
}

impl SubscribeOptions {
    fn subscriber_options(&self) -> SubscriberOptions {
        SubscriberOptions {
            limit: self.limit,
            scope: self.scope.clone(),
            detached: self.detached,
            batch: self.batch,
            on_error: self.on_error.clone(),
        }
    }
}

impl Debug for SubscribeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("property", &self.property)
            .field("limit", &self.limit)
            .field("scoped", &self.scope.is_some())
            .field("detached", &self.detached)
            .field("batch", &self.batch)
            .finish()
    }
}

/// Call `callback` whenever `source` changes.
///
/// # Example
///
/// ```rust
/// use filament_core::reactive::{peek, subscribe, Signal, SubscribeOptions};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let r = Signal::new(1);
/// let seen = Rc::new(Cell::new(None));
///
/// let (s, r2) = (seen.clone(), r.clone());
/// let _sub = subscribe(&r, move |_| s.set(Some(peek(&r2))), SubscribeOptions::default());
///
/// r.set(1);
/// assert_eq!(seen.get(), None);
///
/// r.set(2);
/// assert_eq!(seen.get(), Some(2));
/// ```
pub fn subscribe<S, F>(source: &S, callback: F, options: SubscribeOptions) -> SubscriptionHandle
where
    S: Source + ?Sized,
    F: FnMut(&Trigger<'_>) + 'static,
{
    let subscriber = Subscriber::new(callback, options.subscriber_options());
    source.attach(&subscriber, options.property.as_deref(), options.batch);
    subscriber
}

/// Call `callback` when any of `properties` of `target` is written. An
/// empty list means every property.
///
/// The callback receives the changed properties through
/// [`Trigger::properties`]: one property per call in immediate mode, or all
/// of them in mutation order, once per flush, with `batch: true`.
pub fn watch_property<F>(
    target: &Reactive,
    properties: &[&str],
    callback: F,
    options: SubscribeOptions,
) -> SubscriptionHandle
where
    F: FnMut(&Trigger<'_>) + 'static,
{
    let subscriber = Subscriber::new(callback, options.subscriber_options());
    if properties.is_empty() {
        target.attach(&subscriber, None, options.batch);
    }
    for property in properties {
        target.attach(&subscriber, Some(property), options.batch);
    }
    subscriber
}
