//! Debounced change subscriptions over the registry.
//!
//! A subscriber supplies a selector deriving a value from the registry and a
//! callback. After each mutation the selector is re-run and the callback fires
//! only when the equality check says the value changed. With a non-zero
//! debounce, mutations inside the window collapse into one evaluation when the
//! window closes. The window opens at the first mutation and is not pushed back
//! by later ones, so a busy stream still produces periodic updates.

use log::trace;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::registry::DeviceRegistry;

pub type SubscriptionId = u64;

type Equality<T> = Box<dyn Fn(&T, &T) -> bool + Send>;

pub struct SubscribeOptions<T> {
    debounce: Duration,
    equality: Equality<T>,
}

impl<T: PartialEq> Default for SubscribeOptions<T> {
    fn default() -> Self {
        Self {
            debounce: Duration::ZERO,
            equality: Box::new(|a: &T, b: &T| a == b),
        }
    }
}

impl<T: PartialEq> SubscribeOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> SubscribeOptions<T> {
    pub fn debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    /// Replace the default `==` comparison.
    pub fn equality(mut self, eq: impl Fn(&T, &T) -> bool + Send + 'static) -> Self {
        self.equality = Box::new(eq);
        self
    }
}

trait Observer: Send {
    fn debounce(&self) -> Duration;
    fn deadline(&self) -> Option<Instant>;
    fn set_deadline(&mut self, deadline: Option<Instant>);
    /// Re-run the selector; returns whether the callback fired.
    fn evaluate(&mut self, registry: &DeviceRegistry) -> bool;
}

struct Subscription<T> {
    selector: Box<dyn Fn(&DeviceRegistry) -> T + Send>,
    callback: Box<dyn FnMut(&T) + Send>,
    options: SubscribeOptions<T>,
    last: T,
    deadline: Option<Instant>,
}

impl<T: Send + 'static> Observer for Subscription<T> {
    fn debounce(&self) -> Duration {
        self.options.debounce
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    fn evaluate(&mut self, registry: &DeviceRegistry) -> bool {
        let next = (self.selector)(registry);
        if (self.options.equality)(&self.last, &next) {
            return false;
        }
        (self.callback)(&next);
        self.last = next;
        true
    }
}

#[derive(Default)]
pub struct ChangeNotifier {
    next_id: SubscriptionId,
    observers: BTreeMap<SubscriptionId, Box<dyn Observer>>,
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("subscriptions", &self.observers.len())
            .finish()
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a selector. Its current value against `registry` becomes the
    /// baseline; the callback is not invoked for it.
    pub fn subscribe<T, S, C>(
        &mut self,
        registry: &DeviceRegistry,
        selector: S,
        options: SubscribeOptions<T>,
        callback: C,
    ) -> SubscriptionId
    where
        T: Send + 'static,
        S: Fn(&DeviceRegistry) -> T + Send + 'static,
        C: FnMut(&T) + Send + 'static,
    {
        let last = selector(registry);
        let id = self.next_id;
        self.next_id += 1;
        self.observers.insert(
            id,
            Box::new(Subscription {
                selector: Box::new(selector),
                callback: Box::new(callback),
                options,
                last,
                deadline: None,
            }),
        );
        trace!("Subscription {} registered", id);
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Call after every registry mutation. Undebounced subscribers are
    /// evaluated immediately; others get a deadline if they have none.
    /// Returns how many callbacks fired.
    pub fn notify_mutation(&mut self, registry: &DeviceRegistry, now: Instant) -> usize {
        let mut fired = 0;
        for observer in self.observers.values_mut() {
            let window = observer.debounce();
            if window.is_zero() {
                fired += usize::from(observer.evaluate(registry));
            } else if observer.deadline().is_none() {
                observer.set_deadline(Some(now + window));
            }
        }
        fired
    }

    /// Evaluate every subscriber whose debounce window has closed by `now`.
    pub fn flush_due(&mut self, registry: &DeviceRegistry, now: Instant) -> usize {
        let mut fired = 0;
        for observer in self.observers.values_mut() {
            if observer.deadline().is_some_and(|at| at <= now) {
                observer.set_deadline(None);
                fired += usize::from(observer.evaluate(registry));
            }
        }
        fired
    }

    /// Earliest pending debounce deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.observers.values().filter_map(|o| o.deadline()).min()
    }
}
