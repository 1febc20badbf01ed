//! Async driver that owns the registry.
//!
//! All mutation happens on one task: transport events and caller closures
//! arrive over an unbounded channel and are applied in order. After each one
//! the notifier is told about the mutation, and a persistence write is
//! scheduled `persist_debounce` later so bursts of packets cost one snapshot.
//!
//! ```text
//!  transport ──Event──┐
//!  UI ───────Mutate───┼──► mpsc ──► SyncService::run ──► registry
//!  UI ───────Query────┘                 │   ├─► ChangeNotifier (debounced)
//!                                       │   └─► StateStore (debounced)
//!                                  sleep_until(next deadline)
//! ```

use chrono::Utc;
use log::{debug, info, warn};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::errors::Result;
use crate::notifier::{ChangeNotifier, SubscribeOptions, SubscriptionId};
use crate::persistence::{save_registry, StateStore};
use crate::protocol::InboundEvent;
use crate::registry::DeviceRegistry;
use crate::types::DeviceId;

type MutateFn = Box<dyn FnOnce(&mut DeviceRegistry) + Send>;
type QueryFn = Box<dyn FnOnce(&DeviceRegistry) + Send>;
type SubscribeFn = Box<dyn FnOnce(&mut ChangeNotifier, &DeviceRegistry) + Send>;

pub enum ServiceCommand {
    Event(DeviceId, InboundEvent),
    Mutate(MutateFn),
    Query(QueryFn),
    Subscribe(SubscribeFn),
    Unsubscribe(SubscriptionId),
    PersistNow(oneshot::Sender<Result<()>>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Delay between the first unsaved mutation and the snapshot write.
    pub persist_debounce: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            persist_debounce: Duration::from_millis(500),
        }
    }
}

/// Cloneable front door to a running [`SyncService`].
#[derive(Clone)]
pub struct ServiceHandle {
    tx: mpsc::UnboundedSender<ServiceCommand>,
}

impl ServiceHandle {
    /// Hand a decoded transport event to the service. Returns `false` once the
    /// service has stopped.
    pub fn submit(&self, device: DeviceId, event: InboundEvent) -> bool {
        self.tx.send(ServiceCommand::Event(device, event)).is_ok()
    }

    pub fn mutate(&self, f: impl FnOnce(&mut DeviceRegistry) + Send + 'static) -> bool {
        self.tx.send(ServiceCommand::Mutate(Box::new(f))).is_ok()
    }

    /// Run `f` against the registry on the service task and return its result.
    pub async fn query<R: Send + 'static>(
        &self,
        f: impl FnOnce(&DeviceRegistry) -> R + Send + 'static,
    ) -> Option<R> {
        let (tx, rx) = oneshot::channel();
        let job: QueryFn = Box::new(move |registry| {
            let _ = tx.send(f(registry));
        });
        self.tx.send(ServiceCommand::Query(job)).ok()?;
        rx.await.ok()
    }

    pub async fn subscribe<T, S, C>(
        &self,
        selector: S,
        options: SubscribeOptions<T>,
        callback: C,
    ) -> Option<SubscriptionId>
    where
        T: Send + 'static,
        S: Fn(&DeviceRegistry) -> T + Send + 'static,
        C: FnMut(&T) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: SubscribeFn = Box::new(move |notifier, registry| {
            let id = notifier.subscribe(registry, selector, options, callback);
            let _ = tx.send(id);
        });
        self.tx.send(ServiceCommand::Subscribe(job)).ok()?;
        rx.await.ok()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.tx.send(ServiceCommand::Unsubscribe(id)).is_ok()
    }

    /// Write a snapshot immediately, bypassing the debounce.
    pub async fn persist_now(&self) -> Option<Result<()>> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(ServiceCommand::PersistNow(tx)).ok()?;
        rx.await.ok()
    }

    /// Stop the service after a final snapshot.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(ServiceCommand::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

pub struct SyncService {
    registry: DeviceRegistry,
    notifier: ChangeNotifier,
    store: Option<Box<dyn StateStore>>,
    config: ServiceConfig,
    persist_deadline: Option<Instant>,
    rx: mpsc::UnboundedReceiver<ServiceCommand>,
}

/// Spawn the service on the current tokio runtime. The join handle yields the
/// registry once the service stops.
pub fn start_service(
    registry: DeviceRegistry,
    store: Option<Box<dyn StateStore>>,
    config: ServiceConfig,
) -> (ServiceHandle, JoinHandle<DeviceRegistry>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let service = SyncService {
        registry,
        notifier: ChangeNotifier::new(),
        store,
        config,
        persist_deadline: None,
        rx,
    };
    let join = tokio::spawn(service.run());
    (ServiceHandle { tx }, join)
}

impl SyncService {
    pub async fn run(mut self) -> DeviceRegistry {
        info!(
            "Sync service started ({} device(s), persistence {})",
            self.registry.device_count(),
            if self.store.is_some() { "on" } else { "off" }
        );
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(ServiceCommand::Shutdown(done)) => {
                            self.persist_if_dirty();
                            let _ = done.send(());
                            break;
                        }
                        Some(cmd) => self.handle(cmd),
                        None => {
                            debug!("All service handles dropped");
                            self.persist_if_dirty();
                            break;
                        }
                    }
                }
                _ = sleep_until_opt(deadline), if deadline.is_some() => {
                    self.on_timer(Instant::now());
                }
            }
        }
        info!("Sync service stopped");
        self.registry
    }

    fn handle(&mut self, cmd: ServiceCommand) {
        match cmd {
            ServiceCommand::Event(id, event) => {
                if let Err(e) = self.registry.apply(id, event, Utc::now()) {
                    warn!("Dropping event for device {}: {}", id, e);
                    return;
                }
                self.after_mutation();
            }
            ServiceCommand::Mutate(f) => {
                f(&mut self.registry);
                self.after_mutation();
            }
            ServiceCommand::Query(f) => f(&self.registry),
            ServiceCommand::Subscribe(f) => f(&mut self.notifier, &self.registry),
            ServiceCommand::Unsubscribe(id) => {
                self.notifier.unsubscribe(id);
            }
            ServiceCommand::PersistNow(reply) => {
                let _ = reply.send(self.persist());
            }
            ServiceCommand::Shutdown(_) => {}
        }
    }

    fn after_mutation(&mut self) {
        let now = Instant::now();
        self.notifier.notify_mutation(&self.registry, now);
        if self.store.is_none() {
            return;
        }
        if self.config.persist_debounce.is_zero() {
            if let Err(e) = self.persist() {
                warn!("Snapshot write failed: {}", e);
            }
        } else if self.persist_deadline.is_none() {
            self.persist_deadline = Some(now + self.config.persist_debounce);
        }
    }

    fn on_timer(&mut self, now: Instant) {
        self.notifier.flush_due(&self.registry, now);
        if self.persist_deadline.is_some_and(|at| at <= now) {
            if let Err(e) = self.persist() {
                warn!("Snapshot write failed: {}", e);
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.notifier.next_deadline(), self.persist_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn persist(&mut self) -> Result<()> {
        self.persist_deadline = None;
        match &self.store {
            Some(store) => save_registry(store.as_ref(), &self.registry),
            None => Ok(()),
        }
    }

    fn persist_if_dirty(&mut self) {
        if self.persist_deadline.is_some() {
            if let Err(e) = self.persist() {
                warn!("Final snapshot write failed: {}", e);
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    if let Some(at) = deadline {
        tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await;
    }
}
