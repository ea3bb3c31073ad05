//! Drives a [`GestureMachine`] from hotkey edges using tokio timers.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};
use voxagent_core::TriggerMode;

use super::{GestureMachine, HotkeyEvent, HotkeyState, Step, Thresholds, TimerId};

pub type TriggerListener = Arc<dyn Fn(TriggerMode) + Send + Sync>;
pub type ReleaseListener = Arc<dyn Fn() + Send + Sync>;

/// The process-wide gesture recognizer.
///
/// Feed it `key_down`/`key_up` edges from whatever detects the physical key
/// and subscribe with [`on_trigger`](Self::on_trigger) and
/// [`on_release`](Self::on_release). Edges are ignored until
/// [`register`](Self::register) is called. Listeners run while the gesture
/// state is locked and must not call back into the trigger.
#[derive(Clone)]
pub struct HotkeyTrigger {
    inner: Arc<Inner>,
}

struct Inner {
    runtime: Handle,
    driver: Mutex<Driver>,
    trigger_listeners: RwLock<Vec<TriggerListener>>,
    release_listeners: RwLock<Vec<ReleaseListener>>,
}

struct Driver {
    machine: GestureMachine,
    registered: bool,
    timer: Option<(TimerId, JoinHandle<()>)>,
}

impl HotkeyTrigger {
    /// Timers are spawned on `runtime`.
    pub fn new(thresholds: Thresholds, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                runtime,
                driver: Mutex::new(Driver {
                    machine: GestureMachine::new(thresholds),
                    registered: false,
                    timer: None,
                }),
                trigger_listeners: RwLock::new(Vec::new()),
                release_listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Start accepting edges. Calling it again is a no-op.
    pub fn register(&self) {
        let mut driver = self.inner.driver.lock();
        if !driver.registered {
            driver.registered = true;
            info!(thresholds = ?driver.machine.thresholds(), "Hotkey trigger registered");
        }
    }

    /// Stop accepting edges, cancel pending timers and return to idle.
    pub fn unregister(&self) {
        let mut driver = self.inner.driver.lock();
        let was_registered = driver.registered;
        driver.registered = false;
        if let Some(id) = driver.machine.reset() {
            driver.cancel(id);
        }
        if let Some((_, handle)) = driver.timer.take() {
            handle.abort();
        }
        if was_registered {
            info!("Hotkey trigger unregistered");
        }
    }

    pub fn is_registered(&self) -> bool {
        self.inner.driver.lock().registered
    }

    pub fn state(&self) -> HotkeyState {
        self.inner.driver.lock().machine.state()
    }

    pub fn key_down(&self) {
        self.inner.edge(|machine, now| machine.key_down(now));
    }

    pub fn key_up(&self) {
        self.inner.edge(|machine, now| machine.key_up(now));
    }

    /// Adds a trigger listener. Adding the same listener twice is a no-op.
    pub fn on_trigger(&self, listener: TriggerListener) {
        add_listener(&self.inner.trigger_listeners, listener);
    }

    /// Adds a release listener. Adding the same listener twice is a no-op.
    pub fn on_release(&self, listener: ReleaseListener) {
        add_listener(&self.inner.release_listeners, listener);
    }

    /// Removes a trigger listener. Returns whether it was present.
    pub fn off_trigger(&self, listener: &TriggerListener) -> bool {
        remove_listener(&self.inner.trigger_listeners, listener)
    }

    /// Removes a release listener. Returns whether it was present.
    pub fn off_release(&self, listener: &ReleaseListener) -> bool {
        remove_listener(&self.inner.release_listeners, listener)
    }
}

impl Inner {
    fn edge(self: &Arc<Self>, input: impl FnOnce(&mut GestureMachine, std::time::Instant) -> Step) {
        let mut driver = self.driver.lock();
        if !driver.registered {
            return;
        }
        let step = input(&mut driver.machine, Instant::now().into_std());
        self.apply(&mut driver, step);
    }

    fn timer_fired(self: &Arc<Self>, id: TimerId) {
        let mut driver = self.driver.lock();
        if !driver.registered {
            return;
        }
        if driver.timer.as_ref().is_some_and(|(armed, _)| *armed == id) {
            driver.timer = None;
        }
        let step = driver.machine.timer_fired(id);
        self.apply(&mut driver, step);
    }

    fn apply(self: &Arc<Self>, driver: &mut Driver, step: Step) {
        if let Some(id) = step.cancel {
            driver.cancel(id);
        }
        if let Some((id, after)) = step.arm {
            driver.timer = Some((id, self.spawn_timer(id, after)));
        }
        for event in step.events {
            debug!(?event, state = ?driver.machine.state(), "hotkey gesture");
            self.emit(event);
        }
    }

    fn spawn_timer(self: &Arc<Self>, id: TimerId, after: Duration) -> JoinHandle<()> {
        let inner: Weak<Inner> = Arc::downgrade(self);
        self.runtime.spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(inner) = inner.upgrade() {
                inner.timer_fired(id);
            }
        })
    }

    fn emit(&self, event: HotkeyEvent) {
        match event {
            HotkeyEvent::Trigger(mode) => {
                for listener in self.trigger_listeners.read().iter() {
                    listener(mode);
                }
            }
            HotkeyEvent::Release => {
                for listener in self.release_listeners.read().iter() {
                    listener();
                }
            }
        }
    }
}

impl Driver {
    fn cancel(&mut self, id: TimerId) {
        if self.timer.as_ref().is_some_and(|(armed, _)| *armed == id) {
            if let Some((_, handle)) = self.timer.take() {
                handle.abort();
            }
        }
    }
}

fn add_listener<T: ?Sized>(listeners: &RwLock<Vec<Arc<T>>>, listener: Arc<T>) {
    let mut listeners = listeners.write();
    if !listeners.iter().any(|l| same_listener(l, &listener)) {
        listeners.push(listener);
    }
}

fn remove_listener<T: ?Sized>(listeners: &RwLock<Vec<Arc<T>>>, listener: &Arc<T>) -> bool {
    let mut listeners = listeners.write();
    let before = listeners.len();
    listeners.retain(|l| !same_listener(l, listener));
    listeners.len() != before
}

fn same_listener<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
