//! Route-keyed subscriptions for push events.
//!
//! Listeners are either persistent (fire until removed) or once (removed
//! after the first push they handle). Dispatch snapshots the subscriber list
//! under the lock and invokes callbacks after releasing it, so a callback
//! may add or remove listeners freely. Subscriptions added while a dispatch
//! is running are not part of that dispatch.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use crate::protocol::RawPacket;

/// Callback invoked with each push packet on a route.
pub trait Listener: Send + Sync + 'static {
    /// Returns `false` if the packet was not handled. A once-listener then
    /// stays subscribed for the next push.
    fn call(&self, packet: &RawPacket) -> bool;
}

impl<F> Listener for F
where
    F: Fn(&RawPacket) + Send + Sync + 'static,
{
    fn call(&self, packet: &RawPacket) -> bool {
        self(packet);
        true
    }
}

/// Wrapper that decodes the payload before calling the callback.
///
/// Packets that fail to decode are logged and skipped; they do not count as
/// handled.
pub struct TypedListener<F, T>
where
    F: Fn(T) + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    callback: F,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T> TypedListener<F, T>
where
    F: Fn(T) + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            _phantom: PhantomData,
        }
    }
}

impl<F, T> Listener for TypedListener<F, T>
where
    F: Fn(T) + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    fn call(&self, packet: &RawPacket) -> bool {
        match packet.decode_typed::<T>() {
            Ok(value) => {
                (self.callback)(value);
                true
            }
            Err(e) => {
                tracing::warn!(route = packet.route(), error = %e, "failed to decode push payload");
                false
            }
        }
    }
}

/// Identifies one subscription for [`ListenerRegistry::remove_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Persistent,
    Once,
}

struct Subscription {
    handle: ListenerHandle,
    mode: Mode,
    listener: Arc<dyn Listener>,
    /// Held by a dispatch that is running a once-listener.
    claimed: Arc<AtomicBool>,
}

/// Subscriptions grouped by route, kept in registration order.
pub struct ListenerRegistry {
    routes: Mutex<HashMap<u32, Vec<Subscription>>>,
    next_handle: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Subscribe until removed.
    pub fn add_listener<L: Listener>(&self, route: u32, listener: L) -> ListenerHandle {
        self.insert(route, Mode::Persistent, Arc::new(listener))
    }

    /// Subscribe until the first push on `route` that the listener handles.
    pub fn add_listener_once<L: Listener>(&self, route: u32, listener: L) -> ListenerHandle {
        self.insert(route, Mode::Once, Arc::new(listener))
    }

    fn insert(&self, route: u32, mode: Mode, listener: Arc<dyn Listener>) -> ListenerHandle {
        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.routes
            .lock()
            .entry(route)
            .or_default()
            .push(Subscription {
                handle,
                mode,
                listener,
                claimed: Arc::new(AtomicBool::new(false)),
            });
        handle
    }

    /// Remove one subscription. Unknown handles are ignored.
    ///
    /// Returns `true` if a subscription was removed.
    pub fn remove_listener(&self, route: u32, handle: ListenerHandle) -> bool {
        let mut routes = self.routes.lock();
        let Some(subs) = routes.get_mut(&route) else {
            return false;
        };

        let before = subs.len();
        subs.retain(|s| s.handle != handle);
        let removed = subs.len() != before;

        if subs.is_empty() {
            routes.remove(&route);
        }
        removed
    }

    /// Deliver a push packet to every listener on its route.
    ///
    /// A once-listener is claimed while its callback runs, so overlapping
    /// dispatches never run it twice. It is removed when the callback
    /// reports the packet handled and released otherwise. Returns the
    /// number of callbacks invoked.
    pub fn dispatch(&self, packet: &RawPacket) -> usize {
        let route = packet.route();
        let snapshot: Vec<(ListenerHandle, Option<Arc<AtomicBool>>, Arc<dyn Listener>)> = {
            let routes = self.routes.lock();
            let Some(subs) = routes.get(&route) else {
                return 0;
            };

            subs.iter()
                .filter_map(|s| match s.mode {
                    Mode::Persistent => Some((s.handle, None, s.listener.clone())),
                    Mode::Once if !s.claimed.swap(true, Ordering::AcqRel) => {
                        Some((s.handle, Some(s.claimed.clone()), s.listener.clone()))
                    }
                    Mode::Once => None,
                })
                .collect()
        };

        for (handle, claim, listener) in &snapshot {
            let handled = listener.call(packet);
            if let Some(claim) = claim {
                if handled {
                    self.remove_listener(route, *handle);
                } else {
                    claim.store(false, Ordering::Release);
                }
            }
        }
        snapshot.len()
    }

    /// Number of subscriptions on a route.
    pub fn listener_count(&self, route: u32) -> usize {
        self.routes.lock().get(&route).map_or(0, Vec::len)
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.routes.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.routes.lock().is_empty()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
