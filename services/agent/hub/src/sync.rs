//! Eventually-consistent service list synchronization with one hub.
//!
//! At most one push is in flight. Updates that arrive meanwhile replace the
//! pending list; when the in-flight push is acknowledged the pending list is
//! cleared only if no newer one replaced it, otherwise the newer one goes out
//! right away. Unacknowledged pushes are retried on a fixed interval.

use http::StatusCode;
use mesh_session::RpcChannel;
use mesh_wire::{post_services, ServiceKey};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::hub::wait_closed;

#[derive(Debug, Default)]
struct Slot {
    /// List waiting to be acknowledged
    pending: Option<Vec<ServiceKey>>,
    /// Most recent list, re-pushed on reconnect
    last: Option<Vec<ServiceKey>>,
    /// Bumped on every update
    generation: u64,
    in_flight: bool,
}

pub(crate) struct ServiceListSync {
    address: String,
    channel: Arc<dyn RpcChannel>,
    retry_interval: Duration,
    slot: Mutex<Slot>,
}

impl ServiceListSync {
    pub(crate) fn new(
        address: String,
        channel: Arc<dyn RpcChannel>,
        retry_interval: Duration,
    ) -> Self {
        Self {
            address,
            channel,
            retry_interval,
            slot: Mutex::new(Slot::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the pending list and make sure a push loop is running
    pub(crate) fn update(self: &Arc<Self>, list: Vec<ServiceKey>, closed: watch::Receiver<bool>) {
        {
            let mut slot = self.lock();
            slot.generation += 1;
            slot.pending = Some(list.clone());
            slot.last = Some(list);
            if slot.in_flight {
                debug!("Service list for hub {} queued behind in-flight push", self.address);
                return;
            }
            slot.in_flight = true;
        }

        tokio::spawn(self.clone().push_loop(closed));
    }

    /// Push the last known list again, if there is one
    pub(crate) fn repush(self: &Arc<Self>, closed: watch::Receiver<bool>) {
        let last = self.lock().last.clone();
        if let Some(list) = last {
            self.update(list, closed);
        }
    }

    /// Whether nothing is waiting for acknowledgement
    pub(crate) fn is_idle(&self) -> bool {
        let slot = self.lock();
        !slot.in_flight && slot.pending.is_none()
    }

    async fn push_loop(self: Arc<Self>, mut closed: watch::Receiver<bool>) {
        loop {
            let (list, generation) = {
                let mut slot = self.lock();
                let is_closed = *closed.borrow();
                match slot.pending.clone() {
                    Some(list) if !is_closed => (list, slot.generation),
                    _ => {
                        slot.in_flight = false;
                        return;
                    }
                }
            };

            if self.push(&list).await {
                let mut slot = self.lock();
                if slot.generation == generation {
                    slot.pending = None;
                    slot.in_flight = false;
                    info!("Hub {} accepted {} service(s)", self.address, list.len());
                    return;
                }
                debug!("Service list for hub {} changed during push, sending newer", self.address);
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.retry_interval) => {}
                _ = wait_closed(&mut closed) => {}
            }
        }
    }

    async fn push(&self, list: &[ServiceKey]) -> bool {
        let request = match post_services(list) {
            Ok(request) => request,
            Err(e) => {
                warn!("Cannot encode service list for hub {}: {}", self.address, e);
                return false;
            }
        };

        match self.channel.call(request).await {
            Some(response) if response.status() == StatusCode::CREATED => true,
            Some(response) => {
                debug!(
                    "Hub {} answered service list with {}, retrying in {:?}",
                    self.address,
                    response.status(),
                    self.retry_interval
                );
                false
            }
            None => {
                debug!(
                    "Hub {} unreachable for service list, retrying in {:?}",
                    self.address, self.retry_interval
                );
                false
            }
        }
    }
}
