//! [`LifecycleController`] – the on/off toggle in front of a [`Poller`].
//!
//! The controller owns no state beyond what it mirrors: it forwards the
//! poller's `Started`/`Stopped` events onto its own hub and keeps a
//! `watch<bool>` that is `true` exactly while a session is running.  A
//! disconnect therefore flips the toggle back off without any caller
//! involvement.

use std::sync::Arc;

use inolink_middleware::{Hub, Observer, SubscriptionHandle};
use inolink_types::{InoError, LifecycleEvent};
use tokio::sync::watch;
use tracing::debug;

use crate::poller::{Poller, PollerState};

struct Relay {
    events: Hub<LifecycleEvent>,
    running: watch::Sender<bool>,
}

impl Observer<LifecycleEvent> for Relay {
    fn notify(&self, event: &Arc<LifecycleEvent>) -> Result<(), InoError> {
        let running = matches!(**event, LifecycleEvent::Started { .. });
        self.running.send_replace(running);
        self.events.publish((**event).clone());
        Ok(())
    }
}

pub struct LifecycleController {
    poller: Arc<Poller>,
    relay: Arc<Relay>,
    subscription: SubscriptionHandle,
}

impl LifecycleController {
    pub fn new(poller: Arc<Poller>) -> Self {
        let (running, _) = watch::channel(poller.state() == PollerState::Running);
        let relay = Arc::new(Relay {
            events: Hub::new("controller"),
            running,
        });
        let subscription = poller.bus().lifecycle.subscribe(&relay);
        Self {
            poller,
            relay,
            subscription,
        }
    }

    /// Apply the toggle.  Returns `true` if the poller changed state.
    pub async fn set_running(&self, on: bool) -> bool {
        let changed = if on {
            self.poller.start().await
        } else {
            self.poller.stop().await
        };
        debug!(on, changed, "toggle applied");
        changed
    }

    pub fn is_running(&self) -> bool {
        *self.relay.running.borrow()
    }

    /// Watch the running state; the value flips to `false` on every
    /// `Stopped`, whatever its reason.
    pub fn running(&self) -> watch::Receiver<bool> {
        self.relay.running.subscribe()
    }

    /// Re-emitted `Started`/`Stopped` events.
    pub fn events(&self) -> &Hub<LifecycleEvent> {
        &self.relay.events
    }

    pub fn poller(&self) -> &Arc<Poller> {
        &self.poller
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        self.poller.bus().lifecycle.unsubscribe(self.subscription);
    }
}
