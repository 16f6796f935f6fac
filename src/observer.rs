// Observer traits and the registry that dispatches to them

use crate::event::{Alerts, Notification};
use crate::tally::{AggregateState, MemberState, ResourceKey, Tally};
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error("observer is closed")]
    Closed,
    #[error("observer failed: {0}")]
    Failed(String),
}

pub type ObserverResult = Result<(), ObserverError>;

/// Subscriber to a resource's changes. Every hook defaults to a no-op, so implementors
/// only override what they care about.
pub trait ResourceObserver: Send + Sync {
    fn on_tally_change(&self, _new: &Tally, _old: &Tally) -> ObserverResult {
        Ok(())
    }

    fn on_list_change(
        &self,
        _new: &[String],
        _old: &[String],
        _added: &[String],
        _removed: &[String],
    ) -> ObserverResult {
        Ok(())
    }

    fn on_state_change(&self, _new: AggregateState, _old: AggregateState) -> ObserverResult {
        Ok(())
    }

    fn on_alerts_change(&self, _alerts: &Alerts) -> ObserverResult {
        Ok(())
    }

    fn on_attribute_change(
        &self,
        _name: &str,
        _new: Option<&Value>,
        _old: Option<&Value>,
    ) -> ObserverResult {
        Ok(())
    }

    fn on_destroyed(&self) -> ObserverResult {
        Ok(())
    }
}

/// Subscriber to a single member's state transitions. `old` is `None` on the first report
/// for a member that was listed without a state.
pub trait MemberObserver: Send + Sync {
    fn on_state_change(
        &self,
        member: &str,
        new: MemberState,
        old: Option<MemberState>,
    ) -> ObserverResult;
}

pub type SharedObserver = Arc<dyn ResourceObserver>;

/// Ordered set of observers. Identity is the `Arc` allocation, so subscribing the same
/// observer twice is a no-op.
pub struct ObserverRegistry<O: ?Sized> {
    observers: Vec<Arc<O>>,
}

impl<O: ?Sized> Default for ObserverRegistry<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: ?Sized> std::fmt::Debug for ObserverRegistry<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("len", &self.observers.len())
            .finish()
    }
}

fn same_observer<O: ?Sized>(a: &Arc<O>, b: &Arc<O>) -> bool {
    // Compare data pointers only; vtable pointers for the same object may differ.
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl<O: ?Sized> ObserverRegistry<O> {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    /// Returns false when the observer was already registered.
    pub fn subscribe(&mut self, observer: Arc<O>) -> bool {
        if self.contains(&observer) {
            return false;
        }
        self.observers.push(observer);
        true
    }

    /// Returns false when the observer was not registered.
    pub fn unsubscribe(&mut self, observer: &Arc<O>) -> bool {
        let before = self.observers.len();
        self.observers.retain(|o| !same_observer(o, observer));
        self.observers.len() != before
    }

    pub fn contains(&self, observer: &Arc<O>) -> bool {
        self.observers.iter().any(|o| same_observer(o, observer))
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn clear(&mut self) {
        self.observers.clear();
    }

    /// Invokes `f` on every observer in registration order. A failing or panicking observer
    /// is logged and skipped; delivery to the rest continues. Returns the failure count.
    pub fn notify<F>(&self, event: &'static str, mut f: F) -> usize
    where
        F: FnMut(&O) -> ObserverResult,
    {
        let mut failures = 0;
        for (index, observer) in self.observers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| f(&**observer))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::warn!(
                        notification = event,
                        observer = index,
                        error = %e,
                        "observer failed"
                    );
                }
                Err(_) => {
                    failures += 1;
                    tracing::warn!(notification = event, observer = index, "observer panicked");
                }
            }
        }
        failures
    }
}

/// Forwards a resource's changes as [`Notification`]s onto a broadcast channel
/// (one instance per resource, so each notification carries its source key).
pub struct BroadcastObserver {
    resource: ResourceKey,
    tx: broadcast::Sender<Notification>,
}

impl BroadcastObserver {
    pub fn new(resource: ResourceKey, tx: broadcast::Sender<Notification>) -> Self {
        Self { resource, tx }
    }

    fn publish(&self, notification: Notification) -> ObserverResult {
        // No receivers just means no UI client is connected.
        let _ = self.tx.send(notification);
        Ok(())
    }
}

impl ResourceObserver for BroadcastObserver {
    fn on_tally_change(&self, new: &Tally, old: &Tally) -> ObserverResult {
        self.publish(Notification::TallyChange {
            resource: self.resource.clone(),
            new: *new,
            old: *old,
        })
    }

    fn on_list_change(
        &self,
        new: &[String],
        old: &[String],
        added: &[String],
        removed: &[String],
    ) -> ObserverResult {
        self.publish(Notification::ListChange {
            resource: self.resource.clone(),
            new: new.to_vec(),
            old: old.to_vec(),
            added: added.to_vec(),
            removed: removed.to_vec(),
        })
    }

    fn on_state_change(&self, new: AggregateState, old: AggregateState) -> ObserverResult {
        self.publish(Notification::StateChange {
            resource: self.resource.clone(),
            new,
            old,
        })
    }

    fn on_alerts_change(&self, alerts: &Alerts) -> ObserverResult {
        self.publish(Notification::AlertsChange {
            resource: self.resource.clone(),
            alerts: alerts.clone(),
        })
    }

    fn on_attribute_change(
        &self,
        name: &str,
        new: Option<&Value>,
        old: Option<&Value>,
    ) -> ObserverResult {
        self.publish(Notification::AttributeChange {
            resource: self.resource.clone(),
            name: name.to_string(),
            new: new.cloned(),
            old: old.cloned(),
        })
    }

    fn on_destroyed(&self) -> ObserverResult {
        self.publish(Notification::Destroyed {
            resource: self.resource.clone(),
        })
    }
}
