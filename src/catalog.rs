// Catalog: the application-owned registry of resources and members

use crate::event::ChangeEvent;
use crate::member::MemberDirectory;
use crate::observer::{MemberObserver, SharedObserver};
use crate::resource::{
    ChangeSummary, EventOutcome, Resource, ResourceError, ResourceInit, ResourceSnapshot,
};
use crate::tally::ResourceKey;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("resource {0} is already registered")]
    AlreadyRegistered(ResourceKey),
    #[error("resource {0} is not registered")]
    NotFound(ResourceKey),
}

/// Result of routing one event through the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Applied(ChangeSummary),
    /// The addressed resource refused the event.
    Ignored,
    /// No resource is registered under the event's key; only member states were applied.
    Unrouted { members_changed: usize },
}

/// Owns every resource and the member directory. Constructed once by the application root
/// and torn down explicitly.
#[derive(Default)]
pub struct Catalog {
    resources: HashMap<ResourceKey, Resource>,
    members: MemberDirectory,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, init: ResourceInit) -> Result<&mut Resource, CatalogError> {
        let key = init.key();
        if self.resources.contains_key(&key) {
            return Err(CatalogError::AlreadyRegistered(key));
        }
        let resource = Resource::new(init, &mut self.members)?;
        info!(
            resource = %key,
            members = resource.members().len(),
            state = ?resource.state(),
            "resource registered"
        );
        Ok(self.resources.entry(key).or_insert(resource))
    }

    /// Destroys and drops a resource. Returns false if it was not registered.
    pub fn remove(&mut self, key: &ResourceKey) -> bool {
        match self.resources.remove(key) {
            Some(mut resource) => {
                resource.destroy(&mut self.members);
                info!(resource = %key, "resource removed");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&Resource> {
        self.resources.get(key)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn members(&self) -> &MemberDirectory {
        &self.members
    }

    pub fn subscribe(
        &mut self,
        key: &ResourceKey,
        observer: SharedObserver,
    ) -> Result<bool, CatalogError> {
        self.resources
            .get_mut(key)
            .map(|r| r.subscribe(observer))
            .ok_or_else(|| CatalogError::NotFound(key.clone()))
    }

    /// No-op (false) when either the resource or the observer is absent.
    pub fn unsubscribe(&mut self, key: &ResourceKey, observer: &SharedObserver) -> bool {
        self.resources
            .get_mut(key)
            .is_some_and(|r| r.unsubscribe(observer))
    }

    pub fn subscribe_member(&mut self, id: &str, observer: Arc<dyn MemberObserver>) -> bool {
        self.members.subscribe(id, observer)
    }

    pub fn unsubscribe_member(&mut self, id: &str, observer: &Arc<dyn MemberObserver>) -> bool {
        self.members.unsubscribe(id, observer)
    }

    /// Routes an event to the resource it addresses. Member state changes are applied even
    /// when no such resource is registered.
    pub fn deliver(&mut self, event: &ChangeEvent) -> Delivery {
        match self.resources.get_mut(&event.key) {
            Some(resource) => match resource.handle_change_event(event, &mut self.members) {
                EventOutcome::Applied(summary) => Delivery::Applied(summary),
                EventOutcome::Ignored => Delivery::Ignored,
            },
            None => {
                let members_changed = event
                    .changed
                    .iter()
                    .filter(|c| self.members.set_state(&c.id, c.state))
                    .count();
                if event.has_resource_changes() {
                    debug!(resource = %event.key, "no resource registered for event");
                }
                Delivery::Unrouted { members_changed }
            }
        }
    }

    /// Applies queued child transitions to their parents. This is the "next turn" after an
    /// event; returns how many parent tallies changed. Parents left inconsistent are then
    /// recounted from member states where possible.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        let mut touched: Vec<ResourceKey> = Vec::new();
        for transition in self.members.drain_transitions() {
            match self.resources.get_mut(&transition.parent) {
                Some(resource) => {
                    if resource.apply_member_transition(&transition, &self.members) {
                        applied += 1;
                        if !touched.contains(&transition.parent) {
                            touched.push(transition.parent.clone());
                        }
                    }
                }
                None => debug!(
                    resource = %transition.parent,
                    member = %transition.member,
                    "transition for removed resource dropped"
                ),
            }
        }
        for key in &touched {
            if let Some(resource) = self.resources.get_mut(key) {
                resource.reconcile(&self.members);
            }
        }
        applied
    }

    pub fn snapshot(&self, key: &ResourceKey) -> Option<ResourceSnapshot> {
        self.resources.get(key).map(Resource::snapshot)
    }

    /// All resources, ordered by key for stable output.
    pub fn snapshots(&self) -> Vec<ResourceSnapshot> {
        let mut keys: Vec<&ResourceKey> = self.resources.keys().collect();
        keys.sort_by_key(|k| k.to_string());
        keys.into_iter()
            .filter_map(|k| self.resources.get(k).map(Resource::snapshot))
            .collect()
    }

    /// Destroys every resource. The catalog is empty afterwards.
    pub fn teardown(&mut self) {
        let keys: Vec<ResourceKey> = self.resources.keys().cloned().collect();
        for key in &keys {
            self.remove(key);
        }
        self.members.drain_transitions();
        debug!(resources = keys.len(), "catalog torn down");
    }
}
