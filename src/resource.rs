// Resource: tally + member list + derived state, updated from diff events and child transitions

use crate::event::{Alerts, ChangeEvent, MemberRef};
use crate::member::{ChildObserver, MemberDirectory, MemberTransition};
use crate::observer::{ObserverRegistry, ResourceObserver, SharedObserver};
use crate::tally::{AggregateState, Bucket, ResourceKey, ResourceType, Tally};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("member list contains an empty id")]
    EmptyMemberId,
}

/// Initial payload a resource is built from (typically the first REST load).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInit {
    #[serde(rename = "type")]
    pub kind: ResourceType,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub up: Option<u32>,
    #[serde(default)]
    pub down: Option<u32>,
    #[serde(default)]
    pub unknown: Option<u32>,
    #[serde(default)]
    pub partial: Option<u32>,
    #[serde(default)]
    pub list: Option<Vec<MemberRef>>,
}

impl ResourceInit {
    pub fn new(kind: ResourceType) -> Self {
        Self {
            kind,
            id: None,
            up: None,
            down: None,
            unknown: None,
            partial: None,
            list: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_tally(mut self, up: u32, down: u32, unknown: u32) -> Self {
        self.up = Some(up);
        self.down = Some(down);
        self.unknown = Some(unknown);
        self
    }

    pub fn with_partial(mut self, partial: u32) -> Self {
        self.partial = Some(partial);
        self
    }

    pub fn with_list<I, M>(mut self, list: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<MemberRef>,
    {
        self.list = Some(list.into_iter().map(Into::into).collect());
        self
    }

    /// Key the resource will be registered under. Collections never carry an id.
    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            kind: self.kind,
            id: if self.kind.is_collection() {
                None
            } else {
                self.id.clone()
            },
        }
    }
}

/// What a change event did to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Addressed to another resource; nothing was touched.
    Ignored,
    Applied(ChangeSummary),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub tally_changed: bool,
    pub list_changed: bool,
    pub state_changed: bool,
    pub alerts_changed: bool,
    pub attributes_changed: usize,
    pub members_changed: usize,
}

/// Serializable view of a resource for the HTTP API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    #[serde(rename = "type")]
    pub kind: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub tally: Tally,
    pub state: AggregateState,
    pub members: Vec<String>,
    pub alerts: Alerts,
    pub attributes: BTreeMap<String, Value>,
}

pub struct Resource {
    key: ResourceKey,
    tally: Tally,
    state: AggregateState,
    members: Vec<String>,
    // Index-aligned with `members`.
    children: Vec<Arc<ChildObserver>>,
    // Child serials whose next queued transition is already counted in a reported tally.
    settled: Vec<u64>,
    alerts: Alerts,
    attributes: BTreeMap<String, Value>,
    observers: ObserverRegistry<dyn ResourceObserver>,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("key", &self.key)
            .field("tally", &self.tally)
            .field("state", &self.state)
            .field("members", &self.members)
            .field("observers", &self.observers)
            .finish()
    }
}

impl Resource {
    /// Validates `init` and subscribes a child observer for every listed member.
    /// Fails without touching `directory` if any required field is missing.
    pub fn new(init: ResourceInit, directory: &mut MemberDirectory) -> Result<Self, ResourceError> {
        let key = init.key();
        if !key.kind.is_collection() && key.id.is_none() {
            return Err(ResourceError::MissingField("id"));
        }
        let up = init.up.ok_or(ResourceError::MissingField("up"))?;
        let down = init.down.ok_or(ResourceError::MissingField("down"))?;
        let unknown = init.unknown.ok_or(ResourceError::MissingField("unknown"))?;
        let partial = if key.kind.tracks_partial() {
            Some(init.partial.ok_or(ResourceError::MissingField("partial"))?)
        } else {
            None
        };
        let list = init.list.ok_or(ResourceError::MissingField("list"))?;
        if list.iter().any(|m| m.id().is_empty()) {
            return Err(ResourceError::EmptyMemberId);
        }

        let tally = Tally {
            up,
            down,
            unknown,
            partial,
        };
        let mut members = Vec::with_capacity(list.len());
        let mut children = Vec::with_capacity(list.len());
        for member in &list {
            children.push(directory.watch(&key, member.id(), member.state()));
            members.push(member.id().to_string());
        }

        let resource = Self {
            key,
            tally,
            state: AggregateState::derive(&tally),
            members,
            children,
            settled: Vec::new(),
            alerts: Alerts::default(),
            attributes: BTreeMap::new(),
            observers: ObserverRegistry::new(),
        };
        resource.check_consistency("init");
        Ok(resource)
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn tally(&self) -> Tally {
        self.tally
    }

    pub fn state(&self) -> AggregateState {
        self.state
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn contains_member(&self, id: &str) -> bool {
        self.members.iter().any(|m| m == id)
    }

    /// Live child observers; always equal to `members().len()`.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn alerts(&self) -> &Alerts {
        &self.alerts
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn subscribe(&mut self, observer: SharedObserver) -> bool {
        self.observers.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, observer: &SharedObserver) -> bool {
        self.observers.unsubscribe(observer)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Tally buckets should always add up to the member count; upstream can break this.
    pub fn is_consistent(&self) -> bool {
        self.tally.total() == self.members.len() as u64
    }

    fn check_consistency(&self, operation: &'static str) {
        if !self.is_consistent() {
            warn!(
                resource = %self.key,
                operation = operation,
                tally_total = self.tally.total(),
                members = self.members.len(),
                "tally does not match member count"
            );
        }
    }

    /// Applies a diff event. Events addressed to another resource are ignored entirely.
    pub fn handle_change_event(
        &mut self,
        event: &ChangeEvent,
        directory: &mut MemberDirectory,
    ) -> EventOutcome {
        if event.key != self.key {
            debug!(
                resource = %self.key,
                addressed_to = %event.key,
                "ignoring event for another resource"
            );
            return EventOutcome::Ignored;
        }
        let mut summary = ChangeSummary::default();

        let old_tally = self.tally;
        let old_state = self.state;
        let mut tally = self.tally;
        if let Some(up) = event.tally.up {
            tally.up = up;
        }
        if let Some(down) = event.tally.down {
            tally.down = down;
        }
        if let Some(unknown) = event.tally.unknown {
            tally.unknown = unknown;
        }
        if let Some(partial) = event.tally.partial {
            if self.key.kind.tracks_partial() {
                tally.partial = Some(partial);
            } else {
                debug!(resource = %self.key, "partial count ignored for this resource type");
            }
        }

        let old_members = self.members.clone();
        let mut removed = Vec::new();
        for id in &event.removed {
            // Removing an id that is not present is tolerated.
            if let Some(pos) = self.members.iter().position(|m| m == id) {
                self.members.remove(pos);
                let child = self.children.remove(pos);
                self.settled.retain(|s| *s != child.serial());
                directory.unwatch(&child);
                removed.push(id.clone());
            }
        }
        let mut added = Vec::new();
        for member in &event.added {
            // No de-duplication: upstream is trusted not to re-add a present member.
            let child = directory.watch(&self.key, member.id(), member.state());
            self.children.push(child);
            self.members.push(member.id().to_string());
            added.push(member.id().to_string());
        }

        // Upstream sends the tally fields a member change affects along with the change,
        // so our own children's transitions from this event must not move buckets again.
        let tally_reported = !event.tally.is_empty();
        for change in &event.changed {
            if !directory.set_state(&change.id, change.state) {
                continue;
            }
            summary.members_changed += 1;
            if tally_reported {
                self.settled.extend(
                    self.children
                        .iter()
                        .filter(|c| c.member() == change.id)
                        .map(|c| c.serial()),
                );
            }
        }

        self.tally = tally;
        self.state = AggregateState::derive(&tally);
        summary.tally_changed = self.tally != old_tally;
        summary.list_changed = !added.is_empty() || !removed.is_empty();
        summary.state_changed = self.state != old_state;

        if summary.tally_changed {
            let new_tally = self.tally;
            self.observers
                .notify("tallyChange", |o| o.on_tally_change(&new_tally, &old_tally));
        }
        if summary.list_changed {
            let new_members = &self.members;
            self.observers.notify("listChange", |o| {
                o.on_list_change(new_members, &old_members, &added, &removed)
            });
        }
        if summary.state_changed {
            let new_state = self.state;
            self.observers
                .notify("stateChange", |o| o.on_state_change(new_state, old_state));
        }

        if let Some(alerts) = &event.alerts
            && *alerts != self.alerts
        {
            self.alerts = alerts.clone();
            summary.alerts_changed = true;
            self.observers
                .notify("alertsChange", |o| o.on_alerts_change(alerts));
        }

        for (name, value) in &event.attributes {
            let old = match value {
                Some(v) => self.attributes.insert(name.clone(), v.clone()),
                None => self.attributes.remove(name),
            };
            if old.as_ref() != value.as_ref() {
                summary.attributes_changed += 1;
                self.observers.notify("attributeChange", |o| {
                    o.on_attribute_change(name, value.as_ref(), old.as_ref())
                });
            }
        }

        if summary.tally_changed || summary.list_changed {
            self.check_consistency("change_event");
        }
        EventOutcome::Applied(summary)
    }

    /// Moves one member between tally buckets. Transitions from child observers this
    /// resource no longer holds, or already counted in a reported tally, are dropped.
    /// Returns true if the tally changed.
    pub fn apply_member_transition(
        &mut self,
        transition: &MemberTransition,
        directory: &MemberDirectory,
    ) -> bool {
        if !self.children.iter().any(|c| c.serial() == transition.serial) {
            debug!(
                resource = %self.key,
                member = %transition.member,
                "dropping transition from detached child"
            );
            return false;
        }
        if let Some(pos) = self.settled.iter().position(|s| *s == transition.serial) {
            self.settled.swap_remove(pos);
            debug!(
                resource = %self.key,
                member = %transition.member,
                "transition already counted in reported tally"
            );
            return false;
        }
        let tracks_partial = self.key.kind.tracks_partial();
        let to = transition.new.bucket(tracks_partial);
        let from = match transition.old {
            Some(old) => Some(old.bucket(tracks_partial)),
            None => self.unseeded_origin(&transition.member, to, directory),
        };
        if from == Some(to) {
            return false;
        }

        let old_tally = self.tally;
        let old_state = self.state;
        let decremented = match from {
            Some(bucket) => match self.tally.bucket_mut(bucket) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    true
                }
                _ => false,
            },
            None => false,
        };
        if !decremented {
            warn!(
                resource = %self.key,
                member = %transition.member,
                bucket = from.map_or("none", |b| b.as_str()),
                "tally underflow on member transition"
            );
        }
        if let Some(count) = self.tally.bucket_mut(to) {
            *count += 1;
        }
        self.state = AggregateState::derive(&self.tally);
        self.notify_tally_and_state(old_tally, old_state);
        true
    }

    /// Bucket an unseeded member was counted in. Subtracting every other seeded member
    /// from the tally leaves the buckets that hold unseeded ones; a reported change means
    /// the member was not already in `to`, so any other bucket wins.
    fn unseeded_origin(
        &self,
        member: &str,
        to: Bucket,
        directory: &MemberDirectory,
    ) -> Option<Bucket> {
        let tracks_partial = self.key.kind.tracks_partial();
        let mut unaccounted = self.tally;
        for id in self.members.iter().filter(|id| id.as_str() != member) {
            if let Some(state) = directory.seeded_state(id)
                && let Some(count) = unaccounted.bucket_mut(state.bucket(tracks_partial))
            {
                *count = count.saturating_sub(1);
            }
        }
        let holds = |bucket: Bucket| unaccounted.count(bucket).unwrap_or(0) > 0;
        [Bucket::Up, Bucket::Down, Bucket::Unknown, Bucket::Partial]
            .into_iter()
            .find(|b| *b != to && holds(*b))
            .or_else(|| holds(to).then_some(to))
    }

    /// Rebuilds the tally from member states when it no longer matches the member count
    /// and every member has a reported state. Returns true if the tally changed.
    pub fn reconcile(&mut self, directory: &MemberDirectory) -> bool {
        if self.is_consistent() {
            return false;
        }
        let tracks_partial = self.key.kind.tracks_partial();
        let mut tally = Tally {
            partial: self.tally.partial.map(|_| 0),
            ..Tally::default()
        };
        for id in &self.members {
            let Some(state) = directory.seeded_state(id) else {
                self.check_consistency("reconcile");
                return false;
            };
            if let Some(count) = tally.bucket_mut(state.bucket(tracks_partial)) {
                *count += 1;
            }
        }
        if tally == self.tally {
            return false;
        }
        debug!(
            resource = %self.key,
            old = ?self.tally,
            new = ?tally,
            "tally recounted from member states"
        );
        let old_tally = self.tally;
        let old_state = self.state;
        self.tally = tally;
        self.state = AggregateState::derive(&tally);
        self.notify_tally_and_state(old_tally, old_state);
        true
    }

    fn notify_tally_and_state(&self, old_tally: Tally, old_state: AggregateState) {
        let new_tally = self.tally;
        self.observers
            .notify("tallyChange", |o| o.on_tally_change(&new_tally, &old_tally));
        if self.state != old_state {
            let new_state = self.state;
            self.observers
                .notify("stateChange", |o| o.on_state_change(new_state, old_state));
        }
    }

    /// Releases every child observer, tells observers the resource is gone, and drops them.
    pub fn destroy(&mut self, directory: &mut MemberDirectory) {
        for child in self.children.drain(..) {
            directory.unwatch(&child);
        }
        self.members.clear();
        self.settled.clear();
        self.observers.notify("destroyed", |o| o.on_destroyed());
        self.observers.clear();
        debug!(resource = %self.key, "resource destroyed");
    }

    pub fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            kind: self.key.kind,
            id: self.key.id.clone(),
            tally: self.tally,
            state: self.state,
            members: self.members.clone(),
            alerts: self.alerts.clone(),
            attributes: self.attributes.clone(),
        }
    }
}
