// Member objects, their state feeds, and the child observers that bridge them to parents

use crate::observer::{MemberObserver, ObserverRegistry, ObserverResult};
use crate::tally::{MemberState, ResourceKey};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A member's state change as seen by one parent, queued until the next catalog turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberTransition {
    pub serial: u64,
    pub parent: ResourceKey,
    pub member: String,
    /// `None` when the member's state had never been reported (listed by bare id).
    pub old: Option<MemberState>,
    pub new: MemberState,
}

/// Per-member subscription owned by a parent resource. Holds only what it needs to route
/// the transition back to that parent.
#[derive(Debug)]
pub struct ChildObserver {
    serial: u64,
    parent: ResourceKey,
    member: String,
    tx: mpsc::UnboundedSender<MemberTransition>,
}

impl ChildObserver {
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn parent(&self) -> &ResourceKey {
        &self.parent
    }
}

impl MemberObserver for ChildObserver {
    fn on_state_change(
        &self,
        member: &str,
        new: MemberState,
        old: Option<MemberState>,
    ) -> ObserverResult {
        self.tx
            .send(MemberTransition {
                serial: self.serial,
                parent: self.parent.clone(),
                member: member.to_string(),
                old,
                new,
            })
            .map_err(|_| crate::observer::ObserverError::Closed)
    }
}

struct Member {
    state: MemberState,
    // False until a state is reported for the member; `state` is then a placeholder.
    seeded: bool,
    observers: ObserverRegistry<dyn MemberObserver>,
}

/// Owns every known member and its observer registry. Members are created on first watch
/// and pruned once nothing observes them.
pub struct MemberDirectory {
    members: HashMap<String, Member>,
    next_serial: u64,
    tx: mpsc::UnboundedSender<MemberTransition>,
    rx: mpsc::UnboundedReceiver<MemberTransition>,
}

impl Default for MemberDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemberDirectory {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            members: HashMap::new(),
            next_serial: 1,
            tx,
            rx,
        }
    }

    /// Creates a child observer for `parent` and subscribes it to `id`. An unseen member
    /// starts in `initial` (or unseeded `Unknown`); a known member keeps its current state
    /// unless it was never seeded.
    pub fn watch(
        &mut self,
        parent: &ResourceKey,
        id: &str,
        initial: Option<MemberState>,
    ) -> Arc<ChildObserver> {
        let serial = self.next_serial;
        self.next_serial += 1;
        let child = Arc::new(ChildObserver {
            serial,
            parent: parent.clone(),
            member: id.to_string(),
            tx: self.tx.clone(),
        });
        let member = self.members.entry(id.to_string()).or_insert_with(|| Member {
            state: initial.unwrap_or(MemberState::Unknown),
            seeded: initial.is_some(),
            observers: ObserverRegistry::new(),
        });
        if !member.seeded
            && let Some(state) = initial
        {
            member.state = state;
            member.seeded = true;
        }
        member.observers.subscribe(child.clone());
        child
    }

    /// Unsubscribes a child observer; prunes the member if it has no observers left.
    pub fn unwatch(&mut self, child: &Arc<ChildObserver>) {
        let as_observer: Arc<dyn MemberObserver> = child.clone();
        let now_empty = match self.members.get_mut(child.member()) {
            Some(member) => {
                member.observers.unsubscribe(&as_observer);
                member.observers.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.members.remove(child.member());
            tracing::debug!(member = child.member(), "member pruned");
        }
    }

    /// Subscribes an external observer (e.g. a server detail view) to a known member.
    pub fn subscribe(&mut self, id: &str, observer: Arc<dyn MemberObserver>) -> bool {
        match self.members.get_mut(id) {
            Some(member) => member.observers.subscribe(observer),
            None => false,
        }
    }

    pub fn unsubscribe(&mut self, id: &str, observer: &Arc<dyn MemberObserver>) -> bool {
        match self.members.get_mut(id) {
            Some(member) => member.observers.unsubscribe(observer),
            None => false,
        }
    }

    pub fn state(&self, id: &str) -> Option<MemberState> {
        self.members.get(id).map(|m| m.state)
    }

    /// Current state, but only for members whose state has actually been reported.
    pub fn seeded_state(&self, id: &str) -> Option<MemberState> {
        self.members
            .get(id)
            .filter(|m| m.seeded)
            .map(|m| m.state)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of observers (child or external) on a member.
    pub fn observer_count(&self, id: &str) -> usize {
        self.members.get(id).map_or(0, |m| m.observers.len())
    }

    /// Applies a state transition from the member's feed and notifies its observers.
    /// Returns false for unknown members and for no-op transitions. The first report for
    /// an unseeded member always notifies, with no old state.
    pub fn set_state(&mut self, id: &str, new: MemberState) -> bool {
        let Some(member) = self.members.get_mut(id) else {
            tracing::debug!(member = id, "state change for untracked member ignored");
            return false;
        };
        let old = member.seeded.then_some(member.state);
        if old == Some(new) {
            return false;
        }
        member.state = new;
        member.seeded = true;
        tracing::debug!(member = id, ?old, ?new, "member state changed");
        member
            .observers
            .notify("memberStateChange", |o| o.on_state_change(id, new, old));
        true
    }

    /// Removes and returns every queued transition, in the order they were produced.
    pub fn drain_transitions(&mut self) -> Vec<MemberTransition> {
        let mut out = Vec::new();
        while let Ok(t) = self.rx.try_recv() {
            out.push(t);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tally::ResourceType;

    fn servers() -> ResourceKey {
        ResourceKey::collection(ResourceType::Servers)
    }

    #[test]
    fn watch_creates_member_with_initial_state() {
        let mut dir = MemberDirectory::new();
        dir.watch(&servers(), "s1", Some(MemberState::Started));
        dir.watch(&servers(), "s2", None);
        assert_eq!(dir.state("s1"), Some(MemberState::Started));
        assert_eq!(dir.state("s2"), Some(MemberState::Unknown));
    }

    #[test]
    fn watch_does_not_overwrite_known_state() {
        let mut dir = MemberDirectory::new();
        dir.watch(&servers(), "s1", Some(MemberState::Started));
        dir.watch(
            &ResourceKey::named(ResourceType::Cluster, "c1"),
            "s1",
            Some(MemberState::Stopped),
        );
        assert_eq!(dir.state("s1"), Some(MemberState::Started));
        assert_eq!(dir.observer_count("s1"), 2);
    }

    #[test]
    fn state_change_queues_transition_per_child() {
        let mut dir = MemberDirectory::new();
        let a = dir.watch(&servers(), "s1", Some(MemberState::Stopped));
        let cluster = ResourceKey::named(ResourceType::Cluster, "c1");
        let b = dir.watch(&cluster, "s1", None);
        assert!(dir.set_state("s1", MemberState::Starting));
        let queued = dir.drain_transitions();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].serial, a.serial());
        assert_eq!(queued[0].old, Some(MemberState::Stopped));
        assert_eq!(queued[0].new, MemberState::Starting);
        assert_eq!(queued[1].serial, b.serial());
        assert_eq!(queued[1].parent, cluster);
        assert!(dir.drain_transitions().is_empty());
    }

    #[test]
    fn same_state_and_unknown_member_are_ignored() {
        let mut dir = MemberDirectory::new();
        dir.watch(&servers(), "s1", Some(MemberState::Started));
        assert!(!dir.set_state("s1", MemberState::Started));
        assert!(!dir.set_state("nope", MemberState::Started));
        assert!(dir.drain_transitions().is_empty());
    }

    #[test]
    fn unwatch_prunes_unobserved_members() {
        let mut dir = MemberDirectory::new();
        let a = dir.watch(&servers(), "s1", None);
        let b = dir.watch(&servers(), "s1", None);
        dir.unwatch(&a);
        assert_eq!(dir.observer_count("s1"), 1);
        dir.unwatch(&b);
        assert!(dir.is_empty());
        // Unwatching twice is harmless.
        dir.unwatch(&b);
    }

    #[test]
    fn unwatched_child_receives_no_transitions() {
        let mut dir = MemberDirectory::new();
        let a = dir.watch(&servers(), "s1", Some(MemberState::Stopped));
        let _b = dir.watch(&servers(), "s1", None);
        dir.unwatch(&a);
        dir.set_state("s1", MemberState::Started);
        let queued = dir.drain_transitions();
        assert_eq!(queued.len(), 1);
        assert_ne!(queued[0].serial, a.serial());
    }

    #[test]
    fn first_report_for_bare_member_has_no_old_state() {
        let mut dir = MemberDirectory::new();
        dir.watch(&servers(), "s1", None);
        assert_eq!(dir.seeded_state("s1"), None);
        // Reporting the placeholder state still counts as the first report.
        assert!(dir.set_state("s1", MemberState::Unknown));
        assert!(!dir.set_state("s1", MemberState::Unknown));
        let queued = dir.drain_transitions();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].old, None);
        assert_eq!(dir.seeded_state("s1"), Some(MemberState::Unknown));
    }

    #[test]
    fn later_watch_with_state_seeds_bare_member() {
        let mut dir = MemberDirectory::new();
        dir.watch(&servers(), "s1", None);
        dir.watch(
            &ResourceKey::named(ResourceType::Cluster, "c1"),
            "s1",
            Some(MemberState::Started),
        );
        assert_eq!(dir.seeded_state("s1"), Some(MemberState::Started));
        assert!(dir.drain_transitions().is_empty());
    }
}
