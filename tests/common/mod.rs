// Shared test helpers

use admin_tally::event::Alerts;
use admin_tally::observer::{ObserverResult, ResourceObserver};
use admin_tally::tally::{AggregateState, Tally};
use serde_json::Value;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Tally {
        new: Tally,
        old: Tally,
    },
    List {
        new: Vec<String>,
        old: Vec<String>,
        added: Vec<String>,
        removed: Vec<String>,
    },
    State {
        new: AggregateState,
        old: AggregateState,
    },
    Alerts(Alerts),
    Attribute {
        name: String,
        new: Option<Value>,
        old: Option<Value>,
    },
    Destroyed,
}

/// Observer that records every hook invocation, like a UI widget would re-render.
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<Call>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn tally_calls(&self) -> Vec<(Tally, Tally)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Tally { new, old } => Some((new, old)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: Call) -> ObserverResult {
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

impl ResourceObserver for Recorder {
    fn on_tally_change(&self, new: &Tally, old: &Tally) -> ObserverResult {
        self.push(Call::Tally {
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
        self.push(Call::List {
            new: new.to_vec(),
            old: old.to_vec(),
            added: added.to_vec(),
            removed: removed.to_vec(),
        })
    }

    fn on_state_change(&self, new: AggregateState, old: AggregateState) -> ObserverResult {
        self.push(Call::State { new, old })
    }

    fn on_alerts_change(&self, alerts: &Alerts) -> ObserverResult {
        self.push(Call::Alerts(alerts.clone()))
    }

    fn on_attribute_change(
        &self,
        name: &str,
        new: Option<&Value>,
        old: Option<&Value>,
    ) -> ObserverResult {
        self.push(Call::Attribute {
            name: name.to_string(),
            new: new.cloned(),
            old: old.cloned(),
        })
    }

    fn on_destroyed(&self) -> ObserverResult {
        self.push(Call::Destroyed)
    }
}

pub fn strings(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}
