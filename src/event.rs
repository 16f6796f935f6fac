// Upstream diff events (validated at the boundary) and outgoing observer notifications

use crate::tally::{AggregateState, MemberState, ResourceKey, ResourceType, Tally};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("event has no type")]
    MissingType,
    #[error("unknown resource type {0:?}")]
    UnknownType(String),
    #[error("event names an empty member id")]
    EmptyMemberId,
}

/// Alert summary attached to a resource; replaced wholesale by each event carrying it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Alerts {
    pub count: u32,
    #[serde(default)]
    pub messages: Vec<String>,
}

/// Member reference as sent upstream: a bare id or `{id, state}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemberRef {
    Id(String),
    Entry {
        id: String,
        #[serde(default)]
        state: Option<MemberState>,
    },
}

impl MemberRef {
    pub fn id(&self) -> &str {
        match self {
            MemberRef::Id(id) => id,
            MemberRef::Entry { id, .. } => id,
        }
    }

    pub fn state(&self) -> Option<MemberState> {
        match self {
            MemberRef::Id(_) => None,
            MemberRef::Entry { state, .. } => *state,
        }
    }
}

impl From<&str> for MemberRef {
    fn from(id: &str) -> Self {
        MemberRef::Id(id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberStateChange {
    pub id: String,
    pub state: MemberState,
}

/// Tally fields carried by an event; only fields that changed upstream are present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TallyDiff {
    pub up: Option<u32>,
    pub down: Option<u32>,
    pub unknown: Option<u32>,
    pub partial: Option<u32>,
}

impl TallyDiff {
    pub fn is_empty(&self) -> bool {
        self.up.is_none() && self.down.is_none() && self.unknown.is_none() && self.partial.is_none()
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: Option<String>,
    id: Option<String>,
    up: Option<u32>,
    down: Option<u32>,
    unknown: Option<u32>,
    partial: Option<u32>,
    added: Option<Vec<MemberRef>>,
    removed: Option<Vec<String>>,
    changed: Option<Vec<MemberStateChange>>,
    alerts: Option<Alerts>,
    attributes: Option<serde_json::Map<String, Value>>,
}

/// A validated diff event addressed to one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub key: ResourceKey,
    pub tally: TallyDiff,
    pub added: Vec<MemberRef>,
    pub removed: Vec<String>,
    pub changed: Vec<MemberStateChange>,
    pub alerts: Option<Alerts>,
    /// `None` removes the attribute.
    pub attributes: Vec<(String, Option<Value>)>,
}

impl ChangeEvent {
    pub fn new(key: ResourceKey) -> Self {
        Self {
            key,
            tally: TallyDiff::default(),
            added: Vec::new(),
            removed: Vec::new(),
            changed: Vec::new(),
            alerts: None,
            attributes: Vec::new(),
        }
    }

    pub fn from_json(s: &str) -> Result<Self, EventError> {
        let value: Value = serde_json::from_str(s)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, EventError> {
        let raw: RawEvent = serde_json::from_value(value)?;
        let kind_str = raw.kind.ok_or(EventError::MissingType)?;
        let kind =
            ResourceType::parse(&kind_str).ok_or_else(|| EventError::UnknownType(kind_str))?;

        let added = raw.added.unwrap_or_default();
        let removed = raw.removed.unwrap_or_default();
        let changed = raw.changed.unwrap_or_default();
        if added.iter().any(|m| m.id().is_empty())
            || removed.iter().any(|id| id.is_empty())
            || changed.iter().any(|c| c.id.is_empty())
        {
            return Err(EventError::EmptyMemberId);
        }

        let attributes = raw
            .attributes
            .unwrap_or_default()
            .into_iter()
            .map(|(name, value)| match value {
                Value::Null => (name, None),
                v => (name, Some(v)),
            })
            .collect();

        // Collections are keyed by type alone.
        let id = if kind.is_collection() { None } else { raw.id };

        Ok(Self {
            key: ResourceKey { kind, id },
            tally: TallyDiff {
                up: raw.up,
                down: raw.down,
                unknown: raw.unknown,
                partial: raw.partial,
            },
            added,
            removed,
            changed,
            alerts: raw.alerts,
            attributes,
        })
    }

    pub fn with_tally(mut self, up: u32, down: u32, unknown: u32) -> Self {
        self.tally.up = Some(up);
        self.tally.down = Some(down);
        self.tally.unknown = Some(unknown);
        self
    }

    pub fn with_added<I, M>(mut self, added: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<MemberRef>,
    {
        self.added.extend(added.into_iter().map(Into::into));
        self
    }

    pub fn with_removed<I, S>(mut self, removed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.removed.extend(removed.into_iter().map(Into::into));
        self
    }

    pub fn with_changed(mut self, id: impl Into<String>, state: MemberState) -> Self {
        self.changed.push(MemberStateChange {
            id: id.into(),
            state,
        });
        self
    }

    /// True when the event touches the resource itself (not only member states).
    pub fn has_resource_changes(&self) -> bool {
        !self.tally.is_empty()
            || !self.added.is_empty()
            || !self.removed.is_empty()
            || self.alerts.is_some()
            || !self.attributes.is_empty()
    }
}

/// Observer notification as pushed to UI clients; tagged by `event`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Notification {
    #[serde(rename_all = "camelCase")]
    TallyChange {
        resource: ResourceKey,
        new: Tally,
        old: Tally,
    },
    #[serde(rename_all = "camelCase")]
    ListChange {
        resource: ResourceKey,
        new: Vec<String>,
        old: Vec<String>,
        added: Vec<String>,
        removed: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    StateChange {
        resource: ResourceKey,
        new: AggregateState,
        old: AggregateState,
    },
    #[serde(rename_all = "camelCase")]
    AlertsChange {
        resource: ResourceKey,
        alerts: Alerts,
    },
    #[serde(rename_all = "camelCase")]
    AttributeChange {
        resource: ResourceKey,
        name: String,
        new: Option<Value>,
        old: Option<Value>,
    },
    Destroyed { resource: ResourceKey },
}
