// Tally counts, member states, and the aggregate state derived from them

use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource kinds as they appear in the upstream `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Servers,
    Clusters,
    Hosts,
    Applications,
    Runtimes,
    Cluster,
    Host,
    Application,
    Runtime,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Servers => "servers",
            ResourceType::Clusters => "clusters",
            ResourceType::Hosts => "hosts",
            ResourceType::Applications => "applications",
            ResourceType::Runtimes => "runtimes",
            ResourceType::Cluster => "cluster",
            ResourceType::Host => "host",
            ResourceType::Application => "application",
            ResourceType::Runtime => "runtime",
        }
    }

    /// Parse the wire name (e.g. "servers", "cluster").
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "servers" => Some(ResourceType::Servers),
            "clusters" => Some(ResourceType::Clusters),
            "hosts" => Some(ResourceType::Hosts),
            "applications" => Some(ResourceType::Applications),
            "runtimes" => Some(ResourceType::Runtimes),
            "cluster" => Some(ResourceType::Cluster),
            "host" => Some(ResourceType::Host),
            "application" => Some(ResourceType::Application),
            "runtime" => Some(ResourceType::Runtime),
            _ => None,
        }
    }

    /// Clusters and applications can be partially started, so their tallies carry `partial`.
    pub fn tracks_partial(&self) -> bool {
        matches!(
            self,
            ResourceType::Clusters
                | ResourceType::Applications
                | ResourceType::Cluster
                | ResourceType::Application
        )
    }

    /// Single resources are addressed by id; collections are not.
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            ResourceType::Servers
                | ResourceType::Clusters
                | ResourceType::Hosts
                | ResourceType::Applications
                | ResourceType::Runtimes
        )
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a resource in the catalog: a collection (`servers`) or a named single resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    #[serde(rename = "type")]
    pub kind: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ResourceKey {
    pub fn collection(kind: ResourceType) -> Self {
        Self { kind, id: None }
    }

    pub fn named(kind: ResourceType, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: Some(id.into()),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{}", self.kind, id),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// State of a single member (server, application instance). Unrecognized strings map to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberState {
    Started,
    Stopped,
    Starting,
    Stopping,
    PartiallyStarted,
    #[serde(other)]
    Unknown,
}

impl MemberState {
    /// Tally bucket this state counts toward. STARTING and STOPPING fold into `Down`.
    pub fn bucket(&self, tracks_partial: bool) -> Bucket {
        match self {
            MemberState::Started => Bucket::Up,
            MemberState::Stopped | MemberState::Starting | MemberState::Stopping => Bucket::Down,
            MemberState::PartiallyStarted if tracks_partial => Bucket::Partial,
            MemberState::PartiallyStarted => Bucket::Up,
            MemberState::Unknown => Bucket::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Up,
    Down,
    Unknown,
    Partial,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Up => "up",
            Bucket::Down => "down",
            Bucket::Unknown => "unknown",
            Bucket::Partial => "partial",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub up: u32,
    pub down: u32,
    pub unknown: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<u32>,
}

impl Tally {
    pub fn new(up: u32, down: u32, unknown: u32) -> Self {
        Self {
            up,
            down,
            unknown,
            partial: None,
        }
    }

    pub fn with_partial(mut self, partial: u32) -> Self {
        self.partial = Some(partial);
        self
    }

    /// Sum of all buckets; equals the member-list length when consistent.
    pub fn total(&self) -> u64 {
        self.up as u64 + self.down as u64 + self.unknown as u64 + self.partial.unwrap_or(0) as u64
    }

    pub fn count(&self, bucket: Bucket) -> Option<u32> {
        match bucket {
            Bucket::Up => Some(self.up),
            Bucket::Down => Some(self.down),
            Bucket::Unknown => Some(self.unknown),
            Bucket::Partial => self.partial,
        }
    }

    /// Mutable counter for a bucket, or `None` for `Partial` on a tally without one.
    pub fn bucket_mut(&mut self, bucket: Bucket) -> Option<&mut u32> {
        match bucket {
            Bucket::Up => Some(&mut self.up),
            Bucket::Down => Some(&mut self.down),
            Bucket::Unknown => Some(&mut self.unknown),
            Bucket::Partial => self.partial.as_mut(),
        }
    }

    pub fn state(&self) -> AggregateState {
        AggregateState::derive(self)
    }
}

/// Coarse status of a resource, computed only from its tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateState {
    Started,
    PartiallyStarted,
    Stopped,
}

impl AggregateState {
    /// An empty tally is `Stopped`; there is no separate "empty" state.
    pub fn derive(tally: &Tally) -> Self {
        let partial = tally.partial.unwrap_or(0);
        if partial > 0 {
            return AggregateState::PartiallyStarted;
        }
        if tally.up == 0 {
            return AggregateState::Stopped;
        }
        if tally.down == 0 && tally.unknown == 0 {
            AggregateState::Started
        } else {
            AggregateState::PartiallyStarted
        }
    }
}
