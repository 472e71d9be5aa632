//! The triggering event for a run.
//!
//! An [`Event`] is captured once when a run starts and never changes
//! afterwards; every job condition is evaluated against that snapshot.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of event that triggered the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    Release,
    RepositoryDispatch,
    Manual,
    Schedule,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Push,
        EventKind::Release,
        EventKind::RepositoryDispatch,
        EventKind::Manual,
        EventKind::Schedule,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::Release => "release",
            EventKind::RepositoryDispatch => "repository_dispatch",
            EventKind::Manual => "manual",
            EventKind::Schedule => "schedule",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(EventKind::Push),
            "release" => Ok(EventKind::Release),
            "repository_dispatch" => Ok(EventKind::RepositoryDispatch),
            // `workflow_dispatch` is what most hosted CI systems call a manual run
            "manual" | "workflow_dispatch" => Ok(EventKind::Manual),
            "schedule" => Ok(EventKind::Schedule),
            other => Err(format!("unknown event kind: {}", other)),
        }
    }
}

/// Immutable snapshot of the triggering event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Event {
    pub kind: EventKind,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(rename = "ref", default)]
    pub git_ref: String,
    #[serde(default)]
    pub dispatch_type: Option<String>,
}

impl Event {
    pub fn new(kind: EventKind, git_ref: impl Into<String>) -> Self {
        Self {
            kind,
            action: None,
            git_ref: git_ref.into(),
            dispatch_type: None,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_dispatch_type(mut self, dispatch_type: impl Into<String>) -> Self {
        self.dispatch_type = Some(dispatch_type.into());
        self
    }

    /// Value of an attribute, `None` when the event does not carry it.
    pub fn attribute(&self, attribute: EventAttribute) -> Option<&str> {
        match attribute {
            EventAttribute::Kind => Some(self.kind.as_str()),
            EventAttribute::Action => self.action.as_deref(),
            EventAttribute::Ref => Some(self.git_ref.as_str()),
            EventAttribute::DispatchType => self.dispatch_type.as_deref(),
        }
    }
}

/// Event attributes a job condition may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventAttribute {
    Kind,
    Action,
    Ref,
    DispatchType,
}

impl EventAttribute {
    /// Resolve a condition path such as `event.ref` or `github.event_name`.
    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            "event.kind" | "github.event_name" => Some(EventAttribute::Kind),
            "event.action" | "github.event.action" => Some(EventAttribute::Action),
            "event.ref" | "github.ref" => Some(EventAttribute::Ref),
            "event.dispatch_type" | "github.event.action_type" => {
                Some(EventAttribute::DispatchType)
            }
            _ => None,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            EventAttribute::Kind => "event.kind",
            EventAttribute::Action => "event.action",
            EventAttribute::Ref => "event.ref",
            EventAttribute::DispatchType => "event.dispatch_type",
        }
    }
}

impl fmt::Display for EventAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}
