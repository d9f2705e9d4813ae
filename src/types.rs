use std::fmt;

/// A pod as seen by the watcher: enough to key the registry and request logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PodIdentity {
    pub name: String,
    pub namespace: String,
}

impl PodIdentity {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for PodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Pod lifecycle event delivered by a watch subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodEvent {
    Added(PodIdentity),
    Modified(PodIdentity),
    Deleted(PodIdentity),
    /// Bookmarks, server-side errors and anything else we don't act on.
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Streaming,
    Stopped,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamState::Connecting => "connecting",
            StreamState::Streaming => "streaming",
            StreamState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}
