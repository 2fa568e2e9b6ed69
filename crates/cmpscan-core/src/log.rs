//! Append-only log of agent messages for one page visit.

use parking_lot::RwLock;

use crate::messages::{AgentMessage, MessageKind};

/// Partial-match predicate over [`AgentMessage`]s.
///
/// A message matches when its kind equals [`MessageQuery::kind`] and, if a
/// CMP name is set, its `cmp` field equals that name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageQuery {
    /// Required message kind.
    pub kind: MessageKind,
    /// Required CMP identifier, if any.
    pub cmp: Option<String>,
}

impl MessageQuery {
    /// Match every message of `kind`.
    pub fn kind(kind: MessageKind) -> Self {
        Self { kind, cmp: None }
    }

    /// Additionally require the message to name `cmp`.
    #[must_use]
    pub fn with_cmp(mut self, cmp: impl Into<String>) -> Self {
        self.cmp = Some(cmp.into());
        self
    }

    /// Whether `msg` satisfies this query.
    pub fn matches(&self, msg: &AgentMessage) -> bool {
        if msg.kind() != self.kind {
            return false;
        }
        match &self.cmp {
            Some(want) => msg.cmp() == Some(want.as_str()),
            None => true,
        }
    }
}

/// Ordered record of every message received during a visit.
///
/// Order is receipt order. Entries are never revised or pruned; readers
/// get clones so polling never holds the lock across an await.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: RwLock<Vec<AgentMessage>>,
}

impl MessageLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a received message.
    pub fn append(&self, msg: AgentMessage) {
        self.entries.write().push(msg);
    }

    /// First message matching `query`, in receipt order.
    pub fn find(&self, query: &MessageQuery) -> Option<AgentMessage> {
        self.entries.read().iter().find(|m| query.matches(m)).cloned()
    }

    /// Every message matching `query`, in receipt order.
    pub fn find_all(&self, query: &MessageQuery) -> Vec<AgentMessage> {
        self.entries
            .read()
            .iter()
            .filter(|m| query.matches(m))
            .cloned()
            .collect()
    }

    /// Whether any message matches `query`.
    pub fn contains(&self, query: &MessageQuery) -> bool {
        self.entries.read().iter().any(|m| query.matches(m))
    }

    /// Number of messages received so far.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing has been received yet.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Copy of the full log.
    pub fn snapshot(&self) -> Vec<AgentMessage> {
        self.entries.read().clone()
    }
}
