//! Long-term memory collaborator
//!
//! The session only calls into a store; merging, ranking and persistence
//! belong to the store implementation.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    User,
    Inference,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryNode {
    pub id: Uuid,
    pub entity: String,
    pub relation: String,
    pub value: String,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub source: MemorySource,
}

impl MemoryNode {
    pub fn new(entity: &str, relation: &str, value: &str, source: MemorySource) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            entity: entity.to_string(),
            relation: relation.to_string(),
            value: value.to_string(),
            confidence: 0.8,
            timestamp: now,
            last_accessed: now,
            source,
        }
    }

    /// `- entity relation value`, the line format used in prompts
    pub fn as_context_line(&self) -> String {
        format!("- {} {} {}", self.entity, self.relation, self.value)
    }
}

pub trait MemoryStore: Send + Sync {
    fn add_memory(&self, entity: &str, relation: &str, value: &str) -> anyhow::Result<MemoryNode>;

    /// Newline-joined relevant memories, possibly empty
    fn retrieve_context(&self, query: &str) -> anyhow::Result<String>;
}

/// Most nodes a [`VolatileMemory`] keeps before dropping the oldest
pub const MAX_NODES: usize = 1000;

/// Process-local store that forgets everything on exit.
///
/// Newest nodes sit at the front; past the capacity the oldest is dropped.
pub struct VolatileMemory {
    nodes: RwLock<Vec<MemoryNode>>,
    capacity: usize,
}

impl Default for VolatileMemory {
    fn default() -> Self {
        Self::with_capacity(MAX_NODES)
    }
}

impl VolatileMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn all(&self) -> Vec<MemoryNode> {
        self.nodes.read().clone()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl MemoryStore for VolatileMemory {
    fn add_memory(&self, entity: &str, relation: &str, value: &str) -> anyhow::Result<MemoryNode> {
        if entity.is_empty() || relation.is_empty() || value.is_empty() {
            anyhow::bail!("Invalid memory data: entity, relation and value are required");
        }

        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.iter_mut().find(|n| {
            n.entity.eq_ignore_ascii_case(entity) && n.relation.eq_ignore_ascii_case(relation)
        }) {
            let now = Utc::now();
            node.value = value.to_string();
            node.timestamp = now;
            node.last_accessed = now;
            node.confidence = (node.confidence + 0.1).min(1.0);
            return Ok(node.clone());
        }

        let node = MemoryNode::new(entity, relation, value, MemorySource::Inference);
        nodes.insert(0, node.clone());
        nodes.truncate(self.capacity);
        Ok(node)
    }

    fn retrieve_context(&self, query: &str) -> anyhow::Result<String> {
        let tokens: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .map(str::to_lowercase)
            .collect();
        if tokens.is_empty() {
            return Ok(String::new());
        }

        let mut nodes = self.nodes.write();
        let now = Utc::now();
        let lines: Vec<String> = nodes
            .iter_mut()
            .filter(|n| {
                let text = format!("{} {} {}", n.entity, n.relation, n.value).to_lowercase();
                tokens.iter().any(|t| text.contains(t.as_str()))
            })
            .map(|n| {
                n.last_accessed = now;
                n.as_context_line()
            })
            .collect();

        Ok(lines.join("\n"))
    }
}
