//! Provenance records.
//!
//! A [`HistoryRecord`] is a tree of job invocations stored as a flat arena:
//! node 0 is the job itself, every other node is a (possibly nested) child
//! job, and parent/child links are indices into the arena. Records serialize
//! to a nested [`HistoryTree`] for persistence and read back into the same
//! arena shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::data::DataObjectHandle;
use crate::property::Direction;

pub type NodeId = usize;

/// The root node of every record.
pub const ROOT: NodeId = 0;

/// One property as it was when the job started, as a literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySnapshot {
    pub name: String,
    pub value: String,
    pub direction: Direction,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryNode {
    pub job_name: String,
    pub version: u32,
    pub execution_count: u64,
    pub execution_date: DateTime<Utc>,
    pub properties: Vec<PropertySnapshot>,
    pub duration_ns: u64,
    pub finished: bool,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl HistoryNode {
    /// Non-default properties as `(name, literal)` pairs, enough to configure
    /// a fresh instance of the same job.
    pub fn literals(&self) -> Vec<(String, String)> {
        self.properties
            .iter()
            .filter(|p| !p.is_default)
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    nodes: Vec<HistoryNode>,
}

impl HistoryRecord {
    pub fn root(&self) -> &HistoryNode {
        &self.nodes[ROOT]
    }

    pub fn node(&self, id: NodeId) -> Option<&HistoryNode> {
        self.nodes.get(id)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }

    /// Direct children of `id` in the order they were attached.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(id)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    /// Total number of invocations in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.root().finished
    }

    pub fn to_tree(&self) -> HistoryTree {
        self.subtree(ROOT)
    }

    fn subtree(&self, id: NodeId) -> HistoryTree {
        let node = &self.nodes[id];
        HistoryTree {
            job_name: node.job_name.clone(),
            version: node.version,
            execution_count: node.execution_count,
            execution_date: node.execution_date,
            properties: node.properties.clone(),
            duration_ns: node.duration_ns,
            children: node.children.iter().map(|&c| self.subtree(c)).collect(),
        }
    }

    pub fn from_tree(tree: &HistoryTree) -> Self {
        let mut record = Self { nodes: Vec::new() };
        record.push_tree(tree, None);
        record
    }

    fn push_tree(&mut self, tree: &HistoryTree, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(HistoryNode {
            job_name: tree.job_name.clone(),
            version: tree.version,
            execution_count: tree.execution_count,
            execution_date: tree.execution_date,
            properties: tree.properties.clone(),
            duration_ns: tree.duration_ns,
            finished: true,
            parent,
            children: Vec::new(),
        });
        for child in &tree.children {
            let child_id = self.push_tree(child, Some(id));
            self.nodes[id].children.push(child_id);
        }
        id
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.to_tree())
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let tree: HistoryTree = serde_json::from_str(json)?;
        Ok(Self::from_tree(&tree))
    }
}

/// Persisted shape of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTree {
    pub job_name: String,
    pub version: u32,
    pub execution_count: u64,
    pub execution_date: DateTime<Utc>,
    pub properties: Vec<PropertySnapshot>,
    pub duration_ns: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<HistoryTree>,
}

/// Builds records and attaches them to data objects.
pub struct HistoryRecorder;

impl HistoryRecorder {
    /// Opens a record for one invocation.
    pub fn begin(
        job_name: &str,
        version: u32,
        execution_count: u64,
        properties: Vec<PropertySnapshot>,
    ) -> HistoryRecord {
        HistoryRecord {
            nodes: vec![HistoryNode {
                job_name: job_name.to_string(),
                version,
                execution_count,
                execution_date: Utc::now(),
                properties,
                duration_ns: 0,
                finished: false,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// Grafts `child` (and everything under it) beneath `parent`'s root.
    pub fn attach_child(parent: &mut HistoryRecord, child: &HistoryRecord) {
        let offset = parent.nodes.len();
        for node in &child.nodes {
            let mut node = node.clone();
            node.parent = Some(node.parent.map_or(ROOT, |p| p + offset));
            for c in &mut node.children {
                *c += offset;
            }
            parent.nodes.push(node);
        }
        parent.nodes[ROOT].children.push(offset);
    }

    pub fn finish(record: &mut HistoryRecord, duration_ns: u64) {
        let root = &mut record.nodes[ROOT];
        root.duration_ns = duration_ns;
        root.finished = true;
    }

    /// Copies a finished record onto each output. Open records are never
    /// stamped.
    pub fn stamp_on_outputs(record: &HistoryRecord, outputs: &[DataObjectHandle]) {
        if !record.is_finished() {
            warn!(job = %record.root().job_name, "refusing to stamp an unfinished history record");
            return;
        }
        for output in outputs {
            output.add_history(record.clone());
        }
    }
}
