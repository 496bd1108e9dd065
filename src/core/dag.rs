//! Dependency graph between tasks and the execution order derived from it.
//!
//! The graph arrives as an adjacency list produced by the oracle, mapping each
//! task key to the keys it depends on. [`GraphOrderer`] linearizes it with
//! Kahn's algorithm and falls back to lexicographic order whenever the graph
//! is empty, malformed, or cyclic. Which path was taken is reported in
//! [`OrderOutcome::path`].

use crate::core::task::TaskKey;
use crate::error::{Error, Result};
use crate::{mlog_debug, mlog_warn};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Adjacency list: task key -> the keys that must precede it.
///
/// Entries keep the order in which the payload listed them; that order
/// decides ties during topological sorting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyGraph {
    edges: Vec<(TaskKey, Vec<TaskKey>)>,
    malformed: Option<String>,
}

impl DependencyGraph {
    /// A graph with no nodes, used when construction failed.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a graph from `(node, prerequisites)` pairs.
    pub fn from_edges<I, K, P>(edges: I) -> Self
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        let mut graph = Self::default();
        for (node, prerequisites) in edges {
            let prerequisites = prerequisites.into_iter().map(TaskKey::new).collect();
            graph.insert(TaskKey::new(node), prerequisites);
        }
        graph
    }

    /// Interpret an extracted payload as an adjacency list.
    ///
    /// Never fails: a payload of the wrong shape produces a graph flagged as
    /// malformed, which the orderer treats as invalid.
    pub fn from_payload(payload: &Value) -> Self {
        let Some(object) = payload.as_object() else {
            return Self::malformed(format!("expected an object, got {}", kind_of(payload)));
        };

        let mut graph = Self::default();
        for (node, value) in object {
            let Some(items) = value.as_array() else {
                return Self::malformed(format!(
                    "dependencies of {} are {}, not a list",
                    node,
                    kind_of(value)
                ));
            };
            let mut prerequisites = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => prerequisites.push(TaskKey::new(s.as_str())),
                    Value::Number(n) => prerequisites.push(TaskKey::new(n.to_string())),
                    other => {
                        return Self::malformed(format!(
                            "dependency of {} is {}, not a task key",
                            node,
                            kind_of(other)
                        ))
                    }
                }
            }
            graph.insert(TaskKey::new(node.as_str()), prerequisites);
        }
        graph
    }

    fn malformed(reason: String) -> Self {
        Self {
            edges: Vec::new(),
            malformed: Some(reason),
        }
    }

    fn insert(&mut self, node: TaskKey, prerequisites: Vec<TaskKey>) {
        let mut seen = HashSet::new();
        let prerequisites: Vec<TaskKey> = prerequisites
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .collect();

        if let Some(entry) = self.edges.iter_mut().find(|(n, _)| *n == node) {
            entry.1 = prerequisites;
        } else {
            self.edges.push((node, prerequisites));
        }
    }

    /// True when the graph carries no entries at all.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Number of node entries, prerequisites aside.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_malformed(&self) -> bool {
        self.malformed.is_some()
    }

    pub fn malformed_reason(&self) -> Option<&str> {
        self.malformed.as_deref()
    }

    /// Prerequisites of `key`, empty when the key has no entry.
    pub fn prerequisites(&self, key: &str) -> &[TaskKey] {
        self.edges
            .iter()
            .find(|(n, _)| n.as_str() == key)
            .map(|(_, p)| p.as_slice())
            .unwrap_or(&[])
    }

    /// Number of dependency edges.
    pub fn edge_count(&self) -> usize {
        self.edges.iter().map(|(_, p)| p.len()).sum()
    }

    /// Every key mentioned by the graph, as a node or as a prerequisite, in
    /// the order first observed.
    pub fn nodes(&self) -> Vec<TaskKey> {
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for (node, prerequisites) in &self.edges {
            for key in std::iter::once(node).chain(prerequisites.iter()) {
                if seen.insert(key) {
                    nodes.push(key.clone());
                }
            }
        }
        nodes
    }

    /// Directed graph with edges pointing from prerequisite to dependent.
    ///
    /// Node indices follow [`DependencyGraph::nodes`] order.
    pub fn to_digraph(&self) -> (DiGraph<TaskKey, ()>, HashMap<TaskKey, NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for key in self.nodes() {
            let idx = graph.add_node(key.clone());
            index.insert(key, idx);
        }
        for (node, prerequisites) in &self.edges {
            for prerequisite in prerequisites {
                graph.add_edge(index[prerequisite], index[node], ());
            }
        }
        (graph, index)
    }

    pub fn is_cyclic(&self) -> bool {
        let (graph, _) = self.to_digraph();
        is_cyclic_directed(&graph)
    }

    /// Kahn's algorithm over the graph.
    ///
    /// Zero in-degree nodes are seeded in first-observed order; dependents are
    /// released in the order their entries appear in the payload.
    ///
    /// # Errors
    ///
    /// Returns `DependencyGraphInvalid` if the graph is malformed or cyclic.
    pub fn topological_order(&self) -> Result<Vec<TaskKey>> {
        if let Some(reason) = &self.malformed {
            return Err(Error::DependencyGraphInvalid(reason.clone()));
        }
        if self.is_cyclic() {
            return Err(Error::DependencyGraphInvalid(
                "dependency cycle detected".to_string(),
            ));
        }

        let nodes = self.nodes();
        let mut in_degree: HashMap<&TaskKey, usize> = nodes.iter().map(|n| (n, 0)).collect();
        let mut dependents: HashMap<&TaskKey, Vec<&TaskKey>> = HashMap::new();
        for (node, prerequisites) in &self.edges {
            for prerequisite in prerequisites {
                *in_degree.entry(node).or_default() += 1;
                dependents.entry(prerequisite).or_default().push(node);
            }
        }

        let mut queue: VecDeque<&TaskKey> = nodes
            .iter()
            .filter(|n| in_degree.get(n).copied() == Some(0))
            .collect();
        let mut order = Vec::with_capacity(nodes.len());

        while let Some(node) = queue.pop_front() {
            order.push(node.clone());
            for dependent in dependents.get(node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if order.len() != nodes.len() {
            return Err(Error::DependencyGraphInvalid(format!(
                "only {} of {} nodes could be ordered",
                order.len(),
                nodes.len()
            )));
        }
        Ok(order)
    }

    /// JSON form of the adjacency list.
    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for DependencyGraph {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.edges.len()))?;
        for (node, prerequisites) in &self.edges {
            map.serialize_entry(node, prerequisites)?;
        }
        map.end()
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// How an execution order was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPath {
    /// Kahn's algorithm over a valid graph.
    Topological,
    /// The graph had no entries; keys were sorted lexicographically.
    EmptyGraphFallback,
    /// The graph was malformed or cyclic; keys were sorted lexicographically.
    InvalidGraphFallback,
}

impl std::fmt::Display for OrderPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderPath::Topological => write!(f, "topological"),
            OrderPath::EmptyGraphFallback => write!(f, "empty_graph_fallback"),
            OrderPath::InvalidGraphFallback => write!(f, "invalid_graph_fallback"),
        }
    }
}

/// An execution order together with how it was derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderOutcome {
    /// Every known key exactly once.
    pub order: Vec<TaskKey>,
    pub path: OrderPath,
    /// Known keys the graph never mentioned, appended after the sorted prefix.
    pub appended: Vec<TaskKey>,
    /// Why the graph was rejected, on the invalid-graph path.
    pub invalid_reason: Option<String>,
}

impl OrderOutcome {
    pub fn used_fallback(&self) -> bool {
        self.path != OrderPath::Topological
    }
}

/// Computes execution orders from dependency graphs.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphOrderer;

impl GraphOrderer {
    pub fn new() -> Self {
        Self
    }

    /// Linearize `graph` over `known_keys`.
    ///
    /// Keys the graph names but `known_keys` lacks are dropped. Known keys
    /// the graph never resolves are appended in ascending order. Empty,
    /// malformed, and cyclic graphs fall back to all known keys in ascending
    /// order. A graph whose entries list no prerequisites counts as empty.
    pub fn order(&self, graph: &DependencyGraph, known_keys: &BTreeSet<TaskKey>) -> OrderOutcome {
        let lexicographic: Vec<TaskKey> = known_keys.iter().cloned().collect();

        if graph.edge_count() == 0 && !graph.is_malformed() {
            mlog_warn!(
                "[dag] dependency graph has no edges ({} entries), falling back to lexicographic order of {} keys",
                graph.len(),
                lexicographic.len()
            );
            return OrderOutcome {
                order: lexicographic,
                path: OrderPath::EmptyGraphFallback,
                appended: Vec::new(),
                invalid_reason: None,
            };
        }

        let sorted = match graph.topological_order() {
            Ok(sorted) => sorted,
            Err(e) => {
                mlog_warn!("[dag] {}, falling back to lexicographic order", e);
                return OrderOutcome {
                    order: lexicographic,
                    path: OrderPath::InvalidGraphFallback,
                    appended: Vec::new(),
                    invalid_reason: Some(e.to_string()),
                };
            }
        };

        let mut order: Vec<TaskKey> = sorted
            .into_iter()
            .filter(|key| known_keys.contains(key))
            .collect();
        let placed: HashSet<TaskKey> = order.iter().cloned().collect();
        let appended: Vec<TaskKey> = known_keys
            .iter()
            .filter(|key| !placed.contains(*key))
            .cloned()
            .collect();
        if !appended.is_empty() {
            mlog_debug!(
                "[dag] appending {} keys the graph never mentioned: {:?}",
                appended.len(),
                appended
            );
        }
        order.extend(appended.iter().cloned());

        OrderOutcome {
            order,
            path: OrderPath::Topological,
            appended,
            invalid_reason: None,
        }
    }
}
