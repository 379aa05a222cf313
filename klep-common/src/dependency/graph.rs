// klep-common/src/dependency/graph.rs
//! Arena-backed dependency graph.
//!
//! Nodes are owned by the graph and addressed by [`NodeId`]; a parent refers
//! to its children by id, so diamonds share nodes and cycles never become
//! reference cycles. The graph is assembled in a [`GraphArena`] while the
//! builder runs and frozen into a [`DependencyGraph`] once it is complete.
use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, error};

use super::conflict::DependencyConflict;
use super::reference::VersionReference;
use crate::error::{KlepError, Result};

pub type NodeId = usize;

pub fn node_key(url: &str, version: &VersionReference) -> String {
    format!("{url}@{}", version.key())
}

#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub name: String,
    pub url: String,
    pub version: VersionReference,
    /// Version string as it was declared, before classification.
    pub requested: String,
    pub children: BTreeMap<String, NodeId>,
    pub warnings: Vec<String>,
    pub conflicts: Vec<DependencyConflict>,
}

impl DependencyNode {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        version: VersionReference,
        requested: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            version,
            requested: requested.into(),
            children: BTreeMap::new(),
            warnings: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    pub fn key(&self) -> String {
        node_key(&self.url, &self.version)
    }
}

/// Mutable graph under construction.
#[derive(Debug, Default)]
pub struct GraphArena {
    nodes: Vec<DependencyNode>,
    index: HashMap<String, NodeId>,
    order: Vec<String>,
    seen_names: HashSet<String>,
    pins: HashMap<String, NodeId>,
}

impl GraphArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, or returns the id of the node already stored under the same key.
    pub fn insert(&mut self, node: DependencyNode) -> NodeId {
        let key = node.key();
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = self.nodes.len();
        debug!("Graph node #{} = {}", id, key);
        self.nodes.push(node);
        self.index.insert(key, id);
        id
    }

    pub fn get(&self, key: &str) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    pub fn node(&self, id: NodeId) -> &DependencyNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut DependencyNode {
        &mut self.nodes[id]
    }

    /// Records the first time a dependency name is discovered.
    pub fn note_name(&mut self, name: &str) {
        if self.seen_names.insert(name.to_string()) {
            self.order.push(name.to_string());
        }
    }

    /// Marks `id` as the previously snapshotted choice for `name`. Pinned
    /// nodes are candidates for the search but not requests.
    pub fn set_pin(&mut self, name: &str, id: NodeId) {
        self.pins.insert(name.to_string(), id);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Validates and freezes the graph.
    pub fn freeze(self, root: NodeId) -> Result<DependencyGraph> {
        let graph = DependencyGraph {
            root,
            nodes: self.nodes,
            index: self.index,
            order: self.order,
            pins: self.pins,
        };
        graph.check_urls()?;
        if let Some(cycle) = graph.find_cycle() {
            error!("Dependency cycle detected: {}", cycle.join(" -> "));
            return Err(KlepError::Cycle(cycle));
        }
        Ok(graph)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Gray,
    Black,
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    root: NodeId,
    nodes: Vec<DependencyNode>,
    index: HashMap<String, NodeId>,
    order: Vec<String>,
    pins: HashMap<String, NodeId>,
}

impl DependencyGraph {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_node(&self) -> &DependencyNode {
        &self.nodes[self.root]
    }

    pub fn node(&self, id: NodeId) -> &DependencyNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &DependencyNode)> {
        self.nodes.iter().enumerate()
    }

    pub fn lookup(&self, url: &str, version: &VersionReference) -> Option<NodeId> {
        self.index.get(&node_key(url, version)).copied()
    }

    pub fn pin(&self, name: &str) -> Option<NodeId> {
        self.pins.get(name).copied()
    }

    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    /// Dependency names in the order they were first discovered.
    pub fn discovery_order(&self) -> &[String] {
        &self.order
    }

    /// Every `(requester, requested node)` edge pointing at `name`.
    pub fn requests_for(&self, name: &str) -> Vec<(NodeId, NodeId)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(id, n)| n.children.get(name).map(|&child| (id, child)))
            .collect()
    }

    fn name_edges(&self) -> HashMap<&str, Vec<&str>> {
        let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
        for node in &self.nodes {
            let entry = edges.entry(node.name.as_str()).or_default();
            for child in node.children.keys() {
                if !entry.contains(&child.as_str()) {
                    entry.push(child.as_str());
                }
            }
        }
        edges
    }

    /// Three-colour DFS over dependency names; returns the first cycle found,
    /// starting and ending with the repeated name.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let edges = self.name_edges();
        let mut colors: HashMap<&str, Color> = HashMap::new();
        let mut path: Vec<&str> = Vec::new();

        let root_name = self.root_node().name.as_str();
        let starts = std::iter::once(root_name).chain(self.order.iter().map(String::as_str));
        for start in starts {
            if colors.contains_key(start) {
                continue;
            }
            if let Some(cycle) = visit(start, &edges, &mut colors, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    /// Names ordered so that every requester's name precedes the names it
    /// requests; ties keep discovery order. The root is not included.
    pub fn topological_names(&self) -> Vec<String> {
        let edges = self.name_edges();
        let root_name = self.root_node().name.as_str();
        let mut in_degree: HashMap<&str, usize> =
            self.order.iter().map(|n| (n.as_str(), 0)).collect();
        for (from, tos) in &edges {
            if *from == root_name {
                continue;
            }
            for to in tos {
                if let Some(d) = in_degree.get_mut(to) {
                    *d += 1;
                }
            }
        }

        let mut placed: HashSet<&str> = HashSet::new();
        let mut sorted = Vec::with_capacity(self.order.len());
        while sorted.len() < self.order.len() {
            let next = self
                .order
                .iter()
                .map(String::as_str)
                .find(|n| !placed.contains(n) && in_degree.get(n) == Some(&0));
            let Some(next) = next else {
                // Only reachable with a cycle, which freeze() rejects.
                break;
            };
            placed.insert(next);
            sorted.push(next.to_string());
            if let Some(tos) = edges.get(next) {
                for to in tos {
                    if let Some(d) = in_degree.get_mut(to) {
                        *d = d.saturating_sub(1);
                    }
                }
            }
        }
        sorted
    }

    fn check_urls(&self) -> Result<()> {
        let mut urls: HashMap<&str, &str> = HashMap::new();
        for (id, node) in self.nodes() {
            if id == self.root {
                continue;
            }
            match urls.get(node.name.as_str()) {
                Some(url) if *url != node.url => {
                    return Err(KlepError::Argument(format!(
                        "dependency '{}' is requested from two repositories: '{}' and '{}'",
                        node.name, url, node.url
                    )));
                }
                Some(_) => {}
                None => {
                    urls.insert(node.name.as_str(), node.url.as_str());
                }
            }
        }
        Ok(())
    }
}

fn visit<'a>(
    name: &'a str,
    edges: &HashMap<&'a str, Vec<&'a str>>,
    colors: &mut HashMap<&'a str, Color>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    colors.insert(name, Color::Gray);
    path.push(name);
    if let Some(children) = edges.get(name) {
        for &child in children {
            match colors.get(child) {
                Some(Color::Gray) => {
                    let start = path.iter().position(|n| *n == child).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(child.to_string());
                    return Some(cycle);
                }
                Some(Color::Black) => {}
                None => {
                    if let Some(cycle) = visit(child, edges, colors, path) {
                        return Some(cycle);
                    }
                }
            }
        }
    }
    path.pop();
    colors.insert(name, Color::Black);
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, version: &str) -> DependencyNode {
        DependencyNode::new(
            name,
            format!("https://example.com/{name}"),
            VersionReference::parse_semver(version).unwrap(),
            version,
        )
    }

    fn link(arena: &mut GraphArena, parent: NodeId, child: NodeId) {
        let name = arena.node(child).name.clone();
        arena.note_name(&name);
        arena.node_mut(parent).children.insert(name, child);
    }

    #[test]
    fn diamonds_share_nodes_by_key() {
        let mut arena = GraphArena::new();
        let root = arena.insert(node("app", "1.0.0"));
        let a = arena.insert(node("a", "^1.0.0"));
        let b = arena.insert(node("b", "^1.0.0"));
        let lib = arena.insert(node("lib", "^1.0.0"));
        let again = arena.insert(node("lib", "^1.0.0"));
        assert_eq!(lib, again);
        link(&mut arena, root, a);
        link(&mut arena, root, b);
        link(&mut arena, a, lib);
        link(&mut arena, b, lib);

        let graph = arena.freeze(root).unwrap();
        assert_eq!(graph.index_len(), 4);
        assert_eq!(graph.requests_for("lib").len(), 2);
        assert_eq!(graph.topological_names(), vec!["a", "b", "lib"]);
    }

    #[test]
    fn name_cycles_are_reported_in_order() {
        let mut arena = GraphArena::new();
        let root = arena.insert(node("app", "1.0.0"));
        let a = arena.insert(node("a", "1.0.0"));
        let b = arena.insert(node("b", "1.0.0"));
        let c = arena.insert(node("c", "1.0.0"));
        let a2 = arena.insert(node("a", "2.0.0"));
        link(&mut arena, root, a);
        link(&mut arena, a, b);
        link(&mut arena, b, c);
        link(&mut arena, c, a2);

        match arena.freeze(root) {
            Err(KlepError::Cycle(cycle)) => assert_eq!(cycle, vec!["a", "b", "c", "a"]),
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn topological_order_puts_late_requesters_first() {
        let mut arena = GraphArena::new();
        let root = arena.insert(node("app", "1.0.0"));
        let lib = arena.insert(node("lib", "1.0.0"));
        let tool = arena.insert(node("tool", "1.0.0"));
        let lib_from_tool = arena.insert(node("lib", "1.1.0"));
        link(&mut arena, root, lib);
        link(&mut arena, root, tool);
        link(&mut arena, tool, lib_from_tool);

        let graph = arena.freeze(root).unwrap();
        assert_eq!(graph.discovery_order(), ["lib", "tool"]);
        assert_eq!(graph.topological_names(), vec!["tool", "lib"]);
    }

    #[test]
    fn one_name_two_repositories_is_rejected() {
        let mut arena = GraphArena::new();
        let root = arena.insert(node("app", "1.0.0"));
        let lib = arena.insert(node("lib", "1.0.0"));
        let mut fork = node("lib", "1.1.0");
        fork.url = "https://example.com/fork/lib".to_string();
        let fork = arena.insert(fork);
        link(&mut arena, root, lib);
        arena.node_mut(lib).children.insert("other".to_string(), fork);
        assert!(matches!(arena.freeze(root), Err(KlepError::Argument(_))));
    }
}
