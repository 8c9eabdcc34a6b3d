//! Per-domain directed graph.
//!
//! Every domain owns a [`DomainGraph`] rebuilt from the device registry on
//! each topology change. Alongside the full graph it keeps a switch-only
//! subgraph whose edges are numbered in discovery order, which gives every
//! switch-to-switch link a flat index.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::OnceLock;

use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::error::{TopologyError, TopologyResult};

/// Shortest paths from one source: destination -> node list (source first).
pub type PathMap = IndexMap<String, Vec<String>>;

#[derive(Debug, Default)]
struct NamedGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl NamedGraph {
    fn add_node(&mut self, name: &str) -> NodeIndex {
        if let Some(idx) = self.index.get(name) {
            return *idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.index.insert(name.to_string(), idx);
        idx
    }

    fn has_edge(&self, a: &str, b: &str) -> bool {
        match (self.index.get(a), self.index.get(b)) {
            (Some(a), Some(b)) => self.graph.contains_edge(*a, *b),
            _ => false,
        }
    }

    fn add_edge(&mut self, a: &str, b: &str) {
        let a = self.add_node(a);
        let b = self.add_node(b);
        self.graph.add_edge(a, b, ());
    }

    /// Outgoing neighbours in edge insertion order.
    fn successors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        // petgraph walks adjacency lists newest first
        let mut out: Vec<NodeIndex> = self.graph.neighbors(idx).collect();
        out.reverse();
        out
    }
}

/// Directed graph of one domain.
#[derive(Debug, Default)]
pub struct DomainGraph {
    domain: u32,
    main: NamedGraph,
    switches: NamedGraph,
    switch_names: HashSet<String>,
    links: IndexMap<String, u32>,
    next_link: u32,
    paths: OnceLock<HashMap<String, PathMap>>,
}

impl DomainGraph {
    pub fn new(domain: u32) -> Self {
        Self {
            domain,
            next_link: 1,
            ..Default::default()
        }
    }

    pub fn domain(&self) -> u32 {
        self.domain
    }

    /// Adds `name`; switches also join the switch subgraph. Idempotent.
    pub fn add_node(&mut self, name: &str, is_switch: bool) {
        self.main.add_node(name);
        if is_switch {
            self.switches.add_node(name);
            self.switch_names.insert(name.to_string());
        }
        self.paths = OnceLock::new();
    }

    /// Adds the directed edge `a -> b`. Idempotent.
    ///
    /// Endpoints not yet added are created as non-switch nodes. If both
    /// endpoints are switches, the edge also enters the switch subgraph and
    /// receives the next link number.
    pub fn add_edge(&mut self, a: &str, b: &str) {
        if self.main.has_edge(a, b) {
            return;
        }
        self.main.add_edge(a, b);
        if self.switch_names.contains(a) && self.switch_names.contains(b) {
            self.switches.add_edge(a, b);
            self.links.insert(link_name(a, b), self.next_link);
            self.next_link += 1;
        }
        self.paths = OnceLock::new();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.main.index.contains_key(name)
    }

    pub fn has_edge(&self, a: &str, b: &str) -> bool {
        self.main.has_edge(a, b)
    }

    /// Node names in insertion order.
    pub fn nodes(&self) -> Vec<&str> {
        self.main
            .graph
            .node_indices()
            .map(|idx| self.main.graph[idx].as_str())
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.main.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.main.graph.edge_count()
    }

    pub fn switch_count(&self) -> usize {
        self.switches.graph.node_count()
    }

    /// Link name -> link number, in discovery order.
    pub fn links(&self) -> &IndexMap<String, u32> {
        &self.links
    }

    /// All-pairs shortest paths by hop count.
    ///
    /// Each source maps to itself with a one-node path. Ties go to the path
    /// found first when neighbours are visited in edge insertion order.
    pub fn shortest_paths(&self) -> &HashMap<String, PathMap> {
        self.paths.get_or_init(|| {
            self.main
                .graph
                .node_indices()
                .map(|idx| (self.main.graph[idx].clone(), self.bfs(idx)))
                .collect()
        })
    }

    /// Shortest paths from `source`; empty if `source` is not in the graph.
    pub fn shortest_paths_from(&self, source: &str) -> Option<&PathMap> {
        self.shortest_paths().get(source)
    }

    /// Second node on the shortest path from `start` to `dest`.
    pub fn next_hop(&self, start: &str, dest: &str) -> TopologyResult<&str> {
        self.shortest_paths()
            .get(start)
            .and_then(|paths| paths.get(dest))
            .filter(|path| path.len() >= 2)
            .map(|path| path[1].as_str())
            .ok_or_else(|| TopologyError::next_hop_not_found(start, dest, self.domain))
    }

    /// Switch-subgraph links ending at `node`, as `"a-b"`.
    pub fn incoming_adjacencies(&self, node: &str) -> Vec<String> {
        let graph = &self.switches.graph;
        graph
            .edge_references()
            .filter(|e| graph[e.target()] == node)
            .map(|e| link_name(&graph[e.source()], &graph[e.target()]))
            .collect()
    }

    /// Flat index of `link`: its link number offset by the switch count.
    pub fn link_to_number(&self, link: &str) -> TopologyResult<u32> {
        let number = self.links.get(link).ok_or_else(|| TopologyError::LinkNotFound {
            link: link.to_string(),
            domain: self.domain,
        })?;
        Ok(number + self.switch_count() as u32)
    }

    fn bfs(&self, source: NodeIndex) -> PathMap {
        let graph = &self.main.graph;
        let mut paths = PathMap::new();
        paths.insert(graph[source].clone(), vec![graph[source].clone()]);

        let mut queue = VecDeque::from([source]);
        while let Some(node) = queue.pop_front() {
            let base = paths.get(&graph[node]).cloned().unwrap_or_default();
            for next in self.main.successors(node) {
                let name = &graph[next];
                if paths.contains_key(name) {
                    continue;
                }
                let mut path = base.clone();
                path.push(name.clone());
                paths.insert(name.clone(), path);
                queue.push_back(next);
            }
        }
        paths
    }
}

/// Name of the directed link `a -> b`.
pub fn link_name(a: &str, b: &str) -> String {
    format!("{}-{}", a, b)
}
