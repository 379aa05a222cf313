// klep-common/src/dependency/search.rs
//! Best-first search for one reference per dependency name.
//!
//! Names are decided one at a time in topological order, so by the time a
//! name is reached every node that could request it has already been chosen
//! or ruled out. A state is the prefix of choices made so far; a name nobody
//! active requests is skipped. Each choice costs the sum of its per-requester
//! penalties and hard conflicts prune the branch.
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::conflict::{ConflictResolver, ConflictSeverity, DependencyConflict};
use super::graph::{DependencyGraph, NodeId};
use super::reference::VersionReference;
use crate::config::Config;
use crate::error::{KlepError, Result};

/// Candidate wins arbitration against a request but is not what was asked for.
pub const SOFT_WIN_COST: u32 = 1;
/// Candidate overrides a request that would have won arbitration.
pub const SOFT_LOSS_COST: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Admissible heuristic; lowest-cost assignment. Used for full re-solves.
    #[default]
    Optimal,
    /// Weighted heuristic with goal test on generation. Used when adding
    /// one dependency to an already resolved project.
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchBackend {
    #[default]
    AStar,
    /// Depth-first backtracking with forward checking. Complete, but returns
    /// the first feasible assignment rather than the cheapest.
    SatFallback,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub mode: SearchMode,
    pub backend: SearchBackend,
    pub max_expansions: usize,
    pub aggressiveness: u32,
}

impl SearchOptions {
    pub fn new(mode: SearchMode) -> Self {
        Self {
            mode,
            backend: SearchBackend::AStar,
            max_expansions: 100_000,
            aggressiveness: 4,
        }
    }

    pub fn from_config(config: &Config, mode: SearchMode) -> Self {
        Self {
            mode,
            backend: SearchBackend::AStar,
            max_expansions: config.max_expansions,
            aggressiveness: config.fast_aggressiveness,
        }
    }

    pub fn with_backend(mut self, backend: SearchBackend) -> Self {
        self.backend = backend;
        self
    }

    fn weight(&self) -> u32 {
        match self.mode {
            SearchMode::Optimal => 1,
            SearchMode::Fast => self.aggressiveness.max(1),
        }
    }
}

/// One candidate tried for one name, with the hard conflicts that ruled it out.
#[derive(Debug, Clone)]
pub struct ResolutionAttempt {
    pub node: NodeId,
    pub version: VersionReference,
    pub conflicts: Vec<DependencyConflict>,
}

#[derive(Debug, Clone)]
pub struct AssignedName {
    pub name: String,
    pub url: String,
    pub node: NodeId,
    pub reference: VersionReference,
    /// References requested by the chosen requesters, in requester order.
    pub requests: Vec<VersionReference>,
    /// Reconciled disagreements between a request and the chosen reference.
    pub conflicts: Vec<DependencyConflict>,
}

impl AssignedName {
    pub fn warnings(&self) -> Vec<String> {
        self.conflicts.iter().map(DependencyConflict::warning).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub entries: Vec<AssignedName>,
    pub cost: u32,
    pub expansions: usize,
    pub mode: SearchMode,
}

impl Assignment {
    pub fn get(&self, name: &str) -> Option<&AssignedName> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn warnings(&self) -> Vec<String> {
        self.entries.iter().flat_map(AssignedName::warnings).collect()
    }
}

struct Slot {
    name: String,
    candidates: Vec<NodeId>,
    pin: Option<NodeId>,
}

#[derive(Debug, Clone)]
struct Frontier {
    f: u32,
    g: u32,
    seq: usize,
    choices: Vec<Option<NodeId>>,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    // BinaryHeap is a max-heap: lowest f first, then deepest, then oldest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .cmp(&self.f)
            .then_with(|| self.choices.len().cmp(&other.choices.len()))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Names for which some explored state had no feasible candidate.
#[derive(Default)]
struct Blocked {
    by_name: BTreeMap<usize, Vec<ResolutionAttempt>>,
}

impl Blocked {
    fn record(&mut self, slot: usize, attempts: Vec<ResolutionAttempt>) {
        self.by_name.entry(slot).or_default().extend(attempts);
    }

    fn into_error(self, slots: &[Slot], expansions: usize) -> KlepError {
        let mut conflicts: Vec<DependencyConflict> = Vec::new();
        for attempt in self.by_name.values().flatten() {
            for conflict in &attempt.conflicts {
                if !conflicts.iter().any(|c| c.same_pair(conflict)) {
                    conflicts.push(conflict.clone());
                }
            }
        }
        if conflicts.is_empty() {
            KlepError::SearchExhausted {
                expansions,
                blocked: self.by_name.keys().map(|&i| slots[i].name.clone()).collect(),
            }
        } else {
            KlepError::Conflict(conflicts)
        }
    }
}

pub struct ConstrainedSearch<'g> {
    graph: &'g DependencyGraph,
    slots: Vec<Slot>,
    options: SearchOptions,
}

impl<'g> ConstrainedSearch<'g> {
    pub fn new(graph: &'g DependencyGraph, options: SearchOptions) -> Self {
        let slots = graph
            .topological_names()
            .into_iter()
            .map(|name| {
                let mut candidates: Vec<NodeId> = Vec::new();
                for (_, child) in graph.requests_for(&name) {
                    if !candidates.contains(&child) {
                        candidates.push(child);
                    }
                }
                let pin = graph.pin(&name);
                if let Some(pin) = pin {
                    if !candidates.contains(&pin) {
                        candidates.push(pin);
                    }
                }
                Slot {
                    name,
                    candidates,
                    pin,
                }
            })
            .collect();
        Self {
            graph,
            slots,
            options,
        }
    }

    #[instrument(skip(self), fields(mode = ?self.options.mode, backend = ?self.options.backend, names = self.slots.len()))]
    pub fn run(&self) -> Result<Assignment> {
        match self.options.backend {
            SearchBackend::AStar => self.astar(),
            SearchBackend::SatFallback => self.backtracking(),
        }
    }

    fn astar(&self) -> Result<Assignment> {
        let weight = self.options.weight();
        let goal_on_generation = self.options.mode == SearchMode::Fast;
        let mut open = BinaryHeap::new();
        let mut blocked = Blocked::default();
        let mut expansions = 0usize;
        let mut seq = 0usize;

        let start = Vec::new();
        open.push(Frontier {
            f: weight * self.heuristic(&start),
            g: 0,
            seq,
            choices: start,
        });

        while let Some(state) = open.pop() {
            if state.choices.len() == self.slots.len() {
                return Ok(self.assignment(&state.choices, state.g, expansions));
            }
            expansions += 1;
            if expansions > self.options.max_expansions {
                warn!("Search budget of {} expansions exhausted", self.options.max_expansions);
                return Err(self.exhausted(&state.choices, expansions));
            }

            for (choice, step) in self.expand(&state.choices, &mut blocked) {
                let mut choices = state.choices.clone();
                choices.push(choice);
                let g = state.g + step;
                if goal_on_generation && choices.len() == self.slots.len() {
                    return Ok(self.assignment(&choices, g, expansions));
                }
                seq += 1;
                open.push(Frontier {
                    f: g + weight * self.heuristic(&choices),
                    g,
                    seq,
                    choices,
                });
            }
        }

        debug!("Open set exhausted after {} expansions", expansions);
        self.diagnose(&mut blocked);
        Err(blocked.into_error(&self.slots, expansions))
    }

    fn backtracking(&self) -> Result<Assignment> {
        let mut blocked = Blocked::default();
        let mut expansions = 0usize;
        let mut choices = Vec::with_capacity(self.slots.len());
        match self.descend(&mut choices, 0, &mut expansions, &mut blocked)? {
            Some(cost) => Ok(self.assignment(&choices, cost, expansions)),
            None => {
                self.diagnose(&mut blocked);
                Err(blocked.into_error(&self.slots, expansions))
            }
        }
    }

    fn descend(
        &self,
        choices: &mut Vec<Option<NodeId>>,
        g: u32,
        expansions: &mut usize,
        blocked: &mut Blocked,
    ) -> Result<Option<u32>> {
        if choices.len() == self.slots.len() {
            return Ok(Some(g));
        }
        *expansions += 1;
        if *expansions > self.options.max_expansions {
            return Err(self.exhausted(choices, *expansions));
        }
        for (choice, step) in self.expand(choices, blocked) {
            choices.push(choice);
            if self.supported(choices) {
                if let Some(cost) = self.descend(choices, g + step, expansions, blocked)? {
                    return Ok(Some(cost));
                }
            }
            choices.pop();
        }
        Ok(None)
    }

    /// Walks every name once, taking the cheapest feasible candidate and
    /// stepping over names that have none. Each name without a candidate is
    /// recorded, including names the search never reached behind an
    /// earlier blocked one.
    fn diagnose(&self, blocked: &mut Blocked) {
        let mut choices = Vec::with_capacity(self.slots.len());
        while choices.len() < self.slots.len() {
            let next = self
                .expand(&choices, blocked)
                .first()
                .and_then(|&(choice, _)| choice);
            choices.push(next);
        }
    }

    /// Forward check: every later name that already has requests keeps at
    /// least one candidate compatible with all of them.
    fn supported(&self, choices: &[Option<NodeId>]) -> bool {
        (choices.len()..self.slots.len()).all(|i| {
            let slot = &self.slots[i];
            let requests = self.active_requests(choices, &slot.name);
            requests.is_empty()
                || slot.candidates.iter().any(|&c| {
                    let candidate = &self.graph.node(c).version;
                    requests
                        .iter()
                        .all(|r| edge_cost(&slot.name, r, candidate).is_ok())
                })
        })
    }

    /// Successors of a prefix: the feasible choices for the next name with
    /// their step cost, cheapest first.
    fn expand(
        &self,
        choices: &[Option<NodeId>],
        blocked: &mut Blocked,
    ) -> Vec<(Option<NodeId>, u32)> {
        let index = choices.len();
        let slot = &self.slots[index];
        let requests = self.active_requests(choices, &slot.name);
        if requests.is_empty() {
            return vec![(None, 0)];
        }

        let mut feasible = Vec::new();
        let mut attempts = Vec::new();
        for &candidate in &slot.candidates {
            let version = &self.graph.node(candidate).version;
            let mut cost = 0u32;
            let mut hard = Vec::new();
            for request in &requests {
                match edge_cost(&slot.name, request, version) {
                    Ok(step) => cost += step,
                    Err(conflict) => hard.push(conflict),
                }
            }
            if hard.is_empty() {
                cost += self.pin_cost(slot, version);
                feasible.push((Some(candidate), cost));
            } else {
                attempts.push(ResolutionAttempt {
                    node: candidate,
                    version: version.clone(),
                    conflicts: hard,
                });
            }
        }

        if feasible.is_empty() {
            debug!(
                "No candidate for '{}' satisfies {} request(s)",
                slot.name,
                requests.len()
            );
            blocked.record(index, attempts);
        }
        feasible.sort_by_key(|&(_, cost)| cost);
        feasible
    }

    fn pin_cost(&self, slot: &Slot, candidate: &VersionReference) -> u32 {
        let Some(pin) = slot.pin else {
            return 0;
        };
        let pinned = &self.graph.node(pin).version;
        edge_cost(&slot.name, pinned, candidate).unwrap_or(SOFT_LOSS_COST)
    }

    /// References requested for `name` by the root and every chosen node.
    fn active_requests(&self, choices: &[Option<NodeId>], name: &str) -> Vec<VersionReference> {
        let root = self.graph.root();
        std::iter::once(root)
            .chain(choices.iter().flatten().copied())
            .filter_map(|requester| self.graph.node(requester).children.get(name))
            .map(|&child| self.graph.node(child).version.clone())
            .collect()
    }

    /// Count of undecided names whose known requests already contain a hard
    /// pair. Every candidate for such a name is hard against one side, and
    /// requests only accumulate, so a non-zero count marks a dead state.
    /// Dead states sort behind live ones and never reach the goal test.
    fn heuristic(&self, choices: &[Option<NodeId>]) -> u32 {
        (choices.len()..self.slots.len())
            .filter(|&i| {
                let name = &self.slots[i].name;
                let requests = self.active_requests(choices, name);
                requests.iter().enumerate().any(|(a, left)| {
                    requests[a + 1..]
                        .iter()
                        .any(|right| ConflictResolver::resolve(name, left, right).is_hard())
                })
            })
            .count() as u32
    }

    fn assignment(&self, choices: &[Option<NodeId>], cost: u32, expansions: usize) -> Assignment {
        let mut entries = Vec::new();
        for (slot, choice) in self.slots.iter().zip(choices) {
            let Some(node_id) = *choice else {
                continue;
            };
            let node = self.graph.node(node_id);
            let requests = self.active_requests(choices, &slot.name);
            let mut conflicts: Vec<DependencyConflict> = Vec::new();
            let mut seen: HashSet<String> = HashSet::new();
            let pinned = slot.pin.map(|p| self.graph.node(p).version.clone());
            for request in requests.iter().chain(pinned.iter()) {
                if matches!(edge_cost(&slot.name, request, &node.version), Ok(0)) {
                    continue;
                }
                if !seen.insert(request.key()) {
                    continue;
                }
                let conflict = DependencyConflict {
                    name: slot.name.clone(),
                    requested: request.clone(),
                    existing: node.version.clone(),
                    resolution: node.version.clone(),
                };
                debug!("Reconciled {}", conflict);
                conflicts.push(conflict);
            }
            entries.push(AssignedName {
                name: slot.name.clone(),
                url: node.url.clone(),
                node: node_id,
                reference: node.version.clone(),
                requests,
                conflicts,
            });
        }
        debug!(
            "Assignment found: {} name(s), cost {}, {} expansion(s)",
            entries.len(),
            cost,
            expansions
        );
        Assignment {
            entries,
            cost,
            expansions,
            mode: self.options.mode,
        }
    }

    fn exhausted(&self, choices: &[Option<NodeId>], expansions: usize) -> KlepError {
        KlepError::SearchExhausted {
            expansions,
            blocked: self.slots[choices.len()..]
                .iter()
                .map(|s| s.name.clone())
                .collect(),
        }
    }
}

/// Penalty for answering `request` with `candidate`, or the hard conflict
/// that rules the candidate out.
fn edge_cost(
    name: &str,
    request: &VersionReference,
    candidate: &VersionReference,
) -> std::result::Result<u32, DependencyConflict> {
    if candidate.satisfies(request) {
        return Ok(0);
    }
    let conflict = ConflictResolver::resolve(name, request, candidate);
    match conflict.severity() {
        ConflictSeverity::Hard => Err(conflict),
        _ if conflict.resolution.same_point(candidate) => Ok(SOFT_WIN_COST),
        _ => Ok(SOFT_LOSS_COST),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::graph::{DependencyNode, GraphArena};

    fn sv(raw: &str) -> VersionReference {
        VersionReference::parse_semver(raw).unwrap()
    }

    struct Fixture {
        arena: GraphArena,
        root: NodeId,
    }

    impl Fixture {
        fn new() -> Self {
            let mut arena = GraphArena::new();
            let root = arena.insert(DependencyNode::new("app", ".", VersionReference::hash("local"), "local"));
            Self { arena, root }
        }

        fn node(&mut self, name: &str, version: VersionReference) -> NodeId {
            let requested = version.spec_string();
            self.arena.insert(DependencyNode::new(
                name,
                format!("https://example.com/{name}"),
                version,
                requested,
            ))
        }

        fn link(&mut self, parent: NodeId, child: NodeId) {
            let name = self.arena.node(child).name.clone();
            self.arena.note_name(&name);
            self.arena.node_mut(parent).children.insert(name, child);
        }

        fn graph(self) -> DependencyGraph {
            self.arena.freeze(self.root).unwrap()
        }
    }

    /// app -> a -> lib ^1.2.0 -> util ^2.0.0
    /// app -> b -> lib ^1.0.0 -> util ^1.0.0
    /// app -> util ^1.0.0
    fn lower_floor_graph() -> DependencyGraph {
        let mut fx = Fixture::new();
        let root = fx.root;
        let a = fx.node("a", sv("1.0.0"));
        let b = fx.node("b", sv("1.0.0"));
        let util1 = fx.node("util", sv("^1.0.0"));
        let lib12 = fx.node("lib", sv("^1.2.0"));
        let lib10 = fx.node("lib", sv("^1.0.0"));
        let util2 = fx.node("util", sv("^2.0.0"));
        fx.link(root, a);
        fx.link(root, b);
        fx.link(root, util1);
        fx.link(a, lib12);
        fx.link(b, lib10);
        fx.link(lib12, util2);
        fx.link(lib10, util1);
        fx.graph()
    }

    #[test]
    fn overlapping_requests_resolve_without_conflict() {
        let mut fx = Fixture::new();
        let root = fx.root;
        let a = fx.node("a", sv("1.0.0"));
        let b = fx.node("b", sv("1.0.0"));
        let lib12 = fx.node("lib", sv("^1.2.0"));
        let lib10 = fx.node("lib", sv("^1.0.0"));
        fx.link(root, a);
        fx.link(root, b);
        fx.link(a, lib12);
        fx.link(b, lib10);
        let graph = fx.graph();

        let result = ConstrainedSearch::new(&graph, SearchOptions::new(SearchMode::Optimal))
            .run()
            .unwrap();
        assert_eq!(result.cost, 0);
        assert_eq!(result.get("lib").unwrap().reference, sv("^1.2.0"));
        assert!(result.warnings().is_empty());
    }

    #[test]
    fn incompatible_majors_report_the_blocking_conflict() {
        let mut fx = Fixture::new();
        let root = fx.root;
        let a = fx.node("a", sv("1.0.0"));
        let b = fx.node("b", sv("1.0.0"));
        let lib1 = fx.node("lib", sv("^1.0.0"));
        let lib2 = fx.node("lib", sv("^2.0.0"));
        fx.link(root, a);
        fx.link(root, b);
        fx.link(a, lib1);
        fx.link(b, lib2);
        let graph = fx.graph();

        for mode in [SearchMode::Optimal, SearchMode::Fast] {
            match ConstrainedSearch::new(&graph, SearchOptions::new(mode)).run() {
                Err(KlepError::Conflict(conflicts)) => {
                    assert_eq!(conflicts.len(), 1);
                    let c = &conflicts[0];
                    assert_eq!(c.name, "lib");
                    let sides = [c.requested.spec_string(), c.existing.spec_string()];
                    assert!(sides.contains(&"^1.0.0".to_string()));
                    assert!(sides.contains(&"^2.0.0".to_string()));
                }
                other => panic!("expected a conflict, got {other:?}"),
            }
        }
    }

    #[test]
    fn every_blocked_name_is_reported() {
        let mut fx = Fixture::new();
        let root = fx.root;
        let a = fx.node("a", sv("1.0.0"));
        let b = fx.node("b", sv("1.0.0"));
        let lib1 = fx.node("lib", sv("^1.0.0"));
        let lib2 = fx.node("lib", sv("^2.0.0"));
        let tool_main = fx.node("tool", VersionReference::branch("main"));
        let tool_dev = fx.node("tool", VersionReference::branch("develop"));
        fx.link(root, a);
        fx.link(root, b);
        fx.link(a, lib1);
        fx.link(b, lib2);
        fx.link(a, tool_main);
        fx.link(b, tool_dev);
        let graph = fx.graph();

        let backtracking =
            SearchOptions::new(SearchMode::Optimal).with_backend(SearchBackend::SatFallback);
        let runs = [
            SearchOptions::new(SearchMode::Optimal),
            SearchOptions::new(SearchMode::Fast),
            backtracking,
        ];
        for options in runs {
            match ConstrainedSearch::new(&graph, options).run() {
                Err(KlepError::Conflict(conflicts)) => {
                    let names: HashSet<&str> =
                        conflicts.iter().map(|c| c.name.as_str()).collect();
                    assert_eq!(names, HashSet::from(["lib", "tool"]));
                    assert_eq!(conflicts.iter().filter(|c| c.name == "tool").count(), 1);
                }
                other => panic!("expected a conflict, got {other:?}"),
            }
        }
    }

    #[test]
    fn optimal_mode_picks_the_lower_floor() {
        let graph = lower_floor_graph();
        let first = ConstrainedSearch::new(&graph, SearchOptions::new(SearchMode::Optimal))
            .run()
            .unwrap();
        let second = ConstrainedSearch::new(&graph, SearchOptions::new(SearchMode::Optimal))
            .run()
            .unwrap();

        assert_eq!(first.cost, second.cost);
        assert_eq!(first.cost, SOFT_LOSS_COST);
        assert_eq!(first.get("lib").unwrap().reference, sv("^1.0.0"));
        assert_eq!(first.get("util").unwrap().reference, sv("^1.0.0"));
        assert_eq!(first.warnings().len(), 1);
    }

    #[test]
    fn fast_mode_is_never_cheaper_and_expands_less() {
        let graph = lower_floor_graph();
        let optimal = ConstrainedSearch::new(&graph, SearchOptions::new(SearchMode::Optimal))
            .run()
            .unwrap();
        let fast = ConstrainedSearch::new(&graph, SearchOptions::new(SearchMode::Fast))
            .run()
            .unwrap();

        assert!(fast.cost >= optimal.cost);
        assert!(fast.expansions < optimal.expansions);
        assert_eq!(fast.get("util").unwrap().reference, sv("^1.0.0"));
    }

    #[test]
    fn backtracking_backend_finds_a_feasible_assignment() {
        let graph = lower_floor_graph();
        let options = SearchOptions::new(SearchMode::Optimal).with_backend(SearchBackend::SatFallback);
        let result = ConstrainedSearch::new(&graph, options).run().unwrap();
        assert_eq!(result.get("lib").unwrap().reference, sv("^1.0.0"));
        assert_eq!(result.get("util").unwrap().reference, sv("^1.0.0"));
    }

    #[test]
    fn unrequested_pins_are_skipped() {
        let mut fx = Fixture::new();
        let root = fx.root;
        let a = fx.node("a", sv("1.0.0"));
        let stale = fx.node("gone", VersionReference::hash("abcd1234"));
        fx.link(root, a);
        fx.arena.note_name("gone");
        fx.arena.set_pin("gone", stale);
        let graph = fx.graph();

        let result = ConstrainedSearch::new(&graph, SearchOptions::new(SearchMode::Fast))
            .run()
            .unwrap();
        assert!(result.get("gone").is_none());
        assert!(result.get("a").is_some());
    }

    #[test]
    fn pinned_commit_beats_latest() {
        let mut fx = Fixture::new();
        let root = fx.root;
        let latest = fx.node("lib", VersionReference::latest("ffff0000"));
        let pinned = fx.node("lib", VersionReference::hash("abcd1234"));
        fx.link(root, latest);
        fx.arena.set_pin("lib", pinned);
        let graph = fx.graph();

        let result = ConstrainedSearch::new(&graph, SearchOptions::new(SearchMode::Optimal))
            .run()
            .unwrap();
        let lib = result.get("lib").unwrap();
        assert_eq!(lib.reference, VersionReference::hash("abcd1234"));
        assert_eq!(lib.warnings().len(), 1);
        assert_eq!(result.cost, SOFT_WIN_COST);
    }

    #[test]
    fn expansion_budget_is_enforced() {
        let graph = lower_floor_graph();
        let mut options = SearchOptions::new(SearchMode::Optimal);
        options.max_expansions = 1;
        assert!(matches!(
            ConstrainedSearch::new(&graph, options).run(),
            Err(KlepError::SearchExhausted { .. })
        ));
    }
}
