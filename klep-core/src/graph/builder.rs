// klep-core/src/graph/builder.rs
//! Concurrent construction of the transitive dependency graph.
//!
//! Every node is expanded by its own task: fetch the declarations at the
//! node's reference, classify each of them, and claim the children nobody
//! has claimed yet. Claims live in a shared colour map keyed by
//! `url@reference`, so a node reachable along several paths is fetched once.
//! Oracle calls run on the blocking pool under a semaphore and a deadline.
//!
//! Results are applied to the arena in breadth-first order regardless of the
//! order tasks finish in, which keeps node ids and discovery order stable
//! from run to run.
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use klep_common::config::Config;
use klep_common::dependency::conflict::{ConflictResolver, DependencyConflict};
use klep_common::dependency::definition::Dependency;
use klep_common::dependency::graph::{
    node_key, DependencyGraph, DependencyNode, GraphArena,
};
use klep_common::dependency::reference::{classify, VersionReference};
use klep_common::error::{KlepError, Result};
use klep_common::oracle::RepositoryOracle;
use klep_common::pipeline::ResolutionEvent;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, instrument, Instrument};

/// Address recorded for the virtual node standing in for the project.
pub const PROJECT_ROOT_URL: &str = ".";
const PROJECT_ROOT_REFERENCE: &str = "local";

/// A previously accepted reference offered to the search as an extra
/// candidate for `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    pub name: String,
    pub url: String,
    pub reference: VersionReference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// Claimed; declarations are being fetched.
    Gray,
    /// Expanded and applied to the arena.
    Black,
}

struct Shared {
    oracle: Arc<dyn RepositoryOracle>,
    semaphore: Arc<Semaphore>,
    query_timeout: Duration,
    colors: Mutex<HashMap<String, Color>>,
}

impl Shared {
    /// Claims `key` for expansion. Returns false when it is already claimed.
    fn claim(&self, key: &str) -> bool {
        let mut colors = self.colors.lock().unwrap_or_else(PoisonError::into_inner);
        if colors.contains_key(key) {
            return false;
        }
        colors.insert(key.to_string(), Color::Gray);
        true
    }

    fn finish(&self, key: &str) {
        let mut colors = self.colors.lock().unwrap_or_else(PoisonError::into_inner);
        colors.insert(key.to_string(), Color::Black);
    }

    /// Runs one blocking oracle call with a concurrency permit and a deadline.
    async fn query<T, F>(&self, address: &str, what: &str, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RepositoryOracle) -> Result<T> + Send + 'static,
    {
        let _permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| KlepError::Generic("oracle query semaphore closed".to_string()))?;
        let oracle = Arc::clone(&self.oracle);
        let handle = tokio::task::spawn_blocking(move || call(oracle.as_ref()));
        match tokio::time::timeout(self.query_timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(KlepError::Generic(format!(
                "{what} for '{address}' did not complete: {join_err}"
            ))),
            Err(_) => {
                error!("{} for '{}' timed out", what, address);
                Err(KlepError::repository(
                    address,
                    format!(
                        "{what} timed out after {}",
                        humantime::format_duration(self.query_timeout)
                    ),
                ))
            }
        }
    }
}

struct Job {
    key: String,
    name: String,
    url: String,
    reference: VersionReference,
    ancestors: Vec<String>,
    /// Declarations known up front (the project itself); fetched otherwise.
    declared: Option<Vec<Dependency>>,
}

struct Child {
    dependency: Dependency,
    reference: VersionReference,
    key: String,
}

struct Expansion {
    key: String,
    name: String,
    reference: VersionReference,
    /// Names from the root down to and including this node.
    chain: Vec<String>,
    children: Vec<Child>,
    conflicts: Vec<DependencyConflict>,
    /// Indices into `children` this task claimed and must have expanded.
    claimed: Vec<usize>,
}

pub struct GraphBuilder {
    oracle: Arc<dyn RepositoryOracle>,
    semaphore: Arc<Semaphore>,
    query_timeout: Duration,
    event_tx: Option<broadcast::Sender<ResolutionEvent>>,
}

impl GraphBuilder {
    pub fn new(oracle: Arc<dyn RepositoryOracle>, config: &Config) -> Self {
        Self::with_limits(oracle, config.max_concurrent_queries, config.query_timeout)
    }

    pub fn with_limits(
        oracle: Arc<dyn RepositoryOracle>,
        max_concurrent_queries: usize,
        query_timeout: Duration,
    ) -> Self {
        Self {
            oracle,
            semaphore: Arc::new(Semaphore::new(max_concurrent_queries.max(1))),
            query_timeout,
            event_tx: None,
        }
    }

    pub fn with_events(mut self, event_tx: broadcast::Sender<ResolutionEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Builds the graph below a single repository.
    #[instrument(skip(self))]
    pub async fn build(
        &self,
        root_name: &str,
        root_url: &str,
        root_version: &str,
    ) -> Result<DependencyGraph> {
        let shared = self.shared();
        let (url, raw) = (root_url.to_string(), root_version.to_string());
        let reference = shared
            .query(root_url, "reference classification", move |oracle| {
                classify(oracle, &url, &raw)
            })
            .await?;
        let root = DependencyNode::new(root_name, root_url, reference, root_version);
        self.run(shared, root, None, &[]).await
    }

    /// Builds the graph below a project: a virtual root whose children are
    /// `declared`, plus one extra node per pin.
    #[instrument(skip(self, declared, pins), fields(declared = declared.len(), pins = pins.len()))]
    pub async fn build_project(
        &self,
        project_name: &str,
        declared: &[Dependency],
        pins: &[Pin],
    ) -> Result<DependencyGraph> {
        let root = DependencyNode::new(
            project_name,
            PROJECT_ROOT_URL,
            VersionReference::hash(PROJECT_ROOT_REFERENCE),
            PROJECT_ROOT_REFERENCE,
        );
        self.run(self.shared(), root, Some(declared.to_vec()), pins)
            .await
    }

    fn shared(&self) -> Arc<Shared> {
        Arc::new(Shared {
            oracle: Arc::clone(&self.oracle),
            semaphore: Arc::clone(&self.semaphore),
            query_timeout: self.query_timeout,
            colors: Mutex::new(HashMap::new()),
        })
    }

    async fn run(
        &self,
        shared: Arc<Shared>,
        root: DependencyNode,
        declared: Option<Vec<Dependency>>,
        pins: &[Pin],
    ) -> Result<DependencyGraph> {
        let mut arena = GraphArena::new();
        let mut tasks: JoinSet<Result<Expansion>> = JoinSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();

        let root_key = root.key();
        let root_job = Job {
            key: root_key.clone(),
            name: root.name.clone(),
            url: root.url.clone(),
            reference: root.version.clone(),
            ancestors: Vec::new(),
            declared,
        };
        let root_id = arena.insert(root);
        shared.claim(&root_key);
        queue.push_back(root_key);
        spawn_expansion(&mut tasks, &shared, root_job);

        for pin in pins {
            let node = DependencyNode::new(
                &pin.name,
                &pin.url,
                pin.reference.clone(),
                pin.reference.spec_string(),
            );
            let key = node.key();
            let id = arena.insert(node);
            arena.set_pin(&pin.name, id);
            if shared.claim(&key) {
                debug!("Expanding snapshot pin {}", key);
                queue.push_back(key.clone());
                spawn_expansion(
                    &mut tasks,
                    &shared,
                    Job {
                        key,
                        name: pin.name.clone(),
                        url: pin.url.clone(),
                        reference: pin.reference.clone(),
                        ancestors: Vec::new(),
                        declared: None,
                    },
                );
            }
        }

        let mut pending: HashMap<String, Expansion> = HashMap::new();
        while let Some(head) = queue.front().cloned() {
            let Some(expansion) = pending.remove(&head) else {
                let Some(joined) = tasks.join_next().await else {
                    return Err(KlepError::Generic(format!(
                        "expansion of '{head}' was never scheduled"
                    )));
                };
                let expansion = joined.map_err(|e| {
                    KlepError::Generic(format!("graph expansion task failed: {e}"))
                })??;
                for &index in &expansion.claimed {
                    let child = &expansion.children[index];
                    spawn_expansion(
                        &mut tasks,
                        &shared,
                        Job {
                            key: child.key.clone(),
                            name: child.dependency.name.clone(),
                            url: child.dependency.url.clone(),
                            reference: child.reference.clone(),
                            ancestors: expansion.chain.clone(),
                            declared: None,
                        },
                    );
                }
                pending.insert(expansion.key.clone(), expansion);
                continue;
            };
            queue.pop_front();
            self.apply(&mut arena, &mut queue, expansion)?;
            shared.finish(&head);
        }

        let graph = arena.freeze(root_id)?;
        debug!(
            "Dependency graph complete: {} node(s), {} name(s)",
            graph.index_len(),
            graph.discovery_order().len()
        );
        self.emit(ResolutionEvent::GraphBuilt {
            nodes: graph.index_len(),
            names: graph.discovery_order().len(),
        });
        Ok(graph)
    }

    fn apply(
        &self,
        arena: &mut GraphArena,
        queue: &mut VecDeque<String>,
        expansion: Expansion,
    ) -> Result<()> {
        let parent = arena.get(&expansion.key).ok_or_else(|| {
            KlepError::Generic(format!("expanded node '{}' is not in the graph", expansion.key))
        })?;
        for child in expansion.children {
            let fresh = arena.get(&child.key).is_none();
            let id = arena.insert(DependencyNode::new(
                &child.dependency.name,
                &child.dependency.url,
                child.reference,
                &child.dependency.version,
            ));
            arena.note_name(&child.dependency.name);
            arena
                .node_mut(parent)
                .children
                .insert(child.dependency.name, id);
            if fresh {
                queue.push_back(child.key);
            }
        }
        let node = arena.node_mut(parent);
        node.warnings
            .extend(expansion.conflicts.iter().map(DependencyConflict::warning));
        node.conflicts.extend(expansion.conflicts);

        self.emit(ResolutionEvent::NodeFetched {
            name: expansion.name,
            reference: expansion.reference.to_string(),
        });
        Ok(())
    }

    fn emit(&self, event: ResolutionEvent) {
        if let Some(tx) = &self.event_tx {
            tx.send(event).ok();
        }
    }
}

fn spawn_expansion(tasks: &mut JoinSet<Result<Expansion>>, shared: &Arc<Shared>, job: Job) {
    let span = tracing::debug_span!("expand", node = %job.key);
    tasks.spawn(expand(Arc::clone(shared), job).instrument(span));
}

async fn expand(shared: Arc<Shared>, job: Job) -> Result<Expansion> {
    let declared = match job.declared {
        Some(declared) => declared,
        None => {
            let (url, reference) = (job.url.clone(), job.reference.clone());
            shared
                .query(&job.url, "dependency listing", move |oracle| {
                    oracle.declared_dependencies(&url, &reference)
                })
                .await?
        }
    };
    debug!("{} declares {} dependencies", job.key, declared.len());

    let mut chain = job.ancestors;
    chain.push(job.name.clone());
    for dep in &declared {
        dep.validate()?;
        if let Some(start) = chain.iter().position(|name| *name == dep.name) {
            let mut cycle = chain[start..].to_vec();
            cycle.push(dep.name.clone());
            error!("Dependency cycle detected: {}", cycle.join(" -> "));
            return Err(KlepError::Cycle(cycle));
        }
    }

    let references = classify_all(&shared, &declared).await?;

    let mut children: Vec<Child> = Vec::with_capacity(declared.len());
    let mut conflicts = Vec::new();
    for (dependency, reference) in declared.into_iter().zip(references) {
        let Some(index) = children
            .iter()
            .position(|c| c.dependency.name == dependency.name)
        else {
            children.push(Child {
                key: node_key(&dependency.url, &reference),
                dependency,
                reference,
            });
            continue;
        };
        let existing = &mut children[index];
        if existing.dependency.url != dependency.url {
            return Err(KlepError::Argument(format!(
                "'{}' declares '{}' from two repositories: '{}' and '{}'",
                job.name, dependency.name, existing.dependency.url, dependency.url
            )));
        }
        let conflict = ConflictResolver::resolve(&dependency.name, &reference, &existing.reference);
        debug!("Duplicate declaration in {}: {}", job.key, conflict);
        if conflict.resolution == reference {
            *existing = Child {
                key: node_key(&dependency.url, &reference),
                dependency,
                reference,
            };
        }
        conflicts.push(conflict);
    }

    let claimed = children
        .iter()
        .enumerate()
        .filter(|(_, child)| shared.claim(&child.key))
        .map(|(index, _)| index)
        .collect();

    Ok(Expansion {
        key: job.key,
        name: job.name,
        reference: job.reference,
        chain,
        children,
        conflicts,
        claimed,
    })
}

/// Classifies every declaration concurrently, results in declaration order.
async fn classify_all(shared: &Arc<Shared>, declared: &[Dependency]) -> Result<Vec<VersionReference>> {
    let mut lookups = JoinSet::new();
    for (index, dep) in declared.iter().enumerate() {
        let shared = Arc::clone(shared);
        let (url, raw) = (dep.url.clone(), dep.version.clone());
        lookups.spawn(async move {
            let address = url.clone();
            let result = shared
                .query(&address, "reference classification", move |oracle| {
                    classify(oracle, &url, &raw)
                })
                .await;
            (index, result)
        });
    }

    let mut references: Vec<Option<VersionReference>> = vec![None; declared.len()];
    while let Some(joined) = lookups.join_next().await {
        let (index, result) = joined
            .map_err(|e| KlepError::Generic(format!("classification task failed: {e}")))?;
        references[index] = Some(result?);
    }
    references
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| KlepError::Generic("a declaration was left unclassified".to_string()))
}
