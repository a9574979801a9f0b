//! Dependency tracking for `connect` edges between module instances.
//!
//! The host framework activates a module only after everything it connects
//! to is active, and deactivates dependents before the modules they rely on.
//! This graph answers the questions that follow from that rule:
//! - In which order are modules activated?
//! - Which modules go down when one module is reloaded?
//! - Is the station free of connect cycles?
//!
//! # Example
//!
//! ```rust
//! use qudi_station::station::dependencies::DependencyGraph;
//!
//! let mut graph = DependencyGraph::new();
//!
//! // Logic "scanner" uses hardware "nicard" in the "confocalscanner1" role
//! graph.add_assignment("scanner", "confocalscanner1", "nicard");
//! graph.add_assignment("scannergui", "confocallogic1", "scanner");
//!
//! assert_eq!(graph.load_order().unwrap(), vec!["nicard", "scanner", "scannergui"]);
//! assert!(graph.can_remove("nicard").is_err());
//! ```

use super::StationConfig;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

/// Modules that could not be ordered because they depend on each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    /// Every module on or behind a cycle, sorted
    pub members: Vec<String>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connect cycle among: {}", self.members.join(", "))
    }
}

impl std::error::Error for CycleError {}

/// Dependency graph of module instances.
///
/// - Maintains a map: `target` → set of `(module, role)` pairs
/// - Every name seen as module or target is a node, so isolated modules still
///   show up in the load order
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    // Maps target -> Set of (module, role)
    target_to_modules: HashMap<String, HashSet<(String, String)>>,
    nodes: BTreeSet<String>,
}

impl DependencyGraph {
    /// Creates a new empty dependency graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph of every `connect` edge in a station.
    ///
    /// Targets that name no module are still added as nodes; the validator
    /// reports them separately.
    pub fn from_station(station: &StationConfig) -> Self {
        let mut graph = Self::new();
        for module in &station.modules {
            graph.add_node(&module.name);
            for connection in &module.connect {
                graph.add_assignment(&module.name, &connection.role, &connection.target.instance);
            }
        }
        graph
    }

    /// Registers a module that may have no edges.
    pub fn add_node(&mut self, name: &str) {
        if !self.nodes.contains(name) {
            self.nodes.insert(name.to_string());
        }
    }

    /// Records that `module` uses `target` in `role`.
    ///
    /// If the assignment already exists, this is a no-op (sets are idempotent).
    pub fn add_assignment(&mut self, module: &str, role: &str, target: &str) {
        self.add_node(module);
        self.add_node(target);
        self.target_to_modules
            .entry(target.to_string())
            .or_default()
            .insert((module.to_string(), role.to_string()));
    }

    /// Removes all roles in which `module` uses `target`.
    pub fn remove_assignment(&mut self, module: &str, target: &str) {
        if let Some(modules) = self.target_to_modules.get_mut(target) {
            modules.retain(|(mid, _)| mid != module);
        }
    }

    /// Returns `(module, role)` for every direct user of `target`, sorted.
    pub fn get_dependents(&self, target: &str) -> Vec<(String, String)> {
        let mut dependents: Vec<(String, String)> = self
            .target_to_modules
            .get(target)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        dependents.sort();
        dependents
    }

    /// Checks if a module can be taken down without breaking another one.
    ///
    /// - `Ok(())` if nothing connects to `target`
    /// - `Err(modules)` with the direct users otherwise
    pub fn can_remove(&self, target: &str) -> Result<(), Vec<String>> {
        let dependents = self.get_dependents(target);
        if dependents.is_empty() {
            Ok(())
        } else {
            let mut modules: Vec<String> = dependents.into_iter().map(|(mid, _)| mid).collect();
            modules.dedup();
            Err(modules)
        }
    }

    /// Removes all dependency information for `target`.
    ///
    /// The node itself stays, as do edges where `target` is the user.
    pub fn remove_all(&mut self, target: &str) {
        self.target_to_modules.remove(target);
    }

    /// Sorted names of the modules `module` connects to directly.
    pub fn dependencies_of(&self, module: &str) -> Vec<String> {
        let mut deps: BTreeSet<&str> = BTreeSet::new();
        for (target, users) in &self.target_to_modules {
            if users.iter().any(|(mid, _)| mid == module) {
                deps.insert(target);
            }
        }
        deps.into_iter().map(str::to_string).collect()
    }

    /// All node names, sorted.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    /// Every `(module, role, target)` edge, sorted.
    pub fn edges(&self) -> Vec<(String, String, String)> {
        let mut edges: Vec<(String, String, String)> = self
            .target_to_modules
            .iter()
            .flat_map(|(target, users)| {
                users
                    .iter()
                    .map(move |(module, role)| (module.clone(), role.clone(), target.clone()))
            })
            .collect();
        edges.sort();
        edges
    }

    // module -> distinct targets
    fn forward(&self) -> BTreeMap<&str, BTreeSet<&str>> {
        let mut forward: BTreeMap<&str, BTreeSet<&str>> =
            self.nodes.iter().map(|n| (n.as_str(), BTreeSet::new())).collect();
        for (target, users) in &self.target_to_modules {
            for (module, _) in users {
                if let Some(targets) = forward.get_mut(module.as_str()) {
                    targets.insert(target.as_str());
                }
            }
        }
        forward
    }

    /// Activation order: every module after all modules it connects to.
    ///
    /// Kahn's algorithm with ties broken by name, so the order is stable
    /// across runs. A self-connection counts as a cycle.
    pub fn load_order(&self) -> Result<Vec<String>, CycleError> {
        let forward = self.forward();
        let mut pending: BTreeMap<&str, usize> =
            forward.iter().map(|(module, targets)| (*module, targets.len())).collect();

        let mut ready: BTreeSet<&str> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(module, _)| *module)
            .collect();
        let mut order = Vec::with_capacity(pending.len());

        while let Some(next) = ready.pop_first() {
            pending.remove(next);
            order.push(next.to_string());
            if let Some(users) = self.target_to_modules.get(next) {
                let distinct: BTreeSet<&str> = users.iter().map(|(m, _)| m.as_str()).collect();
                for user in distinct {
                    if let Some(count) = pending.get_mut(user) {
                        *count -= 1;
                        if *count == 0 {
                            ready.insert(user);
                        }
                    }
                }
            }
        }

        if pending.is_empty() {
            Ok(order)
        } else {
            Err(CycleError {
                members: pending.keys().map(|m| m.to_string()).collect(),
            })
        }
    }

    /// What must be active before `root`, in activation order, ending with `root`.
    pub fn activation_order(&self, root: &str) -> Result<Vec<String>, CycleError> {
        let forward = self.forward();
        let mut needed: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([root]);
        while let Some(module) = queue.pop_front() {
            if !needed.insert(module) {
                continue;
            }
            if let Some(targets) = forward.get(module) {
                queue.extend(targets.iter().copied());
            }
        }

        let mut subgraph = DependencyGraph::new();
        subgraph.add_node(root);
        for (module, role, target) in self.edges() {
            if needed.contains(module.as_str()) {
                subgraph.add_assignment(&module, &role, &target);
            }
        }
        subgraph.load_order()
    }

    /// Every module that directly or indirectly connects to `target`, sorted.
    pub fn transitive_dependents(&self, target: &str) -> Vec<String> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([target]);
        while let Some(current) = queue.pop_front() {
            if let Some(users) = self.target_to_modules.get(current) {
                for (user, _) in users {
                    if user != target && seen.insert(user.clone()) {
                        queue.push_back(user);
                    }
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Graphviz rendering; edges point from the user to the module it connects to.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph station {\n    rankdir=BT;\n");
        for node in &self.nodes {
            out.push_str(&format!("    \"{}\";\n", escape_dot(node)));
        }
        for (module, role, target) in self.edges() {
            out.push_str(&format!(
                "    \"{}\" -> \"{}\" [label=\"{}\"];\n",
                escape_dot(&module),
                escape_dot(&target),
                escape_dot(&role)
            ));
        }
        out.push_str("}\n");
        out
    }
}

fn escape_dot(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
