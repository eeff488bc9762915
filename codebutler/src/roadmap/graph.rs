//! Dependency graph over roadmap items.
//!
//! The graph keeps both adjacency (item → its dependencies) and reverse
//! adjacency (item → its dependents), so completion cascades only scan
//! direct dependents. It is rebuilt from the roadmap on every scheduler
//! tick — cheap at realistic sizes — which keeps it consistent with status
//! changes made anywhere else.

use std::collections::{BTreeMap, HashMap};

use super::{ItemStatus, Roadmap};

#[derive(Debug, Clone)]
struct Node {
    status: ItemStatus,
    depends_on: Vec<u32>,
}

/// Immutable dependency view of a [`Roadmap`].
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: BTreeMap<u32, Node>,
    dependents: BTreeMap<u32, Vec<u32>>,
}

impl DependencyGraph {
    /// Build the graph from the roadmap's current state.
    #[must_use]
    pub fn new(roadmap: &Roadmap) -> Self {
        let mut nodes = BTreeMap::new();
        let mut dependents: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for item in &roadmap.items {
            nodes.insert(
                item.number,
                Node {
                    status: item.status,
                    depends_on: item.depends_on.clone(),
                },
            );
            for dep in &item.depends_on {
                dependents.entry(*dep).or_default().push(item.number);
            }
        }
        Self { nodes, dependents }
    }

    /// Number of items in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the graph has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn deps_all_done(&self, number: u32) -> bool {
        self.nodes[&number].depends_on.iter().all(|dep| {
            self.nodes
                .get(dep)
                .is_some_and(|node| node.status == ItemStatus::Done)
        })
    }

    /// Pending items whose every listed dependency exists and is done,
    /// in ascending number order.
    #[must_use]
    pub fn unblocked(&self) -> Vec<u32> {
        self.nodes
            .iter()
            .filter(|(number, node)| {
                node.status == ItemStatus::Pending && self.deps_all_done(**number)
            })
            .map(|(number, _)| *number)
            .collect()
    }

    /// Of the direct dependents of `completed`, those that are now fully
    /// unblocked.
    #[must_use]
    pub fn newly_unblocked(&self, completed: u32) -> Vec<u32> {
        let Some(dependents) = self.dependents.get(&completed) else {
            return Vec::new();
        };
        let mut out: Vec<u32> = dependents
            .iter()
            .filter(|number| {
                self.nodes
                    .get(number)
                    .is_some_and(|node| node.status == ItemStatus::Pending)
                    && self.deps_all_done(**number)
            })
            .copied()
            .collect();
        out.sort_unstable();
        out
    }

    /// Whether the dependency relation has a cycle.
    #[must_use]
    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// Find one item on a dependency cycle, if any. Three-color DFS.
    #[must_use]
    pub fn find_cycle(&self) -> Option<u32> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn visit(
            graph: &DependencyGraph,
            number: u32,
            colors: &mut HashMap<u32, Color>,
        ) -> Option<u32> {
            colors.insert(number, Color::Gray);
            for dep in &graph.nodes[&number].depends_on {
                match colors.get(dep).copied().unwrap_or(Color::White) {
                    Color::Gray => return Some(*dep),
                    Color::White if graph.nodes.contains_key(dep) => {
                        if let Some(hit) = visit(graph, *dep, colors) {
                            return Some(hit);
                        }
                    }
                    _ => {}
                }
            }
            colors.insert(number, Color::Black);
            None
        }

        let mut colors = HashMap::new();
        for number in self.nodes.keys() {
            if colors.get(number).copied().unwrap_or(Color::White) == Color::White
                && let Some(hit) = visit(self, *number, &mut colors)
            {
                return Some(hit);
            }
        }
        None
    }

    /// Dependency-first linearization. Deterministic: among ready items the
    /// smallest number goes first. Errors when a cycle exists.
    pub fn topological_order(&self) -> Result<Vec<u32>, crate::error::Error> {
        let mut in_degree: BTreeMap<u32, usize> = self
            .nodes
            .iter()
            .map(|(number, node)| {
                let known_deps = node
                    .depends_on
                    .iter()
                    .filter(|dep| self.nodes.contains_key(dep))
                    .count();
                (*number, known_deps)
            })
            .collect();

        let mut ready: std::collections::BTreeSet<u32> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(number, _)| *number)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(number) = ready.pop_first() {
            order.push(number);
            if let Some(dependents) = self.dependents.get(&number) {
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(*dependent);
                        }
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(crate::error::Error::validation(
                "dependency cycle prevents a topological order",
            ));
        }
        Ok(order)
    }

    /// The longest chain under the depends-on relation, dependency-first.
    /// Ties break toward smaller numbers. Empty when the graph is cyclic.
    #[must_use]
    pub fn critical_path(&self) -> Vec<u32> {
        let Ok(order) = self.topological_order() else {
            return Vec::new();
        };

        // depth = longest chain ending at the node; best_pred reconstructs it.
        let mut depth: HashMap<u32, usize> = HashMap::new();
        let mut best_pred: HashMap<u32, u32> = HashMap::new();
        for number in &order {
            let mut best = 0;
            let mut pred = None;
            for dep in &self.nodes[number].depends_on {
                let Some(d) = depth.get(dep) else { continue };
                if *d > best || (*d == best && pred.is_some_and(|p| *dep < p)) {
                    best = *d;
                    pred = Some(*dep);
                }
            }
            depth.insert(*number, best + 1);
            if let Some(pred) = pred {
                best_pred.insert(*number, pred);
            }
        }

        let Some(mut tail) = order
            .iter()
            .copied()
            .max_by(|a, b| depth[a].cmp(&depth[b]).then(b.cmp(a)))
        else {
            return Vec::new();
        };

        let mut path = vec![tail];
        while let Some(pred) = best_pred.get(&tail) {
            path.push(*pred);
            tail = *pred;
        }
        path.reverse();
        path
    }
}
