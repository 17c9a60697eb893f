//! Predicate dependency graph
//!
//! Nodes are derived (IDB) predicates. An edge `A -> B` exists when some rule
//! for `A` mentions `B` in its body. Input predicates have no rules and are
//! left out; they never take part in a cycle.

use super::program::PredId;

/// One body dependency of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub to: PredId,
    /// `B` appears under `!`
    pub negative: bool,
    /// The rule for `A` has head aggregates
    pub aggregate: bool,
    /// Index of the rule that introduced the edge
    pub rule: usize,
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<PredId>,
    edges: Vec<Vec<Edge>>,
}

impl DependencyGraph {
    /// Creates a graph over `nodes`, visited in the given order.
    ///
    /// `pred_count` bounds all predicate ids so lookups are plain indexing.
    pub fn new(nodes: Vec<PredId>, pred_count: usize) -> Self {
        Self {
            nodes,
            edges: vec![Vec::new(); pred_count],
        }
    }

    pub fn add_edge(&mut self, from: PredId, edge: Edge) {
        self.edges[from].push(edge);
    }

    pub fn nodes(&self) -> &[PredId] {
        &self.nodes
    }

    pub fn edges(&self, from: PredId) -> &[Edge] {
        &self.edges[from]
    }

    pub fn has_self_loop(&self, pred: PredId) -> bool {
        self.edges[pred].iter().any(|e| e.to == pred)
    }

    /// Strongly connected components, dependencies first.
    ///
    /// Tarjan's algorithm emits a component only after every component it
    /// reaches, so the output order is a valid evaluation order.
    pub fn sccs(&self) -> Vec<Vec<PredId>> {
        let mut tarjan = Tarjan {
            graph: self,
            index: vec![None; self.edges.len()],
            lowlink: vec![0; self.edges.len()],
            on_stack: vec![false; self.edges.len()],
            stack: Vec::new(),
            next_index: 0,
            out: Vec::new(),
        };

        for &node in &self.nodes {
            if tarjan.index[node].is_none() {
                tarjan.visit(node);
            }
        }
        tarjan.out
    }
}

struct Tarjan<'a> {
    graph: &'a DependencyGraph,
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<PredId>,
    next_index: usize,
    out: Vec<Vec<PredId>>,
}

impl Tarjan<'_> {
    fn visit(&mut self, v: PredId) {
        self.index[v] = Some(self.next_index);
        self.lowlink[v] = self.next_index;
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack[v] = true;

        for edge in self.graph.edges(v) {
            let w = edge.to;
            match self.index[w] {
                None => {
                    self.visit(w);
                    self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                }
                Some(w_index) if self.on_stack[w] => {
                    self.lowlink[v] = self.lowlink[v].min(w_index);
                }
                Some(_) => {}
            }
        }

        if Some(self.lowlink[v]) == self.index[v] {
            let mut component = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            component.sort_unstable();
            self.out.push(component);
        }
    }
}
