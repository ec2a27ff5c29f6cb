//! Dependency resolution, cycle detection, and parallel wave computation.
//!
//! Uses `petgraph` to model step dependencies as a directed graph (edge from
//! dependency to dependent). Kahn layering peels off every step whose
//! predecessors are all placed, producing execution waves where each wave
//! can run concurrently once all prior waves are terminal.

use std::collections::{HashMap, HashSet};

use atelier_types::workflow::StepDefinition;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use serde::Serialize;

use super::template::WorkflowError;

// ---------------------------------------------------------------------------
// Graph construction
// ---------------------------------------------------------------------------

/// Build the dependency graph. Node indices follow declaration order.
fn build_graph(steps: &[StepDefinition]) -> Result<DiGraph<&str, ()>, WorkflowError> {
    let id_to_idx: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut graph = DiGraph::<&str, ()>::new();
    let node_indices: Vec<_> = steps.iter().map(|s| graph.add_node(s.id.as_str())).collect();

    for (to_idx, step) in steps.iter().enumerate() {
        for dep in &step.depends_on {
            let from_idx = id_to_idx.get(dep.as_str()).ok_or_else(|| {
                WorkflowError::UnknownDependency(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                ))
            })?;
            graph.update_edge(node_indices[*from_idx], node_indices[to_idx], ());
        }
    }
    Ok(graph)
}

// ---------------------------------------------------------------------------
// Execution plan (wave computation)
// ---------------------------------------------------------------------------

/// Ordered waves of step IDs. Wave 0 runs first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    pub waves: Vec<Vec<String>>,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    /// Total number of steps across all waves.
    pub fn step_count(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }

    /// Index of the wave containing `step_id`.
    pub fn wave_of(&self, step_id: &str) -> Option<usize> {
        self.waves
            .iter()
            .position(|wave| wave.iter().any(|id| id == step_id))
    }
}

/// Group steps into parallel waves using Kahn's algorithm.
///
/// 1. Build a `DiGraph` with step IDs as nodes and `depends_on` edges.
/// 2. Seed the first wave with every step of in-degree zero.
/// 3. Placing a wave decrements its dependents' in-degree; those reaching
///    zero form the next wave.
/// 4. Steps never reaching zero sit on a cycle.
///
/// Within a wave, steps keep template declaration order.
pub fn build_execution_plan(steps: &[StepDefinition]) -> Result<ExecutionPlan, WorkflowError> {
    if steps.is_empty() {
        return Ok(ExecutionPlan::default());
    }

    let graph = build_graph(steps)?;
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();

    let mut current: Vec<NodeIndex> = graph
        .node_indices()
        .filter(|n| in_degree[n.index()] == 0)
        .collect();
    let mut waves = Vec::new();
    let mut placed = 0;

    while !current.is_empty() {
        placed += current.len();
        let mut next = Vec::new();
        for &node in &current {
            for dependent in graph.neighbors_directed(node, Direction::Outgoing) {
                in_degree[dependent.index()] -= 1;
                if in_degree[dependent.index()] == 0 {
                    next.push(dependent);
                }
            }
        }
        next.sort();
        waves.push(current.iter().map(|&n| graph[n].to_string()).collect());
        current = next;
    }

    if placed < steps.len() {
        let stuck: Vec<&str> = graph
            .node_indices()
            .filter(|n| in_degree[n.index()] > 0)
            .map(|n| graph[n])
            .collect();
        return Err(WorkflowError::CycleDetected(format!(
            "cycle detected involving steps: {}",
            stuck.join(", ")
        )));
    }

    Ok(ExecutionPlan { waves })
}

// ---------------------------------------------------------------------------
// DAG validation (no wave output)
// ---------------------------------------------------------------------------

/// Validate that steps form a valid DAG (no cycles, all references exist).
pub fn validate_dag(steps: &[StepDefinition]) -> Result<(), WorkflowError> {
    build_execution_plan(steps).map(|_| ())
}

// ---------------------------------------------------------------------------
// Transitive closures
// ---------------------------------------------------------------------------

/// Returns the transitive closure of all dependencies for a given step.
///
/// If `step_id` is not found, returns an empty vec.
pub fn get_step_dependencies<'a>(step_id: &str, steps: &'a [StepDefinition]) -> Vec<&'a str> {
    let step_map: HashMap<&str, &StepDefinition> =
        steps.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut visited = HashSet::new();
    let mut stack = vec![step_id];

    while let Some(current) = stack.pop() {
        if let Some(step) = step_map.get(current) {
            for dep in &step.depends_on {
                if visited.insert(dep.as_str()) {
                    stack.push(dep.as_str());
                }
            }
        }
    }

    visited.into_iter().collect()
}

/// Every step that directly or indirectly depends on `step_id`, in
/// declaration order. Empty when the step is unknown or the graph is invalid.
pub fn transitive_dependents<'a>(step_id: &str, steps: &'a [StepDefinition]) -> Vec<&'a str> {
    let Some(start) = steps.iter().position(|s| s.id == step_id) else {
        return vec![];
    };
    let Ok(graph) = build_graph(steps) else {
        return vec![];
    };

    let start = NodeIndex::new(start);
    let mut reached = HashSet::new();
    let mut dfs = Dfs::new(&graph, start);
    while let Some(node) = dfs.next(&graph) {
        if node != start {
            reached.insert(node.index());
        }
    }

    steps
        .iter()
        .enumerate()
        .filter(|(i, _)| reached.contains(i))
        .map(|(_, s)| s.id.as_str())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_types::workflow::{HttpMethod, InputMapping};

    /// Helper: build a passthrough step with given ID and dependencies.
    fn service_step(id: &str, depends_on: Vec<&str>) -> StepDefinition {
        StepDefinition {
            id: id.to_string(),
            service: "nlu".to_string(),
            method: HttpMethod::Post,
            path: String::new(),
            input: InputMapping::Passthrough,
            depends_on: depends_on.into_iter().map(String::from).collect(),
            retry: None,
            optional: false,
            timeout_secs: None,
        }
    }

    fn ids(wave: &[String]) -> Vec<&str> {
        wave.iter().map(String::as_str).collect()
    }

    // -----------------------------------------------------------------------
    // Wave computation
    // -----------------------------------------------------------------------

    #[test]
    fn test_no_dependencies_single_wave() {
        let steps = vec![
            service_step("a", vec![]),
            service_step("b", vec![]),
            service_step("c", vec![]),
        ];
        let plan = build_execution_plan(&steps).unwrap();
        assert_eq!(plan.waves.len(), 1, "all independent steps -> single wave");
        assert_eq!(ids(&plan.waves[0]), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_single_step() {
        let plan = build_execution_plan(&[service_step("only", vec![])]).unwrap();
        assert_eq!(plan.waves, vec![vec!["only".to_string()]]);
    }

    #[test]
    fn test_linear_chain_n_waves() {
        // A -> B -> C
        let steps = vec![
            service_step("a", vec![]),
            service_step("b", vec!["a"]),
            service_step("c", vec!["b"]),
        ];
        let plan = build_execution_plan(&steps).unwrap();
        assert_eq!(plan.waves.len(), 3, "linear chain -> 3 waves");
        assert_eq!(ids(&plan.waves[0]), vec!["a"]);
        assert_eq!(ids(&plan.waves[1]), vec!["b"]);
        assert_eq!(ids(&plan.waves[2]), vec!["c"]);
    }

    #[test]
    fn test_diamond_three_waves() {
        // A -> {B, C} -> D
        let steps = vec![
            service_step("a", vec![]),
            service_step("b", vec!["a"]),
            service_step("c", vec!["a"]),
            service_step("d", vec!["b", "c"]),
        ];
        let plan = build_execution_plan(&steps).unwrap();
        assert_eq!(plan.waves.len(), 3, "diamond -> 3 waves");
        assert_eq!(ids(&plan.waves[0]), vec!["a"]);
        assert_eq!(ids(&plan.waves[1]), vec!["b", "c"]);
        assert_eq!(ids(&plan.waves[2]), vec!["d"]);
    }

    #[test]
    fn test_wave_order_follows_declaration() {
        // Declared out of dependency order: the dependent comes first.
        let steps = vec![
            service_step("z", vec!["root"]),
            service_step("root", vec![]),
            service_step("m", vec!["root"]),
        ];
        let plan = build_execution_plan(&steps).unwrap();
        assert_eq!(ids(&plan.waves[0]), vec!["root"]);
        assert_eq!(ids(&plan.waves[1]), vec!["z", "m"]);
    }

    #[test]
    fn test_every_dependency_in_earlier_wave() {
        let steps = vec![
            service_step("a", vec![]),
            service_step("b", vec!["a"]),
            service_step("c", vec![]),
            service_step("d", vec!["b", "c"]),
            service_step("e", vec!["a", "d"]),
        ];
        let plan = build_execution_plan(&steps).unwrap();
        assert_eq!(plan.step_count(), steps.len());
        for step in &steps {
            let wave = plan.wave_of(&step.id).unwrap();
            for dep in &step.depends_on {
                assert!(plan.wave_of(dep).unwrap() < wave, "{dep} before {}", step.id);
            }
        }
    }

    #[test]
    fn test_duplicate_dependency_entries() {
        let steps = vec![
            service_step("a", vec![]),
            service_step("b", vec!["a", "a"]),
        ];
        let plan = build_execution_plan(&steps).unwrap();
        assert_eq!(plan.waves.len(), 2);
    }

    #[test]
    fn test_cycle_detected() {
        // A -> B -> A (cycle)
        let steps = vec![service_step("a", vec!["b"]), service_step("b", vec!["a"])];
        let err = build_execution_plan(&steps).unwrap_err();
        assert!(matches!(err, WorkflowError::CycleDetected(_)));
        let msg = err.to_string();
        assert!(msg.contains("a, b"), "got: {msg}");
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let steps = vec![service_step("a", vec!["a"])];
        let err = build_execution_plan(&steps).unwrap_err();
        assert!(matches!(err, WorkflowError::CycleDetected(_)));
    }

    #[test]
    fn test_cycle_behind_valid_prefix() {
        let steps = vec![
            service_step("root", vec![]),
            service_step("x", vec!["root", "y"]),
            service_step("y", vec!["x"]),
        ];
        let err = build_execution_plan(&steps).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("x, y") && !msg.contains("root"), "got: {msg}");
    }

    #[test]
    fn test_empty_steps() {
        let plan = build_execution_plan(&[]).unwrap();
        assert!(plan.is_empty());
    }

    // -----------------------------------------------------------------------
    // DAG validation
    // -----------------------------------------------------------------------

    #[test]
    fn test_validate_dag_valid() {
        let steps = vec![service_step("a", vec![]), service_step("b", vec!["a"])];
        assert!(validate_dag(&steps).is_ok());
    }

    #[test]
    fn test_validate_dag_cycle() {
        let steps = vec![
            service_step("a", vec!["c"]),
            service_step("b", vec!["a"]),
            service_step("c", vec!["b"]),
        ];
        let err = validate_dag(&steps).unwrap_err();
        assert!(err.to_string().contains("cycle detected"));
    }

    #[test]
    fn test_validate_dag_unknown_dep() {
        let steps = vec![service_step("a", vec!["missing"])];
        let err = validate_dag(&steps).unwrap_err();
        assert!(err.to_string().contains("unknown step"));
    }

    // -----------------------------------------------------------------------
    // Transitive closures
    // -----------------------------------------------------------------------

    #[test]
    fn test_get_transitive_dependencies() {
        // A -> B -> C -> D
        let steps = vec![
            service_step("a", vec![]),
            service_step("b", vec!["a"]),
            service_step("c", vec!["b"]),
            service_step("d", vec!["c"]),
        ];
        let mut deps = get_step_dependencies("d", &steps);
        deps.sort();
        assert_eq!(deps, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_get_dependencies_unknown_step() {
        let steps = vec![service_step("a", vec![])];
        assert!(get_step_dependencies("nonexistent", &steps).is_empty());
    }

    #[test]
    fn test_transitive_dependents() {
        //     A
        //    / \
        //   B   C
        //   |   |
        //   D   E
        //    \ /
        //     F
        let steps = vec![
            service_step("a", vec![]),
            service_step("b", vec!["a"]),
            service_step("c", vec!["a"]),
            service_step("d", vec!["b"]),
            service_step("e", vec!["c"]),
            service_step("f", vec!["d", "e"]),
        ];
        assert_eq!(transitive_dependents("b", &steps), vec!["d", "f"]);
        assert_eq!(
            transitive_dependents("a", &steps),
            vec!["b", "c", "d", "e", "f"]
        );
        assert!(transitive_dependents("f", &steps).is_empty());
        assert!(transitive_dependents("ghost", &steps).is_empty());

        let plan = build_execution_plan(&steps).unwrap();
        assert_eq!(plan.waves.len(), 4);
        assert_eq!(ids(&plan.waves[2]), vec!["d", "e"]);
    }
}
