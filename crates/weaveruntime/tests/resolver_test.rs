// crates/weaveruntime/tests/resolver_test.rs

use std::collections::HashSet;
use weavecore::{Handler, StepKind, WorkflowDefinition, WorkflowError, WorkflowStep};
use weaveruntime::resolver::{ready_set, validate_acyclic, DependencyGraph};

fn step(id: &str, deps: &[&str]) -> WorkflowStep {
    WorkflowStep::new(
        id,
        StepKind::Transform {
            handler: Handler::from_fn("id", |_, input| Ok(input)),
        },
    )
    .depends_on(deps.iter().copied())
}

fn definition(steps: Vec<WorkflowStep>) -> WorkflowDefinition {
    steps
        .into_iter()
        .fold(WorkflowDefinition::new("graph"), |def, s| def.with_step(s))
}

fn executed(ids: &[&str]) -> HashSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_ready_set_follows_dependencies() {
    let def = definition(vec![
        step("a", &[]),
        step("b", &["a"]),
        step("c", &["a"]),
        step("d", &["b", "c"]),
    ]);

    assert_eq!(ready_set(&def, &executed(&[])).unwrap(), vec!["a"]);
    assert_eq!(ready_set(&def, &executed(&["a"])).unwrap(), vec!["b", "c"]);
    assert_eq!(ready_set(&def, &executed(&["a", "b"])).unwrap(), vec!["c"]);
    assert_eq!(ready_set(&def, &executed(&["a", "b", "c"])).unwrap(), vec!["d"]);
    assert!(ready_set(&def, &executed(&["a", "b", "c", "d"])).unwrap().is_empty());
}

#[test]
fn test_cycle_path_is_reported() {
    let def = definition(vec![
        step("start", &[]),
        step("a", &["start", "c"]),
        step("b", &["a"]),
        step("c", &["b"]),
    ]);

    match validate_acyclic(&def) {
        Err(WorkflowError::Cycle { path }) => {
            assert_eq!(path.first(), path.last());
            assert_eq!(path.len(), 4);
            for id in ["a", "b", "c"] {
                assert!(path.contains(&id.to_string()), "{id} missing from {path:?}");
            }
        }
        other => panic!("expected cycle, got {other:?}"),
    }
}

#[test]
fn test_self_dependency_is_a_cycle() {
    let def = definition(vec![step("a", &["a"])]);
    let err = validate_acyclic(&def).unwrap_err();
    assert_eq!(
        err,
        WorkflowError::Cycle {
            path: vec!["a".to_string(), "a".to_string()]
        }
    );
}

#[test]
fn test_unknown_dependency_rejected() {
    let def = definition(vec![step("a", &["ghost"])]);
    assert!(matches!(
        DependencyGraph::build(&def),
        Err(WorkflowError::UnknownDependency { ref dependency, .. }) if dependency == "ghost"
    ));
}

#[test]
fn test_dependents_are_transitive() {
    let def = definition(vec![
        step("a", &[]),
        step("b", &["a"]),
        step("c", &["b"]),
        step("d", &[]),
    ]);
    let graph = DependencyGraph::build(&def).unwrap();

    assert_eq!(graph.dependents_of("a"), executed(&["b", "c"]));
    assert!(graph.dependents_of("d").is_empty());
    assert!(graph.find_cycle().is_none());
}

#[test]
fn test_long_chain_is_walked_without_recursion() {
    let ids: Vec<String> = (0..50_000).map(|n| format!("s{n}")).collect();
    let steps = ids
        .iter()
        .enumerate()
        .map(|(n, id)| match n {
            0 => step(id, &[]),
            _ => step(id, &[ids[n - 1].as_str()]),
        })
        .collect();
    let def = definition(steps);

    let graph = DependencyGraph::build(&def).unwrap();
    assert!(graph.find_cycle().is_none());

    // Closing the chain back onto its head yields the whole loop
    let mut looped = def;
    looped.steps[0] = step("s0", &["s49999"]);
    match validate_acyclic(&looped) {
        Err(WorkflowError::Cycle { path }) => {
            assert_eq!(path.len(), 50_001);
            assert_eq!(path.first(), path.last());
        }
        other => panic!("expected cycle, got {other:?}"),
    }
}
