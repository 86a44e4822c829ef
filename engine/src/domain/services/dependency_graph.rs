//! Dependency graph over enabled process definitions
//! Validates edges, rejects cycles, and produces a deterministic start order.
//! Pure functions of their input; the stop order is the reverse.

use crate::domain::{DomainError, ProcessDef};
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::cmp::Reverse;
use std::sync::Arc;

/// Validate that every `depends_on` edge points at an enabled process.
/// Reports the first missing target in name order.
pub fn validate_edges(defs: &BTreeMap<String, Arc<ProcessDef>>) -> Result<(), DomainError> {
    for (name, def) in defs {
        for dep in &def.depends_on {
            match defs.get(dep) {
                Some(target) if target.enabled => {}
                _ => {
                    return Err(DomainError::DependencyMissing {
                        from: name.clone(),
                        to: dep.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Depth-first cycle detection with gray/black marking. A gray→gray edge is
/// a cycle; the error names one vertex on it.
fn detect_cycle(defs: &BTreeMap<String, Arc<ProcessDef>>) -> Result<(), DomainError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Gray,
        Black,
    }

    let mut marks: HashMap<&str, Mark> = defs.keys().map(|k| (k.as_str(), Mark::White)).collect();

    fn visit<'a>(
        node: &'a str,
        defs: &'a BTreeMap<String, Arc<ProcessDef>>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Result<(), DomainError> {
        marks.insert(node, Mark::Gray);
        if let Some(def) = defs.get(node) {
            for dep in &def.depends_on {
                match marks.get(dep.as_str()) {
                    Some(Mark::Gray) => {
                        return Err(DomainError::DependencyCycle {
                            involving: dep.clone(),
                        });
                    }
                    Some(Mark::White) => visit(dep, defs, marks)?,
                    _ => {}
                }
            }
        }
        marks.insert(node, Mark::Black);
        Ok(())
    }

    let names: Vec<&str> = defs.keys().map(|k| k.as_str()).collect();
    for name in names {
        if marks.get(name) == Some(&Mark::White) {
            visit(name, defs, &mut marks)?;
        }
    }
    Ok(())
}

/// Compute the start order: every process after all of its dependencies,
/// ready vertices drained in ascending priority with lexicographic name
/// tie-break. Rejects missing edges and cycles first.
pub fn start_order(defs: &BTreeMap<String, Arc<ProcessDef>>) -> Result<Vec<String>, DomainError> {
    validate_edges(defs)?;
    detect_cycle(defs)?;

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for name in defs.keys() {
        in_degree.insert(name.as_str(), 0);
        dependents.insert(name.as_str(), Vec::new());
    }
    for (name, def) in defs {
        for dep in &def.depends_on {
            if let Some(d) = dependents.get_mut(dep.as_str()) {
                d.push(name.as_str());
            }
            *in_degree.get_mut(name.as_str()).ok_or_else(|| DomainError::Internal {
                cause: format!("unknown vertex {}", name),
            })? += 1;
        }
    }

    // Min-heap keyed on (priority, name) keeps the drain deterministic
    let mut ready: BinaryHeap<Reverse<(i32, &str)>> = BinaryHeap::new();
    for (name, &degree) in &in_degree {
        if degree == 0 {
            let priority = defs[*name].priority;
            ready.push(Reverse((priority, *name)));
        }
    }

    let mut order = Vec::with_capacity(defs.len());
    let mut seen: HashSet<&str> = HashSet::new();
    while let Some(Reverse((_, name))) = ready.pop() {
        if !seen.insert(name) {
            continue;
        }
        order.push(name.to_string());
        if let Some(deps) = dependents.get(name) {
            for dependent in deps {
                let degree = in_degree.get_mut(dependent).ok_or_else(|| {
                    DomainError::Internal {
                        cause: format!("unknown vertex {}", dependent),
                    }
                })?;
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse((defs[*dependent].priority, *dependent)));
                }
            }
        }
    }

    if order.len() != defs.len() {
        // Unreachable after detect_cycle, kept as a guard
        return Err(DomainError::Internal {
            cause: "topological sort did not cover all vertices".to_string(),
        });
    }
    Ok(order)
}

/// Stop order is the exact reverse of the start order
pub fn stop_order(defs: &BTreeMap<String, Arc<ProcessDef>>) -> Result<Vec<String>, DomainError> {
    let mut order = start_order(defs)?;
    order.reverse();
    Ok(order)
}
