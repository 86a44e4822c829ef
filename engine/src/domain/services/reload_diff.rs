//! Reload diff
//! Pure comparison of the running definition map against a freshly parsed
//! one. The scheduler turns the resulting plan into mutations; computing the
//! plan has no side effects.

use crate::domain::ProcessDef;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a reload has to do, per process
#[derive(Debug, Default, PartialEq)]
pub struct ReloadPlan {
    /// Present now, absent before: start
    pub added: Vec<String>,
    /// Present before, absent now: stop and delete
    pub removed: Vec<String>,
    /// Restart-significant fields changed: rolling restart
    pub restarted: Vec<String>,
    /// Only the desired scale changed
    pub rescaled: Vec<String>,
    /// Definition swap without touching instances (hooks, priority, timings)
    pub replaced: Vec<String>,
}

impl ReloadPlan {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.restarted.is_empty()
            && self.rescaled.is_empty()
            && self.replaced.is_empty()
    }
}

/// Compare field-by-field. Ordering inside each bucket follows the map
/// order, which is deterministic (BTreeMap).
pub fn compute_plan(
    current: &BTreeMap<String, Arc<ProcessDef>>,
    next: &BTreeMap<String, Arc<ProcessDef>>,
) -> ReloadPlan {
    let mut plan = ReloadPlan::default();

    for name in next.keys() {
        if !current.contains_key(name) {
            plan.added.push(name.clone());
        }
    }
    for name in current.keys() {
        if !next.contains_key(name) {
            plan.removed.push(name.clone());
        }
    }
    for (name, new_def) in next {
        let Some(old_def) = current.get(name) else {
            continue;
        };
        if new_def.as_ref() == old_def.as_ref() {
            continue;
        }
        if old_def.requires_restart(new_def) {
            plan.restarted.push(name.clone());
        } else if old_def.effective_scale() != new_def.effective_scale() {
            plan.rescaled.push(name.clone());
        } else {
            plan.replaced.push(name.clone());
        }
    }
    plan
}
