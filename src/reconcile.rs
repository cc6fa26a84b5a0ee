// src/reconcile.rs

//! Diff the remote index against what is installed

use crate::index::RemotePackage;
use crate::path::validate_package_id;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

/// What a run has to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    /// Remote packages with no local marker, in index order
    pub to_install: Vec<RemotePackage>,
    /// Local markers with no remote package
    pub to_remove: BTreeSet<String>,
    /// Remote ids that cannot be used as directory names
    pub skipped: Vec<String>,
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.to_install.is_empty() && self.to_remove.is_empty()
    }
}

/// Compute the plan in one pass over each input
///
/// Ids failing [`validate_package_id`] are never installed, and a local
/// directory with such a name is never removed either.
pub fn plan(remote: Vec<RemotePackage>, local: &BTreeSet<String>) -> ReconciliationPlan {
    let mut skipped = Vec::new();
    let mut pending: HashMap<String, usize> = HashMap::with_capacity(remote.len());
    let mut candidates: Vec<Option<RemotePackage>> = Vec::with_capacity(remote.len());

    for package in remote {
        if let Err(e) = validate_package_id(&package.id) {
            warn!("Skipping level with unusable id: {}", e);
            skipped.push(package.id);
            continue;
        }
        pending.insert(package.id.clone(), candidates.len());
        candidates.push(Some(package));
    }

    let mut to_remove = BTreeSet::new();
    for id in local {
        match pending.get(id.as_str()) {
            Some(&slot) => candidates[slot] = None,
            None if validate_package_id(id).is_ok() => {
                to_remove.insert(id.clone());
            }
            None => {}
        }
    }

    ReconciliationPlan {
        to_install: candidates.into_iter().flatten().collect(),
        to_remove,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn package(id: &str) -> RemotePackage {
        RemotePackage {
            id: id.to_string(),
            primary_url: Some(format!("https://primary/{id}.zip")),
            fallback_url: format!("https://fallback/{id}.zip"),
        }
    }

    fn ids(plan: &ReconciliationPlan) -> Vec<&str> {
        plan.to_install.iter().map(|p| p.id.as_str()).collect()
    }

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_add_and_remove() {
        let result = plan(vec![package("A"), package("B")], &set(&["B", "C"]));
        assert_eq!(ids(&result), vec!["A"]);
        assert_eq!(result.to_remove, set(&["C"]));
        assert!(result.skipped.is_empty());
    }

    #[test]
    fn test_in_sync_plan_is_empty() {
        let result = plan(vec![package("A")], &set(&["A"]));
        assert!(result.is_empty());
    }

    #[test]
    fn test_install_order_follows_index() {
        let remote = ["z", "a", "m", "b"].map(package).to_vec();
        let result = plan(remote, &set(&["m"]));
        assert_eq!(ids(&result), vec!["z", "a", "b"]);
    }

    #[test]
    fn test_set_difference_properties() {
        // Deterministic sweep over overlapping id ranges
        for (remote_n, local_start, local_n) in [(0, 0, 0), (5, 0, 0), (0, 0, 5), (10, 5, 10), (7, 0, 7)] {
            let remote_ids: Vec<String> = (0..remote_n).map(|i| format!("p{i}")).collect();
            let local_ids: BTreeSet<String> =
                (local_start..local_start + local_n).map(|i| format!("p{i}")).collect();

            let result = plan(
                remote_ids.iter().map(|id| package(id)).collect(),
                &local_ids,
            );

            let remote_set: HashSet<&String> = remote_ids.iter().collect();
            let install: HashSet<&String> = result.to_install.iter().map(|p| &p.id).collect();
            let expected_install: HashSet<&String> =
                remote_ids.iter().filter(|id| !local_ids.contains(*id)).collect();
            let expected_remove: BTreeSet<String> = local_ids
                .iter()
                .filter(|id| !remote_set.contains(id))
                .cloned()
                .collect();

            assert_eq!(install, expected_install);
            assert_eq!(result.to_remove, expected_remove);
            assert!(result.to_install.iter().all(|p| !result.to_remove.contains(&p.id)));
        }
    }

    #[test]
    fn test_unsafe_ids_are_skipped() {
        let result = plan(
            vec![package("ok"), package("../escape"), package("CON")],
            &set(&["nul"]),
        );
        assert_eq!(ids(&result), vec!["ok"]);
        assert_eq!(result.skipped, vec!["../escape", "CON"]);
        assert!(result.to_remove.is_empty());
    }

    #[test]
    fn test_tool_owned_names_are_skipped() {
        let result = plan(
            vec![package(".levelsync.tmp"), package(".levelsync.lock"), package("ok")],
            &BTreeSet::new(),
        );
        assert_eq!(ids(&result), vec!["ok"]);
        assert_eq!(result.skipped, vec![".levelsync.tmp", ".levelsync.lock"]);
    }
}
