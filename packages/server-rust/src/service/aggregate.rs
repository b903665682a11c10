//! Flat-mode catalog aggregation and tool routing.
//!
//! Both walk the registry snapshot in sorted backend-name order, so the
//! lexicographically first backend offering a tool name always owns it.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use relay_core::Tool;
use tracing::{error, warn};

use super::cache::ToolCache;
use super::registry::RegistrySnapshot;
use crate::backend::BackendHandle;

/// Result of merging every backend's catalog.
#[derive(Debug, Default)]
pub struct Aggregation {
    /// Winning definitions, in first-seen order.
    pub tools: Vec<Tool>,
    /// Tool name -> every backend offering it, winner first. Only names
    /// offered by more than one backend appear.
    pub conflicts: BTreeMap<String, Vec<String>>,
}

/// Merges the catalogs of every backend in `snapshot`.
///
/// A backend whose catalog cannot be fetched is logged and left out of this
/// result; it stays in the registry.
pub async fn aggregate_tools(snapshot: &RegistrySnapshot, cache: &ToolCache) -> Aggregation {
    let mut owners: HashMap<String, String> = HashMap::new();
    let mut result = Aggregation::default();

    for backend in snapshot.iter() {
        let tools = match cache.get(backend).await {
            Ok(tools) => tools,
            Err(e) => {
                error!(backend = backend.name(), error = %format!("{e:#}"), "failed to list tools, skipping backend");
                continue;
            }
        };

        for tool in tools.iter() {
            match owners.entry(tool.name.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(backend.name().to_string());
                    result.tools.push(tool.clone());
                }
                Entry::Occupied(owner) => {
                    if owner.get() == backend.name() {
                        continue;
                    }
                    result
                        .conflicts
                        .entry(tool.name.clone())
                        .or_insert_with(|| vec![owner.get().clone()])
                        .push(backend.name().to_string());
                }
            }
        }
    }

    for (tool, backends) in &result.conflicts {
        warn!(
            tool = %tool,
            kept = %backends[0],
            shadowed = ?&backends[1..],
            "tool offered by multiple backends"
        );
    }
    result
}

/// Finds the first backend, in sorted name order, whose catalog contains
/// `tool`. Stops at the first match.
pub async fn resolve_tool(
    snapshot: &RegistrySnapshot,
    cache: &ToolCache,
    tool: &str,
) -> Option<Arc<BackendHandle>> {
    for backend in snapshot.iter() {
        match cache.get(backend).await {
            Ok(tools) if tools.iter().any(|t| t.name == tool) => return Some(Arc::clone(backend)),
            Ok(_) => {}
            Err(e) => {
                error!(backend = backend.name(), tool, error = %format!("{e:#}"), "failed to list tools while routing");
            }
        }
    }
    None
}

/// After routing `tool` to `winner`, reports later backends that also offer
/// it. Uses cached catalogs only; backends never fetched are not consulted.
pub fn report_shadowed(
    snapshot: &RegistrySnapshot,
    cache: &ToolCache,
    winner: &str,
    tool: &str,
) -> Vec<String> {
    let shadowed: Vec<String> = snapshot
        .names()
        .filter(|name| *name > winner)
        .filter(|name| {
            cache
                .peek(name)
                .is_some_and(|tools| tools.iter().any(|t| t.name == tool))
        })
        .map(str::to_string)
        .collect();

    if !shadowed.is_empty() {
        warn!(tool, kept = winner, shadowed = ?shadowed, "tool offered by multiple backends");
    }
    shadowed
}
