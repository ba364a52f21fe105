//! Rebuilding a runnable scenario from a stored result.
//!
//! A stored result may predate the `actions` field, so recovery has a
//! strict precedence: embedded actions, then the executed-action trace,
//! then a regenerated scenario matched by name, description, or position.
//! When nothing matches, the rerun fails explicitly instead of guessing.

use thiserror::Error;

use crate::scenario::{Scenario, ScenarioResult};

#[derive(Debug, Error)]
pub enum ReconstructError {
    #[error("cannot reconstruct scenario '{name}': no stored actions, no trace, and no regenerated match")]
    CannotReconstruct { name: String },
}

/// Rebuild the scenario from the stored result alone, without regeneration.
/// Returns `None` when neither the embedded action list nor the execution
/// trace can supply actions.
pub fn from_stored(stored: &ScenarioResult) -> Option<Scenario> {
    // (a) embedded actions field, used as-is
    if let Some(actions) = &stored.actions {
        if !actions.is_empty() {
            return Some(Scenario {
                name: stored.scenario_name.clone(),
                description: stored.description.clone(),
                actions: actions.clone(),
                expected_result: stored.expected_result.clone(),
            });
        }
    }

    // (b) recover from the per-action trace; result-only fields (success,
    // error, screenshot) are dropped by taking just the action
    if !stored.actions_executed.is_empty() {
        return Some(Scenario {
            name: stored.scenario_name.clone(),
            description: stored.description.clone(),
            actions: stored
                .actions_executed
                .iter()
                .map(|executed| executed.action.clone())
                .collect(),
            expected_result: stored.expected_result.clone(),
        });
    }

    None
}

/// Match a regenerated scenario set against the stored result:
/// exact name, then exact description, then positional index.
pub fn match_regenerated(
    stored: &ScenarioResult,
    index: usize,
    regenerated: &[Scenario],
) -> Option<Scenario> {
    if let Some(by_name) = regenerated
        .iter()
        .find(|s| s.name == stored.scenario_name)
    {
        return Some(by_name.clone());
    }
    if let Some(by_description) = regenerated
        .iter()
        .find(|s| s.description == stored.description)
    {
        return Some(by_description.clone());
    }
    regenerated.get(index).cloned()
}

/// Full precedence: stored actions -> trace -> regenerated match -> error.
/// `regenerated` is produced lazily by the caller only when needed.
pub fn reconstruct(
    stored: &ScenarioResult,
    index: usize,
    regenerated: Option<&[Scenario]>,
) -> Result<Scenario, ReconstructError> {
    if let Some(scenario) = from_stored(stored) {
        return Ok(scenario);
    }
    if let Some(regenerated) = regenerated {
        if let Some(scenario) = match_regenerated(stored, index, regenerated) {
            return Ok(scenario);
        }
    }
    Err(ReconstructError::CannotReconstruct {
        name: stored.scenario_name.clone(),
    })
}
