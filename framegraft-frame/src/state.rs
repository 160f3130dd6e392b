//! Per-(viewport, feature) lifecycle tracking.
//!
//! Unconfigured → Configured (options set) → Active (first evaluate) →
//! Configured (resources freed, or options with a recreation trigger);
//! destroy is terminal. Evaluating an unconfigured pair configures it
//! with defaults first; features with no options are common.

use std::collections::HashMap;
use std::sync::Mutex;

use framegraft_core::types::{Feature, ViewportHandle};
use framegraft_core::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureState {
    Unconfigured,
    Configured,
    Active,
    Destroyed,
}

#[derive(Default)]
pub struct FeatureStateMachine {
    states: Mutex<HashMap<(ViewportHandle, Feature), FeatureState>>,
}

impl FeatureStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, viewport: ViewportHandle, feature: Feature) -> FeatureState {
        self.states
            .lock()
            .unwrap()
            .get(&(viewport, feature))
            .copied()
            .unwrap_or(FeatureState::Unconfigured)
    }

    /// Options arrived. `recreate` marks option changes that require the
    /// feature to rebuild its resources (resolution change and the like).
    pub fn on_options_set(
        &self,
        viewport: ViewportHandle,
        feature: Feature,
        recreate: bool,
    ) -> Result<()> {
        let mut states = self.states.lock().unwrap();
        let entry = states.entry((viewport, feature)).or_insert(FeatureState::Unconfigured);
        *entry = match (*entry, recreate) {
            (FeatureState::Destroyed, _) => return Err(Error::InvalidIntegration),
            (FeatureState::Active, true) => FeatureState::Configured,
            (FeatureState::Active, false) => FeatureState::Active,
            _ => FeatureState::Configured,
        };
        Ok(())
    }

    pub fn on_evaluate(&self, viewport: ViewportHandle, feature: Feature) -> Result<()> {
        let mut states = self.states.lock().unwrap();
        let entry = states.entry((viewport, feature)).or_insert(FeatureState::Unconfigured);
        match *entry {
            FeatureState::Destroyed => Err(Error::InvalidIntegration),
            _ => {
                *entry = FeatureState::Active;
                Ok(())
            }
        }
    }

    pub fn on_free_resources(&self, viewport: ViewportHandle, feature: Feature) -> Result<()> {
        let mut states = self.states.lock().unwrap();
        match states.get_mut(&(viewport, feature)) {
            Some(state @ FeatureState::Active) | Some(state @ FeatureState::Configured) => {
                *state = FeatureState::Configured;
                Ok(())
            }
            Some(FeatureState::Destroyed) => Err(Error::InvalidIntegration),
            _ => Err(Error::InvalidParameter),
        }
    }

    pub fn on_destroy(&self, viewport: ViewportHandle, feature: Feature) {
        self.states.lock().unwrap().insert((viewport, feature), FeatureState::Destroyed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VP: ViewportHandle = ViewportHandle(0);
    const FEATURE: Feature = Feature::DIRECT_SR;

    #[test]
    fn walks_the_documented_lifecycle() {
        let machine = FeatureStateMachine::new();
        assert_eq!(machine.state(VP, FEATURE), FeatureState::Unconfigured);

        machine.on_options_set(VP, FEATURE, false).unwrap();
        assert_eq!(machine.state(VP, FEATURE), FeatureState::Configured);

        machine.on_evaluate(VP, FEATURE).unwrap();
        assert_eq!(machine.state(VP, FEATURE), FeatureState::Active);

        // Non-recreating options keep it active.
        machine.on_options_set(VP, FEATURE, false).unwrap();
        assert_eq!(machine.state(VP, FEATURE), FeatureState::Active);

        // A recreation trigger drops back to configured.
        machine.on_options_set(VP, FEATURE, true).unwrap();
        assert_eq!(machine.state(VP, FEATURE), FeatureState::Configured);

        machine.on_evaluate(VP, FEATURE).unwrap();
        machine.on_free_resources(VP, FEATURE).unwrap();
        assert_eq!(machine.state(VP, FEATURE), FeatureState::Configured);

        machine.on_destroy(VP, FEATURE);
        assert_eq!(machine.state(VP, FEATURE), FeatureState::Destroyed);
        assert!(machine.on_evaluate(VP, FEATURE).is_err());
        assert!(machine.on_options_set(VP, FEATURE, false).is_err());
    }

    #[test]
    fn evaluate_without_options_configures_with_defaults() {
        let machine = FeatureStateMachine::new();
        machine.on_evaluate(VP, FEATURE).unwrap();
        assert_eq!(machine.state(VP, FEATURE), FeatureState::Active);
    }

    #[test]
    fn freeing_an_unconfigured_pair_is_an_error() {
        let machine = FeatureStateMachine::new();
        assert_eq!(machine.on_free_resources(VP, FEATURE), Err(Error::InvalidParameter));
    }
}
