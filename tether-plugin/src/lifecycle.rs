use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Plugin runtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    Registered,
    PreInit,
    Init,
    Started,
    Stopped,
    /// Terminal. Reached through a failed stage hook or `disable`.
    Disabled,
}

/// A point in the boot sequence at which plugin hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PreInit,
    Init,
    Start,
    Stop,
}

impl Stage {
    /// Stages run by the boot barrier, in order.
    pub const BOOT: [Stage; 3] = [Stage::PreInit, Stage::Init, Stage::Start];

    /// State a plugin is in after this stage succeeded.
    pub fn target(self) -> PluginState {
        match self {
            Stage::PreInit => PluginState::PreInit,
            Stage::Init => PluginState::Init,
            Stage::Start => PluginState::Started,
            Stage::Stop => PluginState::Stopped,
        }
    }

    /// Whether a plugin in `state` is due for this stage.
    pub fn accepts(self, state: PluginState) -> bool {
        matches!(
            (self, state),
            (Stage::PreInit, PluginState::Registered)
                | (Stage::Init, PluginState::PreInit)
                | (Stage::Start, PluginState::Init | PluginState::Stopped)
                | (Stage::Stop, PluginState::Started)
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::PreInit => "pre_init",
            Stage::Init => "init",
            Stage::Start => "start",
            Stage::Stop => "stop",
        })
    }
}

/// A lifecycle event for a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub sequence: u64,
    pub plugin: String,
    pub from_state: PluginState,
    pub to_state: PluginState,
    pub stage: Option<Stage>,
    pub error: Option<String>,
}

/// Tracks the lifecycle state of plugins.
#[derive(Debug, Clone, Default)]
pub struct LifecycleTracker {
    states: HashMap<String, PluginState>,
    events: Vec<LifecycleEvent>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transition(&mut self, plugin: &str, to_state: PluginState, stage: Option<Stage>) {
        self.record(plugin, to_state, stage, None);
    }

    /// Move `plugin` to `Disabled`, keeping the failure message.
    pub fn fail(&mut self, plugin: &str, stage: Option<Stage>, error: String) {
        self.record(plugin, PluginState::Disabled, stage, Some(error));
    }

    fn record(
        &mut self,
        plugin: &str,
        to_state: PluginState,
        stage: Option<Stage>,
        error: Option<String>,
    ) {
        let from_state = self.state_of(plugin);
        self.states.insert(plugin.to_string(), to_state);
        self.events.push(LifecycleEvent {
            sequence: self.events.len() as u64,
            plugin: plugin.into(),
            from_state,
            to_state,
            stage,
            error,
        });
    }

    pub fn state_of(&self, plugin: &str) -> PluginState {
        self.states
            .get(plugin)
            .copied()
            .unwrap_or(PluginState::Registered)
    }

    pub fn events(&self) -> &[LifecycleEvent] {
        &self.events
    }

    pub fn events_for(&self, plugin: &str) -> Vec<&LifecycleEvent> {
        self.events.iter().filter(|e| e.plugin == plugin).collect()
    }

    pub fn plugins_in(&self, state: PluginState) -> Vec<&str> {
        self.states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let tracker = LifecycleTracker::new();
        assert_eq!(tracker.state_of("unknown"), PluginState::Registered);
    }

    #[test]
    fn test_stage_acceptance() {
        assert!(Stage::PreInit.accepts(PluginState::Registered));
        assert!(!Stage::Init.accepts(PluginState::Registered));
        assert!(Stage::Start.accepts(PluginState::Init));
        assert!(Stage::Start.accepts(PluginState::Stopped));
        assert!(!Stage::Start.accepts(PluginState::Started));
        assert!(Stage::Stop.accepts(PluginState::Started));
        for stage in [Stage::PreInit, Stage::Init, Stage::Start, Stage::Stop] {
            assert!(!stage.accepts(PluginState::Disabled));
        }
    }

    #[test]
    fn test_events_tracking() {
        let mut tracker = LifecycleTracker::new();
        tracker.transition("p1", PluginState::PreInit, Some(Stage::PreInit));
        tracker.transition("p1", PluginState::Init, Some(Stage::Init));
        tracker.fail("p2", Some(Stage::PreInit), "boom".into());

        let p1_events = tracker.events_for("p1");
        assert_eq!(p1_events.len(), 2);
        assert_eq!(p1_events[0].from_state, PluginState::Registered);
        assert_eq!(p1_events[0].to_state, PluginState::PreInit);
        assert_eq!(p1_events[1].from_state, PluginState::PreInit);
        assert_eq!(p1_events[1].to_state, PluginState::Init);

        let p2_events = tracker.events_for("p2");
        assert_eq!(p2_events.len(), 1);
        assert_eq!(p2_events[0].error.as_deref(), Some("boom"));
        assert_eq!(tracker.state_of("p2"), PluginState::Disabled);
        assert_eq!(tracker.events()[2].sequence, 2);
    }

    #[test]
    fn test_plugins_in_state() {
        let mut tracker = LifecycleTracker::new();
        tracker.transition("a", PluginState::Started, None);
        tracker.transition("b", PluginState::Stopped, None);
        tracker.transition("c", PluginState::Started, None);

        let mut running = tracker.plugins_in(PluginState::Started);
        running.sort();
        assert_eq!(running, vec!["a", "c"]);
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&PluginState::PreInit).unwrap();
        assert_eq!(json, "\"pre_init\"");

        let parsed: Stage = serde_json::from_str("\"stop\"").unwrap();
        assert_eq!(parsed, Stage::Stop);
        assert_eq!(Stage::PreInit.to_string(), "pre_init");
    }
}
