use std::collections::HashSet;

use tracing::warn;

use crate::flags::{InternalFlags, PluginFlags};

/// User choices applied to plugins as they register.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginPolicy {
    disabled: HashSet<String>,
    late: HashSet<String>,
}

impl PluginPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_lists<I, J>(disabled: I, late: J) -> Self
    where
        I: IntoIterator<Item = String>,
        J: IntoIterator<Item = String>,
    {
        Self {
            disabled: disabled.into_iter().collect(),
            late: late.into_iter().collect(),
        }
    }

    pub fn disable(mut self, id: &str) -> Self {
        self.disabled.insert(id.to_string());
        self
    }

    pub fn enable_late(mut self, id: &str) -> Self {
        self.late.insert(id.to_string());
        self
    }

    pub fn is_disabled(&self, id: &str) -> bool {
        self.disabled.contains(id)
    }

    pub fn is_late(&self, id: &str) -> bool {
        self.late.contains(id)
    }

    /// Flags `id` should actually register with. Essential plugins keep
    /// `ENABLED` whatever the policy says.
    pub(crate) fn apply(&self, id: &str, mut flags: PluginFlags, internal: InternalFlags) -> PluginFlags {
        if self.is_disabled(id) {
            if internal.contains(InternalFlags::ESSENTIAL) {
                warn!(plugin = %id, "policy cannot disable an essential plugin");
            } else {
                flags.remove(PluginFlags::ENABLED);
            }
        }
        if self.is_late(id) {
            flags.insert(PluginFlags::ENABLED_LATE);
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_plugins_lose_enabled() {
        let policy = PluginPolicy::new().disable("ads");
        let flags = policy.apply("ads", PluginFlags::ENABLED, InternalFlags::empty());
        assert!(!flags.contains(PluginFlags::ENABLED));

        let flags = policy.apply("other", PluginFlags::ENABLED, InternalFlags::empty());
        assert!(flags.contains(PluginFlags::ENABLED));
    }

    #[test]
    fn test_essential_plugins_ignore_policy() {
        let policy = PluginPolicy::from_lists(["core".to_string()], []);
        let flags = policy.apply("core", PluginFlags::ENABLED, InternalFlags::ESSENTIAL);
        assert!(flags.contains(PluginFlags::ENABLED));
    }

    #[test]
    fn test_late_list_marks_enabled_late() {
        let policy = PluginPolicy::new().enable_late("themes");
        let flags = policy.apply("themes", PluginFlags::ENABLED, InternalFlags::empty());
        assert_eq!(flags, PluginFlags::ENABLED | PluginFlags::ENABLED_LATE);
        assert!(policy.is_late("themes"));
        assert!(!policy.is_disabled("themes"));
    }
}
