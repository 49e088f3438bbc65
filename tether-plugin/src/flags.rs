bitflags::bitflags! {
    /// Flags a plugin is registered with. `RELOAD_REQUIRED` is also set by
    /// the plugin itself at runtime.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PluginFlags: u32 {
        const ENABLED = 1 << 0;
        /// Enabled after the boot window closed.
        const ENABLED_LATE = 1 << 1;
        /// The plugin changed something it cannot undo; the host has to
        /// restart for the effect to go away.
        const RELOAD_REQUIRED = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Flags only first-party code assigns.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InternalFlags: u32 {
        /// First-party plugin. Runs ahead of user plugins in every stage.
        const INTERNAL = 1 << 0;
        /// Cannot be disabled by policy or on request.
        const ESSENTIAL = 1 << 1;
        /// Other plugins rely on it without saying so.
        const IMPLICIT_DEPENDENCY = 1 << 2;
    }
}
