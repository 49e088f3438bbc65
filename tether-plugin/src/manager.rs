//! Drives registered plugins through their stages.
//!
//! All plugins finish a stage before any of them enters the next one. Within
//! a stage internal plugins go first, then user plugins, each group in
//! registration order. A hook that fails or panics disables its own plugin
//! and nothing else.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use tether_modules::ModuleRegistry;
use tracing::{debug, error, info, warn};

use crate::capability::{DecoratorFault, Decorators, StageContext, Unscoped};
use crate::cleanup::CleanupRegistry;
use crate::error::{PluginError, Result};
use crate::flags::{InternalFlags, PluginFlags};
use crate::hook::{PluginHooks, run_stage_hook};
use crate::lifecycle::{LifecycleEvent, LifecycleTracker, PluginState, Stage};
use crate::panic_message;
use crate::policy::PluginPolicy;
use crate::registry::{PluginEntry, PluginManifest, PluginRegistry};
use crate::storage::{MemoryStorage, PluginStorage, StorageBackend};
use crate::tasks::{TaskQueue, UnhandledFault};

/// Outcome of running one stage across plugins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: Stage,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl StageReport {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

pub struct PluginManager {
    registry: RefCell<PluginRegistry>,
    tracker: RefCell<LifecycleTracker>,
    unscoped: Unscoped,
    decorators: Decorators,
    tasks: TaskQueue,
    backend: Rc<dyn StorageBackend>,
    policy: PluginPolicy,
    booted: Cell<bool>,
}

impl PluginManager {
    pub fn new(modules: ModuleRegistry) -> Self {
        Self {
            registry: RefCell::new(PluginRegistry::default()),
            tracker: RefCell::new(LifecycleTracker::new()),
            unscoped: Unscoped::new(modules),
            decorators: Decorators::default(),
            tasks: TaskQueue::new(),
            backend: Rc::new(MemoryStorage::new()),
            policy: PluginPolicy::default(),
            booted: Cell::new(false),
        }
    }

    pub fn with_backend(mut self, backend: Rc<dyn StorageBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_policy(mut self, policy: PluginPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn unscoped(&self) -> &Unscoped {
        &self.unscoped
    }

    pub fn modules(&self) -> &ModuleRegistry {
        self.unscoped.modules()
    }

    pub fn policy(&self) -> &PluginPolicy {
        &self.policy
    }

    /// Register a plugin.
    ///
    /// Fails with [`PluginError::NotEnabled`] when `ENABLED` is missing after
    /// policy is applied; such a plugin never runs a hook. A plugin
    /// registered after [`boot`](Self::boot) is enabled late right away.
    pub fn register(
        &self,
        manifest: PluginManifest,
        hooks: impl PluginHooks + 'static,
        flags: PluginFlags,
        internal: InternalFlags,
    ) -> Result<()> {
        let id = manifest.id.clone();
        let mut flags = self.policy.apply(&id, flags, internal);
        if !flags.contains(PluginFlags::ENABLED) {
            info!(plugin = %id, "plugin is not enabled; not registering");
            return Err(PluginError::NotEnabled { id });
        }
        let catch_up = self.booted.get() && !flags.contains(PluginFlags::ENABLED_LATE);
        if catch_up {
            flags.insert(PluginFlags::ENABLED_LATE);
        }

        let entry = PluginEntry {
            storage: PluginStorage::new(&id, manifest.storage.as_ref(), Rc::clone(&self.backend)),
            cleanup: CleanupRegistry::new(&id),
            manifest: Rc::new(manifest),
            hooks: Rc::new(hooks),
            flags: Cell::new(flags),
            internal,
        };
        let entry = self.registry.borrow_mut().register(entry)?;
        self.tracker
            .borrow_mut()
            .transition(&id, PluginState::Registered, None);
        info!(plugin = %id, ?flags, ?internal, "plugin registered");

        if catch_up {
            debug!(plugin = %id, "registered after boot; catching up");
            self.activate(&entry);
        }
        Ok(())
    }

    /// Run `stage` for every plugin due for it.
    pub fn run_stage(&self, stage: Stage) -> StageReport {
        let plugins = self.registry.borrow().stage_order();
        let mut report = StageReport::new(stage);
        for entry in plugins {
            if !self.is_due(&entry, stage) {
                continue;
            }
            if self.run_hook(&entry, stage) {
                report.succeeded.push(entry.id().to_string());
            } else {
                report.failed.push(entry.id().to_string());
            }
        }
        info!(
            %stage,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "stage complete"
        );
        report
    }

    /// Run the boot stages in order, then drive deferred work until it
    /// stalls. Plugins flagged `ENABLED_LATE` are held back.
    pub fn boot(&self) -> Result<Vec<StageReport>> {
        if self.booted.replace(true) {
            return Err(PluginError::AlreadyBooted);
        }
        let reports = Stage::BOOT
            .into_iter()
            .map(|stage| self.run_stage(stage))
            .collect();
        self.tasks.run_until_stalled();
        info!(plugins = self.registry.borrow().len(), "plugins booted");
        Ok(reports)
    }

    pub fn is_booted(&self) -> bool {
        self.booted.get()
    }

    /// Take a held-back plugin through pre_init, init and start now.
    pub fn enable_late(&self, id: &str) -> Result<PluginState> {
        let entry = self.entry(id)?;
        let state = self.state_of(id);
        if state != PluginState::Registered {
            return Err(PluginError::InvalidTransition {
                id: id.to_string(),
                from: state,
                to: PluginState::PreInit,
            });
        }
        entry.insert_flags(PluginFlags::ENABLED_LATE);
        info!(plugin = %id, "enabling plugin late");
        Ok(self.activate(&entry))
    }

    pub fn stop_plugin(&self, id: &str) -> Result<PluginState> {
        self.toggle(id, Stage::Stop)
    }

    pub fn start_plugin(&self, id: &str) -> Result<PluginState> {
        self.toggle(id, Stage::Start)
    }

    /// Stop every started plugin, in reverse stage order.
    pub fn stop_all(&self) -> StageReport {
        let plugins = self.registry.borrow().stage_order();
        let mut report = StageReport::new(Stage::Stop);
        for entry in plugins.iter().rev() {
            if !self.is_due(entry, Stage::Stop) {
                continue;
            }
            if self.run_hook(entry, Stage::Stop) {
                report.succeeded.push(entry.id().to_string());
            } else {
                report.failed.push(entry.id().to_string());
            }
        }
        report
    }

    /// Stop (if running) and permanently disable a plugin.
    pub fn disable(&self, id: &str) -> Result<()> {
        let entry = self.entry(id)?;
        if entry.is_essential() {
            warn!(plugin = %id, "refusing to disable essential plugin");
            return Err(PluginError::Essential { id: id.to_string() });
        }
        match self.state_of(id) {
            PluginState::Disabled => return Ok(()),
            PluginState::Started => {
                self.run_hook(&entry, Stage::Stop);
            }
            _ => {}
        }
        if self.state_of(id) != PluginState::Disabled {
            entry.cleanup.run_all();
            self.tracker
                .borrow_mut()
                .transition(id, PluginState::Disabled, None);
        }
        info!(plugin = %id, "plugin disabled");
        Ok(())
    }

    pub fn status(&self, id: &str) -> Option<PluginState> {
        self.registry
            .borrow()
            .get(id)
            .map(|_| self.state_of(id))
    }

    pub fn flags(&self, id: &str) -> Option<PluginFlags> {
        self.registry.borrow().get(id).map(|entry| entry.flags.get())
    }

    /// Registered plugin ids in registration order.
    pub fn plugin_ids(&self) -> Vec<String> {
        self.registry.borrow().ids()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.tracker.borrow().events().to_vec()
    }

    pub fn events_for(&self, id: &str) -> Vec<LifecycleEvent> {
        self.tracker
            .borrow()
            .events_for(id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Plugins that flagged themselves as needing a host reload.
    pub fn reload_required(&self) -> Vec<String> {
        self.registry
            .borrow()
            .all()
            .iter()
            .filter(|entry| entry.flags.get().contains(PluginFlags::RELOAD_REQUIRED))
            .map(|entry| entry.id().to_string())
            .collect()
    }

    /// Poll deferred plugin work until none of it can make progress.
    pub fn run_until_stalled(&self) {
        self.tasks.run_until_stalled();
    }

    pub fn unhandled_faults(&self) -> Vec<UnhandledFault> {
        self.tasks.faults()
    }

    fn entry(&self, id: &str) -> Result<Rc<PluginEntry>> {
        self.registry
            .borrow()
            .get(id)
            .ok_or_else(|| PluginError::Unknown { id: id.to_string() })
    }

    fn state_of(&self, id: &str) -> PluginState {
        self.tracker.borrow().state_of(id)
    }

    fn is_due(&self, entry: &PluginEntry, stage: Stage) -> bool {
        let state = self.state_of(entry.id());
        if !stage.accepts(state) {
            return false;
        }
        // Late plugins wait for `enable_late`.
        !(state == PluginState::Registered && entry.flags.get().contains(PluginFlags::ENABLED_LATE))
    }

    fn activate(&self, entry: &PluginEntry) -> PluginState {
        for stage in Stage::BOOT {
            if !self.run_hook(entry, stage) {
                break;
            }
        }
        self.state_of(entry.id())
    }

    fn toggle(&self, id: &str, stage: Stage) -> Result<PluginState> {
        let entry = self.entry(id)?;
        let state = self.state_of(id);
        let allowed = match stage {
            Stage::Stop => state == PluginState::Started,
            _ => state == PluginState::Stopped,
        };
        if !allowed {
            return Err(PluginError::InvalidTransition {
                id: id.to_string(),
                from: state,
                to: stage.target(),
            });
        }
        self.run_hook(&entry, stage);
        Ok(self.state_of(id))
    }

    /// Disable the plugin whose decorator failed. Its cleanup removes the
    /// decorator.
    fn fail_decorator_owner(&self, fault: DecoratorFault, stage: Stage) {
        let Some(owner) = self.registry.borrow().get(&fault.owner) else {
            return;
        };
        if self.state_of(owner.id()) == PluginState::Disabled {
            return;
        }
        error!(plugin = %owner.id(), %stage, "decorator failed; disabling plugin: {}", fault.message);
        self.tracker
            .borrow_mut()
            .fail(owner.id(), Some(stage), fault.message);
        owner.cleanup.run_all();
    }

    /// Run one hook in isolation. Returns whether it succeeded.
    fn run_hook(&self, entry: &PluginEntry, stage: Stage) -> bool {
        let id = entry.id();
        let (ctx, decorator_faults) =
            StageContext::new(stage, &self.unscoped, entry, &self.decorators, &self.tasks);
        for fault in decorator_faults {
            self.fail_decorator_owner(fault, stage);
        }
        let outcome = catch_unwind(AssertUnwindSafe(|| run_stage_hook(&*entry.hooks, stage, &ctx)));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(format!("{err:#}")),
            Err(panic) => Some(format!("panicked: {}", panic_message(&*panic))),
        };

        match failure {
            None => {
                self.tracker
                    .borrow_mut()
                    .transition(id, stage.target(), Some(stage));
                debug!(plugin = %id, %stage, "stage hook finished");
                if stage == Stage::Stop {
                    entry.cleanup.run_all();
                }
                true
            }
            Some(message) => {
                error!(plugin = %id, %stage, "stage hook failed; disabling plugin: {message}");
                self.tracker.borrow_mut().fail(id, Some(stage), message);
                entry.cleanup.run_all();
                false
            }
        }
    }
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.registry.borrow().len())
            .field("decorators", &self.decorators.len())
            .field("booted", &self.booted.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tether_modules::{Exports, Filter, ModuleId, ModuleRecord, WaitOptions};
    use tracing_test::traced_test;

    use super::*;
    use crate::capability::Scoped;
    use crate::hook::HookSet;
    use crate::logger::PluginLogger;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Recorder {
        id: &'static str,
        log: Log,
        fail_at: Option<Stage>,
    }

    impl Recorder {
        fn new(id: &'static str, log: &Log) -> Self {
            Self {
                id,
                log: Rc::clone(log),
                fail_at: None,
            }
        }

        fn failing_at(mut self, stage: Stage) -> Self {
            self.fail_at = Some(stage);
            self
        }

        fn record(&self, stage: Stage) -> anyhow::Result<()> {
            self.log.borrow_mut().push(format!("{}:{stage}", self.id));
            if self.fail_at == Some(stage) {
                anyhow::bail!("{} gave up in {stage}", self.id);
            }
            Ok(())
        }
    }

    impl PluginHooks for Recorder {
        fn pre_init(&self, _ctx: &StageContext<'_>) -> anyhow::Result<()> {
            self.record(Stage::PreInit)
        }

        fn init(&self, _ctx: &StageContext<'_>) -> anyhow::Result<()> {
            self.record(Stage::Init)
        }

        fn start(&self, _ctx: &StageContext<'_>) -> anyhow::Result<()> {
            self.record(Stage::Start)
        }

        fn stop(&self, _ctx: &StageContext<'_>) -> anyhow::Result<()> {
            self.record(Stage::Stop)
        }
    }

    fn manifest(id: &str) -> PluginManifest {
        PluginManifest::new(id, id, &format!("{id} plugin"))
    }

    fn manager() -> PluginManager {
        PluginManager::new(ModuleRegistry::new())
    }

    fn log() -> Log {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn test_unenabled_plugin_never_runs_hooks() {
        let manager = manager();
        let log = log();
        let err = manager
            .register(
                manifest("off"),
                Recorder::new("off", &log),
                PluginFlags::empty(),
                InternalFlags::empty(),
            )
            .unwrap_err();
        assert!(matches!(err, PluginError::NotEnabled { id } if id == "off"));

        manager.boot().unwrap();
        manager.stop_all();
        assert!(log.borrow().is_empty());
        assert_eq!(manager.status("off"), None);
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let manager = manager();
        manager
            .register(manifest("a"), HookSet::new(), PluginFlags::ENABLED, InternalFlags::empty())
            .unwrap();
        let err = manager
            .register(manifest("a"), HookSet::new(), PluginFlags::ENABLED, InternalFlags::empty())
            .unwrap_err();
        assert!(matches!(err, PluginError::Duplicate { .. }));
    }

    #[test]
    fn test_stage_barrier_and_ordering() {
        let manager = manager();
        let log = log();
        for (id, internal) in [
            ("user-a", InternalFlags::empty()),
            ("core", InternalFlags::INTERNAL),
            ("user-b", InternalFlags::empty()),
        ] {
            manager
                .register(manifest(id), Recorder::new(id, &log), PluginFlags::ENABLED, internal)
                .unwrap();
        }

        let reports = manager.boot().unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(
            *log.borrow(),
            vec![
                "core:pre_init",
                "user-a:pre_init",
                "user-b:pre_init",
                "core:init",
                "user-a:init",
                "user-b:init",
                "core:start",
                "user-a:start",
                "user-b:start",
            ]
        );
        assert_eq!(manager.status("user-b"), Some(PluginState::Started));
        assert!(matches!(manager.boot(), Err(PluginError::AlreadyBooted)));
    }

    #[test]
    #[traced_test]
    fn test_pre_init_failure_is_isolated() {
        let manager = manager();
        let log = log();
        manager
            .register(
                manifest("a"),
                Recorder::new("a", &log).failing_at(Stage::PreInit),
                PluginFlags::ENABLED,
                InternalFlags::empty(),
            )
            .unwrap();
        manager
            .register(manifest("b"), Recorder::new("b", &log), PluginFlags::ENABLED, InternalFlags::empty())
            .unwrap();

        let reports = manager.boot().unwrap();
        assert_eq!(reports[0].failed, vec!["a"]);
        assert_eq!(reports[0].succeeded, vec!["b"]);
        assert_eq!(
            *log.borrow(),
            vec!["a:pre_init", "b:pre_init", "b:init", "b:start"]
        );
        assert_eq!(manager.status("a"), Some(PluginState::Disabled));
        assert_eq!(manager.status("b"), Some(PluginState::Started));

        let failure = manager.events_for("a").pop().unwrap();
        assert_eq!(failure.stage, Some(Stage::PreInit));
        assert_eq!(failure.error.as_deref(), Some("a gave up in pre_init"));
        assert!(logs_contain("stage hook failed"));
    }

    #[test]
    fn test_panicking_hook_is_caught() {
        let manager = manager();
        let cleaned = Rc::new(Cell::new(false));
        let c = Rc::clone(&cleaned);
        manager
            .register(
                manifest("panicky"),
                HookSet::new()
                    .on_pre_init(move |ctx| {
                        let c = Rc::clone(&c);
                        ctx.cleanup(move || c.set(true));
                        Ok(())
                    })
                    .on_init(|_| panic!("init exploded")),
                PluginFlags::ENABLED,
                InternalFlags::empty(),
            )
            .unwrap();

        manager.boot().unwrap();
        assert_eq!(manager.status("panicky"), Some(PluginState::Disabled));
        assert!(cleaned.get());
        let error = manager.events_for("panicky").pop().unwrap().error.unwrap();
        assert!(error.contains("init exploded"));
    }

    #[test]
    fn test_stop_runs_cleanup_once_and_start_again() {
        let manager = manager();
        let disposed = Rc::new(Cell::new(0));
        let d = Rc::clone(&disposed);
        manager
            .register(
                manifest("toggle"),
                HookSet::new().on_start(move |ctx| {
                    let d = Rc::clone(&d);
                    ctx.cleanup(move || d.set(d.get() + 1));
                    Ok(())
                }),
                PluginFlags::ENABLED,
                InternalFlags::empty(),
            )
            .unwrap();
        manager.boot().unwrap();

        assert_eq!(manager.stop_plugin("toggle").unwrap(), PluginState::Stopped);
        assert_eq!(disposed.get(), 1);
        assert!(matches!(
            manager.stop_plugin("toggle"),
            Err(PluginError::InvalidTransition { from: PluginState::Stopped, .. })
        ));
        assert_eq!(disposed.get(), 1);

        assert_eq!(manager.start_plugin("toggle").unwrap(), PluginState::Started);
        manager.stop_all();
        assert_eq!(disposed.get(), 2);
        assert_eq!(manager.status("toggle"), Some(PluginState::Stopped));
    }

    #[test]
    fn test_decorators_reach_other_plugins() {
        let manager = manager();
        let seen = Rc::new(RefCell::new(Vec::new()));
        manager
            .register(
                manifest("logging"),
                HookSet::new().on_pre_init(|ctx| {
                    ctx.decorate(|scoped: &Scoped| {
                        scoped.extensions().insert(PluginLogger::new(&format!("ext/{}", scoped.id())));
                    });
                    Ok(())
                }),
                PluginFlags::ENABLED,
                InternalFlags::INTERNAL,
            )
            .unwrap();
        for id in ["logging-check", "other"] {
            let s = Rc::clone(&seen);
            manager
                .register(
                    manifest(id),
                    HookSet::new().on_init(move |ctx| {
                        let ext = ctx.scoped().extensions().get::<PluginLogger>();
                        s.borrow_mut().push((ctx.manifest().id.clone(), ext.map(|l| l.plugin().to_string())));
                        Ok(())
                    }),
                    PluginFlags::ENABLED,
                    InternalFlags::empty(),
                )
                .unwrap();
        }

        manager.boot().unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![
                ("logging-check".to_string(), Some("ext/logging-check".to_string())),
                ("other".to_string(), Some("ext/other".to_string())),
            ]
        );
    }

    #[test]
    #[traced_test]
    fn test_panicking_decorator_disables_its_owner_only() {
        let manager = manager();
        let owner_cleaned = Rc::new(Cell::new(false));
        let c = Rc::clone(&owner_cleaned);
        manager
            .register(
                manifest("bad-decorator"),
                HookSet::new().on_pre_init(move |ctx| {
                    let c = Rc::clone(&c);
                    ctx.cleanup(move || c.set(true));
                    ctx.decorate(|_| panic!("decorator bug"));
                    Ok(())
                }),
                PluginFlags::ENABLED,
                InternalFlags::INTERNAL,
            )
            .unwrap();
        let log = log();
        manager
            .register(manifest("victim"), Recorder::new("victim", &log), PluginFlags::ENABLED, InternalFlags::empty())
            .unwrap();

        let reports = manager.boot().unwrap();
        assert!(reports.iter().all(|report| report.failed.is_empty()));
        assert_eq!(manager.status("victim"), Some(PluginState::Started));
        assert_eq!(
            *log.borrow(),
            vec!["victim:pre_init", "victim:init", "victim:start"]
        );

        assert_eq!(manager.status("bad-decorator"), Some(PluginState::Disabled));
        assert!(owner_cleaned.get());
        assert_eq!(manager.decorators.len(), 0);
        let failure = manager.events_for("bad-decorator").pop().unwrap();
        assert_eq!(failure.stage, Some(Stage::PreInit));
        assert!(failure.error.unwrap().contains("decorator bug"));
        assert!(manager.events_for("victim").iter().all(|event| event.error.is_none()));
        assert!(logs_contain("bad-decorator"));
    }

    #[test]
    fn test_decorator_goes_away_with_its_owner() {
        let manager = manager();
        manager
            .register(
                manifest("owner"),
                HookSet::new().on_pre_init(|ctx| {
                    ctx.decorate(|scoped| {
                        scoped.extensions().insert(1_u8);
                    });
                    Ok(())
                }),
                PluginFlags::ENABLED,
                InternalFlags::empty(),
            )
            .unwrap();
        manager.boot().unwrap();
        assert_eq!(manager.decorators.len(), 1);
        manager.disable("owner").unwrap();
        assert_eq!(manager.decorators.len(), 0);
        assert_eq!(manager.status("owner"), Some(PluginState::Disabled));
    }

    #[test]
    fn test_essential_plugins_cannot_be_disabled() {
        let manager = manager().with_policy(PluginPolicy::new().disable("core"));
        manager
            .register(
                manifest("core"),
                HookSet::new(),
                PluginFlags::ENABLED,
                InternalFlags::INTERNAL | InternalFlags::ESSENTIAL,
            )
            .unwrap();
        manager.boot().unwrap();
        assert!(matches!(manager.disable("core"), Err(PluginError::Essential { .. })));
        assert_eq!(manager.status("core"), Some(PluginState::Started));
    }

    #[test]
    fn test_policy_disables_plugins() {
        let manager = manager().with_policy(PluginPolicy::new().disable("ads"));
        let log = log();
        let err = manager
            .register(manifest("ads"), Recorder::new("ads", &log), PluginFlags::ENABLED, InternalFlags::empty())
            .unwrap_err();
        assert!(matches!(err, PluginError::NotEnabled { .. }));
        manager.boot().unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_late_plugins_wait_for_enable_late() {
        let manager = manager();
        let late_seen = Rc::new(Cell::new(None));
        let l = Rc::clone(&late_seen);
        manager
            .register(
                manifest("late"),
                HookSet::new().on_start(move |ctx| {
                    l.set(Some(ctx.is_late()));
                    if ctx.is_late() {
                        ctx.require_reload();
                    }
                    Ok(())
                }),
                PluginFlags::ENABLED | PluginFlags::ENABLED_LATE,
                InternalFlags::empty(),
            )
            .unwrap();

        manager.boot().unwrap();
        assert_eq!(manager.status("late"), Some(PluginState::Registered));
        assert_eq!(late_seen.get(), None);

        assert_eq!(manager.enable_late("late").unwrap(), PluginState::Started);
        assert_eq!(late_seen.get(), Some(true));
        assert_eq!(manager.reload_required(), vec!["late"]);
        assert!(matches!(
            manager.enable_late("late"),
            Err(PluginError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_registering_after_boot_catches_up() {
        let manager = manager();
        manager.boot().unwrap();
        let log = log();
        manager
            .register(manifest("new"), Recorder::new("new", &log), PluginFlags::ENABLED, InternalFlags::empty())
            .unwrap();
        assert_eq!(*log.borrow(), vec!["new:pre_init", "new:init", "new:start"]);
        assert!(manager.flags("new").unwrap().contains(PluginFlags::ENABLED_LATE));
    }

    #[test]
    fn test_deferred_failures_do_not_disable_the_plugin() {
        let manager = manager();
        manager
            .register(
                manifest("async"),
                HookSet::new().on_init(|ctx| {
                    ctx.spawn(async { Err(anyhow::anyhow!("late failure")) })?;
                    Ok(())
                }),
                PluginFlags::ENABLED,
                InternalFlags::empty(),
            )
            .unwrap();

        manager.boot().unwrap();
        assert_eq!(manager.status("async"), Some(PluginState::Started));
        assert_eq!(
            manager.unhandled_faults(),
            vec![UnhandledFault {
                plugin: "async".into(),
                message: "late failure".into(),
            }]
        );
    }

    #[test]
    fn test_subscriptions_end_with_the_plugin() {
        let manager = manager();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        manager
            .register(
                manifest("watcher"),
                HookSet::new().on_start(move |ctx| {
                    let h = Rc::clone(&h);
                    ctx.wait(Filter::by_props(["open"]), WaitOptions::default(), move |_, _| {
                        h.set(h.get() + 1);
                    })?;
                    Ok(())
                }),
                PluginFlags::ENABLED,
                InternalFlags::empty(),
            )
            .unwrap();
        manager.boot().unwrap();

        let modules = manager.modules().clone();
        modules.observe(
            ModuleRecord::new(ModuleId(1), vec![]).initialized(Exports::builder().value("open", 1).build()),
        );
        assert_eq!(hits.get(), 1);

        manager.disable("watcher").unwrap();
        modules.observe(
            ModuleRecord::new(ModuleId(2), vec![]).initialized(Exports::builder().value("open", 1).build()),
        );
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_shared_namespace_and_storage() {
        let manager = manager();
        manager.unscoped().shared().insert(RefCell::new(Vec::<String>::new()));
        manager
            .register(
                manifest("writer"),
                HookSet::new().on_init(|ctx| {
                    ctx.storage().set("runs", &1)?;
                    if let Some(list) = ctx.shared().get::<RefCell<Vec<String>>>() {
                        list.borrow_mut().push(ctx.manifest().id.clone());
                    }
                    Ok(())
                }),
                PluginFlags::ENABLED,
                InternalFlags::empty(),
            )
            .unwrap();
        manager.boot().unwrap();

        let list = manager.unscoped().shared().get::<RefCell<Vec<String>>>().unwrap();
        assert_eq!(*list.borrow(), vec!["writer".to_string()]);
        assert_eq!(manager.events().len(), 4);
        assert_eq!(manager.plugin_ids(), vec!["writer"]);
    }

    #[test]
    fn test_unknown_plugin() {
        let manager = manager();
        assert!(matches!(manager.disable("ghost"), Err(PluginError::Unknown { .. })));
        assert!(matches!(manager.enable_late("ghost"), Err(PluginError::Unknown { .. })));
        assert_eq!(manager.flags("ghost"), None);
    }
}
