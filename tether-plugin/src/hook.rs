use std::fmt;

use crate::capability::StageContext;
use crate::lifecycle::Stage;

/// Stage hooks of a plugin. Every hook defaults to doing nothing.
///
/// Returning an error (or panicking) disables the plugin and runs its
/// cleanup; the other plugins are not affected.
pub trait PluginHooks {
    fn pre_init(&self, _ctx: &StageContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn init(&self, _ctx: &StageContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn start(&self, _ctx: &StageContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&self, _ctx: &StageContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

pub(crate) fn run_stage_hook(
    hooks: &dyn PluginHooks,
    stage: Stage,
    ctx: &StageContext<'_>,
) -> anyhow::Result<()> {
    match stage {
        Stage::PreInit => hooks.pre_init(ctx),
        Stage::Init => hooks.init(ctx),
        Stage::Start => hooks.start(ctx),
        Stage::Stop => hooks.stop(ctx),
    }
}

type HookFn = Box<dyn Fn(&StageContext<'_>) -> anyhow::Result<()>>;

/// Closure-based [`PluginHooks`].
#[derive(Default)]
pub struct HookSet {
    pre_init: Option<HookFn>,
    init: Option<HookFn>,
    start: Option<HookFn>,
    stop: Option<HookFn>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_pre_init(
        mut self,
        hook: impl Fn(&StageContext<'_>) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.pre_init = Some(Box::new(hook));
        self
    }

    pub fn on_init(mut self, hook: impl Fn(&StageContext<'_>) -> anyhow::Result<()> + 'static) -> Self {
        self.init = Some(Box::new(hook));
        self
    }

    pub fn on_start(mut self, hook: impl Fn(&StageContext<'_>) -> anyhow::Result<()> + 'static) -> Self {
        self.start = Some(Box::new(hook));
        self
    }

    pub fn on_stop(mut self, hook: impl Fn(&StageContext<'_>) -> anyhow::Result<()> + 'static) -> Self {
        self.stop = Some(Box::new(hook));
        self
    }

    fn call(hook: Option<&HookFn>, ctx: &StageContext<'_>) -> anyhow::Result<()> {
        hook.map_or(Ok(()), |hook| hook(ctx))
    }
}

impl PluginHooks for HookSet {
    fn pre_init(&self, ctx: &StageContext<'_>) -> anyhow::Result<()> {
        Self::call(self.pre_init.as_ref(), ctx)
    }

    fn init(&self, ctx: &StageContext<'_>) -> anyhow::Result<()> {
        Self::call(self.init.as_ref(), ctx)
    }

    fn start(&self, ctx: &StageContext<'_>) -> anyhow::Result<()> {
        Self::call(self.start.as_ref(), ctx)
    }

    fn stop(&self, ctx: &StageContext<'_>) -> anyhow::Result<()> {
        Self::call(self.stop.as_ref(), ctx)
    }
}

impl fmt::Debug for HookSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSet")
            .field("pre_init", &self.pre_init.is_some())
            .field("init", &self.init.is_some())
            .field("start", &self.start.is_some())
            .field("stop", &self.stop.is_some())
            .finish()
    }
}
