use std::cell::RefCell;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use futures::FutureExt;
use futures::executor::{LocalPool, LocalSpawner};
use futures::task::LocalSpawnExt;
use serde::Serialize;
use tracing::error;

use crate::error::Result;
use crate::panic_message;

/// Deferred plugin work that failed after its stage had moved on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnhandledFault {
    pub plugin: String,
    pub message: String,
}

/// Single-threaded queue for work plugins schedule from their hooks.
pub(crate) struct TaskQueue {
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
    faults: Rc<RefCell<Vec<UnhandledFault>>>,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            pool: RefCell::new(pool),
            spawner,
            faults: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub(crate) fn spawn(
        &self,
        plugin: &str,
        task: impl Future<Output = anyhow::Result<()>> + 'static,
    ) -> Result<()> {
        let plugin = plugin.to_string();
        let faults = Rc::clone(&self.faults);
        self.spawner.spawn_local(async move {
            let message = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => return,
                Ok(Err(err)) => format!("{err:#}"),
                Err(panic) => panic_message(&*panic),
            };
            error!(plugin = %plugin, "deferred plugin work failed: {message}");
            faults.borrow_mut().push(UnhandledFault { plugin, message });
        })?;
        Ok(())
    }

    /// Poll queued work until nothing can make progress.
    pub(crate) fn run_until_stalled(&self) {
        self.pool.borrow_mut().run_until_stalled();
    }

    pub(crate) fn faults(&self) -> Vec<UnhandledFault> {
        self.faults.borrow().clone()
    }
}
