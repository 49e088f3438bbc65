use std::cell::RefCell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use tether_modules::WaitHandle;
use tracing::{debug, warn};

use crate::panic_message;

/// A single undo action. Runs at most once.
pub struct Disposer(Box<dyn FnOnce()>);

impl Disposer {
    pub fn new(dispose: impl FnOnce() + 'static) -> Self {
        Self(Box::new(dispose))
    }

    pub fn run(self) {
        (self.0)();
    }
}

impl From<WaitHandle> for Disposer {
    fn from(handle: WaitHandle) -> Self {
        Disposer::new(move || handle.cancel())
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Disposer")
    }
}

/// Per-plugin list of disposers.
///
/// Running the registry drains it, newest first, so running it again only
/// sees disposers added since.
#[derive(Clone)]
pub struct CleanupRegistry {
    plugin: Rc<str>,
    disposers: Rc<RefCell<Vec<Disposer>>>,
}

impl CleanupRegistry {
    pub fn new(plugin: &str) -> Self {
        Self {
            plugin: plugin.into(),
            disposers: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn push(&self, disposer: impl Into<Disposer>) {
        self.disposers.borrow_mut().push(disposer.into());
    }

    pub fn add(&self, dispose: impl FnOnce() + 'static) {
        self.push(Disposer::new(dispose));
    }

    pub fn len(&self) -> usize {
        self.disposers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.disposers.borrow().is_empty()
    }

    /// Run and drop every pending disposer. Returns how many ran.
    ///
    /// A panicking disposer is logged and does not stop the rest.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let Some(disposer) = self.disposers.borrow_mut().pop() else {
                break;
            };
            ran += 1;
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| disposer.run())) {
                warn!(plugin = %self.plugin, "cleanup disposer panicked: {}", panic_message(&*panic));
            }
        }
        if ran > 0 {
            debug!(plugin = %self.plugin, disposers = ran, "cleanup ran");
        }
        ran
    }
}

impl fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("plugin", &self.plugin)
            .field("pending", &self.len())
            .finish()
    }
}
