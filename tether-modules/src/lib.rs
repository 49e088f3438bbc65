pub mod error;
pub mod exports;
pub mod filter;
pub mod finder;
pub mod host;
pub mod intercept;
pub mod lazy;
pub mod pattern;
pub mod record;
pub mod registry;
pub mod waiter;

// Re-export key types for convenience.
pub use error::{FactoryError, ModuleError, PredicateFault, Result};
pub use exports::{ExportValue, Exports, ExportsBuilder, NativeFunction};
pub use filter::{Filter, Visibility};
pub use finder::Found;
pub use host::{BundleHost, Entrypoint, Factory, ModuleDefinition, ModuleScope};
pub use intercept::{INTERCEPTOR_OWNER, Installation, install};
pub use lazy::{Binding, Deferred, Lazy};
pub use pattern::{DependencyPattern, DependencyPatternBuilder, RelativeTo, Slot};
pub use record::{Dependency, ModuleId, ModuleRecord, ModuleState};
pub use registry::ModuleRegistry;
pub use waiter::{WaitHandle, WaitOptions};
