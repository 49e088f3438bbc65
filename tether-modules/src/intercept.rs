use std::rc::Rc;

use tracing::{error, info};

use crate::error::{ModuleError, Result};
use crate::host::{Entrypoint, Factory, ModuleDefinition};
use crate::registry::ModuleRegistry;

/// Owner tag written into the entrypoint slot.
pub const INTERCEPTOR_OWNER: &str = "tether";

/// Outcome of [`install`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Installation {
    Installed,
    AlreadyInstalled,
}

/// Replace the host's definition entrypoint with one that records every
/// module in `registry` and then forwards to the original.
///
/// Installing twice is a no-op. An entrypoint already replaced by someone
/// else is fatal: nothing the registry reports could be trusted.
pub fn install(entrypoint: &Entrypoint, registry: &ModuleRegistry) -> Result<Installation> {
    if entrypoint.owner().as_deref() == Some(INTERCEPTOR_OWNER) {
        return Ok(Installation::AlreadyInstalled);
    }

    let registry = registry.clone();
    let result = entrypoint.replace(INTERCEPTOR_OWNER, move |original| {
        Rc::new(move |definition: ModuleDefinition| {
            let id = definition.id;
            let fresh = registry.record_definition(&definition).is_some();
            original(observe_factory(&registry, definition));
            // The host may have run the factory already; offer the current state.
            if fresh && let Some(record) = registry.get(id) {
                registry.dispatch(&record);
            }
        })
    });

    match result {
        Ok(()) => {
            info!("module entrypoint intercepted");
            Ok(Installation::Installed)
        }
        Err(err @ ModuleError::EntrypointTaken { .. }) => {
            error!("cannot intercept module entrypoint: {err}");
            Err(err)
        }
        Err(err) => Err(err),
    }
}

/// Wrap the factory so the registry sees the module start and finish.
fn observe_factory(registry: &ModuleRegistry, mut definition: ModuleDefinition) -> ModuleDefinition {
    let id = definition.id;
    let original = Rc::clone(&definition.factory);
    let registry = registry.clone();
    let wrapped: Factory = Rc::new(move |scope| {
        registry.mark_initializing(id);
        match original(scope) {
            Ok(exports) => {
                registry.mark_initialized(id, exports.clone());
                Ok(exports)
            }
            Err(err) => {
                registry.mark_errored(id, &err);
                Err(err)
            }
        }
    });
    definition.factory = wrapped;
    definition
}
