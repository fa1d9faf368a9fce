//! Development hot reload: forget loaded definitions and swap the live
//! processor without touching the listening socket.

use std::sync::Arc;

use tracing::{debug, info};

use crate::context::AppContext;
use crate::error::BootError;
use crate::processor::ServiceProcessor;
use crate::server::SupervisorState;

#[derive(Debug, Clone)]
pub struct ReloadController {
    ctx: Arc<AppContext>,
}

impl ReloadController {
    #[must_use]
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Reloads when `force` is set or `cache_classes` is off; otherwise a
    /// no-op. On reload the autoloader is invalidated, a fresh facade is
    /// built and installed in the context, and a bound server (started or
    /// serving) gets a new processor over it. Connections already open keep
    /// their old one.
    ///
    /// Returns `Ok(true)` whether or not anything ran.
    ///
    /// # Errors
    ///
    /// Returns `BootError` if configuration cannot be read or the service
    /// builder fails; nothing is swapped in that case.
    pub fn reload(&self, force: bool) -> Result<bool, BootError> {
        let config = self.ctx.config()?;
        if !force && config.cache_classes {
            debug!("reload skipped: cache_classes is enabled");
            return Ok(true);
        }

        self.ctx.autoloader().invalidate_loaded_definitions();
        let facade = Arc::new(self.ctx.build_service()?);

        if let Some(server) = self.ctx.server() {
            if matches!(
                server.state(),
                SupervisorState::Initializing | SupervisorState::Serving
            ) {
                let protocol = server.processor().protocol();
                let previous =
                    server.swap_processor(ServiceProcessor::new(Arc::clone(&facade), protocol));
                info!(
                    previous = previous.facade().instance_id(),
                    current = facade.instance_id(),
                    "swapped server processor"
                );
            } else {
                debug!(state = %server.state(), "server stopped; processor left in place");
            }
        }

        self.ctx.replace_service(facade);
        Ok(true)
    }
}
