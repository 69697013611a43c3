//! A [`Server`] bundled with the registry its things land in.

use std::sync::Arc;

use wot_core::{MemoryRegistry, Options, Thing, ThingRegistry};

use crate::server::{Server, ServerError};
use crate::transport::ShutdownStatus;

/// A server plus its thing registry.
pub struct Framework {
    server: Server,
    registry: Arc<dyn ThingRegistry>,
}

impl Framework {
    /// Compose `server` with an in-memory registry.
    pub fn new(server: Server) -> Self {
        Self::with_registry(server, Arc::new(MemoryRegistry::new()))
    }

    pub fn with_registry(mut server: Server, registry: Arc<dyn ThingRegistry>) -> Self {
        server.set_registry(registry.clone());
        Self { server, registry }
    }

    /// Start with no options.
    pub fn start(&mut self) -> Result<(), ServerError> {
        self.server.start(Options::new())
    }

    pub fn start_with(&mut self, options: Options) -> Result<(), ServerError> {
        self.server.start(options)
    }

    pub fn register_thing(&self, thing: &Thing) {
        self.registry.register_thing(thing);
    }

    /// Every thing seen so far, in registration order.
    pub fn things(&self) -> Vec<Thing> {
        self.registry.things()
    }

    pub fn registry(&self) -> &Arc<dyn ThingRegistry> {
        &self.registry
    }

    pub fn shutdown<F>(&mut self, done: F)
    where
        F: FnOnce(ShutdownStatus) + Send + 'static,
    {
        self.server.shutdown(done);
    }

    pub async fn stop(&mut self) -> ShutdownStatus {
        self.server.stop().await
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut Server {
        &mut self.server
    }
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framework")
            .field("server", &self.server)
            .field("things", &self.registry.things().len())
            .finish()
    }
}
