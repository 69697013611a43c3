//! The broker front-end.
//!
//! [`Server`] gives both transports the same shape: create it with a
//! transport factory, start it with callbacks, receive `newThing`, `data`
//! and `start` events, shut it down. It handles:
//! - Configuration resolution on every start
//! - Installing user callbacks
//! - Subscribing to the transport's lifecycle events
//! - The Idle/Running state, with a guard against double starts

use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use wot_core::{
    BrokerConfig, CallbackKey, CallbackTable, ConfigError, ConfigSource, DataPayload, Event,
    EventName, OptionValue, Options, ProcessEnv, RouteError, StartInfo, Thing, ThingRegistry,
};

use crate::router::Router;
use crate::transport::{ShutdownStatus, TransportBroker, TransportError, TransportFactory};

/// Keys every fresh server carries.
const OWN_KEYS: [&str; 2] = ["callbacks", "server"];

/// Errors returned by [`Server::start`].
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Server is already running; shut it down before starting again")]
    AlreadyRunning,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// State the transport's event handlers share with the server.
///
/// The handlers own an `Arc` of this, so it outlives the transport.
#[derive(Default)]
struct Shared {
    callbacks: RwLock<CallbackTable>,
    registry: RwLock<Option<Arc<dyn ThingRegistry>>>,
}

impl Shared {
    fn callbacks(&self) -> CallbackTable {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn on_new_thing(&self, thing: &Thing) {
        let registry = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match registry {
            Some(registry) => registry.register_thing(thing),
            None => debug!("No registry installed, thing {} not registered", thing.id),
        }
        (self.callbacks().onnewthing)(thing);
    }

    fn on_data(&self, payload: &DataPayload) {
        (self.callbacks().ondata)(payload);
    }

    fn on_start(&self, info: &StartInfo) {
        (self.callbacks().onstart)(info);
    }
}

/// The broker front-end.
pub struct Server {
    factory: Arc<dyn TransportFactory>,
    source: Arc<dyn ConfigSource>,
    shared: Arc<Shared>,
    attributes: Options,
    server: Option<Box<dyn TransportBroker>>,
}

impl Server {
    /// Create a server for a transport, with `options` merged onto it.
    ///
    /// Options are stored as-is; nothing is validated. Configuration is
    /// read from the process environment unless a source is set with
    /// [`Server::with_source`].
    pub fn create(factory: impl TransportFactory + 'static, options: Options) -> Self {
        Self {
            factory: Arc::new(factory),
            source: Arc::new(ProcessEnv),
            shared: Arc::new(Shared::default()),
            attributes: options,
            server: None,
        }
    }

    /// Read configuration from `source` instead of the live environment.
    pub fn with_source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.set_source(Arc::new(source));
        self
    }

    pub fn set_source(&mut self, source: Arc<dyn ConfigSource>) {
        self.source = source;
    }

    /// Install the registry that `on_new_thing` registers things with.
    pub fn set_registry(&mut self, registry: Arc<dyn ThingRegistry>) {
        *self
            .shared
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(registry);
    }

    /// Name of the transport this server runs.
    pub fn transport(&self) -> &'static str {
        self.factory.name()
    }

    /// Keys of this instance: the fresh keys plus every create-time option.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = OWN_KEYS
            .iter()
            .map(|k| k.to_string())
            .chain(self.attributes.keys().map(String::from))
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// A create-time option. These shadow the instance's own keys.
    pub fn attribute(&self, key: &str) -> Option<&OptionValue> {
        self.attributes.get(key)
    }

    pub fn is_running(&self) -> bool {
        self.server.is_some()
    }

    /// The transport's bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().and_then(|s| s.local_addr())
    }

    /// Start the transport.
    ///
    /// `options` may carry `endpoints` and the `ondata`, `onnewthing` and
    /// `onstart` callbacks. Values under a callback key that are not a
    /// callback of the right kind are ignored and the previous callback
    /// stays installed.
    pub fn start(&mut self, options: Options) -> Result<(), ServerError> {
        if self.server.is_some() {
            warn!("Refusing to start {} broker twice", self.transport());
            return Err(ServerError::AlreadyRunning);
        }

        let config = BrokerConfig::resolve(self.source.as_ref(), options.endpoint_list())?;
        debug!("Resolved {} config: {:?}", self.transport(), config);

        self.install_callbacks(&options);

        let mut transport = self.factory.build(&config)?;
        let router = Router::new();

        let shared = self.shared.clone();
        transport.on(
            EventName::NewThing,
            Arc::new(move |event: &Event| {
                if let Event::NewThing(thing) = event {
                    shared.on_new_thing(thing);
                }
            }),
        );
        let shared = self.shared.clone();
        transport.on(
            EventName::Data,
            Arc::new(move |event: &Event| {
                if let Event::Data(payload) = event {
                    shared.on_data(payload);
                }
            }),
        );
        let shared = self.shared.clone();
        transport.on(
            EventName::Start,
            Arc::new(move |event: &Event| {
                if let Event::Start(info) = event {
                    shared.on_start(info);
                }
            }),
        );

        transport.start(router.dispatch(), self.factory.routes()?)?;

        info!(
            "{} broker started on {}:{}",
            self.transport(),
            config.host,
            config.port
        );
        self.server = Some(transport);
        Ok(())
    }

    fn install_callbacks(&self, options: &Options) {
        let mut table = self
            .shared
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let mut next = table.clone();
        for key in CallbackKey::ALL {
            let candidate = options.get(key.as_str());
            if let Some(value) = candidate {
                if !key.accepts(value) {
                    debug!("Ignoring non-callable {} option", key.as_str());
                }
            }
            next = next.with_candidate(key, candidate);
        }
        *table = next;
    }

    /// Register the thing, then hand it to `onnewthing`.
    pub fn on_new_thing(&self, thing: &Thing) {
        self.shared.on_new_thing(thing);
    }

    /// Hand a payload to `ondata`, unchanged.
    pub fn on_data(&self, payload: &DataPayload) {
        self.shared.on_data(payload);
    }

    pub fn on_start(&self, info: &StartInfo) {
        self.shared.on_start(info);
    }

    /// Stop the transport.
    ///
    /// `done` is invoked exactly once: after teardown with
    /// `was_running: true`, or right away with `was_running: false` when
    /// nothing is running. The server is `Idle` again when this returns.
    pub fn shutdown<F>(&mut self, done: F)
    where
        F: FnOnce(ShutdownStatus) + Send + 'static,
    {
        match self.server.take() {
            Some(mut transport) => {
                info!("Shutting down {} broker", transport.name());
                transport.shutdown(Box::new(done));
            }
            None => {
                debug!("Shutdown requested but {} broker is not running", self.transport());
                done(ShutdownStatus::not_running());
            }
        }
    }

    /// Shut down and wait for teardown to finish.
    pub async fn stop(&mut self) -> ShutdownStatus {
        let (done_tx, done_rx) = oneshot::channel();
        self.shutdown(move |status| {
            let _ = done_tx.send(status);
        });
        done_rx.await.unwrap_or(ShutdownStatus::not_running())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("transport", &self.transport())
            .field("running", &self.is_running())
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}
