//! `Harbor` server: process bootstrap, lazy singletons and the RPC server supervisor.

pub mod autoload;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod logger;
pub mod processor;
pub mod reload;
pub mod server;
pub mod service;

pub use autoload::{Autoloader, DefinitionRegistry};
pub use cache::{Cache, CacheError, CacheKey, CacheStore, FetchOptions, Symbol, WriteOptions};
pub use config::{ConcurrencyMode, ConfigLoader, Environment, LogFormat, ProcessConfig};
pub use context::{AppContext, BootOptions, Bootstrap, ServiceBuilder};
pub use error::{BootError, ConfigLoadError, ServeLoopError};
pub use logger::Logger;
pub use processor::ServiceProcessor;
pub use reload::ReloadController;
pub use server::{ServerHandle, ServerSupervisor, SupervisorState};
pub use service::{
    Args, DispatchError, DomainService, MethodTable, RegistrationError, ServiceFacade,
    SystemService,
};
