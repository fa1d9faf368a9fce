//! Process-scoped singletons and idempotent boot.
//!
//! [`AppContext`] lazily creates config, cache, logger, and the live service
//! facade on first access and returns the same instance afterwards.
//! [`Bootstrap`] runs the boot sequence exactly once and hands every caller
//! the same `Arc<AppContext>`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::autoload::{Autoloader, DefinitionRegistry};
use crate::cache::Cache;
use crate::config::{ConfigLoader, Environment, ProcessConfig, ROOT_VAR};
use crate::error::{BootError, ConfigLoadError};
use crate::logger::Logger;
use crate::reload::ReloadController;
use crate::server::ServerHandle;
use crate::service::{ServiceFacade, ServiceFacadeBuilder, SystemService};

/// Builds a fresh facade. Called at boot and again on every reload.
pub type ServiceBuilder = Arc<dyn Fn(&AppContext) -> anyhow::Result<ServiceFacade> + Send + Sync>;

/// Programmatic initializer run once at boot, after the facade is built.
pub type Initializer = Box<dyn Fn(&AppContext) -> anyhow::Result<()> + Send + Sync>;

fn default_service_builder() -> ServiceBuilder {
    Arc::new(|ctx: &AppContext| -> anyhow::Result<ServiceFacade> {
        Ok(ctx.facade_builder()?.build())
    })
}

// ---------------------------------------------------------------------------
// AppContext
// ---------------------------------------------------------------------------

pub struct AppContext {
    root: PathBuf,
    env: Environment,
    loader: ConfigLoader,
    install_subscriber: bool,
    config: OnceCell<Arc<ProcessConfig>>,
    cache: OnceCell<Cache>,
    logger: OnceCell<Logger>,
    autoloader: Arc<dyn Autoloader>,
    service_builder: ServiceBuilder,
    service: ArcSwapOption<ServiceFacade>,
    service_init: Mutex<()>,
    server: OnceCell<Arc<ServerHandle>>,
}

impl AppContext {
    /// Creates a context without loading anything.
    #[must_use]
    pub fn new(options: &BootOptions) -> Self {
        let root = options.resolve_root();
        let env = options.env.clone().unwrap_or_else(Environment::from_env);
        let mut loader = ConfigLoader::new(root.clone(), env.clone()).with_env_vars(options.env_vars);
        for (key, value) in &options.overrides {
            loader = loader.with_override(key.clone(), value.clone());
        }
        Self {
            root,
            env,
            loader,
            install_subscriber: options.install_subscriber,
            config: OnceCell::new(),
            cache: OnceCell::new(),
            logger: OnceCell::new(),
            autoloader: options
                .autoloader
                .clone()
                .unwrap_or_else(|| -> Arc<dyn Autoloader> { Arc::new(DefinitionRegistry::new()) }),
            service_builder: options
                .service_builder
                .clone()
                .unwrap_or_else(default_service_builder),
            service: ArcSwapOption::empty(),
            service_init: Mutex::new(()),
            server: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Loads configuration on first call; later calls return the same `Arc`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigLoadError` if loading fails. A failed load is retried
    /// on the next call.
    pub fn config(&self) -> Result<Arc<ProcessConfig>, ConfigLoadError> {
        self.config
            .get_or_try_init(|| self.loader.load().map(Arc::new))
            .cloned()
    }

    /// Resolves the cache backend from configuration on first call.
    ///
    /// # Errors
    ///
    /// Returns `BootError` if configuration cannot be loaded or the backend
    /// is unknown or misconfigured.
    pub fn cache(&self) -> Result<Cache, BootError> {
        self.cache
            .get_or_try_init(|| -> Result<Cache, BootError> {
                let config = self.config()?;
                let cache = Cache::from_spec(&config.cache_store)?;
                debug!(backend = cache.backend_name(), "cache ready");
                Ok(cache)
            })
            .cloned()
    }

    /// Opens `log/<env>.log` on first call and, if enabled, installs the
    /// tracing subscriber writing to it.
    ///
    /// # Errors
    ///
    /// Returns `BootError::Logger` if the sink cannot be opened.
    pub fn logger(&self) -> Result<Logger, BootError> {
        self.logger
            .get_or_try_init(|| -> Result<Logger, BootError> {
                let config = self.config()?;
                let logger = Logger::open(&self.root, &self.env, config.log_format)?;
                if self.install_subscriber && !logger.install_subscriber() {
                    debug!("a global tracing subscriber is already installed");
                }
                Ok(logger)
            })
            .cloned()
    }

    #[must_use]
    pub fn autoloader(&self) -> &Arc<dyn Autoloader> {
        &self.autoloader
    }

    /// A facade builder pre-loaded with the built-in system methods.
    ///
    /// # Errors
    ///
    /// Returns `BootError` if configuration cannot be loaded.
    pub fn facade_builder(&self) -> Result<ServiceFacadeBuilder, BootError> {
        let config = self.config()?;
        let builder = ServiceFacade::builder()
            .register(SystemService::new(config.app_name.clone(), self.env.as_str()))?;
        Ok(builder)
    }

    /// Runs the service builder, returning a facade that is not installed.
    ///
    /// # Errors
    ///
    /// Returns `BootError::ServiceBuilder` wrapping the builder's failure.
    pub fn build_service(&self) -> Result<ServiceFacade, BootError> {
        let facade = (self.service_builder)(self).map_err(BootError::ServiceBuilder)?;
        for name in facade.service_names() {
            self.autoloader.mark_loaded(name);
        }
        Ok(facade)
    }

    /// The live facade, built on first access.
    ///
    /// # Errors
    ///
    /// Returns `BootError` if the first build fails.
    pub fn service(&self) -> Result<Arc<ServiceFacade>, BootError> {
        if let Some(facade) = self.service.load_full() {
            return Ok(facade);
        }
        let _init = self.service_init.lock();
        if let Some(facade) = self.service.load_full() {
            return Ok(facade);
        }
        let facade = Arc::new(self.build_service()?);
        self.service.store(Some(Arc::clone(&facade)));
        Ok(facade)
    }

    /// Installs `facade` as the live facade.
    pub fn replace_service(&self, facade: Arc<ServiceFacade>) {
        let _init = self.service_init.lock();
        self.service.store(Some(facade));
    }

    /// Records the process's server.
    ///
    /// # Errors
    ///
    /// Returns `BootError::ServerAlreadyRunning` if one is already set.
    pub fn register_server(&self, handle: Arc<ServerHandle>) -> Result<(), BootError> {
        self.server
            .set(handle)
            .map_err(|_| BootError::ServerAlreadyRunning)
    }

    #[must_use]
    pub fn server(&self) -> Option<Arc<ServerHandle>> {
        self.server.get().cloned()
    }

    /// Shorthand for [`ReloadController::reload`].
    ///
    /// # Errors
    ///
    /// See [`ReloadController::reload`].
    pub fn reload(self: &Arc<Self>, force: bool) -> Result<bool, BootError> {
        ReloadController::new(Arc::clone(self)).reload(force)
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("root", &self.root)
            .field("env", &self.env)
            .field("config_loaded", &self.config.get().is_some())
            .field("server", &self.server.get().map(|s| s.local_addr()))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// BootOptions
// ---------------------------------------------------------------------------

/// Inputs to [`Bootstrap`]. Unset fields fall back to the environment:
/// root from `HARBOR_ROOT` or the current directory, environment from
/// `HARBOR_ENV`.
pub struct BootOptions {
    root: Option<PathBuf>,
    env: Option<Environment>,
    env_vars: bool,
    overrides: Vec<(String, String)>,
    install_subscriber: bool,
    autoloader: Option<Arc<dyn Autoloader>>,
    service_builder: Option<ServiceBuilder>,
    initializers: Vec<(String, Initializer)>,
}

impl BootOptions {
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: None,
            env: None,
            env_vars: true,
            overrides: Vec::new(),
            install_subscriber: true,
            autoloader: None,
            service_builder: None,
            initializers: Vec::new(),
        }
    }

    #[must_use]
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    #[must_use]
    pub fn env(mut self, env: Environment) -> Self {
        self.env = Some(env);
        self
    }

    /// Whether `HARBOR__*` variables override file configuration.
    #[must_use]
    pub fn env_vars(mut self, enabled: bool) -> Self {
        self.env_vars = enabled;
        self
    }

    #[must_use]
    pub fn config_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    /// Whether opening the logger installs the global tracing subscriber.
    #[must_use]
    pub fn install_subscriber(mut self, enabled: bool) -> Self {
        self.install_subscriber = enabled;
        self
    }

    #[must_use]
    pub fn autoloader(mut self, autoloader: Arc<dyn Autoloader>) -> Self {
        self.autoloader = Some(autoloader);
        self
    }

    #[must_use]
    pub fn service_builder<F>(mut self, builder: F) -> Self
    where
        F: Fn(&AppContext) -> anyhow::Result<ServiceFacade> + Send + Sync + 'static,
    {
        self.service_builder = Some(Arc::new(builder));
        self
    }

    /// Adds an initializer; initializers run in the order added.
    #[must_use]
    pub fn initializer<F>(mut self, name: impl Into<String>, init: F) -> Self
    where
        F: Fn(&AppContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.initializers.push((name.into(), Box::new(init)));
        self
    }

    fn resolve_root(&self) -> PathBuf {
        self.root
            .clone()
            .or_else(|| std::env::var_os(ROOT_VAR).map(PathBuf::from))
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

impl Default for BootOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

/// Runs the boot sequence once.
pub struct Bootstrap {
    options: BootOptions,
    context: OnceCell<Arc<AppContext>>,
}

impl Bootstrap {
    #[must_use]
    pub fn new(options: BootOptions) -> Self {
        Self {
            options,
            context: OnceCell::new(),
        }
    }

    /// Boots on the first call and returns the same context on every call.
    /// Concurrent first calls block until the one running boot finishes.
    ///
    /// Sequence: load config, open the logger, register autoload paths,
    /// build the facade, run initializers in order.
    ///
    /// # Errors
    ///
    /// Returns the first `BootError`; a later call retries from scratch.
    pub fn init(&self) -> Result<Arc<AppContext>, BootError> {
        self.context.get_or_try_init(|| self.boot()).cloned()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.context.get().is_some()
    }

    /// The context, if boot has completed.
    #[must_use]
    pub fn context(&self) -> Option<Arc<AppContext>> {
        self.context.get().cloned()
    }

    fn boot(&self) -> Result<Arc<AppContext>, BootError> {
        let ctx = Arc::new(AppContext::new(&self.options));
        let config = ctx.config()?;
        ctx.logger()?;

        let paths: Vec<PathBuf> = config
            .autoload_paths
            .iter()
            .map(|path| {
                if path.is_absolute() {
                    path.clone()
                } else {
                    ctx.root().join(path)
                }
            })
            .collect();
        ctx.autoloader().register_paths(&paths);

        ctx.service()?;

        for (name, init) in &self.options.initializers {
            debug!(initializer = %name, "running initializer");
            init(&ctx).map_err(|source| BootError::Initializer {
                name: name.clone(),
                source,
            })?;
        }

        info!("ENV: {}", ctx.env());
        Ok(ctx)
    }
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn options(root: &Path) -> BootOptions {
        BootOptions::new()
            .root(root)
            .env(Environment::new("test"))
            .env_vars(false)
            .install_subscriber(false)
    }

    #[test]
    fn init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&runs);
        let boot = Bootstrap::new(options(dir.path()).initializer("count", move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        assert!(!boot.is_initialized());
        let first = boot.init().unwrap();
        let second = boot.init().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(boot.is_initialized());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn singletons_are_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Bootstrap::new(options(dir.path())).init().unwrap();
        assert!(Arc::ptr_eq(&ctx.config().unwrap(), &ctx.config().unwrap()));
        assert!(Arc::ptr_eq(&ctx.service().unwrap(), &ctx.service().unwrap()));
        assert!(Arc::ptr_eq(ctx.cache().unwrap().store(), ctx.cache().unwrap().store()));
        assert_eq!(ctx.logger().unwrap().path(), ctx.logger().unwrap().path());
    }

    #[test]
    fn boot_creates_log_file_and_registers_paths() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(DefinitionRegistry::new());
        let ctx = Bootstrap::new(options(dir.path()).autoloader(registry.clone()))
            .init()
            .unwrap();
        assert!(dir.path().join("log/test.log").exists());
        assert_eq!(registry.paths()[0], dir.path().join("app/services"));
        assert!(ctx.service().unwrap().has_method("ping"));
        assert!(registry.is_loaded("system"));
    }

    #[test]
    fn reload_forgets_then_relearns_loaded_services() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(DefinitionRegistry::new());
        let ctx = Bootstrap::new(options(dir.path()).autoloader(registry.clone()))
            .init()
            .unwrap();
        assert_eq!(registry.loaded_count(), 1);

        registry.invalidate_loaded_definitions();
        assert!(!registry.is_loaded("system"));

        ctx.reload(true).unwrap();
        assert!(registry.is_loaded("system"));
        assert_eq!(registry.generation(), 2);
    }

    #[test]
    fn initializers_run_in_order_after_facade() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&seen), Arc::clone(&seen));
        let boot = Bootstrap::new(
            options(dir.path())
                .initializer("first", move |ctx| {
                    assert!(ctx.service()?.has_method("ping"));
                    a.lock().push("first");
                    Ok(())
                })
                .initializer("second", move |_| {
                    b.lock().push("second");
                    Ok(())
                }),
        );
        boot.init().unwrap();
        assert_eq!(*seen.lock(), vec!["first", "second"]);
    }

    #[test]
    fn failed_initializer_leaves_boot_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&attempts);
        let boot = Bootstrap::new(options(dir.path()).initializer("flaky", move |_| {
            if counted.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("not yet");
            }
            Ok(())
        }));
        let err = boot.init().unwrap_err();
        assert!(matches!(err, BootError::Initializer { ref name, .. } if name == "flaky"));
        assert!(!boot.is_initialized());
        boot.init().unwrap();
        assert!(boot.is_initialized());
    }

    #[test]
    fn invalid_config_fails_boot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("config")).unwrap();
        std::fs::write(dir.path().join("config/application.toml"), "thread_pool_size = 0\n").unwrap();
        let err = Bootstrap::new(options(dir.path())).init().unwrap_err();
        assert!(matches!(err, BootError::Config(ConfigLoadError::Invalid { .. })));
    }

    #[test]
    fn unknown_cache_backend_surfaces_on_access() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Bootstrap::new(options(dir.path()).config_override("cache_store.backend", "mem_cache"))
            .init()
            .unwrap();
        assert!(matches!(ctx.cache(), Err(BootError::Cache(_))));
    }

    #[test]
    fn second_server_registration_is_rejected() {
        use arc_swap::ArcSwap;
        use harbor_core::{Protocol, ProtocolKind};

        use crate::config::ConcurrencyMode;
        use crate::processor::ServiceProcessor;
        use crate::server::SupervisorState;

        let dir = tempfile::tempdir().unwrap();
        let ctx = Bootstrap::new(options(dir.path())).init().unwrap();
        let handle = || {
            let processor = ServiceProcessor::new(ctx.service().unwrap(), Protocol::new(ProtocolKind::Binary));
            Arc::new(ServerHandle::new(
                "127.0.0.1:0".parse().unwrap(),
                ConcurrencyMode::EventDriven,
                None,
                Arc::new(ArcSwap::from_pointee(processor)),
                Arc::new(ArcSwap::from_pointee(SupervisorState::Initializing)),
            ))
        };
        ctx.register_server(handle()).unwrap();
        assert!(matches!(ctx.register_server(handle()), Err(BootError::ServerAlreadyRunning)));
    }
}
