//! The unified service facade: one method table over every domain service.
//!
//! Method names are flat strings. Each name resolves to exactly one handler
//! owned by exactly one service; a second registration of the same name is
//! rejected when the facade is built, never silently shadowed.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use harbor_core::Value;

use super::args::Args;
use super::error::{DispatchError, RegistrationError};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Type-erased method handler.
pub type Handler = Arc<dyn Fn(&[Value]) -> Result<Value, DispatchError> + Send + Sync>;

// ---------------------------------------------------------------------------
// DomainService trait
// ---------------------------------------------------------------------------

/// A business-logic service contributing methods to the facade.
///
/// The `Any` bound enables typed lookup via [`ServiceFacade::get`].
pub trait DomainService: Send + Sync + Any {
    /// Unique service name (e.g. `"users"`).
    fn name(&self) -> &'static str;

    /// Adds this service's methods. Handlers capture the `Arc` so every
    /// method stays bound to this instance.
    ///
    /// # Errors
    ///
    /// Propagates `RegistrationError` from the table.
    fn register_methods(self: Arc<Self>, table: &mut MethodTable) -> Result<(), RegistrationError>;
}

// ---------------------------------------------------------------------------
// MethodTable
// ---------------------------------------------------------------------------

struct MethodEntry {
    owner: &'static str,
    handler: Handler,
}

/// Method name to handler mapping under construction.
pub struct MethodTable {
    owner: &'static str,
    methods: HashMap<String, MethodEntry>,
}

impl MethodTable {
    fn new() -> Self {
        Self {
            owner: "",
            methods: HashMap::new(),
        }
    }

    /// Registers a raw handler under `name` for the service currently
    /// registering.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError::DuplicateMethod` if `name` is taken.
    pub fn method<F>(&mut self, name: &str, handler: F) -> Result<&mut Self, RegistrationError>
    where
        F: Fn(&[Value]) -> Result<Value, DispatchError> + Send + Sync + 'static,
    {
        if let Some(existing) = self.methods.get(name) {
            return Err(RegistrationError::DuplicateMethod {
                method: name.to_string(),
                service: self.owner,
                existing: existing.owner,
            });
        }
        self.methods.insert(
            name.to_string(),
            MethodEntry {
                owner: self.owner,
                handler: Arc::new(handler),
            },
        );
        Ok(self)
    }

    /// Registers `f` as a method of `service`, wrapping arguments in
    /// [`Args`] named after the method.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError::DuplicateMethod` if `name` is taken.
    pub fn bind<S>(
        &mut self,
        name: &'static str,
        service: &Arc<S>,
        f: fn(&S, Args<'_>) -> Result<Value, DispatchError>,
    ) -> Result<&mut Self, RegistrationError>
    where
        S: Send + Sync + 'static,
    {
        let service = Arc::clone(service);
        self.method(name, move |values| f(&service, Args::new(name, values)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ServiceFacadeBuilder
// ---------------------------------------------------------------------------

/// Collects services, then freezes them into a [`ServiceFacade`].
pub struct ServiceFacadeBuilder {
    table: MethodTable,
    by_type: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    order: Vec<&'static str>,
}

impl ServiceFacadeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: MethodTable::new(),
            by_type: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Registers a service and all of its methods.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError` on a duplicate service name or method.
    pub fn register<S: DomainService>(self, service: S) -> Result<Self, RegistrationError> {
        self.register_arc(Arc::new(service))
    }

    /// Like [`register`](Self::register) for an already shared service.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError` on a duplicate service name or method.
    pub fn register_arc<S: DomainService>(mut self, service: Arc<S>) -> Result<Self, RegistrationError> {
        let name = service.name();
        if self.order.contains(&name) {
            return Err(RegistrationError::DuplicateService { name });
        }
        self.table.owner = name;
        Arc::clone(&service).register_methods(&mut self.table)?;
        self.by_type.insert(TypeId::of::<S>(), service);
        self.order.push(name);
        tracing::debug!(service = name, methods = self.table.len(), "registered service");
        Ok(self)
    }

    #[must_use]
    pub fn build(self) -> ServiceFacade {
        ServiceFacade {
            instance_id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            methods: self.table.methods,
            by_type: self.by_type,
            services: self.order,
        }
    }
}

impl Default for ServiceFacadeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ServiceFacade
// ---------------------------------------------------------------------------

/// Immutable dispatch table shared by every connection.
pub struct ServiceFacade {
    instance_id: u64,
    methods: HashMap<String, MethodEntry>,
    by_type: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    services: Vec<&'static str>,
}

impl ServiceFacade {
    #[must_use]
    pub fn builder() -> ServiceFacadeBuilder {
        ServiceFacadeBuilder::new()
    }

    /// Process-unique id; a rebuilt facade always gets a larger one.
    #[must_use]
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// Invokes the handler registered under `method`.
    ///
    /// # Errors
    ///
    /// `UnknownMethod` when nothing is registered under `method`; otherwise
    /// whatever the handler returns.
    pub fn dispatch(&self, method: &str, args: &[Value]) -> Result<Value, DispatchError> {
        let entry = self
            .methods
            .get(method)
            .ok_or_else(|| DispatchError::UnknownMethod {
                name: method.to_string(),
            })?;
        (entry.handler)(args)
    }

    #[must_use]
    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// Name of the service that owns `method`.
    #[must_use]
    pub fn owner_of(&self, method: &str) -> Option<&'static str> {
        self.methods.get(method).map(|entry| entry.owner)
    }

    /// All method names, sorted.
    #[must_use]
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Service names in registration order.
    #[must_use]
    pub fn service_names(&self) -> &[&'static str] {
        &self.services
    }

    /// Retrieves a registered service by its concrete type.
    #[must_use]
    pub fn get<T: DomainService>(&self) -> Option<Arc<T>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|service| Arc::clone(service).downcast::<T>().ok())
    }
}

impl fmt::Debug for ServiceFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceFacade")
            .field("instance_id", &self.instance_id)
            .field("services", &self.services)
            .field("methods", &self.methods.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Greeter {
        greeting: &'static str,
    }

    impl Greeter {
        fn greet(&self, args: Args<'_>) -> Result<Value, DispatchError> {
            args.expect_len(1)?;
            Ok(Value::from(format!("{}, {}", self.greeting, args.str(0)?)))
        }
    }

    impl DomainService for Greeter {
        fn name(&self) -> &'static str {
            "greeter"
        }

        fn register_methods(self: Arc<Self>, table: &mut MethodTable) -> Result<(), RegistrationError> {
            table.bind("greet", &self, Greeter::greet)?;
            Ok(())
        }
    }

    struct Math;

    impl DomainService for Math {
        fn name(&self) -> &'static str {
            "math"
        }

        fn register_methods(self: Arc<Self>, table: &mut MethodTable) -> Result<(), RegistrationError> {
            table
                .method("add", |values| {
                    let args = Args::new("add", values);
                    args.expect_len(2)?;
                    Ok(Value::Int(args.i64(0)? + args.i64(1)?))
                })?
                .method("fail", |_| Err(anyhow::anyhow!("boom").into()))?;
            Ok(())
        }
    }

    struct Impostor;

    impl DomainService for Impostor {
        fn name(&self) -> &'static str {
            "impostor"
        }

        fn register_methods(self: Arc<Self>, table: &mut MethodTable) -> Result<(), RegistrationError> {
            table.method("add", |_| Ok(Value::Null))?;
            Ok(())
        }
    }

    fn facade() -> ServiceFacade {
        ServiceFacade::builder()
            .register(Greeter { greeting: "hello" })
            .unwrap()
            .register(Math)
            .unwrap()
            .build()
    }

    #[test]
    fn dispatch_routes_to_owner() {
        let facade = facade();
        assert_eq!(
            facade.dispatch("greet", &[Value::from("ann")]).unwrap(),
            Value::from("hello, ann")
        );
        assert_eq!(
            facade.dispatch("add", &[Value::Int(2), Value::Int(3)]).unwrap(),
            Value::Int(5)
        );
        assert_eq!(facade.owner_of("add"), Some("math"));
        assert_eq!(facade.method_names(), vec!["add", "fail", "greet"]);
        assert_eq!(facade.service_names(), &["greeter", "math"]);
    }

    #[test]
    fn unknown_method() {
        let err = facade().dispatch("nope", &[]).unwrap_err();
        assert!(matches!(err, DispatchError::UnknownMethod { name } if name == "nope"));
    }

    #[test]
    fn handler_errors_propagate() {
        let facade = facade();
        assert!(matches!(
            facade.dispatch("add", &[Value::from("x"), Value::Int(1)]),
            Err(DispatchError::InvalidArguments(_))
        ));
        assert!(matches!(facade.dispatch("fail", &[]), Err(DispatchError::Service(_))));
    }

    #[test]
    fn duplicate_method_is_rejected() {
        let err = ServiceFacade::builder()
            .register(Math)
            .unwrap()
            .register(Impostor)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            RegistrationError::DuplicateMethod { ref method, service: "impostor", existing: "math" } if method == "add"
        ));
    }

    #[test]
    fn duplicate_service_is_rejected() {
        let err = ServiceFacade::builder()
            .register(Math)
            .unwrap()
            .register(Math)
            .err()
            .unwrap();
        assert!(matches!(err, RegistrationError::DuplicateService { name: "math" }));
    }

    #[test]
    fn lookup_by_type() {
        let facade = facade();
        assert_eq!(facade.get::<Greeter>().unwrap().greeting, "hello");
        assert!(facade.get::<Impostor>().is_none());
    }

    #[test]
    fn instance_ids_increase() {
        let first = facade();
        let second = facade();
        assert!(second.instance_id() > first.instance_id());
    }
}
