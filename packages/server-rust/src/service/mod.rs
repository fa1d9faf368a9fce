//! Service layer: the facade that RPC calls are dispatched into.
//!
//! 1. **Domain services** (`DomainService`) contribute named methods.
//! 2. **Facade** (`facade`): a frozen method table; exact-name lookup.
//! 3. **Arguments** (`args`): positional checks performed by handlers.
//! 4. **System** (`system`): built-in `ping`, `echo`, `server_info`.

pub mod args;
pub mod error;
pub mod facade;
pub mod system;

pub use args::Args;
pub use error::{DispatchError, RegistrationError};
pub use facade::{DomainService, Handler, MethodTable, ServiceFacade, ServiceFacadeBuilder};
pub use system::SystemService;
