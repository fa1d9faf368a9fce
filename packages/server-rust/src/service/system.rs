//! Built-in methods every facade carries.

use std::collections::BTreeMap;
use std::sync::Arc;

use harbor_core::Value;

use super::args::Args;
use super::error::{DispatchError, RegistrationError};
use super::facade::{DomainService, MethodTable};

/// `ping`, `echo`, and `server_info`.
#[derive(Debug, Clone)]
pub struct SystemService {
    app_name: String,
    env: String,
}

impl SystemService {
    #[must_use]
    pub fn new(app_name: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            env: env.into(),
        }
    }

    #[allow(clippy::unnecessary_wraps)]
    fn ping(&self, _args: Args<'_>) -> Result<Value, DispatchError> {
        Ok(Value::from("pong"))
    }

    #[allow(clippy::unnecessary_wraps)]
    fn echo(&self, args: Args<'_>) -> Result<Value, DispatchError> {
        Ok(Value::Array(args.values().to_vec()))
    }

    fn server_info(&self, args: Args<'_>) -> Result<Value, DispatchError> {
        args.expect_len(0)?;
        let mut info = BTreeMap::new();
        info.insert("app_name".to_string(), Value::from(self.app_name.as_str()));
        info.insert("env".to_string(), Value::from(self.env.as_str()));
        info.insert("version".to_string(), Value::from(env!("CARGO_PKG_VERSION")));
        Ok(Value::Map(info))
    }
}

impl DomainService for SystemService {
    fn name(&self) -> &'static str {
        "system"
    }

    fn register_methods(self: Arc<Self>, table: &mut MethodTable) -> Result<(), RegistrationError> {
        table
            .bind("ping", &self, Self::ping)?
            .bind("echo", &self, Self::echo)?
            .bind("server_info", &self, Self::server_info)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceFacade;

    fn facade() -> ServiceFacade {
        ServiceFacade::builder()
            .register(SystemService::new("shop", "test"))
            .unwrap()
            .build()
    }

    #[test]
    fn ping_pongs() {
        assert_eq!(facade().dispatch("ping", &[]).unwrap(), Value::from("pong"));
    }

    #[test]
    fn echo_returns_args() {
        let args = vec![Value::Int(1), Value::from("two"), Value::Null];
        assert_eq!(facade().dispatch("echo", &args).unwrap(), Value::Array(args));
    }

    #[test]
    fn server_info_reports_name_and_env() {
        let info = facade().dispatch("server_info", &[]).unwrap();
        let map = info.as_map().unwrap();
        assert_eq!(map["app_name"], Value::from("shop"));
        assert_eq!(map["env"], Value::from("test"));
    }
}
