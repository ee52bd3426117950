//! Service registry: name -> [`Service`] lookup shared by all connections.
//!
//! The registry is built before traffic starts and handed to the server by
//! value; connections share it read-only behind an `Arc`. There is no
//! deregistration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, RpcError};
use crate::service::{MethodHandler, Service};

/// Maps service names to registered services.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Service>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service under its name. Last registration wins.
    pub fn register(&mut self, service: Service) {
        for method in service.method_names() {
            tracing::info!(service = %service.name(), method, "register method");
        }
        self.services.insert(service.name().to_string(), service);
    }

    /// Look up a service and one of its methods by name.
    pub fn lookup(&self, service: &str, method: &str) -> Result<(&Service, Arc<MethodHandler>)> {
        let svc = self
            .services
            .get(service)
            .ok_or_else(|| RpcError::ServiceNotFound(service.to_string()))?;
        let handler = svc
            .method(method)
            .ok_or_else(|| RpcError::MethodNotFound(method.to_string()))?;
        Ok((svc, handler))
    }

    /// Resolve a `"Service.Method"` string to its invocation handle.
    ///
    /// The string must have exactly two dot-separated components.
    pub fn resolve(&self, service_method: &str) -> Result<Arc<MethodHandler>> {
        let mut parts = service_method.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(service), Some(method), None) => {
                let (_, handler) = self.lookup(service, method)?;
                Ok(handler)
            }
            _ => Err(RpcError::InvalidServiceMethod(service_method.to_string())),
        }
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// True if no service is registered.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecKind;
    use bytes::Bytes;

    fn echo_service(name: &str, suffix: &'static str) -> Service {
        Service::builder(name, ())
            .method("Say", move |_: &(), s: String, reply: &mut String| {
                *reply = format!("{s}{suffix}");
                Ok(())
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_lookup_known_service_method() {
        let mut registry = ServiceRegistry::new();
        registry.register(echo_service("Echo", ""));

        let (svc, _handler) = registry.lookup("Echo", "Say").unwrap();
        assert_eq!(svc.name(), "Echo");
    }

    #[test]
    fn test_lookup_unknown_service() {
        let registry = ServiceRegistry::new();
        let err = registry.lookup("Ghost", "Say").unwrap_err();
        assert!(matches!(err, RpcError::ServiceNotFound(_)));
    }

    #[test]
    fn test_lookup_unknown_method() {
        let mut registry = ServiceRegistry::new();
        registry.register(echo_service("Echo", ""));

        let err = registry.lookup("Echo", "Shout").unwrap_err();
        assert!(matches!(err, RpcError::MethodNotFound(_)));
    }

    #[test]
    fn test_resolve_well_formed() {
        let mut registry = ServiceRegistry::new();
        registry.register(echo_service("Echo", ""));
        assert!(registry.resolve("Echo.Say").is_ok());
    }

    #[test]
    fn test_resolve_malformed_strings() {
        let mut registry = ServiceRegistry::new();
        registry.register(echo_service("Echo", ""));

        for bad in ["NoDot", "A.B.C", "", "..."] {
            let err = registry.resolve(bad).unwrap_err();
            assert!(
                matches!(err, RpcError::InvalidServiceMethod(_)),
                "{bad:?} should be ill-formatted, got {err}"
            );
        }
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = ServiceRegistry::new();
        registry.register(echo_service("Echo", "-old"));
        registry.register(echo_service("Echo", "-new"));
        assert_eq!(registry.len(), 1);

        let handler = registry.resolve("Echo.Say").unwrap();
        let codec = CodecKind::MsgPack;
        let payload = Bytes::from(codec.encode(&"x").unwrap());
        let reply: String = codec.decode(&handler.invoke(codec, payload).unwrap()).unwrap();
        assert_eq!(reply, "x-new");
    }

    #[test]
    fn test_service_exposes_exactly_registered_methods() {
        // One registered method; anything else is not invocable.
        let mut registry = ServiceRegistry::new();
        registry.register(echo_service("Echo", ""));

        assert!(registry.resolve("Echo.Say").is_ok());
        let err = registry.resolve("Echo.NotRegistered").unwrap_err();
        assert!(matches!(err, RpcError::MethodNotFound(_)));
    }
}
