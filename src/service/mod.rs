//! Services: named collections of invocable methods bound to one receiver.
//!
//! There is no runtime reflection here; the dynamic "invoke by name" contract
//! is an explicit registration table. Each registered method is erased into a
//! [`MethodHandler`] closure that decodes the argument, allocates a default
//! reply, calls the underlying function against the shared receiver, and
//! encodes the reply. Method shape (one argument, one mutable reply, one
//! error result) is enforced by the registration signature, so the hot
//! dispatch path never re-validates.
//!
//! # Example
//!
//! ```
//! use minrpc::Service;
//!
//! struct Counter;
//!
//! let svc = Service::builder("Counter", Counter)
//!     .method("Bump", |_recv: &Counter, n: u32, reply: &mut u32| {
//!         *reply = n + 1;
//!         Ok(())
//!     })
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(svc.name(), "Counter");
//! assert!(svc.method("Bump").is_some());
//! ```

mod registry;

pub use registry::ServiceRegistry;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::CodecKind;
use crate::error::{Result, RpcError};

/// Type-erased invocation handle for one registered method.
///
/// Holds everything needed to run the method against its receiver: the
/// argument decode, the default-initialized reply allocation, the call
/// itself, and the reply encode.
pub struct MethodHandler {
    invoke: Box<dyn Fn(CodecKind, Bytes) -> Result<Vec<u8>> + Send + Sync>,
}

impl MethodHandler {
    fn new<T, A, R, F>(receiver: Arc<T>, f: F) -> Self
    where
        T: Send + Sync + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Default + Send + 'static,
        F: Fn(&T, A, &mut R) -> Result<()> + Send + Sync + 'static,
    {
        let invoke = Box::new(move |codec: CodecKind, payload: Bytes| -> Result<Vec<u8>> {
            let args: A = codec.decode(&payload)?;
            // Replies start as a fresh default value: maps and vectors are
            // empty, usable containers before the handler runs.
            let mut reply = R::default();
            f(&receiver, args, &mut reply)?;
            codec.encode(&reply)
        });
        Self { invoke }
    }

    /// Invoke the method with an encoded argument, yielding an encoded reply.
    pub fn invoke(&self, codec: CodecKind, payload: Bytes) -> Result<Vec<u8>> {
        (self.invoke)(codec, payload)
    }
}

impl std::fmt::Debug for MethodHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodHandler").finish_non_exhaustive()
    }
}

/// A named, registered capability: one receiver and its invocable methods.
#[derive(Debug)]
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<MethodHandler>>,
}

impl Service {
    /// Start building a service around a receiver.
    ///
    /// The receiver is shared (`Arc`) across all method closures and every
    /// concurrent invocation; it must synchronize its own interior state.
    pub fn builder<T>(name: impl Into<String>, receiver: T) -> ServiceBuilder<T>
    where
        T: Send + Sync + 'static,
    {
        ServiceBuilder {
            name: name.into(),
            receiver: Arc::new(receiver),
            methods: HashMap::new(),
        }
    }

    /// The service name, as addressed in `"Service.Method"` strings.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a method by name.
    pub fn method(&self, name: &str) -> Option<Arc<MethodHandler>> {
        self.methods.get(name).cloned()
    }

    /// Names of all exposed methods, in arbitrary order.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

/// Fluent builder collecting methods for a [`Service`].
pub struct ServiceBuilder<T> {
    name: String,
    receiver: Arc<T>,
    methods: HashMap<String, Arc<MethodHandler>>,
}

impl<T: Send + Sync + 'static> ServiceBuilder<T> {
    /// Register a method.
    ///
    /// The function receives the shared receiver, the decoded argument, and a
    /// mutable reply that starts as `R::default()`. Returning an error
    /// propagates its message to the caller in the response header.
    /// Registering the same name twice keeps the last registration.
    pub fn method<A, R, F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Default + Send + 'static,
        F: Fn(&T, A, &mut R) -> Result<()> + Send + Sync + 'static,
    {
        let handler = MethodHandler::new(self.receiver.clone(), f);
        self.methods.insert(name.into(), Arc::new(handler));
        self
    }

    /// Validate names and finish the service.
    ///
    /// Service and method names must be non-empty and must not contain `.`,
    /// otherwise they could never be addressed through a `"Service.Method"`
    /// string. Violations are configuration errors, fatal at registration
    /// time rather than at call time.
    pub fn build(self) -> Result<Service> {
        validate_name("service", &self.name)?;
        for method in self.methods.keys() {
            validate_name("method", method)?;
        }
        Ok(Service {
            name: self.name,
            methods: self.methods,
        })
    }
}

fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RpcError::InvalidService(format!("empty {what} name")));
    }
    if name.contains('.') {
        return Err(RpcError::InvalidService(format!(
            "{what} name {name:?} must not contain '.'"
        )));
    }
    Ok(())
}
