//! # minrpc
//!
//! A minimal RPC runtime: a process exposes methods on registered services,
//! and remote processes invoke them by `"Service.Method"` name over any
//! bidirectional byte stream.
//!
//! ## Architecture
//!
//! - **Handshake**: one JSON line negotiating the payload codec
//! - **Frames**: length-prefixed `(Header, Body)` pairs in the negotiated codec
//! - **Server**: reads requests in order, dispatches them concurrently,
//!   serializes only the write path
//! - **Client**: asynchronous calls correlated by sequence number through a
//!   single background receive loop
//!
//! ## Example
//!
//! ```ignore
//! use minrpc::{Client, Server, Service, ServiceRegistry};
//!
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct Args { a: i64, b: i64 }
//!
//! #[tokio::main]
//! async fn main() -> minrpc::Result<()> {
//!     let svc = Service::builder("Arith", ())
//!         .method("Add", |_, args: Args, reply: &mut i64| {
//!             *reply = args.a + args.b;
//!             Ok(())
//!         })
//!         .build()?;
//!
//!     let mut registry = ServiceRegistry::new();
//!     registry.register(svc);
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:7000").await?;
//!     tokio::spawn(async move { Server::new(registry).accept(listener).await });
//!
//!     let client = Client::dial("127.0.0.1:7000").await?;
//!     let sum: i64 = client.call("Arith.Add", &Args { a: 1, b: 2 }).await?;
//!     assert_eq!(sum, 3);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod protocol;
pub mod service;

mod client;
mod server;

pub use client::{Call, Client};
pub use codec::CodecKind;
pub use error::{Result, RpcError};
pub use server::Server;
pub use service::{Service, ServiceBuilder, ServiceRegistry};
