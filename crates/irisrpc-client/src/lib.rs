//! Concurrent JSON-RPC client runtime for Iris debug targets.
//!
//! A [`Client`] negotiates a message format with the target, registers
//! itself with the target's instance registry, and then runs two threads
//! per connection:
//!
//! - the receive loop reads frames, hands responses to the callers waiting
//!   on them, and queues inbound requests and notifications;
//! - the dispatch loop serves queued inbound calls in arrival order.
//!
//! Because inbound calls never run on the receive loop, a handler may make
//! nested blocking calls back to the target.
//!
//! ```no_run
//! use irisrpc_client::{Client, ClientConfig, FunctionInfo};
//! use irisrpc_u64json::{Object, Value};
//!
//! let client = Client::new(ClientConfig::default());
//! client.register_handler(
//!     "ec_step",
//!     FunctionInfo::new("Simulation step event."),
//!     |_ctx: &irisrpc_client::CallContext<'_>, _params: Object| Ok(Value::Null),
//! )?;
//! client.connect("localhost", 0)?;
//! let list = client.call("instanceRegistry_getList", Object::new())?;
//! println!("{list}");
//! client.disconnect(false);
//! # Ok::<(), irisrpc_client::RpcError>(())
//! ```

pub mod client;
pub mod codes;
pub mod config;
pub mod error;
pub mod handler;
pub mod handshake;
pub mod pending;
pub mod queue;
mod runtime;

pub use client::Client;
pub use config::{ClientConfig, COMPONENT_NAME, DEFAULT_INSTANCE_NAME};
pub use error::{RemoteError, Result, RpcError};
pub use handler::{ArgInfo, FunctionInfo, Handler, HandlerRegistry};
pub use handshake::{
    choose_format, connect_request, handshake_client, handshake_server, HandshakeConfig,
    HandshakeResult, PROTOCOL,
};
pub use runtime::{CallContext, HandlerResult};
