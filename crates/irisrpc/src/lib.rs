//! JSON-RPC client and wire codecs for Iris debug targets.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP and Unix-domain byte streams
//! - [`u64json`]: value model, U64Json binary codec, JSON-RPC envelopes
//! - [`frame`]: `IrisU64Json:` / `IrisJson:` framing with resync
//! - [`client`]: concurrent client runtime (behind `client` feature)

/// Re-export transport types.
pub mod transport {
    pub use irisrpc_transport::*;
}

/// Re-export value and codec types.
pub mod u64json {
    pub use irisrpc_u64json::*;
}

/// Re-export frame types.
pub mod frame {
    pub use irisrpc_frame::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use irisrpc_client::*;
}

#[cfg(feature = "client")]
pub use irisrpc_client::{Client, ClientConfig, RpcError};
pub use irisrpc_u64json::{Object, Value};
