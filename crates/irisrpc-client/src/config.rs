use std::time::Duration;

use irisrpc_frame::{FrameFormat, DEFAULT_MAX_PAYLOAD};

/// Instance name requested at registration when none is configured.
pub const DEFAULT_INSTANCE_NAME: &str = "client.irisrpc";

/// Component name published through `instance_getProperties`.
pub const COMPONENT_NAME: &str = "irisrpc.Client";

/// Client runtime configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Instance name requested from the instance registry. The target may
    /// uniquify it.
    pub instance_name: String,
    /// Message formats offered in the handshake, most preferred first.
    pub formats: Vec<FrameFormat>,
    /// Default deadline for `call`.
    pub call_timeout: Duration,
    /// Deadline for the TCP connect and the handshake reply.
    pub connect_timeout: Duration,
    /// Bounded wait of the dispatch loop on the inbound queue.
    pub dispatch_poll: Duration,
    /// Socket read timeout of the receive loop.
    pub read_poll: Duration,
    /// Register with `instanceRegistry_registerInstance` after connecting.
    pub register_instance: bool,
    /// Largest frame payload accepted or sent.
    pub max_payload_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            instance_name: DEFAULT_INSTANCE_NAME.to_string(),
            formats: FrameFormat::ALL.to_vec(),
            call_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(1),
            dispatch_poll: Duration::from_millis(100),
            read_poll: Duration::from_millis(100),
            register_instance: true,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl ClientConfig {
    /// Restrict the handshake to a single format.
    pub fn with_format(mut self, format: FrameFormat) -> Self {
        self.formats = vec![format];
        self
    }
}
