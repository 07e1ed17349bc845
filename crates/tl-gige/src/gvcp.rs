//! GVCP control plane primitives shared by discovery and the device client.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use gvcp_codec::{CodecError, StatusCode};
use thiserror::Error;

/// GVCP protocol constants grouped by semantic area.
pub mod consts {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    /// GVCP control port as defined by the GigE Vision specification (section 7.3).
    pub const PORT: u16 = 3956;
    /// Limited broadcast address used for discovery and Force-IP.
    pub const BROADCAST: Ipv4Addr = Ipv4Addr::BROADCAST;
    /// Request identifier carried by every discovery broadcast.
    pub const DISCOVERY_REQUEST_ID: u16 = 1;

    /// Number of times a request is sent before giving up.
    pub const RETRY_COUNT: usize = 5;
    /// Default timeout for a single receive.
    pub const RECV_TIMEOUT: Duration = Duration::from_millis(1500);
    /// Discovery cycles a device may miss before it is considered gone.
    pub const STALENESS_CYCLES: u32 = 3;

    /// Maximum number of data bytes moved per `ReadMem`/`WriteMem` packet.
    pub const MAX_BLOCK: usize = 512;
    /// Receive buffer size; comfortably above the largest acknowledgement.
    pub const RECV_BUFFER: usize = 2048;

    /// `CurrentIPConfiguration` bootstrap register.
    pub const REG_CURRENT_IP_CONFIG: u32 = 0x0014;
    pub const REG_CURRENT_IP: u32 = 0x0024;
    pub const REG_CURRENT_SUBNET: u32 = 0x0034;
    pub const REG_CURRENT_GATEWAY: u32 = 0x0044;
    pub const REG_MANUFACTURER_NAME: u32 = 0x0048;
    pub const REG_MODEL_NAME: u32 = 0x0068;
    pub const REG_DEVICE_VERSION: u32 = 0x0088;
    pub const REG_SERIAL_NUMBER: u32 = 0x00D8;
    /// 16-byte NUL-terminated user defined name.
    pub const REG_USER_DEFINED_NAME: u32 = 0x00E8;
    pub const REG_PERSISTENT_IP: u32 = 0x064C;
    pub const REG_PERSISTENT_SUBNET: u32 = 0x065C;
    pub const REG_PERSISTENT_GATEWAY: u32 = 0x066C;
    pub const REG_HEARTBEAT_TIMEOUT: u32 = 0x0938;
    /// Control channel privilege (CCP) register.
    pub const REG_CONTROL_PRIVILEGE: u32 = 0x0A00;

    /// CCP value requesting exclusive control.
    pub const CONTROL_ACQUIRE: u32 = 3;
    /// CCP value releasing control.
    pub const CONTROL_RELEASE: u32 = 0;

    /// Width of the user defined name register.
    pub const USER_NAME_LEN: usize = 16;

    /// `CurrentIPConfiguration` bit: persistent (static) IP.
    pub const IP_CONFIG_STATIC: u32 = 1 << 0;
    /// `CurrentIPConfiguration` bit: DHCP.
    pub const IP_CONFIG_DHCP: u32 = 1 << 1;
    /// `CurrentIPConfiguration` bit: link-local addressing.
    pub const IP_CONFIG_LLA: u32 = 1 << 2;
}

/// Public alias for the GVCP well-known port.
pub use consts::PORT as GVCP_PORT;

/// Errors that can occur when operating the GVCP control path.
#[derive(Debug, Error)]
pub enum GigeError {
    #[error("unable to create socket: {0}")]
    SocketCreation(#[source] io::Error),
    #[error("unable to bind socket to {addr}: {source}")]
    SocketBinding {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("unable to send to {dest}: {source}")]
    SocketSend {
        dest: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// Negative acknowledgement, or [`StatusCode::Timeout`] when every retry
    /// went unanswered.
    #[error("device answered with status {0:?}")]
    Nack(StatusCode),
    #[error("transfer size {0} is not a multiple of 4")]
    Misaligned(usize),
    #[error("unexpected answer {got:#06x} (expected {expected:#06x})")]
    UnexpectedAnswer { expected: u16, got: u16 },
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
}

impl GigeError {
    /// `true` when the device never answered.
    pub fn is_timeout(&self) -> bool {
        matches!(self, GigeError::Nack(StatusCode::Timeout))
    }
}

/// Verdict returned by a receive callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep listening for further datagrams.
    Continue,
    /// Stop the receive loop.
    End,
}

/// Callback fed with every datagram received after a send.
pub type PacketHandler<'a> = &'a mut (dyn FnMut(&[u8]) -> Flow + Send);

/// Datagram transport bound to one local interface.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `packet` to `destination` on the control port.
    ///
    /// With a handler the transport keeps receiving until the handler returns
    /// [`Flow::End`] or a single receive exceeds the timeout (`timeout`
    /// overrides the configured one). Without a handler it returns right
    /// after sending.
    async fn send_and_receive(
        &self,
        destination: Ipv4Addr,
        packet: &[u8],
        on_packet: Option<PacketHandler<'_>>,
        broadcast: bool,
        timeout: Option<Duration>,
    ) -> Result<(), GigeError>;
}

/// Runtime knobs of the control path.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Destination port of every request.
    pub port: u16,
    /// Sends per request before reporting [`StatusCode::Timeout`].
    pub retries: usize,
    /// Per-receive timeout.
    pub recv_timeout: Duration,
    /// Discovery cycles a device may miss before it is dropped.
    pub staleness_cycles: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            port: consts::PORT,
            retries: consts::RETRY_COUNT,
            recv_timeout: consts::RECV_TIMEOUT,
            staleness_cycles: consts::STALENESS_CYCLES,
        }
    }
}
