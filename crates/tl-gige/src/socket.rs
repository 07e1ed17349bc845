//! UDP transport bound to a single local interface.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time;
use tracing::{debug, trace, warn};

use crate::gvcp::{consts, ControlConfig, Flow, GigeError, PacketHandler, Transport};

/// GVCP socket bound to `interface_ip:0`.
pub struct UdpTransport {
    socket: UdpSocket,
    local: SocketAddr,
    port: u16,
    recv_timeout: Duration,
}

impl UdpTransport {
    /// Create and bind the socket. Must be called from within a Tokio runtime.
    pub fn bind(local_ip: Ipv4Addr, config: &ControlConfig) -> Result<Self, GigeError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(GigeError::SocketCreation)?;
        socket
            .set_nonblocking(true)
            .map_err(GigeError::SocketCreation)?;
        let addr = SocketAddr::new(IpAddr::V4(local_ip), 0);
        socket
            .bind(&addr.into())
            .map_err(|source| GigeError::SocketBinding { addr, source })?;
        let udp = UdpSocket::from_std(socket.into()).map_err(GigeError::SocketCreation)?;
        let local = udp.local_addr().unwrap_or(addr);
        debug!(%local, "bound GVCP socket");
        Ok(Self {
            socket: udp,
            local,
            port: config.port,
            recv_timeout: config.recv_timeout,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_and_receive(
        &self,
        destination: Ipv4Addr,
        packet: &[u8],
        on_packet: Option<PacketHandler<'_>>,
        broadcast: bool,
        timeout: Option<Duration>,
    ) -> Result<(), GigeError> {
        let dest = SocketAddr::new(IpAddr::V4(destination), self.port);
        self.socket
            .set_broadcast(broadcast)
            .map_err(|source| GigeError::SocketSend { dest, source })?;
        trace!(local = %self.local, %dest, bytes = packet.len(), "sending GVCP packet");
        self.socket
            .send_to(packet, dest)
            .await
            .map_err(|source| GigeError::SocketSend { dest, source })?;

        let Some(handler) = on_packet else {
            return Ok(());
        };
        let timeout = timeout.unwrap_or(self.recv_timeout);
        let mut buf = vec![0u8; consts::RECV_BUFFER];
        loop {
            match time::timeout(timeout, self.socket.recv_from(&mut buf)).await {
                Err(_) => {
                    trace!(local = %self.local, "receive timed out");
                    break;
                }
                Ok(Err(err)) => {
                    warn!(local = %self.local, ?err, "receive failed");
                    break;
                }
                Ok(Ok((len, src))) => {
                    if len < gvcp_codec::HEADER_SIZE {
                        trace!(%src, bytes = len, "discarding runt datagram");
                        continue;
                    }
                    trace!(%src, bytes = len, "received GVCP datagram");
                    if handler(&buf[..len]) == Flow::End {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}
