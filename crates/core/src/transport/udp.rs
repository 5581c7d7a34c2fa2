use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use super::{Channel, TransportSink};
use crate::error::Result;

/// UDP transport with one socket per channel.
///
/// Both sockets are bound to ephemeral ports. The RTCP socket is
/// non-blocking so feedback can be polled between ticks.
#[derive(Debug)]
pub struct UdpTransport {
    rtp: UdpSocket,
    rtcp: UdpSocket,
}

impl UdpTransport {
    /// Bind both sockets on all IPv4 interfaces.
    pub fn bind() -> Result<Self> {
        Self::bind_to(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    pub fn bind_to(ip: IpAddr) -> Result<Self> {
        let rtp = UdpSocket::bind(SocketAddr::new(ip, 0))?;
        let rtcp = UdpSocket::bind(SocketAddr::new(ip, 0))?;
        rtcp.set_nonblocking(true)?;
        tracing::debug!(
            rtp = %rtp.local_addr()?,
            rtcp = %rtcp.local_addr()?,
            "UDP transport bound"
        );
        Ok(Self { rtp, rtcp })
    }

    pub fn local_addr(&self, channel: Channel) -> Result<SocketAddr> {
        Ok(self.socket(channel).local_addr()?)
    }

    fn socket(&self, channel: Channel) -> &UdpSocket {
        match channel {
            Channel::Rtp => &self.rtp,
            Channel::Rtcp => &self.rtcp,
        }
    }
}

impl TransportSink for UdpTransport {
    fn send(&mut self, channel: Channel, payload: &[u8], dest: SocketAddr) -> Result<usize> {
        Ok(self.socket(channel).send_to(payload, dest)?)
    }

    fn recv_feedback(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        match self.rtcp.recv_from(buf) {
            Ok((n, from)) => {
                tracing::trace!(%from, bytes = n, "RTCP datagram received");
                Ok(Some(n))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
