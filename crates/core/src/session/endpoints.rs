use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::{Result, StreamError};

/// Destination addresses of a session's RTP and RTCP flows.
///
/// Resolved once when the session is set up and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub rtp: SocketAddr,
    pub rtcp: SocketAddr,
}

impl Endpoints {
    pub fn new(rtp: SocketAddr, rtcp: SocketAddr) -> Self {
        Self { rtp, rtcp }
    }

    /// Resolve `host` against both ports, keeping the first address of each.
    ///
    /// ```
    /// use psrtp::Endpoints;
    ///
    /// let ep = Endpoints::resolve("127.0.0.1", 8000, 8001).unwrap();
    /// assert_eq!(ep.rtp.port(), 8000);
    /// assert_eq!(ep.rtcp.port(), 8001);
    /// ```
    pub fn resolve(host: &str, rtp_port: u16, rtcp_port: u16) -> Result<Self> {
        let endpoints = Self {
            rtp: resolve_one(host, rtp_port)?,
            rtcp: resolve_one(host, rtcp_port)?,
        };
        tracing::debug!(host, rtp = %endpoints.rtp, rtcp = %endpoints.rtcp, "endpoints resolved");
        Ok(endpoints)
    }

    /// RTCP on the port after RTP, the usual RTP/AVP pairing.
    pub fn resolve_pair(host: &str, rtp_port: u16) -> Result<Self> {
        let rtcp_port = rtp_port
            .checked_add(1)
            .ok_or_else(|| StreamError::AddressResolution(format!("{host}:{rtp_port} has no RTCP port")))?;
        Self::resolve(host, rtp_port, rtcp_port)
    }
}

fn resolve_one(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| StreamError::AddressResolution(format!("{host}:{port}: {e}")))?
        .next()
        .ok_or_else(|| StreamError::AddressResolution(format!("{host}:{port}")))
}
