//! Datagram delivery for RTP and RTCP.
//!
//! The session talks to the network only through [`TransportSink`], one
//! datagram per call. [`UdpTransport`] is the real implementation; tests
//! substitute an in-memory recorder.

pub mod udp;

use std::net::SocketAddr;

pub use udp::UdpTransport;

use crate::error::Result;

/// Which of the two session flows a datagram belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Rtp,
    Rtcp,
}

/// Outbound datagram sink with a feedback path for RTCP.
pub trait TransportSink: Send {
    /// Send one datagram and return the number of bytes written.
    fn send(&mut self, channel: Channel, payload: &[u8], dest: SocketAddr) -> Result<usize>;

    /// Read one pending RTCP datagram into `buf` without waiting.
    ///
    /// `Ok(None)` means nothing is pending.
    fn recv_feedback(&mut self, buf: &mut [u8]) -> Result<Option<usize>>;
}
