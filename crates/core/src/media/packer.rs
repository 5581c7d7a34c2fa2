//! RTP packetization of muxed program stream bytes.
//!
//! A PS buffer is opaque to RTP: it is cut into MTU-sized chunks, each
//! prefixed with the 12-byte fixed header, and the marker bit is set on the
//! last chunk of the buffer. All chunks of one buffer share a timestamp.
//!
//! Packets are assembled in a single [`PacketBuffer`] owned by the session.
//! For every fragment the packer runs `alloc → fill → packet_ready → free`
//! against an [`RtpPacketSink`] and never starts the next fragment before the
//! previous one has been freed.

use std::sync::atomic::{AtomicU64, Ordering};

use super::rtp::{RTP_HEADER_SIZE, RtpHeader};
use crate::error::Result;

/// Default packet capacity: 1450 bytes of UDP payload minus 16 bytes of slack.
pub const DEFAULT_PACKET_CAPACITY: usize = 1450 - 16;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Fixed-capacity storage reused for every outgoing RTP packet of a session.
///
/// The storage is checked out into a [`PacketLease`] and must be checked back
/// in before the next checkout. Violations panic: they can only come from a
/// broken packer, never from input data.
#[derive(Debug)]
pub struct PacketBuffer {
    id: u64,
    capacity: usize,
    storage: Option<Box<[u8]>>,
    checkouts: u64,
}

impl PacketBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            capacity,
            storage: Some(vec![0u8; capacity].into_boxed_slice()),
            checkouts: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a lease is currently outstanding.
    pub fn is_checked_out(&self) -> bool {
        self.storage.is_none()
    }

    /// Number of checkouts performed so far.
    pub fn checkouts(&self) -> u64 {
        self.checkouts
    }

    /// Take the storage for a packet of `size` bytes.
    ///
    /// # Panics
    ///
    /// If `size` exceeds the capacity, or if a lease is already outstanding.
    pub fn checkout(&mut self, size: usize) -> PacketLease {
        assert!(
            size <= self.capacity,
            "packet of {size} bytes exceeds packet buffer capacity {}",
            self.capacity
        );
        let storage = self
            .storage
            .take()
            .unwrap_or_else(|| panic!("packet buffer {} checked out twice", self.id));
        self.checkouts += 1;
        PacketLease {
            owner: self.id,
            storage,
            len: size,
        }
    }

    /// Return the storage taken by [`checkout`](Self::checkout).
    ///
    /// # Panics
    ///
    /// If the lease belongs to another buffer.
    pub fn checkin(&mut self, lease: PacketLease) {
        assert_eq!(
            lease.owner, self.id,
            "lease from packet buffer {} returned to buffer {}",
            lease.owner, self.id
        );
        debug_assert!(self.storage.is_none());
        self.storage = Some(lease.storage);
    }
}

/// Exclusive access to the session's packet storage for one packet.
#[derive(Debug)]
pub struct PacketLease {
    owner: u64,
    storage: Box<[u8]>,
    len: usize,
}

impl PacketLease {
    /// The `len` bytes requested at checkout.
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage[..self.len]
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.storage[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Receiver of RTP fragments: the alloc/packet-ready/free triple.
pub trait RtpPacketSink {
    /// Check out storage for a packet of `size` bytes.
    fn alloc(&mut self, size: usize) -> PacketLease;

    /// A filled packet is ready. The bytes must be sent before returning
    /// because the storage is reused for the next fragment.
    fn packet_ready(&mut self, packet: &PacketLease, time_ms: u64) -> Result<()>;

    /// Return the storage obtained from [`alloc`](Self::alloc).
    fn free(&mut self, packet: PacketLease);
}

/// RTP packer for MPEG-2 PS payloads.
#[derive(Debug)]
pub struct RtpPsPacker {
    header: RtpHeader,
    clock_rate: u32,
    max_payload: usize,
    packets: u64,
}

impl RtpPsPacker {
    /// Create a packer whose packets never exceed `packet_capacity` bytes.
    ///
    /// The initial sequence number is the low 16 bits of the SSRC.
    pub fn new(ssrc: u32, payload_type: u8, clock_rate: u32, packet_capacity: usize) -> Self {
        assert!(
            packet_capacity > RTP_HEADER_SIZE,
            "packet capacity {packet_capacity} leaves no room for payload"
        );
        Self {
            header: RtpHeader::new(payload_type, ssrc, ssrc as u16),
            clock_rate,
            max_payload: packet_capacity - RTP_HEADER_SIZE,
            packets: 0,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    pub fn payload_type(&self) -> u8 {
        self.header.pt
    }

    /// Next sequence number and the timestamp of the last packet.
    pub fn info(&self) -> (u16, u32) {
        (self.header.sequence(), self.header.timestamp())
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// RTP timestamp for a media time in milliseconds.
    pub fn rtp_timestamp(&self, time_ms: u64) -> u32 {
        (time_ms * self.clock_rate as u64 / 1000) as u32
    }

    /// Fragment `payload` into RTP packets delivered to `sink`.
    ///
    /// An error from `packet_ready` aborts the remaining fragments; the
    /// failing fragment's lease is still freed.
    pub fn input(&mut self, payload: &[u8], time_ms: u64, sink: &mut dyn RtpPacketSink) -> Result<()> {
        self.header.set_timestamp(self.rtp_timestamp(time_ms));

        let mut fragments = 0usize;
        for (index, chunk) in payload.chunks(self.max_payload).enumerate() {
            let last = (index + 1) * self.max_payload >= payload.len();
            let mut lease = sink.alloc(RTP_HEADER_SIZE + chunk.len());
            {
                let bytes = lease.as_mut_bytes();
                self.header.write_to(bytes, last);
                bytes[RTP_HEADER_SIZE..].copy_from_slice(chunk);
            }
            let sent = sink.packet_ready(&lease, time_ms);
            sink.free(lease);
            sent?;
            fragments += 1;
            self.packets += 1;
        }

        tracing::trace!(
            ps_bytes = payload.len(),
            fragments,
            seq = self.header.sequence(),
            ts = self.header.timestamp(),
            "PS buffer packetized"
        );
        Ok(())
    }
}
