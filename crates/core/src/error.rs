//! Error types for the PS-over-RTP streaming library.

use std::fmt;

/// Errors that can occur while setting up or driving a streaming session.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Transport**: [`Io`](Self::Io), [`AddressResolution`](Self::AddressResolution).
/// - **Source**: [`SeekOutOfRange`](Self::SeekOutOfRange),
///   [`DurationUnknown`](Self::DurationUnknown), [`Flv`](Self::Flv).
/// - **Pipeline**: [`UnknownStream`](Self::UnknownStream),
///   [`BufferTooSmall`](Self::BufferTooSmall).
/// - **Control**: [`InvalidSpeed`](Self::InvalidSpeed),
///   [`SessionNotFound`](Self::SessionNotFound),
///   [`AlreadyRunning`](Self::AlreadyRunning).
///
/// Contract violations of the buffer hand-off (oversized packet checkout,
/// double checkout, foreign lease, short datagram write) are not represented
/// here. They abort with a panic.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A destination host did not resolve to any socket address.
    #[error("cannot resolve destination address: {0}")]
    AddressResolution(String),

    /// Playback speed must be finite and strictly positive.
    #[error("invalid playback speed: {0}")]
    InvalidSpeed(f64),

    /// Seek target lies beyond the end of the source.
    #[error("seek position {position}ms beyond duration {duration}ms")]
    SeekOutOfRange { position: u64, duration: u64 },

    /// The source holds no frames, so it has no known duration.
    #[error("source duration unknown")]
    DurationUnknown,

    /// The PS muxer was asked to write to a stream id it never registered.
    #[error("unknown elementary stream id: {0:#04X}")]
    UnknownStream(u8),

    /// A caller-provided buffer cannot hold the serialized output.
    #[error("buffer too small: required {required} bytes, available {available}")]
    BufferTooSmall { required: usize, available: usize },

    /// An incoming RTCP datagram could not be parsed.
    #[error("malformed RTCP: {0}")]
    MalformedRtcp(&'static str),

    /// Malformed FLV input.
    #[error("FLV error: {kind}")]
    Flv { kind: FlvErrorKind },

    /// No session with the given ID exists in the [`SessionManager`](crate::session::SessionManager).
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// [`Streamer::start`](crate::Streamer::start) was called while already running.
    #[error("streamer already running")]
    AlreadyRunning,
}

/// Specific kind of FLV parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvErrorKind {
    /// File did not start with the `FLV` signature.
    InvalidHeader,
    /// A tag body ended before its fixed fields.
    TruncatedTag,
    /// AVCDecoderConfigurationRecord could not be parsed.
    InvalidAvcConfig,
    /// AudioSpecificConfig could not be parsed.
    InvalidAacConfig,
    /// A NAL length prefix pointed past the end of the tag.
    InvalidNalLength,
    /// Raw AAC arrived before its AudioSpecificConfig.
    MissingAacConfig,
}

impl fmt::Display for FlvErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::TruncatedTag => write!(f, "truncated tag"),
            Self::InvalidAvcConfig => write!(f, "invalid AVC decoder configuration"),
            Self::InvalidAacConfig => write!(f, "invalid AAC audio specific config"),
            Self::InvalidNalLength => write!(f, "invalid NAL unit length"),
            Self::MissingAacConfig => write!(f, "AAC frame before sequence header"),
        }
    }
}

impl From<FlvErrorKind> for StreamError {
    fn from(kind: FlvErrorKind) -> Self {
        StreamError::Flv { kind }
    }
}

/// Convenience alias for `Result<T, StreamError>`.
pub type Result<T> = std::result::Result<T, StreamError>;
