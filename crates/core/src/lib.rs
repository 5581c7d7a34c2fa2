//! MPEG-2 Program Stream over RTP file streaming.
//!
//! A [`PsFileSession`] reads frames from a file ([`H264FileSource`],
//! [`FlvFileSource`]), muxes them into a program stream, packetizes the PS
//! into RTP and sends it to one client, pacing by wall clock and emitting
//! RTCP sender reports alongside. [`SessionManager`] and [`Streamer`] run
//! many sessions from one background thread.
//!
//! ```no_run
//! use std::sync::Arc;
//! use psrtp::{Endpoints, H264FileSource, PsFileSession, SessionConfig, SystemClock, UdpTransport};
//!
//! let config = SessionConfig::default();
//! let source = H264FileSource::open("clip.h264", config.frame_interval)?;
//! let mut session = PsFileSession::new(
//!     Box::new(source),
//!     Box::new(UdpTransport::bind()?),
//!     Endpoints::resolve_pair("127.0.0.1", 5004)?,
//!     Arc::new(SystemClock::new()),
//!     config,
//! );
//! session.play();
//! session.tick()?;
//! # Ok::<(), psrtp::StreamError>(())
//! ```

pub mod clock;
pub mod error;
pub mod flv;
pub mod media;
pub mod rtcp;
pub mod sdp;
pub mod session;
pub mod source;
pub mod streamer;
pub mod transport;

pub use clock::{Clock, ManualClock, NtpTimestamp, SystemClock};
pub use error::{FlvErrorKind, Result, StreamError};
pub use media::StreamKind;
pub use sdp::SdpConfig;
pub use session::{
    Endpoints, PlaybackState, PsFileSession, RtpInfo, SessionConfig, SessionManager, SessionStats, SharedSession,
    TickOutcome,
};
pub use source::{FlvFileSource, Frame, FrameSource, H264FileSource};
pub use streamer::{Streamer, StreamerConfig};
pub use transport::{Channel, TransportSink, UdpTransport};
