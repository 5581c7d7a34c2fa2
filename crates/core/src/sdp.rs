//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! A session advertises its stream as one MPEG-2 PS media section:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=<user> <sess-id> <sess-ver> IN IP4 <addr>  ← origin
//! s=<session-name>                             ← session name
//! c=IN IP4 <addr>                              ← connection address
//! t=0 0                                        ← timing (live stream)
//! a=tool:ps-rtp                                ← sender software
//! a=sendonly                                   ← direction
//! m=video 0 RTP/AVP 96                         ← media description
//! a=rtpmap:96 MP2P/90000                       ← PS at 90 kHz (RFC 2250)
//! ```
//!
//! Lines end in CRLF.

/// Origin and session-name fields of a generated description.
#[derive(Debug, Clone)]
pub struct SdpConfig {
    /// `o=<username> ...`
    pub username: String,
    /// `o=... <session-id> ...`
    pub session_id: String,
    /// `o=... ... <session-version> ...`
    pub session_version: String,
    /// `s=`
    pub session_name: String,
}

impl Default for SdpConfig {
    fn default() -> Self {
        Self {
            username: "-".to_string(),
            session_id: "0".to_string(),
            session_version: "0".to_string(),
            session_name: "Stream".to_string(),
        }
    }
}

/// Media section for a PS stream on `payload_type`.
pub fn sdp_media(payload_type: u8) -> String {
    format!("m=video 0 RTP/AVP {payload_type}\r\na=rtpmap:{payload_type} MP2P/90000\r\n")
}

/// Full session description around already formatted media sections.
pub fn generate_sdp(config: &SdpConfig, ip: &str, media: &str) -> String {
    let mut sdp: Vec<String> = vec![
        "v=0".to_string(),
        format!(
            "o={} {} {} IN IP4 {}",
            config.username, config.session_id, config.session_version, ip
        ),
        format!("s={}", config.session_name),
        format!("c=IN IP4 {ip}"),
        "t=0 0".to_string(),
        "a=tool:ps-rtp".to_string(),
        "a=sendonly".to_string(),
    ];
    sdp.extend(media.lines().filter(|l| !l.is_empty()).map(str::to_string));

    tracing::debug!("SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}
