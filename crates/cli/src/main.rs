use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use psrtp::flv::{self, ElementaryStreamWriter, FlvReader};
use psrtp::{
    Endpoints, FlvFileSource, FrameSource, H264FileSource, PlaybackState, PsFileSession, SdpConfig, SessionConfig,
    SessionManager, Streamer, StreamerConfig, SystemClock, UdpTransport,
};

#[derive(Parser)]
#[command(name = "ps-rtp", about = "Stream media files as MPEG-PS over RTP")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream a file to an RTP/UDP destination
    Stream(StreamArgs),
    /// Split an FLV file into raw AAC and H.264 streams
    Extract(ExtractArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    /// Pick by file extension
    Auto,
    H264,
    Flv,
}

#[derive(clap::Args)]
struct StreamArgs {
    /// Media file (.h264 Annex B or .flv)
    file: PathBuf,
    /// Destination host
    #[arg(long, short, default_value = "127.0.0.1")]
    dest: String,
    /// Destination RTP port; RTCP goes to the next port unless overridden
    #[arg(long, short, default_value_t = 5004)]
    port: u16,
    #[arg(long)]
    rtcp_port: Option<u16>,
    #[arg(long, value_enum, default_value_t = Format::Auto)]
    format: Format,
    /// Playback speed multiplier
    #[arg(long, default_value_t = 1.0)]
    speed: f64,
    /// Start position in milliseconds
    #[arg(long)]
    seek: Option<u64>,
    /// Restart from the beginning at end of file
    #[arg(long = "loop")]
    loop_playback: bool,
    /// Frame interval in milliseconds for raw H.264 input
    #[arg(long, default_value_t = 40)]
    frame_interval: u64,
    /// RTCP SDES CNAME
    #[arg(long, default_value = "ps-rtp")]
    cname: String,
    /// Print the session description before streaming
    #[arg(long)]
    sdp: bool,
}

#[derive(clap::Args)]
struct ExtractArgs {
    /// FLV input file
    file: PathBuf,
    #[arg(long, default_value = "audio.aac")]
    audio: PathBuf,
    #[arg(long, default_value = "video.h264")]
    video: PathBuf,
}

fn open_source(path: &Path, format: Format, frame_interval: Duration) -> psrtp::Result<Box<dyn FrameSource>> {
    let is_flv = match format {
        Format::Flv => true,
        Format::H264 => false,
        Format::Auto => path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("flv")),
    };
    if is_flv {
        Ok(Box::new(FlvFileSource::open(path)?))
    } else {
        Ok(Box::new(H264FileSource::open(path, frame_interval)?))
    }
}

fn stream(args: StreamArgs) -> psrtp::Result<()> {
    let frame_interval = Duration::from_millis(args.frame_interval);
    let source = open_source(&args.file, args.format, frame_interval)?;
    let endpoints = match args.rtcp_port {
        Some(rtcp) => Endpoints::resolve(&args.dest, args.port, rtcp)?,
        None => Endpoints::resolve_pair(&args.dest, args.port)?,
    };
    let config = SessionConfig {
        frame_interval,
        cname: args.cname,
        name: args
            .file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        ..SessionConfig::default()
    };

    let mut session = PsFileSession::new(
        source,
        Box::new(UdpTransport::bind()?),
        endpoints,
        Arc::new(SystemClock::new()),
        config,
    );
    session.set_speed(args.speed)?;
    if let Some(position) = args.seek {
        session.seek(position)?;
    }
    if args.sdp {
        let ip = endpoints.rtp.ip().to_string();
        print!("{}", psrtp::sdp::generate_sdp(&SdpConfig::default(), &ip, &session.sdp_media()));
    }
    session.play();

    let manager = SessionManager::new();
    let (id, shared) = manager.create(session);
    let mut streamer = Streamer::new(
        manager,
        StreamerConfig {
            loop_playback: args.loop_playback,
            ..StreamerConfig::default()
        },
    );
    streamer.start()?;
    tracing::info!(session_id = %id, rtp = %endpoints.rtp, rtcp = %endpoints.rtcp, "streaming");

    if args.loop_playback {
        println!("Streaming {} to {} in a loop, press Enter to stop", args.file.display(), endpoints.rtp);
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
    } else {
        while shared.lock().state() != PlaybackState::Stopped {
            thread::sleep(Duration::from_millis(100));
        }
    }

    streamer.stop();
    let stats = shared.lock().stats();
    println!(
        "sent {} frames in {} RTP packets, {} RTCP reports",
        stats.frames_sent, stats.packets_sent, stats.rtcp_reports
    );
    Ok(())
}

fn extract(args: ExtractArgs) -> psrtp::Result<()> {
    let mut reader = FlvReader::new(BufReader::new(File::open(&args.file)?))?;
    let mut writer = ElementaryStreamWriter::new(
        BufWriter::new(File::create(&args.audio)?),
        BufWriter::new(File::create(&args.video)?),
    );
    let tags = flv::demux_all(&mut reader, &mut writer)?;
    let (audio, video) = (writer.audio_frames(), writer.video_frames());
    writer.finish()?;
    println!(
        "{tags} tags: {audio} AAC frames -> {}, {video} H.264 frames -> {}",
        args.audio.display(),
        args.video.display()
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Stream(args) => stream(args),
        Command::Extract(args) => extract(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
