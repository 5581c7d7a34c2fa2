use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Result, StreamError};
use crate::session::{SessionManager, TickOutcome};

/// Scheduling loop parameters.
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Sleep between rounds over all sessions.
    pub poll_interval: Duration,
    /// Seek back to the start at end of stream instead of stopping.
    pub loop_playback: bool,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            loop_playback: false,
        }
    }
}

/// Background thread that drives every session of a [`SessionManager`].
///
/// Each round locks the sessions one at a time, ticks them, polls RTCP and
/// drains receiver feedback. A session that fails is stopped; the others
/// keep running.
pub struct Streamer {
    manager: SessionManager,
    config: StreamerConfig,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Streamer {
    pub fn new(manager: SessionManager, config: StreamerConfig) -> Self {
        Self {
            manager,
            config,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(StreamError::AlreadyRunning);
        }
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let manager = self.manager.clone();
        let config = self.config.clone();

        tracing::info!(
            poll_ms = config.poll_interval.as_millis() as u64,
            loop_playback = config.loop_playback,
            "streamer starting"
        );

        let spawned = thread::Builder::new()
            .name("ps-rtp-streamer".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    run_round(&manager, &config);
                    thread::sleep(config.poll_interval);
                }
            });
        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Stop the loop and wait for the thread to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("streamer thread panicked");
            }
            tracing::info!("streamer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one round on the calling thread. Returns the frames sent.
    pub fn run_once(&self) -> usize {
        run_round(&self.manager, &self.config)
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_round(manager: &SessionManager, config: &StreamerConfig) -> usize {
    let mut frames = 0;
    for (id, shared) in manager.sessions() {
        let mut session = shared.lock();
        match session.tick() {
            Ok(TickOutcome::FrameSent) => frames += 1,
            Ok(TickOutcome::EndOfStream) if config.loop_playback => {
                if let Err(e) = session.seek(0) {
                    tracing::warn!(session_id = %id, error = %e, "rewind failed, stopping session");
                    session.stop();
                }
            }
            Ok(TickOutcome::EndOfStream) => {
                tracing::info!(session_id = %id, "playback finished");
                session.stop();
            }
            Ok(TickOutcome::Idle | TickOutcome::NotYet) => {
                if let Err(e) = session.poll_rtcp() {
                    tracing::warn!(session_id = %id, error = %e, "RTCP report failed");
                }
            }
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "tick failed, stopping session");
                session.stop();
            }
        }
        if let Err(e) = session.service_feedback() {
            tracing::warn!(session_id = %id, error = %e, "reading RTCP feedback failed");
        }
    }
    frames
}
