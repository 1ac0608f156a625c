//! Diagnostic recording of captured frames
//!
//! Two mutually exclusive modes:
//! - Snapshotting writes at most one still image per `snapshot_interval`.
//! - Streaming appends every frame's tightly packed pixels to one raw file
//!   until `stream_time_limit` has passed or a write fails.
//!
//! All recording runs synchronously on the delivery thread. Failures are
//! logged and absorbed here; they never reach the presentation path.

pub mod clock;
pub mod sink;
pub mod staging;

pub use clock::{timestamp_nanos, Clock, ManualClock, SystemClock};
pub use sink::{FileSink, PersistenceSink, StreamWriter};
pub use staging::{compact_rows, stage_surface, StagedLayout};

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::capture::traits::GraphicsDevice;
use crate::error::{PersistenceError, PersistenceResult};
use crate::types::PersistenceConfig;

/// Extension of raw stream files
pub const STREAM_EXTENSION: &str = "raw";

/// Which recording mode is active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceMode {
    Idle,
    Snapshotting,
    Streaming,
}

/// What happened to one handed-off frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// No mode was active
    Idle,
    /// Snapshot throttle has not elapsed yet
    Throttled,
    SnapshotWritten,
    SnapshotFailed,
    StreamAppended,
    /// Stream reached its time limit and was closed
    StreamExpired,
    /// Stream failed and was closed
    StreamFailed,
}

/// Recording counters
#[derive(Debug, Clone, Default)]
pub struct PersistenceStats {
    pub snapshots_written: u64,
    pub snapshot_failures: u64,
    pub streams_opened: u64,
    pub stream_frames: u64,
    pub stream_bytes: u64,
}

struct OpenStream {
    writer: StreamWriter,
    path: PathBuf,
    bytes_written: u64,
}

struct RecorderState {
    /// Reset whenever a mode is enabled
    started: Instant,
    last_snapshot: Instant,
    stream: Option<OpenStream>,
    scratch: BytesMut,
    stats: PersistenceStats,
}

/// Optional recorder fed with the source surface of every delivery
pub struct PersistenceSidecar {
    config: PersistenceConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn PersistenceSink>,
    snapshotting: AtomicBool,
    streaming: AtomicBool,
    state: Mutex<RecorderState>,
}

impl PersistenceSidecar {
    pub fn new(
        config: PersistenceConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn PersistenceSink>,
    ) -> Self {
        let now = clock.now();
        Self {
            config,
            clock,
            sink,
            snapshotting: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            state: Mutex::new(RecorderState {
                started: now,
                last_snapshot: now,
                stream: None,
                scratch: BytesMut::new(),
                stats: PersistenceStats::default(),
            }),
        }
    }

    /// Create a sidecar writing to the filesystem with the system clock
    pub fn with_config(config: PersistenceConfig) -> Self {
        Self::new(config, Arc::new(SystemClock), Arc::new(FileSink))
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub fn mode(&self) -> PersistenceMode {
        if self.snapshotting.load(Ordering::Acquire) {
            PersistenceMode::Snapshotting
        } else if self.streaming.load(Ordering::Acquire) {
            PersistenceMode::Streaming
        } else {
            PersistenceMode::Idle
        }
    }

    pub fn is_active(&self) -> bool {
        self.mode() != PersistenceMode::Idle
    }

    pub fn is_snapshotting(&self) -> bool {
        self.snapshotting.load(Ordering::Acquire)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PersistenceStats {
        self.state.lock().stats.clone()
    }

    /// Enable or disable snapshots. Enabling turns streaming off.
    pub fn set_snapshotting(&self, enabled: bool) {
        if !enabled {
            self.snapshotting.store(false, Ordering::Release);
            return;
        }
        if let Err(e) = self.sink.prepare_directory(&self.config.save_directory) {
            warn!("Snapshotting not enabled: {}", e);
            return;
        }

        let mut state = self.state.lock();
        self.streaming.store(false, Ordering::Release);
        Self::close_stream(&mut state);
        let now = self.clock.now();
        state.started = now;
        state.last_snapshot = now;
        self.snapshotting.store(true, Ordering::Release);
        info!(
            "Snapshotting enabled, writing to {}",
            self.config.save_directory.display()
        );
    }

    /// Enable or disable streaming. Enabling turns snapshots off and starts a
    /// new stream file on the next frame.
    pub fn set_streaming(&self, enabled: bool) {
        if !enabled {
            let mut state = self.state.lock();
            self.streaming.store(false, Ordering::Release);
            Self::close_stream(&mut state);
            return;
        }
        if let Err(e) = self.sink.prepare_directory(&self.config.save_directory) {
            warn!("Streaming not enabled: {}", e);
            return;
        }

        let mut state = self.state.lock();
        self.snapshotting.store(false, Ordering::Release);
        Self::close_stream(&mut state);
        state.started = self.clock.now();
        self.streaming.store(true, Ordering::Release);
        info!(
            "Streaming enabled, writing to {}",
            self.config.save_directory.display()
        );
    }

    /// Turn every mode off and close any open stream
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        self.snapshotting.store(false, Ordering::Release);
        self.streaming.store(false, Ordering::Release);
        Self::close_stream(&mut state);
    }

    /// Record `surface` according to the active mode
    pub fn record<D: GraphicsDevice>(&self, device: &D, surface: &D::Surface) -> RecordOutcome {
        if self.snapshotting.load(Ordering::Acquire) {
            self.record_snapshot(device, surface)
        } else if self.streaming.load(Ordering::Acquire) {
            self.record_stream(device, surface)
        } else {
            RecordOutcome::Idle
        }
    }

    fn record_snapshot<D: GraphicsDevice>(&self, device: &D, surface: &D::Surface) -> RecordOutcome {
        let mut state = self.state.lock();
        if !self.snapshotting.load(Ordering::Acquire) {
            return RecordOutcome::Idle;
        }

        let now = self.clock.now();
        if now.saturating_duration_since(state.last_snapshot) < self.config.snapshot_interval {
            return RecordOutcome::Throttled;
        }
        state.last_snapshot = now;

        let path = self.config.save_directory.join(format!(
            "{}.{}",
            timestamp_nanos(now),
            self.sink.snapshot_extension()
        ));

        let state = &mut *state;
        let written = stage_surface(device, surface, &mut state.scratch)
            .map_err(PersistenceError::from)
            .and_then(|layout| self.sink.write_snapshot(&layout.frame(&state.scratch), &path));

        match written {
            Ok(()) => {
                state.stats.snapshots_written += 1;
                debug!("Wrote snapshot {}", path.display());
                RecordOutcome::SnapshotWritten
            }
            Err(e) => {
                state.stats.snapshot_failures += 1;
                warn!("Snapshot {} failed: {}", path.display(), e);
                RecordOutcome::SnapshotFailed
            }
        }
    }

    fn record_stream<D: GraphicsDevice>(&self, device: &D, surface: &D::Surface) -> RecordOutcome {
        let mut state = self.state.lock();
        if !self.streaming.load(Ordering::Acquire) {
            return RecordOutcome::Idle;
        }

        if state.stream.is_none() {
            match self.open_stream(state.started) {
                Ok(stream) => {
                    info!("Opened stream {}", stream.path.display());
                    state.stats.streams_opened += 1;
                    state.stream = Some(stream);
                }
                Err(e) => {
                    warn!("Streaming disabled: {}", e);
                    self.streaming.store(false, Ordering::Release);
                    return RecordOutcome::StreamFailed;
                }
            }
        }

        let elapsed = self.clock.now().saturating_duration_since(state.started);
        if elapsed >= self.config.stream_time_limit {
            info!("Stream reached its {:?} limit", self.config.stream_time_limit);
            self.streaming.store(false, Ordering::Release);
            Self::close_stream(&mut state);
            return RecordOutcome::StreamExpired;
        }

        let state = &mut *state;
        let appended = match stage_surface(device, surface, &mut state.scratch) {
            Ok(_) => Self::append(state),
            Err(e) => Err(e.into()),
        };

        match appended {
            Ok(bytes) => {
                state.stats.stream_frames += 1;
                state.stats.stream_bytes += bytes;
                RecordOutcome::StreamAppended
            }
            Err(e) => {
                warn!("Streaming disabled: {}", e);
                self.streaming.store(false, Ordering::Release);
                Self::close_stream(state);
                RecordOutcome::StreamFailed
            }
        }
    }

    fn open_stream(&self, started: Instant) -> PersistenceResult<OpenStream> {
        let path = self.config.save_directory.join(format!(
            "{}.{}",
            timestamp_nanos(started),
            STREAM_EXTENSION
        ));
        let writer = self.sink.create_stream(&path)?;
        Ok(OpenStream {
            writer,
            path,
            bytes_written: 0,
        })
    }

    fn append(state: &mut RecorderState) -> PersistenceResult<u64> {
        let Some(stream) = state.stream.as_mut() else {
            return Ok(0);
        };
        stream
            .writer
            .write_all(&state.scratch)
            .map_err(|e| PersistenceError::io(&stream.path, e))?;
        let bytes = state.scratch.len() as u64;
        stream.bytes_written += bytes;
        Ok(bytes)
    }

    fn close_stream(state: &mut RecorderState) {
        if let Some(mut stream) = state.stream.take() {
            if let Err(e) = stream.writer.flush() {
                warn!("Flushing {} failed: {}", stream.path.display(), e);
            }
            info!(
                "Closed stream {} after {} bytes",
                stream.path.display(),
                stream.bytes_written
            );
        }
    }
}

impl Drop for PersistenceSidecar {
    fn drop(&mut self) {
        Self::close_stream(self.state.get_mut());
    }
}
