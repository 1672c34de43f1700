//! Recording session orchestration.
//!
//! A [`RecordingOrchestrator`] owns the lifecycle of one recording session at
//! a time:
//!
//! ```text
//! Idle -> Recording -> (RotatingSegment -> Recording)* -> Stopping -> Stopped
//! ```
//!
//! While recording, a single task supervises the encoder process, rotates
//! segments, runs the overlay tick loop and watches the sensor readers. The
//! orchestrator handle itself is cheap to clone and only talks to that task
//! through a cancellation token, a state `watch` and an event `broadcast`.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::encoder::{Encoder, EncoderExit, EncoderProcess, SegmentSpec};
use crate::error::{Error, Result};
use crate::fusion::SensorFusionBus;
use crate::overlay::OverlaySink;
use crate::reader::SensorReader;
use crate::telemetry::FusedSnapshot;

/// Lifecycle state of the recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session has been started.
    Idle,
    /// The encoder is recording the current segment.
    Recording,
    /// Closing one segment and opening the next.
    RotatingSegment,
    /// Shutting down the encoder and readers.
    Stopping,
    /// The session has ended (cleanly or not).
    Stopped,
}

impl SessionState {
    /// Whether a session is in progress.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Recording | Self::RotatingSegment | Self::Stopping
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Recording => write!(f, "recording"),
            Self::RotatingSegment => write!(f, "rotating_segment"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// The current (or last) recording session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordingSession {
    /// Session identifier, derived from the start time.
    pub session_id: String,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// Index of the segment being recorded.
    pub current_segment_index: u32,
    /// When the current segment started.
    pub segment_started_at: DateTime<Utc>,
    /// Lifecycle state.
    pub state: SessionState,
}

/// One segment, as reported to sinks and subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentInfo {
    /// Owning session.
    pub session_id: String,
    /// Segment index within the session.
    pub index: u32,
    /// Output video file.
    pub path: PathBuf,
    /// When the segment started.
    pub started_at: DateTime<Utc>,
    /// When the segment was closed.
    pub ended_at: Option<DateTime<Utc>>,
}

/// Notifications published while a session runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session moved to a new state.
    StateChanged(SessionState),
    /// A segment's encoder started.
    SegmentStarted(SegmentInfo),
    /// A segment was closed.
    SegmentClosed(SegmentInfo),
    /// The session ended because of an error.
    Failed(String),
}

/// Session tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Directory segment files are written to.
    pub output_dir: PathBuf,
    /// Length of one segment.
    pub segment_duration: Duration,
    /// Interval between overlay updates.
    pub tick_interval: Duration,
    /// Overlay text file handed to the encoder.
    pub overlay_path: PathBuf,
    /// How long the encoder gets to finish a file before it is killed.
    pub stop_grace: Duration,
    /// Segment file extension.
    pub extension: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("recordings"),
            segment_duration: Duration::from_secs(180),
            tick_interval: Duration::from_millis(1000),
            overlay_path: PathBuf::from("overlay.txt"),
            stop_grace: Duration::from_secs(10),
            extension: "mp4".to_string(),
        }
    }
}

impl SessionConfig {
    /// Pick an id for a session started at `started_at`.
    ///
    /// Ids have one-second resolution. A numeric suffix is added when the id
    /// was used by the previous session or its first segment is already on
    /// disk.
    fn session_id(&self, started_at: DateTime<Utc>, previous: Option<&str>) -> String {
        let base = started_at.format("%Y%m%d_%H%M%S").to_string();
        let taken = |id: &str| {
            previous == Some(id) || self.segment_spec(id, 0).output_path.exists()
        };

        let mut id = base.clone();
        let mut suffix = 1;
        while taken(&id) {
            id = format!("{base}_{suffix}");
            suffix += 1;
        }
        id
    }

    fn segment_spec(&self, session_id: &str, index: u32) -> SegmentSpec {
        SegmentSpec {
            session_id: session_id.to_string(),
            index,
            output_path: self
                .output_dir
                .join(format!("{session_id}_{index:03}.{}", self.extension)),
            overlay_path: self.overlay_path.clone(),
            duration: self.segment_duration,
        }
    }
}

/// Sinks and readers lent to a running session.
#[derive(Debug, Default)]
struct Parts {
    sinks: Vec<Box<dyn OverlaySink>>,
    readers: Vec<Box<dyn SensorReader>>,
}

#[derive(Debug)]
struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<Parts>,
}

#[derive(Debug, Default)]
struct Control {
    parts: Parts,
    run: Option<RunHandle>,
}

#[derive(Debug, Default)]
struct Status {
    session: Option<RecordingSession>,
    last_error: Option<String>,
}

#[derive(Debug)]
struct Inner {
    config: SessionConfig,
    bus: SensorFusionBus,
    encoder: Arc<dyn Encoder>,
    state_tx: watch::Sender<SessionState>,
    events_tx: broadcast::Sender<SessionEvent>,
    status: Mutex<Status>,
    control: tokio::sync::Mutex<Control>,
}

impl Inner {
    fn status(&self) -> MutexGuard<'_, Status> {
        self.status
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    fn set_state(&self, state: SessionState) {
        if let Some(session) = self.status().session.as_mut() {
            session.state = state;
        }
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "session state changed");
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn record_failure(&self, err: &Error) {
        let message = err.to_string();
        error!(error = %message, "recording session failed");
        self.status().last_error = Some(message.clone());
        self.emit(SessionEvent::Failed(message));
    }
}

/// Runs recording sessions.
#[derive(Debug, Clone)]
pub struct RecordingOrchestrator {
    inner: Arc<Inner>,
}

impl RecordingOrchestrator {
    /// Create an idle orchestrator.
    #[must_use]
    pub fn new(
        config: SessionConfig,
        bus: SensorFusionBus,
        encoder: Arc<dyn Encoder>,
        sinks: Vec<Box<dyn OverlaySink>>,
        readers: Vec<Box<dyn SensorReader>>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (events_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                config,
                bus,
                encoder,
                state_tx,
                events_tx,
                status: Mutex::new(Status::default()),
                control: tokio::sync::Mutex::new(Control {
                    parts: Parts { sinks, readers },
                    run: None,
                }),
            }),
        }
    }

    /// Start a new session.
    ///
    /// The first encoder process is spawned before this returns; if it can't
    /// start, the error is returned and the session ends in `Stopped`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionActive`] if a session is already running,
    /// [`Error::DirectoryCreate`] if the output directory can't be created, or
    /// the encoder's spawn error.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let mut control = inner.control.lock().await;

        let state = self.current_state();
        if state.is_active() {
            return Err(Error::SessionActive { state });
        }
        if let Some(run) = control.run.take() {
            let parts = reclaim(run).await;
            control.parts = parts;
        }

        let output_dir = &inner.config.output_dir;
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|source| Error::DirectoryCreate {
                path: output_dir.clone(),
                source,
            })?;

        let started_at = Utc::now();
        let previous = inner.status().session.as_ref().map(|s| s.session_id.clone());
        let session_id = inner
            .config
            .session_id(started_at, previous.as_deref());
        let spec = inner.config.segment_spec(&session_id, 0);

        {
            let mut status = inner.status();
            status.last_error = None;
            status.session = Some(RecordingSession {
                session_id: session_id.clone(),
                started_at,
                current_segment_index: 0,
                segment_started_at: started_at,
                state,
            });
        }

        let process = match inner.encoder.spawn(&spec).await {
            Ok(process) => process,
            Err(err) => {
                inner.record_failure(&err);
                inner.set_state(SessionState::Stopped);
                return Err(err);
            }
        };

        info!(session = %session_id, "recording session started");
        inner.set_state(SessionState::Recording);

        let mut parts = std::mem::take(&mut control.parts);
        let segment = SegmentInfo {
            session_id: session_id.clone(),
            index: 0,
            path: spec.output_path.clone(),
            started_at,
            ended_at: None,
        };
        for sink in &mut parts.sinks {
            if let Err(err) = sink.begin_segment(&segment).await {
                warn!(sink = sink.name(), error = %err, "sink failed to open segment");
            }
        }
        inner.emit(SessionEvent::SegmentStarted(segment.clone()));

        let cancel = CancellationToken::new();
        let readers_cancel = cancel.child_token();
        let mut readers = JoinSet::new();
        for mut reader in parts.readers.drain(..) {
            let bus = inner.bus.clone();
            let token = readers_cancel.clone();
            readers.spawn(async move {
                let result = reader.run(&bus, &token).await;
                (reader, result)
            });
        }

        let now = Instant::now();
        let run = SessionRun {
            inner: Arc::clone(inner),
            cancel: cancel.clone(),
            readers_cancel,
            process: Some(process),
            segment,
            session_started: now,
            segment_deadline: now + inner.config.segment_duration,
            sinks: parts.sinks,
            readers,
            idle_readers: Vec::new(),
        };
        control.run = Some(RunHandle {
            cancel,
            task: tokio::spawn(run.run()),
        });
        Ok(())
    }

    /// Stop the session, waiting until the encoder has finished the file and
    /// the readers have released their devices.
    ///
    /// Stopping an idle or stopped orchestrator does nothing.
    ///
    /// # Errors
    ///
    /// Currently always succeeds; failures during shutdown are logged and
    /// recorded as [`RecordingOrchestrator::last_error`].
    pub async fn stop(&self) -> Result<()> {
        let mut control = self.inner.control.lock().await;
        let Some(run) = control.run.take() else {
            return Ok(());
        };
        run.cancel.cancel();
        control.parts = reclaim(run).await;
        Ok(())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn current_state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// A snapshot of the sensors right now.
    #[must_use]
    pub fn current_snapshot(&self) -> FusedSnapshot {
        self.inner.bus.snapshot(Instant::now())
    }

    /// The current or most recent session.
    #[must_use]
    pub fn session(&self) -> Option<RecordingSession> {
        self.inner.status().session.clone()
    }

    /// The error that ended the most recent session, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.inner.status().last_error.clone()
    }

    /// Watch the lifecycle state.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Receive session events from now on.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events_tx.subscribe()
    }
}

async fn reclaim(run: RunHandle) -> Parts {
    match run.task.await {
        Ok(parts) => parts,
        Err(err) => {
            error!(error = %err, "session task panicked, sinks and readers lost");
            Parts::default()
        }
    }
}

type ReaderOutcome = (Box<dyn SensorReader>, Result<()>);

async fn encoder_exit(process: Option<&mut Box<dyn EncoderProcess>>) -> Result<EncoderExit> {
    match process {
        Some(process) => process.wait().await,
        None => std::future::pending().await,
    }
}

/// The task that drives one session.
struct SessionRun {
    inner: Arc<Inner>,
    cancel: CancellationToken,
    readers_cancel: CancellationToken,
    /// The current segment's encoder; `None` once the segment is closed.
    process: Option<Box<dyn EncoderProcess>>,
    segment: SegmentInfo,
    session_started: Instant,
    segment_deadline: Instant,
    sinks: Vec<Box<dyn OverlaySink>>,
    readers: JoinSet<ReaderOutcome>,
    idle_readers: Vec<Box<dyn SensorReader>>,
}

impl SessionRun {
    async fn run(mut self) -> Parts {
        let mut ticker = interval(self.inner.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let failure = loop {
            tokio::select! {
                () = self.cancel.cancelled() => break None,
                exit = encoder_exit(self.process.as_mut()) => {
                    let message = match exit {
                        Ok(exit) => format!("encoder exited unexpectedly ({exit})"),
                        Err(err) => format!("lost track of encoder: {err}"),
                    };
                    break Some(Error::encoder(self.segment.index, message));
                }
                () = sleep_until(self.segment_deadline) => {
                    if let Err(err) = self.rotate().await {
                        break Some(err);
                    }
                }
                _ = ticker.tick() => self.tick().await,
                Some(joined) = self.readers.join_next(), if !self.readers.is_empty() => {
                    if let Some(err) = self.reader_finished(joined) {
                        break Some(err);
                    }
                }
            }
        };

        self.finish(failure).await
    }

    async fn tick(&mut self) {
        let snapshot = self.inner.bus.snapshot(Instant::now());
        let elapsed = self.session_started.elapsed();
        for sink in &mut self.sinks {
            if let Err(err) = sink.render(&snapshot, elapsed).await {
                warn!(sink = sink.name(), error = %err, "overlay sink failed");
            }
        }
    }

    async fn close_segment(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };
        let grace = self.inner.config.stop_grace;
        match process.shutdown(grace).await {
            Ok(exit) if exit.success() => debug!(segment = self.segment.index, "encoder finished"),
            Ok(exit) => warn!(segment = self.segment.index, %exit, "encoder finished uncleanly"),
            Err(err) => warn!(segment = self.segment.index, error = %err, "encoder shutdown failed"),
        }

        self.segment.ended_at = Some(Utc::now());
        for sink in &mut self.sinks {
            if let Err(err) = sink.end_segment(&self.segment).await {
                warn!(sink = sink.name(), error = %err, "sink failed to close segment");
            }
        }
        info!(
            session = %self.segment.session_id,
            segment = self.segment.index,
            path = %self.segment.path.display(),
            "segment closed"
        );
        self.inner
            .emit(SessionEvent::SegmentClosed(self.segment.clone()));
    }

    async fn rotate(&mut self) -> Result<()> {
        self.inner.set_state(SessionState::RotatingSegment);
        self.close_segment().await;

        let index = self.segment.index + 1;
        let spec = self
            .inner
            .config
            .segment_spec(&self.segment.session_id, index);
        let process = self.inner.encoder.spawn(&spec).await?;
        let started_at = Utc::now();

        self.process = Some(process);
        self.segment = SegmentInfo {
            session_id: spec.session_id,
            index,
            path: spec.output_path,
            started_at,
            ended_at: None,
        };
        self.segment_deadline = Instant::now() + self.inner.config.segment_duration;
        if let Some(session) = self.inner.status().session.as_mut() {
            session.current_segment_index = index;
            session.segment_started_at = started_at;
        }

        for sink in &mut self.sinks {
            if let Err(err) = sink.begin_segment(&self.segment).await {
                warn!(sink = sink.name(), error = %err, "sink failed to open segment");
            }
        }
        self.inner
            .emit(SessionEvent::SegmentStarted(self.segment.clone()));
        self.inner.set_state(SessionState::Recording);
        Ok(())
    }

    fn reader_finished(
        &mut self,
        joined: std::result::Result<ReaderOutcome, tokio::task::JoinError>,
    ) -> Option<Error> {
        match joined {
            Ok((reader, Ok(()))) => {
                debug!(kind = %reader.kind(), "reader finished");
                self.idle_readers.push(reader);
                None
            }
            Ok((reader, Err(err))) => {
                let kind = reader.kind();
                self.idle_readers.push(reader);
                if err.is_session_fatal() {
                    Some(err)
                } else {
                    warn!(%kind, error = %err, "reader stopped");
                    None
                }
            }
            Err(err) => {
                error!(error = %err, "reader task panicked, reader lost");
                Some(Error::internal(format!("reader task panicked: {err}")))
            }
        }
    }

    async fn finish(mut self, failure: Option<Error>) -> Parts {
        self.inner.set_state(SessionState::Stopping);
        self.close_segment().await;

        self.readers_cancel.cancel();
        while let Some(joined) = self.readers.join_next().await {
            if let Some(err) = self.reader_finished(joined) {
                warn!(error = %err, "reader failed while stopping");
            }
        }
        for reader in &self.idle_readers {
            let status = reader.status();
            info!(
                kind = %status.kind,
                device = %status.device,
                events = status.events,
                errors = status.errors,
                reconnects = status.reconnects,
                "reader released"
            );
        }

        if let Some(err) = &failure {
            self.inner.record_failure(err);
        }

        let (session, last_error) = {
            let status = self.inner.status();
            (status.session.clone(), status.last_error.clone())
        };
        if let Some(mut session) = session {
            session.state = SessionState::Stopped;
            for sink in &mut self.sinks {
                if let Err(err) = sink.session_ended(&session, last_error.as_deref()).await {
                    warn!(sink = sink.name(), error = %err, "sink failed to end session");
                }
            }
            info!(session = %session.session_id, "recording session stopped");
        }
        self.inner.set_state(SessionState::Stopped);

        Parts {
            sinks: self.sinks,
            readers: self.idle_readers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{DeviceKind, ReaderStatus};
    use crate::telemetry::{FixQuality, GpsFix, Timestamp};
    use std::sync::atomic::{AtomicU32, Ordering};

    type Log = Arc<Mutex<Vec<String>>>;

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[derive(Debug, Default)]
    struct FakeEncoder {
        spawned: Mutex<Vec<SegmentSpec>>,
        shutdowns: Arc<AtomicU32>,
        die_after: Option<Duration>,
        refuse_from: Option<u32>,
    }

    #[async_trait::async_trait]
    impl Encoder for FakeEncoder {
        async fn spawn(&self, segment: &SegmentSpec) -> Result<Box<dyn EncoderProcess>> {
            if self.refuse_from.is_some_and(|from| segment.index >= from) {
                return Err(Error::encoder(segment.index, "no camera"));
            }
            self.spawned.lock().unwrap().push(segment.clone());
            Ok(Box::new(FakeProcess {
                dies_at: self.die_after.map(|d| Instant::now() + d),
                shutdowns: Arc::clone(&self.shutdowns),
            }))
        }
    }

    #[derive(Debug)]
    struct FakeProcess {
        dies_at: Option<Instant>,
        shutdowns: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl EncoderProcess for FakeProcess {
        async fn wait(&mut self) -> Result<EncoderExit> {
            match self.dies_at {
                Some(at) => {
                    sleep_until(at).await;
                    Ok(EncoderExit { code: Some(1) })
                }
                None => std::future::pending().await,
            }
        }

        async fn shutdown(&mut self, _grace: Duration) -> Result<EncoderExit> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(EncoderExit { code: Some(0) })
        }
    }

    #[derive(Debug)]
    struct LogSink {
        log: Log,
        last: Arc<Mutex<Option<FusedSnapshot>>>,
    }

    #[async_trait::async_trait]
    impl OverlaySink for LogSink {
        fn name(&self) -> &str {
            "log"
        }

        async fn begin_segment(&mut self, segment: &SegmentInfo) -> Result<()> {
            self.log.lock().unwrap().push(format!("begin {}", segment.index));
            Ok(())
        }

        async fn render(&mut self, snapshot: &FusedSnapshot, _elapsed: Duration) -> Result<()> {
            *self.last.lock().unwrap() = Some(snapshot.clone());
            Ok(())
        }

        async fn end_segment(&mut self, segment: &SegmentInfo) -> Result<()> {
            assert!(segment.ended_at.is_some());
            self.log.lock().unwrap().push(format!("end {}", segment.index));
            Ok(())
        }

        async fn session_ended(
            &mut self,
            session: &RecordingSession,
            error: Option<&str>,
        ) -> Result<()> {
            assert_eq!(session.state, SessionState::Stopped);
            let entry = match error {
                Some(_) => "ended with error",
                None => "ended",
            };
            self.log.lock().unwrap().push(entry.to_string());
            Ok(())
        }
    }

    #[derive(Debug, Clone, Copy)]
    enum ReaderFault {
        Quiet,
        Disconnect(Duration),
        Panic(Duration),
    }

    #[derive(Debug)]
    struct FakeReader {
        runs: Arc<AtomicU32>,
        fault: ReaderFault,
    }

    #[async_trait::async_trait]
    impl SensorReader for FakeReader {
        fn kind(&self) -> DeviceKind {
            DeviceKind::Gps
        }

        fn status(&self) -> ReaderStatus {
            ReaderStatus {
                kind: DeviceKind::Gps,
                device: "fake-gps".to_string(),
                connected: false,
                events: 0,
                errors: 0,
                reconnects: 0,
            }
        }

        async fn run(&mut self, _bus: &SensorFusionBus, cancel: &CancellationToken) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            match self.fault {
                ReaderFault::Quiet => {
                    cancel.cancelled().await;
                    Ok(())
                }
                ReaderFault::Disconnect(after) => {
                    tokio::select! {
                        () = cancel.cancelled() => Ok(()),
                        () = tokio::time::sleep(after) => Err(Error::DeviceDisconnected {
                            device: "fake-gps".to_string(),
                            attempts: 3,
                        }),
                    }
                }
                ReaderFault::Panic(after) => {
                    tokio::time::sleep(after).await;
                    panic!("gps reader blew up");
                }
            }
        }
    }

    struct Harness {
        orchestrator: RecordingOrchestrator,
        encoder: Arc<FakeEncoder>,
        bus: SensorFusionBus,
        log: Log,
        last: Arc<Mutex<Option<FusedSnapshot>>>,
        reader_runs: Arc<AtomicU32>,
        _dir: tempfile::TempDir,
    }

    fn harness(encoder: FakeEncoder, fault: ReaderFault) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            output_dir: dir.path().join("rec"),
            segment_duration: Duration::from_secs(10),
            tick_interval: Duration::from_secs(1),
            overlay_path: dir.path().join("overlay.txt"),
            stop_grace: Duration::from_secs(1),
            extension: "mp4".to_string(),
        };
        let encoder = Arc::new(encoder);
        let bus = SensorFusionBus::default();
        let log = Log::default();
        let last = Arc::new(Mutex::new(None));
        let reader_runs = Arc::new(AtomicU32::new(0));
        let orchestrator = RecordingOrchestrator::new(
            config,
            bus.clone(),
            encoder.clone(),
            vec![Box::new(LogSink {
                log: Arc::clone(&log),
                last: Arc::clone(&last),
            })],
            vec![Box::new(FakeReader {
                runs: Arc::clone(&reader_runs),
                fault,
            })],
        );
        Harness {
            orchestrator,
            encoder,
            bus,
            log,
            last,
            reader_runs,
            _dir: dir,
        }
    }

    fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Idle.to_string(), "idle");
        assert_eq!(SessionState::RotatingSegment.to_string(), "rotating_segment");
        assert!(SessionState::Stopping.is_active());
        assert!(!SessionState::Stopped.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_produces_segments() {
        let h = harness(FakeEncoder::default(), ReaderFault::Quiet);
        let mut events = h.orchestrator.subscribe_events();

        h.orchestrator.start().await.unwrap();
        assert_eq!(h.orchestrator.current_state(), SessionState::Recording);
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(h.orchestrator.current_state(), SessionState::Recording);
        assert_eq!(
            h.orchestrator.session().unwrap().current_segment_index,
            2
        );
        h.orchestrator.stop().await.unwrap();

        let spawned = h.encoder.spawned.lock().unwrap().clone();
        let indices: Vec<u32> = spawned.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(spawned[1]
            .output_path
            .to_string_lossy()
            .ends_with("_001.mp4"));
        assert_eq!(h.encoder.shutdowns.load(Ordering::SeqCst), 3);

        assert_eq!(
            entries(&h.log),
            vec!["begin 0", "end 0", "begin 1", "end 1", "begin 2", "end 2", "ended"]
        );

        let states: Vec<SessionState> = drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::StateChanged(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                SessionState::Recording,
                SessionState::RotatingSegment,
                SessionState::Recording,
                SessionState::RotatingSegment,
                SessionState::Recording,
                SessionState::Stopping,
                SessionState::Stopped,
            ]
        );
        assert_eq!(h.orchestrator.current_state(), SessionState::Stopped);
        assert!(h.orchestrator.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let h = harness(FakeEncoder::default(), ReaderFault::Quiet);
        h.orchestrator.stop().await.unwrap();
        assert_eq!(h.orchestrator.current_state(), SessionState::Idle);

        h.orchestrator.start().await.unwrap();
        h.orchestrator.stop().await.unwrap();
        h.orchestrator.stop().await.unwrap();
        assert_eq!(h.orchestrator.current_state(), SessionState::Stopped);
        assert_eq!(h.encoder.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(entries(&h.log), vec!["begin 0", "end 0", "ended"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_active_is_rejected() {
        let h = harness(FakeEncoder::default(), ReaderFault::Quiet);
        h.orchestrator.start().await.unwrap();
        let err = h.orchestrator.start().await.unwrap_err();
        assert!(matches!(
            err,
            Error::SessionActive {
                state: SessionState::Recording
            }
        ));
        h.orchestrator.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_encoder_death_is_fatal() {
        let h = harness(
            FakeEncoder {
                die_after: Some(Duration::from_secs(5)),
                ..FakeEncoder::default()
            },
            ReaderFault::Quiet,
        );
        let mut events = h.orchestrator.subscribe_events();
        let mut state = h.orchestrator.subscribe_state();

        h.orchestrator.start().await.unwrap();
        state
            .wait_for(|s| *s == SessionState::Stopped)
            .await
            .unwrap();

        let error = h.orchestrator.last_error().unwrap();
        assert!(error.contains("segment 0"), "{error}");
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, SessionEvent::Failed(_))));
        assert_eq!(h.encoder.spawned.lock().unwrap().len(), 1);
        assert_eq!(
            entries(&h.log),
            vec!["begin 0", "end 0", "ended with error"]
        );

        h.orchestrator.stop().await.unwrap();
        assert_eq!(h.orchestrator.current_state(), SessionState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_failure_is_returned() {
        let h = harness(
            FakeEncoder {
                refuse_from: Some(0),
                ..FakeEncoder::default()
            },
            ReaderFault::Quiet,
        );
        let err = h.orchestrator.start().await.unwrap_err();
        assert!(matches!(err, Error::EncoderProcessFailure { segment: 0, .. }));
        assert_eq!(h.orchestrator.current_state(), SessionState::Stopped);
        assert!(h.orchestrator.last_error().unwrap().contains("no camera"));
        assert_eq!(h.reader_runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_rotation_closes_segment_once() {
        let h = harness(
            FakeEncoder {
                refuse_from: Some(1),
                ..FakeEncoder::default()
            },
            ReaderFault::Quiet,
        );
        let mut events = h.orchestrator.subscribe_events();
        let mut state = h.orchestrator.subscribe_state();

        h.orchestrator.start().await.unwrap();
        state
            .wait_for(|s| *s == SessionState::Stopped)
            .await
            .unwrap();

        let error = h.orchestrator.last_error().unwrap();
        assert!(error.contains("segment 1"), "{error}");
        assert_eq!(h.encoder.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(
            entries(&h.log),
            vec!["begin 0", "end 0", "ended with error"]
        );
        let closed = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::SegmentClosed(_)))
            .count();
        assert_eq!(closed, 1);
        h.orchestrator.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_panic_ends_session() {
        let h = harness(
            FakeEncoder::default(),
            ReaderFault::Panic(Duration::from_secs(2)),
        );
        let mut state = h.orchestrator.subscribe_state();

        h.orchestrator.start().await.unwrap();
        state
            .wait_for(|s| *s == SessionState::Stopped)
            .await
            .unwrap();

        let error = h.orchestrator.last_error().unwrap();
        assert!(error.contains("reader task panicked"), "{error}");
        assert_eq!(h.encoder.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(
            entries(&h.log),
            vec!["begin 0", "end 0", "ended with error"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_gets_a_fresh_session_id() {
        let h = harness(FakeEncoder::default(), ReaderFault::Quiet);

        h.orchestrator.start().await.unwrap();
        let first = h.orchestrator.session().unwrap().session_id;
        h.orchestrator.stop().await.unwrap();
        h.orchestrator.start().await.unwrap();
        let second = h.orchestrator.session().unwrap().session_id;
        h.orchestrator.stop().await.unwrap();

        assert_ne!(first, second);
        let spawned = h.encoder.spawned.lock().unwrap().clone();
        assert_ne!(spawned[0].output_path, spawned[1].output_path);
    }

    #[test]
    fn test_session_id_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            output_dir: dir.path().to_path_buf(),
            ..SessionConfig::default()
        };
        let started_at = DateTime::parse_from_rfc3339("2024-01-15T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc);

        assert_eq!(config.session_id(started_at, None), "20240115_083000");
        assert_eq!(
            config.session_id(started_at, Some("20240115_083000")),
            "20240115_083000_1"
        );

        std::fs::write(dir.path().join("20240115_083000_000.mp4"), b"").unwrap();
        std::fs::write(dir.path().join("20240115_083000_1_000.mp4"), b"").unwrap();
        assert_eq!(config.session_id(started_at, None), "20240115_083000_2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_disconnect_is_fatal_and_restart_works() {
        let h = harness(
            FakeEncoder::default(),
            ReaderFault::Disconnect(Duration::from_secs(3)),
        );
        let mut state = h.orchestrator.subscribe_state();

        h.orchestrator.start().await.unwrap();
        state
            .wait_for(|s| *s == SessionState::Stopped)
            .await
            .unwrap();
        assert!(h.orchestrator.last_error().unwrap().contains("fake-gps"));

        h.orchestrator.start().await.unwrap();
        assert_eq!(h.orchestrator.current_state(), SessionState::Recording);
        assert!(h.orchestrator.last_error().is_none());
        assert_eq!(h.orchestrator.session().unwrap().current_segment_index, 0);
        h.orchestrator.stop().await.unwrap();

        assert_eq!(h.reader_runs.load(Ordering::SeqCst), 2);
        assert_eq!(h.encoder.spawned.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_deliver_snapshots() {
        let h = harness(FakeEncoder::default(), ReaderFault::Quiet);
        h.bus.publish_gps(GpsFix {
            latitude_deg: 1.0,
            longitude_deg: 2.0,
            altitude_m: None,
            speed_kph: 30.0,
            heading_deg: 0.0,
            fix_quality: FixQuality::TwoD,
            satellite_count: 3,
            timestamp: Timestamp::now(),
        });

        h.orchestrator.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let snapshot = h.last.lock().unwrap().clone().expect("tick rendered");
        assert!(snapshot.latest_gps.is_some());
        assert!(!snapshot.staleness.gps_stale);
        assert_eq!(
            h.orchestrator.current_snapshot().latest_gps,
            snapshot.latest_gps
        );
        h.orchestrator.stop().await.unwrap();
    }
}
