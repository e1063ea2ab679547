//! ---
//! zl_section: "05-link-core"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Connection state machine, session ownership and the read loop."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
//! Every state transition is applied while holding the session slot lock and is
//! tagged with the slot epoch. Teardown bumps the epoch first, so a connect
//! attempt or read loop from an older epoch can never publish a transition.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zilla_codec::{DecodeEvent, DecoderStats, StreamDecoder};
use zilla_common::{AppConfig, SnapshotRetention, SourcePolicy};
use zilla_metrics::LinkMetrics;
use zilla_telemetry::{ConnectionState, DeviceDescriptor};

use crate::error::{ConnectionError, LinkError};
use crate::publisher::{producer_for, MetricsPublisher, MetricsSink, SourceKind};
use crate::transport::{BoxedReader, BoxedWriter, TransportProvider, TransportStreams};

/// Tunables for sessions.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub poll_interval: Duration,
    pub read_chunk_size: usize,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub max_frame_len: usize,
    pub retention: SnapshotRetention,
    pub source: SourcePolicy,
}

impl ConnectionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            poll_interval: config.link.poll_interval,
            read_chunk_size: config.link.read_chunk_size,
            connect_timeout: config.link.connect_timeout,
            write_timeout: config.command.write_timeout,
            max_frame_len: config.decoder.max_frame_len,
            retention: config.link.snapshot_retention,
            source: config.link.source,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

pub(crate) type SharedWriter = Arc<AsyncMutex<Option<BoxedWriter>>>;

pub(crate) struct Session {
    pub(crate) device: DeviceDescriptor,
    writer: SharedWriter,
    /// Flipped to `true` before the writer is locked for closing.
    closing: Arc<watch::Sender<bool>>,
    alive: Arc<AtomicBool>,
    read_task: Option<JoinHandle<()>>,
}

impl Session {
    pub(crate) fn write_handle(&self) -> WriteHandle {
        WriteHandle {
            writer: self.writer.clone(),
            closing: self.closing.subscribe(),
        }
    }
}

/// Writer of one session plus the signal that it is being closed.
pub(crate) struct WriteHandle {
    pub(crate) writer: SharedWriter,
    closing: watch::Receiver<bool>,
}

impl WriteHandle {
    /// Resolves once the owning session starts closing.
    pub(crate) async fn closed(&mut self) {
        let _ = self.closing.wait_for(|closing| *closing).await;
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closing.borrow()
    }
}

#[derive(Default)]
pub(crate) struct SessionSlot {
    epoch: u64,
    attempt: Option<JoinHandle<()>>,
    pub(crate) session: Option<Session>,
    last_device: Option<String>,
}

pub(crate) struct Shared {
    provider: Arc<dyn TransportProvider>,
    pub(crate) settings: ConnectionSettings,
    pub(crate) publisher: Arc<MetricsPublisher>,
    state_tx: watch::Sender<ConnectionState>,
    pub(crate) error_tx: watch::Sender<Option<String>>,
    busy: AtomicBool,
    ops: AsyncMutex<()>,
    pub(crate) slot: Mutex<SessionSlot>,
    stats: Mutex<DecoderStats>,
    pub(crate) metrics: Option<LinkMetrics>,
}

/// Clears the busy flag when the connect attempt ends, however it ends.
struct BusyGuard(Arc<Shared>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::Release);
    }
}

/// Owns the physical session and its state machine.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct ConnectionManager {
    pub(crate) shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(
        provider: Arc<dyn TransportProvider>,
        publisher: Arc<MetricsPublisher>,
        settings: ConnectionSettings,
        metrics: Option<LinkMetrics>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (error_tx, _) = watch::channel(None);
        publisher.set_active_source(producer_for(settings.source, false));
        if let Some(metrics) = &metrics {
            metrics.set_connection_state(ConnectionState::Disconnected.gauge_value());
        }
        Self {
            shared: Arc::new(Shared {
                provider,
                settings,
                publisher,
                state_tx,
                error_tx,
                busy: AtomicBool::new(false),
                ops: AsyncMutex::new(()),
                slot: Mutex::new(SessionSlot::default()),
                stats: Mutex::new(DecoderStats::default()),
                metrics,
            }),
        }
    }

    /// Start an attempt to connect to `device_id`.
    ///
    /// Returns once the attempt is accepted; the outcome arrives on the state
    /// stream. Fails with [`LinkError::Busy`] while another attempt is in flight.
    pub async fn connect(&self, device_id: &str) -> Result<(), LinkError> {
        if self
            .shared
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(device = %device_id, "connect rejected, attempt in flight");
            return Err(LinkError::Busy);
        }
        let guard = BusyGuard(self.shared.clone());
        let _ops = self.shared.ops.lock().await;

        {
            let slot = self.shared.slot.lock();
            let same_device = slot
                .session
                .as_ref()
                .is_some_and(|session| session.device.id == device_id);
            if same_device && self.state().is_connected() {
                debug!(device = %device_id, "already connected");
                return Ok(());
            }
        }

        self.shared.teardown().await;

        let mut slot = self.shared.slot.lock();
        slot.epoch += 1;
        slot.last_device = Some(device_id.to_owned());
        let epoch = slot.epoch;
        self.shared.set_error(None);
        self.shared.transition(ConnectionState::Connecting);
        info!(device = %device_id, provider = self.shared.provider.name(), "connecting");

        let shared = self.shared.clone();
        let device_id = device_id.to_owned();
        slot.attempt = Some(tokio::spawn(async move {
            let result = shared.open_session(&device_id).await;
            shared.finish_attempt(epoch, result);
            // released only after the outcome is published
            drop(guard);
        }));
        Ok(())
    }

    /// Cancel any attempt, stop the read loop, close the transport and end in
    /// `Disconnected`. Safe from any state.
    pub async fn disconnect(&self) {
        let _ops = self.shared.ops.lock().await;
        self.shared.teardown().await;
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn subscribe_errors(&self) -> watch::Receiver<Option<String>> {
        self.shared.error_tx.subscribe()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.error_tx.borrow().clone()
    }

    /// Device of the active session.
    pub fn device(&self) -> Option<DeviceDescriptor> {
        let slot = self.shared.slot.lock();
        slot.session.as_ref().map(|session| session.device.clone())
    }

    /// Identifier passed to the most recent accepted `connect`.
    pub fn last_device_id(&self) -> Option<String> {
        self.shared.slot.lock().last_device.clone()
    }

    /// Whether a connect attempt is in flight.
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// Decoder counters accumulated over every session.
    pub fn decoder_stats(&self) -> DecoderStats {
        *self.shared.stats.lock()
    }

    pub fn provider(&self) -> &Arc<dyn TransportProvider> {
        &self.shared.provider
    }
}

impl Shared {
    /// Apply a transition. Callers hold the slot lock.
    ///
    /// The producer switch and any snapshot reset happen before subscribers
    /// observe the new state.
    fn transition(&self, state: ConnectionState) {
        if *self.state_tx.borrow() == state {
            return;
        }
        self.publisher
            .set_active_source(producer_for(self.settings.source, state.is_connected()));
        if matches!(state, ConnectionState::Disconnected | ConnectionState::Error)
            && self.settings.retention == SnapshotRetention::Reset
        {
            self.publisher.reset();
        }
        self.state_tx.send_replace(state);
        debug!(%state, "connection state changed");
        if let Some(metrics) = &self.metrics {
            metrics.set_connection_state(state.gauge_value());
        }
    }

    pub(crate) fn set_error(&self, message: Option<String>) {
        self.error_tx.send_if_modified(|current| {
            if *current == message {
                false
            } else {
                *current = message;
                true
            }
        });
    }

    async fn open_session(
        &self,
        device_id: &str,
    ) -> Result<(DeviceDescriptor, TransportStreams), ConnectionError> {
        let deadline = self.settings.connect_timeout;
        let attempt = async {
            let device = self.provider.resolve(device_id)?;
            let streams = self.provider.open(&device).await?;
            Ok::<_, ConnectionError>((device, streams))
        };
        match tokio::time::timeout(deadline, attempt).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(deadline)),
        }
    }

    fn finish_attempt(
        self: &Arc<Self>,
        epoch: u64,
        result: Result<(DeviceDescriptor, TransportStreams), ConnectionError>,
    ) {
        let mut slot = self.slot.lock();
        if slot.epoch != epoch {
            debug!(epoch, "discarding result of a cancelled connect attempt");
            return;
        }
        slot.attempt = None;

        match result {
            Ok((device, streams)) => {
                let alive = Arc::new(AtomicBool::new(true));
                let writer: SharedWriter = Arc::new(AsyncMutex::new(Some(streams.writer)));
                let (closing, _) = watch::channel(false);
                self.transition(ConnectionState::Connected);
                let read_task = tokio::spawn(read_loop(
                    self.clone(),
                    epoch,
                    streams.reader,
                    alive.clone(),
                ));
                info!(device = %device.id, name = %device.display_name, "connected");
                slot.session = Some(Session {
                    device,
                    writer,
                    closing: Arc::new(closing),
                    alive,
                    read_task: Some(read_task),
                });
                if let Some(metrics) = &self.metrics {
                    metrics.record_connect("connected");
                }
            }
            Err(err) => {
                error!(error = %err, "connect attempt failed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_connect(err.outcome());
                }
                self.set_error(Some(format!("Connection failed: {err}")));
                self.transition(ConnectionState::Error);
            }
        }
    }

    /// Callers hold the ops lock.
    async fn teardown(&self) {
        let (attempt, session) = {
            let mut slot = self.slot.lock();
            slot.epoch += 1;
            (slot.attempt.take(), slot.session.take())
        };

        if let Some(attempt) = attempt {
            attempt.abort();
            let _ = attempt.await;
            debug!("cancelled in-flight connect attempt");
        }
        if let Some(session) = session {
            close_session(session, self.settings.write_timeout).await;
            info!("disconnected");
        }

        let _slot = self.slot.lock();
        self.set_error(None);
        self.transition(ConnectionState::Disconnected);
    }

    /// Called by the read loop when the transport fails. The transport is
    /// closed before `Error` is published.
    async fn session_lost(&self, epoch: u64, cause: String) {
        let writer = {
            let slot = self.slot.lock();
            if slot.epoch != epoch {
                return;
            }
            slot.session.as_ref().map(|session| {
                session.closing.send_replace(true);
                session.writer.clone()
            })
        };
        if let Some(writer) = writer {
            close_writer(&writer, self.settings.write_timeout).await;
        }

        let mut slot = self.slot.lock();
        if slot.epoch != epoch {
            return;
        }
        // drops this task's own handle
        slot.session = None;
        error!(%cause, "connection lost");
        self.set_error(Some(format!("Connection lost: {cause}")));
        self.transition(ConnectionState::Error);
    }

    fn record_progress(&self, previous: DecoderStats, current: DecoderStats) {
        let step = DecoderStats {
            frames_decoded: current.frames_decoded - previous.frames_decoded,
            frames_malformed: current.frames_malformed - previous.frames_malformed,
            frames_oversized: current.frames_oversized - previous.frames_oversized,
            bytes_received: current.bytes_received - previous.bytes_received,
        };
        if let Some(metrics) = &self.metrics {
            metrics.add_bytes(step.bytes_received);
            metrics.add_frames("decoded", step.frames_decoded);
            metrics.add_frames("malformed", step.frames_malformed);
            metrics.add_frames("oversized", step.frames_oversized);
        }
        let mut total = self.stats.lock();
        *total = total.merged(step);
    }
}

/// Stop the read loop, wait for it, then close the writer.
async fn close_session(session: Session, grace: Duration) {
    session.alive.store(false, Ordering::Release);
    session.closing.send_replace(true);
    if let Some(task) = session.read_task {
        let _ = task.await;
    }
    close_writer(&session.writer, grace).await;
}

/// Pending command writes observe the closing signal and release the lock.
/// The transport is dropped even when its shutdown does not finish in time.
async fn close_writer(writer: &SharedWriter, grace: Duration) {
    let Some(mut transport) = writer.lock().await.take() else {
        return;
    };
    match tokio::time::timeout(grace, transport.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(error = %err, "transport shutdown reported an error"),
        Err(_) => debug!(?grace, "transport shutdown timed out"),
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    epoch: u64,
    mut reader: BoxedReader,
    alive: Arc<AtomicBool>,
) {
    let mut decoder = StreamDecoder::new(shared.settings.max_frame_len);
    let mut buf = vec![0u8; shared.settings.read_chunk_size];
    let poll = shared.settings.poll_interval;

    let failure = loop {
        if !alive.load(Ordering::Acquire) {
            break None;
        }
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break Some("end of stream".to_owned()),
                Ok(n) => {
                    let previous = decoder.stats();
                    for event in decoder.feed(&buf[..n]) {
                        match event {
                            DecodeEvent::Delta(delta) => {
                                if !shared.publisher.push(SourceKind::Live, &delta) {
                                    debug!("live delta ignored by publisher");
                                }
                            }
                            DecodeEvent::Discarded(reason) => {
                                warn!(%reason, "discarded frame");
                            }
                        }
                    }
                    shared.record_progress(previous, decoder.stats());
                }
                Err(err) => break Some(err.to_string()),
            },
            _ = tokio::time::sleep(poll) => {}
        }
    };

    drop(reader);
    if let Some(cause) = failure {
        shared.session_lost(epoch, cause).await;
    } else {
        debug!(epoch, "read loop stopped");
    }
}
