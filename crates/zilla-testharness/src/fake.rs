//! ---
//! zl_section: "11-simulation"
//! zl_subsection: "module"
//! zl_type: "source"
//! zl_scope: "code"
//! zl_description: "Scriptable in-memory transport provider."
//! zl_version: "v0.1.0"
//! zl_owner: "tbd"
//! ---
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, Notify};
use zilla_link::{ConnectionError, TransportProvider, TransportStreams};
use zilla_telemetry::DeviceDescriptor;

/// What the next `open` call does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenBehavior {
    /// Open immediately.
    Succeed,
    /// Fail with the given error.
    Fail(ConnectionError),
    /// Never complete.
    Hang,
    /// Complete once [`FakeTransportProvider::release_gate`] is called.
    Gated,
}

/// Counts a live transport resource until dropped.
struct HandleToken(Arc<AtomicUsize>);

impl HandleToken {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for HandleToken {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

type Feed = mpsc::UnboundedSender<io::Result<Vec<u8>>>;

struct SessionInner {
    feed: Mutex<Option<Feed>>,
    written: Mutex<Vec<u8>>,
    fail_writes: AtomicBool,
    stall_writes: AtomicBool,
    shut_down: AtomicBool,
}

/// Test-side handle to one opened fake session.
#[derive(Clone)]
pub struct FakeSession {
    inner: Arc<SessionInner>,
}

impl FakeSession {
    /// Deliver bytes to the reader. Returns false once the reader is gone.
    pub fn feed(&self, bytes: impl AsRef<[u8]>) -> bool {
        let bytes = bytes.as_ref();
        if bytes.is_empty() {
            return true;
        }
        match self.inner.feed.lock().as_ref() {
            Some(feed) => feed.send(Ok(bytes.to_vec())).is_ok(),
            None => false,
        }
    }

    /// Make the next read fail with `message`.
    pub fn fail_read(&self, message: &str) -> bool {
        let error = io::Error::new(io::ErrorKind::ConnectionReset, message.to_owned());
        match self.inner.feed.lock().as_ref() {
            Some(feed) => feed.send(Err(error)).is_ok(),
            None => false,
        }
    }

    /// End the stream from the device side.
    pub fn close_remote(&self) {
        self.inner.feed.lock().take();
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<u8> {
        self.inner.written.lock().clone()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Writes and flushes stay pending while set, like a full radio buffer.
    pub fn set_stall_writes(&self, stall: bool) {
        self.inner.stall_writes.store(stall, Ordering::SeqCst);
    }

    /// Whether the link shut the write half down.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }
}

struct FakeReader {
    rx: mpsc::UnboundedReceiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    _token: HandleToken,
}

impl AsyncRead for FakeReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        while this.pending.is_empty() {
            match ready!(this.rx.poll_recv(cx)) {
                Some(Ok(bytes)) => this.pending = bytes,
                Some(Err(err)) => return Poll::Ready(Err(err)),
                None => return Poll::Ready(Ok(())),
            }
        }
        let n = buf.remaining().min(this.pending.len());
        buf.put_slice(&this.pending[..n]);
        this.pending.drain(..n);
        Poll::Ready(Ok(()))
    }
}

struct FakeWriter {
    session: Arc<SessionInner>,
    _token: HandleToken,
}

impl FakeWriter {
    fn check(&self) -> io::Result<()> {
        if self.session.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "injected write failure"));
        }
        if self.session.shut_down.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "writer shut down"));
        }
        Ok(())
    }
}

impl AsyncWrite for FakeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.session.stall_writes.load(Ordering::SeqCst) {
            return Poll::Pending;
        }
        if let Err(err) = self.check() {
            return Poll::Ready(Err(err));
        }
        self.session.written.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.session.stall_writes.load(Ordering::SeqCst) {
            return Poll::Pending;
        }
        Poll::Ready(self.check())
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.session.shut_down.store(true, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

struct ProviderInner {
    devices: Vec<DeviceDescriptor>,
    behavior: Mutex<OpenBehavior>,
    sessions: Mutex<Vec<FakeSession>>,
    opens: AtomicUsize,
    live: Arc<AtomicUsize>,
    gate: Notify,
}

/// In-memory [`TransportProvider`] with scripted open outcomes.
///
/// Every reader, writer and in-progress open holds a handle token, so
/// [`FakeTransportProvider::live_handles`] reaching zero means nothing leaked.
#[derive(Clone)]
pub struct FakeTransportProvider {
    inner: Arc<ProviderInner>,
}

impl FakeTransportProvider {
    pub fn new(devices: impl IntoIterator<Item = DeviceDescriptor>) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                devices: devices.into_iter().collect(),
                behavior: Mutex::new(OpenBehavior::Succeed),
                sessions: Mutex::new(Vec::new()),
                opens: AtomicUsize::new(0),
                live: Arc::new(AtomicUsize::new(0)),
                gate: Notify::new(),
            }),
        }
    }

    /// Provider exposing a single device named after its id.
    pub fn single(id: &str) -> Self {
        Self::new([DeviceDescriptor::new(id, id)])
    }

    pub fn set_behavior(&self, behavior: OpenBehavior) {
        *self.inner.behavior.lock() = behavior;
    }

    /// Let one gated open complete.
    pub fn release_gate(&self) {
        self.inner.gate.notify_one();
    }

    /// Number of `open` calls so far.
    pub fn opens(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    /// Readers, writers and pending opens not yet dropped.
    pub fn live_handles(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Most recently opened session.
    pub fn last_session(&self) -> Option<FakeSession> {
        self.inner.sessions.lock().last().cloned()
    }

    pub fn sessions(&self) -> Vec<FakeSession> {
        self.inner.sessions.lock().clone()
    }
}

#[async_trait]
impl TransportProvider for FakeTransportProvider {
    fn devices(&self) -> Vec<DeviceDescriptor> {
        self.inner.devices.clone()
    }

    async fn open(&self, _device: &DeviceDescriptor) -> Result<TransportStreams, ConnectionError> {
        self.inner.opens.fetch_add(1, Ordering::SeqCst);
        let behavior = self.inner.behavior.lock().clone();
        let opening = HandleToken::new(self.inner.live.clone());
        match behavior {
            OpenBehavior::Succeed => {}
            OpenBehavior::Fail(err) => return Err(err),
            OpenBehavior::Hang => std::future::pending::<()>().await,
            OpenBehavior::Gated => self.inner.gate.notified().await,
        }
        drop(opening);

        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(SessionInner {
            feed: Mutex::new(Some(tx)),
            written: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            stall_writes: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        });
        self.inner.sessions.lock().push(FakeSession {
            inner: session.clone(),
        });

        let reader = FakeReader {
            rx,
            pending: Vec::new(),
            _token: HandleToken::new(self.inner.live.clone()),
        };
        let writer = FakeWriter {
            session,
            _token: HandleToken::new(self.inner.live.clone()),
        };
        Ok(TransportStreams::new(reader, writer))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}
