//! A mock, useful to test bridging without actual serial ports.
//!
//! Each time the mock is opened an in-memory byte stream is handed out.
//! A task plays the device on the far end of that stream,
//! answering requests according to its [`MockBehaviour`].

use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    task::{Context, Poll},
    time::Duration,
};

use tokio::{
    io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf},
    time::Instant,
};
use tracing::{debug, info, trace, warn, Instrument};

use crate::endpoint::EndpointId;

/// How much a mock device buffers in each direction.
const MOCK_BUFFER_SIZE: usize = 64 * 1024;

/// How a mock device answers requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehaviour {
    /// Write back whatever was received.
    Echo,

    /// Wait `delay`, then write `reply` one byte at a time with `byte_gap` between bytes.
    Reply {
        /// What to answer with.
        reply: Vec<u8>,

        /// Time from receiving a request to the first byte of the reply.
        delay: Duration,

        /// Time between each byte of the reply.
        byte_gap: Duration,
    },

    /// Never answer.
    Silent,

    /// Close the stream upon receiving a request.
    HangUp,
}

impl MockBehaviour {
    /// Answer with `reply` right away.
    pub fn reply<B: Into<Vec<u8>>>(reply: B) -> Self {
        Self::Reply {
            reply: reply.into(),
            delay: Duration::ZERO,
            byte_gap: Duration::ZERO,
        }
    }
}

/// A request the mock device received, and how long it spent on it.
#[derive(Debug, Clone)]
pub struct MockExchange {
    /// The bytes received in one read.
    pub request: Vec<u8>,

    /// When the request arrived at the device.
    pub received: Instant,

    /// When the device was done answering.
    pub finished: Instant,
}

impl MockExchange {
    /// Whether the device was busy with this request at the given instant.
    pub fn in_progress_at(&self, at: Instant) -> bool {
        self.received < at && at < self.finished
    }
}

#[derive(Debug)]
pub(crate) struct MockShared {
    behaviour: Mutex<MockBehaviour>,
    exchanges: Mutex<Vec<MockExchange>>,
    writes: Mutex<Vec<Instant>>,
    opens: AtomicUsize,
    live_handles: AtomicUsize,
    failing_opens: AtomicUsize,
    break_next_write: AtomicBool,
}

// A poisoned lock only means some test thread panicked; the data is still fine.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Builder for a [`MockHandle`].
#[derive(Debug)]
pub struct MockBuilder {
    name: String,
    behaviour: MockBehaviour,
}

impl MockBuilder {
    /// A new mock device, by default it echoes.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::Echo,
        }
    }

    /// Set the [`MockBehaviour`].
    pub fn behaviour(mut self, behaviour: MockBehaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    /// Create the mock.
    #[must_use]
    pub fn build(self) -> MockHandle {
        info!(mock = %self.name, behaviour = ?self.behaviour, "Creating mock");

        MockHandle {
            id: EndpointId::Mock(self.name),
            shared: Arc::new(MockShared {
                behaviour: Mutex::new(self.behaviour),
                exchanges: Mutex::new(vec![]),
                writes: Mutex::new(vec![]),
                opens: AtomicUsize::new(0),
                live_handles: AtomicUsize::new(0),
                failing_opens: AtomicUsize::new(0),
                break_next_write: AtomicBool::new(false),
            }),
        }
    }
}

/// A mock device.
///
/// Cloning gives another handle to the same device,
/// which is useful for inspecting it while a bridge is using it.
#[derive(Debug, Clone)]
pub struct MockHandle {
    pub(crate) id: EndpointId,
    pub(crate) shared: Arc<MockShared>,
}

impl MockHandle {
    /// Change how the device answers from now on.
    pub fn set_behaviour(&self, behaviour: MockBehaviour) {
        *lock(&self.shared.behaviour) = behaviour;
    }

    /// The next open fails, as if the device was missing.
    pub fn fail_next_open(&self) {
        self.shared.failing_opens.fetch_add(1, Ordering::SeqCst);
    }

    /// The next time the device is opened, the stream handed out is already broken:
    /// the first write to it fails.
    pub fn break_next_write(&self) {
        self.shared.break_next_write.store(true, Ordering::SeqCst);
    }

    /// How many times the device was opened successfully.
    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// How many streams to the device are currently not dropped.
    pub fn live_handles(&self) -> usize {
        self.shared.live_handles.load(Ordering::SeqCst)
    }

    /// Every request received so far.
    pub fn exchanges(&self) -> Vec<MockExchange> {
        lock(&self.shared.exchanges).clone()
    }

    /// When the bridge side put bytes on the wire, one entry per successful write.
    pub fn writes(&self) -> Vec<Instant> {
        lock(&self.shared.writes).clone()
    }

    /// Writes which reached the device while it was still answering an earlier request.
    pub fn interleaved_writes(&self) -> Vec<Instant> {
        let exchanges = self.exchanges();

        self.writes()
            .into_iter()
            .filter(|&at| exchanges.iter().any(|exchange| exchange.in_progress_at(at)))
            .collect()
    }

    pub(crate) fn take_failing_open(&self) -> bool {
        self.shared
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    pub(crate) fn open_stream(&self) -> MockStream {
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        self.shared.live_handles.fetch_add(1, Ordering::SeqCst);

        let (near, far) = io::duplex(MOCK_BUFFER_SIZE);

        if self.shared.break_next_write.swap(false, Ordering::SeqCst) {
            debug!(mock = %self.id, "Handing out a broken stream");
            drop(far);
        } else {
            tokio::spawn(
                run_device(far, self.shared.clone())
                    .instrument(tracing::debug_span!("mock", id = %self.id)),
            );
        }

        MockStream {
            inner: near,
            shared: self.shared.clone(),
        }
    }
}

async fn run_device(mut far: DuplexStream, shared: Arc<MockShared>) {
    let mut buffer = vec![0; MOCK_BUFFER_SIZE];

    loop {
        let n = match far.read(&mut buffer).await {
            Ok(0) => {
                trace!("Stream closed by the bridge");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(?e, "Mock read problem");
                return;
            }
        };

        let received = Instant::now();
        let request = buffer[..n].to_vec();
        let behaviour = lock(&shared.behaviour).clone();

        trace!(?behaviour, "Got request of length {n}");

        let answered = match behaviour {
            MockBehaviour::Echo => far.write_all(&request).await,
            MockBehaviour::Reply {
                reply,
                delay,
                byte_gap,
            } => reply_slowly(&mut far, &reply, delay, byte_gap).await,
            MockBehaviour::Silent => Ok(()),
            MockBehaviour::HangUp => {
                debug!("Hanging up");
                return;
            }
        };

        lock(&shared.exchanges).push(MockExchange {
            request,
            received,
            finished: Instant::now(),
        });

        if let Err(e) = answered {
            debug!(?e, "Stream closed while answering");
            return;
        }
    }
}

async fn reply_slowly(
    far: &mut DuplexStream,
    reply: &[u8],
    delay: Duration,
    byte_gap: Duration,
) -> io::Result<()> {
    tokio::time::sleep(delay).await;

    for (index, byte) in reply.iter().enumerate() {
        if index > 0 && !byte_gap.is_zero() {
            tokio::time::sleep(byte_gap).await;
        }
        far.write_all(&[*byte]).await?;
    }

    Ok(())
}

/// The bridge's end of a mock device.
#[derive(Debug)]
pub(crate) struct MockStream {
    inner: DuplexStream,
    shared: Arc<MockShared>,
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.shared.live_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let written = Pin::new(&mut self.inner).poll_write(cx, buf);

        if let Poll::Ready(Ok(n)) = written {
            if n > 0 {
                lock(&self.shared.writes).push(Instant::now());
            }
        }

        written
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
