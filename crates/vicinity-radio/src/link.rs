//! Async radio link over any byte stream.
//!
//! The link owns two tasks: a reader that feeds the [`Decoder`] and forwards
//! decoded frames, and a writer that drains a bounded queue into the
//! transport. Sending never blocks and never fails loudly.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::decoder::{Decoder, DecoderStats};
use crate::error::LinkError;
use crate::frame::Frame;

const READ_CHUNK: usize = 512;

/// A byte stream the link can run over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

pub type BoxedTransport = Box<dyn Transport>;

/// Open a radio device. `tcp://host:port` connects to a serial bridge;
/// anything else is opened as a character device or file.
pub async fn open(device: &str) -> Result<BoxedTransport, LinkError> {
    let open_err = |source| LinkError::Open {
        device: device.to_owned(),
        source,
    };

    if let Some(addr) = device.strip_prefix("tcp://") {
        let stream = TcpStream::connect(addr).await.map_err(open_err)?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "radio bridge: set_nodelay failed");
        }
        info!(device, "radio link connected to serial bridge");
        Ok(Box::new(stream))
    } else {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .await
            .map_err(open_err)?;
        info!(device, "radio device opened");
        Ok(Box::new(file))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkStats {
    pub up: bool,
    pub frames_sent: u64,
    pub send_failures: u64,
    pub decoder: DecoderStats,
}

#[derive(Default)]
struct Shared {
    up: AtomicBool,
    frames_sent: AtomicU64,
    send_failures: AtomicU64,
    decoder: Mutex<DecoderStats>,
}

/// Handle for sending frames. Cheap to clone.
#[derive(Clone)]
pub struct RadioLink {
    outbound: mpsc::Sender<Bytes>,
    shared: Arc<Shared>,
}

/// A freshly spawned link plus the stream of frames it decodes.
pub struct SpawnedLink {
    pub link: RadioLink,
    pub frames: mpsc::Receiver<Frame>,
    pub tasks: Vec<JoinHandle<()>>,
}

impl RadioLink {
    pub fn spawn<T>(transport: T, queue_size: usize, cancel: CancellationToken) -> SpawnedLink
    where
        T: Transport + 'static,
    {
        let queue_size = queue_size.max(1);
        let (reader, writer) = tokio::io::split(transport);
        let (out_tx, out_rx) = mpsc::channel::<Bytes>(queue_size);
        let (frame_tx, frame_rx) = mpsc::channel::<Frame>(queue_size);

        let shared = Arc::new(Shared::default());
        shared.up.store(true, Ordering::Release);

        let reader_task = tokio::spawn(read_loop(reader, frame_tx, shared.clone(), cancel.clone()));
        let writer_task = tokio::spawn(write_loop(writer, out_rx, shared.clone(), cancel));

        SpawnedLink {
            link: Self { outbound: out_tx, shared },
            frames: frame_rx,
            tasks: vec![reader_task, writer_task],
        }
    }

    /// Queue a frame for transmission. Returns `false` when the link is down,
    /// the queue is full, or the frame cannot be encoded.
    pub fn send(&self, frame: &Frame) -> bool {
        if !self.is_up() {
            self.shared.send_failures.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let bytes = match frame.encode() {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "radio frame not sent");
                self.shared.send_failures.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };

        match self.outbound.try_send(bytes) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("radio send queue full, dropping frame");
                self.shared.send_failures.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.shared.up.store(false, Ordering::Release);
                self.shared.send_failures.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn is_up(&self) -> bool {
        self.shared.up.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            up: self.is_up(),
            frames_sent: self.shared.frames_sent.load(Ordering::Relaxed),
            send_failures: self.shared.send_failures.load(Ordering::Relaxed),
            decoder: *self.shared.decoder.lock(),
        }
    }
}

async fn read_loop<R>(
    mut reader: R,
    frames: mpsc::Sender<Frame>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut decoder = Decoder::new();
    let mut chunk = [0u8; READ_CHUNK];

    'outer: loop {
        let read = tokio::select! {
            () = cancel.cancelled() => break,
            r = reader.read(&mut chunk) => r,
        };

        match read {
            Ok(0) => {
                warn!("radio transport reached end of stream");
                break;
            }
            Ok(n) => decoder.extend(&chunk[..n]),
            Err(e) => {
                warn!(error = %e, "radio read failed");
                break;
            }
        }

        while let Some(outcome) = decoder.poll_frame() {
            match outcome {
                Ok(frame) => {
                    if frames.send(frame).await.is_err() {
                        debug!("radio frame consumer gone");
                        break 'outer;
                    }
                }
                Err(e) => warn!(error = %e, "radio frame dropped"),
            }
        }
        *shared.decoder.lock() = decoder.stats();
    }

    *shared.decoder.lock() = decoder.stats();
    shared.up.store(false, Ordering::Release);
}

async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::Receiver<Bytes>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let bytes = tokio::select! {
            () = cancel.cancelled() => break,
            next = outbound.recv() => match next {
                Some(b) => b,
                None => break,
            },
        };

        let written = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            warn!(error = %e, "radio write failed, link down");
            break;
        }
        shared.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    shared.up.store(false, Ordering::Release);
}
