//! Outbound queue and writer task.
//!
//! All senders on a connection share one [`WriterHandle`]. Frames go over an
//! mpsc channel to a single task that owns the write half of the stream and
//! flushes whatever is queued with one vectored write.
//!
//! ```text
//! request() ─┐
//! notify()  ─┼─► WriterHandle ─► mpsc ─► writer task ─► stream
//! request() ─┘
//! ```
//!
//! Backpressure: every queued frame holds a semaphore permit until it has
//! been written. With no permits left, `send` waits up to the configured
//! timeout and `try_send` fails straight away.

use std::collections::VecDeque;
use std::io::IoSlice;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::error::{Result, RoutewireError};
use crate::protocol::Packet;

/// Default limit of frames queued but not yet written.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames drained from the channel per write.
const MAX_BATCH_SIZE: usize = 64;

/// An encoded packet split for vectored writes.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Length prefix plus encoded header.
    pub head: Bytes,
    /// Payload bytes, possibly empty.
    pub payload: Bytes,
}

impl OutboundFrame {
    pub fn from_packet<T: Serialize>(packet: &mut Packet<T>) -> Result<Self> {
        let (head, payload) = packet.encode_parts()?;
        Ok(Self { head, payload })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.head.len() + self.payload.len()
    }
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub max_pending_frames: usize,
    pub channel_capacity: usize,
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// A frame plus the permit it holds until written.
struct Queued {
    frame: OutboundFrame,
    _permit: OwnedSemaphorePermit,
}

/// Cloneable sending side of the writer task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Queued>,
    permits: Arc<Semaphore>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    /// Queue a frame, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// `BackpressureTimeout` if no room frees up in time, `Disconnected`
    /// once the writer task has stopped.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        let permit = tokio::time::timeout(self.timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| RoutewireError::BackpressureTimeout)?
            .map_err(|_| RoutewireError::Disconnected)?;

        self.tx
            .send(Queued {
                frame,
                _permit: permit,
            })
            .await
            .map_err(|_| RoutewireError::Disconnected)
    }

    /// Queue a frame without waiting.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| RoutewireError::BackpressureTimeout)?;

        self.tx
            .try_send(Queued {
                frame,
                _permit: permit,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => RoutewireError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => RoutewireError::Disconnected,
            })
    }

    /// True once the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.permits.available_permits() == 0
    }

    /// Frames queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.max_pending
            .saturating_sub(self.permits.available_permits())
    }
}

/// Spawn the writer task over the write half of a stream.
///
/// The task ends with `Ok` once every [`WriterHandle`] is dropped, or with
/// the first write error.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let max_pending = config.max_pending_frames.max(1);
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));

    let handle = WriterHandle {
        tx,
        permits: Arc::new(Semaphore::new(max_pending)),
        max_pending,
        timeout: config.backpressure_timeout,
    };

    (handle, tokio::spawn(writer_loop(rx, writer)))
}

async fn writer_loop<W>(mut rx: mpsc::Receiver<Queued>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    while let Some(first) = rx.recv().await {
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(next) => batch.push(next),
                Err(_) => break,
            }
        }

        let mut chunks: VecDeque<Bytes> = VecDeque::with_capacity(batch.len() * 2);
        for queued in &batch {
            chunks.push_back(queued.frame.head.clone());
            if !queued.frame.payload.is_empty() {
                chunks.push_back(queued.frame.payload.clone());
            }
        }

        write_chunks(&mut writer, chunks).await?;
        // Releases the permits.
        batch.clear();
    }

    Ok(())
}

/// Write every chunk, resuming after short writes.
async fn write_chunks<W>(writer: &mut W, mut chunks: VecDeque<Bytes>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while !chunks.is_empty() {
        let written = {
            let slices: Vec<IoSlice<'_>> = chunks.iter().map(|c| IoSlice::new(c)).collect();
            writer.write_vectored(&slices).await?
        };
        if written == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
        }
        advance(&mut chunks, written);
    }

    writer.flush().await?;
    Ok(())
}

/// Drop the first `n` bytes from a chunk queue.
fn advance(chunks: &mut VecDeque<Bytes>, mut n: usize) {
    while n > 0 {
        let Some(front) = chunks.front_mut() else {
            return;
        };
        if n < front.len() {
            front.advance(n);
            return;
        }
        n -= front.len();
        chunks.pop_front();
    }
}
