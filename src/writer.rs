//! Dedicated writer task, one per connection.
//!
//! Frames are queued through an mpsc channel and written by a single task,
//! so the header and body of one frame are never interleaved with another
//! frame's bytes, and frames leave in the order they were queued.
//!
//! ```text
//! Reactor ─► mpsc::UnboundedSender<OutboundFrame> ─► Writer Task ─► Socket
//!                                                        │
//!                                 WriterEvent::Written(tag) / Failed(err)
//! ```
//!
//! Ready frames are batched into a single `write_vectored` call.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, WirelinkError};
use crate::protocol::{Header, HEADER_SIZE};

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the socket.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header.
    pub header: [u8; HEADER_SIZE],
    /// Body bytes.
    pub body: Bytes,
    /// Correlation tag, reported back once written.
    pub tag: u32,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    #[inline]
    pub fn new(header: &Header, body: Bytes) -> Self {
        Self {
            header: header.encode(),
            body,
            tag: header.tag,
        }
    }

    /// Total size of this frame (header + body).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}

/// Completion reports from the writer task.
#[derive(Debug)]
pub enum WriterEvent {
    /// The frame carrying this tag was fully written and flushed.
    Written(u32),
    /// The socket failed; the task has stopped.
    Failed(WirelinkError),
}

/// Handle for queueing frames on the writer task.
///
/// Queueing never blocks, so it is safe to call from the reactor loop.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl WriterHandle {
    /// Queue a frame. Fails only if the writer task has stopped.
    pub fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx.send(frame).map_err(|_| {
            WirelinkError::from(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "writer task has stopped",
            ))
        })
    }
}

/// Spawn the writer task.
///
/// `notify` is called from the writer task for every written frame (in
/// order) and once more if the socket fails.
pub fn spawn_writer_task<W, F>(writer: W, notify: F) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
    F: FnMut(WriterEvent) + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(writer_loop(rx, writer, notify));
    (WriterHandle { tx }, task)
}

async fn writer_loop<W, F>(
    mut rx: mpsc::UnboundedReceiver<OutboundFrame>,
    mut writer: W,
    mut notify: F,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    F: FnMut(WriterEvent),
{
    while let Some(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::error!("Write failed after {} queued frames: {}", batch.len(), e);
            notify(WriterEvent::Failed(e.clone()));
            return Err(e);
        }

        for frame in &batch {
            notify(WriterEvent::Written(frame.tag));
        }
    }

    // Channel closed: the connection was torn down.
    let _ = writer.shutdown().await;
    Ok(())
}

/// Write a batch of frames using scatter/gather I/O.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )
            .into());
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data after the first `skip_bytes` bytes.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        let header_end = offset + HEADER_SIZE;
        if skip_bytes < header_end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.header[start..]));
        }
        offset = header_end;

        if !frame.body.is_empty() {
            let body_end = offset + frame.body.len();
            if skip_bytes < body_end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&frame.body[start..]));
            }
            offset = body_end;
        }
    }

    slices
}
