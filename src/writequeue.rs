//! Single-writer FIFO output queue with partial-write continuation.
//!
//! Grounded on the original's `LibWCQueuedWrite`/`queue_write`/
//! `queued_write_cb`: entries are dequeued strictly in FIFO order; a
//! short write is continued with a slice starting at the first unwritten
//! byte of the same entry; a cancelled entry is skipped once it reaches
//! the head, but a head entry already being written is allowed to
//! complete.

use std::collections::VecDeque;

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};

use crate::{cancel::CancellationToken, error::RelayError};

/// One queued outbound byte block, with an optional cancellation token.
#[derive(Debug)]
pub struct WriteEntry {
    data: Vec<u8>,
    cancel: Option<CancellationToken>,
}

impl WriteEntry {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, cancel: None }
    }

    pub fn with_cancellation(data: Vec<u8>, cancel: CancellationToken) -> Self {
        Self {
            data,
            cancel: Some(cancel),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

/// The ordered queue of writes not yet fully flushed to the socket.
#[derive(Debug)]
pub struct WriteQueue {
    entries: Mutex<VecDeque<WriteEntry>>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Pushes `entry` onto the tail. Returns `true` if the queue was
    /// empty beforehand, meaning the caller must kick off [`Self::run`]
    /// itself; otherwise an already-running writer will reach it.
    pub async fn enqueue(&self, entry: WriteEntry) -> bool {
        let mut entries = self.entries.lock().await;
        let was_empty = entries.is_empty();
        entries.push_back(entry);
        was_empty
    }

    /// Teardown: drops every entry without writing it.
    pub async fn cancel_all(&self) {
        self.entries.lock().await.clear();
    }

    /// Writes every entry currently in the queue, skipping cancelled
    /// entries at the head, returning once the queue drains. A write
    /// error is fatal and propagated to the caller, which tears down the
    /// whole connection.
    pub async fn run<W>(&self, writer: &mut W) -> Result<(), RelayError>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            let entry = {
                let mut entries = self.entries.lock().await;
                loop {
                    match entries.front() {
                        None => return Ok(()),
                        Some(entry) if entry.is_cancelled() => {
                            entries.pop_front();
                        }
                        Some(_) => break,
                    }
                }
                entries.pop_front().expect("front entry checked above")
            };

            let mut offset = 0;
            while offset < entry.data.len() {
                let written = writer.write(&entry.data[offset..]).await?;
                if written == 0 {
                    return Err(RelayError::Io(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "write returned zero bytes",
                    )));
                }
                offset += written;
            }
        }
    }
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new()
    }
}
