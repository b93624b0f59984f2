/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Inter-task data channels and the readiness predicate.
//!
//! Tasks declare the channels they consume.  Before a task becomes fireable
//! the scheduler asks a [`Readiness`] implementation whether every declared
//! input holds data.  The check must never block and never consume data.
//!
//! [`Pipe`] is an anonymous POSIX pipe created before the task processes are
//! forked, so both ends are inherited by every child:
//!
//! ```text
//!   task_A ──write──► [ pipe AB ] ──read──► task_B
//!                          ▲
//!              scheduler: poll(POLLIN, 0 ms)  (readiness only)
//! ```
//!
//! Wire format per message: `u32` little-endian body length, then the body.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd::pipe;
use thiserror::Error;
use tracing::{debug, warn};

/// Index of a channel inside a [`ChannelRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub usize);

// ── Readiness contract ────────────────────────────────────────────────────────

/// Non-blocking predicate over a task's declared input channels.
pub trait Readiness {
    /// `true` if every channel in `inputs` can be read without waiting.
    fn is_ready(&self, inputs: &[ChannelId]) -> bool;
}

/// Readiness for workloads without channels: everything is always ready.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInputs;

impl Readiness for NoInputs {
    fn is_ready(&self, _inputs: &[ChannelId]) -> bool {
        true
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to create pipe '{name}': {source}")]
    Create { name: String, source: Errno },

    #[error("failed to poll pipe '{name}': {source}")]
    Poll { name: String, source: Errno },

    #[error("I/O error on pipe '{name}': {source}")]
    Io { name: String, source: io::Error },
}

// ── Pipe ──────────────────────────────────────────────────────────────────────

/// One unidirectional message channel.
///
/// Every message carries a length header, so each `write` is read back by
/// exactly one `read`, however many messages are queued.
#[derive(Debug)]
pub struct Pipe {
    name: String,
    reader: File,
    writer: File,
}

impl Pipe {
    pub fn new(name: impl Into<String>) -> Result<Self, ChannelError> {
        let name = name.into();
        let (read_end, write_end) = pipe().map_err(|source| ChannelError::Create {
            name: name.clone(),
            source,
        })?;
        Ok(Self {
            name,
            reader: File::from(read_end),
            writer: File::from(write_end),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait up to `timeout` for readable data (`None` waits forever).
    fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool, ChannelError> {
        let timeout = PollTimeout::try_from(timeout_millis(timeout)).unwrap_or(PollTimeout::NONE);

        let mut fds = [PollFd::new(self.reader.as_fd(), PollFlags::POLLIN)];
        loop {
            match poll(&mut fds, timeout) {
                Ok(0) => return Ok(false),
                Ok(_) => {
                    return Ok(fds[0]
                        .revents()
                        .is_some_and(|ev| ev.contains(PollFlags::POLLIN)))
                }
                Err(Errno::EINTR) => continue,
                Err(source) => {
                    return Err(ChannelError::Poll {
                        name: self.name.clone(),
                        source,
                    })
                }
            }
        }
    }

    fn io_error(&self, source: io::Error) -> ChannelError {
        ChannelError::Io {
            name: self.name.clone(),
            source,
        }
    }

    /// Non-consuming readiness check.
    pub fn has_data(&self) -> bool {
        match self.wait_readable(Some(Duration::ZERO)) {
            Ok(ready) => ready,
            Err(err) => {
                warn!(error = %err, "readiness check failed");
                false
            }
        }
    }

    /// Write one message.
    ///
    /// Header and body go out in a single `write`, so messages up to
    /// `PIPE_BUF` bytes never interleave with other writers.
    pub fn write(&self, bytes: &[u8]) -> Result<(), ChannelError> {
        let len = u32::try_from(bytes.len()).map_err(|_| {
            self.io_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("message of {} bytes is too large", bytes.len()),
            ))
        })?;

        let mut frame = Vec::with_capacity(HEADER_LEN + bytes.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(bytes);
        (&self.writer)
            .write_all(&frame)
            .map_err(|source| self.io_error(source))
    }

    /// Read the next message into `buf`, waiting up to `timeout` for it.
    ///
    /// Returns the number of bytes stored, or `Ok(None)` if nothing arrived in
    /// time.  A message longer than `buf` is truncated; its tail is dropped so
    /// the following read starts at the next message.
    pub fn read(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<Option<usize>, ChannelError> {
        if !self.wait_readable(timeout)? {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        match (&self.reader).read_exact(&mut header) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(self.io_error(err)),
        }
        let len = u32::from_le_bytes(header) as usize;

        let kept = len.min(buf.len());
        (&self.reader)
            .read_exact(&mut buf[..kept])
            .map_err(|source| self.io_error(source))?;

        let dropped = (len - kept) as u64;
        if dropped > 0 {
            let skipped = io::copy(&mut (&self.reader).take(dropped), &mut io::sink())
                .map_err(|source| self.io_error(source))?;
            warn!(channel = %self.name, len, kept, skipped, "message truncated to buffer size");
        }
        Ok(Some(kept))
    }

    /// Convenience wrapper around [`read`](Self::read) returning an owned
    /// message of at most `max_len` bytes.
    pub fn read_message(
        &self,
        max_len: usize,
        timeout: Option<Duration>,
    ) -> Result<Option<Vec<u8>>, ChannelError> {
        let mut buf = vec![0u8; max_len];
        Ok(self.read(&mut buf, timeout)?.map(|n| {
            buf.truncate(n);
            buf
        }))
    }
}

/// Message header: body length, little-endian `u32`.
const HEADER_LEN: usize = 4;

/// `poll(2)` timeout in milliseconds; `-1` waits forever.
fn timeout_millis(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(t) => i32::try_from(t.as_millis()).unwrap_or(i32::MAX),
    }
}

// ── ChannelRegistry ───────────────────────────────────────────────────────────

/// Owns every pipe of a workload and answers readiness queries for them.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    pipes: Vec<Arc<Pipe>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pipe and return its id plus a shared handle for payloads.
    pub fn declare(&mut self, name: &str) -> Result<(ChannelId, Arc<Pipe>), ChannelError> {
        let pipe = Arc::new(Pipe::new(name)?);
        let id = ChannelId(self.pipes.len());
        self.pipes.push(Arc::clone(&pipe));
        debug!(channel = %name, id = id.0, "declared pipe");
        Ok((id, pipe))
    }

    pub fn get(&self, id: ChannelId) -> Option<&Arc<Pipe>> {
        self.pipes.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }
}

impl Readiness for ChannelRegistry {
    fn is_ready(&self, inputs: &[ChannelId]) -> bool {
        inputs
            .iter()
            .all(|id| self.get(*id).is_some_and(|pipe| pipe.has_data()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
