//! Pipes and pipe event notification.
//!
//! Pipes are created by the engine when a dialer or listener establishes a
//! connection. Applications observe them through [`PipeEvent`] callbacks and
//! may close them, but never create them.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{NativeResultExt, Result};
use crate::handle::{Dialer, Listener, Pipe, Socket};
use crate::native::{self, PipeCallback, Target};
use crate::options::Options;

/// Pipe lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipeEvent {
    /// About to be attached. Closing the pipe from the callback rejects it.
    Adding,
    /// Attached and usable.
    Added,
    /// Detached. The transport may already be gone.
    Removed,
}

impl PipeEvent {
    pub const ALL: [Self; 3] = [Self::Adding, Self::Added, Self::Removed];

    /// Index usable for per-event tables.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for PipeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adding => f.write_str("adding"),
            Self::Added => f.write_str("added"),
            Self::Removed => f.write_str("removed"),
        }
    }
}

impl Pipe {
    /// The identifier, if the pipe is still open.
    pub fn id(self) -> Result<u32> {
        native::engine()?.pipe_id(self.raw()).raise("Pipe::id")
    }

    /// Close the pipe. The owning dialer may reconnect afterwards.
    pub fn close(self) -> Result<()> {
        native::engine()?
            .pipe_close(self.raw())
            .raise("Pipe::close")?;
        debug!(pipe = self.raw(), "pipe closed");
        Ok(())
    }

    pub fn socket(self) -> Result<Socket> {
        native::engine()?
            .pipe_socket(self.raw())
            .map(Socket::from_raw)
            .raise("Pipe::socket")
    }

    /// The dialer that created this pipe, if a dialer did.
    pub fn dialer(self) -> Result<Option<Dialer>> {
        native::engine()?
            .pipe_dialer(self.raw())
            .map(|id| id.map(Dialer::from_raw))
            .raise("Pipe::dialer")
    }

    /// The listener that accepted this pipe, if a listener did.
    pub fn listener(self) -> Result<Option<Listener>> {
        native::engine()?
            .pipe_listener(self.raw())
            .map(|id| id.map(Listener::from_raw))
            .raise("Pipe::listener")
    }
}

impl Options for Pipe {
    fn option_target(&self) -> Target {
        self.target()
    }
}

impl Socket {
    /// Register `callback` for `event`, replacing any earlier registration.
    ///
    /// The callback runs on an engine thread, synchronously with the pipe
    /// transition, and must not block.
    pub fn set_pipe_notification<F>(self, event: PipeEvent, callback: F) -> Result<()>
    where
        F: Fn(Pipe, PipeEvent) + Send + Sync + 'static,
    {
        let callback: PipeCallback = Arc::new(callback);
        native::engine()?
            .set_pipe_notify(self.raw(), event, Some(callback))
            .raise("Socket::set_pipe_notification")?;
        debug!(socket = self.raw(), %event, "pipe notification registered");
        Ok(())
    }

    pub fn clear_pipe_notification(self, event: PipeEvent) -> Result<()> {
        native::engine()?
            .set_pipe_notify(self.raw(), event, None)
            .raise("Socket::clear_pipe_notification")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_indices_are_dense() {
        for (i, event) in PipeEvent::ALL.into_iter().enumerate() {
            assert_eq!(event.index(), i);
        }
        assert_eq!(PipeEvent::Removed.to_string(), "removed");
    }
}
