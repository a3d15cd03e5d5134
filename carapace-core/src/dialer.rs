//! Dialers and listeners.
//!
//! Both are created against a socket with an address string and do nothing
//! until started. Closing either one closes every pipe it owns.

use tracing::debug;

use crate::error::{NativeResultExt, Result};
use crate::handle::{Dialer, Listener};
use crate::native::{self, Target};
use crate::options::Options;

impl Dialer {
    /// Connect, blocking until the first attempt resolves.
    ///
    /// Fails with `ConnectionRefused` when nothing listens at the address.
    pub fn start(self) -> Result<()> {
        native::engine()?
            .dialer_start(self.raw(), true)
            .raise("Dialer::start")?;
        debug!(dialer = self.raw(), "dialer started");
        Ok(())
    }

    /// Begin connecting in the background, retrying until a peer appears.
    pub fn start_nonblocking(self) -> Result<()> {
        native::engine()?
            .dialer_start(self.raw(), false)
            .raise("Dialer::start_nonblocking")?;
        debug!(dialer = self.raw(), "dialer started in background");
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        native::engine()?
            .dialer_close(self.raw())
            .raise("Dialer::close")?;
        debug!(dialer = self.raw(), "dialer closed");
        Ok(())
    }

    /// The identifier, if the dialer is still open.
    pub fn id(self) -> Result<u32> {
        native::engine()?.dialer_id(self.raw()).raise("Dialer::id")
    }
}

impl Options for Dialer {
    fn option_target(&self) -> Target {
        self.target()
    }
}

impl Listener {
    /// Bind the address and start accepting.
    pub fn start(self) -> Result<()> {
        native::engine()?
            .listener_start(self.raw())
            .raise("Listener::start")?;
        debug!(listener = self.raw(), "listener started");
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        native::engine()?
            .listener_close(self.raw())
            .raise("Listener::close")?;
        debug!(listener = self.raw(), "listener closed");
        Ok(())
    }

    pub fn id(self) -> Result<u32> {
        native::engine()?
            .listener_id(self.raw())
            .raise("Listener::id")
    }
}

impl Options for Listener {
    fn option_target(&self) -> Target {
        self.target()
    }
}
