//! # Carapace
//!
//! Safe handles, typed options and asynchronous operations over a
//! scalability-protocol messaging engine.
//!
//! ## Architecture
//!
//! - **`carapace-core`**: error mapping, option registry, handles, messages,
//!   AIO, and the `Engine` seam every native call goes through
//! - **`carapace-loopback`**: an in-process engine carrying `inproc://`
//!   connections (default `loopback` feature)
//! - **`carapace`**: public API surface (this crate)
//!
//! ## Quick Start
//!
//! ```rust
//! use carapace::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> carapace::Result<()> {
//! carapace::init()?;
//!
//! let server = Socket::open(Protocol::Rep0)?;
//! server.listen("inproc://quick-start")?;
//!
//! let client = Socket::open(Protocol::Req0)?;
//! client.set_duration(OptionName::SendTimeout, Duration::from_millis(500))?;
//! client.dial("inproc://quick-start")?;
//!
//! client.send(Message::from("hello")).map_err(|e| e.error)?;
//! let request = server.recv()?;
//! assert_eq!(request.body(), b"hello");
//! # Ok(())
//! # }
//! ```
//!
//! ## Asynchronous operations
//!
//! ```rust
//! use carapace::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> carapace::Result<()> {
//! carapace::init()?;
//!
//! let socket = Socket::open(Protocol::Pull0)?;
//! let aio = Aio::without_callback()?;
//! aio.set_timeout(Some(Duration::from_millis(50)));
//! socket.recv_aio(&aio)?;
//! aio.wait();
//! assert!(aio.result().unwrap_err().is_timeout());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use bytes::Bytes;

pub use carapace_core::error::{Error, ErrorKind, Result, Status};
pub use carapace_core::{
    address, aio, dialer, error, handle, message, native, options, pipe, protocol, socket,
};

#[cfg(feature = "loopback")]
pub use carapace_loopback::{config, Loopback};

/// Tracing setup for tests and benches.
pub mod dev_tracing;

/// Commonly used types.
pub mod prelude {
    pub use carapace_core::prelude::*;
}

/// Install the built-in loopback engine unless an engine is already installed,
/// and return the installed engine.
///
/// Safe to call any number of times from any thread.
#[cfg(feature = "loopback")]
pub fn init() -> Result<&'static dyn native::Engine> {
    if let Ok(engine) = native::engine() {
        return Ok(engine);
    }
    let engine = Loopback::new().map_err(|e| {
        Error::native(
            Status::system(e.raw_os_error().unwrap_or(0)),
            "carapace::init",
        )
    })?;
    match native::install(engine) {
        Ok(engine) => Ok(engine),
        // Another thread won the race.
        Err(_) => native::engine(),
    }
}
