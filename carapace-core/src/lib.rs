//! Carapace Core
//!
//! Safe lifecycle layer over a native scalability-protocol messaging engine:
//! - Status codes and the error taxonomy (`error`)
//! - Option registry and typed accessors (`options`)
//! - Socket, context, pipe, dialer and listener handles (`handle`, `socket`,
//!   `dialer`, `pipe`)
//! - Two-segment messages (`message`)
//! - Asynchronous operations (`aio`)
//! - The engine seam every call goes through (`native`)
//!
//! An engine must be installed with [`native::install`] before any handle is
//! opened; the `carapace` crate does this for its built-in engine.

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::match_same_arms)]

pub mod address;
pub mod aio;
mod buffer;
pub mod dialer;
pub mod error;
pub mod handle;
pub mod message;
pub mod native;
pub mod options;
pub mod pipe;
pub mod protocol;
pub mod socket;

pub mod prelude {
    pub use crate::address::{Address, SockAddr};
    pub use crate::aio::{Aio, AioTarget, Completion, FreeError};
    pub use crate::error::{Error, ErrorKind, Result, Status};
    pub use crate::handle::{Context, Dialer, Listener, Pipe, Socket};
    pub use crate::message::Message;
    pub use crate::options::{OptionName, Options};
    pub use crate::pipe::PipeEvent;
    pub use crate::protocol::Protocol;
    pub use crate::socket::{SendError, SendOutcome};
}
