//! Owned two-segment message.
//!
//! A [`Message`] carries a header and a body, each independently growable at
//! either end. Numeric helpers encode and decode big-endian integers, the
//! engine's wire order. Size-changing calls reserve before they touch the
//! segment: on failure they report `NoMemory` and the message is unchanged.
//!
//! # Examples
//!
//! ```
//! use carapace_core::message::Message;
//!
//! let mut msg = Message::with_size(64).unwrap();
//! msg.append_body_u32(0xdead_beef).unwrap();
//! assert_eq!(msg.header().len(), 0);
//! assert_eq!(msg.body().len(), 68);
//! assert_eq!(msg.chop_body_u32().unwrap(), 0xdead_beef);
//! ```

use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use smallvec::SmallVec;

use crate::buffer::Chunk;
use crate::error::{Error, Result, Status};
use crate::handle::Pipe;
use crate::options::OptionName;

/// An owned message buffer.
#[derive(Clone, Default)]
pub struct Message {
    header: Chunk,
    body: Chunk,
    pipe: Option<Pipe>,
    expiry: Option<Instant>,
    options: SmallVec<[(OptionName, Bytes); 2]>,
}

fn no_memory(context: &'static str) -> Error {
    Error::native(Status::NO_MEMORY, context)
}

fn too_short(context: &'static str) -> Error {
    Error::native(Status::INVALID, context)
}

macro_rules! segment {
    (
        $field:ident,
        append: $append:ident $(, $append_n:ident: $append_ty:ty)*;
        prepend: $prepend:ident $(, $prepend_n:ident: $prepend_ty:ty)*;
        trim: $trim:ident $(, $trim_n:ident: $trim_ty:ty)*;
        chop: $chop:ident $(, $chop_n:ident: $chop_ty:ty)*;
        clear: $clear:ident;
    ) => {
        #[doc = concat!("Append bytes to the ", stringify!($field), ".")]
        pub fn $append(&mut self, data: &[u8]) -> Result<()> {
            self.$field
                .append(data)
                .map_err(|_| no_memory(concat!("Message::", stringify!($append))))
        }

        $(
            #[doc = concat!("Append a big-endian `", stringify!($append_ty), "` to the ", stringify!($field), ".")]
            pub fn $append_n(&mut self, value: $append_ty) -> Result<()> {
                self.$append(&value.to_be_bytes())
            }
        )*

        #[doc = concat!("Insert bytes at the front of the ", stringify!($field), ".")]
        pub fn $prepend(&mut self, data: &[u8]) -> Result<()> {
            self.$field
                .prepend(data)
                .map_err(|_| no_memory(concat!("Message::", stringify!($prepend))))
        }

        $(
            pub fn $prepend_n(&mut self, value: $prepend_ty) -> Result<()> {
                self.$prepend(&value.to_be_bytes())
            }
        )*

        #[doc = concat!("Remove and return `n` bytes from the front of the ", stringify!($field), ".")]
        ///
        /// Fails with `InvalidArgument`, changing nothing, if fewer than `n`
        /// bytes are present.
        pub fn $trim(&mut self, n: usize) -> Result<Bytes> {
            self.$field
                .trim(n)
                .ok_or_else(|| too_short(concat!("Message::", stringify!($trim))))
        }

        $(
            pub fn $trim_n(&mut self) -> Result<$trim_ty> {
                const WIDTH: usize = std::mem::size_of::<$trim_ty>();
                let bytes = self
                    .$field
                    .front::<WIDTH>()
                    .ok_or_else(|| too_short(concat!("Message::", stringify!($trim_n))))?;
                self.$field.trim(WIDTH);
                Ok(<$trim_ty>::from_be_bytes(bytes))
            }
        )*

        #[doc = concat!("Remove and return `n` bytes from the back of the ", stringify!($field), ".")]
        pub fn $chop(&mut self, n: usize) -> Result<Bytes> {
            self.$field
                .chop(n)
                .ok_or_else(|| too_short(concat!("Message::", stringify!($chop))))
        }

        $(
            pub fn $chop_n(&mut self) -> Result<$chop_ty> {
                const WIDTH: usize = std::mem::size_of::<$chop_ty>();
                let bytes = self
                    .$field
                    .back::<WIDTH>()
                    .ok_or_else(|| too_short(concat!("Message::", stringify!($chop_n))))?;
                self.$field.chop(WIDTH);
                Ok(<$chop_ty>::from_be_bytes(bytes))
            }
        )*

        pub fn $clear(&mut self) {
            self.$field.clear();
        }
    };
}

impl Message {
    /// An empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A message whose body is `size` zero bytes.
    pub fn with_size(size: usize) -> Result<Self> {
        let body = Chunk::with_len(size).map_err(|_| no_memory("Message::with_size"))?;
        Ok(Self {
            body,
            ..Self::default()
        })
    }

    /// Header plus body length.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.header.len() + self.body.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.body.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn header(&self) -> &[u8] {
        self.header.as_slice()
    }

    #[inline]
    pub fn header_mut(&mut self) -> &mut [u8] {
        self.header.as_mut_slice()
    }

    #[inline]
    #[must_use]
    pub fn body(&self) -> &[u8] {
        self.body.as_slice()
    }

    #[inline]
    pub fn body_mut(&mut self) -> &mut [u8] {
        self.body.as_mut_slice()
    }

    /// Resize the body, zero-filling on growth and dropping from the back on
    /// shrink.
    pub fn resize(&mut self, size: usize) -> Result<()> {
        self.body
            .resize(size)
            .map_err(|_| no_memory("Message::resize"))
    }

    segment! {
        header,
        append: append_header, append_header_u16: u16, append_header_u32: u32, append_header_u64: u64;
        prepend: prepend_header, prepend_header_u16: u16, prepend_header_u32: u32, prepend_header_u64: u64;
        trim: trim_header, trim_header_u16: u16, trim_header_u32: u32, trim_header_u64: u64;
        chop: chop_header, chop_header_u16: u16, chop_header_u32: u32, chop_header_u64: u64;
        clear: clear_header;
    }

    segment! {
        body,
        append: append_body, append_body_u16: u16, append_body_u32: u32, append_body_u64: u64;
        prepend: prepend_body, prepend_body_u16: u16, prepend_body_u32: u32, prepend_body_u64: u64;
        trim: trim_body, trim_body_u16: u16, trim_body_u32: u32, trim_body_u64: u64;
        chop: chop_body, chop_body_u16: u16, chop_body_u32: u32, chop_body_u64: u64;
        clear: clear_body;
    }

    /// Clear header and body.
    pub fn clear(&mut self) {
        self.header.clear();
        self.body.clear();
    }

    /// Deep, independent copy. Unlike `clone`, reports allocation failure.
    pub fn duplicate(&self) -> Result<Self> {
        let header = self
            .header
            .try_clone()
            .map_err(|_| no_memory("Message::duplicate"))?;
        let body = self
            .body
            .try_clone()
            .map_err(|_| no_memory("Message::duplicate"))?;
        Ok(Self {
            header,
            body,
            pipe: self.pipe,
            expiry: self.expiry,
            options: self.options.clone(),
        })
    }

    /// Pipe the message arrived on, or is directed to.
    #[must_use]
    pub const fn pipe(&self) -> Option<Pipe> {
        self.pipe
    }

    pub fn set_pipe(&mut self, pipe: Option<Pipe>) {
        self.pipe = pipe;
    }

    #[must_use]
    pub const fn expiry(&self) -> Option<Instant> {
        self.expiry
    }

    /// Drop the message undelivered if it is still queued at `expiry`.
    pub fn set_expiry(&mut self, expiry: Option<Instant>) {
        self.expiry = expiry;
    }

    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expiry.is_some_and(|at| at <= now)
    }

    /// Raw value of an option the engine attached to this message.
    ///
    /// Fails with `NotFound` when the option is not present.
    pub fn get_option(&self, name: OptionName) -> Result<Bytes> {
        self.options
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| Error::native(Status::NOT_FOUND, "Message::get_option"))
    }

    /// Attach an option value, replacing any previous value.
    pub fn set_option(&mut self, name: OptionName, value: impl Into<Bytes>) {
        let value = value.into();
        match self.options.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.options.push((name, value)),
        }
    }

    /// Header and body as one contiguous buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(self.header());
        out.extend_from_slice(self.body());
        Bytes::from(out)
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.header() == other.header() && self.body() == other.body()
    }
}

impl Eq for Message {}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("header_len", &self.header.len())
            .field("body_len", &self.body.len())
            .field("pipe", &self.pipe)
            .finish_non_exhaustive()
    }
}

impl From<&[u8]> for Message {
    fn from(body: &[u8]) -> Self {
        Self::from(body.to_vec())
    }
}

impl From<Vec<u8>> for Message {
    fn from(body: Vec<u8>) -> Self {
        Self {
            body: Chunk::from_vec(body),
            ..Self::default()
        }
    }
}

impl From<Bytes> for Message {
    fn from(body: Bytes) -> Self {
        Self::from(Vec::from(body))
    }
}

impl From<&str> for Message {
    fn from(body: &str) -> Self {
        Self::from(body.as_bytes())
    }
}
