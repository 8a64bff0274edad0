//! Framing: fixed 8-byte header (kind + total size, native byte order) followed by the body.
//!
//! The body is a LIFO byte stack. Values go in with [`Message::push`] and come back out
//! with [`Message::pop`] in reverse order. Only fixed-layout types are accepted; the
//! `zerocopy` bounds reject anything with padding, pointers or invalid bit patterns at
//! compile time.

use std::fmt;
use std::mem::size_of;
use std::sync::Arc;

use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::connection::Connection;

/// Bytes in the fixed header: 4 for the kind, 4 for the total size.
pub const HEADER_SIZE: usize = 8;

/// Largest frame accepted from a peer unless configured otherwise.
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024; // 16 MiB

/// Application message catalog. The framework only converts kinds at the wire boundary.
pub trait MessageKind: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    fn to_raw(self) -> u32;

    /// `None` for a value outside the catalog.
    fn from_raw(raw: u32) -> Option<Self>;
}

/// Declare a `#[repr(u32)]` message catalog and its [`MessageKind`] impl.
///
/// ```
/// osrs_net::message_kinds! {
///     pub enum ChatMsg {
///         Hello = 0,
///         Say = 1,
///     }
/// }
/// use osrs_net::MessageKind;
/// assert_eq!(ChatMsg::from_raw(1), Some(ChatMsg::Say));
/// assert_eq!(ChatMsg::Hello.to_raw(), 0);
/// ```
#[macro_export]
macro_rules! message_kinds {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        $vis enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl $crate::MessageKind for $name {
            fn to_raw(self) -> u32 {
                self as u32
            }

            fn from_raw(raw: u32) -> Option<Self> {
                $(
                    if raw == $name::$variant as u32 {
                        return Some($name::$variant);
                    }
                )+
                None
            }
        }
    };
}

/// Header sent ahead of every body. `size` counts the header itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader<K> {
    pub kind: K,
    pub size: u32,
}

impl<K: MessageKind> MessageHeader<K> {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.kind.to_raw().to_ne_bytes());
        out[4..].copy_from_slice(&self.size.to_ne_bytes());
        out
    }

    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Self, FrameError> {
        let raw = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let size = u32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let kind = K::from_raw(raw).ok_or(FrameError::UnknownKind(raw))?;
        Ok(Self { kind, size })
    }

    /// Body bytes announced by this header. A size at or below the header size means none.
    pub fn body_len(&self) -> usize {
        (self.size as usize).saturating_sub(HEADER_SIZE)
    }

    /// Reject frames larger than `max` before anything is allocated for them.
    pub fn check_size(&self, max: u32) -> Result<(), FrameError> {
        if self.size > max {
            return Err(FrameError::TooLarge {
                size: self.size,
                max,
            });
        }
        Ok(())
    }
}

/// A framed message: header plus a body used as a byte stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<K> {
    header: MessageHeader<K>,
    body: Vec<u8>,
}

impl<K: MessageKind> Message<K> {
    pub fn new(kind: K) -> Self {
        Self {
            header: MessageHeader {
                kind,
                size: HEADER_SIZE as u32,
            },
            body: Vec::new(),
        }
    }

    /// Reassemble a message read off the wire. The header size is recomputed from the body.
    pub(crate) fn from_parts(kind: K, body: Vec<u8>) -> Self {
        let mut msg = Self {
            header: MessageHeader { kind, size: 0 },
            body,
        };
        msg.sync_size();
        msg
    }

    pub fn header(&self) -> &MessageHeader<K> {
        &self.header
    }

    pub fn kind(&self) -> K {
        self.header.kind
    }

    pub fn set_kind(&mut self, kind: K) {
        self.header.kind = kind;
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Header plus body length. Always equal to `header().size`.
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    /// Append the raw bytes of `value` to the end of the body.
    pub fn push<T: IntoBytes + Immutable + ?Sized>(&mut self, value: &T) -> &mut Self {
        self.body.extend_from_slice(value.as_bytes());
        self.sync_size();
        self
    }

    /// Remove the last `size_of::<T>()` body bytes and read them back as a `T`.
    ///
    /// Values must be popped in the reverse order they were pushed; no type tag is stored.
    /// On underflow the message is left untouched.
    pub fn pop<T: FromBytes>(&mut self) -> Result<T, MessageError> {
        let needed = size_of::<T>();
        let available = self.body.len();
        if needed > available {
            return Err(MessageError::Underflow { needed, available });
        }
        let at = available - needed;
        let value = T::read_from_bytes(&self.body[at..])
            .map_err(|_| MessageError::Underflow { needed, available })?;
        self.body.truncate(at);
        self.sync_size();
        Ok(value)
    }

    fn sync_size(&mut self) {
        self.header.size = self.size() as u32;
    }
}

impl<K: MessageKind> fmt::Display for Message<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID:{} Size:{}", self.header.kind.to_raw(), self.header.size)
    }
}

/// An inbound message tagged with the connection it came from.
/// `remote` is `None` on a client, which only ever has one counterpart.
pub struct OwnedMessage<K: MessageKind> {
    pub remote: Option<Arc<Connection<K>>>,
    pub msg: Message<K>,
}

impl<K: MessageKind> fmt::Display for OwnedMessage<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.msg.fmt(f)
    }
}

impl<K: MessageKind> fmt::Debug for OwnedMessage<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedMessage")
            .field("remote", &self.remote.as_ref().map(|c| c.id()))
            .field("msg", &self.msg)
            .finish()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("body underflow: need {needed} bytes, {available} available")]
    Underflow { needed: usize, available: usize },
}

/// A header that cannot be accepted from the wire.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown message kind {0}")]
    UnknownKind(u32),
    #[error("frame of {size} bytes exceeds limit of {max}")]
    TooLarge { size: u32, max: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

    crate::message_kinds! {
        enum TestMsg {
            Ping = 0,
            Data = 7,
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
    #[repr(C)]
    struct Point {
        x: f32,
        y: f32,
        tag: u32,
    }

    #[test]
    fn new_message_is_header_only() {
        let msg = Message::new(TestMsg::Ping);
        assert_eq!(msg.size(), HEADER_SIZE);
        assert_eq!(msg.header().size as usize, HEADER_SIZE);
        assert!(msg.body().is_empty());
    }

    #[test]
    fn push_pop_reverse_order() {
        let point = Point {
            x: 1.5,
            y: -2.0,
            tag: 9,
        };
        let mut msg = Message::new(TestMsg::Data);
        msg.push(&42u32).push(&point).push(&7u8).push(&-3i64);
        assert_eq!(msg.size(), HEADER_SIZE + 4 + 12 + 1 + 8);
        assert_eq!(msg.header().size as usize, msg.size());

        assert_eq!(msg.pop::<i64>().unwrap(), -3);
        assert_eq!(msg.pop::<u8>().unwrap(), 7);
        assert_eq!(msg.pop::<Point>().unwrap(), point);
        assert_eq!(msg.pop::<u32>().unwrap(), 42);
        assert_eq!(msg.size(), HEADER_SIZE);
        assert_eq!(msg.header().size as usize, HEADER_SIZE);
    }

    #[test]
    fn size_tracks_every_mutation() {
        let mut msg = Message::new(TestMsg::Data);
        for i in 0..10u16 {
            msg.push(&i);
            assert_eq!(msg.header().size as usize, HEADER_SIZE + msg.body().len());
        }
        while msg.pop::<u16>().is_ok() {
            assert_eq!(msg.header().size as usize, HEADER_SIZE + msg.body().len());
        }
        assert_eq!(msg.size(), HEADER_SIZE);
    }

    #[test]
    fn pop_underflow_leaves_message_intact() {
        let mut msg = Message::new(TestMsg::Data);
        msg.push(&1u16);
        assert_eq!(
            msg.pop::<u64>(),
            Err(MessageError::Underflow {
                needed: 8,
                available: 2
            })
        );
        assert_eq!(msg.size(), HEADER_SIZE + 2);
        assert_eq!(msg.pop::<u16>().unwrap(), 1);
    }

    #[test]
    fn push_byte_slice() {
        let mut msg = Message::new(TestMsg::Data);
        msg.push(&b"abc"[..]);
        assert_eq!(msg.body(), b"abc");
        assert_eq!(msg.pop::<[u8; 3]>().unwrap(), *b"abc");
    }

    #[test]
    fn header_encode_decode() {
        let mut msg = Message::new(TestMsg::Data);
        msg.push(&0xABCDu32);
        let bytes = msg.header().encode();
        assert_eq!(&bytes[..4], &7u32.to_ne_bytes());
        assert_eq!(&bytes[4..], &12u32.to_ne_bytes());
        let header = MessageHeader::<TestMsg>::decode(&bytes).unwrap();
        assert_eq!(header, *msg.header());
        assert_eq!(header.body_len(), 4);
    }

    #[test]
    fn header_decode_unknown_kind() {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[..4].copy_from_slice(&99u32.to_ne_bytes());
        assert_eq!(
            MessageHeader::<TestMsg>::decode(&bytes),
            Err(FrameError::UnknownKind(99))
        );
    }

    #[test]
    fn short_size_means_no_body() {
        let header = MessageHeader {
            kind: TestMsg::Ping,
            size: 3,
        };
        assert_eq!(header.body_len(), 0);
    }

    #[test]
    fn oversized_header_rejected() {
        let header = MessageHeader {
            kind: TestMsg::Data,
            size: DEFAULT_MAX_MESSAGE_SIZE + 1,
        };
        assert!(matches!(
            header.check_size(DEFAULT_MAX_MESSAGE_SIZE),
            Err(FrameError::TooLarge { .. })
        ));
        assert!(header.check_size(u32::MAX).is_ok());
    }

    #[test]
    fn from_parts_recomputes_size() {
        let msg = Message::from_parts(TestMsg::Data, vec![1, 2, 3]);
        assert_eq!(msg.header().size, 11);
        assert_eq!(msg.to_string(), "ID:7 Size:11");
    }
}
