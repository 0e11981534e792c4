//! # Frame
//!
//! The `frame` module implements WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2),
//! the atomic unit of data transmission on a connection. Each frame carries
//! both the payload and protocol-level metadata.
//!
//! ### Frame Binary Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```
//!
//! Frames come in two categories:
//!
//! - **Data Frames**: Carry application payload with:
//!   - `OpCode::Text`: UTF-8 text data
//!   - `OpCode::Binary`: Raw binary data
//!   - `OpCode::Continuation`: Continuation of a fragmented message
//! - **Control Frames**: Manage the connection with:
//!   - `OpCode::Close`: Initiates connection closure
//!   - `OpCode::Ping`: Checks connection liveness, requires a Pong response
//!   - `OpCode::Pong`: Responds to Ping frames
//!
//! Two representations are provided:
//!
//! - [`Frame`]: full mutable frame with all protocol metadata and masking
//!   capabilities, produced and consumed by the codec.
//! - [`FrameView`]: lightweight immutable view (`opcode` + payload) used at
//!   the API seams, e.g. on the push-dispatch path.
//!
//! Masking follows the asymmetry of the protocol: client-to-server frames
//! are masked, server-to-client frames are not. The server-side encode path
//! never attaches a masking key; the decode path unmasks and records
//! whether the wire frame was masked (see [`Frame::was_masked`]), which
//! decides whether a text payload is interpreted at all.

use bytes::{Bytes, BytesMut};

use crate::WebSocketError;

/// WebSocket operation code (OpCode) that determines the semantic meaning and handling of a frame.
///
/// # Data Frame OpCodes
/// - `Continuation`: Continues a fragmented message started by another data frame
/// - `Text`: Contains UTF-8 encoded text data
/// - `Binary`: Contains raw binary data
///
/// # Control Frame OpCodes
/// - `Close`: Initiates or confirms connection closure
/// - `Ping`: Tests connection liveness, requiring a `Pong` response
/// - `Pong`: Responds to a `Ping` frame
///
/// # Reserved OpCodes
/// The ranges 0x3-0x7 and 0xB-0xF are reserved for future protocol
/// extensions; [`OpCode::try_from`] rejects them with
/// [`WebSocketError::InvalidOpCode`].
///
/// The numeric values are defined in [RFC 6455, Section 11.8](https://datatracker.ietf.org/doc/html/rfc6455#section-11.8):
/// - Continuation = 0x0
/// - Text = 0x1
/// - Binary = 0x2
/// - Close = 0x8
/// - Ping = 0x9
/// - Pong = 0xA
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` if the `OpCode` represents a control frame (`Close`, `Ping`, or `Pong`).
    ///
    /// Control frames manage the connection state and have special constraints:
    /// - Cannot be fragmented (the FIN bit must be set)
    /// - Are processed immediately rather than queued with data frames
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    /// Attempts to convert a byte value into an `OpCode`, returning an error if the byte does not match any valid `OpCode`.
    ///
    /// Used during frame parsing to interpret the opcode field from the
    /// frame header. Reserved opcodes (0x3-0x7 and 0xB-0xF) result in a
    /// `WebSocketError::InvalidOpCode` error.
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WebSocketError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    /// Converts an `OpCode` into its corresponding byte representation.
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// A lightweight view of a WebSocket frame, containing just the opcode and payload.
///
/// This is the currency of the push path: the dispatcher hands
/// `FrameView`s to connection outbound queues, and delivered messages are
/// surfaced as views. Compared to [`Frame`] it is immutable and cheap to
/// clone.
#[derive(Debug, Clone)]
pub struct FrameView {
    /// The operation code indicating the type of frame (Text, Binary, Close, etc.)
    pub opcode: OpCode,
    /// The frame's payload data as immutable bytes, already unmasked if it was originally masked
    pub payload: Bytes,
}

impl FrameView {
    /// Creates a new immutable text frame view with the given payload.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Text,
            payload: payload.into(),
        }
    }

    /// Creates a new immutable binary frame view with the given payload.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Binary,
            payload: payload.into(),
        }
    }

    /// Creates a new immutable close frame view with a raw payload.
    ///
    /// The server replies to a peer's close with an empty payload:
    /// `FrameView::close([])`.
    pub fn close(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Close,
            payload: payload.into(),
        }
    }

    /// Creates a new immutable ping frame view with the given payload.
    /// Used to check connection liveness.
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Ping,
            payload: payload.into(),
        }
    }

    /// Creates a new immutable pong frame view with the given payload.
    /// Used to respond to ping messages.
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Pong,
            payload: payload.into(),
        }
    }

    /// Converts the frame payload to a string slice, expecting valid UTF-8.
    ///
    /// # Panics
    /// Panics if the payload is not valid UTF-8. Use this method only when
    /// you are certain the payload contains valid UTF-8 text, such as with
    /// frames that have `OpCode::Text`.
    #[inline]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.payload).expect("utf8")
    }

    /// Interprets the frame payload as UTF-8 text.
    ///
    /// # Errors
    /// Returns [`WebSocketError::InvalidUTF8`] if the payload is not
    /// valid UTF-8.
    #[inline]
    pub fn to_text(&self) -> crate::Result<&str> {
        std::str::from_utf8(&self.payload).map_err(|_| WebSocketError::InvalidUTF8)
    }
}

/// Converts a `FrameView` into a tuple of `(OpCode, Bytes)`.
impl From<FrameView> for (OpCode, Bytes) {
    fn from(val: FrameView) -> Self {
        (val.opcode, val.payload)
    }
}

/// Converts a tuple of `(OpCode, Bytes)` to a `FrameView`.
impl From<(OpCode, Bytes)> for FrameView {
    fn from((opcode, payload): (OpCode, Bytes)) -> Self {
        Self { opcode, payload }
    }
}

/// Converts a full `Frame` into a `FrameView` by extracting just the
/// opcode and freezing the payload into immutable bytes.
impl From<Frame> for FrameView {
    fn from(value: Frame) -> Self {
        Self {
            opcode: value.opcode,
            payload: value.payload.freeze(),
        }
    }
}

/// Maximum size of a serialized frame header: 2 fixed bytes, an 8-byte
/// extended length and a 4-byte masking key.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

/// Represents a WebSocket frame, encapsulating the data and metadata for message transmission.
///
/// A frame is the fundamental unit of communication, carrying both payload
/// data and metadata:
///
/// 1. **Data Frames**
///    - Text frames containing UTF-8 encoded text
///    - Binary frames containing raw data
///    - Continuation frames for message fragmentation
///
/// 2. **Control Frames**
///    - Close frames for connection termination
///    - Ping frames for connection liveness checks
///    - Pong frames for responding to pings
///
/// # Fields
/// - `fin`: Final fragment flag. When `true`, this frame completes a message.
/// - `opcode`: Defines the frame type and interpretation.
/// - `mask`: Optional 32-bit XOR masking key. Server-originated frames
///   never carry one; attach a key to produce client-style masked frames.
/// - `payload`: Frame payload data stored as dynamically sized bytes.
#[derive(Debug)]
pub struct Frame {
    /// Indicates if this is the final frame in a message.
    pub fin: bool,
    /// The opcode of the frame, defining its type.
    pub opcode: OpCode,
    /// Whether the frame carried a masking key on the wire when decoded.
    ///
    /// Client-to-server frames are normatively masked; an unmasked inbound
    /// frame is anomalous and its payload is never interpreted as text.
    pub(crate) was_masked: bool,
    /// The masking key for the frame, if any, used in client-to-server frames.
    mask: Option<[u8; 4]>,
    /// The payload of the frame, containing the actual data.
    pub payload: BytesMut,
}

/// Converts a `FrameView` into a final, unmasked `Frame`.
impl From<FrameView> for Frame {
    fn from(value: FrameView) -> Self {
        Frame::new(true, value.opcode, None, value.payload.as_ref())
    }
}

impl Frame {
    /// Creates a new WebSocket `Frame`.
    ///
    /// # Parameters
    /// - `fin`: Indicates if this frame is the final fragment in a message.
    /// - `opcode`: The operation code of the frame, defining its type.
    /// - `mask`: Optional 4-byte masking key, used in client-to-server frames.
    /// - `payload`: The frame payload data.
    pub fn new(
        fin: bool,
        opcode: OpCode,
        mask: Option<[u8; 4]>,
        payload: impl Into<BytesMut>,
    ) -> Self {
        Self {
            fin,
            opcode,
            mask,
            was_masked: false,
            payload: payload.into(),
        }
    }

    /// Whether the frame carried a masking key on the wire when it was
    /// decoded. Always `false` for locally constructed frames.
    #[inline(always)]
    pub fn was_masked(&self) -> bool {
        self.was_masked
    }

    /// Checks if the frame payload is valid UTF-8.
    #[inline(always)]
    pub fn is_utf8(&self) -> bool {
        std::str::from_utf8(&self.payload).is_ok()
    }

    /// Returns whether the frame currently has a masking key attached.
    #[inline(always)]
    pub(crate) fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Masks the payload using the attached masking key.
    ///
    /// If no masking key is set, a random key is generated and applied.
    pub(crate) fn mask(&mut self) {
        let payload = &mut self.payload;
        if let Some(mask) = self.mask {
            crate::mask::apply_mask(payload, mask);
        } else {
            let mask: [u8; 4] = rand::random();
            crate::mask::apply_mask(payload, mask);
            self.mask = Some(mask);
        }
    }

    /// Unmasks the payload.
    ///
    /// Reverses any masking applied to the payload and detaches the key.
    pub(crate) fn unmask(&mut self) {
        if let Some(mask) = self.mask.take() {
            let payload = &mut self.payload;
            crate::mask::apply_mask(payload, mask);
        }
    }

    /// Formats the frame header into the provided `head` buffer and returns the header size.
    ///
    /// The reserved bits are always zero: no extension is ever negotiated.
    ///
    /// # Parameters
    /// - `head`: The buffer to hold the formatted frame header.
    ///
    /// # Returns
    /// - The number of header bytes written (2, 4, 10, plus 4 if masked).
    ///
    /// # Panics
    /// Panics if `head` is not large enough to hold the formatted header;
    /// [`MAX_HEAD_SIZE`] always is.
    pub(crate) fn fmt_head(&self, head: &mut [u8]) -> usize {
        head[0] = (self.fin as u8) << 7 | u8::from(self.opcode);

        let len = self.payload.len();
        let size = if len < 126 {
            head[1] = len as u8;
            2
        } else if len < 65536 {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        };

        if let Some(mask) = self.mask {
            head[1] |= 0x80;
            head[size..size + 4].copy_from_slice(&mask);
            size + 4
        } else {
            size
        }
    }
}
