//! Frame codec: parsing received byte streams into [`Frame`]s and
//! serializing outgoing frames.
//!
//! The decoder is a two-stage state machine driven by
//! [`tokio_util::codec`]: it first consumes the fixed header bytes, then
//! the extended payload length and masking key, then the payload.
//! Insufficient buffered data at any stage yields `Ok(None)` and the
//! framed transport resumes decoding once more bytes arrive, so a partial
//! frame is never an error.
//!
//! Two deliberate permissivenesses, matching the profile this server
//! speaks rather than strict RFC enforcement:
//!
//! - Nonzero RSV bits are logged and tolerated. No extension is ever
//!   negotiated, so the bits carry no meaning here.
//! - Frames with reserved opcodes are parsed to completion using the
//!   regular length rules, logged, and dropped; decoding continues with
//!   the next frame on the stream.

use bytes::{Buf, BytesMut};
use tokio_util::codec;

use crate::{
    frame::{Frame, MAX_HEAD_SIZE},
    OpCode, WebSocketError,
};

/// Represents the reading state of a WebSocket frame.
enum ReadState {
    /// Currently reading the extended header of the frame.
    Header(Header),
    /// Currently reading the payload of the frame.
    Payload(HeaderAndMask),
}

/// Represents the initial header fields of a WebSocket frame.
struct Header {
    /// Indicates if this is the final fragment in a message.
    fin: bool,
    /// Indicates if the frame is masked.
    masked: bool,
    /// The operation code of the frame. `None` for a reserved opcode:
    /// the frame is still consumed, then dropped.
    opcode: Option<OpCode>,
    /// Additional length field size of the frame, if applicable.
    extra: usize,
    /// Encoded length of the payload.
    length_code: u8,
    /// Size of the remaining header in bytes (extended length + mask key).
    header_size: usize,
}

/// Contains header and mask data after decoding the bytes before the payload.
struct HeaderAndMask {
    /// Decoded header fields.
    header: Header,
    /// Optional masking key for decoding the payload.
    mask: Option<[u8; 4]>,
    /// Length of the payload, in bytes.
    payload_len: usize,
}

/// A combined codec that provides both encoding and decoding functionality for WebSocket frames.
///
/// `Codec` combines a [`Decoder`] for parsing incoming frames and an
/// [`Encoder`] for serializing outgoing frames, for use with Tokio's
/// framed streams.
pub struct Codec {
    decoder: Decoder,
    encoder: Encoder,
}

impl Codec {
    /// Creates a codec limiting received payloads to `max_payload_read` bytes.
    pub fn new(max_payload_read: usize) -> Self {
        Self {
            decoder: Decoder::new(max_payload_read),
            encoder: Encoder,
        }
    }
}

impl From<(Decoder, Encoder)> for Codec {
    fn from((decoder, encoder): (Decoder, Encoder)) -> Self {
        Self { decoder, encoder }
    }
}

impl codec::Decoder for Codec {
    type Item = <Decoder as codec::Decoder>::Item;
    type Error = <Decoder as codec::Decoder>::Error;

    #[inline]
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode(src)
    }
}

impl codec::Encoder<Frame> for Codec {
    type Error = <Encoder as codec::Encoder<Frame>>::Error;

    #[inline]
    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encoder.encode(item, dst)
    }
}

/// A decoder for WebSocket frames, handling state transitions.
///
/// `Decoder` manages frame parsing, including tracking the maximum allowed
/// payload size and the current state. The state changes as each part of
/// the frame (header, extended header, payload) is processed.
pub struct Decoder {
    /// Current reading state (header or payload).
    state: Option<ReadState>,
    /// Maximum allowed size for the frame payload.
    max_payload_size: usize,
}

impl Decoder {
    /// Creates a new `Decoder` with a specified maximum payload size.
    ///
    /// # Parameters
    /// - `max_payload_size`: The maximum allowed payload size, in bytes.
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            state: None,
            max_payload_size,
        }
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = WebSocketError;

    /// Decodes WebSocket frames from a `BytesMut` buffer, managing header and payload parsing.
    ///
    /// The `decode` function parses the header and payload in stages,
    /// maintaining state across calls. Masked payloads are unmasked in
    /// place and the frame records that the wire carried a key (see
    /// [`Frame::was_masked`]). Unmasked frames are decoded as-is: client
    /// frames are normatively masked, so such input is anomalous but not
    /// an error.
    ///
    /// # Parameters
    /// - `src`: A mutable reference to a `BytesMut` buffer containing raw frame data.
    ///
    /// # Returns
    /// - `Ok(Some(Frame))`: Returns a fully decoded `Frame` when successful.
    /// - `Ok(None)`: Indicates more data is needed to complete the frame.
    /// - `Err(WebSocketError)`: If the payload exceeds the configured size limit.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state.take() {
                None => {
                    // Check if enough data is available for the basic header
                    if src.remaining() < 2 {
                        return Ok(None);
                    }

                    // Parse initial header bytes
                    let fin = src[0] & 0b10000000 != 0;

                    // Reserved bits carry no meaning without extensions;
                    // tolerate them but leave a trace.
                    if src[0] & 0b01110000 != 0 {
                        log::warn!("frame with nonzero RSV bits (byte0={:#04x})", src[0]);
                    }

                    let opcode_bits = src[0] & 0b00001111;
                    let opcode = match OpCode::try_from(opcode_bits) {
                        Ok(opcode) => Some(opcode),
                        Err(_) => {
                            log::warn!("dropping frame with reserved opcode {opcode_bits:#x}");
                            None
                        }
                    };

                    let masked = src[1] & 0b10000000 != 0;
                    let length_code = src[1] & 0x7F;

                    // Determine the extended length field size
                    let extra = match length_code {
                        126 => 2,
                        127 => 8,
                        _ => 0,
                    };
                    let header_size = extra + masked as usize * 4;
                    src.advance(2);

                    self.state = Some(ReadState::Header(Header {
                        fin,
                        masked,
                        opcode,
                        length_code,
                        extra,
                        header_size,
                    }));
                }
                Some(ReadState::Header(header)) => {
                    // Check if enough data is available for the full header
                    if src.remaining() < header.header_size {
                        self.state = Some(ReadState::Header(header));
                        return Ok(None);
                    }

                    // Parse payload length based on `extra` field size
                    let payload_len: usize = match header.extra {
                        0 => usize::from(header.length_code),
                        2 => src.get_u16() as usize,
                        #[cfg(target_pointer_width = "64")]
                        8 => src.get_u64() as usize,
                        #[cfg(any(target_pointer_width = "16", target_pointer_width = "32"))]
                        8 => match usize::try_from(src.get_u64()) {
                            Ok(length) => length,
                            Err(_) => return Err(WebSocketError::FrameTooLarge),
                        },
                        _ => unreachable!(),
                    };

                    // Parse the optional mask key if `masked` is true
                    let mask = if header.masked {
                        Some(src.get_u32().to_be_bytes())
                    } else {
                        None
                    };

                    if payload_len >= self.max_payload_size {
                        return Err(WebSocketError::FrameTooLarge);
                    }

                    self.state = Some(ReadState::Payload(HeaderAndMask {
                        header,
                        mask,
                        payload_len,
                    }));
                }
                Some(ReadState::Payload(header_and_mask)) => {
                    // Check if enough data is available for the full payload
                    if src.remaining() < header_and_mask.payload_len {
                        self.state = Some(ReadState::Payload(header_and_mask));
                        return Ok(None);
                    }

                    let header = header_and_mask.header;
                    let mask = header_and_mask.mask;
                    let payload_len = header_and_mask.payload_len;

                    let mut payload = src.split_to(payload_len);
                    if let Some(mask) = mask {
                        crate::mask::apply_mask(&mut payload, mask);
                    }

                    // Reserved opcode: the frame's bytes have been
                    // consumed, move on to the next frame.
                    let Some(opcode) = header.opcode else {
                        continue;
                    };

                    let mut frame = Frame::new(header.fin, opcode, None, payload);
                    frame.was_masked = header.masked;

                    break Ok(Some(frame));
                }
            }
        }
    }
}

/// WebSocket frame encoder for serializing `Frame` instances into a buffer.
///
/// `Encoder` formats a `Frame` header and payload into a `BytesMut`
/// buffer, preparing it for transmission. Frames without a masking key —
/// everything a server originates — are written unmasked. A frame carrying
/// a key (client-style) has its payload masked during encoding and the key
/// emitted in the header.
pub struct Encoder;

impl codec::Encoder<Frame> for Encoder {
    type Error = WebSocketError;

    /// Encodes a `Frame` into the provided buffer.
    ///
    /// # Parameters
    /// - `frame`: The `Frame` to be encoded.
    /// - `dst`: A mutable reference to a `BytesMut` buffer where the encoded frame is written.
    fn encode(&mut self, mut frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if frame.is_masked() {
            frame.mask();
        }

        let mut header = [0; MAX_HEAD_SIZE];
        let size = frame.fmt_head(&mut header[..]);

        dst.extend_from_slice(&header[..size]);
        dst.extend_from_slice(&frame.payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::codec::{Decoder as _, Encoder as _};

    const MASK_KEY: [u8; 4] = [0x6D, 0xB6, 0xB2, 0x80];

    fn encode_masked(opcode: OpCode, payload: &[u8]) -> BytesMut {
        let frame = Frame::new(true, opcode, Some(MASK_KEY), payload);
        let mut buf = BytesMut::new();
        Encoder.encode(frame, &mut buf).expect("encode");
        buf
    }

    #[test]
    fn test_roundtrip_boundary_lengths() {
        // Payload lengths straddling each length-encoding boundary.
        for len in [0usize, 1, 125, 126, 65535, 65536] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let mut buf = encode_masked(OpCode::Binary, &payload);

            let mut decoder = Decoder::new(usize::MAX);
            let frame = decoder
                .decode(&mut buf)
                .expect("decode")
                .expect("complete frame");

            assert!(frame.fin);
            assert_eq!(frame.opcode, OpCode::Binary);
            assert!(frame.was_masked());
            assert_eq!(&frame.payload[..], &payload[..], "len={len}");
            assert!(buf.is_empty(), "decode must consume the whole frame");
        }
    }

    #[test]
    fn test_masked_header_sizes() {
        // Header is 6 bytes up to 125, 8 bytes with a 16-bit extended
        // length, 14 bytes with a 64-bit extended length.
        for (len, header) in [(125usize, 6usize), (126, 8), (65535, 8), (65536, 14)] {
            let payload = vec![0xAB; len];
            let buf = encode_masked(OpCode::Binary, &payload);
            assert_eq!(buf.len(), header + len, "len={len}");
        }
    }

    #[test]
    fn test_length_byte_values() {
        let buf = encode_masked(OpCode::Text, &[0x61; 125]);
        assert_eq!(buf[1] & 0x7F, 125);

        let buf = encode_masked(OpCode::Text, &[0x61; 126]);
        assert_eq!(buf[1] & 0x7F, 126);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 126);

        let buf = encode_masked(OpCode::Text, &[0x61; 65536]);
        assert_eq!(buf[1] & 0x7F, 127);
        let mut len8 = [0u8; 8];
        len8.copy_from_slice(&buf[2..10]);
        assert_eq!(u64::from_be_bytes(len8), 65536);
    }

    #[test]
    fn test_incomplete_input_returns_none() {
        let full = encode_masked(OpCode::Text, b"incomplete frame payload");

        // Every strict prefix must decode to None without consuming the
        // frame's payload bytes or panicking.
        for cut in 0..full.len() {
            let mut buf = BytesMut::from(&full[..cut]);
            let mut decoder = Decoder::new(usize::MAX);
            let res = decoder.decode(&mut buf).expect("no error on prefix");
            assert!(res.is_none(), "prefix of {cut} bytes yielded a frame");
        }
    }

    #[test]
    fn test_incomplete_then_complete_across_calls() {
        let full = encode_masked(OpCode::Text, b"split across reads");
        let mut decoder = Decoder::new(usize::MAX);

        let mut buf = BytesMut::from(&full[..5]);
        assert!(decoder.decode(&mut buf).expect("decode").is_none());

        buf.extend_from_slice(&full[5..]);
        let frame = decoder
            .decode(&mut buf)
            .expect("decode")
            .expect("complete frame");
        assert_eq!(&frame.payload[..], b"split across reads");
    }

    #[test]
    fn test_unmasked_frame_is_flagged() {
        let frame = Frame::new(true, OpCode::Text, None, &b"raw"[..]);
        let mut buf = BytesMut::new();
        Encoder.encode(frame, &mut buf).expect("encode");

        let mut decoder = Decoder::new(usize::MAX);
        let frame = decoder
            .decode(&mut buf)
            .expect("decode")
            .expect("complete frame");

        assert!(!frame.was_masked());
        assert_eq!(&frame.payload[..], b"raw");
    }

    #[test]
    fn test_reserved_opcode_frame_is_skipped() {
        // A frame with opcode 0x3 followed by a ping: the decoder must
        // swallow the first and surface the second.
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x83, 0x02, 0xDE, 0xAD]); // fin, opcode 3, 2-byte payload
        buf.extend_from_slice(&encode_masked(OpCode::Ping, b"hb"));

        let mut decoder = Decoder::new(usize::MAX);
        let frame = decoder
            .decode(&mut buf)
            .expect("decode")
            .expect("complete frame");

        assert_eq!(frame.opcode, OpCode::Ping);
        assert_eq!(&frame.payload[..], b"hb");
    }

    #[test]
    fn test_rsv_bits_are_tolerated() {
        // fin + RSV1 set; no extension negotiated, still decoded.
        let mut buf = BytesMut::from(&[0xC1, 0x02, 0x68, 0x69][..]);

        let mut decoder = Decoder::new(usize::MAX);
        let frame = decoder
            .decode(&mut buf)
            .expect("decode")
            .expect("complete frame");

        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(&frame.payload[..], b"hi");
    }

    #[test]
    fn test_payload_over_limit_is_rejected() {
        let mut buf = encode_masked(OpCode::Binary, &[0u8; 64]);
        let mut decoder = Decoder::new(64);
        let err = decoder.decode(&mut buf).expect_err("over limit");
        assert!(matches!(err, WebSocketError::FrameTooLarge));
    }

    #[test]
    fn test_non_final_frame_keeps_fin_clear() {
        let frame = Frame::new(false, OpCode::Text, Some(MASK_KEY), &b"frag"[..]);
        let mut buf = BytesMut::new();
        Encoder.encode(frame, &mut buf).expect("encode");

        let mut decoder = Decoder::new(usize::MAX);
        let frame = decoder
            .decode(&mut buf)
            .expect("decode")
            .expect("complete frame");

        assert!(!frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(&frame.payload[..], b"frag");
    }
}
