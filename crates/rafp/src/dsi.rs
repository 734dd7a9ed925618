//! DSI framing: the fixed 16 byte header prefixed to every message.
//!
//! # Protocol
//! Data Stream Interface, the session transport AFP runs over TCP.

use bytes::{BufMut, BytesMut};
use enum_primitive::*;
use tokio_util::codec::length_delimited::{self, LengthDelimitedCodec};

use crate::{
    error::{Error, TransportError},
    utils::Result,
    wire::Reader,
};

/// Size of the fixed DSI header.
pub const HEADER_LEN: usize = 16;

/// Largest frame we will accept from the peer. The negotiated quantum is
/// always far below this; the cap only bounds a misbehaving server.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Flag byte: this frame is a request.
pub const FLAG_REQUEST: u8 = 0x00;
/// Flag byte: this frame is a reply.
pub const FLAG_REPLY: u8 = 0x01;

enum_from_primitive! {
    #[doc = "DSI command bytes"]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    pub enum DsiCommand {
        CloseSession = 1,
        Command      = 2,
        GetStatus    = 3,
        OpenSession  = 4,
        Tickle       = 5,
        Write        = 6,
        Attention    = 8,
    }
}

/// The fixed header. The dword at offset 4 is repurposed per direction: on
/// write requests it is the offset to the outgoing payload, on replies it is
/// the server's AFP result code.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DsiHeader {
    pub flags: u8,
    pub command: u8,
    pub request_id: u16,
    pub err_offset: u32,
    pub length: u32,
    pub reserved: u32,
}

impl DsiHeader {
    pub fn request(command: DsiCommand, request_id: u16, length: u32, data_offset: u32) -> Self {
        DsiHeader {
            flags: FLAG_REQUEST,
            command: command as u8,
            request_id,
            err_offset: data_offset,
            length,
            reserved: 0,
        }
    }

    pub fn is_reply(&self) -> bool {
        self.flags == FLAG_REPLY
    }

    /// The server's AFP result code, meaningful on replies only.
    pub fn error_code(&self) -> i32 {
        self.err_offset as i32
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags);
        buf.put_u8(self.command);
        buf.put_u16(self.request_id);
        buf.put_u32(self.err_offset);
        buf.put_u32(self.length);
        buf.put_u32(self.reserved);
    }

    /// Parse a header from the front of a frame. Anything shorter than the
    /// fixed header is rejected before a single field is read.
    pub fn decode(buf: &[u8]) -> Result<DsiHeader> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Transport(TransportError::Truncated {
                needed: HEADER_LEN,
                actual: buf.len(),
            }));
        }
        let mut r = Reader::new(buf);
        Ok(DsiHeader {
            flags: r.u8()?,
            command: r.u8()?,
            request_id: r.u16()?,
            err_offset: r.u32()?,
            length: r.u32()?,
            reserved: r.u32()?,
        })
    }
}

/// Frame codec for a DSI stream: the length field sits at offset 8 of the
/// header and counts payload bytes only, so frames are surfaced whole with
/// the header retained.
pub fn frame_codec() -> length_delimited::Builder {
    let mut builder = LengthDelimitedCodec::builder();
    builder
        .big_endian()
        .length_field_offset(8)
        .length_field_length(4)
        .length_adjustment(HEADER_LEN as isize)
        .num_skip(0)
        .max_frame_length(MAX_FRAME_LEN);
    builder
}

/// Build a full frame, header plus payload, ready to write to the stream.
pub fn build_frame(header: &DsiHeader, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    header.encode(&mut buf);
    buf.put_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encode_decode_round_trip() {
        let header = DsiHeader {
            flags: FLAG_REPLY,
            command: DsiCommand::Command as u8,
            request_id: 0xbeef,
            err_offset: (-5001_i32) as u32,
            length: 42,
            reserved: 0,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(DsiHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn error_code_is_signed() {
        let header = DsiHeader {
            flags: FLAG_REPLY,
            command: DsiCommand::Command as u8,
            request_id: 1,
            err_offset: (-5023_i32) as u32,
            length: 0,
            reserved: 0,
        };
        assert_eq!(header.error_code(), -5023);
    }

    #[test]
    fn short_frame_is_truncated_not_indexed() {
        let err = DsiHeader::decode(&[0x00, 0x02, 0x00]).unwrap_err();
        match err {
            Error::Transport(TransportError::Truncated { needed, actual }) => {
                assert_eq!(needed, HEADER_LEN);
                assert_eq!(actual, 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn frame_layout_matches_header_fields() {
        let header = DsiHeader::request(DsiCommand::Write, 7, 4, HEADER_LEN as u32 + 4);
        let frame = build_frame(&header, &[1, 2, 3, 4]);
        assert_eq!(frame.len(), HEADER_LEN + 4);
        // length field at offset 8
        assert_eq!(&frame[8..12], &[0, 0, 0, 4]);
        // data offset in the dword at offset 4
        assert_eq!(&frame[4..8], &[0, 0, 0, 20]);
    }
}
