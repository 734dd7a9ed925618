//! Checked binary readers and writers for AFP/DSI wire structures.
//!
//! Every multi-byte field on the wire is big-endian. `Writer` builds request
//! payloads with explicit length checks on the variable-width fields;
//! `Reader` walks reply payloads with a cursor and refuses to read past the
//! declared end, turning overruns into `TransportError::Truncated` instead
//! of out-of-bounds indexing.

use byteorder::{BigEndian, ByteOrder};

use crate::{
    error::{Error, TransportError},
    proto::AfpVersion,
    utils::Result,
};

/// Text encoding hint carried in UTF-8 path and name fields.
pub const UTF8_TEXT_ENCODING: u32 = 0x0800_0103;

/// Wire representation of pathnames, selected by the negotiated dialect.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PathKind {
    /// Type 2: one byte count, name bytes.
    Long,
    /// Type 3: four byte text encoding hint, two byte count, name bytes.
    Utf8,
}

impl PathKind {
    pub fn for_version(version: AfpVersion) -> PathKind {
        if version.unicode_paths() {
            PathKind::Utf8
        } else {
            PathKind::Long
        }
    }

    /// Bytes of path header preceding the name itself.
    pub fn header_len(self) -> usize {
        match self {
            PathKind::Long => 2,
            PathKind::Utf8 => 7,
        }
    }
}

/// Growable request builder.
#[derive(Clone, Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Writer {
        Writer::default()
    }

    pub fn with_capacity(cap: usize) -> Writer {
        Writer {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    /// One byte counted string. Fails if the content exceeds 255 bytes.
    pub fn pascal(&mut self, s: &str) -> Result<&mut Self> {
        if s.len() > u8::MAX as usize {
            return Err(Error::Encoding(format!(
                "string of {} bytes does not fit a Pascal string",
                s.len()
            )));
        }
        self.buf.push(s.len() as u8);
        self.buf.extend_from_slice(s.as_bytes());
        Ok(self)
    }

    /// Pathname in its wire representation. Separators become NUL bytes,
    /// matching the protocol's path element encoding.
    pub fn path(&mut self, kind: PathKind, name: &str) -> Result<&mut Self> {
        let encoded: Vec<u8> = name
            .bytes()
            .map(|b| if b == b'/' { 0x00 } else { b })
            .collect();
        match kind {
            PathKind::Long => {
                if encoded.len() > u8::MAX as usize {
                    return Err(Error::Encoding(format!(
                        "path of {} bytes exceeds the long-name form",
                        encoded.len()
                    )));
                }
                self.u8(2).u8(encoded.len() as u8).bytes(&encoded);
            }
            PathKind::Utf8 => {
                if encoded.len() > u16::MAX as usize {
                    return Err(Error::Encoding(format!(
                        "path of {} bytes exceeds the UTF-8 form",
                        encoded.len()
                    )));
                }
                self.u8(3)
                    .u32(UTF8_TEXT_ENCODING)
                    .u16(encoded.len() as u16)
                    .bytes(&encoded);
            }
        }
        Ok(self)
    }

    /// Pad with one NUL if the next field must start on an even boundary.
    pub fn align_even(&mut self) -> &mut Self {
        if self.buf.len() & 1 == 1 {
            self.buf.push(0);
        }
        self
    }
}

/// Cursor over a reply payload. All reads are bounds-checked against the
/// declared length; the caller decides when remaining() has been exhausted.
#[derive(Copy, Clone, Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(Error::Transport(TransportError::Truncated {
                needed: self.pos + n,
                actual: self.buf.len(),
            }));
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn u16(&mut self) -> Result<u16> {
        self.need(2)?;
        let v = BigEndian::read_u16(&self.buf[self.pos..]);
        self.pos += 2;
        Ok(v)
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        let v = BigEndian::read_u32(&self.buf[self.pos..]);
        self.pos += 4;
        Ok(v)
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.need(8)?;
        let v = BigEndian::read_u64(&self.buf[self.pos..]);
        self.pos += 8;
        Ok(v)
    }

    pub fn i32(&mut self) -> Result<i32> {
        self.u32().map(|v| v as i32)
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.need(n)?;
        let v = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(v)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.need(n)?;
        self.pos += n;
        Ok(())
    }

    /// Skip the pad byte servers insert to even-align the following field.
    pub fn skip_to_even(&mut self) -> Result<()> {
        if self.pos & 1 == 1 { self.skip(1) } else { Ok(()) }
    }

    /// One byte counted string, decoded lossily.
    pub fn pascal(&mut self) -> Result<String> {
        let len = self.u8()? as usize;
        let bytes = self.bytes(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// One byte counted string clamped to `cap` bytes of content; the wire
    /// length is always consumed so the cursor stays in sync.
    pub fn pascal_clamped(&mut self, cap: usize) -> Result<String> {
        let len = self.u8()? as usize;
        let bytes = self.bytes(len)?;
        let kept = &bytes[..len.min(cap)];
        Ok(String::from_utf8_lossy(kept).into_owned())
    }

    /// A fresh cursor positioned at `offset` from the start of this buffer,
    /// for the offset-table fields in server info and parameter blocks.
    pub fn at(&self, offset: usize) -> Result<Reader<'a>> {
        if offset > self.buf.len() {
            return Err(Error::Transport(TransportError::Truncated {
                needed: offset,
                actual: self.buf.len(),
            }));
        }
        Ok(Reader {
            buf: self.buf,
            pos: offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_is_big_endian() {
        let mut w = Writer::new();
        w.u16(0x1234).u32(0xdead_beef);
        assert_eq!(w.into_vec(), vec![0x12, 0x34, 0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn pascal_round_trip() {
        let mut w = Writer::new();
        w.pascal("AFP3.1").unwrap();
        let buf = w.into_vec();
        let mut r = Reader::new(&buf);
        assert_eq!(r.pascal().unwrap(), "AFP3.1");
        assert!(r.is_empty());
    }

    #[test]
    fn pascal_rejects_overlong_input() {
        let long = "x".repeat(256);
        assert!(Writer::new().pascal(&long).is_err());
    }

    #[test]
    fn pascal_clamps_to_caller_capacity() {
        let mut w = Writer::new();
        w.pascal("abcdefgh").unwrap();
        let buf = w.into_vec();
        let mut r = Reader::new(&buf);
        assert_eq!(r.pascal_clamped(3).unwrap(), "abc");
        // The full wire length was consumed regardless.
        assert!(r.is_empty());
    }

    #[test]
    fn long_path_encoding() {
        let mut w = Writer::new();
        w.path(PathKind::Long, "a/b").unwrap();
        assert_eq!(w.into_vec(), vec![2, 3, b'a', 0x00, b'b']);
    }

    #[test]
    fn utf8_path_encoding() {
        let mut w = Writer::new();
        w.path(PathKind::Utf8, "hi").unwrap();
        assert_eq!(
            w.into_vec(),
            vec![3, 0x08, 0x00, 0x01, 0x03, 0x00, 0x02, b'h', b'i']
        );
    }

    #[test]
    fn align_even_only_pads_odd_lengths() {
        let mut w = Writer::new();
        w.u8(1).align_even();
        assert_eq!(w.len(), 2);
        w.align_even();
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn reader_rejects_overruns() {
        let mut r = Reader::new(&[0x01, 0x02]);
        assert!(r.u32().is_err());
        // A failed read leaves the cursor untouched.
        assert_eq!(r.u16().unwrap(), 0x0102);
    }
}
