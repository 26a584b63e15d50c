//! MessagePack primitives
//!
//! The subset of MessagePack the backplane envelopes use: arrays, maps,
//! strings, binary blobs, integers and nil. Writers always pick the shortest
//! encoding; the reader accepts every width so envelopes written by other
//! MessagePack implementations decode too. All multi-byte lengths and
//! integers are big-endian, as the format requires.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::shared::ProtocolError;

/// Deepest nesting `skip_value` will descend into
pub const MAX_SKIP_DEPTH: usize = 32;

const NIL: u8 = 0xc0;
const FALSE: u8 = 0xc2;
const TRUE: u8 = 0xc3;
const BIN8: u8 = 0xc4;
const BIN16: u8 = 0xc5;
const BIN32: u8 = 0xc6;
const EXT8: u8 = 0xc7;
const EXT16: u8 = 0xc8;
const EXT32: u8 = 0xc9;
const FLOAT32: u8 = 0xca;
const FLOAT64: u8 = 0xcb;
const UINT8: u8 = 0xcc;
const UINT16: u8 = 0xcd;
const UINT32: u8 = 0xce;
const UINT64: u8 = 0xcf;
const INT8: u8 = 0xd0;
const INT16: u8 = 0xd1;
const INT32: u8 = 0xd2;
const INT64: u8 = 0xd3;
const FIXEXT1: u8 = 0xd4;
const FIXEXT16: u8 = 0xd8;
const STR8: u8 = 0xd9;
const STR16: u8 = 0xda;
const STR32: u8 = 0xdb;
const ARRAY16: u8 = 0xdc;
const ARRAY32: u8 = 0xdd;
const MAP16: u8 = 0xde;
const MAP32: u8 = 0xdf;

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

pub fn write_nil(buf: &mut BytesMut) {
    buf.put_u8(NIL);
}

pub fn write_array_header(buf: &mut BytesMut, len: usize) {
    write_container_header(buf, len, 0x90, ARRAY16, ARRAY32);
}

pub fn write_map_header(buf: &mut BytesMut, len: usize) {
    write_container_header(buf, len, 0x80, MAP16, MAP32);
}

fn write_container_header(buf: &mut BytesMut, len: usize, fix: u8, m16: u8, m32: u8) {
    if len < 16 {
        buf.put_u8(fix | len as u8);
    } else if len <= u16::MAX as usize {
        buf.put_u8(m16);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(m32);
        buf.put_u32(len as u32);
    }
}

pub fn write_str(buf: &mut BytesMut, value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len();
    buf.reserve(5 + len);
    if len < 32 {
        buf.put_u8(0xa0 | len as u8);
    } else if len <= u8::MAX as usize {
        buf.put_u8(STR8);
        buf.put_u8(len as u8);
    } else if len <= u16::MAX as usize {
        buf.put_u8(STR16);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(STR32);
        buf.put_u32(len as u32);
    }
    buf.put_slice(bytes);
}

pub fn write_optional_str(buf: &mut BytesMut, value: Option<&str>) {
    match value {
        Some(value) => write_str(buf, value),
        None => write_nil(buf),
    }
}

pub fn write_bin(buf: &mut BytesMut, value: &[u8]) {
    let len = value.len();
    buf.reserve(5 + len);
    if len <= u8::MAX as usize {
        buf.put_u8(BIN8);
        buf.put_u8(len as u8);
    } else if len <= u16::MAX as usize {
        buf.put_u8(BIN16);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(BIN32);
        buf.put_u32(len as u32);
    }
    buf.put_slice(value);
}

pub fn write_int(buf: &mut BytesMut, value: i64) {
    if value >= 0 {
        let value = value as u64;
        if value < 128 {
            buf.put_u8(value as u8);
        } else if value <= u8::MAX as u64 {
            buf.put_u8(UINT8);
            buf.put_u8(value as u8);
        } else if value <= u16::MAX as u64 {
            buf.put_u8(UINT16);
            buf.put_u16(value as u16);
        } else if value <= u32::MAX as u64 {
            buf.put_u8(UINT32);
            buf.put_u32(value as u32);
        } else {
            buf.put_u8(UINT64);
            buf.put_u64(value);
        }
    } else if value >= -32 {
        buf.put_i8(value as i8);
    } else if value >= i8::MIN as i64 {
        buf.put_u8(INT8);
        buf.put_i8(value as i8);
    } else if value >= i16::MIN as i64 {
        buf.put_u8(INT16);
        buf.put_i16(value as i16);
    } else if value >= i32::MIN as i64 {
        buf.put_u8(INT32);
        buf.put_i32(value as i32);
    } else {
        buf.put_u8(INT64);
        buf.put_i64(value);
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Sequential reader over one encoded envelope
///
/// Binary values are returned as slices of the original buffer without
/// copying.
#[derive(Debug, Clone)]
pub struct MessageReader {
    buf: Bytes,
}

impl MessageReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::truncated(needed, self.buf.remaining()));
        }
        Ok(())
    }

    fn peek_marker(&self) -> Result<u8, ProtocolError> {
        self.ensure(1)?;
        Ok(self.buf[0])
    }

    fn read_marker(&mut self) -> Result<u8, ProtocolError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    fn read_len8(&mut self) -> Result<usize, ProtocolError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8() as usize)
    }

    fn read_len16(&mut self) -> Result<usize, ProtocolError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16() as usize)
    }

    fn read_len32(&mut self) -> Result<usize, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32() as usize)
    }

    fn take(&mut self, len: usize) -> Result<Bytes, ProtocolError> {
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    pub fn read_array_len(&mut self) -> Result<usize, ProtocolError> {
        match self.read_marker()? {
            marker @ 0x90..=0x9f => Ok((marker & 0x0f) as usize),
            ARRAY16 => self.read_len16(),
            ARRAY32 => self.read_len32(),
            marker => Err(ProtocolError::unexpected("array", marker)),
        }
    }

    pub fn read_map_len(&mut self) -> Result<usize, ProtocolError> {
        match self.read_marker()? {
            marker @ 0x80..=0x8f => Ok((marker & 0x0f) as usize),
            MAP16 => self.read_len16(),
            MAP32 => self.read_len32(),
            marker => Err(ProtocolError::unexpected("map", marker)),
        }
    }

    pub fn read_str(&mut self) -> Result<String, ProtocolError> {
        let len = match self.read_marker()? {
            marker @ 0xa0..=0xbf => (marker & 0x1f) as usize,
            STR8 => self.read_len8()?,
            STR16 => self.read_len16()?,
            STR32 => self.read_len32()?,
            marker => return Err(ProtocolError::unexpected("string", marker)),
        };
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Read a string, or `None` if the value is nil
    pub fn read_optional_str(&mut self) -> Result<Option<String>, ProtocolError> {
        if self.peek_marker()? == NIL {
            self.buf.advance(1);
            return Ok(None);
        }
        self.read_str().map(Some)
    }

    pub fn read_bin(&mut self) -> Result<Bytes, ProtocolError> {
        let len = match self.read_marker()? {
            BIN8 => self.read_len8()?,
            BIN16 => self.read_len16()?,
            BIN32 => self.read_len32()?,
            marker => return Err(ProtocolError::unexpected("binary", marker)),
        };
        self.take(len)
    }

    pub fn read_int(&mut self) -> Result<i64, ProtocolError> {
        let marker = self.read_marker()?;
        let value = match marker {
            0x00..=0x7f => marker as i64,
            0xe0..=0xff => marker as i8 as i64,
            UINT8 => {
                self.ensure(1)?;
                self.buf.get_u8() as i64
            }
            UINT16 => {
                self.ensure(2)?;
                self.buf.get_u16() as i64
            }
            UINT32 => {
                self.ensure(4)?;
                self.buf.get_u32() as i64
            }
            UINT64 => {
                self.ensure(8)?;
                i64::try_from(self.buf.get_u64())
                    .map_err(|_| ProtocolError::IntegerOutOfRange { target: "i64" })?
            }
            INT8 => {
                self.ensure(1)?;
                self.buf.get_i8() as i64
            }
            INT16 => {
                self.ensure(2)?;
                self.buf.get_i16() as i64
            }
            INT32 => {
                self.ensure(4)?;
                self.buf.get_i32() as i64
            }
            INT64 => {
                self.ensure(8)?;
                self.buf.get_i64()
            }
            marker => return Err(ProtocolError::unexpected("integer", marker)),
        };
        Ok(value)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        let value = self.read_int()?;
        u8::try_from(value).map_err(|_| ProtocolError::IntegerOutOfRange { target: "u8" })
    }

    /// Skip one complete value of any kind, including nested containers
    pub fn skip_value(&mut self) -> Result<(), ProtocolError> {
        self.skip_nested(0)
    }

    fn skip_nested(&mut self, depth: usize) -> Result<(), ProtocolError> {
        if depth >= MAX_SKIP_DEPTH {
            return Err(ProtocolError::NestingTooDeep(MAX_SKIP_DEPTH));
        }
        let marker = self.peek_marker()?;
        match marker {
            0x00..=0x7f | 0xe0..=0xff | NIL | FALSE | TRUE => {
                self.buf.advance(1);
            }
            0x80..=0x8f | MAP16 | MAP32 => {
                let len = self.read_map_len()?;
                for _ in 0..len {
                    self.skip_nested(depth + 1)?;
                    self.skip_nested(depth + 1)?;
                }
            }
            0x90..=0x9f | ARRAY16 | ARRAY32 => {
                let len = self.read_array_len()?;
                for _ in 0..len {
                    self.skip_nested(depth + 1)?;
                }
            }
            0xa0..=0xbf | STR8 | STR16 | STR32 => {
                self.buf.advance(1);
                let len = match marker {
                    STR8 => self.read_len8()?,
                    STR16 => self.read_len16()?,
                    STR32 => self.read_len32()?,
                    _ => (marker & 0x1f) as usize,
                };
                self.take(len)?;
            }
            BIN8 | BIN16 | BIN32 => {
                self.read_bin()?;
            }
            UINT8..=INT64 => {
                self.read_int()?;
            }
            FLOAT32 => {
                self.buf.advance(1);
                self.take(4)?;
            }
            FLOAT64 => {
                self.buf.advance(1);
                self.take(8)?;
            }
            FIXEXT1..=FIXEXT16 => {
                self.buf.advance(1);
                // type byte plus 1, 2, 4, 8 or 16 data bytes
                let len = 1usize << (marker - FIXEXT1);
                self.take(1 + len)?;
            }
            EXT8 | EXT16 | EXT32 => {
                self.buf.advance(1);
                let len = match marker {
                    EXT8 => self.read_len8()?,
                    EXT16 => self.read_len16()?,
                    _ => self.read_len32()?,
                };
                self.take(1 + len)?;
            }
            marker => return Err(ProtocolError::unexpected("value", marker)),
        }
        Ok(())
    }
}
