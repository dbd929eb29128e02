//! Hand-rolled msgpack reading on top of `rmp::decode`.
//!
//! Every reader works on a `Cursor<&[u8]>` and refuses to move past the end
//! of the buffer, so a truncated or lying length field surfaces as an error
//! rather than a panic.

use std::io::Cursor;

use anyhow::{bail, ensure, Context, Result};
use rmp::decode;

use crate::types::Uuid16;

/// Nesting limit for `skip_value`; deeper input is treated as corrupt.
const MAX_DEPTH: usize = 64;

/// Read a u8 value from cursor, handling both positive fixint and uint8 formats.
pub(crate) fn read_u8_value(cur: &mut Cursor<&[u8]>) -> Result<u8> {
    let v = read_int(cur)?;
    u8::try_from(v).with_context(|| format!("value {} does not fit in u8", v))
}

/// Read a msgpack integer (handles int/uint of various sizes)
pub(crate) fn read_int(cur: &mut Cursor<&[u8]>) -> Result<i64> {
    let pos = cur.position() as usize;
    let marker = peek_byte(cur, pos).context("unexpected end of data reading int")?;

    // Positive fixint: 0x00..0x7f
    if marker <= 0x7f {
        cur.set_position(pos as u64 + 1);
        return Ok(marker as i64);
    }
    // Negative fixint: 0xe0..0xff
    if marker >= 0xe0 {
        cur.set_position(pos as u64 + 1);
        return Ok((marker as i8) as i64);
    }

    let (value, width) = match marker {
        0xcc => (peek_byte(cur, pos + 1)? as i64, 1),
        0xcd => (u16::from_be_bytes(peek_bytes_2(cur, pos + 1)?) as i64, 2),
        0xce => (u32::from_be_bytes(peek_bytes_4(cur, pos + 1)?) as i64, 4),
        0xcf => (u64::from_be_bytes(peek_bytes_8(cur, pos + 1)?) as i64, 8),
        0xd0 => (peek_byte(cur, pos + 1)? as i8 as i64, 1),
        0xd1 => (i16::from_be_bytes(peek_bytes_2(cur, pos + 1)?) as i64, 2),
        0xd2 => (i32::from_be_bytes(peek_bytes_4(cur, pos + 1)?) as i64, 4),
        0xd3 => (i64::from_be_bytes(peek_bytes_8(cur, pos + 1)?), 8),
        _ => bail!("expected int, got marker 0x{:02x}", marker),
    };
    cur.set_position((pos + 1 + width) as u64);
    Ok(value)
}

/// Read an integer that must fit in i32.
pub(crate) fn read_i32(cur: &mut Cursor<&[u8]>) -> Result<i32> {
    let v = read_int(cur)?;
    i32::try_from(v).with_context(|| format!("value {} does not fit in i32", v))
}

/// Read a msgpack string of any length.
pub(crate) fn read_string(cur: &mut Cursor<&[u8]>) -> Result<String> {
    let len = decode::read_str_len(cur).context("failed to read string length")?;
    let bytes = take(cur, len as usize)?;
    let s = std::str::from_utf8(bytes).context("string is not valid utf-8")?;
    Ok(s.to_owned())
}

/// Read a msgpack binary blob, borrowing from the underlying buffer.
pub(crate) fn read_bin_slice<'a>(cur: &mut Cursor<&'a [u8]>) -> Result<&'a [u8]> {
    let len = decode::read_bin_len(cur).context("failed to read bin length")?;
    take(cur, len as usize)
}

/// Read a msgpack binary blob
pub(crate) fn read_bin(cur: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    Ok(read_bin_slice(cur)?.to_vec())
}

/// Read a 16-byte id. Zero-length bins decode as the null id.
pub(crate) fn read_uuid(cur: &mut Cursor<&[u8]>) -> Result<Uuid16> {
    let b = read_bin_slice(cur)?;
    if b.is_empty() {
        return Ok(Uuid16::NULL);
    }
    Uuid16::from_slice(b).with_context(|| format!("expected 16 byte id, got {} bytes", b.len()))
}

/// Read an array header, rejecting counts the remaining buffer cannot hold.
pub(crate) fn read_array_len(cur: &mut Cursor<&[u8]>) -> Result<usize> {
    let len = decode::read_array_len(cur).context("failed to read array header")? as usize;
    ensure!(len <= remaining(cur), "array length {} exceeds buffer", len);
    Ok(len)
}

/// Read a map header, rejecting counts the remaining buffer cannot hold.
pub(crate) fn read_map_len(cur: &mut Cursor<&[u8]>) -> Result<usize> {
    let len = decode::read_map_len(cur).context("failed to read map header")? as usize;
    ensure!(len.saturating_mul(2) <= remaining(cur), "map length {} exceeds buffer", len);
    Ok(len)
}

/// Consume a nil if one is next. Returns whether it did.
pub(crate) fn try_read_nil(cur: &mut Cursor<&[u8]>) -> bool {
    let pos = cur.position() as usize;
    if cur.get_ref().get(pos) == Some(&0xc0) {
        cur.set_position(pos as u64 + 1);
        return true;
    }
    false
}

pub(crate) fn peek_marker(cur: &Cursor<&[u8]>) -> Result<u8> {
    peek_byte(cur, cur.position() as usize).context("unexpected end of data")
}

/// Skip one value and return its raw encoding.
pub(crate) fn read_raw_value<'a>(cur: &mut Cursor<&'a [u8]>) -> Result<&'a [u8]> {
    let data: &'a [u8] = *cur.get_ref();
    let start = cur.position() as usize;
    skip_value(cur)?;
    Ok(&data[start..cur.position() as usize])
}

/// Skip a single msgpack value (any type).
pub(crate) fn skip_value(cur: &mut Cursor<&[u8]>) -> Result<()> {
    skip_nested(cur, 0)?;
    ensure!(
        cur.position() as usize <= cur.get_ref().len(),
        "value extends beyond buffer"
    );
    Ok(())
}

fn skip_nested(cur: &mut Cursor<&[u8]>, depth: usize) -> Result<()> {
    ensure!(depth < MAX_DEPTH, "msgpack nesting too deep");
    let pos = cur.position() as usize;
    let marker = peek_byte(cur, pos).context("unexpected end of data in skip")?;

    // Positive fixint, negative fixint
    if marker <= 0x7f || marker >= 0xe0 {
        cur.set_position(pos as u64 + 1);
        return Ok(());
    }
    // fixmap
    if (0x80..=0x8f).contains(&marker) {
        cur.set_position(pos as u64 + 1);
        return skip_entries(cur, (marker & 0x0f) as u64 * 2, depth);
    }
    // fixarray
    if (0x90..=0x9f).contains(&marker) {
        cur.set_position(pos as u64 + 1);
        return skip_entries(cur, (marker & 0x0f) as u64, depth);
    }
    // fixstr
    if (0xa0..=0xbf).contains(&marker) {
        return advance(cur, pos + 1, (marker & 0x1f) as usize);
    }

    match marker {
        0xc0 | 0xc2 | 0xc3 => cur.set_position(pos as u64 + 1), // nil, false, true
        // bin8 / str8
        0xc4 | 0xd9 => advance(cur, pos + 2, peek_byte(cur, pos + 1)? as usize)?,
        // bin16 / str16
        0xc5 | 0xda => {
            let len = u16::from_be_bytes(peek_bytes_2(cur, pos + 1)?) as usize;
            advance(cur, pos + 3, len)?
        }
        // bin32 / str32
        0xc6 | 0xdb => {
            let len = u32::from_be_bytes(peek_bytes_4(cur, pos + 1)?) as usize;
            advance(cur, pos + 5, len)?
        }
        0xca => advance(cur, pos + 1, 4)?, // float32
        0xcb => advance(cur, pos + 1, 8)?, // float64
        0xcc | 0xd0 => advance(cur, pos + 1, 1)?,
        0xcd | 0xd1 => advance(cur, pos + 1, 2)?,
        0xce | 0xd2 => advance(cur, pos + 1, 4)?,
        0xcf | 0xd3 => advance(cur, pos + 1, 8)?,
        0xdc => {
            // array16
            let len = u16::from_be_bytes(peek_bytes_2(cur, pos + 1)?) as u64;
            cur.set_position(pos as u64 + 3);
            skip_entries(cur, len, depth)?
        }
        0xdd => {
            // array32
            let len = u32::from_be_bytes(peek_bytes_4(cur, pos + 1)?) as u64;
            cur.set_position(pos as u64 + 5);
            skip_entries(cur, len, depth)?
        }
        0xde => {
            // map16
            let len = u16::from_be_bytes(peek_bytes_2(cur, pos + 1)?) as u64;
            cur.set_position(pos as u64 + 3);
            skip_entries(cur, len * 2, depth)?
        }
        0xdf => {
            // map32
            let len = u32::from_be_bytes(peek_bytes_4(cur, pos + 1)?) as u64;
            cur.set_position(pos as u64 + 5);
            skip_entries(cur, len * 2, depth)?
        }
        0xd4 => advance(cur, pos + 2, 1)?,  // fixext1
        0xd5 => advance(cur, pos + 2, 2)?,  // fixext2
        0xd6 => advance(cur, pos + 2, 4)?,  // fixext4
        0xd7 => advance(cur, pos + 2, 8)?,  // fixext8
        0xd8 => advance(cur, pos + 2, 16)?, // fixext16
        0xc7 => advance(cur, pos + 3, peek_byte(cur, pos + 1)? as usize)?, // ext8
        0xc8 => {
            // ext16
            let len = u16::from_be_bytes(peek_bytes_2(cur, pos + 1)?) as usize;
            advance(cur, pos + 4, len)?
        }
        0xc9 => {
            // ext32
            let len = u32::from_be_bytes(peek_bytes_4(cur, pos + 1)?) as usize;
            advance(cur, pos + 6, len)?
        }
        _ => bail!("unknown msgpack marker 0x{:02x} at pos {}", marker, pos),
    }

    Ok(())
}

fn skip_entries(cur: &mut Cursor<&[u8]>, count: u64, depth: usize) -> Result<()> {
    ensure!(count as usize <= remaining(cur), "container length {} exceeds buffer", count);
    for _ in 0..count {
        skip_nested(cur, depth + 1)?;
    }
    Ok(())
}

/// Move to `start + len`, failing if that lies past the end.
fn advance(cur: &mut Cursor<&[u8]>, start: usize, len: usize) -> Result<()> {
    let end = start.checked_add(len).context("length overflow")?;
    ensure!(end <= cur.get_ref().len(), "truncated value at offset {}", start);
    cur.set_position(end as u64);
    Ok(())
}

/// Borrow the next `len` bytes and step over them.
fn take<'a>(cur: &mut Cursor<&'a [u8]>, len: usize) -> Result<&'a [u8]> {
    let data: &'a [u8] = *cur.get_ref();
    let start = cur.position() as usize;
    let end = start.checked_add(len).context("length overflow")?;
    ensure!(end <= data.len(), "data extends beyond buffer");
    cur.set_position(end as u64);
    Ok(&data[start..end])
}

fn remaining(cur: &Cursor<&[u8]>) -> usize {
    cur.get_ref().len().saturating_sub(cur.position() as usize)
}

/// Peek a single byte at offset (briefly borrows, then releases)
fn peek_byte(cur: &Cursor<&[u8]>, offset: usize) -> Result<u8> {
    let data = cur.get_ref();
    ensure!(offset < data.len(), "truncated at offset {}", offset);
    Ok(data[offset])
}

/// Peek 2 bytes at offset
fn peek_bytes_2(cur: &Cursor<&[u8]>, offset: usize) -> Result<[u8; 2]> {
    let data = cur.get_ref();
    ensure!(offset + 2 <= data.len(), "truncated at offset {}", offset);
    Ok([data[offset], data[offset + 1]])
}

/// Peek 4 bytes at offset
fn peek_bytes_4(cur: &Cursor<&[u8]>, offset: usize) -> Result<[u8; 4]> {
    let data = cur.get_ref();
    ensure!(offset + 4 <= data.len(), "truncated at offset {}", offset);
    Ok([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

/// Peek 8 bytes at offset
fn peek_bytes_8(cur: &Cursor<&[u8]>, offset: usize) -> Result<[u8; 8]> {
    let data = cur.get_ref();
    ensure!(offset + 8 <= data.len(), "truncated at offset {}", offset);
    let mut out = [0u8; 8];
    out.copy_from_slice(&data[offset..offset + 8]);
    Ok(out)
}

pub(crate) fn is_str_marker(m: u8) -> bool {
    (0xa0..=0xbf).contains(&m) || m == 0xd9 || m == 0xda || m == 0xdb
}

pub(crate) fn is_bin_marker(m: u8) -> bool {
    m == 0xc4 || m == 0xc5 || m == 0xc6
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmp::encode;

    #[test]
    fn test_read_int_all_widths() {
        let values = [0i64, 1, 127, 128, 255, 256, 65535, 65536, -1, -32, -33, -129, -40000, i64::MAX, i64::MIN];
        for v in values {
            let mut buf = Vec::new();
            encode::write_sint(&mut buf, v).unwrap();
            let mut cur = Cursor::new(buf.as_slice());
            assert_eq!(read_int(&mut cur).unwrap(), v, "value {}", v);
            assert_eq!(cur.position() as usize, buf.len());
        }
    }

    #[test]
    fn test_read_int_truncated() {
        let data = [0xce, 0x00, 0x01];
        let mut cur = Cursor::new(&data[..]);
        assert!(read_int(&mut cur).is_err());
    }

    #[test]
    fn test_read_u8_value_range() {
        let data = [0xcc, 0xff];
        assert_eq!(read_u8_value(&mut Cursor::new(&data[..])).unwrap(), 255);
        let data = [0xcd, 0x01, 0x00];
        assert!(read_u8_value(&mut Cursor::new(&data[..])).is_err());
    }

    #[test]
    fn test_read_long_string() {
        let long = "x".repeat(1000);
        let mut buf = Vec::new();
        encode::write_str(&mut buf, &long).unwrap();
        let mut cur = Cursor::new(buf.as_slice());
        assert_eq!(read_string(&mut cur).unwrap(), long);
    }

    #[test]
    fn test_read_bin_rejects_lying_length() {
        // bin8 claiming 10 bytes with only 2 present
        let data = [0xc4, 0x0a, 0x01, 0x02];
        assert!(read_bin(&mut Cursor::new(&data[..])).is_err());
    }

    #[test]
    fn test_read_uuid() {
        let mut buf = Vec::new();
        encode::write_bin(&mut buf, &[7u8; 16]).unwrap();
        encode::write_bin(&mut buf, &[]).unwrap();
        encode::write_bin(&mut buf, &[1u8; 3]).unwrap();
        let mut cur = Cursor::new(buf.as_slice());
        assert_eq!(read_uuid(&mut cur).unwrap(), Uuid16([7u8; 16]));
        assert_eq!(read_uuid(&mut cur).unwrap(), Uuid16::NULL);
        assert!(read_uuid(&mut cur).is_err());
    }

    #[test]
    fn test_skip_and_capture_nested_value() {
        let mut buf = Vec::new();
        encode::write_map_len(&mut buf, 2).unwrap();
        encode::write_str(&mut buf, "a").unwrap();
        encode::write_array_len(&mut buf, 3).unwrap();
        encode::write_sint(&mut buf, 1).unwrap();
        encode::write_f64(&mut buf, 2.5).unwrap();
        encode::write_nil(&mut buf).unwrap();
        encode::write_str(&mut buf, "b").unwrap();
        encode::write_bin(&mut buf, &[9u8; 300]).unwrap();
        let end = buf.len();
        encode::write_sint(&mut buf, 42).unwrap();

        let mut cur = Cursor::new(buf.as_slice());
        let raw = read_raw_value(&mut cur).unwrap();
        assert_eq!(raw.len(), end);
        assert_eq!(read_int(&mut cur).unwrap(), 42);
    }

    #[test]
    fn test_skip_truncated_fails() {
        // fixstr of 5 bytes with 2 present
        let data = [0xa5, b'a', b'b'];
        assert!(skip_value(&mut Cursor::new(&data[..])).is_err());
        // array16 claiming more entries than bytes
        let data = [0xdc, 0xff, 0xff, 0x01];
        assert!(skip_value(&mut Cursor::new(&data[..])).is_err());
    }

    #[test]
    fn test_skip_rejects_deep_nesting() {
        let data = vec![0x91u8; 200];
        assert!(skip_value(&mut Cursor::new(data.as_slice())).is_err());
    }

    #[test]
    fn test_map_len_bounded_by_buffer() {
        let data = [0xdf, 0x7f, 0xff, 0xff, 0xff];
        assert!(read_map_len(&mut Cursor::new(&data[..])).is_err());
    }

    #[test]
    fn test_try_read_nil() {
        let data = [0xc0, 0x01];
        let mut cur = Cursor::new(&data[..]);
        assert!(try_read_nil(&mut cur));
        assert!(!try_read_nil(&mut cur));
        assert_eq!(read_int(&mut cur).unwrap(), 1);
    }

    #[test]
    fn test_marker_classes() {
        assert!(is_str_marker(0xa3));
        assert!(is_str_marker(0xd9));
        assert!(is_bin_marker(0xc4));
        assert!(!is_bin_marker(0xa3));
    }
}
