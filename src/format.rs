//! xl.meta framing
//!
//! ```text
//! [4 bytes: "XL2 "]
//! [u16 LE: major]  must be 1
//! [u16 LE: minor]  0..=2 plain, 3 indexed
//! indexed:
//!   [msgpack bin: metadata_blob]
//!   [msgpack u32: crc]  -- (xxh64(blob) & 0xFFFFFFFF) as u32
//!   [optional inline data]
//! plain:
//!   [msgpack map: {"Versions": [version map, ...]}]
//!   [optional inline data]
//! ```
//!
//! A document starting with `{` is the JSON legacy layout.

use std::io::Cursor;

use anyhow::{bail, ensure, Context, Result};
use rmp::{decode, encode};
use tracing::{trace, warn};
use xxhash_rust::xxh64;

use crate::legacy::is_legacy_json;
use crate::msgp;
use crate::version::VersionHeader;

const XL_HEADER: [u8; 4] = *b"XL2 ";
pub const XL_MAJOR: u16 = 1;
pub const XL_MINOR: u16 = 3;
pub(crate) const HEADER_VERSION: u8 = 3;
pub(crate) const META_VERSION: u8 = 3;

/// Encoding of an xl.meta buffer, resolved once when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// JSON single-version document.
    Legacy,
    /// Binary, versions stored as one msgpack array (minor 0..=2).
    Plain,
    /// Binary with per-version headers and a checksum (minor 3).
    Indexed,
}

/// Version information read from the front of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaHeader {
    /// Both zero for the legacy layout.
    pub major: u16,
    pub minor: u16,
    pub layout: Layout,
}

pub(crate) fn read_header(buf: &[u8]) -> Result<MetaHeader> {
    if is_legacy_json(buf) {
        return Ok(MetaHeader {
            major: 0,
            minor: 0,
            layout: Layout::Legacy,
        });
    }

    ensure!(buf.len() >= 8, "xl.meta too short: {} bytes", buf.len());
    ensure!(
        buf[..4] == XL_HEADER,
        "invalid xl.meta header: expected {:?}, got {:?}",
        &XL_HEADER,
        &buf[..4]
    );

    let major = u16::from_le_bytes([buf[4], buf[5]]);
    let minor = u16::from_le_bytes([buf[6], buf[7]]);
    ensure!(major == XL_MAJOR, "unsupported xl.meta major version: {}", major);

    let layout = match minor {
        0..=2 => Layout::Plain,
        XL_MINOR => Layout::Indexed,
        _ => bail!("xl.meta version {}.{} is newer than supported", major, minor),
    };
    Ok(MetaHeader { major, minor, layout })
}

/// Checksummed blob and trailing inline data of an indexed buffer.
pub(crate) struct IndexedParts<'a> {
    pub blob: &'a [u8],
    pub inline: &'a [u8],
}

/// Split the payload after the 8-byte prefix and verify the blob checksum.
pub(crate) fn split_indexed(payload: &[u8]) -> Result<IndexedParts<'_>> {
    let mut cur = Cursor::new(payload);

    let blob_len = decode::read_bin_len(&mut cur).context("failed to read metadata blob length")?;
    let blob_start = cur.position() as usize;
    let blob_end = blob_start
        .checked_add(blob_len as usize)
        .filter(|&end| end <= payload.len())
        .context("metadata blob extends beyond payload")?;
    let blob = &payload[blob_start..blob_end];
    cur.set_position(blob_end as u64);

    let crc = decode::read_u32(&mut cur).context("failed to read CRC")?;
    let expected_crc = blob_crc(blob);
    if crc != expected_crc {
        warn!(expected = expected_crc, got = crc, "xl.meta checksum mismatch");
        bail!("CRC mismatch: expected {:08x}, got {:08x}", expected_crc, crc);
    }

    let inline = &payload[cur.position() as usize..];
    Ok(IndexedParts { blob, inline })
}

/// Walks the `(header, version map)` pairs of an indexed blob.
///
/// Headers are decoded eagerly; version maps are handed out as borrowed bytes.
/// After the last entry the blob must be exhausted.
pub(crate) struct VersionIter<'a> {
    cur: Cursor<&'a [u8]>,
    remaining: usize,
    done: bool,
}

impl<'a> VersionIter<'a> {
    pub(crate) fn new(blob: &'a [u8]) -> Result<Self> {
        let mut cur = Cursor::new(blob);

        let header_version = msgp::read_u8_value(&mut cur).context("failed to read header version")?;
        ensure!(
            header_version <= HEADER_VERSION,
            "unknown header version {}",
            header_version
        );
        let meta_version = msgp::read_u8_value(&mut cur).context("failed to read meta version")?;
        ensure!(
            meta_version <= META_VERSION,
            "unknown meta version {}",
            meta_version
        );

        let count = msgp::read_int(&mut cur).context("failed to read version count")?;
        ensure!(count >= 0, "negative version count {}", count);
        // every entry takes at least two bytes
        let left = blob.len() - cur.position() as usize;
        ensure!(
            count as u64 <= (left / 2) as u64,
            "version count {} exceeds blob size",
            count
        );

        Ok(VersionIter {
            cur,
            remaining: count as usize,
            done: false,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.remaining
    }

    fn read_entry(&mut self) -> Result<(VersionHeader, &'a [u8])> {
        let header_bytes =
            msgp::read_bin_slice(&mut self.cur).context("failed to read version header")?;
        let header = VersionHeader::decode(header_bytes)?;
        let meta = msgp::read_bin_slice(&mut self.cur).context("failed to read version meta")?;
        Ok((header, meta))
    }
}

impl<'a> Iterator for VersionIter<'a> {
    type Item = Result<(VersionHeader, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.remaining == 0 {
            self.done = true;
            let pos = self.cur.position() as usize;
            let len = self.cur.get_ref().len();
            if pos != len {
                return Some(Err(anyhow::anyhow!(
                    "{} trailing bytes after last version",
                    len - pos
                )));
            }
            return None;
        }

        self.remaining -= 1;
        let entry = self.read_entry();
        if entry.is_err() {
            self.done = true;
        }
        Some(entry)
    }
}

/// Version maps and inline data of a plain (minor 0..=2) buffer.
pub(crate) fn split_plain(payload: &[u8]) -> Result<(Vec<&[u8]>, &[u8])> {
    let mut cur = Cursor::new(payload);
    let mut versions = Vec::new();

    let map_len = msgp::read_map_len(&mut cur).context("failed to read xl.meta map header")?;
    for _ in 0..map_len {
        let key = msgp::read_string(&mut cur).context("failed to read map key")?;

        match key.as_str() {
            "Versions" => {
                if msgp::try_read_nil(&mut cur) {
                    continue;
                }
                let count = msgp::read_array_len(&mut cur).context("failed to read Versions")?;
                versions.reserve(count);
                for i in 0..count {
                    let raw = msgp::read_raw_value(&mut cur)
                        .with_context(|| format!("failed to read version {}", i))?;
                    versions.push(raw);
                }
            }
            _ => {
                // the indexed layout written back has no top-level map to hold it
                warn!(key = %key, "dropping unknown top-level xl.meta field");
                msgp::skip_value(&mut cur).with_context(|| format!("failed to skip field {}", key))?;
            }
        }
    }

    let inline = &payload[cur.position() as usize..];
    trace!(versions = versions.len(), inline = inline.len(), "read plain xl.meta");
    Ok((versions, inline))
}

/// Append a complete indexed buffer.
pub(crate) fn write_indexed<'h, 'm, I>(buf: &mut Vec<u8>, entries: I, inline: &[u8]) -> Result<()>
where
    I: ExactSizeIterator<Item = (&'h VersionHeader, &'m [u8])>,
{
    let mut blob = Vec::with_capacity(64 + entries.len() * 256);
    encode::write_uint(&mut blob, u64::from(HEADER_VERSION))?;
    encode::write_uint(&mut blob, u64::from(META_VERSION))?;
    encode::write_sint(&mut blob, entries.len() as i64)?;

    let mut header_buf = Vec::with_capacity(64);
    for (header, meta) in entries {
        header_buf.clear();
        header.encode(&mut header_buf)?;
        encode::write_bin(&mut blob, &header_buf)?;
        encode::write_bin(&mut blob, meta)?;
    }

    buf.reserve(blob.len() + inline.len() + 16);
    buf.extend_from_slice(&XL_HEADER);
    buf.extend_from_slice(&XL_MAJOR.to_le_bytes());
    buf.extend_from_slice(&XL_MINOR.to_le_bytes());
    encode::write_bin(buf, &blob)?;
    encode::write_u32(buf, blob_crc(&blob))?;
    buf.extend_from_slice(inline);
    Ok(())
}

fn blob_crc(blob: &[u8]) -> u32 {
    (xxh64::xxh64(blob, 0) & 0xFFFFFFFF) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Uuid16, VersionType};

    fn header(id: u8, mod_time: i64) -> VersionHeader {
        VersionHeader {
            version_id: Uuid16([id; 16]),
            mod_time,
            signature: [1, 2, 3, 4],
            version_type: VersionType::DeleteMarker,
            flags: 0,
            ec_n: 0,
            ec_m: 0,
        }
    }

    fn sample_buffer() -> Vec<u8> {
        let headers = [header(1, 20), header(2, 10)];
        let metas: [&[u8]; 2] = [&[0x80], &[0x81, 0xa1, b'a', 0x01]];
        let mut buf = Vec::new();
        write_indexed(&mut buf, headers.iter().zip(metas.iter().copied()), b"inline").unwrap();
        buf
    }

    #[test]
    fn test_read_header_layouts() {
        let buf = sample_buffer();
        let h = read_header(&buf).unwrap();
        assert_eq!(h, MetaHeader { major: 1, minor: 3, layout: Layout::Indexed });

        let mut plain = buf.clone();
        plain[6] = 2;
        assert_eq!(read_header(&plain).unwrap().layout, Layout::Plain);

        assert_eq!(read_header(b" {\"format\":\"xl\"}").unwrap().layout, Layout::Legacy);
    }

    #[test]
    fn test_read_header_rejects() {
        assert!(read_header(b"XL2 ").is_err());
        assert!(read_header(b"XL3 \x01\x00\x03\x00").is_err());
        assert!(read_header(b"XL2 \x02\x00\x03\x00").is_err());
        assert!(read_header(b"XL2 \x01\x00\x04\x00").is_err());
        assert!(read_header(b"").is_err());
    }

    #[test]
    fn test_split_and_iterate() {
        let buf = sample_buffer();
        let parts = split_indexed(&buf[8..]).unwrap();
        assert_eq!(parts.inline, b"inline");

        let iter = VersionIter::new(parts.blob).unwrap();
        assert_eq!(iter.len(), 2);
        let entries: Vec<_> = iter.collect::<Result<_>>().unwrap();
        assert_eq!(entries[0].0, header(1, 20));
        assert_eq!(entries[1].0.mod_time, 10);
        assert_eq!(entries[1].1, &[0x81, 0xa1, b'a', 0x01]);
    }

    #[test]
    fn test_crc_mismatch_rejected() {
        let mut buf = sample_buffer();
        // flip a byte inside the blob
        buf[12] ^= 0xff;
        let err = split_indexed(&buf[8..]).err().unwrap();
        assert!(err.to_string().contains("CRC mismatch"));
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let buf = sample_buffer();
        assert!(split_indexed(&buf[8..20]).is_err());
    }

    #[test]
    fn test_trailing_bytes_in_blob_rejected() {
        let mut blob = Vec::new();
        encode::write_uint(&mut blob, 3).unwrap();
        encode::write_uint(&mut blob, 3).unwrap();
        encode::write_sint(&mut blob, 0).unwrap();
        blob.push(0xc0);
        let results: Vec<_> = VersionIter::new(&blob).unwrap().collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn test_count_larger_than_blob_rejected() {
        let mut blob = Vec::new();
        encode::write_uint(&mut blob, 3).unwrap();
        encode::write_uint(&mut blob, 3).unwrap();
        encode::write_sint(&mut blob, 1_000_000).unwrap();
        assert!(VersionIter::new(&blob).is_err());
    }

    #[test]
    fn test_split_plain_skips_unknown_keys() {
        let mut payload = Vec::new();
        encode::write_map_len(&mut payload, 2).unwrap();
        encode::write_str(&mut payload, "Future").unwrap();
        encode::write_array_len(&mut payload, 1).unwrap();
        encode::write_uint(&mut payload, 9).unwrap();
        encode::write_str(&mut payload, "Versions").unwrap();
        encode::write_array_len(&mut payload, 2).unwrap();
        encode::write_map_len(&mut payload, 0).unwrap();
        encode::write_map_len(&mut payload, 0).unwrap();
        payload.extend_from_slice(b"data");

        let (versions, inline) = split_plain(&payload).unwrap();
        assert_eq!(versions, vec![&[0x80][..], &[0x80][..]]);
        assert_eq!(inline, b"data");
    }
}
