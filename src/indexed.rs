//! Read-only view over an indexed xl.meta buffer.
//!
//! Nothing is copied: lookups walk the version headers in the borrowed buffer
//! and decode only the version maps they return. Entries must be stored newest
//! first; [`open_indexed`] checks this once so every query can rely on it.

use tracing::debug;

use crate::error::{Error, Result};
use crate::format::{self, Layout, MetaHeader, VersionIter};
use crate::types::FileInfo;
use crate::xlmeta::{collect_versions, find_file_info};

#[derive(Debug, Clone, Copy)]
pub struct XlMetaBuffer<'a> {
    blob: &'a [u8],
    inline: &'a [u8],
}

/// Open `buf` as an indexed view.
///
/// Returns `None` with the detected header when the buffer uses the plain or
/// legacy layout, or when its entries are not stored newest first; callers
/// fall back to [`crate::XlMetaV2::load`], which reorders them. Framing,
/// checksum and every version header are verified here.
pub fn open_indexed(buf: &[u8]) -> Result<(Option<XlMetaBuffer<'_>>, MetaHeader)> {
    let header = format::read_header(buf).map_err(Error::corrupt)?;
    if header.layout != Layout::Indexed {
        debug!(layout = ?header.layout, "xl.meta is not indexed");
        return Ok((None, header));
    }

    let parts = format::split_indexed(&buf[8..]).map_err(Error::corrupt)?;
    let mut newer = i64::MAX;
    for entry in VersionIter::new(parts.blob).map_err(Error::corrupt)? {
        let (version, _) = entry.map_err(Error::corrupt)?;
        if version.mod_time > newer {
            debug!(version_id = %version.version_id, "xl.meta entries out of order");
            return Ok((None, header));
        }
        newer = version.mod_time;
    }

    let view = XlMetaBuffer {
        blob: parts.blob,
        inline: parts.inline,
    };
    Ok((Some(view), header))
}

impl<'a> XlMetaBuffer<'a> {
    fn entries(&self) -> Result<VersionIter<'a>> {
        VersionIter::new(self.blob).map_err(Error::corrupt)
    }

    /// Number of entries, free versions included.
    pub fn len(&self) -> usize {
        self.entries().map_or(0, |it| it.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn inline_data(&self) -> &'a [u8] {
        self.inline
    }

    /// Look up one version; delete markers come back with `deleted` set.
    pub fn to_file_info(
        &self,
        volume: &str,
        name: &str,
        version_id: &str,
        allow_legacy: bool,
    ) -> Result<FileInfo> {
        find_file_info(self.entries()?, volume, name, version_id, true, allow_legacy)
    }

    pub fn list_versions(&self, volume: &str, name: &str, include_deleted: bool) -> Result<Vec<FileInfo>> {
        collect_versions(self.entries()?, volume, name, include_deleted)
    }
}
