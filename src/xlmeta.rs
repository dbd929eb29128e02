//! Multi-version xl.meta container.
//!
//! Versions are held shallow: the decoded [`VersionHeader`] next to the raw
//! encoded version map. Queries scan headers and decode only the versions they
//! return; mutations decode and re-encode only the version they touch.
//!
//! Versions are kept newest first by `mod_time`. Equal mod times keep their
//! insertion order.

use std::collections::HashSet;

use anyhow::Context;
use tracing::{debug, trace};

use crate::config::Config;
use crate::erasure::is_erasure_info_valid;
use crate::error::{Error, Result};
use crate::format::{self, Layout, VersionIter};
use crate::legacy;
use crate::types::{FileInfo, Uuid16, VersionSelector};
use crate::version::{self, VersionHeader, XlMetaVersion};

#[derive(Debug, Clone, PartialEq)]
struct ShallowVersion {
    header: VersionHeader,
    meta: Vec<u8>,
}

impl ShallowVersion {
    fn from_version(version: &XlMetaVersion) -> Result<Self> {
        let meta = version.encode().map_err(Error::encode)?;
        let header = version.header(&meta);
        Ok(ShallowVersion { header, meta })
    }
}

/// All versions of one object plus its inline data.
#[derive(Debug, Clone)]
pub struct XlMetaV2 {
    versions: Vec<ShallowVersion>,
    ids: HashSet<Uuid16>,
    data: Vec<u8>,
    max_versions: usize,
}

impl Default for XlMetaV2 {
    fn default() -> Self {
        Self::new()
    }
}

impl XlMetaV2 {
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    pub fn with_config(config: &Config) -> Self {
        XlMetaV2 {
            versions: Vec::new(),
            ids: HashSet::new(),
            data: Vec::new(),
            max_versions: config.max_versions,
        }
    }

    /// Load any supported layout: indexed, plain or legacy JSON.
    pub fn load(buf: &[u8]) -> Result<Self> {
        Self::load_with_config(buf, &Config::default())
    }

    pub fn load_with_config(buf: &[u8], config: &Config) -> Result<Self> {
        let header = format::read_header(buf).map_err(Error::corrupt)?;
        let mut xl = Self::with_config(config);

        match header.layout {
            Layout::Indexed => {
                let parts = format::split_indexed(&buf[8..]).map_err(Error::corrupt)?;
                let iter = VersionIter::new(parts.blob).map_err(Error::corrupt)?;
                xl.versions.reserve(iter.len());
                for entry in iter {
                    let (header, meta) = entry.map_err(Error::corrupt)?;
                    xl.versions.push(ShallowVersion {
                        header,
                        meta: meta.to_vec(),
                    });
                }
                xl.data = parts.inline.to_vec();
            }
            Layout::Plain => {
                let (maps, inline) = format::split_plain(&buf[8..]).map_err(Error::corrupt)?;
                xl.versions.reserve(maps.len());
                for (i, meta) in maps.into_iter().enumerate() {
                    let version = XlMetaVersion::decode(meta)
                        .with_context(|| format!("failed to parse version {}", i))
                        .map_err(Error::corrupt)?;
                    xl.versions.push(ShallowVersion {
                        header: version.header(meta),
                        meta: meta.to_vec(),
                    });
                }
                xl.data = inline.to_vec();
            }
            Layout::Legacy => {
                let version = legacy::parse_legacy(buf).map_err(Error::corrupt)?;
                xl.versions.push(ShallowVersion::from_version(&version)?);
            }
        }

        xl.ids = xl.versions.iter().map(|v| v.header.version_id).collect();
        let sorted = xl
            .versions
            .windows(2)
            .all(|w| w[0].header.mod_time >= w[1].header.mod_time);
        if !sorted {
            xl.versions
                .sort_by(|a, b| b.header.mod_time.cmp(&a.header.mod_time));
        }

        debug!(
            layout = ?header.layout,
            minor = header.minor,
            versions = xl.versions.len(),
            "loaded xl.meta"
        );
        Ok(xl)
    }

    /// Encode in the indexed layout.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len_hint());
        self.append_to(&mut buf)?;
        Ok(buf)
    }

    pub fn append_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        format::write_indexed(
            buf,
            self.versions.iter().map(|v| (&v.header, v.meta.as_slice())),
            &self.data,
        )
        .map_err(Error::encode)
    }

    fn encoded_len_hint(&self) -> usize {
        64 + self.data.len() + self.versions.iter().map(|v| v.meta.len() + 48).sum::<usize>()
    }

    /// Insert a version, replacing any version with the same id.
    pub fn add_version(&mut self, fi: &FileInfo) -> Result<()> {
        if !fi.deleted && !is_erasure_info_valid(fi.erasure.data_blocks, fi.erasure.parity_blocks) {
            return Err(Error::InvalidErasure {
                data: fi.erasure.data_blocks,
                parity: fi.erasure.parity_blocks,
            });
        }

        let entry = ShallowVersion::from_version(&XlMetaVersion::from_file_info(fi))?;
        match self.position(fi.version_id) {
            Some(pos) => {
                self.versions.remove(pos);
            }
            None if self.versions.len() >= self.max_versions => {
                return Err(Error::MaxVersionsExceeded {
                    max: self.max_versions,
                });
            }
            None => {}
        }

        trace!(
            version_id = %fi.version_id,
            deleted = fi.deleted,
            mod_time = fi.mod_time,
            "add version"
        );
        self.ids.insert(fi.version_id);
        self.insert_sorted(entry);
        Ok(())
    }

    /// Merge metadata and mod time from `fi` into an existing object version.
    pub fn update_object_version(&mut self, fi: &FileInfo) -> Result<()> {
        let pos = self
            .position(fi.version_id)
            .ok_or_else(|| Error::VersionNotFound(fi.version_id_string()))?;

        let mut version = XlMetaVersion::decode(&self.versions[pos].meta).map_err(Error::corrupt)?;
        version.update_from(fi)?;
        let entry = ShallowVersion::from_version(&version)?;

        trace!(version_id = %fi.version_id, "update version");
        if entry.header.mod_time == self.versions[pos].header.mod_time {
            self.versions[pos] = entry;
        } else {
            self.versions.remove(pos);
            self.insert_sorted(entry);
        }
        Ok(())
    }

    /// Remove a version. Returns its data dir when no remaining version uses it.
    pub fn delete_version(&mut self, fi: &FileInfo) -> Result<Option<Uuid16>> {
        let pos = self
            .position(fi.version_id)
            .ok_or_else(|| Error::VersionNotFound(fi.version_id_string()))?;

        let target = &self.versions[pos];
        let data_dir = if target.header.uses_data_dir() {
            version::peek_data_dir(&target.meta).map_err(Error::corrupt)?
        } else {
            None
        };

        let mut shared = false;
        if let Some(dir) = data_dir {
            for (i, v) in self.versions.iter().enumerate() {
                if i == pos || !v.header.uses_data_dir() {
                    continue;
                }
                if version::peek_data_dir(&v.meta).map_err(Error::corrupt)? == Some(dir) {
                    shared = true;
                    break;
                }
            }
        }

        self.versions.remove(pos);
        if self.position(fi.version_id).is_none() {
            self.ids.remove(&fi.version_id);
        }
        trace!(version_id = %fi.version_id, shared, "delete version");
        Ok(data_dir.filter(|_| !shared))
    }

    /// Look up one version. `""` selects the latest, `"null"` the null version.
    pub fn to_file_info(
        &self,
        volume: &str,
        name: &str,
        version_id: &str,
        include_deleted: bool,
        allow_legacy: bool,
    ) -> Result<FileInfo> {
        find_file_info(
            self.entries(),
            volume,
            name,
            version_id,
            include_deleted,
            allow_legacy,
        )
    }

    /// Every version, newest first.
    pub fn list_versions(&self, volume: &str, name: &str, include_deleted: bool) -> Result<Vec<FileInfo>> {
        collect_versions(self.entries(), volume, name, include_deleted)
    }

    /// Number of stored versions, free versions included.
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Headers in stored order.
    pub fn headers(&self) -> impl Iterator<Item = &VersionHeader> {
        self.versions.iter().map(|v| &v.header)
    }

    pub fn latest_mod_time(&self) -> Option<i64> {
        self.versions
            .iter()
            .find(|v| !v.header.is_free_version())
            .map(|v| v.header.mod_time)
    }

    /// Opaque inline data section, carried verbatim.
    pub fn inline_data(&self) -> &[u8] {
        &self.data
    }

    fn entries(&self) -> impl Iterator<Item = anyhow::Result<(VersionHeader, &[u8])>> {
        self.versions
            .iter()
            .map(|v| Ok((v.header, v.meta.as_slice())))
    }

    fn position(&self, version_id: Uuid16) -> Option<usize> {
        if !self.ids.contains(&version_id) {
            return None;
        }
        self.versions
            .iter()
            .position(|v| v.header.version_id == version_id)
    }

    fn insert_sorted(&mut self, entry: ShallowVersion) {
        let mod_time = entry.header.mod_time;
        let pos = self
            .versions
            .partition_point(|v| v.header.mod_time >= mod_time);
        self.versions.insert(pos, entry);
    }
}

/// Select one version from newest-first entries and decode only that one.
pub(crate) fn find_file_info<'a, I>(
    entries: I,
    volume: &str,
    name: &str,
    version_id: &str,
    include_deleted: bool,
    allow_legacy: bool,
) -> Result<FileInfo>
where
    I: Iterator<Item = anyhow::Result<(VersionHeader, &'a [u8])>>,
{
    let selector = VersionSelector::parse(version_id).ok_or(Error::FileNotFound)?;

    let mut num_versions = 0;
    let mut successor = None;
    let mut found = None;
    for entry in entries {
        let (header, meta) = entry.map_err(Error::corrupt)?;
        if header.is_free_version() {
            continue;
        }

        let is_latest = num_versions == 0;
        num_versions += 1;
        if found.is_none() {
            let hit = match selector {
                VersionSelector::Latest => true,
                VersionSelector::Exact(id) => header.version_id == id,
            };
            if hit {
                found = Some((header, meta, is_latest, successor));
            }
        }
        successor = Some(header.mod_time);
    }

    let (header, meta, is_latest, successor_mod_time) = found.ok_or(Error::FileNotFound)?;
    if header.version_type.is_delete_marker() && !include_deleted {
        return Err(Error::FileNotFound);
    }
    if header.version_type.is_legacy() && !allow_legacy {
        return Err(Error::FileNotFound);
    }

    let version = XlMetaVersion::decode(meta).map_err(Error::corrupt)?;
    let mut fi = version.to_file_info(volume, name);
    fi.is_latest = is_latest;
    fi.successor_mod_time = successor_mod_time;
    fi.num_versions = num_versions;
    Ok(fi)
}

/// Decode every eligible entry. Delete markers are filtered by header type.
pub(crate) fn collect_versions<'a, I>(
    entries: I,
    volume: &str,
    name: &str,
    include_deleted: bool,
) -> Result<Vec<FileInfo>>
where
    I: Iterator<Item = anyhow::Result<(VersionHeader, &'a [u8])>>,
{
    let mut out: Vec<FileInfo> = Vec::new();
    let mut num_versions = 0;
    let mut successor = None;

    for entry in entries {
        let (header, meta) = entry.map_err(Error::corrupt)?;
        if header.is_free_version() {
            continue;
        }
        num_versions += 1;
        let successor_mod_time = successor.replace(header.mod_time);
        if header.version_type.is_delete_marker() && !include_deleted {
            continue;
        }

        let version = XlMetaVersion::decode(meta)
            .with_context(|| format!("failed to parse version {}", header.version_id))
            .map_err(Error::corrupt)?;
        let mut fi = version.to_file_info(volume, name);
        fi.successor_mod_time = successor_mod_time;
        out.push(fi);
    }

    for fi in &mut out {
        fi.num_versions = num_versions;
    }
    if let Some(first) = out.first_mut() {
        first.is_latest = true;
    }
    Ok(out)
}
