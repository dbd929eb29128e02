use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::erasure::ErasureInfo;
use crate::error::Error;

/// 16-byte UUID as used by MinIO (raw bytes, not standard UUID format)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Uuid16(pub [u8; 16]);

impl Uuid16 {
    /// The reserved "null" version of objects written before versioning.
    pub const NULL: Uuid16 = Uuid16([0u8; 16]);

    /// Format as MinIO-style UUID string: "xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx"
    pub fn to_uuid_string(&self) -> String {
        let b = &self.0;
        format!(
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3],
            b[4], b[5],
            b[6], b[7],
            b[8], b[9],
            b[10], b[11], b[12], b[13], b[14], b[15],
        )
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 16]
    }

    /// Parse the hyphenated 36-character form.
    pub fn parse(s: &str) -> Option<Uuid16> {
        let bytes = s.as_bytes();
        if bytes.len() != 36 {
            return None;
        }
        for pos in [8, 13, 18, 23] {
            if bytes[pos] != b'-' {
                return None;
            }
        }
        let compact: String = s.chars().filter(|c| *c != '-').collect();
        let mut out = [0u8; 16];
        hex::decode_to_slice(compact, &mut out).ok()?;
        Some(Uuid16(out))
    }

    pub(crate) fn from_slice(b: &[u8]) -> Option<Uuid16> {
        let arr: [u8; 16] = b.try_into().ok()?;
        Some(Uuid16(arr))
    }
}

impl FromStr for Uuid16 {
    type Err = Error;

    /// Accepts the hyphenated form and the literal `"null"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == NULL_VERSION_ID {
            return Ok(Uuid16::NULL);
        }
        Uuid16::parse(s).ok_or_else(|| Error::VersionNotFound(s.to_string()))
    }
}

impl fmt::Debug for Uuid16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uuid16({})", self.to_uuid_string())
    }
}

impl fmt::Display for Uuid16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uuid_string())
    }
}

/// Version id string naming the pre-versioning object.
pub const NULL_VERSION_ID: &str = "null";

/// Which version a query refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VersionSelector {
    Latest,
    Exact(Uuid16),
}

impl VersionSelector {
    /// `""` selects the latest version, `"null"` the null version.
    pub(crate) fn parse(version_id: &str) -> Option<Self> {
        match version_id {
            "" => Some(VersionSelector::Latest),
            NULL_VERSION_ID => Some(VersionSelector::Exact(Uuid16::NULL)),
            s => Uuid16::parse(s).map(VersionSelector::Exact),
        }
    }
}

/// Version type from xl.meta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionType {
    #[default]
    Unknown = 0,
    Object = 1,
    DeleteMarker = 2,
    Legacy = 3,
}

impl VersionType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => VersionType::Object,
            2 => VersionType::DeleteMarker,
            3 => VersionType::Legacy,
            _ => VersionType::Unknown,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, VersionType::Unknown)
    }

    pub fn is_object(&self) -> bool {
        matches!(self, VersionType::Object)
    }

    pub fn is_delete_marker(&self) -> bool {
        matches!(self, VersionType::DeleteMarker)
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, VersionType::Legacy)
    }
}

/// Metadata for a single part of a multipart object
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectPartInfo {
    pub number: i32,
    /// Stored (possibly compressed or encrypted) size.
    pub size: i64,
    /// Size before compression or encryption.
    pub actual_size: i64,
    pub etag: String,
}

/// One version of an object as seen by callers.
///
/// `is_latest`, `successor_mod_time` and `num_versions` are derived from the
/// container's ordering on every read; values supplied by callers are ignored.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileInfo {
    pub volume: String,
    pub name: String,

    pub version_id: Uuid16,
    pub is_latest: bool,
    /// Delete marker rather than live data.
    pub deleted: bool,

    /// Nanoseconds since the Unix epoch.
    pub mod_time: i64,
    /// Mod time of the next newer version, if there is one.
    pub successor_mod_time: Option<i64>,

    pub size: i64,
    pub data_dir: Uuid16,
    /// Converted from the single-version legacy layout.
    pub legacy_format: bool,

    pub metadata: HashMap<String, String>,
    pub parts: Vec<ObjectPartInfo>,
    pub erasure: ErasureInfo,

    pub num_versions: usize,
}

impl FileInfo {
    /// Version id as callers spell it: `"null"` for the null version.
    pub fn version_id_string(&self) -> String {
        if self.version_id.is_zero() {
            NULL_VERSION_ID.to_string()
        } else {
            self.version_id.to_uuid_string()
        }
    }

    /// Data directory as UUID string
    pub fn data_dir_string(&self) -> String {
        self.data_dir.to_uuid_string()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.metadata.get("content-type").map(String::as_str)
    }

    pub fn etag(&self) -> Option<&str> {
        self.metadata.get("etag").map(String::as_str)
    }
}
