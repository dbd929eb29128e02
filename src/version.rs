//! Version entries stored inside xl.meta.
//!
//! Each entry is a pair of msgpack blobs: a small fixed [`VersionHeader`]
//! (id, mod time, type, flags) that doubles as the lookup index, and the
//! version map itself:
//!
//! ```text
//! {"Type": u8, "V2Obj" | "V1Obj" | "DelObj": {...}, ...}
//! ```
//!
//! Map keys this crate does not know are kept as raw msgpack and written back
//! unchanged.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;

use anyhow::{bail, ensure, Context, Result};
use rmp::encode;
use xxhash_rust::xxh64;

use crate::erasure::{ChecksumAlgo, ChecksumInfo, ErasureAlgo, ErasureInfo};
use crate::error::Error;
use crate::msgp;
use crate::types::{FileInfo, ObjectPartInfo, Uuid16, VersionType};

/// Metadata keys with this prefix are system metadata.
pub const RESERVED_METADATA_PREFIX: &str = "x-minio-internal-";
/// System key marking a version whose data lives inside xl.meta.
pub const INLINE_DATA_KEY: &str = "x-minio-internal-inline-data";
/// System key marking a delete marker kept only for remote tier cleanup.
pub const FREE_VERSION_KEY: &str = "x-minio-internal-free-version";

pub(crate) const FLAG_FREE_VERSION: u8 = 1 << 0;
pub(crate) const FLAG_USES_DATA_DIR: u8 = 1 << 1;
pub(crate) const FLAG_INLINE_DATA: u8 = 1 << 2;

/// Map entries we do not interpret: (key, raw msgpack value).
pub(crate) type RawFields = Vec<(String, Vec<u8>)>;

/// Fixed-size summary of one version, readable without touching the version map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionHeader {
    pub version_id: Uuid16,
    pub mod_time: i64,
    /// Low 32 bits of xxh64 over the encoded version map.
    pub signature: [u8; 4],
    pub version_type: VersionType,
    pub flags: u8,
    pub ec_n: u8,
    pub ec_m: u8,
}

impl VersionHeader {
    pub fn is_free_version(&self) -> bool {
        self.flags & FLAG_FREE_VERSION != 0
    }

    pub fn uses_data_dir(&self) -> bool {
        self.flags & FLAG_USES_DATA_DIR != 0
    }

    pub fn has_inline_data(&self) -> bool {
        self.flags & FLAG_INLINE_DATA != 0
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        encode::write_array_len(buf, 7)?;
        encode::write_bin(buf, &self.version_id.0)?;
        encode::write_sint(buf, self.mod_time)?;
        encode::write_bin(buf, &self.signature)?;
        encode::write_uint(buf, u64::from(self.version_type.to_u8()))?;
        encode::write_uint(buf, u64::from(self.flags))?;
        encode::write_uint(buf, u64::from(self.ec_n))?;
        encode::write_uint(buf, u64::from(self.ec_m))?;
        Ok(())
    }

    /// Accepts the 7-field header and the older 5-field one (no EcN/EcM).
    pub(crate) fn decode(data: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(data);
        let fields = msgp::read_array_len(&mut cur).context("failed to read header array")?;
        ensure!(
            fields == 5 || fields == 7,
            "unexpected version header length {}",
            fields
        );

        let version_id = msgp::read_uuid(&mut cur).context("failed to read version id")?;
        let mod_time = msgp::read_int(&mut cur).context("failed to read mod time")?;
        let sig = msgp::read_bin_slice(&mut cur).context("failed to read signature")?;
        ensure!(sig.len() == 4, "signature must be 4 bytes, got {}", sig.len());
        let mut signature = [0u8; 4];
        signature.copy_from_slice(sig);

        let type_byte = msgp::read_u8_value(&mut cur).context("failed to read version type")?;
        let version_type = VersionType::from_u8(type_byte);
        ensure!(version_type.is_valid(), "invalid version type {}", type_byte);
        let flags = msgp::read_u8_value(&mut cur).context("failed to read flags")?;

        let (ec_n, ec_m) = if fields == 7 {
            (
                msgp::read_u8_value(&mut cur).context("failed to read EcN")?,
                msgp::read_u8_value(&mut cur).context("failed to read EcM")?,
            )
        } else {
            (0, 0)
        };
        ensure!(
            cur.position() as usize == data.len(),
            "trailing bytes after version header"
        );

        Ok(VersionHeader {
            version_id,
            mod_time,
            signature,
            version_type,
            flags,
            ec_n,
            ec_m,
        })
    }
}

/// Fields carried over from the single-version JSON layout.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct LegacyStamp {
    pub format_version: String,
    pub release: String,
    /// Top-level JSON fields we do not model, re-serialized as JSON.
    pub extra_json: Vec<u8>,
}

/// Object version (`V2Obj`), also used for converted legacy records (`V1Obj`).
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct ObjectVersion {
    pub version_id: Uuid16,
    pub data_dir: Uuid16,
    pub erasure: ErasureInfo,
    /// `CSumAlgo` as stored; kept even when there are no per-part checksums.
    pub checksum_algo: Option<ChecksumAlgo>,
    pub parts: Vec<ObjectPartInfo>,
    pub size: i64,
    pub mod_time: i64,
    pub meta_sys: BTreeMap<String, Vec<u8>>,
    pub meta_usr: BTreeMap<String, String>,
    pub legacy: Option<LegacyStamp>,
    pub unknown: RawFields,
}

impl ObjectVersion {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        let has_checksums = !self.erasure.checksums.is_empty();
        let mut fields = 16 + self.unknown.len();
        fields += usize::from(self.checksum_algo.is_some()) + usize::from(has_checksums);
        if let Some(stamp) = &self.legacy {
            fields += 2 + usize::from(!stamp.extra_json.is_empty());
        }
        encode::write_map_len(buf, fields as u32)?;

        encode::write_str(buf, "ID")?;
        encode::write_bin(buf, &self.version_id.0)?;
        encode::write_str(buf, "DDir")?;
        encode::write_bin(buf, &self.data_dir.0)?;

        let ec = &self.erasure;
        encode::write_str(buf, "EcAlgo")?;
        encode::write_uint(buf, u64::from(ec.algorithm.to_u8()))?;
        encode::write_str(buf, "EcM")?;
        encode::write_sint(buf, i64::from(ec.data_blocks))?;
        encode::write_str(buf, "EcN")?;
        encode::write_sint(buf, i64::from(ec.parity_blocks))?;
        encode::write_str(buf, "EcBSize")?;
        encode::write_sint(buf, ec.block_size)?;
        encode::write_str(buf, "EcIndex")?;
        encode::write_sint(buf, i64::from(ec.index))?;
        encode::write_str(buf, "EcDist")?;
        encode::write_array_len(buf, ec.distribution.len() as u32)?;
        for &d in &ec.distribution {
            encode::write_uint(buf, u64::from(d))?;
        }

        if let Some(algorithm) = self.checksum_algo {
            encode::write_str(buf, "CSumAlgo")?;
            encode::write_uint(buf, u64::from(algorithm.to_u8()))?;
        }
        if has_checksums {
            encode::write_str(buf, "PartCSums")?;
            encode::write_array_len(buf, ec.checksums.len() as u32)?;
            for c in &ec.checksums {
                encode::write_array_len(buf, 3)?;
                encode::write_sint(buf, i64::from(c.part_number))?;
                encode::write_uint(buf, u64::from(c.algorithm.to_u8()))?;
                match &c.hash {
                    Some(h) => encode::write_bin(buf, h)?,
                    None => encode::write_nil(buf)?,
                }
            }
        }

        encode::write_str(buf, "PartNums")?;
        encode::write_array_len(buf, self.parts.len() as u32)?;
        for p in &self.parts {
            encode::write_sint(buf, i64::from(p.number))?;
        }
        encode::write_str(buf, "PartETags")?;
        encode::write_array_len(buf, self.parts.len() as u32)?;
        for p in &self.parts {
            encode::write_str(buf, &p.etag)?;
        }
        encode::write_str(buf, "PartSizes")?;
        encode::write_array_len(buf, self.parts.len() as u32)?;
        for p in &self.parts {
            encode::write_sint(buf, p.size)?;
        }
        encode::write_str(buf, "PartASizes")?;
        encode::write_array_len(buf, self.parts.len() as u32)?;
        for p in &self.parts {
            encode::write_sint(buf, p.actual_size)?;
        }

        encode::write_str(buf, "Size")?;
        encode::write_sint(buf, self.size)?;
        encode::write_str(buf, "MTime")?;
        encode::write_sint(buf, self.mod_time)?;
        encode::write_str(buf, "MetaSys")?;
        write_bytes_map(buf, &self.meta_sys)?;
        encode::write_str(buf, "MetaUsr")?;
        encode::write_map_len(buf, self.meta_usr.len() as u32)?;
        for (k, v) in &self.meta_usr {
            encode::write_str(buf, k)?;
            encode::write_str(buf, v)?;
        }

        if let Some(stamp) = &self.legacy {
            encode::write_str(buf, "V1Ver")?;
            encode::write_str(buf, &stamp.format_version)?;
            encode::write_str(buf, "V1Rel")?;
            encode::write_str(buf, &stamp.release)?;
            if !stamp.extra_json.is_empty() {
                encode::write_str(buf, "V1Extra")?;
                encode::write_bin(buf, &stamp.extra_json)?;
            }
        }

        write_raw_fields(buf, &self.unknown)
    }

    fn decode(cur: &mut Cursor<&[u8]>) -> Result<Self> {
        let map_len = msgp::read_map_len(cur).context("failed to read object map header")?;
        let mut obj = ObjectVersion::default();

        let mut part_numbers: Vec<i32> = Vec::new();
        let mut part_etags: Vec<String> = Vec::new();
        let mut part_sizes: Vec<i64> = Vec::new();
        let mut part_actual_sizes: Vec<i64> = Vec::new();
        let mut checksum_algo: Option<ChecksumAlgo> = None;
        let mut checksums: Option<Vec<ChecksumInfo>> = None;
        let mut stamp: Option<LegacyStamp> = None;

        for _ in 0..map_len {
            let key = msgp::read_string(cur).context("failed to read object key")?;

            match key.as_str() {
                "ID" => obj.version_id = msgp::read_uuid(cur).context("failed to read ID")?,
                "DDir" => obj.data_dir = msgp::read_uuid(cur).context("failed to read DDir")?,
                "EcAlgo" => {
                    let v = msgp::read_u8_value(cur).context("failed to read EcAlgo")?;
                    obj.erasure.algorithm = ErasureAlgo::from_u8(v);
                }
                "EcM" => obj.erasure.data_blocks = msgp::read_i32(cur).context("failed to read EcM")?,
                "EcN" => {
                    obj.erasure.parity_blocks = msgp::read_i32(cur).context("failed to read EcN")?
                }
                "EcBSize" => obj.erasure.block_size = msgp::read_int(cur).context("failed to read EcBSize")?,
                "EcIndex" => obj.erasure.index = msgp::read_i32(cur).context("failed to read EcIndex")?,
                "EcDist" => {
                    obj.erasure.distribution =
                        read_array(cur, msgp::read_u8_value).context("failed to read EcDist")?
                }
                "CSumAlgo" => {
                    let v = msgp::read_u8_value(cur).context("failed to read CSumAlgo")?;
                    checksum_algo = Some(ChecksumAlgo::from_u8(v));
                }
                "PartCSums" => {
                    checksums = Some(read_array(cur, read_checksum).context("failed to read PartCSums")?)
                }
                "PartNums" => {
                    part_numbers = read_array(cur, msgp::read_i32).context("failed to read PartNums")?
                }
                "PartETags" => {
                    part_etags = read_array(cur, msgp::read_string).context("failed to read PartETags")?
                }
                "PartSizes" => {
                    part_sizes = read_array(cur, msgp::read_int).context("failed to read PartSizes")?
                }
                "PartASizes" => {
                    part_actual_sizes =
                        read_array(cur, msgp::read_int).context("failed to read PartASizes")?
                }
                "Size" => obj.size = msgp::read_int(cur).context("failed to read Size")?,
                "MTime" => obj.mod_time = msgp::read_int(cur).context("failed to read MTime")?,
                "MetaSys" => obj.meta_sys = read_bytes_map(cur).context("failed to read MetaSys")?,
                "MetaUsr" => obj.meta_usr = read_string_map(cur).context("failed to read MetaUsr")?,
                "V1Ver" => {
                    stamp.get_or_insert_with(LegacyStamp::default).format_version =
                        msgp::read_string(cur).context("failed to read V1Ver")?
                }
                "V1Rel" => {
                    stamp.get_or_insert_with(LegacyStamp::default).release =
                        msgp::read_string(cur).context("failed to read V1Rel")?
                }
                "V1Extra" => {
                    stamp.get_or_insert_with(LegacyStamp::default).extra_json =
                        msgp::read_bin(cur).context("failed to read V1Extra")?
                }
                _ => {
                    let raw = msgp::read_raw_value(cur)
                        .with_context(|| format!("failed to skip object field {}", key))?;
                    obj.unknown.push((key, raw.to_vec()));
                }
            }
        }

        ensure!(
            part_sizes.len() == part_numbers.len(),
            "part sizes ({}) do not match part numbers ({})",
            part_sizes.len(),
            part_numbers.len()
        );
        obj.parts = part_numbers
            .iter()
            .enumerate()
            .map(|(i, &number)| {
                let size = part_sizes[i];
                ObjectPartInfo {
                    number,
                    size,
                    actual_size: part_actual_sizes.get(i).copied().unwrap_or(size),
                    etag: part_etags.get(i).cloned().unwrap_or_default(),
                }
            })
            .collect();

        // Older writers only record the algorithm; hashes are streamed with the shards.
        obj.erasure.checksums = match (checksums, checksum_algo) {
            (Some(c), _) => c,
            (None, Some(algorithm)) => obj
                .parts
                .iter()
                .map(|p| ChecksumInfo {
                    part_number: p.number,
                    algorithm,
                    hash: None,
                })
                .collect(),
            (None, None) => Vec::new(),
        };
        obj.checksum_algo = checksum_algo;
        obj.legacy = stamp;

        Ok(obj)
    }
}

/// Delete marker (`DelObj`).
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct DeleteMarker {
    pub version_id: Uuid16,
    pub mod_time: i64,
    pub meta_sys: BTreeMap<String, Vec<u8>>,
    pub unknown: RawFields,
}

impl DeleteMarker {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        encode::write_map_len(buf, (3 + self.unknown.len()) as u32)?;
        encode::write_str(buf, "ID")?;
        encode::write_bin(buf, &self.version_id.0)?;
        encode::write_str(buf, "MTime")?;
        encode::write_sint(buf, self.mod_time)?;
        encode::write_str(buf, "MetaSys")?;
        write_bytes_map(buf, &self.meta_sys)?;
        write_raw_fields(buf, &self.unknown)
    }

    fn decode(cur: &mut Cursor<&[u8]>) -> Result<Self> {
        let map_len = msgp::read_map_len(cur).context("failed to read DelObj map header")?;
        let mut dm = DeleteMarker::default();

        for _ in 0..map_len {
            let key = msgp::read_string(cur).context("failed to read DelObj key")?;

            match key.as_str() {
                "ID" => dm.version_id = msgp::read_uuid(cur).context("failed to read ID")?,
                "MTime" => dm.mod_time = msgp::read_int(cur).context("failed to read MTime")?,
                "MetaSys" => dm.meta_sys = read_bytes_map(cur).context("failed to read MetaSys")?,
                _ => {
                    let raw = msgp::read_raw_value(cur)
                        .with_context(|| format!("failed to skip DelObj field {}", key))?;
                    dm.unknown.push((key, raw.to_vec()));
                }
            }
        }

        Ok(dm)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum VersionBody {
    Object(ObjectVersion),
    DeleteMarker(DeleteMarker),
    Legacy(ObjectVersion),
}

/// One decoded version map.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct XlMetaVersion {
    pub body: VersionBody,
    pub unknown: RawFields,
}

impl XlMetaVersion {
    pub fn version_type(&self) -> VersionType {
        match self.body {
            VersionBody::Object(_) => VersionType::Object,
            VersionBody::DeleteMarker(_) => VersionType::DeleteMarker,
            VersionBody::Legacy(_) => VersionType::Legacy,
        }
    }

    pub fn version_id(&self) -> Uuid16 {
        match &self.body {
            VersionBody::Object(o) | VersionBody::Legacy(o) => o.version_id,
            VersionBody::DeleteMarker(d) => d.version_id,
        }
    }

    pub fn mod_time(&self) -> i64 {
        match &self.body {
            VersionBody::Object(o) | VersionBody::Legacy(o) => o.mod_time,
            VersionBody::DeleteMarker(d) => d.mod_time,
        }
    }

    pub fn object(&self) -> Option<&ObjectVersion> {
        match &self.body {
            VersionBody::Object(o) | VersionBody::Legacy(o) => Some(o),
            VersionBody::DeleteMarker(_) => None,
        }
    }

    /// Data directory holding shards, if this version has one.
    pub fn data_dir(&self) -> Option<Uuid16> {
        self.object()
            .map(|o| o.data_dir)
            .filter(|d| !d.is_zero())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(256);
        encode::write_map_len(&mut buf, (2 + self.unknown.len()) as u32)?;
        encode::write_str(&mut buf, "Type")?;
        encode::write_uint(&mut buf, u64::from(self.version_type().to_u8()))?;
        match &self.body {
            VersionBody::Object(o) => {
                encode::write_str(&mut buf, "V2Obj")?;
                o.encode(&mut buf)?;
            }
            VersionBody::Legacy(o) => {
                encode::write_str(&mut buf, "V1Obj")?;
                o.encode(&mut buf)?;
            }
            VersionBody::DeleteMarker(d) => {
                encode::write_str(&mut buf, "DelObj")?;
                d.encode(&mut buf)?;
            }
        }
        write_raw_fields(&mut buf, &self.unknown)?;
        Ok(buf)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(data);
        let map_len = msgp::read_map_len(&mut cur).context("failed to read version map header")?;

        let mut version_type: Option<u8> = None;
        let mut bodies: Vec<(String, &[u8])> = Vec::new();
        let mut unknown = RawFields::new();

        for _ in 0..map_len {
            let key = msgp::read_string(&mut cur).context("failed to read map key")?;

            match key.as_str() {
                "Type" => {
                    version_type = Some(msgp::read_u8_value(&mut cur).context("failed to read Type")?);
                }
                "V2Obj" | "V1Obj" | "DelObj" => {
                    let raw = msgp::read_raw_value(&mut cur)
                        .with_context(|| format!("failed to read {}", key))?;
                    bodies.push((key, raw));
                }
                _ => {
                    let raw = msgp::read_raw_value(&mut cur)
                        .with_context(|| format!("failed to skip field {}", key))?;
                    unknown.push((key, raw.to_vec()));
                }
            }
        }
        ensure!(
            cur.position() as usize == data.len(),
            "trailing bytes after version map"
        );

        let type_byte = version_type.context("version map has no Type")?;
        let wanted = match VersionType::from_u8(type_byte) {
            VersionType::Object => "V2Obj",
            VersionType::DeleteMarker => "DelObj",
            VersionType::Legacy => "V1Obj",
            VersionType::Unknown => bail!("invalid version type {}", type_byte),
        };

        let mut body = None;
        for (key, raw) in bodies {
            if key != wanted || raw == &[0xc0][..] {
                // nil or mismatched bodies are carried, not interpreted
                unknown.push((key, raw.to_vec()));
                continue;
            }
            let mut body_cur = Cursor::new(raw);
            body = Some(match key.as_str() {
                "V2Obj" => VersionBody::Object(
                    ObjectVersion::decode(&mut body_cur).context("failed to parse V2Obj")?,
                ),
                "V1Obj" => VersionBody::Legacy(
                    ObjectVersion::decode(&mut body_cur).context("failed to parse V1Obj")?,
                ),
                _ => VersionBody::DeleteMarker(
                    DeleteMarker::decode(&mut body_cur).context("failed to parse DelObj")?,
                ),
            });
        }
        let body = body.with_context(|| format!("version of type {} has no {}", type_byte, wanted))?;

        Ok(XlMetaVersion { body, unknown })
    }

    /// Header describing this version; `meta` is its encoded form.
    pub fn header(&self, meta: &[u8]) -> VersionHeader {
        let mut flags = 0;
        let (mut ec_n, mut ec_m) = (0, 0);
        match &self.body {
            VersionBody::Object(o) | VersionBody::Legacy(o) => {
                if !o.data_dir.is_zero() {
                    flags |= FLAG_USES_DATA_DIR;
                }
                if o.meta_sys.get(INLINE_DATA_KEY).map(Vec::as_slice) == Some(b"true".as_slice()) {
                    flags |= FLAG_INLINE_DATA;
                }
                ec_n = u8::try_from(o.erasure.parity_blocks).unwrap_or(0);
                ec_m = u8::try_from(o.erasure.data_blocks).unwrap_or(0);
            }
            VersionBody::DeleteMarker(d) => {
                if d.meta_sys.contains_key(FREE_VERSION_KEY) {
                    flags |= FLAG_FREE_VERSION;
                }
            }
        }
        VersionHeader {
            version_id: self.version_id(),
            mod_time: self.mod_time(),
            signature: signature(meta),
            version_type: self.version_type(),
            flags,
            ec_n,
            ec_m,
        }
    }

    /// Build a version from a caller-supplied record. `is_latest` and
    /// `legacy_format` are ignored: new versions always use the current shape.
    pub fn from_file_info(fi: &FileInfo) -> Self {
        let (meta_sys, meta_usr) = split_metadata(&fi.metadata);
        let body = if fi.deleted {
            VersionBody::DeleteMarker(DeleteMarker {
                version_id: fi.version_id,
                mod_time: fi.mod_time,
                meta_sys,
                unknown: RawFields::new(),
            })
        } else {
            VersionBody::Object(ObjectVersion {
                version_id: fi.version_id,
                data_dir: fi.data_dir,
                erasure: fi.erasure.clone(),
                checksum_algo: fi.erasure.checksums.first().map(|c| c.algorithm),
                parts: fi.parts.clone(),
                size: fi.size,
                mod_time: fi.mod_time,
                meta_sys,
                meta_usr,
                legacy: None,
                unknown: RawFields::new(),
            })
        };
        XlMetaVersion {
            body,
            unknown: RawFields::new(),
        }
    }

    pub fn to_file_info(&self, volume: &str, name: &str) -> FileInfo {
        let mut fi = FileInfo {
            volume: volume.to_string(),
            name: name.to_string(),
            ..Default::default()
        };
        match &self.body {
            VersionBody::DeleteMarker(d) => {
                fi.version_id = d.version_id;
                fi.mod_time = d.mod_time;
                fi.deleted = true;
                fi.metadata = join_metadata(&d.meta_sys, None);
            }
            VersionBody::Object(o) | VersionBody::Legacy(o) => {
                fi.version_id = o.version_id;
                fi.mod_time = o.mod_time;
                fi.size = o.size;
                fi.data_dir = o.data_dir;
                fi.legacy_format = matches!(self.body, VersionBody::Legacy(_));
                fi.metadata = join_metadata(&o.meta_sys, Some(&o.meta_usr));
                fi.parts = o.parts.clone();
                fi.erasure = o.erasure.clone();
            }
        }
        fi
    }

    /// Merge metadata from `fi` and move the mod time when one is given.
    pub fn update_from(&mut self, fi: &FileInfo) -> crate::error::Result<()> {
        match &mut self.body {
            VersionBody::DeleteMarker(_) => Err(Error::MethodNotAllowed(format!(
                "version {} is a delete marker",
                fi.version_id_string()
            ))),
            VersionBody::Object(o) | VersionBody::Legacy(o) => {
                for (k, v) in &fi.metadata {
                    if is_reserved_key(k) {
                        o.meta_sys.insert(k.clone(), v.as_bytes().to_vec());
                    } else {
                        o.meta_usr.insert(k.clone(), v.clone());
                    }
                }
                if fi.mod_time != 0 {
                    o.mod_time = fi.mod_time;
                }
                Ok(())
            }
        }
    }
}

/// Find the data dir of an encoded version without decoding the rest of it.
pub(crate) fn peek_data_dir(meta: &[u8]) -> Result<Option<Uuid16>> {
    let mut cur = Cursor::new(meta);
    let map_len = msgp::read_map_len(&mut cur)?;
    for _ in 0..map_len {
        let key = msgp::read_string(&mut cur)?;
        if (key == "V2Obj" || key == "V1Obj") && !msgp::try_read_nil(&mut cur) {
            let fields = msgp::read_map_len(&mut cur)?;
            for _ in 0..fields {
                let field = msgp::read_string(&mut cur)?;
                if field == "DDir" {
                    let dir = msgp::read_uuid(&mut cur)?;
                    return Ok(Some(dir).filter(|d| !d.is_zero()));
                }
                msgp::skip_value(&mut cur)?;
            }
        } else {
            msgp::skip_value(&mut cur)?;
        }
    }
    Ok(None)
}

pub(crate) fn signature(meta: &[u8]) -> [u8; 4] {
    (xxh64::xxh64(meta, 0) as u32).to_le_bytes()
}

pub(crate) fn is_reserved_key(key: &str) -> bool {
    key.as_bytes()
        .get(..RESERVED_METADATA_PREFIX.len())
        .map_or(false, |p| p.eq_ignore_ascii_case(RESERVED_METADATA_PREFIX.as_bytes()))
}

/// Split caller metadata into system (bytes) and user (string) maps.
pub(crate) fn split_metadata(
    metadata: &HashMap<String, String>,
) -> (BTreeMap<String, Vec<u8>>, BTreeMap<String, String>) {
    let mut sys = BTreeMap::new();
    let mut usr = BTreeMap::new();
    for (k, v) in metadata {
        if is_reserved_key(k) {
            sys.insert(k.clone(), v.as_bytes().to_vec());
        } else {
            usr.insert(k.clone(), v.clone());
        }
    }
    (sys, usr)
}

fn join_metadata(
    sys: &BTreeMap<String, Vec<u8>>,
    usr: Option<&BTreeMap<String, String>>,
) -> HashMap<String, String> {
    let mut out = HashMap::with_capacity(sys.len() + usr.map_or(0, BTreeMap::len));
    if let Some(usr) = usr {
        out.extend(usr.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    for (k, v) in sys {
        if is_reserved_key(k) {
            out.insert(k.clone(), String::from_utf8_lossy(v).into_owned());
        }
    }
    out
}

fn read_array<T>(
    cur: &mut Cursor<&[u8]>,
    mut read: impl FnMut(&mut Cursor<&[u8]>) -> Result<T>,
) -> Result<Vec<T>> {
    if msgp::try_read_nil(cur) {
        return Ok(Vec::new());
    }
    let len = msgp::read_array_len(cur)?;
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        out.push(read(cur).with_context(|| format!("element {}", i))?);
    }
    Ok(out)
}

fn read_checksum(cur: &mut Cursor<&[u8]>) -> Result<ChecksumInfo> {
    let fields = msgp::read_array_len(cur)?;
    ensure!(fields == 3, "checksum entry has {} fields, expected 3", fields);
    let part_number = msgp::read_i32(cur).context("failed to read part number")?;
    let algorithm = ChecksumAlgo::from_u8(msgp::read_u8_value(cur).context("failed to read algorithm")?);
    let hash = if msgp::try_read_nil(cur) {
        None
    } else {
        Some(msgp::read_bin(cur).context("failed to read hash")?)
    };
    Ok(ChecksumInfo {
        part_number,
        algorithm,
        hash,
    })
}

/// Parse a msgpack map[string]string, handling both StrType and BinType values.
fn read_string_map(cur: &mut Cursor<&[u8]>) -> Result<BTreeMap<String, String>> {
    let mut result = BTreeMap::new();
    if msgp::try_read_nil(cur) {
        return Ok(result);
    }
    let map_len = msgp::read_map_len(cur)?;

    for _ in 0..map_len {
        let key = msgp::read_string(cur)?;
        if msgp::try_read_nil(cur) {
            continue;
        }

        let marker = msgp::peek_marker(cur)?;
        let val = if msgp::is_str_marker(marker) {
            msgp::read_string(cur)?
        } else if msgp::is_bin_marker(marker) {
            String::from_utf8_lossy(msgp::read_bin_slice(cur)?).into_owned()
        } else {
            bail!("metadata value for {} has marker 0x{:02x}", key, marker)
        };

        result.insert(key, val);
    }

    Ok(result)
}

/// Parse a msgpack map[string][]byte; string values are taken as bytes.
fn read_bytes_map(cur: &mut Cursor<&[u8]>) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut result = BTreeMap::new();
    if msgp::try_read_nil(cur) {
        return Ok(result);
    }
    let map_len = msgp::read_map_len(cur)?;

    for _ in 0..map_len {
        let key = msgp::read_string(cur)?;
        if msgp::try_read_nil(cur) {
            result.insert(key, Vec::new());
            continue;
        }
        let marker = msgp::peek_marker(cur)?;
        let val = if msgp::is_str_marker(marker) {
            msgp::read_string(cur)?.into_bytes()
        } else {
            msgp::read_bin(cur)?
        };
        result.insert(key, val);
    }

    Ok(result)
}

fn write_bytes_map(buf: &mut Vec<u8>, map: &BTreeMap<String, Vec<u8>>) -> Result<()> {
    encode::write_map_len(buf, map.len() as u32)?;
    for (k, v) in map {
        encode::write_str(buf, k)?;
        encode::write_bin(buf, v)?;
    }
    Ok(())
}

fn write_raw_fields(buf: &mut Vec<u8>, fields: &RawFields) -> Result<()> {
    for (k, raw) in fields {
        encode::write_str(buf, k)?;
        buf.extend_from_slice(raw);
    }
    Ok(())
}
