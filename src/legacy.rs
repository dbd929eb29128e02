//! Single-version JSON layout (`xl.json`), read only.
//!
//! A legacy document converts into one `V1Obj` version. Fields this crate does
//! not model, at any nesting level, are kept as JSON in the same shape as the
//! document and written back inside the version map. Algorithm names without
//! a known code map to code 0 and keep their name there too.

use std::collections::HashMap;

use anyhow::{bail, ensure, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::erasure::{is_erasure_info_valid, ChecksumAlgo, ChecksumInfo, ErasureAlgo, ErasureInfo};
use crate::types::{ObjectPartInfo, Uuid16};
use crate::version::{split_metadata, LegacyStamp, ObjectVersion, RawFields, VersionBody, XlMetaVersion};

const LEGACY_FORMAT: &str = "xl";
const LEGACY_VERSIONS: [&str; 4] = ["1.0.0", "1.0.1", "1.0.2", "1.0.3"];
/// Data dir placeholder written by servers that predate data dirs.
const LEGACY_DATA_DIR: &str = "legacy";
/// Code for algorithm names we cannot map. Never assigned to a real algorithm.
const UNMAPPED_ALGO: u8 = 0;

type Extra = serde_json::Map<String, Value>;

#[derive(Debug, Deserialize)]
struct LegacyMeta {
    version: String,
    format: String,
    #[serde(default)]
    stat: LegacyStat,
    #[serde(default)]
    erasure: LegacyErasure,
    #[serde(default)]
    minio: LegacyRelease,
    #[serde(default)]
    meta: HashMap<String, String>,
    #[serde(default)]
    parts: Vec<LegacyPart>,
    #[serde(default, rename = "versionId")]
    version_id: String,
    #[serde(default, rename = "dataDir")]
    data_dir: String,
    #[serde(flatten)]
    extra: Extra,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyStat {
    #[serde(default)]
    size: i64,
    #[serde(default, rename = "modTime")]
    mod_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    extra: Extra,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyErasure {
    #[serde(default)]
    algorithm: String,
    #[serde(default)]
    data: i32,
    #[serde(default)]
    parity: i32,
    #[serde(default)]
    block_size: i64,
    #[serde(default)]
    index: i32,
    #[serde(default)]
    distribution: Vec<i64>,
    #[serde(default)]
    checksum: Vec<LegacyChecksum>,
    #[serde(flatten)]
    extra: Extra,
}

#[derive(Debug, Deserialize)]
struct LegacyChecksum {
    name: String,
    algorithm: String,
    #[serde(default)]
    hash: String,
    #[serde(flatten)]
    extra: Extra,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyRelease {
    #[serde(default)]
    release: String,
    #[serde(flatten)]
    extra: Extra,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyPart {
    number: i32,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    actual_size: Option<i64>,
    #[serde(default)]
    etag: String,
    #[serde(flatten)]
    extra: Extra,
}

/// True when the first non-whitespace byte opens a JSON object.
pub(crate) fn is_legacy_json(buf: &[u8]) -> bool {
    buf.iter()
        .find(|b| !b.is_ascii_whitespace())
        .map_or(false, |&b| b == b'{')
}

/// Convert a legacy document into a single legacy version.
pub(crate) fn parse_legacy(buf: &[u8]) -> Result<XlMetaVersion> {
    let doc: LegacyMeta = serde_json::from_slice(buf).context("failed to parse legacy json")?;

    ensure!(
        doc.format == LEGACY_FORMAT,
        "unexpected legacy format {:?}",
        doc.format
    );
    ensure!(
        LEGACY_VERSIONS.contains(&doc.version.as_str()),
        "unsupported legacy version {:?}",
        doc.version
    );
    ensure!(
        is_erasure_info_valid(doc.erasure.data, doc.erasure.parity),
        "invalid erasure parameters data={} parity={}",
        doc.erasure.data,
        doc.erasure.parity
    );

    let version_id = match doc.version_id.as_str() {
        "" => Uuid16::NULL,
        s => Uuid16::parse(s).with_context(|| format!("invalid versionId {:?}", s))?,
    };
    let data_dir = match doc.data_dir.as_str() {
        "" | LEGACY_DATA_DIR => Uuid16::NULL,
        s => Uuid16::parse(s).with_context(|| format!("invalid dataDir {:?}", s))?,
    };

    let (erasure, erasure_extra) = convert_erasure(&doc.erasure)?;
    let parts = doc
        .parts
        .iter()
        .map(|p| ObjectPartInfo {
            number: p.number,
            size: p.size,
            actual_size: p.actual_size.unwrap_or(p.size),
            etag: p.etag.clone(),
        })
        .collect();
    let part_extra: Vec<Value> = doc
        .parts
        .iter()
        .filter(|p| !p.extra.is_empty())
        .map(|p| keyed(p.extra.clone(), "number", Value::from(p.number)))
        .collect();

    let mod_time = doc
        .stat
        .mod_time
        .and_then(|t| t.timestamp_nanos_opt())
        .unwrap_or(0);

    let mut extra = doc.extra;
    nest(&mut extra, "stat", doc.stat.extra);
    nest(&mut extra, "erasure", erasure_extra);
    nest(&mut extra, "minio", doc.minio.extra);
    if !part_extra.is_empty() {
        extra.insert("parts".to_string(), Value::Array(part_extra));
    }
    let extra_json = if extra.is_empty() {
        Vec::new()
    } else {
        serde_json::to_vec(&extra).context("failed to keep unknown legacy fields")?
    };

    let (meta_sys, meta_usr) = split_metadata(&doc.meta);
    debug!(
        version = %doc.version,
        parts = doc.parts.len(),
        kept_fields = extra.len(),
        "converted legacy xl.json"
    );

    Ok(XlMetaVersion {
        body: VersionBody::Legacy(ObjectVersion {
            version_id,
            data_dir,
            checksum_algo: erasure.checksums.first().map(|c| c.algorithm),
            erasure,
            parts,
            size: doc.stat.size,
            mod_time,
            meta_sys,
            meta_usr,
            legacy: Some(LegacyStamp {
                format_version: doc.version,
                release: doc.minio.release,
                extra_json,
            }),
            unknown: RawFields::new(),
        }),
        unknown: RawFields::new(),
    })
}

/// Insert `fields` under `key` unless there is nothing to keep.
fn nest(extra: &mut Extra, key: &str, fields: Extra) {
    if !fields.is_empty() {
        extra.insert(key.to_string(), Value::Object(fields));
    }
}

/// `fields` as an object that also names the entry it belongs to.
fn keyed(mut fields: Extra, key: &str, id: Value) -> Value {
    fields.insert(key.to_string(), id);
    Value::Object(fields)
}

/// Erasure description plus the erasure fields it could not express.
fn convert_erasure(ec: &LegacyErasure) -> Result<(ErasureInfo, Extra)> {
    let mut extra = ec.extra.clone();
    let algorithm = match ErasureAlgo::from_name(&ec.algorithm) {
        Some(algorithm) => algorithm,
        None => {
            debug!(algorithm = %ec.algorithm, "unmapped legacy erasure algorithm");
            extra.insert("algorithm".to_string(), Value::from(ec.algorithm.as_str()));
            ErasureAlgo::Unknown(UNMAPPED_ALGO)
        }
    };

    let distribution = ec
        .distribution
        .iter()
        .map(|&d| u8::try_from(d).with_context(|| format!("distribution entry {} out of range", d)))
        .collect::<Result<Vec<u8>>>()?;

    let mut checksums = Vec::with_capacity(ec.checksum.len());
    let mut checksum_extra = Vec::new();
    for c in &ec.checksum {
        let part_number = match c.name.strip_prefix("part.").map(str::parse::<i32>) {
            Some(Ok(n)) => n,
            _ => bail!("invalid checksum name {:?}", c.name),
        };
        let mut kept = c.extra.clone();
        let algorithm = match ChecksumAlgo::from_name(&c.algorithm) {
            Some(algorithm) => algorithm,
            None => {
                debug!(algorithm = %c.algorithm, part = part_number, "unmapped legacy checksum algorithm");
                kept.insert("algorithm".to_string(), Value::from(c.algorithm.as_str()));
                ChecksumAlgo::Unknown(UNMAPPED_ALGO)
            }
        };
        if !kept.is_empty() {
            checksum_extra.push(keyed(kept, "name", Value::from(c.name.as_str())));
        }
        let hash = if c.hash.is_empty() {
            None
        } else {
            Some(hex::decode(&c.hash).with_context(|| format!("invalid checksum hash for {}", c.name))?)
        };
        checksums.push(ChecksumInfo {
            part_number,
            algorithm,
            hash,
        });
    }

    if !checksum_extra.is_empty() {
        extra.insert("checksum".to_string(), Value::Array(checksum_extra));
    }

    let info = ErasureInfo {
        algorithm,
        data_blocks: ec.data,
        parity_blocks: ec.parity,
        block_size: ec.block_size,
        index: ec.index,
        distribution,
        checksums,
    };
    Ok((info, extra))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn legacy_doc() -> serde_json::Value {
        json!({
            "version": "1.0.1",
            "format": "xl",
            "stat": { "size": 1048576, "modTime": "2021-03-04T05:06:07.123456789Z" },
            "erasure": {
                "algorithm": "klauspost/reedsolomon/vandermonde",
                "data": 4,
                "parity": 2,
                "blockSize": 10485760,
                "index": 3,
                "distribution": [3, 4, 5, 6, 1, 2],
                "checksum": [
                    { "name": "part.1", "algorithm": "blake2b", "hash": "deadbeef" }
                ]
            },
            "minio": { "release": "RELEASE.2019-10-12T01-39-57Z" },
            "meta": {
                "content-type": "text/plain",
                "etag": "5eb63bbbe01eeed093cb22bb8f5acdc3",
                "X-Minio-Internal-Server-Side-Encryption-Iv": "abc"
            },
            "parts": [
                { "number": 1, "size": 1048576, "actualSize": 1048576, "etag": "" }
            ],
            "versionId": "",
            "dataDir": "legacy",
            "futureField": { "nested": [1, 2, 3] }
        })
    }

    #[test]
    fn test_is_legacy_json() {
        assert!(is_legacy_json(b"{}"));
        assert!(is_legacy_json(b"  \n\t{\"a\":1}"));
        assert!(!is_legacy_json(b"XL2 "));
        assert!(!is_legacy_json(b""));
        assert!(!is_legacy_json(b"   "));
    }

    #[test]
    fn test_parse_legacy_fields() {
        let buf = serde_json::to_vec(&legacy_doc()).unwrap();
        let version = parse_legacy(&buf).unwrap();
        let fi = version.to_file_info("bucket", "obj");

        assert!(fi.legacy_format);
        assert!(fi.version_id.is_zero());
        assert!(fi.data_dir.is_zero());
        assert_eq!(fi.size, 1048576);
        assert_eq!(fi.mod_time, 1_614_834_367_123_456_789);
        assert_eq!(fi.erasure.data_blocks, 4);
        assert_eq!(fi.erasure.parity_blocks, 2);
        assert_eq!(fi.erasure.index, 3);
        assert_eq!(fi.erasure.distribution, vec![3, 4, 5, 6, 1, 2]);
        assert_eq!(fi.erasure.checksums[0].algorithm, ChecksumAlgo::Blake2b512);
        assert_eq!(fi.erasure.checksums[0].hash.as_deref(), Some(&[0xde, 0xad, 0xbe, 0xef][..]));
        assert_eq!(fi.parts.len(), 1);
        assert_eq!(fi.content_type(), Some("text/plain"));
        assert!(fi
            .metadata
            .contains_key("X-Minio-Internal-Server-Side-Encryption-Iv"));
    }

    #[test]
    fn test_unknown_fields_kept() {
        let buf = serde_json::to_vec(&legacy_doc()).unwrap();
        let version = parse_legacy(&buf).unwrap();
        let stamp = version.object().unwrap().legacy.clone().unwrap();
        assert_eq!(stamp.format_version, "1.0.1");
        assert_eq!(stamp.release, "RELEASE.2019-10-12T01-39-57Z");
        let extra: serde_json::Value = serde_json::from_slice(&stamp.extra_json).unwrap();
        assert_eq!(extra, json!({ "futureField": { "nested": [1, 2, 3] } }));
    }

    #[test]
    fn test_nested_unknown_fields_kept() {
        let mut doc = legacy_doc();
        doc["stat"]["name"] = json!("obj.txt");
        doc["erasure"]["futureKnob"] = json!(7);
        doc["minio"]["build"] = json!("abc");
        doc["parts"][0]["checksum"] = json!("f00d");

        let version = parse_legacy(&serde_json::to_vec(&doc).unwrap()).unwrap();
        let stamp = version.object().unwrap().legacy.clone().unwrap();
        let extra: serde_json::Value = serde_json::from_slice(&stamp.extra_json).unwrap();
        assert_eq!(
            extra,
            json!({
                "futureField": { "nested": [1, 2, 3] },
                "stat": { "name": "obj.txt" },
                "erasure": { "futureKnob": 7 },
                "minio": { "build": "abc" },
                "parts": [{ "number": 1, "checksum": "f00d" }]
            })
        );
    }

    #[test]
    fn test_unmapped_algorithms_kept_by_name() {
        let mut doc = legacy_doc();
        doc["erasure"]["algorithm"] = json!("cauchy-next");
        doc["erasure"]["checksum"] = json!([
            { "name": "part.1", "algorithm": "sha3-512", "hash": "00ff" },
            { "name": "part.2", "algorithm": "sha256", "hash": "" }
        ]);

        let version = parse_legacy(&serde_json::to_vec(&doc).unwrap()).unwrap();
        let obj = version.object().unwrap();
        assert_eq!(obj.erasure.algorithm, ErasureAlgo::Unknown(UNMAPPED_ALGO));
        assert_eq!(obj.erasure.checksums[0].algorithm, ChecksumAlgo::Unknown(UNMAPPED_ALGO));
        assert_eq!(obj.erasure.checksums[0].hash.as_deref(), Some(&[0x00, 0xff][..]));
        assert_eq!(obj.erasure.checksums[1].algorithm, ChecksumAlgo::Sha256);

        let stamp = obj.legacy.clone().unwrap();
        let extra: serde_json::Value = serde_json::from_slice(&stamp.extra_json).unwrap();
        assert_eq!(
            extra["erasure"],
            json!({
                "algorithm": "cauchy-next",
                "checksum": [{ "name": "part.1", "algorithm": "sha3-512" }]
            })
        );
    }

    #[test]
    fn test_rejects_bad_version_and_format() {
        let mut doc = legacy_doc();
        doc["version"] = json!("2.0.0");
        assert!(parse_legacy(&serde_json::to_vec(&doc).unwrap()).is_err());

        let mut doc = legacy_doc();
        doc["format"] = json!("fs");
        assert!(parse_legacy(&serde_json::to_vec(&doc).unwrap()).is_err());
    }

    #[test]
    fn test_rejects_invalid_erasure() {
        let mut doc = legacy_doc();
        doc["erasure"]["parity"] = json!(5);
        let err = parse_legacy(&serde_json::to_vec(&doc).unwrap()).unwrap_err();
        assert!(format!("{:#}", err).contains("invalid erasure parameters"));
    }

    #[test]
    fn test_explicit_ids_and_defaults() {
        let mut doc = legacy_doc();
        doc["versionId"] = json!("756100c6-b393-4981-928a-d49bbc164741");
        doc["dataDir"] = json!("a3c0e8c5-0b5d-4e58-8d7e-4c7c9b1f7e10");
        doc["parts"] = json!([{ "number": 1, "size": 77 }]);
        doc["stat"] = json!({ "size": 77 });
        let fi = parse_legacy(&serde_json::to_vec(&doc).unwrap())
            .unwrap()
            .to_file_info("b", "o");
        assert_eq!(fi.version_id_string(), "756100c6-b393-4981-928a-d49bbc164741");
        assert_eq!(fi.data_dir_string(), "a3c0e8c5-0b5d-4e58-8d7e-4c7c9b1f7e10");
        assert_eq!(fi.parts[0].actual_size, 77);
        assert_eq!(fi.mod_time, 0);
    }

    #[test]
    fn test_rejects_bad_checksum_name() {
        let mut doc = legacy_doc();
        doc["erasure"]["checksum"][0]["name"] = json!("chunk-1");
        assert!(parse_legacy(&serde_json::to_vec(&doc).unwrap()).is_err());
    }
}
