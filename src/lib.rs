//! minio-xlmeta: MinIO's per-object versioned metadata format
//!
//! An `xl.meta` file records every version of one object (including delete
//! markers) together with its erasure-coding layout and part sizes:
//! - [`XlMetaV2`]: load any supported layout, mutate single versions, write
//!   the indexed layout back
//! - [`open_indexed`]: zero-copy lookups on an indexed buffer
//! - [`calculate_part_size_from_idx`] and [`is_erasure_info_valid`]: the
//!   size and parameter rules shared with the data path
//!
//! # Example
//!
//! ```ignore
//! use minio_xlmeta::{open_indexed, XlMetaV2};
//!
//! // Fast path: read without copying
//! if let (Some(view), _) = open_indexed(&buf)? {
//!     let fi = view.to_file_info("bucket", "object", "", false)?;
//! }
//!
//! // Mutate
//! let mut meta = XlMetaV2::load(&buf)?;
//! meta.add_version(&fi)?;
//! let buf = meta.serialize()?;
//! ```

pub mod config;
pub mod erasure;
pub mod error;
pub mod format;
pub mod indexed;
mod legacy;
mod msgp;
pub mod part;
pub mod store;
pub mod types;
pub mod version;
pub mod xlmeta;

// Re-exports for convenient access
pub use config::{Config, DEFAULT_MAX_VERSIONS, ENV_MAX_VERSIONS};
pub use erasure::{is_erasure_info_valid, ChecksumAlgo, ChecksumInfo, ErasureAlgo, ErasureInfo};
pub use error::{Error, Result};
pub use format::{Layout, MetaHeader};
pub use indexed::{open_indexed, XlMetaBuffer};
pub use part::{calculate_part_size_from_idx, part_count};
pub use store::{read_xl_meta, write_xl_meta, xl_meta_path, FsMetaStore, MetaStore, XL_META_FILE};
pub use types::{FileInfo, ObjectPartInfo, Uuid16, VersionType, NULL_VERSION_ID};
pub use version::{VersionHeader, FREE_VERSION_KEY, INLINE_DATA_KEY, RESERVED_METADATA_PREFIX};
pub use xlmeta::XlMetaV2;
