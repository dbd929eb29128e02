//! Storage seam for reading and writing xl.meta files.
//!
//! The container itself never touches disks; callers hand it bytes obtained
//! through a [`MetaStore`].

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::xlmeta::XlMetaV2;

/// File name of the metadata document inside an object directory.
pub const XL_META_FILE: &str = "xl.meta";

/// Abstraction over reading whole metadata files from a volume.
pub trait MetaStore {
    /// Read the full contents of `path` within `volume`.
    /// A missing file is reported as [`Error::FileNotFound`].
    fn read_all(&self, volume: &str, path: &str) -> Result<Vec<u8>>;

    /// Replace the contents of `path` within `volume`.
    fn write_all(&self, volume: &str, path: &str, buf: &[u8]) -> Result<()>;
}

/// Local-filesystem store rooted at one disk path.
#[derive(Debug, Clone)]
pub struct FsMetaStore {
    pub root: PathBuf,
}

impl FsMetaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsMetaStore { root: root.into() }
    }

    fn resolve(&self, volume: &str, path: &str) -> PathBuf {
        self.root.join(volume).join(path)
    }
}

impl MetaStore for FsMetaStore {
    fn read_all(&self, volume: &str, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(volume, path);
        match fs::read(&full) {
            Ok(buf) => {
                trace!(path = %full.display(), bytes = buf.len(), "read metadata");
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::FileNotFound),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write_all(&self, volume: &str, path: &str, buf: &[u8]) -> Result<()> {
        let full = self.resolve(volume, path);
        let dir = full.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        // write beside the target, then rename over it
        let tmp = full.with_extension(format!("tmp.{}", std::process::id()));
        let written = fs::File::create(&tmp).and_then(|mut f| {
            f.write_all(buf)?;
            f.sync_all()
        });
        if let Err(e) = written.and_then(|()| fs::rename(&tmp, &full)) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::Io(e));
        }
        trace!(path = %full.display(), bytes = buf.len(), "wrote metadata");
        Ok(())
    }
}

/// Relative path of the metadata file for `object`.
pub fn xl_meta_path(object: &str) -> String {
    let object = object.trim_end_matches('/');
    if object.is_empty() {
        XL_META_FILE.to_string()
    } else {
        format!("{}/{}", object, XL_META_FILE)
    }
}

/// Read and load the metadata of `object`.
pub fn read_xl_meta(store: &dyn MetaStore, volume: &str, object: &str, config: &Config) -> Result<XlMetaV2> {
    let buf = store.read_all(volume, &xl_meta_path(object))?;
    debug!(volume, object, bytes = buf.len(), "loading xl.meta");
    XlMetaV2::load_with_config(&buf, config)
}

/// Serialize `meta` and store it as the metadata of `object`.
pub fn write_xl_meta(store: &dyn MetaStore, volume: &str, object: &str, meta: &XlMetaV2) -> Result<()> {
    let buf = meta.serialize()?;
    store.write_all(volume, &xl_meta_path(object), &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::tests::sample_object;

    #[test]
    fn test_xl_meta_path() {
        assert_eq!(xl_meta_path("a/b/c"), "a/b/c/xl.meta");
        assert_eq!(xl_meta_path("dir/"), "dir/xl.meta");
        assert_eq!(xl_meta_path(""), "xl.meta");
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMetaStore::new(dir.path());
        let err = store.read_all("bucket", "missing/xl.meta").unwrap_err();
        assert!(matches!(err, Error::FileNotFound));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMetaStore::new(dir.path());

        let mut meta = XlMetaV2::new();
        meta.add_version(&sample_object(1, 10)).unwrap();
        meta.add_version(&sample_object(2, 20)).unwrap();
        write_xl_meta(&store, "bucket", "photos/cat.png", &meta).unwrap();

        assert!(dir.path().join("bucket/photos/cat.png/xl.meta").is_file());
        let loaded = read_xl_meta(&store, "bucket", "photos/cat.png", &Config::default()).unwrap();
        assert_eq!(loaded.serialize().unwrap(), meta.serialize().unwrap());

        // overwrite in place
        meta.delete_version(&sample_object(2, 0)).unwrap();
        write_xl_meta(&store, "bucket", "photos/cat.png", &meta).unwrap();
        let loaded = read_xl_meta(&store, "bucket", "photos/cat.png", &Config::default()).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_corrupt_file_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMetaStore::new(dir.path());
        store.write_all("bucket", "obj/xl.meta", b"XL2 \x01\x00\x03\x00\xff").unwrap();
        let err = read_xl_meta(&store, "bucket", "obj", &Config::default()).unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_read_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("bucket/obj/xl.meta")).unwrap();
        let store = FsMetaStore::new(dir.path());
        let err = store.read_all("bucket", "obj/xl.meta").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
