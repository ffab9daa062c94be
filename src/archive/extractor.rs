// Zip archive reader: enumerates entries from the central directory and
// decompresses each one only when asked.

use std::io::{Cursor, Read};

use bytes::Bytes;
use tracing::debug;
use zip::ZipArchive;

use crate::error::{EngineError, Result};

/// Upper bound for the read buffer preallocation; the declared size is untrusted.
const MAX_PREALLOC_BYTES: u64 = 16 * 1024 * 1024;

/// An archive entry discovered during enumeration. Holds no content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHandle {
    index: usize,
    path: String,
    is_dir: bool,
    safe: bool,
}

impl EntryHandle {
    /// Entry path with `/` separators and no leading `./`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Position of the entry in archive order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Final path component.
    pub fn basename(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

pub struct ArchiveReader {
    archive: ZipArchive<Cursor<Bytes>>,
    entries: Vec<EntryHandle>,
}

impl ArchiveReader {
    /// Parse the central directory of `bytes`.
    ///
    /// Fails with [`EngineError::ArchiveCorrupt`] when the bytes are not a
    /// readable zip file. No entry is decompressed here.
    pub fn open(bytes: Bytes) -> Result<Self> {
        let archive_len = bytes.len();
        let archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| EngineError::ArchiveCorrupt(e.to_string()))?;

        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let raw = archive.name_for_index(index).ok_or_else(|| {
                EngineError::ArchiveCorrupt(format!("missing name for entry {index}"))
            })?;
            let is_dir = raw.ends_with('/') || raw.ends_with('\\');
            let path = normalize_entry_path(raw);
            let safe = is_safe_entry_path(&path);
            entries.push(EntryHandle {
                index,
                path,
                is_dir,
                safe,
            });
        }

        debug!(
            "archive opened: {} bytes, {} entries",
            archive_len,
            entries.len()
        );

        Ok(Self { archive, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, directories included, in archive order.
    pub fn entries(&self) -> impl Iterator<Item = &EntryHandle> {
        self.entries.iter()
    }

    /// Non-directory entries in archive order.
    pub fn files(&self) -> impl Iterator<Item = &EntryHandle> {
        self.entries.iter().filter(|e| !e.is_dir)
    }

    /// Decompress a single entry.
    ///
    /// Any failure is reported as [`EngineError::EntryReadFailed`] for this
    /// entry alone; the reader stays usable for the remaining entries.
    pub fn read(&mut self, entry: &EntryHandle) -> Result<Bytes> {
        if entry.is_dir {
            return Err(EngineError::entry_read(&entry.path, "entry is a directory"));
        }
        if !entry.safe {
            return Err(EngineError::entry_read(
                &entry.path,
                "path escapes the module root",
            ));
        }

        let mut file = self
            .archive
            .by_index(entry.index)
            .map_err(|e| EngineError::entry_read(&entry.path, e))?;

        let capacity = file.size().min(MAX_PREALLOC_BYTES) as usize;
        let mut buf = Vec::with_capacity(capacity);
        file.read_to_end(&mut buf)
            .map_err(|e| EngineError::entry_read(&entry.path, e))?;

        Ok(Bytes::from(buf))
    }
}

/// Convert backslashes to `/` and drop leading `./` segments.
pub fn normalize_entry_path(raw: &str) -> String {
    let mut path = raw.replace('\\', "/");
    while let Some(rest) = path.strip_prefix("./") {
        path = rest.to_string();
    }
    path
}

fn is_safe_entry_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.contains(':') {
        return false;
    }
    !path.split('/').any(|segment| segment == "..")
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    use super::*;

    fn build_zip(files: &[(&str, &[u8])], dirs: &[&str]) -> Bytes {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for dir in dirs {
            writer.add_directory(*dir, options).unwrap();
        }
        for (name, data) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        Bytes::from(writer.finish().unwrap().into_inner())
    }

    #[test]
    fn test_enumerates_in_archive_order() {
        let bytes = build_zip(
            &[("story.html", b"<html></html>"), ("story_content/m1.png", b"png")],
            &["story_content/"],
        );
        let reader = ArchiveReader::open(bytes).unwrap();

        let all: Vec<_> = reader.entries().map(|e| (e.path(), e.is_dir())).collect();
        assert_eq!(
            all,
            vec![
                ("story_content/", true),
                ("story.html", false),
                ("story_content/m1.png", false)
            ]
        );

        let files: Vec<_> = reader.files().map(|e| e.basename()).collect();
        assert_eq!(files, vec!["story.html", "m1.png"]);
    }

    #[test]
    fn test_read_on_demand() {
        let bytes = build_zip(&[("a.txt", b"alpha"), ("b.txt", b"beta")], &[]);
        let mut reader = ArchiveReader::open(bytes).unwrap();
        let second = reader.files().nth(1).cloned().unwrap();
        assert_eq!(reader.read(&second).unwrap(), Bytes::from_static(b"beta"));
    }

    #[test]
    fn test_corrupt_archive() {
        let err = ArchiveReader::open(Bytes::from_static(b"definitely not a zip")).err();
        assert!(matches!(err, Some(EngineError::ArchiveCorrupt(_))));
    }

    #[test]
    fn test_unsafe_paths_fail_per_entry() {
        let bytes = build_zip(&[("../escape.html", b"x"), ("ok.html", b"y")], &[]);
        let mut reader = ArchiveReader::open(bytes).unwrap();
        let entries: Vec<_> = reader.files().cloned().collect();

        let err = reader.read(&entries[0]).unwrap_err();
        assert!(matches!(err, EngineError::EntryReadFailed { .. }));
        assert_eq!(reader.read(&entries[1]).unwrap(), Bytes::from_static(b"y"));
    }

    #[test]
    fn test_normalize_entry_path() {
        assert_eq!(normalize_entry_path("./a/b.png"), "a/b.png");
        assert_eq!(normalize_entry_path("a\\b\\c.js"), "a/b/c.js");
        assert!(!is_safe_entry_path("/abs.html"));
        assert!(!is_safe_entry_path("a/../../b"));
        assert!(is_safe_entry_path("a/b..c/d.html"));
    }
}
