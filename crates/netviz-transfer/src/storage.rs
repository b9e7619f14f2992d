use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::info;

/// Name used when the sender supplies nothing usable.
pub const FALLBACK_FILE_NAME: &str = "received.bin";

/// Writes delivered files into a single flat directory.
///
/// Names arriving from the wire are reduced to their last path component,
/// so a peer cannot write outside `dir`.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where a file with this wire name ends up.
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.dir.join(sanitize_file_name(name))
    }

    /// Persist `data`, creating the directory if needed. Returns the written path.
    pub fn save(&self, name: &str, data: &[u8]) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.file_path(name);
        fs::write(&path, data)?;
        info!("Saved {} bytes to {}", data.len(), path.display());
        Ok(path)
    }
}

/// Final normal path component of `name`, or [`FALLBACK_FILE_NAME`].
pub fn sanitize_file_name(name: &str) -> String {
    // Treat both separators alike so Windows-style names are handled everywhere
    let unified = name.replace('\\', "/");
    Path::new(&unified)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .last()
        .filter(|part| !part.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

/// A file loaded for sending.
pub struct SourceFile {
    /// Basename sent in METADATA.
    pub name: String,
    pub data: Vec<u8>,
}

/// Read the whole file at `path`; the wire name is its basename.
pub fn read_source(path: &Path) -> io::Result<SourceFile> {
    let data = fs::read(path)?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(sanitize_file_name)
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());
    Ok(SourceFile { name, data })
}

/// Hex SHA-256 of `data`, logged on both ends so transfers can be compared.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("a.bin"), "a.bin");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("/abs/path/photo.jpg"), "photo.jpg");
        assert_eq!(sanitize_file_name("E:\\NetViz\\Java_Core\\test.jpg"), "test.jpg");
    }

    #[test]
    fn sanitize_falls_back() {
        assert_eq!(sanitize_file_name(""), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name(".."), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name("/"), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name("   "), FALLBACK_FILE_NAME);
    }

    #[test]
    fn save_creates_directory_and_reads_back() {
        let dir = std::env::temp_dir().join(format!("netviz_store_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let store = FileStore::new(dir.join("nested"));

        let path = store.save("../escape.txt", b"hello").unwrap();
        assert_eq!(path, dir.join("nested").join("escape.txt"));

        let source = read_source(&path).unwrap();
        assert_eq!(source.name, "escape.txt");
        assert_eq!(source.data, b"hello");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
