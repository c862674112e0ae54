//! SH-014: BLAKE3 digests of staged build directories.
//!
//! A build's digest covers every staged file (relative path and content)
//! plus the ids of its external dependencies, so two builds with the same
//! digest publish byte-identical packages.

use crate::core::error::{BuildError, Result};
use crate::core::types::ExternalDependency;
use std::io::Read;
use std::path::Path;

const READ_CHUNK: usize = 64 * 1024;

fn tagged(hash: blake3::Hash) -> String {
    format!("blake3:{}", hash.to_hex())
}

/// Digest of one file's bytes.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| BuildError::io(path, e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = file.read(&mut buf).map_err(|e| BuildError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(tagged(hasher.finalize()))
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    tagged(blake3::hash(bytes))
}

/// Every regular file under `root` as a `/`-separated relative path, sorted.
/// Symlinks are not followed.
pub fn relative_files(root: &Path) -> Result<Vec<String>> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        let mut children = std::fs::read_dir(dir)
            .map_err(|e| BuildError::io(dir, e))?
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| BuildError::io(dir, e))?;
        children.sort_by_key(|e| e.file_name());

        for child in children {
            let path = child.path();
            let kind = child.file_type().map_err(|e| BuildError::io(&path, e))?;
            if kind.is_dir() {
                walk(root, &path, out)?;
            } else if kind.is_file() {
                let rel = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                out.push(rel);
            }
        }
        Ok(())
    }

    let mut out = Vec::new();
    walk(root, root, &mut out)?;
    Ok(out)
}

/// (relative path, digest) for every file under `root`.
pub fn file_digests(root: &Path) -> Result<Vec<(String, String)>> {
    relative_files(root)?
        .into_iter()
        .map(|rel| {
            let digest = hash_file(&root.join(&rel))?;
            Ok((rel, digest))
        })
        .collect()
}

/// Digest of a directory tree. Creation order does not matter; names do.
pub fn hash_directory(root: &Path) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    for (rel, digest) in file_digests(root)? {
        hasher.update(rel.as_bytes());
        hasher.update(b"\0");
        hasher.update(digest.as_bytes());
        hasher.update(b"\n");
    }
    Ok(tagged(hasher.finalize()))
}

/// Digest identifying a build: staged tree plus external dependency ids.
pub fn build_digest(build_dir: &Path, external: &[ExternalDependency]) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(hash_directory(build_dir)?.as_bytes());
    for dep in external {
        hasher.update(b"\0");
        hasher.update(dep.name.as_bytes());
        hasher.update(b"=");
        hasher.update(dep.artifact_id.as_bytes());
    }
    Ok(tagged(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sh014_hash_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("applet.py");
        std::fs::write(&path, "def main(): pass").unwrap();
        let h = hash_file(&path).unwrap();
        assert!(h.starts_with("blake3:"));
        assert_eq!(h.len(), 7 + 64);
        assert_eq!(h, hash_bytes(b"def main(): pass"));
    }

    #[test]
    fn test_sh014_hash_file_missing_is_io() {
        let err = hash_file(Path::new("/nonexistent/applet.py")).unwrap_err();
        assert_eq!(err.category(), "io");
    }

    #[test]
    fn test_sh014_directory_creation_order() {
        let d1 = tempfile::tempdir().unwrap();
        std::fs::write(d1.path().join("b.txt"), "bbb").unwrap();
        std::fs::write(d1.path().join("a.txt"), "aaa").unwrap();

        let d2 = tempfile::tempdir().unwrap();
        std::fs::write(d2.path().join("a.txt"), "aaa").unwrap();
        std::fs::write(d2.path().join("b.txt"), "bbb").unwrap();

        assert_eq!(
            hash_directory(d1.path()).unwrap(),
            hash_directory(d2.path()).unwrap()
        );
    }

    #[test]
    fn test_sh014_directory_rename_changes_digest() {
        let d1 = tempfile::tempdir().unwrap();
        std::fs::write(d1.path().join("a.txt"), "same").unwrap();
        let d2 = tempfile::tempdir().unwrap();
        std::fs::write(d2.path().join("z.txt"), "same").unwrap();
        assert_ne!(
            hash_directory(d1.path()).unwrap(),
            hash_directory(d2.path()).unwrap()
        );
    }

    #[test]
    fn test_sh014_file_digests_nested_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("resources/usr/bin")).unwrap();
        std::fs::write(dir.path().join("src/qc.py"), "1").unwrap();
        std::fs::write(dir.path().join("resources/usr/bin/tool"), "2").unwrap();
        let rels: Vec<String> = file_digests(dir.path())
            .unwrap()
            .into_iter()
            .map(|(rel, _)| rel)
            .collect();
        assert_eq!(rels, vec!["resources/usr/bin/tool", "src/qc.py"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_sh014_symlinks_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("real.txt"), "x").unwrap();
        let before = hash_directory(dir.path()).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("link.txt"))
            .unwrap();
        assert_eq!(before, hash_directory(dir.path()).unwrap());
    }

    #[test]
    fn test_sh014_build_digest_covers_external() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("qc.py"), "x").unwrap();
        let samtools = ExternalDependency {
            name: "samtools-1.3.tar.gz".into(),
            artifact_id: "file-a".into(),
        };
        let bumped = ExternalDependency {
            artifact_id: "file-b".into(),
            ..samtools.clone()
        };
        let a = build_digest(dir.path(), &[samtools.clone()]).unwrap();
        let b = build_digest(dir.path(), &[bumped]).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, build_digest(dir.path(), &[samtools]).unwrap());
    }
}
