use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::SubmitError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChecksum {
    pub file_name: String,
    pub md5: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumPair {
    pub forward: FileChecksum,
    pub reverse: FileChecksum,
    pub from_cache: bool,
}

pub fn md5_file(path: &Path) -> Result<String, SubmitError> {
    let mut file = File::open(path).map_err(|_| SubmitError::FileNotFound(path.to_path_buf()))?;
    let mut hasher = Md5::new();
    io::copy(&mut file, &mut hasher)
        .map_err(|err| SubmitError::Filesystem(format!("read {}: {err}", path.display())))?;
    Ok(hex::encode(hasher.finalize()))
}

pub fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn cache_path(forward: &Path, sample_alias: &str, cache_name: &str) -> PathBuf {
    forward.with_file_name(format!("{sample_alias}_{cache_name}"))
}

/// MD5 of a forward/reverse pair. A cache naming the same two files is
/// trusted without reading them; otherwise both files are hashed and the
/// cache is (re)written.
pub fn checksum_pair(
    forward: &Path,
    reverse: &Path,
    cache: &Path,
) -> Result<ChecksumPair, SubmitError> {
    if cache.exists() {
        let cached = read_cache(cache)?;
        if cached.forward.file_name == base_name(forward)
            && cached.reverse.file_name == base_name(reverse)
        {
            debug!(cache = %cache.display(), "checksum cache hit");
            return Ok(cached);
        }
        warn!(
            cache = %cache.display(),
            forward = %cached.forward.file_name,
            "checksum cache lists other files, recomputing"
        );
    }

    let pair = ChecksumPair {
        forward: FileChecksum {
            file_name: base_name(forward),
            md5: md5_file(forward)?,
        },
        reverse: FileChecksum {
            file_name: base_name(reverse),
            md5: md5_file(reverse)?,
        },
        from_cache: false,
    };
    write_cache(cache, &pair)?;
    Ok(pair)
}

pub fn read_cache(path: &Path) -> Result<ChecksumPair, SubmitError> {
    let malformed = |message: &str| SubmitError::ChecksumCache {
        path: path.to_path_buf(),
        message: message.to_string(),
    };
    let content = fs::read_to_string(path).map_err(|err| malformed(&err.to_string()))?;
    let mut entries = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.split_once(char::is_whitespace)
                .map(|(md5, name)| FileChecksum {
                    file_name: name.trim().to_string(),
                    md5: md5.to_string(),
                })
                .ok_or_else(|| malformed(&format!("expected `<md5> <filename>`, got `{line}`")))
        });

    let forward = entries
        .next()
        .ok_or_else(|| malformed("missing forward entry"))??;
    let reverse = entries
        .next()
        .ok_or_else(|| malformed("missing reverse entry"))??;
    Ok(ChecksumPair {
        forward,
        reverse,
        from_cache: true,
    })
}

pub fn write_cache(path: &Path, pair: &ChecksumPair) -> Result<(), SubmitError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let content = format!(
        "{} {}\n{} {}\n",
        pair.forward.md5, pair.forward.file_name, pair.reverse.md5, pair.reverse.file_name
    );
    let mut temp =
        NamedTempFile::new_in(dir).map_err(|err| SubmitError::Filesystem(err.to_string()))?;
    temp.write_all(content.as_bytes())
        .map_err(|err| SubmitError::Filesystem(err.to_string()))?;
    temp.persist(path)
        .map_err(|err| SubmitError::Filesystem(format!("write {}: {}", path.display(), err.error)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn computes_then_trusts_cache() {
        let temp = tempfile::tempdir().unwrap();
        let forward = temp.path().join("S1_R1.fastq.gz");
        let reverse = temp.path().join("S1_R2.fastq.gz");
        fs::write(&forward, b"hello").unwrap();
        fs::write(&reverse, b"").unwrap();
        let cache = temp.path().join("MD5.txt");

        let pair = checksum_pair(&forward, &reverse, &cache).unwrap();
        assert!(!pair.from_cache);
        assert_eq!(pair.forward.md5, "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(pair.reverse.md5, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            fs::read_to_string(&cache).unwrap(),
            "5d41402abc4b2a76b9719d911017c592 S1_R1.fastq.gz\n\
             d41d8cd98f00b204e9800998ecf8427e S1_R2.fastq.gz\n"
        );

        // The raw files are not consulted once the cache exists.
        fs::remove_file(&forward).unwrap();
        let cached = checksum_pair(&forward, &reverse, &cache).unwrap();
        assert!(cached.from_cache);
        assert_eq!(cached.forward, pair.forward);
        assert_eq!(cached.reverse, pair.reverse);
    }

    #[test]
    fn cache_of_another_pair_is_recomputed() {
        let temp = tempfile::tempdir().unwrap();
        let forward = temp.path().join("B_x_y_1.fq.gz");
        let reverse = temp.path().join("B_x_y_2.fq.gz");
        fs::write(&forward, b"hello").unwrap();
        fs::write(&reverse, b"").unwrap();
        let cache = temp.path().join("MD5.txt");
        fs::write(&cache, "aaa A_x_y_1.fq.gz\nbbb A_x_y_2.fq.gz\n").unwrap();

        let pair = checksum_pair(&forward, &reverse, &cache).unwrap();
        assert!(!pair.from_cache);
        assert_eq!(pair.forward.file_name, "B_x_y_1.fq.gz");
        assert_eq!(pair.forward.md5, "5d41402abc4b2a76b9719d911017c592");
        assert!(fs::read_to_string(&cache).unwrap().contains("B_x_y_2.fq.gz"));
    }

    #[test]
    fn cache_is_named_after_the_sample() {
        assert_eq!(
            cache_path(Path::new("/reads/S1_x_y_1.fq.gz"), "S1_x_y", "MD5.txt"),
            PathBuf::from("/reads/S1_x_y_MD5.txt")
        );
    }

    #[test]
    fn missing_raw_file() {
        let temp = tempfile::tempdir().unwrap();
        let err = checksum_pair(
            &temp.path().join("a_1.fq.gz"),
            &temp.path().join("a_2.fq.gz"),
            &temp.path().join("MD5.txt"),
        )
        .unwrap_err();
        assert_matches!(err, SubmitError::FileNotFound(_));
    }

    #[test]
    fn truncated_cache() {
        let temp = tempfile::tempdir().unwrap();
        let cache = temp.path().join("MD5.txt");
        fs::write(&cache, "abc S1_R1.fastq.gz\n").unwrap();
        assert_matches!(read_cache(&cache), Err(SubmitError::ChecksumCache { .. }));
    }
}
