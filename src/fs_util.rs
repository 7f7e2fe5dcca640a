use std::fs;
use std::io::{self, Write};
use std::path::Path;

use camino::Utf8Path;
use flate2::read::MultiGzDecoder;
use tempfile::NamedTempFile;

use crate::error::SubmitError;

pub fn ensure_absent(path: &Utf8Path) -> Result<(), SubmitError> {
    if path.as_std_path().exists() {
        return Err(SubmitError::OutputExists(path.to_path_buf()));
    }
    Ok(())
}

pub fn require_input(path: &Utf8Path) -> Result<(), SubmitError> {
    if !path.as_std_path().is_file() {
        return Err(SubmitError::MissingInput(path.to_path_buf()));
    }
    Ok(())
}

pub fn read_input(path: &Utf8Path) -> Result<String, SubmitError> {
    require_input(path)?;
    fs::read_to_string(path.as_std_path())
        .map_err(|err| SubmitError::Filesystem(format!("read {path}: {err}")))
}

pub fn read_template(path: &Utf8Path) -> Result<String, SubmitError> {
    if !path.as_std_path().is_file() {
        return Err(SubmitError::MissingTemplate(path.to_path_buf()));
    }
    fs::read_to_string(path.as_std_path())
        .map_err(|err| SubmitError::Filesystem(format!("read {path}: {err}")))
}

pub fn write_new(path: &Utf8Path, content: &[u8]) -> Result<(), SubmitError> {
    ensure_absent(path)?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.as_std_path(),
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|err| SubmitError::Filesystem(err.to_string()))?;
    let mut temp =
        NamedTempFile::new_in(parent).map_err(|err| SubmitError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| SubmitError::Filesystem(err.to_string()))?;
    temp.persist_noclobber(path.as_std_path())
        .map_err(|err| match err.error.kind() {
            io::ErrorKind::AlreadyExists => SubmitError::OutputExists(path.to_path_buf()),
            _ => SubmitError::Filesystem(format!("write {path}: {}", err.error)),
        })?;
    Ok(())
}

pub fn validate_gzip(path: &Path) -> Result<(), SubmitError> {
    let file = fs::File::open(path).map_err(|_| SubmitError::FileNotFound(path.to_path_buf()))?;
    let mut decoder = MultiGzDecoder::new(file);
    io::copy(&mut decoder, &mut io::sink())
        .map_err(|err| SubmitError::Filesystem(format!("corrupt gzip {}: {err}", path.display())))?;
    Ok(())
}

pub fn size_mb(path: &Path) -> Result<f64, SubmitError> {
    let meta = fs::metadata(path).map_err(|_| SubmitError::FileNotFound(path.to_path_buf()))?;
    Ok(meta.len() as f64 / (1024.0 * 1024.0))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    #[test]
    fn write_new_refuses_to_clobber() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("out.xml")).unwrap();
        write_new(&path, b"first").unwrap();
        let err = write_new(&path, b"second").unwrap_err();
        assert_matches!(err, SubmitError::OutputExists(_));
        assert_eq!(fs::read_to_string(&path).unwrap(), "first");
    }

    #[test]
    fn gzip_validation() {
        let temp = tempfile::tempdir().unwrap();
        let good = temp.path().join("reads_1.fq.gz");
        let mut encoder = GzEncoder::new(fs::File::create(&good).unwrap(), Compression::default());
        encoder.write_all(b"@r1\nACGT\n+\n!!!!\n").unwrap();
        encoder.finish().unwrap();
        validate_gzip(&good).unwrap();

        let bad = temp.path().join("reads_2.fq.gz");
        fs::write(&bad, b"not gzip at all").unwrap();
        assert_matches!(validate_gzip(&bad), Err(SubmitError::Filesystem(_)));
    }
}
