use std::path::{Path, PathBuf};

use camino::Utf8Path;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::ExperimentLayout;
use crate::error::SubmitError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadPair {
    pub sample_alias: String,
    pub forward: PathBuf,
    pub reverse: PathBuf,
}

impl ReadPair {
    fn from_paths(forward: PathBuf, reverse: PathBuf) -> Self {
        let name = file_name(&forward);
        Self {
            sample_alias: sample_alias_of(&name),
            forward,
            reverse,
        }
    }
}

/// Sample alias encoded in a read file name: its first three `_` fields.
pub fn sample_alias_of(file_name: &str) -> String {
    file_name.trim().splitn(4, '_').take(3).collect::<Vec<_>>().join("_")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn glob_regex(pattern: &str) -> Result<Regex, SubmitError> {
    let mut source = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    Regex::new(&source)
        .map_err(|err| SubmitError::ConfigParse(format!("bad file pattern `{pattern}`: {err}")))
}

/// Forward-pattern literal and the reverse literal derived from it by
/// turning every `1` into `2`.
fn mate_literals(pattern: &str) -> Result<(String, String), SubmitError> {
    let forward = pattern.replace(['*', '?'], "");
    if !forward.contains('1') {
        return Err(SubmitError::ConfigParse(format!(
            "forward pattern `{pattern}` has no `1` to derive the reverse read from"
        )));
    }
    let reverse = forward.replace('1', "2");
    Ok((forward, reverse))
}

fn reverse_of(forward: &Path, forward_literal: &str, reverse_literal: &str) -> Option<PathBuf> {
    let name = file_name(forward);
    let idx = name.rfind(forward_literal)?;
    let mut reverse = String::with_capacity(name.len());
    reverse.push_str(&name[..idx]);
    reverse.push_str(reverse_literal);
    reverse.push_str(&name[idx + forward_literal.len()..]);
    Some(forward.with_file_name(reverse))
}

pub struct ReadDiscovery<'a> {
    pub exclude_dirs: &'a [String],
    pub skip_raw_reads: bool,
}

impl ReadDiscovery<'_> {
    pub fn pairs(
        &self,
        samples_dir: &Utf8Path,
        layout: &ExperimentLayout,
    ) -> Result<Vec<ReadPair>, SubmitError> {
        if !samples_dir.as_std_path().is_dir() {
            return Err(SubmitError::MissingInput(samples_dir.to_path_buf()));
        }
        let root = samples_dir.join(&layout.directory);
        if !root.as_std_path().is_dir() {
            warn!(dir = %root, "no reads directory for experiment type");
            return Ok(Vec::new());
        }

        let matcher = glob_regex(&layout.forward_pattern)?;
        let (forward_literal, reverse_literal) = mate_literals(&layout.forward_pattern)?;

        let walker = WalkDir::new(root.as_std_path())
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !self.is_excluded(&entry.file_name().to_string_lossy())
            });

        let mut pairs = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|err| SubmitError::Filesystem(err.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !matcher.is_match(&name) {
                continue;
            }
            if self.skip_raw_reads && name.contains("raw") {
                debug!(file = %entry.path().display(), "skipping raw read");
                continue;
            }
            let forward = entry.path().to_path_buf();
            let reverse = reverse_of(&forward, &forward_literal, &reverse_literal)
                .filter(|path| path.is_file())
                .ok_or_else(|| SubmitError::MissingReverseRead {
                    expected: reverse_of(&forward, &forward_literal, &reverse_literal)
                        .unwrap_or_else(|| forward.clone()),
                    forward: forward.clone(),
                })?;
            pairs.push(ReadPair::from_paths(forward, reverse));
        }
        Ok(pairs)
    }

    fn is_excluded(&self, dir_name: &str) -> bool {
        self.exclude_dirs.iter().any(|excluded| excluded == dir_name)
    }
}

pub fn sample_has_reads(samples_dir: &Utf8Path, layout: &ExperimentLayout, alias: &str) -> bool {
    let dir = samples_dir.join(&layout.directory).join(alias);
    let Ok(matcher) = glob_regex(&format!("{alias}{}", layout.forward_pattern)) else {
        return false;
    };
    let Ok(entries) = std::fs::read_dir(dir.as_std_path()) else {
        return false;
    };
    entries
        .flatten()
        .any(|entry| matcher.is_match(&entry.file_name().to_string_lossy()))
}

#[derive(Debug, Deserialize)]
struct MappingRow {
    forward: String,
    reverse: String,
}

pub fn read_mapping_table(path: &Utf8Path, base_dir: &Path) -> Result<Vec<ReadPair>, SubmitError> {
    if !path.as_std_path().is_file() {
        return Err(SubmitError::MissingInput(path.to_path_buf()));
    }
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .trim(csv::Trim::All)
        .from_path(path.as_std_path())
        .map_err(|err| SubmitError::MetadataFormat(format!("{path}: {err}")))?;

    let mut pairs = Vec::new();
    for row in reader.deserialize::<MappingRow>() {
        let row = row.map_err(|err| SubmitError::MetadataFormat(format!("{path}: {err}")))?;
        let resolve = |file: &str| {
            let file = Path::new(file);
            if file.is_absolute() {
                file.to_path_buf()
            } else {
                base_dir.join(file)
            }
        };
        let forward = resolve(&row.forward);
        let reverse = resolve(&row.reverse);
        for file in [&forward, &reverse] {
            if !file.is_file() {
                return Err(SubmitError::FileNotFound(file.clone()));
            }
        }
        pairs.push(ReadPair::from_paths(forward, reverse));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"@r\nA\n+\n!\n").unwrap();
    }

    fn layout() -> ExperimentLayout {
        ExperimentLayout {
            directory: "16_S".to_string(),
            forward_pattern: "*_R1.fastq.gz".to_string(),
        }
    }

    fn discovery(excludes: &[String]) -> ReadDiscovery<'_> {
        ReadDiscovery {
            exclude_dirs: excludes,
            skip_raw_reads: true,
        }
    }

    #[test]
    fn alias_is_first_three_fields() {
        assert_eq!(sample_alias_of("HYD22_S1_A_L001_R1.fastq.gz"), "HYD22_S1_A");
        assert_eq!(sample_alias_of("S1_R1.fq.gz"), "S1_R1.fq.gz");
    }

    #[test]
    fn finds_pairs_and_skips_excluded() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let dir = temp.path().join("16_S");
        touch(&dir.join("P_S1_A/P_S1_A_R1.fastq.gz"));
        touch(&dir.join("P_S1_A/P_S1_A_R2.fastq.gz"));
        touch(&dir.join("weak_failed/P_S9_A_R1.fastq.gz"));
        touch(&dir.join("P_S2_A/P_S2_A_raw_R1.fastq.gz"));

        let excludes = vec!["weak_failed".to_string()];
        let pairs = discovery(&excludes).pairs(&root, &layout()).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].sample_alias, "P_S1_A");
        assert!(pairs[0].reverse.ends_with("P_S1_A/P_S1_A_R2.fastq.gz"));
    }

    #[test]
    fn missing_reverse_read() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        touch(&temp.path().join("16_S/S1/P_S1_A_R1.fastq.gz"));
        let err = discovery(&[]).pairs(&root, &layout()).unwrap_err();
        assert_matches!(err, SubmitError::MissingReverseRead { expected, .. }
            if expected.ends_with("P_S1_A_R2.fastq.gz"));
    }

    #[test]
    fn sample_read_check() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        touch(&temp.path().join("16_S/S1/S1_L001_R1.fastq.gz"));
        assert!(sample_has_reads(&root, &layout(), "S1"));
        assert!(!sample_has_reads(&root, &layout(), "S2"));
    }

    #[test]
    fn mapping_table_resolves_relative_paths() {
        let temp = tempfile::tempdir().unwrap();
        touch(&temp.path().join("a/S1_1.fq.gz"));
        touch(&temp.path().join("a/S1_2.fq.gz"));
        let table = temp.path().join("mapping.tsv");
        fs::write(&table, "forward\treverse\na/S1_1.fq.gz\ta/S1_2.fq.gz\n").unwrap();
        let table = Utf8PathBuf::from_path_buf(table).unwrap();
        let pairs = read_mapping_table(&table, temp.path()).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].forward, temp.path().join("a/S1_1.fq.gz"));
    }
}
