use std::fs;

use assert_matches::assert_matches;

use ena_submit::config::{Config, ConfigLoader, EndpointsEntry, PRODUCTION_ENDPOINT};
use ena_submit::domain::ExperimentType;
use ena_submit::error::SubmitError;
use ena_submit::reconcile::RunAliasPrefix;
use ena_submit::template::PlaceholderSyntax;

#[test]
fn resolve_explicit_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("ena-submit.json");
    fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "placeholder_syntax": "single",
            "run_alias_prefix": 4,
            "checksum_cache_name": "checksums.md5",
            "exclude_dirs": ["failed"],
            "skip_raw_reads": false,
            "endpoints": {"test": "http://localhost:8080/submit/"},
            "upload_host": "upload.example.org",
            "sequencing_instrument": "Illumina MiSeq",
            "experiment_types": {"WGS": {"forward_pattern": "*_R1.fq.gz"}}
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(resolved.placeholder_syntax, PlaceholderSyntax::Single);
    assert_eq!(resolved.run_alias_prefix, RunAliasPrefix::Length(4));
    assert_eq!(resolved.checksum_cache_name, "checksums.md5");
    assert_eq!(resolved.exclude_dirs, vec!["failed".to_string()]);
    assert!(!resolved.skip_raw_reads);
    assert_eq!(resolved.endpoints.production, PRODUCTION_ENDPOINT);
    assert_eq!(resolved.endpoints.test, "http://localhost:8080/submit/");
    assert_eq!(resolved.upload_host, "upload.example.org");
    assert_eq!(resolved.sequencing_instrument.as_deref(), Some("Illumina MiSeq"));
    let wgs = resolved.layout(ExperimentType::WholeSequence);
    assert_eq!(wgs.directory, "Metagenomes");
    assert_eq!(wgs.forward_pattern, "*_R1.fq.gz");
}

#[test]
fn missing_file_is_a_read_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, SubmitError::ConfigRead(p) if p == path);
}

#[test]
fn malformed_json_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("ena-submit.json");
    fs::write(&path, "{ not json").unwrap();
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, SubmitError::ConfigParse(_));
}

#[test]
fn unknown_experiment_type_key() {
    let config: Config =
        serde_json::from_str(r#"{"experiment_types": {"RNA": "*1.fq.gz"}}"#).unwrap();
    let err = ConfigLoader::resolve_config(config).unwrap_err();
    assert_matches!(err, SubmitError::InvalidExperimentType(label) if label == "RNA");
}

#[test]
fn partial_endpoints_keep_defaults() {
    let config = Config {
        endpoints: Some(EndpointsEntry {
            production: None,
            test: None,
        }),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.endpoints.production, PRODUCTION_ENDPOINT);
}

#[test]
fn forward_pattern_override_keeps_directory() {
    let resolved = ConfigLoader::resolve_config(Config::default())
        .unwrap()
        .with_forward_pattern(ExperimentType::Amplicon, "*_R1_001.fastq.gz");
    let layout = resolved.layout(ExperimentType::Amplicon);
    assert_eq!(layout.directory, "16_S");
    assert_eq!(layout.forward_pattern, "*_R1_001.fastq.gz");
    assert_eq!(
        resolved.layout(ExperimentType::WholeSequence).forward_pattern,
        "*1.fq.gz"
    );
}
