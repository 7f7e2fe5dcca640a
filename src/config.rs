use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::ExperimentType;
use crate::error::SubmitError;
use crate::reconcile::RunAliasPrefix;
use crate::template::PlaceholderSyntax;

pub const CONFIG_FILE_NAME: &str = "ena-submit.json";
pub const PRODUCTION_ENDPOINT: &str = "https://www.ebi.ac.uk/ena/submit/drop-box/submit/";
pub const TEST_ENDPOINT: &str = "https://wwwdev.ebi.ac.uk/ena/submit/drop-box/submit/";
pub const UPLOAD_HOST: &str = "webin2.ebi.ac.uk";
pub const CHECKSUM_CACHE_NAME: &str = "MD5.txt";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub placeholder_syntax: Option<PlaceholderSyntax>,
    #[serde(default)]
    pub run_alias_prefix: Option<PrefixEntry>,
    #[serde(default)]
    pub checksum_cache_name: Option<String>,
    #[serde(default)]
    pub exclude_dirs: Option<Vec<String>>,
    #[serde(default)]
    pub skip_raw_reads: Option<bool>,
    #[serde(default)]
    pub endpoints: Option<EndpointsEntry>,
    #[serde(default)]
    pub upload_host: Option<String>,
    #[serde(default)]
    pub sequencing_instrument: Option<String>,
    #[serde(default)]
    pub experiment_types: BTreeMap<String, ExperimentTypeEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PrefixEntry {
    Length(usize),
    Literal(String),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EndpointsEntry {
    #[serde(default)]
    pub production: Option<String>,
    #[serde(default)]
    pub test: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ExperimentTypeEntry {
    Pattern(String),
    Detailed(ExperimentTypeObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ExperimentTypeObject {
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub forward_pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentLayout {
    pub directory: String,
    pub forward_pattern: String,
}

impl ExperimentLayout {
    pub fn default_for(experiment_type: ExperimentType) -> Self {
        Self {
            directory: experiment_type.directory().to_string(),
            forward_pattern: experiment_type.default_forward_pattern().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub production: String,
    pub test: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub placeholder_syntax: PlaceholderSyntax,
    pub run_alias_prefix: RunAliasPrefix,
    pub checksum_cache_name: String,
    pub exclude_dirs: Vec<String>,
    pub skip_raw_reads: bool,
    pub endpoints: Endpoints,
    pub upload_host: String,
    pub sequencing_instrument: Option<String>,
    pub layouts: BTreeMap<ExperimentType, ExperimentLayout>,
}

impl ResolvedConfig {
    pub fn layout(&self, experiment_type: ExperimentType) -> ExperimentLayout {
        self.layouts
            .get(&experiment_type)
            .cloned()
            .unwrap_or_else(|| ExperimentLayout::default_for(experiment_type))
    }

    pub fn with_forward_pattern(mut self, experiment_type: ExperimentType, pattern: &str) -> Self {
        let mut layout = self.layout(experiment_type);
        layout.forward_pattern = pattern.to_string();
        self.layouts.insert(experiment_type, layout);
        self
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Explicit path, then `./ena-submit.json`, then the user config
    /// directory; built-in defaults when none exists.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SubmitError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::discover(),
        };

        let Some(config_path) = config_path else {
            return Self::resolve_config(Config::default());
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SubmitError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| SubmitError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("org", "ebi", "ena-submit")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, SubmitError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let run_alias_prefix = match config.run_alias_prefix {
            None => RunAliasPrefix::default(),
            Some(PrefixEntry::Length(len)) => RunAliasPrefix::Length(len),
            Some(PrefixEntry::Literal(prefix)) => RunAliasPrefix::Literal(prefix),
        };

        let endpoints = match config.endpoints {
            Some(entry) => Endpoints {
                production: entry
                    .production
                    .unwrap_or_else(|| PRODUCTION_ENDPOINT.to_string()),
                test: entry.test.unwrap_or_else(|| TEST_ENDPOINT.to_string()),
            },
            None => Endpoints {
                production: PRODUCTION_ENDPOINT.to_string(),
                test: TEST_ENDPOINT.to_string(),
            },
        };

        let layouts = config
            .experiment_types
            .into_iter()
            .map(|(key, entry)| {
                let experiment_type: ExperimentType = key.parse()?;
                let mut layout = ExperimentLayout::default_for(experiment_type);
                match entry {
                    ExperimentTypeEntry::Pattern(pattern) => layout.forward_pattern = pattern,
                    ExperimentTypeEntry::Detailed(obj) => {
                        if let Some(directory) = obj.directory {
                            layout.directory = directory;
                        }
                        if let Some(pattern) = obj.forward_pattern {
                            layout.forward_pattern = pattern;
                        }
                    }
                }
                Ok((experiment_type, layout))
            })
            .collect::<Result<BTreeMap<_, _>, SubmitError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            placeholder_syntax: config.placeholder_syntax.unwrap_or_default(),
            run_alias_prefix,
            checksum_cache_name: config
                .checksum_cache_name
                .unwrap_or_else(|| CHECKSUM_CACHE_NAME.to_string()),
            exclude_dirs: config.exclude_dirs.unwrap_or_else(default_exclude_dirs),
            skip_raw_reads: config.skip_raw_reads.unwrap_or(true),
            endpoints,
            upload_host: config.upload_host.unwrap_or_else(|| UPLOAD_HOST.to_string()),
            sequencing_instrument: config.sequencing_instrument,
            layouts,
        })
    }
}

pub fn default_exclude_dirs() -> Vec<String> {
    vec!["weak_failed".to_string(), "unmerged_lanes".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.placeholder_syntax, PlaceholderSyntax::Triple);
        assert_eq!(resolved.run_alias_prefix, RunAliasPrefix::Length(4));
        assert_eq!(resolved.checksum_cache_name, "MD5.txt");
        assert_eq!(resolved.endpoints.test, TEST_ENDPOINT);
        assert_eq!(
            resolved.layout(ExperimentType::WholeSequence).directory,
            "Metagenomes"
        );
    }

    #[test]
    fn experiment_type_shorthand_sets_pattern() {
        let config: Config = serde_json::from_str(
            r#"{"experiment_types": {"16S": "*_R1.fastq.gz", "WGS": {"directory": "wgs"}},
                "run_alias_prefix": "run_"}"#,
        )
        .unwrap();
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        let amplicon = resolved.layout(ExperimentType::Amplicon);
        assert_eq!(amplicon.forward_pattern, "*_R1.fastq.gz");
        assert_eq!(amplicon.directory, "16_S");
        let wgs = resolved.layout(ExperimentType::WholeSequence);
        assert_eq!(wgs.directory, "wgs");
        assert_eq!(wgs.forward_pattern, "*1.fq.gz");
        assert_eq!(
            resolved.run_alias_prefix,
            RunAliasPrefix::Literal("run_".to_string())
        );
    }
}
