use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SubmitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExperimentType {
    #[serde(rename = "16S")]
    Amplicon,
    #[serde(rename = "WGS")]
    WholeSequence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LibraryProfile {
    pub platform: &'static str,
    pub instrument: &'static str,
    pub source: &'static str,
    pub selection: &'static str,
    pub strategy: &'static str,
}

struct ExperimentTraits {
    label: &'static str,
    directory: &'static str,
    forward_pattern: &'static str,
    library: LibraryProfile,
}

const AMPLICON: ExperimentTraits = ExperimentTraits {
    label: "16S",
    directory: "16_S",
    forward_pattern: "*1.fastq.gz",
    library: LibraryProfile {
        platform: "ILLUMINA",
        instrument: "Illumina NovaSeq 6000",
        source: "METAGENOMIC",
        selection: "PCR",
        strategy: "AMPLICON",
    },
};

const WHOLE_SEQUENCE: ExperimentTraits = ExperimentTraits {
    label: "WGS",
    directory: "Metagenomes",
    forward_pattern: "*1.fq.gz",
    library: LibraryProfile {
        platform: "ILLUMINA",
        instrument: "Illumina NovaSeq 6000",
        source: "GENOMIC",
        selection: "RANDOM",
        strategy: "WGS",
    },
};

impl ExperimentType {
    pub const ALL: [ExperimentType; 2] = [ExperimentType::Amplicon, ExperimentType::WholeSequence];

    fn traits(self) -> &'static ExperimentTraits {
        match self {
            ExperimentType::Amplicon => &AMPLICON,
            ExperimentType::WholeSequence => &WHOLE_SEQUENCE,
        }
    }

    pub fn label(self) -> &'static str {
        self.traits().label
    }

    pub fn directory(self) -> &'static str {
        self.traits().directory
    }

    pub fn default_forward_pattern(self) -> &'static str {
        self.traits().forward_pattern
    }

    pub fn library(self) -> LibraryProfile {
        self.traits().library
    }

    pub fn experiment_template(self) -> String {
        format!("experiment_{}.xml", self.label())
    }

    pub fn experiment_alias(self, project: &str, sample_alias: &str) -> String {
        format!("{project}-{sample_alias}-{}", self.label())
    }

    pub fn matches_alias(self, alias: &str) -> bool {
        alias
            .rsplit_once('-')
            .map(|(_, suffix)| suffix == self.label())
            .unwrap_or(false)
    }
}

impl fmt::Display for ExperimentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for ExperimentType {
    type Err = SubmitError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "16s" | "16_s" | "amplicon" => Ok(ExperimentType::Amplicon),
            "wgs" | "metagenomes" | "metagenomics" => Ok(ExperimentType::WholeSequence),
            _ => Err(SubmitError::InvalidExperimentType(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Production,
    Test,
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::Production => write!(f, "production"),
            Partition::Test => write!(f, "test"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationMode {
    DryRun,
    Submit(Partition),
}

impl RegistrationMode {
    /// Maps the operator flag: `y`/`yes` production, `n`/`no` test, absent,
    /// empty or `null` dry run.
    pub fn from_flag(flag: Option<&str>) -> Result<Self, SubmitError> {
        let Some(raw) = flag else {
            return Ok(RegistrationMode::DryRun);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "null" => Ok(RegistrationMode::DryRun),
            "y" | "yes" => Ok(RegistrationMode::Submit(Partition::Production)),
            "n" | "no" => Ok(RegistrationMode::Submit(Partition::Test)),
            _ => Err(SubmitError::InvalidRegistrationMode(raw.to_string())),
        }
    }

    pub fn is_dry_run(self) -> bool {
        matches!(self, RegistrationMode::DryRun)
    }
}

impl fmt::Display for RegistrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationMode::DryRun => write!(f, "dry-run"),
            RegistrationMode::Submit(partition) => write!(f, "{partition}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    #[default]
    Batch,
    Interactive,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

impl FromStr for Credentials {
    type Err = SubmitError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (user, password) = value
            .trim()
            .split_once(':')
            .ok_or(SubmitError::InvalidCredentials)?;
        if user.is_empty() || password.is_empty() {
            return Err(SubmitError::InvalidCredentials);
        }
        Ok(Self {
            user: user.to_string(),
            password: password.to_string(),
        })
    }
}
