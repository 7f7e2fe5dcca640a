use indexmap::IndexMap;
use serde::Serialize;

use crate::domain::{ExperimentType, LibraryProfile};
use crate::error::SubmitError;
use crate::receipt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunAliasPrefix {
    Length(usize),
    Literal(String),
}

impl Default for RunAliasPrefix {
    fn default() -> Self {
        RunAliasPrefix::Length(4)
    }
}

impl RunAliasPrefix {
    pub fn strip<'a>(&self, run_alias: &'a str) -> Option<&'a str> {
        let key = match self {
            RunAliasPrefix::Length(len) => run_alias
                .char_indices()
                .nth(*len)
                .map(|(idx, _)| &run_alias[idx..]),
            RunAliasPrefix::Literal(prefix) => run_alias.strip_prefix(prefix.as_str()),
        };
        key.filter(|key| !key.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleIdentity {
    pub alias: String,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectAccessions {
    pub experiment_accession: String,
    pub run_accession: String,
    pub run_alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunFiles {
    pub forward_file: String,
    pub forward_checksum: String,
    pub reverse_file: String,
    pub reverse_checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciledRow {
    pub sample_alias: String,
    pub sample_id_paper: Option<String>,
    pub sample_accession: String,
    pub experiment_alias: String,
    pub experiment_accession: String,
    pub run_alias: String,
    pub run_accession: String,
    pub forward_file: String,
    pub reverse_file: String,
    pub forward_checksum: String,
    pub reverse_checksum: String,
    pub library: LibraryProfile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconciliationGap {
    MissingObjectReceipt { experiment_alias: String },
    MissingRunFiles { experiment_alias: String },
    MalformedAlias { alias: String },
    UnmatchedRun { run_alias: String, join_key: String },
}

impl std::fmt::Display for ReconciliationGap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconciliationGap::MissingObjectReceipt { experiment_alias } => {
                write!(f, "experiment {experiment_alias} has no entry in the object receipt")
            }
            ReconciliationGap::MissingRunFiles { experiment_alias } => {
                write!(f, "experiment {experiment_alias} has no run in the run document")
            }
            ReconciliationGap::MalformedAlias { alias } => write!(f, "malformed alias {alias}"),
            ReconciliationGap::UnmatchedRun { run_alias, join_key } => write!(
                f,
                "run {run_alias} points at unknown experiment {join_key}"
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileInputs {
    pub samples: IndexMap<String, SampleIdentity>,
    pub experiment_accessions: IndexMap<String, String>,
    pub run_accessions: IndexMap<String, String>,
    pub experiment_samples: IndexMap<String, String>,
    pub run_files: IndexMap<String, RunFiles>,
    pub run_alias_prefix: RunAliasPrefix,
}

impl ReconcileInputs {
    pub fn from_documents(
        samples_receipt: &str,
        object_receipt: &str,
        experiment_document: &str,
        run_document: &str,
        run_alias_prefix: RunAliasPrefix,
    ) -> Result<Self, SubmitError> {
        let samples = receipt::extract_samples(samples_receipt)?
            .into_values()
            .map(|sample| {
                (
                    sample.accession,
                    SampleIdentity {
                        alias: sample.alias,
                        external_id: sample.external_id,
                    },
                )
            })
            .collect();

        Ok(Self {
            samples,
            experiment_accessions: receipt::extract_experiments(object_receipt)?,
            run_accessions: receipt::extract_runs(object_receipt)?,
            experiment_samples: receipt::extract_experiment_samples(experiment_document)?,
            run_files: receipt::extract_run_files(run_document)?,
            run_alias_prefix,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Reconciliation {
    pub rows: Vec<ReconciledRow>,
    pub gaps: Vec<ReconciliationGap>,
}

pub fn build_object_map(
    run_accessions: &IndexMap<String, String>,
    experiment_accessions: &IndexMap<String, String>,
    prefix: &RunAliasPrefix,
) -> (IndexMap<String, ObjectAccessions>, Vec<ReconciliationGap>) {
    let mut map = IndexMap::new();
    let mut gaps = Vec::new();
    for (run_alias, run_accession) in run_accessions {
        let Some(join_key) = prefix.strip(run_alias) else {
            gaps.push(ReconciliationGap::MalformedAlias {
                alias: run_alias.clone(),
            });
            continue;
        };
        match experiment_accessions.get(join_key) {
            Some(experiment_accession) => {
                map.insert(
                    join_key.to_string(),
                    ObjectAccessions {
                        experiment_accession: experiment_accession.clone(),
                        run_accession: run_accession.clone(),
                        run_alias: run_alias.clone(),
                    },
                );
            }
            None => gaps.push(ReconciliationGap::UnmatchedRun {
                run_alias: run_alias.clone(),
                join_key: join_key.to_string(),
            }),
        }
    }
    (map, gaps)
}

/// One row per (sample, experiment of `experiment_type`) that joins through
/// every document, in samples-receipt order then experiment-document order.
pub fn reconcile(inputs: &ReconcileInputs, experiment_type: ExperimentType) -> Reconciliation {
    let (object_map, mut gaps) = build_object_map(
        &inputs.run_accessions,
        &inputs.experiment_accessions,
        &inputs.run_alias_prefix,
    );
    // Unmatched runs of other types belong to their own type's table.
    gaps.retain(|gap| match gap {
        ReconciliationGap::UnmatchedRun { join_key, .. } => {
            experiment_type.matches_alias(join_key)
        }
        _ => true,
    });
    let library = experiment_type.library();
    let mut rows = Vec::new();

    for (sample_accession, identity) in &inputs.samples {
        let experiments = inputs
            .experiment_samples
            .iter()
            .filter(|(_, accession)| *accession == sample_accession)
            .map(|(alias, _)| alias);

        for experiment_alias in experiments {
            if !experiment_alias.contains('-') {
                gaps.push(ReconciliationGap::MalformedAlias {
                    alias: experiment_alias.clone(),
                });
                continue;
            }
            if !experiment_type.matches_alias(experiment_alias) {
                continue;
            }

            let objects = object_map.get(experiment_alias);
            let files = inputs.run_files.get(experiment_alias);
            let (Some(objects), Some(files)) = (objects, files) else {
                if objects.is_none() {
                    gaps.push(ReconciliationGap::MissingObjectReceipt {
                        experiment_alias: experiment_alias.clone(),
                    });
                }
                if files.is_none() {
                    gaps.push(ReconciliationGap::MissingRunFiles {
                        experiment_alias: experiment_alias.clone(),
                    });
                }
                continue;
            };

            rows.push(ReconciledRow {
                sample_alias: identity.alias.clone(),
                sample_id_paper: identity.external_id.clone(),
                sample_accession: sample_accession.clone(),
                experiment_alias: experiment_alias.clone(),
                experiment_accession: objects.experiment_accession.clone(),
                run_alias: objects.run_alias.clone(),
                run_accession: objects.run_accession.clone(),
                forward_file: files.forward_file.clone(),
                reverse_file: files.reverse_file.clone(),
                forward_checksum: files.forward_checksum.clone(),
                reverse_checksum: files.reverse_checksum.clone(),
                library,
            });
        }
    }

    Reconciliation { rows, gaps }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn files(tag: &str) -> RunFiles {
        RunFiles {
            forward_file: format!("{tag}_1.fastq.gz"),
            forward_checksum: "aa".to_string(),
            reverse_file: format!("{tag}_2.fastq.gz"),
            reverse_checksum: "bb".to_string(),
        }
    }

    #[test]
    fn prefix_strip() {
        let prefix = RunAliasPrefix::default();
        assert_eq!(prefix.strip("ERR0EXP1"), Some("EXP1"));
        assert_eq!(prefix.strip("ERR0"), None);
        assert_eq!(prefix.strip("ab"), None);
        let literal = RunAliasPrefix::Literal("run_".to_string());
        assert_eq!(literal.strip("run_PRJ-S1-16S"), Some("PRJ-S1-16S"));
        assert_eq!(literal.strip("PRJ-S1-16S"), None);
    }

    #[test]
    fn object_map_joins_through_run_alias() {
        let (objects, gaps) = build_object_map(
            &map(&[("ERR0EXP1", "ERR1"), ("ERR0EXP9", "ERR9")]),
            &map(&[("EXP1", "ERX1")]),
            &RunAliasPrefix::default(),
        );
        assert_eq!(
            objects.get("EXP1"),
            Some(&ObjectAccessions {
                experiment_accession: "ERX1".to_string(),
                run_accession: "ERR1".to_string(),
                run_alias: "ERR0EXP1".to_string(),
            })
        );
        assert_eq!(
            gaps,
            vec![ReconciliationGap::UnmatchedRun {
                run_alias: "ERR0EXP9".to_string(),
                join_key: "EXP9".to_string(),
            }]
        );
    }

    #[test]
    fn filters_by_experiment_type() {
        let mut inputs = ReconcileInputs::default();
        inputs.samples.insert(
            "ERS1".to_string(),
            SampleIdentity {
                alias: "S1".to_string(),
                external_id: Some("SAMEA1".to_string()),
            },
        );
        inputs.experiment_samples = map(&[("PRJ-S1-16S", "ERS1"), ("PRJ-S1-WGS", "ERS1")]);
        inputs.experiment_accessions = map(&[("PRJ-S1-16S", "ERX1"), ("PRJ-S1-WGS", "ERX2")]);
        inputs.run_accessions = map(&[("run_PRJ-S1-16S", "ERR1"), ("run_PRJ-S1-WGS", "ERR2")]);
        inputs.run_files.insert("PRJ-S1-16S".to_string(), files("a"));
        inputs.run_files.insert("PRJ-S1-WGS".to_string(), files("b"));

        let result = reconcile(&inputs, ExperimentType::Amplicon);
        assert!(result.gaps.is_empty());
        assert_eq!(result.rows.len(), 1);
        let row = &result.rows[0];
        assert_eq!(row.experiment_alias, "PRJ-S1-16S");
        assert_eq!(row.sample_id_paper.as_deref(), Some("SAMEA1"));
        assert_eq!(row.run_accession, "ERR1");
        assert_eq!(row.library.strategy, "AMPLICON");
    }

    #[test]
    fn sample_without_experiments_yields_nothing() {
        let mut inputs = ReconcileInputs::default();
        inputs.samples.insert(
            "ERS2".to_string(),
            SampleIdentity {
                alias: "S2".to_string(),
                external_id: None,
            },
        );
        let result = reconcile(&inputs, ExperimentType::WholeSequence);
        assert!(result.rows.is_empty());
        assert!(result.gaps.is_empty());
    }

    #[test]
    fn missing_joins_become_gaps() {
        let mut inputs = ReconcileInputs::default();
        inputs.samples.insert(
            "ERS1".to_string(),
            SampleIdentity {
                alias: "S1".to_string(),
                external_id: None,
            },
        );
        inputs.experiment_samples = map(&[("PRJ-S1-16S", "ERS1")]);
        let result = reconcile(&inputs, ExperimentType::Amplicon);
        assert!(result.rows.is_empty());
        assert_eq!(
            result.gaps,
            vec![
                ReconciliationGap::MissingObjectReceipt {
                    experiment_alias: "PRJ-S1-16S".to_string()
                },
                ReconciliationGap::MissingRunFiles {
                    experiment_alias: "PRJ-S1-16S".to_string()
                },
            ]
        );
    }
}
