use camino::Utf8Path;
use serde::Serialize;

use crate::error::SubmitError;
use crate::fs_util;
use crate::reconcile::ReconciledRow;

pub const DETAILS_COLUMNS: [&str; 18] = [
    "expID",
    "study_accession",
    "sample_alias",
    "sample_id_paper",
    "sample_accession",
    "experiment_alias",
    "experiment_accession",
    "run_alias",
    "run_accession",
    "forward_file",
    "reverse_file",
    "forward_checksum",
    "reverse_checksum",
    "sequencing_platform",
    "sequencing_instrument",
    "library_source",
    "library_selection",
    "library_strategy",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetailsRecord {
    #[serde(rename = "expID")]
    pub exp_id: String,
    pub study_accession: String,
    pub sample_alias: String,
    pub sample_id_paper: String,
    pub sample_accession: String,
    pub experiment_alias: String,
    pub experiment_accession: String,
    pub run_alias: String,
    pub run_accession: String,
    pub forward_file: String,
    pub reverse_file: String,
    pub forward_checksum: String,
    pub reverse_checksum: String,
    pub sequencing_platform: String,
    pub sequencing_instrument: String,
    pub library_source: String,
    pub library_selection: String,
    pub library_strategy: String,
}

#[derive(Debug, Clone, Copy)]
pub struct DetailsContext<'a> {
    pub exp_id: &'a str,
    pub study_accession: &'a str,
    pub instrument: Option<&'a str>,
}

impl DetailsRecord {
    pub fn new(row: &ReconciledRow, context: DetailsContext<'_>) -> Self {
        Self {
            exp_id: context.exp_id.to_string(),
            study_accession: context.study_accession.to_string(),
            sample_alias: row.sample_alias.clone(),
            sample_id_paper: row.sample_id_paper.clone().unwrap_or_default(),
            sample_accession: row.sample_accession.clone(),
            experiment_alias: row.experiment_alias.clone(),
            experiment_accession: row.experiment_accession.clone(),
            run_alias: row.run_alias.clone(),
            run_accession: row.run_accession.clone(),
            forward_file: row.forward_file.clone(),
            reverse_file: row.reverse_file.clone(),
            forward_checksum: row.forward_checksum.clone(),
            reverse_checksum: row.reverse_checksum.clone(),
            sequencing_platform: row.library.platform.to_string(),
            sequencing_instrument: context
                .instrument
                .unwrap_or(row.library.instrument)
                .to_string(),
            library_source: row.library.source.to_string(),
            library_selection: row.library.selection.to_string(),
            library_strategy: row.library.strategy.to_string(),
        }
    }
}

pub fn details_csv(records: &[DetailsRecord]) -> Result<Vec<u8>, SubmitError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer
        .write_record(DETAILS_COLUMNS)
        .map_err(|err| SubmitError::Filesystem(err.to_string()))?;
    for record in records {
        writer
            .serialize(record)
            .map_err(|err| SubmitError::Filesystem(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| SubmitError::Filesystem(err.to_string()))
}

pub fn write_details(path: &Utf8Path, records: &[DetailsRecord]) -> Result<(), SubmitError> {
    let bytes = details_csv(records)?;
    fs_util::write_new(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExperimentType;

    fn row() -> ReconciledRow {
        ReconciledRow {
            sample_alias: "S1".to_string(),
            sample_id_paper: Some("SAMEA1".to_string()),
            sample_accession: "ERS1".to_string(),
            experiment_alias: "PRJ-S1-WGS".to_string(),
            experiment_accession: "ERX1".to_string(),
            run_alias: "run_PRJ-S1-WGS".to_string(),
            run_accession: "ERR1".to_string(),
            forward_file: "S1_1.fq.gz".to_string(),
            reverse_file: "S1_2.fq.gz".to_string(),
            forward_checksum: "aa".to_string(),
            reverse_checksum: "bb".to_string(),
            library: ExperimentType::WholeSequence.library(),
        }
    }

    #[test]
    fn columns_in_order() {
        let record = DetailsRecord::new(
            &row(),
            DetailsContext {
                exp_id: "PRJ",
                study_accession: "PRJEB1",
                instrument: None,
            },
        );
        let csv = String::from_utf8(details_csv(&[record]).unwrap()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap(), DETAILS_COLUMNS.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "PRJ,PRJEB1,S1,SAMEA1,ERS1,PRJ-S1-WGS,ERX1,run_PRJ-S1-WGS,ERR1,S1_1.fq.gz,S1_2.fq.gz,aa,bb,\
             ILLUMINA,Illumina NovaSeq 6000,GENOMIC,RANDOM,WGS"
        );
    }

    #[test]
    fn instrument_override_and_empty_table() {
        let record = DetailsRecord::new(
            &row(),
            DetailsContext {
                exp_id: "PRJ",
                study_accession: "",
                instrument: Some("NextSeq 550"),
            },
        );
        assert_eq!(record.sequencing_instrument, "NextSeq 550");
        let csv = String::from_utf8(details_csv(&[]).unwrap()).unwrap();
        assert_eq!(csv.lines().count(), 1);
    }
}
