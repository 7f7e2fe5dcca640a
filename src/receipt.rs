use indexmap::IndexMap;
use indexmap::map::Entry;
use roxmltree::{Document, Node};
use serde::Serialize;
use tracing::debug;

use crate::error::SubmitError;
use crate::reconcile::RunFiles;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiptResult {
    pub success: bool,
    pub errors: Vec<String>,
    pub info: Vec<String>,
}

impl ReceiptResult {
    pub fn message(&self) -> &'static str {
        if self.success {
            "Submission successful. No errors reported."
        } else if self.errors.is_empty() {
            "Submission failed. No specific errors reported."
        } else {
            "Submission failed. See error messages."
        }
    }

    pub fn into_result(self) -> Result<Self, SubmitError> {
        if self.success {
            return Ok(self);
        }
        Err(SubmitError::Rejected {
            errors: self.errors,
            info: self.info,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleReceipt {
    pub alias: String,
    pub accession: String,
    pub external_id: Option<String>,
}

fn parse(xml: &str) -> Result<Document<'_>, SubmitError> {
    Document::parse(xml).map_err(|err| SubmitError::ReceiptParse(err.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<&str, SubmitError> {
    std::str::from_utf8(bytes)
        .map_err(|err| SubmitError::ReceiptParse(format!("receipt is not UTF-8: {err}")))
}

fn elements<'a, 'input>(
    doc: &'a Document<'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    doc.descendants()
        .filter(move |node| node.is_element() && node.has_tag_name(name))
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.descendants()
        .find(|desc| desc.is_element() && desc.has_tag_name(name))
}

fn text_of(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|desc| desc.is_text())
        .filter_map(|desc| desc.text())
        .collect::<String>()
        .trim()
        .to_string()
}

fn insert_unique<V>(
    map: &mut IndexMap<String, V>,
    document: &str,
    alias: &str,
    value: V,
) -> Result<(), SubmitError> {
    match map.entry(alias.to_string()) {
        Entry::Occupied(_) => Err(SubmitError::DuplicateAlias {
            document: document.to_string(),
            alias: alias.to_string(),
        }),
        Entry::Vacant(slot) => {
            slot.insert(value);
            Ok(())
        }
    }
}

pub fn parse_receipt(xml: &str) -> Result<ReceiptResult, SubmitError> {
    let doc = parse(xml)?;
    let root = doc.root_element();
    let success = root.has_tag_name("RECEIPT")
        && root
            .attribute("success")
            .map(|value| value.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
    Ok(ReceiptResult {
        success,
        errors: elements(&doc, "ERROR").map(text_of).collect(),
        info: elements(&doc, "INFO").map(text_of).collect(),
    })
}

pub fn extract_samples(xml: &str) -> Result<IndexMap<String, SampleReceipt>, SubmitError> {
    let doc = parse(xml)?;
    let mut out = IndexMap::new();
    for sample in elements(&doc, "SAMPLE") {
        let (Some(alias), Some(accession)) = (sample.attribute("alias"), sample.attribute("accession"))
        else {
            debug!("skipping sample without alias or accession");
            continue;
        };
        let external_id = child(sample, "EXT_ID")
            .and_then(|ext| ext.attribute("accession"))
            .map(str::to_string);
        insert_unique(
            &mut out,
            "samples receipt",
            alias,
            SampleReceipt {
                alias: alias.to_string(),
                accession: accession.to_string(),
                external_id,
            },
        )?;
    }
    Ok(out)
}

fn alias_accessions(
    xml: &str,
    element: &'static str,
) -> Result<IndexMap<String, String>, SubmitError> {
    let doc = parse(xml)?;
    let mut out = IndexMap::new();
    for node in elements(&doc, element) {
        let (Some(alias), Some(accession)) = (node.attribute("alias"), node.attribute("accession"))
        else {
            continue;
        };
        insert_unique(&mut out, "object receipt", alias, accession.to_string())?;
    }
    Ok(out)
}

pub fn extract_experiments(xml: &str) -> Result<IndexMap<String, String>, SubmitError> {
    alias_accessions(xml, "EXPERIMENT")
}

pub fn extract_runs(xml: &str) -> Result<IndexMap<String, String>, SubmitError> {
    alias_accessions(xml, "RUN")
}

pub fn extract_experiment_samples(xml: &str) -> Result<IndexMap<String, String>, SubmitError> {
    let doc = parse(xml)?;
    let mut out = IndexMap::new();
    for experiment in elements(&doc, "EXPERIMENT") {
        let Some(alias) = experiment.attribute("alias") else {
            continue;
        };
        let accession = child(experiment, "SAMPLE_DESCRIPTOR")
            .and_then(|descriptor| descriptor.attribute("accession"))
            .ok_or_else(|| {
                SubmitError::ReceiptParse(format!(
                    "experiment {alias} has no SAMPLE_DESCRIPTOR accession"
                ))
            })?;
        insert_unique(&mut out, "experiment document", alias, accession.to_string())?;
    }
    Ok(out)
}

/// Experiment alias → forward/reverse files, from a generated run document.
/// The first `FILE` of a run is the forward read.
pub fn extract_run_files(xml: &str) -> Result<IndexMap<String, RunFiles>, SubmitError> {
    let doc = parse(xml)?;
    let mut out = IndexMap::new();
    for run in elements(&doc, "RUN") {
        let Some(experiment) = child(run, "EXPERIMENT_REF").and_then(|r| r.attribute("refname"))
        else {
            continue;
        };
        let files: Vec<(String, String)> = run
            .descendants()
            .filter(|node| node.is_element() && node.has_tag_name("FILE"))
            .map(|file| {
                (
                    file.attribute("filename").unwrap_or_default().to_string(),
                    file.attribute("checksum").unwrap_or_default().to_string(),
                )
            })
            .collect();
        let [(forward_file, forward_checksum), (reverse_file, reverse_checksum)] =
            <[(String, String); 2]>::try_from(files).map_err(|files| {
                SubmitError::ReceiptParse(format!(
                    "run for {experiment} lists {} files, expected a forward/reverse pair",
                    files.len()
                ))
            })?;
        insert_unique(
            &mut out,
            "run document",
            experiment,
            RunFiles {
                forward_file,
                forward_checksum,
                reverse_file,
                reverse_checksum,
            },
        )?;
    }
    Ok(out)
}

pub fn extract_project_accession(xml: &str) -> Result<Option<String>, SubmitError> {
    let doc = parse(xml)?;
    let value = elements(&doc, "SAMPLE_ATTRIBUTE").find_map(|attribute| {
        let tag = child(attribute, "TAG").map(text_of)?;
        if !tag.eq_ignore_ascii_case("project name") {
            return None;
        }
        child(attribute, "VALUE").map(text_of)
    });
    Ok(value.filter(|value| !value.is_empty()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const SAMPLES_RECEIPT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<RECEIPT receiptDate="2024-02-01T10:00:00.000Z" submissionFile="submission.xml" success="true">
  <SAMPLE accession="ERS1" alias="S1" status="PRIVATE">
    <EXT_ID accession="SAMEA1" type="biosample"/>
  </SAMPLE>
  <SAMPLE accession="ERS2" alias="S2" status="PRIVATE"/>
  <SUBMISSION accession="ERA1" alias="SUBMISSION-1"/>
  <MESSAGES>
    <INFO>All objects in this submission are set to private status (HOLD).</INFO>
  </MESSAGES>
  <ACTIONS>ADD</ACTIONS>
</RECEIPT>"#;

    #[test]
    fn successful_receipt() {
        let result = parse_receipt(SAMPLES_RECEIPT).unwrap();
        assert!(result.success);
        assert!(result.errors.is_empty());
        assert_eq!(result.info.len(), 1);
        assert_eq!(result.message(), "Submission successful. No errors reported.");
    }

    #[test]
    fn failed_receipt_collects_errors() {
        let xml = r#"<RECEIPT success="FALSE"><MESSAGES><ERROR> alias exists </ERROR><INFO>hold</INFO></MESSAGES></RECEIPT>"#;
        let result = parse_receipt(xml).unwrap();
        assert!(!result.success);
        assert_eq!(result.errors, vec!["alias exists".to_string()]);
        assert_eq!(result.message(), "Submission failed. See error messages.");
        assert_matches!(
            result.into_result(),
            Err(SubmitError::Rejected { errors, info }) if errors.len() == 1 && info.len() == 1
        );
    }

    #[test]
    fn missing_success_attribute_is_failure() {
        let result = parse_receipt("<RECEIPT/>").unwrap();
        assert!(!result.success);
        assert_eq!(result.message(), "Submission failed. No specific errors reported.");
    }

    #[test]
    fn malformed_xml() {
        assert_matches!(parse_receipt("<RECEIPT"), Err(SubmitError::ReceiptParse(_)));
    }

    #[test]
    fn samples_keyed_by_alias() {
        let samples = extract_samples(SAMPLES_RECEIPT).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples["S1"].accession, "ERS1");
        assert_eq!(samples["S1"].external_id.as_deref(), Some("SAMEA1"));
        assert_eq!(samples["S2"].external_id, None);
        assert!(extract_runs(SAMPLES_RECEIPT).unwrap().is_empty());
    }

    #[test]
    fn duplicate_alias_rejected() {
        let xml = r#"<RECEIPT success="true"><EXPERIMENT alias="E" accession="ERX1"/><EXPERIMENT alias="E" accession="ERX2"/></RECEIPT>"#;
        assert_matches!(
            extract_experiments(xml),
            Err(SubmitError::DuplicateAlias { alias, .. }) if alias == "E"
        );
    }

    #[test]
    fn run_files_in_document_order() {
        let xml = r#"<RUN_SET>
  <RUN alias="run_PRJ-S1-16S" center_name="">
    <EXPERIMENT_REF refname="PRJ-S1-16S"/>
    <DATA_BLOCK><FILES>
      <FILE filename="S1_R1.fastq.gz" filetype="fastq" checksum_method="MD5" checksum="aa"/>
      <FILE filename="S1_R2.fastq.gz" filetype="fastq" checksum_method="MD5" checksum="bb"/>
    </FILES></DATA_BLOCK>
  </RUN>
</RUN_SET>"#;
        let files = extract_run_files(xml).unwrap();
        let run = &files["PRJ-S1-16S"];
        assert_eq!(run.forward_file, "S1_R1.fastq.gz");
        assert_eq!(run.reverse_checksum, "bb");
    }

    #[test]
    fn project_accession_from_attributes() {
        let xml = r#"<SAMPLE_SET><SAMPLE alias="S1"><SAMPLE_ATTRIBUTES>
  <SAMPLE_ATTRIBUTE><TAG>collection date</TAG><VALUE>2022-05-01</VALUE></SAMPLE_ATTRIBUTE>
  <SAMPLE_ATTRIBUTE><TAG>project name</TAG><VALUE>PRJEB67767</VALUE></SAMPLE_ATTRIBUTE>
</SAMPLE_ATTRIBUTES></SAMPLE></SAMPLE_SET>"#;
        assert_eq!(
            extract_project_accession(xml).unwrap().as_deref(),
            Some("PRJEB67767")
        );
    }
}
