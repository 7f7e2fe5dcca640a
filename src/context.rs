use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::ExperimentType;
use crate::error::SubmitError;

#[derive(Debug, Clone)]
pub struct ProjectContext {
    project_name: String,
    metadata_path: Utf8PathBuf,
    output_dir: Utf8PathBuf,
    template_dir: Utf8PathBuf,
    samples_xml: Utf8PathBuf,
    samples_receipt: Utf8PathBuf,
    experiment_xml: Utf8PathBuf,
    run_xml: Utf8PathBuf,
    object_receipt: Utf8PathBuf,
}

impl ProjectContext {
    pub fn new(metadata_path: &Utf8Path, template_dir: &Utf8Path) -> Result<Self, SubmitError> {
        let file_name = metadata_path.file_name().ok_or_else(|| {
            SubmitError::MetadataFormat(format!("not a metadata file path: {metadata_path}"))
        })?;
        let project_name = file_name.split('_').next().unwrap_or(file_name).to_string();
        if project_name.is_empty() {
            return Err(SubmitError::MetadataFormat(format!(
                "cannot derive a project name from {file_name}"
            )));
        }

        let output_dir = match metadata_path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
            _ => Utf8PathBuf::from("."),
        };
        let artifact = |stage: &str| output_dir.join(format!("{project_name}_ena_{stage}.xml"));

        Ok(Self {
            samples_xml: artifact("samples"),
            samples_receipt: artifact("samples_receipt"),
            experiment_xml: artifact("experiment"),
            run_xml: artifact("run"),
            object_receipt: artifact("object_receipt"),
            project_name,
            metadata_path: metadata_path.to_path_buf(),
            template_dir: template_dir.to_path_buf(),
            output_dir,
        })
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn metadata_path(&self) -> &Utf8Path {
        &self.metadata_path
    }

    pub fn output_dir(&self) -> &Utf8Path {
        &self.output_dir
    }

    pub fn samples_xml(&self) -> &Utf8Path {
        &self.samples_xml
    }

    pub fn samples_receipt(&self) -> &Utf8Path {
        &self.samples_receipt
    }

    pub fn experiment_xml(&self) -> &Utf8Path {
        &self.experiment_xml
    }

    pub fn run_xml(&self) -> &Utf8Path {
        &self.run_xml
    }

    pub fn object_receipt(&self) -> &Utf8Path {
        &self.object_receipt
    }

    pub fn details_csv(&self, experiment_type: ExperimentType) -> Utf8PathBuf {
        self.output_dir.join(format!(
            "{}_details_{}.csv",
            self.project_name,
            experiment_type.label()
        ))
    }

    pub fn samples_template(&self) -> Utf8PathBuf {
        self.template_dir.join("samples.xml")
    }

    pub fn experiment_template(&self, experiment_type: ExperimentType) -> Utf8PathBuf {
        self.template_dir.join(experiment_type.experiment_template())
    }

    pub fn run_template(&self) -> Utf8PathBuf {
        self.template_dir.join("run.xml")
    }

    pub fn submission_template(&self) -> Utf8PathBuf {
        self.template_dir.join("submission.xml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let ctx = ProjectContext::new(
            Utf8Path::new("/data/HYD22_metadata_v2.xlsx"),
            Utf8Path::new("/templates"),
        )
        .unwrap();
        assert_eq!(ctx.project_name(), "HYD22");
        assert_eq!(ctx.samples_xml().as_str(), "/data/HYD22_ena_samples.xml");
        assert_eq!(ctx.samples_receipt().as_str(), "/data/HYD22_ena_samples_receipt.xml");
        assert_eq!(ctx.experiment_xml().as_str(), "/data/HYD22_ena_experiment.xml");
        assert_eq!(ctx.run_xml().as_str(), "/data/HYD22_ena_run.xml");
        assert_eq!(ctx.object_receipt().as_str(), "/data/HYD22_ena_object_receipt.xml");
        assert_eq!(
            ctx.details_csv(ExperimentType::Amplicon).as_str(),
            "/data/HYD22_details_16S.csv"
        );
        assert_eq!(
            ctx.experiment_template(ExperimentType::WholeSequence).as_str(),
            "/templates/experiment_WGS.xml"
        );
    }

    #[test]
    fn bare_file_name_uses_current_dir() {
        let ctx = ProjectContext::new(Utf8Path::new("PRJ1_sheet.csv"), Utf8Path::new("t")).unwrap();
        assert_eq!(ctx.output_dir().as_str(), ".");
        assert_eq!(ctx.samples_xml().as_str(), "./PRJ1_ena_samples.xml");
    }
}
