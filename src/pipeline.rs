use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Datelike;
use serde::Serialize;
use tracing::{info, warn};

use crate::checksum;
use crate::config::ResolvedConfig;
use crate::context::ProjectContext;
use crate::discovery::{self, ReadDiscovery, ReadPair};
use crate::domain::{Credentials, ExperimentType, RegistrationMode, UploadMode};
use crate::error::SubmitError;
use crate::export::{self, DetailsContext, DetailsRecord};
use crate::fs_util;
use crate::metadata::{self, SampleRecord};
use crate::receipt;
use crate::reconcile::{self, ReconcileInputs, ReconciliationGap};
use crate::template::{Renderer, Row, wrap_document};
use crate::transport::{Registrar, SubmissionForm, Uploader};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Metadata,
    Samples,
    RegisterSamples,
    Objects,
    Upload,
    RegisterObjects,
    Reconcile,
    Export,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Metadata,
        Stage::Samples,
        Stage::RegisterSamples,
        Stage::Objects,
        Stage::Upload,
        Stage::RegisterObjects,
        Stage::Reconcile,
        Stage::Export,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Stage::Metadata => "Metadata",
            Stage::Samples => "Samples",
            Stage::RegisterSamples => "RegisterSamples",
            Stage::Objects => "Objects",
            Stage::Upload => "Upload",
            Stage::RegisterObjects => "RegisterObjects",
            Stage::Reconcile => "Reconcile",
            Stage::Export => "Export",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.label() == label)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SamplesReport {
    pub samples_xml: String,
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationReport {
    pub mode: String,
    pub receipt: String,
    pub submitted: bool,
    pub message: Option<String>,
    pub info: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectsReport {
    pub experiment_xml: String,
    pub run_xml: String,
    pub experiments: usize,
    pub runs: usize,
    pub skipped: Vec<String>,
    pub orphan_runs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadedFile {
    pub path: String,
    pub size_mb: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub mode: UploadMode,
    pub dry_run: bool,
    pub files: Vec<UploadedFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedTable {
    pub experiment_type: ExperimentType,
    pub path: String,
    pub rows: usize,
    pub gaps: Vec<ReconciliationGap>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub study_accession: String,
    pub tables: Vec<ExportedTable>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub samples: Option<SamplesReport>,
    pub sample_registration: Option<RegistrationReport>,
    pub objects: Option<ObjectsReport>,
    pub upload: Option<UploadReport>,
    pub object_registration: Option<RegistrationReport>,
    pub reconcile: Option<ReconcileReport>,
    pub stopped_after: Option<Stage>,
}

#[derive(Debug, Clone)]
pub struct ObjectsRequest {
    pub experiment_types: Vec<ExperimentType>,
    pub samples_dir: Utf8PathBuf,
    pub require_reads: bool,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub experiment_types: Vec<ExperimentType>,
    pub samples_dir: Utf8PathBuf,
    pub mapping: Option<Utf8PathBuf>,
    pub mode: UploadMode,
    pub dry_run: bool,
    pub verify_gzip: bool,
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub registration: RegistrationMode,
    pub objects: ObjectsRequest,
    pub upload_mode: UploadMode,
    pub verify_gzip: bool,
    pub study_accession: Option<String>,
}

fn warn_unresolved(renderer: &Renderer, path: &Utf8Path, document: &str) {
    let leftover = renderer.unresolved_tokens(document);
    if !leftover.is_empty() {
        warn!(path = %path, tokens = ?leftover, "document still contains placeholders");
    }
}

/// Reads a receipt left by an earlier stage. A rejected receipt stays on disk
/// for reference but never feeds a later stage.
fn accepted_receipt(path: &Utf8Path) -> Result<String, SubmitError> {
    let document = fs_util::read_input(path)?;
    receipt::parse_receipt(&document)?.into_result()?;
    Ok(document)
}

pub struct Pipeline<R: Registrar, U: Uploader> {
    config: ResolvedConfig,
    context: ProjectContext,
    registrar: R,
    uploader: U,
    credentials: Option<Credentials>,
    year: i32,
    started: Instant,
}

impl<R: Registrar, U: Uploader> Pipeline<R, U> {
    pub fn new(config: ResolvedConfig, context: ProjectContext, registrar: R, uploader: U) -> Self {
        Self {
            config,
            context,
            registrar,
            uploader,
            credentials: None,
            year: chrono::Local::now().year(),
            started: Instant::now(),
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = year;
        self
    }

    pub fn context(&self) -> &ProjectContext {
        &self.context
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn registrar(&self) -> &R {
        &self.registrar
    }

    fn renderer(&self) -> Renderer {
        Renderer::new(self.config.placeholder_syntax)
    }

    fn emit(&self, sink: &dyn ProgressSink, stage: Stage, detail: impl fmt::Display) {
        sink.event(ProgressEvent {
            message: format!("phase={stage}; {detail}"),
            elapsed: Some(self.started.elapsed()),
        });
    }

    fn credentials(&self) -> Result<&Credentials, SubmitError> {
        self.credentials
            .as_ref()
            .ok_or(SubmitError::InvalidCredentials)
    }

    fn load_metadata(&self, sink: &dyn ProgressSink) -> Result<Vec<SampleRecord>, SubmitError> {
        self.emit(sink, Stage::Metadata, format!("reading {}", self.context.metadata_path()));
        let records = metadata::load_metadata(self.context.metadata_path())?;
        info!(samples = records.len(), "metadata loaded");
        Ok(records)
    }

    pub fn render_samples(&self, sink: &dyn ProgressSink) -> Result<SamplesReport, SubmitError> {
        let target = self.context.samples_xml();
        fs_util::ensure_absent(target)?;
        let template = fs_util::read_template(&self.context.samples_template())?;
        let records = self.load_metadata(sink)?;

        self.emit(sink, Stage::Samples, format!("rendering {} samples", records.len()));
        let rows: Vec<Row> = records.iter().map(SampleRecord::to_row).collect();
        let renderer = self.renderer();
        let fragments = renderer.render_all(&template, &rows)?;
        let document = wrap_document("SAMPLE_SET", &fragments);
        warn_unresolved(&renderer, target, &document);
        fs_util::write_new(target, document.as_bytes())?;

        info!(path = %target, samples = fragments.len(), "samples document written");
        self.emit(sink, Stage::Samples, format!("wrote {target}"));
        Ok(SamplesReport {
            samples_xml: target.to_string(),
            samples: fragments.len(),
        })
    }

    pub fn register_samples(
        &self,
        mode: RegistrationMode,
        sink: &dyn ProgressSink,
    ) -> Result<RegistrationReport, SubmitError> {
        let form = SubmissionForm::new()
            .file("SUBMISSION", &self.context.submission_template())
            .file("SAMPLE", self.context.samples_xml())
            .field("LAUNCH", "YES");
        self.register(
            Stage::RegisterSamples,
            form,
            self.context.samples_receipt(),
            mode,
            sink,
        )
    }

    pub fn register_objects(
        &self,
        mode: RegistrationMode,
        sink: &dyn ProgressSink,
    ) -> Result<RegistrationReport, SubmitError> {
        let form = SubmissionForm::new()
            .file("SUBMISSION", &self.context.submission_template())
            .file("EXPERIMENT", self.context.experiment_xml())
            .file("RUN", self.context.run_xml());
        self.register(
            Stage::RegisterObjects,
            form,
            self.context.object_receipt(),
            mode,
            sink,
        )
    }

    fn register(
        &self,
        stage: Stage,
        form: SubmissionForm,
        receipt_path: &Utf8Path,
        mode: RegistrationMode,
        sink: &dyn ProgressSink,
    ) -> Result<RegistrationReport, SubmitError> {
        fs_util::ensure_absent(receipt_path)?;
        for (name, path) in &form.files {
            if name == "SUBMISSION" {
                if !path.as_std_path().is_file() {
                    return Err(SubmitError::MissingTemplate(path.clone()));
                }
            } else {
                fs_util::require_input(path)?;
            }
        }

        let RegistrationMode::Submit(partition) = mode else {
            self.emit(sink, stage, format!("dry run, receipt would be {receipt_path}"));
            return Ok(RegistrationReport {
                mode: mode.to_string(),
                receipt: receipt_path.to_string(),
                submitted: false,
                message: None,
                info: Vec::new(),
            });
        };

        let credentials = self.credentials()?;
        self.emit(sink, stage, format!("submitting to {partition}"));
        let bytes = self.registrar.register(&form, credentials, partition)?;
        fs_util::write_new(receipt_path, &bytes)?;
        self.emit(sink, stage, format!("receipt saved to {receipt_path}"));

        let result = receipt::parse_receipt(receipt::decode(&bytes)?)?;
        info!(stage = %stage, success = result.success, "{}", result.message());
        for error in &result.errors {
            warn!(stage = %stage, "{error}");
        }
        let message = result.message().to_string();
        let result = result.into_result()?;
        Ok(RegistrationReport {
            mode: mode.to_string(),
            receipt: receipt_path.to_string(),
            submitted: true,
            message: Some(message),
            info: result.info,
        })
    }

    pub fn render_objects(
        &self,
        request: &ObjectsRequest,
        sink: &dyn ProgressSink,
    ) -> Result<ObjectsReport, SubmitError> {
        let experiment_target = self.context.experiment_xml();
        let run_target = self.context.run_xml();
        fs_util::ensure_absent(experiment_target)?;
        fs_util::ensure_absent(run_target)?;

        let samples_receipt = accepted_receipt(self.context.samples_receipt())?;
        let samples = receipt::extract_samples(&samples_receipt)?;
        let studies: HashMap<String, String> = self
            .load_metadata(sink)?
            .into_iter()
            .map(|record| (record.alias, record.project_name))
            .collect();
        let run_template = fs_util::read_template(&self.context.run_template())?;
        let renderer = self.renderer();
        let project = self.context.project_name();

        let mut experiments = Vec::new();
        let mut experiment_aliases = BTreeSet::new();
        let mut runs = Vec::new();
        let mut skipped = Vec::new();
        let mut orphan_runs = Vec::new();

        for &experiment_type in &request.experiment_types {
            let layout = self.config.layout(experiment_type);
            let template =
                fs_util::read_template(&self.context.experiment_template(experiment_type))?;
            self.emit(
                sink,
                Stage::Objects,
                format!("rendering {experiment_type} experiments"),
            );

            for sample in samples.values() {
                let alias = experiment_type.experiment_alias(project, &sample.alias);
                if request.require_reads
                    && !discovery::sample_has_reads(&request.samples_dir, &layout, &sample.alias)
                {
                    warn!(experiment = %alias, "no reads found, experiment skipped");
                    skipped.push(alias);
                    continue;
                }
                let study = studies.get(&sample.alias).ok_or_else(|| {
                    SubmitError::MetadataFormat(format!(
                        "sample {} from the receipt is not in the metadata sheet",
                        sample.alias
                    ))
                })?;
                let row = Row::from([
                    ("STUDY_ID".to_string(), study.clone()),
                    ("EXPERIMENT_ALIAS".to_string(), alias.clone()),
                    ("EXPERIMENT_TITLE".to_string(), alias.clone()),
                    ("SAMPLE_ACCESSION".to_string(), sample.accession.clone()),
                    ("YEAR".to_string(), self.year.to_string()),
                ]);
                experiments.push(renderer.render(&template, &row)?);
                experiment_aliases.insert(alias);
            }

            self.emit(sink, Stage::Objects, format!("scanning {experiment_type} reads"));
            let pairs = self.discovery().pairs(&request.samples_dir, &layout)?;
            for pair in pairs {
                let alias = experiment_type.experiment_alias(project, &pair.sample_alias);
                let cache = checksum::cache_path(
                    &pair.forward,
                    &pair.sample_alias,
                    &self.config.checksum_cache_name,
                );
                let sums = checksum::checksum_pair(&pair.forward, &pair.reverse, &cache)?;
                if !experiment_aliases.contains(&alias) {
                    warn!(experiment = %alias, "run has no matching experiment");
                    orphan_runs.push(alias.clone());
                }
                let row = Row::from([
                    ("EXPERIMENT_ALIAS".to_string(), alias),
                    ("FORWARD_R1_FASTQ".to_string(), checksum::base_name(&pair.forward)),
                    ("FORWARD_R1_MD5SUM".to_string(), sums.forward.md5),
                    ("REVERSE_R2_FASTQ".to_string(), checksum::base_name(&pair.reverse)),
                    ("REVERSE_R2_MD5SUM".to_string(), sums.reverse.md5),
                ]);
                runs.push(renderer.render(&run_template, &row)?);
            }
        }

        let experiment_document = wrap_document("EXPERIMENT_SET", &experiments);
        let run_document = wrap_document("RUN_SET", &runs);
        warn_unresolved(&renderer, experiment_target, &experiment_document);
        warn_unresolved(&renderer, run_target, &run_document);
        fs_util::write_new(experiment_target, experiment_document.as_bytes())?;
        fs_util::write_new(run_target, run_document.as_bytes())?;
        info!(
            experiments = experiments.len(),
            runs = runs.len(),
            "experiment and run documents written"
        );
        self.emit(
            sink,
            Stage::Objects,
            format!("wrote {} experiments and {} runs", experiments.len(), runs.len()),
        );

        Ok(ObjectsReport {
            experiment_xml: experiment_target.to_string(),
            run_xml: run_target.to_string(),
            experiments: experiments.len(),
            runs: runs.len(),
            skipped,
            orphan_runs,
        })
    }

    fn discovery(&self) -> ReadDiscovery<'_> {
        ReadDiscovery {
            exclude_dirs: &self.config.exclude_dirs,
            skip_raw_reads: self.config.skip_raw_reads,
        }
    }

    fn upload_pairs(&self, request: &UploadRequest) -> Result<Vec<ReadPair>, SubmitError> {
        if let Some(mapping) = &request.mapping {
            let [experiment_type] = request.experiment_types.as_slice() else {
                return Err(SubmitError::ConfigParse(
                    "a mapping table applies to exactly one experiment type".to_string(),
                ));
            };
            let base = request
                .samples_dir
                .join(self.config.layout(*experiment_type).directory);
            return discovery::read_mapping_table(mapping, base.as_std_path());
        }

        let mut pairs = Vec::new();
        for &experiment_type in &request.experiment_types {
            let layout = self.config.layout(experiment_type);
            pairs.extend(self.discovery().pairs(&request.samples_dir, &layout)?);
        }
        Ok(pairs)
    }

    pub fn upload_files(
        &self,
        request: &UploadRequest,
        sink: &dyn ProgressSink,
    ) -> Result<UploadReport, SubmitError> {
        let pairs = self.upload_pairs(request)?;
        let files: Vec<PathBuf> = pairs
            .into_iter()
            .flat_map(|pair| [pair.forward, pair.reverse])
            .collect();

        let mut listed = Vec::with_capacity(files.len());
        for file in &files {
            let size_mb = fs_util::size_mb(file)?;
            if request.verify_gzip {
                fs_util::validate_gzip(file)?;
            }
            self.emit(
                sink,
                Stage::Upload,
                format!("{} ({size_mb:.2} MB)", file.display()),
            );
            listed.push(UploadedFile {
                path: file.display().to_string(),
                size_mb,
            });
        }

        if !request.dry_run {
            let credentials = self.credentials()?;
            self.emit(
                sink,
                Stage::Upload,
                format!("uploading {} files to {}", files.len(), self.config.upload_host),
            );
            self.uploader.upload(&files, credentials, request.mode)?;
            info!(files = files.len(), "upload finished");
        }

        Ok(UploadReport {
            mode: request.mode,
            dry_run: request.dry_run,
            files: listed,
        })
    }

    pub fn reconcile(
        &self,
        experiment_types: &[ExperimentType],
        study_accession: Option<&str>,
        sink: &dyn ProgressSink,
    ) -> Result<ReconcileReport, SubmitError> {
        for &experiment_type in experiment_types {
            fs_util::ensure_absent(&self.context.details_csv(experiment_type))?;
        }

        let samples_receipt = accepted_receipt(self.context.samples_receipt())?;
        let object_receipt = accepted_receipt(self.context.object_receipt())?;
        let experiment_document = fs_util::read_input(self.context.experiment_xml())?;
        let run_document = fs_util::read_input(self.context.run_xml())?;
        let inputs = ReconcileInputs::from_documents(
            &samples_receipt,
            &object_receipt,
            &experiment_document,
            &run_document,
            self.config.run_alias_prefix.clone(),
        )?;

        let study_accession = match study_accession {
            Some(value) => value.to_string(),
            None => self.study_accession_from_samples()?,
        };

        let mut tables = Vec::new();
        for &experiment_type in experiment_types {
            self.emit(sink, Stage::Reconcile, format!("joining {experiment_type}"));
            let result = reconcile::reconcile(&inputs, experiment_type);
            for gap in &result.gaps {
                warn!(experiment_type = %experiment_type, "{gap}");
            }

            let records: Vec<DetailsRecord> = result
                .rows
                .iter()
                .map(|row| {
                    DetailsRecord::new(
                        row,
                        DetailsContext {
                            exp_id: self.context.project_name(),
                            study_accession: &study_accession,
                            instrument: self.config.sequencing_instrument.as_deref(),
                        },
                    )
                })
                .collect();
            let path = self.context.details_csv(experiment_type);
            export::write_details(&path, &records)?;
            self.emit(
                sink,
                Stage::Export,
                format!("wrote {} rows to {path}", records.len()),
            );
            tables.push(ExportedTable {
                experiment_type,
                path: path.to_string(),
                rows: records.len(),
                gaps: result.gaps,
            });
        }

        Ok(ReconcileReport {
            study_accession,
            tables,
        })
    }

    fn study_accession_from_samples(&self) -> Result<String, SubmitError> {
        let path = self.context.samples_xml();
        if !path.as_std_path().is_file() {
            return Ok(String::new());
        }
        let document = fs_util::read_input(path)?;
        Ok(receipt::extract_project_accession(&document)?.unwrap_or_default())
    }

    pub fn run(
        &self,
        request: &RunRequest,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, SubmitError> {
        let mut report = RunReport {
            samples: Some(self.render_samples(sink)?),
            sample_registration: Some(self.register_samples(request.registration, sink)?),
            ..RunReport::default()
        };
        if request.registration.is_dry_run() {
            report.stopped_after = Some(Stage::RegisterSamples);
            return Ok(report);
        }

        report.objects = Some(self.render_objects(&request.objects, sink)?);
        report.upload = Some(self.upload_files(
            &UploadRequest {
                experiment_types: request.objects.experiment_types.clone(),
                samples_dir: request.objects.samples_dir.clone(),
                mapping: None,
                mode: request.upload_mode,
                dry_run: false,
                verify_gzip: request.verify_gzip,
            },
            sink,
        )?);
        report.object_registration = Some(self.register_objects(request.registration, sink)?);
        report.reconcile = Some(self.reconcile(
            &request.objects.experiment_types,
            request.study_accession.as_deref(),
            sink,
        )?);
        Ok(report)
    }
}
