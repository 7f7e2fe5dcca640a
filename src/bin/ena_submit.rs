use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use ena_submit::config::{ConfigLoader, ResolvedConfig};
use ena_submit::context::ProjectContext;
use ena_submit::domain::{Credentials, ExperimentType, Partition, RegistrationMode, UploadMode};
use ena_submit::error::SubmitError;
use ena_submit::output::{JsonOutput, OutputMode};
use ena_submit::pipeline::{ObjectsRequest, Pipeline, ProgressSink, RunRequest, UploadRequest};
use ena_submit::transport::{EnaHttpRegistrar, LftpUploader};
use ena_submit::tui::Tui;

type EnaPipeline = Pipeline<EnaHttpRegistrar, LftpUploader>;

#[derive(Parser)]
#[command(name = "ena-submit")]
#[command(about = "Register samples, experiments and runs with the European Nucleotide Archive")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true, help = "Path to an ena-submit.json configuration file")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Render the samples document from the metadata sheet")]
    Samples(ProjectArgs),
    #[command(about = "Register the samples document and save the receipt")]
    RegisterSamples(RegisterArgs),
    #[command(about = "Render experiment and run documents")]
    Objects(ObjectsArgs),
    #[command(about = "Upload read files to the archive's file host")]
    Upload(UploadArgs),
    #[command(about = "Register experiments and runs and save the receipt")]
    RegisterObjects(RegisterArgs),
    #[command(about = "Join receipts into per-type details tables")]
    Reconcile(ReconcileArgs),
    #[command(about = "Run every stage in order")]
    Run(RunArgs),
}

#[derive(Args, Clone)]
struct ProjectArgs {
    #[arg(
        long,
        help = "Sample metadata sheet (.xlsx, .xls, .csv or .tsv); its name prefix is the project",
    )]
    metadata: Utf8PathBuf,

    #[arg(long, default_value = "templates")]
    templates: Utf8PathBuf,

    #[arg(
        long,
        env = "ENA_CREDENTIALS",
        hide_env_values = true,
        help = "Archive account as user:password",
    )]
    credentials: Option<String>,
}

#[derive(Args, Clone)]
struct ReadsArgs {
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "16S,WGS",
        help = "Experiment types, comma-separated",
    )]
    types: Vec<ExperimentType>,

    #[arg(long)]
    samples_dir: Utf8PathBuf,

    #[arg(long = "pattern-16s", help = "Forward read pattern for 16S reads")]
    pattern_16s: Option<String>,

    #[arg(long = "pattern-wgs", help = "Forward read pattern for WGS reads")]
    pattern_wgs: Option<String>,
}

#[derive(Args, Clone)]
struct RegisterArgs {
    #[command(flatten)]
    project: ProjectArgs,

    #[arg(
        long,
        help = "y/yes registers in production, n/no in the test partition; absent is a dry run",
    )]
    submit: Option<String>,
}

#[derive(Args, Clone)]
struct ObjectsArgs {
    #[command(flatten)]
    project: ProjectArgs,

    #[command(flatten)]
    reads: ReadsArgs,

    #[arg(long, help = "Emit experiments even for samples without reads on disk")]
    no_file_check: bool,
}

#[derive(Args, Clone)]
struct UploadArgs {
    #[command(flatten)]
    project: ProjectArgs,

    #[command(flatten)]
    reads: ReadsArgs,

    #[arg(long, help = "Tab-separated forward/reverse table used instead of scanning")]
    mapping: Option<Utf8PathBuf>,

    #[arg(long, help = "Confirm each file in the transfer tool")]
    interactive: bool,

    #[arg(long)]
    dry_run: bool,

    #[arg(long, help = "Decompress every file before sending it")]
    verify_gzip: bool,
}

#[derive(Args, Clone)]
struct ReconcileArgs {
    #[command(flatten)]
    project: ProjectArgs,

    #[arg(long, value_delimiter = ',', default_value = "16S,WGS")]
    types: Vec<ExperimentType>,

    #[arg(long, help = "Study accession written into every row")]
    study_accession: Option<String>,
}

#[derive(Args, Clone)]
struct RunArgs {
    #[command(flatten)]
    project: ProjectArgs,

    #[command(flatten)]
    reads: ReadsArgs,

    #[arg(long)]
    submit: Option<String>,

    #[arg(long)]
    no_file_check: bool,

    #[arg(long)]
    interactive_upload: bool,

    #[arg(long)]
    verify_gzip: bool,

    #[arg(long)]
    study_accession: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<SubmitError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SubmitError) -> u8 {
    match error {
        SubmitError::InvalidExperimentType(_)
        | SubmitError::InvalidRegistrationMode(_)
        | SubmitError::InvalidCredentials
        | SubmitError::ConfigRead(_)
        | SubmitError::ConfigParse(_)
        | SubmitError::MissingTemplate(_)
        | SubmitError::MetadataFormat(_)
        | SubmitError::MissingInput(_)
        | SubmitError::OutputExists(_)
        | SubmitError::FileNotFound(_)
        | SubmitError::MissingReverseRead { .. } => 2,
        SubmitError::RegistrationHttp(_)
        | SubmitError::RegistrationStatus { .. }
        | SubmitError::Upload(_)
        | SubmitError::MissingTool(_) => 3,
        SubmitError::Rejected { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Samples(args) => {
            let pipeline = build_pipeline(config, &args)?;
            execute(output_mode, "samples", pipeline, |pipeline, sink| {
                pipeline.render_samples(sink)
            })
        }
        Commands::RegisterSamples(args) => {
            let mode = RegistrationMode::from_flag(args.submit.as_deref())?;
            let pipeline = build_pipeline(config, &args.project)?;
            if !confirm_registration(output_mode, mode, pipeline.context())? {
                return Err(miette::Report::msg("registration cancelled"));
            }
            execute(output_mode, "register-samples", pipeline, move |pipeline, sink| {
                pipeline.register_samples(mode, sink)
            })
        }
        Commands::Objects(args) => {
            let config = apply_patterns(config, &args.reads);
            let pipeline = build_pipeline(config, &args.project)?;
            let request = ObjectsRequest {
                experiment_types: args.reads.types,
                samples_dir: args.reads.samples_dir,
                require_reads: !args.no_file_check,
            };
            execute(output_mode, "objects", pipeline, move |pipeline, sink| {
                pipeline.render_objects(&request, sink)
            })
        }
        Commands::Upload(args) => {
            let config = apply_patterns(config, &args.reads);
            let pipeline = build_pipeline(config, &args.project)?;
            let mode = upload_mode(args.interactive);
            let request = UploadRequest {
                experiment_types: args.reads.types,
                samples_dir: args.reads.samples_dir,
                mapping: args.mapping,
                mode,
                dry_run: args.dry_run,
                verify_gzip: args.verify_gzip,
            };
            execute(
                transfer_output_mode(output_mode, mode),
                "upload",
                pipeline,
                move |pipeline, sink| pipeline.upload_files(&request, sink),
            )
        }
        Commands::RegisterObjects(args) => {
            let mode = RegistrationMode::from_flag(args.submit.as_deref())?;
            let pipeline = build_pipeline(config, &args.project)?;
            if !confirm_registration(output_mode, mode, pipeline.context())? {
                return Err(miette::Report::msg("registration cancelled"));
            }
            execute(output_mode, "register-objects", pipeline, move |pipeline, sink| {
                pipeline.register_objects(mode, sink)
            })
        }
        Commands::Reconcile(args) => {
            let pipeline = build_pipeline(config, &args.project)?;
            execute(output_mode, "reconcile", pipeline, move |pipeline, sink| {
                pipeline.reconcile(&args.types, args.study_accession.as_deref(), sink)
            })
        }
        Commands::Run(args) => {
            let registration = RegistrationMode::from_flag(args.submit.as_deref())?;
            let config = apply_patterns(config, &args.reads);
            let pipeline = build_pipeline(config, &args.project)?;
            if !confirm_registration(output_mode, registration, pipeline.context())? {
                return Err(miette::Report::msg("registration cancelled"));
            }
            let upload_mode = upload_mode(args.interactive_upload);
            let request = RunRequest {
                registration,
                objects: ObjectsRequest {
                    experiment_types: args.reads.types,
                    samples_dir: args.reads.samples_dir,
                    require_reads: !args.no_file_check,
                },
                upload_mode,
                verify_gzip: args.verify_gzip,
                study_accession: args.study_accession,
            };
            execute(
                transfer_output_mode(output_mode, upload_mode),
                "run",
                pipeline,
                move |pipeline, sink| pipeline.run(&request, sink),
            )
        }
    }
}

fn build_pipeline(config: ResolvedConfig, args: &ProjectArgs) -> miette::Result<EnaPipeline> {
    let context = ProjectContext::new(&args.metadata, &args.templates)?;
    let credentials = args
        .credentials
        .as_deref()
        .map(str::parse::<Credentials>)
        .transpose()?;
    let registrar = EnaHttpRegistrar::new(config.endpoints.clone())?;
    let uploader = LftpUploader::new(&config.upload_host);
    Ok(Pipeline::new(config, context, registrar, uploader).with_credentials(credentials))
}

fn apply_patterns(config: ResolvedConfig, reads: &ReadsArgs) -> ResolvedConfig {
    let mut config = config;
    if let Some(pattern) = &reads.pattern_16s {
        config = config.with_forward_pattern(ExperimentType::Amplicon, pattern);
    }
    if let Some(pattern) = &reads.pattern_wgs {
        config = config.with_forward_pattern(ExperimentType::WholeSequence, pattern);
    }
    config
}

fn upload_mode(interactive: bool) -> UploadMode {
    if interactive {
        UploadMode::Interactive
    } else {
        UploadMode::Batch
    }
}

fn transfer_output_mode(output_mode: OutputMode, upload_mode: UploadMode) -> OutputMode {
    match upload_mode {
        UploadMode::Interactive => OutputMode::NonInteractive,
        UploadMode::Batch => output_mode,
    }
}

fn confirm_registration(
    output_mode: OutputMode,
    mode: RegistrationMode,
    context: &ProjectContext,
) -> miette::Result<bool> {
    match (output_mode, mode) {
        (OutputMode::Interactive, RegistrationMode::Submit(Partition::Production)) => {
            let mut tui = Tui::new("confirm", context.project_name());
            tui.confirm(&format!(
                "Register project {} in the production archive? This cannot be undone.",
                context.project_name()
            ))
        }
        _ => Ok(true),
    }
}

fn execute<T, F>(
    output_mode: OutputMode,
    command: &str,
    pipeline: EnaPipeline,
    stage: F,
) -> miette::Result<()>
where
    T: Serialize + Send + 'static,
    F: FnOnce(&EnaPipeline, &dyn ProgressSink) -> Result<T, SubmitError> + Send + 'static,
{
    let report = match output_mode {
        OutputMode::NonInteractive => stage(&pipeline, &JsonOutput)?,
        OutputMode::Interactive => {
            let mut tui = Tui::new(command, pipeline.context().project_name());
            tui.run(move |sink| stage(&pipeline, sink))?
        }
    };
    JsonOutput::print(&report).into_diagnostic()?;
    Ok(())
}
