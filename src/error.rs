use std::path::PathBuf;

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SubmitError {
    #[error("invalid experiment type: {0} (expected 16S or WGS)")]
    InvalidExperimentType(String),

    #[error("invalid registration mode: {0} (use y/yes for production, n/no for test)")]
    InvalidRegistrationMode(String),

    #[error("invalid credentials: expected user:password")]
    InvalidCredentials,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("template not found: {0}")]
    MissingTemplate(Utf8PathBuf),

    #[error("template field {field} is missing from the row")]
    MissingField { field: String },

    #[error("metadata format error: {0}")]
    MetadataFormat(String),

    #[error("duplicate alias {alias} in {document}")]
    DuplicateAlias { document: String, alias: String },

    #[error("required input not found: {0}")]
    MissingInput(Utf8PathBuf),

    #[error("output already exists and will not be overwritten: {0}")]
    #[diagnostic(help("move the previous artifact aside if this stage really has to run again"))]
    OutputExists(Utf8PathBuf),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("reverse read not found for {forward}: expected {expected}")]
    MissingReverseRead { forward: PathBuf, expected: PathBuf },

    #[error("malformed checksum cache {path}: {message}")]
    ChecksumCache { path: PathBuf, message: String },

    #[error("failed to parse receipt: {0}")]
    ReceiptParse(String),

    #[error("registration request failed: {0}")]
    RegistrationHttp(String),

    #[error("archive returned status {status}: {message}")]
    RegistrationStatus { status: u16, message: String },

    #[error("archive rejected the submission: {}", .errors.join("; "))]
    Rejected { errors: Vec<String>, info: Vec<String> },

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
