use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use reqwest::blocking::multipart::Form;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, info};

use crate::config::Endpoints;
use crate::domain::{Credentials, Partition, UploadMode};
use crate::error::SubmitError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionForm {
    pub files: Vec<(String, Utf8PathBuf)>,
    pub fields: Vec<(String, String)>,
}

impl SubmissionForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, name: &str, path: &Utf8Path) -> Self {
        self.files.push((name.to_string(), path.to_path_buf()));
        self
    }

    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.fields.push((name.to_string(), value.to_string()));
        self
    }
}

pub trait Registrar: Send + Sync {
    /// Posts the form and returns the raw receipt. No retries: a repeated
    /// registration creates duplicate remote objects.
    fn register(
        &self,
        form: &SubmissionForm,
        credentials: &Credentials,
        partition: Partition,
    ) -> Result<Vec<u8>, SubmitError>;
}

pub trait Uploader: Send + Sync {
    fn upload(
        &self,
        files: &[PathBuf],
        credentials: &Credentials,
        mode: UploadMode,
    ) -> Result<(), SubmitError>;
}

#[derive(Clone)]
pub struct EnaHttpRegistrar {
    client: Client,
    endpoints: Endpoints,
}

impl EnaHttpRegistrar {
    pub fn new(endpoints: Endpoints) -> Result<Self, SubmitError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ena-submit/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SubmitError::RegistrationHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|err| SubmitError::RegistrationHttp(err.to_string()))?;
        Ok(Self { client, endpoints })
    }

    pub fn endpoint(&self, partition: Partition) -> &str {
        match partition {
            Partition::Production => &self.endpoints.production,
            Partition::Test => &self.endpoints.test,
        }
    }
}

impl Registrar for EnaHttpRegistrar {
    fn register(
        &self,
        form: &SubmissionForm,
        credentials: &Credentials,
        partition: Partition,
    ) -> Result<Vec<u8>, SubmitError> {
        let mut multipart = Form::new();
        for (name, path) in &form.files {
            multipart = multipart
                .file(name.clone(), path.as_std_path())
                .map_err(|_| SubmitError::MissingInput(path.clone()))?;
        }
        for (name, value) in &form.fields {
            multipart = multipart.text(name.clone(), value.clone());
        }

        let url = self.endpoint(partition);
        info!(%url, %partition, "posting registration");
        let response = self
            .client
            .post(url)
            .basic_auth(credentials.user(), Some(credentials.password()))
            .multipart(multipart)
            .send()
            .map_err(|err| SubmitError::RegistrationHttp(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "registration request failed".to_string());
            return Err(SubmitError::RegistrationStatus { status, message });
        }
        let body = response
            .bytes()
            .map_err(|err| SubmitError::RegistrationHttp(err.to_string()))?;
        Ok(body.to_vec())
    }
}

#[derive(Clone)]
pub struct LftpUploader {
    lftp: Option<PathBuf>,
    host: String,
}

impl LftpUploader {
    pub fn new(host: &str) -> Self {
        Self {
            lftp: find_in_path("lftp"),
            host: host.to_string(),
        }
    }

    fn require_lftp(&self) -> Result<&PathBuf, SubmitError> {
        self.lftp
            .as_ref()
            .ok_or_else(|| SubmitError::MissingTool("lftp".to_string()))
    }
}

pub fn mput_script(files: &[PathBuf], mode: UploadMode) -> String {
    let quoted: Vec<String> = files
        .iter()
        .map(|file| format!("\"{}\"", file.display()))
        .collect();
    let flag = match mode {
        UploadMode::Interactive => "",
        UploadMode::Batch => "-c ",
    };
    format!("mput {flag}{}; bye", quoted.join(" "))
}

impl Uploader for LftpUploader {
    fn upload(
        &self,
        files: &[PathBuf],
        credentials: &Credentials,
        mode: UploadMode,
    ) -> Result<(), SubmitError> {
        let lftp = self.require_lftp()?;
        if files.is_empty() {
            return Ok(());
        }
        let mut cmd = Command::new(lftp);
        cmd.arg("--env-password")
            .arg(format!("{}@{}", credentials.user(), self.host))
            .arg("-e")
            .arg(mput_script(files, mode))
            .env("LFTP_PASSWORD", credentials.password());
        debug!(files = files.len(), host = %self.host, "starting lftp");

        match mode {
            UploadMode::Interactive => {
                let status = cmd
                    .stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit())
                    .status()
                    .map_err(|err| SubmitError::Upload(err.to_string()))?;
                if !status.success() {
                    return Err(SubmitError::Upload(format!("lftp exited with {status}")));
                }
            }
            UploadMode::Batch => {
                let output = cmd
                    .output()
                    .map_err(|err| SubmitError::Upload(err.to_string()))?;
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    let message = if stderr.is_empty() {
                        format!("lftp exited with {}", output.status)
                    } else {
                        stderr
                    };
                    return Err(SubmitError::Upload(message));
                }
            }
        }
        Ok(())
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .flat_map(|dir| [dir.join(format!("{name}.exe")), dir.join(name)])
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mput_modes() {
        let files = vec![PathBuf::from("/d/S1_1.fq.gz"), PathBuf::from("/d/S1_2.fq.gz")];
        assert_eq!(
            mput_script(&files, UploadMode::Batch),
            "mput -c \"/d/S1_1.fq.gz\" \"/d/S1_2.fq.gz\"; bye"
        );
        assert_eq!(
            mput_script(&files, UploadMode::Interactive),
            "mput \"/d/S1_1.fq.gz\" \"/d/S1_2.fq.gz\"; bye"
        );
    }

    #[test]
    fn form_builder_keeps_order() {
        let form = SubmissionForm::new()
            .file("SUBMISSION", Utf8Path::new("submission.xml"))
            .file("SAMPLE", Utf8Path::new("PRJ_ena_samples.xml"))
            .field("LAUNCH", "YES");
        assert_eq!(form.files[0].0, "SUBMISSION");
        assert_eq!(form.files[1].1.as_str(), "PRJ_ena_samples.xml");
        assert_eq!(form.fields, vec![("LAUNCH".to_string(), "YES".to_string())]);
    }

    #[test]
    fn endpoint_by_partition() {
        let registrar = EnaHttpRegistrar::new(Endpoints {
            production: "https://prod.example/submit/".to_string(),
            test: "https://test.example/submit/".to_string(),
        })
        .unwrap();
        assert_eq!(
            registrar.endpoint(Partition::Test),
            "https://test.example/submit/"
        );
    }
}
