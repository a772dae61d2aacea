#![doc = "Print-queue integration for the CLI: bridges the core PrintQueue trait to an OctoPrint-style server with a continuous-print plugin."]
//
//! # Print-queue client (CLI <-> Core)
//!
//! This module wires up the [`PrintQueue`] trait for real use against an
//! OctoPrint-compatible server: file upload via the files API, job
//! submission and status via the continuous-print plugin endpoints, and
//! printer state via the printer API.
//!
//! ## Client Usage
//!
//! - Construct [`OctoClient`] using environment variables
//!   (`OCTOPRINT_URL`, `OCTOPRINT_API_KEY`).
//! - All transport, serialization, and error handling are encapsulated in
//!   the client implementation; every failure maps to [`UploadError`],
//!   which the core scheduler treats as retryable.
//!
//! For the full trait contract, see core's [`contract`] module.
//!
//! [`contract`]: autoslice_core::contract

use std::env;
use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use autoslice_core::contract::{
    JobStatus, NewPrintJob, PrintQueue, SubmittedJob, UploadError,
};

const API_KEY_HEADER: &str = "X-Api-Key";

pub struct OctoClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OctoClient {
    pub fn new_from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok(); // loads environment variables from .env if present
        let base_url = env::var("OCTOPRINT_URL")
            .map_err(|_| anyhow::anyhow!("OCTOPRINT_URL missing in environment"))?;
        let api_key = env::var("OCTOPRINT_API_KEY")
            .map_err(|_| anyhow::anyhow!("OCTOPRINT_API_KEY missing in environment"))?;
        info!(
            base_url = %base_url,
            api_key_set = !api_key.is_empty(),
            "Initialized OctoClient from environment"
        );
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json(&self, path: &str) -> Result<Value, UploadError> {
        let resp = self
            .http
            .get(self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(http_err)?;
        let status = resp.status();
        let body: Value = resp.json().await.map_err(http_err)?;
        if !status.is_success() {
            return Err(UploadError::Api {
                status: status.as_u16(),
                body: body.to_string(),
            });
        }
        Ok(body)
    }

    async fn post_form(&self, path: &str, params: &[(&str, String)]) -> Result<Value, UploadError> {
        let resp = self
            .http
            .post(self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
            .form(params)
            .send()
            .await
            .map_err(http_err)?;
        let status = resp.status();
        let body: Value = resp.json().await.map_err(http_err)?;
        if !status.is_success() {
            return Err(UploadError::Api {
                status: status.as_u16(),
                body: body.to_string(),
            });
        }
        Ok(body)
    }

    async fn post_multipart(
        &self,
        path: &str,
        form: multipart::Form,
    ) -> Result<Value, UploadError> {
        let resp = self
            .http
            .post(self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(http_err)?;
        let status = resp.status();
        let body: Value = resp.json().await.map_err(http_err)?;
        if !status.is_success() {
            return Err(UploadError::Api {
                status: status.as_u16(),
                body: body.to_string(),
            });
        }
        Ok(body)
    }
}

fn http_err(e: reqwest::Error) -> UploadError {
    UploadError::Http(e.to_string())
}

fn collect_jobs(state: &Value) -> Vec<&Value> {
    let mut jobs = Vec::new();
    if let Some(queues) = state.get("queues").and_then(Value::as_array) {
        for queue in queues {
            if let Some(queue_jobs) = queue.get("jobs").and_then(Value::as_array) {
                jobs.extend(queue_jobs.iter());
            }
        }
    }
    jobs
}

#[async_trait]
impl PrintQueue for OctoClient {
    async fn ensure_folder(&self, folder: &str) -> Result<(), UploadError> {
        let listing = self.get_json("/api/files/local").await?;
        let exists = listing
            .get("files")
            .and_then(Value::as_array)
            .map(|files| {
                files.iter().any(|f| {
                    f.get("type").and_then(Value::as_str) == Some("folder")
                        && f.get("name").and_then(Value::as_str) == Some(folder)
                })
            })
            .unwrap_or(false);
        if exists {
            debug!(folder, "Project folder already exists");
            return Ok(());
        }
        info!(folder, "Creating project folder");
        let form = multipart::Form::new().text("foldername", folder.to_string());
        let body = self.post_multipart("/api/files/local", form).await?;
        if body.get("done").and_then(Value::as_bool) != Some(true) {
            return Err(UploadError::Api {
                status: 200,
                body: format!("folder creation not acknowledged: {body}"),
            });
        }
        Ok(())
    }

    async fn upload_gcode(&self, local: &Path, folder: &str) -> Result<String, UploadError> {
        let filename = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                UploadError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "gcode path has no file name",
                ))
            })?;
        let bytes = tokio::fs::read(local).await?;

        // Content hash travels as userdata so re-uploads are auditable.
        let content_hash = {
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            format!("{:x}", hasher.finalize())
        };

        info!(
            file = %local.display(),
            folder,
            size = bytes.len(),
            sha256 = %content_hash,
            "Uploading Gcode"
        );
        let form = multipart::Form::new()
            .part(
                "file",
                multipart::Part::bytes(bytes).file_name(filename.clone()),
            )
            .text("path", format!("{folder}/"))
            .text("userdata", json!({ "sha256": content_hash }).to_string());
        let body = self.post_multipart("/api/files/local", form).await?;
        if body.get("done").and_then(Value::as_bool) != Some(true) {
            return Err(UploadError::Api {
                status: 200,
                body: format!("upload not acknowledged: {body}"),
            });
        }
        Ok(format!("{folder}/{filename}"))
    }

    async fn submit_job(&self, job: NewPrintJob) -> Result<SubmittedJob, UploadError> {
        // A multi-set job stays a draft until its last set is added.
        let draft = job.sets.len() > 1;
        let mut job_id: Option<i64> = None;
        for set in &job.sets {
            let mut params: Vec<(&str, String)> = vec![
                ("path", set.remote_path.clone()),
                ("sd", "false".to_string()),
                ("count", set.count.to_string()),
                ("jobName", job.label.clone()),
                ("jobDraft", draft.to_string()),
            ];
            if let Some(id) = job_id {
                params.push(("job", id.to_string()));
            }
            let body = self
                .post_form("/plugin/continuousprint/set/add", &params)
                .await?;
            let id = body.get("job_id").and_then(Value::as_i64).ok_or_else(|| {
                UploadError::Api {
                    status: 200,
                    body: format!("set/add response missing job_id: {body}"),
                }
            })?;
            debug!(job_id = id, path = %set.remote_path, count = set.count, "Added set to job");
            job_id = Some(id);
        }
        let job_id = job_id.ok_or_else(|| UploadError::Api {
            status: 200,
            body: "job submitted with no sets".to_string(),
        })?;
        info!(job_id, label = %job.label, "Created continuous-print job");
        Ok(SubmittedJob {
            job_id,
            label: job.label,
        })
    }

    async fn job_status(&self, job_id: i64) -> Result<JobStatus, UploadError> {
        let state = self.get_json("/plugin/continuousprint/state/get").await?;
        for job in collect_jobs(&state) {
            if job.get("id").and_then(Value::as_i64) != Some(job_id) {
                continue;
            }
            let acquired = job.get("acquired").and_then(Value::as_bool).unwrap_or(false);
            let remaining = job.get("remaining").and_then(Value::as_i64).unwrap_or(1);
            let status = if acquired {
                JobStatus::Printing
            } else if remaining == 0 {
                JobStatus::Done
            } else {
                JobStatus::Queued
            };
            debug!(job_id, ?status, "Fetched job status");
            return Ok(status);
        }
        Err(UploadError::Api {
            status: 404,
            body: format!("job {job_id} not present in queue state"),
        })
    }

    async fn list_jobs(&self) -> Result<Vec<SubmittedJob>, UploadError> {
        let state = self.get_json("/plugin/continuousprint/state/get").await?;
        let jobs = collect_jobs(&state)
            .into_iter()
            .filter_map(|job| {
                let job_id = job.get("id").and_then(Value::as_i64)?;
                let label = job.get("name").and_then(Value::as_str)?.to_string();
                Some(SubmittedJob { job_id, label })
            })
            .collect::<Vec<_>>();
        debug!(count = jobs.len(), "Listed queued jobs");
        Ok(jobs)
    }

    async fn delete_job(&self, job_id: i64) -> Result<(), UploadError> {
        info!(job_id, "Deleting queued job");
        self.post_form(
            "/plugin/continuousprint/job/rm",
            &[("job_ids", job_id.to_string())],
        )
        .await?;
        Ok(())
    }

    async fn is_printer_busy(&self) -> Result<bool, UploadError> {
        let state = self.get_json("/api/printer").await?;
        let printing = state
            .pointer("/state/flags/printing")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(printing)
    }

    async fn set_active(&self, active: bool) -> Result<(), UploadError> {
        let state = self.get_json("/plugin/continuousprint/state/get").await?;
        if state.get("active").and_then(Value::as_bool) == Some(active) {
            debug!(active, "Continuous print active state already set");
            return Ok(());
        }
        info!(active, "Setting continuous print active state");
        self.post_form(
            "/plugin/continuousprint/set_active",
            &[("active", active.to_string())],
        )
        .await?;
        Ok(())
    }
}
