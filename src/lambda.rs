//! Minimal client for the AWS Lambda custom-runtime API.
//!
//! The function binary polls `invocation/next`, runs the pipeline and posts
//! either a response or an error back for the same request id.

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, info_span, Instrument};

use crate::config::Config;
use crate::contract::{ObjectStore, Transformer};
use crate::pipeline::{handle_event, Outcome};
use crate::workspace;

pub const RUNTIME_API_ENV: &str = "AWS_LAMBDA_RUNTIME_API";
const API_VERSION: &str = "2018-06-01";
const REQUEST_ID_HEADER: &str = "Lambda-Runtime-Aws-Request-Id";
const ERROR_TYPE_HEADER: &str = "Lambda-Runtime-Function-Error-Type";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("AWS_LAMBDA_RUNTIME_API is not set")]
    MissingApi,
    #[error("runtime API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("runtime API returned {status} for {url}")]
    Status { status: u16, url: String },
    #[error("invocation is missing the Lambda-Runtime-Aws-Request-Id header")]
    MissingRequestId,
}

/// One event handed out by the runtime API.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request_id: String,
    pub payload: Vec<u8>,
}

/// Body of `invocation/{id}/error` and `init/error`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub error_message: String,
    pub error_type: String,
}

impl ErrorReport {
    pub fn new(error_type: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self {
            error_message: message.to_string(),
            error_type: error_type.into(),
        }
    }
}

pub struct RuntimeClient {
    http: reqwest::Client,
    base_url: String,
}

impl RuntimeClient {
    /// The runtime API is always local to the sandbox, so proxies are bypassed.
    pub fn new(api: &str) -> Result<Self, RuntimeError> {
        let http = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self {
            http,
            base_url: runtime_base_url(api),
        })
    }

    pub fn from_env() -> Result<Self, RuntimeError> {
        let api = std::env::var(RUNTIME_API_ENV).map_err(|_| RuntimeError::MissingApi)?;
        Self::new(&api)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Blocks until the platform hands out the next event.
    pub async fn next_invocation(&self) -> Result<Invocation, RuntimeError> {
        let url = format!("{}/invocation/next", self.base_url);
        let response = self.http.get(&url).send().await?;
        let response = check_status(response, &url)?;
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(RuntimeError::MissingRequestId)?;
        let payload = response.bytes().await?.to_vec();
        Ok(Invocation {
            request_id,
            payload,
        })
    }

    pub async fn send_response(&self, request_id: &str, body: &str) -> Result<(), RuntimeError> {
        let url = format!("{}/invocation/{request_id}/response", self.base_url);
        let response = self.http.post(&url).json(&body).send().await?;
        check_status(response, &url)?;
        Ok(())
    }

    pub async fn send_error(
        &self,
        request_id: &str,
        report: &ErrorReport,
    ) -> Result<(), RuntimeError> {
        let url = format!("{}/invocation/{request_id}/error", self.base_url);
        self.post_error(&url, report).await
    }

    /// Report a failure to start; the platform then tears the environment down.
    pub async fn init_error(&self, report: &ErrorReport) -> Result<(), RuntimeError> {
        let url = format!("{}/init/error", self.base_url);
        self.post_error(&url, report).await
    }

    /// Post a start-up failure to `init/error`. Failing to reach the API is
    /// only logged, the caller exits with the original error either way.
    pub async fn report_init_failure(&self, error_type: &str, err: &dyn std::fmt::Display) {
        error!(error_type, error = %err, "[LAMBDA][ERROR] Initialisation failed");
        let report = ErrorReport::new(error_type, err);
        if let Err(e) = self.init_error(&report).await {
            error!(error = %e, "[LAMBDA][ERROR] Failed to post init error");
        }
    }

    async fn post_error(&self, url: &str, report: &ErrorReport) -> Result<(), RuntimeError> {
        let response = self
            .http
            .post(url)
            .header(ERROR_TYPE_HEADER, "Unhandled")
            .json(report)
            .send()
            .await?;
        check_status(response, url)?;
        Ok(())
    }
}

pub fn runtime_base_url(api: &str) -> String {
    let api = api.trim_end_matches('/');
    if api.starts_with("http://") || api.starts_with("https://") {
        format!("{api}/{API_VERSION}/runtime")
    } else {
        format!("http://{api}/{API_VERSION}/runtime")
    }
}

fn check_status(response: reqwest::Response, url: &str) -> Result<reqwest::Response, RuntimeError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(RuntimeError::Status {
            status: response.status().as_u16(),
            url: url.to_string(),
        })
    }
}

/// Serve invocations until the runtime API itself fails.
pub async fn run_loop<S, T>(
    client: &RuntimeClient,
    config: &Config,
    store: &S,
    transformer: &T,
) -> Result<(), RuntimeError>
where
    S: ObjectStore + ?Sized,
    T: Transformer + ?Sized,
{
    workspace::sweep_stale(&config.workspace);
    info!(runtime_api = %client.base_url(), "[LAMBDA] Waiting for invocations");

    loop {
        let invocation = client.next_invocation().await?;
        let span = info_span!("invocation", request_id = %invocation.request_id);

        async {
            let outcome = handle_event(config, store, transformer, &invocation.payload).await;
            let posted = match &outcome {
                Outcome::Failed(e) if config.fail_on_error => {
                    let report = ErrorReport::new(format!("Pipeline.{}", e.stage()), e);
                    client.send_error(&invocation.request_id, &report).await
                }
                _ => {
                    client
                        .send_response(&invocation.request_id, outcome.response())
                        .await
                }
            };
            if let Err(e) = posted {
                error!(error = %e, "[LAMBDA][ERROR] Failed to post invocation result");
            }
        }
        .instrument(span)
        .await;
    }
}
