//! One invocation: decode → download → transform → pack → upload → clean up.
//!
//! The pipeline is strictly sequential and handles a single notification
//! record. It works through three seams:
//!   - an [`ObjectStore`] for the archive, its script and the result
//!   - a [`Transformer`] that applies the script to the unpacked feed
//!   - a [`Workspace`] that owns every temporary file of the invocation
//!
//! # Error Handling
//! Each step returns a [`PipelineError`] tagged with its [`Stage`].
//! [`handle_event`] logs failures and folds them into an [`Outcome`]; the
//! invocation response stays the fixed `"Done"` string unless the caller opts
//! in to strict handling via `fail_on_error`.
//!
//! # Navigation
//! - Event entrypoint: [`handle_event`]
//! - Single object: [`process_object`]
//! - Local files, no store: [`transform_local`]

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::archive::{self, ArchiveError};
use crate::config::Config;
use crate::contract::{
    LocalJob, ObjectStore, StoreError, TransformError, Transformer, UploadedObject,
};
use crate::event::{file_type, ObjectRef, S3Event, S3EventRecord};
use crate::script::{ScriptError, TransformScript};
use crate::workspace::Workspace;

/// Response of an invocation that got past the file-type checks.
pub const DONE_RESPONSE: &str = "Done";
/// Response of an invocation that had nothing to do.
pub const SKIPPED_RESPONSE: &str = "";
pub const ZIP_CONTENT_TYPE: &str = "application/zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Workspace,
    Download,
    Script,
    Unpack,
    Transform,
    Pack,
    Upload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Workspace => "workspace",
            Stage::Download => "download",
            Stage::Script => "script",
            Stage::Unpack => "unpack",
            Stage::Transform => "transform",
            Stage::Pack => "pack",
            Stage::Upload => "upload",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to prepare workspace: {0}")]
    Workspace(#[source] std::io::Error),
    #[error("failed to download s3://{bucket}/{key}: {source}")]
    Download {
        bucket: String,
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("invalid transformation script: {0}")]
    Script(#[source] ScriptError),
    #[error("failed to unpack archive: {0}")]
    Unpack(#[source] ArchiveError),
    #[error("transformation failed: {0}")]
    Transform(#[source] TransformError),
    #[error("failed to pack transformed feed: {0}")]
    Pack(#[source] ArchiveError),
    #[error("failed to upload s3://{bucket}/{key}: {source}")]
    Upload {
        bucket: String,
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("{stage} task did not complete: {reason}")]
    Join { stage: Stage, reason: String },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Workspace(_) => Stage::Workspace,
            PipelineError::Download { .. } => Stage::Download,
            PipelineError::Script(_) => Stage::Script,
            PipelineError::Unpack(_) => Stage::Unpack,
            PipelineError::Transform(_) => Stage::Transform,
            PipelineError::Pack(_) => Stage::Pack,
            PipelineError::Upload { .. } => Stage::Upload,
            PipelineError::Join { stage, .. } => *stage,
        }
    }
}

/// Why an invocation did nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Undecodable(String),
    NoRecords,
    NotObjectCreated { event_name: String },
    NoFileType { key: String },
    NotData { key: String, file_type: String },
    DestinationBucket { bucket: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Undecodable(reason) => write!(f, "undecodable event: {reason}"),
            SkipReason::NoRecords => f.write_str("event carries no records"),
            SkipReason::NotObjectCreated { event_name } => {
                write!(f, "not an object-created event: {event_name}")
            }
            SkipReason::NoFileType { key } => write!(f, "unable to infer file type for key {key}"),
            SkipReason::NotData { key, file_type } => {
                write!(f, "skipping non-data {key} (type {file_type})")
            }
            SkipReason::DestinationBucket { bucket } => {
                write!(f, "bucket {bucket} is itself a destination bucket")
            }
        }
    }
}

/// What a completed invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformReport {
    pub source: ObjectRef,
    pub script_key: String,
    pub operations: Vec<String>,
    pub input_files: usize,
    pub destination: UploadedObject,
}

#[derive(Debug)]
pub enum Processed {
    Skipped(SkipReason),
    Completed(TransformReport),
}

#[derive(Debug)]
pub enum Outcome {
    Skipped(SkipReason),
    Completed(TransformReport),
    Failed(PipelineError),
}

impl Outcome {
    /// The fixed string an invocation answers with.
    pub fn response(&self) -> &'static str {
        match self {
            Outcome::Skipped(_) => SKIPPED_RESPONSE,
            Outcome::Completed(_) | Outcome::Failed(_) => DONE_RESPONSE,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

impl From<Result<Processed, PipelineError>> for Outcome {
    fn from(result: Result<Processed, PipelineError>) -> Self {
        match result {
            Ok(Processed::Skipped(reason)) => Outcome::Skipped(reason),
            Ok(Processed::Completed(report)) => Outcome::Completed(report),
            Err(e) => Outcome::Failed(e),
        }
    }
}

/// Destination bucket for results coming from `source_bucket`.
pub fn destination_bucket(config: &Config, source_bucket: &str) -> String {
    format!("{source_bucket}{}", config.destination_suffix)
}

/// Key of the transformation script belonging to `data_key`.
pub fn script_key(config: &Config, data_key: &str) -> String {
    format!("{data_key}{}", config.script_suffix)
}

/// Decide whether `object` is a data archive this job should process.
pub fn classify(config: &Config, object: &ObjectRef) -> Option<SkipReason> {
    match file_type(&object.key) {
        None => {
            return Some(SkipReason::NoFileType {
                key: object.key.clone(),
            })
        }
        Some(kind) if !kind.eq_ignore_ascii_case(&config.data_extension) => {
            return Some(SkipReason::NotData {
                key: object.key.clone(),
                file_type: kind,
            })
        }
        Some(_) => {}
    }
    if object.bucket.ends_with(&config.destination_suffix) {
        return Some(SkipReason::DestinationBucket {
            bucket: object.bucket.clone(),
        });
    }
    None
}

/// Decode a raw notification payload and process its first record.
///
/// Never fails: problems are logged and reported through the [`Outcome`].
pub async fn handle_event<S, T>(
    config: &Config,
    store: &S,
    transformer: &T,
    payload: &[u8],
) -> Outcome
where
    S: ObjectStore + ?Sized,
    T: Transformer + ?Sized,
{
    let event = match S3Event::from_slice(payload) {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "[PIPELINE][ERROR] Could not decode S3 event");
            return Outcome::Skipped(SkipReason::Undecodable(e.to_string()));
        }
    };

    let Some(record) = event.records.first() else {
        warn!("[PIPELINE] Event carries no records");
        return Outcome::Skipped(SkipReason::NoRecords);
    };
    if event.records.len() > 1 {
        warn!(
            records = event.records.len(),
            "[PIPELINE] Only the first record of an event is processed"
        );
    }

    let outcome = Outcome::from(process_record(config, store, transformer, record).await);
    match &outcome {
        Outcome::Skipped(reason) => info!(reason = %reason, "[PIPELINE] Skipped"),
        Outcome::Completed(report) => info!(
            source = %format!("{}/{}", report.source.bucket, report.source.key),
            destination = %format!("{}/{}", report.destination.bucket, report.destination.key),
            operations = report.operations.len(),
            "[PIPELINE] Completed"
        ),
        Outcome::Failed(e) => {
            error!(stage = %e.stage(), error = %e, "[PIPELINE][ERROR] Invocation failed")
        }
    }
    outcome
}

pub async fn process_record<S, T>(
    config: &Config,
    store: &S,
    transformer: &T,
    record: &S3EventRecord,
) -> Result<Processed, PipelineError>
where
    S: ObjectStore + ?Sized,
    T: Transformer + ?Sized,
{
    info!(
        event_source = record.event_source.as_deref().unwrap_or("unknown"),
        event_name = record.event_name.as_deref().unwrap_or("unknown"),
        key = %record.s3.object.key,
        "[PIPELINE] Starting transformer from event"
    );
    if !record.is_object_created() {
        return Ok(Processed::Skipped(SkipReason::NotObjectCreated {
            event_name: record.event_name.clone().unwrap_or_default(),
        }));
    }
    process_object(config, store, transformer, &record.object_ref()).await
}

/// Fetch, transform and re-upload a single archive.
pub async fn process_object<S, T>(
    config: &Config,
    store: &S,
    transformer: &T,
    object: &ObjectRef,
) -> Result<Processed, PipelineError>
where
    S: ObjectStore + ?Sized,
    T: Transformer + ?Sized,
{
    if let Some(reason) = classify(config, object) {
        return Ok(Processed::Skipped(reason));
    }

    let workspace = Workspace::create(&config.workspace).map_err(PipelineError::Workspace)?;
    let result = run_in_workspace(config, store, transformer, object, &workspace).await;
    if let Err(e) = workspace.close() {
        warn!(error = %e, "[PIPELINE] Failed to remove workspace");
    }
    result.map(Processed::Completed)
}

async fn run_in_workspace<S, T>(
    config: &Config,
    store: &S,
    transformer: &T,
    object: &ObjectRef,
    workspace: &Workspace,
) -> Result<TransformReport, PipelineError>
where
    S: ObjectStore + ?Sized,
    T: Transformer + ?Sized,
{
    let dst_bucket = destination_bucket(config, &object.bucket);
    let script_key = script_key(config, &object.key);

    // Step 1: Download the archive and its script
    download(store, &object.bucket, &object.key, &workspace.source_archive()).await?;
    download(store, &object.bucket, &script_key, &workspace.script()).await?;

    // Step 2: Unpack, transform, pack
    let transformed = transform_files(
        transformer,
        workspace,
        workspace.source_archive(),
        workspace.script(),
        workspace.packed_archive(),
    )
    .await?;

    // Step 3: Upload under the same key
    info!(bucket = %dst_bucket, key = %object.key, "[PIPELINE][UPLOAD] Uploading transformed archive");
    store
        .put_object(
            &dst_bucket,
            &object.key,
            &workspace.packed_archive(),
            ZIP_CONTENT_TYPE,
        )
        .await
        .map_err(|source| {
            error!(bucket = %dst_bucket, key = %object.key, error = %source, "[PIPELINE][ERROR][UPLOAD] Upload failed");
            PipelineError::Upload {
                bucket: dst_bucket.clone(),
                key: object.key.clone(),
                source,
            }
        })?;

    Ok(TransformReport {
        source: object.clone(),
        script_key,
        operations: transformed.operations,
        input_files: transformed.input_files,
        destination: UploadedObject {
            bucket: dst_bucket,
            key: object.key.clone(),
            entries: transformed.entries,
        },
    })
}

async fn download<S>(store: &S, bucket: &str, key: &str, dest: &Path) -> Result<(), PipelineError>
where
    S: ObjectStore + ?Sized,
{
    info!(bucket, key, "[PIPELINE][DOWNLOAD] Fetching object");
    store.get_object(bucket, key, dest).await.map_err(|source| {
        error!(bucket, key, error = %source, "[PIPELINE][ERROR][DOWNLOAD] Could not download object");
        PipelineError::Download {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source,
        }
    })
}

/// Summary of a transformation on local files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTransformReport {
    pub operations: Vec<String>,
    pub input_files: usize,
    pub entries: usize,
}

/// Run the unpack/transform/pack path on local files, without any store.
pub async fn transform_local<T>(
    config: &Config,
    transformer: &T,
    job: &LocalJob,
) -> Result<LocalTransformReport, PipelineError>
where
    T: Transformer + ?Sized,
{
    let workspace = Workspace::create(&config.workspace).map_err(PipelineError::Workspace)?;
    let result = transform_files(
        transformer,
        &workspace,
        job.archive.clone(),
        job.script.clone(),
        job.output.clone(),
    )
    .await;
    if let Err(e) = workspace.close() {
        warn!(error = %e, "Failed to remove workspace");
    }
    result
}

async fn transform_files<T>(
    transformer: &T,
    workspace: &Workspace,
    archive_path: PathBuf,
    script_path: PathBuf,
    packed_path: PathBuf,
) -> Result<LocalTransformReport, PipelineError>
where
    T: Transformer + ?Sized,
{
    let script = TransformScript::load(&script_path).map_err(|e| {
        error!(script = %script_path.display(), error = %e, "[PIPELINE][ERROR] Invalid transformation script");
        PipelineError::Script(e)
    })?;
    let operations: Vec<String> = script.ops().map(str::to_string).collect();
    info!(operations = ?operations, "[PIPELINE] Transformation script validated");

    let input_dir = workspace.input_dir();
    let unpack_dest = input_dir.clone();
    let input_files = tokio::task::spawn_blocking(move || archive::unpack(&archive_path, &unpack_dest))
        .await
        .map_err(|e| PipelineError::Join {
            stage: Stage::Unpack,
            reason: e.to_string(),
        })?
        .map_err(PipelineError::Unpack)?
        .len();

    let output_dir = workspace.output_dir();
    transformer
        .transform(&input_dir, &script_path, &output_dir)
        .await
        .map_err(PipelineError::Transform)?;

    let entries = tokio::task::spawn_blocking(move || archive::pack(&output_dir, &packed_path))
        .await
        .map_err(|e| PipelineError::Join {
            stage: Stage::Pack,
            reason: e.to_string(),
        })?
        .map_err(PipelineError::Pack)?;

    Ok(LocalTransformReport {
        operations,
        input_files,
        entries,
    })
}
