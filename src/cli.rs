use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, info_span, Instrument};

use crate::contract::{LocalJob, ObjectStore};
use crate::lambda::RuntimeClient;
use crate::load_config::load_config;
use crate::pipeline::{handle_event, transform_local, Outcome};
use crate::store::{LocalObjectStore, S3ObjectStore};
use crate::transform::CommandTransformer;

/// CLI for gtfs-transformer: apply transformation scripts to GTFS archives.
#[derive(Parser)]
#[clap(
    name = "gtfs-transformer",
    version,
    about = "Transform GTFS archives dropped into an S3 bucket and publish the result"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Handle a single S3 notification event
    Handle {
        /// Path to the event JSON, or `-` for stdin
        #[clap(long)]
        event: PathBuf,
        /// Serve objects from this directory (`<root>/<bucket>/<key>`) instead of S3
        #[clap(long)]
        local_root: Option<PathBuf>,
        /// Path to the YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
    },
    /// Serve invocations from the Lambda runtime API
    Lambda {
        /// Path to the YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
    },
    /// Transform a local archive without touching any object store
    Transform {
        /// GTFS archive to transform
        #[clap(long)]
        archive: PathBuf,
        /// Transformation script
        #[clap(long)]
        script: PathBuf,
        /// Where to write the transformed archive
        #[clap(long)]
        output: PathBuf,
        /// Path to the YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Handle {
            event,
            local_root,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let payload = read_event(&event)?;
            let transformer = CommandTransformer::new(&config.transformer)?;
            let store: Box<dyn ObjectStore> = match local_root {
                Some(root) => Box::new(LocalObjectStore::new(root)),
                None => Box::new(S3ObjectStore::new(&config.store).await?),
            };

            let request_id = uuid::Uuid::new_v4();
            let outcome = handle_event(&config, store.as_ref(), &transformer, &payload)
                .instrument(info_span!("invocation", request_id = %request_id))
                .await;

            println!("{}", serde_json::to_string(outcome.response())?);
            print_outcome(&outcome);
            if outcome.is_failure() && config.fail_on_error {
                anyhow::bail!("invocation failed");
            }
            Ok(())
        }
        Commands::Lambda { config } => {
            let client = RuntimeClient::from_env()?;
            let config = match load_config(config.as_deref()) {
                Ok(config) => config,
                Err(e) => {
                    client.report_init_failure("Runtime.ConfigError", &e).await;
                    return Err(e);
                }
            };
            let transformer = match CommandTransformer::new(&config.transformer) {
                Ok(transformer) => transformer,
                Err(e) => {
                    client.report_init_failure("Runtime.TransformerError", &e).await;
                    return Err(e.into());
                }
            };
            let store = match S3ObjectStore::new(&config.store).await {
                Ok(store) => store,
                Err(e) => {
                    client.report_init_failure("Runtime.StoreError", &e).await;
                    return Err(e.into());
                }
            };
            info!("Lambda runtime starting");
            crate::lambda::run_loop(&client, &config, &store, &transformer).await?;
            Ok(())
        }
        Commands::Transform {
            archive,
            script,
            output,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let transformer = CommandTransformer::new(&config.transformer)?;
            let job = LocalJob {
                archive,
                script,
                output,
            };
            match transform_local(&config, &transformer, &job).await {
                Ok(report) => {
                    println!(
                        "Transformed {} file(s) with {} operation(s) into {} ({} entries)",
                        report.input_files,
                        report.operations.len(),
                        job.output.display(),
                        report.entries
                    );
                    Ok(())
                }
                Err(e) => {
                    eprintln!("[ERROR] Transformation failed at {}: {}", e.stage(), e);
                    Err(anyhow::Error::new(e))
                }
            }
        }
    }
}

fn read_event(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("failed to read event from stdin")?;
        Ok(buf)
    } else {
        std::fs::read(path).with_context(|| format!("failed to read event file {}", path.display()))
    }
}

fn print_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::Skipped(reason) => println!("Skipped: {reason}"),
        Outcome::Completed(report) => {
            println!(
                "Completed: s3://{}/{} -> s3://{}/{}",
                report.source.bucket,
                report.source.key,
                report.destination.bucket,
                report.destination.key
            );
            println!("{:#?}", report);
        }
        Outcome::Failed(e) => eprintln!("[ERROR] Failed at {}: {}", e.stage(), e),
    }
}
