use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

pub const DEFAULT_DESTINATION_SUFFIX: &str = "-transformed";
pub const DEFAULT_SCRIPT_SUFFIX: &str = ".transform.txt";
pub const DEFAULT_DATA_EXTENSION: &str = "zip";

/// Everything one invocation needs to know. Every field has a default so the
/// job runs without any configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Appended to the source bucket name to get the destination bucket.
    pub destination_suffix: String,
    /// Appended to the archive key to find its transformation script.
    pub script_suffix: String,
    /// Only keys with this extension are processed.
    pub data_extension: String,
    /// Surface failed invocations as errors instead of swallowing them.
    pub fail_on_error: bool,
    pub transformer: TransformerConfig,
    pub store: StoreConfig,
    pub workspace: WorkspaceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            destination_suffix: DEFAULT_DESTINATION_SUFFIX.to_string(),
            script_suffix: DEFAULT_SCRIPT_SUFFIX.to_string(),
            data_extension: DEFAULT_DATA_EXTENSION.to_string(),
            fail_on_error: false,
            transformer: TransformerConfig::default(),
            store: StoreConfig::default(),
            workspace: WorkspaceConfig::default(),
        }
    }
}

impl Config {
    pub fn trace_loaded(&self) {
        info!(
            destination_suffix = %self.destination_suffix,
            script_suffix = %self.script_suffix,
            data_extension = %self.data_extension,
            fail_on_error = self.fail_on_error,
            transformer = ?self.transformer.command,
            workspace_root = %self.workspace.root.display(),
            "Loaded Config"
        );
        debug!(?self, "Config loaded (full debug)");
    }
}

/// How the external transformation tool is launched.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransformerConfig {
    /// Program followed by its leading arguments. The script, input and
    /// output locations are appended on every run.
    pub command: Vec<String>,
    pub timeout_secs: Option<u64>,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "java".to_string(),
                "-jar".to_string(),
                "onebusaway-gtfs-transformer-cli.jar".to_string(),
            ],
            timeout_secs: None,
        }
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Falls back to the SDK's region resolution when unset.
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("force_path_style", &self.force_path_style)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub root: PathBuf,
    pub prefix: String,
    pub stale_after_secs: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir(),
            prefix: "gtfs-transform-".to_string(),
            stale_after_secs: 3600,
        }
    }
}
