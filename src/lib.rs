pub mod cms;
pub mod config;
pub mod manifest;
pub mod reconciliation;
pub mod tokens;
pub mod utils;

// Re-export commonly used types
pub use cms::{Cms, CmsError, MemoryCms, RestAuth, RestCms};
pub use config::{read_config, ConfigError, ProvisionConfig, DEFAULT_CONFIG_FILE};
pub use manifest::{load_manifest, parse_manifest, Manifest, ManifestError, ResourceSpec};
pub use reconciliation::{
    execute_run, ReconcileError, ReconciliationSession, RunMode, RunOptions, RunSummary,
    SessionOptions,
};
pub use tokens::{TokenContext, TokenError, TokenResolver};
