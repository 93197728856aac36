use anyhow::Context;
use clap::Parser;
use cms_provision::config::DEFAULT_CONFIG_FILE;
use cms_provision::{
    execute_run, load_manifest, read_config, ManifestError, RestAuth, RestCms, RunMode,
    RunOptions,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

const ONLINE_AUTH: &str = "online";
const SEARCH_SETTINGS_FILE: &str = "SearchSettings.txt";

const USAGE: &str = "\
Usage: cms-provision <mode> [online]

Modes:
  activate             Provision everything in the manifest
  activateIncremental  Provision, uploading only files changed since the last run
  debug                activateIncremental with verbose logging
  deactivate           Remove provisioned files, master pages, page layouts and lists
  export               Save the search configuration to Documents/SearchSettings.txt

Pass `online` as the second argument to authenticate with the configured access token.";

/// Provision a CMS site collection from an XML manifest
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// One of activate, deactivate, activateIncremental, debug, export
    mode: String,

    /// `online` selects access-token authentication
    auth: Option<String>,

    /// Path to the JSON configuration file
    #[arg(long, env = "CMS_PROVISION_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

fn export_path() -> PathBuf {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
        .unwrap_or_default()
        .join("Documents")
        .join(SEARCH_SETTINGS_FILE)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Anything unrecognised prints usage and does no work
    let Ok(args) = Args::try_parse() else {
        println!("{}", USAGE);
        return Ok(());
    };
    let Ok(mode) = args.mode.parse::<RunMode>() else {
        println!("{}", USAGE);
        return Ok(());
    };
    let online = match args.auth.as_deref() {
        None => false,
        Some(auth) if auth.eq_ignore_ascii_case(ONLINE_AUTH) => true,
        Some(_) => {
            println!("{}", USAGE);
            return Ok(());
        }
    };

    let level = if mode == RunMode::Debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = read_config(&args.config)
        .await
        .with_context(|| format!("Unable to load configuration from {}", args.config.display()))?;

    let manifest = match load_manifest(&config.manifest_path).await {
        Ok(manifest) => manifest,
        Err(ManifestError::MissingNamespace) => {
            error!(
                manifest = %config.manifest_path.display(),
                "Namespace missing from the manifest root element"
            );
            return Ok(());
        }
        Err(e) => return Err(e).context("Unable to load manifest"),
    };

    let auth = if online {
        let token = config
            .access_token
            .clone()
            .context("The online path needs an accessToken in the configuration")?;
        RestAuth::Bearer(token)
    } else {
        RestAuth::Basic {
            username: config.qualified_username(),
            password: config.password.clone(),
        }
    };

    let site_url = config.site_url();
    let cms = RestCms::new(
        &site_url,
        auth,
        Duration::from_secs(config.request_timeout_secs),
    )?;

    info!(site = %site_url, mode = %mode, online, "Connecting");

    let options = RunOptions {
        mode,
        site_url,
        assets_dir: config.assets_dir.clone(),
        timestamp_file: config.timestamp_file.clone(),
        term_group: config.term_group_name.clone(),
        export_path: export_path(),
    };
    let summary = execute_run(Arc::new(cms), manifest, &options).await?;

    info!(
        attempted = summary.sections_attempted,
        failed = summary.sections_failed,
        rows_failed = summary.rows_failed,
        "Done!"
    );
    Ok(())
}
