use super::branding::{
    add_publishing_pages, apply_image_renditions, deploy_master_pages, deploy_page_layouts,
    export_search_settings, import_search_settings, upload_files,
};
use super::channels::sync_device_channels;
use super::content_types::create_content_types;
use super::lists::reconcile_lists;
use super::navigation::{collect_navigation_nodes, sync_navigation};
use super::sites::{create_role_definitions, create_sub_sites, import_term_sets};
use super::teardown::deactivate;
use super::{ReconcileError, ReconciliationSession, RunSummary, SessionOptions};
use crate::cms::Cms;
use crate::manifest::Manifest;
use crate::utils::{read_last_run, write_last_run};
use chrono::Utc;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// What a run does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Activate,
    Deactivate,
    /// Activate, skipping local files unchanged since the last run
    ActivateIncremental,
    /// Incremental activation with verbose logging
    Debug,
    Export,
}

impl RunMode {
    pub fn is_incremental(self) -> bool {
        matches!(self, RunMode::ActivateIncremental | RunMode::Debug)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Activate => "activate",
            RunMode::Deactivate => "deactivate",
            RunMode::ActivateIncremental => "activateIncremental",
            RunMode::Debug => "debug",
            RunMode::Export => "export",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = ReconcileError;

    /// Mode names are matched exactly
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            RunMode::Activate,
            RunMode::Deactivate,
            RunMode::ActivateIncremental,
            RunMode::Debug,
            RunMode::Export,
        ]
        .into_iter()
        .find(|mode| mode.as_str() == s)
        .ok_or_else(|| ReconcileError::UnknownMode(s.to_string()))
    }
}

/// Inputs of one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: RunMode,
    pub site_url: String,
    pub assets_dir: PathBuf,
    pub timestamp_file: PathBuf,
    pub term_group: Option<String>,
    /// Destination of exported search settings
    pub export_path: PathBuf,
}

/// Run one mode against the site collection.
///
/// Only fatal errors are returned; everything else is counted in the
/// summary.
pub async fn execute_run(
    cms: Arc<dyn Cms>,
    manifest: Manifest,
    options: &RunOptions,
) -> Result<RunSummary, ReconcileError> {
    let last_run = if options.mode.is_incremental() {
        read_last_run(&options.timestamp_file).await
    } else {
        None
    };

    let session = ReconciliationSession::open(
        cms,
        manifest,
        SessionOptions {
            site_url: options.site_url.clone(),
            assets_dir: options.assets_dir.clone(),
            last_run,
            term_group: options.term_group.clone(),
        },
    )
    .await?;

    info!(mode = %options.mode, web = %session.web.url, last_run = ?last_run, "Starting run");
    let mut summary = RunSummary::default();

    match options.mode {
        RunMode::Activate | RunMode::ActivateIncremental | RunMode::Debug => {
            activate(&session, &mut summary).await?;
            if let Err(e) = write_last_run(&options.timestamp_file, Utc::now()).await {
                warn!(
                    file = %options.timestamp_file.display(),
                    error = %e,
                    "Unable to save timestamp"
                );
            }
        }
        RunMode::Deactivate => deactivate(&session, &mut summary).await?,
        RunMode::Export => {
            let result = export_search_settings(&session, &options.export_path).await;
            summary.absorb("export", result)?;
        }
    }

    info!(
        attempted = summary.sections_attempted,
        failed = summary.sections_failed,
        rows_failed = summary.rows_failed,
        "Run finished"
    );
    Ok(summary)
}

async fn activate(
    session: &ReconciliationSession,
    summary: &mut RunSummary,
) -> Result<(), ReconcileError> {
    import_term_sets(session, summary).await?;
    create_content_types(session, summary).await?;
    reconcile_lists(session, summary).await?;
    upload_files(session, summary).await?;

    let result = import_search_settings(session).await;
    summary.absorb("search settings", result)?;

    deploy_master_pages(session, summary).await?;
    deploy_page_layouts(session, summary).await?;

    let result = create_role_definitions(session).await;
    summary.absorb("role definitions", result)?;

    create_sub_sites(session, summary).await?;
    add_publishing_pages(session, summary).await?;

    let result = async {
        let nodes = collect_navigation_nodes(session).await?;
        sync_navigation(session.cms.as_ref(), &session.web, &nodes).await
    }
    .await;
    summary.absorb("navigation", result)?;

    let result = sync_device_channels(session, summary).await;
    summary.absorb("device channels", result)?;

    let result = apply_image_renditions(session).await;
    summary.absorb("image renditions", result)?;

    Ok(())
}
