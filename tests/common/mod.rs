#![allow(dead_code)]

use cms_provision::cms::{Cms, MemoryCms, WebInfo};
use cms_provision::{parse_manifest, ReconciliationSession, SessionOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const SITE: &str = "https://cms.test/sites/portal";
pub const NS: &str = "urn:cms-provision:test";

/// Create a temporary directory for assets and state files
pub fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Wrap manifest sections in a root element declaring the namespace
pub fn manifest_xml(body: &str) -> String {
    format!(r#"<branding xmlns:pnp="{NS}">{body}</branding>"#)
}

/// A fresh in-memory site collection and its root web
pub async fn create_site() -> (Arc<MemoryCms>, WebInfo) {
    let cms = Arc::new(MemoryCms::new(SITE));
    let root = cms.root_web().await.expect("Root web should exist");
    (cms, root)
}

/// Open a session over `body` with assets under `assets_dir`
pub async fn open_session(
    cms: &Arc<MemoryCms>,
    body: &str,
    assets_dir: &Path,
) -> ReconciliationSession {
    let manifest = parse_manifest(&manifest_xml(body)).expect("Manifest should parse");
    ReconciliationSession::open(
        cms.clone(),
        manifest,
        SessionOptions {
            site_url: SITE.to_string(),
            assets_dir: assets_dir.to_path_buf(),
            last_run: None,
            term_group: Some("Corporate".to_string()),
        },
    )
    .await
    .expect("Session should open")
}

/// Write a local asset, creating its folders
pub async fn write_asset(assets_dir: &Path, kind: &str, name: &str, content: &str) -> PathBuf {
    let path = assets_dir.join(kind).join(name);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .expect("Failed to create asset folder");
    }
    tokio::fs::write(&path, content)
        .await
        .expect("Failed to write asset");
    path
}
