//! Files, master pages, page layouts, publishing pages, search settings and
//! image renditions.

use super::folders::{ensure_folder, ensure_folders};
use super::lifecycle::{complete_lifecycle, upload_with_lifecycle};
use super::{ReconcileError, ReconciliationSession, RunSummary};
use crate::cms::{FieldValue, ImageRendition, MasterPageSlot};
use crate::manifest::ResourceSpec;
use crate::utils::{file_url, join_url, split_file_url, trim_end_slashes};
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};

/// Content type id stamped on uploaded page layouts
pub const PAGE_LAYOUT_CONTENT_TYPE_ID: &str = "0x01010007FF3E057FA8AB4AA42FCB67B453FFC100E214EEE741181F4E9F7ACC43278EE8110003D357F861E29844953D5CAA1D4D8A3B001EC1BD45392B7A458874C52A24C9F70B";

const FILES_DIR: &str = "Files";
const MASTER_PAGES_DIR: &str = "MasterPages";
const PAGE_LAYOUTS_DIR: &str = "PageLayouts";

/// Token forms left untouched in search settings
const SEARCH_SKIPPED_TOKENS: &[&str] = &["~sitecollection", "~site"];

/// Server path of a library folder inside the root web, ending in `/`
pub(crate) fn library_path(web_server_relative_url: &str, path: &str) -> String {
    format!(
        "{}/{}/",
        trim_end_slashes(web_server_relative_url),
        path.trim_matches('/')
    )
}

/// Upload the `files` section
pub async fn upload_files(
    session: &ReconciliationSession,
    summary: &mut RunSummary,
) -> Result<(), ReconcileError> {
    for spec in session.manifest.plain_section("files", "file") {
        let result = upload_file(session, spec).await;
        summary.absorb("files", result)?;
    }
    Ok(())
}

async fn upload_file(
    session: &ReconciliationSession,
    spec: &ResourceSpec,
) -> Result<(), ReconcileError> {
    let tokens = &session.tokens;
    let name = spec.text("name", tokens).await?.replace('\\', "/");
    let folder = trim_end_slashes(&spec.text("folder", tokens).await?).to_string();
    let path = spec.text("path", tokens).await?;

    let local = session.asset(FILES_DIR, &name);
    if !session.is_modified(&local).await {
        debug!(file = %name, "Not modified since last run, skipping");
        return Ok(());
    }

    let cms = session.cms.as_ref();
    let web = &session.web;
    let server_path = library_path(&web.server_relative_url, &path);
    ensure_folders(cms, web, &server_path, &folder, &name).await?;

    let url = file_url(&server_path, &folder, &name);
    let content = read_asset(&local).await?;
    info!(file = %name, target = %url, "Uploading file");
    upload_with_lifecycle(cms, web, &url, content, None).await?;
    Ok(())
}

/// Upload the `masterpages` section into the master page gallery
pub async fn deploy_master_pages(
    session: &ReconciliationSession,
    summary: &mut RunSummary,
) -> Result<(), ReconcileError> {
    for spec in session.manifest.plain_section("masterpages", "masterpage") {
        let result = deploy_master_page(session, spec).await;
        summary.absorb("master pages", result)?;
    }
    Ok(())
}

async fn deploy_master_page(
    session: &ReconciliationSession,
    spec: &ResourceSpec,
) -> Result<(), ReconcileError> {
    let tokens = &session.tokens;
    let name = spec.text("name", tokens).await?;
    let folder = trim_end_slashes(&spec.text("folder", tokens).await?).to_string();
    let description = spec.text("description", tokens).await?;
    let set_as_master = spec.attr::<bool>("setAsMaster", tokens).await?;
    let set_as_system_master = spec.attr::<bool>("setAsSystemMaster", tokens).await?;

    let local = session.asset(MASTER_PAGES_DIR, &name);
    if !session.is_modified(&local).await {
        debug!(master_page = %name, "Not modified since last run, skipping");
        return Ok(());
    }

    let cms = session.cms.as_ref();
    let web = &session.web;
    let gallery = cms.master_page_gallery(web).await?;
    let gallery_path = format!("{}/", trim_end_slashes(&gallery.root_folder_url));
    ensure_folder(cms, web, &gallery_path, &folder, None).await?;

    let url = file_url(&gallery_path, &folder, &name);
    let content = read_asset(&local).await?;
    let metadata = vec![
        (
            "MasterPageDescription".to_string(),
            FieldValue::Text(description),
        ),
        ("UIVersion".to_string(), FieldValue::Text("15".to_string())),
    ];
    info!(master_page = %name, target = %url, "Uploading master page");
    upload_with_lifecycle(cms, web, &url, content, Some(&metadata)).await?;

    if set_as_master {
        cms.set_master_page(web, MasterPageSlot::Custom, &url).await?;
        info!(master_page = %url, "Set as custom master page");
    }
    if set_as_system_master {
        cms.set_master_page(web, MasterPageSlot::System, &url).await?;
        info!(master_page = %url, "Set as system master page");
    }
    Ok(())
}

/// Upload the `htmlPagelayouts` section and stamp the layout metadata
pub async fn deploy_page_layouts(
    session: &ReconciliationSession,
    summary: &mut RunSummary,
) -> Result<(), ReconcileError> {
    for spec in session.manifest.plain_section("htmlPagelayouts", "htmlPagelayout") {
        let result = deploy_page_layout(session, spec).await;
        summary.absorb("page layouts", result)?;
    }
    Ok(())
}

async fn deploy_page_layout(
    session: &ReconciliationSession,
    spec: &ResourceSpec,
) -> Result<(), ReconcileError> {
    let tokens = &session.tokens;
    let source = spec.text("sourceFilePath", tokens).await?.replace('\\', "/");
    let name = split_file_url(&source).1.to_string();
    let title = trim_end_slashes(&spec.text("title", tokens).await?).to_string();
    let content_type_id = spec.text("associatedContentTypeID", tokens).await?;
    let folder = trim_end_slashes(&spec.text("folderHierarchy", tokens).await?).to_string();

    let local = session.asset(PAGE_LAYOUTS_DIR, &name);
    if !session.is_modified(&local).await {
        debug!(page_layout = %name, "Not modified since last run, skipping");
        return Ok(());
    }

    let cms = session.cms.as_ref();
    let web = &session.web;
    let content_type = cms
        .content_type(web, &content_type_id)
        .await?
        .ok_or(ReconcileError::ContentTypeNotFound(content_type_id))?;

    let gallery = cms.master_page_gallery(web).await?;
    let gallery_path = format!("{}/", trim_end_slashes(&gallery.root_folder_url));
    ensure_folder(cms, web, &gallery_path, &folder, None).await?;

    let url = file_url(&gallery_path, &folder, &name);
    let content = read_asset(&local).await?;
    let metadata = vec![
        (
            "ContentTypeId".to_string(),
            FieldValue::Text(PAGE_LAYOUT_CONTENT_TYPE_ID.to_string()),
        ),
        ("Title".to_string(), FieldValue::Text(title)),
        (
            "PublishingAssociatedContentType".to_string(),
            FieldValue::Text(format!(";#{};#{};#", content_type.name, content_type.id)),
        ),
    ];
    info!(page_layout = %name, target = %url, "Uploading page layout");
    upload_with_lifecycle(cms, web, &url, content, Some(&metadata)).await?;
    Ok(())
}

/// Create the pages of the `PublishingPages` section
pub async fn add_publishing_pages(
    session: &ReconciliationSession,
    summary: &mut RunSummary,
) -> Result<(), ReconcileError> {
    for spec in session.manifest.section("PublishingPages", "PublishingPage") {
        let result = add_publishing_page(session, spec).await;
        summary.absorb("publishing pages", result)?;
    }
    Ok(())
}

async fn add_publishing_page(
    session: &ReconciliationSession,
    spec: &ResourceSpec,
) -> Result<(), ReconcileError> {
    let tokens = &session.tokens;
    let web = session.resolve_web(&spec.text("webUrl", tokens).await?).await?;
    let mut name = spec.text("name", tokens).await?;
    if !name.to_lowercase().ends_with(".aspx") {
        name.push_str(".aspx");
    }
    let title = spec.text("title", tokens).await?;
    let layout = spec.text("layout", tokens).await?;
    let overwrite = spec.attr::<bool>("overwrite", tokens).await?;
    let is_welcome_page = spec.attr::<bool>("isWelcomePage", tokens).await?;

    let cms = session.cms.as_ref();
    let pages = cms
        .list_by_title(&web, "Pages")
        .await?
        .ok_or_else(|| ReconcileError::ListNotFound(format!("{}/Pages", web.url)))?;
    let page_url = join_url(&pages.root_folder_url, &name);

    if cms.file_state(&web, &page_url).await?.exists {
        if !overwrite {
            debug!(page = %page_url, "Page exists, skipping");
            return Ok(());
        }
        cms.delete_file(&web, &page_url).await?;
    }

    let mut layout_name = layout;
    if !layout_name.to_lowercase().ends_with(".aspx") {
        layout_name.push_str(".aspx");
    }
    let gallery = cms.master_page_gallery(&session.web).await?;
    let layout_url = join_url(&gallery.root_folder_url, &layout_name);

    let url = cms.add_publishing_page(&web, &name, &title, &layout_url).await?;
    info!(page = %url, layout = %layout_url, "Added publishing page");
    complete_lifecycle(cms, &web, &url).await?;

    if is_welcome_page {
        let relative = url
            .strip_prefix(&format!("{}/", trim_end_slashes(&web.server_relative_url)))
            .unwrap_or(&url)
            .to_string();
        cms.set_welcome_page(&web, &relative).await?;
        info!(web = %web.url, page = %relative, "Set welcome page");
    }
    Ok(())
}

/// Import the first child of `SearchSettings` after token substitution
pub async fn import_search_settings(session: &ReconciliationSession) -> Result<(), ReconcileError> {
    let Some(xml) = session
        .manifest
        .element("SearchSettings")
        .and_then(|settings| settings.first_child_xml.as_deref())
    else {
        return Ok(());
    };

    let xml = session
        .tokens
        .substitute_skipping(xml, SEARCH_SKIPPED_TOKENS)
        .await?;
    session
        .cms
        .import_search_configuration(&session.web, &xml)
        .await?;
    info!("Imported search settings");
    Ok(())
}

/// Write the site collection's search configuration to `path`
pub async fn export_search_settings(
    session: &ReconciliationSession,
    path: &Path,
) -> Result<(), ReconcileError> {
    let xml = session
        .cms
        .export_search_configuration(&session.web)
        .await?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, xml).await?;
    info!(file = %path.display(), "Exported search settings");
    Ok(())
}

/// Merge desired renditions into the current set by case-insensitive name.
/// Returns the merged set and whether it differs from `current`.
pub fn merge_renditions(
    current: &[ImageRendition],
    desired: &[ImageRendition],
) -> (Vec<ImageRendition>, bool) {
    let mut merged = current.to_vec();
    let mut changed = false;

    for rendition in desired {
        match merged
            .iter_mut()
            .find(|r| r.name.eq_ignore_ascii_case(&rendition.name))
        {
            Some(existing)
                if existing.width == rendition.width && existing.height == rendition.height => {}
            Some(existing) => {
                *existing = rendition.clone();
                changed = true;
            }
            None => {
                merged.push(rendition.clone());
                changed = true;
            }
        }
    }

    (merged, changed)
}

/// Merge the `ImageRenditions` section and save the set once
pub async fn apply_image_renditions(session: &ReconciliationSession) -> Result<(), ReconcileError> {
    let specs = session.manifest.section("ImageRenditions", "ImageRendition");
    if specs.is_empty() {
        return Ok(());
    }

    let tokens = &session.tokens;
    let mut desired = Vec::with_capacity(specs.len());
    for spec in specs {
        desired.push(ImageRendition {
            name: spec.text("Name", tokens).await?,
            width: spec.attr::<i32>("Width", tokens).await?,
            height: spec.attr::<i32>("Height", tokens).await?,
        });
    }

    let cms = session.cms.as_ref();
    let current = cms.image_renditions(&session.web).await?;
    let (merged, changed) = merge_renditions(&current, &desired);
    if !changed {
        debug!("Image renditions up to date");
        return Ok(());
    }

    cms.set_image_renditions(&session.web, &merged).await?;
    info!(count = merged.len(), "Saved image renditions");
    Ok(())
}

async fn read_asset(path: &Path) -> Result<Vec<u8>, ReconcileError> {
    fs::read(path).await.map_err(|e| {
        warn!(file = %path.display(), error = %e, "Unable to read local file");
        ReconcileError::IoError(e)
    })
}
