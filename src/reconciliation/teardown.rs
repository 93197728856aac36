use super::branding::library_path;
use super::{ReconcileError, ReconciliationSession, RunSummary};
use crate::cms::MasterPageSlot;
use crate::manifest::ResourceSpec;
use crate::utils::{file_url, join_url, split_file_url, trim_end_slashes};
use tracing::{debug, info};

/// Web property holding the system master page in place before branding
const ORIGINAL_MASTER_PROPERTY: &str = "OriginalMasterUrl";
/// Web property holding the custom master page in place before branding
const ORIGINAL_CUSTOM_MASTER_PROPERTY: &str = "CustomMasterUrl";

/// Remove what activation deployed: files and their folder, master pages,
/// page layouts and lists
pub async fn deactivate(
    session: &ReconciliationSession,
    summary: &mut RunSummary,
) -> Result<(), ReconcileError> {
    remove_files(session, summary).await?;
    remove_master_pages(session, summary).await?;
    remove_page_layouts(session, summary).await?;
    remove_lists(session, summary).await?;
    Ok(())
}

async fn remove_files(
    session: &ReconciliationSession,
    summary: &mut RunSummary,
) -> Result<(), ReconcileError> {
    let cms = session.cms.as_ref();
    let web = &session.web;
    let mut last_folder = None;

    for spec in session.manifest.plain_section("files", "file") {
        let Some(target) = summary.absorb("files", file_target(session, spec).await)? else {
            continue;
        };

        let result = cms.delete_file(web, &target.url).await.map_err(ReconcileError::from);
        if summary.absorb("files", result)?.is_some() {
            info!(file = %target.url, "Removed file");
        }
        if target.folder.is_some() {
            last_folder = target.folder;
        }
    }

    if let Some(folder) = last_folder {
        let result = cms.delete_folder(web, &folder).await.map_err(ReconcileError::from);
        if summary.absorb("files", result)?.is_some() {
            info!(folder = %folder, "Removed folder");
        }
    }
    Ok(())
}

/// A deployed file and the folder it was placed in, if any
struct Target {
    url: String,
    folder: Option<String>,
}

async fn file_target(
    session: &ReconciliationSession,
    spec: &ResourceSpec,
) -> Result<Target, ReconcileError> {
    let tokens = &session.tokens;
    let name = spec.text("name", tokens).await?.replace('\\', "/");
    let folder = trim_end_slashes(&spec.text("folder", tokens).await?).to_string();
    let path = spec.text("path", tokens).await?;
    let server_path = library_path(&session.web.server_relative_url, &path);

    Ok(Target {
        url: file_url(&server_path, &folder, &name),
        folder: (!folder.is_empty()).then(|| join_url(&server_path, &folder)),
    })
}

/// Server path of the master page gallery ending in `/`, or `None` after
/// counting the failed lookup against `section`
async fn gallery_path(
    session: &ReconciliationSession,
    section: &str,
    summary: &mut RunSummary,
) -> Result<Option<String>, ReconcileError> {
    let result = session
        .cms
        .master_page_gallery(&session.web)
        .await
        .map_err(ReconcileError::from);
    Ok(summary
        .absorb(section, result)?
        .map(|gallery| format!("{}/", trim_end_slashes(&gallery.root_folder_url))))
}

async fn remove_master_pages(
    session: &ReconciliationSession,
    summary: &mut RunSummary,
) -> Result<(), ReconcileError> {
    let specs = session.manifest.plain_section("masterpages", "masterpage");
    if specs.is_empty() {
        return Ok(());
    }
    let cms = session.cms.as_ref();
    let web = &session.web;

    let result = restore_master_pages(session).await;
    summary.absorb("master pages", result)?;

    let Some(gallery) = gallery_path(session, "master pages", summary).await? else {
        return Ok(());
    };
    let mut last_folder = None;

    for spec in specs {
        let target = async {
            let name = spec.text("name", &session.tokens).await?;
            let folder = spec.text("folder", &session.tokens).await?;
            let folder = trim_end_slashes(&folder).to_string();
            Ok::<_, ReconcileError>(Target {
                url: file_url(&gallery, &folder, &name),
                folder: (!folder.is_empty()).then(|| join_url(&gallery, &folder)),
            })
        }
        .await;
        let Some(target) = summary.absorb("master pages", target)? else {
            continue;
        };

        let result = cms.delete_file(web, &target.url).await.map_err(ReconcileError::from);
        if summary.absorb("master pages", result)?.is_some() {
            info!(master_page = %target.url, "Removed master page");
        }
        if target.folder.is_some() {
            last_folder = target.folder;
        }
    }

    if let Some(folder) = last_folder {
        let result = cms.delete_folder(web, &folder).await.map_err(ReconcileError::from);
        summary.absorb("master pages", result)?;
    }
    Ok(())
}

async fn restore_master_pages(session: &ReconciliationSession) -> Result<(), ReconcileError> {
    let cms = session.cms.as_ref();
    let web = &session.web;

    if let Some(url) = cms.web_property(web, ORIGINAL_MASTER_PROPERTY).await? {
        cms.set_master_page(web, MasterPageSlot::System, &url).await?;
        info!(master_page = %url, "Restored system master page");
    }
    if let Some(url) = cms.web_property(web, ORIGINAL_CUSTOM_MASTER_PROPERTY).await? {
        cms.set_master_page(web, MasterPageSlot::Custom, &url).await?;
        info!(master_page = %url, "Restored custom master page");
    }
    Ok(())
}

async fn remove_page_layouts(
    session: &ReconciliationSession,
    summary: &mut RunSummary,
) -> Result<(), ReconcileError> {
    let specs = session.manifest.plain_section("htmlPagelayouts", "htmlPagelayout");
    if specs.is_empty() {
        return Ok(());
    }
    let cms = session.cms.as_ref();
    let web = &session.web;
    let Some(gallery) = gallery_path(session, "page layouts", summary).await? else {
        return Ok(());
    };

    for spec in specs {
        let result = async {
            let tokens = &session.tokens;
            let source = spec.text("sourceFilePath", tokens).await?.replace('\\', "/");
            let name = split_file_url(&source).1.to_string();
            let folder = spec.text("folderHierarchy", tokens).await?;
            let url = file_url(&gallery, trim_end_slashes(&folder), &name);

            cms.delete_file(web, &url).await?;
            Ok::<_, ReconcileError>(url)
        }
        .await;
        if let Some(url) = summary.absorb("page layouts", result)? {
            info!(page_layout = %url, "Removed page layout");
        }
    }
    Ok(())
}

async fn remove_lists(
    session: &ReconciliationSession,
    summary: &mut RunSummary,
) -> Result<(), ReconcileError> {
    let cms = session.cms.as_ref();
    let web = &session.web;

    for spec in session.manifest.section("lists", "ListInstance") {
        let result = async {
            let title = spec.text("Title", &session.tokens).await?;
            match cms.list_by_title(web, &title).await? {
                Some(list) => {
                    cms.delete_list(web, &list).await?;
                    info!(list = %title, "Removed list");
                }
                None => debug!(list = %title, "List already absent"),
            }
            Ok::<_, ReconcileError>(())
        }
        .await;
        summary.absorb("lists", result)?;
    }
    Ok(())
}
