use super::ReconcileError;
use crate::cms::{Cms, FolderInfo, WebInfo};
use crate::utils::join_url;
use tracing::{debug, info};

/// How an ensured folder was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderResolution {
    FoundDirectly,
    CreatedViaFallback,
}

/// A folder guaranteed to exist, freshly read back from the CMS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredFolder {
    pub folder: FolderInfo,
    pub resolution: FolderResolution,
}

enum EnsureStep {
    Fetch,
    Fallback,
    Refetch(FolderResolution),
}

/// Make sure `folder_path` exists below `parent`, or below the list whose
/// default view lives under `list_path` when no parent is given.
///
/// The folder is fetched directly first. If that fails it is added through
/// the owning list, and in both cases it is fetched again at the end. An
/// empty path yields `None`.
pub async fn ensure_folder(
    cms: &dyn Cms,
    web: &WebInfo,
    list_path: &str,
    folder_path: &str,
    parent: Option<&FolderInfo>,
) -> Result<Option<EnsuredFolder>, ReconcileError> {
    if folder_path.is_empty() {
        return Ok(None);
    }

    let base = parent
        .map(|p| p.server_relative_url.as_str())
        .unwrap_or(list_path);
    let url = join_url(base, folder_path);

    let mut step = EnsureStep::Fetch;
    loop {
        step = match step {
            EnsureStep::Fetch => match cms.folder(web, &url).await {
                Ok(_) => EnsureStep::Refetch(FolderResolution::FoundDirectly),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    debug!(folder = %url, error = %e, "Folder not found, adding it");
                    EnsureStep::Fallback
                }
            },
            EnsureStep::Fallback => {
                let parent_url = match parent {
                    Some(parent) => parent.server_relative_url.clone(),
                    None => owning_list_root(cms, web, list_path).await?,
                };
                cms.add_folder(web, &parent_url, folder_path).await?;
                info!(folder = %url, "Created folder");
                EnsureStep::Refetch(FolderResolution::CreatedViaFallback)
            }
            EnsureStep::Refetch(resolution) => {
                let folder = cms.folder(web, &url).await?;
                return Ok(Some(EnsuredFolder { folder, resolution }));
            }
        };
    }
}

/// Root folder of the list whose default view URL contains `list_path`
async fn owning_list_root(
    cms: &dyn Cms,
    web: &WebInfo,
    list_path: &str,
) -> Result<String, ReconcileError> {
    let wanted = list_path.to_lowercase();
    cms.lists(web)
        .await?
        .into_iter()
        .find(|list| list.default_view_url.to_lowercase().contains(&wanted))
        .map(|list| list.root_folder_url)
        .ok_or_else(|| ReconcileError::ListNotFound(list_path.to_string()))
}

/// Ensure `folder` below the list, then every directory segment of
/// `file_name` in turn. Returns the innermost folder.
pub async fn ensure_folders(
    cms: &dyn Cms,
    web: &WebInfo,
    list_path: &str,
    folder: &str,
    file_name: &str,
) -> Result<Option<FolderInfo>, ReconcileError> {
    let mut current = ensure_folder(cms, web, list_path, folder, None)
        .await?
        .map(|ensured| ensured.folder);

    let segments: Vec<&str> = file_name.split('/').collect();
    if let Some((_, directories)) = segments.split_last() {
        for segment in directories.iter().filter(|s| !s.is_empty()) {
            if let Some(ensured) =
                ensure_folder(cms, web, list_path, segment, current.as_ref()).await?
            {
                current = Some(ensured.folder);
            }
        }
    }

    Ok(current)
}
