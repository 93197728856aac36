//! Check-out, upload, check-in, publish and approve for a single file.

use super::ReconcileError;
use crate::cms::{
    Cms, FieldValue, FileLevel, WebInfo, MODERATION_PENDING, MODERATION_STATUS_FIELD,
};
use crate::utils::LIFECYCLE_COMMENT;
use tracing::debug;

/// One call made against a file while moving it through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStep {
    UndoCheckOut,
    CheckOut,
    Upload,
    SetFields,
    CheckIn,
    Publish,
    Approve,
}

/// Upload a file and bring it to the published, approved state.
///
/// An existing file is checked out first, dropping any checkout already
/// held. `metadata` is written to the file's item after the upload and before
/// check-in. Returns the steps taken, in order.
pub async fn upload_with_lifecycle(
    cms: &dyn Cms,
    web: &WebInfo,
    url: &str,
    content: Vec<u8>,
    metadata: Option<&[(String, FieldValue)]>,
) -> Result<Vec<LifecycleStep>, ReconcileError> {
    let mut steps = Vec::new();

    let existing = cms.file_state(web, url).await?;
    if existing.exists {
        if existing.checked_out {
            cms.undo_check_out(web, url).await?;
            steps.push(LifecycleStep::UndoCheckOut);
        }
        cms.check_out(web, url).await?;
        steps.push(LifecycleStep::CheckOut);
    }

    cms.upload_file(web, url, content).await?;
    steps.push(LifecycleStep::Upload);

    if let Some(values) = metadata {
        cms.set_file_fields(web, url, values).await?;
        steps.push(LifecycleStep::SetFields);
    }

    steps.extend(complete_lifecycle(cms, web, url).await?);
    Ok(steps)
}

/// Check in, publish and approve whatever the file's state still requires
pub async fn complete_lifecycle(
    cms: &dyn Cms,
    web: &WebInfo,
    url: &str,
) -> Result<Vec<LifecycleStep>, ReconcileError> {
    let mut steps = Vec::new();

    let mut state = cms.file_state(web, url).await?;
    if state.checked_out {
        cms.check_in(web, url, LIFECYCLE_COMMENT).await?;
        steps.push(LifecycleStep::CheckIn);
        state = cms.file_state(web, url).await?;
    }

    if state.level == FileLevel::Draft {
        cms.publish(web, url, LIFECYCLE_COMMENT).await?;
        steps.push(LifecycleStep::Publish);
    }

    let moderation = cms.file_field(web, url, MODERATION_STATUS_FIELD).await?;
    if moderation.as_deref() == Some(MODERATION_PENDING) {
        cms.approve(web, url, LIFECYCLE_COMMENT).await?;
        steps.push(LifecycleStep::Approve);
    }

    debug!(file = %url, steps = ?steps, "Completed file lifecycle");
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms::{LibraryPolicy, ListTemplate, MemoryCms};

    const SITE: &str = "https://cms.test/sites/portal";

    async fn library(policy: LibraryPolicy) -> (MemoryCms, WebInfo, String) {
        let cms = MemoryCms::new(SITE);
        let root = cms.root_web().await.unwrap();
        let list = cms.add_list(&root, "Docs", ListTemplate::DocumentLibrary).await;
        cms.set_policy(&root, "Docs", policy).await;
        let url = format!("{}/site.css", list.root_folder_url);
        (cms, root, url)
    }

    #[tokio::test]
    async fn test_plain_library_uploads_only() {
        let (cms, root, url) = library(LibraryPolicy::default()).await;

        let steps = upload_with_lifecycle(&cms, &root, &url, b"a".to_vec(), None)
            .await
            .unwrap();

        assert_eq!(steps, vec![LifecycleStep::Upload]);
        let (state, content) = cms.file(&root, &url).await.unwrap();
        assert_eq!(state.level, FileLevel::Published);
        assert_eq!(content, b"a");
    }

    #[tokio::test]
    async fn test_moderated_library_ends_approved() {
        let (cms, root, url) = library(LibraryPolicy {
            require_checkout: true,
            drafts: true,
            moderation: true,
        })
        .await;

        let steps = upload_with_lifecycle(&cms, &root, &url, b"a".to_vec(), None)
            .await
            .unwrap();

        assert_eq!(
            steps,
            vec![
                LifecycleStep::Upload,
                LifecycleStep::CheckIn,
                LifecycleStep::Publish,
                LifecycleStep::Approve
            ]
        );
        let (state, _) = cms.file(&root, &url).await.unwrap();
        assert_eq!(state.level, FileLevel::Published);
        assert!(!state.checked_out);
    }

    #[tokio::test]
    async fn test_existing_checkout_is_undone_before_upload() {
        let (cms, root, url) = library(LibraryPolicy::default()).await;
        cms.seed_file(&root, &url, true).await;

        upload_with_lifecycle(&cms, &root, &url, b"b".to_vec(), None)
            .await
            .unwrap();

        assert_eq!(
            cms.operations_on(&url).await,
            vec!["undo_check_out", "check_out", "upload", "check_in"]
        );
        let (state, content) = cms.file(&root, &url).await.unwrap();
        assert!(!state.checked_out);
        assert_eq!(content, b"b");
    }

    #[tokio::test]
    async fn test_metadata_is_written_before_check_in() {
        let (cms, root, url) = library(LibraryPolicy {
            require_checkout: true,
            ..LibraryPolicy::default()
        })
        .await;
        let metadata = vec![("Title".to_string(), FieldValue::Text("Site".to_string()))];

        upload_with_lifecycle(&cms, &root, &url, Vec::new(), Some(&metadata))
            .await
            .unwrap();

        assert_eq!(
            cms.operations_on(&url).await,
            vec!["upload", "set_fields", "check_in"]
        );
        assert_eq!(
            cms.file_value(&root, &url, "Title").await,
            Some(FieldValue::Text("Site".to_string()))
        );
    }
}
