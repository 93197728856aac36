//! Reconcilers that bring a site collection in line with the manifest.
//!
//! Each section of the manifest has a reconciler. Sections run in a fixed
//! order; a failing entry is logged and skipped unless the failure is fatal
//! (transport or authentication), which ends the run.

mod branding;
mod channels;
mod content_types;
mod execute;
mod folders;
mod items;
mod lifecycle;
mod lists;
mod navigation;
mod session;
mod sites;
mod summary;
mod teardown;

pub use branding::{
    add_publishing_pages, apply_image_renditions, deploy_master_pages, deploy_page_layouts,
    export_search_settings, import_search_settings, merge_renditions, upload_files,
    PAGE_LAYOUT_CONTENT_TYPE_ID,
};
pub use channels::{sync_device_channels, CHANNEL_ALIAS_FIELD, DEVICE_CHANNELS_LIST};
pub use content_types::create_content_types;
pub use execute::{execute_run, RunMode, RunOptions};
pub use folders::{ensure_folder, ensure_folders, EnsuredFolder, FolderResolution};
pub use items::{add_items, coerce_field_value, parse_geolocation, parse_url_value};
pub use lifecycle::{complete_lifecycle, upload_with_lifecycle, LifecycleStep};
pub use lists::{ensure_list, reconcile_lists};
pub use navigation::{collect_navigation_nodes, sync_navigation};
pub use session::{ReconciliationSession, SessionOptions};
pub use sites::{
    apply_permissions, create_role_definitions, create_sub_sites, import_term_sets,
    ROLE_CONTENT_CONTRIBUTOR, ROLE_CONTENT_MANAGER, ROLE_VISITOR, VISITORS_GROUP,
};
pub use summary::RunSummary;
pub use teardown::deactivate;

use crate::cms::CmsError;
use crate::manifest::CoercionError;
use crate::tokens::TokenError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("CMS error: {0}")]
    Cms(#[from] CmsError),

    #[error("Attribute error: {0}")]
    Coercion(#[from] CoercionError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Web not found: {0}")]
    WebNotFound(String),

    #[error("List not found: {0}")]
    ListNotFound(String),

    #[error("Content type not found: {0}")]
    ContentTypeNotFound(String),

    #[error("Invalid value '{value}' for field {field}")]
    InvalidFieldValue { field: String, value: String },

    #[error("Unknown mode '{0}'")]
    UnknownMode(String),
}

impl ReconcileError {
    /// Whether the error ends the run instead of the current entry
    pub fn is_fatal(&self) -> bool {
        match self {
            ReconcileError::Cms(e) => e.is_fatal(),
            ReconcileError::Coercion(e) => e.is_fatal(),
            ReconcileError::Token(e) => e.is_fatal(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors_propagate_through_wrappers() {
        let transport = || CmsError::Transport("reset".to_string());

        assert!(ReconcileError::Cms(transport()).is_fatal());
        assert!(ReconcileError::Token(TokenError::Cms(transport())).is_fatal());
        assert!(
            ReconcileError::Coercion(CoercionError::Token(TokenError::Cms(transport()))).is_fatal()
        );
        assert!(!ReconcileError::Cms(CmsError::NotFound("x".into())).is_fatal());
        assert!(!ReconcileError::ListNotFound("Pages".into()).is_fatal());
    }
}
