//! The remote content-management system.
//!
//! Every read and write the reconcilers perform goes through the [`Cms`]
//! trait. Calls are awaited one at a time, so a run observes its own writes
//! in order. Two implementations ship with the crate:
//!
//! - [`RestCms`] talks to the CMS REST endpoints over HTTP
//! - [`MemoryCms`] keeps a whole site collection in memory

mod memory;
mod rest;
mod types;

pub use memory::{JournalEntry, LibraryPolicy, MemoryCms};
pub use rest::{RestAuth, RestCms};
pub use types::{
    ContentTypeDefinition, ContentTypeInfo, FieldInfo, FieldKind, FieldValue, FileLevel,
    FileState, FolderInfo, Geolocation, ImageRendition, ListInfo, ListItem, ListTemplate,
    MasterPageSlot, NavigationNodeEntity, NavigationType, NewWeb, WebInfo, MODERATION_APPROVED,
    MODERATION_PENDING, MODERATION_STATUS_FIELD,
};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CmsError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error("Not supported by this CMS client: {0}")]
    Unsupported(&'static str),
}

impl CmsError {
    /// Transport and authentication failures end the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, CmsError::Transport(_) | CmsError::Authentication(_))
    }
}

/// Operations against the remote CMS.
///
/// Methods taking a [`WebInfo`] operate inside that web; URLs are
/// server-relative unless documented otherwise.
#[async_trait]
pub trait Cms: Send + Sync {
    // ---- webs ----

    /// Root web of the site collection
    async fn root_web(&self) -> Result<WebInfo, CmsError>;

    /// Direct child webs
    async fn child_webs(&self, web: &WebInfo) -> Result<Vec<WebInfo>, CmsError>;

    /// Open a web by absolute URL
    async fn web_by_url(&self, url: &str) -> Result<Option<WebInfo>, CmsError>;

    async fn create_web(&self, parent: &WebInfo, web: &NewWeb) -> Result<WebInfo, CmsError>;

    /// Look up a named identifier such as `SPSiteId` or a result source name
    async fn lookup_guid(&self, name: &str) -> Result<Option<Uuid>, CmsError>;

    // ---- lists ----

    async fn lists(&self, web: &WebInfo) -> Result<Vec<ListInfo>, CmsError>;

    /// Find a list by title, ignoring case
    async fn list_by_title(&self, web: &WebInfo, title: &str)
        -> Result<Option<ListInfo>, CmsError>;

    /// Create a list; `url_name` becomes both its URL and initial title
    async fn create_list(
        &self,
        web: &WebInfo,
        template: ListTemplate,
        url_name: &str,
    ) -> Result<ListInfo, CmsError>;

    async fn set_list_title(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        title: &str,
    ) -> Result<(), CmsError>;

    async fn delete_list(&self, web: &WebInfo, list: &ListInfo) -> Result<(), CmsError>;

    async fn master_page_gallery(&self, web: &WebInfo) -> Result<ListInfo, CmsError>;

    // ---- folders ----

    /// Fetch a folder; a missing folder is `CmsError::NotFound`
    async fn folder(&self, web: &WebInfo, url: &str) -> Result<FolderInfo, CmsError>;

    /// Add a child folder; adding an existing folder returns it
    async fn add_folder(
        &self,
        web: &WebInfo,
        parent_url: &str,
        name: &str,
    ) -> Result<FolderInfo, CmsError>;

    async fn delete_folder(&self, web: &WebInfo, url: &str) -> Result<(), CmsError>;

    // ---- files ----

    async fn file_state(&self, web: &WebInfo, url: &str) -> Result<FileState, CmsError>;

    /// Upload content to `url`, overwriting any existing file
    async fn upload_file(
        &self,
        web: &WebInfo,
        url: &str,
        content: Vec<u8>,
    ) -> Result<FileState, CmsError>;

    async fn check_out(&self, web: &WebInfo, url: &str) -> Result<(), CmsError>;

    async fn undo_check_out(&self, web: &WebInfo, url: &str) -> Result<(), CmsError>;

    /// Major checkin
    async fn check_in(&self, web: &WebInfo, url: &str, comment: &str) -> Result<(), CmsError>;

    async fn publish(&self, web: &WebInfo, url: &str, comment: &str) -> Result<(), CmsError>;

    async fn approve(&self, web: &WebInfo, url: &str, comment: &str) -> Result<(), CmsError>;

    /// Read one field of the list item behind a file
    async fn file_field(
        &self,
        web: &WebInfo,
        url: &str,
        field: &str,
    ) -> Result<Option<String>, CmsError>;

    /// Write fields of the list item behind a file and save it
    async fn set_file_fields(
        &self,
        web: &WebInfo,
        url: &str,
        values: &[(String, FieldValue)],
    ) -> Result<(), CmsError>;

    async fn delete_file(&self, web: &WebInfo, url: &str) -> Result<(), CmsError>;

    /// URL of the file behind a list item, for document libraries
    async fn item_file_url(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        item_id: i32,
    ) -> Result<Option<String>, CmsError>;

    // ---- content types ----

    /// Content type available in a web, by id
    async fn content_type(
        &self,
        web: &WebInfo,
        id: &str,
    ) -> Result<Option<ContentTypeInfo>, CmsError>;

    async fn create_content_type(
        &self,
        web: &WebInfo,
        definition: &ContentTypeDefinition,
    ) -> Result<(), CmsError>;

    async fn list_content_types(
        &self,
        web: &WebInfo,
        list: &ListInfo,
    ) -> Result<Vec<ContentTypeInfo>, CmsError>;

    async fn add_content_type_to_list(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        content_type: &ContentTypeInfo,
        make_default: bool,
    ) -> Result<(), CmsError>;

    async fn remove_content_type_from_list(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        name: &str,
    ) -> Result<(), CmsError>;

    // ---- fields and items ----

    async fn list_fields(&self, web: &WebInfo, list: &ListInfo)
        -> Result<Vec<FieldInfo>, CmsError>;

    async fn set_field_indexed(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        internal_name: &str,
    ) -> Result<(), CmsError>;

    /// Add an empty item and return its id
    async fn add_item(&self, web: &WebInfo, list: &ListInfo) -> Result<i32, CmsError>;

    /// Write one field of an item and save it
    async fn set_item_field(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        item_id: i32,
        field: &str,
        value: &FieldValue,
    ) -> Result<(), CmsError>;

    /// Items whose text value of `field` equals `value`
    async fn query_items(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        field: &str,
        value: &str,
    ) -> Result<Vec<ListItem>, CmsError>;

    async fn delete_item(&self, web: &WebInfo, list: &ListInfo, item_id: i32)
        -> Result<(), CmsError>;

    /// Resolve a login name to a principal id
    async fn ensure_user(&self, web: &WebInfo, login: &str) -> Result<Option<i32>, CmsError>;

    // ---- taxonomy ----

    async fn term_store_available(&self) -> Result<bool, CmsError>;

    /// Term reached by group name, term-set name and term name
    async fn term_id_by_path(
        &self,
        group: &str,
        term_set: &str,
        term: &str,
    ) -> Result<Uuid, CmsError>;

    /// Term with an exact name inside a term set
    async fn term_id_in_set(&self, term_set_id: Uuid, name: &str) -> Result<Uuid, CmsError>;

    async fn import_term_set(&self, group: &str, file_path: &str) -> Result<(), CmsError>;

    // ---- navigation ----

    async fn delete_navigation_nodes(
        &self,
        web: &WebInfo,
        navigation_type: NavigationType,
    ) -> Result<(), CmsError>;

    async fn add_navigation_node(
        &self,
        web: &WebInfo,
        node: &NavigationNodeEntity,
    ) -> Result<(), CmsError>;

    // ---- branding ----

    async fn web_property(&self, web: &WebInfo, key: &str) -> Result<Option<String>, CmsError>;

    async fn set_master_page(
        &self,
        web: &WebInfo,
        slot: MasterPageSlot,
        url: &str,
    ) -> Result<(), CmsError>;

    async fn set_welcome_page(&self, web: &WebInfo, url: &str) -> Result<(), CmsError>;

    /// Create a publishing page in the web's `Pages` library from a page
    /// layout and return its server-relative URL
    async fn add_publishing_page(
        &self,
        web: &WebInfo,
        name: &str,
        title: &str,
        layout_url: &str,
    ) -> Result<String, CmsError>;

    async fn image_renditions(&self, web: &WebInfo) -> Result<Vec<ImageRendition>, CmsError>;

    async fn set_image_renditions(
        &self,
        web: &WebInfo,
        renditions: &[ImageRendition],
    ) -> Result<(), CmsError>;

    async fn import_search_configuration(&self, web: &WebInfo, xml: &str)
        -> Result<(), CmsError>;

    async fn export_search_configuration(&self, web: &WebInfo) -> Result<String, CmsError>;

    // ---- permissions ----

    /// Create a read-level role definition unless one with this name exists
    async fn ensure_role_definition(
        &self,
        web: &WebInfo,
        name: &str,
        description: &str,
    ) -> Result<(), CmsError>;

    async fn group_exists(&self, web: &WebInfo, name: &str) -> Result<bool, CmsError>;

    /// Create a group and grant it a role on the web
    async fn create_group(
        &self,
        web: &WebInfo,
        name: &str,
        description: &str,
        role: &str,
    ) -> Result<(), CmsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(CmsError::Transport("reset".into()).is_fatal());
        assert!(CmsError::Authentication("401".into()).is_fatal());
        assert!(!CmsError::NotFound("x".into()).is_fatal());
        assert!(!CmsError::Unsupported("search").is_fatal());
        assert!(!CmsError::Remote {
            status: 500,
            message: "boom".into()
        }
        .is_fatal());
    }
}
