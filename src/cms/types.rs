use crate::manifest::NamedEnum;
use std::collections::BTreeMap;
use std::fmt;
use url::Url;
use uuid::Uuid;

/// Moderation status code of an item waiting for approval
pub const MODERATION_PENDING: &str = "2";

/// Moderation status code of an approved item
pub const MODERATION_APPROVED: &str = "0";

/// Field holding an item's moderation status
pub const MODERATION_STATUS_FIELD: &str = "_ModerationStatus";

/// A web (site or sub-site) in the hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebInfo {
    pub id: Uuid,
    pub title: String,
    /// Absolute URL
    pub url: String,
    pub server_relative_url: String,
}

/// A list or library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListInfo {
    pub id: Uuid,
    pub title: String,
    pub default_view_url: String,
    pub root_folder_url: String,
}

/// A folder, identified by its unique id and server-relative URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderInfo {
    pub unique_id: Uuid,
    pub name: String,
    pub server_relative_url: String,
}

/// Publish level of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLevel {
    Published,
    Draft,
    Checkout,
}

impl FileLevel {
    pub fn from_code(code: i64) -> Self {
        match code {
            2 => FileLevel::Draft,
            255 => FileLevel::Checkout,
            _ => FileLevel::Published,
        }
    }
}

/// Remote state of a file relevant to the content lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileState {
    pub exists: bool,
    pub checked_out: bool,
    pub level: FileLevel,
}

impl FileState {
    pub fn missing() -> Self {
        Self {
            exists: false,
            checked_out: false,
            level: FileLevel::Published,
        }
    }
}

/// List template identifiers. `GenericList` comes first so that it is the
/// fallback for unrecognised names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListTemplate {
    GenericList,
    DocumentLibrary,
    Survey,
    Links,
    Announcements,
    Contacts,
    Events,
    Tasks,
    DiscussionBoard,
    PictureLibrary,
    DataSources,
    XmlForm,
    MasterPageCatalog,
    CustomGrid,
    WebPageLibrary,
    IssueTracking,
    TasksWithTimelineAndHierarchy,
    PublishingPages,
    AssetLibrary,
}

impl ListTemplate {
    pub fn id(self) -> i32 {
        match self {
            ListTemplate::GenericList => 100,
            ListTemplate::DocumentLibrary => 101,
            ListTemplate::Survey => 102,
            ListTemplate::Links => 103,
            ListTemplate::Announcements => 104,
            ListTemplate::Contacts => 105,
            ListTemplate::Events => 106,
            ListTemplate::Tasks => 107,
            ListTemplate::DiscussionBoard => 108,
            ListTemplate::PictureLibrary => 109,
            ListTemplate::DataSources => 110,
            ListTemplate::XmlForm => 115,
            ListTemplate::MasterPageCatalog => 116,
            ListTemplate::CustomGrid => 120,
            ListTemplate::WebPageLibrary => 119,
            ListTemplate::IssueTracking => 1100,
            ListTemplate::TasksWithTimelineAndHierarchy => 171,
            ListTemplate::PublishingPages => 850,
            ListTemplate::AssetLibrary => 851,
        }
    }
}

impl NamedEnum for ListTemplate {
    const MEMBERS: &'static [(&'static str, Self)] = &[
        ("GenericList", ListTemplate::GenericList),
        ("DocumentLibrary", ListTemplate::DocumentLibrary),
        ("Survey", ListTemplate::Survey),
        ("Links", ListTemplate::Links),
        ("Announcements", ListTemplate::Announcements),
        ("Contacts", ListTemplate::Contacts),
        ("Events", ListTemplate::Events),
        ("Tasks", ListTemplate::Tasks),
        ("DiscussionBoard", ListTemplate::DiscussionBoard),
        ("PictureLibrary", ListTemplate::PictureLibrary),
        ("DataSources", ListTemplate::DataSources),
        ("XMLForm", ListTemplate::XmlForm),
        ("MasterPageCatalog", ListTemplate::MasterPageCatalog),
        ("CustomGrid", ListTemplate::CustomGrid),
        ("WebPageLibrary", ListTemplate::WebPageLibrary),
        ("IssueTracking", ListTemplate::IssueTracking),
        (
            "TasksWithTimelineAndHierarchy",
            ListTemplate::TasksWithTimelineAndHierarchy,
        ),
        ("PublishingPages", ListTemplate::PublishingPages),
        ("AssetLibrary", ListTemplate::AssetLibrary),
    ];
}

/// Field kinds the item coercion dispatches on.
///
/// Taxonomy fields are detected from the field's runtime type rather than a
/// declared kind, and carry the id of their bound term set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Geolocation,
    Lookup,
    Url,
    User,
    Taxonomy { term_set_id: Uuid },
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub internal_name: String,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geolocation {
    pub altitude: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub measure: f64,
}

/// A typed value written to a list item field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Geolocation(Geolocation),
    Lookup(i32),
    Url { url: String, description: String },
    User { id: i32, login: String },
    Taxonomy { term_id: Uuid, label: String },
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(value) => write!(f, "{}", value),
            FieldValue::Geolocation(g) => write!(
                f,
                "{},{},{},{}",
                g.altitude, g.latitude, g.longitude, g.measure
            ),
            FieldValue::Lookup(id) => write!(f, "{}", id),
            FieldValue::Url { url, description } => write!(f, "{}, {}", url, description),
            FieldValue::User { id, .. } => write!(f, "{}", id),
            FieldValue::Taxonomy { term_id, label } => write!(f, "{}|{}", label, term_id),
        }
    }
}

/// A list item as read back from the CMS
#[derive(Debug, Clone, PartialEq)]
pub struct ListItem {
    pub id: i32,
    pub values: BTreeMap<String, FieldValue>,
}

impl ListItem {
    pub fn text(&self, field: &str) -> Option<String> {
        self.values.get(field).map(|v| v.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTypeInfo {
    pub id: String,
    pub name: String,
}

/// A content type to create, as declared in the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTypeDefinition {
    pub id: String,
    pub name: String,
    pub group: String,
    pub description: String,
    /// Internal names (or ids when no name is given) of the linked fields
    pub field_refs: Vec<String>,
}

/// Navigation node classification. `TopNavigationBar` is global navigation,
/// `QuickLaunch` current navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavigationType {
    TopNavigationBar,
    QuickLaunch,
    SearchNav,
}

impl NamedEnum for NavigationType {
    const MEMBERS: &'static [(&'static str, Self)] = &[
        ("TopNavigationBar", NavigationType::TopNavigationBar),
        ("QuickLaunch", NavigationType::QuickLaunch),
        ("SearchNav", NavigationType::SearchNav),
    ];
}

/// A desired navigation node. Hierarchy is expressed only through the
/// parent's title.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationNodeEntity {
    pub title: String,
    pub url: Option<Url>,
    pub parent_title: String,
    pub navigation_type: NavigationType,
    pub is_external: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRendition {
    pub name: String,
    pub width: i32,
    pub height: i32,
}

/// Parameters for a new sub-site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWeb {
    pub title: String,
    pub leaf_url: String,
    pub description: String,
    pub template: String,
    pub language: i32,
    pub inherit_permissions: bool,
    pub inherit_navigation: bool,
}

/// Which master page slot of a web to set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterPageSlot {
    /// Master page used by system pages (`MasterUrl`)
    System,
    /// Master page used by publishing pages (`CustomMasterUrl`)
    Custom,
}
