//! In-memory site collection.
//!
//! Models the parts of the remote system the reconcilers touch: webs, lists,
//! folders, files with their checkout/publish/moderation state, content
//! types, fields, items, taxonomy, navigation and permissions. Every call that
//! changes a file is recorded in a journal so callers can inspect the exact
//! sequence of lifecycle steps.

use super::types::*;
use super::{Cms, CmsError};
use crate::utils::{join_url, trim_end_slashes};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Versioning settings of a library
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LibraryPolicy {
    /// New uploads start checked out
    pub require_checkout: bool,
    /// Uploads are minor (draft) versions until published
    pub drafts: bool,
    /// Published versions wait for approval
    pub moderation: bool,
}

/// One recorded file operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub operation: &'static str,
    pub url: String,
}

#[derive(Debug)]
struct MemFile {
    list_id: Uuid,
    item_id: i32,
    content: Vec<u8>,
    checked_out: bool,
    level: FileLevel,
    level_before_checkout: FileLevel,
    fields: BTreeMap<String, FieldValue>,
}

impl MemFile {
    fn state(&self) -> FileState {
        FileState {
            exists: true,
            checked_out: self.checked_out,
            level: self.level,
        }
    }
}

#[derive(Debug)]
struct MemField {
    info: FieldInfo,
    indexed: bool,
}

#[derive(Debug)]
struct MemList {
    info: ListInfo,
    template: ListTemplate,
    content_types: Vec<ContentTypeInfo>,
    fields: Vec<MemField>,
    items: Vec<ListItem>,
    next_item_id: i32,
    policy: LibraryPolicy,
}

impl MemList {
    fn allocate_item_id(&mut self) -> i32 {
        self.next_item_id += 1;
        self.next_item_id
    }
}

#[derive(Debug)]
struct MemNode {
    id: i32,
    navigation_type: NavigationType,
    title: String,
    url: Option<String>,
    parent: Option<i32>,
    is_external: bool,
}

#[derive(Debug)]
struct MemWeb {
    info: WebInfo,
    parent: Option<usize>,
    lists: Vec<MemList>,
    folders: BTreeMap<String, FolderInfo>,
    files: BTreeMap<String, MemFile>,
    content_types: Vec<ContentTypeInfo>,
    navigation: Vec<MemNode>,
    properties: HashMap<String, String>,
    master_url: Option<String>,
    custom_master_url: Option<String>,
    welcome_page: Option<String>,
    role_definitions: Vec<String>,
    groups: Vec<(String, String)>,
}

#[derive(Debug)]
struct TermSetRecord {
    id: Uuid,
    name: String,
    terms: Vec<(String, Uuid)>,
}

#[derive(Debug)]
struct TermGroupRecord {
    name: String,
    sets: Vec<TermSetRecord>,
}

#[derive(Debug, Default)]
struct State {
    webs: Vec<MemWeb>,
    next_id: i32,
    folders_created: usize,
    journal: Vec<JournalEntry>,
    term_store: Option<Vec<TermGroupRecord>>,
    imported_term_sets: Vec<(String, String)>,
    renditions: Vec<ImageRendition>,
    search_configuration: Option<String>,
    guids: HashMap<String, Uuid>,
    users: HashMap<String, i32>,
}

fn key(url: &str) -> String {
    trim_end_slashes(url).to_lowercase()
}

fn not_found(what: impl Into<String>) -> CmsError {
    CmsError::NotFound(what.into())
}

fn rejected(message: impl Into<String>) -> CmsError {
    CmsError::Remote {
        status: 400,
        message: message.into(),
    }
}

fn is_library(template: ListTemplate) -> bool {
    matches!(
        template,
        ListTemplate::DocumentLibrary
            | ListTemplate::PictureLibrary
            | ListTemplate::XmlForm
            | ListTemplate::MasterPageCatalog
            | ListTemplate::WebPageLibrary
            | ListTemplate::PublishingPages
            | ListTemplate::AssetLibrary
    )
}

fn server_relative_from_url(url: &str) -> String {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    match without_scheme.find('/') {
        Some(index) => trim_end_slashes(&without_scheme[index..]).to_string(),
        None => String::new(),
    }
}

impl State {
    fn allocate_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn web_index(&self, web: &WebInfo) -> Result<usize, CmsError> {
        self.webs
            .iter()
            .position(|w| w.info.id == web.id)
            .ok_or_else(|| not_found(format!("web {}", web.url)))
    }

    fn web(&self, web: &WebInfo) -> Result<&MemWeb, CmsError> {
        let index = self.web_index(web)?;
        Ok(&self.webs[index])
    }

    fn web_mut(&mut self, web: &WebInfo) -> Result<&mut MemWeb, CmsError> {
        let index = self.web_index(web)?;
        Ok(&mut self.webs[index])
    }

    fn record(&mut self, operation: &'static str, url: &str) {
        self.journal.push(JournalEntry {
            operation,
            url: url.to_string(),
        });
    }

    fn new_web(&mut self, parent: Option<usize>, title: &str, url: &str) -> WebInfo {
        let info = WebInfo {
            id: Uuid::new_v4(),
            title: title.to_string(),
            url: trim_end_slashes(url).to_string(),
            server_relative_url: server_relative_from_url(url),
        };

        self.webs.push(MemWeb {
            info: info.clone(),
            parent,
            lists: Vec::new(),
            folders: BTreeMap::new(),
            files: BTreeMap::new(),
            content_types: Vec::new(),
            navigation: Vec::new(),
            properties: HashMap::new(),
            master_url: None,
            custom_master_url: None,
            welcome_page: None,
            role_definitions: Vec::new(),
            groups: Vec::new(),
        });

        let gallery_root = join_url(&info.server_relative_url, "_catalogs/masterpage");
        self.insert_list(
            &info,
            "Master Page Gallery",
            ListTemplate::MasterPageCatalog,
            &gallery_root,
        );

        info
    }

    fn insert_list(
        &mut self,
        web: &WebInfo,
        title: &str,
        template: ListTemplate,
        root_folder_url: &str,
    ) -> ListInfo {
        let library = is_library(template);
        let default_view_url = if library {
            format!("{}/Forms/AllItems.aspx", root_folder_url)
        } else {
            format!("{}/AllItems.aspx", root_folder_url)
        };
        let info = ListInfo {
            id: Uuid::new_v4(),
            title: title.to_string(),
            default_view_url,
            root_folder_url: root_folder_url.to_string(),
        };

        let base_content_type = if library {
            ContentTypeInfo {
                id: "0x0101".to_string(),
                name: "Document".to_string(),
            }
        } else {
            ContentTypeInfo {
                id: "0x01".to_string(),
                name: "Item".to_string(),
            }
        };

        let root_name = root_folder_url
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        if let Ok(mem_web) = self.web_mut(web) {
            mem_web.folders.insert(
                key(root_folder_url),
                FolderInfo {
                    unique_id: Uuid::new_v4(),
                    name: root_name,
                    server_relative_url: root_folder_url.to_string(),
                },
            );
            mem_web.lists.push(MemList {
                info: info.clone(),
                template,
                content_types: vec![base_content_type],
                fields: vec![MemField {
                    info: FieldInfo {
                        internal_name: "Title".to_string(),
                        kind: FieldKind::Text,
                    },
                    indexed: false,
                }],
                items: Vec::new(),
                next_item_id: 0,
                policy: LibraryPolicy::default(),
            });
        }

        info
    }

    fn list_mut(&mut self, web: &WebInfo, list: &ListInfo) -> Result<&mut MemList, CmsError> {
        self.web_mut(web)?
            .lists
            .iter_mut()
            .find(|l| l.info.id == list.id)
            .ok_or_else(|| not_found(format!("list {}", list.title)))
    }

    fn list_by_title_mut(&mut self, web: &WebInfo, title: &str) -> Result<&mut MemList, CmsError> {
        self.web_mut(web)?
            .lists
            .iter_mut()
            .find(|l| l.info.title.eq_ignore_ascii_case(title))
            .ok_or_else(|| not_found(format!("list {}", title)))
    }

    fn owning_list(&self, web: &WebInfo, url: &str) -> Result<(Uuid, LibraryPolicy), CmsError> {
        let url = key(url);
        self.web(web)?
            .lists
            .iter()
            .filter(|l| url.starts_with(&format!("{}/", key(&l.info.root_folder_url))))
            .max_by_key(|l| l.info.root_folder_url.len())
            .map(|l| (l.info.id, l.policy))
            .ok_or_else(|| not_found(format!("library for {}", url)))
    }

    fn policy_of(&self, web: &WebInfo, list_id: Uuid) -> LibraryPolicy {
        self.web(web)
            .ok()
            .and_then(|w| w.lists.iter().find(|l| l.info.id == list_id))
            .map(|l| l.policy)
            .unwrap_or_default()
    }

    fn file_mut(&mut self, web: &WebInfo, url: &str) -> Result<&mut MemFile, CmsError> {
        self.web_mut(web)?
            .files
            .get_mut(&key(url))
            .ok_or_else(|| not_found(format!("file {}", url)))
    }

    fn find_content_type(
        &self,
        web: &WebInfo,
        id: &str,
    ) -> Result<Option<ContentTypeInfo>, CmsError> {
        let mut index = Some(self.web_index(web)?);
        while let Some(i) = index {
            if let Some(ct) = self.webs[i]
                .content_types
                .iter()
                .find(|ct| ct.id.eq_ignore_ascii_case(id))
            {
                return Ok(Some(ct.clone()));
            }
            index = self.webs[i].parent;
        }
        Ok(None)
    }
}

/// A complete site collection held in memory
pub struct MemoryCms {
    state: Mutex<State>,
}

impl MemoryCms {
    /// Create a site collection whose root web lives at `site_url`
    pub fn new(site_url: &str) -> Self {
        let mut state = State::default();
        let root = state.new_web(None, "Root", site_url);
        if let Some(web) = state.webs.first_mut() {
            web.content_types = vec![
                ContentTypeInfo {
                    id: "0x01".to_string(),
                    name: "Item".to_string(),
                },
                ContentTypeInfo {
                    id: "0x0101".to_string(),
                    name: "Document".to_string(),
                },
            ];
        }
        state.guids.insert("spsiteid".to_string(), Uuid::new_v4());
        state.guids.insert("spwebid".to_string(), root.id);

        Self {
            state: Mutex::new(state),
        }
    }

    /// Add a child web below `parent`
    pub async fn add_web(&self, parent: &WebInfo, leaf: &str, title: &str) -> WebInfo {
        let mut state = self.state.lock().await;
        let parent_index = state.web_index(parent).ok();
        state.new_web(parent_index, title, &join_url(&parent.url, leaf))
    }

    /// Add a list whose URL is derived from its title
    pub async fn add_list(&self, web: &WebInfo, title: &str, template: ListTemplate) -> ListInfo {
        let mut state = self.state.lock().await;
        let url_name: String = title.chars().filter(|c| !c.is_whitespace()).collect();
        let root = if is_library(template) {
            join_url(&web.server_relative_url, &url_name)
        } else {
            join_url(&web.server_relative_url, &format!("Lists/{}", url_name))
        };
        let mut info = state.insert_list(web, title, template, &root);
        info.title = title.to_string();
        info
    }

    pub async fn add_field(&self, web: &WebInfo, list_title: &str, field: FieldInfo) {
        let mut state = self.state.lock().await;
        if let Ok(list) = state.list_by_title_mut(web, list_title) {
            list.fields.push(MemField {
                info: field,
                indexed: false,
            });
        }
    }

    pub async fn set_policy(&self, web: &WebInfo, list_title: &str, policy: LibraryPolicy) {
        let mut state = self.state.lock().await;
        if let Ok(list) = state.list_by_title_mut(web, list_title) {
            list.policy = policy;
        }
    }

    /// Insert an item directly, bypassing the trait
    pub async fn seed_item(
        &self,
        web: &WebInfo,
        list_title: &str,
        values: Vec<(&str, FieldValue)>,
    ) -> i32 {
        let mut state = self.state.lock().await;
        match state.list_by_title_mut(web, list_title) {
            Ok(list) => {
                let id = list.allocate_item_id();
                list.items.push(ListItem {
                    id,
                    values: values
                        .into_iter()
                        .map(|(name, value)| (name.to_string(), value))
                        .collect(),
                });
                id
            }
            Err(_) => 0,
        }
    }

    /// Place a file directly, bypassing the lifecycle
    pub async fn seed_file(&self, web: &WebInfo, url: &str, checked_out: bool) {
        let mut state = self.state.lock().await;
        let Ok((list_id, _)) = state.owning_list(web, url) else {
            return;
        };
        let item_id = match state.list_mut(
            web,
            &ListInfo {
                id: list_id,
                title: String::new(),
                default_view_url: String::new(),
                root_folder_url: String::new(),
            },
        ) {
            Ok(list) => list.allocate_item_id(),
            Err(_) => return,
        };
        if let Ok(mem_web) = state.web_mut(web) {
            mem_web.files.insert(
                key(url),
                MemFile {
                    list_id,
                    item_id,
                    content: Vec::new(),
                    checked_out,
                    level: if checked_out {
                        FileLevel::Checkout
                    } else {
                        FileLevel::Published
                    },
                    level_before_checkout: FileLevel::Published,
                    fields: BTreeMap::new(),
                },
            );
        }
    }

    pub async fn add_user(&self, login: &str) -> i32 {
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        state.users.insert(login.to_lowercase(), id);
        id
    }

    /// Make a content type available in a web
    pub async fn add_content_type(&self, web: &WebInfo, id: &str, name: &str) {
        let mut state = self.state.lock().await;
        if let Ok(mem_web) = state.web_mut(web) {
            mem_web.content_types.push(ContentTypeInfo {
                id: id.to_string(),
                name: name.to_string(),
            });
        }
    }

    /// Add a term, creating its group and term set on first use.
    /// Returns the term set id and the term id.
    pub async fn add_term(&self, group: &str, term_set: &str, term: &str) -> (Uuid, Uuid) {
        let mut state = self.state.lock().await;
        let groups = state.term_store.get_or_insert_with(Vec::new);

        let group_index = match groups.iter().position(|g| g.name == group) {
            Some(index) => index,
            None => {
                groups.push(TermGroupRecord {
                    name: group.to_string(),
                    sets: Vec::new(),
                });
                groups.len() - 1
            }
        };
        let sets = &mut groups[group_index].sets;
        let set_index = match sets.iter().position(|s| s.name == term_set) {
            Some(index) => index,
            None => {
                sets.push(TermSetRecord {
                    id: Uuid::new_v4(),
                    name: term_set.to_string(),
                    terms: Vec::new(),
                });
                sets.len() - 1
            }
        };

        let set = &mut sets[set_index];
        let term_id = Uuid::new_v4();
        set.terms.push((term.to_string(), term_id));
        (set.id, term_id)
    }

    pub async fn set_guid(&self, name: &str, value: Uuid) {
        self.state.lock().await.guids.insert(name.to_lowercase(), value);
    }

    pub async fn set_web_property(&self, web: &WebInfo, key: &str, value: &str) {
        let mut state = self.state.lock().await;
        if let Ok(mem_web) = state.web_mut(web) {
            mem_web.properties.insert(key.to_string(), value.to_string());
        }
    }

    pub async fn seed_rendition(&self, rendition: ImageRendition) {
        self.state.lock().await.renditions.push(rendition);
    }

    // ---- inspection ----

    /// Number of folders created through `add_folder`
    pub async fn folders_created(&self) -> usize {
        self.state.lock().await.folders_created
    }

    pub async fn journal(&self) -> Vec<JournalEntry> {
        self.state.lock().await.journal.clone()
    }

    /// Operations recorded against one file, in order
    pub async fn operations_on(&self, url: &str) -> Vec<&'static str> {
        self.state
            .lock()
            .await
            .journal
            .iter()
            .filter(|e| e.url.eq_ignore_ascii_case(url))
            .map(|e| e.operation)
            .collect()
    }

    pub async fn items(&self, web: &WebInfo, list_title: &str) -> Vec<ListItem> {
        let mut state = self.state.lock().await;
        state
            .list_by_title_mut(web, list_title)
            .map(|l| l.items.clone())
            .unwrap_or_default()
    }

    pub async fn list_titles(&self, web: &WebInfo) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .web(web)
            .map(|w| w.lists.iter().map(|l| l.info.title.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn list_template(&self, web: &WebInfo, list_title: &str) -> Option<ListTemplate> {
        let mut state = self.state.lock().await;
        state.list_by_title_mut(web, list_title).ok().map(|l| l.template)
    }

    /// Content type names bound to a list, default first
    pub async fn content_type_names(&self, web: &WebInfo, list_title: &str) -> Vec<String> {
        let mut state = self.state.lock().await;
        state
            .list_by_title_mut(web, list_title)
            .map(|l| l.content_types.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn indexed_fields(&self, web: &WebInfo, list_title: &str) -> Vec<String> {
        let mut state = self.state.lock().await;
        state
            .list_by_title_mut(web, list_title)
            .map(|l| {
                l.fields
                    .iter()
                    .filter(|f| f.indexed)
                    .map(|f| f.info.internal_name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn file(&self, web: &WebInfo, url: &str) -> Option<(FileState, Vec<u8>)> {
        let state = self.state.lock().await;
        state
            .web(web)
            .ok()
            .and_then(|w| w.files.get(&key(url)))
            .map(|f| (f.state(), f.content.clone()))
    }

    pub async fn file_value(&self, web: &WebInfo, url: &str, field: &str) -> Option<FieldValue> {
        let state = self.state.lock().await;
        state
            .web(web)
            .ok()
            .and_then(|w| w.files.get(&key(url)))
            .and_then(|f| f.fields.get(field).cloned())
    }

    /// Navigation nodes of one type as `(title, parent title)` pairs
    pub async fn navigation(
        &self,
        web: &WebInfo,
        navigation_type: NavigationType,
    ) -> Vec<(String, Option<String>)> {
        let state = self.state.lock().await;
        let Ok(mem_web) = state.web(web) else {
            return Vec::new();
        };
        mem_web
            .navigation
            .iter()
            .filter(|n| n.navigation_type == navigation_type)
            .map(|n| {
                let parent = n.parent.and_then(|p| {
                    mem_web
                        .navigation
                        .iter()
                        .find(|candidate| candidate.id == p)
                        .map(|candidate| candidate.title.clone())
                });
                (n.title.clone(), parent)
            })
            .collect()
    }

    pub async fn navigation_urls(&self, web: &WebInfo) -> Vec<(String, Option<String>, bool)> {
        let state = self.state.lock().await;
        state
            .web(web)
            .map(|w| {
                w.navigation
                    .iter()
                    .map(|n| (n.title.clone(), n.url.clone(), n.is_external))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn all_webs(&self) -> Vec<WebInfo> {
        self.state
            .lock()
            .await
            .webs
            .iter()
            .map(|w| w.info.clone())
            .collect()
    }

    pub async fn master_page(&self, web: &WebInfo, slot: MasterPageSlot) -> Option<String> {
        let state = self.state.lock().await;
        state.web(web).ok().and_then(|w| match slot {
            MasterPageSlot::System => w.master_url.clone(),
            MasterPageSlot::Custom => w.custom_master_url.clone(),
        })
    }

    pub async fn welcome_page(&self, web: &WebInfo) -> Option<String> {
        let state = self.state.lock().await;
        state.web(web).ok().and_then(|w| w.welcome_page.clone())
    }

    pub async fn renditions(&self) -> Vec<ImageRendition> {
        self.state.lock().await.renditions.clone()
    }

    pub async fn search_configuration(&self) -> Option<String> {
        self.state.lock().await.search_configuration.clone()
    }

    pub async fn role_definitions(&self, web: &WebInfo) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .web(web)
            .map(|w| w.role_definitions.clone())
            .unwrap_or_default()
    }

    /// Groups of a web as `(group, role)` pairs
    pub async fn groups(&self, web: &WebInfo) -> Vec<(String, String)> {
        let state = self.state.lock().await;
        state.web(web).map(|w| w.groups.clone()).unwrap_or_default()
    }

    pub async fn imported_term_sets(&self) -> Vec<(String, String)> {
        self.state.lock().await.imported_term_sets.clone()
    }

    pub async fn web_content_type(&self, web: &WebInfo, id: &str) -> Option<ContentTypeInfo> {
        let state = self.state.lock().await;
        state.find_content_type(web, id).ok().flatten()
    }
}

#[async_trait]
impl Cms for MemoryCms {
    async fn root_web(&self) -> Result<WebInfo, CmsError> {
        let state = self.state.lock().await;
        state
            .webs
            .first()
            .map(|w| w.info.clone())
            .ok_or_else(|| not_found("root web"))
    }

    async fn child_webs(&self, web: &WebInfo) -> Result<Vec<WebInfo>, CmsError> {
        let state = self.state.lock().await;
        let index = state.web_index(web)?;
        Ok(state
            .webs
            .iter()
            .filter(|w| w.parent == Some(index))
            .map(|w| w.info.clone())
            .collect())
    }

    async fn web_by_url(&self, url: &str) -> Result<Option<WebInfo>, CmsError> {
        let state = self.state.lock().await;
        let wanted = key(url);
        Ok(state
            .webs
            .iter()
            .find(|w| key(&w.info.url) == wanted)
            .map(|w| w.info.clone()))
    }

    async fn create_web(&self, parent: &WebInfo, web: &NewWeb) -> Result<WebInfo, CmsError> {
        let mut state = self.state.lock().await;
        let parent_index = state.web_index(parent)?;
        let url = join_url(&parent.url, &web.leaf_url);
        if state.webs.iter().any(|w| key(&w.info.url) == key(&url)) {
            return Err(CmsError::Remote {
                status: 409,
                message: format!("web {} already exists", url),
            });
        }

        let info = state.new_web(Some(parent_index), &web.title, &url);
        let pages_root = join_url(&info.server_relative_url, "Pages");
        let pages = state.insert_list(&info, "Pages", ListTemplate::PublishingPages, &pages_root);
        let welcome = join_url(&pages_root, "default.aspx");

        let list = state.list_mut(&info, &pages)?;
        list.policy = LibraryPolicy {
            drafts: true,
            ..LibraryPolicy::default()
        };
        let item_id = list.allocate_item_id();
        let mem_web = state.web_mut(&info)?;
        mem_web.files.insert(
            key(&welcome),
            MemFile {
                list_id: pages.id,
                item_id,
                content: Vec::new(),
                checked_out: false,
                level: FileLevel::Draft,
                level_before_checkout: FileLevel::Draft,
                fields: BTreeMap::new(),
            },
        );
        mem_web.welcome_page = Some("Pages/default.aspx".to_string());
        mem_web
            .properties
            .insert("__InheritsNavigation".to_string(), web.inherit_navigation.to_string());

        Ok(info)
    }

    async fn lookup_guid(&self, name: &str) -> Result<Option<Uuid>, CmsError> {
        Ok(self.state.lock().await.guids.get(&name.to_lowercase()).copied())
    }

    async fn lists(&self, web: &WebInfo) -> Result<Vec<ListInfo>, CmsError> {
        let state = self.state.lock().await;
        Ok(state.web(web)?.lists.iter().map(|l| l.info.clone()).collect())
    }

    async fn list_by_title(
        &self,
        web: &WebInfo,
        title: &str,
    ) -> Result<Option<ListInfo>, CmsError> {
        let state = self.state.lock().await;
        Ok(state
            .web(web)?
            .lists
            .iter()
            .find(|l| l.info.title.eq_ignore_ascii_case(title))
            .map(|l| l.info.clone()))
    }

    async fn create_list(
        &self,
        web: &WebInfo,
        template: ListTemplate,
        url_name: &str,
    ) -> Result<ListInfo, CmsError> {
        let mut state = self.state.lock().await;
        if state
            .web(web)?
            .lists
            .iter()
            .any(|l| l.info.title.eq_ignore_ascii_case(url_name))
        {
            return Err(rejected(format!("list {} already exists", url_name)));
        }
        let root = if is_library(template) {
            join_url(&web.server_relative_url, url_name)
        } else {
            join_url(&web.server_relative_url, &format!("Lists/{}", url_name))
        };
        Ok(state.insert_list(web, url_name, template, &root))
    }

    async fn set_list_title(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        title: &str,
    ) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        state.list_mut(web, list)?.info.title = title.to_string();
        Ok(())
    }

    async fn delete_list(&self, web: &WebInfo, list: &ListInfo) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        let mem_web = state.web_mut(web)?;
        let before = mem_web.lists.len();
        mem_web.lists.retain(|l| l.info.id != list.id);
        if mem_web.lists.len() == before {
            return Err(not_found(format!("list {}", list.title)));
        }
        Ok(())
    }

    async fn master_page_gallery(&self, web: &WebInfo) -> Result<ListInfo, CmsError> {
        let state = self.state.lock().await;
        state
            .web(web)?
            .lists
            .iter()
            .find(|l| l.template == ListTemplate::MasterPageCatalog)
            .map(|l| l.info.clone())
            .ok_or_else(|| not_found("master page gallery"))
    }

    async fn folder(&self, web: &WebInfo, url: &str) -> Result<FolderInfo, CmsError> {
        let state = self.state.lock().await;
        state
            .web(web)?
            .folders
            .get(&key(url))
            .cloned()
            .ok_or_else(|| not_found(format!("folder {}", url)))
    }

    async fn add_folder(
        &self,
        web: &WebInfo,
        parent_url: &str,
        name: &str,
    ) -> Result<FolderInfo, CmsError> {
        let mut state = self.state.lock().await;
        if !state.web(web)?.folders.contains_key(&key(parent_url)) {
            return Err(not_found(format!("folder {}", parent_url)));
        }

        let mut current = trim_end_slashes(parent_url).to_string();
        let mut created = 0;
        let mut folder = None;
        for segment in name.split('/').filter(|s| !s.is_empty()) {
            current = join_url(&current, segment);
            let mem_web = state.web_mut(web)?;
            let entry = mem_web.folders.entry(key(&current)).or_insert_with(|| {
                created += 1;
                FolderInfo {
                    unique_id: Uuid::new_v4(),
                    name: segment.to_string(),
                    server_relative_url: current.clone(),
                }
            });
            folder = Some(entry.clone());
        }
        state.folders_created += created;

        folder.ok_or_else(|| rejected("empty folder name"))
    }

    async fn delete_folder(&self, web: &WebInfo, url: &str) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        let prefix = format!("{}/", key(url));
        let mem_web = state.web_mut(web)?;
        if mem_web.folders.remove(&key(url)).is_none() {
            return Err(not_found(format!("folder {}", url)));
        }
        mem_web.folders.retain(|k, _| !k.starts_with(&prefix));
        mem_web.files.retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }

    async fn file_state(&self, web: &WebInfo, url: &str) -> Result<FileState, CmsError> {
        let state = self.state.lock().await;
        Ok(state
            .web(web)?
            .files
            .get(&key(url))
            .map(MemFile::state)
            .unwrap_or_else(FileState::missing))
    }

    async fn upload_file(
        &self,
        web: &WebInfo,
        url: &str,
        content: Vec<u8>,
    ) -> Result<FileState, CmsError> {
        let mut state = self.state.lock().await;
        let (folder, _) = crate::utils::split_file_url(url);
        if !state.web(web)?.folders.contains_key(&key(folder)) {
            return Err(not_found(format!("folder {}", folder)));
        }
        let (list_id, policy) = state.owning_list(web, url)?;
        state.record("upload", url);

        if let Ok(file) = state.file_mut(web, url) {
            file.content = content;
            if !file.checked_out {
                file.level = if policy.drafts || policy.moderation {
                    FileLevel::Draft
                } else {
                    FileLevel::Published
                };
                if policy.moderation {
                    file.fields.insert(
                        MODERATION_STATUS_FIELD.to_string(),
                        FieldValue::Text("3".to_string()),
                    );
                }
            }
            return Ok(file.state());
        }

        let item_id = state.list_mut(
            web,
            &ListInfo {
                id: list_id,
                title: String::new(),
                default_view_url: String::new(),
                root_folder_url: String::new(),
            },
        )?
        .allocate_item_id();

        let base_level = if policy.drafts || policy.moderation {
            FileLevel::Draft
        } else {
            FileLevel::Published
        };
        let mut fields = BTreeMap::new();
        if policy.moderation {
            fields.insert(
                MODERATION_STATUS_FIELD.to_string(),
                FieldValue::Text("3".to_string()),
            );
        }
        let file = MemFile {
            list_id,
            item_id,
            content,
            checked_out: policy.require_checkout,
            level: if policy.require_checkout {
                FileLevel::Checkout
            } else {
                base_level
            },
            level_before_checkout: base_level,
            fields,
        };
        let file_state = file.state();
        state.web_mut(web)?.files.insert(key(url), file);
        Ok(file_state)
    }

    async fn check_out(&self, web: &WebInfo, url: &str) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        let file = state.file_mut(web, url)?;
        if file.checked_out {
            return Err(rejected(format!("{} is already checked out", url)));
        }
        file.level_before_checkout = file.level;
        file.checked_out = true;
        file.level = FileLevel::Checkout;
        state.record("check_out", url);
        Ok(())
    }

    async fn undo_check_out(&self, web: &WebInfo, url: &str) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        let file = state.file_mut(web, url)?;
        if !file.checked_out {
            return Err(rejected(format!("{} is not checked out", url)));
        }
        file.checked_out = false;
        file.level = file.level_before_checkout;
        state.record("undo_check_out", url);
        Ok(())
    }

    async fn check_in(&self, web: &WebInfo, url: &str, _comment: &str) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        let list_id = state.file_mut(web, url)?.list_id;
        let policy = state.policy_of(web, list_id);
        let file = state.file_mut(web, url)?;
        if !file.checked_out {
            return Err(rejected(format!("{} is not checked out", url)));
        }
        file.checked_out = false;
        file.level = if policy.moderation {
            FileLevel::Draft
        } else {
            FileLevel::Published
        };
        state.record("check_in", url);
        Ok(())
    }

    async fn publish(&self, web: &WebInfo, url: &str, _comment: &str) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        let list_id = state.file_mut(web, url)?.list_id;
        let policy = state.policy_of(web, list_id);
        let file = state.file_mut(web, url)?;
        if file.checked_out {
            return Err(rejected(format!("{} is checked out", url)));
        }
        if policy.moderation {
            file.fields.insert(
                MODERATION_STATUS_FIELD.to_string(),
                FieldValue::Text(MODERATION_PENDING.to_string()),
            );
        } else {
            file.level = FileLevel::Published;
        }
        state.record("publish", url);
        Ok(())
    }

    async fn approve(&self, web: &WebInfo, url: &str, _comment: &str) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        let file = state.file_mut(web, url)?;
        let pending = file
            .fields
            .get(MODERATION_STATUS_FIELD)
            .map(|v| v.to_string() == MODERATION_PENDING)
            .unwrap_or(false);
        if !pending {
            return Err(rejected(format!("{} is not pending approval", url)));
        }
        file.fields.insert(
            MODERATION_STATUS_FIELD.to_string(),
            FieldValue::Text(MODERATION_APPROVED.to_string()),
        );
        file.level = FileLevel::Published;
        state.record("approve", url);
        Ok(())
    }

    async fn file_field(
        &self,
        web: &WebInfo,
        url: &str,
        field: &str,
    ) -> Result<Option<String>, CmsError> {
        let mut state = self.state.lock().await;
        Ok(state
            .file_mut(web, url)?
            .fields
            .get(field)
            .map(|v| v.to_string()))
    }

    async fn set_file_fields(
        &self,
        web: &WebInfo,
        url: &str,
        values: &[(String, FieldValue)],
    ) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        let file = state.file_mut(web, url)?;
        for (name, value) in values {
            file.fields.insert(name.clone(), value.clone());
        }
        state.record("set_fields", url);
        Ok(())
    }

    async fn delete_file(&self, web: &WebInfo, url: &str) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        if state.web_mut(web)?.files.remove(&key(url)).is_none() {
            return Err(not_found(format!("file {}", url)));
        }
        state.record("delete", url);
        Ok(())
    }

    async fn item_file_url(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        item_id: i32,
    ) -> Result<Option<String>, CmsError> {
        let state = self.state.lock().await;
        let mem_web = state.web(web)?;
        Ok(mem_web
            .files
            .iter()
            .find(|(_, f)| f.list_id == list.id && f.item_id == item_id)
            .map(|(url, _)| {
                // keys are lowercased; rebuild the URL from the list root
                let leaf = url.rsplit('/').next().unwrap_or_default();
                mem_web
                    .lists
                    .iter()
                    .find(|l| l.info.id == list.id)
                    .map(|l| {
                        let relative = &url[key(&l.info.root_folder_url).len()..];
                        if relative.trim_start_matches('/') == leaf {
                            join_url(&l.info.root_folder_url, leaf)
                        } else {
                            format!("{}{}", l.info.root_folder_url, relative)
                        }
                    })
                    .unwrap_or_else(|| url.clone())
            }))
    }

    async fn content_type(
        &self,
        web: &WebInfo,
        id: &str,
    ) -> Result<Option<ContentTypeInfo>, CmsError> {
        let state = self.state.lock().await;
        state.find_content_type(web, id)
    }

    async fn create_content_type(
        &self,
        web: &WebInfo,
        definition: &ContentTypeDefinition,
    ) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        if state.find_content_type(web, &definition.id)?.is_some() {
            return Err(rejected(format!(
                "content type {} already exists",
                definition.id
            )));
        }
        state.web_mut(web)?.content_types.push(ContentTypeInfo {
            id: definition.id.clone(),
            name: definition.name.clone(),
        });
        Ok(())
    }

    async fn list_content_types(
        &self,
        web: &WebInfo,
        list: &ListInfo,
    ) -> Result<Vec<ContentTypeInfo>, CmsError> {
        let mut state = self.state.lock().await;
        Ok(state.list_mut(web, list)?.content_types.clone())
    }

    async fn add_content_type_to_list(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        content_type: &ContentTypeInfo,
        make_default: bool,
    ) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        let mem_list = state.list_mut(web, list)?;
        let position = mem_list
            .content_types
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(&content_type.name));
        let position = match position {
            Some(index) => index,
            None => {
                mem_list.content_types.push(content_type.clone());
                mem_list.content_types.len() - 1
            }
        };
        if make_default {
            let bound = mem_list.content_types.remove(position);
            mem_list.content_types.insert(0, bound);
        }
        Ok(())
    }

    async fn remove_content_type_from_list(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        name: &str,
    ) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        let mem_list = state.list_mut(web, list)?;
        let before = mem_list.content_types.len();
        mem_list
            .content_types
            .retain(|c| !c.name.eq_ignore_ascii_case(name));
        if mem_list.content_types.len() == before {
            return Err(not_found(format!("content type {}", name)));
        }
        Ok(())
    }

    async fn list_fields(
        &self,
        web: &WebInfo,
        list: &ListInfo,
    ) -> Result<Vec<FieldInfo>, CmsError> {
        let mut state = self.state.lock().await;
        Ok(state
            .list_mut(web, list)?
            .fields
            .iter()
            .map(|f| f.info.clone())
            .collect())
    }

    async fn set_field_indexed(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        internal_name: &str,
    ) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        let field = state
            .list_mut(web, list)?
            .fields
            .iter_mut()
            .find(|f| f.info.internal_name.eq_ignore_ascii_case(internal_name))
            .ok_or_else(|| not_found(format!("field {}", internal_name)))?;
        field.indexed = true;
        Ok(())
    }

    async fn add_item(&self, web: &WebInfo, list: &ListInfo) -> Result<i32, CmsError> {
        let mut state = self.state.lock().await;
        let mem_list = state.list_mut(web, list)?;
        let id = mem_list.allocate_item_id();
        mem_list.items.push(ListItem {
            id,
            values: BTreeMap::new(),
        });
        Ok(id)
    }

    async fn set_item_field(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        item_id: i32,
        field: &str,
        value: &FieldValue,
    ) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        let mem_list = state.list_mut(web, list)?;
        let internal_name = mem_list
            .fields
            .iter()
            .find(|f| f.info.internal_name.eq_ignore_ascii_case(field))
            .map(|f| f.info.internal_name.clone())
            .ok_or_else(|| not_found(format!("field {}", field)))?;
        let item = mem_list
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| not_found(format!("item {}", item_id)))?;
        item.values.insert(internal_name, value.clone());
        Ok(())
    }

    async fn query_items(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        field: &str,
        value: &str,
    ) -> Result<Vec<ListItem>, CmsError> {
        let mut state = self.state.lock().await;
        Ok(state
            .list_mut(web, list)?
            .items
            .iter()
            .filter(|i| i.text(field).as_deref() == Some(value))
            .cloned()
            .collect())
    }

    async fn delete_item(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        item_id: i32,
    ) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        let mem_list = state.list_mut(web, list)?;
        let before = mem_list.items.len();
        mem_list.items.retain(|i| i.id != item_id);
        if mem_list.items.len() == before {
            return Err(not_found(format!("item {}", item_id)));
        }
        Ok(())
    }

    async fn ensure_user(&self, _web: &WebInfo, login: &str) -> Result<Option<i32>, CmsError> {
        Ok(self.state.lock().await.users.get(&login.to_lowercase()).copied())
    }

    async fn term_store_available(&self) -> Result<bool, CmsError> {
        Ok(self.state.lock().await.term_store.is_some())
    }

    async fn term_id_by_path(
        &self,
        group: &str,
        term_set: &str,
        term: &str,
    ) -> Result<Uuid, CmsError> {
        let state = self.state.lock().await;
        state
            .term_store
            .as_ref()
            .and_then(|groups| groups.iter().find(|g| g.name.eq_ignore_ascii_case(group)))
            .and_then(|g| g.sets.iter().find(|s| s.name.eq_ignore_ascii_case(term_set)))
            .and_then(|s| s.terms.iter().find(|(name, _)| name == term))
            .map(|(_, id)| *id)
            .ok_or_else(|| not_found(format!("term {}:{}:{}", group, term_set, term)))
    }

    async fn term_id_in_set(&self, term_set_id: Uuid, name: &str) -> Result<Uuid, CmsError> {
        let state = self.state.lock().await;
        state
            .term_store
            .iter()
            .flatten()
            .flat_map(|g| g.sets.iter())
            .find(|s| s.id == term_set_id)
            .and_then(|s| s.terms.iter().find(|(term, _)| term == name))
            .map(|(_, id)| *id)
            .ok_or_else(|| not_found(format!("term {} in set {}", name, term_set_id)))
    }

    async fn import_term_set(&self, group: &str, file_path: &str) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        let known = state
            .term_store
            .as_ref()
            .map(|groups| groups.iter().any(|g| g.name.eq_ignore_ascii_case(group)))
            .unwrap_or(false);
        if !known {
            return Err(not_found(format!("term group {}", group)));
        }
        state
            .imported_term_sets
            .push((group.to_string(), file_path.to_string()));
        Ok(())
    }

    async fn delete_navigation_nodes(
        &self,
        web: &WebInfo,
        navigation_type: NavigationType,
    ) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        state
            .web_mut(web)?
            .navigation
            .retain(|n| n.navigation_type != navigation_type);
        Ok(())
    }

    async fn add_navigation_node(
        &self,
        web: &WebInfo,
        node: &NavigationNodeEntity,
    ) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        let mem_web = state.web_mut(web)?;

        let parent = if node.parent_title.is_empty() {
            None
        } else {
            let parent = mem_web
                .navigation
                .iter()
                .find(|n| {
                    n.navigation_type == node.navigation_type
                        && n.parent.is_none()
                        && n.title == node.parent_title
                })
                .ok_or_else(|| not_found(format!("navigation node {}", node.parent_title)))?;
            Some(parent.id)
        };

        mem_web.navigation.push(MemNode {
            id,
            navigation_type: node.navigation_type,
            title: node.title.clone(),
            url: node.url.as_ref().map(|u| u.to_string()),
            parent,
            is_external: node.is_external,
        });
        Ok(())
    }

    async fn web_property(&self, web: &WebInfo, key: &str) -> Result<Option<String>, CmsError> {
        let state = self.state.lock().await;
        Ok(state.web(web)?.properties.get(key).cloned())
    }

    async fn set_master_page(
        &self,
        web: &WebInfo,
        slot: MasterPageSlot,
        url: &str,
    ) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        let mem_web = state.web_mut(web)?;
        match slot {
            MasterPageSlot::System => mem_web.master_url = Some(url.to_string()),
            MasterPageSlot::Custom => mem_web.custom_master_url = Some(url.to_string()),
        }
        Ok(())
    }

    async fn set_welcome_page(&self, web: &WebInfo, url: &str) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        state.web_mut(web)?.welcome_page = Some(url.to_string());
        Ok(())
    }

    async fn add_publishing_page(
        &self,
        web: &WebInfo,
        name: &str,
        title: &str,
        layout_url: &str,
    ) -> Result<String, CmsError> {
        let mut state = self.state.lock().await;
        let (list_id, root, policy) = state
            .web(web)?
            .lists
            .iter()
            .find(|l| l.template == ListTemplate::PublishingPages)
            .map(|l| (l.info.id, l.info.root_folder_url.clone(), l.policy))
            .ok_or_else(|| not_found("pages library"))?;

        let url = join_url(&root, name);
        if state.web(web)?.files.contains_key(&key(&url)) {
            return Err(rejected(format!("page {} already exists", url)));
        }

        let item_id = state
            .web_mut(web)?
            .lists
            .iter_mut()
            .find(|l| l.info.id == list_id)
            .map(MemList::allocate_item_id)
            .ok_or_else(|| not_found("pages library"))?;

        let mut fields = BTreeMap::new();
        fields.insert("Title".to_string(), FieldValue::Text(title.to_string()));
        fields.insert(
            "PublishingPageLayout".to_string(),
            FieldValue::Text(layout_url.to_string()),
        );
        let level = if policy.drafts || policy.moderation {
            FileLevel::Draft
        } else {
            FileLevel::Published
        };
        state.web_mut(web)?.files.insert(
            key(&url),
            MemFile {
                list_id,
                item_id,
                content: Vec::new(),
                checked_out: policy.require_checkout,
                level: if policy.require_checkout {
                    FileLevel::Checkout
                } else {
                    level
                },
                level_before_checkout: level,
                fields,
            },
        );
        state.record("add_page", &url);
        Ok(url)
    }

    async fn image_renditions(&self, _web: &WebInfo) -> Result<Vec<ImageRendition>, CmsError> {
        Ok(self.state.lock().await.renditions.clone())
    }

    async fn set_image_renditions(
        &self,
        _web: &WebInfo,
        renditions: &[ImageRendition],
    ) -> Result<(), CmsError> {
        self.state.lock().await.renditions = renditions.to_vec();
        Ok(())
    }

    async fn import_search_configuration(
        &self,
        _web: &WebInfo,
        xml: &str,
    ) -> Result<(), CmsError> {
        self.state.lock().await.search_configuration = Some(xml.to_string());
        Ok(())
    }

    async fn export_search_configuration(&self, _web: &WebInfo) -> Result<String, CmsError> {
        Ok(self
            .state
            .lock()
            .await
            .search_configuration
            .clone()
            .unwrap_or_default())
    }

    async fn ensure_role_definition(
        &self,
        web: &WebInfo,
        name: &str,
        _description: &str,
    ) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        let mem_web = state.web_mut(web)?;
        if !mem_web.role_definitions.iter().any(|r| r == name) {
            mem_web.role_definitions.push(name.to_string());
        }
        Ok(())
    }

    async fn group_exists(&self, web: &WebInfo, name: &str) -> Result<bool, CmsError> {
        let state = self.state.lock().await;
        Ok(state.web(web)?.groups.iter().any(|(group, _)| group == name))
    }

    async fn create_group(
        &self,
        web: &WebInfo,
        name: &str,
        _description: &str,
        role: &str,
    ) -> Result<(), CmsError> {
        let mut state = self.state.lock().await;
        let role_known = state
            .webs
            .first()
            .map(|root| root.role_definitions.iter().any(|r| r == role))
            .unwrap_or(false);
        if !role_known {
            return Err(not_found(format!("role definition {}", role)));
        }
        let mem_web = state.web_mut(web)?;
        if mem_web.groups.iter().any(|(group, _)| group == name) {
            return Err(rejected(format!("group {} already exists", name)));
        }
        mem_web.groups.push((name.to_string(), role.to_string()));
        Ok(())
    }
}
