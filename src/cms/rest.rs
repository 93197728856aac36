//! CMS client over the `_api` REST endpoints.

use super::types::*;
use super::{Cms, CmsError};
use crate::utils::{join_url, split_file_url, trim_end_slashes};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

const ACCEPT_JSON: &str = "application/json;odata=nometadata";

/// Id of the search navigation root node
const SEARCH_NAV_NODE_ID: i32 = 1040;

/// ViewListItems | ViewPages
const READ_PERMISSION_MASK: &str = "2049";

const RENDITIONS_FILE: &str = "_catalogs/masterpage/PublishingImageRenditions.xml";

/// How requests are authenticated
#[derive(Debug, Clone)]
pub enum RestAuth {
    /// `domain\username` with a password
    Basic { username: String, password: String },
    /// Pre-issued access token
    Bearer(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WebPayload {
    id: Uuid,
    title: String,
    url: String,
    server_relative_url: String,
}

impl From<WebPayload> for WebInfo {
    fn from(web: WebPayload) -> Self {
        WebInfo {
            id: web.id,
            title: web.title,
            url: web.url,
            server_relative_url: web.server_relative_url,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FolderRef {
    server_relative_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListPayload {
    id: Uuid,
    title: String,
    #[serde(default)]
    default_view_url: String,
    root_folder: FolderRef,
}

impl From<ListPayload> for ListInfo {
    fn from(list: ListPayload) -> Self {
        ListInfo {
            id: list.id,
            title: list.title,
            default_view_url: list.default_view_url,
            root_folder_url: list.root_folder.server_relative_url,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FolderPayload {
    #[serde(default = "default_true")]
    exists: bool,
    unique_id: Uuid,
    name: String,
    server_relative_url: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FilePayload {
    exists: bool,
    check_out_type: i64,
    level: i64,
}

#[derive(Debug, Deserialize)]
struct Collection<T> {
    value: Vec<T>,
}

const WEB_SELECT: &str = "Id,Title,Url,ServerRelativeUrl";
const LIST_SELECT: &str = "Id,Title,DefaultViewUrl,RootFolder/ServerRelativeUrl";

/// Quote a value for use as an OData string literal
fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Item fields starting with `_` are exposed with an `OData_` prefix
fn odata_field(name: &str) -> String {
    if name.starts_with('_') {
        format!("OData_{}", name)
    } else {
        name.to_string()
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Form value accepted by `ValidateUpdateListItem`
fn form_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(text) => text.clone(),
        FieldValue::Geolocation(g) => format!("POINT({} {})", g.longitude, g.latitude),
        FieldValue::Lookup(id) => id.to_string(),
        FieldValue::Url { url, description } => format!("{}, {}", url, description),
        FieldValue::User { login, .. } => json!([{ "Key": login }]).to_string(),
        FieldValue::Taxonomy { term_id, label } => format!("{}|{};", label, term_id),
    }
}

fn field_kind(kind: i64, type_name: &str) -> FieldKind {
    match kind {
        2 => FieldKind::Text,
        7 => FieldKind::Lookup,
        11 => FieldKind::Url,
        20 => FieldKind::User,
        31 => FieldKind::Geolocation,
        _ => FieldKind::Other(type_name.to_string()),
    }
}

fn parse_renditions(xml: &str) -> Result<Vec<ImageRendition>, CmsError> {
    let document = roxmltree::Document::parse(xml)
        .map_err(|e| CmsError::InvalidResponse(format!("renditions: {}", e)))?;

    let child_text = |node: roxmltree::Node, name: &str| {
        node.children()
            .find(|c| c.has_tag_name(name))
            .and_then(|c| c.text())
            .unwrap_or_default()
            .trim()
            .to_string()
    };

    Ok(document
        .descendants()
        .filter(|n| n.has_tag_name("ImageRendition"))
        .map(|n| ImageRendition {
            name: child_text(n, "Name"),
            width: child_text(n, "Width").parse().unwrap_or_default(),
            height: child_text(n, "Height").parse().unwrap_or_default(),
        })
        .collect())
}

fn render_renditions(renditions: &[ImageRendition]) -> String {
    let mut xml =
        String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<ArrayOfImageRendition>");
    for (index, r) in renditions.iter().enumerate() {
        let name = r
            .name
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;");
        xml.push_str(&format!(
            "<ImageRendition><Id>{}</Id><Version>1</Version><Name>{}</Name><Width>{}</Width><Height>{}</Height></ImageRendition>",
            index + 1,
            name,
            r.width,
            r.height
        ));
    }
    xml.push_str("</ArrayOfImageRendition>");
    xml
}

fn find_by_label(terms: &Value, name: &str) -> Option<Uuid> {
    terms["value"].as_array()?.iter().find_map(|term| {
        let matches = term["labels"]
            .as_array()
            .map(|labels| labels.iter().any(|l| l["name"].as_str() == Some(name)))
            .unwrap_or(false);
        if matches {
            term["id"].as_str().and_then(|id| Uuid::parse_str(id).ok())
        } else {
            None
        }
    })
}

async fn check(response: Response) -> Result<Response, CmsError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            CmsError::Authentication(format!("{}: {}", status, message))
        }
        StatusCode::NOT_FOUND => CmsError::NotFound(message),
        _ => CmsError::Remote {
            status: status.as_u16(),
            message,
        },
    })
}

fn transport(e: reqwest::Error) -> CmsError {
    CmsError::Transport(e.to_string())
}

/// Treat `NotFound` as an absent value
fn optional<T>(result: Result<T, CmsError>) -> Result<Option<T>, CmsError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(CmsError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// CMS reached over HTTP
pub struct RestCms {
    client: reqwest::Client,
    site_url: String,
    auth: RestAuth,
    /// Request digests per web URL
    digests: Mutex<HashMap<String, String>>,
}

impl RestCms {
    pub fn new(site_url: &str, auth: RestAuth, timeout: Duration) -> Result<Self, CmsError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport)?;

        Ok(Self {
            client,
            site_url: trim_end_slashes(site_url).to_string(),
            auth,
            digests: Mutex::new(HashMap::new()),
        })
    }

    fn request(&self, method: Method, web_url: &str, path: &str) -> RequestBuilder {
        let url = format!("{}/_api/{}", trim_end_slashes(web_url), path);
        let builder = self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, ACCEPT_JSON);

        match &self.auth {
            RestAuth::Basic { username, password } => builder.basic_auth(username, Some(password)),
            RestAuth::Bearer(token) => builder.bearer_auth(token),
        }
    }

    async fn digest(&self, web_url: &str) -> Result<Option<String>, CmsError> {
        if matches!(self.auth, RestAuth::Bearer(_)) {
            return Ok(None);
        }

        let mut digests = self.digests.lock().await;
        if let Some(digest) = digests.get(web_url) {
            return Ok(Some(digest.clone()));
        }

        let response = self
            .request(Method::POST, web_url, "contextinfo")
            .send()
            .await
            .map_err(transport)?;
        let body: Value = check(response).await?.json().await.map_err(transport)?;
        let digest = body["FormDigestValue"]
            .as_str()
            .ok_or_else(|| CmsError::InvalidResponse("missing FormDigestValue".to_string()))?
            .to_string();

        debug!(web = %web_url, "Obtained request digest");
        digests.insert(web_url.to_string(), digest.clone());
        Ok(Some(digest))
    }

    async fn get(
        &self,
        web_url: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, CmsError> {
        let response = self
            .request(Method::GET, web_url, path)
            .query(query)
            .send()
            .await
            .map_err(transport)?;
        check(response).await?.json().await.map_err(transport)
    }

    async fn get_typed<T: serde::de::DeserializeOwned>(
        &self,
        web_url: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, CmsError> {
        let value = self.get(web_url, path, query).await?;
        serde_json::from_value(value).map_err(|e| CmsError::InvalidResponse(e.to_string()))
    }

    async fn get_bytes(
        &self,
        web_url: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<u8>, CmsError> {
        let response = self
            .request(Method::GET, web_url, path)
            .query(query)
            .send()
            .await
            .map_err(transport)?;
        let bytes = check(response).await?.bytes().await.map_err(transport)?;
        Ok(bytes.to_vec())
    }

    async fn write(
        &self,
        web_url: &str,
        path: &str,
        query: &[(&str, String)],
        x_method: Option<&str>,
        body: Option<Value>,
    ) -> Result<Value, CmsError> {
        let mut builder = self
            .request(Method::POST, web_url, path)
            .query(query);
        if let Some(digest) = self.digest(web_url).await? {
            builder = builder.header("X-RequestDigest", digest);
        }
        if let Some(x_method) = x_method {
            builder = builder
                .header("X-HTTP-Method", x_method)
                .header("IF-MATCH", "*");
        }
        builder = match body {
            Some(body) => builder
                .header(reqwest::header::CONTENT_TYPE, ACCEPT_JSON)
                .body(body.to_string()),
            None => builder.header(reqwest::header::CONTENT_LENGTH, "0"),
        };

        let response = builder.send().await.map_err(transport)?;
        let response = check(response).await?;
        let text = response.text().await.map_err(transport)?;
        if text.trim().is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_str(&text).map_err(|e| CmsError::InvalidResponse(e.to_string()))
        }
    }

    async fn post(
        &self,
        web_url: &str,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value, CmsError> {
        self.write(web_url, path, query, None, body).await
    }

    async fn merge(
        &self,
        web_url: &str,
        path: &str,
        query: &[(&str, String)],
        body: Value,
    ) -> Result<(), CmsError> {
        self.write(web_url, path, query, Some("MERGE"), Some(body)).await?;
        Ok(())
    }

    async fn delete(
        &self,
        web_url: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<(), CmsError> {
        self.write(web_url, path, query, Some("DELETE"), None).await?;
        Ok(())
    }

    async fn upload_bytes(
        &self,
        web_url: &str,
        url: &str,
        content: Vec<u8>,
    ) -> Result<(), CmsError> {
        let (folder, name) = split_file_url(url);
        let mut builder = self
            .request(
                Method::POST,
                web_url,
                "web/GetFolderByServerRelativeUrl(@f)/Files/add(url=@n,overwrite=true)",
            )
            .query(&[("@f", literal(folder)), ("@n", literal(name))]);
        if let Some(digest) = self.digest(web_url).await? {
            builder = builder.header("X-RequestDigest", digest);
        }
        let response = builder.body(content).send().await.map_err(transport)?;
        check(response).await?;
        Ok(())
    }

    async fn file_action(
        &self,
        web: &WebInfo,
        url: &str,
        action: &str,
        comment: Option<&str>,
    ) -> Result<(), CmsError> {
        let mut query = vec![("@u", literal(url))];
        let path = match comment {
            Some(comment) => {
                query.push(("@c", literal(comment)));
                format!("web/GetFileByServerRelativeUrl(@u)/{}", action.replace("{comment}", "@c"))
            }
            None => format!("web/GetFileByServerRelativeUrl(@u)/{}", action),
        };
        self.post(&web.url, &path, &query, None).await?;
        Ok(())
    }

    async fn validate_update(
        &self,
        web_url: &str,
        path: &str,
        query: &[(&str, String)],
        values: &[(String, FieldValue)],
    ) -> Result<(), CmsError> {
        let form_values: Vec<Value> = values
            .iter()
            .map(|(name, value)| json!({ "FieldName": name, "FieldValue": form_value(value) }))
            .collect();
        let response = self
            .post(
                web_url,
                &format!("{}/ValidateUpdateListItem", path),
                query,
                Some(json!({ "formValues": form_values, "bNewDocumentUpdate": false })),
            )
            .await?;

        let failures: Vec<String> = response["value"]
            .as_array()
            .into_iter()
            .flatten()
            .filter(|v| v["HasException"].as_bool().unwrap_or(false))
            .map(|v| {
                format!(
                    "{}: {}",
                    v["FieldName"].as_str().unwrap_or_default(),
                    v["ErrorMessage"].as_str().unwrap_or_default()
                )
            })
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CmsError::Remote {
                status: 400,
                message: failures.join("; "),
            })
        }
    }

    fn list_path(list: &ListInfo) -> String {
        format!("web/lists(guid'{}')", list.id)
    }

    fn navigation_path(navigation_type: NavigationType) -> String {
        match navigation_type {
            NavigationType::TopNavigationBar => "web/Navigation/TopNavigationBar".to_string(),
            NavigationType::QuickLaunch => "web/Navigation/QuickLaunch".to_string(),
            NavigationType::SearchNav => {
                format!("web/Navigation/GetNodeById({})/Children", SEARCH_NAV_NODE_ID)
            }
        }
    }

    async fn term_store_get(&self, path: &str) -> Result<Value, CmsError> {
        self.get(&self.site_url, &format!("v2.1/termStore{}", path), &[]).await
    }
}

#[async_trait]
impl Cms for RestCms {
    async fn root_web(&self) -> Result<WebInfo, CmsError> {
        let web: WebPayload = self
            .get_typed(&self.site_url, "site/RootWeb", &[("$select", WEB_SELECT.to_string())])
            .await?;
        Ok(web.into())
    }

    async fn child_webs(&self, web: &WebInfo) -> Result<Vec<WebInfo>, CmsError> {
        let webs: Collection<WebPayload> = self
            .get_typed(&web.url, "web/webs", &[("$select", WEB_SELECT.to_string())])
            .await?;
        Ok(webs.value.into_iter().map(WebInfo::from).collect())
    }

    async fn web_by_url(&self, url: &str) -> Result<Option<WebInfo>, CmsError> {
        let web: Option<WebPayload> = optional(
            self.get_typed(url, "web", &[("$select", WEB_SELECT.to_string())])
                .await,
        )?;
        Ok(web.map(WebInfo::from))
    }

    async fn create_web(&self, parent: &WebInfo, web: &NewWeb) -> Result<WebInfo, CmsError> {
        let body = json!({
            "parameters": {
                "Url": web.leaf_url,
                "Title": web.title,
                "Description": web.description,
                "Language": web.language,
                "WebTemplate": web.template,
                "UseUniquePermissions": !web.inherit_permissions,
            }
        });
        let created = self.post(&parent.url, "web/webinfos/add", &[], Some(body)).await?;
        let created: WebPayload = serde_json::from_value(created)
            .map_err(|e| CmsError::InvalidResponse(e.to_string()))?;
        let info = WebInfo::from(created);

        self.merge(
            &info.url,
            "web/Navigation",
            &[],
            json!({ "UseShared": web.inherit_navigation }),
        )
        .await?;
        Ok(info)
    }

    async fn lookup_guid(&self, name: &str) -> Result<Option<Uuid>, CmsError> {
        let path = match name.to_lowercase().as_str() {
            "spsiteid" => "site/Id",
            "spwebid" => "web/Id",
            _ => {
                debug!(name = %name, "No REST lookup for identifier");
                return Ok(None);
            }
        };
        let value = self.get(&self.site_url, path, &[]).await?;
        Ok(value["value"].as_str().and_then(|id| Uuid::parse_str(id).ok()))
    }

    async fn lists(&self, web: &WebInfo) -> Result<Vec<ListInfo>, CmsError> {
        let lists: Collection<ListPayload> = self
            .get_typed(
                &web.url,
                "web/lists",
                &[
                    ("$select", LIST_SELECT.to_string()),
                    ("$expand", "RootFolder".to_string()),
                ],
            )
            .await?;
        Ok(lists.value.into_iter().map(ListInfo::from).collect())
    }

    async fn list_by_title(
        &self,
        web: &WebInfo,
        title: &str,
    ) -> Result<Option<ListInfo>, CmsError> {
        let list: Option<ListPayload> = optional(
            self.get_typed(
                &web.url,
                "web/lists/GetByTitle(@t)",
                &[
                    ("@t", literal(title)),
                    ("$select", LIST_SELECT.to_string()),
                    ("$expand", "RootFolder".to_string()),
                ],
            )
            .await,
        )?;
        Ok(list.map(ListInfo::from))
    }

    async fn create_list(
        &self,
        web: &WebInfo,
        template: ListTemplate,
        url_name: &str,
    ) -> Result<ListInfo, CmsError> {
        self.post(
            &web.url,
            "web/lists",
            &[],
            Some(json!({
                "Title": url_name,
                "BaseTemplate": template.id(),
                "ContentTypesEnabled": true,
            })),
        )
        .await?;

        self.list_by_title(web, url_name)
            .await?
            .ok_or_else(|| CmsError::NotFound(format!("list {}", url_name)))
    }

    async fn set_list_title(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        title: &str,
    ) -> Result<(), CmsError> {
        self.merge(&web.url, &Self::list_path(list), &[], json!({ "Title": title }))
            .await
    }

    async fn delete_list(&self, web: &WebInfo, list: &ListInfo) -> Result<(), CmsError> {
        self.delete(&web.url, &Self::list_path(list), &[]).await
    }

    async fn master_page_gallery(&self, web: &WebInfo) -> Result<ListInfo, CmsError> {
        let list: ListPayload = self
            .get_typed(
                &web.url,
                &format!("web/GetCatalog({})", ListTemplate::MasterPageCatalog.id()),
                &[
                    ("$select", LIST_SELECT.to_string()),
                    ("$expand", "RootFolder".to_string()),
                ],
            )
            .await?;
        Ok(list.into())
    }

    async fn folder(&self, web: &WebInfo, url: &str) -> Result<FolderInfo, CmsError> {
        let folder: FolderPayload = self
            .get_typed(
                &web.url,
                "web/GetFolderByServerRelativeUrl(@u)",
                &[
                    ("@u", literal(url)),
                    ("$select", "Exists,UniqueId,Name,ServerRelativeUrl".to_string()),
                ],
            )
            .await?;
        if !folder.exists {
            return Err(CmsError::NotFound(format!("folder {}", url)));
        }
        Ok(FolderInfo {
            unique_id: folder.unique_id,
            name: folder.name,
            server_relative_url: folder.server_relative_url,
        })
    }

    async fn add_folder(
        &self,
        web: &WebInfo,
        parent_url: &str,
        name: &str,
    ) -> Result<FolderInfo, CmsError> {
        self.post(
            &web.url,
            "web/GetFolderByServerRelativeUrl(@p)/Folders/add(@n)",
            &[("@p", literal(parent_url)), ("@n", literal(name))],
            None,
        )
        .await?;
        self.folder(web, &join_url(parent_url, name)).await
    }

    async fn delete_folder(&self, web: &WebInfo, url: &str) -> Result<(), CmsError> {
        self.delete(&web.url, "web/GetFolderByServerRelativeUrl(@u)", &[("@u", literal(url))])
            .await
    }

    async fn file_state(&self, web: &WebInfo, url: &str) -> Result<FileState, CmsError> {
        let file: Option<FilePayload> = optional(
            self.get_typed(
                &web.url,
                "web/GetFileByServerRelativeUrl(@u)",
                &[
                    ("@u", literal(url)),
                    ("$select", "Exists,CheckOutType,Level".to_string()),
                ],
            )
            .await,
        )?;

        Ok(match file {
            Some(file) if file.exists => FileState {
                exists: true,
                // CheckOutType 2 means not checked out
                checked_out: file.check_out_type != 2,
                level: FileLevel::from_code(file.level),
            },
            _ => FileState::missing(),
        })
    }

    async fn upload_file(
        &self,
        web: &WebInfo,
        url: &str,
        content: Vec<u8>,
    ) -> Result<FileState, CmsError> {
        self.upload_bytes(&web.url, url, content).await?;
        self.file_state(web, url).await
    }

    async fn check_out(&self, web: &WebInfo, url: &str) -> Result<(), CmsError> {
        self.file_action(web, url, "CheckOut()", None).await
    }

    async fn undo_check_out(&self, web: &WebInfo, url: &str) -> Result<(), CmsError> {
        self.file_action(web, url, "UndoCheckOut()", None).await
    }

    async fn check_in(&self, web: &WebInfo, url: &str, comment: &str) -> Result<(), CmsError> {
        self.file_action(web, url, "CheckIn(comment={comment},checkintype=1)", Some(comment))
            .await
    }

    async fn publish(&self, web: &WebInfo, url: &str, comment: &str) -> Result<(), CmsError> {
        self.file_action(web, url, "Publish({comment})", Some(comment)).await
    }

    async fn approve(&self, web: &WebInfo, url: &str, comment: &str) -> Result<(), CmsError> {
        self.file_action(web, url, "Approve({comment})", Some(comment)).await
    }

    async fn file_field(
        &self,
        web: &WebInfo,
        url: &str,
        field: &str,
    ) -> Result<Option<String>, CmsError> {
        let name = odata_field(field);
        let item = self
            .get(
                &web.url,
                "web/GetFileByServerRelativeUrl(@u)/ListItemAllFields",
                &[("@u", literal(url)), ("$select", name.clone())],
            )
            .await?;
        Ok(value_text(&item[name.as_str()]))
    }

    async fn set_file_fields(
        &self,
        web: &WebInfo,
        url: &str,
        values: &[(String, FieldValue)],
    ) -> Result<(), CmsError> {
        self.validate_update(
            &web.url,
            "web/GetFileByServerRelativeUrl(@u)/ListItemAllFields",
            &[("@u", literal(url))],
            values,
        )
        .await
    }

    async fn delete_file(&self, web: &WebInfo, url: &str) -> Result<(), CmsError> {
        self.delete(&web.url, "web/GetFileByServerRelativeUrl(@u)", &[("@u", literal(url))])
            .await
    }

    async fn item_file_url(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        item_id: i32,
    ) -> Result<Option<String>, CmsError> {
        let file = optional(
            self.get(
                &web.url,
                &format!("{}/items({})/File", Self::list_path(list), item_id),
                &[("$select", "ServerRelativeUrl".to_string())],
            )
            .await,
        )?;
        Ok(file.and_then(|f| f["ServerRelativeUrl"].as_str().map(str::to_string)))
    }

    async fn content_type(
        &self,
        web: &WebInfo,
        id: &str,
    ) -> Result<Option<ContentTypeInfo>, CmsError> {
        let content_type = optional(
            self.get(
                &web.url,
                "web/AvailableContentTypes(@i)",
                &[("@i", literal(id)), ("$select", "Id,Name".to_string())],
            )
            .await,
        )?;
        Ok(content_type.and_then(|ct| {
            Some(ContentTypeInfo {
                id: ct["Id"]["StringValue"].as_str()?.to_string(),
                name: ct["Name"].as_str()?.to_string(),
            })
        }))
    }

    async fn create_content_type(
        &self,
        web: &WebInfo,
        definition: &ContentTypeDefinition,
    ) -> Result<(), CmsError> {
        self.post(
            &web.url,
            "web/contenttypes",
            &[],
            Some(json!({
                "Id": { "StringValue": definition.id },
                "Name": definition.name,
                "Group": definition.group,
                "Description": definition.description,
            })),
        )
        .await?;

        for field in &definition.field_refs {
            self.post(
                &web.url,
                "web/contenttypes(@i)/FieldLinks",
                &[("@i", literal(&definition.id))],
                Some(json!({ "FieldInternalName": field })),
            )
            .await?;
        }
        Ok(())
    }

    async fn list_content_types(
        &self,
        web: &WebInfo,
        list: &ListInfo,
    ) -> Result<Vec<ContentTypeInfo>, CmsError> {
        let value = self
            .get(
                &web.url,
                &format!("{}/ContentTypes", Self::list_path(list)),
                &[("$select", "Id,Name".to_string())],
            )
            .await?;
        Ok(value["value"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|ct| {
                Some(ContentTypeInfo {
                    id: ct["Id"]["StringValue"].as_str()?.to_string(),
                    name: ct["Name"].as_str()?.to_string(),
                })
            })
            .collect())
    }

    async fn add_content_type_to_list(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        content_type: &ContentTypeInfo,
        make_default: bool,
    ) -> Result<(), CmsError> {
        let bound = self.list_content_types(web, list).await?;
        if !bound.iter().any(|ct| ct.name.eq_ignore_ascii_case(&content_type.name)) {
            self.post(
                &web.url,
                &format!("{}/ContentTypes/AddAvailableContentType(@i)", Self::list_path(list)),
                &[("@i", literal(&content_type.id))],
                None,
            )
            .await?;
        }
        if make_default {
            warn!(
                list = %list.title,
                content_type = %content_type.name,
                "Default content type order cannot be changed over REST, skipping"
            );
        }
        Ok(())
    }

    async fn remove_content_type_from_list(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        name: &str,
    ) -> Result<(), CmsError> {
        let bound = self.list_content_types(web, list).await?;
        let content_type = bound
            .iter()
            .find(|ct| ct.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| CmsError::NotFound(format!("content type {}", name)))?;
        self.delete(
            &web.url,
            &format!("{}/ContentTypes(@i)", Self::list_path(list)),
            &[("@i", literal(&content_type.id))],
        )
        .await
    }

    async fn list_fields(
        &self,
        web: &WebInfo,
        list: &ListInfo,
    ) -> Result<Vec<FieldInfo>, CmsError> {
        let value = self
            .get(
                &web.url,
                &format!("{}/fields", Self::list_path(list)),
                &[("$select", "InternalName,FieldTypeKind,TypeAsString".to_string())],
            )
            .await?;

        let mut fields = Vec::new();
        for field in value["value"].as_array().into_iter().flatten() {
            let internal_name = field["InternalName"].as_str().unwrap_or_default().to_string();
            let type_name = field["TypeAsString"].as_str().unwrap_or_default();

            let kind = if type_name.starts_with("TaxonomyFieldType") {
                let taxonomy = self
                    .get(
                        &web.url,
                        &format!("{}/fields/getbyinternalnameortitle(@n)", Self::list_path(list)),
                        &[("@n", literal(&internal_name)), ("$select", "TermSetId".to_string())],
                    )
                    .await?;
                match taxonomy["TermSetId"].as_str().and_then(|id| Uuid::parse_str(id).ok()) {
                    Some(term_set_id) => FieldKind::Taxonomy { term_set_id },
                    None => FieldKind::Other(type_name.to_string()),
                }
            } else {
                field_kind(field["FieldTypeKind"].as_i64().unwrap_or_default(), type_name)
            };

            fields.push(FieldInfo {
                internal_name,
                kind,
            });
        }
        Ok(fields)
    }

    async fn set_field_indexed(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        internal_name: &str,
    ) -> Result<(), CmsError> {
        self.merge(
            &web.url,
            &format!("{}/fields/getbyinternalnameortitle(@n)", Self::list_path(list)),
            &[("@n", literal(internal_name))],
            json!({ "Indexed": true }),
        )
        .await
    }

    async fn add_item(&self, web: &WebInfo, list: &ListInfo) -> Result<i32, CmsError> {
        let item = self
            .post(&web.url, &format!("{}/items", Self::list_path(list)), &[], Some(json!({})))
            .await?;
        item["Id"]
            .as_i64()
            .map(|id| id as i32)
            .ok_or_else(|| CmsError::InvalidResponse("new item has no Id".to_string()))
    }

    async fn set_item_field(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        item_id: i32,
        field: &str,
        value: &FieldValue,
    ) -> Result<(), CmsError> {
        self.validate_update(
            &web.url,
            &format!("{}/items({})", Self::list_path(list), item_id),
            &[],
            &[(field.to_string(), value.clone())],
        )
        .await
    }

    async fn query_items(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        field: &str,
        value: &str,
    ) -> Result<Vec<ListItem>, CmsError> {
        let name = odata_field(field);
        let response = self
            .get(
                &web.url,
                &format!("{}/items", Self::list_path(list)),
                &[
                    ("$select", format!("Id,{}", name)),
                    ("$filter", format!("{} eq {}", name, literal(value))),
                ],
            )
            .await?;

        Ok(response["value"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|item| {
                let id = item["Id"].as_i64()? as i32;
                let mut values = BTreeMap::new();
                if let Some(text) = value_text(&item[name.as_str()]) {
                    values.insert(field.to_string(), FieldValue::Text(text));
                }
                Some(ListItem { id, values })
            })
            .collect())
    }

    async fn delete_item(
        &self,
        web: &WebInfo,
        list: &ListInfo,
        item_id: i32,
    ) -> Result<(), CmsError> {
        self.delete(&web.url, &format!("{}/items({})", Self::list_path(list), item_id), &[])
            .await
    }

    async fn ensure_user(&self, web: &WebInfo, login: &str) -> Result<Option<i32>, CmsError> {
        match self
            .post(&web.url, "web/ensureuser", &[], Some(json!({ "logonName": login })))
            .await
        {
            Ok(user) => Ok(user["Id"].as_i64().map(|id| id as i32)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!(login = %login, error = %e, "User could not be resolved");
                Ok(None)
            }
        }
    }

    async fn term_store_available(&self) -> Result<bool, CmsError> {
        match self.term_store_get("").await {
            Ok(_) => Ok(true),
            Err(e) if e.is_fatal() => Err(e),
            Err(_) => Ok(false),
        }
    }

    async fn term_id_by_path(
        &self,
        group: &str,
        term_set: &str,
        term: &str,
    ) -> Result<Uuid, CmsError> {
        let groups = self.term_store_get("/groups").await?;
        let group_id = groups["value"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|g| {
                g["displayName"]
                    .as_str()
                    .map(|name| name.eq_ignore_ascii_case(group))
                    .unwrap_or(false)
            })
            .and_then(|g| g["id"].as_str().map(str::to_string))
            .ok_or_else(|| CmsError::NotFound(format!("term group {}", group)))?;

        let sets = self.term_store_get(&format!("/groups/{}/sets", group_id)).await?;
        let set_id = sets["value"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|s| {
                s["localizedNames"]
                    .as_array()
                    .map(|names| {
                        names.iter().any(|n| {
                            n["name"]
                                .as_str()
                                .map(|name| name.eq_ignore_ascii_case(term_set))
                                .unwrap_or(false)
                        })
                    })
                    .unwrap_or(false)
            })
            .and_then(|s| s["id"].as_str().and_then(|id| Uuid::parse_str(id).ok()))
            .ok_or_else(|| CmsError::NotFound(format!("term set {}", term_set)))?;

        self.term_id_in_set(set_id, term).await
    }

    async fn term_id_in_set(&self, term_set_id: Uuid, name: &str) -> Result<Uuid, CmsError> {
        let terms = self.term_store_get(&format!("/sets/{}/terms", term_set_id)).await?;
        find_by_label(&terms, name)
            .ok_or_else(|| CmsError::NotFound(format!("term {} in set {}", name, term_set_id)))
    }

    async fn import_term_set(&self, _group: &str, _file_path: &str) -> Result<(), CmsError> {
        Err(CmsError::Unsupported("term set import"))
    }

    async fn delete_navigation_nodes(
        &self,
        web: &WebInfo,
        navigation_type: NavigationType,
    ) -> Result<(), CmsError> {
        let nodes = self
            .get(
                &web.url,
                &Self::navigation_path(navigation_type),
                &[("$select", "Id".to_string())],
            )
            .await?;
        let ids: Vec<i64> = nodes["value"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|n| n["Id"].as_i64())
            .collect();

        for id in ids {
            self.delete(&web.url, &format!("web/Navigation/GetNodeById({})", id), &[])
                .await?;
        }
        Ok(())
    }

    async fn add_navigation_node(
        &self,
        web: &WebInfo,
        node: &NavigationNodeEntity,
    ) -> Result<(), CmsError> {
        let collection = Self::navigation_path(node.navigation_type);
        let target = if node.parent_title.is_empty() {
            collection
        } else {
            let nodes = self
                .get(&web.url, &collection, &[("$select", "Id,Title".to_string())])
                .await?;
            let parent_id = nodes["value"]
                .as_array()
                .into_iter()
                .flatten()
                .find(|n| n["Title"].as_str() == Some(node.parent_title.as_str()))
                .and_then(|n| n["Id"].as_i64())
                .ok_or_else(|| {
                    CmsError::NotFound(format!("navigation node {}", node.parent_title))
                })?;
            format!("web/Navigation/GetNodeById({})/Children", parent_id)
        };

        self.post(
            &web.url,
            &target,
            &[],
            Some(json!({
                "Title": node.title,
                "Url": node.url.as_ref().map(|u| u.to_string()).unwrap_or_default(),
                "IsExternal": node.is_external,
            })),
        )
        .await?;
        Ok(())
    }

    async fn web_property(&self, web: &WebInfo, key: &str) -> Result<Option<String>, CmsError> {
        let properties = self
            .get(&web.url, "web/AllProperties", &[("$select", key.to_string())])
            .await?;
        Ok(value_text(&properties[key]))
    }

    async fn set_master_page(
        &self,
        web: &WebInfo,
        slot: MasterPageSlot,
        url: &str,
    ) -> Result<(), CmsError> {
        let body = match slot {
            MasterPageSlot::System => json!({ "MasterUrl": url }),
            MasterPageSlot::Custom => json!({ "CustomMasterUrl": url }),
        };
        self.merge(&web.url, "web", &[], body).await
    }

    async fn set_welcome_page(&self, web: &WebInfo, url: &str) -> Result<(), CmsError> {
        self.merge(&web.url, "web/RootFolder", &[], json!({ "WelcomePage": url }))
            .await
    }

    async fn add_publishing_page(
        &self,
        web: &WebInfo,
        name: &str,
        title: &str,
        layout_url: &str,
    ) -> Result<String, CmsError> {
        let pages = self
            .list_by_title(web, "Pages")
            .await?
            .ok_or_else(|| CmsError::NotFound("pages library".to_string()))?;
        let url = join_url(&pages.root_folder_url, name);

        self.post(
            &web.url,
            "web/GetFolderByServerRelativeUrl(@f)/Files/AddTemplateFile(urlOfFile=@u,templateFileType=0)",
            &[("@f", literal(&pages.root_folder_url)), ("@u", literal(&url))],
            None,
        )
        .await?;

        let layout_name = split_file_url(layout_url).1;
        self.set_file_fields(
            web,
            &url,
            &[
                ("Title".to_string(), FieldValue::Text(title.to_string())),
                (
                    "PublishingPageLayout".to_string(),
                    FieldValue::Text(format!("{}, {}", layout_url, layout_name)),
                ),
            ],
        )
        .await?;
        Ok(url)
    }

    async fn image_renditions(&self, web: &WebInfo) -> Result<Vec<ImageRendition>, CmsError> {
        let url = join_url(&web.server_relative_url, RENDITIONS_FILE);
        let content = optional(
            self.get_bytes(
                &web.url,
                "web/GetFileByServerRelativeUrl(@u)/$value",
                &[("@u", literal(&url))],
            )
            .await,
        )?;
        match content {
            Some(bytes) => parse_renditions(&String::from_utf8_lossy(&bytes)),
            None => Ok(Vec::new()),
        }
    }

    async fn set_image_renditions(
        &self,
        web: &WebInfo,
        renditions: &[ImageRendition],
    ) -> Result<(), CmsError> {
        let url = join_url(&web.server_relative_url, RENDITIONS_FILE);
        self.upload_bytes(&web.url, &url, render_renditions(renditions).into_bytes())
            .await
    }

    async fn import_search_configuration(
        &self,
        _web: &WebInfo,
        _xml: &str,
    ) -> Result<(), CmsError> {
        Err(CmsError::Unsupported("search configuration import"))
    }

    async fn export_search_configuration(&self, _web: &WebInfo) -> Result<String, CmsError> {
        Err(CmsError::Unsupported("search configuration export"))
    }

    async fn ensure_role_definition(
        &self,
        web: &WebInfo,
        name: &str,
        description: &str,
    ) -> Result<(), CmsError> {
        let existing = optional(
            self.get(
                &web.url,
                "web/roledefinitions/getbyname(@n)",
                &[("@n", literal(name)), ("$select", "Id".to_string())],
            )
            .await,
        )?;
        if existing.is_some() {
            return Ok(());
        }

        self.post(
            &web.url,
            "web/roledefinitions",
            &[],
            Some(json!({
                "BasePermissions": { "Low": READ_PERMISSION_MASK, "High": "0" },
                "Name": name,
                "Description": description,
                "Order": 0,
            })),
        )
        .await?;
        Ok(())
    }

    async fn group_exists(&self, web: &WebInfo, name: &str) -> Result<bool, CmsError> {
        let group = optional(
            self.get(
                &web.url,
                "web/sitegroups/getbyname(@n)",
                &[("@n", literal(name)), ("$select", "Id".to_string())],
            )
            .await,
        )?;
        Ok(group.is_some())
    }

    async fn create_group(
        &self,
        web: &WebInfo,
        name: &str,
        description: &str,
        role: &str,
    ) -> Result<(), CmsError> {
        let group = self
            .post(
                &web.url,
                "web/sitegroups",
                &[],
                Some(json!({ "Title": name, "Description": description })),
            )
            .await?;
        let group_id = group["Id"]
            .as_i64()
            .ok_or_else(|| CmsError::InvalidResponse("new group has no Id".to_string()))?;

        let role_definition = self
            .get(
                &web.url,
                "web/roledefinitions/getbyname(@n)",
                &[("@n", literal(role)), ("$select", "Id".to_string())],
            )
            .await?;
        let role_id = role_definition["Id"]
            .as_i64()
            .ok_or_else(|| CmsError::InvalidResponse("role definition has no Id".to_string()))?;

        self.post(
            &web.url,
            &format!(
                "web/roleassignments/addroleassignment(principalid={},roledefid={})",
                group_id, role_id
            ),
            &[],
            None,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_escapes_quotes() {
        assert_eq!(literal("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn test_odata_field() {
        assert_eq!(odata_field("_ModerationStatus"), "OData__ModerationStatus");
        assert_eq!(odata_field("Title"), "Title");
    }

    #[test]
    fn test_form_values() {
        let geo = FieldValue::Geolocation(Geolocation {
            altitude: 10.0,
            latitude: 20.0,
            longitude: 30.0,
            measure: 40.0,
        });
        assert_eq!(form_value(&geo), "POINT(30 20)");
        assert_eq!(
            form_value(&FieldValue::User {
                id: 3,
                login: "CORP\\ann".to_string()
            }),
            r#"[{"Key":"CORP\\ann"}]"#
        );
    }

    #[test]
    fn test_renditions_round_trip_through_xml() {
        let renditions = vec![ImageRendition {
            name: "Hero & Banner".to_string(),
            width: 1200,
            height: 400,
        }];
        let parsed = parse_renditions(&render_renditions(&renditions)).unwrap();
        assert_eq!(parsed, renditions);
    }

    #[test]
    fn test_field_kind_mapping() {
        assert_eq!(field_kind(31, "Geolocation"), FieldKind::Geolocation);
        assert_eq!(field_kind(20, "User"), FieldKind::User);
        assert_eq!(field_kind(9, "Number"), FieldKind::Other("Number".to_string()));
    }
}
