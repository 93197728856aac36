use super::{TokenError, TokenResolver};
use crate::cms::{Cms, ListTemplate};
use crate::manifest::parse_named;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use uuid::Uuid;

static SITE_COLLECTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\{sitecollection\}").unwrap());
static SITE_COLLECTION_TILDE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)~sitecollection\b").unwrap());
static SITE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\{site\}").unwrap());
static SITE_TILDE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)~site\b").unwrap());
static SITE_COLLECTION_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\{sitecollectionurl\}").unwrap());
static NAMED_GUID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\{guid:([^}]+)\}").unwrap());
static LIST_TEMPLATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\{listtemplate:([^}]+)\}").unwrap());

/// Result sources and other identifiers with fixed values
pub const WELL_KNOWN_GUIDS: &[(&str, Uuid)] = &[
    ("Local People Results", Uuid::from_u128(0xb09a7990_05ea_4af9_81ef_edfab16c4e31)),
    ("Local SharePoint", Uuid::from_u128(0xfa947043_6046_4f97_9714_40d4c113963d)),
    ("OpenSearch", Uuid::from_u128(0x3a17e140_1574_4093_bad6_e19cdf1c0121)),
    ("People Search Results", Uuid::from_u128(0xe4bcc058_f133_4425_8ffc_1d70596ffd33)),
    ("Blank", Uuid::nil()),
];

/// Identifiers looked up on the remote system
const REMOTE_GUIDS: &[&str] = &[
    "SPSiteId",
    "SPWebId",
    "SPFarmId",
    "SPSiteSubscriptionId",
    "DatabaseId",
    "Main Search",
];

/// A token replaced by a value fixed when the session is built
pub struct LiteralToken {
    name: &'static str,
    pattern: &'static Lazy<Regex>,
    value: String,
}

impl LiteralToken {
    /// `{sitecollection}`: server-relative URL of the root web
    pub fn site_collection(value: &str) -> Self {
        Self::with("{sitecollection}", &SITE_COLLECTION, value)
    }

    /// `~sitecollection`
    pub fn site_collection_tilde(value: &str) -> Self {
        Self::with("~sitecollection", &SITE_COLLECTION_TILDE, value)
    }

    /// `{site}`: server-relative URL of the current web
    pub fn site(value: &str) -> Self {
        Self::with("{site}", &SITE, value)
    }

    /// `~site`
    pub fn site_tilde(value: &str) -> Self {
        Self::with("~site", &SITE_TILDE, value)
    }

    /// `{sitecollectionurl}`: absolute URL of the site collection
    pub fn site_collection_url(value: &str) -> Self {
        Self::with("{sitecollectionurl}", &SITE_COLLECTION_URL, value)
    }

    fn with(name: &'static str, pattern: &'static Lazy<Regex>, value: &str) -> Self {
        Self {
            name,
            pattern,
            value: value.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TokenResolver for LiteralToken {
    fn name(&self) -> &str {
        self.name
    }

    fn pattern(&self) -> &Regex {
        self.pattern
    }

    async fn resolve(&self, _matched: &str) -> Result<String, TokenError> {
        Ok(self.value.clone())
    }
}

/// `{guid:<name>}`: a named identifier, fixed or looked up remotely
pub struct NamedGuidToken {
    cms: Arc<dyn Cms>,
}

impl NamedGuidToken {
    pub fn new(cms: Arc<dyn Cms>) -> Self {
        Self { cms }
    }
}

#[async_trait]
impl TokenResolver for NamedGuidToken {
    fn name(&self) -> &str {
        "{guid:name}"
    }

    fn pattern(&self) -> &Regex {
        &NAMED_GUID
    }

    async fn resolve(&self, matched: &str) -> Result<String, TokenError> {
        let name = NAMED_GUID
            .captures(matched)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .ok_or_else(|| TokenError::Malformed(matched.to_string()))?;

        if let Some((_, id)) = WELL_KNOWN_GUIDS
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(name))
        {
            return Ok(id.to_string());
        }

        if !REMOTE_GUIDS.iter().any(|remote| remote.eq_ignore_ascii_case(name)) {
            return Err(TokenError::Unresolved(matched.to_string()));
        }

        self.cms
            .lookup_guid(name)
            .await?
            .map(|id| id.to_string())
            .ok_or_else(|| TokenError::Unresolved(matched.to_string()))
    }
}

/// `{listtemplate:<name>}`: numeric id of a list template
#[derive(Debug, Default)]
pub struct ListTemplateToken;

impl ListTemplateToken {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TokenResolver for ListTemplateToken {
    fn name(&self) -> &str {
        "{listtemplate}"
    }

    fn pattern(&self) -> &Regex {
        &LIST_TEMPLATE
    }

    async fn resolve(&self, matched: &str) -> Result<String, TokenError> {
        LIST_TEMPLATE
            .captures(matched)
            .and_then(|c| c.get(1))
            .and_then(|m| parse_named::<ListTemplate>(m.as_str()))
            .map(|template| template.id().to_string())
            .ok_or_else(|| TokenError::Unresolved(matched.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms::MemoryCms;
    use crate::tokens::TokenContext;

    #[tokio::test]
    async fn test_site_tokens_do_not_overlap() {
        let mut context = TokenContext::new();
        context.register(Arc::new(LiteralToken::site_collection_tilde("/sites/portal/")));
        context.register(Arc::new(LiteralToken::site_tilde("/sites/portal/news")));

        let result = context
            .substitute("~sitecollection/Style Library;~site/Pages")
            .await
            .unwrap();
        assert_eq!(result, "/sites/portal/Style Library;/sites/portal/news/Pages");
    }

    #[tokio::test]
    async fn test_named_guids() {
        let cms = Arc::new(MemoryCms::new("https://cms.test/sites/portal"));
        let farm = Uuid::new_v4();
        cms.set_guid("SPFarmId", farm).await;

        let mut context = TokenContext::new();
        context.register(Arc::new(NamedGuidToken::new(cms)));

        assert_eq!(
            context.substitute("{guid:Local SharePoint}").await.unwrap(),
            "fa947043-6046-4f97-9714-40d4c113963d"
        );
        assert_eq!(
            context.substitute("{guid:Blank}").await.unwrap(),
            "00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(context.substitute("{guid:SPFarmId}").await.unwrap(), farm.to_string());
        assert!(matches!(
            context.substitute("{guid:Nope}").await,
            Err(TokenError::Unresolved(_))
        ));
    }

    #[tokio::test]
    async fn test_list_template_ids() {
        let mut context = TokenContext::new();
        context.register(Arc::new(ListTemplateToken::new()));

        assert_eq!(
            context.substitute("{listtemplate:DocumentLibrary}").await.unwrap(),
            "101"
        );
        assert!(context.substitute("{listtemplate:Nope}").await.is_err());
    }
}
