use super::ReconcileError;
use crate::cms::{Cms, WebInfo};
use crate::manifest::{Manifest, Name};
use crate::tokens::{ListTemplateToken, LiteralToken, NamedGuidToken, TokenContext};
use crate::utils::modified_since;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Settings a session is opened with
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Absolute URL of the site collection
    pub site_url: String,
    /// Folder holding the local files referenced by the manifest
    pub assets_dir: PathBuf,
    /// Previous run, when only modified files should be uploaded
    pub last_run: Option<DateTime<Utc>>,
    /// Term group receiving imported term sets
    pub term_group: Option<String>,
}

/// Everything a reconciler needs for one run
pub struct ReconciliationSession {
    pub cms: Arc<dyn Cms>,
    pub manifest: Manifest,
    pub tokens: TokenContext,
    /// Root web of the site collection
    pub web: WebInfo,
    pub options: SessionOptions,
}

impl ReconciliationSession {
    /// Load the root web and register the token resolvers
    pub async fn open(
        cms: Arc<dyn Cms>,
        manifest: Manifest,
        options: SessionOptions,
    ) -> Result<Self, ReconcileError> {
        let web = cms.root_web().await?;

        let mut tokens = TokenContext::with_builtins(cms.clone());
        tokens.register(Arc::new(LiteralToken::site_collection_url(&options.site_url)));
        tokens.register(Arc::new(LiteralToken::site_collection(&web.server_relative_url)));
        tokens.register(Arc::new(LiteralToken::site_collection_tilde(&web.server_relative_url)));
        tokens.register(Arc::new(LiteralToken::site(&web.server_relative_url)));
        tokens.register(Arc::new(LiteralToken::site_tilde(&web.server_relative_url)));
        tokens.register(Arc::new(NamedGuidToken::new(cms.clone())));
        tokens.register(Arc::new(ListTemplateToken::new()));

        debug!(
            web = %web.server_relative_url,
            resolvers = ?tokens.resolver_names(),
            "Opened reconciliation session"
        );

        Ok(Self {
            cms,
            manifest,
            tokens,
            web,
            options,
        })
    }

    pub fn ns(&self, local: &str) -> Name {
        self.manifest.ns(local)
    }

    /// Local file under the assets folder
    pub fn asset(&self, kind: &str, name: &str) -> PathBuf {
        self.options.assets_dir.join(kind).join(name)
    }

    /// Whether a local file changed since the previous run
    pub async fn is_modified(&self, path: &Path) -> bool {
        modified_since(path, self.options.last_run).await
    }

    /// Open a web by absolute URL, or by a path relative to the site
    /// collection. An empty value is the root web.
    pub async fn resolve_web(&self, web_url: &str) -> Result<WebInfo, ReconcileError> {
        if web_url.trim().is_empty() {
            return Ok(self.web.clone());
        }

        let url = if web_url.starts_with("http://") || web_url.starts_with("https://") {
            web_url.to_string()
        } else {
            crate::utils::join_url(&self.options.site_url, web_url)
        };

        self.cms
            .web_by_url(&url)
            .await?
            .ok_or(ReconcileError::WebNotFound(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms::MemoryCms;
    use crate::manifest::parse_manifest;

    #[tokio::test]
    async fn test_session_tokens_cover_site_urls() {
        let cms = Arc::new(MemoryCms::new("https://cms.test/sites/portal"));
        let manifest = parse_manifest(r#"<branding xmlns:pnp="urn:test"/>"#).unwrap();
        let session = ReconciliationSession::open(
            cms,
            manifest,
            SessionOptions {
                site_url: "https://cms.test/sites/portal".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let text = session
            .tokens
            .substitute("{sitecollectionurl}|{sitecollection}|~site/Pages|{listtemplate:Links}")
            .await
            .unwrap();
        assert_eq!(text, "https://cms.test/sites/portal|/sites/portal|/sites/portal/Pages|103");
    }

    #[tokio::test]
    async fn test_resolve_web() {
        let cms = Arc::new(MemoryCms::new("https://cms.test/sites/portal"));
        let root = cms.root_web().await.unwrap();
        let news = cms.add_web(&root, "news", "News").await;
        let manifest = parse_manifest(r#"<branding xmlns:pnp="urn:test"/>"#).unwrap();
        let session = ReconciliationSession::open(
            cms,
            manifest,
            SessionOptions {
                site_url: "https://cms.test/sites/portal".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(session.resolve_web("").await.unwrap(), root);
        assert_eq!(session.resolve_web("news").await.unwrap(), news);
        assert_eq!(
            session.resolve_web("https://cms.test/sites/portal/news").await.unwrap(),
            news
        );
        assert!(matches!(
            session.resolve_web("missing").await,
            Err(ReconcileError::WebNotFound(_))
        ));
    }
}
