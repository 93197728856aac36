use super::{TokenError, TokenResolver};
use crate::cms::Cms;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use uuid::Uuid;

static GUID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\{guid\}").unwrap());
static DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\{date\}").unwrap());
static ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\{id\}").unwrap());
static ANCHOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\{anchorid:[^}]*\}").unwrap());

/// `{guid}`: a fresh random UUID per occurrence
#[derive(Debug, Default)]
pub struct GuidToken;

impl GuidToken {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TokenResolver for GuidToken {
    fn name(&self) -> &str {
        "{guid}"
    }

    fn pattern(&self) -> &Regex {
        &GUID
    }

    async fn resolve(&self, _matched: &str) -> Result<String, TokenError> {
        Ok(Uuid::new_v4().to_string())
    }
}

/// `{date}`: the current UTC time as `yyyy-MM-ddTHH:mm:ss`
#[derive(Debug, Default)]
pub struct DateToken;

impl DateToken {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TokenResolver for DateToken {
    fn name(&self) -> &str {
        "{date}"
    }

    fn pattern(&self) -> &Regex {
        &DATE
    }

    async fn resolve(&self, _matched: &str) -> Result<String, TokenError> {
        Ok(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string())
    }
}

/// `{id}`: a random integer in `[0, i32::MAX)`
#[derive(Debug, Default)]
pub struct IdToken;

impl IdToken {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TokenResolver for IdToken {
    fn name(&self) -> &str {
        "{id}"
    }

    fn pattern(&self) -> &Regex {
        &ID
    }

    async fn resolve(&self, _matched: &str) -> Result<String, TokenError> {
        Ok(fastrand::i32(0..i32::MAX).to_string())
    }
}

/// `{anchorid:<group>:<termset>:...:<term>}`: id of a term.
///
/// The second and third segments select the group and term set; the last
/// segment is the term name. Nothing is substituted when the term store is
/// unavailable.
pub struct AnchorTermToken {
    cms: Arc<dyn Cms>,
}

impl AnchorTermToken {
    pub fn new(cms: Arc<dyn Cms>) -> Self {
        Self { cms }
    }
}

#[async_trait]
impl TokenResolver for AnchorTermToken {
    fn name(&self) -> &str {
        "{anchorid}"
    }

    fn pattern(&self) -> &Regex {
        &ANCHOR
    }

    async fn is_available(&self) -> Result<bool, TokenError> {
        Ok(self.cms.term_store_available().await?)
    }

    async fn resolve(&self, matched: &str) -> Result<String, TokenError> {
        let inner = matched.trim_start_matches('{').trim_end_matches('}');
        let segments: Vec<&str> = inner.split(':').collect();
        if segments.len() < 3 {
            return Err(TokenError::Malformed(matched.to_string()));
        }

        let group = segments[1];
        let term_set = segments[2];
        let term = segments[segments.len() - 1];

        let id = self.cms.term_id_by_path(group, term_set, term).await?;
        Ok(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms::MemoryCms;
    use crate::tokens::TokenContext;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_each_guid_occurrence_is_distinct() {
        let mut context = TokenContext::new();
        context.register(Arc::new(GuidToken::new()));

        let result = context.substitute("{guid}|{GUID}|{guid}").await.unwrap();
        let values: Vec<&str> = result.split('|').collect();
        assert_eq!(values.len(), 3);
        for value in &values {
            assert!(Uuid::parse_str(value).is_ok());
        }
        let unique: HashSet<_> = values.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[tokio::test]
    async fn test_id_is_non_negative_i32() {
        let mut context = TokenContext::new();
        context.register(Arc::new(IdToken::new()));

        for _ in 0..200 {
            let value: i64 = context.substitute("{id}").await.unwrap().parse().unwrap();
            assert!((0..(1i64 << 31)).contains(&value));
        }
    }

    #[tokio::test]
    async fn test_date_format() {
        let mut context = TokenContext::new();
        context.register(Arc::new(DateToken::new()));

        let value = context.substitute("{date}").await.unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(&value, "%Y-%m-%dT%H:%M:%S").is_ok());
    }

    #[tokio::test]
    async fn test_anchor_uses_last_segment_as_term() {
        let cms = Arc::new(MemoryCms::new("https://cms.test/sites/portal"));
        let (_, term_id) = cms.add_term("Corporate", "Departments", "Finance").await;

        let mut context = TokenContext::new();
        context.register(Arc::new(AnchorTermToken::new(cms.clone())));

        let value = context
            .substitute("{anchorid:Corporate:Departments:Ignored:Finance}")
            .await
            .unwrap();
        assert_eq!(value, term_id.to_string());
    }

    #[tokio::test]
    async fn test_anchor_without_term_store_is_untouched() {
        let cms = Arc::new(MemoryCms::new("https://cms.test/sites/portal"));
        let mut context = TokenContext::new();
        context.register(Arc::new(AnchorTermToken::new(cms)));

        let text = "{anchorid:a:b:c}";
        assert_eq!(context.substitute(text).await.unwrap(), text);
    }

    #[tokio::test]
    async fn test_anchor_with_too_few_segments_is_malformed() {
        let cms = Arc::new(MemoryCms::new("https://cms.test/sites/portal"));
        cms.add_term("g", "s", "t").await;
        let mut context = TokenContext::new();
        context.register(Arc::new(AnchorTermToken::new(cms)));

        let result = context.substitute("{anchorid:g}").await;
        assert!(matches!(result, Err(TokenError::Malformed(_))));
    }
}
