//! Token substitution over manifest text.
//!
//! A [`TokenContext`] holds an ordered set of resolvers. Each resolver owns a
//! case-insensitive pattern; substitution repeatedly finds the first match,
//! resolves that single occurrence and splices the result in place, then
//! matches again from the start. Every occurrence is therefore resolved on
//! its own, so three `{guid}` tokens become three different values.

mod builtin;
mod structural;

pub use builtin::{AnchorTermToken, DateToken, GuidToken, IdToken};
pub use structural::{ListTemplateToken, LiteralToken, NamedGuidToken, WELL_KNOWN_GUIDS};

use crate::cms::{Cms, CmsError};
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Replacements allowed per resolver per string before giving up
pub const MAX_REPLACEMENTS: usize = 10_000;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Token {token} still matched after {limit} replacements")]
    Runaway { token: String, limit: usize },

    #[error("Malformed token '{0}'")]
    Malformed(String),

    #[error("Unable to resolve token '{0}'")]
    Unresolved(String),

    #[error("CMS error: {0}")]
    Cms(#[from] CmsError),
}

impl TokenError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TokenError::Cms(e) if e.is_fatal())
    }
}

/// Resolves one family of tokens
#[async_trait]
pub trait TokenResolver: Send + Sync {
    /// Name used to skip this resolver, e.g. `~site`
    fn name(&self) -> &str;

    fn pattern(&self) -> &Regex;

    /// Checked once per string, and only when the pattern matches
    async fn is_available(&self) -> Result<bool, TokenError> {
        Ok(true)
    }

    /// Replacement for one matched occurrence
    async fn resolve(&self, matched: &str) -> Result<String, TokenError>;
}

/// Resolvers for one run, applied in registration order
#[derive(Clone, Default)]
pub struct TokenContext {
    resolvers: Vec<Arc<dyn TokenResolver>>,
}

impl TokenContext {
    /// A context with no resolvers; substitution is the identity
    pub fn new() -> Self {
        Self::default()
    }

    /// A context with `{guid}`, `{date}`, `{id}` and `{anchorid:...}`
    pub fn with_builtins(cms: Arc<dyn Cms>) -> Self {
        let mut context = Self::new();
        context.register(Arc::new(GuidToken::new()));
        context.register(Arc::new(DateToken::new()));
        context.register(Arc::new(IdToken::new()));
        context.register(Arc::new(AnchorTermToken::new(cms)));
        context
    }

    pub fn register(&mut self, resolver: Arc<dyn TokenResolver>) {
        self.resolvers.push(resolver);
    }

    pub fn resolver_names(&self) -> Vec<&str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    /// Substitute every registered token family
    pub async fn substitute(&self, text: &str) -> Result<String, TokenError> {
        self.substitute_skipping(text, &[]).await
    }

    /// Substitute all token families except the named ones
    pub async fn substitute_skipping(
        &self,
        text: &str,
        skip: &[&str],
    ) -> Result<String, TokenError> {
        let mut text = text.to_string();
        for resolver in &self.resolvers {
            if skip.iter().any(|name| name.eq_ignore_ascii_case(resolver.name())) {
                continue;
            }
            text = apply(resolver.as_ref(), text).await?;
        }
        Ok(text)
    }
}

async fn apply(resolver: &dyn TokenResolver, mut text: String) -> Result<String, TokenError> {
    let mut replacements = 0;
    let mut availability_checked = false;

    while let Some(found) = resolver.pattern().find(&text) {
        if !availability_checked {
            if !resolver.is_available().await? {
                return Ok(text);
            }
            availability_checked = true;
        }

        replacements += 1;
        if replacements > MAX_REPLACEMENTS {
            return Err(TokenError::Runaway {
                token: resolver.name().to_string(),
                limit: MAX_REPLACEMENTS,
            });
        }

        let range = found.range();
        let matched = found.as_str().to_string();
        let replacement = resolver.resolve(&matched).await.map_err(|e| {
            warn!(token = %matched, error = %e, "Unable to parse token");
            e
        })?;
        text.replace_range(range, &replacement);
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;

    static LOOP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\{loop\}").unwrap());

    /// Resolves to itself, so substitution can never finish
    struct LoopToken;

    #[async_trait]
    impl TokenResolver for LoopToken {
        fn name(&self) -> &str {
            "{loop}"
        }

        fn pattern(&self) -> &Regex {
            &LOOP
        }

        async fn resolve(&self, _matched: &str) -> Result<String, TokenError> {
            Ok("{LOOP}".to_string())
        }
    }

    #[tokio::test]
    async fn test_no_tokens_is_identity() {
        let mut context = TokenContext::new();
        context.register(Arc::new(GuidToken::new()));
        context.register(Arc::new(IdToken::new()));

        let text = "plain text with {braces} and ~tilde";
        assert_eq!(context.substitute(text).await.unwrap(), text);
    }

    #[tokio::test]
    async fn test_self_matching_resolver_is_bounded() {
        let mut context = TokenContext::new();
        context.register(Arc::new(LoopToken));

        let result = context.substitute("a {loop} b").await;
        assert!(matches!(
            result,
            Err(TokenError::Runaway { limit: MAX_REPLACEMENTS, .. })
        ));
    }

    #[tokio::test]
    async fn test_skipping_by_name() {
        let mut context = TokenContext::new();
        context.register(Arc::new(LiteralToken::site_tilde("/sites/a")));

        assert_eq!(context.substitute("~site/x").await.unwrap(), "/sites/a/x");
        assert_eq!(
            context.substitute_skipping("~site/x", &["~site"]).await.unwrap(),
            "~site/x"
        );
    }
}
