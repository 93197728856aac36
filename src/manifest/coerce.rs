//! Typed reads of manifest attributes.
//!
//! Every read substitutes tokens first, then converts. Integers and booleans
//! are lenient: anything unparsable becomes zero or `false`. URIs are strict.
//! Named enums fall back to their first declared member.

use super::types::ResourceSpec;
use crate::tokens::{TokenContext, TokenError};
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum CoercionError {
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Invalid URI '{value}': {source}")]
    InvalidUri {
        value: String,
        #[source]
        source: url::ParseError,
    },
}

impl CoercionError {
    pub fn is_fatal(&self) -> bool {
        match self {
            CoercionError::Token(e) => e.is_fatal(),
            CoercionError::InvalidUri { .. } => false,
        }
    }
}

/// A type an attribute value can be coerced into
pub trait FromAttribute: Sized {
    fn from_attribute(value: &str) -> Result<Self, CoercionError>;

    /// Value used when the attribute is absent
    fn absent() -> Self;
}

impl FromAttribute for String {
    fn from_attribute(value: &str) -> Result<Self, CoercionError> {
        Ok(value.to_string())
    }

    fn absent() -> Self {
        String::new()
    }
}

impl FromAttribute for i32 {
    fn from_attribute(value: &str) -> Result<Self, CoercionError> {
        Ok(value.trim().parse().unwrap_or_default())
    }

    fn absent() -> Self {
        0
    }
}

impl FromAttribute for bool {
    fn from_attribute(value: &str) -> Result<Self, CoercionError> {
        Ok(value.trim().eq_ignore_ascii_case("true"))
    }

    fn absent() -> Self {
        false
    }
}

impl FromAttribute for Option<Url> {
    fn from_attribute(value: &str) -> Result<Self, CoercionError> {
        Url::parse(value)
            .map(Some)
            .map_err(|source| CoercionError::InvalidUri {
                value: value.to_string(),
                source,
            })
    }

    fn absent() -> Self {
        None
    }
}

/// An enum addressable by member name. The first member is the fallback.
pub trait NamedEnum: Sized + Copy + 'static {
    const MEMBERS: &'static [(&'static str, Self)];

    fn first() -> Self {
        Self::MEMBERS[0].1
    }
}

/// Case-insensitive lookup of a member by name
pub fn parse_named<T: NamedEnum>(value: &str) -> Option<T> {
    let value = value.trim();
    T::MEMBERS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(value))
        .map(|(_, member)| *member)
}

impl ResourceSpec {
    /// Read an attribute, substituting tokens and coercing to `T`
    pub async fn attr<T: FromAttribute>(
        &self,
        name: &str,
        tokens: &TokenContext,
    ) -> Result<T, CoercionError> {
        match self.raw(name) {
            Some(raw) => {
                let value = tokens.substitute(raw).await?;
                T::from_attribute(&value)
            }
            None => Ok(T::absent()),
        }
    }

    /// Read a string attribute; absent attributes are empty
    pub async fn text(&self, name: &str, tokens: &TokenContext) -> Result<String, CoercionError> {
        self.attr::<String>(name, tokens).await
    }

    /// Read a named-enum attribute; unknown or absent names give the first member
    pub async fn enum_attr<T: NamedEnum>(
        &self,
        name: &str,
        tokens: &TokenContext,
    ) -> Result<T, CoercionError> {
        let value = self.text(name, tokens).await?;
        Ok(parse_named(&value).unwrap_or_else(T::first))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms::{ListTemplate, NavigationType};
    use crate::manifest::Name;

    fn spec(attributes: &[(&str, &str)]) -> ResourceSpec {
        ResourceSpec {
            name: Name::plain("node"),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            children: Vec::new(),
            first_child_xml: None,
        }
    }

    #[tokio::test]
    async fn test_lenient_int_and_bool() {
        let tokens = TokenContext::new();
        let node = spec(&[("Width", "abc"), ("Flag", "abc"), ("Height", " 42 "), ("On", "True")]);

        assert_eq!(node.attr::<i32>("Width", &tokens).await.unwrap(), 0);
        assert!(!node.attr::<bool>("Flag", &tokens).await.unwrap());
        assert_eq!(node.attr::<i32>("Height", &tokens).await.unwrap(), 42);
        assert!(node.attr::<bool>("On", &tokens).await.unwrap());
    }

    #[tokio::test]
    async fn test_absent_attributes_are_zero_values() {
        let tokens = TokenContext::new();
        let node = spec(&[]);

        assert_eq!(node.text("Title", &tokens).await.unwrap(), "");
        assert_eq!(node.attr::<i32>("Width", &tokens).await.unwrap(), 0);
        assert!(!node.attr::<bool>("External", &tokens).await.unwrap());
        assert!(node.attr::<Option<Url>>("Url", &tokens).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_uri_is_an_error() {
        let tokens = TokenContext::new();
        let node = spec(&[("Url", "not a uri")]);

        let result = node.attr::<Option<Url>>("Url", &tokens).await;
        assert!(matches!(result, Err(CoercionError::InvalidUri { .. })));
    }

    #[tokio::test]
    async fn test_unknown_enum_name_gives_first_member() {
        let tokens = TokenContext::new();
        let node = spec(&[("Type", "quicklaunch"), ("TemplateType", "Bogus")]);

        assert_eq!(
            node.enum_attr::<NavigationType>("Type", &tokens).await.unwrap(),
            NavigationType::QuickLaunch
        );
        assert_eq!(
            node.enum_attr::<ListTemplate>("TemplateType", &tokens).await.unwrap(),
            ListTemplate::GenericList
        );
        assert_eq!(
            node.enum_attr::<NavigationType>("Missing", &tokens).await.unwrap(),
            NavigationType::TopNavigationBar
        );
    }
}
