//! The XML manifest describing the desired state of a site collection.

mod coerce;
mod types;

pub use coerce::{parse_named, CoercionError, FromAttribute, NamedEnum};
pub use types::{Manifest, Name, ResourceSpec};

use std::path::Path;
use thiserror::Error;
use tokio::fs;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read manifest: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse manifest: {0}")]
    ParseError(#[from] roxmltree::Error),

    #[error("Namespace declaration missing from the root element")]
    MissingNamespace,
}

/// Read and parse the manifest file
pub async fn load_manifest(path: &Path) -> Result<Manifest, ManifestError> {
    let content = fs::read_to_string(path).await?;
    parse_manifest(&content)
}

/// Parse manifest text.
///
/// The root element's first attribute must be a namespace declaration; its
/// URI becomes the namespace qualifying the manifest sections.
pub fn parse_manifest(xml: &str) -> Result<Manifest, ManifestError> {
    let document = roxmltree::Document::parse(xml)?;
    let root = document.root_element();

    let declaration =
        first_attribute_name(&xml[root.range()]).ok_or(ManifestError::MissingNamespace)?;
    let prefix = match declaration.as_str() {
        "xmlns" => None,
        other => match other.strip_prefix("xmlns:") {
            Some(prefix) => Some(prefix),
            None => return Err(ManifestError::MissingNamespace),
        },
    };

    let namespace = root
        .namespaces()
        .find(|ns| ns.name() == prefix)
        .map(|ns| ns.uri().to_string())
        .ok_or(ManifestError::MissingNamespace)?;

    Ok(Manifest {
        root: build_spec(xml, root),
        namespace,
    })
}

/// Name of the first attribute in an element's start tag
fn first_attribute_name(element_source: &str) -> Option<String> {
    let start_tag = element_source.strip_prefix('<')?;
    let after_name =
        start_tag.trim_start_matches(|c: char| !c.is_whitespace() && c != '>' && c != '/');
    let rest = after_name.trim_start();
    if rest.starts_with('>') || rest.starts_with('/') || rest.is_empty() {
        return None;
    }
    let name: String = rest
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '=')
        .collect();
    Some(name)
}

fn build_spec(source: &str, node: roxmltree::Node) -> ResourceSpec {
    let tag = node.tag_name();
    let elements: Vec<roxmltree::Node> = node.children().filter(|c| c.is_element()).collect();

    ResourceSpec {
        name: Name {
            namespace: tag.namespace().map(str::to_string),
            local: tag.name().to_string(),
        },
        attributes: node
            .attributes()
            .map(|a| (a.name().to_string(), a.value().to_string()))
            .collect(),
        first_child_xml: elements.first().map(|c| source[c.range()].to_string()),
        children: elements.into_iter().map(|c| build_spec(source, c)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const NS: &str = "http://schemas.dev.office.com/PnP/2015/05/ProvisioningSchema";

    fn sample() -> String {
        format!(
            r#"<branding xmlns:pnp="{NS}" version="1">
  <pnp:lists>
    <pnp:ListInstance Title="News">
      <pnp:DataRows><pnp:DataRow Title="a" /></pnp:DataRows>
    </pnp:ListInstance>
    <pnp:Group><pnp:ListInstance Title="Nested" /></pnp:Group>
  </pnp:lists>
  <files><file name="site.css" folder="css" path="Style Library" /></files>
  <pnp:SearchSettings><SearchConfiguration a="b"/></pnp:SearchSettings>
</branding>"#
        )
    }

    #[test]
    fn test_parse_manifest_namespace() {
        let manifest = parse_manifest(&sample()).unwrap();
        assert_eq!(manifest.namespace, NS);
        assert_eq!(manifest.root.name, Name::plain("branding"));
    }

    #[test]
    fn test_sections_follow_path_then_descendants() {
        let manifest = parse_manifest(&sample()).unwrap();

        let lists = manifest.section("lists", "ListInstance");
        let titles: Vec<_> = lists.iter().filter_map(|l| l.raw("Title")).collect();
        assert_eq!(titles, vec!["News", "Nested"]);

        let files = manifest.plain_section("files", "file");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].raw("path"), Some("Style Library"));

        assert!(manifest.plain_section("missing", "file").is_empty());
    }

    #[test]
    fn test_first_child_xml() {
        let manifest = parse_manifest(&sample()).unwrap();
        let search = manifest.element("SearchSettings").unwrap();
        assert_eq!(
            search.first_child_xml.as_deref(),
            Some(r#"<SearchConfiguration a="b"/>"#)
        );
    }

    #[test]
    fn test_missing_namespace_fails_fast() {
        let result = parse_manifest(r#"<branding version="1" xmlns:pnp="urn:x"></branding>"#);
        assert!(matches!(result, Err(ManifestError::MissingNamespace)));

        let result = parse_manifest("<branding></branding>");
        assert!(matches!(result, Err(ManifestError::MissingNamespace)));
    }

    #[test]
    fn test_default_namespace_declaration() {
        let manifest = parse_manifest(r#"<branding xmlns="urn:x"><lists /></branding>"#).unwrap();
        assert_eq!(manifest.namespace, "urn:x");
    }

    #[tokio::test]
    async fn test_load_manifest_from_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.xml");
        fs::write(&path, sample()).await.unwrap();

        let manifest = load_manifest(&path).await.unwrap();
        assert_eq!(manifest.section("lists", "ListInstance").len(), 2);
    }
}
