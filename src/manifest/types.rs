/// An element name, optionally qualified by a namespace URI
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    pub namespace: Option<String>,
    pub local: String,
}

impl Name {
    pub fn plain(local: &str) -> Self {
        Self {
            namespace: None,
            local: local.to_string(),
        }
    }

    pub fn qualified(namespace: &str, local: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            local: local.to_string(),
        }
    }
}

/// A generic manifest element.
///
/// Attribute values are kept raw; substitution and coercion happen when a
/// reconciler reads them.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSpec {
    pub name: Name,
    /// Attributes in document order, keyed by local name
    pub attributes: Vec<(String, String)>,
    pub children: Vec<ResourceSpec>,
    /// Source text of the first child element, if any
    pub first_child_xml: Option<String>,
}

impl ResourceSpec {
    /// Raw value of an attribute, before substitution
    pub fn raw(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// First direct child with the given name
    pub fn child(&self, name: &Name) -> Option<&ResourceSpec> {
        self.children.iter().find(|c| &c.name == name)
    }

    /// All descendants with the given name, in document order
    pub fn descendants(&self, name: &Name) -> Vec<&ResourceSpec> {
        let mut found = Vec::new();
        let mut stack: Vec<&ResourceSpec> = self.children.iter().rev().collect();
        while let Some(node) = stack.pop() {
            if &node.name == name {
                found.push(node);
            }
            stack.extend(node.children.iter().rev());
        }
        found
    }

    /// Follow the first child named by every path segment but the last,
    /// then collect all descendants named by the last one.
    ///
    /// A missing intermediate element yields nothing.
    pub fn path(&self, path: &[Name]) -> Vec<&ResourceSpec> {
        let Some((last, parents)) = path.split_last() else {
            return Vec::new();
        };

        let mut current = self;
        for name in parents {
            match current.child(name) {
                Some(child) => current = child,
                None => return Vec::new(),
            }
        }
        current.descendants(last)
    }
}

/// A parsed manifest with its declared namespace
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub root: ResourceSpec,
    pub namespace: String,
}

impl Manifest {
    /// Name qualified by the manifest namespace
    pub fn ns(&self, local: &str) -> Name {
        Name::qualified(&self.namespace, local)
    }

    /// Elements of a section whose container and item are both qualified,
    /// e.g. `lists/ListInstance`
    pub fn section(&self, container: &str, item: &str) -> Vec<&ResourceSpec> {
        self.root.path(&[self.ns(container), self.ns(item)])
    }

    /// Elements of a section whose container and item are unqualified,
    /// e.g. `files/file`
    pub fn plain_section(&self, container: &str, item: &str) -> Vec<&ResourceSpec> {
        self.root.path(&[Name::plain(container), Name::plain(item)])
    }

    /// Single qualified element directly below the root
    pub fn element(&self, local: &str) -> Option<&ResourceSpec> {
        self.root.child(&self.ns(local))
    }
}
