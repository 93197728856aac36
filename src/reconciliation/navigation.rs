//! Navigation rebuilt on every web of the site collection.

use super::{ReconcileError, ReconciliationSession};
use crate::cms::{Cms, NavigationNodeEntity, NavigationType, WebInfo};
use tracing::info;
use url::Url;

/// Read the `NavigationNodes` section in document order
pub async fn collect_navigation_nodes(
    session: &ReconciliationSession,
) -> Result<Vec<NavigationNodeEntity>, ReconcileError> {
    let tokens = &session.tokens;
    let mut nodes = Vec::new();

    for spec in session.manifest.section("NavigationNodes", "NavigationNode") {
        nodes.push(NavigationNodeEntity {
            title: spec.text("Title", tokens).await?,
            url: spec.attr::<Option<Url>>("Url", tokens).await?,
            parent_title: spec.text("ParentTitle", tokens).await?,
            navigation_type: spec.enum_attr::<NavigationType>("Type", tokens).await?,
            is_external: spec.attr::<bool>("External", tokens).await?,
        });
    }
    Ok(nodes)
}

struct Visit {
    web: WebInfo,
    parent_title: Option<String>,
}

/// Replace the navigation of `root` and of every web below it.
///
/// Each web first loses all nodes of the types the manifest uses, then gets
/// the nodes in manifest order, so parents must precede their children.
/// Returns the number of webs visited.
pub async fn sync_navigation(
    cms: &dyn Cms,
    root: &WebInfo,
    nodes: &[NavigationNodeEntity],
) -> Result<usize, ReconcileError> {
    if nodes.is_empty() {
        return Ok(0);
    }

    let mut types: Vec<NavigationType> = Vec::new();
    for node in nodes {
        if !types.contains(&node.navigation_type) {
            types.push(node.navigation_type);
        }
    }

    let mut visited = 0;
    let mut pending = vec![Visit {
        web: root.clone(),
        parent_title: None,
    }];

    while let Some(visit) = pending.pop() {
        info!(
            web = %visit.web.server_relative_url,
            parent = visit.parent_title.as_deref().unwrap_or("-"),
            "Adding navigation nodes"
        );

        for navigation_type in &types {
            cms.delete_navigation_nodes(&visit.web, *navigation_type).await?;
        }
        for node in nodes {
            cms.add_navigation_node(&visit.web, node).await?;
        }
        visited += 1;

        let children = cms.child_webs(&visit.web).await?;
        for child in children.into_iter().rev() {
            pending.push(Visit {
                web: child,
                parent_title: Some(visit.web.title.clone()),
            });
        }
    }

    Ok(visited)
}
