//! Sub-sites, their permission groups, role definitions and term sets.

use super::lists::reconcile_list_section;
use super::{ReconcileError, ReconciliationSession, RunSummary};
use crate::cms::{Cms, NewWeb, WebInfo};
use crate::manifest::{Name, ResourceSpec};
use crate::utils::join_url;
use tracing::{debug, info, warn};

pub const ROLE_CONTENT_CONTRIBUTOR: &str = "Content Contributor";
pub const ROLE_CONTENT_MANAGER: &str = "Content Manager";
pub const ROLE_VISITOR: &str = "Visitor";

/// Group whose presence marks permissions as already applied
pub const VISITORS_GROUP: &str = "Visitors";

const PAGES_LIBRARY: &str = "Pages";
const INITIAL_PUBLISH_COMMENT: &str = "Initial Publish";

/// Make sure the custom role definitions exist in the root web
pub async fn create_role_definitions(
    session: &ReconciliationSession,
) -> Result<(), ReconcileError> {
    for role in [ROLE_CONTENT_CONTRIBUTOR, ROLE_CONTENT_MANAGER, ROLE_VISITOR] {
        session
            .cms
            .ensure_role_definition(&session.web, role, role)
            .await?;
        debug!(role = %role, "Ensured role definition");
    }
    Ok(())
}

/// Create the permission groups of a web with broken inheritance.
///
/// Returns `false` without changes when the visitors group already exists.
pub async fn apply_permissions(cms: &dyn Cms, web: &WebInfo) -> Result<bool, ReconcileError> {
    if cms.group_exists(web, VISITORS_GROUP).await? {
        debug!(web = %web.url, "Permissions already applied");
        return Ok(false);
    }

    let groups = [
        (VISITORS_GROUP.to_string(), ROLE_VISITOR),
        (
            format!("{} Content Contributors", web.title),
            ROLE_CONTENT_CONTRIBUTOR,
        ),
        (format!("{} Content Managers", web.title), ROLE_CONTENT_MANAGER),
    ];
    for (group, role) in &groups {
        cms.create_group(web, group, group, role).await?;
        info!(web = %web.url, group = %group, role = %role, "Created group");
    }
    Ok(true)
}

/// Create the sub-sites of the `sites` section
pub async fn create_sub_sites(
    session: &ReconciliationSession,
    summary: &mut RunSummary,
) -> Result<(), ReconcileError> {
    for spec in session.manifest.plain_section("sites", "site") {
        let result = create_sub_site(session, spec, summary).await;
        summary.absorb("sites", result)?;
    }
    Ok(())
}

async fn create_sub_site(
    session: &ReconciliationSession,
    spec: &ResourceSpec,
    summary: &mut RunSummary,
) -> Result<(), ReconcileError> {
    let tokens = &session.tokens;
    let cms = session.cms.as_ref();

    let parent_path = spec.text("web", tokens).await?;
    let parent_url = if parent_path.is_empty() {
        session.options.site_url.clone()
    } else {
        join_url(&session.options.site_url, &parent_path)
    };
    let parent = cms
        .web_by_url(&parent_url)
        .await?
        .ok_or(ReconcileError::WebNotFound(parent_url))?;

    let new_web = NewWeb {
        title: spec.text("title", tokens).await?,
        leaf_url: spec.text("leafUrl", tokens).await?,
        description: spec.text("description", tokens).await?,
        template: spec.text("template", tokens).await?,
        language: spec.attr::<i32>("language", tokens).await?,
        inherit_permissions: spec.attr::<bool>("inheritpermissions", tokens).await?,
        inherit_navigation: spec.attr::<bool>("inheritnavigation", tokens).await?,
    };
    let url = join_url(&parent.url, &new_web.leaf_url);

    let web = match cms.web_by_url(&url).await? {
        Some(web) => {
            info!(web = %url, "Sub-site exists, skipping creation");
            web
        }
        None => {
            info!(web = %url, template = %new_web.template, "Creating sub-site");
            let web = cms.create_web(&parent, &new_web).await?;
            publish_welcome_page(cms, &web).await?;
            if !new_web.inherit_permissions {
                apply_permissions(cms, &web).await?;
            }
            web
        }
    };

    let lists = spec.text("lists", tokens).await?;
    if !lists.is_empty() {
        reconcile_list_section(session, &Name::plain(&lists), &web, summary).await?;
    }
    Ok(())
}

async fn publish_welcome_page(cms: &dyn Cms, web: &WebInfo) -> Result<(), ReconcileError> {
    let Some(pages) = cms.list_by_title(web, PAGES_LIBRARY).await? else {
        warn!(web = %web.url, "No pages library, welcome page not published");
        return Ok(());
    };

    if let Some(url) = cms.item_file_url(web, &pages, 1).await? {
        cms.publish(web, &url, INITIAL_PUBLISH_COMMENT).await?;
        debug!(page = %url, "Published welcome page");
    }
    Ok(())
}

/// Import the term sets of the `termsets` section into the configured group
pub async fn import_term_sets(
    session: &ReconciliationSession,
    summary: &mut RunSummary,
) -> Result<(), ReconcileError> {
    let specs = session.manifest.plain_section("termsets", "termset");
    if specs.is_empty() {
        return Ok(());
    }
    let Some(group) = session.options.term_group.as_deref() else {
        warn!("No term group configured, skipping term sets");
        return Ok(());
    };

    for spec in specs {
        let result = import_term_set(session, group, spec).await;
        summary.absorb("term sets", result)?;
    }
    Ok(())
}

async fn import_term_set(
    session: &ReconciliationSession,
    group: &str,
    spec: &ResourceSpec,
) -> Result<(), ReconcileError> {
    let path = spec.text("termSetFilePath", &session.tokens).await?;
    session.cms.import_term_set(group, &path).await?;
    info!(group = %group, file = %path, "Imported term set");
    Ok(())
}
