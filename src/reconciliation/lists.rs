use super::items::add_items;
use super::{ReconcileError, ReconciliationSession, RunSummary};
use crate::cms::{ListInfo, ListTemplate, WebInfo};
use crate::manifest::{Name, ResourceSpec};
use tracing::{debug, info};

/// Ensure every `ListInstance` of the `lists` section in the root web
pub async fn reconcile_lists(
    session: &ReconciliationSession,
    summary: &mut RunSummary,
) -> Result<(), ReconcileError> {
    let container = session.ns("lists");
    reconcile_list_section(session, &container, &session.web, summary).await
}

/// Ensure the `ListInstance` entries below a container element
pub(crate) async fn reconcile_list_section(
    session: &ReconciliationSession,
    container: &Name,
    web: &WebInfo,
    summary: &mut RunSummary,
) -> Result<(), ReconcileError> {
    let instances = session
        .manifest
        .root
        .path(&[container.clone(), session.ns("ListInstance")]);

    for instance in instances {
        let result = ensure_list(session, instance, web, summary).await;
        summary.absorb("lists", result)?;
    }
    Ok(())
}

/// Create the list if it is missing, then apply its content-type bindings,
/// data rows and indexed columns.
///
/// The list lives in `default_web` unless the entry names a `WebUrl`.
pub async fn ensure_list(
    session: &ReconciliationSession,
    spec: &ResourceSpec,
    default_web: &WebInfo,
    summary: &mut RunSummary,
) -> Result<ListInfo, ReconcileError> {
    let cms = session.cms.as_ref();
    let tokens = &session.tokens;

    let title = spec.text("Title", tokens).await?;
    let web_url = spec.text("WebUrl", tokens).await?;
    let web = if web_url.is_empty() {
        default_web.clone()
    } else {
        session.resolve_web(&web_url).await?
    };

    let list = match cms.list_by_title(&web, &title).await? {
        Some(list) => {
            debug!(list = %title, "List exists");
            list
        }
        None => {
            let template = spec.enum_attr::<ListTemplate>("TemplateType", tokens).await?;
            let url_name: String = title.chars().filter(|c| !c.is_whitespace()).collect();
            info!(list = %title, template = ?template, "Creating list");

            let mut list = cms.create_list(&web, template, &url_name).await?;
            cms.set_list_title(&web, &list, &title).await?;
            list.title = title.clone();
            list
        }
    };

    let remove_existing = spec
        .attr::<bool>("RemoveExistingContentTypes", tokens)
        .await?;
    let bindings = spec.path(&[
        session.ns("ContentTypeBindings"),
        session.ns("ContentTypeBinding"),
    ]);
    bind_content_types(session, &web, &list, &bindings, remove_existing).await?;

    let rows = spec.path(&[session.ns("DataRows"), session.ns("DataRow")]);
    add_items(session, &web, &list, &rows, summary).await?;

    let columns = spec.path(&[session.ns("IndexedColumns"), session.ns("IndexedColumn")]);
    index_columns(session, &web, &list, &columns).await?;

    Ok(list)
}

async fn bind_content_types(
    session: &ReconciliationSession,
    web: &WebInfo,
    list: &ListInfo,
    bindings: &[&ResourceSpec],
    remove_existing: bool,
) -> Result<(), ReconcileError> {
    if bindings.is_empty() && !remove_existing {
        return Ok(());
    }
    let cms = session.cms.as_ref();

    let existing: Vec<String> = cms
        .list_content_types(web, list)
        .await?
        .into_iter()
        .map(|ct| ct.name)
        .collect();

    let mut bound = Vec::new();
    for binding in bindings {
        let id = binding.text("ContentTypeID", &session.tokens).await?;
        let make_default = binding.attr::<bool>("Default", &session.tokens).await?;
        let content_type = cms
            .content_type(&session.web, &id)
            .await?
            .ok_or(ReconcileError::ContentTypeNotFound(id))?;

        cms.add_content_type_to_list(web, list, &content_type, make_default)
            .await?;
        debug!(
            list = %list.title,
            content_type = %content_type.name,
            make_default,
            "Bound content type"
        );
        bound.push(content_type.name);
    }

    if remove_existing {
        for name in existing
            .iter()
            .filter(|name| !bound.iter().any(|b| b.eq_ignore_ascii_case(name)))
        {
            cms.remove_content_type_from_list(web, list, name).await?;
            info!(list = %list.title, content_type = %name, "Removed content type");
        }
    }

    Ok(())
}

async fn index_columns(
    session: &ReconciliationSession,
    web: &WebInfo,
    list: &ListInfo,
    columns: &[&ResourceSpec],
) -> Result<(), ReconcileError> {
    if columns.is_empty() {
        return Ok(());
    }
    let cms = session.cms.as_ref();
    let fields = cms.list_fields(web, list).await?;

    for column in columns {
        let name = column.text("Name", &session.tokens).await?;
        match fields
            .iter()
            .find(|f| f.internal_name.eq_ignore_ascii_case(&name))
        {
            Some(field) => {
                cms.set_field_indexed(web, list, &field.internal_name).await?;
                debug!(list = %list.title, field = %field.internal_name, "Indexed column");
            }
            None => debug!(list = %list.title, field = %name, "No such field to index"),
        }
    }
    Ok(())
}
