use super::{ReconcileError, ReconciliationSession, RunSummary};
use crate::cms::ContentTypeDefinition;
use crate::manifest::ResourceSpec;
use tracing::{debug, info};

/// Create the content types of the `ContentTypes` section that the root web
/// does not have yet
pub async fn create_content_types(
    session: &ReconciliationSession,
    summary: &mut RunSummary,
) -> Result<(), ReconcileError> {
    for spec in session.manifest.section("ContentTypes", "ContentType") {
        let result = create_content_type(session, spec).await;
        summary.absorb("content types", result)?;
    }
    Ok(())
}

async fn create_content_type(
    session: &ReconciliationSession,
    spec: &ResourceSpec,
) -> Result<(), ReconcileError> {
    let tokens = &session.tokens;
    let definition = ContentTypeDefinition {
        id: spec.text("ID", tokens).await?,
        name: spec.text("Name", tokens).await?,
        group: spec.text("Group", tokens).await?,
        description: spec.text("Description", tokens).await?,
        field_refs: field_refs(session, spec).await?,
    };
    info!(content_type = %definition.name, "Processing content type");

    if session
        .cms
        .content_type(&session.web, &definition.id)
        .await?
        .is_some()
    {
        debug!(content_type = %definition.name, "Content type exists");
        return Ok(());
    }

    session
        .cms
        .create_content_type(&session.web, &definition)
        .await?;
    Ok(())
}

async fn field_refs(
    session: &ReconciliationSession,
    spec: &ResourceSpec,
) -> Result<Vec<String>, ReconcileError> {
    let mut refs = Vec::new();
    for field in spec.path(&[session.ns("FieldRefs"), session.ns("FieldRef")]) {
        let name = field.text("Name", &session.tokens).await?;
        if name.is_empty() {
            refs.push(field.text("ID", &session.tokens).await?);
        } else {
            refs.push(name);
        }
    }
    Ok(refs)
}
