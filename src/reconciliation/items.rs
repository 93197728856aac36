use super::{ReconcileError, ReconciliationSession, RunSummary};
use crate::cms::{Cms, FieldInfo, FieldKind, FieldValue, Geolocation, ListInfo, WebInfo};
use crate::manifest::ResourceSpec;
use tracing::{debug, info};

/// Parse `altitude,latitude,longitude,measure`.
///
/// Anything that does not have exactly four parts is kept as raw text.
pub fn parse_geolocation(field: &str, raw: &str) -> Result<FieldValue, ReconcileError> {
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 4 {
        return Ok(FieldValue::Text(raw.to_string()));
    }

    let invalid = || ReconcileError::InvalidFieldValue {
        field: field.to_string(),
        value: raw.to_string(),
    };
    let mut numbers = [0f64; 4];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        *slot = part.trim().parse().map_err(|_| invalid())?;
    }

    Ok(FieldValue::Geolocation(Geolocation {
        altitude: numbers[0],
        latitude: numbers[1],
        longitude: numbers[2],
        measure: numbers[3],
    }))
}

/// Parse `url,description`. Any other shape uses the first part for both.
pub fn parse_url_value(raw: &str) -> FieldValue {
    let parts: Vec<&str> = raw.split(',').collect();
    match parts.as_slice() {
        [url, description] => FieldValue::Url {
            url: url.to_string(),
            description: description.to_string(),
        },
        _ => FieldValue::Url {
            url: parts[0].to_string(),
            description: parts[0].to_string(),
        },
    }
}

/// Convert a substituted attribute value to the value its field expects
pub async fn coerce_field_value(
    cms: &dyn Cms,
    web: &WebInfo,
    field: &FieldInfo,
    raw: &str,
) -> Result<FieldValue, ReconcileError> {
    Ok(match &field.kind {
        FieldKind::Geolocation => parse_geolocation(&field.internal_name, raw)?,
        FieldKind::Lookup => {
            let id = raw
                .trim()
                .parse()
                .map_err(|_| ReconcileError::InvalidFieldValue {
                    field: field.internal_name.clone(),
                    value: raw.to_string(),
                })?;
            FieldValue::Lookup(id)
        }
        FieldKind::Url => parse_url_value(raw),
        FieldKind::User => match cms.ensure_user(web, raw).await? {
            Some(id) => FieldValue::User {
                id,
                login: raw.to_string(),
            },
            None => {
                debug!(
                    field = %field.internal_name,
                    login = %raw,
                    "Unknown user, keeping raw value"
                );
                FieldValue::Text(raw.to_string())
            }
        },
        FieldKind::Taxonomy { term_set_id } => FieldValue::Taxonomy {
            term_id: cms.term_id_in_set(*term_set_id, raw).await?,
            label: raw.to_string(),
        },
        FieldKind::Text | FieldKind::Other(_) => FieldValue::Text(raw.to_string()),
    })
}

/// Add one item per data row. A failing row is logged and skipped.
pub async fn add_items(
    session: &ReconciliationSession,
    web: &WebInfo,
    list: &ListInfo,
    rows: &[&ResourceSpec],
    summary: &mut RunSummary,
) -> Result<(), ReconcileError> {
    if rows.is_empty() {
        return Ok(());
    }

    let fields = session.cms.list_fields(web, list).await?;
    for row in rows {
        let result = add_row(session, web, list, &fields, row).await;
        summary.absorb_row(&list.title, result)?;
    }

    info!(list = %list.title, rows = rows.len(), "Added data rows");
    Ok(())
}

async fn add_row(
    session: &ReconciliationSession,
    web: &WebInfo,
    list: &ListInfo,
    fields: &[FieldInfo],
    row: &ResourceSpec,
) -> Result<i32, ReconcileError> {
    let cms = session.cms.as_ref();
    let item_id = cms.add_item(web, list).await?;

    for (name, raw) in &row.attributes {
        let Some(field) = fields
            .iter()
            .find(|f| f.internal_name.eq_ignore_ascii_case(name))
        else {
            debug!(list = %list.title, attribute = %name, "No matching field, skipping");
            continue;
        };

        let value = session.tokens.substitute(raw).await?;
        let value = coerce_field_value(cms, web, field, &value).await?;
        cms.set_item_field(web, list, item_id, &field.internal_name, &value)
            .await?;
    }

    Ok(item_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geolocation() {
        assert_eq!(
            parse_geolocation("Location", "10,52.5,13.4,0").unwrap(),
            FieldValue::Geolocation(Geolocation {
                altitude: 10.0,
                latitude: 52.5,
                longitude: 13.4,
                measure: 0.0,
            })
        );
        assert_eq!(
            parse_geolocation("Location", "52.5,13.4").unwrap(),
            FieldValue::Text("52.5,13.4".to_string())
        );
        assert!(parse_geolocation("Location", "a,b,c,d").is_err());
    }

    #[test]
    fn test_url_value() {
        assert_eq!(
            parse_url_value("http://x,Desc"),
            FieldValue::Url {
                url: "http://x".to_string(),
                description: "Desc".to_string()
            }
        );
        assert_eq!(
            parse_url_value("http://x"),
            FieldValue::Url {
                url: "http://x".to_string(),
                description: "http://x".to_string()
            }
        );
        assert_eq!(
            parse_url_value("http://x,a,b"),
            FieldValue::Url {
                url: "http://x".to_string(),
                description: "http://x".to_string()
            }
        );
    }
}
