//! Find-or-create of destination subjects, sessions and acquisitions
//!
//! Subjects are matched by code, which is unique within a project. Sessions
//! and acquisitions are matched by label together with the provenance stamp
//! of their origin, so re-running an export finds what an earlier run created.
//! A matched container has its metadata refreshed in place; every path ends by
//! re-reading the destination container.

use super::context::ExportContext;
use crate::adapters::datastore::Query;
use crate::domain::{Container, ContainerKind, DatastoreError, DeidError, Result};
use crate::metadata::{dotted, MetadataView, ORIGIN_ID_KEY};
use crate::profile::ExportSpec;
use serde_json::{Map, Value};

/// Destination subject for `origin` under `dest_project`
///
/// The destination code is `export.subject.code` when set, otherwise the
/// origin's code (or label when it has none). The label follows
/// `export.subject.label`, falling back to the code.
pub async fn find_or_create_subject(
    ctx: &ExportContext,
    origin: &Container,
    dest_project: &Container,
    export: &ExportSpec,
) -> Result<Container> {
    let code = export
        .subject_code()
        .or_else(|| origin.code().map(str::to_string))
        .or_else(|| (!origin.label.is_empty()).then(|| origin.label.clone()))
        .ok_or_else(|| {
            DeidError::Validation(format!("subject {} has neither code nor label", origin.id))
        })?;
    let label = export.subject_label().unwrap_or_else(|| code.clone());

    let mut identity = Map::new();
    identity.insert("code".to_string(), Value::String(code.clone()));
    identity.insert("label".to_string(), Value::String(label));

    let query = Query::new().eq("code", code);
    let metadata = ctx.filter.filter(origin, export);
    find_or_create(ctx, origin, dest_project, ContainerKind::Subject, query, identity, metadata).await
}

/// Destination session for `origin` under `dest_subject`
pub async fn find_or_create_session(
    ctx: &ExportContext,
    origin: &Container,
    dest_subject: &Container,
    export: &ExportSpec,
) -> Result<Container> {
    let label = export.session_label().unwrap_or_else(|| origin.label.clone());
    labelled(ctx, origin, dest_subject, ContainerKind::Session, label, export).await
}

/// Destination acquisition for `origin` under `dest_session`
pub async fn find_or_create_acquisition(
    ctx: &ExportContext,
    origin: &Container,
    dest_session: &Container,
    export: &ExportSpec,
) -> Result<Container> {
    let label = origin.label.clone();
    labelled(ctx, origin, dest_session, ContainerKind::Acquisition, label, export).await
}

async fn labelled(
    ctx: &ExportContext,
    origin: &Container,
    parent: &Container,
    kind: ContainerKind,
    label: String,
    export: &ExportSpec,
) -> Result<Container> {
    let metadata = ctx.filter.filter(origin, export);
    let stamp = metadata
        .origin_id()
        .map(str::to_string)
        .unwrap_or_else(|| ctx.filter.stamp(origin));

    let mut identity = Map::new();
    identity.insert("label".to_string(), Value::String(label.clone()));

    let query = Query::new()
        .eq("label", label)
        .eq_quoted(ORIGIN_ID_KEY, stamp);
    find_or_create(ctx, origin, parent, kind, query, identity, metadata).await
}

async fn find_or_create(
    ctx: &ExportContext,
    origin: &Container,
    parent: &Container,
    kind: ContainerKind,
    query: Query,
    identity: Map<String, Value>,
    metadata: MetadataView,
) -> Result<Container> {
    let parent_ref = parent.to_ref();
    let found = ctx
        .retry
        .run("find_first", || ctx.store.find_first(&parent_ref, kind, &query))
        .await?;

    let id = match found {
        Some(existing) => {
            tracing::debug!(origin_id = %origin.id, dest_id = %existing.id, kind = %kind, "Using destination container");
            update(ctx, &existing, metadata).await?;
            existing.id
        }
        None => {
            tracing::debug!(origin_id = %origin.id, kind = %kind, parent = %parent_ref, "Creating destination container");
            let mut body = metadata.as_map().clone();
            dotted::merge(&mut body, identity);
            let created = ctx
                .retry
                .run("add_container", || {
                    ctx.store.add_container(&parent_ref, kind, body.clone())
                })
                .await;
            match created {
                Ok(id) => id,
                Err(e @ DatastoreError::ClientError { .. }) => {
                    // Another worker may have created it first
                    let raced = ctx
                        .retry
                        .run("find_first", || ctx.store.find_first(&parent_ref, kind, &query))
                        .await?;
                    match raced {
                        Some(existing) => {
                            tracing::debug!(dest_id = %existing.id, kind = %kind, "Destination container created concurrently");
                            update(ctx, &existing, metadata).await?;
                            existing.id
                        }
                        None => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    let container = ctx
        .retry
        .run("get_container", || ctx.store.get_container(&id))
        .await?;
    Ok(container)
}

async fn update(ctx: &ExportContext, target: &Container, metadata: MetadataView) -> Result<()> {
    let target_ref = target.to_ref();
    let fields = metadata.into_map();
    ctx.retry
        .run("update_container", || {
            ctx.store.update_container(&target_ref, fields.clone())
        })
        .await?;
    Ok(())
}
