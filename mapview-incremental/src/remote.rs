//! Forwarding of queries to stores that evaluate views themselves

use crate::error::{Error, Result};
use crate::function::Reduce;
use crate::options::{QueryOptions, QueryResult};
use crate::view::{ViewDefinition, ViewRef, DESIGN_PREFIX};
use mapview_store::{RemoteRequest, RemoteTransport};
use serde_json::{json, Map, Value};
use tracing::debug;

/// Path of the endpoint evaluating inline views
pub const TEMP_VIEW_PATH: &str = "_temp_view";

/// Build the request equivalent to running `view` locally with `options`
pub fn build_request(view: &ViewRef, options: &QueryOptions) -> Result<RemoteRequest> {
    let mut request = match view {
        ViewRef::Named { design, view } => {
            let path = format!("{DESIGN_PREFIX}{design}/_view/{view}");
            match &options.keys {
                Some(keys) => RemoteRequest::post(path, json!({ "keys": keys })),
                None => RemoteRequest::get(path),
            }
        }
        ViewRef::Inline(definition) => {
            let mut body = inline_body(definition)?;
            if let Some(keys) = &options.keys {
                body.insert("keys".to_string(), json!(keys));
            }
            RemoteRequest::post(TEMP_VIEW_PATH, Value::Object(body))
        }
    };

    for (name, value) in [
        ("key", &options.key),
        ("startkey", &options.startkey),
        ("endkey", &options.endkey),
    ] {
        if let Some(value) = value {
            request = request.param(name, serde_json::to_string(value)?);
        }
    }
    if options.descending {
        request = request.param("descending", "true");
    }
    if let Some(limit) = options.limit {
        request = request.param("limit", limit.to_string());
    }
    if options.skip > 0 {
        request = request.param("skip", options.skip.to_string());
    }
    if options.include_docs {
        request = request.param("include_docs", "true");
    }
    if let Some(group) = options.group {
        request = request.param("group", group.to_string());
    }
    if let Some(level) = options.group_level {
        request = request.param("group_level", level.to_string());
    }
    if let Some(reduce) = options.reduce {
        request = request.param("reduce", reduce.to_string());
    }
    Ok(request)
}

fn inline_body(definition: &ViewDefinition) -> Result<Map<String, Value>> {
    let source = definition.source().ok_or_else(|| {
        Error::InvalidRequest("inline view has no source to send to a remote store".to_string())
    })?;

    let mut body = Map::new();
    body.insert("map".to_string(), json!(source.map));

    let reduce = match (&source.reduce, definition.reduce_function()) {
        (Some(text), _) => Some(text.clone()),
        (None, Some(Reduce::Builtin(builtin))) => Some(builtin.name().to_string()),
        (None, Some(Reduce::Custom(_))) => {
            return Err(Error::InvalidRequest(
                "custom reduce function has no source to send to a remote store".to_string(),
            ));
        }
        (None, None) => None,
    };
    if let Some(reduce) = reduce {
        body.insert("reduce".to_string(), json!(reduce));
    }
    Ok(body)
}

/// Run `view` on the remote end and return its answer unmodified
pub async fn delegate(
    transport: &dyn RemoteTransport,
    view: &ViewRef,
    options: &QueryOptions,
) -> Result<QueryResult> {
    let request = build_request(view, options)?;
    debug!(method = %request.method, path = %request.path, "Delegating view query");
    let response = transport.request(request).await?;
    Ok(serde_json::from_value(response)?)
}
