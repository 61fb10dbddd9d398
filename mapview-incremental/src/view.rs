//! View definitions and references

use crate::error::{Error, Result};
use crate::function::{Emitter, FunctionRegistry, FunctionResult, MapFunction, Reduce};
use mapview_types::DocId;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Prefix of design document identifiers
pub const DESIGN_PREFIX: &str = "_design/";

/// Source text of a view, forwarded to remote stores that evaluate
/// views themselves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSource {
    pub map: String,
    pub reduce: Option<String>,
}

/// A map function and an optional reduce function
///
/// Immutable once built; cloning shares the underlying functions.
#[derive(Clone)]
pub struct ViewDefinition {
    map: Arc<dyn MapFunction>,
    reduce: Option<Reduce>,
    source: Option<ViewSource>,
}

impl ViewDefinition {
    /// Build a definition from a map closure
    pub fn new<F>(map: F) -> Self
    where
        F: Fn(&Value, &mut Emitter) -> FunctionResult<()> + Send + Sync + 'static,
    {
        Self::from_map(Arc::new(map))
    }

    pub fn from_map(map: Arc<dyn MapFunction>) -> Self {
        ViewDefinition {
            map,
            reduce: None,
            source: None,
        }
    }

    pub fn with_reduce(mut self, reduce: impl Into<Reduce>) -> Self {
        self.reduce = Some(reduce.into());
        self
    }

    /// Attach the view's source text for remote evaluation
    pub fn with_source(mut self, map: impl Into<String>, reduce: Option<String>) -> Self {
        self.source = Some(ViewSource {
            map: map.into(),
            reduce,
        });
        self
    }

    pub fn map_function(&self) -> &dyn MapFunction {
        self.map.as_ref()
    }

    pub fn reduce_function(&self) -> Option<&Reduce> {
        self.reduce.as_ref()
    }

    pub fn source(&self) -> Option<&ViewSource> {
        self.source.as_ref()
    }

    /// Resolve the view `name` of a design document through `registry`
    ///
    /// Design documents look like
    /// `{"_id": "_design/app", "views": {"by_tag": {"map": "tags", "reduce": "_count"}}}`
    /// where `map` and `reduce` name registered functions.
    pub fn from_design_doc(
        design_doc: &Value,
        name: &str,
        registry: &FunctionRegistry,
    ) -> Result<Self> {
        let views = design_doc
            .get("views")
            .cloned()
            .map(serde_json::from_value::<BTreeMap<String, DesignView>>)
            .transpose()?
            .unwrap_or_default();
        let view = views
            .get(name)
            .ok_or_else(|| Error::NotFound("missing_named_view".to_string()))?;

        let map = registry
            .map(&view.map)
            .ok_or_else(|| Error::NotFound(format!("map function {} is not registered", view.map)))?;
        let mut definition = ViewDefinition::from_map(map);
        if let Some(reduce) = &view.reduce {
            let reduce = registry.reduce(reduce).ok_or_else(|| {
                Error::NotFound(format!("reduce function {reduce} is not registered"))
            })?;
            definition = definition.with_reduce(reduce);
        }
        Ok(definition.with_source(view.map.clone(), view.reduce.clone()))
    }
}

impl fmt::Debug for ViewDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewDefinition")
            .field("reduce", &self.reduce)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct DesignView {
    map: String,
    #[serde(default)]
    reduce: Option<String>,
}

/// What a query runs against
#[derive(Debug, Clone)]
pub enum ViewRef {
    /// An ad-hoc definition materialized for one query
    Inline(ViewDefinition),

    /// A view stored in design document `_design/<design>`
    Named { design: String, view: String },
}

impl ViewRef {
    pub fn named(design: impl Into<String>, view: impl Into<String>) -> Self {
        ViewRef::Named {
            design: design.into(),
            view: view.into(),
        }
    }

    /// Parse `"<ddoc>/<view>"`; a leading `_design/` is accepted
    pub fn parse(reference: &str) -> Result<Self> {
        let trimmed = reference.strip_prefix(DESIGN_PREFIX).unwrap_or(reference);
        match trimmed.split_once('/') {
            Some((design, view)) if !design.is_empty() && !view.is_empty() && !view.contains('/') => {
                Ok(ViewRef::named(design, view))
            }
            _ => Err(Error::InvalidRequest(format!(
                "view reference {reference:?} is not of the form <ddoc>/<view>"
            ))),
        }
    }

    /// Identifier of the design document backing a named view
    pub fn design_doc_id(&self) -> Option<DocId> {
        match self {
            ViewRef::Named { design, .. } => Some(DocId::new(format!("{DESIGN_PREFIX}{design}"))),
            ViewRef::Inline(_) => None,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, ViewRef::Inline(_))
    }
}

impl FromStr for ViewRef {
    type Err = Error;

    fn from_str(reference: &str) -> Result<Self> {
        ViewRef::parse(reference)
    }
}

impl From<ViewDefinition> for ViewRef {
    fn from(definition: ViewDefinition) -> Self {
        ViewRef::Inline(definition)
    }
}

impl fmt::Display for ViewRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewRef::Inline(_) => write!(f, "temp_view"),
            ViewRef::Named { design, view } => write!(f, "{design}/{view}"),
        }
    }
}
