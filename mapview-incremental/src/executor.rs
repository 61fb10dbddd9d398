//! Translation of query options into index scans

use crate::error::{Error, Result};
use crate::function::Reduce;
use crate::lifecycle::ViewHandle;
use crate::options::{QueryOptions, QueryResult, ViewRow};
use crate::records::IndexRow;
use crate::reduce::{Grouping, Reducer};
use mapview_collate::{normalize_key, to_indexable_string};
use mapview_store::RangeRequest;
use serde_json::{json, Value};
use tracing::{debug, instrument};

/// Encoded scan bounds for one key range
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl KeyRange {
    /// Bounds covering every row whose key lies in `[startkey, endkey]`
    ///
    /// Each bound is paired with a sentinel sorting before (`null`) or
    /// after (`{}`) every doc id and value, so all rows sharing a boundary
    /// key are included. Descending scans start from the high bound, so
    /// the sentinels swap.
    pub fn new(startkey: Option<&Value>, endkey: Option<&Value>, descending: bool) -> Self {
        let (start_sentinel, end_sentinel) = if descending {
            (json!({}), Value::Null)
        } else {
            (Value::Null, json!({}))
        };
        KeyRange {
            start: startkey.map(|key| encode_bound(key, &start_sentinel)),
            end: endkey.map(|key| encode_bound(key, &end_sentinel)),
        }
    }

    /// Bounds covering exactly the rows of `key`
    pub fn single(key: &Value, descending: bool) -> Self {
        KeyRange::new(Some(key), Some(key), descending)
    }
}

fn encode_bound(key: &Value, sentinel: &Value) -> String {
    to_indexable_string(&json!([normalize_key(key), sentinel]))
}

/// Answers queries against an up-to-date view
pub struct QueryExecutor<'a> {
    view: &'a ViewHandle,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(view: &'a ViewHandle) -> Self {
        QueryExecutor { view }
    }

    /// The reduce function to apply, if the query reduces
    pub fn reduce_for(&self, options: &QueryOptions) -> Result<Option<&'a Reduce>> {
        match (options.reduce, self.view.definition().reduce_function()) {
            (Some(true), None) => Err(Error::InvalidRequest(
                "reduce is invalid for a view without a reduce function".to_string(),
            )),
            (Some(false), _) | (None, None) => Ok(None),
            (_, Some(reduce)) => Ok(Some(reduce)),
        }
    }

    #[instrument(skip(self, options), fields(view = %self.view.name()))]
    pub async fn execute(&self, options: &QueryOptions) -> Result<QueryResult> {
        let reduce = self.reduce_for(options)?;

        // Paging can only be pushed into the scan when rows come back as-is.
        let push_down = reduce.is_none() && options.keys.is_none();

        let (total_rows, offset, rows) = match &options.keys {
            Some(keys) => {
                let mut rows = Vec::new();
                let mut total_rows = 0;
                for key in keys {
                    let range = KeyRange::single(key, options.descending);
                    let (total, _, mut matched) = self.scan(range, options.descending, 0, None).await?;
                    total_rows = total;
                    rows.append(&mut matched);
                }
                debug!(keys = keys.len(), rows = rows.len(), "Fanned out keys");
                (total_rows, 0, rows)
            }
            None => {
                let range = match &options.key {
                    Some(key) => KeyRange::single(key, options.descending),
                    None => KeyRange::new(
                        options.startkey.as_ref(),
                        options.endkey.as_ref(),
                        options.descending,
                    ),
                };
                if push_down {
                    self.scan(range, options.descending, options.skip, options.limit)
                        .await?
                } else {
                    self.scan(range, options.descending, 0, None).await?
                }
            }
        };

        let mut result = match reduce {
            Some(function) => {
                let grouping = Grouping::from_options(options);
                let groups = Reducer::new(function, grouping).reduce(&rows)?;
                QueryResult {
                    total_rows: groups.len(),
                    offset: options.skip,
                    rows: paginate(groups, options.skip, options.limit),
                }
            }
            None if push_down => QueryResult {
                total_rows,
                offset,
                rows,
            },
            None => QueryResult {
                total_rows,
                offset: options.skip,
                rows: paginate(rows, options.skip, options.limit),
            },
        };

        if !options.include_docs {
            for row in &mut result.rows {
                row.doc = None;
            }
        }
        Ok(result)
    }

    async fn scan(
        &self,
        range: KeyRange,
        descending: bool,
        skip: usize,
        limit: Option<usize>,
    ) -> Result<(usize, usize, Vec<ViewRow>)> {
        let request = RangeRequest::new(range.start, range.end)
            .descending(descending)
            .include_docs(true)
            .paginate(skip, limit);
        let response = self.view.index().range_scan(request).await?;

        let mut rows = Vec::with_capacity(response.rows.len());
        for scanned in response.rows {
            let Some(doc) = scanned.doc else {
                continue;
            };
            let row: IndexRow = serde_json::from_value(doc)?;
            rows.push(ViewRow {
                id: Some(row.id),
                key: row.key,
                value: row.value,
                doc: row.doc,
            });
        }
        Ok((response.total_rows, response.offset, rows))
    }
}

fn paginate(rows: Vec<ViewRow>, skip: usize, limit: Option<usize>) -> Vec<ViewRow> {
    rows.into_iter()
        .skip(skip)
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

impl std::fmt::Debug for QueryExecutor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("view", &self.view.name())
            .finish()
    }
}
