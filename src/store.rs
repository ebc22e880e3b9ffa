//! Paging over result sets.
//!
//! The store asks a [`ResultFetcher`] for one page of raw rows at a time,
//! formats them and stamps each row with `__hpcc_rowNum` and `__hpcc_id`.
//! Schemas are fetched once per result set and kept in a shared cache.

use std::sync::Arc;

use dashmap::DashMap;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cell::CellValue;
use crate::config::{FormatterSettings, StoreSettings};
use crate::error::Result;
use crate::formatter::{format_rows_par, FormattedRow, FormattedValue};
use crate::schema::{flatten, FlattenedColumn, SchemaNode, ROW_NUMBER_FIELD};

pub const ROW_ID_FIELD: &str = "__hpcc_id";

/// `i64::MAX` after a trip through a double.
pub const TOTAL_OVERFLOW_SENTINEL: f64 = 9_223_372_036_854_776_000.0;
pub const UNKNOWN_TOTAL_LOOKAHEAD: u64 = 1000;

/// Replaces "unknown" totals with an open-ended guess a little past the
/// current page, so a pager keeps offering the next page.
pub fn corrected_total(start: u64, count: u64, total: f64) -> u64 {
    if total == -1.0 || total == TOTAL_OVERFLOW_SENTINEL || total == f64::MAX {
        start.saturating_add(count).saturating_add(UNKNOWN_TOTAL_LOOKAHEAD)
    } else if total <= 0.0 || total.is_nan() {
        0
    } else {
        total as u64
    }
}

/// Identifies one result set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultSource {
    Workunit { wuid: String, sequence: u32 },
    LogicalFile { name: String, cluster: Option<String> },
}

impl ResultSource {
    pub fn id_prefix(&self) -> String {
        match self {
            ResultSource::Workunit { wuid, sequence } => format!("{wuid}_{sequence}"),
            ResultSource::LogicalFile { name, cluster: Some(cluster) } => format!("{name}_{cluster}"),
            ResultSource::LogicalFile { name, cluster: None } => name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRequest {
    pub source: ResultSource,
    pub start: u64,
    pub count: u64,
    pub filter_by: Vec<(String, String)>,
    pub include_xml_schema: bool,
}

impl ResultRequest {
    pub fn new(source: ResultSource, start: u64, count: u64) -> Self {
        Self {
            source,
            start,
            count,
            filter_by: Vec::new(),
            include_xml_schema: false,
        }
    }

    pub fn with_filter(mut self, filter_by: Vec<(String, String)>) -> Self {
        self.filter_by = filter_by;
        self
    }

    /// Request parameters in the form the result service expects.
    /// `FilterBy` pairs are flattened into indexed `NamedValue` entries.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        match &self.source {
            ResultSource::Workunit { wuid, sequence } => {
                params.push(("Wuid".to_string(), wuid.clone()));
                params.push(("Sequence".to_string(), sequence.to_string()));
            }
            ResultSource::LogicalFile { name, cluster } => {
                params.push(("LogicalName".to_string(), name.clone()));
                if let Some(cluster) = cluster {
                    params.push(("Cluster".to_string(), cluster.clone()));
                }
            }
        }
        params.push(("Start".to_string(), self.start.to_string()));
        params.push(("Count".to_string(), self.count.to_string()));
        params.push((
            "SuppressXmlSchema".to_string(),
            (!self.include_xml_schema).to_string(),
        ));
        if !self.filter_by.is_empty() {
            for (i, (name, value)) in self.filter_by.iter().enumerate() {
                params.push((format!("FilterBy.NamedValue.{i}.Name"), name.clone()));
                params.push((format!("FilterBy.NamedValue.{i}.Value"), value.clone()));
            }
            params.push((
                "FilterBy.NamedValue.itemcount".to_string(),
                self.filter_by.len().to_string(),
            ));
        }
        params
    }
}

/// What the result service returned for one request, before any correction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResultPage {
    pub start: u64,
    pub count: u64,
    pub total: f64,
    pub rows: Vec<CellValue>,
}

/// The service client. Implementations do the network work.
pub trait ResultFetcher: Send + Sync {
    fn fetch_schema(&self, source: &ResultSource) -> Result<SchemaNode>;
    fn fetch_rows(&self, request: &ResultRequest) -> Result<RawResultPage>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultPage {
    pub start: u64,
    pub total: u64,
    pub rows: Vec<FormattedRow>,
}

/// Flattened columns per result set, shared across stores and threads.
#[derive(Debug, Default)]
pub struct SchemaCache {
    entries: DashMap<ResultSource, Arc<Vec<FlattenedColumn>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source: &ResultSource) -> Option<Arc<Vec<FlattenedColumn>>> {
        self.entries.get(source).map(|e| Arc::clone(e.value()))
    }

    pub fn get_or_try_insert<F>(&self, source: &ResultSource, load: F) -> Result<Arc<Vec<FlattenedColumn>>>
    where
        F: FnOnce() -> Result<Vec<FlattenedColumn>>,
    {
        if let Some(hit) = self.get(source) {
            return Ok(hit);
        }
        let columns = Arc::new(load()?);
        let entry = self.entries.entry(source.clone()).or_insert(columns);
        Ok(Arc::clone(entry.value()))
    }

    pub fn invalidate(&self, source: &ResultSource) {
        self.entries.remove(source);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Stamps row numbers and ids: `rowNum = start + index + 1`, `id = prefix_rowNum`.
pub fn assign_row_ids(rows: &mut [FormattedRow], id_prefix: &str, start: u64) {
    for (index, row) in rows.iter_mut().enumerate() {
        let row_num = start + index as u64 + 1;
        row.set(ROW_NUMBER_FIELD, FormattedValue::Number(row_num as f64));
        row.set(ROW_ID_FIELD, FormattedValue::Text(format!("{id_prefix}_{row_num}")));
    }
}

pub struct ResultStore<F: ResultFetcher> {
    source: ResultSource,
    fetcher: Arc<F>,
    cache: Arc<SchemaCache>,
    formatter: FormatterSettings,
    page_size: u64,
    pool: Option<ThreadPool>,
}

impl<F: ResultFetcher> ResultStore<F> {
    pub fn new(source: ResultSource, fetcher: Arc<F>, cache: Arc<SchemaCache>) -> Self {
        Self {
            source,
            fetcher,
            cache,
            formatter: FormatterSettings::default(),
            page_size: StoreSettings::default().page_size,
            pool: None,
        }
    }

    /// Applies store and formatter settings, building a dedicated rayon pool
    /// when a thread count is configured.
    pub fn with_settings(mut self, store: &StoreSettings, formatter: &FormatterSettings) -> Result<Self> {
        self.page_size = store.page_size;
        self.formatter = formatter.clone();
        if let Some(threads) = store.threads {
            self.pool = Some(ThreadPoolBuilder::new().num_threads(threads).build()?);
        }
        Ok(self)
    }

    pub fn source(&self) -> &ResultSource {
        &self.source
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn id_prefix(&self) -> String {
        self.source.id_prefix()
    }

    /// Grid columns for this result set, `##` first.
    pub fn structure(&self) -> Result<Arc<Vec<FlattenedColumn>>> {
        self.cache.get_or_try_insert(&self.source, || {
            debug!(source = ?self.source, "fetching result schema");
            let schema = self.fetcher.fetch_schema(&self.source)?;
            Ok(flatten(&schema))
        })
    }

    pub fn page(&self, start: u64, count: u64) -> Result<ResultPage> {
        self.query(ResultRequest::new(self.source.clone(), start, count))
    }

    /// Page number is 1-based, sized by the configured page size.
    pub fn page_number(&self, page: u64) -> Result<ResultPage> {
        let start = page.saturating_sub(1).saturating_mul(self.page_size);
        self.page(start, self.page_size)
    }

    pub fn query(&self, request: ResultRequest) -> Result<ResultPage> {
        let columns = self.structure()?;
        let raw = self.fetcher.fetch_rows(&request)?;
        let total = corrected_total(raw.start, raw.count, raw.total);

        let mut rows = match &self.pool {
            Some(pool) => pool.install(|| format_rows_par(&columns, &raw.rows, &self.formatter)),
            None => format_rows_par(&columns, &raw.rows, &self.formatter),
        };
        assign_row_ids(&mut rows, &self.id_prefix(), request.start);

        debug!(start = request.start, rows = rows.len(), total, "formatted result page");
        Ok(ResultPage {
            start: request.start,
            total,
            rows,
        })
    }

    /// Reads one row to learn the total, then fetches everything up to it.
    pub fn fetch_all(&self) -> Result<Vec<FormattedRow>> {
        let probe = self.page(0, 1)?;
        info!(source = ?self.source, total = probe.total, "fetching full result");
        Ok(self.page(0, probe.total)?.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_totals_become_open_ended() {
        assert_eq!(corrected_total(100, 50, -1.0), 1150);
        assert_eq!(corrected_total(100, 50, f64::MAX), 1150);
        assert_eq!(corrected_total(100, 50, 9223372036854776000.0), 1150);
        assert_eq!(corrected_total(100, 50, 420.0), 420);
        assert_eq!(corrected_total(0, 10, 0.0), 0);
    }

    #[test]
    fn sentinel_correction_saturates_near_the_top_of_the_range() {
        assert_eq!(corrected_total(u64::MAX - 10, 50, -1.0), u64::MAX);
        assert_eq!(corrected_total(u64::MAX, u64::MAX, f64::MAX), u64::MAX);
    }

    #[test]
    fn id_prefix_follows_the_source() {
        let wu = ResultSource::Workunit { wuid: "W20240101-000001".into(), sequence: 2 };
        assert_eq!(wu.id_prefix(), "W20240101-000001_2");
        let file = ResultSource::LogicalFile { name: "~a::b".into(), cluster: Some("thor".into()) };
        assert_eq!(file.id_prefix(), "~a::b_thor");
        let bare = ResultSource::LogicalFile { name: "~a::b".into(), cluster: None };
        assert_eq!(bare.id_prefix(), "~a::b");
    }

    #[test]
    fn filter_by_is_flattened_into_named_values() {
        let request = ResultRequest::new(ResultSource::LogicalFile { name: "f".into(), cluster: None }, 0, 10)
            .with_filter(vec![("Name".into(), "A".into()), ("Id".into(), "7".into())]);
        let params = request.to_params();
        let get = |k: &str| params.iter().find(|(p, _)| p == k).map(|(_, v)| v.as_str());
        assert_eq!(get("LogicalName"), Some("f"));
        assert_eq!(get("Cluster"), None);
        assert_eq!(get("SuppressXmlSchema"), Some("true"));
        assert_eq!(get("FilterBy.NamedValue.0.Name"), Some("Name"));
        assert_eq!(get("FilterBy.NamedValue.1.Value"), Some("7"));
        assert_eq!(get("FilterBy.NamedValue.itemcount"), Some("2"));
    }

    #[test]
    fn row_ids_continue_from_start() {
        let mut rows = vec![FormattedRow::default(), FormattedRow::default()];
        assign_row_ids(&mut rows, "W1_0", 100);
        assert_eq!(rows[0].get(ROW_NUMBER_FIELD), Some(&FormattedValue::Number(101.0)));
        assert_eq!(rows[1].text(ROW_ID_FIELD), "W1_0_102");
    }
}
