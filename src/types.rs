//! Core types for pbdb-ingest

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single occurrence record as returned by the PBDB API
///
/// Records are opaque: no field is interpreted or validated.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Query parameter name reserved for the page size
pub const LIMIT_PARAM: &str = "limit";

/// Query parameter name reserved for the zero-based row offset
pub const OFFSET_PARAM: &str = "offset";

/// Scalar value of a PBDB query parameter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// Integer parameter (e.g., `min_ma=66`)
    Int(i64),
    /// Unsigned integer parameter too large for `Int` (row offsets)
    UInt(u64),
    /// Boolean parameter, sent as `true`/`false`
    Bool(bool),
    /// String parameter (e.g., `base_name=Dinosauria`)
    Str(String),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Int(v) => write!(f, "{v}"),
            FilterValue::UInt(v) => write!(f, "{v}"),
            FilterValue::Bool(v) => write!(f, "{v}"),
            FilterValue::Str(v) => f.write_str(v),
        }
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        FilterValue::Int(v)
    }
}

impl From<u64> for FilterValue {
    fn from(v: u64) -> Self {
        FilterValue::UInt(v)
    }
}

impl From<u32> for FilterValue {
    fn from(v: u32) -> Self {
        FilterValue::Int(i64::from(v))
    }
}

impl From<i32> for FilterValue {
    fn from(v: i32) -> Self {
        FilterValue::Int(i64::from(v))
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        FilterValue::Bool(v)
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        FilterValue::Str(v.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        FilterValue::Str(v)
    }
}

/// Caller-supplied PBDB filters
///
/// PBDB rejects occurrence queries without at least one filter it recognizes;
/// that is enforced by the API, not here. The pagination keys `limit` and
/// `offset` are owned by the fetcher and cannot be set as filters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Filters(BTreeMap<String, FilterValue>);

impl Filters {
    /// Create an empty filter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a filter
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `name` is one of the reserved pagination keys.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FilterValue>) -> Result<()> {
        let name = name.into();
        if is_reserved(&name) {
            return Err(Error::config(
                format!("'{name}' is reserved for pagination and cannot be used as a filter"),
                name,
            ));
        }
        self.0.insert(name, value.into());
        Ok(())
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FilterValue>) -> Result<Self> {
        self.insert(name, value)?;
        Ok(self)
    }

    /// Look up a filter value
    pub fn get(&self, name: &str) -> Option<&FilterValue> {
        self.0.get(name)
    }

    /// Number of filters
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no filters are set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over filters in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<'de> Deserialize<'de> for Filters {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = BTreeMap::<String, FilterValue>::deserialize(deserializer)?;
        let mut filters = Filters::new();
        for (name, value) in raw {
            filters.insert(name, value).map_err(serde::de::Error::custom)?;
        }
        Ok(filters)
    }
}

fn is_reserved(name: &str) -> bool {
    name == LIMIT_PARAM || name == OFFSET_PARAM
}

/// The full set of query parameters sent with one PBDB request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryParams(BTreeMap<String, FilterValue>);

impl QueryParams {
    /// Merge the pagination pair with the caller's filters
    pub fn new(limit: u32, offset: u64, filters: &Filters) -> Self {
        let mut params = BTreeMap::new();
        params.insert(LIMIT_PARAM.to_string(), FilterValue::from(limit));
        params.insert(OFFSET_PARAM.to_string(), FilterValue::from(offset));
        for (name, value) in filters.iter() {
            params.insert(name.to_string(), value.clone());
        }
        Self(params)
    }

    /// Look up a parameter value
    pub fn get(&self, name: &str) -> Option<&FilterValue> {
        self.0.get(name)
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no parameters
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render as `(name, value)` string pairs for the request query string
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }
}

impl FromIterator<(String, FilterValue)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (String, FilterValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Identifies a BigQuery dataset
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetHandle {
    /// GCP project identifier
    pub project_id: String,
    /// Dataset name within the project
    pub dataset_id: String,
    /// Storage location (region code, e.g. "US")
    pub location: String,
}

impl DatasetHandle {
    /// Create a new dataset handle
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            location: location.into(),
        }
    }

    /// Target a table within this dataset
    pub fn table(&self, table_id: impl Into<String>) -> TableTarget {
        TableTarget {
            dataset: self.clone(),
            table_id: table_id.into(),
        }
    }
}

impl fmt::Display for DatasetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.project_id, self.dataset_id)
    }
}

/// A table within a dataset
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableTarget {
    /// Dataset containing the table
    pub dataset: DatasetHandle,
    /// Table name
    pub table_id: String,
}

impl fmt::Display for TableTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table_id)
    }
}

/// How a load treats rows already present in the destination table
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Add rows to the table (default)
    #[default]
    Append,
    /// Replace every existing row
    Truncate,
    /// Fail unless the table is empty
    Empty,
}

impl WriteMode {
    /// BigQuery `writeDisposition` value
    pub fn as_disposition(&self) -> &'static str {
        match self {
            WriteMode::Append => "WRITE_APPEND",
            WriteMode::Truncate => "WRITE_TRUNCATE",
            WriteMode::Empty => "WRITE_EMPTY",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_disposition())
    }
}

impl std::str::FromStr for WriteMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase();
        match normalized.strip_prefix("WRITE_").unwrap_or(&normalized) {
            "APPEND" => Ok(WriteMode::Append),
            "TRUNCATE" => Ok(WriteMode::Truncate),
            "EMPTY" => Ok(WriteMode::Empty),
            _ => Err(Error::config(
                format!("unknown write mode '{s}' (expected append, truncate, or empty)"),
                "write_mode",
            )),
        }
    }
}

/// One page of PBDB results
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Page {
    /// Records on this page, in API order
    pub records: Vec<Record>,
    /// Non-fatal warnings the API attached to the response
    pub warnings: Vec<String>,
    /// Total matching rows, when the API reports it (`rowcount` requests)
    pub records_found: Option<u64>,
}

/// Outcome of a single batch load
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The batch was empty, nothing was sent to the warehouse
    Skipped,
    /// The load job completed
    Loaded {
        /// Number of rows submitted
        rows: usize,
        /// BigQuery job identifier
        job_id: String,
    },
}

impl LoadOutcome {
    /// Number of rows written by this load
    pub fn rows(&self) -> usize {
        match self {
            LoadOutcome::Skipped => 0,
            LoadOutcome::Loaded { rows, .. } => *rows,
        }
    }
}

/// Parameters of one fetch-then-load round trip
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunRequest {
    /// Destination table name within the pipeline's dataset
    pub table_id: String,
    /// Page size
    pub limit: u32,
    /// Zero-based row offset
    pub offset: u64,
    /// Write mode for the load
    pub write_mode: WriteMode,
    /// PBDB filters
    pub filters: Filters,
}

impl RunRequest {
    /// Create a request for the first page of `table_id` with default paging
    pub fn new(table_id: impl Into<String>, filters: Filters) -> Self {
        Self {
            table_id: table_id.into(),
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
            write_mode: WriteMode::default(),
            filters,
        }
    }

    /// Set the page size
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Set the row offset
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Set the write mode
    pub fn write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }
}

/// Default number of records requested per page
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Default destination table for occurrence records
pub const DEFAULT_TABLE: &str = "occurrences";

/// Result of one `run_once` call
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    /// Destination table
    pub table: TableTarget,
    /// Offset that was fetched
    pub offset: u64,
    /// Records returned by the API
    pub fetched: usize,
    /// What the loader did with them
    pub load: LoadOutcome,
}

/// Result of walking the corpus page by page
#[must_use]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraversalSummary {
    /// Number of pages fetched (including the final empty page)
    pub pages: u32,
    /// Total rows loaded across all pages
    pub rows_loaded: usize,
    /// Offset the next traversal should start from
    pub next_offset: u64,
    /// Whether the traversal ended on an empty page
    pub exhausted: bool,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_params_merge_pagination_and_filters() {
        let filters = Filters::new().with("a", 1).unwrap().with("b", 2).unwrap();

        let params = QueryParams::new(50, 100, &filters);

        let expected: QueryParams = [
            ("limit".to_string(), FilterValue::Int(50)),
            ("offset".to_string(), FilterValue::UInt(100)),
            ("a".to_string(), FilterValue::Int(1)),
            ("b".to_string(), FilterValue::Int(2)),
        ]
        .into_iter()
        .collect();
        assert_eq!(params, expected);
    }

    #[test]
    fn filters_reject_reserved_pagination_keys() {
        let mut filters = Filters::new();
        for key in ["limit", "offset"] {
            match filters.insert(key, 5) {
                Err(Error::Config { key: Some(k), .. }) => assert_eq!(k, key),
                other => panic!("expected reserved-key error for {key}, got {other:?}"),
            }
        }
        assert!(filters.is_empty());
    }

    #[test]
    fn filters_deserialize_rejects_reserved_keys() {
        let ok: Filters = serde_json::from_str(r#"{"base_name":"Dinosauria","min_ma":66}"#).unwrap();
        assert_eq!(ok.get("base_name"), Some(&FilterValue::Str("Dinosauria".into())));
        assert_eq!(ok.get("min_ma"), Some(&FilterValue::Int(66)));

        let err = serde_json::from_str::<Filters>(r#"{"offset":3}"#).unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn query_pairs_render_scalars_as_text() {
        let filters = Filters::new()
            .with("base_name", "Canis")
            .unwrap()
            .with("show", "coords")
            .unwrap()
            .with("rowcount", true)
            .unwrap();

        let pairs = QueryParams::new(10, 0, &filters).to_pairs();

        assert!(pairs.contains(&("limit".into(), "10".into())));
        assert!(pairs.contains(&("offset".into(), "0".into())));
        assert!(pairs.contains(&("base_name".into(), "Canis".into())));
        assert!(pairs.contains(&("rowcount".into(), "true".into())));
        assert_eq!(pairs.len(), 5);
    }

    #[test]
    fn offset_is_sent_exactly_even_past_i64_range() {
        let pairs = QueryParams::new(10, u64::MAX, &Filters::new()).to_pairs();
        assert!(pairs.contains(&("offset".into(), u64::MAX.to_string())));
    }

    #[test]
    fn write_mode_parses_both_spellings() {
        assert_eq!("append".parse::<WriteMode>().unwrap(), WriteMode::Append);
        assert_eq!("WRITE_TRUNCATE".parse::<WriteMode>().unwrap(), WriteMode::Truncate);
        assert_eq!(" Empty ".parse::<WriteMode>().unwrap(), WriteMode::Empty);
        assert!("overwrite".parse::<WriteMode>().is_err());
    }

    #[test]
    fn write_mode_maps_to_dispositions() {
        assert_eq!(WriteMode::default(), WriteMode::Append);
        assert_eq!(WriteMode::Append.as_disposition(), "WRITE_APPEND");
        assert_eq!(WriteMode::Truncate.as_disposition(), "WRITE_TRUNCATE");
        assert_eq!(WriteMode::Empty.as_disposition(), "WRITE_EMPTY");
    }

    #[test]
    fn table_target_displays_fully_qualified_name() {
        let table = DatasetHandle::new("proj", "pbdb_raw", "US").table("occurrences");
        assert_eq!(table.to_string(), "proj.pbdb_raw.occurrences");
    }

    #[test]
    fn load_outcome_row_counts() {
        assert_eq!(LoadOutcome::Skipped.rows(), 0);
        let loaded = LoadOutcome::Loaded {
            rows: 7,
            job_id: "j".into(),
        };
        assert_eq!(loaded.rows(), 7);
    }
}
