//! Row source the resolver reads from.
//!
//! The resolver owns no connection lifecycle; it only needs the four reads of
//! [`RowStore`]. [`MemoryStore`] is the in-process implementation used by the
//! CLI, the WASM binding and the tests.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ast::{SortOrder, SortSpec};
use crate::value::{Row, Value};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid row fixture: {0}")]
    Fixture(#[from] serde_json::Error),
    #[error("Row store failure: {0}")]
    Backend(String),
}

/// Filter fragment passed to bulk reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Filter {
    All,
    Eq(String, Value),
    In(String, Vec<Value>),
    StartsWith(String, String),
    /// Absent, null, or empty string.
    Empty(String),
    /// Case-insensitive substring match on the scalar rendering.
    Contains(String, String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    /// A filter no row satisfies.
    pub fn nothing() -> Self {
        Self::Or(Vec::new())
    }

    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Self::All, f) | (f, Self::All) => f,
            (Self::And(mut items), f) => {
                items.push(f);
                Self::And(items)
            }
            (a, b) => Self::And(vec![a, b]),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::All => true,
            Self::Eq(field, expected) => row.get(field).is_some_and(|v| same_value(v, expected)),
            Self::In(field, options) => row
                .get(field)
                .is_some_and(|v| options.iter().any(|o| same_value(v, o))),
            Self::StartsWith(field, prefix) => row
                .get(field)
                .and_then(Value::as_text)
                .is_some_and(|s| s.starts_with(prefix.as_str())),
            Self::Empty(field) => row.get(field).is_none_or(Value::is_empty),
            Self::Contains(field, needle) => {
                let needle = needle.to_lowercase();
                row.get(field)
                    .and_then(Value::display)
                    .is_some_and(|s| s.to_lowercase().contains(&needle))
            }
            Self::And(items) => items.iter().all(|f| f.matches(row)),
            Self::Or(items) => items.iter().any(|f| f.matches(row)),
        }
    }

    /// Every field name the filter reads.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Self::All => Vec::new(),
            Self::Eq(field, _)
            | Self::In(field, _)
            | Self::StartsWith(field, _)
            | Self::Empty(field)
            | Self::Contains(field, _) => vec![field.as_str()],
            Self::And(items) | Self::Or(items) => items.iter().flat_map(Filter::fields).collect(),
        }
    }
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a.as_key(), b.as_key()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Page {
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Page {
    pub fn unbounded() -> Self {
        Self::default()
    }
}

pub trait RowStore {
    /// Rows of `table` matching `filter`, sorted, then paged.
    fn select(
        &self,
        table: &str,
        filter: &Filter,
        sort: Option<&SortSpec>,
        page: Page,
    ) -> Result<Vec<Row>, StoreError>;

    fn select_by_id(&self, table: &str, id: &Value) -> Result<Option<Row>, StoreError>;

    /// Rows whose `field` equals `value`.
    fn select_by_foreign_key(
        &self,
        table: &str,
        field: &str,
        value: &Value,
        sort: Option<&SortSpec>,
    ) -> Result<Vec<Row>, StoreError>;

    fn count(&self, table: &str, filter: &Filter) -> Result<usize, StoreError>;
}

/// Table name -> rows, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: IndexMap<String, Vec<Row>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a `{ "Table": [ {row}, ... ] }` fixture.
    pub fn from_json(input: &str) -> Result<Self, StoreError> {
        let tables: IndexMap<String, Vec<Row>> = serde_json::from_str(input)?;
        Ok(Self { tables })
    }

    pub fn insert(&mut self, table: &str, row: Row) {
        self.tables.entry(table.to_string()).or_default().push(row);
    }

    fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn sort_rows(rows: &mut [Row], sort: Option<&SortSpec>) {
    let Some(sort) = sort else { return };
    rows.sort_by(|a, b| {
        let left = a.get(&sort.field).unwrap_or(&Value::Null);
        let right = b.get(&sort.field).unwrap_or(&Value::Null);
        match sort.order {
            SortOrder::Asc => left.sort_cmp(right),
            SortOrder::Desc => right.sort_cmp(left),
        }
    });
}

impl RowStore for MemoryStore {
    fn select(
        &self,
        table: &str,
        filter: &Filter,
        sort: Option<&SortSpec>,
        page: Page,
    ) -> Result<Vec<Row>, StoreError> {
        let mut rows: Vec<Row> = self
            .rows(table)
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        sort_rows(&mut rows, sort);

        let rows = rows.into_iter().skip(page.offset);
        Ok(match page.limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        })
    }

    fn select_by_id(&self, table: &str, id: &Value) -> Result<Option<Row>, StoreError> {
        let Some(key) = id.as_key() else {
            return Ok(None);
        };
        Ok(self
            .rows(table)
            .iter()
            .find(|row| row.id().as_deref() == Some(key.as_str()))
            .cloned())
    }

    fn select_by_foreign_key(
        &self,
        table: &str,
        field: &str,
        value: &Value,
        sort: Option<&SortSpec>,
    ) -> Result<Vec<Row>, StoreError> {
        let filter = Filter::Eq(field.to_string(), value.clone());
        self.select(table, &filter, sort, Page::unbounded())
    }

    fn count(&self, table: &str, filter: &Filter) -> Result<usize, StoreError> {
        Ok(self.rows(table).iter().filter(|row| filter.matches(row)).count())
    }
}
