//! Entity access control.
//!
//! Row visibility is driven by the row's `granted` state; field visibility by
//! the optional per-field `grant`. Both are re-checked for every row the
//! loader touches, related rows included.

use tracing::{debug, trace};

use crate::ast::{Action, FieldConfig};
use crate::catalog::Catalog;
use crate::roles::UserContext;
use crate::store::Filter;
use crate::value::{GRANTED, ID, LABEL, OWNER_ID, Row, TABLE, Value};

pub const PUBLISHED_PREFIX: &str = "published @";

/// Publication state of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granted<'a> {
    /// Empty or absent: readable by anyone.
    Public,
    /// Owner only.
    Draft,
    /// Anyone with table-level read.
    Shared,
    /// Holders of the named role.
    Published(&'a str),
    /// Outside the vocabulary, or not a string at all; never readable.
    Unrecognized,
}

impl<'a> Granted<'a> {
    /// State of `row`. Absent and null are public; any non-text value is
    /// unrecognized.
    pub fn of(row: &'a Row) -> Self {
        match row.granted() {
            None => Self::Public,
            Some(Value::Text(raw)) => Self::parse(raw),
            Some(_) => Self::Unrecognized,
        }
    }

    pub fn parse(raw: &'a str) -> Self {
        let raw = raw.trim();
        match raw {
            "" => Self::Public,
            "draft" => Self::Draft,
            "shared" => Self::Shared,
            _ => match raw.strip_prefix(PUBLISHED_PREFIX).map(str::trim) {
                Some(role) if !role.is_empty() => Self::Published(role),
                _ => Self::Unrecognized,
            },
        }
    }
}

/// Fields without a `grant` are readable; otherwise one of the user's roles
/// needs `read`.
pub fn can_read_field(ctx: &UserContext, field: &FieldConfig) -> bool {
    field
        .grant
        .as_ref()
        .is_none_or(|grant| ctx.is_granted(grant, Action::Read))
}

/// Access decisions for one user against one catalog.
pub struct AccessControl<'a> {
    catalog: &'a Catalog,
    ctx: &'a UserContext,
}

impl<'a> AccessControl<'a> {
    pub fn new(catalog: &'a Catalog, ctx: &'a UserContext) -> Self {
        Self { catalog, ctx }
    }

    pub fn context(&self) -> &UserContext {
        self.ctx
    }

    /// Row-level security. Table-level read is the caller's responsibility.
    pub fn can_access_entity(&self, table: &str, row: &Row) -> bool {
        let allowed = match Granted::of(row) {
            Granted::Public | Granted::Shared => true,
            Granted::Draft => match (row.owner_id(), self.ctx.id()) {
                (Some(owner), Some(user)) => owner == user,
                _ => false,
            },
            Granted::Published(role) => self.ctx.has_role(role),
            Granted::Unrecognized => {
                debug!(table, id = ?row.id(), granted = ?row.granted(), "unrecognized granted state");
                false
            }
        };

        if !allowed {
            trace!(table, id = ?row.id(), granted = ?row.granted(), "row hidden");
        }
        allowed
    }

    /// Copy of `row` without the fields the user may not read.
    pub fn filter_entity_fields(&self, table: &str, row: &Row) -> Row {
        let mut filtered = row.clone();
        filtered.retain(|field| self.catalog.can_read_field(self.ctx, table, field));
        filtered
    }

    /// Reference form of an already-filtered entity: id, display fields,
    /// label and source table.
    pub fn compact_relation(&self, table: &str, entity: &Row) -> Row {
        let mut compact = Row::new();
        if let Some(id) = entity.get(ID) {
            compact.insert(ID, id.clone());
        }
        for field in self.catalog.display_fields(table) {
            if let Some(value) = entity.get(field) {
                compact.insert(field.as_str(), value.clone());
            }
        }
        let label = match entity.get(LABEL) {
            Some(label) => label.clone(),
            None => Value::from(self.catalog.label(table, entity)),
        };
        compact.insert(LABEL, label);
        compact.insert(TABLE, table);
        compact
    }

    /// Coarse bulk pre-filter: owned rows, shared rows, rows whose state names
    /// one of the user's roles, any published row, and public rows.
    ///
    /// This is a superset of what [`Self::can_access_entity`] approves (the
    /// published branch matches every role), so every row it yields must still
    /// pass the exact check.
    pub fn build_where_clause(&self, custom: Option<Filter>) -> Filter {
        let mut branches = Vec::new();

        if let (Some(id), Some(_)) = (&self.ctx.user().id, self.ctx.id()) {
            branches.push(Filter::Eq(OWNER_ID.to_string(), id.clone()));
        }
        branches.push(Filter::Eq(GRANTED.to_string(), Value::from("shared")));
        branches.push(Filter::In(
            GRANTED.to_string(),
            self.ctx.role_names().map(Value::from).collect(),
        ));
        branches.push(Filter::StartsWith(
            GRANTED.to_string(),
            PUBLISHED_PREFIX.to_string(),
        ));
        branches.push(Filter::Empty(GRANTED.to_string()));

        let coarse = Filter::Or(branches);
        match custom {
            Some(filter) => coarse.and(filter),
            None => coarse,
        }
    }
}
