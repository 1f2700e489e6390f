//! Relational data loader.
//!
//! Resolves one `(user, table, options)` request into authorized rows. Every
//! row touched, whether top-level, many-to-one, one-to-many or nested, goes
//! through the same pipeline: row check, field filter, label, expansion, strip.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::access::AccessControl;
use crate::ast::{SortOrder, SortSpec, Strength};
use crate::catalog::{Catalog, RelationDescriptor, Structure};
use crate::error::{ErrorResponse, ResolveError};
use crate::roles::User;
use crate::store::{Filter, Page, RowStore};
use crate::value::{CREATED_AT, GRANTED, ID, LABEL, NESTED, OWNER_ID, Row, UPDATED_AT, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoadOptions {
    /// Load a single row instead of a page.
    pub id: Option<Value>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub order_by: Option<String>,
    pub order: Option<SortOrder>,
    /// Extra caller filter, combined with the row-security pre-filter.
    pub filter: Option<Filter>,
    /// Case-insensitive substring over the table's search fields.
    pub search: Option<String>,
    /// `all`, a comma-separated list of relation names, or unset for the default set.
    pub relation: Option<String>,
    /// Embed many-to-one relations by reference.
    pub compact: bool,
    /// Overrides `ResolverConfig::nested_relations`.
    pub nested: Option<bool>,
    pub strip_system: bool,
    /// Drop `id` from every emitted row, compact references included.
    pub strip_id: bool,
    pub include_schema: bool,
}

/// Which relations a request expands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationSelection {
    /// Every many-to-one plus strong one-to-many relations.
    Default,
    All,
    Named(Vec<String>),
}

impl RelationSelection {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => Self::Default,
            Some(all) if all.eq_ignore_ascii_case("all") => Self::All,
            Some(list) => Self::Named(
                list.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
        }
    }

    fn many_to_one(&self, name: &str) -> bool {
        match self {
            Self::Default | Self::All => true,
            Self::Named(names) => names.iter().any(|n| n == name),
        }
    }

    fn one_to_many(&self, name: &str, strength: Strength) -> bool {
        match self {
            Self::Default => strength == Strength::Strong,
            Self::All => true,
            Self::Named(names) => names.iter().any(|n| n == name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    /// Authorized matches, ignoring paging.
    pub total: usize,
    pub count: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableData {
    pub success: bool,
    pub table: String,
    pub rows: Vec<Row>,
    pub pagination: Pagination,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Structure>,
}

/// Request envelope used by the CLI and the WASM binding.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    #[serde(default)]
    pub user: User,
    pub table: String,
    #[serde(default)]
    pub options: LoadOptions,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok(TableData),
    Err(ErrorResponse),
}

impl Response {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

impl From<Result<TableData, ResolveError>> for Response {
    fn from(result: Result<TableData, ResolveError>) -> Self {
        match result {
            Ok(data) => Self::Ok(data),
            Err(err) => Self::Err(err.to_response()),
        }
    }
}

pub struct Resolver<'a, S: RowStore + ?Sized> {
    catalog: &'a Catalog,
    store: &'a S,
}

impl<'a, S: RowStore + ?Sized> Resolver<'a, S> {
    pub fn new(catalog: &'a Catalog, store: &'a S) -> Self {
        Self { catalog, store }
    }

    pub fn respond(&self, request: &Request) -> Response {
        self.get_table_data(&request.user, &request.table, &request.options)
            .into()
    }

    pub fn get_table_data(
        &self,
        user: &User,
        table: &str,
        options: &LoadOptions,
    ) -> Result<TableData, ResolveError> {
        let ctx = self.catalog.user_context(user);
        let structure = self.catalog.build_structure(&ctx, table)?;
        let table = structure.table.as_str();

        debug!(table, user = ?ctx.id(), roles = ?ctx.roles(), "loading table data");

        let loader = RowLoader {
            catalog: self.catalog,
            store: self.store,
            access: AccessControl::new(self.catalog, &ctx),
            options,
            selection: RelationSelection::parse(options.relation.as_deref()),
            nested: options
                .nested
                .unwrap_or(self.catalog.config().nested_relations),
        };

        let limit = self
            .catalog
            .config()
            .page_limit(options.limit, Some(structure.page_size));

        let (accepted, total, offset) = match &options.id {
            Some(id) => {
                let accepted: Vec<Row> = self
                    .store
                    .select_by_id(table, id)?
                    .into_iter()
                    .filter(|row| loader.access.can_access_entity(table, row))
                    .collect();
                let total = accepted.len();
                (accepted, total, 0)
            }
            None => {
                let filter = loader
                    .access
                    .build_where_clause(custom_filter(&structure, options));
                let sort = effective_sort(&structure, options);

                if self.store.count(table, &filter)? == 0 {
                    (Vec::new(), 0, options.offset)
                } else {
                    // Paging happens after the exact row check so `total` and
                    // page boundaries only ever count visible rows.
                    let candidates =
                        self.store
                            .select(table, &filter, sort.as_ref(), Page::unbounded())?;
                    let candidate_count = candidates.len();
                    let visible: Vec<Row> = candidates
                        .into_iter()
                        .filter(|row| loader.access.can_access_entity(table, row))
                        .collect();
                    debug!(table, candidates = candidate_count, visible = visible.len(), "rows authorized");

                    let total = visible.len();
                    let page = visible.into_iter().skip(options.offset).take(limit).collect();
                    (page, total, options.offset)
                }
            }
        };

        let rows = accepted
            .iter()
            .map(|row| loader.load_row(&structure, row))
            .collect::<Result<Vec<Row>, ResolveError>>()?;

        Ok(TableData {
            success: true,
            table: table.to_string(),
            pagination: Pagination {
                total,
                count: rows.len(),
                limit,
                offset,
            },
            rows,
            schema: options.include_schema.then(|| structure.clone()),
        })
    }
}

/// Caller filter and search, restricted to fields the user can read.
fn custom_filter(structure: &Structure, options: &LoadOptions) -> Option<Filter> {
    let mut combined: Option<Filter> = None;

    if let Some(filter) = &options.filter {
        let fields = filter.fields();
        let filter = match fields.iter().find(|f| !structure.can_read(f)) {
            Some(field) => {
                debug!(table = %structure.table, field, "filter on unreadable field");
                Filter::nothing()
            }
            None => filter.clone(),
        };
        combined = Some(filter);
    }

    if let Some(term) = options.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let search = Filter::Or(
            structure
                .search_fields
                .iter()
                .map(|field| Filter::Contains(field.clone(), term.to_string()))
                .collect(),
        );
        combined = Some(match combined {
            Some(filter) => filter.and(search),
            None => search,
        });
    }

    combined
}

/// Requested sort when the user can read the column, else the table default.
fn effective_sort(structure: &Structure, options: &LoadOptions) -> Option<SortSpec> {
    match &options.order_by {
        Some(field) if structure.can_read(field) => Some(SortSpec {
            field: field.clone(),
            order: options.order.unwrap_or_default(),
        }),
        Some(field) => {
            debug!(table = %structure.table, field = %field, "orderBy not readable, using default sort");
            structure.default_sort.clone()
        }
        None => structure.default_sort.clone().map(|mut sort| {
            if let Some(order) = options.order {
                sort.order = order;
            }
            sort
        }),
    }
}

/// Per-request state shared by every row of one resolution.
struct RowLoader<'r, S: RowStore + ?Sized> {
    catalog: &'r Catalog,
    store: &'r S,
    access: AccessControl<'r>,
    options: &'r LoadOptions,
    selection: RelationSelection,
    nested: bool,
}

impl<S: RowStore + ?Sized> RowLoader<'_, S> {
    /// Field filter, computed-column removal and label for an authorized row.
    fn prepare(&self, table: &str, row: &Row) -> Row {
        let mut entity = self.access.filter_entity_fields(table, row);
        entity.retain(|field| {
            self.catalog
                .field(table, field)
                .is_none_or(|config| config.is_stored())
        });
        let label = self.catalog.label(table, &entity);
        entity.insert(LABEL, label);
        entity
    }

    fn strip(&self, row: &mut Row) {
        if self.options.strip_system {
            for field in [OWNER_ID, GRANTED, CREATED_AT, UPDATED_AT] {
                row.remove(field);
            }
        }
        if self.options.strip_id {
            row.remove(ID);
        }
    }

    /// A top-level row with its requested relations attached.
    fn load_row(&self, structure: &Structure, row: &Row) -> Result<Row, ResolveError> {
        let table = structure.table.as_str();
        let prepared = self.prepare(table, row);
        let mut out = prepared.clone();

        for (field, relation) in &structure.relations.relations_n1 {
            if !self.selection.many_to_one(field) {
                continue;
            }
            if let Some(entity) = self.load_many_to_one(field, relation, &prepared)? {
                out.insert(field.as_str(), entity);
            }
        }

        for (name, relation) in &structure.relations.relations_1n {
            if !self
                .selection
                .one_to_many(name, relation.relationship_strength)
            {
                continue;
            }
            if let Some(children) = self.load_one_to_many(table, name, relation, &prepared)? {
                let children = children.into_iter().map(Value::Record).collect();
                out.insert(name.as_str(), Value::List(children));
            }
        }

        if let RelationSelection::Named(names) = &self.selection {
            for name in names {
                let relations = &structure.relations;
                if !relations.relations_n1.contains_key(name)
                    && !relations.relations_1n.contains_key(name)
                {
                    trace!(table, relation = %name, "unknown relation ignored");
                }
            }
        }

        self.strip(&mut out);
        Ok(out)
    }

    /// The row `field` points at, if it exists and the user may see it.
    ///
    /// `None` leaves the raw foreign value in place.
    fn load_many_to_one(
        &self,
        field: &str,
        relation: &RelationDescriptor,
        row: &Row,
    ) -> Result<Option<Row>, ResolveError> {
        let related_table = relation.related_table.as_str();
        if !relation.accessible {
            trace!(field, related_table, "relation not accessible");
            return Ok(None);
        }
        let Some(value) = row.get(field).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };

        let related = if relation.foreign_key == ID {
            self.store.select_by_id(related_table, value)?
        } else {
            self.store
                .select_by_foreign_key(related_table, &relation.foreign_key, value, None)?
                .into_iter()
                .next()
        };
        let Some(related) = related else {
            trace!(field, related_table, "related row missing");
            return Ok(None);
        };
        if !self.access.can_access_entity(related_table, &related) {
            return Ok(None);
        }

        let mut entity = self.prepare(related_table, &related);
        if self.options.compact {
            entity = self.access.compact_relation(related_table, &entity);
        }
        self.strip(&mut entity);
        Ok(Some(entity))
    }

    /// Visible children of `parent`, each with its own many-to-one relations
    /// under `_nested` when nested loading is on.
    fn load_one_to_many(
        &self,
        parent_table: &str,
        name: &str,
        relation: &RelationDescriptor,
        parent: &Row,
    ) -> Result<Option<Vec<Row>>, ResolveError> {
        let child_table = relation.related_table.as_str();
        if !relation.accessible {
            trace!(relation = name, child_table, "relation not accessible");
            return Ok(None);
        }
        let Some(field) = relation.related_field.as_deref() else {
            return Ok(None);
        };
        let Some(key) = parent.get(&relation.foreign_key).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };

        let rows = self.store.select_by_foreign_key(
            child_table,
            field,
            key,
            relation.default_sort.as_ref(),
        )?;

        let mut children = Vec::with_capacity(rows.len());
        for row in rows {
            if !self.access.can_access_entity(child_table, &row) {
                continue;
            }
            let mut child = self.prepare(child_table, &row);
            if self.nested {
                let nested = self.load_nested(parent_table, child_table, &child)?;
                if !nested.is_empty() {
                    child.insert(NESTED, nested);
                }
            }
            self.strip(&mut child);
            children.push(child);
        }

        trace!(relation = name, child_table, count = children.len(), "children loaded");
        Ok(Some(children))
    }

    /// Many-to-one relations of a child row, skipping those that point back at
    /// `parent_table`.
    fn load_nested(
        &self,
        parent_table: &str,
        child_table: &str,
        child: &Row,
    ) -> Result<Row, ResolveError> {
        let relations = self
            .catalog
            .table_relations(self.access.context(), child_table);

        let mut nested = Row::new();
        for (field, relation) in &relations.relations_n1 {
            if relation.related_table == parent_table {
                continue;
            }
            if let Some(entity) = self.load_many_to_one(field, relation, child)? {
                nested.insert(field.as_str(), entity);
            }
        }
        Ok(nested)
    }
}
