//! Schema reflection.
//!
//! A [`Catalog`] is built once from the parsed schema and never mutated. It
//! merges common fields, validates relation targets, and precomputes the
//! inverse (one-to-many) relation index so per-request reflection never scans
//! every table.

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::access::can_read_field;
use crate::ast::{Action, FieldConfig, Schema, SortSpec, Strength, TableConfig};
use crate::config::ResolverConfig;
use crate::error::ResolveError;
use crate::parser::{ParseError, Parser};
use crate::roles::{RoleGraph, User, UserContext};
use crate::value::{RESERVED_PREFIX, Row, SYSTEM_FIELDS, Value};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Field {table}.{field} uses the reserved `_` prefix")]
    ReservedField { table: String, field: String },
    #[error("Relation {table}.{field} points at unknown table {target}")]
    UnknownRelatedTable {
        table: String,
        field: String,
        target: String,
    },
    #[error("Relation {table}.{field} points at unknown column {target}.{column}")]
    UnknownForeignKey {
        table: String,
        field: String,
        target: String,
        column: String,
    },
    #[error("{setting} of {table} names unknown field {field}")]
    UnknownField {
        table: String,
        setting: &'static str,
        field: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelationKind {
    #[serde(rename = "many-to-one")]
    ManyToOne,
    #[serde(rename = "one-to-many")]
    OneToMany,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDescriptor {
    #[serde(rename = "type")]
    pub kind: RelationKind,
    pub related_table: String,
    /// Column on the "one" side that the relation points at.
    pub foreign_key: String,
    /// One-to-many only: the referencing column on `related_table`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_field: Option<String>,
    pub relationship_strength: Strength,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_sort: Option<SortSpec>,
    pub accessible: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TableRelations {
    #[serde(rename = "relationsN1")]
    pub relations_n1: IndexMap<String, RelationDescriptor>,
    #[serde(rename = "relations1N")]
    pub relations_1n: IndexMap<String, RelationDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub can_read: bool,
    pub can_create: bool,
    pub can_update: bool,
    pub can_delete: bool,
    pub can_publish: bool,
}

/// Per-user, permission-filtered view of one table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Structure {
    pub table: String,
    pub fields: IndexMap<String, FieldConfig>,
    pub display_fields: Vec<String>,
    pub search_fields: Vec<String>,
    pub page_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_sort: Option<SortSpec>,
    pub attachments: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar: Option<String>,
    #[serde(flatten)]
    pub relations: TableRelations,
    pub permissions: Permissions,
}

impl Structure {
    /// Declared fields the user can read, plus system fields.
    pub fn can_read(&self, field: &str) -> bool {
        self.fields.contains_key(field) || SYSTEM_FIELDS.contains(&field)
    }
}

/// A many-to-one field seen from the table it points at.
#[derive(Debug, Clone)]
struct InverseRelation {
    name: String,
    table: String,
    field: String,
    foreign_key: String,
    strength: Strength,
    default_sort: Option<SortSpec>,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    tables: IndexMap<String, TableConfig>,
    inverse: IndexMap<String, Vec<InverseRelation>>,
    roles: RoleGraph,
    config: ResolverConfig,
}

/// Exact match first, then a case-folded scan.
fn resolve_name<'a>(
    names: impl Iterator<Item = &'a String> + Clone,
    name: &str,
) -> Option<&'a String> {
    if let Some(exact) = names.clone().find(|n| n.as_str() == name) {
        return Some(exact);
    }
    let folded = name.to_lowercase();
    names.into_iter().find(|n| n.to_lowercase() == folded)
}

fn is_known_field(table: &TableConfig, field: &str) -> bool {
    table.fields.contains_key(field) || SYSTEM_FIELDS.contains(&field)
}

impl Catalog {
    pub fn parse(source: &str, config: ResolverConfig) -> Result<Self, CatalogError> {
        let schema = Parser::new(source)?.parse()?;
        Self::from_schema(schema, config)
    }

    pub fn from_schema(schema: Schema, config: ResolverConfig) -> Result<Self, CatalogError> {
        let Schema {
            mut tables,
            roles,
            common_fields,
        } = schema;

        let names: Vec<String> = tables.keys().cloned().collect();

        for (table_name, table) in tables.iter_mut() {
            for (field_name, field) in &common_fields {
                if !table.fields.contains_key(field_name) {
                    table.fields.insert(field_name.clone(), field.clone());
                }
            }

            for (field_name, field) in table.fields.iter_mut() {
                if field_name.starts_with(RESERVED_PREFIX) {
                    return Err(CatalogError::ReservedField {
                        table: table_name.clone(),
                        field: field_name.clone(),
                    });
                }
                if let Some(rel) = field.relation.as_mut() {
                    let target = resolve_name(names.iter(), &rel.related_table).ok_or_else(|| {
                        CatalogError::UnknownRelatedTable {
                            table: table_name.clone(),
                            field: field_name.clone(),
                            target: rel.related_table.clone(),
                        }
                    })?;
                    rel.related_table = target.clone();
                }
            }
        }

        for (table_name, table) in &tables {
            Self::validate_table(&tables, table_name, table)?;
        }

        let inverse = Self::index_inverse_relations(&tables);
        let roles = RoleGraph::new(&roles, &config.public_role, config.role_delimiter);

        debug!(
            tables = tables.len(),
            inverse = inverse.values().map(Vec::len).sum::<usize>(),
            "catalog built"
        );

        Ok(Self {
            tables,
            inverse,
            roles,
            config,
        })
    }

    fn validate_table(
        tables: &IndexMap<String, TableConfig>,
        table_name: &str,
        table: &TableConfig,
    ) -> Result<(), CatalogError> {
        let unknown = |setting: &'static str, field: &str| CatalogError::UnknownField {
            table: table_name.to_string(),
            setting,
            field: field.to_string(),
        };

        for field in &table.display_fields {
            if !is_known_field(table, field) {
                return Err(unknown("@display", field));
            }
        }
        for field in &table.search_fields {
            if !is_known_field(table, field) {
                return Err(unknown("@search", field));
            }
        }
        if let Some(sort) = &table.default_sort {
            if !is_known_field(table, &sort.field) {
                return Err(unknown("@sort", &sort.field));
            }
        }
        if let Some(calendar) = &table.calendar {
            if !is_known_field(table, calendar) {
                return Err(unknown("@calendar", calendar));
            }
        }

        for (field_name, field) in &table.fields {
            let Some(rel) = &field.relation else { continue };
            let Some(target) = tables.get(&rel.related_table) else {
                return Err(CatalogError::UnknownRelatedTable {
                    table: table_name.to_string(),
                    field: field_name.clone(),
                    target: rel.related_table.clone(),
                });
            };
            if !is_known_field(target, &rel.foreign_key) {
                return Err(CatalogError::UnknownForeignKey {
                    table: table_name.to_string(),
                    field: field_name.clone(),
                    target: rel.related_table.clone(),
                    column: rel.foreign_key.clone(),
                });
            }
            if let Some(sort) = &rel.default_sort {
                if !is_known_field(table, &sort.field) {
                    return Err(unknown("relation sort", &sort.field));
                }
            }
        }

        Ok(())
    }

    /// Target table -> one-to-many relations pointing at it, in declaration order.
    ///
    /// When two referencing fields derive the same collection name, the first
    /// declaration keeps it and later ones are dropped.
    fn index_inverse_relations(
        tables: &IndexMap<String, TableConfig>,
    ) -> IndexMap<String, Vec<InverseRelation>> {
        let mut inverse: IndexMap<String, Vec<InverseRelation>> = IndexMap::new();

        for (table_name, table) in tables {
            for (field_name, field) in &table.fields {
                let Some(rel) = &field.relation else { continue };
                let Some(target) = tables.get(&rel.related_table) else { continue };
                let name = rel.array_name.clone().unwrap_or_else(|| table_name.clone());

                if is_known_field(target, &name) {
                    warn!(
                        table = %rel.related_table,
                        name = %name,
                        source = %format!("{table_name}.{field_name}"),
                        "inverse relation name shadows a column, skipped"
                    );
                    continue;
                }

                let entries = inverse.entry(rel.related_table.clone()).or_default();
                if let Some(existing) = entries.iter().find(|e| e.name == name) {
                    warn!(
                        table = %rel.related_table,
                        name = %name,
                        kept = %format!("{}.{}", existing.table, existing.field),
                        dropped = %format!("{table_name}.{field_name}"),
                        "inverse relation name collision"
                    );
                    continue;
                }

                entries.push(InverseRelation {
                    name,
                    table: table_name.clone(),
                    field: field_name.clone(),
                    foreign_key: rel.foreign_key.clone(),
                    strength: rel.relationship_strength,
                    default_sort: rel.default_sort.clone(),
                });
            }
        }

        inverse
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn user_context(&self, user: &User) -> UserContext {
        self.roles.context(user)
    }

    /// Canonical table name for `name`, matched case-insensitively.
    pub fn resolve_table(&self, name: &str) -> Option<&str> {
        resolve_name(self.tables.keys(), name).map(String::as_str)
    }

    pub fn table(&self, table: &str) -> Option<&TableConfig> {
        self.tables.get(table)
    }

    pub fn field(&self, table: &str, field: &str) -> Option<&FieldConfig> {
        self.tables.get(table).and_then(|t| t.fields.get(field))
    }

    /// True iff one of the user's roles is granted `action` on `table`.
    pub fn has_permission(&self, ctx: &UserContext, table: &str, action: Action) -> bool {
        self.tables
            .get(table)
            .is_some_and(|t| ctx.is_granted(&t.grant, action))
    }

    /// Field-level read check; undeclared and system fields are readable.
    pub fn can_read_field(&self, ctx: &UserContext, table: &str, field: &str) -> bool {
        self.field(table, field)
            .is_none_or(|config| can_read_field(ctx, config))
    }

    /// Both relation maps of `table`, each flagged with whether the user may
    /// read the table on the other side. Inaccessible relations are reported
    /// but must never be traversed.
    pub fn table_relations(&self, ctx: &UserContext, table: &str) -> TableRelations {
        let mut relations = TableRelations::default();
        let Some(config) = self.tables.get(table) else {
            return relations;
        };

        for (field_name, field) in &config.fields {
            let Some(rel) = &field.relation else { continue };
            relations.relations_n1.insert(
                field_name.clone(),
                RelationDescriptor {
                    kind: RelationKind::ManyToOne,
                    related_table: rel.related_table.clone(),
                    foreign_key: rel.foreign_key.clone(),
                    related_field: None,
                    relationship_strength: rel.relationship_strength,
                    default_sort: rel.default_sort.clone(),
                    accessible: self.has_permission(ctx, &rel.related_table, Action::Read),
                },
            );
        }

        for inv in self.inverse.get(table).into_iter().flatten() {
            relations.relations_1n.insert(
                inv.name.clone(),
                RelationDescriptor {
                    kind: RelationKind::OneToMany,
                    related_table: inv.table.clone(),
                    foreign_key: inv.foreign_key.clone(),
                    related_field: Some(inv.field.clone()),
                    relationship_strength: inv.strength,
                    default_sort: inv.default_sort.clone(),
                    accessible: self.has_permission(ctx, &inv.table, Action::Read),
                },
            );
        }

        relations
    }

    /// The user's view of `table`: readable fields, relations, and action flags.
    pub fn build_structure(&self, ctx: &UserContext, table: &str) -> Result<Structure, ResolveError> {
        let name = self
            .resolve_table(table)
            .ok_or_else(|| ResolveError::NotFound(table.to_string()))?;
        let Some(config) = self.tables.get(name) else {
            return Err(ResolveError::NotFound(table.to_string()));
        };

        if !self.has_permission(ctx, name, Action::Read) {
            return Err(ResolveError::Forbidden {
                table: name.to_string(),
                action: Action::Read,
            });
        }

        let fields: IndexMap<String, FieldConfig> = config
            .fields
            .iter()
            .filter(|(_, field)| can_read_field(ctx, field))
            .map(|(n, f)| (n.clone(), f.clone()))
            .collect();

        let readable = |field: &str| self.can_read_field(ctx, name, field);

        let mut relations = self.table_relations(ctx, name);
        relations
            .relations_n1
            .retain(|field, _| fields.contains_key(field));

        Ok(Structure {
            table: name.to_string(),
            display_fields: config
                .display_fields
                .iter()
                .filter(|f| readable(f.as_str()))
                .cloned()
                .collect(),
            search_fields: config
                .search_fields
                .iter()
                .filter(|f| readable(f.as_str()))
                .cloned()
                .collect(),
            page_size: self.config.page_limit(None, config.page_size),
            default_sort: config
                .default_sort
                .clone()
                .filter(|s| readable(s.field.as_str())),
            attachments: config.attachments,
            calendar: config.calendar.clone().filter(|c| readable(c.as_str())),
            fields,
            relations,
            permissions: Permissions {
                can_read: true,
                can_create: self.has_permission(ctx, name, Action::Create),
                can_update: self.has_permission(ctx, name, Action::Update),
                can_delete: self.has_permission(ctx, name, Action::Delete),
                can_publish: self.has_permission(ctx, name, Action::Publish),
            },
        })
    }

    pub fn display_fields(&self, table: &str) -> &[String] {
        self.tables
            .get(table)
            .map(|t| t.display_fields.as_slice())
            .unwrap_or(&[])
    }

    /// Space-joined non-empty display values; the id when none are set.
    pub fn label(&self, table: &str, row: &Row) -> String {
        let parts: Vec<String> = self
            .display_fields(table)
            .iter()
            .filter_map(|field| row.get(field).and_then(Value::display))
            .collect();

        if parts.is_empty() {
            row.id().unwrap_or_default()
        } else {
            parts.join(" ")
        }
    }
}
