//! Declarative schema as written by the schema author.

use indexmap::IndexMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    pub tables: IndexMap<String, TableConfig>,
    pub roles: IndexMap<String, RoleConfig>,
    /// Fields merged into every table; a table's own declaration wins.
    pub common_fields: IndexMap<String, FieldConfig>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableConfig {
    pub fields: IndexMap<String, FieldConfig>,
    pub display_fields: Vec<String>,
    pub search_fields: Vec<String>,
    pub page_size: Option<usize>,
    pub default_sort: Option<SortSpec>,
    /// Table-level permissions: role -> allowed actions.
    pub grant: Grant,
    pub attachments: bool,
    pub calendar: Option<String>,
    pub hints: Vec<Hint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    #[serde(rename = "type")]
    pub typ: FieldType,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_primary: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub auto_increment: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Literal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renderer: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(flatten)]
    pub computed: Option<Computed>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant: Option<Grant>,
    #[serde(flatten)]
    pub relation: Option<RelationConfig>,
}

impl FieldConfig {
    pub fn new(typ: FieldType) -> Self {
        Self {
            typ,
            is_primary: false,
            auto_increment: false,
            default: None,
            renderer: None,
            values: Vec::new(),
            computed: None,
            grant: None,
            relation: None,
        }
    }

    /// Computed fields are never read from storage.
    pub fn is_stored(&self) -> bool {
        self.computed.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Number,
    Int,
    Bool,
    Date,
    DateTime,
    Enum,
    Json,
    Other(String),
}

impl FieldType {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "text" | "string" | "varchar" => Self::Text,
            "number" | "float" | "decimal" => Self::Number,
            "int" | "integer" => Self::Int,
            "bool" | "boolean" => Self::Bool,
            "date" => Self::Date,
            "datetime" | "timestamp" => Self::DateTime,
            "enum" => Self::Enum,
            "json" => Self::Json,
            _ => Self::Other(s.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Enum => "enum",
            Self::Json => "json",
            Self::Other(s) => s,
        }
    }
}

impl Serialize for FieldType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Literal {
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Computed {
    As(String),
    Calculate(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationConfig {
    pub related_table: String,
    pub foreign_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub array_name: Option<String>,
    pub relationship_strength: Strength,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_sort: Option<SortSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Strength {
    Strong,
    #[default]
    Weak,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
    Publish,
}

impl Action {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "read" => Some(Self::Read),
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "publish" => Some(Self::Publish),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role -> allowed actions.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Grant(pub IndexMap<String, Vec<Action>>);

impl Grant {
    pub fn add(&mut self, role: &str, actions: impl IntoIterator<Item = Action>) {
        let entry = self.0.entry(role.to_string()).or_default();
        for action in actions {
            if !entry.contains(&action) {
                entry.push(action);
            }
        }
    }

    /// True when any of `roles` is allowed `action`.
    pub fn allows<'r>(&self, roles: impl IntoIterator<Item = &'r str>, action: Action) -> bool {
        roles.into_iter().any(|role| {
            self.0
                .get(role)
                .is_some_and(|actions| actions.contains(&action))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoleConfig {
    pub inherits: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hint {
    pub key: String,
    pub value: HintValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HintValue {
    Int(i64),
    Str(String),
    Ident(String),
    List(Vec<String>),
}

impl HintValue {
    /// Flatten to a list of names; a single identifier or string is a one-item list.
    pub fn names(&self) -> Vec<String> {
        match self {
            Self::Int(n) => vec![n.to_string()],
            Self::Str(s) | Self::Ident(s) => vec![s.clone()],
            Self::List(items) => items.clone(),
        }
    }
}
