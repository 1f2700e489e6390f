use serde::{Deserialize, Serialize};

/// Process-wide resolver settings, fixed when the catalog is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolverConfig {
    /// Role every caller holds, including anonymous ones.
    pub public_role: String,
    /// Separator for users whose roles are declared as a single string.
    pub role_delimiter: char,
    /// Page size for tables without `@page`.
    pub default_page_size: usize,
    /// Upper bound for any requested `limit`.
    pub max_page_size: usize,
    /// Whether one-to-many children get their own many-to-one relations loaded.
    pub nested_relations: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            public_role: "public".to_string(),
            role_delimiter: ',',
            default_page_size: 50,
            max_page_size: 500,
            nested_relations: true,
        }
    }
}

impl ResolverConfig {
    /// Clamp a requested page size, falling back to `table_default`.
    pub fn page_limit(&self, requested: Option<usize>, table_default: Option<usize>) -> usize {
        requested
            .or(table_default)
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }
}
