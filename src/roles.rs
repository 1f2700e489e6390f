//! Role inheritance.
//!
//! Roles form a directed graph through `inherits`. A user's effective role set
//! is the union of the closures of their declared roles, plus the public role.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::ast::{Action, Grant, RoleConfig};
use crate::value::Value;

/// Roles as supplied by the user context provider: one name, a delimited
/// string, or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeclaredRoles {
    List(Vec<String>),
    Text(String),
}

impl Default for DeclaredRoles {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub roles: DeclaredRoles,
}

impl User {
    pub fn new(id: impl Into<Value>, roles: &str) -> Self {
        Self {
            id: Some(id.into()),
            roles: DeclaredRoles::Text(roles.to_string()),
        }
    }

    /// Unauthenticated caller; resolves to the public role only.
    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// A user together with their resolved role set, built once per request.
#[derive(Debug, Clone)]
pub struct UserContext {
    user: User,
    roles: IndexSet<String>,
}

impl UserContext {
    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn id(&self) -> Option<String> {
        self.user.id.as_ref().and_then(Value::as_key)
    }

    pub fn roles(&self) -> &IndexSet<String> {
        &self.roles
    }

    pub fn role_names(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(String::as_str)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// True when any of the user's roles is allowed `action` by `grant`.
    pub fn is_granted(&self, grant: &Grant, action: Action) -> bool {
        grant.allows(self.role_names(), action)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    inherits: IndexMap<String, Vec<String>>,
    public_role: String,
    delimiter: char,
}

impl RoleGraph {
    pub fn new(roles: &IndexMap<String, RoleConfig>, public_role: &str, delimiter: char) -> Self {
        Self {
            inherits: roles
                .iter()
                .map(|(name, role)| (name.clone(), role.inherits.clone()))
                .collect(),
            public_role: public_role.to_string(),
            delimiter,
        }
    }

    /// `role` plus everything reachable through `inherits`, in first-seen order.
    ///
    /// Unknown roles and missing entries simply end the walk; cycles are cut by
    /// the visited set.
    pub fn inherited_roles(&self, role: &str) -> IndexSet<String> {
        let mut seen = IndexSet::new();
        let mut stack = vec![role.to_string()];

        while let Some(current) = stack.pop() {
            if seen.contains(&current) {
                continue;
            }
            if let Some(parents) = self.inherits.get(&current) {
                for parent in parents.iter().rev() {
                    if !seen.contains(parent) {
                        stack.push(parent.clone());
                    }
                }
            }
            seen.insert(current);
        }

        trace!(role, resolved = ?seen, "inherited roles");
        seen
    }

    /// Split the user's declared roles into names.
    pub fn declared(&self, roles: &DeclaredRoles) -> Vec<String> {
        let names: Vec<&str> = match roles {
            DeclaredRoles::List(list) => list.iter().map(String::as_str).collect(),
            DeclaredRoles::Text(text) => text.split(self.delimiter).collect(),
        };
        names
            .into_iter()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Closure of every declared role; always contains the public role.
    pub fn user_roles(&self, user: &User) -> IndexSet<String> {
        let mut all = IndexSet::new();
        for role in self.declared(&user.roles) {
            all.extend(self.inherited_roles(&role));
        }
        if !all.contains(&self.public_role) {
            all.extend(self.inherited_roles(&self.public_role));
        }
        all
    }

    pub fn context(&self, user: &User) -> UserContext {
        UserContext {
            roles: self.user_roles(user),
            user: user.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Edges as `(role, "parent,parent")`.
    fn graph(edges: &[(&str, &str)]) -> RoleGraph {
        let roles = edges
            .iter()
            .map(|(name, inherits)| {
                (
                    name.to_string(),
                    RoleConfig {
                        inherits: inherits
                            .split(',')
                            .filter(|s| !s.is_empty())
                            .map(str::to_string)
                            .collect(),
                        description: None,
                    },
                )
            })
            .collect();
        RoleGraph::new(&roles, "public", ',')
    }

    fn names(set: &IndexSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_inherited_roles_transitive() {
        let g = graph(&[
            ("admin", "editor"),
            ("editor", "reader,author"),
            ("reader", "public"),
            ("author", ""),
        ]);
        let roles = g.inherited_roles("admin");
        assert_eq!(names(&roles), vec!["admin", "editor", "reader", "public", "author"]);
    }

    #[test]
    fn test_inherited_roles_cycle_terminates() {
        let g = graph(&[("a", "b"), ("b", "c"), ("c", "a")]);
        let roles = g.inherited_roles("b");
        assert_eq!(roles.len(), 3);
        assert_eq!(roles[0], "b");
        assert!(roles.contains("a") && roles.contains("c"));
    }

    #[test]
    fn test_self_cycle_and_unknown_roles() {
        let g = graph(&[("loop", "loop,ghost")]);
        assert_eq!(names(&g.inherited_roles("loop")), vec!["loop", "ghost"]);
        assert_eq!(names(&g.inherited_roles("nobody")), vec!["nobody"]);
    }

    #[test]
    fn test_user_roles_always_include_public() {
        let g = graph(&[("editor", "")]);
        let roles = g.user_roles(&User::new("u1", "editor"));
        assert_eq!(names(&roles), vec!["editor", "public"]);

        let roles = g.user_roles(&User::anonymous());
        assert_eq!(names(&roles), vec!["public"]);
    }

    #[test]
    fn test_declared_roles_forms() {
        let g = graph(&[]);
        assert_eq!(
            g.declared(&DeclaredRoles::Text(" editor, ,author ".into())),
            vec!["editor", "author"]
        );
        assert_eq!(
            g.declared(&DeclaredRoles::List(vec!["a".into(), "".into()])),
            vec!["a"]
        );
    }

    #[test]
    fn test_user_deserializes_roles_as_string_or_list() {
        let user: User = serde_json::from_str(r#"{"id": 4, "roles": "editor,author"}"#).unwrap();
        assert_eq!(user.roles, DeclaredRoles::Text("editor,author".into()));
        let user: User = serde_json::from_str(r#"{"roles": ["editor"]}"#).unwrap();
        assert_eq!(user.roles, DeclaredRoles::List(vec!["editor".into()]));
        assert!(user.id.is_none());
    }

    #[test]
    fn test_context_is_granted() {
        let g = graph(&[("editor", "reader")]);
        let ctx = g.context(&User::new("u1", "editor"));
        let mut grant = Grant::default();
        grant.add("reader", [Action::Read]);

        assert_eq!(ctx.id().as_deref(), Some("u1"));
        assert!(ctx.has_role("reader"));
        assert!(ctx.is_granted(&grant, Action::Read));
        assert!(!ctx.is_granted(&grant, Action::Delete));
    }
}
