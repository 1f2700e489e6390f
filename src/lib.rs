pub mod access;
pub mod ast;
pub mod catalog;
pub mod config;
pub mod error;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod roles;
pub mod store;
pub mod value;

use wasm_bindgen::prelude::*;

pub use catalog::{Catalog, Structure};
pub use config::ResolverConfig;
pub use error::{ErrorResponse, ResolveError};
pub use loader::{LoadOptions, Request, Resolver, Response, TableData};
pub use roles::User;
pub use store::{Filter, MemoryStore, RowStore};
pub use value::{Row, Value};

/// Initialize panic hook for better error messages in WASM
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();
}

/// Resolve a JSON request against schema source and a JSON row fixture.
///
/// Resolution failures, including a malformed schema or fixture, come back as
/// an `{ status, error }` body; `Err` is reserved for an unreadable request.
#[wasm_bindgen(js_name = "resolveTable")]
pub fn resolve_table(schema: &str, rows: &str, request: &str) -> Result<String, String> {
    let request: Request = serde_json::from_str(request).map_err(|e| e.to_string())?;

    let response = match load(schema, rows) {
        Ok((catalog, store)) => Resolver::new(&catalog, &store).respond(&request),
        Err(err) => Response::Err(err.to_response()),
    };
    serde_json::to_string(&response).map_err(|e| e.to_string())
}

fn load(schema: &str, rows: &str) -> Result<(Catalog, MemoryStore), ResolveError> {
    let catalog = Catalog::parse(schema, ResolverConfig::default())?;
    let store = MemoryStore::from_json(rows)?;
    Ok((catalog, store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_table_json() {
        let schema = "table Note { @grant.public = read\n text text }";
        let rows = r#"{"Note": [{"id": 1, "text": "hi"}, {"id": 2, "text": "x", "granted": "draft"}]}"#;

        let out = resolve_table(schema, rows, r#"{"table": "note"}"#).unwrap();
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(json["table"], "Note");
        assert_eq!(json["pagination"]["total"], 1);
        assert_eq!(json["rows"][0]["_label"], "1");

        let out = resolve_table(schema, rows, r#"{"table": "Missing"}"#).unwrap();
        assert!(out.contains("404"));
    }

    #[test]
    fn test_resolve_table_bad_input() {
        let out = resolve_table("table A { b int -> Missing }", "{}", r#"{"table": "A"}"#).unwrap();
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(json["status"], 500);
        assert!(json["error"].as_str().unwrap().starts_with("Schema error"));

        let out = resolve_table("table A { }", "[", r#"{"table": "A"}"#).unwrap();
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(json["status"], 500);
        assert!(json["error"].as_str().unwrap().starts_with("Store error"));

        assert!(resolve_table("table A { }", "{}", "{}").is_err());
    }
}
