use rowgate::loader::{LoadOptions, Resolver, TableData};
use rowgate::roles::User;
use rowgate::{Catalog, MemoryStore, ResolveError, ResolverConfig, Row, Value};

const SCHEMA: &str = r#"
    role public
    role editor
    role admin inherits editor

    table Author {
        @display = name
        @grant.admin = read

        name text
    }

    table Category {
        @display = label
        @grant.public = read

        label text
    }

    table Article {
        @display = title
        @grant.public = read
        @grant.editor = read, create

        title text
        byAuthor int -> Author
        category int -> Category
    }

    table Comment {
        @display = body
        @grant.public = read

        body text
        onArticle int -> Article array comments sort id
        category int -> Category
    }
"#;

const ROWS: &str = r#"{
    "Author": [
        {"id": 1, "name": "Ada", "granted": ""}
    ],
    "Category": [
        {"id": 1, "label": "News", "granted": ""}
    ],
    "Article": [
        {"id": 1, "title": "Draft", "ownerId": "u2", "granted": "draft", "byAuthor": 1},
        {"id": 2, "title": "Editors", "granted": "published @editor", "byAuthor": 1},
        {"id": 3, "title": "Everyone", "granted": "published @public", "byAuthor": 1},
        {"id": 4, "title": "Open", "granted": "", "byAuthor": 1, "category": 1}
    ],
    "Comment": [
        {"id": 2, "body": "second", "onArticle": 4, "category": 1, "granted": ""},
        {"id": 1, "body": "first", "onArticle": 4, "category": 1, "granted": ""},
        {"id": 3, "body": "hidden", "onArticle": 4, "granted": "draft", "ownerId": "u9"},
        {"id": 4, "body": "elsewhere", "onArticle": 3, "granted": ""}
    ]
}"#;

fn catalog() -> Catalog {
    Catalog::parse(SCHEMA, ResolverConfig::default()).unwrap()
}

fn store() -> MemoryStore {
    MemoryStore::from_json(ROWS).unwrap()
}

fn ids(data: &TableData) -> Vec<String> {
    data.rows.iter().filter_map(Row::id).collect()
}

fn record<'a>(row: &'a Row, key: &str) -> &'a Row {
    match row.get(key) {
        Some(Value::Record(r)) => r,
        other => panic!("{key} is not an embedded row: {other:?}"),
    }
}

fn list<'a>(row: &'a Row, key: &str) -> &'a [Value] {
    match row.get(key) {
        Some(Value::List(items)) => items.as_slice(),
        other => panic!("{key} is not a list: {other:?}"),
    }
}

fn load(user: &User, table: &str, options: LoadOptions) -> Result<TableData, ResolveError> {
    let catalog = catalog();
    let store = store();
    Resolver::new(&catalog, &store).get_table_data(user, table, &options)
}

fn by_id(id: i64) -> LoadOptions {
    LoadOptions {
        id: Some(Value::Int(id)),
        ..Default::default()
    }
}

#[test_log::test]
fn test_editor_sees_only_published_for_editor() {
    let catalog = catalog();
    let mut store = MemoryStore::new();
    for row in [
        r#"{"id": 1, "title": "Draft", "ownerId": "someone", "granted": "draft"}"#,
        r#"{"id": 2, "title": "Editors", "granted": "published @editor"}"#,
    ] {
        store.insert("Article", serde_json::from_str(row).unwrap());
    }

    let data = Resolver::new(&catalog, &store)
        .get_table_data(&User::new("me", "editor"), "Article", &LoadOptions::default())
        .unwrap();
    assert_eq!(ids(&data), vec!["2"]);
    assert_eq!(data.pagination.total, 1);
}

#[test]
fn test_anonymous_sees_public_rows_only() {
    let data = load(&User::anonymous(), "Article", LoadOptions::default()).unwrap();
    assert_eq!(ids(&data), vec!["3", "4"]);
}

#[test]
fn test_owner_sees_own_draft() {
    let data = load(&User::new("u2", "public"), "Article", LoadOptions::default()).unwrap();
    assert_eq!(ids(&data), vec!["1", "3", "4"]);
}

#[test]
fn test_inaccessible_relation_is_reported_not_loaded() {
    let options = LoadOptions {
        relation: Some("all".into()),
        include_schema: true,
        ..by_id(2)
    };
    let data = load(&User::new("me", "editor"), "Article", options.clone()).unwrap();

    let schema = data.schema.as_ref().unwrap();
    assert!(!schema.relations.relations_n1["byAuthor"].accessible);
    assert_eq!(data.rows[0].get("byAuthor"), Some(&Value::Int(1)));

    // admin inherits editor and can read Author.
    let data = load(&User::new("root", "admin"), "Article", options).unwrap();
    assert_eq!(record(&data.rows[0], "byAuthor").get("name"), Some(&Value::from("Ada")));
}

#[test]
fn test_weak_relation_expanded_only_on_request() {
    let anon = User::anonymous();

    let data = load(&anon, "Article", by_id(4)).unwrap();
    assert!(!data.rows[0].contains("comments"));

    for relation in ["all", "comments", "Nope, comments"] {
        let options = LoadOptions {
            relation: Some(relation.into()),
            ..by_id(4)
        };
        let data = load(&anon, "Article", options).unwrap();
        let comments = list(&data.rows[0], "comments");
        assert_eq!(comments.len(), 2, "relation={relation}");
    }

    let options = LoadOptions {
        relation: Some("nope".into()),
        ..by_id(4)
    };
    let data = load(&anon, "Article", options).unwrap();
    assert!(!data.rows[0].contains("comments"));
    assert_eq!(data.rows[0].get("category"), Some(&Value::Int(1)));
}

#[test_log::test]
fn test_nested_children_never_embed_parent_table() {
    let options = LoadOptions {
        relation: Some("comments".into()),
        ..by_id(4)
    };
    let data = load(&User::anonymous(), "Article", options).unwrap();
    let comments = list(&data.rows[0], "comments");

    let bodies: Vec<&str> = comments
        .iter()
        .map(|c| match c {
            Value::Record(r) => r.get("body").and_then(Value::as_text).unwrap_or(""),
            _ => "",
        })
        .collect();
    assert_eq!(bodies, vec!["first", "second"]);

    for comment in comments {
        let Value::Record(comment) = comment else {
            panic!("child is not a row");
        };
        let nested = record(comment, "_nested");
        assert!(!nested.contains("onArticle"));
        assert_eq!(record(nested, "category").get("label"), Some(&Value::from("News")));
        assert_eq!(comment.get("onArticle"), Some(&Value::Int(4)));
    }
}

#[test]
fn test_nested_loading_can_be_disabled() {
    let options = LoadOptions {
        relation: Some("comments".into()),
        nested: Some(false),
        ..by_id(4)
    };
    let data = load(&User::anonymous(), "Article", options).unwrap();
    for comment in list(&data.rows[0], "comments") {
        let Value::Record(comment) = comment else {
            panic!("child is not a row");
        };
        assert!(!comment.contains("_nested"));
    }
}

#[test]
fn test_unknown_table_is_not_found_for_everyone() {
    for user in [
        User::anonymous(),
        User::new("me", "editor"),
        User::new("root", "admin"),
    ] {
        for name in ["Missing", "missing", "MISSING"] {
            let err = load(&user, name, LoadOptions::default()).unwrap_err();
            assert!(matches!(err, ResolveError::NotFound(_)));
            assert_eq!(err.status(), 404);
        }
    }
}

#[test]
fn test_table_name_is_case_insensitive() {
    let data = load(&User::anonymous(), "aRtIcLe", LoadOptions::default()).unwrap();
    assert_eq!(data.table, "Article");
}

#[test]
fn test_forbidden_table() {
    let err = load(&User::new("me", "editor"), "author", LoadOptions::default()).unwrap_err();
    assert_eq!(err.status(), 403);
    assert_eq!(err.to_string(), "Forbidden: no read permission on Author");
}

const MIXED_GRANTED: &str = r#"{
    "Category": [
        {"id": 7, "label": "Odd", "granted": true}
    ],
    "Article": [
        {"id": 1, "title": "a", "granted": 1},
        {"id": 2, "title": "b", "granted": ["draft"]},
        {"id": 3, "title": "c", "granted": "", "category": 7},
        {"id": 4, "title": "d", "granted": "archived"},
        {"id": 5, "title": "e", "granted": "published @editor"},
        {"id": 6, "title": "f", "granted": null},
        {"id": 7, "title": "g", "granted": {"state": "shared"}}
    ],
    "Comment": [
        {"id": 1, "body": "a", "onArticle": 3, "granted": 1},
        {"id": 2, "body": "b", "onArticle": 3, "granted": ["draft"]},
        {"id": 3, "body": "c", "onArticle": 3, "granted": ""},
        {"id": 4, "body": "d", "onArticle": 3, "granted": "archived"},
        {"id": 5, "body": "e", "onArticle": 3, "granted": "published @editor"},
        {"id": 6, "body": "f", "onArticle": 3, "granted": null},
        {"id": 7, "body": "g", "onArticle": 3, "granted": {"state": "shared"}}
    ]
}"#;

#[test_log::test]
fn test_every_path_applies_the_same_row_check() {
    let catalog = catalog();
    let store = MemoryStore::from_json(MIXED_GRANTED).unwrap();
    let resolver = Resolver::new(&catalog, &store);

    for (user, expected) in [
        (User::anonymous(), vec!["3", "6"]),
        (User::new("me", "editor"), vec!["3", "5", "6"]),
    ] {
        let bulk = resolver
            .get_table_data(&user, "Article", &LoadOptions::default())
            .unwrap();
        assert_eq!(ids(&bulk), expected, "bulk {user:?}");

        let mut single = Vec::new();
        for id in 1..=7 {
            let data = resolver.get_table_data(&user, "Article", &by_id(id)).unwrap();
            single.extend(ids(&data));
        }
        assert_eq!(single, expected, "by id {user:?}");

        let options = LoadOptions {
            relation: Some("comments, category".into()),
            ..by_id(3)
        };
        let data = resolver.get_table_data(&user, "Article", &options).unwrap();
        let children: Vec<String> = list(&data.rows[0], "comments")
            .iter()
            .filter_map(|c| match c {
                Value::Record(r) => r.id(),
                _ => None,
            })
            .collect();
        assert_eq!(children, expected, "children {user:?}");

        // The category row carries a non-text state, so the raw key stays.
        assert_eq!(data.rows[0].get("category"), Some(&Value::Int(7)));
    }
}
