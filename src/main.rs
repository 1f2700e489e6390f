use rowgate::ast::SortOrder;
use rowgate::loader::{LoadOptions, Resolver};
use rowgate::roles::User;
use rowgate::{Catalog, MemoryStore, ResolverConfig, Response, Value};
use std::env;
use std::fs;
use std::process;
use tracing_subscriber::EnvFilter;

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} <schema> --rows <rows.json> --table <name> [options]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -r, --rows <file>        JSON row fixture: {{ \"Table\": [rows] }}");
    eprintln!("  -t, --table <name>       Table to load (case-insensitive)");
    eprintln!("  -u, --user <id>          Requesting user id (default: anonymous)");
    eprintln!("      --roles <list>       Comma-separated roles of the user");
    eprintln!("      --id <id>            Load a single row");
    eprintln!("      --relation <list>    'all' or comma-separated relation names");
    eprintln!("      --limit <n>          Page size");
    eprintln!("      --offset <n>         Rows to skip");
    eprintln!("      --order-by <field>   Sort column");
    eprintln!("      --order <asc|desc>   Sort direction");
    eprintln!("      --search <text>      Search the table's search fields");
    eprintln!("      --compact            Embed many-to-one relations by reference");
    eprintln!("      --no-nested          Skip relations of one-to-many children");
    eprintln!("      --strip-system       Drop ownerId, granted, createdAt, updatedAt");
    eprintln!("      --strip-id           Drop id");
    eprintln!("      --schema             Include the table structure");
    eprintln!("      --max-page-size <n>  Upper bound for --limit (default: 500)");
    eprintln!("  -o, --output <file>      Output file (default: stdout)");
    eprintln!();
    eprintln!("Logging is controlled by RUST_LOG, e.g. RUST_LOG=rowgate=debug");
    process::exit(1);
}

fn value_arg(args: &[String], i: usize, flag: &str) -> String {
    match args.get(i) {
        Some(v) => v.clone(),
        None => {
            eprintln!("Missing value for {}", flag);
            process::exit(1);
        }
    }
}

fn number_arg(args: &[String], i: usize, flag: &str) -> usize {
    let raw = value_arg(args, i, flag);
    raw.parse().unwrap_or_else(|_| {
        eprintln!("Invalid number for {}: {}", flag, raw);
        process::exit(1);
    })
}

fn read_file(path: &str) -> String {
    match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to read {}: {}", path, e);
            process::exit(1);
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1].starts_with('-') {
        usage(&args[0]);
    }

    let schema_path = &args[1];
    let mut rows_path: Option<String> = None;
    let mut table: Option<String> = None;
    let mut output_path: Option<String> = None;
    let mut user_id: Option<String> = None;
    let mut roles = String::new();
    let mut options = LoadOptions::default();
    let mut config = ResolverConfig::default();

    let mut i = 2;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "-r" | "--rows" => {
                i += 1;
                rows_path = Some(value_arg(&args, i, flag));
            }
            "-t" | "--table" => {
                i += 1;
                table = Some(value_arg(&args, i, flag));
            }
            "-u" | "--user" => {
                i += 1;
                user_id = Some(value_arg(&args, i, flag));
            }
            "--roles" => {
                i += 1;
                roles = value_arg(&args, i, flag);
            }
            "--id" => {
                i += 1;
                options.id = Some(Value::from(value_arg(&args, i, flag)));
            }
            "--relation" => {
                i += 1;
                options.relation = Some(value_arg(&args, i, flag));
            }
            "--limit" => {
                i += 1;
                options.limit = Some(number_arg(&args, i, flag));
            }
            "--offset" => {
                i += 1;
                options.offset = number_arg(&args, i, flag);
            }
            "--order-by" => {
                i += 1;
                options.order_by = Some(value_arg(&args, i, flag));
            }
            "--order" => {
                i += 1;
                let raw = value_arg(&args, i, flag);
                options.order = Some(SortOrder::from_str(&raw).unwrap_or_else(|| {
                    eprintln!("Invalid sort order: {}", raw);
                    process::exit(1);
                }));
            }
            "--search" => {
                i += 1;
                options.search = Some(value_arg(&args, i, flag));
            }
            "--compact" => options.compact = true,
            "--no-nested" => options.nested = Some(false),
            "--strip-system" => options.strip_system = true,
            "--strip-id" => options.strip_id = true,
            "--schema" => options.include_schema = true,
            "--max-page-size" => {
                i += 1;
                config.max_page_size = number_arg(&args, i, flag);
            }
            "-o" | "--output" => {
                i += 1;
                output_path = Some(value_arg(&args, i, flag));
            }
            _ => {
                eprintln!("Unknown option: {}", flag);
                process::exit(1);
            }
        }
        i += 1;
    }

    let (Some(rows_path), Some(table)) = (rows_path, table) else {
        usage(&args[0]);
    };

    let catalog = match Catalog::parse(&read_file(schema_path), config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let store = match MemoryStore::from_json(&read_file(&rows_path)) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let user = match user_id {
        Some(id) => User::new(id, &roles),
        None if roles.is_empty() => User::anonymous(),
        None => User {
            id: None,
            roles: rowgate::roles::DeclaredRoles::Text(roles),
        },
    };

    let response: Response = Resolver::new(&catalog, &store)
        .get_table_data(&user, &table, &options)
        .into();

    let json = match serde_json::to_string_pretty(&response) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to serialize response: {}", e);
            process::exit(1);
        }
    };

    match output_path {
        Some(path) => {
            if let Err(e) = fs::write(&path, &json) {
                eprintln!("Failed to write {}: {}", path, e);
                process::exit(1);
            }
        }
        None => println!("{}", json),
    }

    if !response.is_ok() {
        process::exit(1);
    }
}
