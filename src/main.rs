use secure_storage::prelude::*;
use std::sync::Arc;

const DEFAULT_STORE_PATH: &str = "secure-store.json";

fn usage() {
    println!("usage: secure-storage [PATH] <command>");
    println!();
    println!("commands:");
    println!("  set <key> <value>   seal and store a value");
    println!("  get <key>           read a value (discarded if tampered or expired)");
    println!("  remove <key>        delete a value");
    println!("  clear               remove sensitive entries and the key material");
    println!("  keys                list raw backend keys");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "secure_storage=info".into()),
        )
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let path = if args.first().is_some_and(|a| !is_command(a)) {
        args.remove(0)
    } else {
        DEFAULT_STORE_PATH.to_string()
    };

    let config = SecureStoreConfig::from_env()?;
    let backend = Arc::new(FileBackend::open(&path).await?);
    let store = SecureStore::builder(Arc::clone(&backend))
        .with_config(config)
        .build();

    if let Some(report) = store.initialize(InitOptions::with_migration()).await? {
        println!("[INIT] {} ({})", backend.path().display(), report);
    }

    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["set", key, value] => {
            store.set_item(key, value).await?;
            println!("[SET] {}", key);
        }
        ["get", key] => match store.get_entry(key).await {
            Lookup::Found(value) => println!("{}", value),
            Lookup::NotFound => println!("[GET] {}: not found", key),
            Lookup::Invalid(reason) => println!("[GET] {}: discarded ({:?})", key, reason),
        },
        ["remove", key] => {
            store.remove_item(key).await?;
            println!("[REMOVE] {}", key);
        }
        ["clear"] => {
            let removed = store.clear_all().await?;
            println!("[CLEAR] removed {} entries", removed);
        }
        ["keys"] => {
            let mut keys = backend.list_keys().await?;
            keys.sort();
            for key in keys {
                println!("{}", key);
            }
        }
        _ => usage(),
    }

    Ok(())
}

fn is_command(arg: &str) -> bool {
    matches!(arg, "set" | "get" | "remove" | "clear" | "keys")
}
