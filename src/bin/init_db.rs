use std::path::Path;
use std::sync::{Arc, Mutex};

use station_sessions::adapters::db::{open_connection, run_migrations, schema_version};
use station_sessions::app::config::{StationSeed, parse_station_seed};
use station_sessions::app::coordinator::SessionCoordinator;
use station_sessions::app::services::SqliteStore;
use station_sessions::domain::session_state::SystemClock;

fn main() {
    if let Err(error) = run() {
        eprintln!("failed to initialize db: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut path = if cfg!(windows) {
        ".\\data\\station_sessions.db".to_string()
    } else {
        "./data/station_sessions.db".to_string()
    };
    let mut force = false;
    let mut seed: Vec<StationSeed> = Vec::new();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--path" => {
                let Some(value) = args.get(index + 1) else {
                    return Err("--path requires a value".to_string());
                };
                path = value.clone();
                index += 2;
            }
            "--seed" => {
                let Some(value) = args.get(index + 1) else {
                    return Err("--seed requires a value".to_string());
                };
                seed.extend(parse_station_seed(value).map_err(|error| error.to_string())?);
                index += 2;
            }
            "--force" => {
                force = true;
                index += 1;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}"));
            }
        }
    }

    let path_ref = Path::new(&path);
    if let Some(parent) = path_ref.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|error| format!("failed to create parent directory: {error}"))?;
    }

    if force && path_ref.exists() {
        std::fs::remove_file(path_ref)
            .map_err(|error| format!("failed to remove existing db file: {error}"))?;
    }

    let mut connection = open_connection(&path).map_err(|error| error.to_string())?;
    run_migrations(&mut connection).map_err(|error| error.to_string())?;
    let version = schema_version(&connection).map_err(|error| error.to_string())?;

    let store = Arc::new(SqliteStore::new(Arc::new(Mutex::new(connection))));
    let coordinator = SessionCoordinator::new(store, SystemClock);
    for station in &seed {
        let capacity = coordinator
            .register_station(&station.station_id, station.total_chargers)
            .map_err(|error| error.to_string())?;
        println!(
            "station {}: {}/{} chargers available",
            capacity.station_id, capacity.available_chargers, capacity.total_chargers
        );
    }

    println!("initialized db at: {path}");
    println!("schema version: {version}");
    Ok(())
}

fn print_help() {
    println!("init_db");
    println!();
    println!("Usage:");
    println!("  cargo run --bin init_db -- [--path <file>] [--seed <id:chargers,...>] [--force]");
    println!();
    println!("Options:");
    println!("  --path <file>    target sqlite file (default: ./data/station_sessions.db)");
    println!("  --seed <list>    register stations, same format as STATION_SEED; repeatable");
    println!("  --force          delete existing file before creating");
}
