use std::path::PathBuf;

use facet::Facet;
use figue as args;
use specimen::{
    Engine, EngineConfig, FsBackend, SnapshotStore, SqliteBackend, TraceId, render_expanded,
};
use tracing::debug;

#[derive(Facet, Debug)]
struct Cli {
    #[facet(flatten)]
    builtins: args::FigueBuiltins,
    #[facet(args::subcommand)]
    command: Command,
}

#[derive(Facet, Debug)]
#[repr(u8)]
enum Command {
    /// List every trace in the store with its quota usage.
    Traces {
        #[facet(args::named, default)]
        dir: Option<String>,
        #[facet(args::named, default)]
        db: Option<String>,
        #[facet(args::named, default)]
        config: Option<String>,
    },
    /// Print the stored HTML of one snapshot.
    Show {
        #[facet(args::named, default)]
        dir: Option<String>,
        #[facet(args::named, default)]
        db: Option<String>,
        #[facet(args::named, default)]
        config: Option<String>,
        #[facet(args::named)]
        trace: String,
        #[facet(args::named)]
        snapshot: String,
    },
    /// Delete every snapshot older than the configured TTL.
    Sweep {
        #[facet(args::named, default)]
        dir: Option<String>,
        #[facet(args::named, default)]
        db: Option<String>,
        #[facet(args::named, default)]
        config: Option<String>,
    },
    /// Preview a JSON value the way the engine would.
    Preview {
        #[facet(args::named)]
        json: String,
        #[facet(args::named, default)]
        config: Option<String>,
        #[facet(args::named, default)]
        html: bool,
    },
}

#[derive(Facet, Debug)]
struct TraceRow {
    trace_id: String,
    entries: u64,
    bytes_used: u64,
    bytes_remaining: u64,
    oldest_written_at_ms: Option<i64>,
}

#[derive(Facet, Debug)]
struct SweepRow {
    backend: String,
    traces_scanned: u64,
    entries_removed: u64,
    bytes_freed: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let cli = parse_cli()?;
    match cli.command {
        Command::Traces { dir, db, config } => {
            let config = load_config(config)?;
            run_traces(&open_store(dir, db, &config)?)
        }
        Command::Show {
            dir,
            db,
            config,
            trace,
            snapshot,
        } => {
            let config = load_config(config)?;
            let store = open_store(dir, db, &config)?;
            run_show(Engine::new(config, store), &trace, &snapshot)
        }
        Command::Sweep { dir, db, config } => {
            let config = load_config(config)?;
            run_sweep(&open_store(dir, db, &config)?)
        }
        Command::Preview { json, config, html } => run_preview(load_config(config)?, &json, html),
    }
}

fn parse_cli() -> Result<Cli, String> {
    let figue_config = args::builder::<Cli>()
        .map_err(|e| format!("failed to build CLI schema: {e}"))?
        .cli(|cli| cli.strict())
        .help(|h| {
            h.program_name("specimen")
                .description("Inspect and maintain specimen snapshot stores")
                .version(option_env!("CARGO_PKG_VERSION").unwrap_or("dev"))
        })
        .build();
    let cli = args::Driver::new(figue_config)
        .run()
        .into_result()
        .map_err(|e| e.to_string())?;
    Ok(cli.value)
}

/// Defaults, then the optional JSON file, then `SPECIMEN_*` variables.
fn load_config(path: Option<String>) -> Result<EngineConfig, String> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| format!("read config {path}: {e}"))?;
            EngineConfig::from_json_str(&text).map_err(|e| format!("parse config {path}: {e}"))?
        }
        None => EngineConfig::default(),
    };
    let config = config
        .with_env_overrides(|key| std::env::var(key).ok())
        .map_err(|e| e.to_string())?;
    debug!(?config, "loaded engine config");
    Ok(config)
}

fn open_store(
    dir: Option<String>,
    db: Option<String>,
    config: &EngineConfig,
) -> Result<SnapshotStore, String> {
    match (dir, db) {
        (Some(dir), None) => {
            let backend = FsBackend::open(PathBuf::from(dir)).map_err(|e| e.to_string())?;
            Ok(SnapshotStore::from_config(backend, config))
        }
        (None, Some(db)) => {
            let backend = SqliteBackend::open(PathBuf::from(db)).map_err(|e| e.to_string())?;
            Ok(SnapshotStore::from_config(backend, config))
        }
        (Some(_), Some(_)) => Err("pass either --dir or --db, not both".to_string()),
        (None, None) => Err("pass --dir <path> or --db <path>".to_string()),
    }
}

fn run_traces(store: &SnapshotStore) -> Result<(), String> {
    let rows: Vec<TraceRow> = store
        .traces()
        .iter()
        .filter_map(|trace| store.usage(trace))
        .map(|usage| TraceRow {
            trace_id: usage.trace_id.to_string(),
            entries: usage.entries as u64,
            bytes_used: usage.bytes_used,
            bytes_remaining: usage.bytes_remaining,
            oldest_written_at_ms: usage.oldest_written_at_ms,
        })
        .collect();
    println!(
        "{}",
        facet_json::to_string_pretty(&rows).map_err(|e| format!("encode traces: {e}"))?
    );
    Ok(())
}

fn run_show(engine: Engine, trace: &str, snapshot: &str) -> Result<(), String> {
    TraceId::parse(trace).map_err(|e| format!("bad trace id: {e}"))?;
    match engine.fetch_rendering(trace, snapshot) {
        Some(html) => {
            println!("{html}");
            Ok(())
        }
        None => Err(format!("no snapshot {snapshot} in trace {trace}")),
    }
}

fn run_sweep(store: &SnapshotStore) -> Result<(), String> {
    let report = store.sweep_expired();
    let row = SweepRow {
        backend: store.backend_name().to_string(),
        traces_scanned: report.traces_scanned,
        entries_removed: report.entries_removed,
        bytes_freed: report.bytes_freed,
    };
    println!(
        "{}",
        facet_json::to_string_pretty(&row).map_err(|e| format!("encode sweep report: {e}"))?
    );
    Ok(())
}

fn run_preview(config: EngineConfig, json: &str, html: bool) -> Result<(), String> {
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| format!("parse --json value: {e}"))?;
    let engine = Engine::in_memory(config);
    if html {
        println!("{}", render_expanded(&engine.capture(&value)));
    } else {
        println!("{}", engine.build_preview(&value));
    }
    Ok(())
}
