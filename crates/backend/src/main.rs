//! trellisd, the Trellis backend daemon
//!
//! Brings the system up through the startup orchestrator, then serves
//! NETCONF-style RPCs over a local (or TCP) socket, one thread per
//! connection. Exit status is 0 on clean shutdown and non-zero when
//! startup fails with no failsafe available.

use std::os::unix::net::UnixListener;
use std::sync::Arc;

use clap::{Arg, ArgAction, Command};
use tracing::{error, info, warn};

use trellis_backend::config::{BackendConfig, SocketSpec};
use trellis_backend::dispatch::Dispatcher;
use trellis_backend::server::serve_conn;
use trellis_engine::{startup, Engine, EngineOptions, StartupMode, StartupStatus};
use trellis_schema::SchemaSpec;

fn build_cli() -> Command {
    Command::new("trellisd")
        .about("Trellis configuration backend daemon")
        .arg(
            Arg::new("config")
                .short('f')
                .value_name("FILE")
                .required(true)
                .help("Configuration file"),
        )
        .arg(
            Arg::new("mode")
                .short('s')
                .value_name("MODE")
                .help("Startup mode: none|init|startup|running|failsafe"),
        )
        .arg(
            Arg::new("extra")
                .short('c')
                .value_name("FILE")
                .help("Extra XML merged into running at startup"),
        )
        .arg(
            Arg::new("log")
                .short('l')
                .value_name("s|f<path>")
                .help("Log to stderr (s, default) or to a file (f<path>)"),
        )
        .arg(
            Arg::new("debug")
                .short('D')
                .value_name("LEVEL")
                .action(ArgAction::Set)
                .help("Debug level (0=info, 1=debug, 2+=trace)"),
        )
        .arg(
            Arg::new("family")
                .short('a')
                .value_name("UNIX|IPv4|IPv6")
                .help("Transport socket family"),
        )
        .arg(
            Arg::new("addr")
                .short('u')
                .value_name("ADDR")
                .help("Socket path (UNIX) or address:port (IPv4/IPv6)"),
        )
}

fn init_logging(log: Option<&str>, debug: u32) {
    let level = match debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    match log {
        Some(spec) if spec.starts_with('f') => {
            let path = &spec[1..];
            match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => {
                    tracing_subscriber::fmt()
                        .with_env_filter(filter)
                        .with_writer(std::sync::Mutex::new(file))
                        .with_ansi(false)
                        .init();
                }
                Err(e) => {
                    eprintln!("trellisd: cannot open log file {}: {}", path, e);
                    std::process::exit(1);
                }
            }
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

fn main() {
    let matches = build_cli().get_matches();

    let debug: u32 = matches
        .get_one::<String>("debug")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    init_logging(matches.get_one::<String>("log").map(String::as_str), debug);

    // Configuration file plus command-line overrides.
    let cfg_path = std::path::PathBuf::from(
        matches
            .get_one::<String>("config")
            .expect("clap enforces -f"),
    );
    let mut cfg = match BackendConfig::load(&cfg_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "cannot load configuration");
            std::process::exit(1);
        }
    };
    if let Some(mode) = matches.get_one::<String>("mode") {
        match StartupMode::parse(mode) {
            Some(m) => cfg.startup_mode = m,
            None => {
                error!(mode = mode.as_str(), "bad startup mode");
                std::process::exit(1);
            }
        }
    }
    if let Some(extra) = matches.get_one::<String>("extra") {
        cfg.extra_xml = Some(std::path::PathBuf::from(extra));
    }
    if let Some(family) = matches.get_one::<String>("family") {
        let addr = matches.get_one::<String>("addr").map(String::as_str);
        if let Err(e) = cfg.override_socket(family, addr) {
            error!(error = %e, "bad socket arguments");
            std::process::exit(1);
        }
    }

    // The schema is supplied by the embedding application; standalone the
    // daemon runs wildcard (no model loaded).
    let engine = match Engine::builder(SchemaSpec::any())
        .options(EngineOptions::new(&cfg.datastore_dir).autolock(cfg.autolock))
        .build()
    {
        Ok(e) => Arc::new(e),
        Err(e) => {
            error!(error = %e, "cannot open datastores");
            std::process::exit(1);
        }
    };

    match startup::run(&engine, cfg.startup_mode, cfg.extra_xml.as_deref()) {
        Ok(StartupStatus::Ready) => info!("backend ready"),
        Ok(StartupStatus::ReadyFailsafe) => warn!("backend ready in failsafe mode"),
        Err(e) => {
            error!(error = %e, "startup failed");
            std::process::exit(1);
        }
    }

    let dispatcher = Arc::new(Dispatcher::new(engine));
    if let Err(e) = serve(dispatcher, &cfg) {
        error!(error = %e, "server terminated");
        std::process::exit(1);
    }
}

fn serve(dispatcher: Arc<Dispatcher>, cfg: &BackendConfig) -> trellis_core::Result<()> {
    let framing = cfg.framing;
    match &cfg.socket {
        SocketSpec::Unix(path) => {
            // Stale socket from a previous run.
            let _ = std::fs::remove_file(path);
            let listener = UnixListener::bind(path)?;
            info!(socket = %path.display(), "listening");
            for stream in listener.incoming() {
                match stream {
                    Ok(mut s) => {
                        let d = dispatcher.clone();
                        // Local-socket peers are trusted with privileged
                        // operations; TCP peers are not.
                        std::thread::spawn(move || serve_conn(&d, &mut s, framing, true));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }
        SocketSpec::Tcp(addr) => {
            let listener = std::net::TcpListener::bind(addr)?;
            info!(addr = addr.as_str(), "listening");
            for stream in listener.incoming() {
                match stream {
                    Ok(mut s) => {
                        let d = dispatcher.clone();
                        std::thread::spawn(move || serve_conn(&d, &mut s, framing, false));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }
    }
    Ok(())
}
