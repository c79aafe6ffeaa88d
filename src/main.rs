//! mwan-proxy: multi-WAN HTTP/HTTPS forward proxy
//!
//! This is the main entry point for the proxy.
//!
//! # Usage
//!
//! ```bash
//! # Run with interactive interface selection
//! ./mwan-proxy
//!
//! # Run with a configuration file
//! ./mwan-proxy -c /path/to/config.json
//!
//! # Run with environment overrides
//! MWAN_PROXY_LOG_LEVEL=debug ./mwan-proxy
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{debug, error, info, Level};
use tracing_subscriber::EnvFilter;

use mwan_proxy::balancer::SelectionEngine;
use mwan_proxy::config::{apply_env_overrides, create_default_config, load_config, Config};
use mwan_proxy::events::EventLog;
use mwan_proxy::iface::{discover_interfaces, IfaceRecord};
use mwan_proxy::proxy::{run_accept_loop, ProxyListener, SessionConfig};
use mwan_proxy::{cli, VERSION};

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
    /// Force interactive port/interface selection
    interactive: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/mwan-proxy/config.json");
        let mut generate_config = false;
        let mut check_config = false;
        let mut interactive = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-i" | "--interactive" => {
                    interactive = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("mwan-proxy v{VERSION}");
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
            interactive,
        }
    }
}

fn print_help() {
    println!(
        r#"mwan-proxy v{VERSION}

Multi-WAN HTTP/HTTPS forward proxy with round-robin interface load
balancing and fast failover.

USAGE:
    mwan-proxy [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/mwan-proxy/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -i, --interactive       Prompt for port and interfaces even when configured
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    MWAN_PROXY_LISTEN_ADDR   Override listen address
    MWAN_PROXY_LOG_LEVEL     Override log level (trace, debug, info, warn, error)
    MWAN_PROXY_LOG_DIR       Override event log directory

EXAMPLE:
    # Start, pick the port and two interfaces interactively
    mwan-proxy

    # Then point your browser's HTTP and HTTPS proxy at the listen address
"#
    );
}

/// Initialize logging
///
/// Log level priority (highest to lowest):
/// 1. `RUST_LOG` environment variable
/// 2. `MWAN_PROXY_LOG_LEVEL` environment variable (applied to the config)
/// 3. Config file `log.level` setting
/// 4. Default: "info"
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    if std::env::var("RUST_LOG").is_ok() {
        info!("Log level from RUST_LOG environment variable");
    } else {
        info!("Log level: {}", config.log.level);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.generate_config {
        create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    let mut config = if args.config_path.exists() {
        load_config(&args.config_path)?
    } else {
        Config::default_config()
    };
    apply_env_overrides(&mut config)?;

    init_logging(&config);
    if !args.config_path.exists() {
        debug!(
            "No configuration file at {:?}; using defaults",
            args.config_path
        );
    }

    if args.check_config {
        println!("Configuration OK");
        return Ok(());
    }

    // Interactive setup when the config names no interfaces.
    if config.interfaces.is_empty() || args.interactive {
        println!("\nProxy Server Configuration");
        println!("-------------------------");

        let port = cli::prompt_port(config.listen.address.port());
        config.listen.address.set_port(port);

        let discovered = discover_interfaces()?;
        config.interfaces = cli::select_interfaces(&discovered)?;
        config.validate()?;
    }

    // Build the shared selection engine over the configured interfaces.
    let records: Vec<Arc<IfaceRecord>> = config
        .selected_interfaces()
        .into_iter()
        .map(|iface| Arc::new(IfaceRecord::new(iface.name, iface.ip)))
        .collect();
    let engine = Arc::new(SelectionEngine::new(
        records,
        config.balancer.engine_config(),
    ));

    let events = if config.log.file_enabled {
        Arc::new(EventLog::with_file(&config.log.directory).await?)
    } else {
        Arc::new(EventLog::noop())
    };

    let listener = ProxyListener::bind(config.listen.address).await?;
    let listen_addr = listener.local_addr();

    info!("Proxy server started on {}", listen_addr);
    info!("Combined interfaces:");
    for iface in engine.interfaces() {
        info!("  - {}", iface);
    }
    if let Some(path) = events.path() {
        info!("Logging requests to: {:?}", path);
    }

    println!("\nTo use the proxy, set your system or browser HTTP and HTTPS");
    println!("proxy to: {listen_addr}");
    println!("\nPress Ctrl+C to stop the server");

    let session_config = SessionConfig::from(&config.timeouts);
    tokio::select! {
        result = run_accept_loop(listener, engine, Arc::clone(&events), session_config) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Server stopped by user");
        }
    }

    events.shutdown().await;

    Ok(())
}
