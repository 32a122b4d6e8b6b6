//! framelink - Fixed-Length Frame Server
//!
//! This is the main entry point for the framelink server.
//! It parses the command line, binds the listener, and serves clients with
//! the echo frame handler until Ctrl+C.

use framelink::config::ServerConfig;
use framelink::server::Server;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Parse configuration from command-line arguments
fn config_from_args() -> ServerConfig {
    let mut config = ServerConfig::default();
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" | "-h" => {
                config.host = required_value(&args, i, "--host").to_string();
                i += 2;
            }
            "--port" | "-p" => {
                config.port = required_value(&args, i, "--port").to_string();
                i += 2;
            }
            "--max-connections" | "-m" => {
                config.max_connections =
                    parse_number(required_value(&args, i, "--max-connections"));
                i += 2;
            }
            "--buffer-len" | "-b" => {
                config.buffer_len = parse_number(required_value(&args, i, "--buffer-len"));
                i += 2;
            }
            "--help" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("framelink version {}", framelink::VERSION);
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    config
}

fn required_value<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {flag} requires a value");
            std::process::exit(1);
        }
    }
}

fn parse_number(value: &str) -> usize {
    value.parse().unwrap_or_else(|_| {
        eprintln!("Error: invalid number {value:?}");
        std::process::exit(1);
    })
}

fn print_help() {
    println!(
        r#"
framelink - Fixed-Length Frame Server

USAGE:
    framelink [OPTIONS]

OPTIONS:
    -h, --host <HOST>              Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>              Port to listen on (default: 5090)
    -m, --max-connections <N>      Concurrent clients served (default: 3)
    -b, --buffer-len <BYTES>       Frame length, 1-10240 (default: 1024)
    -v, --version                  Print version information
        --help                     Print this help message

EXAMPLES:
    framelink                          # Start on 127.0.0.1:5090
    framelink --port 6000 -m 10        # Ten clients on port 6000
    framelink --host 0.0.0.0 -b 256    # All interfaces, 256-byte frames

CONNECTING:
    $ framelink-client --port 5090
"#
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = config_from_args();

    // Set up logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .init();

    info!("framelink v{}", framelink::VERSION);

    let server = Server::from_config(&config)?;
    server.run()?;
    info!(
        address = %server.local_addr(),
        max_connections = server.max_connections(),
        "Ready to accept connections. Use Ctrl+C to shutdown gracefully."
    );

    signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping server...");

    // Joining connection threads blocks, keep it off the runtime thread.
    tokio::task::spawn_blocking(move || server.shutdown()).await?;

    info!("Server shutdown complete");
    Ok(())
}
