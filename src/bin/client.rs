//! framelink-client - Line-Oriented Chat Client
//!
//! Connects to a framelink server, prints every received item from a
//! consumer thread, and sends each line typed on stdin as one frame.
//! `/quit` or end of input disconnects.

use framelink::client::ClientConnection;
use framelink::config::ClientConfig;
use std::io::{self, BufRead};
use std::thread;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn config_from_args() -> ClientConfig {
    let mut config = ClientConfig::default();
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--host" | "-h", Some(v)) => config.host = v.clone(),
            ("--port" | "-p", Some(v)) => config.port = v.clone(),
            ("--buffer-len" | "-b", Some(v)) => {
                config.buffer_len = v.parse().unwrap_or_else(|_| {
                    eprintln!("Error: invalid buffer length {v:?}");
                    std::process::exit(1);
                });
            }
            ("--help", _) => {
                print_help();
                std::process::exit(0);
            }
            ("--version" | "-v", _) => {
                println!("framelink-client version {}", framelink::VERSION);
                std::process::exit(0);
            }
            (flag @ ("--host" | "-h" | "--port" | "-p" | "--buffer-len" | "-b"), None) => {
                eprintln!("Error: {flag} requires a value");
                std::process::exit(1);
            }
            (other, _) => {
                eprintln!("Unknown argument: {other}");
                print_help();
                std::process::exit(1);
            }
        }
        i += 2;
    }

    config
}

fn print_help() {
    println!(
        r#"
framelink-client - Line-Oriented Chat Client

USAGE:
    framelink-client [OPTIONS]

OPTIONS:
    -h, --host <HOST>          Server host (default: 127.0.0.1)
    -p, --port <PORT>          Server port (default: 5090)
    -b, --buffer-len <BYTES>   Frame length, must match the server (default: 1024)
    -v, --version              Print version information
        --help                 Print this help message

Type a line and press Enter to send it. Type /quit to leave.
"#
    );
}

fn main() -> anyhow::Result<()> {
    let config = config_from_args();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let client = ClientConnection::from_config(&config)?;
    client.run()?;
    info!(server = %client.peer_addr(), "Connected");

    let queue = client.message_queue();
    let printer = thread::Builder::new()
        .name("framelink-printer".to_string())
        .spawn(move || {
            while let Some(event) = queue.pop() {
                println!("{event}");
                if event.is_terminal() {
                    break;
                }
            }
        })?;

    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim() == "/quit" {
            break;
        }
        if line.is_empty() {
            continue;
        }
        if let Err(e) = client.send(&line) {
            if e.is_send_error() && client.is_stopped() {
                break;
            }
            warn!(error = %e, "Could not send message");
        }
        if printer.is_finished() {
            break;
        }
    }

    client.stop();
    if printer.join().is_err() {
        warn!("Printer thread panicked");
    }
    Ok(())
}
