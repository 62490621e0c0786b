//! edgeio demo server
//!
//! Serves a static HTTP/1.1 response (or echoes bytes with `--mode echo`)
//! from a single-threaded edge-triggered reactor.

use edgeio::config::{Command, ServerConfig, USAGE};
use edgeio::network::{bind_and_listen, resolve, Acceptor, ConnectionSettings, Reactor};
use edgeio::{Error, Result};
use tracing::{error, info, Level};

fn run_server(config: ServerConfig) -> Result<()> {
    let addrs = resolve(&config.host, &config.port.to_string(), true)?;

    // first address that binds wins
    let mut bound = Err(Error::Config(format!("nothing to bind for {}", config.host)));
    for addr in addrs {
        bound = bind_and_listen(addr, config.backlog);
        if bound.is_ok() {
            break;
        }
    }
    let listener = bound?;

    let acceptor = Acceptor::new(listener, ConnectionSettings::from(&config));
    let local = acceptor.local_addr()?;

    let mut reactor = Reactor::new()?;
    reactor.add_watcher(Box::new(acceptor))?;

    info!(
        addr = %local,
        mode = ?config.mode,
        timeout_ms = config.idle_timeout_ms,
        buffer = config.buffer_size,
        "edgeio server listening"
    );
    reactor.run_forever()
}

fn main() {
    let config = match ServerConfig::from_args(std::env::args().skip(1)) {
        Ok(Command::Run(config)) => config,
        Ok(Command::Help) => {
            println!("{USAGE}");
            return;
        }
        Err(e) => {
            eprintln!("{e}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(if config.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    if let Err(e) = run_server(config) {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}
