//! Server configuration from command-line arguments.

use crate::error::{Error, Result};

/// Protocol spoken on accepted connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Http,
    Echo,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub backlog: i32,
    /// Idle timeout per connection in milliseconds. `0` disables it.
    pub idle_timeout_ms: u64,
    /// Receive buffer per connection; also the largest accepted header block.
    pub buffer_size: usize,
    pub mode: Mode,
    pub verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 12345,
            backlog: 128,
            idle_timeout_ms: 5000,
            buffer_size: 4096,
            mode: Mode::Http,
            verbose: false,
        }
    }
}

/// What `main` should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(ServerConfig),
    Help,
}

pub const USAGE: &str = "\
edgeio_server - edge-triggered HTTP/echo demo server

Usage: edgeio_server [OPTIONS]

Options:
  -b, --bind <HOST>       Listen host (default: 0.0.0.0)
  -p, --port <PORT>       Listen port (default: 12345)
      --backlog <N>       Listen backlog (default: 128)
      --timeout <MS>      Idle connection timeout, 0 disables (default: 5000)
      --buffer <BYTES>    Per-connection buffer size (default: 4096)
      --mode <http|echo>  Connection protocol (default: http)
  -v, --verbose           Debug logging
  -h, --help              Show this help";

impl ServerConfig {
    /// Parses arguments, excluding the program name.
    pub fn from_args<I, S>(args: I) -> Result<Command>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<S> = args.into_iter().collect();
        let mut config = ServerConfig::default();

        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_ref();
            let mut value = || {
                i += 1;
                args.get(i)
                    .map(AsRef::<str>::as_ref)
                    .ok_or_else(|| Error::Config(format!("{flag} requires a value")))
            };

            match flag {
                "--bind" | "-b" => config.host = value()?.to_string(),
                "--port" | "-p" => config.port = parse_number(flag, value()?)?,
                "--backlog" => config.backlog = parse_number(flag, value()?)?,
                "--timeout" => config.idle_timeout_ms = parse_number(flag, value()?)?,
                "--buffer" => {
                    config.buffer_size = parse_number(flag, value()?)?;
                    if config.buffer_size == 0 {
                        return Err(Error::Config("--buffer must be positive".to_string()));
                    }
                }
                "--mode" => {
                    config.mode = match value()? {
                        "http" => Mode::Http,
                        "echo" => Mode::Echo,
                        other => return Err(Error::Config(format!("unknown mode '{other}'"))),
                    }
                }
                "--verbose" | "-v" => config.verbose = true,
                "--help" | "-h" => return Ok(Command::Help),
                other => return Err(Error::Config(format!("unknown argument '{other}'"))),
            }
            i += 1;
        }

        Ok(Command::Run(config))
    }
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{flag}: '{value}' is not a valid number")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(args: &[&str]) -> ServerConfig {
        match ServerConfig::from_args(args).unwrap() {
            Command::Run(config) => config,
            Command::Help => panic!("unexpected help"),
        }
    }

    #[test]
    fn test_defaults() {
        let config = run(&[]);
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.port, 12345);
        assert_eq!(config.mode, Mode::Http);
    }

    #[test]
    fn test_all_flags() {
        let config = run(&[
            "-b", "127.0.0.1", "-p", "8080", "--backlog", "16", "--timeout", "250",
            "--buffer", "1024", "--mode", "echo", "-v",
        ]);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.backlog, 16);
        assert_eq!(config.idle_timeout_ms, 250);
        assert_eq!(config.buffer_size, 1024);
        assert_eq!(config.mode, Mode::Echo);
        assert!(config.verbose);
    }

    #[test]
    fn test_help_short_circuits() {
        let command = ServerConfig::from_args(["--port", "1", "--help", "--bogus"]).unwrap();
        assert_eq!(command, Command::Help);
    }

    #[test]
    fn test_errors() {
        for args in [
            &["--port", "http"][..],
            &["--port", "70000"],
            &["--mode", "ftp"],
            &["--buffer", "0"],
            &["--bind"],
            &["--what"],
        ] {
            let err = ServerConfig::from_args(args).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{args:?}");
        }
    }
}
