use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use livehub::HubConfig;
use serde::Deserialize;

/// Command line options for the live leaderboard server.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Override bind address (host:port).
    #[arg(long)]
    pub bind: Option<String>,
    /// Override server port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Number of fan-out workers.
    #[arg(long)]
    pub workers: Option<usize>,
    /// Address for the event relay listener (host:port).
    #[arg(long)]
    pub relay: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the server (default).
    Serve,
    /// Send one event to a running relay listener.
    Publish {
        /// Relay address (host:port).
        #[arg(long)]
        to: String,
        /// Event type tag, e.g. NEW_QUIZ.
        #[arg(long = "type")]
        kind: String,
        /// JSON payload.
        #[arg(long, default_value = "null")]
        data: String,
        /// Restrict delivery to one quiz.
        #[arg(long)]
        quiz_id: Option<String>,
    },
}

/// Runtime configuration resolved from file, env and CLI.
#[derive(Clone)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
    /// HS256 key for client and producer tokens. No key disables the check.
    pub jwt_secret: Option<String>,
    /// Address of the relay listener, if enabled.
    pub relay_bind: Option<String>,
    /// Number of standings in a leaderboard snapshot.
    pub leaderboard_size: usize,
    pub hub: HubConfig,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind", &self.bind)
            .field("logging_enabled", &self.logging_enabled)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("relay_bind", &self.relay_bind)
            .field("leaderboard_size", &self.leaderboard_size)
            .field("hub", &self.hub)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: format!("127.0.0.1:{}", default_port()),
            logging_enabled: default_logging(),
            jwt_secret: None,
            relay_bind: None,
            leaderboard_size: default_leaderboard_size(),
            hub: HubConfig::default(),
        }
    }
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    auth: FileAuth,
    #[serde(default)]
    relay: FileRelay,
    #[serde(default)]
    leaderboard: FileLeaderboard,
    #[serde(default)]
    hub: HubConfig,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

#[derive(Deserialize, Default)]
struct FileAuth {
    jwt_secret: Option<String>,
}

#[derive(Deserialize, Default)]
struct FileRelay {
    bind: Option<String>,
}

#[derive(Deserialize)]
struct FileLeaderboard {
    #[serde(default = "default_leaderboard_size")]
    size: usize,
}

fn default_port() -> u16 {
    8080
}

fn default_logging() -> bool {
    true
}

fn default_leaderboard_size() -> usize {
    10
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

impl Default for FileLeaderboard {
    fn default() -> Self {
        Self {
            size: default_leaderboard_size(),
        }
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("QUIZ_LIVE_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/quiz_live.toml"));

        let file_cfg = match fs::read(&config_path) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str::<FileConfig>(&contents).context("invalid config file")?
            }
            Err(_) => FileConfig::default(),
        };
        let mut port = file_cfg.server.port;
        let mut logging = file_cfg.logging.enabled;
        let mut jwt_secret = file_cfg.auth.jwt_secret;
        let mut relay_bind = file_cfg.relay.bind;
        let mut hub = file_cfg.hub;

        // environment overrides
        if let Ok(p) = std::env::var("QUIZ_LIVE_PORT") {
            if let Ok(p) = p.parse::<u16>() {
                port = p;
            }
        }
        if let Ok(l) = std::env::var("QUIZ_LIVE_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }
        if let Ok(key) = std::env::var("JWT_KEY") {
            jwt_secret = Some(key);
        }
        if let Ok(r) = std::env::var("QUIZ_LIVE_RELAY") {
            relay_bind = Some(r);
        }

        // CLI overrides
        if let Some(p) = cli.port {
            port = p;
        }
        if let Some(l) = cli.logging {
            logging = l;
        }
        if let Some(w) = cli.workers {
            hub.workers = w;
        }
        if let Some(r) = &cli.relay {
            relay_bind = Some(r.clone());
        }

        // validate port range
        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }
        hub.validate().context("invalid [hub] settings")?;
        if file_cfg.leaderboard.size == 0 {
            anyhow::bail!("invalid_leaderboard_size");
        }

        // bind address precedence for host override
        let bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Ok(b) = std::env::var("BIND") {
            b
        } else {
            format!("127.0.0.1:{}", port)
        };

        Ok(Self {
            bind,
            logging_enabled: logging,
            jwt_secret: jwt_secret.filter(|k| !k.is_empty()),
            relay_bind: relay_bind.filter(|r| !r.is_empty()),
            leaderboard_size: file_cfg.leaderboard.size,
            hub,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    fn clear_env() {
        for key in [
            "QUIZ_LIVE_PORT",
            "QUIZ_LIVE_LOGGING",
            "QUIZ_LIVE_RELAY",
            "JWT_KEY",
            "BIND",
        ] {
            std::env::remove_var(key);
        }
    }

    fn load_with(contents: &str, cli: Cli) -> Result<Config> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, contents).unwrap();
        Config::load(&Cli {
            config: Some(path),
            ..cli
        })
    }

    #[test]
    #[serial]
    fn valid_config_parses() {
        clear_env();
        let cfg = load_with(
            "[server]\nport=5555\n[logging]\nenabled=false\n[hub]\nworkers=3\nclient_buffer=32\n",
            Cli::default(),
        )
        .unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:5555");
        assert!(!cfg.logging_enabled);
        assert_eq!(cfg.hub.workers, 3);
        assert_eq!(cfg.hub.client_buffer, 32);
        assert_eq!(cfg.hub.queue_capacity, HubConfig::default().queue_capacity);
    }

    #[test]
    #[serial]
    fn invalid_port_fails() {
        clear_env();
        assert!(load_with("[server]\nport=80\n", Cli::default()).is_err());
    }

    #[test]
    #[serial]
    fn zero_workers_fails() {
        clear_env();
        assert!(load_with("[hub]\nworkers=0\n", Cli::default()).is_err());
    }

    #[test]
    #[serial]
    fn missing_keys_defaults() {
        clear_env();
        let cfg = load_with("", Cli::default()).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:8080");
        assert!(cfg.logging_enabled);
        assert!(cfg.jwt_secret.is_none());
        assert!(cfg.relay_bind.is_none());
        assert_eq!(cfg.leaderboard_size, 10);
        assert_eq!(cfg.hub, HubConfig::default());
    }

    #[test]
    #[serial]
    fn precedence_cli_env_file() {
        clear_env();
        std::env::set_var("QUIZ_LIVE_PORT", "2222");
        let cfg = load_with(
            "[server]\nport=1111\n",
            Cli {
                port: Some(3333),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:3333");
        std::env::remove_var("QUIZ_LIVE_PORT");
    }

    #[test]
    #[serial]
    fn env_secret_overrides_file() {
        clear_env();
        std::env::set_var("JWT_KEY", "from-env");
        let cfg = load_with("[auth]\njwt_secret=\"from-file\"\n", Cli::default()).unwrap();
        assert_eq!(cfg.jwt_secret.as_deref(), Some("from-env"));
        std::env::remove_var("JWT_KEY");
        assert!(!format!("{cfg:?}").contains("from-env"));
    }

    #[test]
    #[serial]
    fn cli_workers_and_relay() {
        clear_env();
        let cfg = load_with(
            "[hub]\nworkers=2\n[relay]\nbind=\"127.0.0.1:7000\"\n",
            Cli {
                workers: Some(6),
                relay: Some("127.0.0.1:7001".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(cfg.hub.workers, 6);
        assert_eq!(cfg.relay_bind.as_deref(), Some("127.0.0.1:7001"));
    }
}
