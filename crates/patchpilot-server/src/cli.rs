use std::path::PathBuf;

use clap::Parser;
use patchpilot_core::ServiceConfig;
use patchpilot_core::config::LogFormat;

#[derive(Debug, Parser)]
#[command(name = "patchpilot-server")]
#[command(version, about = "PatchPilot - conversational code editing agent service")]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, env = "PATCHPILOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    /// Flags take precedence over file and environment values.
    pub fn apply(&self, config: &mut ServiceConfig) {
        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.log_json {
            config.logging.format = LogFormat::Json;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "patchpilot-server",
            "--host",
            "127.0.0.1",
            "--port",
            "9100",
            "--log-json",
        ])
        .unwrap();

        let mut config = ServiceConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let cli = Cli::try_parse_from(["patchpilot-server"]).unwrap();
        let mut config = ServiceConfig::default();
        config.server.port = 8123;
        cli.apply(&mut config);
        assert_eq!(config.server.port, 8123);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.logging.format, LogFormat::Text);
    }
}
