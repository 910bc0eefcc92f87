use clap::Parser;
use std::path::PathBuf;

/// Kiosk voice-command orchestrator
#[derive(Parser, Debug, Clone)]
#[command(name = "iris", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "IRIS_CONFIG", default_value = "iris.toml")]
    pub config: PathBuf,

    /// Server host address
    #[arg(long, env = "IRIS_HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(long, env = "IRIS_PORT")]
    pub port: Option<u16>,

    /// Disable launching tool servers (communication layer only)
    #[arg(long, env = "IRIS_NO_TOOL_SERVERS", default_value_t = false)]
    pub no_tool_servers: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["iris"]);
        assert_eq!(cli.config, PathBuf::from("iris.toml"));
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(!cli.no_tool_servers);
    }

    #[test]
    fn test_cli_with_args() {
        let cli = Cli::parse_from([
            "iris",
            "--config",
            "custom.toml",
            "--host",
            "0.0.0.0",
            "--port",
            "8080",
            "--no-tool-servers",
        ]);
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert_eq!(cli.host, Some("0.0.0.0".to_string()));
        assert_eq!(cli.port, Some(8080));
        assert!(cli.no_tool_servers);
    }
}
