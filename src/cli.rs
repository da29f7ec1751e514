use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "edgelog", version, about = "Edge service log management and real-time observability")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "edgelog.toml")]
    pub config: PathBuf,

    /// Override the management API bind host
    #[arg(long)]
    pub host: Option<String>,

    /// Override the management API port
    #[arg(long)]
    pub port: Option<u16>,

    /// Override the stream server port
    #[arg(long)]
    pub stream_port: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["edgelog"]);
        assert_eq!(cli.config, PathBuf::from("edgelog.toml"));
        assert!(cli.port.is_none());
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::parse_from(["edgelog", "--port", "9999", "--host", "127.0.0.1"]);
        assert_eq!(cli.port, Some(9999));
        assert_eq!(cli.host.as_deref(), Some("127.0.0.1"));
    }
}
