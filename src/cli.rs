use clap::{Parser, ValueEnum};

/// devdash: aggregate backlog items, incidents and compliance actions into one list
#[derive(Parser, Debug, Clone)]
#[command(name = "devdash", version, about)]
pub struct Cli {
    /// Path to config file (default: devdash.toml)
    #[arg(long)]
    pub config: Option<String>,

    /// Service tree substituted into the analytics query templates
    #[arg(long)]
    pub service_tree: Option<String>,

    /// Skip every upstream call and print synthetic tasks (local development only)
    #[arg(long)]
    pub offline: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    /// Log format written to stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let cli = Cli::parse_from(["devdash"]);
        assert!(cli.config.is_none());
        assert!(cli.service_tree.is_none());
        assert!(!cli.offline);
        assert_eq!(cli.format, OutputFormat::Table);
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn test_parse_all_overrides() {
        let cli = Cli::parse_from([
            "devdash",
            "--config",
            "/etc/devdash.toml",
            "--service-tree",
            "Contoso Storage",
            "--offline",
            "--format",
            "json",
            "--log-format",
            "json",
        ]);
        assert_eq!(cli.config.as_deref(), Some("/etc/devdash.toml"));
        assert_eq!(cli.service_tree.as_deref(), Some("Contoso Storage"));
        assert!(cli.offline);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn test_rejects_unknown_format() {
        let err = Cli::try_parse_from(["devdash", "--format", "html"]).unwrap_err();
        assert!(err.to_string().contains("html"));
    }
}
