use clap::{Parser, Subcommand};

pub const DEFAULT_PORT: u16 = 3003;

#[derive(Debug, Parser)]
#[command(name = "querycraft", version, about = "QueryCraft AI SQL backend")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default if no subcommand given).
    Serve {
        #[arg(long, env = "HOST", default_value = "0.0.0.0")]
        host: String,
        #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Apply the database migration to DATABASE_URL.
    Migrate {
        /// Postgres URL override (else DATABASE_URL).
        #[arg(long)]
        database_url: Option<String>,
    },

    /// Print the effective configuration (secrets redacted).
    Config,

    /// Ping the configured Postgres and Redis.
    Check,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_flags_parse() {
        let cli = Cli::parse_from(["querycraft", "serve", "--port", "8080"]);
        match cli.command {
            Some(Commands::Serve { port, .. }) => assert_eq!(port, 8080),
            other => panic!("unexpected command: {other:?}"),
        }
        let cli = Cli::parse_from(["querycraft"]);
        assert!(cli.command.is_none());
    }
}
