use clap::{Parser, Subcommand};

/// Shophook - Shopify webhook ingestion and reliable delivery
#[derive(Parser, Debug)]
#[command(name = "shophookd")]
#[command(version = shophook_core::VERSION)]
#[command(about = "Shophook webhook server daemon", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Default, PartialEq, Eq)]
pub enum Commands {
    /// Run server and drain worker in foreground (default if no command given)
    #[default]
    Run,

    /// Run a single drain cycle and exit
    Drain,

    /// List dead-lettered jobs
    Failed {
        /// Maximum number of jobs to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: i64,
    },

    /// Put a dead-lettered job back in the queue
    Retry {
        /// Job ID (ULID)
        job_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_run() {
        let cli = Cli::parse_from(["shophookd"]);
        assert_eq!(cli.command.unwrap_or_default(), Commands::Run);
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::parse_from(["shophookd", "failed", "--limit", "5"]);
        assert_eq!(cli.command, Some(Commands::Failed { limit: 5 }));

        let cli = Cli::parse_from(["shophookd", "retry", "01HQ9RHHSFA5HRGFH1A7X0Y1FJ"]);
        assert_eq!(
            cli.command,
            Some(Commands::Retry {
                job_id: "01HQ9RHHSFA5HRGFH1A7X0Y1FJ".to_string()
            })
        );
    }
}
