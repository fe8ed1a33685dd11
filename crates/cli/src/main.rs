//! blv CLI: the main entry point.
//!
//! Commands:
//! - `chat`         Interactive or single-message chat
//! - `analyze`      Map the flow of captured HTTP requests
//! - `hooks check`  Dry-run the pre-tool hooks against a tool call

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "blv",
    about = "blv: business-logic vulnerability assistant",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chat with the assistant
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Conversation to continue (created if missing)
        #[arg(long)]
        conversation: Option<String>,
    },

    /// Map the flow of the captured HTTP requests
    Analyze {
        /// Existing flow map (JSON file) to extend
        #[arg(long)]
        existing: Option<PathBuf>,
    },

    /// Inspect hooks
    Hooks {
        #[command(subcommand)]
        command: HooksCommand,
    },
}

#[derive(Subcommand, Debug)]
enum HooksCommand {
    /// Evaluate the pre-tool hooks against a tool name and JSON arguments
    Check {
        #[arg(long)]
        tool: String,

        #[arg(long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat {
            message,
            conversation,
        } => commands::chat::run(message, conversation).await?,
        Commands::Analyze { existing } => commands::analyze::run(existing).await?,
        Commands::Hooks {
            command: HooksCommand::Check { tool, args },
        } => commands::hooks::check(&tool, &args).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_single_message() {
        let cli = Cli::try_parse_from(["blv", "chat", "-m", "hi", "--conversation", "shop"]).unwrap();
        match cli.command {
            Commands::Chat {
                message,
                conversation,
            } => {
                assert_eq!(message.as_deref(), Some("hi"));
                assert_eq!(conversation.as_deref(), Some("shop"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn hooks_check_defaults_args() {
        let cli = Cli::try_parse_from(["blv", "--verbose", "hooks", "check", "--tool", "save_event"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Hooks {
                command: HooksCommand::Check { tool, args },
            } => {
                assert_eq!(tool, "save_event");
                assert_eq!(args, "{}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn hooks_check_requires_tool() {
        assert!(Cli::try_parse_from(["blv", "hooks", "check"]).is_err());
    }
}
