use clap::{Parser, Subcommand};
use eyre::Result;

mod commands;

/// Ask questions of a Dify-backed knowledge base from the terminal.
#[derive(Debug, Parser)]
#[command(name = "wikihelper", version, about)]
struct Cli {
    /// Start a fresh conversation instead of resuming the latest one.
    #[arg(long, global = true, conflicts_with = "conversation")]
    new: bool,

    /// Resume the conversation with this id.
    #[arg(long, global = true, value_name = "ID")]
    conversation: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ask one question and print the answer as it streams in.
    Ask {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Interactive chat, one line per question.
    Chat,
    /// Run a completion application with input variables.
    Complete {
        #[arg(long = "input", short, value_name = "KEY=VALUE", value_parser = commands::parse_input)]
        inputs: Vec<(String, String)>,
    },
    /// Browse or prune the local conversation history.
    History {
        #[command(subcommand)]
        action: HistoryCommand,
    },
    /// Show or change settings.
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
enum HistoryCommand {
    /// List conversations, most recent first.
    List,
    /// Print the messages of a conversation.
    Show { id: String },
    /// Delete a conversation and its messages.
    Delete { id: String },
    /// Delete a single message.
    DeleteMessage { id: i64 },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective settings with the API key redacted.
    Show,
    SetKey { key: String },
    ClearKey,
    SetBaseUrl { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    // Logs go to stderr so streamed answers on stdout stay clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let target = commands::Target::from_flags(cli.new, cli.conversation);

    match cli.command {
        Command::Ask { query } => commands::ask(&query.join(" "), target).await,
        Command::Chat => commands::chat(target).await,
        Command::Complete { inputs } => commands::complete(inputs.into_iter().collect()).await,
        Command::History { action } => match action {
            HistoryCommand::List => commands::history_list(),
            HistoryCommand::Show { id } => commands::history_show(&id),
            HistoryCommand::Delete { id } => commands::history_delete(&id),
            HistoryCommand::DeleteMessage { id } => commands::history_delete_message(id),
        },
        Command::Config { action } => match action {
            ConfigCommand::Show => commands::config_show(),
            ConfigCommand::SetKey { key } => commands::config_set_key(&key),
            ConfigCommand::ClearKey => commands::config_clear_key(),
            ConfigCommand::SetBaseUrl { url } => commands::config_set_base_url(&url),
        },
    }
}
