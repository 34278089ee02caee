use std::collections::BTreeMap;
use std::io::Write;

use eyre::{Result, WrapErr};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use wikihelper_cli::config::{AppConfig, ConfigStore};
use wikihelper_cli::session::{ChatSession, Reply};
use wikihelper_core::models::message::ChatMessage;
use wikihelper_dify::client::{DifyClient, DifyConfig};
use wikihelper_history::store::HistoryStore;

/// Which conversation a question goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Latest,
    Fresh,
    Existing(String),
}

impl Target {
    pub fn from_flags(new: bool, conversation: Option<String>) -> Self {
        match (new, conversation) {
            (_, Some(id)) => Self::Existing(id),
            (true, None) => Self::Fresh,
            (false, None) => Self::Latest,
        }
    }
}

/// Parse a `KEY=VALUE` completion input.
pub fn parse_input(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in `{raw}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn load_config() -> Result<(ConfigStore, AppConfig)> {
    let store = ConfigStore::default_location()?;
    let config = store.load().wrap_err("failed to load settings")?;
    Ok((store, config))
}

fn open_history(config: &AppConfig) -> Result<HistoryStore> {
    let path = config.database_path()?;
    HistoryStore::open(&path).wrap_err_with(|| format!("failed to open {}", path.display()))
}

fn dify_client(config: &AppConfig) -> Result<Option<DifyClient>> {
    config
        .dify_config()
        .map(DifyClient::new)
        .transpose()
        .wrap_err("invalid Dify settings")
}

fn open_session(target: Target) -> Result<ChatSession<DifyClient>> {
    let (_, config) = load_config()?;
    let config = config.with_env_overrides();
    let history = open_history(&config)?;
    let backend = dify_client(&config)?;
    if backend.is_none() {
        warn!("no API key configured, answering in demo mode");
        eprintln!("No API key configured: demo mode. Run `wikihelper config set-key <key>`.");
    }

    let mut session = ChatSession::new(history, backend);
    match target {
        Target::Latest => {
            session.open_latest()?;
        }
        Target::Fresh => {}
        Target::Existing(id) => {
            session.open_conversation(&id)?;
        }
    }
    if let Some(conversation) = session.current_conversation() {
        info!(id = %conversation.id, title = %conversation.title, "resuming conversation");
    }
    Ok(session)
}

async fn ask_once(session: &mut ChatSession<DifyClient>, query: &str) -> Result<Reply> {
    let mut stdout = std::io::stdout();
    let reply = session
        .send(query, |chunk| {
            print!("{chunk}");
            // A failed flush only delays output.
            let _ = stdout.flush();
        })
        .await;
    println!();
    let reply = reply?;
    print_sources(&reply);
    Ok(reply)
}

fn print_sources(reply: &Reply) {
    if reply.references.is_empty() {
        return;
    }
    println!("\nSources:");
    for (index, reference) in reply.references.iter().enumerate() {
        println!("  [{}] {}", index + 1, reference.label());
    }
}

pub async fn ask(query: &str, target: Target) -> Result<()> {
    let mut session = open_session(target)?;
    ask_once(&mut session, query).await?;
    Ok(())
}

pub async fn chat(target: Target) -> Result<()> {
    let mut session = open_session(target)?;
    match session.current_conversation() {
        Some(conversation) => println!("Resuming \"{}\" ({})", conversation.title, conversation.id),
        None => println!("New conversation"),
    }
    println!("Type /new for a fresh conversation, /history to review it, /quit to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/new" => {
                let conversation = session.new_conversation(None)?;
                println!("Started {}", conversation.id);
            }
            "/history" => {
                for message in session.history()? {
                    print_message(&message);
                }
            }
            query => {
                if let Err(e) = ask_once(&mut session, query).await {
                    eprintln!("error: {e}");
                }
            }
        }
    }
    Ok(())
}

pub async fn complete(inputs: BTreeMap<String, String>) -> Result<()> {
    let (_, config) = load_config()?;
    let config = config.with_env_overrides();
    let client = dify_client(&config)?
        .ok_or_else(|| eyre::eyre!("no API key configured; run `wikihelper config set-key <key>`"))?;

    let response = client.send_completion_message(inputs).await?;
    println!("{}", response.answer);
    Ok(())
}

pub fn history_list() -> Result<()> {
    let (_, config) = load_config()?;
    let history = open_history(&config)?;
    let conversations = history.list_conversations()?;
    if conversations.is_empty() {
        println!("No conversations yet.");
        return Ok(());
    }
    for conversation in conversations {
        println!(
            "{}  {}  {}",
            conversation.id,
            conversation.updated_at.strftime("%Y-%m-%d %H:%M"),
            conversation.title
        );
        let preview = conversation.preview(60);
        if !preview.is_empty() {
            println!("    {preview}");
        }
    }
    Ok(())
}

pub fn history_show(id: &str) -> Result<()> {
    let (_, config) = load_config()?;
    let history = open_history(&config)?;
    let conversation = history
        .get_conversation(id)?
        .ok_or_else(|| eyre::eyre!("conversation {id} not found"))?;

    println!("{} ({})", conversation.title, conversation.id);
    for message in history.messages(id)? {
        print_message(&message);
    }
    Ok(())
}

pub fn history_delete(id: &str) -> Result<()> {
    let (_, config) = load_config()?;
    let mut history = open_history(&config)?;
    let removed = history.delete_conversation(id)?;
    println!("Deleted conversation {id} ({removed} messages)");
    Ok(())
}

pub fn history_delete_message(id: i64) -> Result<()> {
    let (_, config) = load_config()?;
    let history = open_history(&config)?;
    history.delete_message(id)?;
    println!("Deleted message {id}");
    Ok(())
}

fn print_message(message: &ChatMessage) {
    let who = if message.is_user() { "you" } else { "assistant" };
    println!(
        "\n[{}] #{} {}:\n{}",
        message.timestamp.strftime("%Y-%m-%d %H:%M"),
        message.id,
        who,
        message.text
    );
    for reference in message.references.iter().flatten() {
        println!("  - {}", reference.label());
    }
}

pub fn config_show() -> Result<()> {
    let (store, config) = load_config()?;
    let effective = config.with_env_overrides();
    println!("config file: {}", store.path().display());
    println!("database:    {}", effective.database_path()?.display());
    println!("{}", serde_json::to_string_pretty(&effective.info())?);
    Ok(())
}

pub fn config_set_key(key: &str) -> Result<()> {
    let (store, mut config) = load_config()?;
    config.set_api_key(key);
    if !config.has_api_key() {
        eyre::bail!("API key is empty");
    }
    store.save(&config)?;
    println!("API key saved to {}", store.path().display());
    Ok(())
}

pub fn config_clear_key() -> Result<()> {
    let (store, mut config) = load_config()?;
    config.clear_api_key();
    store.save(&config)?;
    println!("API key removed; questions will get demo answers.");
    Ok(())
}

pub fn config_set_base_url(url: &str) -> Result<()> {
    let (store, mut config) = load_config()?;
    let url = url.trim();
    // Validate before saving.
    DifyClient::new(DifyConfig {
        base_url: url.to_string(),
        ..DifyConfig::new("placeholder")
    })
    .wrap_err("invalid base URL")?;
    config.base_url = url.to_string();
    store.save(&config)?;
    println!("Base URL set to {url}");
    Ok(())
}
