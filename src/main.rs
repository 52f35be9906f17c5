use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use sigma_chat::models::{Feedback, MessageRole, PendingAttachment};
use sigma_chat::remote::HttpBackend;
use sigma_chat::{ChatClient, ClientConfig, SendOutcome};

const HELP: &str = "\
commands:
  /new                 start a new chat
  /list                list conversations by group
  /select <id>         switch to a conversation
  /delete <id>         delete a conversation
  /regen               regenerate the last reply
  /like <message-id>   mark a reply as helpful
  /dislike <message-id>
  /attach <path>       attach a file to the next message
  /logout              forget the credential
  /quit
anything else is sent as a message";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sigma_chat=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // ── Wiring ────────────────────────────────────────────────────────────────
    let config = ClientConfig::from_env()?;
    info!("Using backend {}", config.backend_url);
    let backend = HttpBackend::new(&config)?;
    let client = ChatClient::new(
        Arc::new(backend),
        config.auth_token.clone(),
        config.source_base_url.clone(),
    );

    let imported = client.load_history().await;
    println!("{imported} conversations loaded. Type /help for commands.");

    // ── Input loop ────────────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, arg) = line.split_once(' ').map_or((line, ""), |(c, a)| (c, a.trim()));
        match command {
            "" => continue,
            "/quit" => break,
            "/help" => println!("{HELP}"),
            "/new" => println!("started {}", client.new_chat()),
            "/list" => print_sessions(&client),
            "/select" => {
                if !client.select_session(arg) {
                    println!("no conversation {arg}");
                }
            }
            "/delete" => match client.delete_session(arg).await {
                Ok(()) => println!("deleted {arg}"),
                Err(e) => println!("could not delete {arg}: {e}"),
            },
            "/regen" => {
                let last_user = client
                    .store()
                    .current()
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == MessageRole::User)
                    .cloned();
                match last_user {
                    Some(message) => report(&client, client.regenerate(&message).await),
                    None => println!("nothing to regenerate"),
                }
            }
            "/like" | "/dislike" => {
                let feedback =
                    if command == "/like" { Feedback::Liked } else { Feedback::Disliked };
                if !client.set_feedback(arg, feedback) {
                    println!("no message {arg} in this conversation");
                }
            }
            "/attach" => match read_attachment(Path::new(arg)).await {
                Ok(file) => {
                    println!("attached {}", file.name);
                    client.add_attachment(file);
                }
                Err(e) => println!("{e:#}"),
            },
            "/logout" => client.logout(),
            _ => {
                client.set_input(line);
                report(&client, client.submit().await);
            }
        }
    }

    Ok(())
}

fn report(client: &ChatClient, outcome: SendOutcome) {
    match outcome {
        SendOutcome::Rejected(reason) => println!("not sent: {reason}"),
        SendOutcome::Orphaned => println!("the conversation was removed before the reply arrived"),
        SendOutcome::Replied { .. } | SendOutcome::Failed { .. } => {
            let store = client.store();
            if let Some(reply) = store.current().messages.last() {
                println!("[{}] {}", reply.id, reply.content);
                for source in reply.visible_sources() {
                    println!("  - {} <{}>", source.name, source.url);
                }
            }
        }
    }
}

fn print_sessions(client: &ChatClient) {
    let store = client.store();
    let current = store.current_id().clone();
    for (group, sessions) in store.grouped_view(&Local::now()) {
        println!("{group}");
        for session in sessions {
            let marker = if session.id == current { '*' } else { ' ' };
            println!(" {marker} {:>6}  {}", session.id.as_str(), session.title);
        }
    }
}

async fn read_attachment(path: &Path) -> anyhow::Result<PendingAttachment> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("could not read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string());
    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    let mime_type = match extension.as_deref() {
        Some("pdf") => "application/pdf",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    };
    Ok(PendingAttachment::new(name, mime_type, bytes))
}
