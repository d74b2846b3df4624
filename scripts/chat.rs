use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use shima::client::observer::ChatObserver;
use shima::client::state::{Entry, EntryStatus, Outcome};
use shima::client::ChatClient;
use shima::config::client::ClientConfig;
use shima::modules::chat::schema::AiModel;
use shima::modules::session::model::Role;
use shima::modules::session::schema::NewMessage;
use shima::services::store::StoreError;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Prints the streaming reply as it grows.
#[derive(Default)]
struct TerminalView {
    printed: Mutex<(String, usize)>,
}

impl ChatObserver for TerminalView {
    fn messages_changed(&self, _session_id: &str, messages: &[Entry]) {
        let Some(last) = messages.last() else {
            return;
        };
        if last.message.role != Role::Assistant {
            return;
        }

        match last.status {
            EntryStatus::Pending | EntryStatus::Local => {
                let mut printed = self.printed.lock();
                if printed.0 != last.message.id {
                    *printed = (last.message.id.clone(), 0);
                }
                let content = &last.message.content;
                if content.len() > printed.1 && content.is_char_boundary(printed.1) {
                    print!("{}", &content[printed.1..]);
                    std::io::stdout().flush().ok();
                    printed.1 = content.len();
                }
            }
            EntryStatus::Failed => println!("\n⚠️  {}", last.message.content),
            EntryStatus::Stored => {}
        }
    }

    fn persist_failed(&self, message: &NewMessage, error: &StoreError) {
        eprintln!("\n(not saved: {} message, {})", message.role.as_str(), error);
    }
}

fn print_help() {
    println!("Commands:");
    println!("  /sessions          list sessions");
    println!("  /open <n>          open session n");
    println!("  /new [title]       create a session");
    println!("  /rename <title>    rename the open session");
    println!("  /delete            delete the open session");
    println!("  /model pro|flash   switch model");
    println!("  /quit              sign out and exit");
    println!("Anything else is sent as a message.");
}

fn print_sessions(client: &ChatClient) {
    let selected = client.selected();
    for (i, session) in client.sessions().iter().enumerate() {
        let marker = if selected.as_deref() == Some(session.id.as_str()) { "*" } else { " " };
        println!("{} {:>2}. {}", marker, i + 1, session.display_title());
    }
}

fn print_messages(client: &ChatClient) {
    for entry in client.messages() {
        println!("{}: {}", entry.message.role.as_str(), entry.message.content);
    }
}

async fn handle_command(client: &ChatClient, line: &str) -> anyhow::Result<bool> {
    let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
    let arg = arg.trim();

    match command {
        "/quit" => return Ok(false),
        "/help" => print_help(),
        "/sessions" => print_sessions(client),
        "/open" => {
            let sessions = client.sessions();
            match arg.parse::<usize>().ok().and_then(|n| sessions.get(n.wrapping_sub(1))) {
                Some(session) => {
                    client.select_session(&session.id).await?;
                    print_messages(client);
                }
                None => println!("No such session"),
            }
        }
        "/new" => {
            let session = client.create_session(arg).await?;
            println!("✅ Created \"{}\"", session.display_title());
        }
        "/rename" => match client.selected() {
            Some(id) => {
                if client.rename_session(&id, arg).await? {
                    println!("✅ Renamed");
                }
            }
            None => println!("No session open"),
        },
        "/delete" => match client.selected() {
            Some(id) => {
                client.delete_session(&id).await?;
                println!("🗑️  Deleted");
            }
            None => println!("No session open"),
        },
        "/model" => match arg {
            "pro" => client.set_model(AiModel::Pro),
            "flash" => client.set_model(AiModel::Flash),
            _ => println!("Use /model pro or /model flash"),
        },
        _ => println!("Unknown command, try /help"),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env()?;
    let client = ChatClient::from_config(&config).with_observer(Arc::new(TerminalView::default()));

    let email = std::env::var("SHIMA_EMAIL")?;
    let password = std::env::var("SHIMA_PASSWORD")?;
    let user = client.sign_in(&email, &password).await?;

    println!("\n💬 SHIMA chat, signed in as {}\n", user.email.as_deref().unwrap_or(&user.id));
    print_sessions(&client);
    print_messages(&client);
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim_end();
        if line.starts_with('/') {
            match handle_command(&client, line).await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    println!("❌ {}", e);
                    continue;
                }
            }
        }

        match client.send(line).await {
            Ok(Outcome::Success) => println!(),
            Ok(Outcome::Error) => {}
            Err(rejected) => println!("❌ {}", rejected),
        }
    }

    client.sign_out().await?;
    Ok(())
}
