use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use client_core::{config::load_settings, ClientEvent, RelayClient};
use shared::domain::{Direction, Message};
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio_stream::{
    wrappers::{BroadcastStream, LinesStream},
    StreamExt,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Flat TOML settings file; defaults to ./relay_client.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    /// Account to use when no previous session was saved.
    #[arg(long)]
    account: Option<String>,
    /// Skip the WebSocket push channel.
    #[arg(long)]
    no_push: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Contacts,
    Open(String),
    Send(String),
    Add { name: String, phone: String },
    Clear(String),
    Accounts,
    Account(String),
    Status,
    Help,
    Quit,
}

const HELP: &str = "\
/contacts             list contacts of the active account
/open <phone>         open a conversation
/send <text>          send to the open conversation (plain text works too)
/add <phone> <name>   add a contact
/clear <phone>        clear a conversation
/accounts             list accounts
/account <id>         switch account
/status               relay and push channel status
/quit";

fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    if !line.starts_with('/') {
        return Ok(Command::Send(line.to_string()));
    }
    let (name, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let require = |what: &str| {
        if rest.is_empty() {
            Err(format!("{name} needs {what}"))
        } else {
            Ok(rest.to_string())
        }
    };

    match name {
        "/contacts" => Ok(Command::Contacts),
        "/open" => require("a phone number").map(Command::Open),
        "/send" => require("some text").map(Command::Send),
        "/add" => {
            let (phone, name) = rest
                .split_once(' ')
                .ok_or_else(|| "/add needs a phone number and a name".to_string())?;
            Ok(Command::Add {
                name: name.trim().to_string(),
                phone: phone.to_string(),
            })
        }
        "/clear" => require("a phone number").map(Command::Clear),
        "/accounts" => Ok(Command::Accounts),
        "/account" => require("an account id").map(Command::Account),
        "/status" => Ok(Command::Status),
        "/help" => Ok(Command::Help),
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("unknown command {other}, try /help")),
    }
}

fn print_messages(messages: &[Message]) {
    for message in messages {
        let arrow = match message.direction {
            Direction::Inbound => "<<",
            Direction::Outbound => ">>",
        };
        println!("  {arrow} [{}] {}", message.timestamp, message.text);
    }
}

async fn print_contacts(client: &RelayClient) {
    let active = client.active_contact().await;
    for contact in client.contacts().await {
        let marker = if active.as_ref() == Some(&contact.phone_key) {
            '*'
        } else {
            ' '
        };
        println!(
            "{marker} {:<24} {:<16} {:>4}  {}",
            contact.name,
            contact.display_phone,
            contact.message_count,
            contact.last_message_preview.as_deref().unwrap_or("")
        );
    }
}

async fn print_event(client: &RelayClient, event: ClientEvent) {
    match event {
        ClientEvent::AccountsLoaded(accounts) => {
            println!("-- {} account(s) available", accounts.len());
        }
        ClientEvent::AccountSwitched {
            account_id,
            contacts,
        } => {
            println!("-- switched to {account_id} ({} cached contacts)", contacts.len());
        }
        ClientEvent::ContactListChanged { account_id } => {
            println!("-- contacts updated for {account_id}");
        }
        ClientEvent::ConversationChanged { phone_key, .. } => {
            println!("-- conversation +{phone_key}");
            print_messages(&client.history(phone_key.as_str()).await);
        }
        ClientEvent::ConversationLoaded {
            phone_key,
            messages,
            ..
        } => {
            println!("-- conversation +{phone_key} ({} messages)", messages.len());
            print_messages(&messages);
        }
        ClientEvent::RelayStatusChanged(status) => println!("-- relay {status:?}"),
        ClientEvent::PushConnectionChanged(state) => println!("-- push {state:?}"),
        ClientEvent::SoftError(reason) => println!("!! {reason}"),
    }
}

async fn run_command(client: &Arc<RelayClient>, command: Command) -> bool {
    let result = match command {
        Command::Contacts => {
            print_contacts(client).await;
            Ok(())
        }
        Command::Open(phone) => client.select_contact(&phone).await.map(|_| ()),
        Command::Send(text) => client.send_message(&text).await.map(|_| ()),
        Command::Add { name, phone } => client.add_contact(&name, &phone).await.map(|contact| {
            println!("added {} ({})", contact.name, contact.display_phone);
        }),
        Command::Clear(phone) => client.clear_history(&phone).await,
        Command::Accounts => {
            let active = client.active_account_id().await;
            for account in client.accounts().await {
                let marker = if account.id == active { '*' } else { ' ' };
                println!("{marker} {:<16} {}", account.id.as_str(), account.display_name);
            }
            Ok(())
        }
        Command::Account(id) => client.switch_account(&id).await.map(|switched| {
            if !switched {
                println!("{id} is already active");
            }
        }),
        Command::Status => {
            println!(
                "account={} relay={:?} push={:?}",
                client.active_account_id().await,
                client.relay_status().await,
                client.push_state().await
            );
            Ok(())
        }
        Command::Help => {
            println!("{HELP}");
            Ok(())
        }
        Command::Quit => return false,
    };

    if let Err(err) = result {
        println!("!! {err}");
    }
    true
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref());
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if let Some(database_url) = args.database_url {
        settings.database_url = database_url;
    }
    if let Some(account) = args.account {
        settings.default_account_id = account;
    }

    let client = RelayClient::connect(settings).await?;

    let printer = {
        let client = Arc::clone(&client);
        let mut events = BroadcastStream::new(client.subscribe_events());
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => print_event(&client, event).await,
                    Err(err) => warn!("console: {err}"),
                }
            }
        })
    };

    client.start().await;
    if !args.no_push {
        client.start_push_connection().await?;
    }
    client.start_liveness_probe().await;
    println!("{HELP}");

    let mut lines = LinesStream::new(BufReader::new(stdin()).lines());
    while let Some(line) = lines.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(reason) => {
                println!("!! {reason}");
                continue;
            }
        };
        if !run_command(&client, command).await {
            break;
        }
    }

    client.shutdown().await;
    printer.abort();
    Ok(())
}
