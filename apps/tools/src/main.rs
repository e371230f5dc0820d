use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    cache::ConversationCache,
    config::{load_settings, prepare_database_url},
};
use shared::domain::{AccountId, Direction, PhoneKey};
use storage::{CacheStore, Storage};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides the cache location from settings.
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accounts with cached state, and the last active one.
    Accounts,
    Contacts {
        account_id: String,
    },
    History {
        account_id: String,
        phone: String,
    },
    SetActive {
        account_id: String,
    },
    /// Drops every cached entry of one account.
    Clear {
        account_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let database_url = cli
        .database_url
        .unwrap_or_else(|| load_settings(cli.config.as_deref()).database_url);
    let database_url = prepare_database_url(&database_url);
    let storage = Arc::new(
        Storage::new(&database_url)
            .await
            .with_context(|| format!("failed to open cache at {database_url}"))?,
    );
    let cache = ConversationCache::new(storage.clone());

    match cli.command {
        Command::Accounts => {
            let last_active = storage.last_active_account().await?;
            for account_id in storage.cached_accounts().await? {
                let marker = if Some(&account_id) == last_active.as_ref() {
                    '*'
                } else {
                    ' '
                };
                println!("{marker} {account_id}");
            }
        }
        Command::Contacts { account_id } => {
            let account_id = AccountId::new(account_id);
            for contact in cache.load_contacts(&account_id).await {
                println!(
                    "{:<16} {:<24} count={} last={}",
                    contact.display_phone,
                    contact.name,
                    contact.message_count,
                    contact.last_message_preview.as_deref().unwrap_or("-")
                );
            }
        }
        Command::History { account_id, phone } => {
            let account_id = AccountId::new(account_id);
            let phone_key = PhoneKey::normalize(&phone);
            for message in cache.load_history(&account_id, &phone_key).await {
                let direction = match message.direction {
                    Direction::Inbound => "in ",
                    Direction::Outbound => "out",
                };
                println!("{} {direction} {}", message.timestamp, message.text);
            }
        }
        Command::SetActive { account_id } => {
            let account_id = AccountId::new(account_id);
            storage.set_last_active_account(&account_id).await?;
            println!("last active account set to {account_id}");
        }
        Command::Clear { account_id } => {
            let account_id = AccountId::new(account_id);
            storage.clear_account(&account_id).await?;
            println!("cleared cache for {account_id}");
        }
    }

    Ok(())
}
