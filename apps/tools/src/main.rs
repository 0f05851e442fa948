use anyhow::Result;
use clap::{Parser, Subcommand};
use client_core::auth::{decode_claims, is_token_expired};
use storage::{LocalStore, COMPARED_ITEMS_KEY, TOKEN_KEY};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/client.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints every stored key with its value.
    Dump,
    /// Shows the claims carried by the stored token.
    Token,
    SetToken {
        token: String,
    },
    ClearSession,
    ClearCompare,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let database_url =
        storage::normalize_database_url(&cli.database_url, "sqlite://./data/client.db");
    let store = LocalStore::new(&database_url).await?;

    match cli.command {
        Command::Dump => {
            for entry in store.entries().await? {
                let value = if entry.key == TOKEN_KEY {
                    format!("<{} bytes>", entry.value.len())
                } else {
                    entry.value
                };
                println!("{}\t{}\t{}", entry.key, entry.updated_at.to_rfc3339(), value);
            }
        }
        Command::Token => match store.auth_token().await? {
            Some(token) => {
                let claims = decode_claims(&token).unwrap_or_default();
                println!("{}", serde_json::to_string_pretty(&claims)?);
                println!("expired={}", is_token_expired(&token));
            }
            None => println!("no token stored"),
        },
        Command::SetToken { token } => {
            store.set_auth_token(token.trim()).await?;
            println!("token stored");
        }
        Command::ClearSession => {
            store.clear_session().await?;
            println!("session cleared");
        }
        Command::ClearCompare => {
            let removed = store.remove_item(COMPARED_ITEMS_KEY).await?;
            println!("comparison cleared (had entries: {removed})");
        }
    }

    Ok(())
}
