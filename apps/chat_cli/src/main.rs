use std::{collections::HashSet, path::PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    compare::{comparison_rows, filter_listings, format_price},
    config::{load_settings_from, DEFAULT_SETTINGS_FILE},
    ClientEvent, CompareSelection, ConversationSummary, FailedDelivery, FirstMessage,
    LocalMessage, RentalClient,
};
use shared::{
    domain::{ConversationId, MessageId, PostId, UserId},
    protocol::{RegisterRequest, UpdateUserRequest},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,
    /// Overrides `api_base_url` from the config file and environment.
    #[arg(long)]
    api_base_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    SignIn {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Register {
        #[arg(long)]
        full_name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        phone_number: Option<String>,
    },
    SignOut,
    Whoami,
    /// Shows another user's public profile.
    User {
        id: String,
    },
    /// Updates the signed-in user's name or phone number.
    EditProfile {
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        phone_number: Option<String>,
    },
    /// Lists recent news, or prints one article.
    News {
        slug: Option<String>,
        #[arg(long, default_value_t = 5)]
        page_size: u32,
    },
    Favorites {
        #[command(subcommand)]
        action: FavoriteAction,
    },
    /// Lists conversations, newest activity first.
    Conversations {
        #[arg(long)]
        watch: bool,
    },
    /// Opens a conversation: typed lines are sent, `/retry` resends the last
    /// failed message, `/quit` leaves.
    Chat {
        #[arg(long)]
        conversation: String,
    },
    /// Messages a user, reusing an existing conversation with them.
    Start {
        #[arg(long)]
        receiver: String,
        #[arg(long)]
        message: String,
    },
    Listings {
        #[arg(long, default_value = "")]
        query: String,
    },
    Compare {
        #[command(subcommand)]
        action: CompareAction,
    },
}

#[derive(Subcommand, Debug)]
enum CompareAction {
    Show,
    Pick { first: String, second: String },
    Remove { slug: String },
    Clear,
}

#[derive(Subcommand, Debug)]
enum FavoriteAction {
    List,
    /// Adds the listing, or removes it when it is already saved.
    Toggle { post_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings_from(&args.config, |name| std::env::var(name).ok());
    if let Some(api_base_url) = args.api_base_url {
        settings.api_base_url = api_base_url;
    }
    let client = RentalClient::connect(settings).await?;

    match args.command {
        Command::SignIn { email, password } => {
            let claims = client.auth().sign_in(&email, &password).await?;
            match claims.subject() {
                Some(user_id) => println!("signed in as user_id={user_id}"),
                None => println!("signed in"),
            }
        }
        Command::Register {
            full_name,
            email,
            password,
            phone_number,
        } => {
            client
                .http()
                .register(&RegisterRequest {
                    full_name,
                    email,
                    password,
                    phone_number,
                })
                .await?;
            println!("registered; sign in to continue");
        }
        Command::SignOut => {
            client.auth().sign_out().await?;
            println!("signed out");
        }
        Command::Whoami => {
            let user_id = client.require_user().await?;
            println!("user_id={user_id}");
        }
        Command::User { id } => {
            client.require_user().await?;
            let profile = client.http().user_by_id(&UserId::new(id)).await?;
            println!(
                "{}  {}  {}",
                profile.id,
                profile.full_name.as_deref().unwrap_or("-"),
                profile.email.as_deref().unwrap_or("-")
            );
        }
        Command::EditProfile {
            full_name,
            phone_number,
        } => {
            let me = client.require_user().await?;
            let current = client.http().user_by_id(&me).await?;
            let update = UpdateUserRequest::merged(&current, full_name, phone_number);
            client.http().update_user(&me, &update).await?;
            println!("profile updated: {} {}", update.full_name, update.phone_number);
        }
        Command::News { slug, page_size } => news(&client, slug, page_size).await?,
        Command::Favorites { action } => favorites(&client, action).await?,
        Command::Conversations { watch } => conversations(&client, watch).await?,
        Command::Chat { conversation } => chat(&client, ConversationId::new(conversation)).await?,
        Command::Start { receiver, message } => {
            start(&client, UserId::new(receiver), &message).await?
        }
        Command::Listings { query } => {
            let page = client.compare_board().candidates().await?;
            for post in filter_listings(&page.data, &query) {
                println!(
                    "{:<32} {:>14}/month  {}",
                    post.slug,
                    format_price(post.price),
                    post.title
                );
            }
        }
        Command::Compare { action } => compare(&client, action).await?,
    }

    Ok(())
}

async fn news(client: &RentalClient, slug: Option<String>, page_size: u32) -> Result<()> {
    match slug {
        Some(slug) => {
            let article = client.http().news_by_slug(&slug).await?;
            println!("{}", article.title);
            if let Some(summary) = &article.short_description {
                println!("{summary}");
            }
            println!();
            println!("{}", article.description.as_deref().unwrap_or("(no content)"));
        }
        None => {
            for item in client.http().news(1, page_size).await? {
                println!("{:<32} {}", item.slug, item.title);
            }
        }
    }
    Ok(())
}

async fn favorites(client: &RentalClient, action: FavoriteAction) -> Result<()> {
    let me = client.require_user().await?;
    let mut list = client.favorites(me);
    list.load().await?;
    match action {
        FavoriteAction::List => {
            if list.items().is_empty() {
                println!("no favorites yet");
            }
            for post in list.items() {
                println!(
                    "{:<8} {:<32} {:>14}/month  {}",
                    post.id,
                    post.slug,
                    format_price(post.price),
                    post.title
                );
            }
        }
        FavoriteAction::Toggle { post_id } => {
            let post_id = PostId::new(post_id);
            if list.toggle(&post_id).await? {
                println!("added {post_id} to favorites");
            } else {
                println!("removed {post_id} from favorites");
            }
        }
    }
    Ok(())
}

fn print_conversations(conversations: &[ConversationSummary]) {
    if conversations.is_empty() {
        println!("no conversations yet");
    }
    for summary in conversations {
        let when = summary
            .last_active
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{}  with {}  [{}]  {}",
            summary.id, summary.partner_id, when, summary.last_message
        );
    }
}

async fn conversations(client: &RentalClient, watch: bool) -> Result<()> {
    let me = client.require_user().await?;
    let inbox = client.inbox(me);
    let mut events = inbox.subscribe();
    if let Err(err) = inbox.activate().await {
        warn!(error = %err, "conversation list failed to load");
    }
    print_conversations(&inbox.conversations().await);
    if !watch {
        inbox.close();
        return Ok(());
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ClientEvent::ConversationsUpdated { conversations }) => {
                    println!("---");
                    print_conversations(&conversations);
                }
                Ok(ClientEvent::LoadFailed { reason, .. }) => {
                    eprintln!("could not load conversations: {reason}");
                }
                Ok(_) => {}
                Err(err) => bail!("event stream closed: {err}"),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    inbox.close();
    Ok(())
}

fn print_message(me: &UserId, message: &LocalMessage) {
    let who = if &message.sender_id == me {
        "you".to_string()
    } else {
        message.sender_id.to_string()
    };
    let marker = if message.provisional { " (sending)" } else { "" };
    println!(
        "[{}] {who}: {}{marker}",
        message.timestamp.format("%H:%M"),
        message.content
    );
}

async fn chat(client: &RentalClient, conversation_id: ConversationId) -> Result<()> {
    let me = client.require_user().await?;
    let session = client.conversation(conversation_id.clone(), me.clone());
    let mut events = session.subscribe();
    if let Err(err) = session.activate().await {
        eprintln!("could not load messages: {err}");
    }
    let mut printed: HashSet<MessageId> = HashSet::new();
    for message in session.messages().await {
        print_message(&me, &message);
        printed.insert(message.id);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_failed: Option<FailedDelivery> = None;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/retry" => match last_failed.take() {
                        Some(failed) => {
                            session.resend(&failed).await?;
                        }
                        None => println!("nothing to retry"),
                    },
                    text => {
                        session.send(text).await?;
                    }
                }
            }
            event = events.recv() => match event {
                Ok(ClientEvent::MessagesUpdated { messages, .. }) => {
                    for message in messages {
                        if printed.insert(message.id.clone()) {
                            print_message(&me, &message);
                        }
                    }
                }
                Ok(ClientEvent::DeliveryFailed(failed)) => {
                    eprintln!(
                        "message not sent after {} attempts: {} (type /retry to send it again)",
                        failed.attempts, failed.reason
                    );
                    last_failed = Some(failed);
                }
                Ok(ClientEvent::LoadFailed { reason, .. }) => {
                    eprintln!("could not load messages: {reason}");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "chat: missed events"),
            },
        }
    }

    session.close();
    println!("left conversation {conversation_id}");
    Ok(())
}

async fn start(client: &RentalClient, receiver: UserId, message: &str) -> Result<()> {
    let me = client.require_user().await?;
    let starter = client.starter();

    if let Some(existing) = starter.find_existing(&me, &receiver).await? {
        println!("reusing conversation {}", existing.id);
        let session = client.conversation(existing.id.clone(), me);
        if let Err(err) = session.activate().await {
            warn!(error = %err, "conversation failed to load before sending");
        }
        let outcome = session.send(message).await?.outcome().await;
        session.close();
        match outcome {
            Ok(report) => println!("message sent after {} attempt(s)", report.attempts),
            Err(err) => eprintln!("message not sent: {err}"),
        }
        return Ok(());
    }

    let started = starter.start(&me, &receiver, message).await?;
    println!("created conversation {}", started.conversation.id);
    match started.first_message {
        FirstMessage::Delivered(report) => {
            println!("message sent after {} attempt(s)", report.attempts)
        }
        FirstMessage::Failed { attempts, reason } => eprintln!(
            "conversation created but the message failed after {attempts} attempts: {reason}"
        ),
    }
    Ok(())
}

async fn compare(client: &RentalClient, action: CompareAction) -> Result<()> {
    let board = client.compare_board();
    match action {
        CompareAction::Show => {
            let items = board.load().await?;
            if items.is_empty() {
                println!("nothing selected for comparison");
                return Ok(());
            }
            let titles: Vec<&str> = items.iter().map(|item| item.title.as_str()).collect();
            println!("{:<20} {}", "", titles.join(" | "));
            for row in comparison_rows(&items) {
                println!("{:<20} {}", row.label, row.values.join(" | "));
            }
        }
        CompareAction::Pick { first, second } => {
            let page = board.candidates().await?;
            let mut selection = CompareSelection::new();
            for slug in [&first, &second] {
                let post = page
                    .data
                    .iter()
                    .find(|post| &post.slug == slug)
                    .with_context(|| format!("no approved listing with slug '{slug}'"))?;
                selection.toggle(post)?;
            }
            let saved = board.save(&selection).await?;
            println!("comparing {}", saved.join(" and "));
        }
        CompareAction::Remove { slug } => {
            let remaining = board.remove(&slug).await?;
            println!("remaining: {}", remaining.join(", "));
        }
        CompareAction::Clear => {
            board.clear().await?;
            println!("comparison cleared");
        }
    }
    Ok(())
}
