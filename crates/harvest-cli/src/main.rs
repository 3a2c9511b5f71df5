//! # harvest
//!
//! Command-line front end for the Harvest chat core.  Each invocation
//! signs in from the stored session, runs one command against the local
//! database and signs out again.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use harvest_chat::{
    ChatConfig, ChatSession, FileSessionStore, Identity, PresenceLabel, RestUserDirectory,
    SessionUser, StoredSession,
};
use harvest_shared::{resolve_room_id, ChatError, RoomId, UserId};
use harvest_store::{Database, Message, SqliteBackend};

#[derive(Parser, Debug)]
#[command(author, version, about = "Harvest marketplace chat from the command line.")]
struct Args {
    /// SQLite database file (overrides HARVEST_DB_PATH)
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    /// Session file (overrides HARVEST_SESSION_PATH)
    #[arg(long, value_name = "PATH", global = true)]
    session: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a session the way the marketplace sign-in flow does
    Login {
        id: UserId,
        name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        avatar: Option<String>,
        #[arg(long, default_value = "local")]
        token: String,
    },
    /// Show the signed-in user
    Whoami,
    /// List rooms, most recent first
    Rooms,
    /// List rooms with counterpart profiles from the marketplace API
    Conversations,
    /// Open (or create) the room with another user
    Open { user: UserId },
    /// Send a message to another user
    Send {
        user: UserId,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Print recent messages, paging further back with --pages
    History {
        user: UserId,
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Follow a room and the other user's presence until Ctrl+C
    Watch { user: UserId },
    /// Show another user's presence
    Presence { user: UserId },
    /// Mark the other user's messages as read
    Read { user: UserId },
    /// Go offline and forget the stored session
    Logout,
    /// Delete the room with another user and all of its messages
    Purge { user: UserId },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so command output stays pipeable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,harvest_chat=debug,harvest_store=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = ChatConfig::from_env();
    if let Some(db) = args.db {
        config.db_path = Some(db);
    }
    if let Some(session) = args.session {
        config.session_path = Some(session);
    }

    let session_path = config
        .session_path
        .clone()
        .or_else(FileSessionStore::default_path)
        .context("could not determine a location for the session file")?;
    let sessions = Arc::new(FileSessionStore::new(session_path));

    if let Command::Login {
        id,
        name,
        email,
        avatar,
        token,
    } = args.command
    {
        let user = SessionUser {
            id,
            username: name,
            email,
            avatar,
        };
        sessions.save(&StoredSession { token, user }).await?;
        println!("Signed in; session stored at {}", sessions.path().display());
        return Ok(());
    }

    let db_path = match &config.db_path {
        Some(path) => path.clone(),
        None => Database::default_path()?,
    };
    info!(path = %db_path.display(), "opening database");
    let backend = Arc::new(SqliteBackend::new(Database::open_at(&db_path)?));

    let chat = ChatSession::new(backend, sessions.clone(), &config);
    let me = chat
        .initialize()
        .await
        .context("not signed in; run `harvest login <id> <name>` first")?;

    let outcome = run(&chat, &me, &config, args.command).await;
    chat.teardown().await?;
    if let Err(e) = &outcome {
        if e.downcast_ref::<ChatError>().is_some_and(ChatError::is_transient) {
            eprintln!("The local store is temporarily unavailable; try the command again.");
        }
    }
    if outcome? {
        sessions.clear().await?;
        println!("Signed out.");
    }
    Ok(())
}

/// Run one command.  Returns `true` if the session should be forgotten.
async fn run(
    chat: &ChatSession,
    me: &Identity,
    config: &ChatConfig,
    command: Command,
) -> Result<bool> {
    match command {
        Command::Login { .. } => bail!("login runs before sign-in"),

        Command::Whoami => {
            println!("{} ({})", me.display_name, me.user_id);
            if let Some(email) = &me.email {
                println!("  {email}");
            }
        }

        Command::Rooms => {
            let rooms = chat.rooms().list_rooms_for_user(&me.user_id).await?;
            if rooms.is_empty() {
                println!("No conversations yet.");
            }
            for summary in rooms {
                let unread = match summary.unread_count {
                    0 => String::new(),
                    n => format!(" [{n} unread]"),
                };
                println!(
                    "{}{}  {}",
                    summary.counterpart,
                    unread,
                    summary.room.last_message.as_deref().unwrap_or("(no messages)")
                );
            }
        }

        Command::Conversations => {
            let directory = RestUserDirectory::new(&config.api_url, chat.token().await?)?;
            let conversations = chat
                .rooms()
                .list_conversations(&me.user_id, &directory)
                .await?;
            for conversation in conversations {
                println!(
                    "{} ({}) [{} unread]",
                    conversation.profile.name,
                    conversation.summary.counterpart.short(),
                    conversation.summary.unread_count
                );
            }
        }

        Command::Open { user } => {
            let room = chat.open_room(&user).await?;
            println!("{room}");
        }

        Command::Send { user, text } => {
            let room = chat.open_room(&user).await?;
            let id = chat.send(&room, &text.join(" ")).await?;
            println!("sent {id}");
        }

        Command::History { user, pages } => {
            let room = resolve_room_id(&me.user_id, &user);
            let mut history = chat.messages().latest(&room, config.history_page).await?;
            for _ in 1..pages {
                let Some(oldest) = history.first() else { break };
                let mut older = chat
                    .messages()
                    .load_older_messages(&room, oldest, config.history_page)
                    .await?;
                if older.is_empty() {
                    break;
                }
                older.append(&mut history);
                history = older;
            }
            for message in &history {
                print_message(me, message);
            }
        }

        Command::Watch { user } => watch(chat, me, &user).await?,

        Command::Presence { user } => {
            let record = chat.presence().current(&user).await?;
            println!("{}", describe(chat.presence().label(&record)));
        }

        Command::Read { user } => {
            let room = resolve_room_id(&me.user_id, &user);
            let flipped = chat.messages().mark_read(&room, &me.user_id).await?;
            println!("{flipped} message(s) marked read");
        }

        Command::Logout => return Ok(true),

        Command::Purge { user } => {
            let room = resolve_room_id(&me.user_id, &user);
            if chat.rooms().purge_room(&room).await? {
                println!("Deleted {room}");
            } else {
                println!("No room {room}");
            }
        }
    }
    Ok(false)
}

async fn watch(chat: &ChatSession, me: &Identity, other: &UserId) -> Result<()> {
    let room: RoomId = chat.open_room(other).await?;
    let mut messages = chat.messages().subscribe_to_messages(&room, None).await?;
    let mut presence = chat.presence().subscribe_to_presence(other).await?;
    let mut last_seq = i64::MIN;

    loop {
        tokio::select! {
            window = messages.next() => {
                let Some(window) = window else { break };
                for message in window.iter().filter(|m| m.seq > last_seq) {
                    print_message(me, message);
                }
                if let Some(newest) = window.last() {
                    last_seq = last_seq.max(newest.seq);
                }
                chat.messages().mark_read(&room, &me.user_id).await?;
            }
            record = presence.next() => {
                let Some(record) = record else { break };
                println!("-- {} is {}", other.short(), describe(chat.presence().label(&record)));
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving room");
                break;
            }
        }
    }
    Ok(())
}

fn print_message(me: &Identity, message: &Message) {
    let who = if message.sender_id == me.user_id {
        "me".to_string()
    } else {
        message.sender_name.clone()
    };
    let ticks = match (message.sent, message.delivered, message.is_read) {
        (_, _, true) => " ✓✓ read",
        (_, true, _) => " ✓✓",
        (true, _, _) => " ✓",
        _ => "",
    };
    println!(
        "[{}] {}: {}{}",
        message.timestamp.with_timezone(&chrono::Local).format("%d %b %H:%M"),
        who,
        message.text,
        ticks
    );
}

fn describe(label: PresenceLabel) -> String {
    match label {
        PresenceLabel::Online => "online".to_string(),
        PresenceLabel::LastSeen(at) => format!(
            "last seen {}",
            at.with_timezone(&chrono::Local).format("%d %b %H:%M")
        ),
        PresenceLabel::Unknown => "offline".to_string(),
    }
}
