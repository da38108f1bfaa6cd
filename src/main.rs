use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, MessageId};
use tokio::sync::Mutex;

mod catalog;
mod codec;
mod error;
mod handlers;
mod oauth;
mod router;
mod session;
mod store;

use catalog::{BookDetail, BookSummary, CatalogApi, HttpCatalog, ShelfSummary};
use codec::{Intent, Operation};
use error::BotError;
use handlers::{Interactions, Reply, ViewSettings};
use oauth::{
    nonce, oauth_encode, parse_token_response, AccessToken, BeginOutcome, HandshakeCoordinator,
    OAuthProvider, RequestToken, Signer,
};
use router::{command_argument, parse_command, Event, Route, Router};
use session::{resolve, CatalogSession};
use store::{CredentialStore, JsonCredentialStore, CREDENTIALS_FILE};

const DEFAULT_API_BASE_URL: &str = "https://www.goodreads.com";
const DEFAULT_SEARCH_PAGE_SIZE: usize = 20;
const DEFAULT_BOOKS_PAGE_SIZE: usize = 5;
const DEFAULT_SHELF: &str = "to-read";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct ConfigFile {
    token: String,
    consumer_key: String,
    consumer_secret: String,
    api_base_url: Option<String>,
    data_dir: PathBuf,
    search_page_size: Option<usize>,
    books_page_size: Option<usize>,
    default_shelf: Option<String>,
    request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone)]
struct Config {
    token: String,
    consumer_key: String,
    consumer_secret: String,
    api_base_url: String,
    data_dir: PathBuf,
    search_page_size: usize,
    books_page_size: usize,
    default_shelf: String,
    request_timeout_seconds: u64,
}

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    config: PathBuf,
}

struct AppState {
    interactions: Interactions,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = load_config(&args.config)?;
    fs::create_dir_all(&config.data_dir).context("create data_dir")?;

    let store = Arc::new(JsonCredentialStore::open(
        config.data_dir.join(CREDENTIALS_FILE),
    )?);
    let remote = Arc::new(HttpCatalog::new(&config)?);
    let interactions = Interactions::new(
        store,
        remote.clone(),
        remote,
        Router::default(),
        ViewSettings::from_config(&config),
    );
    let state = Arc::new(AppState { interactions });

    let bot = Bot::new(config.token.clone());

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    info!("starting polling");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> Result<()> {
    let user_id = match msg.from() {
        Some(user) => user.id.0,
        None => return Ok(()),
    };

    let text = match msg.text() {
        Some(text) => text.to_string(),
        None => return Ok(()),
    };

    let replies = state
        .interactions
        .handle(Event::Text { user_id, text })
        .await;
    deliver(&bot, msg.chat.id, None, None, replies).await;
    Ok(())
}

async fn handle_callback(bot: Bot, q: CallbackQuery, state: Arc<AppState>) -> Result<()> {
    let user_id = q.from.id.0;
    let Some(token) = q.data.clone() else {
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };

    let replies = state
        .interactions
        .handle(Event::Callback { user_id, token })
        .await;
    let chat_id = q
        .message
        .as_ref()
        .map(|message| message.chat.id)
        .unwrap_or_else(|| chat_id_from_user_id(user_id));
    let origin = q.message.as_ref().map(|message| message.id);
    deliver(&bot, chat_id, origin, Some(q.id.as_str()), replies).await;
    Ok(())
}

/// Sends every reply in order. A failed delivery is logged and does not stop
/// the rest; callbacks are always acknowledged.
async fn deliver(
    bot: &Bot,
    chat_id: ChatId,
    origin: Option<MessageId>,
    callback_id: Option<&str>,
    replies: Vec<Reply>,
) {
    let mut answered = false;
    for reply in replies {
        if let Reply::Answer { .. } = reply {
            if callback_id.is_none() || answered {
                continue;
            }
            answered = true;
        }
        if let Err(err) = send_reply(bot, chat_id, origin, callback_id, reply).await {
            if is_message_not_modified_error(&err) {
                info!("message in chat {} already up to date", chat_id);
            } else {
                error!("deliver reply to chat {} failed: {:#}", chat_id, err);
            }
        }
    }

    if let (Some(id), false) = (callback_id, answered) {
        if let Err(err) = bot.answer_callback_query(id).await {
            error!("answer callback query failed: {:#}", err);
        }
    }
}

async fn send_reply(
    bot: &Bot,
    chat_id: ChatId,
    origin: Option<MessageId>,
    callback_id: Option<&str>,
    reply: Reply,
) -> std::result::Result<(), teloxide::RequestError> {
    match reply {
        Reply::Text { text, markup } => {
            send_text(bot, chat_id, text, markup).await?;
        }
        Reply::Edit { text, markup } => match (origin, text, markup) {
            (None, Some(text), markup) => {
                send_text(bot, chat_id, text, markup).await?;
            }
            (None, None, _) => {}
            (Some(message_id), Some(text), Some(kb)) => {
                bot.edit_message_text(chat_id, message_id, text)
                    .disable_web_page_preview(true)
                    .reply_markup(kb)
                    .await?;
            }
            (Some(message_id), Some(text), None) => {
                bot.edit_message_text(chat_id, message_id, text)
                    .disable_web_page_preview(true)
                    .await?;
            }
            (Some(message_id), None, Some(kb)) => {
                bot.edit_message_reply_markup(chat_id, message_id)
                    .reply_markup(kb)
                    .await?;
            }
            (Some(_), None, None) => {}
        },
        Reply::Answer { text } => {
            if let Some(id) = callback_id {
                match text {
                    Some(text) => {
                        bot.answer_callback_query(id).text(text).await?;
                    }
                    None => {
                        bot.answer_callback_query(id).await?;
                    }
                }
            }
        }
    }
    Ok(())
}

async fn send_text(
    bot: &Bot,
    chat_id: ChatId,
    text: String,
    markup: Option<InlineKeyboardMarkup>,
) -> std::result::Result<Message, teloxide::RequestError> {
    let request = bot
        .send_message(chat_id, text)
        .disable_web_page_preview(true);
    match markup {
        Some(kb) => request.reply_markup(kb).await,
        None => request.await,
    }
}

fn is_message_not_modified_error(err: &teloxide::RequestError) -> bool {
    err.to_string()
        .to_ascii_lowercase()
        .contains("message is not modified")
}

fn load_config(path: &Path) -> Result<Config> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    let config_file: ConfigFile = toml::from_str(&contents).context("parse config")?;
    config_from_file(config_file)
}

fn config_from_file(file: ConfigFile) -> Result<Config> {
    let search_page_size = file.search_page_size.unwrap_or(DEFAULT_SEARCH_PAGE_SIZE);
    let books_page_size = file.books_page_size.unwrap_or(DEFAULT_BOOKS_PAGE_SIZE);
    if search_page_size == 0 || books_page_size == 0 {
        return Err(anyhow!("page sizes must be at least 1"));
    }
    let default_shelf = file
        .default_shelf
        .map(|shelf| shelf.trim().to_string())
        .filter(|shelf| !shelf.is_empty())
        .unwrap_or_else(|| DEFAULT_SHELF.to_string());

    Ok(Config {
        token: file.token,
        consumer_key: file.consumer_key,
        consumer_secret: file.consumer_secret,
        api_base_url: file
            .api_base_url
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
        data_dir: file.data_dir,
        search_page_size,
        books_page_size,
        default_shelf,
        request_timeout_seconds: file
            .request_timeout_seconds
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
    })
}

fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}

fn chat_id_from_user_id(user_id: u64) -> ChatId {
    ChatId(user_id as i64)
}
