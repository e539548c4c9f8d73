use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use grammers_client::grammers_tl_types as tl; // Telegram TL types (for InputPeer and raw requests)
use grammers_client::types::Chat;
use grammers_client::{Client, Config, SignInError};
use log::warn;
use std::io::{self, BufRead, Write};
use url::Url;

use crate::database;
use crate::error::CrawlError;

/// Messages per GetHistory request (100 is the API maximum).
pub const PAGE_LIMIT: i32 = 100;
/// Attempts per page when the API answers with a flood wait.
const FLOOD_RETRIES: u32 = 3;

/// What kind of conversation a chat is. Stored as text in the chats table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Group,
    Megagroup,
    Gigagroup,
    Broadcast,
}

impl ChatKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatKind::Group => "group",
            ChatKind::Megagroup => "megagroup",
            ChatKind::Gigagroup => "gigagroup",
            ChatKind::Broadcast => "broadcast",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "group" => Some(ChatKind::Group),
            "megagroup" => Some(ChatKind::Megagroup),
            "gigagroup" => Some(ChatKind::Gigagroup),
            "broadcast" => Some(ChatKind::Broadcast),
            _ => None,
        }
    }
}

/// Metadata for a chat, as stored in the chats table. The access hash is what
/// lets us rebuild an InputPeer for a numeric id later without resolving the
/// username again, which makes the chats table our entity cache.
#[derive(Debug, Clone)]
pub struct ChatInfo {
    pub id: i64,
    pub name: String,
    pub username: Option<String>,
    pub kind: ChatKind,
    pub can_comment: bool,
    pub access_hash: Option<i64>,
}

/// A message as it comes off the wire, reduced to the fields we care about.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub id: i32,
    /// UNIX timestamp (UTC) of the message.
    pub date: i64,
    pub text: String,
    pub views: Option<i32>,
    pub forwards: Option<i32>,
    /// Channel this message was forwarded from, if any.
    pub fwd_channel_id: Option<i64>,
    /// Raw URL of an attached web page preview, if any.
    pub webpage_url: Option<String>,
    pub is_poll: bool,
}

/// A message shaped for the messages table.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub chat_id: i64,
    pub message_id: i32,
    pub content: String,
    pub url: Option<String>,
    pub hash: String,
    pub creation_date: DateTime<Utc>,
    pub views: Option<i32>,
    pub forwards: Option<i32>,
}

/// Connect to Telegram and ensure authorization. Saves session to `session_file`.
pub async fn connect(api_id: i32, api_hash: &str, session_file: &str) -> Result<Client> {
    let client = Client::connect(Config {
        session: grammers_client::session::Session::load_file_or_create(session_file)?,
        api_id,
        api_hash: api_hash.to_string(),
        params: Default::default(),
    })
    .await?;

    if !client.is_authorized().await? {
        println!("First-time login: please enter your Telegram credentials.");
        let phone = prompt("Enter your phone number (international format): ")?;
        let token = client.request_login_code(phone.trim()).await?;
        let code = prompt("Enter the login code you received: ")?;
        match client.sign_in(&token, code.trim()).await {
            Err(SignInError::PasswordRequired(password_token)) => {
                // Two-factor authentication (password) is enabled
                let hint = password_token.hint().unwrap_or("none");
                let password = prompt(&format!("Enter your password (hint: {}): ", hint))?;
                client.check_password(password_token, password.trim()).await?;
            }
            Err(e) => bail!("login failed: {}", e),
            Ok(_) => {}
        }
        println!("Logged in to Telegram successfully.");
        if let Err(e) = client.session().save_to_file(session_file) {
            warn!(
                "failed to save session file {}: {} (you will need to log in again next time)",
                session_file, e
            );
        }
    }
    Ok(client)
}

/// Prompt the operator for a line of input on the console.
pub fn prompt(message: &str) -> Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{}", message)?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

/// Resolve a username to chat metadata via the client. User accounts are
/// rejected; the crawler deals in groups and channels.
pub async fn resolve_username(client: &Client, username: &str) -> Result<ChatInfo> {
    let chat = client
        .resolve_username(username)
        .await?
        .ok_or_else(|| anyhow!("no chat found for username \"{}\"", username))?;
    match chat {
        Chat::Channel(channel) => {
            let raw = &channel.raw;
            let kind = if raw.gigagroup {
                ChatKind::Gigagroup
            } else if raw.megagroup {
                ChatKind::Megagroup
            } else {
                ChatKind::Broadcast
            };
            // Broadcast channels take comments only through a linked
            // discussion group, which GetFullChannel lists next to the channel.
            let can_comment = match kind {
                ChatKind::Broadcast => {
                    has_linked_chat(client, raw.id, raw.access_hash.unwrap_or(0)).await?
                }
                _ => true,
            };
            Ok(ChatInfo {
                id: raw.id,
                name: raw.title.clone(),
                username: raw.username.clone(),
                kind,
                can_comment,
                access_hash: raw.access_hash,
            })
        }
        Chat::Group(group) => Ok(ChatInfo {
            id: group.id(),
            name: group.title().to_string(),
            username: None,
            kind: ChatKind::Group,
            can_comment: true,
            access_hash: None,
        }),
        Chat::User(_) => bail!("\"{}\" is a user, not a group or channel", username),
    }
}

async fn has_linked_chat(client: &Client, channel_id: i64, access_hash: i64) -> Result<bool> {
    let req = tl::functions::channels::GetFullChannel {
        channel: tl::types::InputChannel {
            channel_id,
            access_hash,
        }
        .into(),
    };
    let full = match client.invoke(&req).await? {
        tl::enums::messages::ChatFull::Full(f) => f,
    };
    Ok(full.chats.len() > 1)
}

/// Build the InputPeer for a stored chat.
pub fn input_peer(chat: &ChatInfo) -> tl::enums::InputPeer {
    match chat.kind {
        ChatKind::Group => {
            tl::enums::InputPeer::Chat(tl::types::InputPeerChat { chat_id: chat.id })
        }
        _ => tl::enums::InputPeer::Channel(tl::types::InputPeerChannel {
            channel_id: chat.id,
            access_hash: chat.access_hash.unwrap_or(0),
        }),
    }
}

/// One page of a chat's history. `raw_count` and `min_id` cover every raw
/// entry, including service messages and holes that don't make it into
/// `messages`; paging decisions have to be based on those, not on how many
/// text messages survived.
#[derive(Debug)]
pub struct HistoryPage {
    pub messages: Vec<FetchedMessage>,
    pub raw_count: usize,
    pub min_id: i32,
}

/// Fetch one page of history for a chat, newest first. `offset_id` continues
/// paging below a previous page; `offset_date` starts paging at messages older
/// than the given timestamp (0 for no bound). Flood waits are retried with
/// backoff; private/invalid peers surface as CrawlError::ChatPrivate.
pub async fn fetch_history_page(
    client: &Client,
    chat: &ChatInfo,
    offset_id: i32,
    offset_date: i32,
) -> Result<HistoryPage> {
    let req = tl::functions::messages::GetHistory {
        peer: input_peer(chat),
        offset_id,
        offset_date,
        add_offset: 0,
        limit: PAGE_LIMIT,
        max_id: 0,
        min_id: 0,
        hash: 0,
    };
    let mut attempts = 0;
    let mut retry_delay = 2;
    loop {
        match client.invoke(&req).await {
            Ok(history) => {
                let raw = match history {
                    tl::enums::messages::Messages::Messages(m) => m.messages,
                    tl::enums::messages::Messages::Slice(s) => s.messages,
                    tl::enums::messages::Messages::ChannelMessages(c) => c.messages,
                    tl::enums::messages::Messages::NotModified(_) => Vec::new(),
                };
                let min_id = raw
                    .iter()
                    .map(|m| match m {
                        tl::enums::Message::Empty(m) => m.id,
                        tl::enums::Message::Message(m) => m.id,
                        tl::enums::Message::Service(m) => m.id,
                    })
                    .min()
                    .unwrap_or(0);
                return Ok(HistoryPage {
                    messages: raw
                        .iter()
                        .filter_map(|m| match m {
                            tl::enums::Message::Message(m) => Some(convert_message(m)),
                            // Service messages and holes carry no text
                            _ => None,
                        })
                        .collect(),
                    raw_count: raw.len(),
                    min_id,
                });
            }
            Err(e) => {
                let text = e.to_string().to_lowercase();
                attempts += 1;
                if text.contains("flood") && attempts < FLOOD_RETRIES {
                    warn!(
                        "flood wait fetching history for \"{}\", retrying in {}s",
                        chat.name, retry_delay
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(retry_delay)).await;
                    retry_delay *= 2;
                    continue;
                }
                if text.contains("channel_private")
                    || text.contains("channel_invalid")
                    || text.contains("peer_id_invalid")
                    || text.contains("chat_id_invalid")
                {
                    return Err(CrawlError::ChatPrivate(chat.id).into());
                }
                return Err(e.into());
            }
        }
    }
}

fn convert_message(m: &tl::types::Message) -> FetchedMessage {
    let fwd_channel_id = m.fwd_from.as_ref().and_then(|fwd| {
        let tl::enums::MessageFwdHeader::Header(header) = fwd;
        header.from_id.as_ref().and_then(|peer| match peer {
            tl::enums::Peer::Channel(c) => Some(c.channel_id),
            _ => None,
        })
    });
    let webpage_url = match &m.media {
        Some(tl::enums::MessageMedia::WebPage(media)) => match &media.webpage {
            tl::enums::WebPage::Page(page) => Some(page.url.clone()),
            _ => None,
        },
        _ => None,
    };
    let is_poll = matches!(&m.media, Some(tl::enums::MessageMedia::Poll(_)));
    FetchedMessage {
        id: m.id,
        date: i64::from(m.date),
        text: m.message.clone(),
        views: m.views,
        forwards: m.forwards,
        fwd_channel_id,
        webpage_url,
        is_poll,
    }
}

/// Shape a fetched message into a row for the messages table.
pub fn to_record(chat_id: i64, msg: &FetchedMessage, hash_size: usize) -> MessageRecord {
    MessageRecord {
        chat_id,
        message_id: msg.id,
        content: msg.text.clone(),
        url: msg.webpage_url.as_deref().and_then(normalize_webpage_url),
        hash: database::message_hash(&msg.text, hash_size),
        creation_date: DateTime::<Utc>::from_timestamp(msg.date, 0).unwrap_or_default(),
        views: msg.views,
        forwards: msg.forwards,
    }
}

/// Reduce a linked web page URL to its base domain, dropping a leading "www."
/// and Telegram's own t.me links.
pub fn normalize_webpage_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    let host = parsed.host_str()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    if host == "t.me" {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_webpage_urls() {
        assert_eq!(
            normalize_webpage_url("https://www.example.org/some/article?x=1"),
            Some("example.org".to_string())
        );
        assert_eq!(
            normalize_webpage_url("http://news.example.org/a"),
            Some("news.example.org".to_string())
        );
        assert_eq!(normalize_webpage_url("https://t.me/somechannel/123"), None);
        assert_eq!(normalize_webpage_url("https://www.t.me/somechannel"), None);
        assert_eq!(normalize_webpage_url("not a url"), None);
    }

    #[test]
    fn chat_kind_round_trips() {
        for kind in [
            ChatKind::Group,
            ChatKind::Megagroup,
            ChatKind::Gigagroup,
            ChatKind::Broadcast,
        ] {
            assert_eq!(ChatKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ChatKind::parse("bogus"), None);
    }

    #[test]
    fn record_carries_normalized_url_and_hash() {
        let msg = FetchedMessage {
            id: 7,
            date: 1_625_140_800,
            text: "read this".to_string(),
            views: Some(120),
            forwards: Some(3),
            fwd_channel_id: None,
            webpage_url: Some("https://www.example.org/a".to_string()),
            is_poll: false,
        };
        let record = to_record(42, &msg, 16);
        assert_eq!(record.chat_id, 42);
        assert_eq!(record.message_id, 7);
        assert_eq!(record.url.as_deref(), Some("example.org"));
        assert_eq!(record.hash.len(), 16);
        assert_eq!(record.creation_date.timestamp(), 1_625_140_800);
    }
}
