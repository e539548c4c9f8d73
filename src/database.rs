use anyhow::{anyhow, Result};
use chrono::{NaiveDateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::path::Path;

use crate::error::CrawlError;
use crate::telegram::{ChatInfo, ChatKind, MessageRecord};

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn now_string() -> String {
    Utc::now().format(DATE_FORMAT).to_string()
}

/// First `hash_size` hex characters of the SHA-256 of the message content.
/// This is the primary key of the messages table and the dedup handle.
pub fn message_hash(content: &str, hash_size: usize) -> String {
    let mut hex = String::with_capacity(64);
    for byte in Sha256::digest(content.as_bytes()) {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex.truncate(hash_size);
    hex
}

/// Open the database file (creating parent directories) and ensure the schema.
pub fn open(path: &str) -> Result<Connection> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Create all tables if they don't exist. Safe to run repeatedly.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;

         CREATE TABLE IF NOT EXISTS chats (
            id           INTEGER PRIMARY KEY,
            name         TEXT NOT NULL,
            username     TEXT,
            kind         TEXT NOT NULL,
            can_comment  BOOLEAN NOT NULL DEFAULT 0,
            access_hash  INTEGER,
            added        TEXT NOT NULL
         );

         CREATE TABLE IF NOT EXISTS messages (
            hash           TEXT PRIMARY KEY,
            chat_id        INTEGER NOT NULL REFERENCES chats(id),
            message_id     INTEGER NOT NULL,
            content        TEXT NOT NULL,
            url            TEXT,
            creation_date  TEXT NOT NULL,
            last_retrieved TEXT NOT NULL,
            views          INTEGER,
            forwards       INTEGER
         );
         CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, message_id);

         -- Label lookup tables. Ids must stay consistent across collaborators'
         -- databases, so import/export always carries them explicitly.
         CREATE TABLE IF NOT EXISTS topics (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            name       TEXT NOT NULL UNIQUE,
            short_name TEXT NOT NULL UNIQUE,
            added      TEXT NOT NULL
         );

         CREATE TABLE IF NOT EXISTS misconceptions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            topic_id    INTEGER NOT NULL REFERENCES topics(id),
            name        TEXT NOT NULL UNIQUE,
            short_name  TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            added       TEXT NOT NULL
         );

         CREATE TABLE IF NOT EXISTS message_topics (
            chat_id      INTEGER NOT NULL,
            message_hash TEXT NOT NULL REFERENCES messages(hash),
            topic_id     INTEGER NOT NULL REFERENCES topics(id),
            added        TEXT NOT NULL
         );

         -- A row with a NULL misconception_id records that a message was
         -- labeled and explicitly supports no misconception.
         CREATE TABLE IF NOT EXISTS message_misconceptions (
            chat_id          INTEGER NOT NULL,
            message_hash     TEXT NOT NULL REFERENCES messages(hash),
            misconception_id INTEGER REFERENCES misconceptions(id),
            added            TEXT NOT NULL
         );

         CREATE TABLE IF NOT EXISTS messages_to_skip (
            message_hash TEXT NOT NULL,
            chat_id      INTEGER NOT NULL,
            added        TEXT NOT NULL,
            UNIQUE(message_hash, chat_id) ON CONFLICT IGNORE
         );",
    )?;
    Ok(())
}

/// Insert or update chat metadata, keeping the row's original `added` date.
pub fn save_chat(conn: &Connection, chat: &ChatInfo) -> Result<()> {
    conn.execute(
        "INSERT INTO chats (id, name, username, kind, can_comment, access_hash, added)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            name=excluded.name, username=excluded.username, kind=excluded.kind,
            can_comment=excluded.can_comment, access_hash=excluded.access_hash;",
        params![
            chat.id,
            chat.name,
            chat.username,
            chat.kind.as_str(),
            chat.can_comment,
            chat.access_hash,
            now_string(),
        ],
    )?;
    Ok(())
}

pub fn get_chat(conn: &Connection, id: i64) -> Result<Option<ChatInfo>> {
    let row = conn
        .query_row(
            "SELECT id, name, username, kind, can_comment, access_hash FROM chats WHERE id = ?1;",
            [id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                ))
            },
        )
        .optional()?;
    match row {
        None => Ok(None),
        Some((id, name, username, kind, can_comment, access_hash)) => {
            let kind = ChatKind::parse(&kind)
                .ok_or_else(|| anyhow!("chat {} has unknown kind \"{}\"", id, kind))?;
            Ok(Some(ChatInfo {
                id,
                name,
                username,
                kind,
                can_comment,
                access_hash,
            }))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted,
    /// The message was already stored; the stored row was refreshed with the
    /// latest content, url, views, forwards and retrieval time.
    Duplicate,
}

/// Insert a message, or refresh it when its hash is already present. A hash
/// match with different content *and* a different chat/message id is a real
/// collision and comes back as an error.
pub fn store_message(conn: &mut Connection, msg: &MessageRecord) -> Result<StoreOutcome> {
    let existing = conn
        .query_row(
            "SELECT chat_id, message_id, content FROM messages WHERE hash = ?1;",
            [&msg.hash],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i32>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;
    match existing {
        None => {
            conn.execute(
                "INSERT INTO messages
                    (hash, chat_id, message_id, content, url, creation_date, last_retrieved, views, forwards)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
                params![
                    msg.hash,
                    msg.chat_id,
                    msg.message_id,
                    msg.content,
                    msg.url,
                    msg.creation_date.format(DATE_FORMAT).to_string(),
                    now_string(),
                    msg.views,
                    msg.forwards,
                ],
            )?;
            Ok(StoreOutcome::Inserted)
        }
        Some((stored_chat, stored_message, stored_content)) => {
            // Same content, or the same message edited in place: refresh.
            if stored_content == msg.content
                || (stored_chat == msg.chat_id && stored_message == msg.message_id)
            {
                conn.execute(
                    "UPDATE messages
                     SET content=?1, url=?2, views=?3, forwards=?4, last_retrieved=?5
                     WHERE hash=?6;",
                    params![
                        msg.content,
                        msg.url,
                        msg.views,
                        msg.forwards,
                        now_string(),
                        msg.hash,
                    ],
                )?;
                Ok(StoreOutcome::Duplicate)
            } else {
                Err(CrawlError::HashCollision {
                    hash: msg.hash.clone(),
                    stored_chat,
                    stored_message,
                    new_chat: msg.chat_id,
                    new_message: msg.message_id,
                }
                .into())
            }
        }
    }
}

pub fn get_message(conn: &Connection, hash: &str) -> Result<Option<MessageRecord>> {
    let row = conn
        .query_row(
            "SELECT chat_id, message_id, content, url, creation_date, views, forwards
             FROM messages WHERE hash = ?1;",
            [hash],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<i32>>(5)?,
                    row.get::<_, Option<i32>>(6)?,
                ))
            },
        )
        .optional()?;
    match row {
        None => Ok(None),
        Some((chat_id, message_id, content, url, creation_date, views, forwards)) => {
            let naive = NaiveDateTime::parse_from_str(&creation_date, DATE_FORMAT)?;
            Ok(Some(MessageRecord {
                chat_id,
                message_id,
                content,
                url,
                hash: hash.to_string(),
                creation_date: Utc.from_utc_datetime(&naive),
                views,
                forwards,
            }))
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Topic {
    pub id: i64,
    pub name: String,
    pub short_name: String,
    pub added: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Misconception {
    pub id: i64,
    pub topic_id: i64,
    pub name: String,
    pub short_name: String,
    pub description: String,
    pub added: String,
}

pub fn add_topic(conn: &Connection, name: &str, short_name: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO topics (name, short_name, added) VALUES (?1, ?2, ?3);",
        params![name, short_name, now_string()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn add_misconception(
    conn: &Connection,
    topic_id: i64,
    name: &str,
    short_name: &str,
    description: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO misconceptions (topic_id, name, short_name, description, added)
         VALUES (?1, ?2, ?3, ?4, ?5);",
        params![topic_id, name, short_name, description, now_string()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_topics(conn: &Connection) -> Result<Vec<Topic>> {
    let mut stmt = conn.prepare("SELECT id, name, short_name, added FROM topics ORDER BY id;")?;
    let rows = stmt.query_map([], |row| {
        Ok(Topic {
            id: row.get(0)?,
            name: row.get(1)?,
            short_name: row.get(2)?,
            added: row.get(3)?,
        })
    })?;
    let mut topics = Vec::new();
    for topic in rows {
        topics.push(topic?);
    }
    Ok(topics)
}

pub fn topic_by_name(conn: &Connection, name: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row("SELECT id FROM topics WHERE name = ?1;", [name], |row| {
            row.get(0)
        })
        .optional()?)
}

pub fn list_misconceptions(conn: &Connection) -> Result<Vec<Misconception>> {
    misconception_query(conn, "SELECT id, topic_id, name, short_name, description, added FROM misconceptions ORDER BY id;", &[])
}

pub fn misconceptions_for_topic(conn: &Connection, topic_id: i64) -> Result<Vec<Misconception>> {
    misconception_query(
        conn,
        "SELECT id, topic_id, name, short_name, description, added FROM misconceptions
         WHERE topic_id = ?1 ORDER BY id;",
        &[&topic_id],
    )
}

pub fn misconception_by_name(conn: &Connection, name: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT id FROM misconceptions WHERE name = ?1;",
            [name],
            |row| row.get(0),
        )
        .optional()?)
}

fn misconception_query(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Misconception>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| {
        Ok(Misconception {
            id: row.get(0)?,
            topic_id: row.get(1)?,
            name: row.get(2)?,
            short_name: row.get(3)?,
            description: row.get(4)?,
            added: row.get(5)?,
        })
    })?;
    let mut misconceptions = Vec::new();
    for m in rows {
        misconceptions.push(m?);
    }
    Ok(misconceptions)
}

/// Replace all labels of a message with the given selection. An empty
/// misconception selection is recorded as a single NULL misconception row so
/// "labeled, nothing applies" stays distinguishable from "never labeled".
pub fn replace_labels(
    conn: &mut Connection,
    chat_id: i64,
    message_hash: &str,
    topic_ids: &[i64],
    misconception_ids: &[i64],
) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM message_topics WHERE message_hash = ?1;",
        [message_hash],
    )?;
    tx.execute(
        "DELETE FROM message_misconceptions WHERE message_hash = ?1;",
        [message_hash],
    )?;
    for topic_id in topic_ids {
        tx.execute(
            "INSERT INTO message_topics (chat_id, message_hash, topic_id, added)
             VALUES (?1, ?2, ?3, ?4);",
            params![chat_id, message_hash, topic_id, now_string()],
        )?;
    }
    for misconception_id in misconception_ids {
        tx.execute(
            "INSERT INTO message_misconceptions (chat_id, message_hash, misconception_id, added)
             VALUES (?1, ?2, ?3, ?4);",
            params![chat_id, message_hash, misconception_id, now_string()],
        )?;
    }
    if misconception_ids.is_empty() {
        tx.execute(
            "INSERT INTO message_misconceptions (chat_id, message_hash, misconception_id, added)
             VALUES (?1, ?2, NULL, ?3);",
            params![chat_id, message_hash, now_string()],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Misconception ids labeled on a message, NULL rows excluded.
pub fn misconception_ids_for_message(conn: &Connection, message_hash: &str) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT misconception_id FROM message_misconceptions
         WHERE message_hash = ?1 AND misconception_id IS NOT NULL ORDER BY misconception_id;",
    )?;
    let rows = stmt.query_map([message_hash], |row| row.get::<_, i64>(0))?;
    let mut ids = Vec::new();
    for id in rows {
        ids.push(id?);
    }
    Ok(ids)
}

pub fn mark_skipped(conn: &Connection, message_hash: &str, chat_id: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO messages_to_skip (message_hash, chat_id, added) VALUES (?1, ?2, ?3);",
        params![message_hash, chat_id, now_string()],
    )?;
    Ok(())
}

pub fn is_skipped(conn: &Connection, message_hash: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages_to_skip WHERE message_hash = ?1;",
        [message_hash],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Print stored chats with message and label counts to stdout.
pub fn print_report(conn: &Connection) -> Result<()> {
    println!("=== Crawled chats ===");
    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, c.username, c.kind,
                (SELECT COUNT(*) FROM messages m WHERE m.chat_id = c.id),
                (SELECT COUNT(DISTINCT mm.message_hash) FROM message_misconceptions mm
                 WHERE mm.chat_id = c.id AND mm.misconception_id IS NOT NULL)
         FROM chats c ORDER BY c.name COLLATE NOCASE;",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, i64>(5)?,
        ))
    })?;
    for row in rows {
        let (id, name, username, kind, messages, labeled) = row?;
        let handle = username.map(|u| format!("@{}", u)).unwrap_or_else(|| "-".into());
        println!("\n{} ({}, {} {})", name, handle, id, kind);
        println!(" - messages stored: {}", messages);
        println!(" - labeled with misconceptions: {}", labeled);
    }
    let topics: i64 = conn.query_row("SELECT COUNT(*) FROM topics;", [], |r| r.get(0))?;
    let misconceptions: i64 =
        conn.query_row("SELECT COUNT(*) FROM misconceptions;", [], |r| r.get(0))?;
    println!(
        "\n{} topics, {} misconceptions defined.",
        topics, misconceptions
    );
    Ok(())
}

#[cfg(test)]
pub fn open_in_memory() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    init_schema(&conn).expect("init schema");
    conn
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_chat(id: i64) -> ChatInfo {
        ChatInfo {
            id,
            name: format!("Chat {}", id),
            username: Some(format!("chat{}", id)),
            kind: ChatKind::Broadcast,
            can_comment: false,
            access_hash: Some(99),
        }
    }

    fn test_message(chat_id: i64, message_id: i32, content: &str) -> MessageRecord {
        MessageRecord {
            chat_id,
            message_id,
            content: content.to_string(),
            url: None,
            hash: message_hash(content, 16),
            creation_date: Utc.with_ymd_and_hms(2021, 7, 15, 12, 0, 0).unwrap(),
            views: Some(10),
            forwards: None,
        }
    }

    #[test]
    fn schema_init_is_idempotent() {
        let conn = open_in_memory();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn hash_is_stable_and_truncated() {
        let a = message_hash("hello", 16);
        let b = message_hash("hello", 16);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(message_hash("hello", 16), message_hash("hello!", 16));
        assert_eq!(message_hash("hello", 64).len(), 64);
    }

    #[test]
    fn chat_round_trips() {
        let conn = open_in_memory();
        let chat = test_chat(1);
        save_chat(&conn, &chat).unwrap();
        let loaded = get_chat(&conn, 1).unwrap().unwrap();
        assert_eq!(loaded.name, "Chat 1");
        assert_eq!(loaded.kind, ChatKind::Broadcast);
        assert_eq!(loaded.access_hash, Some(99));

        // Re-saving with new metadata updates in place
        let renamed = ChatInfo {
            name: "Renamed".into(),
            ..chat
        };
        save_chat(&conn, &renamed).unwrap();
        assert_eq!(get_chat(&conn, 1).unwrap().unwrap().name, "Renamed");
    }

    #[test]
    fn unknown_chat_is_none() {
        let conn = open_in_memory();
        assert!(get_chat(&conn, 404).unwrap().is_none());
    }

    #[test]
    fn messages_dedup_by_hash() {
        let mut conn = open_in_memory();
        save_chat(&conn, &test_chat(1)).unwrap();
        let msg = test_message(1, 10, "some claim");
        assert_eq!(store_message(&mut conn, &msg).unwrap(), StoreOutcome::Inserted);
        // Same content seen again (e.g. reposted elsewhere): duplicate
        let repost = test_message(1, 11, "some claim");
        assert_eq!(
            store_message(&mut conn, &repost).unwrap(),
            StoreOutcome::Duplicate
        );
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages;", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn edited_message_refreshes_stored_row() {
        let mut conn = open_in_memory();
        save_chat(&conn, &test_chat(1)).unwrap();
        let original = test_message(1, 10, "first version");
        store_message(&mut conn, &original).unwrap();
        // Same chat and message id, new content, but same (stale) hash:
        // an edit discovered on re-crawl before the hash caught up.
        let mut edited = test_message(1, 10, "second version");
        edited.hash = original.hash.clone();
        edited.views = Some(500);
        assert_eq!(
            store_message(&mut conn, &edited).unwrap(),
            StoreOutcome::Duplicate
        );
        let (content, views): (String, i32) = conn
            .query_row(
                "SELECT content, views FROM messages WHERE hash = ?1;",
                [&original.hash],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(content, "second version");
        assert_eq!(views, 500);
    }

    #[test]
    fn hash_collision_is_an_error() {
        let mut conn = open_in_memory();
        save_chat(&conn, &test_chat(1)).unwrap();
        save_chat(&conn, &test_chat(2)).unwrap();
        let first = test_message(1, 10, "content a");
        store_message(&mut conn, &first).unwrap();
        // Different content, different chat/message id, same hash
        let mut collider = test_message(2, 20, "content b");
        collider.hash = first.hash.clone();
        let err = store_message(&mut conn, &collider).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CrawlError>(),
            Some(CrawlError::HashCollision { .. })
        ));
    }

    #[test]
    fn labels_are_replaced_not_appended() {
        let mut conn = open_in_memory();
        save_chat(&conn, &test_chat(1)).unwrap();
        let msg = test_message(1, 10, "claim");
        store_message(&mut conn, &msg).unwrap();

        let topic = add_topic(&conn, "Vaccines", "vaccines").unwrap();
        let m1 = add_misconception(&conn, topic, "Chips in vaccines", "chips", "").unwrap();
        let m2 = add_misconception(&conn, topic, "Alters DNA", "dna", "").unwrap();

        replace_labels(&mut conn, 1, &msg.hash, &[topic], &[m1, m2]).unwrap();
        assert_eq!(
            misconception_ids_for_message(&conn, &msg.hash).unwrap(),
            vec![m1, m2]
        );

        // Relabeling with a smaller selection removes the old rows
        replace_labels(&mut conn, 1, &msg.hash, &[topic], &[m2]).unwrap();
        assert_eq!(
            misconception_ids_for_message(&conn, &msg.hash).unwrap(),
            vec![m2]
        );
    }

    #[test]
    fn empty_misconception_selection_writes_null_row() {
        let mut conn = open_in_memory();
        save_chat(&conn, &test_chat(1)).unwrap();
        let msg = test_message(1, 10, "claim");
        store_message(&mut conn, &msg).unwrap();
        let topic = add_topic(&conn, "Vaccines", "vaccines").unwrap();

        replace_labels(&mut conn, 1, &msg.hash, &[topic], &[]).unwrap();
        assert!(misconception_ids_for_message(&conn, &msg.hash)
            .unwrap()
            .is_empty());
        let null_rows: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM message_misconceptions
                 WHERE message_hash = ?1 AND misconception_id IS NULL;",
                [&msg.hash],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(null_rows, 1);
    }

    #[test]
    fn skip_marker_round_trips() {
        let conn = open_in_memory();
        assert!(!is_skipped(&conn, "abc").unwrap());
        mark_skipped(&conn, "abc", 1).unwrap();
        assert!(is_skipped(&conn, "abc").unwrap());
        // Marking twice is a no-op, not an error
        mark_skipped(&conn, "abc", 1).unwrap();
    }

    #[test]
    fn topic_names_are_unique() {
        let conn = open_in_memory();
        add_topic(&conn, "Vaccines", "vaccines").unwrap();
        assert!(add_topic(&conn, "Vaccines", "vaccines2").is_err());
    }

    #[test]
    fn misconceptions_filter_by_topic() {
        let conn = open_in_memory();
        let t1 = add_topic(&conn, "Vaccines", "vaccines").unwrap();
        let t2 = add_topic(&conn, "5G", "five_g").unwrap();
        add_misconception(&conn, t1, "Chips in vaccines", "chips", "").unwrap();
        add_misconception(&conn, t2, "Towers spread disease", "towers", "").unwrap();
        let for_t1 = misconceptions_for_topic(&conn, t1).unwrap();
        assert_eq!(for_t1.len(), 1);
        assert_eq!(for_t1[0].name, "Chips in vaccines");
        assert_eq!(list_misconceptions(&conn).unwrap().len(), 2);
    }

    #[test]
    fn stored_message_round_trips() {
        let mut conn = open_in_memory();
        save_chat(&conn, &test_chat(1)).unwrap();
        let msg = test_message(1, 10, "claim");
        store_message(&mut conn, &msg).unwrap();
        let loaded = get_message(&conn, &msg.hash).unwrap().unwrap();
        assert_eq!(loaded.content, "claim");
        assert_eq!(loaded.message_id, 10);
        assert_eq!(loaded.creation_date, msg.creation_date);
        assert!(get_message(&conn, "nope").unwrap().is_none());
    }
}
