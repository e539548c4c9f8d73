use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::database::{self, Misconception, Topic};

/// Write one JSONL row per stored message (CoVaxLies-style):
/// `{"id": <hash>, "misinfo": {<misconception_id>: "agree"}, "full_text": ...}`.
/// Messages longer than `max_length` characters are left out. Returns the
/// number of rows written.
pub fn write_training_jsonl<W: Write>(
    conn: &Connection,
    max_length: usize,
    mut out: W,
) -> Result<usize> {
    let mut stmt =
        conn.prepare("SELECT hash, content FROM messages ORDER BY creation_date, hash;")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut written = 0;
    for row in rows {
        let (hash, content) = row?;
        if content.chars().count() > max_length {
            continue;
        }
        let mut misinfo = Map::new();
        for id in database::misconception_ids_for_message(conn, &hash)? {
            misinfo.insert(id.to_string(), Value::String("agree".to_string()));
        }
        let line = json!({
            "id": hash,
            "misinfo": misinfo,
            "full_text": content,
        });
        writeln!(out, "{}", serde_json::to_string(&line)?)?;
        written += 1;
    }
    Ok(written)
}

/// Map of all misconceptions in the CoVaxLies misinfo.json shape.
pub fn misinfo_json(conn: &Connection) -> Result<Value> {
    let mut map = Map::new();
    for m in database::list_misconceptions(conn)? {
        map.insert(
            m.id.to_string(),
            json!({
                "title": m.short_name,
                "text": m.name,
                "alternate_text": m.description,
            }),
        );
    }
    Ok(Value::Object(map))
}

/// The label lookup tables with their explicit ids, for exchange between
/// collaborators. Ids have to match across databases or shared labeled data
/// becomes meaningless.
#[derive(Debug, Serialize, Deserialize)]
pub struct LabelDump {
    pub topics: Vec<Topic>,
    pub misconceptions: Vec<Misconception>,
}

pub fn export_labels(conn: &Connection) -> Result<LabelDump> {
    Ok(LabelDump {
        topics: database::list_topics(conn)?,
        misconceptions: database::list_misconceptions(conn)?,
    })
}

/// Import label tables from a collaborator, keeping their ids. Rows whose id
/// is already present with the same name are skipped; an id that maps to a
/// different name here means the databases have diverged and nothing is
/// imported. Returns (topics imported, misconceptions imported).
pub fn import_labels(conn: &mut Connection, dump: &LabelDump) -> Result<(usize, usize)> {
    let tx = conn.transaction()?;
    let mut topics_imported = 0;
    for topic in &dump.topics {
        let existing: Option<String> = tx
            .query_row("SELECT name FROM topics WHERE id = ?1;", [topic.id], |r| {
                r.get(0)
            })
            .optional()?;
        match existing {
            Some(name) if name == topic.name => continue,
            Some(name) => bail!(
                "topic id {} already maps to \"{}\" in this database, refusing to import \"{}\"",
                topic.id,
                name,
                topic.name
            ),
            None => {
                tx.execute(
                    "INSERT INTO topics (id, name, short_name, added) VALUES (?1, ?2, ?3, ?4);",
                    params![topic.id, topic.name, topic.short_name, topic.added],
                )?;
                topics_imported += 1;
            }
        }
    }
    let mut misconceptions_imported = 0;
    for m in &dump.misconceptions {
        let existing: Option<String> = tx
            .query_row(
                "SELECT name FROM misconceptions WHERE id = ?1;",
                [m.id],
                |r| r.get(0),
            )
            .optional()?;
        match existing {
            Some(name) if name == m.name => continue,
            Some(name) => bail!(
                "misconception id {} already maps to \"{}\" in this database, refusing to import \"{}\"",
                m.id,
                name,
                m.name
            ),
            None => {
                tx.execute(
                    "INSERT INTO misconceptions (id, topic_id, name, short_name, description, added)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                    params![m.id, m.topic_id, m.name, m.short_name, m.description, m.added],
                )?;
                misconceptions_imported += 1;
            }
        }
    }
    tx.commit()?;
    Ok((topics_imported, misconceptions_imported))
}

/// Seed topics and misconceptions from a JSON file mapping topic names to
/// lists of misconception names. Existing names are left alone, so seeding
/// is safe to repeat. Returns (topics added, misconceptions added).
pub fn seed_labels(conn: &Connection, path: &Path) -> Result<(usize, usize)> {
    let data: BTreeMap<String, Vec<String>> =
        serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let mut topics_added = 0;
    let mut misconceptions_added = 0;
    for (topic_name, misconceptions) in &data {
        let topic_id = match database::topic_by_name(conn, topic_name)? {
            Some(id) => id,
            None => {
                topics_added += 1;
                database::add_topic(conn, topic_name, &slugify(topic_name))?
            }
        };
        for name in misconceptions {
            if database::misconception_by_name(conn, name)?.is_none() {
                database::add_misconception(conn, topic_id, name, &slugify(name), "")?;
                misconceptions_added += 1;
            }
        }
    }
    Ok((topics_added, misconceptions_added))
}

/// snake_case identifier derived from a human-readable name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_underscore = true; // suppress leading underscores
    for c in name.chars() {
        if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                slug.push(lower);
            }
            last_was_underscore = false;
        } else if !last_was_underscore {
            slug.push('_');
            last_was_underscore = true;
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}
