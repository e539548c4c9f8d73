use anyhow::Result;
use log::info;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::database;
use crate::telegram::{prompt, MessageRecord};

const MARKED_FOR_LATER_FILE: &str = "data/marked_for_later.json";
const WRAP_WIDTH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelOutcome {
    StoredWithLabels,
    StoredWithoutLabels,
    Skipped,
    StopCrawl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuChoice {
    StoreWithout,
    LabelAgain,
    Skip,
    MarkForLater,
    Stop,
}

/// Show a message to the operator and walk through topic and misconception
/// selection. Stores the message and its labels according to the choices.
pub fn handle_message(conn: &mut Connection, record: &MessageRecord) -> Result<LabelOutcome> {
    loop {
        show_message(record);

        let topics = database::list_topics(conn)?;
        let topic_names: Vec<&str> = topics.iter().map(|t| t.name.as_str()).collect();
        let picked = prompt_multi_select(
            "Which of these topics is the message related to?",
            &topic_names,
        )?;
        let topic_ids: Vec<i64> = picked.iter().map(|&i| topics[i].id).collect();

        let mut misconception_ids = Vec::new();
        for &i in &picked {
            let options = database::misconceptions_for_topic(conn, topics[i].id)?;
            if options.is_empty() {
                continue;
            }
            let names: Vec<&str> = options.iter().map(|m| m.name.as_str()).collect();
            let chosen = prompt_multi_select(
                &format!(
                    "Which of these misconceptions about \"{}\" does the message support?",
                    topics[i].name
                ),
                &names,
            )?;
            misconception_ids.extend(chosen.iter().map(|&j| options[j].id));
        }

        if topic_ids.is_empty() || misconception_ids.is_empty() {
            let entity = if topic_ids.is_empty() {
                "topics"
            } else {
                "misconceptions"
            };
            match prompt_empty_selection_menu(entity)? {
                MenuChoice::StoreWithout => {
                    store_with_labels(conn, record, &topic_ids, &misconception_ids)?;
                    return Ok(LabelOutcome::StoredWithoutLabels);
                }
                MenuChoice::LabelAgain => continue,
                MenuChoice::Skip => {
                    database::mark_skipped(conn, &record.hash, record.chat_id)?;
                    return Ok(LabelOutcome::Skipped);
                }
                MenuChoice::MarkForLater => {
                    mark_for_later_at(Path::new(MARKED_FOR_LATER_FILE), record.chat_id, record.message_id)?;
                    // Also recorded as skipped so the message is not prompted again
                    database::mark_skipped(conn, &record.hash, record.chat_id)?;
                    return Ok(LabelOutcome::Skipped);
                }
                MenuChoice::Stop => return Ok(LabelOutcome::StopCrawl),
            }
        }

        store_with_labels(conn, record, &topic_ids, &misconception_ids)?;
        return Ok(LabelOutcome::StoredWithLabels);
    }
}

fn store_with_labels(
    conn: &mut Connection,
    record: &MessageRecord,
    topic_ids: &[i64],
    misconception_ids: &[i64],
) -> Result<()> {
    database::store_message(conn, record)?;
    database::replace_labels(conn, record.chat_id, &record.hash, topic_ids, misconception_ids)?;
    Ok(())
}

fn show_message(record: &MessageRecord) {
    println!(
        "\nMessage {} in chat {} with hash {}:",
        record.message_id, record.chat_id, record.hash
    );
    println!("{}", "-".repeat(WRAP_WIDTH));
    for line in textwrap::wrap(&record.content, WRAP_WIDTH) {
        println!("{}", line);
    }
    println!("{}", "-".repeat(WRAP_WIDTH));
    println!("[Press Enter without selecting anything to open the options menu]\n");
}

fn prompt_multi_select(question: &str, options: &[&str]) -> Result<Vec<usize>> {
    println!("{}", question);
    for (i, option) in options.iter().enumerate() {
        println!("  {}. {}", i + 1, option);
    }
    let input = prompt("Select numbers separated by commas (empty for none): ")?;
    Ok(parse_selection(&input, options.len()))
}

fn prompt_empty_selection_menu(entity: &str) -> Result<MenuChoice> {
    loop {
        println!("You have not selected any {}. Do you want to", entity);
        println!("  1. store the message without any {}?", entity);
        println!("  2. label the message again?");
        println!("  3. skip the message without storing it?");
        println!("  4. mark the message for later inspection?");
        println!("  5. stop the crawl? (you can return later)");
        let input = prompt("Select an option: ")?;
        if let Some(choice) = parse_menu_choice(&input) {
            return Ok(choice);
        }
        println!("Please enter a number between 1 and 5.");
    }
}

/// Parse a 1-based multi-select like "1, 3" into 0-based indexes, dropping
/// out-of-range entries and duplicates.
fn parse_selection(input: &str, option_count: usize) -> Vec<usize> {
    let mut picked = Vec::new();
    for token in input.split(|c: char| c == ',' || c == ';' || c.is_whitespace()) {
        if token.is_empty() {
            continue;
        }
        if let Ok(n) = token.parse::<usize>() {
            if n >= 1 && n <= option_count && !picked.contains(&(n - 1)) {
                picked.push(n - 1);
            }
        }
    }
    picked
}

fn parse_menu_choice(input: &str) -> Option<MenuChoice> {
    match input.trim() {
        "1" => Some(MenuChoice::StoreWithout),
        "2" => Some(MenuChoice::LabelAgain),
        "3" => Some(MenuChoice::Skip),
        "4" => Some(MenuChoice::MarkForLater),
        "5" => Some(MenuChoice::Stop),
        _ => None,
    }
}

/// Index of messages set aside for later inspection, keyed by chat id.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MarkedForLater(BTreeMap<String, Vec<i32>>);

fn mark_for_later_at(path: &Path, chat_id: i64, message_id: i32) -> Result<()> {
    let mut index: MarkedForLater = if path.is_file() {
        serde_json::from_str(&std::fs::read_to_string(path)?)?
    } else {
        MarkedForLater::default()
    };
    let entry = index.0.entry(chat_id.to_string()).or_default();
    if !entry.contains(&message_id) {
        entry.push(message_id);
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(&index)?)?;
    Ok(())
}

/// Interactive entry of a new topic. Returns its id.
pub fn add_topic_interactive(conn: &Connection) -> Result<i64> {
    let name = prompt("Enter the name of the topic you want to add: ")?;
    let short_name = prompt("Enter a short name to identify the topic by (snake_case): ")?;
    let id = database::add_topic(conn, name.trim(), short_name.trim())?;
    info!("topic \"{}\" added with id {}", name.trim(), id);
    Ok(id)
}

/// Interactive entry of a new misconception, including topic selection.
pub fn add_misconception_interactive(conn: &Connection) -> Result<i64> {
    let topics = database::list_topics(conn)?;
    let topic_id = loop {
        println!("What topic does the misconception belong to?");
        for (i, topic) in topics.iter().enumerate() {
            println!("  {}. {}", i + 1, topic.name);
        }
        println!("  0. None of the above (add a new topic)");
        let input = prompt("Select a topic: ")?;
        match input.trim().parse::<usize>() {
            Ok(0) => break add_topic_interactive(conn)?,
            Ok(n) if n >= 1 && n <= topics.len() => break topics[n - 1].id,
            _ => println!("Please enter a number between 0 and {}.", topics.len()),
        }
    };
    let name = prompt("Enter the name of the misconception you want to add: ")?;
    let short_name = prompt("Enter a short name to identify the misconception by (snake_case): ")?;
    let description = prompt("Enter a description for the misconception: ")?;
    let id = database::add_misconception(
        conn,
        topic_id,
        name.trim(),
        short_name.trim(),
        description.trim(),
    )?;
    info!("misconception \"{}\" added with id {}", name.trim(), id);
    Ok(id)
}
