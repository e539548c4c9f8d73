use anyhow::{bail, Result};
use chrono::{NaiveDate, NaiveTime, Utc};
use grammers_client::Client;
use log::{error, info, warn};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::database::{self, StoreOutcome};
use crate::error::CrawlError;
use crate::label::{self, LabelOutcome};
use crate::telegram::{self, ChatInfo, FetchedMessage, PAGE_LIMIT};

pub const CRAWLS_FILE: &str = "data/crawls.json";

/// A chat as named by the operator: either a username or a numeric id.
/// Usernames resolve through the client; numeric ids resolve only against
/// chats already stored in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRef {
    Username(String),
    Id(i64),
}

impl FromStr for ChatRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('@');
        if trimmed.is_empty() {
            return Err("empty chat reference".to_string());
        }
        match trimmed.parse::<i64>() {
            Ok(id) => Ok(ChatRef::Id(id)),
            Err(_) => Ok(ChatRef::Username(trimmed.to_string())),
        }
    }
}

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRef::Username(name) => write!(f, "@{}", name),
            ChatRef::Id(id) => write!(f, "{}", id),
        }
    }
}

/// UNIX timestamp of the start of a day (UTC).
pub fn day_start(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

/// UNIX timestamp of the last second of a day (UTC).
pub fn day_end(date: NaiveDate) -> i64 {
    day_start(date) + 86_399
}

/// The parameters that identify a crawl. A saved crawl state with the same
/// parameters is resumed instead of starting over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlParams {
    pub seed_chats: Vec<i64>,
    pub min_date: Option<i64>,
    pub max_date: Option<i64>,
    pub no_labeling: bool,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlState {
    #[serde(flatten)]
    pub params: CrawlParams,
    pub chats_to_search: Vec<i64>,
    pub chats_searched: Vec<i64>,
    #[serde(default)]
    pub chats_not_searchable: Vec<i64>,
    pub started: String,
    #[serde(default)]
    pub finished: Option<String>,
}

impl CrawlState {
    pub fn new(params: CrawlParams) -> Self {
        let chats_to_search = params.seed_chats.clone();
        Self {
            params,
            chats_to_search,
            chats_searched: Vec::new(),
            chats_not_searchable: Vec::new(),
            started: Utc::now().format(database::DATE_FORMAT).to_string(),
            finished: None,
        }
    }

    /// Queue a newly discovered chat (forward origin) at the front, unless it
    /// was already searched or queued in this crawl.
    pub fn enqueue_front(&mut self, chat_id: i64) {
        if self.chats_searched.contains(&chat_id)
            || self.chats_not_searchable.contains(&chat_id)
            || self.chats_to_search.contains(&chat_id)
        {
            return;
        }
        self.chats_to_search.insert(0, chat_id);
    }

    /// Take the current chat off the queue after a completed pass. With a max
    /// date the window is closed and the chat is done; without one the crawl
    /// is open-ended and the chat goes to the back for a later re-check.
    pub fn finish_chat(&mut self, chat_id: i64) {
        self.chats_to_search.retain(|&id| id != chat_id);
        if self.params.max_date.is_some() {
            self.chats_searched.push(chat_id);
        } else {
            self.chats_to_search.push(chat_id);
        }
    }

    pub fn mark_unsearchable(&mut self, chat_id: i64) {
        self.chats_to_search.retain(|&id| id != chat_id);
        self.chats_not_searchable.push(chat_id);
    }
}

/// Persistent list of crawl states, one JSON file for all crawls.
pub struct CrawlStore {
    path: PathBuf,
}

impl CrawlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Vec<CrawlState>> {
        if !self.path.is_file() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Find an unfinished crawl with the same parameters to resume, or append
    /// a fresh state. Returns the state's index in the file.
    pub fn resume_or_create(&self, params: CrawlParams) -> Result<(usize, CrawlState)> {
        let crawls = self.load()?;
        for (index, state) in crawls.iter().enumerate() {
            if state.params == params && state.finished.is_none() {
                return Ok((index, state.clone()));
            }
        }
        let state = CrawlState::new(params);
        let index = crawls.len();
        self.save(index, &state)?;
        Ok((index, state))
    }

    /// Append a fresh state regardless of any resumable one (--no-resume).
    pub fn create(&self, params: CrawlParams) -> Result<(usize, CrawlState)> {
        let state = CrawlState::new(params);
        let index = self.load()?.len();
        self.save(index, &state)?;
        Ok((index, state))
    }

    pub fn save(&self, index: usize, state: &CrawlState) -> Result<()> {
        let mut crawls = self.load()?;
        if index < crawls.len() {
            crawls[index] = state.clone();
        } else {
            crawls.push(state.clone());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&crawls)?)?;
        Ok(())
    }
}

/// True when the chat's crawl should stop at this message: history is paged
/// newest first, so the first message older than min_date ends the window.
pub fn should_stop(message_date: i64, min_date: Option<i64>) -> bool {
    matches!(min_date, Some(min) if message_date < min)
}

/// True when this message is skipped: empty text, polls, messages newer than
/// max_date, and (in keyword mode) messages matching none of the keywords.
pub fn should_skip(msg: &FetchedMessage, max_date: Option<i64>, keywords: &[String]) -> bool {
    if msg.text.is_empty() || msg.is_poll {
        return true;
    }
    if matches!(max_date, Some(max) if msg.date > max) {
        return true;
    }
    !keywords.is_empty() && !keywords.iter().any(|kw| msg.text.contains(kw.as_str()))
}

/// Resolve a numeric chat id against the chats table only. Ids the crawler
/// has never stored cannot be turned into an InputPeer, which is the
/// documented operator error ("remove the id from the list").
pub fn resolve_id(conn: &Connection, id: i64) -> Result<ChatInfo> {
    database::get_chat(conn, id)?.ok_or_else(|| CrawlError::EntityNotResolved(id).into())
}

pub struct CrawlOptions {
    pub min_date: Option<i64>,
    pub max_date: Option<i64>,
    pub no_labeling: bool,
    pub keywords: Vec<String>,
    pub no_resume: bool,
}

enum ChatOutcome {
    Completed,
    /// The operator chose to stop; the state is saved for a later resume.
    Stopped,
}

pub struct Crawler<'a> {
    pub client: &'a Client,
    pub conn: &'a mut Connection,
    pub store: CrawlStore,
    pub hash_size: usize,
}

impl<'a> Crawler<'a> {
    /// Run a crawl over the given chat references. Unresolvable references
    /// are reported and skipped; they never block the rest of the list.
    pub async fn run(&mut self, refs: &[ChatRef], opts: CrawlOptions) -> Result<()> {
        let mut seed_ids = Vec::new();
        for chat_ref in refs {
            match self.resolve_seed(chat_ref).await {
                Ok(info) => {
                    database::save_chat(self.conn, &info)?;
                    seed_ids.push(info.id);
                }
                Err(e) => error!("skipping {}: {}", chat_ref, e),
            }
        }
        if seed_ids.is_empty() {
            bail!("none of the given chat references could be resolved");
        }

        let params = CrawlParams {
            seed_chats: seed_ids,
            min_date: opts.min_date,
            max_date: opts.max_date,
            no_labeling: opts.no_labeling,
            keywords: opts.keywords,
        };
        let (index, mut state) = if opts.no_resume {
            self.store.create(params)?
        } else {
            self.store.resume_or_create(params)?
        };
        if !state.chats_searched.is_empty() {
            info!(
                "resuming crawl started {} ({} chats already searched)",
                state.started,
                state.chats_searched.len()
            );
        }

        // One full pass over the queue without new work ends an open-ended
        // crawl instead of looping forever.
        let mut pass_guard: Vec<i64> = Vec::new();
        while let Some(&chat_id) = state.chats_to_search.first() {
            if pass_guard.contains(&chat_id) {
                info!("no more chats with new messages");
                break;
            }
            match self.crawl_chat(chat_id, &mut state).await {
                Ok(ChatOutcome::Stopped) => {
                    info!("crawl stopped by operator; state saved for resume");
                    self.store.save(index, &state)?;
                    return Ok(());
                }
                Ok(ChatOutcome::Completed) => {
                    pass_guard.push(chat_id);
                }
                Err(e) => match e.downcast_ref::<CrawlError>() {
                    Some(CrawlError::EntityNotResolved(_)) | Some(CrawlError::ChatPrivate(_)) => {
                        warn!("chat {} not searchable: {}", chat_id, e);
                        state.mark_unsearchable(chat_id);
                    }
                    _ => return Err(e),
                },
            }
            self.store.save(index, &state)?;
        }
        state.finished = Some(Utc::now().format(database::DATE_FORMAT).to_string());
        self.store.save(index, &state)?;
        info!("crawl finished");
        Ok(())
    }

    async fn resolve_seed(&mut self, chat_ref: &ChatRef) -> Result<ChatInfo> {
        match chat_ref {
            ChatRef::Username(name) => telegram::resolve_username(self.client, name).await,
            ChatRef::Id(id) => resolve_id(self.conn, *id),
        }
    }

    async fn crawl_chat(&mut self, chat_id: i64, state: &mut CrawlState) -> Result<ChatOutcome> {
        let chat = resolve_id(self.conn, chat_id)?;
        info!("crawling \"{}\" ({})", chat.name, chat_id);

        let min_date = state.params.min_date;
        let max_date = state.params.max_date;
        // Start paging at max_date when one is set; 0 means newest first.
        let offset_date = max_date.map(|ts| ts as i32).unwrap_or(0);
        let mut offset_id = 0;
        let mut stored = 0u32;
        let mut skipped = 0u32;

        'pages: loop {
            let page =
                telegram::fetch_history_page(self.client, &chat, offset_id, offset_date).await?;
            if page.raw_count == 0 {
                break;
            }
            offset_id = page.min_id;
            for msg in &page.messages {
                if should_stop(msg.date, min_date) {
                    info!(
                        "stopping \"{}\": next message is older than the minimum date",
                        chat.name
                    );
                    break 'pages;
                }
                if should_skip(msg, max_date, &state.params.keywords) {
                    continue;
                }
                let record = telegram::to_record(chat_id, msg, self.hash_size);
                if state.params.no_labeling {
                    match database::store_message(self.conn, &record)? {
                        StoreOutcome::Inserted => stored += 1,
                        StoreOutcome::Duplicate => skipped += 1,
                    }
                    continue;
                }

                // Labeling mode: refresh-and-skip already stored messages and
                // ones the operator skipped before, prompt for the rest.
                if database::get_message(self.conn, &record.hash)?.is_some() {
                    database::store_message(self.conn, &record)?;
                    skipped += 1;
                    continue;
                }
                if database::is_skipped(self.conn, &record.hash)? {
                    skipped += 1;
                    continue;
                }
                match label::handle_message(self.conn, &record)? {
                    LabelOutcome::StopCrawl => return Ok(ChatOutcome::Stopped),
                    LabelOutcome::StoredWithLabels => {
                        stored += 1;
                        // Relevant forwarded messages pull their origin
                        // channel into the crawl.
                        if let Some(origin) = msg.fwd_channel_id {
                            if origin != chat_id {
                                state.enqueue_front(origin);
                            }
                        }
                    }
                    LabelOutcome::StoredWithoutLabels => stored += 1,
                    LabelOutcome::Skipped => skipped += 1,
                }
            }
            if page.raw_count < PAGE_LIMIT as usize {
                break;
            }
        }

        info!(
            "\"{}\" done: {} stored, {} skipped",
            chat.name, stored, skipped
        );
        state.finish_chat(chat_id);
        Ok(ChatOutcome::Completed)
    }
}

/// Shared-path constructor used by main.
pub fn default_store() -> CrawlStore {
    CrawlStore::new(Path::new(CRAWLS_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_in_memory;

    fn fetched(id: i32, date: i64, text: &str) -> FetchedMessage {
        FetchedMessage {
            id,
            date,
            text: text.to_string(),
            views: None,
            forwards: None,
            fwd_channel_id: None,
            webpage_url: None,
            is_poll: false,
        }
    }

    fn params(seeds: &[i64], max_date: Option<i64>) -> CrawlParams {
        CrawlParams {
            seed_chats: seeds.to_vec(),
            min_date: None,
            max_date,
            no_labeling: true,
            keywords: Vec::new(),
        }
    }

    #[test]
    fn chat_refs_parse() {
        assert_eq!("@somechannel".parse(), Ok(ChatRef::Username("somechannel".into())));
        assert_eq!("somechannel".parse(), Ok(ChatRef::Username("somechannel".into())));
        assert_eq!("1234567".parse(), Ok(ChatRef::Id(1234567)));
        assert_eq!("-1001234".parse(), Ok(ChatRef::Id(-1001234)));
        assert!("  ".parse::<ChatRef>().is_err());
    }

    #[test]
    fn day_bounds() {
        let date = NaiveDate::from_ymd_opt(2021, 7, 1).unwrap();
        assert_eq!(day_start(date), 1_625_097_600);
        assert_eq!(day_end(date), 1_625_183_999);
    }

    #[test]
    fn stop_only_below_min_date() {
        assert!(!should_stop(100, None));
        assert!(!should_stop(100, Some(100)));
        assert!(should_stop(99, Some(100)));
    }

    #[test]
    fn skips_empty_polls_and_future_messages() {
        assert!(should_skip(&fetched(1, 50, ""), None, &[]));
        let mut poll = fetched(1, 50, "vote now");
        poll.is_poll = true;
        assert!(should_skip(&poll, None, &[]));
        assert!(should_skip(&fetched(1, 200, "text"), Some(100), &[]));
        assert!(!should_skip(&fetched(1, 50, "text"), Some(100), &[]));
        assert!(!should_skip(&fetched(1, 50, "text"), None, &[]));
    }

    #[test]
    fn keyword_mode_requires_a_match() {
        let keywords = vec!["vaccine".to_string(), "5g".to_string()];
        assert!(!should_skip(
            &fetched(1, 50, "the vaccine contains chips"),
            None,
            &keywords
        ));
        assert!(should_skip(&fetched(1, 50, "unrelated chatter"), None, &keywords));
    }

    #[test]
    fn unresolved_numeric_id_fails_before_anything_is_stored() {
        let conn = open_in_memory();
        let err = resolve_id(&conn, 42).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CrawlError>(),
            Some(CrawlError::EntityNotResolved(42))
        ));
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages;", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn state_queue_with_max_date_retires_chats() {
        let mut state = CrawlState::new(params(&[1, 2], Some(1000)));
        state.finish_chat(1);
        assert_eq!(state.chats_to_search, vec![2]);
        assert_eq!(state.chats_searched, vec![1]);
    }

    #[test]
    fn open_ended_state_requeues_at_the_back() {
        let mut state = CrawlState::new(params(&[1, 2], None));
        state.finish_chat(1);
        assert_eq!(state.chats_to_search, vec![2, 1]);
        assert!(state.chats_searched.is_empty());
    }

    #[test]
    fn forward_origins_jump_the_queue_once() {
        let mut state = CrawlState::new(params(&[1, 2], Some(1000)));
        state.enqueue_front(7);
        assert_eq!(state.chats_to_search, vec![7, 1, 2]);
        // Already queued, searched or unsearchable ids are not re-added
        state.enqueue_front(7);
        state.finish_chat(7);
        state.enqueue_front(7);
        assert_eq!(state.chats_to_search, vec![1, 2]);
        state.mark_unsearchable(1);
        state.enqueue_front(1);
        assert_eq!(state.chats_to_search, vec![2]);
    }

    #[test]
    fn store_resumes_matching_unfinished_crawls() {
        let dir = tempfile::tempdir().unwrap();
        let store = CrawlStore::new(dir.path().join("crawls.json"));

        let (index, mut state) = store.resume_or_create(params(&[1, 2], Some(1000))).unwrap();
        assert_eq!(index, 0);
        state.finish_chat(1);
        store.save(index, &state).unwrap();

        // Same parameters: picked up where it left off
        let (index2, resumed) = store.resume_or_create(params(&[1, 2], Some(1000))).unwrap();
        assert_eq!(index2, 0);
        assert_eq!(resumed.chats_to_search, vec![2]);
        assert_eq!(resumed.chats_searched, vec![1]);

        // Different parameters: a new crawl
        let (index3, fresh) = store.resume_or_create(params(&[1, 2], None)).unwrap();
        assert_eq!(index3, 1);
        assert_eq!(fresh.chats_to_search, vec![1, 2]);
    }

    #[test]
    fn finished_crawls_are_not_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let store = CrawlStore::new(dir.path().join("crawls.json"));
        let (index, mut state) = store.resume_or_create(params(&[1], Some(1000))).unwrap();
        state.finished = Some("2021-08-01 00:00:00".to_string());
        store.save(index, &state).unwrap();

        let (index2, _) = store.resume_or_create(params(&[1], Some(1000))).unwrap();
        assert_eq!(index2, 1);
    }

    #[test]
    fn create_ignores_resumable_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = CrawlStore::new(dir.path().join("crawls.json"));
        let (index, _) = store.resume_or_create(params(&[1], None)).unwrap();
        assert_eq!(index, 0);
        let (index2, _) = store.create(params(&[1], None)).unwrap();
        assert_eq!(index2, 1);
        assert_eq!(store.load().unwrap().len(), 2);
    }

    #[test]
    fn state_file_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = CrawlStore::new(dir.path().join("crawls.json"));
        let mut p = params(&[1, 2], Some(1000));
        p.keywords = vec!["vaccine".to_string()];
        p.min_date = Some(500);
        let (index, mut state) = store.resume_or_create(p.clone()).unwrap();
        state.mark_unsearchable(2);
        store.save(index, &state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].params, p);
        assert_eq!(loaded[0].chats_not_searchable, vec![2]);
    }
}
