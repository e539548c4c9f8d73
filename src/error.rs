use thiserror::Error;

/// Failures the crawl loop has to tell apart from plain RPC or IO errors.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// A numeric chat id that has never been stored in the chats table.
    /// Without a stored access hash no InputPeer can be built for it, so the
    /// operator has to crawl the chat by username once or drop the id.
    #[error("chat {0} has never been resolved; crawl it by username first or remove the id from the list")]
    EntityNotResolved(i64),

    #[error("chat {0} is private or no longer accessible")]
    ChatPrivate(i64),

    #[error(
        "hash collision: message {new_message} in chat {new_chat} has the same hash ({hash}) \
         as stored message {stored_message} in chat {stored_chat}"
    )]
    HashCollision {
        hash: String,
        stored_chat: i64,
        stored_message: i32,
        new_chat: i64,
        new_message: i32,
    },
}
