//! Transcript, keyword and room persistence.
//!
//! Split into a hot cache (Redis or in-process) and a durable store
//! (MongoDB or in-process), with [`transcript::TranscriptStore`] composing
//! the two.

pub mod cache;
pub mod durable;
pub mod keywords;
pub mod transcript;

pub use cache::{CacheBackend, MemoryCache, RedisCache};
pub use durable::{DurableStore, MemoryDurable, MongoStore, StoredTranscript};
pub use keywords::KeywordStore;
pub use transcript::TranscriptStore;
