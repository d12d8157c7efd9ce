//! Deduplicated search path with remote backend and local fallback

mod backend;
mod controller;
mod corpus;
mod throttle;

pub use backend::{HttpSearchBackend, RemoteQuery, SearchBackend, SearchResult, DEFAULT_COLLECTIONS};
pub use controller::{
    ResponseOrigin, SearchController, SearchRequest, SearchResponse, FALLBACK_LIMIT,
    REMOTE_TIMEOUT,
};
pub use corpus::{DirectoryCorpus, InMemoryCorpus, LocalCorpus};
pub use throttle::{SoftThrottle, DEFAULT_CAPACITY, THROTTLE_WINDOW};
