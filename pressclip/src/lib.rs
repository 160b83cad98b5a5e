// Library interface for pressclip modules
// This allows tests and the binary to import modules

pub mod dedup;
pub mod error;
pub mod harvest;
pub mod llm;
pub mod retry;
pub mod schedule;
pub mod scheduler;
pub mod scraping;
pub mod search;
pub mod sink;
pub mod storage;
