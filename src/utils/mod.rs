//! Shared helpers for file discovery, retries and text handling.

pub mod file;
pub mod retry;
pub mod text;

pub use file::{LoadedText, calculate_checksum, collect_files, load_texts};
pub use retry::{RetryConfig, RetryResult, Retryable, with_retry};
pub use text::{has_content, preview};
