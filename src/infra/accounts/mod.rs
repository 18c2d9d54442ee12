//! Account sources: interactive prompt or JSON file.

pub mod file;
pub mod prompt;

pub use file::{DEFAULT_ACCOUNTS_FILE, FileAccountSource, parse_accounts};
pub use prompt::PromptAccountSource;
