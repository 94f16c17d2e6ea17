pub mod config;
pub mod error;
pub mod subject;
pub mod types;

pub use config::Config;
pub use error::ThreadmarkError;
pub use subject::{clean_subject, has_reply_prefix, is_reply_marked};
pub use types::*;
