pub mod count_tokens;
pub mod error;
pub mod stream;
pub mod types;
