pub mod chat;
pub mod summarize;
