pub mod chat;
pub mod content;
pub mod notice;
pub mod task;
pub mod tenant;
