pub mod conversation;
pub mod priority;
pub mod sentiment;
