pub mod health;
pub mod messages;
pub mod test_chat;
