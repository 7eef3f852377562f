mod auth;
mod client;

pub use auth::SlackAuth;
pub use client::{ConversationClient, Identity, SlackClient};
