mod auth;
mod chat;
mod pay;
mod stripe_events;

pub use auth::*;
pub use chat::*;
pub use pay::*;
pub use stripe_events::*;
