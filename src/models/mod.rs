pub mod conversation;
pub mod message;
pub mod plan;
pub mod user;
pub mod webhook_event;

pub use conversation::Conversation;
pub use message::Message;
pub use plan::{Plan, SubscriptionStatus};
pub use user::User;
pub use webhook_event::WebhookEvent;
