use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::message::Role;
use crate::models::plan::Plan;

#[derive(Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

#[derive(Deserialize, ToSchema)]
pub struct SendMessageRequest {
    /// Full ordered turn history, ending with the new user message.
    pub messages: Vec<ChatTurn>,
    pub conversation_id: Option<Uuid>,
}

#[derive(Serialize, ToSchema)]
pub struct UsageSnapshot {
    pub used: i32,
    pub limit: i32,
    pub plan: Plan,
}

#[derive(Serialize, ToSchema)]
pub struct SendMessageResponse {
    pub response: String,
    pub conversation_id: Uuid,
    pub usage: UsageSnapshot,
}

#[derive(Serialize, ToSchema)]
pub struct UsageResponse {
    pub usage: UsageSnapshot,
}

#[derive(Serialize, ToSchema)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
pub struct HistoryResponse {
    pub conversations: Vec<ConversationSummary>,
}

#[derive(Serialize, ToSchema)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

#[derive(Serialize, ToSchema)]
pub struct ConversationResponse {
    pub messages: Vec<ConversationTurn>,
}
