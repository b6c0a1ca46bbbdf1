use actix_web::{get, post, web, Error};
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::conversation::derive_title;
use crate::models::message::Role;
use crate::models::{Conversation, Message, User};
use crate::types::{
    ChatTurn, ConversationResponse, ConversationSummary, ConversationTurn, HistoryResponse,
    SendMessageRequest, SendMessageResponse, UsageResponse, UsageSnapshot,
};
use crate::AppState;

const MAX_COMPLETION_TOKENS: u32 = 8192;

/// Quota-gated chat completion. Reserves one message of quota with a guarded
/// increment before calling the model, persists both turns and the token
/// counts on success, and releases the reservation on any failure so failed
/// calls are never charged.
#[post("")]
pub async fn send_message(
    app_state: web::Data<AppState>,
    authenticated_user: AuthenticatedUser,
    web::Json(request): web::Json<SendMessageRequest>,
) -> Result<web::Json<SendMessageResponse>, Error> {
    let user = User::get_by_id(&app_state.pool, authenticated_user.user_id)
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::NotFound("User"))?;

    let last_turn = request
        .messages
        .last()
        .ok_or_else(|| ApiError::BadRequest("At least one message is required".to_string()))?;
    if last_turn.role != Role::User {
        return Err(
            ApiError::BadRequest("The last message must be a user message".to_string()).into(),
        );
    }

    if !user.has_quota() {
        return Err(ApiError::QuotaExceeded {
            used: user.messages_used,
            limit: user.messages_limit,
            plan: user.plan,
        }
        .into());
    }

    // Guarded increment: a concurrent request for the same user that loses
    // the race fails the reservation and is rejected here.
    let reserved = User::reserve_message(&app_state.pool, user.id)
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::QuotaExceeded {
            used: user.messages_used,
            limit: user.messages_limit,
            plan: user.plan,
        })?;

    let completion = match complete(&app_state, &request.messages).await {
        Ok(completion) => completion,
        Err(e) => {
            release_reservation(&app_state, user.id).await;
            return Err(ApiError::Upstream(e).into());
        }
    };

    // New conversations are titled after the first user turn in the thread.
    let title = derive_title(
        request
            .messages
            .iter()
            .find(|turn| turn.role == Role::User)
            .map(|turn| turn.content.as_str()),
    );

    let persisted = persist_exchange(
        &app_state,
        user.id,
        request.conversation_id,
        &title,
        last_turn,
        &completion,
    )
    .await;

    let conversation_id = match persisted {
        Ok(conversation_id) => conversation_id,
        Err(e) => {
            error!("Failed to persist chat exchange: {:?}", e);
            release_reservation(&app_state, user.id).await;
            return Err(ApiError::from(e).into());
        }
    };

    info!(
        "Chat completion for user {}: {}/{} messages used",
        user.id, reserved.messages_used, reserved.messages_limit
    );

    Ok(web::Json(SendMessageResponse {
        response: completion.reply,
        conversation_id,
        usage: UsageSnapshot {
            used: reserved.messages_used,
            limit: reserved.messages_limit,
            plan: reserved.plan,
        },
    }))
}

#[get("/usage")]
pub async fn get_usage(
    app_state: web::Data<AppState>,
    authenticated_user: AuthenticatedUser,
) -> Result<web::Json<UsageResponse>, Error> {
    let user = User::get_by_id(&app_state.pool, authenticated_user.user_id)
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::NotFound("User"))?;

    Ok(web::Json(UsageResponse {
        usage: UsageSnapshot {
            used: user.messages_used,
            limit: user.messages_limit,
            plan: user.plan,
        },
    }))
}

#[get("/history")]
pub async fn get_history(
    app_state: web::Data<AppState>,
    authenticated_user: AuthenticatedUser,
) -> Result<web::Json<HistoryResponse>, Error> {
    let conversations = Conversation::list_for_user(&app_state.pool, authenticated_user.user_id)
        .await
        .map_err(ApiError::from)?;

    Ok(web::Json(HistoryResponse {
        conversations: conversations
            .into_iter()
            .map(|c| ConversationSummary {
                id: c.id,
                title: c.title,
                created_at: c.created_at,
            })
            .collect(),
    }))
}

#[get("/history/{conversation_id}")]
pub async fn get_conversation(
    app_state: web::Data<AppState>,
    authenticated_user: AuthenticatedUser,
    conversation_id: web::Path<Uuid>,
) -> Result<web::Json<ConversationResponse>, Error> {
    let conversation_id = conversation_id.into_inner();

    Conversation::get_for_user(&app_state.pool, conversation_id, authenticated_user.user_id)
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::NotFound("Conversation"))?;

    let messages = Message::list_for_conversation(&app_state.pool, conversation_id)
        .await
        .map_err(ApiError::from)?;

    Ok(web::Json(ConversationResponse {
        messages: messages
            .into_iter()
            .map(|m| ConversationTurn {
                role: m.role,
                content: m.content,
            })
            .collect(),
    }))
}

struct Completion {
    reply: String,
    input_tokens: i32,
    output_tokens: i32,
}

async fn complete(app_state: &AppState, turns: &[ChatTurn]) -> Result<Completion, anyhow::Error> {
    let messages = turns
        .iter()
        .map(to_oai_message)
        .collect::<Result<Vec<_>, _>>()?;

    let request = CreateChatCompletionRequestArgs::default()
        .model(app_state.config.llm_model.clone())
        .max_tokens(MAX_COMPLETION_TOKENS)
        .messages(messages)
        .build()?;

    let response = app_state.llm_client.chat().create(request).await?;

    let reply = response
        .choices
        .first()
        .and_then(|choice| choice.message.content.clone())
        .ok_or_else(|| anyhow::anyhow!("Model returned no choices"))?;

    let (input_tokens, output_tokens) = response
        .usage
        .map(|usage| (usage.prompt_tokens as i32, usage.completion_tokens as i32))
        .unwrap_or((0, 0));

    Ok(Completion {
        reply,
        input_tokens,
        output_tokens,
    })
}

fn to_oai_message(
    turn: &ChatTurn,
) -> Result<ChatCompletionRequestMessage, async_openai::error::OpenAIError> {
    match turn.role {
        Role::User => Ok(ChatCompletionRequestUserMessageArgs::default()
            .content(turn.content.clone())
            .build()?
            .into()),
        Role::Assistant => Ok(ChatCompletionRequestAssistantMessageArgs::default()
            .content(turn.content.clone())
            .build()?
            .into()),
    }
}

/// One transaction: conversation create-or-reuse, both turn inserts, token
/// accumulation. Returns the conversation id.
async fn persist_exchange(
    app_state: &AppState,
    user_id: Uuid,
    conversation_id: Option<Uuid>,
    title: &str,
    last_turn: &ChatTurn,
    completion: &Completion,
) -> Result<Uuid, sqlx::Error> {
    let mut tx = app_state.pool.begin().await?;

    let conversation =
        Conversation::get_or_create(&mut *tx, user_id, conversation_id, title).await?;

    Message::insert(
        &mut *tx,
        conversation.id,
        Role::User,
        &last_turn.content,
        completion.input_tokens,
    )
    .await?;
    Message::insert(
        &mut *tx,
        conversation.id,
        Role::Assistant,
        &completion.reply,
        completion.output_tokens,
    )
    .await?;

    User::record_tokens(
        &mut *tx,
        user_id,
        (completion.input_tokens + completion.output_tokens) as i64,
    )
    .await?;

    tx.commit().await?;
    Ok(conversation.id)
}

async fn release_reservation(app_state: &AppState, user_id: Uuid) {
    if let Err(e) = User::release_message(&app_state.pool, user_id).await {
        warn!("Failed to release quota reservation for {}: {:?}", user_id, e);
    }
}
