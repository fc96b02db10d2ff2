//! DB row → API model conversion. Corrupt columns are logged and replaced
//! with defaults rather than failing the whole response.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use cheffy_db::models::{ConversationRow, ConversationSummaryRow, MessageRow, RecipeRow};
use cheffy_types::models::{Conversation, ConversationSummary, Message, Recipe, Role};

fn parse_uuid(raw: &str, field: &str, owner: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}' on '{}': {}", field, raw, owner, e);
        Uuid::default()
    })
}

fn parse_timestamp(raw: &str, owner: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by SQLite defaults use "YYYY-MM-DD HH:MM:SS" without timezone.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on '{}': {}", raw, owner, e);
            DateTime::default()
        })
}

fn to_u32(value: Option<i64>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

pub fn message_from_row(row: MessageRow) -> Message {
    Message {
        id: parse_uuid(&row.id, "message id", &row.id),
        conversation_id: parse_uuid(&row.conversation_id, "conversation_id", &row.id),
        role: row.role.parse().unwrap_or_else(|e| {
            warn!("Corrupt role on message '{}': {}", row.id, e);
            Role::User
        }),
        created_at: parse_timestamp(&row.created_at, &row.id),
        content: row.content,
    }
}

pub fn conversation_from_rows(row: ConversationRow, messages: Vec<MessageRow>) -> Conversation {
    Conversation {
        id: parse_uuid(&row.id, "conversation id", &row.id),
        created_at: parse_timestamp(&row.created_at, &row.id),
        updated_at: parse_timestamp(&row.updated_at, &row.id),
        user_id: row.user_id,
        title: row.title,
        messages: messages.into_iter().map(message_from_row).collect(),
    }
}

pub fn summary_from_row(row: ConversationSummaryRow) -> ConversationSummary {
    let conversation = row.conversation;
    ConversationSummary {
        id: parse_uuid(&conversation.id, "conversation id", &conversation.id),
        created_at: parse_timestamp(&conversation.created_at, &conversation.id),
        updated_at: parse_timestamp(&conversation.updated_at, &conversation.id),
        user_id: conversation.user_id,
        title: conversation.title,
        message_count: row.message_count.max(0) as usize,
        preview: row.first_message.map(message_from_row),
    }
}

pub fn recipe_from_row(row: RecipeRow) -> Recipe {
    Recipe {
        id: parse_uuid(&row.id, "recipe id", &row.id),
        created_at: parse_timestamp(&row.created_at, &row.id),
        updated_at: parse_timestamp(&row.updated_at, &row.id),
        user_id: row.user_id,
        title: row.title,
        description: row.description,
        ingredients: row.ingredients,
        instructions: row.instructions,
        prep_time: to_u32(row.prep_time),
        cook_time: to_u32(row.cook_time),
        servings: to_u32(row.servings),
        difficulty: row.difficulty,
        tags: row.tags,
        image_url: row.image_url,
    }
}
