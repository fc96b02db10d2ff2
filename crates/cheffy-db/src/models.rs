/// Database row types: these map directly to SQLite rows.
/// Distinct from cheffy-types API models to keep the DB layer independent.

#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub position: i64,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

/// A message to be inserted; the position is assigned by the query.
#[derive(Debug, Clone)]
pub struct NewMessageRow {
    pub id: String,
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ConversationSummaryRow {
    pub conversation: ConversationRow,
    pub message_count: i64,
    pub first_message: Option<MessageRow>,
}

/// List columns (ingredients, instructions, tags) are stored as JSON arrays
/// and decoded on read.
#[derive(Debug, Clone)]
pub struct RecipeRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub ingredients: Vec<String>,
    pub instructions: Vec<String>,
    pub prep_time: Option<i64>,
    pub cook_time: Option<i64>,
    pub servings: Option<i64>,
    pub difficulty: Option<String>,
    pub tags: Vec<String>,
    pub image_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}
