use crate::models::{ConversationRow, ConversationSummaryRow, MessageRow, NewMessageRow, RecipeRow};
use crate::Database;
use anyhow::{Result, anyhow};
use chrono::{SecondsFormat, Utc};
use cheffy_types::models::NewRecipe;
use rusqlite::{Connection, Row, types::Type};

/// Microsecond RFC 3339 timestamps so rows created within the same second
/// still sort in creation order.
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Database {
    // -- Conversations --

    /// Insert a conversation and all of its messages in one transaction.
    /// Message positions follow slice order.
    pub fn create_conversation(
        &self,
        id: &str,
        user_id: &str,
        title: Option<&str>,
        messages: &[NewMessageRow],
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = now_timestamp();

            tx.execute(
                "INSERT INTO conversations (id, user_id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![id, user_id, title, now],
            )?;

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO messages (id, conversation_id, position, role, content, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for (position, msg) in messages.iter().enumerate() {
                    stmt.execute(rusqlite::params![
                        msg.id,
                        id,
                        position as i64,
                        msg.role,
                        msg.content,
                        now
                    ])?;
                }
            }

            tx.commit()?;
            Ok(())
        })
    }

    /// Fetch a conversation with its messages in spoken order.
    pub fn get_conversation(&self, id: &str) -> Result<Option<(ConversationRow, Vec<MessageRow>)>> {
        self.with_conn(|conn| {
            let Some(conversation) = query_conversation(conn, id)? else {
                return Ok(None);
            };
            let messages = query_messages(conn, id)?;
            Ok(Some((conversation, messages)))
        })
    }

    /// Conversations owned by `user_id`, most recently updated first, each with
    /// its message count and first message as a preview.
    pub fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationSummaryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.user_id, c.title, c.created_at, c.updated_at,
                        (SELECT COUNT(*) FROM messages mc WHERE mc.conversation_id = c.id),
                        m.id, m.conversation_id, m.position, m.role, m.content, m.created_at
                 FROM conversations c
                 LEFT JOIN messages m ON m.conversation_id = c.id AND m.position = 0
                 WHERE c.user_id = ?1
                 ORDER BY c.updated_at DESC, c.rowid DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    let first_message = match row.get::<_, Option<String>>(6)? {
                        Some(message_id) => Some(MessageRow {
                            id: message_id,
                            conversation_id: row.get(7)?,
                            position: row.get(8)?,
                            role: row.get(9)?,
                            content: row.get(10)?,
                            created_at: row.get(11)?,
                        }),
                        None => None,
                    };
                    Ok(ConversationSummaryRow {
                        conversation: ConversationRow {
                            id: row.get(0)?,
                            user_id: row.get(1)?,
                            title: row.get(2)?,
                            created_at: row.get(3)?,
                            updated_at: row.get(4)?,
                        },
                        message_count: row.get(5)?,
                        first_message,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Append a message at the end of a conversation and bump its `updated_at`.
    pub fn append_message(
        &self,
        conversation_id: &str,
        message: &NewMessageRow,
    ) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = now_timestamp();

            let position: i64 = tx.query_row(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;

            tx.execute(
                "INSERT INTO messages (id, conversation_id, position, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![message.id, conversation_id, position, message.role, message.content, now],
            )?;

            let updated = tx.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, conversation_id],
            )?;
            if updated == 0 {
                return Err(anyhow!("Conversation not found: {}", conversation_id));
            }

            tx.commit()?;

            Ok(MessageRow {
                id: message.id.clone(),
                conversation_id: conversation_id.to_string(),
                position,
                role: message.role.clone(),
                content: message.content.clone(),
                created_at: now,
            })
        })
    }

    /// Returns false when no such conversation exists.
    pub fn update_conversation_title(&self, id: &str, title: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![title, now_timestamp(), id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Deletes the conversation and, via cascade, its messages.
    pub fn delete_conversation(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM conversations WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }

    // -- Recipes --

    pub fn insert_recipe(&self, id: &str, user_id: &str, recipe: &NewRecipe) -> Result<()> {
        let ingredients = serde_json::to_string(&recipe.ingredients)?;
        let instructions = serde_json::to_string(&recipe.instructions)?;
        let tags = serde_json::to_string(&recipe.tags)?;

        self.with_conn(|conn| {
            let now = now_timestamp();
            conn.execute(
                "INSERT INTO recipes (id, user_id, title, description, ingredients, instructions,
                                      prep_time, cook_time, servings, difficulty, tags, image_url,
                                      created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
                rusqlite::params![
                    id,
                    user_id,
                    recipe.title,
                    recipe.description,
                    ingredients,
                    instructions,
                    recipe.prep_time,
                    recipe.cook_time,
                    recipe.servings,
                    recipe.difficulty,
                    tags,
                    recipe.image_url,
                    now
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_recipe(&self, id: &str) -> Result<Option<RecipeRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM recipes WHERE id = ?1", RECIPE_COLUMNS);
            let row = conn
                .query_row(&sql, [id], recipe_from_row)
                .optional()?;
            Ok(row)
        })
    }

    /// Every recipe, newest first.
    pub fn list_recipes(&self) -> Result<Vec<RecipeRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM recipes ORDER BY created_at DESC, rowid DESC",
                RECIPE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], recipe_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Recipes owned by `user_id`, newest first.
    pub fn list_recipes_by_user(&self, user_id: &str) -> Result<Vec<RecipeRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM recipes WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
                RECIPE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], recipe_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_recipe(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM recipes WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }
}

const RECIPE_COLUMNS: &str = "id, user_id, title, description, ingredients, instructions, \
     prep_time, cook_time, servings, difficulty, tags, image_url, created_at, updated_at";

fn recipe_from_row(row: &Row<'_>) -> rusqlite::Result<RecipeRow> {
    Ok(RecipeRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        ingredients: decode_list(row, 4)?,
        instructions: decode_list(row, 5)?,
        prep_time: row.get(6)?,
        cook_time: row.get(7)?,
        servings: row.get(8)?,
        difficulty: row.get(9)?,
        tags: decode_list(row, 10)?,
        image_url: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn decode_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn query_conversation(conn: &Connection, id: &str) -> Result<Option<ConversationRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, title, created_at, updated_at FROM conversations WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(ConversationRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                title: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_messages(conn: &Connection, conversation_id: &str) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, position, role, content, created_at
         FROM messages
         WHERE conversation_id = ?1
         ORDER BY position ASC",
    )?;

    let rows = stmt
        .query_map([conversation_id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                position: row.get(2)?,
                role: row.get(3)?,
                content: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, role: &str, content: &str) -> NewMessageRow {
        NewMessageRow {
            id: id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    fn recipe(title: &str) -> NewRecipe {
        NewRecipe {
            title: title.to_string(),
            description: Some(String::new()),
            ingredients: vec!["1 cup rice".into(), "2 chicken thighs".into()],
            instructions: vec!["Cook rice".into(), "Grill chicken".into()],
            prep_time: Some(10),
            cook_time: Some(25),
            servings: Some(2),
            difficulty: Some("easy".into()),
            tags: vec!["dinner".into()],
            image_url: None,
        }
    }

    #[test]
    fn conversation_roundtrip_keeps_message_order() {
        let db = Database::open_in_memory().unwrap();
        let messages = vec![
            msg("m1", "user", "I have chicken and rice"),
            msg("m2", "assistant", "Try a chicken rice bowl"),
            msg("m3", "user", "Sounds good"),
        ];
        db.create_conversation("c1", "user_1", Some("Dinner"), &messages)
            .unwrap();

        let (conversation, rows) = db.get_conversation("c1").unwrap().unwrap();
        assert_eq!(conversation.user_id, "user_1");
        assert_eq!(conversation.title.as_deref(), Some("Dinner"));

        let pairs: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.role.as_str(), r.content.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("user", "I have chicken and rice"),
                ("assistant", "Try a chicken rice bowl"),
                ("user", "Sounds good"),
            ]
        );
    }

    #[test]
    fn failed_message_insert_rolls_back_conversation() {
        let db = Database::open_in_memory().unwrap();
        // Role check constraint rejects the second message.
        let messages = vec![msg("m1", "user", "hi"), msg("m2", "agent", "hello")];
        assert!(db.create_conversation("c1", "user_1", None, &messages).is_err());
        assert!(db.get_conversation("c1").unwrap().is_none());
    }

    #[test]
    fn missing_conversation_is_none() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_conversation("nope").unwrap().is_none());
    }

    #[test]
    fn list_conversations_is_scoped_and_recent_first() {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation("c1", "user_1", None, &[msg("m1", "user", "first")])
            .unwrap();
        db.create_conversation(
            "c2",
            "user_1",
            Some("Second"),
            &[msg("m2", "user", "second"), msg("m3", "assistant", "reply")],
        )
        .unwrap();
        db.create_conversation("c3", "user_2", None, &[msg("m4", "user", "other")])
            .unwrap();

        let list = db.list_conversations("user_1").unwrap();
        let ids: Vec<&str> = list.iter().map(|s| s.conversation.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c1"]);
        assert_eq!(list[0].message_count, 2);
        assert_eq!(list[0].first_message.as_ref().unwrap().content, "second");
    }

    #[test]
    fn empty_conversation_has_no_preview() {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation("c1", "user_1", None, &[]).unwrap();
        let list = db.list_conversations("user_1").unwrap();
        assert_eq!(list[0].message_count, 0);
        assert!(list[0].first_message.is_none());
    }

    #[test]
    fn append_message_goes_last_and_bumps_conversation() {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation("c1", "user_1", None, &[msg("m1", "user", "a")])
            .unwrap();
        db.create_conversation("c2", "user_1", None, &[msg("m2", "user", "b")])
            .unwrap();

        let appended = db
            .append_message("c1", &msg("m3", "assistant", "c"))
            .unwrap();
        assert_eq!(appended.position, 1);

        let (_, rows) = db.get_conversation("c1").unwrap().unwrap();
        assert_eq!(rows.last().unwrap().content, "c");

        // c1 was touched last, so it now leads the listing.
        let list = db.list_conversations("user_1").unwrap();
        assert_eq!(list[0].conversation.id, "c1");
    }

    #[test]
    fn append_to_missing_conversation_fails() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.append_message("nope", &msg("m1", "user", "x")).is_err());
    }

    #[test]
    fn title_update_and_delete() {
        let db = Database::open_in_memory().unwrap();
        db.create_conversation("c1", "user_1", None, &[msg("m1", "user", "a")])
            .unwrap();

        assert!(db.update_conversation_title("c1", "Renamed").unwrap());
        assert!(!db.update_conversation_title("nope", "x").unwrap());
        let (conversation, _) = db.get_conversation("c1").unwrap().unwrap();
        assert_eq!(conversation.title.as_deref(), Some("Renamed"));

        assert!(db.delete_conversation("c1").unwrap());
        assert!(db.get_conversation("c1").unwrap().is_none());
        assert!(!db.delete_conversation("c1").unwrap());
    }

    #[test]
    fn recipe_roundtrip_decodes_lists() {
        let db = Database::open_in_memory().unwrap();
        db.insert_recipe("r1", "user_1", &recipe("Chicken rice bowl"))
            .unwrap();

        let row = db.get_recipe("r1").unwrap().unwrap();
        assert_eq!(row.title, "Chicken rice bowl");
        assert_eq!(row.ingredients, vec!["1 cup rice", "2 chicken thighs"]);
        assert_eq!(row.instructions.len(), 2);
        assert_eq!(row.tags, vec!["dinner"]);
        assert_eq!(row.servings, Some(2));
        assert!(db.get_recipe("r2").unwrap().is_none());
    }

    #[test]
    fn recipes_list_newest_first() {
        let db = Database::open_in_memory().unwrap();
        db.insert_recipe("r1", "user_1", &recipe("Old")).unwrap();
        db.insert_recipe("r2", "user_2", &recipe("Middle")).unwrap();
        db.insert_recipe("r3", "user_1", &recipe("New")).unwrap();

        let all: Vec<String> = db.list_recipes().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(all, vec!["r3", "r2", "r1"]);

        let mine: Vec<String> = db
            .list_recipes_by_user("user_1")
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(mine, vec!["r3", "r1"]);

        assert!(db.delete_recipe("r2").unwrap());
        assert_eq!(db.list_recipes().unwrap().len(), 2);
    }
}
