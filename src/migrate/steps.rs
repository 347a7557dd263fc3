//! Built-in schema history for both stores.
//!
//! Append new steps at the end of a table's list with the next version.
//! Never edit or renumber a step that has shipped.

use super::registry::MigrationRegistry;
use super::step::{MigrationStep, Probe, SchemaChange};
use crate::schema::{ColumnDef, ColumnType, IndexDef, TableDef};

use ColumnType::*;

// ============ Relational store ============

const USERS: TableDef = TableDef {
    name: "users",
    columns: &[
        ColumnDef::new("id", Text).primary_key(),
        ColumnDef::new("username", Text),
        ColumnDef::new("password_hash", Text),
        ColumnDef::new("created_at", Timestamp),
        ColumnDef::new("updated_at", Timestamp),
    ],
};

const TAGS: TableDef = TableDef {
    name: "tags",
    columns: &[
        ColumnDef::new("id", Text).primary_key(),
        ColumnDef::new("user_id", Text),
        ColumnDef::new("name", Text),
        ColumnDef::new("usage_count", Integer).default("0"),
        ColumnDef::new("created_at", Timestamp),
        ColumnDef::new("updated_at", Timestamp),
    ],
};

const PUSH_RULES: TableDef = TableDef {
    name: "push_rules",
    columns: &[
        ColumnDef::new("id", Text).primary_key(),
        ColumnDef::new("user_id", Text),
        ColumnDef::new("name", Text),
        ColumnDef::new("webhook_url", Text),
        ColumnDef::new("events", Json).default("'[]'"),
        ColumnDef::new("secret", Text).nullable(),
        ColumnDef::new("enabled", Boolean).default("1"),
        ColumnDef::new("created_at", Timestamp),
        ColumnDef::new("updated_at", Timestamp),
    ],
};

const PUSH_DELIVERIES: TableDef = TableDef {
    name: "push_deliveries",
    columns: &[
        ColumnDef::new("id", Text).primary_key(),
        ColumnDef::new("rule_id", Text),
        ColumnDef::new("event", Text),
        ColumnDef::new("status_code", Integer).nullable(),
        ColumnDef::new("success", Boolean).default("0"),
        ColumnDef::new("error", Text).nullable(),
        ColumnDef::new("created_at", Timestamp),
    ],
};

const RELATIONAL_STEPS: &[MigrationStep] = &[
    MigrationStep::new(1, "users", "create users", SchemaChange::CreateTable(&USERS)),
    MigrationStep::new(
        2,
        "users",
        "unique usernames",
        SchemaChange::CreateIndex(IndexDef {
            name: "idx_users_username",
            table: "users",
            columns: &["username"],
            unique: true,
        }),
    ),
    MigrationStep::new(
        3,
        "users",
        "add nickname",
        SchemaChange::AddColumn(ColumnDef::new("nickname", Text).nullable()),
    ),
    MigrationStep::new(
        4,
        "users",
        "backfill nickname from username",
        SchemaChange::Execute {
            sql: "UPDATE users SET nickname = username WHERE nickname IS NULL",
            skip_if: Probe::Never,
        },
    ),
    MigrationStep::new(
        5,
        "users",
        "add last_login_at",
        SchemaChange::AddColumn(ColumnDef::new("last_login_at", Timestamp).nullable()),
    ),
    MigrationStep::new(1, "tags", "create tags", SchemaChange::CreateTable(&TAGS)),
    MigrationStep::new(
        2,
        "tags",
        "unique tag name per user",
        SchemaChange::CreateIndex(IndexDef {
            name: "idx_tags_user_name",
            table: "tags",
            columns: &["user_id", "name"],
            unique: true,
        }),
    ),
    MigrationStep::new(
        3,
        "tags",
        "add color",
        SchemaChange::AddColumn(ColumnDef::new("color", Text).nullable()),
    ),
    MigrationStep::new(
        1,
        "push_rules",
        "create push_rules",
        SchemaChange::CreateTable(&PUSH_RULES),
    ),
    MigrationStep::new(
        1,
        "push_deliveries",
        "create push_deliveries",
        SchemaChange::CreateTable(&PUSH_DELIVERIES),
    ),
    MigrationStep::new(
        2,
        "push_deliveries",
        "index deliveries by rule",
        SchemaChange::CreateIndex(IndexDef {
            name: "idx_push_deliveries_rule",
            table: "push_deliveries",
            columns: &["rule_id", "created_at"],
            unique: false,
        }),
    ),
];

// ============ Vector store ============

const MEMOS: TableDef = TableDef {
    name: "memos",
    columns: &[
        ColumnDef::new("id", Text).primary_key(),
        ColumnDef::new("user_id", Text),
        ColumnDef::new("content", Text),
        ColumnDef::new("created_at", Timestamp),
        ColumnDef::new("updated_at", Timestamp),
    ],
};

const ATTACHMENTS: TableDef = TableDef {
    name: "attachments",
    columns: &[
        ColumnDef::new("id", Text).primary_key(),
        ColumnDef::new("user_id", Text),
        ColumnDef::new("memo_id", Text).nullable(),
        ColumnDef::new("filename", Text),
        ColumnDef::new("content_type", Text),
        ColumnDef::new("size", Integer),
        ColumnDef::new("storage_key", Text),
        ColumnDef::new("created_at", Timestamp),
    ],
};

const CATEGORIES: TableDef = TableDef {
    name: "categories",
    columns: &[
        ColumnDef::new("id", Text).primary_key(),
        ColumnDef::new("user_id", Text),
        ColumnDef::new("name", Text),
        ColumnDef::new("color", Text).nullable(),
        ColumnDef::new("created_at", Timestamp),
        ColumnDef::new("updated_at", Timestamp),
    ],
};

const AI_CONVERSATIONS: TableDef = TableDef {
    name: "ai_conversations",
    columns: &[
        ColumnDef::new("id", Text).primary_key(),
        ColumnDef::new("user_id", Text),
        ColumnDef::new("title", Text),
        ColumnDef::new("created_at", Timestamp),
        ColumnDef::new("updated_at", Timestamp),
    ],
};

const AI_MESSAGES: TableDef = TableDef {
    name: "ai_messages",
    columns: &[
        ColumnDef::new("id", Text).primary_key(),
        ColumnDef::new("conversation_id", Text),
        ColumnDef::new("role", Text),
        ColumnDef::new("content", Text),
        ColumnDef::new("created_at", Timestamp),
    ],
};

const EMBEDDING_CACHE: TableDef = TableDef {
    name: "embedding_cache",
    columns: &[
        ColumnDef::new("content_hash", Text).primary_key(),
        ColumnDef::new("model", Text),
        ColumnDef::new("dims", Integer),
        ColumnDef::new("vector", Vector),
        ColumnDef::new("created_at", Timestamp),
    ],
};

const VECTOR_STEPS: &[MigrationStep] = &[
    MigrationStep::new(1, "memos", "create memos", SchemaChange::CreateTable(&MEMOS)),
    MigrationStep::new(
        2,
        "memos",
        "add tags",
        SchemaChange::AddColumn(ColumnDef::new("tags", Json).default("'[]'")),
    ),
    MigrationStep::new(
        3,
        "memos",
        "add category_id",
        SchemaChange::AddColumn(ColumnDef::new("category_id", Text).nullable()),
    ),
    MigrationStep::new(
        4,
        "memos",
        "add embedding",
        SchemaChange::AddColumn(ColumnDef::new("embedding", Vector).nullable()),
    ),
    MigrationStep::new(
        5,
        "memos",
        "add ai_summary",
        SchemaChange::AddColumn(ColumnDef::new("ai_summary", Text).nullable()),
    ),
    MigrationStep::new(
        6,
        "memos",
        "index memos by owner and time",
        SchemaChange::CreateIndex(IndexDef {
            name: "idx_memos_user_created",
            table: "memos",
            columns: &["user_id", "created_at"],
            unique: false,
        }),
    ),
    MigrationStep::new(
        7,
        "memos",
        "add is_pinned",
        SchemaChange::AddColumn(ColumnDef::new("is_pinned", Boolean).default("0")),
    ),
    MigrationStep::new(
        8,
        "memos",
        "add is_public",
        SchemaChange::AddColumn(ColumnDef::new("is_public", Boolean).default("0")),
    ),
    MigrationStep::new(
        9,
        "memos",
        "add embedding_model",
        SchemaChange::AddColumn(ColumnDef::new("embedding_model", Text).nullable()),
    ),
    MigrationStep::new(
        1,
        "attachments",
        "create attachments",
        SchemaChange::CreateTable(&ATTACHMENTS),
    ),
    MigrationStep::new(
        2,
        "attachments",
        "add ocr_text",
        SchemaChange::AddColumn(ColumnDef::new("ocr_text", Text).nullable()),
    ),
    MigrationStep::new(
        3,
        "attachments",
        "index attachments by memo",
        SchemaChange::CreateIndex(IndexDef {
            name: "idx_attachments_memo",
            table: "attachments",
            columns: &["memo_id"],
            unique: false,
        }),
    ),
    MigrationStep::new(
        1,
        "categories",
        "create categories",
        SchemaChange::CreateTable(&CATEGORIES),
    ),
    MigrationStep::new(
        2,
        "categories",
        "unique category name per user",
        SchemaChange::CreateIndex(IndexDef {
            name: "idx_categories_user_name",
            table: "categories",
            columns: &["user_id", "name"],
            unique: true,
        }),
    ),
    MigrationStep::new(
        1,
        "ai_conversations",
        "create ai_conversations",
        SchemaChange::CreateTable(&AI_CONVERSATIONS),
    ),
    MigrationStep::new(
        2,
        "ai_conversations",
        "add memo_id",
        SchemaChange::AddColumn(ColumnDef::new("memo_id", Text).nullable()),
    ),
    MigrationStep::new(
        1,
        "ai_messages",
        "create ai_messages",
        SchemaChange::CreateTable(&AI_MESSAGES),
    ),
    MigrationStep::new(
        2,
        "ai_messages",
        "index messages by conversation",
        SchemaChange::CreateIndex(IndexDef {
            name: "idx_ai_messages_conversation",
            table: "ai_messages",
            columns: &["conversation_id", "created_at"],
            unique: false,
        }),
    ),
    MigrationStep::new(
        1,
        "embedding_cache",
        "create embedding_cache",
        SchemaChange::CreateTable(&EMBEDDING_CACHE),
    ),
];

/// Steps for users, tags, and push rules.
pub fn relational() -> anyhow::Result<MigrationRegistry> {
    MigrationRegistry::new(RELATIONAL_STEPS.to_vec())
}

/// Steps for memos and everything hanging off them.
pub fn vector() -> anyhow::Result<MigrationRegistry> {
    MigrationRegistry::new(VECTOR_STEPS.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registries_are_valid() {
        let rel = relational().unwrap();
        let vec = vector().unwrap();
        assert_eq!(rel.latest_version("users"), 5);
        assert_eq!(vec.latest_version("memos"), 9);
        assert!(rel.all_table_names().is_disjoint(&vec.all_table_names()));
    }

    #[test]
    fn test_memos_step_eight_adds_is_public() {
        let vec = vector().unwrap();
        let step = vec
            .steps_for_table("memos")
            .into_iter()
            .find(|s| s.version == 8)
            .unwrap();
        match step.change {
            SchemaChange::AddColumn(col) => {
                assert_eq!(col.name, "is_public");
                assert_eq!(col.default, Some("0"));
            }
            other => panic!("unexpected change {:?}", other),
        }
    }
}
