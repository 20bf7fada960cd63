//! The forum schema the rule catalog is written against.
//!
//! References between tables are by convention only; there are no foreign
//! keys, which is why the repair engine exists at all. A zero id means
//! "no reference" (guest poster, top-level board, topic without a poll).

use crate::error::Result;
use rusqlite::Connection;

/// Tables the rule catalog reads or writes
pub const REQUIRED_TABLES: &[&str] = &[
    "categories",
    "boards",
    "members",
    "membergroups",
    "topics",
    "messages",
    "polls",
    "poll_choices",
    "log_polls",
    "log_topics",
    "log_boards",
    "log_mark_read",
    "log_notify",
    "personal_messages",
    "pm_recipients",
    "log_search_subjects",
    "calendar",
    "log_reported",
    "log_reported_comments",
    "log_group_requests",
];

const FORUM_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS categories (
    id_cat INTEGER PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    cat_order INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS boards (
    id_board INTEGER PRIMARY KEY,
    id_cat INTEGER NOT NULL DEFAULT 0,
    id_parent INTEGER NOT NULL DEFAULT 0,
    child_level INTEGER NOT NULL DEFAULT 0,
    board_order INTEGER NOT NULL DEFAULT 0,
    name TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS members (
    id_member INTEGER PRIMARY KEY,
    member_name TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS membergroups (
    id_group INTEGER PRIMARY KEY,
    group_name TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS topics (
    id_topic INTEGER PRIMARY KEY,
    id_board INTEGER NOT NULL DEFAULT 0,
    id_first_msg INTEGER NOT NULL DEFAULT 0,
    id_last_msg INTEGER NOT NULL DEFAULT 0,
    id_member_started INTEGER NOT NULL DEFAULT 0,
    id_poll INTEGER NOT NULL DEFAULT 0,
    num_replies INTEGER NOT NULL DEFAULT 0,
    unapproved_posts INTEGER NOT NULL DEFAULT 0,
    approved INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_topics_board ON topics (id_board);
CREATE INDEX IF NOT EXISTS idx_topics_poll ON topics (id_poll);
CREATE TABLE IF NOT EXISTS messages (
    id_msg INTEGER PRIMARY KEY,
    id_topic INTEGER NOT NULL DEFAULT 0,
    id_board INTEGER NOT NULL DEFAULT 0,
    id_member INTEGER NOT NULL DEFAULT 0,
    poster_name TEXT NOT NULL DEFAULT '',
    poster_time INTEGER NOT NULL DEFAULT 0,
    subject TEXT NOT NULL DEFAULT '',
    body TEXT NOT NULL DEFAULT '',
    approved INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_messages_topic ON messages (id_topic);
CREATE INDEX IF NOT EXISTS idx_messages_member ON messages (id_member);
CREATE TABLE IF NOT EXISTS polls (
    id_poll INTEGER PRIMARY KEY,
    question TEXT NOT NULL DEFAULT '',
    id_member INTEGER NOT NULL DEFAULT 0,
    poster_name TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS poll_choices (
    id_poll INTEGER NOT NULL DEFAULT 0,
    id_choice INTEGER NOT NULL DEFAULT 0,
    label TEXT NOT NULL DEFAULT '',
    votes INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (id_poll, id_choice)
);
CREATE TABLE IF NOT EXISTS log_polls (
    id_poll INTEGER NOT NULL DEFAULT 0,
    id_member INTEGER NOT NULL DEFAULT 0,
    id_choice INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS log_topics (
    id_member INTEGER NOT NULL DEFAULT 0,
    id_topic INTEGER NOT NULL DEFAULT 0,
    id_msg INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (id_member, id_topic)
);
CREATE TABLE IF NOT EXISTS log_boards (
    id_member INTEGER NOT NULL DEFAULT 0,
    id_board INTEGER NOT NULL DEFAULT 0,
    id_msg INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (id_member, id_board)
);
CREATE TABLE IF NOT EXISTS log_mark_read (
    id_member INTEGER NOT NULL DEFAULT 0,
    id_board INTEGER NOT NULL DEFAULT 0,
    id_msg INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (id_member, id_board)
);
CREATE TABLE IF NOT EXISTS log_notify (
    id_member INTEGER NOT NULL DEFAULT 0,
    id_topic INTEGER NOT NULL DEFAULT 0,
    id_board INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS personal_messages (
    id_pm INTEGER PRIMARY KEY,
    id_member_from INTEGER NOT NULL DEFAULT 0,
    from_name TEXT NOT NULL DEFAULT '',
    msgtime INTEGER NOT NULL DEFAULT 0,
    subject TEXT NOT NULL DEFAULT '',
    body TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS pm_recipients (
    id_pm INTEGER NOT NULL DEFAULT 0,
    id_member INTEGER NOT NULL DEFAULT 0,
    is_read INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (id_pm, id_member)
);
CREATE TABLE IF NOT EXISTS log_search_subjects (
    word TEXT NOT NULL DEFAULT '',
    id_topic INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (word, id_topic)
);
CREATE INDEX IF NOT EXISTS idx_search_subjects_topic ON log_search_subjects (id_topic);
CREATE TABLE IF NOT EXISTS calendar (
    id_event INTEGER PRIMARY KEY,
    id_board INTEGER NOT NULL DEFAULT 0,
    id_topic INTEGER NOT NULL DEFAULT 0,
    id_member INTEGER NOT NULL DEFAULT 0,
    title TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS log_reported (
    id_report INTEGER PRIMARY KEY,
    id_msg INTEGER NOT NULL DEFAULT 0,
    id_topic INTEGER NOT NULL DEFAULT 0,
    id_board INTEGER NOT NULL DEFAULT 0,
    id_member INTEGER NOT NULL DEFAULT 0,
    subject TEXT NOT NULL DEFAULT '',
    num_reports INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS log_reported_comments (
    id_comment INTEGER PRIMARY KEY,
    id_report INTEGER NOT NULL DEFAULT 0,
    id_member INTEGER NOT NULL DEFAULT 0,
    comment TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS log_group_requests (
    id_request INTEGER PRIMARY KEY,
    id_member INTEGER NOT NULL DEFAULT 0,
    id_group INTEGER NOT NULL DEFAULT 0,
    time_applied INTEGER NOT NULL DEFAULT 0,
    reason TEXT NOT NULL DEFAULT ''
);
"#;

/// Create every table the catalog needs (no-op for existing tables)
pub fn install(conn: &Connection) -> Result<()> {
    conn.execute_batch(FORUM_SCHEMA)?;
    Ok(())
}

/// Required tables absent from the database, in declaration order
pub fn missing_tables(conn: &Connection) -> Result<Vec<&'static str>> {
    let mut stmt =
        conn.prepare("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
    let mut missing = Vec::new();
    for table in REQUIRED_TABLES {
        let count: i64 = stmt.query_row([table], |row| row.get(0))?;
        if count == 0 {
            missing.push(*table);
        }
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        install(&conn).unwrap();
        install(&conn).unwrap();
        assert!(missing_tables(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_missing_tables_on_foreign_database() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE topics (id_topic INTEGER PRIMARY KEY);")
            .unwrap();
        let missing = missing_tables(&conn).unwrap();
        assert!(missing.contains(&"messages"));
        assert!(!missing.contains(&"topics"));
    }
}
