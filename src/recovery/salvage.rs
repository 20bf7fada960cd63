//! Recovery category and board that orphaned content is moved into.
//!
//! Containers are found by their localized name. Creation is a single
//! insert-if-absent statement followed by a re-lookup, so two repair runs
//! racing on the same database still end up sharing one container.

use crate::error::{RepairError, Result};
use crate::locale::Localizer;
use rusqlite::{params, Connection, OptionalExtension};

/// Well-known names the containers are looked up by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalvageNames {
    pub category: String,
    pub board: String,
    pub board_description: String,
}

impl SalvageNames {
    pub fn from_localizer(localizer: &dyn Localizer) -> Self {
        Self {
            category: localizer.text("salvaged_category_name"),
            board: localizer.text("salvaged_board_name"),
            board_description: localizer.text("salvaged_board_description"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SalvageContainer {
    pub category_id: i64,
    pub board_id: i64,
}

/// Salvage ids resolved during one driver invocation
#[derive(Debug)]
pub struct SalvageContext {
    names: SalvageNames,
    category_id: Option<i64>,
    board_id: Option<i64>,
    statements: u64,
}

impl SalvageContext {
    pub fn new(names: SalvageNames) -> Self {
        Self {
            names,
            category_id: None,
            board_id: None,
            statements: 0,
        }
    }

    pub fn from_localizer(localizer: &dyn Localizer) -> Self {
        Self::new(SalvageNames::from_localizer(localizer))
    }

    pub fn names(&self) -> &SalvageNames {
        &self.names
    }

    /// Statements issued while resolving containers
    pub fn statements(&self) -> u64 {
        self.statements
    }

    pub fn category(&mut self, conn: &Connection) -> Result<i64> {
        if let Some(id) = self.category_id {
            return Ok(id);
        }

        let id = match self.find_category(conn)? {
            Some(id) => id,
            None => {
                self.statements += 1;
                let inserted = conn
                    .execute(
                        "INSERT INTO categories (name, cat_order)
                         SELECT ?1, (SELECT COALESCE(MAX(cat_order), 0) + 1 FROM categories)
                         WHERE NOT EXISTS (SELECT 1 FROM categories WHERE name = ?1)",
                        params![self.names.category],
                    )
                    .map_err(|err| creation_failed("category", &self.names.category, err))?;
                let id = self.find_category(conn)?.ok_or_else(|| {
                    RepairError::SalvageCreation {
                        kind: "category",
                        name: self.names.category.clone(),
                        reason: "not found after insert".to_string(),
                    }
                })?;
                if inserted > 0 {
                    tracing::warn!(id_cat = id, name = %self.names.category, "created salvage category");
                }
                id
            }
        };

        self.category_id = Some(id);
        Ok(id)
    }

    pub fn board(&mut self, conn: &Connection) -> Result<i64> {
        if let Some(id) = self.board_id {
            return Ok(id);
        }

        let id = match self.find_board(conn)? {
            Some(id) => id,
            None => {
                let id_cat = self.category(conn)?;
                self.statements += 1;
                let inserted = conn
                    .execute(
                        "INSERT INTO boards (id_cat, id_parent, child_level, board_order, name, description)
                         SELECT ?1, 0, 0, (SELECT COALESCE(MAX(board_order), 0) + 1 FROM boards), ?2, ?3
                         WHERE NOT EXISTS (SELECT 1 FROM boards WHERE name = ?2)",
                        params![id_cat, self.names.board, self.names.board_description],
                    )
                    .map_err(|err| creation_failed("board", &self.names.board, err))?;
                let id = self.find_board(conn)?.ok_or_else(|| RepairError::SalvageCreation {
                    kind: "board",
                    name: self.names.board.clone(),
                    reason: "not found after insert".to_string(),
                })?;
                if inserted > 0 {
                    tracing::warn!(id_board = id, id_cat, name = %self.names.board, "created salvage board");
                }
                id
            }
        };

        self.board_id = Some(id);
        Ok(id)
    }

    pub fn container(&mut self, conn: &Connection) -> Result<SalvageContainer> {
        let category_id = self.category(conn)?;
        let board_id = self.board(conn)?;
        Ok(SalvageContainer {
            category_id,
            board_id,
        })
    }

    fn find_category(&mut self, conn: &Connection) -> Result<Option<i64>> {
        self.statements += 1;
        Ok(conn
            .query_row(
                "SELECT id_cat FROM categories WHERE name = ?1 ORDER BY id_cat LIMIT 1",
                params![self.names.category],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn find_board(&mut self, conn: &Connection) -> Result<Option<i64>> {
        self.statements += 1;
        Ok(conn
            .query_row(
                "SELECT id_board FROM boards WHERE name = ?1 ORDER BY id_board LIMIT 1",
                params![self.names.board],
                |row| row.get(0),
            )
            .optional()?)
    }
}

fn creation_failed(kind: &'static str, name: &str, err: rusqlite::Error) -> RepairError {
    RepairError::SalvageCreation {
        kind,
        name: name.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locale::MessageCatalog;
    use crate::schema;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::install(&conn).unwrap();
        conn
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_creates_once_and_memoizes() {
        let conn = conn();
        let mut salvage = SalvageContext::from_localizer(&MessageCatalog::english());

        let first = salvage.container(&conn).unwrap();
        let statements = salvage.statements();
        let second = salvage.container(&conn).unwrap();

        assert_eq!(first, second);
        assert_eq!(salvage.statements(), statements);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM categories"), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM boards"), 1);

        let id_cat: i64 = conn
            .query_row(
                "SELECT id_cat FROM boards WHERE id_board = ?1",
                [first.board_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(id_cat, first.category_id);
    }

    #[test]
    fn test_fresh_context_reuses_existing_containers() {
        let conn = conn();
        let catalog = MessageCatalog::english();
        let first = SalvageContext::from_localizer(&catalog).container(&conn).unwrap();

        for _ in 0..3 {
            let again = SalvageContext::from_localizer(&catalog).container(&conn).unwrap();
            assert_eq!(again, first);
        }
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM categories"), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM boards"), 1);
    }

    #[test]
    fn test_board_only_lookup_does_not_create_category() {
        let conn = conn();
        conn.execute_batch(
            "INSERT INTO boards (id_board, id_cat, name) VALUES (7, 3, 'Salvaged Topics');",
        )
        .unwrap();

        let mut salvage = SalvageContext::from_localizer(&MessageCatalog::english());
        assert_eq!(salvage.board(&conn).unwrap(), 7);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM categories"), 0);
    }

    #[test]
    fn test_creation_failure_is_typed() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE categories (id_cat INTEGER PRIMARY KEY, name TEXT);")
            .unwrap();

        let mut salvage = SalvageContext::from_localizer(&MessageCatalog::english());
        let err = salvage.category(&conn).unwrap_err();
        assert!(matches!(err, RepairError::SalvageCreation { kind: "category", .. }));
    }
}
