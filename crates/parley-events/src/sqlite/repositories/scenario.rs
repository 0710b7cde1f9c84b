//! Scenario registry. The full definition is stored as JSON.

use rusqlite::{Connection, OptionalExtension, params};

use parley_core::Scenario;

use crate::errors::Result;
use crate::sqlite::row_types::conversion_error;

/// Named scenario definitions.
pub struct ScenarioRepo;

impl ScenarioRepo {
    /// Insert or replace a scenario by id.
    pub fn upsert(conn: &Connection, scenario: &Scenario, now: &str) -> Result<()> {
        let definition = serde_json::to_string(scenario)?;
        let _ = conn.execute(
            "INSERT INTO scenarios (id, name, definition, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               definition = excluded.definition,
               updated_at = excluded.updated_at",
            params![scenario.id, scenario.name, definition, now],
        )?;
        Ok(())
    }

    /// Fetch one scenario.
    pub fn get(conn: &Connection, id: &str) -> Result<Option<Scenario>> {
        let row = conn
            .query_row(
                "SELECT definition FROM scenarios WHERE id = ?1",
                params![id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// All scenarios ordered by id.
    pub fn list(conn: &Connection) -> Result<Vec<Scenario>> {
        let mut stmt = conn.prepare("SELECT definition FROM scenarios ORDER BY id")?;
        let rows = stmt
            .query_map([], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete a scenario. Returns whether it existed.
    pub fn delete(conn: &Connection, id: &str) -> Result<bool> {
        let changed = conn.execute("DELETE FROM scenarios WHERE id = ?1", params![id])?;
        Ok(changed == 1)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Scenario> {
        let definition: String = row.get(0)?;
        serde_json::from_str(&definition).map_err(|e| conversion_error(0, e))
    }
}
