//! v001 -- Initial schema creation.
//!
//! Creates `session` (at most one row) and the `settings` key/value table.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Session (single row, id = 1)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS session (
    id            INTEGER PRIMARY KEY CHECK (id = 1),
    user_id       INTEGER NOT NULL,
    email         TEXT NOT NULL,
    token         TEXT NOT NULL,
    active_car_id INTEGER,                    -- nullable
    saved_at      TEXT NOT NULL               -- RFC-3339
);

-- ----------------------------------------------------------------
-- Device settings
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS settings (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL                       -- JSON
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
