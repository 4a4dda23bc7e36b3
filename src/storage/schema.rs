//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS points (
            id INTEGER PRIMARY KEY,
            measurement TEXT NOT NULL,
            device TEXT,
            tags_json TEXT NOT NULL,
            fields_json TEXT NOT NULL,
            ts INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_points_measurement_ts ON points(measurement, ts);
        CREATE INDEX IF NOT EXISTS idx_points_device ON points(device);

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);",
    )?;

    Ok(())
}
