//! Database schema definitions.

/// SQL schema for the layout database.
pub const SCHEMA_SQL: &str = r#"
-- Classified stream layout per service
CREATE TABLE IF NOT EXISTS service_layouts (
    service_key INTEGER PRIMARY KEY,     -- CRC-32 of the channel ID
    layout_json TEXT NOT NULL,           -- Serialized stream descriptors
    updated_at INTEGER NOT NULL          -- Unix timestamp of the last write
);
"#;
