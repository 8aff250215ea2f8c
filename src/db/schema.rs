pub const SCHEMA: &str = r#"
-- Photos table: one row per uploaded image and its conversion/display state
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL UNIQUE,
    original_path TEXT NOT NULL,
    display_path TEXT,              -- set once the 1-bit bitmap exists
    uploaded_at TEXT NOT NULL,      -- RFC 3339, UTC, microseconds
    converted INTEGER NOT NULL DEFAULT 0,
    last_displayed TEXT,            -- NULL until first display
    display_count INTEGER NOT NULL DEFAULT 0
);

-- Conversion pass: oldest unconverted first
CREATE INDEX IF NOT EXISTS idx_photos_converted_uploaded ON photos(converted, uploaded_at);

-- Display selection: least shown, then least recently shown
CREATE INDEX IF NOT EXISTS idx_photos_rotation ON photos(converted, display_count, last_displayed);
"#;

/// Statements applied after `SCHEMA` on every start. Each one must be safe
/// to fail when it has already been applied.
pub const MIGRATIONS: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_photos_uploaded_at ON photos(uploaded_at)",
    // Two photos must never share a bitmap
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_photos_display_path ON photos(display_path)",
];
