//! Table definitions.
//!
//! Types are chosen so the same statements run on PostgreSQL and SQLite:
//! integers are `BIGINT`, amounts `DOUBLE PRECISION`, lists and maps are JSON
//! text, and timestamps are unix seconds.

/// Statements executed in order by [`crate::SqlStore::ensure_schema`].
pub const CREATE_TABLES: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS channels (
        id BIGINT PRIMARY KEY,
        type BIGINT NOT NULL DEFAULT 1,
        name TEXT NOT NULL DEFAULT '',
        api_key TEXT NOT NULL,
        base_url TEXT NOT NULL DEFAULT '',
        models TEXT NOT NULL DEFAULT '[]',
        model_mapping TEXT NOT NULL DEFAULT '{}',
        priority BIGINT NOT NULL DEFAULT 0,
        status BIGINT NOT NULL DEFAULT 1,
        last_test_error_at BIGINT
    )",
    r"CREATE TABLE IF NOT EXISTS tenant_groups (
        id TEXT PRIMARY KEY,
        status BIGINT NOT NULL DEFAULT 1,
        used_amount DOUBLE PRECISION NOT NULL DEFAULT 0,
        rpm_ratio DOUBLE PRECISION NOT NULL DEFAULT 1,
        rpm TEXT NOT NULL DEFAULT '{}',
        qpm BIGINT NOT NULL DEFAULT 0,
        models TEXT NOT NULL DEFAULT '[]'
    )",
    r"CREATE TABLE IF NOT EXISTS tokens (
        id BIGINT PRIMARY KEY,
        token_key TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL DEFAULT '',
        group_id TEXT NOT NULL,
        models TEXT NOT NULL DEFAULT '[]',
        quota DOUBLE PRECISION NOT NULL DEFAULT 0,
        used_amount DOUBLE PRECISION NOT NULL DEFAULT 0,
        expired_at BIGINT,
        subnet TEXT,
        status BIGINT NOT NULL DEFAULT 1
    )",
    r"CREATE INDEX IF NOT EXISTS idx_tokens_group_id ON tokens (group_id)",
];
