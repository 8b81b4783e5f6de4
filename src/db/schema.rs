//! SQL DDL for initializing the CallControl store.
//! SQLite-first; statements are split on `;` by `Storage::init_schema`.

/// Tables mirror the dashboard's relational schema. Booleans are INTEGER 0/1,
/// timestamps RFC3339 text, list/object columns JSON text.
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS organizations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    organization_id TEXT NULL REFERENCES organizations(id),
    email TEXT NOT NULL UNIQUE,
    full_name TEXT NULL,
    role TEXT NOT NULL DEFAULT 'operator',
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_organization ON users(organization_id);

CREATE TABLE IF NOT EXISTS managers (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL REFERENCES organizations(id),
    name TEXT NOT NULL,
    email TEXT NULL,
    phone TEXT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS customers (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL REFERENCES organizations(id),
    name TEXT NULL,
    phone TEXT NULL,
    email TEXT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS calls (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL REFERENCES organizations(id),
    manager_id TEXT NULL,
    customer_id TEXT NULL,
    file_name TEXT NULL,
    audio_url TEXT NULL,
    transcription TEXT NULL,
    general_score REAL NULL,
    user_satisfaction_index REAL NULL,
    communication_score REAL NULL,
    sales_score REAL NULL,
    processing_status TEXT NOT NULL DEFAULT 'pending',
    processing_step TEXT NULL,
    source TEXT NOT NULL DEFAULT 'upload',
    duration_seconds INTEGER NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_calls_org_created ON calls(organization_id, created_at);

CREATE TABLE IF NOT EXISTS telegram_links (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    organization_id TEXT NULL,
    chat_id INTEGER NOT NULL UNIQUE,
    telegram_username TEXT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    linked_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_telegram_links_user ON telegram_links(user_id);

CREATE TABLE IF NOT EXISTS telegram_sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    organization_id TEXT NULL,
    session_code TEXT NOT NULL UNIQUE,
    expires_at TEXT NOT NULL,
    used INTEGER NOT NULL DEFAULT 0,
    used_at TEXT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS telegram_settings (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    user_id TEXT NULL,
    notify_new_calls INTEGER NOT NULL DEFAULT 1,
    notify_low_scores INTEGER NOT NULL DEFAULT 1,
    notify_processing INTEGER NOT NULL DEFAULT 0,
    low_score_threshold REAL NOT NULL DEFAULT 50,
    is_active INTEGER NOT NULL DEFAULT 1,
    UNIQUE(organization_id, user_id)
);

CREATE TABLE IF NOT EXISTS keyword_trackers (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    name TEXT NOT NULL,
    category TEXT NULL,
    keywords TEXT NOT NULL, -- JSON array
    mention_count INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS knowledge_articles (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'draft',
    version INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    organization_id TEXT NULL,
    type TEXT NOT NULL,
    title TEXT NOT NULL,
    message TEXT NOT NULL,
    data TEXT NULL, -- JSON object
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, is_read);

CREATE TABLE IF NOT EXISTS exports (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    user_id TEXT NULL,
    format TEXT NOT NULL,
    file_name TEXT NOT NULL,
    content TEXT NOT NULL,
    record_count INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS telfin_calls (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    call_uuid TEXT NOT NULL,
    direction TEXT NULL,
    from_number TEXT NULL,
    to_number TEXT NULL,
    started_at TEXT NULL,
    duration_seconds INTEGER NULL,
    record_uuid TEXT NULL,
    result TEXT NULL,
    raw TEXT NOT NULL, -- JSON object as returned by the provider
    synced_at TEXT NOT NULL,
    UNIQUE (organization_id, call_uuid)
);

CREATE TABLE IF NOT EXISTS telfin_connections (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL UNIQUE,
    auth_mode TEXT NOT NULL,
    client_id TEXT NULL,
    client_secret TEXT NULL,
    telfin_client_id TEXT NULL,
    login TEXT NULL,
    password TEXT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    last_sync_at TEXT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_logs (
    id TEXT PRIMARY KEY,
    organization_id TEXT NULL,
    user_id TEXT NULL,
    action TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT NULL,
    details TEXT NULL, -- JSON object
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_logs_org ON audit_logs(organization_id, created_at)
"#;
