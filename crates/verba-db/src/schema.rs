//! SQL schema definitions.

/// Complete schema for Verba v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Users & Sessions
-- ============================================================

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    role TEXT NOT NULL DEFAULT 'user',
    referral_code TEXT UNIQUE,
    referred_by TEXT,
    trial_expires_at INTEGER,
    onboarding_completed INTEGER NOT NULL DEFAULT 0,
    email_verified INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_referral_code ON users(referral_code);

-- Session issuance itself is an external collaborator; this table is
-- the seam the server resolves a principal from.
CREATE TABLE IF NOT EXISTS sessions (
    token TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    created_at INTEGER NOT NULL
);

-- ============================================================
-- Courses & Chapters
-- ============================================================

CREATE TABLE IF NOT EXISTS courses (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'draft',
    price_monthly INTEGER,
    currency TEXT,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS chapters (
    id INTEGER PRIMARY KEY,
    course_id INTEGER NOT NULL REFERENCES courses(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    position INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chapters_course ON chapters(course_id, position);

-- ============================================================
-- Entitlement grants
-- ============================================================

-- At most one row per (user, course); historical state is carried in
-- status/end_date, not in extra rows.
CREATE TABLE IF NOT EXISTS course_access (
    id INTEGER PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    course_id INTEGER NOT NULL REFERENCES courses(id),
    start_date INTEGER NOT NULL,
    end_date INTEGER,
    chapter_limit INTEGER,
    status TEXT NOT NULL DEFAULT 'active',
    external_subscription_id TEXT,
    external_customer_id TEXT,
    granted_at INTEGER NOT NULL,
    UNIQUE(user_id, course_id)
);

CREATE INDEX IF NOT EXISTS idx_access_external ON course_access(external_subscription_id);

-- ============================================================
-- Subscription ledger
-- ============================================================

CREATE TABLE IF NOT EXISTS subscription_plans (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    num_courses INTEGER NOT NULL,
    price_monthly INTEGER NOT NULL,
    currency TEXT NOT NULL DEFAULT 'EUR',
    external_price_id TEXT,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS subscriptions (
    id INTEGER PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    plan_id INTEGER NOT NULL REFERENCES subscription_plans(id),
    start_date INTEGER NOT NULL,
    end_date INTEGER,
    status TEXT NOT NULL DEFAULT 'none',
    external_subscription_id TEXT,
    -- Dedupe key for at-least-once renewal deliveries.
    last_invoice_id TEXT,
    slots_total INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id, plan_id);
CREATE INDEX IF NOT EXISTS idx_subscriptions_external ON subscriptions(external_subscription_id);

CREATE TABLE IF NOT EXISTS subscription_courses (
    subscription_id INTEGER NOT NULL REFERENCES subscriptions(id) ON DELETE CASCADE,
    course_id INTEGER NOT NULL REFERENCES courses(id),
    PRIMARY KEY (subscription_id, course_id)
);

-- ============================================================
-- Referral ledger & rewards
-- ============================================================

-- Append-only. The unique constraint is the idempotency guard: at most
-- one row per (invited user, event kind).
CREATE TABLE IF NOT EXISTS referral_events (
    id INTEGER PRIMARY KEY,
    referrer_user_id TEXT NOT NULL,
    invited_user_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE(invited_user_id, event_type)
);

CREATE INDEX IF NOT EXISTS idx_referral_events_referrer ON referral_events(referrer_user_id, event_type);

CREATE TABLE IF NOT EXISTS reward_tiers (
    id INTEGER PRIMARY KEY,
    required_invites INTEGER NOT NULL UNIQUE,
    reward_type TEXT NOT NULL,
    reward_value INTEGER NOT NULL,
    chapter_limit INTEGER,
    is_active INTEGER NOT NULL DEFAULT 1,
    display_order INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS rewards (
    id INTEGER PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    tier_id INTEGER NOT NULL REFERENCES reward_tiers(id),
    reward_type TEXT NOT NULL,
    reward_value INTEGER NOT NULL,
    chapter_limit INTEGER,
    status TEXT NOT NULL DEFAULT 'pending',
    invites_at_grant INTEGER NOT NULL,
    course_id INTEGER REFERENCES courses(id),
    created_at INTEGER NOT NULL,
    claimed_at INTEGER,
    UNIQUE(user_id, tier_id)
);

-- Append-only; the balance is the balance_after of the newest row.
CREATE TABLE IF NOT EXISTS credit_ledger (
    id INTEGER PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    entry_type TEXT NOT NULL,
    amount INTEGER NOT NULL,
    balance_after INTEGER NOT NULL,
    description TEXT NOT NULL,
    reference_id INTEGER,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_credit_user ON credit_ledger(user_id, id);

-- ============================================================
-- Settings
-- ============================================================

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
