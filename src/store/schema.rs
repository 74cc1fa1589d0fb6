pub const SCHEMA: &str = r#"
-- Assets carry ownership, authorization attributes and a pointer to the
-- payload of their latest version
CREATE TABLE IF NOT EXISTS assets (
    id TEXT PRIMARY KEY,
    lineage_id TEXT,               -- groups forks/derivatives across deployments
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    format TEXT NOT NULL,
    tri_count INTEGER NOT NULL DEFAULT 0,

    -- Current version pointer (mirrors the highest asset_versions row)
    version INTEGER NOT NULL DEFAULT 1 CHECK (version >= 1),
    file_path TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    checksum TEXT NOT NULL,

    -- Authorization attributes
    owner_id TEXT NOT NULL,
    owner_institution TEXT NOT NULL,
    access_level TEXT NOT NULL DEFAULT 'private',
    authorized_users TEXT,         -- JSON array of user ids
    authorized_institutions TEXT,  -- JSON array of institution codes
    embargo_until TEXT,            -- NULL = no embargo

    use_case TEXT,
    license TEXT,
    attribution_required INTEGER NOT NULL DEFAULT 0,
    derived_from TEXT,             -- JSON array of parent asset URIs
    metadata TEXT,                 -- JSON object of extracted geometry facts

    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Immutable version history, removed only together with the asset
CREATE TABLE IF NOT EXISTS asset_versions (
    id TEXT PRIMARY KEY,
    asset_id TEXT NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
    version_number INTEGER NOT NULL CHECK (version_number >= 1),
    file_path TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    checksum TEXT NOT NULL,
    changes TEXT,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,

    UNIQUE(asset_id, version_number)
);

-- Tags are shared between assets; usage_count is denormalized
CREATE TABLE IF NOT EXISTS tags (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    category TEXT NOT NULL DEFAULT 'general',
    usage_count INTEGER NOT NULL DEFAULT 0 CHECK (usage_count >= 0),
    created_at TEXT NOT NULL
);

-- Many-to-many relationship between assets and tags
CREATE TABLE IF NOT EXISTS asset_tags (
    asset_id TEXT NOT NULL REFERENCES assets(id) ON DELETE CASCADE,
    tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    PRIMARY KEY (asset_id, tag_id)
);

-- Create indexes
CREATE INDEX IF NOT EXISTS idx_assets_owner ON assets(owner_id);
CREATE INDEX IF NOT EXISTS idx_assets_access_level ON assets(access_level);
CREATE INDEX IF NOT EXISTS idx_assets_owner_institution ON assets(owner_institution);
CREATE INDEX IF NOT EXISTS idx_assets_lineage ON assets(lineage_id);
CREATE INDEX IF NOT EXISTS idx_assets_created ON assets(created_at);
CREATE INDEX IF NOT EXISTS idx_asset_versions_asset ON asset_versions(asset_id);
CREATE INDEX IF NOT EXISTS idx_tags_category ON tags(category);
CREATE INDEX IF NOT EXISTS idx_asset_tags_tag ON asset_tags(tag_id);
"#;
