pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS channels (
        id INTEGER PRIMARY KEY,
        guild_id INTEGER NOT NULL,
        name TEXT,
        type TEXT NOT NULL DEFAULT 'GUILD_TEXT',
        parent_id INTEGER,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        last_synced_at DATETIME
    );
    CREATE INDEX IF NOT EXISTS idx_channels_guild ON channels (guild_id, is_active);

    -- Per-channel indexing checkpoint
    CREATE TABLE IF NOT EXISTS channel_state (
        channel_id INTEGER PRIMARY KEY,
        last_message_id INTEGER,
        last_message_created_at DATETIME,
        last_indexed_at DATETIME,
        backfill_before_id INTEGER,
        backfill_oldest_at DATETIME
    );

    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        username TEXT,
        is_bot BOOLEAN NOT NULL DEFAULT FALSE
    );

    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY,
        channel_id INTEGER NOT NULL,
        guild_id INTEGER,
        author_id INTEGER NOT NULL,
        created_at DATETIME NOT NULL,
        content TEXT NOT NULL DEFAULT '',
        link TEXT NOT NULL DEFAULT '',
        reactions_total INTEGER NOT NULL DEFAULT 0,
        attachments_count INTEGER NOT NULL DEFAULT 0,
        reply_to_id INTEGER,
        has_link BOOLEAN NOT NULL DEFAULT FALSE,
        link_domains TEXT NOT NULL DEFAULT '[]',
        word_count INTEGER NOT NULL DEFAULT 0,
        has_code_block BOOLEAN NOT NULL DEFAULT FALSE,
        is_question BOOLEAN NOT NULL DEFAULT FALSE
    );
    CREATE INDEX IF NOT EXISTS idx_messages_channel_date ON messages (channel_id, created_at);
    CREATE INDEX IF NOT EXISTS idx_messages_date ON messages (created_at);

    -- Child collections are replaced wholesale on every message upsert
    CREATE TABLE IF NOT EXISTS message_attachments (
        id INTEGER NOT NULL,
        message_id INTEGER NOT NULL,
        url TEXT NOT NULL,
        filename TEXT,
        content_type TEXT,
        size INTEGER,
        PRIMARY KEY (message_id, id)
    );

    CREATE TABLE IF NOT EXISTS message_reactions (
        message_id INTEGER NOT NULL,
        emoji_id INTEGER,
        emoji_name TEXT,
        count INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_reactions_message ON message_reactions (message_id);

    CREATE TABLE IF NOT EXISTS message_mentions (
        message_id INTEGER NOT NULL,
        kind TEXT NOT NULL,
        target_id INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_mentions_message ON message_mentions (message_id);
";
