//! Voice session lookup
//!
//! A client may only open a voice connection for a session the main gateway
//! issued beforehand. The session row ties (guild, user, gateway session,
//! token) to the channel the user is joining.

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::debug;

use crate::config::StaticSession;
use crate::Result;

/// Everything a client presents in Identify to prove its session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VoiceSessionKey {
    pub server_id: String,
    pub user_id: String,
    pub session_id: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSession {
    pub channel_id: String,
    pub user_id: String,
    pub session_id: String,
}

#[async_trait]
pub trait VoiceSessionStore: Send + Sync {
    /// The session matching every field of `key`, if any
    async fn find(&self, key: &VoiceSessionKey) -> Result<Option<VoiceSession>>;
}

/// Voice session repository backed by the `voice_states` table
#[derive(Clone)]
pub struct PgVoiceSessionStore {
    pool: PgPool,
}

impl PgVoiceSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_session(row: &PgRow) -> Result<VoiceSession> {
        Ok(VoiceSession {
            channel_id: row.try_get("channel_id")?,
            user_id: row.try_get("user_id")?,
            session_id: row.try_get("session_id")?,
        })
    }
}

#[async_trait]
impl VoiceSessionStore for PgVoiceSessionStore {
    async fn find(&self, key: &VoiceSessionKey) -> Result<Option<VoiceSession>> {
        let row = sqlx::query(
            "SELECT channel_id, user_id, session_id
             FROM voice_states
             WHERE guild_id = $1 AND user_id = $2 AND session_id = $3 AND token = $4
               AND channel_id IS NOT NULL
             LIMIT 1",
        )
        .bind(&key.server_id)
        .bind(&key.user_id)
        .bind(&key.session_id)
        .bind(&key.token)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_session(&row)?)),
            None => Ok(None),
        }
    }
}

/// In-memory sessions for deployments without a database
#[derive(Default)]
pub struct StaticVoiceSessionStore {
    sessions: DashMap<VoiceSessionKey, VoiceSession>,
}

impl StaticVoiceSessionStore {
    pub fn new(seed: &[StaticSession]) -> Self {
        let store = Self::default();
        for session in seed {
            store.insert(
                VoiceSessionKey {
                    server_id: session.server_id.clone(),
                    user_id: session.user_id.clone(),
                    session_id: session.session_id.clone(),
                    token: session.token.clone(),
                },
                session.channel_id.clone(),
            );
        }
        store
    }

    pub fn insert(&self, key: VoiceSessionKey, channel_id: String) {
        debug!(user_id = %key.user_id, channel_id = %channel_id, "Registered static voice session");
        let session = VoiceSession {
            channel_id,
            user_id: key.user_id.clone(),
            session_id: key.session_id.clone(),
        };
        self.sessions.insert(key, session);
    }

    pub fn remove(&self, key: &VoiceSessionKey) -> bool {
        self.sessions.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl VoiceSessionStore for StaticVoiceSessionStore {
    async fn find(&self, key: &VoiceSessionKey) -> Result<Option<VoiceSession>> {
        Ok(self.sessions.get(key).map(|entry| entry.value().clone()))
    }
}
