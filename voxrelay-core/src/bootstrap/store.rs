//! Voice session store selection

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use super::init_database;
use crate::repository::{PgVoiceSessionStore, StaticVoiceSessionStore, VoiceSessionStore};
use crate::Config;

/// Postgres-backed store when `database.url` is set, otherwise the static
/// sessions from `voice.static_sessions`
pub async fn build_session_store(config: &Config) -> Result<Arc<dyn VoiceSessionStore>> {
    if config.has_database() {
        let pool = init_database(config).await?;
        info!("Voice sessions are looked up in voice_states");
        return Ok(Arc::new(PgVoiceSessionStore::new(pool)));
    }

    let store = StaticVoiceSessionStore::new(&config.voice.static_sessions);
    if store.is_empty() {
        warn!("No database and no static voice sessions configured; every Identify will fail");
    } else {
        info!(sessions = store.len(), "Using static voice sessions");
    }
    Ok(Arc::new(store))
}
