pub mod voice_state;

pub use voice_state::{
    PgVoiceSessionStore, StaticVoiceSessionStore, VoiceSession, VoiceSessionKey, VoiceSessionStore,
};
