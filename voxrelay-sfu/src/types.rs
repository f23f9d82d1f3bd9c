//! Common identifier types used throughout the coordinator

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Communication channel identifier
    ChannelId
);

string_id!(
    /// Peer identifier (the user id the peer identified with)
    PeerId
);

string_id!(
    /// Engine-assigned producer identity, used to correlate consumers
    ProducerId
);

string_id!(
    /// Engine-assigned consumer identity
    ConsumerId
);

string_id!(
    /// Engine-assigned transport identity
    TransportId
);

/// Generate a fresh 12-character engine handle id
#[must_use]
pub fn generate_handle_id() -> String {
    nanoid::nanoid!(12)
}
