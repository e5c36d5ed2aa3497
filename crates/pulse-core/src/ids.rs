//! Identifier newtypes.
//!
//! Connections, wire messages and subscriptions each carry their own string
//! id type, so a signature can never mix them up. Values are UUID v7:
//! unique for the life of a connection and ordered by creation time, which
//! keeps log output and id-keyed iteration roughly chronological.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh time-ordered id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// The id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

id_type! {
    /// Identifies a logical connection across its reconnect cycles.
    ConnectionId
}

id_type! {
    /// Identifies one wire message; responses correlate back through it.
    MessageId
}

id_type! {
    /// Identifies a subscription registration.
    SubscriptionId
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
