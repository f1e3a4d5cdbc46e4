//! Branded ID newtypes.
//!
//! Traces, events, breakpoints and breakpoint hits each get a distinct ID
//! type wrapping a `String`, so a hit ID can never be passed where a trace ID
//! is expected.
//!
//! All IDs are UUID v7 (time-ordered) generated via [`uuid::Uuid::now_v7`].

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
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
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id!(
    /// Identifier for one end-to-end trace session.
    TraceId
);

branded_id!(
    /// Identifier for a single event within a trace.
    EventId
);

branded_id!(
    /// Identifier for a breakpoint definition.
    BreakpointId
);

branded_id!(
    /// Identifier for one recorded breakpoint hit.
    HitId
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn new_ids_are_unique() {
        let ids: HashSet<TraceId> = (0..100).map(|_| TraceId::new()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn v7_ids_sort_by_creation() {
        let a = EventId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = EventId::new();
        assert!(a < b);
    }

    #[test]
    fn serde_is_transparent() {
        let id = BreakpointId::from("bp-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"bp-1\"");
        let back: BreakpointId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn display_and_deref() {
        let id = HitId::from_string("hit".to_string());
        assert_eq!(id.to_string(), "hit");
        assert_eq!(id.len(), 3);
        assert_eq!(id.as_str(), "hit");
        assert_eq!(String::from(id), "hit");
    }
}
