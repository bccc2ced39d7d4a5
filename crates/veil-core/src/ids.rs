use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A prefixed string id backed by UUIDv7, so ids sort roughly by creation
/// time and the prefix says what kind of thing they name.
macro_rules! prefixed_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::now_v7()))
            }

            /// Wrap an id that already exists (persisted data, user input).
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }
    };
}

prefixed_id!(SessionId, "sess");
prefixed_id!(ExchangeId, "exch");

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_carry_their_prefix() {
        assert!(SessionId::new().as_str().starts_with("sess_"));
        assert!(ExchangeId::new().as_str().starts_with("exch_"));
    }

    #[test]
    fn fresh_ids_never_collide() {
        let ids: HashSet<String> = (0..64).map(|_| SessionId::new().to_string()).collect();
        assert_eq!(ids.len(), 64);
    }

    #[test]
    fn display_parse_and_serde_all_see_the_raw_string() {
        let id = SessionId::from_raw("sess_fixed");
        assert_eq!(id.to_string(), "sess_fixed");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""sess_fixed""#);
        assert_eq!(serde_json::from_str::<SessionId>(r#""sess_fixed""#).unwrap(), id);
        assert_eq!("sess_fixed".parse::<SessionId>().unwrap(), id);
    }
}
