//! Strongly-typed identifiers.
//!
//! Tool and group ids are numeric (assigned by the definition store);
//! invocation record ids are UUID v4 strings generated locally.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a UUID-backed string ID newtype wrapper.
///
/// Generates: struct, `new()`, `from_string()`, `as_str()`, Default, Display.
macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
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

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

/// Macro to define a numeric ID newtype wrapper.
///
/// Generates: struct, `new()`, `get()`, `From<u64>`, Display. Serializes as a
/// bare number.
macro_rules! define_numeric_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(InvocationId);
define_numeric_id!(ToolId);
define_numeric_id!(GroupId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_ids_are_unique() {
        assert_ne!(InvocationId::new(), InvocationId::new());
        assert!(InvocationId::from_string(String::new()).is_err());
    }

    #[test]
    fn test_numeric_id_serializes_transparently() {
        let id = GroupId::new(7);
        assert_eq!(serde_json::to_string(&id).unwrap(), "7");
        let back: GroupId = serde_json::from_str("7").unwrap();
        assert_eq!(back, id);
        assert_eq!(back.to_string(), "7");
    }
}
