//! Identifier types shared by the policy and aggregate crates
//!
//! All identifiers are opaque strings supplied by the storage layer. They are
//! wrapped in newtypes so a scope can never be passed where an identity is
//! expected.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

macro_rules! string_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from anything string-like
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw value
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_identifier!(
    /// Organizational unit (a clinic) that owns records and bounds staff access
    ScopeId
);

string_identifier!(
    /// Account identity of an individual actor
    IdentityId
);

string_identifier!(
    /// Primary key of a stored record
    RecordKey
);

string_identifier!(
    /// Resource type tag, e.g. `clinics` or `reviews`
    ResourceType
);

string_identifier!(
    /// Resource-type-specific status value such as `approved` or `draft`
    ///
    /// Never interpreted by name; only compared against configured sets.
    LifecycleState
);

string_identifier!(
    /// Name of a field on a stored record
    FieldName
);
