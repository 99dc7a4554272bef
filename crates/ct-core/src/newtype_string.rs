//! Macro for defining strongly-typed identifier newtypes.
//!
//! Database, table and cluster names all end up interpolated into DDL, so
//! they share one invariant: non-empty, no backtick, no control characters.
//! This macro generates the struct and its trait impls (Display, Deref,
//! AsRef, Borrow, TryFrom, PartialEq, Serialize, Deserialize) from a single
//! invocation.

/// Returns the reason an identifier is rejected, if any.
pub(crate) fn identifier_violation(s: &str) -> Option<&'static str> {
    if s.is_empty() {
        Some("must not be empty")
    } else if s.contains('`') {
        Some("must not contain a backtick")
    } else if s.chars().any(char::is_control) {
        Some("must not contain control characters")
    } else {
        None
    }
}

/// Define a strongly-typed identifier newtype.
///
/// Generates:
/// - The struct with `Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize`
/// - Custom `Deserialize` (rejects invalid identifiers)
/// - `new()` (panics on invalid input), `try_new()` (returns Option), `as_str()`, `into_inner()`
/// - `Display`, `AsRef<str>`, `Deref<Target=str>`, `Borrow<str>`
/// - `TryFrom<String>`, `TryFrom<&str>`
/// - `PartialEq<str>`, `PartialEq<&str>`, `PartialEq<String>`
macro_rules! define_identifier {
    (
        $(#[$meta:meta])*
        $vis:vis struct $Name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
        #[serde(transparent)]
        $vis struct $Name(String);

        impl<'de> serde::Deserialize<'de> for $Name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                match $crate::newtype_string::identifier_violation(&s) {
                    None => Ok(Self(s)),
                    Some(reason) => Err(serde::de::Error::custom(format!(
                        "{} {}: {:?}",
                        stringify!($Name),
                        reason,
                        s
                    ))),
                }
            }
        }

        impl $Name {
            /// Create a new instance, panicking if the identifier is invalid.
            ///
            /// Prefer [`try_new`](Self::try_new) when handling untrusted input.
            pub fn new(name: impl Into<String>) -> Self {
                let s = name.into();
                if let Some(reason) = $crate::newtype_string::identifier_violation(&s) {
                    panic!("{} {}: {:?}", stringify!($Name), reason, s);
                }
                Self(s)
            }

            /// Try to create a new instance, returning `None` if the identifier is invalid.
            pub fn try_new(name: impl Into<String>) -> Option<Self> {
                let s = name.into();
                match $crate::newtype_string::identifier_violation(&s) {
                    None => Some(Self(s)),
                    Some(_) => None,
                }
            }

            /// Return the underlying name as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the wrapper and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $Name {
            fn as_ref(&self) -> &str { &self.0 }
        }

        impl std::ops::Deref for $Name {
            type Target = str;
            fn deref(&self) -> &str { &self.0 }
        }

        impl std::borrow::Borrow<str> for $Name {
            fn borrow(&self) -> &str { &self.0 }
        }

        impl TryFrom<String> for $Name {
            type Error = &'static str;
            fn try_from(s: String) -> Result<Self, Self::Error> {
                match $crate::newtype_string::identifier_violation(&s) {
                    None => Ok(Self(s)),
                    Some(reason) => Err(reason),
                }
            }
        }

        impl TryFrom<&str> for $Name {
            type Error = &'static str;
            fn try_from(s: &str) -> Result<Self, Self::Error> {
                Self::try_from(s.to_string())
            }
        }

        impl PartialEq<str> for $Name {
            fn eq(&self, other: &str) -> bool { self.0 == other }
        }

        impl PartialEq<&str> for $Name {
            fn eq(&self, other: &&str) -> bool { self.0 == *other }
        }

        impl PartialEq<String> for $Name {
            fn eq(&self, other: &String) -> bool { self.0 == *other }
        }
    };
}

pub(crate) use define_identifier;
