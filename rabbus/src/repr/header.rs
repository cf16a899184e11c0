use serde::de::{Error, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// An ordered collection of message headers (or declaration/binding
/// arguments), keyed by name.
pub type Headers = BTreeMap<String, Header>;

/// Represents a value assigned to a message header, or to a declaration or
/// binding argument.
///
/// ## Integer size
///
/// When matching headers for the purposes of routing messages on a
/// [headers exchange](crate::ExchangeKind::Headers), the broker supports
/// integer values **only up to 32-bit size**; wider integers are silently
/// ignored during routing. Thus, `i32` and `u32` underlie the integer variants.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Header {
    /// Boolean value.
    Boolean(bool),
    /// Signed integer value.
    Int(i32),
    /// Unsigned integer value.
    UInt(u32),
    /// String value.
    String(String),
}

impl Header {
    /// Reports whether this [`Header`] may be considered empty (which
    /// means an empty string). Numerical zero values are **not** empty, and
    /// neither is `false`.
    pub fn is_empty(&self) -> bool {
        match self {
            Header::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Exposes the string value of this header, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Header::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Display for Header {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Header::Boolean(b) => Display::fmt(b, f),
            Header::Int(i) => Display::fmt(i, f),
            Header::UInt(u) => Display::fmt(u, f),
            Header::String(s) => f.write_str(s),
        }
    }
}

const _: () = {
    impl From<bool> for Header {
        fn from(value: bool) -> Self {
            Header::Boolean(value)
        }
    }

    impl From<i32> for Header {
        fn from(value: i32) -> Self {
            Header::Int(value)
        }
    }

    impl From<u32> for Header {
        fn from(value: u32) -> Self {
            Header::UInt(value)
        }
    }

    impl From<&str> for Header {
        fn from(value: &str) -> Self {
            Header::String(value.to_string())
        }
    }

    impl From<String> for Header {
        fn from(value: String) -> Self {
            Header::String(value)
        }
    }
};

impl<'de> Deserialize<'de> for Header {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(HeaderVisitor)
    }
}

struct HeaderVisitor;

impl<'de> Visitor<'de> for HeaderVisitor {
    type Value = Header;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a header value: a boolean, a 32-bit integer, or a string")
    }

    fn visit_bool<E>(self, value: bool) -> Result<Self::Value, E>
    where
        E: Error,
    {
        Ok(Header::Boolean(value))
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
    where
        E: Error,
    {
        Ok(Header::Int(value.try_into().map_err(E::custom)?))
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: Error,
    {
        Ok(Header::UInt(value.try_into().map_err(E::custom)?))
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: Error,
    {
        Ok(Header::String(value.to_string()))
    }

    fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
    where
        E: Error,
    {
        Ok(Header::String(value))
    }
}
