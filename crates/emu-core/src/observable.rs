//! Read-only inspection of component state by dotted path.

use std::fmt;

/// A value returned by [`Observable::query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::U8(v) => write!(f, "${v:02X}"),
            Self::U16(v) => write!(f, "${v:04X}"),
            Self::U32(v) => write!(f, "${v:06X}"),
            Self::U64(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Self::$variant(v)
            }
        })*
    };
}

impl_from!(bool => Bool, u8 => U8, u16 => U16, u32 => U32, u64 => U64);

/// A component whose state can be read without side effects.
pub trait Observable {
    /// Looks up a dotted path such as `agnus.v`. Unknown paths give `None`.
    fn query(&self, path: &str) -> Option<Value>;

    /// Every path `query` understands.
    fn query_paths(&self) -> &'static [&'static str];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_print_as_hex() {
        assert_eq!(Value::from(0x2C81u16).to_string(), "$2C81");
        assert_eq!(Value::from(0x7u8).to_string(), "$07");
        assert_eq!(Value::from(0x1000u32).to_string(), "$001000");
        assert_eq!(Value::from(12u64).to_string(), "12");
        assert_eq!(Value::from(true).to_string(), "true");
    }
}
