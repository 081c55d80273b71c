//! Value objects carried inside frames.

use std::fmt;

// ============================================================================
// Nickname
// ============================================================================

/// Display name chosen by a client at registration.
///
/// Unique among currently registered sessions; the registry keys on it.
/// No escaping is applied, so a nickname containing `|` will split into
/// extra fields on the receiving side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Nickname(String);

impl Nickname {
    /// Creates a nickname from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the nickname as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nickname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Nickname {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for Nickname {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// ColorCode
// ============================================================================

/// Client-supplied display color identifier.
///
/// The value is opaque to the relay and echoed back verbatim in chat
/// frames. Clients use console color indices, so the fallback is the
/// index of white.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorCode(i32);

impl ColorCode {
    /// Console color index for white (0-15 palette).
    pub const WHITE: ColorCode = ColorCode(15);

    /// Creates a color code from a raw integer.
    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    /// Parses a decimal color code, falling back to [`ColorCode::WHITE`].
    ///
    /// Registration never fails because of a bad color.
    pub fn parse_or_default(raw: &str) -> Self {
        raw.trim().parse::<i32>().map(Self).unwrap_or(Self::WHITE)
    }

    /// Returns the raw integer value.
    pub const fn value(self) -> i32 {
        self.0
    }
}

impl Default for ColorCode {
    fn default() -> Self {
        Self::WHITE
    }
}

impl fmt::Display for ColorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nickname_display_and_eq() {
        let a = Nickname::new("alice");
        assert_eq!(a.to_string(), "alice");
        assert_eq!(a.as_str(), "alice");
        assert_eq!(a, Nickname::from("alice"));
        assert_ne!(a, Nickname::from("Alice"));
    }

    #[test]
    fn test_color_parse_valid() {
        assert_eq!(ColorCode::parse_or_default("1"), ColorCode::new(1));
        assert_eq!(ColorCode::parse_or_default("-3"), ColorCode::new(-3));
        assert_eq!(ColorCode::parse_or_default(" 12 "), ColorCode::new(12));
    }

    #[test]
    fn test_color_parse_falls_back_to_white() {
        assert_eq!(ColorCode::parse_or_default("notanumber"), ColorCode::WHITE);
        assert_eq!(ColorCode::parse_or_default("1.5"), ColorCode::WHITE);
        assert_eq!(ColorCode::parse_or_default("99999999999"), ColorCode::WHITE);
        assert_eq!(ColorCode::WHITE.value(), 15);
    }

    #[test]
    fn test_color_default_is_white() {
        assert_eq!(ColorCode::default(), ColorCode::WHITE);
        assert_eq!(ColorCode::WHITE.to_string(), "15");
    }
}
