use regex::Regex;
use std::sync::LazyLock;

// Word characters are letters, non-spacing marks, decimal digits and connector
// punctuation. Spacing marks, letter-like numerals and other numbers are not.
static ROOM_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\p{L}\p{Mn}\p{Nd}\p{Pc}-]+$").expect("room name pattern is valid")
});

/// Whether `name` can identify a room: one or more word characters or `-`
pub fn is_valid_room_name(name: &str) -> bool {
    ROOM_NAME.is_match(name)
}
