use super::*;

#[test]
fn accepts_root() {
    assert!(validate("/").is_ok());
}

#[test]
fn accepts_segments() {
    assert!(validate("/org/freedesktop/DBus").is_ok());
    assert!(validate("/a_b/c9").is_ok());
}

#[test]
fn rejects_missing_leading_slash() {
    assert!(validate("org/freedesktop/DBus").is_err());
}

#[test]
fn rejects_trailing_slash() {
    assert!(validate("/org/freedesktop/").is_err());
}

#[test]
fn rejects_empty_segment() {
    assert!(validate("/org//DBus").is_err());
}

#[test]
fn rejects_invalid_character() {
    assert!(validate("/org.freedesktop").is_err());
}
