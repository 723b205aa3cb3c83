//! Dot-segmented event name matching.
//!
//! A pattern is compared segment by segment against an event name; `*` stands for exactly one
//! segment. The bare pattern `"*"` is the only depth-agnostic form and matches every event.

/// The single-segment wildcard.
pub const WILDCARD: &str = "*";

const SEPARATOR: char = '.';

/// Returns `true` if `event` is selected by `pattern`.
///
/// # Examples
/// ```rust
/// use courier_event_bus::matches;
///
/// assert!(matches("user.*", "user.created"));
/// assert!(matches("*", "user.profile.updated"));
/// assert!(!matches("user.*", "user.profile.updated"));
/// assert!(!matches("user.created", "user.deleted"));
/// ```
#[must_use]
pub fn matches(pattern: &str, event: &str) -> bool {
    if pattern == WILDCARD {
        return true;
    }

    let mut expected = pattern.split(SEPARATOR);
    let mut actual = event.split(SEPARATOR);

    loop {
        match (expected.next(), actual.next()) {
            (Some(p), Some(e)) => {
                if p != WILDCARD && p != e {
                    return false;
                }
            },
            (None, None) => return true,
            _ => return false,
        }
    }
}
