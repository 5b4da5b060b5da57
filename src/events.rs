//! The fixed set of server-push event identifiers.
//!
//! The wire-tag table ([`crate::value::Type`]) and this event table are
//! both logically immutable after construction; a per-process constant
//! table is the simplest correct design; there's no need to build either
//! per connection.

/// Every identifier string the relay may push unsolicited.
pub const EVENT_NAMES: &[&str] = &[
    "_buffer_opened",
    "_buffer_type_changed",
    "_buffer_moved",
    "_buffer_merged",
    "_buffer_unmerged",
    "_buffer_hidden",
    "_buffer_unhidden",
    "_buffer_renamed",
    "_buffer_title_changed",
    "_buffer_localvar_added",
    "_buffer_localvar_changed",
    "_buffer_localvar_removed",
    "_buffer_closing",
    "_buffer_cleared",
    "_buffer_line_added",
    "_nicklist",
    "_nicklist_diff",
    "_pong",
    "_upgrade",
    "_upgrade_ended",
];

/// The mandatory handler: every other identifier is optional and has no
/// built-in handler.
pub const PONG: &str = "_pong";

/// Look the candidate identifier up in the fixed event table, returning
/// the table's own `'static` copy of the name on a match.
pub fn lookup(candidate: &str) -> Option<&'static str> {
    EVENT_NAMES.iter().copied().find(|&name| name == candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known() {
        assert_eq!(lookup("_pong"), Some("_pong"));
        assert_eq!(lookup("_buffer_line_added"), Some("_buffer_line_added"));
    }

    #[test]
    fn test_lookup_unknown_is_correlation_candidate() {
        assert_eq!(lookup("1a2b3c4d"), None);
    }
}
