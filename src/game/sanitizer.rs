//! History Sanitizer
//!
//! Produces a per-viewer copy of a [`GameHistory`] that does not leak the
//! opponent's tiles. Finished games and observers get the snapshot as is.

use std::borrow::Cow;

use crate::game::history::GameHistory;

/// Redact a history snapshot for `requester` (a player nickname).
///
/// Returns the input borrowed when nothing needs hiding, otherwise an owned,
/// redacted copy. The input is never mutated and the transform is idempotent.
pub fn sanitize_history<'a>(history: &'a GameHistory, requester: &str) -> Cow<'a, GameHistory> {
    if history.is_over() {
        return Cow::Borrowed(history);
    }
    let Some(seat) = history.seat_of(requester) else {
        // Observer.
        return Cow::Borrowed(history);
    };

    let mut cloned = history.clone();
    for event in cloned.turns.iter_mut().flat_map(|t| t.events.iter_mut()) {
        if event.nickname == requester {
            continue;
        }
        event.rack.clear();
        if !event.exchanged.is_empty() && !is_redacted_count(&event.exchanged) {
            event.exchanged = event.exchanged.chars().count().to_string();
        }
    }

    if cloned.last_known_racks.len() > 1 {
        for (idx, rack) in cloned.last_known_racks.iter_mut().enumerate() {
            if idx != seat {
                rack.clear();
            }
        }
    }

    Cow::Owned(cloned)
}

/// Tiles are letters or `?`; a run of digits is an already-redacted count.
fn is_redacted_count(exchanged: &str) -> bool {
    exchanged.bytes().all(|b| b.is_ascii_digit())
}
