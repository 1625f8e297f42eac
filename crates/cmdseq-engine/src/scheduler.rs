use cmdseq_core::{TagMode, TimeTag};
use tokio::time::Instant;

// ─── Deadline arithmetic ──────────────────────────────────────────────────

/// Resolve a record's time tag into the absolute instant it becomes due.
///
/// Absolute tags anchor once, at sequence start. Relative tags anchor to
/// the *completion* of the preceding record — not its dispatch — so
/// back-to-back chains stay drift-free when commands take variable time to
/// execute. Record 0 with a relative tag anchors to sequence start.
pub fn deadline(tag: &TimeTag, sequence_start: Instant, previous_completion: Option<Instant>) -> Instant {
    let anchor = match tag.mode() {
        TagMode::Absolute => sequence_start,
        TagMode::Relative => previous_completion.unwrap_or(sequence_start),
    };
    anchor + tag.offset()
}

/// A deadline at or before `now` is due: catch-up records dispatch
/// immediately, with no artificial delay.
pub fn is_due(deadline: Instant, now: Instant) -> bool {
    deadline <= now
}

// ─── Tests ────────────────────────────────────────────────────────────────
