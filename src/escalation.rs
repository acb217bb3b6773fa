//! Escalation policy
//!
//! Formalizes "the model is stuck on the same error". Each analysis pass has
//! a lead defect; when the same defect identity stays in the lead across
//! consecutive passes, its streak grows, and once the streak reaches the
//! configured threshold the next synthesis call gets reference search
//! results as extra context.
//!
//! Boundary convention: the streak counts analysis passes, including the
//! current outstanding one, so with a threshold of 5 the 5th synthesis call
//! for an unchanged lead defect is the one that carries references. No
//! search can trigger before the first fix attempt - a streak needs at
//! least one attempt record behind it.

use crate::defect::DefectIdentity;
use crate::session::AttemptRecord;

/// The lead defect identity still outstanding after the latest attempt, and
/// the number of consecutive analysis passes it has led. `None` when there
/// is no history or the latest pass came back clean.
pub fn consecutive_occurrences(history: &[AttemptRecord]) -> Option<(DefectIdentity, u32)> {
    let last = history.last()?;
    let lead = last.defects_after.lead()?;
    let target = lead.identity();

    // The current outstanding pass counts as one; each earlier record
    // contributes the pass it started from, until the identity changes.
    let mut count = 1;
    for record in history.iter().rev() {
        match record.defects_before.lead() {
            Some(d) if d.identity() == target => count += 1,
            _ => break,
        }
    }

    Some((target, count))
}

/// True iff the current lead defect's streak has reached `threshold`.
pub fn should_search(history: &[AttemptRecord], threshold: u32) -> bool {
    consecutive_occurrences(history)
        .map(|(_, count)| count >= threshold)
        .unwrap_or(false)
}
