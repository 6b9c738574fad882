//! What to do with a verdict.
//!
//! The decision is a pure function of the verdict and the observe flag;
//! carrying it out is left to the connector so the table below can be
//! tested on its own.
//!
//! | Verdict | enforcing | observing |
//! |---|---|---|
//! | ok | continue | continue |
//! | attack | defuse threats | report |
//! | attack, no threats | continue | continue |
//! | critical attack | abort | report |
//! | bad request / signature / json, unknown status | fail | fail |
//!
//! A failure is handled like any other transport error: the connector
//! aborts when enforcing and lets the request through when observing.

use std::collections::BTreeSet;

use crate::verdict::Verdict;

/// Action derived from a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Leave the request alone.
    Continue,
    /// Neutralize these paths in the live request.
    Defuse(BTreeSet<String>),
    /// Block the request without touching it.
    Abort,
    /// Let the request through unmodified and report the verdict.
    Report(Verdict),
    /// The exchange failed; treat like a transport error.
    Fail(Verdict),
}

/// Decides how to react to a verdict.
///
/// # Examples
///
/// ```
/// use shadowd_connector::{decide, Action, Verdict};
///
/// assert_eq!(decide(Verdict::CriticalAttack, false), Action::Abort);
/// assert_eq!(
///     decide(Verdict::CriticalAttack, true),
///     Action::Report(Verdict::CriticalAttack)
/// );
/// ```
pub fn decide(verdict: Verdict, observe: bool) -> Action {
    if verdict.is_failure() {
        return Action::Fail(verdict);
    }

    match (verdict, observe) {
        (Verdict::Ok, _) => Action::Continue,
        // Nothing flagged, nothing to neutralize or report.
        (Verdict::Attack { threats }, _) if threats.is_empty() => Action::Continue,
        (Verdict::Attack { threats }, false) => Action::Defuse(threats),
        (Verdict::CriticalAttack, false) => Action::Abort,
        (verdict, _) => Action::Report(verdict),
    }
}
