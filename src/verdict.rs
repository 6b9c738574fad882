//! Daemon verdicts.

use std::collections::BTreeSet;
use std::fmt;

/// Status code: request is clean.
pub const STATUS_OK: i64 = 1;
/// Status code: the daemon could not read the request frame.
pub const STATUS_BAD_REQUEST: i64 = 2;
/// Status code: HMAC signature did not verify.
pub const STATUS_BAD_SIGNATURE: i64 = 3;
/// Status code: the payload was not valid JSON.
pub const STATUS_BAD_JSON: i64 = 4;
/// Status code: threats found, see `threats`.
pub const STATUS_ATTACK: i64 = 5;
/// Status code: threats found that must not be scrubbed in place.
pub const STATUS_CRITICAL_ATTACK: i64 = 6;

/// Outcome of one exchange with the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing suspicious.
    Ok,
    /// Daemon rejected the frame.
    BadRequest,
    /// Daemon rejected the signature.
    BadSignature,
    /// Daemon could not decode the payload.
    BadJson,
    /// Specific fields were flagged.
    Attack {
        /// Joined path keys of the offending fields
        threats: BTreeSet<String>,
    },
    /// The request as a whole must be blocked.
    CriticalAttack,
    /// Status code outside the protocol.
    ProcessingError(i64),
}

impl Verdict {
    /// Maps a status code to a verdict.
    ///
    /// `threats` is only consulted for [`STATUS_ATTACK`]; `None` is returned
    /// when an attack status arrives without a threat list.
    pub fn from_status(status: i64, threats: Option<Vec<String>>) -> Option<Self> {
        let verdict = match status {
            STATUS_OK => Verdict::Ok,
            STATUS_BAD_REQUEST => Verdict::BadRequest,
            STATUS_BAD_SIGNATURE => Verdict::BadSignature,
            STATUS_BAD_JSON => Verdict::BadJson,
            STATUS_ATTACK => Verdict::Attack {
                threats: threats?.into_iter().collect(),
            },
            STATUS_CRITICAL_ATTACK => Verdict::CriticalAttack,
            other => Verdict::ProcessingError(other),
        };
        Some(verdict)
    }

    /// Returns `true` for verdicts that mean the exchange itself failed.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Verdict::BadRequest
                | Verdict::BadSignature
                | Verdict::BadJson
                | Verdict::ProcessingError(_)
        )
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Ok => write!(f, "ok"),
            Verdict::BadRequest => write!(f, "bad request"),
            Verdict::BadSignature => write!(f, "bad signature"),
            Verdict::BadJson => write!(f, "bad json"),
            Verdict::Attack { threats } => write!(f, "attack ({} threats)", threats.len()),
            Verdict::CriticalAttack => write!(f, "critical attack"),
            Verdict::ProcessingError(status) => write!(f, "processing error (status {})", status),
        }
    }
}
