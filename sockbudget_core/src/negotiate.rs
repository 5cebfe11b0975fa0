//! Raising the open-file limit ahead of a connection-heavy workload.

use std::io;

use tracing::{debug, info, info_span, trace};

use crate::{
    error::NegotiationError,
    limits::{Candidates, LimitPair, NofileLimits, OpenMaxQuery, current_limits, required_descriptors, resolve_open_max},
};

/// Successful negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Negotiated {
    /// The soft limit already covered every candidate; nothing was changed.
    Unchanged { soft: u64 },
    /// A new limit was installed.
    Raised { from: u64, to: u64 },
}

impl Negotiated {
    /// Soft limit in effect after negotiation.
    pub fn limit(&self) -> u64 {
        match *self {
            Negotiated::Unchanged { soft } => soft,
            Negotiated::Raised { to, .. } => to,
        }
    }
}

/// Tries candidate ceilings from the most generous down until the kernel accepts one.
///
/// Resource limits are process-wide: run this once, before spawning the workers that share the
/// descriptor budget.
#[derive(Clone, Debug)]
pub struct Negotiator<L, Q> {
    limits: L,
    open_max: Q,
}

impl<L: NofileLimits, Q: OpenMaxQuery> Negotiator<L, Q> {
    pub fn new(limits: L, open_max: Q) -> Self {
        Self { limits, open_max }
    }

    /// Raise the open-file limit enough for `expected_sockets` plus per-worker overhead.
    ///
    /// # Panics
    ///
    /// Panics if the current limits cannot be queried.
    pub fn negotiate(&self, expected_sockets: u64, workers: u64) -> Result<Negotiated, NegotiationError> {
        let span = info_span!("negotiate", expected_sockets, workers);
        let _enter = span.enter();

        let prev = current_limits(&self.limits);
        let open_max = resolve_open_max(&self.open_max);
        let candidates = Candidates::rank(prev, open_max, expected_sockets, workers);

        if prev.soft >= candidates.largest() {
            debug!(soft = prev.soft, "open files limit already sufficient");
            return Ok(Negotiated::Unchanged { soft: prev.soft });
        }

        let achieved = self.install_first_accepted(&candidates)?.ok_or(NegotiationError::Rejected {
            from: prev.soft,
            to: candidates.smallest(),
        })?;

        let required = required_descriptors(expected_sockets, workers);
        if achieved < required {
            return Err(NegotiationError::TooLow {
                from: prev.soft,
                achieved,
                connections: expected_sockets,
                required,
            });
        }

        info!("adjusted open files limit from {} to {}", prev.soft, achieved);

        Ok(Negotiated::Raised { from: prev.soft, to: achieved })
    }

    /// Returns the installed value, or `None` when every candidate was refused.
    fn install_first_accepted(&self, candidates: &Candidates) -> Result<Option<u64>, NegotiationError> {
        for value in candidates.iter() {
            let target = LimitPair::fixed(value);

            match self.limits.set(target) {
                Ok(()) => return Ok(Some(value)),
                Err(e) if is_refusal(&e) => {
                    trace!(value, "open files limit refused: {}", e);
                }
                Err(e) => {
                    return Err(NegotiationError::Setrlimit {
                        soft: target.soft,
                        hard: target.hard,
                        source: e,
                    });
                }
            }
        }

        Ok(None)
    }
}

/// `EPERM` and `EINVAL`: the kernel or an administrator capped the limit below the request.
fn is_refusal(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::PermissionDenied | io::ErrorKind::InvalidInput)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        limits::unlimited,
        test_utils::{FakeLimits, FakeOpenMax},
    };

    fn negotiator(limits: &FakeLimits) -> Negotiator<&FakeLimits, FakeOpenMax> {
        Negotiator::new(limits, FakeOpenMax::new(1 << 20))
    }

    #[test]
    fn sufficient_soft_limit_skips_setrlimit() {
        let limits = FakeLimits::new(LimitPair::fixed(4096));

        let outcome = negotiator(&limits).negotiate(1000, 4).unwrap();

        assert_eq!(outcome, Negotiated::Unchanged { soft: 4096 });
        assert!(limits.attempts().is_empty());
    }

    #[test]
    fn unlimited_soft_limit_skips_setrlimit() {
        let limits = FakeLimits::new(LimitPair::fixed(u64::MAX));

        assert!(negotiator(&limits).negotiate(100_000, 64).is_ok());
        assert!(limits.attempts().is_empty());
    }

    #[test]
    fn largest_candidate_wins_in_one_attempt() {
        let limits = FakeLimits::new(LimitPair::new(256, 65536));

        let outcome = negotiator(&limits).negotiate(1000, 4).unwrap();

        assert_eq!(outcome, Negotiated::Raised { from: 256, to: 65536 });
        assert_eq!(outcome.limit(), 65536);
        assert_eq!(limits.attempts(), vec![LimitPair::fixed(65536)]);
        assert_eq!(limits.current(), LimitPair::fixed(65536));
    }

    #[test]
    fn falls_back_to_smaller_candidates() {
        let limits = FakeLimits::with_ceiling(LimitPair::new(256, 65536), 1104);

        let outcome = negotiator(&limits).negotiate(1000, 4).unwrap();

        assert_eq!(outcome, Negotiated::Raised { from: 256, to: 1104 });
        assert_eq!(limits.attempts(), vec![LimitPair::fixed(65536), LimitPair::fixed(1104)]);
    }

    #[test]
    fn invalid_argument_also_falls_back() {
        let limits = FakeLimits::failing(LimitPair::new(256, 65536), io::ErrorKind::InvalidInput);

        let err = negotiator(&limits).negotiate(1000, 4).unwrap_err();

        assert!(matches!(err, NegotiationError::Rejected { from: 256, to: 1008 }));
        assert_eq!(limits.attempts().len(), 3);
    }

    #[test]
    fn all_refused_after_three_attempts() {
        let limits = FakeLimits::failing(LimitPair::new(256, 65536), io::ErrorKind::PermissionDenied);

        let err = negotiator(&limits).negotiate(1000, 4).unwrap_err();

        assert_eq!(
            limits.attempts(),
            vec![LimitPair::fixed(65536), LimitPair::fixed(1104), LimitPair::fixed(1008)]
        );
        assert_eq!(err.to_string(), "could not adjust open files limit from 256 to 1008");
    }

    #[test]
    fn other_errors_abort_immediately() {
        let limits = FakeLimits::failing(LimitPair::new(256, 65536), io::ErrorKind::Other);

        let err = negotiator(&limits).negotiate(1000, 4).unwrap_err();

        assert!(matches!(err, NegotiationError::Setrlimit { soft: 65536, hard: 65536, .. }));
        assert_eq!(limits.attempts().len(), 1);
    }

    #[test]
    fn accepted_limit_below_minimum_is_a_failure() {
        // The hard limit ranks last and is the only value the kernel takes.
        let limits = FakeLimits::with_ceiling(LimitPair::new(256, 512), 512);

        let err = negotiator(&limits).negotiate(1000, 4).unwrap_err();

        assert!(matches!(
            err,
            NegotiationError::TooLow { from: 256, achieved: 512, connections: 1000, required: 1008 }
        ));
        assert_eq!(
            err.to_string(),
            "adjusted limit from 256 to 512, but still too low for --connections=1000"
        );
        assert_eq!(limits.attempts().len(), 3);
    }

    #[test]
    fn unlimited_hard_limit_tries_open_max_first() {
        let limits = FakeLimits::new(LimitPair::new(256, unlimited()));

        let outcome = Negotiator::new(&limits, FakeOpenMax::failing()).negotiate(10, 2).unwrap();

        assert_eq!(outcome, Negotiated::Raised { from: 256, to: 1024 });
    }

    #[test]
    #[should_panic(expected = "getrlimit")]
    fn unreadable_limits_are_fatal() {
        let _ = negotiator(&FakeLimits::unreadable()).negotiate(1, 1);
    }
}
