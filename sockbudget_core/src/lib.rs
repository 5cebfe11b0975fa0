//! Pre-flight negotiation and sanity checks of open-file limits for connection-heavy clients.
//!
//! [`Negotiator`] raises `RLIMIT_NOFILE` as close as the kernel allows to what the expected
//! sockets need; [`Auditor`] reports, without changing anything, whether the host can sustain
//! them. Both take the OS through small traits so any kernel response can be simulated.

pub mod audit;
pub mod error;
pub mod limits;
pub mod negotiate;
pub mod tunables;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use audit::{AuditCheck, AuditReport, Auditor, Finding, Verdict};
pub use error::NegotiationError;
pub use limits::{Candidates, DEFAULT_OPEN_MAX, HEADROOM, LimitPair, MIN_OVERHEAD, NofileLimits, OpenMaxQuery};
pub use negotiate::{Negotiated, Negotiator};
pub use tunables::{ParseTunableError, PortRange, ProcTunables, TunableReader, TwReuse};
#[cfg(unix)]
pub use utils::unix_limits::SystemLimits;

/// Raise this process's open-file limit for `expected_sockets` shared by `workers`.
#[cfg(unix)]
pub fn negotiate(expected_sockets: u64, workers: u64) -> Result<Negotiated, NegotiationError> {
    Negotiator::new(SystemLimits::new(), SystemLimits::new()).negotiate(expected_sockets, workers)
}

/// Check this host against `expected_sockets` shared by `workers`, reading tunables from `/proc/sys`.
#[cfg(unix)]
pub fn audit(expected_sockets: u64, workers: u64) -> AuditReport {
    Auditor::new(SystemLimits::new(), SystemLimits::new(), ProcTunables::new()).audit(expected_sockets, workers)
}
