//! Open-file limit discovery and candidate ranking shared by the negotiator and the auditor.

use std::{fmt, io};

use tracing::warn;

/// Descriptors reserved on top of the expected sockets when asking for a generous limit.
pub const HEADROOM: u64 = 100;

/// Descriptors reserved on top of the expected sockets for the bare minimum the workload needs.
pub const MIN_OVERHEAD: u64 = 4;

/// System-wide open-file ceiling assumed when the OS cannot tell us.
pub const DEFAULT_OPEN_MAX: u64 = 1024;

/// Soft and hard caps on open file descriptors, as the OS reports them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LimitPair {
    pub soft: u64,
    pub hard: u64,
}

impl LimitPair {
    pub const fn new(soft: u64, hard: u64) -> Self {
        Self { soft, hard }
    }

    /// Both caps set to the same value.
    pub const fn fixed(value: u64) -> Self {
        Self { soft: value, hard: value }
    }
}

impl fmt::Display for LimitPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}, {}}}", self.soft, self.hard)
    }
}

/// Read/write access to the process `RLIMIT_NOFILE` pair.
pub trait NofileLimits {
    /// Current soft and hard limits.
    fn get(&self) -> io::Result<LimitPair>;

    /// Install new soft and hard limits.
    fn set(&self, limits: LimitPair) -> io::Result<()>;
}

/// Source of the system-wide maximum number of open files.
pub trait OpenMaxQuery {
    /// An indeterminate answer is reported as an error.
    fn open_max(&self) -> io::Result<u64>;
}

impl<T: NofileLimits + ?Sized> NofileLimits for &T {
    fn get(&self) -> io::Result<LimitPair> {
        (**self).get()
    }

    fn set(&self, limits: LimitPair) -> io::Result<()> {
        (**self).set(limits)
    }
}

impl<T: OpenMaxQuery + ?Sized> OpenMaxQuery for &T {
    fn open_max(&self) -> io::Result<u64> {
        (**self).open_max()
    }
}

/// `expected_sockets + 4 + workers`: the least the workload can run with.
pub fn required_descriptors(expected_sockets: u64, workers: u64) -> u64 {
    expected_sockets.saturating_add(MIN_OVERHEAD).saturating_add(workers)
}

/// `expected_sockets + 100 + workers`: room for control connections, logs and timers.
pub fn generous_descriptors(expected_sockets: u64, workers: u64) -> u64 {
    expected_sockets.saturating_add(HEADROOM).saturating_add(workers)
}

/// Query the system-wide open-file ceiling, falling back to [`DEFAULT_OPEN_MAX`].
pub fn resolve_open_max<Q: OpenMaxQuery>(query: &Q) -> u64 {
    match query.open_max() {
        Ok(value) => value,
        Err(e) => {
            warn!("sysconf(_SC_OPEN_MAX): {}", e);
            DEFAULT_OPEN_MAX
        }
    }
}

/// Query the current limits.
///
/// # Panics
///
/// Panics if the OS refuses to report them: nothing sensible can be done about descriptors in
/// that state.
pub(crate) fn current_limits<L: NofileLimits>(limits: &L) -> LimitPair {
    match limits.get() {
        Ok(pair) => pair,
        Err(e) => panic!("getrlimit(RLIMIT_NOFILE) failed: {e}"),
    }
}

/// Candidate open-file ceilings, always three and sorted descending.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidates([u64; 3]);

impl Candidates {
    /// Rank the hard limit (or `open_max` when the hard limit is unlimited) against the generous
    /// and the minimum viable targets.
    pub fn rank(current: LimitPair, open_max: u64, expected_sockets: u64, workers: u64) -> Self {
        let ceiling = if current.hard == unlimited() { open_max } else { current.hard };

        let mut values = [
            ceiling,
            generous_descriptors(expected_sockets, workers),
            required_descriptors(expected_sockets, workers),
        ];
        values.sort_unstable_by(|a, b| b.cmp(a));

        Self(values)
    }

    pub fn largest(&self) -> u64 {
        self.0[0]
    }

    pub fn smallest(&self) -> u64 {
        self.0[2]
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }
}

/// The value the OS uses for "no limit".
#[cfg(unix)]
pub fn unlimited() -> u64 {
    rlimit::INFINITY
}

#[cfg(not(unix))]
pub fn unlimited() -> u64 {
    u64::MAX
}
