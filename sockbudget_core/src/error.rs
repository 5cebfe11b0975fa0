//! Negotiation error types.

use std::io;

use thiserror::Error;

/// Ways raising the open-file limit can leave the workload short of descriptors.
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// The kernel refused every candidate.
    #[error("could not adjust open files limit from {from} to {to}")]
    Rejected {
        /// Soft limit before negotiation.
        from: u64,
        /// Smallest candidate tried.
        to: u64,
    },

    /// A candidate was installed but it cannot hold the expected sockets.
    #[error("adjusted limit from {from} to {achieved}, but still too low for --connections={connections}")]
    TooLow {
        /// Soft limit before negotiation.
        from: u64,
        /// Limit now in effect.
        achieved: u64,
        /// Expected sockets.
        connections: u64,
        /// Minimum viable limit.
        required: u64,
    },

    /// `setrlimit` failed for a reason other than a refusal.
    #[error("setrlimit(RLIMIT_NOFILE, {{{soft}, {hard}}}): {source}")]
    Setrlimit {
        /// Soft limit requested.
        soft: u64,
        /// Hard limit requested.
        hard: u64,
        #[source]
        source: io::Error,
    },
}
