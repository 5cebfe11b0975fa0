//! Read-only checks that the host can sustain the requested connection count.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};
use tracing::{debug, info_span, warn};

use crate::{
    limits::{NofileLimits, OpenMaxQuery, current_limits, required_descriptors, resolve_open_max},
    tunables::{IP_LOCAL_PORT_RANGE, PortRange, TCP_TW_REUSE, TunableReader, TwReuse},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditCheck {
    NofileSoftLimit,
    SystemOpenMax,
    EphemeralPorts,
    TimeWaitReuse,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Verdict {
    Sane,
    Unsane,
}

/// A check that ran and failed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub check: AuditCheck,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub expected_sockets: u64,
    pub workers: u64,
    /// Minimum viable descriptor count.
    pub required: u64,
    pub findings: Vec<Finding>,
    /// Checks that could not be assessed on this host.
    pub skipped: Vec<AuditCheck>,
}

impl AuditReport {
    pub fn verdict(&self) -> Verdict {
        if self.findings.is_empty() { Verdict::Sane } else { Verdict::Unsane }
    }

    pub fn is_sane(&self) -> bool {
        self.verdict() == Verdict::Sane
    }

    pub fn failed(&self, check: AuditCheck) -> bool {
        self.findings.iter().any(|f| f.check == check)
    }

    pub fn was_skipped(&self, check: AuditCheck) -> bool {
        self.skipped.contains(&check)
    }

    fn fail(&mut self, check: AuditCheck, message: String) {
        warn!(check = %check, "{}", message);
        self.findings.push(Finding { check, message });
    }

    fn skip(&mut self, check: AuditCheck) {
        debug!(check = %check, "check not applicable on this host");
        self.skipped.push(check);
    }
}

/// Inspects descriptor limits and network tunables without changing any of them.
///
/// Every check runs regardless of the others. Limits may change between the audit and the
/// workload starting; the report describes the moment it was taken.
#[derive(Clone, Debug)]
pub struct Auditor<L, Q, T> {
    limits: L,
    open_max: Q,
    tunables: T,
}

impl<L: NofileLimits, Q: OpenMaxQuery, T: TunableReader> Auditor<L, Q, T> {
    pub fn new(limits: L, open_max: Q, tunables: T) -> Self {
        Self { limits, open_max, tunables }
    }

    /// # Panics
    ///
    /// Panics if the current limits cannot be queried.
    pub fn audit(&self, expected_sockets: u64, workers: u64) -> AuditReport {
        let span = info_span!("audit", expected_sockets, workers);
        let _enter = span.enter();

        let mut report = AuditReport {
            expected_sockets,
            workers,
            required: required_descriptors(expected_sockets, workers),
            findings: Vec::new(),
            skipped: Vec::new(),
        };

        self.check_soft_limit(&mut report);
        self.check_open_max(&mut report);
        self.check_ephemeral_ports(&mut report);
        self.check_time_wait_reuse(&mut report);

        report
    }

    fn check_soft_limit(&self, report: &mut AuditReport) {
        let soft = current_limits(&self.limits).soft;

        if soft < report.required {
            let message = format!(
                "open files limit (`ulimit -n`) {} is too low for the expected load (-c {}), need at least {}",
                soft, report.expected_sockets, report.required
            );
            report.fail(AuditCheck::NofileSoftLimit, message);
        }
    }

    fn check_open_max(&self, report: &mut AuditReport) {
        let open_max = resolve_open_max(&self.open_max);

        if open_max < report.required {
            let message = format!(
                "system-wide open files limit {} is too low for the expected load (-c {}), need at least {}; \
                 consider adjusting fs.file-max or kern.maxfiles sysctl",
                open_max, report.expected_sockets, report.required
            );
            report.fail(AuditCheck::SystemOpenMax, message);
        }
    }

    fn check_ephemeral_ports(&self, report: &mut AuditReport) {
        let Some(range) = self.tunables.read::<PortRange>(IP_LOCAL_PORT_RANGE) else {
            report.skip(AuditCheck::EphemeralPorts);
            return;
        };

        if range.width() < i64::try_from(report.expected_sockets).unwrap_or(i64::MAX) {
            let message = format!(
                "will not be able to open {} simultaneous connections since \"{}\" specifies too narrow range [{}..{}]",
                report.expected_sockets,
                self.tunables.locate(IP_LOCAL_PORT_RANGE),
                range.low,
                range.high
            );
            report.fail(AuditCheck::EphemeralPorts, message);
        }
    }

    fn check_time_wait_reuse(&self, report: &mut AuditReport) {
        let Some(flag) = self.tunables.read::<TwReuse>(TCP_TW_REUSE) else {
            report.skip(AuditCheck::TimeWaitReuse);
            return;
        };

        if !flag.is_enabled() && report.expected_sockets > 1 {
            let message = format!(
                "not reusing TIME_WAIT sockets, might not open {} simultaneous connections; adjust \"{}\" value",
                report.expected_sockets,
                self.tunables.locate(TCP_TW_REUSE)
            );
            report.fail(AuditCheck::TimeWaitReuse, message);
        }
    }
}
