//! Kernel tunables that decide whether many outbound connections can coexist.

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use thiserror::Error;
use tracing::trace;

/// Local port range handed out to outbound connections.
pub const IP_LOCAL_PORT_RANGE: &str = "net.ipv4.ip_local_port_range";

/// Whether sockets lingering in TIME_WAIT may be reused for new outbound connections.
pub const TCP_TW_REUSE: &str = "net.ipv4.tcp_tw_reuse";

/// Default mount point of the sysctl tree.
pub const PROC_SYS_ROOT: &str = "/proc/sys";

/// Optional, read-only access to sysctl-style tunables.
///
/// `None` means the value cannot be assessed here: the key is absent on this platform, unreadable,
/// or does not parse. It never means the value is wrong.
pub trait TunableReader {
    /// Raw contents for `key`, e.g. `net.ipv4.tcp_tw_reuse`.
    fn read_raw(&self, key: &str) -> Option<String>;

    /// Where `key` is read from, for operator-facing messages.
    fn locate(&self, key: &str) -> String {
        key.to_owned()
    }

    fn read<T: FromStr>(&self, key: &str) -> Option<T>
    where
        Self: Sized,
    {
        let raw = self.read_raw(key)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                trace!(key, raw = raw.trim(), "tunable is not parsable");
                None
            }
        }
    }
}

impl<T: TunableReader + ?Sized> TunableReader for &T {
    fn read_raw(&self, key: &str) -> Option<String> {
        (**self).read_raw(key)
    }

    fn locate(&self, key: &str) -> String {
        (**self).locate(key)
    }
}

/// Tunables read from a `/proc/sys`-shaped directory tree.
#[derive(Clone, Debug)]
pub struct ProcTunables {
    root: PathBuf,
}

impl ProcTunables {
    pub fn new() -> Self {
        Self::with_root(PROC_SYS_ROOT)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `net.ipv4.tcp_tw_reuse` lives at `<root>/net/ipv4/tcp_tw_reuse`.
    pub fn path_of(&self, key: &str) -> PathBuf {
        key.split('.').fold(self.root.clone(), |path, part| path.join(part))
    }
}

impl Default for ProcTunables {
    fn default() -> Self {
        Self::new()
    }
}

impl TunableReader for ProcTunables {
    fn read_raw(&self, key: &str) -> Option<String> {
        let path = self.path_of(key);
        match fs::read_to_string(&path) {
            Ok(raw) => Some(raw),
            Err(e) => {
                trace!(path = %path.display(), "tunable is not readable: {}", e);
                None
            }
        }
    }

    fn locate(&self, key: &str) -> String {
        self.path_of(key).display().to_string()
    }
}

/// A tunable did not start with the integers it should hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("expected a leading integer")]
pub struct ParseTunableError;

/// Reads one integer the way `scanf("%d")` does: leading whitespace and an optional sign, then
/// digits up to the first non-digit. Returns the value and the unread rest.
fn scan_int(s: &str) -> Result<(i64, &str), ParseTunableError> {
    let s = s.trim_start();
    let sign = usize::from(s.starts_with(['+', '-']));
    let end = s[sign..].find(|c: char| !c.is_ascii_digit()).map_or(s.len(), |i| sign + i);

    let value = s[..end].parse().map_err(|_| ParseTunableError)?;
    Ok((value, &s[end..]))
}

/// Inclusive `low high` pair from `ip_local_port_range`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortRange {
    pub low: i64,
    pub high: i64,
}

impl PortRange {
    /// Ports available past `low`; negative when the range is inverted.
    pub fn width(&self) -> i64 {
        self.high - self.low
    }
}

impl FromStr for PortRange {
    type Err = ParseTunableError;

    /// Two leading integers; anything after them is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (low, rest) = scan_int(s)?;
        let (high, _) = scan_int(rest)?;
        Ok(Self { low, high })
    }
}

/// Value of `tcp_tw_reuse`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TwReuse(pub i64);

impl TwReuse {
    /// Only `1` reuses TIME_WAIT sockets for every destination.
    pub fn is_enabled(&self) -> bool {
        self.0 == 1
    }
}

impl FromStr for TwReuse {
    type Err = ParseTunableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        scan_int(s).map(|(value, _)| Self(value))
    }
}
