//! In-memory stand-ins for the OS seams.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    io,
};

use crate::{
    limits::{LimitPair, NofileLimits, OpenMaxQuery},
    tunables::TunableReader,
};

enum SetPolicy {
    AcceptUpTo(u64),
    Fail(io::ErrorKind),
}

/// Scripted `RLIMIT_NOFILE` pair that records every `set` attempt.
pub(crate) struct FakeLimits {
    current: Cell<LimitPair>,
    readable: bool,
    policy: SetPolicy,
    attempts: RefCell<Vec<LimitPair>>,
}

impl FakeLimits {
    /// Accepts any new limit.
    pub(crate) fn new(current: LimitPair) -> Self {
        Self::with_ceiling(current, u64::MAX)
    }

    /// Refuses with `EPERM` anything above `ceiling`.
    pub(crate) fn with_ceiling(current: LimitPair, ceiling: u64) -> Self {
        Self {
            current: Cell::new(current),
            readable: true,
            policy: SetPolicy::AcceptUpTo(ceiling),
            attempts: RefCell::new(Vec::new()),
        }
    }

    /// Every `set` fails with `kind`.
    pub(crate) fn failing(current: LimitPair, kind: io::ErrorKind) -> Self {
        Self {
            policy: SetPolicy::Fail(kind),
            ..Self::new(current)
        }
    }

    pub(crate) fn unreadable() -> Self {
        Self {
            readable: false,
            ..Self::new(LimitPair::fixed(0))
        }
    }

    pub(crate) fn attempts(&self) -> Vec<LimitPair> {
        self.attempts.borrow().clone()
    }

    pub(crate) fn current(&self) -> LimitPair {
        self.current.get()
    }
}

impl NofileLimits for FakeLimits {
    fn get(&self) -> io::Result<LimitPair> {
        if self.readable {
            Ok(self.current.get())
        } else {
            Err(io::Error::from(io::ErrorKind::Unsupported))
        }
    }

    fn set(&self, limits: LimitPair) -> io::Result<()> {
        self.attempts.borrow_mut().push(limits);

        match self.policy {
            SetPolicy::AcceptUpTo(ceiling) if limits.hard <= ceiling => {
                self.current.set(limits);
                Ok(())
            }
            SetPolicy::AcceptUpTo(_) => Err(io::Error::from(io::ErrorKind::PermissionDenied)),
            SetPolicy::Fail(kind) => Err(io::Error::from(kind)),
        }
    }
}

pub(crate) struct FakeOpenMax(Option<u64>);

impl FakeOpenMax {
    pub(crate) fn new(value: u64) -> Self {
        Self(Some(value))
    }

    pub(crate) fn failing() -> Self {
        Self(None)
    }
}

impl OpenMaxQuery for FakeOpenMax {
    fn open_max(&self) -> io::Result<u64> {
        self.0.ok_or_else(|| io::Error::from(io::ErrorKind::Unsupported))
    }
}

/// Sysctl values keyed by name; missing keys read as unavailable.
#[derive(Default)]
pub(crate) struct FakeTunables(HashMap<String, String>);

impl FakeTunables {
    pub(crate) fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl TunableReader for FakeTunables {
    fn read_raw(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}
