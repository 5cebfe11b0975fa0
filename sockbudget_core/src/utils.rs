#[cfg(unix)]
pub mod unix_limits {
    use std::io;

    use nix::unistd::{SysconfVar, sysconf};
    use rlimit::Resource;

    use crate::limits::{LimitPair, NofileLimits, OpenMaxQuery};

    /// The calling process's real `RLIMIT_NOFILE` and `sysconf(_SC_OPEN_MAX)`.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemLimits;

    impl SystemLimits {
        pub const fn new() -> Self {
            Self
        }
    }

    impl NofileLimits for SystemLimits {
        fn get(&self) -> io::Result<LimitPair> {
            let (soft, hard) = Resource::NOFILE.get()?;
            Ok(LimitPair { soft, hard })
        }

        fn set(&self, limits: LimitPair) -> io::Result<()> {
            Resource::NOFILE.set(limits.soft, limits.hard)
        }
    }

    impl OpenMaxQuery for SystemLimits {
        fn open_max(&self) -> io::Result<u64> {
            match sysconf(SysconfVar::OPEN_MAX)? {
                Some(value) => u64::try_from(value).map_err(|_| io::Error::other(format!("negative value {value}"))),
                None => Err(io::Error::other("no determinate limit")),
            }
        }
    }

}
