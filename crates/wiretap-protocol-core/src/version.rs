use once_cell::sync::OnceCell;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Environment variable the host sets to announce which server release it runs.
pub const VERSION_ENV: &str = "WIRETAP_SERVER_VERSION";

static CURRENT: OnceCell<VersionDescriptor> = OnceCell::new();

/// Revision suffix distinguishing builds that share major.minor.patch (`R1`, `R2`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReleaseTag(pub u8);

impl Default for ReleaseTag {
    fn default() -> Self {
        ReleaseTag(1)
    }
}

impl fmt::Display for ReleaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("{VERSION_ENV} is not set")]
    Missing,
    #[error("Unrecognized server version '{0}'")]
    Malformed(String),
}

/// A server release. Ordering is (major, minor, patch) with the release tag breaking ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionDescriptor {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub release: ReleaseTag,
}

impl VersionDescriptor {
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
            release: ReleaseTag(1),
        }
    }

    pub const fn with_release(mut self, release: u8) -> Self {
        self.release = ReleaseTag(release);
        self
    }

    /// Parse a release string.
    ///
    /// Accepts dotted versions (`1.19.1`, `1.19`, `1.19.1-R2`, `1.19.1-R0.1-SNAPSHOT`) and
    /// package keys (`v1_19_R1`, `v1_19_1_R1`). A missing or zero release tag means `R1`.
    pub fn parse(raw: &str) -> Result<Self, VersionError> {
        let input = raw.trim();
        let malformed = || VersionError::Malformed(raw.to_string());

        let (numbers, tag): (Vec<&str>, Option<&str>) =
            if let Some(key) = input.strip_prefix('v').filter(|k| k.contains('_')) {
                let mut parts: Vec<&str> = key.split('_').collect();
                let tag = match parts.last() {
                    Some(last) if last.starts_with('R') => parts.pop(),
                    _ => None,
                };
                (parts, tag)
            } else {
                let mut sections = input.splitn(2, '-');
                let numbers = sections.next().unwrap_or_default().split('.').collect();
                let tag = sections
                    .next()
                    .filter(|s| s.starts_with('R'))
                    .map(|s| s.split(['.', '-']).next().unwrap_or(s));
                (numbers, tag)
            };

        if numbers.len() < 2 || numbers.len() > 3 {
            return Err(malformed());
        }
        let mut parsed = [0u16; 3];
        for (slot, part) in parsed.iter_mut().zip(&numbers) {
            *slot = part.parse().map_err(|_| malformed())?;
        }

        let release = match tag {
            Some(tag) => {
                let n: u8 = tag[1..].parse().map_err(|_| malformed())?;
                ReleaseTag(n.max(1))
            }
            None => ReleaseTag::default(),
        };

        Ok(Self {
            major: parsed[0],
            minor: parsed[1],
            patch: parsed[2],
            release,
        })
    }

    /// Read the server release from the environment.
    pub fn detect() -> Result<Self, VersionError> {
        match std::env::var(VERSION_ENV) {
            Ok(raw) => Self::parse(&raw),
            Err(_) => Err(VersionError::Missing),
        }
    }

    /// Package key in the `v1_19_R1` form. Patch is omitted because releases of
    /// one minor line share adapters.
    pub fn key(&self) -> String {
        format!("v{}_{}_{}", self.major, self.minor, self.release)
    }

    /// Record this as the process-wide release. The first install wins; the
    /// installed descriptor is returned either way.
    pub fn install(self) -> VersionDescriptor {
        *CURRENT.get_or_init(|| self)
    }

    /// The release installed for this process, if any.
    pub fn current() -> Option<VersionDescriptor> {
        CURRENT.get().copied()
    }

    pub fn same_line(&self, other: &VersionDescriptor) -> bool {
        self.major == other.major
    }
}

impl FromStr for VersionDescriptor {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}-{}",
            self.major, self.minor, self.patch, self.release
        )
    }
}
