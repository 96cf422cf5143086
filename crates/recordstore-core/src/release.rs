//! Schema release numbers (`release_0`, `release_0_1`, ...)

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

const PREFIX: &str = "release_";

/// A schema release, ordered by its numeric components.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReleaseNumber {
    components: Vec<u32>,
}

impl ReleaseNumber {
    pub fn new(components: impl Into<Vec<u32>>) -> Result<Self> {
        let components = components.into();
        if components.is_empty() {
            return Err(Error::input("A release number needs at least one component"));
        }
        Ok(Self { components })
    }

    /// Build a release from its leading component and any further ones.
    pub fn of(first: u32, rest: &[u32]) -> Self {
        let mut components = Vec::with_capacity(rest.len() + 1);
        components.push(first);
        components.extend_from_slice(rest);
        Self { components }
    }

    pub fn components(&self) -> &[u32] {
        &self.components
    }
}

impl fmt::Display for ReleaseNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(PREFIX.trim_end_matches('_'))?;
        for component in &self.components {
            write!(f, "_{component}")?;
        }
        Ok(())
    }
}

impl FromStr for ReleaseNumber {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::input(format!("Invalid release number: {s}"));
        let rest = s.strip_prefix(PREFIX).ok_or_else(invalid)?;
        let components = rest
            .split('_')
            .map(|part| part.parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(components)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_and_display() {
        let release: ReleaseNumber = "release_0_1".parse().unwrap();
        assert_eq!(release.components(), &[0, 1]);
        assert_eq!(release.to_string(), "release_0_1");
        assert_eq!(release, ReleaseNumber::of(0, &[1]));
    }

    #[test]
    fn test_ordering_is_numeric() {
        let r0: ReleaseNumber = "release_0".parse().unwrap();
        let r01: ReleaseNumber = "release_0_1".parse().unwrap();
        let r02: ReleaseNumber = "release_0_2".parse().unwrap();
        let r010: ReleaseNumber = "release_0_10".parse().unwrap();
        assert!(r0 < r01);
        assert!(r01 < r02);
        assert!(r02 < r010);
    }

    #[test]
    fn test_invalid() {
        for raw in ["", "release_", "release_a", "0_1", "release_0__1"] {
            let err = raw.parse::<ReleaseNumber>().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Input, "{raw}");
        }
    }
}
