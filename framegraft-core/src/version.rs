//! Semantic versions shared by the SDK, plugins, drivers and the OS check.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// On the wire a version is its display form, "major.minor.patch".
impl serde::Serialize for Version {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Version {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::Deserialize as _;
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version string '{0}'")]
pub struct ParseVersionError(String);

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut next = || -> Result<u32, ParseVersionError> {
            parts
                .next()
                .ok_or_else(|| ParseVersionError(s.to_string()))?
                .parse()
                .map_err(|_| ParseVersionError(s.to_string()))
        };
        let version = Version { major: next()?, minor: next()?, patch: next()? };
        if parts.next().is_some() {
            return Err(ParseVersionError(s.to_string()));
        }
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_orders() {
        let v: Version = "2.10.3".parse().unwrap();
        assert_eq!(v, Version::new(2, 10, 3));
        assert!(Version::new(2, 10, 3) > Version::new(2, 9, 30));
        assert!(Version::new(1, 0, 0) < Version::new(1, 0, 1));
        assert_eq!(v.to_string(), "2.10.3");
    }

    #[test]
    fn serde_round_trips_as_display_form() {
        let v = Version::new(10, 0, 19041);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"10.0.19041\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!("1.2".parse::<Version>().is_err());
        assert!("1.2.3.4".parse::<Version>().is_err());
        assert!("1.x.3".parse::<Version>().is_err());
    }
}
