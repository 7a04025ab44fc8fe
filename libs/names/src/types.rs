//! Name type definitions.
//!
//! Host and partition names come from worker relation data; unit names come
//! from the unit environment and from leader settings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::define_name;
use crate::NameError;

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;
const MAX_PARTITION_LEN: usize = 64;

fn validate_hostname(kind: &'static str, s: &str) -> Result<(), NameError> {
    if s.is_empty() {
        return Err(NameError::Empty { kind });
    }
    if s.len() > MAX_HOSTNAME_LEN {
        return Err(NameError::TooLong {
            kind,
            max: MAX_HOSTNAME_LEN,
            actual: s.to_string(),
        });
    }

    for label in s.split('.') {
        if label.is_empty() {
            return Err(NameError::InvalidCharacter {
                kind,
                character: '.',
                actual: s.to_string(),
            });
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(NameError::TooLong {
                kind,
                max: MAX_LABEL_LEN,
                actual: s.to_string(),
            });
        }
        if let Some(c) = label
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-'))
        {
            return Err(NameError::InvalidCharacter {
                kind,
                character: c,
                actual: s.to_string(),
            });
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(NameError::InvalidCharacter {
                kind,
                character: '-',
                actual: s.to_string(),
            });
        }
    }

    Ok(())
}

fn validate_partition(kind: &'static str, s: &str) -> Result<(), NameError> {
    if s.is_empty() {
        return Err(NameError::Empty { kind });
    }
    if s.len() > MAX_PARTITION_LEN {
        return Err(NameError::TooLong {
            kind,
            max: MAX_PARTITION_LEN,
            actual: s.to_string(),
        });
    }
    // '=' ',' and whitespace would break the rendered scheduler config line.
    match s
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        Some(c) => Err(NameError::InvalidCharacter {
            kind,
            character: c,
            actual: s.to_string(),
        }),
        None => Ok(()),
    }
}

define_name!(Hostname, "hostname", validate_hostname);
define_name!(PartitionName, "partition name", validate_partition);

/// A unit of a deployed application, `{application}/{number}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitName {
    application: String,
    number: u32,
}

impl UnitName {
    /// Human-readable kind used in error messages.
    pub const KIND: &'static str = "unit name";

    /// Builds a unit name from its parts.
    pub fn new(application: &str, number: u32) -> Result<Self, NameError> {
        validate_application(application)?;
        Ok(Self {
            application: application.to_string(),
            number,
        })
    }

    /// Parses a unit name of the form `{application}/{number}`.
    pub fn parse(s: &str) -> Result<Self, NameError> {
        if s.is_empty() {
            return Err(NameError::Empty { kind: Self::KIND });
        }

        let Some((application, number)) = s.rsplit_once('/') else {
            return Err(NameError::MissingSeparator(s.to_string()));
        };

        if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
            return Err(NameError::InvalidUnitNumber(s.to_string()));
        }
        let number = number
            .parse::<u32>()
            .map_err(|_| NameError::InvalidUnitNumber(s.to_string()))?;

        Self::new(application, number)
    }

    /// The application part.
    #[must_use]
    pub fn application(&self) -> &str {
        &self.application
    }

    /// The unit number.
    #[must_use]
    pub fn number(&self) -> u32 {
        self.number
    }

    /// `application-number`, usable as a file or directory name.
    #[must_use]
    pub fn slug(&self) -> String {
        format!("{}-{}", self.application, self.number)
    }
}

fn validate_application(s: &str) -> Result<(), NameError> {
    const KIND: &str = "application name";

    let Some(first) = s.chars().next() else {
        return Err(NameError::Empty { kind: KIND });
    };
    if !first.is_ascii_lowercase() {
        return Err(NameError::InvalidCharacter {
            kind: KIND,
            character: first,
            actual: s.to_string(),
        });
    }
    match s
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        Some(c) => Err(NameError::InvalidCharacter {
            kind: KIND,
            character: c,
            actual: s.to_string(),
        }),
        None => Ok(()),
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.application, self.number)
    }
}

impl FromStr for UnitName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for UnitName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UnitName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
