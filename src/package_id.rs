// src/package_id.rs

//! Package identity codec
//!
//! A package id is the wire-level primary key for a package:
//! `name,epoch,version,release,arch,origin`. The origin is the repository a
//! package comes from, or a repository name prefixed with `@` when the package
//! is installed.
//!
//! Fields are joined without escaping. Engines must never produce field values
//! containing a comma.

use crate::error::{Error, Result};
use crate::version::RpmVersion;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Field delimiter
pub const DELIMITER: char = ',';

/// Origin prefix marking an installed package
pub const INSTALLED_SENTINEL: char = '@';

/// Number of fields in an encoded id
const FIELD_COUNT: usize = 6;

/// Composite identity of a package
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId {
    pub name: String,
    pub epoch: String,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub origin: String,
}

impl PackageId {
    /// Create a package id from its fields
    pub fn new(
        name: impl Into<String>,
        epoch: impl Into<String>,
        version: impl Into<String>,
        release: impl Into<String>,
        arch: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            epoch: epoch.into(),
            version: version.into(),
            release: release.into(),
            arch: arch.into(),
            origin: origin.into(),
        }
    }

    /// Encode as `name,epoch,version,release,arch,origin`
    pub fn encode(&self) -> String {
        [
            self.name.as_str(),
            self.epoch.as_str(),
            self.version.as_str(),
            self.release.as_str(),
            self.arch.as_str(),
            self.origin.as_str(),
        ]
        .join(",")
    }

    /// Decode an encoded id
    ///
    /// Never consults an engine; resolving the id to a package record is a
    /// separate lookup.
    pub fn decode(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split(DELIMITER).collect();
        if fields.len() != FIELD_COUNT {
            return Err(Error::MalformedId {
                id: s.to_string(),
                reason: format!("expected {} fields, found {}", FIELD_COUNT, fields.len()),
            });
        }
        if fields[0].is_empty() {
            return Err(Error::MalformedId {
                id: s.to_string(),
                reason: "empty package name".to_string(),
            });
        }

        Ok(Self::new(
            fields[0], fields[1], fields[2], fields[3], fields[4], fields[5],
        ))
    }

    /// Whether the origin marks an installed package
    pub fn is_installed(&self) -> bool {
        self.origin.starts_with(INSTALLED_SENTINEL)
    }

    /// Repository name without the installed marker
    pub fn repo(&self) -> &str {
        self.origin.trim_start_matches(INSTALLED_SENTINEL)
    }

    /// Parsed epoch-version-release for ordering
    pub fn evr(&self) -> RpmVersion {
        let epoch = self.epoch.parse::<u64>().unwrap_or(0);
        RpmVersion::from_parts(epoch, &self.version, &self.release)
    }

    /// Whether two ids name the same build, ignoring origin
    pub fn same_nevra(&self, other: &PackageId) -> bool {
        self.name == other.name
            && self.arch == other.arch
            && self.version == other.version
            && self.release == other.release
            && self.evr() == other.evr()
    }

    /// `name-version-release.arch`, for log messages and history
    pub fn nvra(&self) -> String {
        format!("{}-{}-{}.{}", self.name, self.version, self.release, self.arch)
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for PackageId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

impl Serialize for PackageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for PackageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Encode a list of ids, sorted and without duplicates
pub fn to_id_list<'a, I>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a PackageId>,
{
    let mut out: Vec<String> = ids.into_iter().map(PackageId::encode).collect();
    out.sort();
    out.dedup();
    out
}
