// src/version/mod.rs

//! RPM version handling
//!
//! Parsing and ordering of `[epoch:]version[-release]` strings. Ordering
//! follows rpm's segment comparison (`rpmvercmp`), including the `~`
//! (pre-release) and `^` (post-release snapshot) markers.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

/// A parsed RPM version with epoch, version, and release components
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RpmVersion {
    pub epoch: u64,
    pub version: String,
    pub release: Option<String>,
}

impl RpmVersion {
    /// Build a version from already separated fields
    pub fn from_parts(epoch: u64, version: &str, release: &str) -> Self {
        Self {
            epoch,
            version: version.to_string(),
            release: if release.is_empty() {
                None
            } else {
                Some(release.to_string())
            },
        }
    }

    /// Parse an RPM version string
    ///
    /// Format: [epoch:]version[-release]
    /// Examples:
    /// - "1.2.3" → epoch=0, version="1.2.3", release=None
    /// - "2:1.2.3" → epoch=2, version="1.2.3", release=None
    /// - "1:2.3.4-5.fc40" → epoch=1, version="2.3.4", release=Some("5.fc40")
    pub fn parse(s: &str) -> Result<Self> {
        let (epoch_str, rest) = match s.split_once(':') {
            Some((e, r)) => (e, r),
            None => ("0", s),
        };

        let epoch = if epoch_str.is_empty() {
            0
        } else {
            epoch_str.parse::<u64>().map_err(|e| {
                Error::Service(format!("Invalid epoch in version '{}': {}", s, e))
            })?
        };

        let (version, release) = match rest.rsplit_once('-') {
            Some((v, r)) => (v.to_string(), Some(r.to_string())),
            None => (rest.to_string(), None),
        };

        if version.is_empty() {
            return Err(Error::Service(format!(
                "Empty version component in '{}'",
                s
            )));
        }

        Ok(Self {
            epoch,
            version,
            release,
        })
    }

    /// Compare two RPM versions
    ///
    /// A missing release compares equal to any release, matching how rpm
    /// treats version-only requirements.
    pub fn compare(&self, other: &RpmVersion) -> Ordering {
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match rpmvercmp(&self.version, &other.version) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match (&self.release, &other.release) {
            (Some(a), Some(b)) => rpmvercmp(a, b),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for RpmVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.version)?;
        if let Some(ref release) = self.release {
            write!(f, "-{}", release)?;
        }
        Ok(())
    }
}

impl Ord for RpmVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for RpmVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn is_separator(c: u8) -> bool {
    !c.is_ascii_alphanumeric() && c != b'~' && c != b'^'
}

/// Compare two version (or release) strings segment by segment
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0usize, 0usize);

    loop {
        while i < a.len() && is_separator(a[i]) {
            i += 1;
        }
        while j < b.len() && is_separator(b[j]) {
            j += 1;
        }

        // '~' sorts before everything, even the end of the string
        let (a_tilde, b_tilde) = (a.get(i) == Some(&b'~'), b.get(j) == Some(&b'~'));
        if a_tilde || b_tilde {
            if !a_tilde {
                return Ordering::Greater;
            }
            if !b_tilde {
                return Ordering::Less;
            }
            i += 1;
            j += 1;
            continue;
        }

        // '^' sorts after the end of the string but before anything else
        let (a_caret, b_caret) = (a.get(i) == Some(&b'^'), b.get(j) == Some(&b'^'));
        if a_caret || b_caret {
            if i >= a.len() {
                return Ordering::Less;
            }
            if j >= b.len() {
                return Ordering::Greater;
            }
            if !a_caret {
                return Ordering::Greater;
            }
            if !b_caret {
                return Ordering::Less;
            }
            i += 1;
            j += 1;
            continue;
        }

        if i >= a.len() || j >= b.len() {
            break;
        }

        let numeric = a[i].is_ascii_digit();
        let segment_end = |s: &[u8], start: usize| {
            let mut end = start;
            while end < s.len()
                && (if numeric {
                    s[end].is_ascii_digit()
                } else {
                    s[end].is_ascii_alphabetic()
                })
            {
                end += 1;
            }
            end
        };

        let (a_end, b_end) = (segment_end(a, i), segment_end(b, j));
        let (seg_a, seg_b) = (&a[i..a_end], &b[j..b_end]);

        // Segments of different types: numeric is newer
        if seg_b.is_empty() {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let ord = if numeric {
            let trim = |s: &[u8]| -> usize { s.iter().take_while(|&&c| c == b'0').count() };
            let (na, nb) = (&seg_a[trim(seg_a)..], &seg_b[trim(seg_b)..]);
            na.len().cmp(&nb.len()).then_with(|| na.cmp(nb))
        } else {
            seg_a.cmp(seg_b)
        };

        if ord != Ordering::Equal {
            return ord;
        }

        i = a_end;
        j = b_end;
    }

    match (i >= a.len(), j >= b.len()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        _ => Ordering::Greater,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpm_version_parse_simple() {
        let v = RpmVersion::parse("1.2.3").unwrap();
        assert_eq!(v.epoch, 0);
        assert_eq!(v.version, "1.2.3");
        assert_eq!(v.release, None);
    }

    #[test]
    fn test_rpm_version_parse_full() {
        let v = RpmVersion::parse("1:2.3.4-5.fc40").unwrap();
        assert_eq!(v.epoch, 1);
        assert_eq!(v.version, "2.3.4");
        assert_eq!(v.release, Some("5.fc40".to_string()));
    }

    #[test]
    fn test_rpm_version_parse_empty_epoch() {
        let v = RpmVersion::parse(":1.02.208-2.fc43").unwrap();
        assert_eq!(v.epoch, 0);
        assert_eq!(v.version, "1.02.208");
    }

    #[test]
    fn test_rpm_version_parse_rejects_empty_version() {
        assert!(RpmVersion::parse("1:").is_err());
        assert!(RpmVersion::parse("x:1.0").is_err());
    }

    #[test]
    fn test_epoch_wins() {
        let v1 = RpmVersion::parse("1:1.0-1").unwrap();
        let v2 = RpmVersion::parse("0:2.0-1").unwrap();
        assert!(v1 > v2);
    }

    #[test]
    fn test_release_ordering() {
        let v1 = RpmVersion::from_parts(0, "1.0", "1");
        let v2 = RpmVersion::from_parts(0, "1.0", "2");
        assert!(v1 < v2);
    }

    #[test]
    fn test_rpmvercmp_segments() {
        assert_eq!(rpmvercmp("1.0", "1.0"), Ordering::Equal);
        assert_eq!(rpmvercmp("1.10", "1.9"), Ordering::Greater);
        assert_eq!(rpmvercmp("1.0a", "1.0"), Ordering::Greater);
        assert_eq!(rpmvercmp("1.0", "1.0.1"), Ordering::Less);
        assert_eq!(rpmvercmp("2.0", "2a"), Ordering::Greater);
        assert_eq!(rpmvercmp("001", "1"), Ordering::Equal);
        assert_eq!(rpmvercmp("fc40", "fc9"), Ordering::Greater);
    }

    #[test]
    fn test_rpmvercmp_tilde_and_caret() {
        assert_eq!(rpmvercmp("1.0~rc1", "1.0"), Ordering::Less);
        assert_eq!(rpmvercmp("1.0~rc1", "1.0~rc2"), Ordering::Less);
        assert_eq!(rpmvercmp("1.0^git1", "1.0"), Ordering::Greater);
        assert_eq!(rpmvercmp("1.0^git1", "1.0.1"), Ordering::Less);
    }

    #[test]
    fn test_rpm_version_display() {
        assert_eq!(RpmVersion::parse("1.2.3").unwrap().to_string(), "1.2.3");
        assert_eq!(
            RpmVersion::parse("2:1.2.3-4.el8").unwrap().to_string(),
            "2:1.2.3-4.el8"
        );
    }
}
