// src/engine/query.rs

//! Derived package queries shared by every engine

use super::Package;
use crate::error::{Error, Result};
use chrono::DateTime;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Seconds per day, for day-based windows
pub const SECS_PER_DAY: i64 = 86_400;

/// Whether two packages carry the same epoch-version-release
pub fn same_evr(a: &Package, b: &Package) -> bool {
    a.id.evr().cmp(&b.id.evr()) == Ordering::Equal
}

/// Whether two packages share a (name, arch) slot
pub fn same_slot(a: &Package, b: &Package) -> bool {
    a.id.name == b.id.name && a.id.arch == b.id.arch
}

/// Keep only the newest build of each (name, arch)
///
/// On equal EVR the first package seen wins, so callers list installed
/// packages first to prefer the installed record.
pub fn latest(pkgs: Vec<Package>) -> Vec<Package> {
    let mut best: HashMap<(String, String), Package> = HashMap::new();
    for pkg in pkgs {
        let key = (pkg.id.name.clone(), pkg.id.arch.clone());
        match best.get(&key) {
            Some(current) if current.id.evr() >= pkg.id.evr() => {}
            _ => {
                best.insert(key, pkg);
            }
        }
    }
    sorted_unique(best.into_values().collect())
}

/// Swap available builds for their installed counterpart
///
/// An available package whose (name, arch) is installed with the same EVR is
/// replaced by the installed record, or dropped when `replace` is false.
pub fn merge_installed(pkgs: Vec<Package>, installed: &[Package], replace: bool) -> Vec<Package> {
    let mut out = Vec::with_capacity(pkgs.len());
    for pkg in pkgs {
        if pkg.id.is_installed() {
            out.push(pkg);
            continue;
        }
        let twin = installed
            .iter()
            .find(|inst| same_slot(inst, &pkg) && same_evr(inst, &pkg));
        match twin {
            Some(inst) => {
                if replace {
                    out.push(inst.clone());
                }
            }
            None => out.push(pkg),
        }
    }
    out
}

/// Sort by encoded id and drop duplicates
pub fn sorted_unique(mut pkgs: Vec<Package>) -> Vec<Package> {
    pkgs.sort_by(|a, b| a.id.encode().cmp(&b.id.encode()));
    pkgs.dedup_by(|a, b| a.id == b.id);
    pkgs
}

/// Whether `pkg` is newer than every installed build in its slot
pub fn is_upgrade(pkg: &Package, installed: &[Package]) -> bool {
    let mut slot = installed.iter().filter(|inst| same_slot(inst, pkg)).peekable();
    slot.peek().is_some() && slot.all(|inst| pkg.id.evr() > inst.id.evr())
}

/// Whether an installed build in the same slot is newer than `pkg`
pub fn is_downgrade(pkg: &Package, installed: &[Package]) -> bool {
    installed
        .iter()
        .any(|inst| same_slot(inst, pkg) && inst.id.evr() > pkg.id.evr())
}

/// Match a package name against a user pattern
///
/// Patterns with glob metacharacters are matched as globs, anything else is a
/// name prefix.
pub fn name_matches(pattern: &str, name: &str) -> bool {
    if pattern.contains(['*', '?', '[']) {
        glob::Pattern::new(pattern)
            .map(|p| p.matches(name))
            .unwrap_or(false)
    } else {
        name.starts_with(pattern)
    }
}

/// Compile a glob, reporting bad patterns as service errors
pub fn compile_glob(pattern: &str) -> Result<glob::Pattern> {
    glob::Pattern::new(pattern)
        .map_err(|e| Error::Service(format!("invalid pattern '{}': {}", pattern, e)))
}

/// Render a unix timestamp as an ISO 8601 date-time (UTC, no offset)
pub fn iso_date(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package_id::PackageId;

    fn pkg(name: &str, version: &str, arch: &str, origin: &str) -> Package {
        Package::new(PackageId::new(name, "0", version, "1", arch, origin))
    }

    #[test]
    fn test_latest_prefers_newest_then_first() {
        let pkgs = vec![
            pkg("foo", "1.0", "x86_64", "@System"),
            pkg("foo", "1.0", "x86_64", "fedora"),
            pkg("foo", "0.9", "x86_64", "fedora"),
            pkg("foo", "2.0", "i686", "fedora"),
        ];
        let out = latest(pkgs);
        assert_eq!(out.len(), 2);
        assert!(out.iter().any(|p| p.id.origin == "@System"));
        assert!(out.iter().any(|p| p.id.arch == "i686"));
    }

    #[test]
    fn test_merge_installed() {
        let installed = vec![pkg("foo", "1.0", "x86_64", "@System")];
        let available = vec![
            pkg("foo", "1.0", "x86_64", "fedora"),
            pkg("foo", "2.0", "x86_64", "updates"),
        ];

        let replaced = merge_installed(available.clone(), &installed, true);
        assert_eq!(replaced.len(), 2);
        assert!(replaced.iter().any(|p| p.id.origin == "@System"));

        let dropped = merge_installed(available, &installed, false);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].id.version, "2.0");
    }

    #[test]
    fn test_upgrade_and_downgrade() {
        let installed = vec![pkg("foo", "1.0", "x86_64", "@System")];
        assert!(is_upgrade(&pkg("foo", "2.0", "x86_64", "fedora"), &installed));
        assert!(!is_upgrade(&pkg("foo", "2.0", "i686", "fedora"), &installed));
        assert!(is_downgrade(&pkg("foo", "0.9", "x86_64", "fedora"), &installed));
        assert!(!is_downgrade(&pkg("foo", "0.9", "aarch64", "fedora"), &installed));
    }

    #[test]
    fn test_name_matches() {
        assert!(name_matches("fir", "firefox"));
        assert!(!name_matches("fox", "firefox"));
        assert!(name_matches("*fox", "firefox"));
        assert!(name_matches("python3-?equests", "python3-requests"));
    }

    #[test]
    fn test_iso_date() {
        assert_eq!(iso_date(0), "1970-01-01T00:00:00");
        assert_eq!(iso_date(1_700_000_000), "2023-11-14T22:13:20");
    }
}
