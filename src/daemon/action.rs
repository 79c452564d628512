// src/daemon/action.rs

//! Derived package actions
//!
//! The action a client would take on a listed package is never stored; it is
//! derived from the installed set and the session's obsoletes list.

use crate::engine::Package;
use crate::engine::query::is_upgrade;
use std::fmt;

/// What applying a listed package would do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageAction {
    Install,
    Update,
    Remove,
    Obsolete,
    Downgrade,
}

impl PackageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageAction::Install => "install",
            PackageAction::Update => "updates",
            PackageAction::Remove => "remove",
            PackageAction::Obsolete => "obsolete",
            PackageAction::Downgrade => "downgrade",
        }
    }
}

impl fmt::Display for PackageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify `pkg` against the installed set and the obsoleting packages
///
/// Updates compare against installed builds of the same (name, arch);
/// downgrades against any installed build of the same name.
pub fn classify(pkg: &Package, installed: &[Package], obsoletes: &[Package]) -> PackageAction {
    if pkg.id.is_installed() {
        PackageAction::Remove
    } else if is_upgrade(pkg, installed) {
        PackageAction::Update
    } else if obsoletes.iter().any(|o| o.id == pkg.id) {
        PackageAction::Obsolete
    } else if has_newer_installed(pkg, installed) {
        PackageAction::Downgrade
    } else {
        PackageAction::Install
    }
}

fn has_newer_installed(pkg: &Package, installed: &[Package]) -> bool {
    installed
        .iter()
        .any(|inst| inst.id.name == pkg.id.name && inst.id.evr() > pkg.id.evr())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package_id::PackageId;

    fn pkg(name: &str, version: &str, arch: &str, origin: &str) -> Package {
        Package::new(PackageId::new(name, "0", version, "1", arch, origin))
    }

    fn installed() -> Vec<Package> {
        vec![pkg("foo", "1.0", "x86_64", "@System")]
    }

    #[test]
    fn test_installed_is_remove() {
        let foo = installed().remove(0);
        assert_eq!(classify(&foo, &installed(), &[]), PackageAction::Remove);
    }

    #[test]
    fn test_newer_is_update() {
        let foo2 = pkg("foo", "2.0", "x86_64", "updates");
        assert_eq!(classify(&foo2, &installed(), &[]), PackageAction::Update);
        assert_eq!(PackageAction::Update.as_str(), "updates");
    }

    #[test]
    fn test_older_is_downgrade() {
        let foo09 = pkg("foo", "0.9", "x86_64", "fedora");
        assert_eq!(classify(&foo09, &installed(), &[]), PackageAction::Downgrade);
    }

    #[test]
    fn test_older_other_arch_is_downgrade() {
        let foo09 = pkg("foo", "0.9", "i686", "fedora");
        assert_eq!(classify(&foo09, &installed(), &[]), PackageAction::Downgrade);
    }

    #[test]
    fn test_newer_other_arch_is_install() {
        let foo2 = pkg("foo", "2.0", "i686", "updates");
        assert_eq!(classify(&foo2, &installed(), &[]), PackageAction::Install);
        let bar = pkg("bar", "1.0", "noarch", "fedora");
        assert_eq!(classify(&bar, &installed(), &[]), PackageAction::Install);
    }

    #[test]
    fn test_obsoleting_package() {
        let modern = pkg("modern", "1.0", "noarch", "updates");
        let obsoletes = vec![modern.clone()];
        assert_eq!(classify(&modern, &installed(), &obsoletes), PackageAction::Obsolete);
    }
}
