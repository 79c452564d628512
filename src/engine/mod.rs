// src/engine/mod.rs

//! Package-management engine seam
//!
//! The daemon never resolves dependencies, fetches metadata or runs rpm
//! transactions itself; that happens behind the [`Engine`] trait. An
//! [`EngineFactory`] builds a fresh engine session for each lock period and
//! dropping the session disposes it.
//!
//! Engines provide two primitives, [`Engine::installed`] and
//! [`Engine::available`], plus whichever optional operations they support.
//! Listings (filters, name queries, search, history windows) are provided
//! methods derived from those, so every engine yields the same list semantics.
//! Optional operations an engine does not override fail with
//! [`Error::NotImplemented`].

pub mod memory;
pub mod query;

pub use memory::{Catalog, MemoryEngine, MemoryEngineFactory};

use crate::daemon::DaemonEvent;
use crate::error::{Error, Result};
use crate::package_id::PackageId;
use query::{
    SECS_PER_DAY, compile_glob, is_upgrade, iso_date, latest, merge_installed, name_matches,
    same_slot, sorted_unique,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::str::FromStr;

/// A package record as seen by the daemon
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub id: PackageId,
    pub summary: String,
    pub description: String,
    /// Download size in bytes
    pub size: u64,
    /// Build time (unix seconds)
    pub buildtime: i64,
    pub url: Option<String>,
    pub license: Option<String>,
    /// Names of packages this one obsoletes
    pub obsoletes: Vec<String>,
    pub tags: Vec<String>,
}

impl Package {
    /// Create a record with only an identity
    pub fn new(id: PackageId) -> Self {
        Self {
            id,
            summary: String::new(),
            description: String::new(),
            size: 0,
            buildtime: 0,
            url: None,
            license: None,
            obsoletes: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Look up a real attribute by name
    ///
    /// Returns `None` for unknown attributes. Known attributes without a value
    /// yield `Some(Value::Null)`.
    pub fn attribute(&self, attr: &str) -> Option<Value> {
        let value = match attr {
            "name" => json!(self.id.name),
            "epoch" => json!(self.id.epoch),
            "version" => json!(self.id.version),
            "release" => json!(self.id.release),
            "arch" => json!(self.id.arch),
            "repoid" | "ui_from_repo" => json!(self.id.origin),
            "reponame" => json!(self.id.repo()),
            "summary" => json!(self.summary),
            "description" => json!(self.description),
            "size" => json!(self.size),
            "buildtime" => json!(self.buildtime),
            "url" => json!(self.url),
            "license" => json!(self.license),
            "obsoletes" => json!(self.obsoletes),
            _ => return None,
        };
        Some(value)
    }

    /// Lowercased text of an attribute, for keyword search
    fn search_text(&self, field: &str) -> Option<String> {
        let text = match self.attribute(field)? {
            Value::Null => return None,
            Value::String(s) => s,
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" "),
            other => other.to_string(),
        };
        Some(text.to_lowercase())
    }
}

/// Named package lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFilter {
    Installed,
    Available,
    Updates,
    Obsoletes,
    Recent,
    Extras,
}

impl PackageFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageFilter::Installed => "installed",
            PackageFilter::Available => "available",
            PackageFilter::Updates => "updates",
            PackageFilter::Obsoletes => "obsoletes",
            PackageFilter::Recent => "recent",
            PackageFilter::Extras => "extras",
        }
    }
}

impl FromStr for PackageFilter {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "installed" => Ok(PackageFilter::Installed),
            "available" => Ok(PackageFilter::Available),
            "updates" => Ok(PackageFilter::Updates),
            "obsoletes" => Ok(PackageFilter::Obsoletes),
            "recent" => Ok(PackageFilter::Recent),
            "extras" => Ok(PackageFilter::Extras),
            _ => Err(format!("Invalid package filter: {s}")),
        }
    }
}

/// Action requested for a transaction member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransactionAction {
    Install,
    Update,
    Remove,
    Reinstall,
    Downgrade,
    Obsolete,
}

impl TransactionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionAction::Install => "install",
            TransactionAction::Update => "update",
            TransactionAction::Remove => "remove",
            TransactionAction::Reinstall => "reinstall",
            TransactionAction::Downgrade => "downgrade",
            TransactionAction::Obsolete => "obsolete",
        }
    }
}

impl FromStr for TransactionAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "install" => Ok(TransactionAction::Install),
            "update" | "updates" => Ok(TransactionAction::Update),
            "remove" | "erase" => Ok(TransactionAction::Remove),
            "reinstall" => Ok(TransactionAction::Reinstall),
            "downgrade" => Ok(TransactionAction::Downgrade),
            "obsolete" => Ok(TransactionAction::Obsolete),
            _ => Err(format!("Invalid transaction action: {s}")),
        }
    }
}

impl std::fmt::Display for TransactionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A package queued in (or resolved into) the session transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionMember {
    pub id: PackageId,
    pub action: TransactionAction,
    pub size: u64,
    /// Installed packages this member replaces
    pub replaces: Vec<PackageId>,
}

/// Stage tags carried by `TransactionEvent`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionStage {
    StartBuild,
    StartRun,
    Download,
    PkgToDownload,
    SignatureCheck,
    RunTestTransaction,
    RunTransaction,
    Fail,
    EndRun,
}

impl TransactionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStage::StartBuild => "start-build",
            TransactionStage::StartRun => "start-run",
            TransactionStage::Download => "download",
            TransactionStage::PkgToDownload => "pkg-to-download",
            TransactionStage::SignatureCheck => "signature-check",
            TransactionStage::RunTestTransaction => "run-test-transaction",
            TransactionStage::RunTransaction => "run-transaction",
            TransactionStage::Fail => "fail",
            TransactionStage::EndRun => "end-run",
        }
    }
}

/// Per-element rpm actions reported by `RPMProgress`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpmAction {
    Update,
    Erase,
    Install,
    Obsolete,
    Cleanup,
    Repackage,
}

/// A repository definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub baseurl: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metalink: Option<String>,
    #[serde(default)]
    pub gpgcheck: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpgkey: Option<GpgKey>,
}

fn default_true() -> bool {
    true
}

/// A repository signing key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpgKey {
    pub hexkeyid: String,
    #[serde(default)]
    pub userid: String,
    #[serde(default)]
    pub keyurl: String,
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub timestamp: i64,
}

/// A comps category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Ids of member groups
    #[serde(default)]
    pub groups: Vec<String>,
}

/// A comps group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mandatory: Vec<String>,
    #[serde(default)]
    pub default: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
    /// Set by the engine when every mandatory and default package is installed
    #[serde(default)]
    pub installed: bool,
}

/// A recorded history transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTransaction {
    pub tid: i64,
    /// End of the transaction (unix seconds)
    pub end_timestamp: i64,
    #[serde(default)]
    pub cmdline: String,
    #[serde(default)]
    pub packages: Vec<HistoryPackage>,
}

/// A package touched by a history transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPackage {
    pub id: PackageId,
    /// Transaction state, e.g. `Install`, `Erase`, `Update`, `Updated`
    pub state: String,
}

/// Parameters of a keyword search
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub fields: Vec<String>,
    pub keys: Vec<String>,
    pub match_all: bool,
    pub newest_only: bool,
    /// Also match package tags
    pub tags: bool,
}

impl SearchQuery {
    /// Whether a package satisfies the query
    pub fn matches(&self, pkg: &Package) -> bool {
        if self.keys.is_empty() {
            return false;
        }
        let texts: Vec<String> = self
            .fields
            .iter()
            .filter_map(|field| pkg.search_text(field))
            .collect();
        let tags: Vec<String> = if self.tags {
            pkg.tags.iter().map(|t| t.to_lowercase()).collect()
        } else {
            Vec::new()
        };

        let matched = self
            .keys
            .iter()
            .map(|k| k.to_lowercase())
            .filter(|key| {
                texts.iter().any(|t| t.contains(key.as_str()))
                    || tags.iter().any(|t| t.contains(key.as_str()))
            })
            .count();

        if self.match_all && self.keys.len() > 1 {
            matched == self.keys.len()
        } else {
            matched > 0
        }
    }
}

/// Receiver for engine progress and key-trust questions
pub trait EventSink {
    /// Publish a progress or transaction event
    fn emit(&self, event: DaemonEvent);

    /// Ask whether a signing key may be imported
    fn confirm_gpg_import(&self, pkg: &PackageId, key: &GpgKey) -> bool;
}

fn not_implemented<T>(operation: &str) -> Result<T> {
    Err(Error::NotImplemented(format!(
        "{} is not supported by this engine",
        operation
    )))
}

/// A package-management engine session
pub trait Engine: Send {
    /// Installed packages
    fn installed(&mut self) -> Result<Vec<Package>>;

    /// Every package in the enabled repositories, all versions
    fn available(&mut self) -> Result<Vec<Package>>;

    /// Packages for a named filter, sorted and without duplicates
    fn packages(&mut self, filter: PackageFilter, recent_days: u32) -> Result<Vec<Package>> {
        let pkgs = match filter {
            PackageFilter::Installed => self.installed()?,
            PackageFilter::Available => {
                let installed = self.installed()?;
                merge_installed(latest(self.available()?), &installed, false)
            }
            PackageFilter::Updates => self.upgrades()?,
            PackageFilter::Obsoletes => self.obsoletes()?,
            PackageFilter::Recent => {
                let limit = chrono::Utc::now().timestamp() - i64::from(recent_days) * SECS_PER_DAY;
                latest(self.available()?)
                    .into_iter()
                    .filter(|p| p.buildtime > limit)
                    .collect()
            }
            PackageFilter::Extras => {
                let available = self.available()?;
                self.installed()?
                    .into_iter()
                    .filter(|inst| !available.iter().any(|a| inst.id.same_nevra(&a.id)))
                    .collect()
            }
        };
        Ok(sorted_unique(pkgs))
    }

    /// Newest available builds that upgrade an installed package
    fn upgrades(&mut self) -> Result<Vec<Package>> {
        let installed = self.installed()?;
        Ok(latest(self.available()?)
            .into_iter()
            .filter(|p| is_upgrade(p, &installed))
            .collect())
    }

    /// Available packages obsoleting an installed package
    fn obsoletes(&mut self) -> Result<Vec<Package>> {
        let installed = self.installed()?;
        Ok(latest(self.available()?)
            .into_iter()
            .filter(|p| {
                p.obsoletes
                    .iter()
                    .any(|name| *name != p.id.name && installed.iter().any(|i| i.id.name == *name))
            })
            .collect())
    }

    /// Packages whose name matches a prefix or glob
    fn packages_by_name(&mut self, pattern: &str, newest_only: bool) -> Result<Vec<Package>> {
        let installed = self.installed()?;
        let mut candidates: Vec<Package> = installed
            .iter()
            .filter(|p| name_matches(pattern, &p.id.name))
            .cloned()
            .collect();
        candidates.extend(
            self.available()?
                .into_iter()
                .filter(|p| name_matches(pattern, &p.id.name)),
        );
        if newest_only {
            candidates = latest(candidates);
        }
        Ok(sorted_unique(merge_installed(candidates, &installed, true)))
    }

    /// Keyword search over package fields
    fn search(&mut self, query: &SearchQuery) -> Result<Vec<Package>> {
        let installed = self.installed()?;
        let mut hits: Vec<Package> = installed
            .iter()
            .filter(|p| query.matches(p))
            .cloned()
            .collect();
        hits.extend(self.available()?.into_iter().filter(|p| query.matches(p)));
        if query.newest_only {
            hits = latest(hits);
        }
        Ok(sorted_unique(merge_installed(hits, &installed, true)))
    }

    /// Resolve a package id to its record
    ///
    /// Installed ids are looked up among installed packages, anything else
    /// among available ones. An exact id match is preferred; otherwise the
    /// first record with the same name, version, release and arch is used.
    fn find(&mut self, id: &PackageId) -> Result<Option<Package>> {
        let pool = if id.is_installed() {
            self.installed()?
        } else {
            self.available()?
        };
        let exact = pool.iter().position(|p| p.id == *id);
        let index = exact.or_else(|| {
            pool.iter().position(|p| {
                p.id.name == id.name
                    && p.id.version == id.version
                    && p.id.release == id.release
                    && p.id.arch == id.arch
            })
        });
        Ok(index.map(|i| pool[i].clone()))
    }

    /// Available builds older than `pkg` in its slot
    fn downgrades(&mut self, pkg: &Package) -> Result<Vec<Package>> {
        let older = self
            .available()?
            .into_iter()
            .filter(|p| same_slot(p, pkg) && p.id.evr() < pkg.id.evr())
            .collect();
        Ok(sorted_unique(older))
    }

    /// Update advisory for a package, if any
    fn update_info(&mut self, _pkg: &Package) -> Result<Option<Value>> {
        not_implemented("update info")
    }

    /// Comps categories
    fn categories(&mut self) -> Result<Vec<Category>> {
        not_implemented("groups")
    }

    /// Comps groups
    fn groups(&mut self) -> Result<Vec<Group>> {
        not_implemented("groups")
    }

    /// Best packages of a group
    ///
    /// `all` includes optional packages; otherwise only mandatory and default
    /// ones. Unknown groups yield an empty list.
    fn group_packages(&mut self, group_id: &str, all: bool) -> Result<Vec<Package>> {
        let Some(group) = self.groups()?.into_iter().find(|g| g.id == group_id) else {
            return Ok(Vec::new());
        };

        let mut names: Vec<String> = group.mandatory;
        names.extend(group.default);
        if all {
            names.extend(group.optional);
        }

        let installed = self.installed()?;
        let mut candidates: Vec<Package> = installed
            .iter()
            .filter(|p| names.contains(&p.id.name))
            .cloned()
            .collect();
        candidates.extend(
            self.available()?
                .into_iter()
                .filter(|p| names.contains(&p.id.name)),
        );
        Ok(sorted_unique(merge_installed(
            latest(candidates),
            &installed,
            true,
        )))
    }

    /// All configured repositories
    fn repositories(&mut self) -> Result<Vec<Repository>> {
        not_implemented("repositories")
    }

    /// Repository ids matching a filter
    ///
    /// An empty filter or `enabled` lists enabled repositories; anything else
    /// is a glob over all repository ids.
    fn repository_ids(&mut self, filter: &str) -> Result<Vec<String>> {
        let repos = self.repositories()?;
        let mut ids: Vec<String> = if filter.is_empty() || filter == "enabled" {
            repos.into_iter().filter(|r| r.enabled).map(|r| r.id).collect()
        } else {
            let pattern = compile_glob(filter)?;
            repos
                .into_iter()
                .filter(|r| pattern.matches(&r.id))
                .map(|r| r.id)
                .collect()
        };
        ids.sort();
        Ok(ids)
    }

    /// Enable exactly the given repositories for this session
    fn set_enabled_repos(&mut self, _ids: &[String]) -> Result<()> {
        not_implemented("enabling repositories")
    }

    /// Read a configuration setting; `*` returns every setting
    fn config(&mut self, _setting: &str) -> Result<Option<Value>> {
        not_implemented("reading configuration")
    }

    /// Set a configuration setting for this session
    fn set_config(&mut self, _setting: &str, _value: Value) -> Result<bool> {
        not_implemented("changing configuration")
    }

    /// Recorded history transactions
    fn history(&mut self) -> Result<Vec<HistoryTransaction>> {
        not_implemented("history")
    }

    /// `(tid, date)` pairs for transactions ended between `start_days` and
    /// `end_days` ago
    fn history_by_days(&mut self, start_days: u32, end_days: u32) -> Result<Vec<(i64, String)>> {
        let now = chrono::Utc::now().timestamp();
        let newest = now - i64::from(start_days) * SECS_PER_DAY;
        let oldest = now - i64::from(end_days) * SECS_PER_DAY;
        let mut out: Vec<(i64, String)> = self
            .history()?
            .into_iter()
            .filter(|t| t.end_timestamp >= oldest && t.end_timestamp <= newest)
            .map(|t| (t.tid, iso_date(t.end_timestamp)))
            .collect();
        out.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(out)
    }

    /// `(tid, date)` pairs for transactions touching a matching package
    fn history_search(&mut self, patterns: &[String]) -> Result<Vec<(i64, String)>> {
        let mut out: Vec<(i64, String)> = self
            .history()?
            .into_iter()
            .filter(|t| {
                t.packages.iter().any(|p| {
                    patterns
                        .iter()
                        .any(|pat| !pat.is_empty() && name_matches(pat, &p.id.name))
                })
            })
            .map(|t| (t.tid, iso_date(t.end_timestamp)))
            .collect();
        out.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(out)
    }

    /// `(id, state, still installed)` for each package of a history transaction
    fn history_packages(&mut self, tid: i64) -> Result<Vec<(PackageId, String, bool)>> {
        let Some(trans) = self.history()?.into_iter().find(|t| t.tid == tid) else {
            return Ok(Vec::new());
        };
        let installed = self.installed()?;
        Ok(trans
            .packages
            .into_iter()
            .map(|p| {
                let present = installed.iter().any(|i| i.id.same_nevra(&p.id));
                (p.id, p.state, present)
            })
            .collect())
    }

    /// Queue a package with an action
    fn add_transaction(&mut self, _id: &PackageId, _action: TransactionAction) -> Result<()> {
        not_implemented("transactions")
    }

    /// Queue every package matched by a pattern; returns the number queued
    fn add_by_pattern(&mut self, _action: TransactionAction, _pattern: &str) -> Result<usize> {
        not_implemented("transactions")
    }

    /// Drop every queued member
    fn clear_transaction(&mut self) -> Result<()> {
        not_implemented("transactions")
    }

    /// Currently queued members
    fn transaction(&mut self) -> Result<Vec<TransactionMember>> {
        not_implemented("transactions")
    }

    /// Resolve the queued members into the full set of changes
    fn build_transaction(&mut self) -> Result<Vec<TransactionMember>> {
        not_implemented("transactions")
    }

    /// Execute the resolved transaction
    fn run_transaction(&mut self, _sink: &dyn EventSink) -> Result<()> {
        not_implemented("transactions")
    }
}

/// Builds engine sessions
pub trait EngineFactory: Send + Sync {
    /// Open a fresh engine session
    fn open(&self) -> Result<Box<dyn Engine>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare {
        installed: Vec<Package>,
        available: Vec<Package>,
    }

    impl Engine for Bare {
        fn installed(&mut self) -> Result<Vec<Package>> {
            Ok(self.installed.clone())
        }

        fn available(&mut self) -> Result<Vec<Package>> {
            Ok(self.available.clone())
        }
    }

    fn pkg(name: &str, version: &str, origin: &str) -> Package {
        let mut p = Package::new(PackageId::new(name, "0", version, "1", "x86_64", origin));
        p.summary = format!("{} summary", name);
        p
    }

    fn bare() -> Bare {
        Bare {
            installed: vec![pkg("foo", "1.0", "@System"), pkg("old", "1.0", "@System")],
            available: vec![
                pkg("foo", "1.0", "fedora"),
                pkg("foo", "2.0", "updates"),
                pkg("bar", "3.0", "fedora"),
            ],
        }
    }

    #[test]
    fn test_available_omits_installed_evr() {
        let mut engine = bare();
        let ids: Vec<String> = engine
            .packages(PackageFilter::Available, 7)
            .unwrap()
            .iter()
            .map(|p| p.id.encode())
            .collect();
        assert_eq!(
            ids,
            vec!["bar,0,3.0,1,x86_64,fedora", "foo,0,2.0,1,x86_64,updates"]
        );
    }

    #[test]
    fn test_updates_and_extras() {
        let mut engine = bare();
        let updates = engine.packages(PackageFilter::Updates, 7).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].id.version, "2.0");

        let extras = engine.packages(PackageFilter::Extras, 7).unwrap();
        assert_eq!(extras.len(), 1);
        assert_eq!(extras[0].id.name, "old");
    }

    #[test]
    fn test_by_name_prefers_installed_record() {
        let mut engine = bare();
        let all = engine.packages_by_name("foo", false).unwrap();
        let origins: Vec<&str> = all.iter().map(|p| p.id.origin.as_str()).collect();
        assert_eq!(origins, vec!["@System", "updates"]);

        let newest = engine.packages_by_name("fo*", true).unwrap();
        assert_eq!(newest.len(), 1);
        assert_eq!(newest[0].id.version, "2.0");
    }

    #[test]
    fn test_search_match_all() {
        let mut engine = bare();
        let query = SearchQuery {
            fields: vec!["name".into(), "summary".into()],
            keys: vec!["bar".into(), "SUMMARY".into()],
            match_all: true,
            ..Default::default()
        };
        let hits = engine.search(&query).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.name, "bar");

        let any = SearchQuery {
            match_all: false,
            ..query
        };
        // the installed foo twin collapses into its installed record
        assert_eq!(engine.search(&any).unwrap().len(), 4);
    }

    #[test]
    fn test_find_uses_installed_sentinel() {
        let mut engine = bare();
        let id = PackageId::new("foo", "0", "1.0", "1", "x86_64", "@anything");
        let found = engine.find(&id).unwrap().unwrap();
        assert_eq!(found.id.origin, "@System");

        let missing = PackageId::new("nope", "0", "1.0", "1", "x86_64", "fedora");
        assert!(engine.find(&missing).unwrap().is_none());
    }

    #[test]
    fn test_optional_operations_not_implemented() {
        let mut engine = bare();
        assert!(matches!(engine.groups(), Err(Error::NotImplemented(_))));
        assert!(matches!(
            engine.run_transaction(&NullSink),
            Err(Error::NotImplemented(_))
        ));
    }

    struct NullSink;

    impl EventSink for NullSink {
        fn emit(&self, _event: DaemonEvent) {}

        fn confirm_gpg_import(&self, _pkg: &PackageId, _key: &GpgKey) -> bool {
            false
        }
    }

    #[test]
    fn test_attribute_lookup() {
        let p = pkg("foo", "1.0", "@System");
        assert_eq!(p.attribute("summary"), Some(json!("foo summary")));
        assert_eq!(p.attribute("url"), Some(Value::Null));
        assert_eq!(p.attribute("reponame"), Some(json!("System")));
        assert_eq!(p.attribute("nonsense"), None);
    }
}
