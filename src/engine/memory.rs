// src/engine/memory.rs

//! Catalogue-backed engine
//!
//! The catalogue is a JSON document describing installed packages,
//! repositories (with their packages), comps groups, history, configuration
//! and update advisories. Each engine session works on a snapshot of the
//! shared system catalogue; a successful transaction commits the new installed
//! set, imported keys and a history record back to the shared copy.
//!
//! Transactions are simulated: no dependency resolution happens, downloads
//! and rpm steps are reported as progress events and complete instantly.

use super::query::{is_downgrade, is_upgrade, latest, same_evr, same_slot};
use super::{
    Category, Engine, EngineFactory, EventSink, Group, HistoryPackage, HistoryTransaction,
    Package, Repository, RpmAction, TransactionAction, TransactionMember, TransactionStage,
};
use crate::daemon::DaemonEvent;
use crate::error::{Error, Result};
use crate::package_id::{INSTALLED_SENTINEL, PackageId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Repository name used for installed packages with no recorded origin
const SYSTEM_REPO: &str = "System";

/// A package entry in the catalogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    #[serde(default = "default_epoch")]
    pub epoch: String,
    pub version: String,
    pub release: String,
    pub arch: String,
    /// Repository an installed package came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_repo: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub buildtime: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obsoletes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn default_epoch() -> String {
    "0".to_string()
}

impl PackageRecord {
    fn to_package(&self, origin: String) -> Package {
        Package {
            id: PackageId::new(
                &self.name,
                &self.epoch,
                &self.version,
                &self.release,
                &self.arch,
                origin,
            ),
            summary: self.summary.clone(),
            description: self.description.clone(),
            size: self.size,
            buildtime: self.buildtime,
            url: self.url.clone(),
            license: self.license.clone(),
            obsoletes: self.obsoletes.clone(),
            tags: self.tags.clone(),
        }
    }

    fn installed_origin(&self) -> String {
        format!(
            "{}{}",
            INSTALLED_SENTINEL,
            self.from_repo.as_deref().unwrap_or(SYSTEM_REPO)
        )
    }

    fn installed_from(pkg: &Package) -> Self {
        Self {
            name: pkg.id.name.clone(),
            epoch: pkg.id.epoch.clone(),
            version: pkg.id.version.clone(),
            release: pkg.id.release.clone(),
            arch: pkg.id.arch.clone(),
            from_repo: Some(pkg.id.repo().to_string()),
            summary: pkg.summary.clone(),
            description: pkg.description.clone(),
            size: pkg.size,
            buildtime: pkg.buildtime,
            url: pkg.url.clone(),
            license: pkg.license.clone(),
            obsoletes: pkg.obsoletes.clone(),
            tags: pkg.tags.clone(),
        }
    }
}

/// A repository with its packages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoEntry {
    #[serde(flatten)]
    pub repo: Repository,
    #[serde(default)]
    pub packages: Vec<PackageRecord>,
}

/// The whole simulated system
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub installed: Vec<PackageRecord>,
    #[serde(default)]
    pub repos: Vec<RepoEntry>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub history: Vec<HistoryTransaction>,
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Update advisories keyed by `name-version-release.arch`
    #[serde(default)]
    pub updateinfo: HashMap<String, Value>,
    /// Hex ids of signing keys already trusted
    #[serde(default)]
    pub imported_keys: Vec<String>,
}

impl Catalog {
    /// Load a catalogue from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let catalog = serde_json::from_str(&content)?;
        debug!("Loaded catalogue from {}", path.display());
        Ok(catalog)
    }
}

/// Factory handing out sessions over a shared catalogue
#[derive(Clone, Default)]
pub struct MemoryEngineFactory {
    system: Arc<Mutex<Catalog>>,
}

impl MemoryEngineFactory {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            system: Arc::new(Mutex::new(catalog)),
        }
    }

    /// Load the catalogue at `path`
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(Catalog::load(path)?))
    }

    /// Current committed system state
    pub fn snapshot(&self) -> Catalog {
        self.system.lock().clone()
    }
}

impl EngineFactory for MemoryEngineFactory {
    fn open(&self) -> Result<Box<dyn Engine>> {
        Ok(Box::new(MemoryEngine::new(self.system.clone())))
    }
}

/// One engine session over a catalogue snapshot
pub struct MemoryEngine {
    system: Arc<Mutex<Catalog>>,
    catalog: Catalog,
    queue: Vec<TransactionMember>,
    resolved: Option<Vec<TransactionMember>>,
}

/// Treat a pattern as a glob when it has metacharacters, else as an exact name
fn pattern_matches(pattern: &str, name: &str) -> bool {
    if pattern.is_empty() || pattern == "*" {
        return true;
    }
    if pattern.contains(['*', '?', '[']) {
        glob::Pattern::new(pattern)
            .map(|p| p.matches(name))
            .unwrap_or(false)
    } else {
        pattern == name
    }
}

/// Human-readable byte count for progress messages
/// A queued member whose package left the enabled repositories
fn no_longer_available(id: &PackageId) -> Error {
    Error::Transaction(format!("{} is no longer available", id))
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "kB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1000.0 && unit < UNITS.len() - 1 {
        size /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

impl MemoryEngine {
    pub fn new(system: Arc<Mutex<Catalog>>) -> Self {
        let catalog = system.lock().clone();
        Self {
            system,
            catalog,
            queue: Vec::new(),
            resolved: None,
        }
    }

    fn repo(&self, id: &str) -> Option<&RepoEntry> {
        self.catalog.repos.iter().find(|r| r.repo.id == id)
    }

    fn enqueue(&mut self, pkg: &Package, action: TransactionAction) {
        self.resolved = None;
        self.queue.retain(|m| m.id != pkg.id);
        self.queue.push(TransactionMember {
            id: pkg.id.clone(),
            action,
            size: pkg.size,
            replaces: Vec::new(),
        });
    }

    /// Work out what a queued member replaces, rejecting impossible requests
    fn resolve_member(
        &mut self,
        member: &TransactionMember,
        installed: &[Package],
    ) -> Result<TransactionMember> {
        let pkg = self
            .find(&member.id)?
            .ok_or_else(|| no_longer_available(&member.id))?;
        let slot: Vec<PackageId> = installed
            .iter()
            .filter(|i| same_slot(i, &pkg))
            .map(|i| i.id.clone())
            .collect();
        let nvra = pkg.id.nvra();

        let replaces = match member.action {
            TransactionAction::Install => {
                if installed.iter().any(|i| same_slot(i, &pkg) && same_evr(i, &pkg)) {
                    return Err(Error::Transaction(format!("{} is already installed", nvra)));
                }
                installed
                    .iter()
                    .filter(|i| pkg.obsoletes.contains(&i.id.name) && i.id.name != pkg.id.name)
                    .map(|i| i.id.clone())
                    .collect()
            }
            TransactionAction::Update => {
                if !is_upgrade(&pkg, installed) {
                    return Err(Error::Transaction(format!("{} is not an update", nvra)));
                }
                slot
            }
            TransactionAction::Downgrade => {
                if !is_downgrade(&pkg, installed) {
                    return Err(Error::Transaction(format!("{} is not a downgrade", nvra)));
                }
                slot
            }
            TransactionAction::Reinstall => {
                let twins: Vec<PackageId> = installed
                    .iter()
                    .filter(|i| i.id.same_nevra(&pkg.id))
                    .map(|i| i.id.clone())
                    .collect();
                if twins.is_empty() || pkg.id.is_installed() {
                    return Err(Error::Transaction(format!(
                        "{} is not available for reinstall",
                        nvra
                    )));
                }
                twins
            }
            TransactionAction::Remove => {
                if !pkg.id.is_installed() {
                    return Err(Error::Transaction(format!("{} is not installed", nvra)));
                }
                Vec::new()
            }
            TransactionAction::Obsolete => {
                let obsoleted: Vec<PackageId> = installed
                    .iter()
                    .filter(|i| pkg.obsoletes.contains(&i.id.name) && i.id.name != pkg.id.name)
                    .map(|i| i.id.clone())
                    .collect();
                if obsoleted.is_empty() {
                    return Err(Error::Transaction(format!(
                        "{} obsoletes nothing installed",
                        nvra
                    )));
                }
                obsoleted
            }
        };

        Ok(TransactionMember {
            id: pkg.id.clone(),
            action: member.action,
            size: pkg.size,
            replaces,
        })
    }

    fn emit_stage(sink: &dyn EventSink, stage: TransactionStage, ids: Option<&[PackageId]>) {
        sink.emit(DaemonEvent::TransactionEvent {
            event: stage,
            data: ids.map(|ids| ids.iter().map(PackageId::encode).collect()),
        });
    }

    fn download(&self, sink: &dyn EventSink, members: &[&TransactionMember]) {
        let total_bytes: u64 = members.iter().map(|m| m.size).sum();
        sink.emit(DaemonEvent::DownloadStart {
            num_files: members.len() as u64,
            num_bytes: total_bytes,
        });

        let mut done_bytes = 0u64;
        for (i, member) in members.iter().enumerate() {
            done_bytes += member.size;
            let total_frac = if total_bytes > 0 {
                done_bytes as f64 / total_bytes as f64
            } else {
                1.0
            };
            let name = member.id.nvra();
            sink.emit(DaemonEvent::DownloadProgress {
                name: name.clone(),
                frac: 1.0,
                total_frac,
                total_files: i as u64 + 1,
            });
            sink.emit(DaemonEvent::UpdateProgress {
                name: name.clone(),
                frac: 1.0,
                fread: format_size(member.size),
                ftime: "00:00".to_string(),
            });
            sink.emit(DaemonEvent::DownloadEnd {
                name,
                status: 0,
                msg: String::new(),
            });
        }
    }

    /// Ask for every untrusted signing key among the downloads
    fn check_signatures(
        &mut self,
        sink: &dyn EventSink,
        members: &[&TransactionMember],
    ) -> Result<()> {
        for member in members {
            let Some(entry) = self.repo(member.id.repo()) else {
                continue;
            };
            if !entry.repo.gpgcheck {
                continue;
            }
            let Some(key) = entry.repo.gpgkey.clone() else {
                continue;
            };
            if self.catalog.imported_keys.contains(&key.hexkeyid) {
                continue;
            }
            if !sink.confirm_gpg_import(&member.id, &key) {
                return Err(Error::Transaction(format!(
                    "GPG key {} for {} is not trusted",
                    key.hexkeyid,
                    member.id.nvra()
                )));
            }
            info!("Importing GPG key {} ({})", key.hexkeyid, key.userid);
            self.catalog.imported_keys.push(key.hexkeyid);
        }
        Ok(())
    }

    fn commit(&mut self, members: &[TransactionMember], installed: &[Package]) -> Result<()> {
        let mut removed: Vec<&PackageId> = Vec::new();
        let mut added: Vec<Package> = Vec::new();
        let mut history = Vec::new();

        for member in members {
            match member.action {
                TransactionAction::Remove => {
                    removed.push(&member.id);
                    history.push(HistoryPackage {
                        id: member.id.clone(),
                        state: "Erase".to_string(),
                    });
                }
                action => {
                    let pkg = self
                        .find(&member.id)?
                        .ok_or_else(|| no_longer_available(&member.id))?;
                    let (state, replaced_state) = match action {
                        TransactionAction::Update => ("Update", "Updated"),
                        TransactionAction::Downgrade => ("Downgrade", "Downgraded"),
                        TransactionAction::Reinstall => ("Reinstall", "Reinstalled"),
                        TransactionAction::Obsolete => ("Obsoleting", "Obsoleted"),
                        _ => ("Install", "Obsoleted"),
                    };
                    history.push(HistoryPackage {
                        id: pkg.id.clone(),
                        state: state.to_string(),
                    });
                    for old in &member.replaces {
                        removed.push(old);
                        history.push(HistoryPackage {
                            id: old.clone(),
                            state: replaced_state.to_string(),
                        });
                    }
                    added.push(pkg);
                }
            }
        }

        let mut records: Vec<PackageRecord> = installed
            .iter()
            .filter(|p| !removed.iter().any(|r| r.same_nevra(&p.id)))
            .filter_map(|p| {
                self.catalog.installed.iter().find(|r| {
                    r.name == p.id.name
                        && r.version == p.id.version
                        && r.release == p.id.release
                        && r.arch == p.id.arch
                })
            })
            .cloned()
            .collect();
        records.extend(added.iter().map(PackageRecord::installed_from));

        let mut system = self.system.lock();
        let tid = system.history.iter().map(|t| t.tid).max().unwrap_or(0) + 1;
        system.installed = records.clone();
        system.imported_keys = self.catalog.imported_keys.clone();
        system.history.push(HistoryTransaction {
            tid,
            end_timestamp: chrono::Utc::now().timestamp(),
            cmdline: String::new(),
            packages: history,
        });
        self.catalog.installed = records;
        self.catalog.history = system.history.clone();

        info!("Committed transaction {} ({} members)", tid, members.len());
        Ok(())
    }
}

impl Engine for MemoryEngine {
    fn installed(&mut self) -> Result<Vec<Package>> {
        Ok(self
            .catalog
            .installed
            .iter()
            .map(|r| r.to_package(r.installed_origin()))
            .collect())
    }

    fn available(&mut self) -> Result<Vec<Package>> {
        Ok(self
            .catalog
            .repos
            .iter()
            .filter(|e| e.repo.enabled)
            .flat_map(|e| {
                e.packages
                    .iter()
                    .map(move |r| r.to_package(e.repo.id.clone()))
            })
            .collect())
    }

    fn update_info(&mut self, pkg: &Package) -> Result<Option<Value>> {
        Ok(self.catalog.updateinfo.get(&pkg.id.nvra()).cloned())
    }

    fn categories(&mut self) -> Result<Vec<Category>> {
        Ok(self.catalog.categories.clone())
    }

    fn groups(&mut self) -> Result<Vec<Group>> {
        let installed: Vec<&str> = self
            .catalog
            .installed
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        Ok(self
            .catalog
            .groups
            .iter()
            .map(|g| {
                let mut group = g.clone();
                let mut required = g.mandatory.iter().chain(g.default.iter()).peekable();
                group.installed = required.peek().is_some()
                    && required.all(|name| installed.contains(&name.as_str()));
                group
            })
            .collect())
    }

    fn repositories(&mut self) -> Result<Vec<Repository>> {
        Ok(self.catalog.repos.iter().map(|e| e.repo.clone()).collect())
    }

    fn set_enabled_repos(&mut self, ids: &[String]) -> Result<()> {
        for id in ids {
            if self.repo(id).is_none() {
                warn!("Ignoring unknown repository '{}'", id);
            }
        }
        for entry in &mut self.catalog.repos {
            entry.repo.enabled = ids.contains(&entry.repo.id);
        }
        self.resolved = None;
        Ok(())
    }

    fn config(&mut self, setting: &str) -> Result<Option<Value>> {
        if setting == "*" {
            return Ok(Some(Value::Object(self.catalog.config.clone())));
        }
        Ok(self.catalog.config.get(setting).cloned())
    }

    fn set_config(&mut self, setting: &str, value: Value) -> Result<bool> {
        match self.catalog.config.get_mut(setting) {
            Some(slot) => {
                *slot = value;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn history(&mut self) -> Result<Vec<HistoryTransaction>> {
        Ok(self.catalog.history.clone())
    }

    fn add_transaction(&mut self, id: &PackageId, action: TransactionAction) -> Result<()> {
        let pkg = self
            .find(id)?
            .ok_or_else(|| Error::PackageNotFound(id.encode()))?;
        self.enqueue(&pkg, action);
        Ok(())
    }

    fn add_by_pattern(&mut self, action: TransactionAction, pattern: &str) -> Result<usize> {
        let installed = self.installed()?;
        let available = self.available()?;
        let matching_installed = || {
            installed
                .iter()
                .filter(|p| pattern_matches(pattern, &p.id.name))
        };

        let picked: Vec<Package> = match action {
            TransactionAction::Install => latest(
                available
                    .iter()
                    .filter(|p| pattern_matches(pattern, &p.id.name))
                    .cloned()
                    .collect(),
            )
            .into_iter()
            .filter(|p| !installed.iter().any(|i| same_slot(i, p)))
            .collect(),
            TransactionAction::Update => self
                .upgrades()?
                .into_iter()
                .filter(|p| pattern_matches(pattern, &p.id.name))
                .collect(),
            TransactionAction::Remove => matching_installed().cloned().collect(),
            TransactionAction::Reinstall => matching_installed()
                .filter_map(|i| available.iter().find(|a| a.id.same_nevra(&i.id)).cloned())
                .collect(),
            TransactionAction::Downgrade => matching_installed()
                .filter_map(|i| {
                    available
                        .iter()
                        .filter(|a| same_slot(a, i) && a.id.evr() < i.id.evr())
                        .max_by(|a, b| a.id.evr().cmp(&b.id.evr()))
                        .cloned()
                })
                .collect(),
            TransactionAction::Obsolete => self
                .obsoletes()?
                .into_iter()
                .filter(|p| pattern_matches(pattern, &p.id.name))
                .collect(),
        };

        for pkg in &picked {
            self.enqueue(pkg, action);
        }
        debug!("Queued {} package(s) for {} '{}'", picked.len(), action, pattern);
        Ok(picked.len())
    }

    fn clear_transaction(&mut self) -> Result<()> {
        self.queue.clear();
        self.resolved = None;
        Ok(())
    }

    fn transaction(&mut self) -> Result<Vec<TransactionMember>> {
        Ok(self.queue.clone())
    }

    fn build_transaction(&mut self) -> Result<Vec<TransactionMember>> {
        let installed = self.installed()?;
        let queue = self.queue.clone();
        let mut resolved = Vec::with_capacity(queue.len());
        for member in &queue {
            resolved.push(self.resolve_member(member, &installed)?);
        }
        resolved.sort_by(|a, b| {
            a.action
                .cmp(&b.action)
                .then_with(|| a.id.encode().cmp(&b.id.encode()))
        });
        self.resolved = Some(resolved.clone());
        Ok(resolved)
    }

    fn run_transaction(&mut self, sink: &dyn EventSink) -> Result<()> {
        let members = match self.resolved.take() {
            Some(members) => members,
            None => self.build_transaction()?,
        };
        if members.is_empty() {
            return Err(Error::Transaction("no transaction to run".to_string()));
        }
        let installed = self.installed()?;

        let downloads: Vec<&TransactionMember> = members
            .iter()
            .filter(|m| m.action != TransactionAction::Remove)
            .collect();
        let download_ids: Vec<PackageId> = downloads.iter().map(|m| m.id.clone()).collect();

        Self::emit_stage(sink, TransactionStage::Download, Some(download_ids.as_slice()));
        self.download(sink, &downloads);
        Self::emit_stage(sink, TransactionStage::PkgToDownload, Some(download_ids.as_slice()));

        Self::emit_stage(sink, TransactionStage::SignatureCheck, Some(download_ids.as_slice()));
        self.check_signatures(sink, &downloads)?;

        Self::emit_stage(sink, TransactionStage::RunTestTransaction, None);

        let all_ids: Vec<PackageId> = members.iter().map(|m| m.id.clone()).collect();
        Self::emit_stage(sink, TransactionStage::RunTransaction, Some(all_ids.as_slice()));

        let mut steps: Vec<(String, RpmAction, u64)> = Vec::new();
        for member in &members {
            let action = match member.action {
                TransactionAction::Update => RpmAction::Update,
                TransactionAction::Remove => RpmAction::Erase,
                _ => RpmAction::Install,
            };
            steps.push((member.id.encode(), action, member.size));
            for old in &member.replaces {
                let action = if member.action == TransactionAction::Obsolete
                    || member.action == TransactionAction::Install
                {
                    RpmAction::Obsolete
                } else {
                    RpmAction::Cleanup
                };
                steps.push((old.encode(), action, 0));
            }
        }
        let ts_total = steps.len() as u64;
        for (i, (package, action, size)) in steps.into_iter().enumerate() {
            sink.emit(DaemonEvent::RpmProgress {
                package,
                action,
                te_current: size,
                te_total: size,
                ts_current: i as u64 + 1,
                ts_total,
            });
        }

        self.commit(&members, &installed)?;
        self.queue.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{GpgKey, PackageFilter};
    use std::cell::RefCell;

    const SAMPLE: &str = r#"{
        "installed": [
            {"name": "foo", "version": "1.0", "release": "1", "arch": "x86_64", "from_repo": "fedora", "size": 100},
            {"name": "legacy", "version": "0.1", "release": "1", "arch": "noarch"}
        ],
        "repos": [
            {"id": "fedora", "name": "Fedora", "enabled": true, "packages": [
                {"name": "foo", "version": "1.0", "release": "1", "arch": "x86_64", "size": 100},
                {"name": "foo", "version": "0.9", "release": "1", "arch": "x86_64", "size": 90},
                {"name": "bar", "version": "3.0", "release": "2", "arch": "noarch", "size": 30, "summary": "Bar tool"}
            ]},
            {"id": "updates", "name": "Updates", "enabled": true, "gpgcheck": true,
             "gpgkey": {"hexkeyid": "ABCD1234", "userid": "Updates <updates@example.org>", "keyurl": "file:///etc/pki/key"},
             "packages": [
                {"name": "foo", "version": "2.0", "release": "1", "arch": "x86_64", "size": 200},
                {"name": "modern", "version": "1.0", "release": "1", "arch": "noarch", "obsoletes": ["legacy"]}
            ]},
            {"id": "testing", "enabled": false, "packages": [
                {"name": "foo", "version": "3.0", "release": "1", "arch": "x86_64"}
            ]}
        ],
        "categories": [{"id": "apps", "name": "Applications", "groups": ["tools"]}],
        "groups": [{"id": "tools", "name": "Tools", "mandatory": ["foo"], "default": ["bar"]}],
        "config": {"recent": 7, "gpgcheck": true},
        "updateinfo": {"foo-2.0-1.x86_64": {"id": "FEDORA-2024-1", "type": "bugfix"}}
    }"#;

    #[derive(Default)]
    struct RecordingSink {
        events: RefCell<Vec<DaemonEvent>>,
        trust: HashMap<String, bool>,
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: DaemonEvent) {
            self.events.borrow_mut().push(event);
        }

        fn confirm_gpg_import(&self, _pkg: &PackageId, key: &GpgKey) -> bool {
            self.trust.get(&key.hexkeyid).copied().unwrap_or(false)
        }
    }

    impl RecordingSink {
        fn stages(&self) -> Vec<TransactionStage> {
            self.events
                .borrow()
                .iter()
                .filter_map(|e| match e {
                    DaemonEvent::TransactionEvent { event, .. } => Some(*event),
                    _ => None,
                })
                .collect()
        }
    }

    fn factory() -> MemoryEngineFactory {
        MemoryEngineFactory::new(serde_json::from_str(SAMPLE).unwrap())
    }

    #[test]
    fn test_disabled_repo_hidden() {
        let mut engine = factory().open().unwrap();
        assert!(engine.available().unwrap().iter().all(|p| p.id.origin != "testing"));
        let ids = engine.repository_ids("").unwrap();
        assert_eq!(ids, vec!["fedora", "updates"]);
        assert_eq!(engine.repository_ids("*").unwrap().len(), 3);
    }

    #[test]
    fn test_installed_origin() {
        let mut engine = factory().open().unwrap();
        let origins: Vec<String> = engine
            .installed()
            .unwrap()
            .into_iter()
            .map(|p| p.id.origin)
            .collect();
        assert_eq!(origins, vec!["@fedora", "@System"]);
    }

    #[test]
    fn test_groups_installed_flag() {
        let mut engine = factory().open().unwrap();
        let groups = engine.groups().unwrap();
        assert!(!groups[0].installed);
        let pkgs = engine.group_packages("tools", false).unwrap();
        let names: Vec<&str> = pkgs.iter().map(|p| p.id.name.as_str()).collect();
        assert_eq!(names, vec!["bar", "foo"]);
    }

    #[test]
    fn test_obsoletes_listing() {
        let mut engine = factory().open().unwrap();
        let obs = engine.packages(PackageFilter::Obsoletes, 7).unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].id.name, "modern");
    }

    #[test]
    fn test_update_requires_gpg_confirmation() {
        let factory = factory();
        let mut engine = factory.open().unwrap();
        assert_eq!(engine.add_by_pattern(TransactionAction::Update, "foo").unwrap(), 1);

        let sink = RecordingSink::default();
        let err = engine.run_transaction(&sink).unwrap_err();
        assert!(matches!(err, Error::Transaction(_)));
        assert_eq!(
            sink.stages(),
            vec![
                TransactionStage::Download,
                TransactionStage::PkgToDownload,
                TransactionStage::SignatureCheck,
            ]
        );
        // nothing committed
        assert_eq!(factory.snapshot().installed[0].version, "1.0");
    }

    #[test]
    fn test_update_commits_to_system() {
        let factory = factory();
        let mut engine = factory.open().unwrap();
        engine.add_by_pattern(TransactionAction::Update, "").unwrap();
        let resolved = engine.build_transaction().unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].replaces[0].version, "1.0");

        let mut sink = RecordingSink::default();
        sink.trust.insert("ABCD1234".to_string(), true);
        engine.run_transaction(&sink).unwrap();

        let stages = sink.stages();
        assert_eq!(stages.first(), Some(&TransactionStage::Download));
        assert_eq!(stages.last(), Some(&TransactionStage::RunTransaction));
        let rpm_steps = sink
            .events
            .borrow()
            .iter()
            .filter(|e| matches!(e, DaemonEvent::RpmProgress { .. }))
            .count();
        assert_eq!(rpm_steps, 2);

        let system = factory.snapshot();
        assert!(system.installed.iter().any(|r| r.name == "foo" && r.version == "2.0"));
        assert!(!system.installed.iter().any(|r| r.name == "foo" && r.version == "1.0"));
        assert_eq!(system.imported_keys, vec!["ABCD1234"]);
        assert_eq!(system.history.len(), 1);

        // a fresh session sees the new state
        let mut next = factory.open().unwrap();
        assert!(next.packages(PackageFilter::Updates, 7).unwrap().is_empty());
        assert_eq!(next.history_packages(1).unwrap().len(), 2);
    }

    #[test]
    fn test_remove_and_invalid_requests() {
        let factory = factory();
        let mut engine = factory.open().unwrap();
        let bar = PackageId::new("bar", "0", "3.0", "2", "noarch", "fedora");
        engine.add_transaction(&bar, TransactionAction::Remove).unwrap();
        assert!(matches!(engine.build_transaction(), Err(Error::Transaction(_))));

        engine.clear_transaction().unwrap();
        assert_eq!(engine.add_by_pattern(TransactionAction::Remove, "legacy").unwrap(), 1);
        engine.run_transaction(&RecordingSink::default()).unwrap();
        assert!(factory.snapshot().installed.iter().all(|r| r.name != "legacy"));
    }

    #[test]
    fn test_empty_run_fails() {
        let mut engine = factory().open().unwrap();
        assert!(matches!(
            engine.run_transaction(&RecordingSink::default()),
            Err(Error::Transaction(_))
        ));
    }

    #[test]
    fn test_config_is_session_local() {
        let factory = factory();
        let mut engine = factory.open().unwrap();
        assert!(engine.set_config("recent", serde_json::json!(14)).unwrap());
        assert!(!engine.set_config("nonexistent", Value::Null).unwrap());
        assert_eq!(engine.config("recent").unwrap(), Some(serde_json::json!(14)));
        assert_eq!(
            factory.open().unwrap().config("recent").unwrap(),
            Some(serde_json::json!(7))
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, SAMPLE).unwrap();
        let factory = MemoryEngineFactory::load(&path).unwrap();
        assert_eq!(factory.snapshot().repos.len(), 3);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Catalog::load(&path), Err(Error::Json(_))));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1500), "1.5 kB");
        assert_eq!(format_size(2_000_000), "2.0 MB");
    }
}
