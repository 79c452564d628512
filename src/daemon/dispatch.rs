// src/daemon/dispatch.rs

//! Call dispatcher
//!
//! Every remote call arrives as a [`MethodCall`] together with the caller's
//! identity. Pre-lock calls (`GetVersion`, `Lock`, `Unlock`, `Exit`,
//! `SetWatchdogState`) only pass the permission gate. Everything else runs
//! through [`Dispatcher::with_work`]:
//!
//! ```text
//! check_permission -> begin_work (holder only) -> handler -> end_work
//! ```
//!
//! The working state is left through a guard, so an engine error never leaves
//! the session stuck in `LockedWorking`.
//!
//! Structured results (dicts and nested lists) are returned as JSON text; the
//! string `"null"` means no value.

use super::action::classify;
use super::auth::{CallerId, PermissionGate};
use super::session::{EngineSession, Session};
use super::DaemonEvent;
use crate::engine::{
    EventSink, GpgKey, Package, PackageFilter, SearchQuery, TransactionAction, TransactionMember,
    TransactionStage,
};
use crate::error::{Error, Result};
use crate::package_id::{PackageId, to_id_list};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Version reported by `GetVersion`
pub const API_VERSION: i64 = 902;

/// Capacity of the event broadcast channel
const EVENT_CAPACITY: usize = 1024;

/// A remote call and its arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args")]
pub enum MethodCall {
    GetVersion,
    Lock,
    Unlock,
    Exit,
    SetWatchdogState {
        state: bool,
    },
    GetRepositories {
        filter: String,
    },
    GetRepo {
        repo_id: String,
    },
    SetEnabledRepos {
        repo_ids: Vec<String>,
    },
    GetConfig {
        setting: String,
    },
    SetConfig {
        setting: String,
        /// JSON text of the new value
        value: String,
    },
    GetPackages {
        pkg_filter: String,
    },
    GetPackageWithAttributes {
        pkg_filter: String,
        fields: Vec<String>,
    },
    GetPackagesByName {
        name: String,
        newest_only: bool,
    },
    GetAttribute {
        id: String,
        attr: String,
    },
    GetUpdateInfo {
        id: String,
    },
    Search {
        fields: Vec<String>,
        keys: Vec<String>,
        match_all: bool,
        newest_only: bool,
        tags: bool,
    },
    GetGroups,
    GetGroupPackages {
        grp_id: String,
        grp_flt: String,
    },
    Install {
        cmds: String,
    },
    Remove {
        cmds: String,
    },
    Update {
        cmds: String,
    },
    Reinstall {
        cmds: String,
    },
    Downgrade {
        cmds: String,
    },
    AddTransaction {
        id: String,
        action: String,
    },
    ClearTransaction,
    GetTransaction,
    BuildTransaction,
    RunTransaction,
    GetHistoryByDays {
        start_days: u32,
        end_days: u32,
    },
    HistorySearch {
        pattern: Vec<String>,
    },
    GetHistoryPackages {
        tid: i64,
    },
    #[serde(rename = "ConfirmGPGImport")]
    ConfirmGpgImport {
        hexkeyid: String,
        confirmed: bool,
    },
}

impl MethodCall {
    /// Wire name of the method
    pub fn name(&self) -> &'static str {
        match self {
            MethodCall::GetVersion => "GetVersion",
            MethodCall::Lock => "Lock",
            MethodCall::Unlock => "Unlock",
            MethodCall::Exit => "Exit",
            MethodCall::SetWatchdogState { .. } => "SetWatchdogState",
            MethodCall::GetRepositories { .. } => "GetRepositories",
            MethodCall::GetRepo { .. } => "GetRepo",
            MethodCall::SetEnabledRepos { .. } => "SetEnabledRepos",
            MethodCall::GetConfig { .. } => "GetConfig",
            MethodCall::SetConfig { .. } => "SetConfig",
            MethodCall::GetPackages { .. } => "GetPackages",
            MethodCall::GetPackageWithAttributes { .. } => "GetPackageWithAttributes",
            MethodCall::GetPackagesByName { .. } => "GetPackagesByName",
            MethodCall::GetAttribute { .. } => "GetAttribute",
            MethodCall::GetUpdateInfo { .. } => "GetUpdateInfo",
            MethodCall::Search { .. } => "Search",
            MethodCall::GetGroups => "GetGroups",
            MethodCall::GetGroupPackages { .. } => "GetGroupPackages",
            MethodCall::Install { .. } => "Install",
            MethodCall::Remove { .. } => "Remove",
            MethodCall::Update { .. } => "Update",
            MethodCall::Reinstall { .. } => "Reinstall",
            MethodCall::Downgrade { .. } => "Downgrade",
            MethodCall::AddTransaction { .. } => "AddTransaction",
            MethodCall::ClearTransaction => "ClearTransaction",
            MethodCall::GetTransaction => "GetTransaction",
            MethodCall::BuildTransaction => "BuildTransaction",
            MethodCall::RunTransaction => "RunTransaction",
            MethodCall::GetHistoryByDays { .. } => "GetHistoryByDays",
            MethodCall::HistorySearch { .. } => "HistorySearch",
            MethodCall::GetHistoryPackages { .. } => "GetHistoryPackages",
            MethodCall::ConfirmGpgImport { .. } => "ConfirmGPGImport",
        }
    }
}

/// Serialize a structured result as JSON text
fn json_text<T: Serialize>(value: &T) -> Result<Value> {
    Ok(Value::String(serde_json::to_string(value)?))
}

/// Package list as sorted, de-duplicated id strings
fn id_list(pkgs: &[Package]) -> Value {
    json!(to_id_list(pkgs.iter().map(|p| &p.id)))
}

/// Group resolved members by action: `[[action, [[id, size, [replaced]]]]]`
fn transaction_output(members: &[TransactionMember]) -> Vec<(String, Vec<(String, u64, Vec<String>)>)> {
    let mut by_action: BTreeMap<TransactionAction, Vec<(String, u64, Vec<String>)>> =
        BTreeMap::new();
    for member in members {
        by_action.entry(member.action).or_default().push((
            member.id.encode(),
            member.size,
            member.replaces.iter().map(PackageId::encode).collect(),
        ));
    }
    by_action
        .into_iter()
        .map(|(action, mut entries)| {
            entries.sort();
            (action.as_str().to_string(), entries)
        })
        .collect()
}

/// Resolve once `signal` reports that the daemon is stopping
pub async fn shutdown_requested(mut signal: watch::Receiver<bool>) {
    while !*signal.borrow_and_update() {
        if signal.changed().await.is_err() {
            break;
        }
    }
}

/// Routes calls to the session and broadcasts signals
pub struct Dispatcher {
    session: Arc<Session>,
    gate: PermissionGate,
    events: broadcast::Sender<DaemonEvent>,
    shutdown: watch::Sender<bool>,
    recent_days: u32,
}

impl Dispatcher {
    pub fn new(session: Arc<Session>, gate: PermissionGate, recent_days: u32) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        Self {
            session,
            gate,
            events,
            shutdown,
            recent_days,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Broadcast a signal to all subscribers
    pub fn emit(&self, event: DaemonEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.events.subscribe()
    }

    /// Receiver that flips to true when the daemon should stop
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Dispose the engine session, then stop the service loop
    pub fn request_shutdown(&self) {
        self.session.dispose();
        self.shutdown.send_replace(true);
        info!("Shutdown requested");
    }

    fn emit_stage(&self, stage: TransactionStage, ids: Option<Vec<String>>) {
        self.emit(DaemonEvent::TransactionEvent {
            event: stage,
            data: ids,
        });
    }

    /// Handle one call on behalf of `caller`
    pub fn dispatch(&self, caller: &CallerId, call: MethodCall) -> Result<Value> {
        let name = call.name();
        debug!("{} started", name);
        let result = if self.is_shutting_down() && !matches!(call, MethodCall::GetVersion) {
            Err(Error::Service("daemon is shutting down".to_string()))
        } else {
            self.route(caller, call)
        };
        match &result {
            Ok(_) => debug!("{} ended", name),
            Err(e) => debug!("{} ended with {}", name, e.wire_name()),
        }
        result
    }

    fn route(&self, caller: &CallerId, call: MethodCall) -> Result<Value> {
        match call {
            MethodCall::GetVersion => Ok(json!(API_VERSION)),
            MethodCall::Lock => {
                self.gate.check_permission(caller)?;
                Ok(json!(self.session.lock().acquire(caller)))
            }
            MethodCall::Unlock => {
                self.gate.check_permission(caller)?;
                self.session.lock().release(caller)?;
                self.session.reset();
                Ok(json!(true))
            }
            MethodCall::Exit => {
                self.gate.check_permission(caller)?;
                if !self.session.activity().can_terminate() {
                    info!("Exit refused while a transaction is running");
                    return Ok(json!(false));
                }
                self.request_shutdown();
                Ok(json!(true))
            }
            MethodCall::SetWatchdogState { state } => {
                self.gate.check_permission(caller)?;
                self.session.activity().set_enabled(state);
                info!("Watchdog {}", if state { "enabled" } else { "disabled" });
                Ok(json!(state))
            }
            call => self.with_work(caller, || self.handle(call)),
        }
    }

    /// Run `f` as the lock holder in the working state
    pub fn with_work<F>(&self, caller: &CallerId, f: F) -> Result<Value>
    where
        F: FnOnce() -> Result<Value>,
    {
        self.gate.check_permission(caller)?;
        let _work = self.session.begin_work(caller)?;
        f()
    }

    fn handle(&self, call: MethodCall) -> Result<Value> {
        match call {
            MethodCall::GetRepositories { filter } => self
                .session
                .with_engine(|s| Ok(json!(s.engine().repository_ids(&filter)?))),
            MethodCall::GetRepo { repo_id } => self.session.with_engine(|s| {
                let repo = s
                    .engine()
                    .repositories()?
                    .into_iter()
                    .find(|r| r.id == repo_id);
                json_text(&repo)
            }),
            MethodCall::SetEnabledRepos { repo_ids } => self.session.with_engine(|s| {
                s.engine().set_enabled_repos(&repo_ids)?;
                s.invalidate();
                Ok(Value::Null)
            }),
            MethodCall::GetConfig { setting } => self
                .session
                .with_engine(|s| json_text(&s.engine().config(&setting)?)),
            MethodCall::SetConfig { setting, value } => {
                let value: Value = serde_json::from_str(&value)?;
                self.session
                    .with_engine(|s| Ok(json!(s.engine().set_config(&setting, value)?)))
            }
            MethodCall::GetPackages { pkg_filter } => {
                let Ok(filter) = pkg_filter.parse::<PackageFilter>() else {
                    return Ok(json!(Vec::<String>::new()));
                };
                self.session
                    .with_engine(|s| Ok(id_list(&s.engine().packages(filter, self.recent_days)?)))
            }
            MethodCall::GetPackageWithAttributes { pkg_filter, fields } => {
                let Ok(filter) = pkg_filter.parse::<PackageFilter>() else {
                    return json_text(&Vec::<Value>::new());
                };
                self.session.with_engine(|s| {
                    let pkgs = s.engine().packages(filter, self.recent_days)?;
                    let mut rows = Vec::with_capacity(pkgs.len());
                    for pkg in &pkgs {
                        let mut row = vec![json!(pkg.id.encode())];
                        for field in &fields {
                            row.push(attribute_value(s, pkg, field)?.unwrap_or(Value::Null));
                        }
                        rows.push(row);
                    }
                    json_text(&rows)
                })
            }
            MethodCall::GetPackagesByName { name, newest_only } => self
                .session
                .with_engine(|s| Ok(id_list(&s.engine().packages_by_name(&name, newest_only)?))),
            MethodCall::GetAttribute { id, attr } => {
                let id = PackageId::decode(&id)?;
                self.session.with_engine(|s| {
                    let pkg = find_package(s, &id)?;
                    json_text(&attribute_value(s, &pkg, &attr)?)
                })
            }
            MethodCall::GetUpdateInfo { id } => {
                let id = PackageId::decode(&id)?;
                self.session.with_engine(|s| {
                    let pkg = find_package(s, &id)?;
                    json_text(&s.engine().update_info(&pkg)?)
                })
            }
            MethodCall::Search {
                fields,
                keys,
                match_all,
                newest_only,
                tags,
            } => {
                let query = SearchQuery {
                    fields,
                    keys,
                    match_all,
                    newest_only,
                    tags,
                };
                self.session
                    .with_engine(|s| Ok(id_list(&s.engine().search(&query)?)))
            }
            MethodCall::GetGroups => self.session.with_engine(|s| {
                let groups = s.engine().groups()?;
                let mut tree = Vec::new();
                for category in s.engine().categories()? {
                    let mut members: Vec<(String, String, String, bool)> = groups
                        .iter()
                        .filter(|g| category.groups.contains(&g.id))
                        .map(|g| (g.id.clone(), g.name.clone(), g.description.clone(), g.installed))
                        .collect();
                    members.sort();
                    tree.push((
                        (category.id, category.name, category.description),
                        members,
                    ));
                }
                tree.sort();
                json_text(&tree)
            }),
            MethodCall::GetGroupPackages { grp_id, grp_flt } => self.session.with_engine(|s| {
                let all = grp_flt == "all";
                Ok(id_list(&s.engine().group_packages(&grp_id, all)?))
            }),
            MethodCall::Install { cmds } => self.queue_patterns(TransactionAction::Install, &cmds),
            MethodCall::Remove { cmds } => self.queue_patterns(TransactionAction::Remove, &cmds),
            MethodCall::Update { cmds } => self.queue_patterns(TransactionAction::Update, &cmds),
            MethodCall::Reinstall { cmds } => {
                self.queue_patterns(TransactionAction::Reinstall, &cmds)
            }
            MethodCall::Downgrade { cmds } => {
                self.queue_patterns(TransactionAction::Downgrade, &cmds)
            }
            MethodCall::AddTransaction { id, action } => {
                let id = PackageId::decode(&id)?;
                let action: TransactionAction = action.parse().map_err(Error::Transaction)?;
                self.session.with_engine(|s| {
                    s.engine().add_transaction(&id, action)?;
                    transaction_ids(s)
                })
            }
            MethodCall::ClearTransaction => self.session.with_engine(|s| {
                s.engine().clear_transaction()?;
                Ok(Value::Null)
            }),
            MethodCall::GetTransaction => self.session.with_engine(transaction_ids),
            MethodCall::BuildTransaction => self.build_transaction(),
            MethodCall::RunTransaction => self.run_transaction(),
            MethodCall::GetHistoryByDays {
                start_days,
                end_days,
            } => self
                .session
                .with_engine(|s| json_text(&s.engine().history_by_days(start_days, end_days)?)),
            MethodCall::HistorySearch { pattern } => self
                .session
                .with_engine(|s| json_text(&s.engine().history_search(&pattern)?)),
            MethodCall::GetHistoryPackages { tid } => self.session.with_engine(|s| {
                let rows: Vec<(String, String, bool)> = s
                    .engine()
                    .history_packages(tid)?
                    .into_iter()
                    .map(|(id, state, installed)| (id.encode(), state, installed))
                    .collect();
                json_text(&rows)
            }),
            MethodCall::ConfirmGpgImport {
                hexkeyid,
                confirmed,
            } => {
                self.session.set_gpg_decision(&hexkeyid, confirmed);
                Ok(Value::Null)
            }
            MethodCall::GetVersion
            | MethodCall::Lock
            | MethodCall::Unlock
            | MethodCall::Exit
            | MethodCall::SetWatchdogState { .. } => {
                Err(Error::Service("pre-lock call routed as work".to_string()))
            }
        }
    }

    /// Queue every whitespace-separated pattern, then resolve
    fn queue_patterns(&self, action: TransactionAction, cmds: &str) -> Result<Value> {
        self.session.with_engine(|s| {
            for pattern in cmds.split_whitespace() {
                let queued = s.engine().add_by_pattern(action, pattern)?;
                if queued == 0 {
                    warn!("No package matches {} '{}'", action, pattern);
                }
            }
            Ok(())
        })?;
        self.build_transaction()
    }

    /// Resolve the transaction and return `[rc, output]` as JSON text
    fn build_transaction(&self) -> Result<Value> {
        self.emit_stage(TransactionStage::StartBuild, None);
        let members = self
            .session
            .with_engine(|s| s.engine().build_transaction())
            .map_err(resolution_error)?;
        let rc = if members.is_empty() { 0 } else { 1 };
        json_text(&(rc, transaction_output(&members)))
    }

    fn run_transaction(&self) -> Result<Value> {
        let _hold = self.session.hold_termination();
        self.emit_stage(TransactionStage::StartRun, None);
        let sink = DispatchSink { dispatcher: self };
        let result = self
            .session
            .with_engine(|s| s.engine().run_transaction(&sink))
            .map_err(resolution_error);

        match result {
            Ok(()) => {
                // next call sees the committed system
                self.session.reset();
                self.emit_stage(TransactionStage::EndRun, None);
                Ok(json!(0))
            }
            Err(e) => {
                warn!("Transaction failed: {}", e);
                self.emit_stage(TransactionStage::Fail, None);
                Err(e)
            }
        }
    }
}

/// Queued packages that vanished are a failed transaction, not a lookup miss
fn resolution_error(err: Error) -> Error {
    match err {
        Error::PackageNotFound(id) => Error::Transaction(format!("{} is no longer available", id)),
        other => other,
    }
}

/// Resolve an id to a package record
fn find_package(s: &mut EngineSession, id: &PackageId) -> Result<Package> {
    s.engine()
        .find(id)?
        .ok_or_else(|| Error::PackageNotFound(id.encode()))
}

/// Real or derived attribute of a package
///
/// Unknown attributes are `None`.
fn attribute_value(s: &mut EngineSession, pkg: &Package, attr: &str) -> Result<Option<Value>> {
    let value = match attr {
        "action" => {
            let installed = s.engine().installed()?;
            let obsoletes = s.obsoletes()?;
            json!(classify(pkg, &installed, &obsoletes).as_str())
        }
        "downgrades" => id_list(&s.engine().downgrades(pkg)?),
        "pkgtags" => json!(pkg.tags),
        _ => return Ok(pkg.attribute(attr)),
    };
    Ok(Some(value))
}

fn transaction_ids(s: &mut EngineSession) -> Result<Value> {
    let members = s.engine().transaction()?;
    Ok(json!(to_id_list(members.iter().map(|m| &m.id))))
}

/// Engine-facing sink that forwards signals and answers key questions
struct DispatchSink<'a> {
    dispatcher: &'a Dispatcher,
}

impl EventSink for DispatchSink<'_> {
    fn emit(&self, event: DaemonEvent) {
        self.dispatcher.emit(event);
    }

    fn confirm_gpg_import(&self, pkg: &PackageId, key: &GpgKey) -> bool {
        let (confirmed, unseen) = self.dispatcher.session.gpg_decision(&key.hexkeyid);
        if unseen {
            info!("Asking for import of GPG key {}", key.hexkeyid);
            self.dispatcher.emit(DaemonEvent::GpgImport {
                pkg_id: pkg.encode(),
                userid: key.userid.clone(),
                hexkeyid: key.hexkeyid.clone(),
                keyurl: key.keyurl.clone(),
                timestamp: key.timestamp,
            });
        }
        confirmed
    }
}
