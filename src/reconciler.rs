//! One reconciliation cycle over the whole driver set.
//!
//! Each driver is processed in its own task against an immutable snapshot of
//! the records. Results are funnelled through a bounded channel and joined
//! before the aggregate `machine` schema is rebuilt; activation of newly
//! ready drivers comes last.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::backoff::{poll_until, Backoff};
use crate::config::AgentConfig;
use crate::control_plane::ControlPlane;
use crate::error::{DriverError, DriverFailure, Result, Stage};
use crate::installer::DriverInstaller;
use crate::model::{Blacklist, DriverAction, DriverRecord, DriverState};
use crate::schema::{RoleProfile, SchemaPublisher};

/// Comparable summary of the control plane's driver list and blacklist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverSetSnapshot {
    drivers: Vec<DriverFingerprint>,
    blacklist: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct DriverFingerprint {
    id: Option<String>,
    name: String,
    state: DriverState,
    source_uri: String,
    checksum: String,
    schema_version: String,
}

impl DriverSetSnapshot {
    pub fn capture(drivers: &[DriverRecord], blacklist: &Blacklist) -> Self {
        let mut fingerprints: Vec<_> = drivers
            .iter()
            .map(|d| DriverFingerprint {
                id: d.id.clone(),
                name: d.name.clone(),
                state: d.state,
                source_uri: d.source_uri.clone(),
                checksum: d.checksum.clone(),
                schema_version: d.schema_version.clone(),
            })
            .collect();
        fingerprints.sort();

        Self {
            drivers: fingerprints,
            blacklist: blacklist.raw().to_string(),
        }
    }

    /// Human-readable reason when `current` no longer matches this snapshot.
    pub fn drift(&self, current: &DriverSetSnapshot) -> Option<String> {
        if self.blacklist != current.blacklist {
            return Some(format!(
                "driver blacklist changed from '{}' to '{}'",
                self.blacklist, current.blacklist
            ));
        }
        if self.drivers.len() != current.drivers.len() {
            return Some(format!(
                "driver count changed from {} to {}",
                self.drivers.len(),
                current.drivers.len()
            ));
        }
        self.drivers
            .iter()
            .zip(&current.drivers)
            .find(|(before, after)| before != after)
            .map(|(before, after)| {
                if before.name == after.name && before.id == after.id {
                    format!("driver '{}' changed ({} -> {})", after.name, before.state, after.state)
                } else {
                    format!("driver set changed at '{}'", after.name)
                }
            })
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }
}

/// Outcome of one cycle.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub snapshot: DriverSetSnapshot,
    /// Drivers whose config schema is published, sorted.
    pub published: Vec<String>,
    pub activated: Vec<String>,
    pub torn_down: Vec<String>,
    pub failures: Vec<DriverFailure>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Moves the collected failures out as one aggregate error.
    pub fn take_error(&mut self) -> Option<DriverError> {
        if self.failures.is_empty() {
            None
        } else {
            Some(DriverError::Aggregate(std::mem::take(&mut self.failures)))
        }
    }
}

#[derive(Debug)]
struct DriverOutcome {
    record: DriverRecord,
    published: bool,
    torn_down: bool,
    failures: Vec<DriverFailure>,
}

impl DriverOutcome {
    fn new(record: DriverRecord) -> Self {
        Self {
            record,
            published: false,
            torn_down: false,
            failures: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Settings {
    blacklist_setting: String,
    builtin_drivers: Vec<String>,
    state_wait_timeout: Duration,
}

/// Brings local installs and published schemas in line with the control
/// plane's declared driver set.
#[derive(Clone)]
pub struct DriverSetReconciler {
    control_plane: Arc<dyn ControlPlane>,
    installer: DriverInstaller,
    publisher: SchemaPublisher,
    settings: Arc<Settings>,
}

impl DriverSetReconciler {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        installer: DriverInstaller,
        publisher: SchemaPublisher,
        config: &AgentConfig,
    ) -> Self {
        Self {
            control_plane,
            installer,
            publisher,
            settings: Arc::new(Settings {
                blacklist_setting: config.blacklist_setting.clone(),
                builtin_drivers: config.builtin_drivers.clone(),
                state_wait_timeout: config.schema_wait_timeout(),
            }),
        }
    }

    pub fn control_plane(&self) -> &Arc<dyn ControlPlane> {
        &self.control_plane
    }

    pub fn installer(&self) -> &DriverInstaller {
        &self.installer
    }

    pub fn publisher(&self) -> &SchemaPublisher {
        &self.publisher
    }

    pub async fn blacklist(&self) -> Result<Blacklist> {
        fetch_blacklist(self.control_plane.as_ref(), &self.settings.blacklist_setting).await
    }

    /// Runs one full cycle. Only failing to read the driver set itself is an
    /// error; per-driver failures are collected in the report.
    pub async fn sync(&self) -> Result<SyncReport> {
        let (records, blacklist) =
            observe_driver_set(self.control_plane.as_ref(), &self.settings.blacklist_setting).await?;
        let snapshot = DriverSetSnapshot::capture(&records, &blacklist);
        let drivers = with_builtins(records, &self.settings.builtin_drivers);
        info!(drivers = drivers.len(), blacklisted = %blacklist.raw(), "Starting driver reconciliation");

        let outcomes = self.process_all(drivers, &blacklist).await;

        let mut report = SyncReport {
            snapshot,
            ..SyncReport::default()
        };
        let mut ready = Vec::new();
        let mut published = BTreeSet::new();
        for outcome in outcomes {
            if outcome.torn_down {
                report.torn_down.push(outcome.record.name.clone());
            }
            if outcome.published {
                published.insert(outcome.record.name.clone());
                if needs_activation(&outcome.record) {
                    ready.push(outcome.record);
                }
            }
            report.failures.extend(outcome.failures);
        }
        report.published = published.into_iter().collect();
        report.torn_down.sort();

        // Published even when some drivers failed, with whatever is known good.
        for role in RoleProfile::ALL {
            if let Err(e) = self.publisher.publish_aggregate_machine_schema(&report.published, role).await {
                warn!(role = %role, error = %e, "Failed to publish machine schema");
                report.failures.push(DriverFailure::new("machine", Stage::MachineSchema, e));
            }
        }

        let (activated, failures) = self.activate_all(ready).await;
        report.activated = activated;
        report.failures.extend(failures);

        if report.is_clean() {
            info!(published = report.published.len(), activated = report.activated.len(), "Driver reconciliation finished");
        } else {
            warn!(
                published = report.published.len(),
                failed = report.failures.len(),
                "Driver reconciliation finished with failures"
            );
        }
        Ok(report)
    }

    async fn process_all(&self, drivers: Vec<DriverRecord>, blacklist: &Blacklist) -> Vec<DriverOutcome> {
        let (tx, mut rx) = mpsc::channel(drivers.len().max(1));
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::new();

        for record in drivers {
            let worker = self.clone();
            let tx = tx.clone();
            let blacklisted = blacklist.contains(&record.name);
            let task_record = record.clone();
            let handle = tasks.spawn(async move {
                let outcome = worker.process(task_record, blacklisted).await;
                let _ = tx.send(outcome).await;
            });
            pending.insert(handle.id(), record);
        }
        drop(tx);

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let Err(e) = joined else { continue };
            if let Some(record) = pending.remove(&e.id()) {
                let failures = self.abandon(&record, Stage::Worker, e).await;
                outcomes.push(DriverOutcome {
                    failures,
                    ..DriverOutcome::new(record)
                });
            }
        }

        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Records a driver whose task died without producing a result, and marks
    /// it errored on the control plane.
    async fn abandon(&self, record: &DriverRecord, stage: Stage, joined: JoinError) -> Vec<DriverFailure> {
        let error = DriverError::TaskAborted {
            driver: record.name.clone(),
            detail: joined.to_string(),
        };
        warn!(driver = %record.name, stage = %stage, error = %error, "Driver task aborted");

        let report = self.report_error(record, &error.to_string()).await;
        let mut failures = vec![DriverFailure::new(&record.name, stage, error)];
        if let Err(e) = report {
            failures.push(DriverFailure::new(&record.name, Stage::Report, e));
        }
        failures
    }

    async fn process(&self, record: DriverRecord, blacklisted: bool) -> DriverOutcome {
        let mut outcome = DriverOutcome::new(record);
        let record = &outcome.record;

        if blacklisted || !record.state.is_wanted() {
            debug!(driver = %record.name, state = %record.state, blacklisted, "Driver not wanted, removing its schema");
            match self.publisher.remove_schema(&record.config_schema_name()).await {
                Ok(removed) => outcome.torn_down = removed > 0,
                Err(e) => outcome.failures.push(DriverFailure::new(&record.name, Stage::Teardown, e)),
            }
            return outcome;
        }

        match self.bring_up(record).await {
            Ok(()) => outcome.published = true,
            Err(failure) => {
                let message = failure.error.to_string();
                warn!(driver = %record.name, stage = %failure.stage, error = %message, "Driver failed");
                let report = self.report_error(record, &message).await;
                outcome.failures.push(failure);
                if let Err(e) = report {
                    outcome.failures.push(DriverFailure::new(&outcome.record.name, Stage::Report, e));
                }
            }
        }
        outcome
    }

    /// Installs when needed, then generates and publishes `<driver>Config`.
    pub async fn bring_up(&self, record: &DriverRecord) -> std::result::Result<(), DriverFailure> {
        if self.needs_install(record) {
            self.installer
                .install(&record.name, &record.source_uri, &record.checksum)
                .await
                .map_err(|e| DriverFailure::new(&record.name, Stage::Install, e))?;
        }

        self.publisher
            .publish_driver_config_schema(&record.name)
            .await
            .map_err(|e| DriverFailure::new(&record.name, Stage::Schema, e))?;
        Ok(())
    }

    fn needs_install(&self, record: &DriverRecord) -> bool {
        if !record.is_downloadable() {
            return false;
        }
        match record.state {
            DriverState::Requested => true,
            DriverState::Active => !self.installer.binary_is_on_path(&record.name),
            _ => false,
        }
    }

    /// Puts the record into its error state and waits until the control plane
    /// shows it, so a later retry cannot race the error being recorded.
    pub async fn report_error(&self, record: &DriverRecord, message: &str) -> Result<()> {
        let Some(id) = record.id.as_deref() else {
            return Ok(());
        };
        if record.builtin {
            return Ok(());
        }

        self.control_plane
            .driver_action(
                id,
                DriverAction::Error {
                    message: message.to_string(),
                },
            )
            .await?;

        let control_plane = &self.control_plane;
        let acknowledged = poll_until(self.settings.state_wait_timeout, Backoff::schema_wait(), || async move {
            Ok(match control_plane.get_driver(id).await? {
                Some(current) if matches!(current.state, DriverState::Error | DriverState::Erroring) => Some(()),
                Some(_) => None,
                None => Some(()),
            })
        })
        .await?;

        acknowledged.ok_or_else(|| DriverError::DriverStateTimeout {
            driver: record.name.clone(),
            expected: DriverState::Error.to_string(),
        })
    }

    async fn activate_all(&self, ready: Vec<DriverRecord>) -> (Vec<String>, Vec<DriverFailure>) {
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::new();
        for record in ready {
            let control_plane = self.control_plane.clone();
            let id = record.id.clone();
            let name = record.name.clone();
            let handle = tasks.spawn(async move {
                let result = match id.as_deref() {
                    Some(id) => control_plane.driver_action(id, DriverAction::Activate).await.map(|_| ()),
                    None => Ok(()),
                };
                (name, result)
            });
            pending.insert(handle.id(), record);
        }

        let mut activated = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    info!(driver = %name, "Driver activated");
                    activated.push(name);
                }
                Ok((name, Err(e))) => failures.push(DriverFailure::new(name, Stage::Activate, e)),
                Err(e) => {
                    if let Some(record) = pending.remove(&e.id()) {
                        failures.extend(self.abandon(&record, Stage::Activate, e).await);
                    }
                }
            }
        }
        activated.sort();
        (activated, failures)
    }
}

fn needs_activation(record: &DriverRecord) -> bool {
    record.id.is_some() && !record.builtin && record.state != DriverState::Active
}

/// Reads the driver list and blacklist setting the cycle starts from.
pub async fn observe_driver_set(
    control_plane: &dyn ControlPlane,
    blacklist_setting: &str,
) -> Result<(Vec<DriverRecord>, Blacklist)> {
    let records = control_plane.list_drivers().await?;
    let blacklist = fetch_blacklist(control_plane, blacklist_setting).await?;
    Ok((records, blacklist))
}

async fn fetch_blacklist(control_plane: &dyn ControlPlane, key: &str) -> Result<Blacklist> {
    let raw = control_plane.get_setting(key).await?.unwrap_or_default();
    Ok(Blacklist::parse(&raw))
}

/// Adds configured built-ins the control plane does not list.
pub fn with_builtins(mut records: Vec<DriverRecord>, builtins: &[String]) -> Vec<DriverRecord> {
    for name in builtins {
        if !records.iter().any(|r| &r.name == name) {
            records.push(DriverRecord::synthesized_builtin(name.as_str()));
        }
    }
    records
}
