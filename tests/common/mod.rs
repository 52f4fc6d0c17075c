#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use machine_driver_agent::model::{DriverAction, DriverRecord, DriverState, NewSchema, SchemaDocument};
use machine_driver_agent::plugin::{CreateFlag, FlagSource};
use machine_driver_agent::{Agent, AgentConfig, ControlPlane, DriverError, Result};

pub const BLACKLIST_SETTING: &str = "machine.driver.blacklist";

#[derive(Default)]
struct State {
    drivers: BTreeMap<String, DriverRecord>,
    schemas: BTreeMap<String, SchemaDocument>,
    settings: BTreeMap<String, String>,
    next_id: u64,
    /// Polls left before a document stops transitioning, by id.
    settling: BTreeMap<String, u32>,
    /// Polls left before a deleted document disappears, by id.
    deleting: BTreeMap<String, u32>,
    transition_polls: u32,
    failing_listings: u32,
    ignore_errors: bool,
    calls: Vec<String>,
    actions: Vec<(String, String)>,
    error_messages: BTreeMap<String, String>,
}

/// In-memory control plane that simulates asynchronous schema transitions.
#[derive(Clone, Default)]
pub struct FakeControlPlane {
    state: Arc<Mutex<State>>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_driver(self, record: DriverRecord) -> Self {
        self.put_driver(record);
        self
    }

    pub fn put_driver(&self, record: DriverRecord) {
        let id = record.id.clone().expect("fake drivers need an id");
        self.state.lock().unwrap().drivers.insert(id, record);
    }

    pub fn remove_driver(&self, id: &str) {
        self.state.lock().unwrap().drivers.remove(id);
    }

    pub fn set_driver_state(&self, id: &str, state: DriverState) {
        if let Some(record) = self.state.lock().unwrap().drivers.get_mut(id) {
            record.state = state;
        }
    }

    pub fn driver(&self, id: &str) -> Option<DriverRecord> {
        self.state.lock().unwrap().drivers.get(id).cloned()
    }

    pub fn set_setting(&self, key: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .settings
            .insert(key.to_string(), value.to_string());
    }

    /// Every created or deleted document reports `transitioning` for this
    /// many polls.
    pub fn set_transition_polls(&self, polls: u32) {
        self.state.lock().unwrap().transition_polls = polls;
    }

    pub fn fail_next_listings(&self, count: u32) {
        self.state.lock().unwrap().failing_listings = count;
    }

    /// Error actions are accepted but never change the record's state.
    pub fn ignore_error_actions(&self) {
        self.state.lock().unwrap().ignore_errors = true;
    }

    pub fn seed_schema(&self, schema: NewSchema) -> SchemaDocument {
        let mut state = self.state.lock().unwrap();
        insert_schema(&mut state, &schema, false)
    }

    pub fn live_schemas(&self, name: &str) -> Vec<SchemaDocument> {
        self.state
            .lock()
            .unwrap()
            .schemas
            .values()
            .filter(|doc| doc.name == name && !doc.removed)
            .cloned()
            .collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn actions(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().actions.clone()
    }

    pub fn error_message(&self, id: &str) -> Option<String> {
        self.state.lock().unwrap().error_messages.get(id).cloned()
    }
}

fn insert_schema(state: &mut State, schema: &NewSchema, transitioning: bool) -> SchemaDocument {
    state.next_id += 1;
    let doc = SchemaDocument {
        id: format!("ds{}", state.next_id),
        name: schema.name.clone(),
        parent_name: schema.parent_name.clone(),
        roles: schema.roles.clone(),
        definition: schema.definition.clone(),
        transitioning,
        removed: false,
    };
    state.schemas.insert(doc.id.clone(), doc.clone());
    doc
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn list_drivers(&self) -> Result<Vec<DriverRecord>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("list_drivers".to_string());
        if state.failing_listings > 0 {
            state.failing_listings -= 1;
            return Err(DriverError::ControlPlane {
                request: "GET machinedrivers".to_string(),
                status: 503,
            });
        }
        Ok(state.drivers.values().cloned().collect())
    }

    async fn get_driver(&self, id: &str) -> Result<Option<DriverRecord>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("get_driver {id}"));
        Ok(state.drivers.get(id).cloned())
    }

    async fn driver_action(&self, id: &str, action: DriverAction) -> Result<DriverRecord> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("driver_action {id} {}", action.name()));
        state.actions.push((id.to_string(), action.name().to_string()));

        let ignore_errors = state.ignore_errors;
        if let DriverAction::Error { message } = &action {
            state.error_messages.insert(id.to_string(), message.clone());
        }

        let record = state
            .drivers
            .get_mut(id)
            .ok_or_else(|| DriverError::DriverNotFound(id.to_string()))?;
        match action {
            DriverAction::Activate => record.state = DriverState::Active,
            DriverAction::Error { .. } if !ignore_errors => record.state = DriverState::Error,
            DriverAction::Error { .. } => {}
        }
        Ok(record.clone())
    }

    async fn find_schemas(&self, name: &str) -> Result<Vec<SchemaDocument>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("find_schemas {name}"));
        Ok(state
            .schemas
            .values()
            .filter(|doc| doc.name == name && !doc.removed)
            .cloned()
            .collect())
    }

    async fn get_schema(&self, id: &str) -> Result<Option<SchemaDocument>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("get_schema {id}"));

        if let Some(left) = state.deleting.get_mut(id) {
            if *left == 0 {
                state.deleting.remove(id);
                state.schemas.remove(id);
                return Ok(None);
            }
            *left -= 1;
        } else if let Some(left) = state.settling.get_mut(id) {
            if *left == 0 {
                state.settling.remove(id);
                if let Some(doc) = state.schemas.get_mut(id) {
                    doc.transitioning = false;
                }
            } else {
                *left -= 1;
            }
        }
        Ok(state.schemas.get(id).cloned())
    }

    async fn create_schema(&self, schema: &NewSchema) -> Result<SchemaDocument> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_schema {}", schema.name));
        let polls = state.transition_polls;
        let doc = insert_schema(&mut state, schema, polls > 0);
        if polls > 0 {
            state.settling.insert(doc.id.clone(), polls);
        }
        Ok(doc)
    }

    async fn delete_schema(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_schema {id}"));
        let polls = state.transition_polls;
        let doc = state
            .schemas
            .get_mut(id)
            .ok_or_else(|| DriverError::ControlPlane {
                request: format!("DELETE dynamicschemas/{id}"),
                status: 404,
            })?;
        doc.transitioning = true;
        state.deleting.insert(id.to_string(), polls);
        Ok(())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("get_setting {key}"));
        Ok(state.settings.get(key).cloned())
    }
}

/// Flag source answering from a fixed table; drivers missing from it are
/// unreachable.
#[derive(Clone, Default)]
pub struct FakeFlagSource {
    flags: Arc<Mutex<BTreeMap<String, Vec<CreateFlag>>>>,
    crashing: Arc<Mutex<BTreeSet<String>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeFlagSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_driver(self, driver: &str, flags: Vec<CreateFlag>) -> Self {
        self.flags.lock().unwrap().insert(driver.to_string(), flags);
        self
    }

    /// Makes every flag request for `driver` panic.
    pub fn with_crashing_driver(self, driver: &str) -> Self {
        self.crashing.lock().unwrap().insert(driver.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FlagSource for FakeFlagSource {
    async fn create_flags(&self, driver: &str) -> Result<Vec<CreateFlag>> {
        self.calls.lock().unwrap().push(driver.to_string());
        if self.crashing.lock().unwrap().contains(driver) {
            panic!("flag source crashed for {driver}");
        }
        self.flags
            .lock()
            .unwrap()
            .get(driver)
            .cloned()
            .ok_or_else(|| DriverError::PluginUnreachable {
                driver: driver.to_string(),
                address: "127.0.0.1:0".to_string(),
                cause: "connection refused".to_string(),
            })
    }
}

pub fn string_flag(name: &str) -> CreateFlag {
    CreateFlag::String {
        name: name.to_string(),
        usage: format!("{name} usage"),
        default: None,
    }
}

pub fn test_config(dir: &Path) -> AgentConfig {
    let install_dir = dir.join("bin");
    let work_dir = dir.join("work");
    std::fs::create_dir_all(&install_dir).unwrap();
    std::fs::create_dir_all(&work_dir).unwrap();

    AgentConfig {
        install_dir,
        work_dir,
        poll_interval_secs: 1,
        max_reconnect_attempts: 3,
        reconnect_backoff_cap_secs: 4,
        schema_wait_timeout_secs: 10,
        ..AgentConfig::default()
    }
}

pub fn agent(config: AgentConfig, control_plane: &FakeControlPlane, flags: &FakeFlagSource) -> Agent {
    Agent::with_collaborators(config, Arc::new(control_plane.clone()), Arc::new(flags.clone())).unwrap()
}
