mod common;

use common::{agent, string_flag, test_config, FakeControlPlane, FakeFlagSource, BLACKLIST_SETTING};
use machine_driver_agent::archive::checksum_bytes;
use machine_driver_agent::model::{DriverRecord, DriverState, NewSchema, SchemaDefinition};
use machine_driver_agent::schema::RoleProfile;
use machine_driver_agent::{DriverError, Stage};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DRIVER_BODY: &[u8] = b"#!/bin/sh\necho driver\n";

async fn artifact_server(file: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/{file}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(DRIVER_BODY))
        .mount(&server)
        .await;
    server
}

fn config_schema(driver: &str) -> NewSchema {
    NewSchema {
        name: format!("{driver}Config"),
        parent_name: String::new(),
        roles: RoleProfile::all_roles(),
        definition: SchemaDefinition::default(),
    }
}

#[tokio::test]
async fn one_unreachable_plugin_does_not_block_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let server = artifact_server("docker-machine-driver-beta").await;

    let control_plane = FakeControlPlane::new()
        .with_driver(DriverRecord::new("mda", "alpha", DriverState::Active))
        .with_driver(
            DriverRecord::new("mdb", "beta", DriverState::Requested)
                .with_source(format!("{}/docker-machine-driver-beta", server.uri()), ""),
        );
    control_plane.set_transition_polls(1);
    let flags = FakeFlagSource::new().with_driver("beta", vec![string_flag("beta-region")]);

    let agent = agent(test_config(dir.path()), &control_plane, &flags);
    let mut report = agent.sync().await.unwrap();

    assert_eq!(report.published, vec!["beta"]);
    assert_eq!(report.activated, vec!["beta"]);
    assert_eq!(control_plane.driver("mdb").unwrap().state, DriverState::Active);
    assert!(dir.path().join("bin/docker-machine-driver-beta").is_file());

    let err = report.take_error().unwrap();
    let failures = err.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].driver, "alpha");
    assert_eq!(failures[0].stage, Stage::Schema);
    assert!(matches!(failures[0].error, DriverError::PluginUnreachable { .. }));

    assert_eq!(control_plane.driver("mda").unwrap().state, DriverState::Error);
    assert!(control_plane.error_message("mda").unwrap().contains("unreachable"));

    let machines = control_plane.live_schemas("machine");
    assert_eq!(machines.len(), RoleProfile::ALL.len());
    for machine in machines {
        assert!(machine.definition.field("betaConfig").is_some());
        assert!(machine.definition.field("alphaConfig").is_none());
    }
}

#[tokio::test]
async fn crashed_driver_task_is_reported_not_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let control_plane = FakeControlPlane::new()
        .with_driver(DriverRecord::new("mda", "alpha", DriverState::Active))
        .with_driver(DriverRecord::new("mdb", "beta", DriverState::Active));
    let flags = FakeFlagSource::new()
        .with_crashing_driver("alpha")
        .with_driver("beta", vec![string_flag("beta-region")]);

    let agent = agent(test_config(dir.path()), &control_plane, &flags);
    let report = agent.sync().await.unwrap();

    assert_eq!(report.published, vec!["beta"]);
    assert!(!report.is_clean());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].driver, "alpha");
    assert_eq!(report.failures[0].stage, Stage::Worker);
    assert!(matches!(report.failures[0].error, DriverError::TaskAborted { .. }));

    assert_eq!(control_plane.driver("mda").unwrap().state, DriverState::Error);
    assert!(control_plane.error_message("mda").unwrap().contains("aborted"));
    for machine in control_plane.live_schemas("machine") {
        assert!(machine.definition.field("alphaConfig").is_none());
        assert!(machine.definition.field("betaConfig").is_some());
    }
}

#[tokio::test]
async fn blacklisted_driver_is_never_installed_and_loses_its_schema() {
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(DRIVER_BODY))
        .expect(0)
        .mount(&server)
        .await;

    let control_plane = FakeControlPlane::new().with_driver(
        DriverRecord::new("md1", "foo", DriverState::Requested)
            .with_source(format!("{}/docker-machine-driver-foo", server.uri()), ""),
    );
    control_plane.set_setting(BLACKLIST_SETTING, "bar; foo");
    control_plane.seed_schema(config_schema("foo"));
    let flags = FakeFlagSource::new().with_driver("foo", vec![string_flag("foo-region")]);

    let agent = agent(test_config(dir.path()), &control_plane, &flags);
    let report = agent.sync().await.unwrap();

    assert!(report.is_clean());
    assert!(report.published.is_empty());
    assert_eq!(report.torn_down, vec!["foo"]);
    assert!(control_plane.live_schemas("fooConfig").is_empty());
    assert!(flags.calls().is_empty());
    assert!(control_plane.actions().is_empty());
    assert!(!dir.path().join("bin/docker-machine-driver-foo").exists());
}

#[tokio::test]
async fn active_driver_is_installed_and_blacklisted_one_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let server = artifact_server("docker-machine-driver-digitalocean").await;
    let checksum = checksum_bytes(DRIVER_BODY);

    let control_plane = FakeControlPlane::new()
        .with_driver(
            DriverRecord::new("md1", "digitalocean", DriverState::Active).with_source(
                format!("{}/docker-machine-driver-digitalocean", server.uri()),
                checksum.as_str(),
            ),
        )
        .with_driver(
            DriverRecord::new("md2", "foo", DriverState::Active)
                .with_source(format!("{}/docker-machine-driver-foo", server.uri()), ""),
        );
    control_plane.set_setting(BLACKLIST_SETTING, "foo");
    control_plane.set_transition_polls(2);
    let flags = FakeFlagSource::new()
        .with_driver(
            "digitalocean",
            vec![
                string_flag("digitalocean-access-token"),
                string_flag("digitalocean-ssh-key-path"),
            ],
        )
        .with_driver("foo", vec![string_flag("foo-region")]);

    let agent = agent(test_config(dir.path()), &control_plane, &flags);
    let report = agent.sync().await.unwrap();
    assert!(report.is_clean(), "{:?}", report.failures);

    let binary = dir.path().join("bin/docker-machine-driver-digitalocean");
    assert_eq!(std::fs::read(&binary).unwrap(), DRIVER_BODY);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(std::fs::metadata(&binary).unwrap().permissions().mode() & 0o777, 0o755);
    }

    let configs = control_plane.live_schemas("digitaloceanConfig");
    assert_eq!(configs.len(), 1);
    assert!(!configs[0].transitioning);
    assert!(configs[0].definition.field("accessToken").is_some());
    assert!(configs[0].definition.field("sshKeyPath").is_none());

    for machine in control_plane.live_schemas("machine") {
        assert!(machine.definition.field("digitaloceanConfig").is_some());
        assert!(machine.definition.field("fooConfig").is_none());
    }

    assert_eq!(flags.calls(), vec!["digitalocean"]);
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| !r.url.path().contains("foo")));
    assert!(control_plane.actions().iter().all(|(id, _)| id != "md2"));
    assert!(report.activated.is_empty());
}

#[tokio::test]
async fn checksum_mismatch_is_reported_on_the_driver() {
    let dir = tempfile::tempdir().unwrap();
    let server = artifact_server("docker-machine-driver-beta").await;

    let control_plane = FakeControlPlane::new().with_driver(
        DriverRecord::new("mdb", "beta", DriverState::Requested).with_source(
            format!("{}/docker-machine-driver-beta", server.uri()),
            "0123456789abcdef0123456789abcdef",
        ),
    );
    let flags = FakeFlagSource::new().with_driver("beta", vec![string_flag("beta-region")]);

    let agent = agent(test_config(dir.path()), &control_plane, &flags);
    let report = agent.sync().await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, Stage::Install);
    assert!(matches!(report.failures[0].error, DriverError::ChecksumMismatch { .. }));
    assert!(!dir.path().join("bin/docker-machine-driver-beta").exists());
    assert!(flags.calls().is_empty());
    assert_eq!(control_plane.driver("mdb").unwrap().state, DriverState::Error);
    assert!(control_plane.error_message("mdb").unwrap().contains("checksum mismatch"));
}

#[tokio::test]
async fn unacknowledged_error_report_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let control_plane = FakeControlPlane::new().with_driver(DriverRecord::new("mda", "alpha", DriverState::Active));
    control_plane.ignore_error_actions();

    let mut config = test_config(dir.path());
    config.schema_wait_timeout_secs = 1;
    let agent = agent(config, &control_plane, &FakeFlagSource::new());
    let report = agent.sync().await.unwrap();

    let stages: Vec<_> = report.failures.iter().map(|f| f.stage).collect();
    assert_eq!(stages, vec![Stage::Schema, Stage::Report]);
    assert!(matches!(
        report.failures[1].error,
        DriverError::DriverStateTimeout { ref driver, .. } if driver == "alpha"
    ));
}

#[tokio::test]
async fn unwanted_states_tear_down_schemas() {
    let dir = tempfile::tempdir().unwrap();
    let control_plane = FakeControlPlane::new()
        .with_driver(DriverRecord::new("md1", "old", DriverState::Inactive))
        .with_driver(DriverRecord::new("md2", "gone", DriverState::Removed));
    control_plane.seed_schema(config_schema("old"));
    let flags = FakeFlagSource::new().with_driver("old", vec![string_flag("old-region")]);

    let agent = agent(test_config(dir.path()), &control_plane, &flags);
    let report = agent.sync().await.unwrap();

    assert!(report.is_clean());
    assert_eq!(report.torn_down, vec!["old"]);
    assert!(report.published.is_empty());
    assert!(control_plane.live_schemas("oldConfig").is_empty());
    assert!(flags.calls().is_empty());
}

#[tokio::test]
async fn builtin_drivers_are_schematized_but_never_installed_or_activated() {
    let dir = tempfile::tempdir().unwrap();
    let control_plane = FakeControlPlane::new();
    let flags = FakeFlagSource::new().with_driver("virtualbox", vec![string_flag("virtualbox-memory")]);

    let mut config = test_config(dir.path());
    config.builtin_drivers = vec!["virtualbox".to_string()];
    let agent = agent(config, &control_plane, &flags);
    let report = agent.sync().await.unwrap();

    assert!(report.is_clean());
    assert_eq!(report.published, vec!["virtualbox"]);
    assert!(report.activated.is_empty());
    assert!(control_plane.actions().is_empty());
    assert_eq!(control_plane.live_schemas("virtualboxConfig").len(), 1);
    assert_eq!(report.snapshot.driver_count(), 0);
}

#[tokio::test]
async fn resync_keeps_one_document_per_slot() {
    let dir = tempfile::tempdir().unwrap();
    let control_plane = FakeControlPlane::new().with_driver(DriverRecord::new("md1", "alpha", DriverState::Active));
    control_plane.set_transition_polls(1);
    let flags = FakeFlagSource::new().with_driver("alpha", vec![string_flag("alpha-region")]);

    let agent = agent(test_config(dir.path()), &control_plane, &flags);
    agent.sync().await.unwrap();
    agent.sync().await.unwrap();

    assert_eq!(control_plane.live_schemas("alphaConfig").len(), 1);
    let machines = control_plane.live_schemas("machine");
    assert_eq!(machines.len(), RoleProfile::ALL.len());
    let roles: std::collections::BTreeSet<_> = machines.iter().map(|m| m.roles.clone()).collect();
    assert_eq!(roles.len(), RoleProfile::ALL.len());
}
