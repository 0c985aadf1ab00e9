use std::sync::Arc;

use wxarchive::{
    cli::{dispatch, CliArgs, Outcome},
    columns::{self, ColumnOutcome},
    daily::{self, BackfillOutcome, DropOutcome},
    integrity::{self, Resolution},
    lifecycle::{self, CreateOutcome},
    reconfigure::{self, ReconfigureOutcome},
    transfer::{self, TransferOutcome},
    Config, DriverRegistry, MaintenanceError, Manager, ResolveError,
};
use wxarchive_core::{
    models::summary::SECONDS_PER_DAY, ArchiveRecord, BackendDescriptor, StorageError, StorageType, UnitSystem, Value,
};
use wxarchive_memory::MemoryDriver;

use clap::Parser;

const CONFIG: &str = r#"
[bindings.wx_binding]
database = "archive_mem"

[bindings.dest_binding]
database = "dest_mem"

[bindings.broken_driver]
database = "archive_mysql"

[databases.archive_mem]
database_type = "Memory"
database_name = "weewx"

[databases.dest_mem]
database_type = "Memory"
database_name = "weewx_copy"

[databases.archive_mysql]
database_type = "MySQL"
database_name = "weewx"

[database_types.Memory]
driver = "memory"

[database_types.MySQL]
driver = "mysql"
"#;

fn setup() -> (Config, DriverRegistry, MemoryDriver) {
    setup_with(CONFIG)
}

fn setup_with(config: &str) -> (Config, DriverRegistry, MemoryDriver) {
    let memory = MemoryDriver::new();
    let mut registry = DriverRegistry::new();
    registry.register("memory", Arc::new(memory.clone()));
    (Config::from_toml(config).unwrap(), registry, memory)
}

fn descriptor(config: &Config, binding: &str) -> BackendDescriptor {
    config.resolve(binding).unwrap().descriptor
}

fn open(config: &Config, memory: &MemoryDriver, binding: &str) -> Manager {
    Manager::open(memory, &descriptor(config, binding), "archive").unwrap()
}

fn record(ts: i64, units: UnitSystem, temp: f64) -> ArchiveRecord {
    ArchiveRecord::new(ts)
        .with("usUnits", units.code())
        .with("interval", 5)
        .with("outTemp", temp)
        .with("barometer", 1013.0)
}

fn seed(config: &Config, registry: &DriverRegistry, memory: &MemoryDriver, binding: &str, records: Vec<ArchiveRecord>) {
    lifecycle::create_archive(config, registry, binding).unwrap();
    let manager = open(config, memory, binding);
    manager.add_records(records.into_iter().map(Ok)).unwrap();
    manager.close().unwrap();
}

fn yes() -> impl FnMut(&str) -> bool {
    |_: &str| true
}

fn no() -> impl FnMut(&str) -> bool {
    |_: &str| false
}

fn timestamps(manager: &Manager) -> Vec<i64> {
    manager.records().map(|r| r.unwrap().timestamp).collect()
}

#[test]
fn test_create_archive_twice() {
    let (config, registry, memory) = setup();

    match lifecycle::create_archive(&config, &registry, "wx_binding").unwrap() {
        CreateOutcome::Created { table, columns, .. } => {
            assert_eq!(table, "archive");
            assert!(columns > 3);
        }
        other => panic!("Expected Created, got {:?}", other),
    }

    let manager = open(&config, &memory, "wx_binding");
    manager.add_records(vec![Ok(record(100, UnitSystem::Us, 50.0))].into_iter()).unwrap();
    manager.close().unwrap();

    assert!(matches!(
        lifecycle::create_archive(&config, &registry, "wx_binding").unwrap(),
        CreateOutcome::AlreadyExists { .. }
    ));
    let manager = open(&config, &memory, "wx_binding");
    assert_eq!(manager.count().unwrap(), 1);
    assert_eq!(manager.store().summary_last_update("archive").unwrap(), None);
}

#[test]
fn test_create_archive_in_existing_empty_database() {
    let (config, registry, memory) = setup();
    use wxarchive_core::StorageDriver;
    memory.create(&descriptor(&config, "wx_binding")).unwrap();

    assert!(matches!(
        lifecycle::create_archive(&config, &registry, "wx_binding").unwrap(),
        CreateOutcome::Created { .. }
    ));
    assert!(open(&config, &memory, "wx_binding").store().table_exists("archive").unwrap());
}

#[test]
fn test_backfill_after_drop_reprocesses_everything() {
    let (config, registry, memory) = setup();
    let day = SECONDS_PER_DAY;
    seed(
        &config,
        &registry,
        &memory,
        "wx_binding",
        vec![
            record(100, UnitSystem::Us, 10.0),
            record(400, UnitSystem::Us, 30.0),
            record(day + 100, UnitSystem::Us, 5.0),
            record(day + 400, UnitSystem::Us, 7.0),
            record(2 * day + 50, UnitSystem::Us, 1.0),
            record(2 * day + 60, UnitSystem::Us, 2.0),
        ],
    );

    assert_eq!(
        daily::backfill_daily(&config, &registry, "wx_binding").unwrap(),
        BackfillOutcome::Backfilled { records: 6, days: 3 }
    );
    assert_eq!(
        daily::backfill_daily(&config, &registry, "wx_binding").unwrap(),
        BackfillOutcome::UpToDate
    );

    let manager = open(&config, &memory, "wx_binding");
    let summary = manager.store().day_summary("archive", "outTemp", 0).unwrap().unwrap();
    assert_eq!(summary.count, 2);
    assert_eq!(summary.min, Some(10.0));
    assert_eq!(summary.max_time, Some(400));
    assert_eq!(summary.sumtime, 600);
    assert_eq!(summary.avg(), Some(20.0));
    assert_eq!(manager.store().summary_last_update("archive").unwrap(), Some(2 * day + 60));
    manager.close().unwrap();

    let mut confirm = yes();
    assert!(matches!(
        daily::drop_daily(&config, &registry, "wx_binding", false, &mut confirm).unwrap(),
        DropOutcome::Dropped { .. }
    ));
    assert_eq!(
        daily::backfill_daily(&config, &registry, "wx_binding").unwrap(),
        BackfillOutcome::Backfilled { records: 6, days: 3 }
    );
}

#[test]
fn test_backfill_merges_partly_summarised_day() {
    let (config, registry, memory) = setup();
    seed(
        &config,
        &registry,
        &memory,
        "wx_binding",
        vec![record(100, UnitSystem::Us, 10.0), record(400, UnitSystem::Us, 20.0)],
    );
    daily::backfill_daily(&config, &registry, "wx_binding").unwrap();

    let manager = open(&config, &memory, "wx_binding");
    manager
        .add_records(vec![Ok(record(700, UnitSystem::Us, 30.0))].into_iter())
        .unwrap();
    manager.close().unwrap();

    assert_eq!(
        daily::backfill_daily(&config, &registry, "wx_binding").unwrap(),
        BackfillOutcome::Backfilled { records: 1, days: 1 }
    );
    let manager = open(&config, &memory, "wx_binding");
    let summary = manager.store().day_summary("archive", "outTemp", 0).unwrap().unwrap();
    assert_eq!(summary.count, 3);
    assert_eq!(summary.sum, 60.0);
    assert_eq!(summary.max, Some(30.0));
}

#[test]
fn test_backfill_creates_missing_archive() {
    let (config, registry, memory) = setup();
    assert_eq!(
        daily::backfill_daily(&config, &registry, "wx_binding").unwrap(),
        BackfillOutcome::UpToDate
    );
    assert!(memory.database_exists("weewx"));
}

#[test]
fn test_drop_daily_is_idempotent() {
    let (config, registry, memory) = setup();
    let mut confirm = yes();
    assert!(matches!(
        daily::drop_daily(&config, &registry, "wx_binding", false, &mut confirm).unwrap(),
        DropOutcome::NoArchive { .. }
    ));
    assert!(!memory.database_exists("weewx"));

    seed(&config, &registry, &memory, "wx_binding", vec![record(100, UnitSystem::Us, 1.0)]);
    assert!(matches!(
        daily::drop_daily(&config, &registry, "wx_binding", false, &mut confirm).unwrap(),
        DropOutcome::Dropped { .. }
    ));
    assert!(matches!(
        daily::drop_daily(&config, &registry, "wx_binding", false, &mut confirm).unwrap(),
        DropOutcome::NoSummaries { .. }
    ));
    assert_eq!(open(&config, &memory, "wx_binding").count().unwrap(), 1);
}

#[test]
fn test_drop_daily_declined_or_dry_run_keeps_summaries() {
    let (config, registry, memory) = setup();
    seed(&config, &registry, &memory, "wx_binding", vec![record(100, UnitSystem::Us, 1.0)]);
    daily::backfill_daily(&config, &registry, "wx_binding").unwrap();

    let mut asked = Vec::new();
    let mut decline = |prompt: &str| {
        asked.push(prompt.to_string());
        false
    };
    assert_eq!(
        daily::drop_daily(&config, &registry, "wx_binding", false, &mut decline).unwrap(),
        DropOutcome::Declined
    );
    assert_eq!(asked.len(), 1);

    let mut confirm = yes();
    assert!(matches!(
        daily::drop_daily(&config, &registry, "wx_binding", true, &mut confirm).unwrap(),
        DropOutcome::DryRun { .. }
    ));
    let manager = open(&config, &memory, "wx_binding");
    assert_eq!(manager.store().summary_last_update("archive").unwrap(), Some(100));
}

fn seed_corrupt(config: &Config, registry: &DriverRegistry, memory: &MemoryDriver) {
    seed(
        config,
        registry,
        memory,
        "wx_binding",
        vec![
            record(100, UnitSystem::Us, 1.0).with("outHumidity", "12.5"),
            record(200, UnitSystem::Us, 2.0).with("outHumidity", "abc"),
            record(300, UnitSystem::Us, 3.0).with("outHumidity", 40.0),
        ],
    );
}

fn humidity(manager: &Manager) -> Vec<Value> {
    manager
        .records()
        .map(|r| r.unwrap().get("outHumidity").cloned().unwrap())
        .collect()
}

#[test]
fn test_check_strings_never_mutates() {
    let (config, registry, memory) = setup();
    seed_corrupt(&config, &registry, &memory);

    let report = integrity::check_strings(&config, &registry, "wx_binding", false).unwrap();
    assert_eq!(report.scanned, 3);
    assert_eq!(report.violations.len(), 2);
    assert!(report.violations.iter().all(|v| v.resolution == Resolution::Reported));
    assert_eq!((report.fixed, report.nulled), (0, 0));

    let manager = open(&config, &memory, "wx_binding");
    assert_eq!(
        humidity(&manager),
        vec![Value::from("12.5"), Value::from("abc"), Value::Real(40.0)]
    );
}

#[test]
fn test_fix_strings_coerces_or_nulls() {
    let (config, registry, memory) = setup();
    seed_corrupt(&config, &registry, &memory);

    let report = integrity::check_strings(&config, &registry, "wx_binding", true).unwrap();
    assert_eq!(report.violations.len(), 2);
    assert_eq!(report.violations[0].resolution, Resolution::Coerced(Value::Real(12.5)));
    assert_eq!(report.violations[1].resolution, Resolution::Nulled);
    assert_eq!((report.fixed, report.nulled), (1, 1));
    assert!(report.to_string().contains("2 type mismatches"));

    let manager = open(&config, &memory, "wx_binding");
    assert_eq!(humidity(&manager), vec![Value::Real(12.5), Value::Null, Value::Real(40.0)]);
    let temps: Vec<Value> = manager
        .records()
        .map(|r| r.unwrap().get("outTemp").cloned().unwrap())
        .collect();
    assert_eq!(temps, vec![Value::Real(1.0), Value::Real(2.0), Value::Real(3.0)]);
    manager.close().unwrap();

    assert!(integrity::check_strings(&config, &registry, "wx_binding", false).unwrap().is_clean());
}

#[test]
fn test_check_strings_without_archive() {
    let (config, registry, _memory) = setup();
    let err = integrity::check_strings(&config, &registry, "wx_binding", false).unwrap_err();
    assert!(err.is_missing_archive());
}

fn reconfigure_config(target: &str) -> String {
    format!("[convert]\ntarget_unit = \"{}\"\n{}", target, CONFIG)
}

#[test]
fn test_reconfigure_converts_into_new_database() {
    let (config, registry, memory) = setup_with(&reconfigure_config("US"));
    seed(
        &config,
        &registry,
        &memory,
        "wx_binding",
        vec![
            record(100, UnitSystem::Metric, 0.0),
            record(200, UnitSystem::Metric, 100.0),
            record(300, UnitSystem::Metric, -40.0),
        ],
    );

    let mut confirm = yes();
    match reconfigure::reconfigure(&config, &registry, "wx_binding", &mut confirm).unwrap() {
        ReconfigureOutcome::Reconfigured { records, from, to, .. } => {
            assert_eq!(records, 3);
            assert_eq!(from, UnitSystem::Metric);
            assert_eq!(to, UnitSystem::Us);
        }
        other => panic!("Expected Reconfigured, got {:?}", other),
    }

    let new_desc = descriptor(&config, "wx_binding").with_database_name("weewx_new");
    let new = Manager::open(&memory, &new_desc, "archive").unwrap();
    assert_eq!(new.count().unwrap(), 3);
    assert_eq!(new.unit_system().unwrap(), Some(UnitSystem::Us));
    let temps: Vec<f64> = new
        .records()
        .map(|r| r.unwrap().get("outTemp").and_then(Value::as_f64).unwrap())
        .collect();
    assert!((temps[0] - 32.0).abs() < 1e-9);
    assert!((temps[1] - 212.0).abs() < 1e-9);
    assert!((temps[2] + 40.0).abs() < 1e-9);
    assert_eq!(new.store().summary_last_update("archive").unwrap(), Some(300));

    let old = open(&config, &memory, "wx_binding");
    assert_eq!(old.count().unwrap(), 3);
    assert_eq!(timestamps(&old), vec![100, 200, 300]);
    assert_eq!(old.unit_system().unwrap(), Some(UnitSystem::Metric));
    assert_eq!(
        old.records().next().unwrap().unwrap().get("outTemp"),
        Some(&Value::Real(0.0))
    );
}

#[test]
fn test_reconfigure_declined_removes_new_database() {
    let (config, registry, memory) = setup_with(&reconfigure_config("US"));
    seed(&config, &registry, &memory, "wx_binding", vec![record(100, UnitSystem::Metric, 0.0)]);

    let mut confirm = no();
    assert_eq!(
        reconfigure::reconfigure(&config, &registry, "wx_binding", &mut confirm).unwrap(),
        ReconfigureOutcome::Declined
    );
    assert!(!memory.database_exists("weewx_new"));
    assert_eq!(open(&config, &memory, "wx_binding").count().unwrap(), 1);
}

#[test]
fn test_reconfigure_uninitialized_archive() {
    let (config, registry, memory) = setup();
    lifecycle::create_archive(&config, &registry, "wx_binding").unwrap();

    let mut confirm = yes();
    let err = reconfigure::reconfigure(&config, &registry, "wx_binding", &mut confirm).unwrap_err();
    assert!(matches!(err, MaintenanceError::NotInitialized(_)));
    assert!(!memory.database_exists("weewx_new"));
}

#[test]
fn test_reconfigure_existing_new_database_asks_first() {
    let (config, registry, memory) = setup();
    seed(&config, &registry, &memory, "wx_binding", vec![record(100, UnitSystem::Metric, 0.0)]);
    use wxarchive_core::StorageDriver;
    let new_desc = descriptor(&config, "wx_binding").with_database_name("weewx_new");
    memory.create(&new_desc).unwrap();

    let mut prompts = Vec::new();
    let mut decline = |prompt: &str| {
        prompts.push(prompt.to_string());
        false
    };
    assert_eq!(
        reconfigure::reconfigure(&config, &registry, "wx_binding", &mut decline).unwrap(),
        ReconfigureOutcome::Declined
    );
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("already exists"));
    assert!(memory.database_exists("weewx_new"));

    let mut confirm = yes();
    match reconfigure::reconfigure(&config, &registry, "wx_binding", &mut confirm).unwrap() {
        ReconfigureOutcome::Reconfigured { records, from, to, .. } => {
            assert_eq!(records, 1);
            assert_eq!(from, to);
        }
        other => panic!("Expected Reconfigured, got {:?}", other),
    }
}

#[test]
fn test_reconfigure_unknown_target_unit() {
    let (config, registry, memory) = setup_with(&reconfigure_config("IMPERIAL"));
    seed(&config, &registry, &memory, "wx_binding", vec![record(100, UnitSystem::Metric, 0.0)]);
    let mut confirm = yes();
    let err = reconfigure::reconfigure(&config, &registry, "wx_binding", &mut confirm).unwrap_err();
    assert!(matches!(err, MaintenanceError::Resolve(ResolveError::UnknownUnitSystem(_))));
    assert!(!memory.database_exists("weewx_new"));
}

fn three_records(config: &Config, registry: &DriverRegistry, memory: &MemoryDriver) {
    seed(
        config,
        registry,
        memory,
        "wx_binding",
        vec![
            record(100, UnitSystem::Us, 1.0),
            record(200, UnitSystem::Us, 2.0),
            record(300, UnitSystem::Us, 3.0),
        ],
    );
}

#[test]
fn test_transfer_unknown_destination_binding() {
    let (config, registry, memory) = setup();
    let mut confirm = yes();
    let err = transfer::transfer(&config, &registry, "wx_binding", Some("nowhere"), false, &mut confirm).unwrap_err();
    assert!(matches!(err, MaintenanceError::Resolve(ResolveError::BindingNotFound(ref b)) if b == "nowhere"));
    assert!(!memory.database_exists("weewx"));
    assert!(!memory.database_exists("weewx_copy"));
}

#[test]
fn test_transfer_requires_destination() {
    let (config, registry, _memory) = setup();
    let mut confirm = yes();
    for dest in [None, Some(""), Some("  ")] {
        let err = transfer::transfer(&config, &registry, "wx_binding", dest, false, &mut confirm).unwrap_err();
        assert!(matches!(err, MaintenanceError::Usage(_)));
        assert_eq!(err.exit_code(), 2);
    }
}

#[test]
fn test_transfer_unknown_driver_fails_before_connecting() {
    let (config, registry, memory) = setup();
    let mut confirm = yes();
    let err = transfer::transfer(&config, &registry, "wx_binding", Some("broken_driver"), false, &mut confirm).unwrap_err();
    assert!(matches!(err, MaintenanceError::DriverLoad { ref driver, .. } if driver == "mysql"));
    assert!(!memory.database_exists("weewx"));
}

#[test]
fn test_transfer_dry_run_touches_nothing() {
    let (config, registry, memory) = setup();
    three_records(&config, &registry, &memory);

    let mut confirm = no();
    let outcome = transfer::transfer(&config, &registry, "wx_binding", Some("dest_binding"), true, &mut confirm).unwrap();
    assert!(matches!(outcome, TransferOutcome::DryRun { count: 3, .. }));
    assert!(!memory.database_exists("weewx_copy"));
}

#[test]
fn test_transfer_empty_source() {
    let (config, registry, memory) = setup();
    lifecycle::create_archive(&config, &registry, "wx_binding").unwrap();
    let mut confirm = yes();
    assert!(matches!(
        transfer::transfer(&config, &registry, "wx_binding", Some("dest_binding"), false, &mut confirm).unwrap(),
        TransferOutcome::NothingToTransfer { .. }
    ));
    assert!(!memory.database_exists("weewx_copy"));
}

#[test]
fn test_transfer_copies_every_record() {
    let (config, registry, memory) = setup();
    three_records(&config, &registry, &memory);

    let mut confirm = yes();
    assert!(matches!(
        transfer::transfer(&config, &registry, "wx_binding", Some("dest_binding"), false, &mut confirm).unwrap(),
        TransferOutcome::Transferred { count: 3, .. }
    ));

    let source = open(&config, &memory, "wx_binding");
    let dest = open(&config, &memory, "dest_binding");
    assert_eq!(source.count().unwrap(), dest.count().unwrap());
    assert_eq!(timestamps(&dest), vec![100, 200, 300]);
    assert_eq!(
        dest.records().last().unwrap().unwrap().get("outTemp"),
        Some(&Value::Real(3.0))
    );
}

#[test]
fn test_transfer_declined() {
    let (config, registry, memory) = setup();
    three_records(&config, &registry, &memory);
    let mut confirm = no();
    assert_eq!(
        transfer::transfer(&config, &registry, "wx_binding", Some("dest_binding"), false, &mut confirm).unwrap(),
        TransferOutcome::Declined
    );
    assert!(!memory.database_exists("weewx_copy"));
}

#[test]
fn test_transfer_into_overlapping_destination_rolls_back() {
    let (config, registry, memory) = setup();
    three_records(&config, &registry, &memory);
    seed(&config, &registry, &memory, "dest_binding", vec![record(200, UnitSystem::Us, 9.0)]);

    let mut confirm = yes();
    let err = transfer::transfer(&config, &registry, "wx_binding", Some("dest_binding"), false, &mut confirm).unwrap_err();
    assert!(matches!(err, MaintenanceError::Storage(StorageError::DuplicateTimestamp(200))));
    assert_eq!(timestamps(&open(&config, &memory, "dest_binding")), vec![200]);
}

#[test]
fn test_transfer_rejects_mixed_unit_systems() {
    let (config, registry, memory) = setup();
    three_records(&config, &registry, &memory);
    seed(&config, &registry, &memory, "dest_binding", vec![record(50, UnitSystem::MetricWx, 9.0)]);

    let mut confirm = yes();
    let err = transfer::transfer(&config, &registry, "wx_binding", Some("dest_binding"), false, &mut confirm).unwrap_err();
    assert!(matches!(
        err,
        MaintenanceError::Storage(StorageError::UnitSystemMismatch {
            expected: UnitSystem::MetricWx,
            ..
        })
    ));
    assert_eq!(open(&config, &memory, "dest_binding").count().unwrap(), 1);
}

#[test]
fn test_transfer_memory_to_sqlite() {
    let dir = tempfile::TempDir::new().unwrap();
    let config_text = format!(
        "{}\n[bindings.sqlite_binding]\ndatabase = \"archive_sqlite\"\n\n\
         [databases.archive_sqlite]\ndatabase_type = \"SQLite\"\ndatabase_name = \"weewx.sdb\"\n\n\
         [database_types.SQLite]\ndriver = \"sqlite\"\nroot = '{}'\n",
        CONFIG,
        dir.path().display()
    );
    let memory = MemoryDriver::new();
    let mut registry = DriverRegistry::with_defaults();
    registry.register("memory", Arc::new(memory.clone()));
    let config = Config::from_toml(&config_text).unwrap();
    three_records(&config, &registry, &memory);

    let mut confirm = yes();
    assert!(matches!(
        transfer::transfer(&config, &registry, "wx_binding", Some("sqlite_binding"), false, &mut confirm).unwrap(),
        TransferOutcome::Transferred { count: 3, .. }
    ));
    assert!(dir.path().join("weewx.sdb").exists());

    let sqlite = registry.get("sqlite").unwrap();
    let dest = Manager::open(sqlite.as_ref(), &descriptor(&config, "sqlite_binding"), "archive").unwrap();
    assert_eq!(dest.count().unwrap(), 3);
    assert_eq!(dest.unit_system().unwrap(), Some(UnitSystem::Us));
    assert_eq!(
        dest.records().next().unwrap().unwrap().get("barometer"),
        Some(&Value::Real(1013.0))
    );
    dest.close().unwrap();

    assert_eq!(
        daily::backfill_daily(&config, &registry, "sqlite_binding").unwrap(),
        BackfillOutcome::Backfilled { records: 3, days: 1 }
    );
}

#[test]
fn test_column_maintenance() {
    let (config, registry, memory) = setup();
    three_records(&config, &registry, &memory);
    daily::backfill_daily(&config, &registry, "wx_binding").unwrap();
    let mut confirm = yes();

    assert_eq!(
        columns::add_column(&config, &registry, "wx_binding", "nox", StorageType::Real, &mut confirm).unwrap(),
        ColumnOutcome::Added {
            column: "nox".to_string(),
            storage_type: StorageType::Real
        }
    );
    assert!(matches!(
        columns::add_column(&config, &registry, "wx_binding", "nox", StorageType::Real, &mut confirm),
        Err(MaintenanceError::Usage(_))
    ));

    columns::rename_column(&config, &registry, "wx_binding", "outTemp", "airTemp", &mut confirm).unwrap();
    let manager = open(&config, &memory, "wx_binding");
    assert!(manager.schema().column("airTemp").is_some());
    assert!(manager.schema().column("outTemp").is_none());
    assert_eq!(manager.records().next().unwrap().unwrap().get("airTemp"), Some(&Value::Real(1.0)));
    assert!(manager.store().day_summary("archive", "airTemp", 0).unwrap().is_some());
    manager.close().unwrap();

    let outcome = columns::drop_columns(
        &config,
        &registry,
        "wx_binding",
        &["nox".to_string(), "nothere".to_string()],
        &mut confirm,
    )
    .unwrap();
    assert_eq!(
        outcome,
        ColumnOutcome::Dropped {
            columns: vec!["nox".to_string()],
            unknown: vec!["nothere".to_string()]
        }
    );
    assert!(matches!(
        columns::drop_columns(&config, &registry, "wx_binding", &["nothere".to_string()], &mut confirm).unwrap(),
        ColumnOutcome::NothingToDrop { .. }
    ));
    assert!(open(&config, &memory, "wx_binding").schema().column("nox").is_none());
}

#[test]
fn test_protected_columns() {
    let (config, registry, memory) = setup();
    three_records(&config, &registry, &memory);
    let mut confirm = yes();
    for protected in ["dateTime", "usUnits", "interval"] {
        assert!(matches!(
            columns::rename_column(&config, &registry, "wx_binding", protected, "other", &mut confirm),
            Err(MaintenanceError::Usage(_))
        ));
        assert!(matches!(
            columns::drop_columns(&config, &registry, "wx_binding", &[protected.to_string()], &mut confirm),
            Err(MaintenanceError::Usage(_))
        ));
    }
}

#[test]
fn test_dispatch_from_command_line() {
    let (config, registry, memory) = setup();
    let args = CliArgs::try_parse_from(["wxarchive", "--create", "--binding", "dest_binding"]).unwrap();
    let mut confirm = yes();
    let outcome = dispatch(args.verb().unwrap(), &args, &config, &registry, &mut confirm).unwrap();
    assert!(matches!(outcome, Outcome::Create(CreateOutcome::Created { .. })));
    assert!(outcome.to_string().starts_with("Created table 'archive'"));
    assert!(memory.database_exists("weewx_copy"));

    let args = CliArgs::try_parse_from(["wxarchive", "--drop-daily", "--binding", "wx_binding"]).unwrap();
    let outcome = dispatch(args.verb().unwrap(), &args, &config, &registry, &mut confirm).unwrap();
    assert_eq!(outcome.to_string(), "No archive in Memory database 'weewx'. Nothing done.");
}

#[test]
fn test_reconfigure_failing_midway_keeps_source() {
    let (config, registry, memory) = setup_with(&reconfigure_config("US"));
    lifecycle::create_archive(&config, &registry, "wx_binding").unwrap();
    let manager = open(&config, &memory, "wx_binding");
    // The second record carries no unit system and cannot be converted.
    let mut rows = vec![
        Ok(record(100, UnitSystem::Metric, 0.0)),
        Ok(ArchiveRecord::new(200).with("interval", 5).with("outTemp", 1.0)),
    ]
    .into_iter();
    manager.store().bulk_insert("archive", &mut rows).unwrap();
    manager.close().unwrap();

    let mut confirm = yes();
    let err = reconfigure::reconfigure(&config, &registry, "wx_binding", &mut confirm).unwrap_err();
    assert!(matches!(err, MaintenanceError::Conversion(ref m) if m.contains("200")));
    assert!(!memory.database_exists("weewx_new"));

    let source = open(&config, &memory, "wx_binding");
    assert_eq!(source.count().unwrap(), 2);
    let span = source.span().unwrap().unwrap();
    assert_eq!((span.start, span.end), (100, 200));
    assert_eq!(source.unit_system().unwrap(), Some(UnitSystem::Metric));
    assert_eq!(
        source.records().next().unwrap().unwrap().get("outTemp"),
        Some(&Value::Real(0.0))
    );
}

#[test]
fn test_transfer_into_unreachable_backend() {
    let dir = tempfile::TempDir::new().unwrap();
    let blocker = dir.path().join("not_a_directory");
    std::fs::write(&blocker, b"occupied").unwrap();
    let config_text = format!(
        "{}\n[bindings.sqlite_binding]\ndatabase = \"archive_sqlite\"\n\n\
         [databases.archive_sqlite]\ndatabase_type = \"SQLite\"\ndatabase_name = \"weewx.sdb\"\n\n\
         [database_types.SQLite]\ndriver = \"sqlite\"\nroot = '{}'\n",
        CONFIG,
        blocker.display()
    );
    let memory = MemoryDriver::new();
    let mut registry = DriverRegistry::with_defaults();
    registry.register("memory", Arc::new(memory.clone()));
    let config = Config::from_toml(&config_text).unwrap();
    three_records(&config, &registry, &memory);

    let mut confirm = yes();
    let err = transfer::transfer(&config, &registry, "wx_binding", Some("sqlite_binding"), false, &mut confirm).unwrap_err();
    assert!(
        matches!(err, MaintenanceError::BackendOperational(ref m) if m.contains("weewx.sdb")),
        "unexpected error: {:?}",
        err
    );
    assert_eq!(err.exit_code(), 1);
    assert_eq!(std::fs::read(&blocker).unwrap(), b"occupied");
    assert_eq!(open(&config, &memory, "wx_binding").count().unwrap(), 3);
}
