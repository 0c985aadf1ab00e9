use std::{fmt::Display, path::PathBuf};

use clap::Parser;
use wxarchive_core::StorageType;

use crate::{
    columns::{self, ColumnOutcome},
    config::Config,
    daily::{self, BackfillOutcome, DropOutcome},
    error::MaintenanceError,
    integrity::{self, IntegrityReport},
    lifecycle::{self, CreateOutcome},
    prompt::Confirm,
    reconfigure::{self, ReconfigureOutcome},
    registry::DriverRegistry,
    transfer::{self, TransferOutcome},
};

#[derive(Parser, Debug)]
#[command(name = "wxarchive", about = "Maintenance and migration of weather observation archives")]
pub struct CliArgs {
    /// Path to config file
    #[arg(short, long, default_value = "wxarchive.toml")]
    pub config: PathBuf,

    /// Binding to operate on
    #[arg(short, long, default_value = "wx_binding")]
    pub binding: String,

    /// Log level (overrides config file)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Create the archive if it does not exist
    #[arg(long)]
    pub create: bool,

    /// Drop the daily summary tables
    #[arg(long)]
    pub drop_daily: bool,

    /// Bring the daily summaries up to date
    #[arg(long, alias = "rebuild-daily")]
    pub backfill_daily: bool,

    /// Copy the archive into a new database in the configured unit system
    #[arg(long)]
    pub reconfigure: bool,

    /// Report values whose type does not match their column
    #[arg(long)]
    pub check_strings: bool,

    /// Convert mismatching values to their column's type, or null them
    #[arg(long)]
    pub fix_strings: bool,

    /// Copy every record into --dest-binding
    #[arg(long)]
    pub transfer: bool,

    /// Add a column of --type to the archive
    #[arg(long, value_name = "NAME")]
    pub add_column: Option<String>,

    /// Rename a column to --to-name
    #[arg(long, value_name = "NAME")]
    pub rename_column: Option<String>,

    /// Drop columns, comma separated
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    pub drop_columns: Option<Vec<String>>,

    /// Destination binding for --transfer
    #[arg(long)]
    pub dest_binding: Option<String>,

    /// Show what would happen without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Answer yes to every confirmation
    #[arg(long)]
    pub no_prompt: bool,

    /// Storage type for --add-column
    #[arg(long = "type", value_name = "TYPE", default_value = "REAL")]
    pub column_type: String,

    /// New name for --rename-column
    #[arg(long)]
    pub to_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verb {
    Create,
    DropDaily,
    BackfillDaily,
    Reconfigure,
    CheckStrings,
    FixStrings,
    Transfer,
    AddColumn { name: String, storage_type: StorageType },
    RenameColumn { from: String, to: String },
    DropColumns(Vec<String>),
}

const VERB_FLAGS: &str = "--create, --drop-daily, --backfill-daily, --reconfigure, --check-strings, \
                          --fix-strings, --transfer, --add-column, --rename-column, --drop-columns";

impl CliArgs {
    /// The one operation requested on the command line.
    pub fn verb(&self) -> Result<Verb, MaintenanceError> {
        let requested = [
            self.create,
            self.drop_daily,
            self.backfill_daily,
            self.reconfigure,
            self.check_strings,
            self.fix_strings,
            self.transfer,
            self.add_column.is_some(),
            self.rename_column.is_some(),
            self.drop_columns.is_some(),
        ]
        .iter()
        .filter(|flag| **flag)
        .count();

        match requested {
            0 => return Err(MaintenanceError::Usage(format!("specify one of {}", VERB_FLAGS))),
            1 => {}
            _ => return Err(MaintenanceError::Usage(format!("only one of {} may be given", VERB_FLAGS))),
        }

        if let Some(name) = &self.add_column {
            let storage_type = self
                .column_type
                .parse::<StorageType>()
                .map_err(MaintenanceError::Usage)?;
            return Ok(Verb::AddColumn {
                name: name.clone(),
                storage_type,
            });
        }
        if let Some(from) = &self.rename_column {
            let to = self
                .to_name
                .clone()
                .ok_or_else(|| MaintenanceError::Usage("--rename-column requires --to-name".to_string()))?;
            return Ok(Verb::RenameColumn { from: from.clone(), to });
        }
        if let Some(names) = &self.drop_columns {
            return Ok(Verb::DropColumns(names.clone()));
        }

        Ok(if self.create {
            Verb::Create
        } else if self.drop_daily {
            Verb::DropDaily
        } else if self.backfill_daily {
            Verb::BackfillDaily
        } else if self.reconfigure {
            Verb::Reconfigure
        } else if self.check_strings {
            Verb::CheckStrings
        } else if self.fix_strings {
            Verb::FixStrings
        } else {
            Verb::Transfer
        })
    }
}

/// Result of whichever operation ran.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Create(CreateOutcome),
    DropDaily(DropOutcome),
    Backfill(BackfillOutcome),
    Reconfigure(ReconfigureOutcome),
    Integrity(IntegrityReport),
    Transfer(TransferOutcome),
    Column(ColumnOutcome),
}

impl Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Create(o) => Display::fmt(o, f),
            Outcome::DropDaily(o) => Display::fmt(o, f),
            Outcome::Backfill(o) => Display::fmt(o, f),
            Outcome::Reconfigure(o) => Display::fmt(o, f),
            Outcome::Integrity(o) => Display::fmt(o, f),
            Outcome::Transfer(o) => Display::fmt(o, f),
            Outcome::Column(o) => Display::fmt(o, f),
        }
    }
}

pub fn dispatch(
    verb: Verb,
    args: &CliArgs,
    config: &Config,
    registry: &DriverRegistry,
    confirm: &mut dyn Confirm,
) -> Result<Outcome, MaintenanceError> {
    let binding = args.binding.as_str();
    tracing::debug!(?verb, binding, "dispatching");

    Ok(match verb {
        Verb::Create => Outcome::Create(lifecycle::create_archive(config, registry, binding)?),
        Verb::DropDaily => Outcome::DropDaily(daily::drop_daily(config, registry, binding, args.dry_run, confirm)?),
        Verb::BackfillDaily => Outcome::Backfill(daily::backfill_daily(config, registry, binding)?),
        Verb::Reconfigure => Outcome::Reconfigure(reconfigure::reconfigure(config, registry, binding, confirm)?),
        Verb::CheckStrings => Outcome::Integrity(integrity::check_strings(config, registry, binding, false)?),
        Verb::FixStrings => Outcome::Integrity(integrity::check_strings(config, registry, binding, true)?),
        Verb::Transfer => Outcome::Transfer(transfer::transfer(
            config,
            registry,
            binding,
            args.dest_binding.as_deref(),
            args.dry_run,
            confirm,
        )?),
        Verb::AddColumn { name, storage_type } => {
            Outcome::Column(columns::add_column(config, registry, binding, &name, storage_type, confirm)?)
        }
        Verb::RenameColumn { from, to } => {
            Outcome::Column(columns::rename_column(config, registry, binding, &from, &to, confirm)?)
        }
        Verb::DropColumns(names) => Outcome::Column(columns::drop_columns(config, registry, binding, &names, confirm)?),
    })
}
