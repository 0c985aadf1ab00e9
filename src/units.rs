//! Unit groups, per-system units and record conversion.

use thiserror::Error;
use wxarchive_core::{models::UNITS_COLUMN, ArchiveRecord, UnitSystem, Value};

#[derive(Debug, Error, PartialEq)]
#[error("record at {timestamp} has no known unit system")]
pub struct ConversionError {
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitGroup {
    Temperature,
    Pressure,
    Speed,
    Rain,
    RainRate,
    Altitude,
    Distance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    DegreeF,
    DegreeC,
    InHg,
    Mbar,
    MilePerHour,
    KmPerHour,
    MeterPerSecond,
    Inch,
    Cm,
    Mm,
    InchPerHour,
    CmPerHour,
    MmPerHour,
    Foot,
    Meter,
    Mile,
    Km,
}

const TEMPERATURE: &[&str] = &[
    "outTemp", "inTemp", "dewpoint", "inDewpoint", "heatindex", "windchill", "appTemp", "humidex",
    "heatingTemp", "THSW",
];
const TEMPERATURE_PREFIXES: &[&str] = &["extraTemp", "soilTemp", "leafTemp"];
const PRESSURE: &[&str] = &["barometer", "pressure", "altimeter"];
const SPEED: &[&str] = &["windSpeed", "windGust", "windgustvec", "windvec"];
const RAIN: &[&str] = &["rain", "ET", "hail", "snow", "snowDepth"];
const RAIN_RATE: &[&str] = &["rainRate", "hailRate", "snowRate"];
const ALTITUDE: &[&str] = &["altitude", "cloudbase"];
const DISTANCE: &[&str] = &["windrun", "lightning_distance"];

/// Group of an observation, `None` for dimensionless or unknown ones.
pub fn group_of(observation: &str) -> Option<UnitGroup> {
    let is = |names: &[&str]| names.iter().any(|n| *n == observation);
    if is(TEMPERATURE) || TEMPERATURE_PREFIXES.iter().any(|p| observation.starts_with(p)) {
        Some(UnitGroup::Temperature)
    } else if is(PRESSURE) {
        Some(UnitGroup::Pressure)
    } else if is(SPEED) {
        Some(UnitGroup::Speed)
    } else if is(RAIN) {
        Some(UnitGroup::Rain)
    } else if is(RAIN_RATE) {
        Some(UnitGroup::RainRate)
    } else if is(ALTITUDE) {
        Some(UnitGroup::Altitude)
    } else if is(DISTANCE) {
        Some(UnitGroup::Distance)
    } else {
        None
    }
}

impl UnitGroup {
    pub fn unit_in(self, system: UnitSystem) -> Unit {
        use UnitSystem::*;
        match (self, system) {
            (UnitGroup::Temperature, Us) => Unit::DegreeF,
            (UnitGroup::Temperature, Metric | MetricWx) => Unit::DegreeC,
            (UnitGroup::Pressure, Us) => Unit::InHg,
            (UnitGroup::Pressure, Metric | MetricWx) => Unit::Mbar,
            (UnitGroup::Speed, Us) => Unit::MilePerHour,
            (UnitGroup::Speed, Metric) => Unit::KmPerHour,
            (UnitGroup::Speed, MetricWx) => Unit::MeterPerSecond,
            (UnitGroup::Rain, Us) => Unit::Inch,
            (UnitGroup::Rain, Metric) => Unit::Cm,
            (UnitGroup::Rain, MetricWx) => Unit::Mm,
            (UnitGroup::RainRate, Us) => Unit::InchPerHour,
            (UnitGroup::RainRate, Metric) => Unit::CmPerHour,
            (UnitGroup::RainRate, MetricWx) => Unit::MmPerHour,
            (UnitGroup::Altitude, Us) => Unit::Foot,
            (UnitGroup::Altitude, Metric | MetricWx) => Unit::Meter,
            (UnitGroup::Distance, Us) => Unit::Mile,
            (UnitGroup::Distance, Metric | MetricWx) => Unit::Km,
        }
    }
}

impl Unit {
    /// Factor to the group's base unit (mbar, m/s, mm, mm/h, m, m).
    /// Temperatures are affine and handled apart.
    fn factor(self) -> f64 {
        match self {
            Unit::DegreeF | Unit::DegreeC => 1.0,
            Unit::InHg => 33.863_886_666_7,
            Unit::Mbar => 1.0,
            Unit::MilePerHour => 0.447_04,
            Unit::KmPerHour => 1.0 / 3.6,
            Unit::MeterPerSecond => 1.0,
            Unit::Inch | Unit::InchPerHour => 25.4,
            Unit::Cm | Unit::CmPerHour => 10.0,
            Unit::Mm | Unit::MmPerHour => 1.0,
            Unit::Foot => 0.3048,
            Unit::Meter => 1.0,
            Unit::Mile => 1609.344,
            Unit::Km => 1000.0,
        }
    }
}

pub fn convert(value: f64, from: Unit, to: Unit) -> f64 {
    if from == to {
        return value;
    }
    match (from, to) {
        (Unit::DegreeF, Unit::DegreeC) => (value - 32.0) * 5.0 / 9.0,
        (Unit::DegreeC, Unit::DegreeF) => value * 9.0 / 5.0 + 32.0,
        _ => value * from.factor() / to.factor(),
    }
}

/// Copy of `record` expressed in `to`. Numeric observations of a known group
/// are converted; everything else is copied as is.
pub fn convert_record(record: &ArchiveRecord, to: UnitSystem) -> Result<ArchiveRecord, ConversionError> {
    let from = record.unit_system().ok_or(ConversionError {
        timestamp: record.timestamp,
    })?;
    if from == to {
        return Ok(record.clone());
    }

    let mut converted = ArchiveRecord::new(record.timestamp);
    for (name, value) in &record.values {
        let value = match (group_of(name), value.as_f64()) {
            (Some(group), Some(v)) => Value::Real(convert(v, group.unit_in(from), group.unit_in(to))),
            _ => value.clone(),
        };
        converted.values.insert(name.clone(), value);
    }
    converted.set(UNITS_COLUMN, to.code());
    Ok(converted)
}
