//! Sensor taxonomy for the fermentation vessel.
//!
//! The raw stream publishes a handful of signals under short MQTT-derived
//! measurement names (`broth`, `headspace`, `co2`, ...). Everything downstream
//! of the gateway works in canonical tag names, so the mapping lives here as a
//! bidirectional lookup on the [`SensorTag`] enum.

use serde::{Deserialize, Serialize};

/// A physical signal on the vessel. The set is closed at config time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SensorTag {
    #[serde(rename = "pH")]
    Ph,
    #[serde(rename = "DO")]
    Do,
    #[serde(rename = "OD")]
    Od,
    #[serde(rename = "Temp_Broth")]
    TempBroth,
    #[serde(rename = "Temp_pH_Probe")]
    TempPhProbe,
    #[serde(rename = "Temp_DO_Probe")]
    TempDoProbe,
    #[serde(rename = "Temp_Stirrer_Motor")]
    TempStirrerMotor,
    #[serde(rename = "Temp_Exhaust")]
    TempExhaust,
    #[serde(rename = "Gas_MFC_air")]
    GasMfcAir,
    #[serde(rename = "Stir_SP")]
    StirSp,
    #[serde(rename = "Stir_torque")]
    StirTorque,
    #[serde(rename = "Reactor_Pressure")]
    ReactorPressure,
    #[serde(rename = "Weight")]
    Weight,
    #[serde(rename = "Heater_PID_out")]
    HeaterPidOut,
    #[serde(rename = "Base_Pump_Rate")]
    BasePumpRate,
    #[serde(rename = "Off_Gas_CO2")]
    OffGasCo2,
    #[serde(rename = "Off_Gas_O2")]
    OffGasO2,
    #[serde(rename = "Gas_Flow_Inlet")]
    GasFlowInlet,
    #[serde(rename = "Gas_Flow_Outlet")]
    GasFlowOutlet,
}

/// Every tag the pipeline reads each cycle.
pub const ALL_SENSOR_TAGS: [SensorTag; 19] = [
    SensorTag::Ph,
    SensorTag::Do,
    SensorTag::Od,
    SensorTag::TempBroth,
    SensorTag::TempPhProbe,
    SensorTag::TempDoProbe,
    SensorTag::TempStirrerMotor,
    SensorTag::TempExhaust,
    SensorTag::GasMfcAir,
    SensorTag::StirSp,
    SensorTag::StirTorque,
    SensorTag::ReactorPressure,
    SensorTag::Weight,
    SensorTag::HeaterPidOut,
    SensorTag::BasePumpRate,
    SensorTag::OffGasCo2,
    SensorTag::OffGasO2,
    SensorTag::GasFlowInlet,
    SensorTag::GasFlowOutlet,
];

impl SensorTag {
    /// Canonical name used in feature keys, quality reports and alerts.
    pub fn canonical(&self) -> &'static str {
        match self {
            SensorTag::Ph => "pH",
            SensorTag::Do => "DO",
            SensorTag::Od => "OD",
            SensorTag::TempBroth => "Temp_Broth",
            SensorTag::TempPhProbe => "Temp_pH_Probe",
            SensorTag::TempDoProbe => "Temp_DO_Probe",
            SensorTag::TempStirrerMotor => "Temp_Stirrer_Motor",
            SensorTag::TempExhaust => "Temp_Exhaust",
            SensorTag::GasMfcAir => "Gas_MFC_air",
            SensorTag::StirSp => "Stir_SP",
            SensorTag::StirTorque => "Stir_torque",
            SensorTag::ReactorPressure => "Reactor_Pressure",
            SensorTag::Weight => "Weight",
            SensorTag::HeaterPidOut => "Heater_PID_out",
            SensorTag::BasePumpRate => "Base_Pump_Rate",
            SensorTag::OffGasCo2 => "Off_Gas_CO2",
            SensorTag::OffGasO2 => "Off_Gas_O2",
            SensorTag::GasFlowInlet => "Gas_Flow_Inlet",
            SensorTag::GasFlowOutlet => "Gas_Flow_Outlet",
        }
    }

    /// Measurement name the ingestion agent writes into the raw bucket.
    /// Identical to the canonical name except for the aliased signals.
    pub fn raw_measurement(&self) -> &'static str {
        match self {
            SensorTag::TempBroth => "broth",
            SensorTag::TempPhProbe => "ph_probe",
            SensorTag::TempDoProbe => "do_probe",
            SensorTag::TempStirrerMotor => "stirrer_motor",
            SensorTag::TempExhaust => "exhaust",
            SensorTag::ReactorPressure => "headspace",
            SensorTag::OffGasCo2 => "co2",
            SensorTag::OffGasO2 => "o2",
            SensorTag::GasFlowInlet => "flow_in",
            SensorTag::GasFlowOutlet => "flow_out",
            other => other.canonical(),
        }
    }

    /// Resolve a canonical name.
    pub fn from_canonical(name: &str) -> Option<Self> {
        ALL_SENSOR_TAGS.iter().copied().find(|t| t.canonical() == name)
    }

    /// Resolve a raw-stream measurement name (alias or canonical).
    pub fn from_raw(name: &str) -> Option<Self> {
        ALL_SENSOR_TAGS
            .iter()
            .copied()
            .find(|t| t.raw_measurement() == name)
            .or_else(|| Self::from_canonical(name))
    }
}

impl std::fmt::Display for SensorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.canonical())
    }
}
