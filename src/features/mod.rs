//! Feature Engineering
//!
//! Turns a map of cleaned sensor windows into one cycle's feature set:
//!
//! - Basic statistics (mean, std, min, max, slope) per sensor
//! - Off-gas balance with pressure correction: CER, OUR, RQ
//! - Specific growth rate μ from a Savitzky–Golay derivative of ln(OD)
//! - Specific rates qO₂ / qCO₂ per estimated dry cell weight
//! - Volumetric mass transfer coefficient kLa
//! - Thermal gradients and probe-agreement checks
//! - Pressure deviation and anomaly flag
//! - Phase one-hot (lag / exp / stationary)
//! - Cumulative CO₂ / O₂ / OD integrals across the batch
//!
//! Every sub-stage tolerates missing inputs by omitting its features; the
//! final set contains only finite values.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::Settings;
use crate::processing::{savgol_derivative, stats};
use crate::sensors::SensorTag;
use crate::types::{FeatureSet, Window};

/// Molar volume of an ideal gas at STP, L/mol.
const MOLAR_VOLUME_STP: f64 = 22.4;
/// Empirical OD₆₀₀ → dry cell weight conversion, g/L per OD unit.
const OD_TO_DCW: f64 = 0.4;
/// DCW below this is treated as no biomass (avoids exploding specific rates).
const DCW_FLOOR: f64 = 0.01;
/// O₂ saturation concentration at standard pressure, mg/L.
const DO_SATURATION_MG_L: f64 = 8.0;
/// Molecular weight of O₂ in mg/mol.
const O2_MG_PER_MOL: f64 = 32_000.0;
/// Minimum oxygen driving force for a meaningful kLa estimate, mg/L.
const KLA_MIN_DRIVING_FORCE: f64 = 0.1;
/// OD floor before taking the natural log.
const OD_LOG_FLOOR: f64 = 0.01;
/// Savitzky–Golay window for the ln(OD) derivative.
const SAVGOL_WINDOW: usize = 5;
/// Stirrer motor temperature warning threshold, °C.
const MOTOR_TEMP_WARNING_C: f64 = 60.0;
/// Reactor pressure deviation flagged as anomalous, bar.
const PRESSURE_ANOMALY_BAR: f64 = 0.1;
/// Growth rate below this is lag phase, h⁻¹.
const MU_LAG_THRESHOLD: f64 = 0.02;
/// Growth rate at or above this is exponential phase, h⁻¹.
const MU_EXP_THRESHOLD: f64 = 0.08;

// ============================================================================
// Cumulative History
// ============================================================================

/// Running batch integrals, owned exclusively by the engineer and reset on
/// batch boundaries. Never shared across vessels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CumulativeHistory {
    co2: f64,
    o2: f64,
    od: f64,
}

impl CumulativeHistory {
    /// Accumulate one cycle: `dt_hours` is the window length in hours.
    pub fn integrate(&mut self, cer: f64, our: f64, od_mean: f64, dt_hours: f64) {
        self.co2 += cer * dt_hours;
        self.o2 += our * dt_hours;
        self.od += od_mean * dt_hours;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn co2(&self) -> f64 {
        self.co2
    }

    pub fn o2(&self) -> f64 {
        self.o2
    }

    pub fn od(&self) -> f64 {
        self.od
    }
}

// ============================================================================
// Feature Engineer
// ============================================================================

/// Real-time feature engineering over cleaned windows.
pub struct FeatureEngineer {
    settings: Arc<Settings>,
    history: CumulativeHistory,
}

impl FeatureEngineer {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            history: CumulativeHistory::default(),
        }
    }

    /// Engineer all features for one cycle.
    pub fn engineer(&mut self, windows: &BTreeMap<SensorTag, Window>) -> FeatureSet {
        let mut features = FeatureSet::new();

        self.compute_basic(windows, &mut features);
        self.compute_gas_balance(windows, &mut features);
        self.compute_growth_rate(windows, &mut features);
        self.compute_specific_rates(&mut features);
        self.compute_kla(&mut features);
        self.compute_thermal(windows, &mut features);
        self.compute_pressure(windows, &mut features);
        self.compute_phase(&mut features);
        self.compute_cumulative(&mut features);

        // Only finite values are published
        features.retain(|_, v| v.is_finite());
        features
    }

    /// Reset the cumulative history (new batch).
    pub fn reset_history(&mut self) {
        self.history.reset();
        tracing::info!("Feature engineering history reset");
    }

    pub fn history(&self) -> &CumulativeHistory {
        &self.history
    }

    /// Mean, population std, min, max and index slope per sensor with at
    /// least two finite samples.
    fn compute_basic(&self, windows: &BTreeMap<SensorTag, Window>, features: &mut FeatureSet) {
        for (tag, window) in windows {
            let finite = window.finite_values();
            if finite.len() < 2 {
                continue;
            }

            let (Some(mean), Some(std)) = (stats::mean(&finite), stats::population_std(&finite))
            else {
                continue;
            };
            let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
            let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);

            features.insert(format!("{tag}_mean"), mean);
            features.insert(format!("{tag}_std"), std);
            features.insert(format!("{tag}_min"), min);
            features.insert(format!("{tag}_max"), max);
            features.insert(format!("{tag}_slope"), stats::ols_slope(&finite));
        }
    }

    /// CER, OUR and RQ from the off-gas balance with pressure correction:
    ///
    /// ```text
    /// CER = F_in·y_CO2_out·(P/P_std) / V / 22.4      [mol CO₂/L/h]
    /// OUR = (F_in·y_O2_in − F_out·y_O2_out)·(P/P_std) / V / 22.4
    /// RQ  = CER / OUR                                 (only when OUR > 0)
    /// ```
    fn compute_gas_balance(
        &self,
        windows: &BTreeMap<SensorTag, Window>,
        features: &mut FeatureSet,
    ) {
        let f_in = window_mean(windows, SensorTag::GasFlowInlet);
        let f_out = window_mean(windows, SensorTag::GasFlowOutlet);
        let y_co2_out = window_mean(windows, SensorTag::OffGasCo2).map(|v| v / 100.0);
        let y_o2_out = window_mean(windows, SensorTag::OffGasO2).map(|v| v / 100.0);
        let pressure = window_mean(windows, SensorTag::ReactorPressure);

        let (Some(f_in), Some(y_co2_out), Some(y_o2_out), Some(pressure)) =
            (f_in, y_co2_out, y_o2_out, pressure)
        else {
            debug!("Missing gas balance measurements, skipping CER/OUR");
            return;
        };

        // No outlet flow meter: assume outlet = inlet
        let f_out = f_out.unwrap_or(f_in);

        let p_std = self.settings.standard_pressure_bar;
        let volume = self.settings.working_volume_l;
        let y_o2_in = self.settings.air_o2_fraction;

        // L/min -> L/h
        let f_in_h = f_in * 60.0;
        let f_out_h = f_out * 60.0;
        let pressure_correction = pressure / p_std;

        let cer_volumetric = (f_in_h * y_co2_out * pressure_correction) / volume;
        let o2_consumed_h = (f_in_h * y_o2_in - f_out_h * y_o2_out) * pressure_correction;
        let our_volumetric = o2_consumed_h / volume;

        let cer = cer_volumetric / MOLAR_VOLUME_STP;
        let our = our_volumetric / MOLAR_VOLUME_STP;

        features.insert("CER".to_string(), cer);
        features.insert("CER_volumetric".to_string(), cer_volumetric);
        features.insert("OUR".to_string(), our);
        features.insert("OUR_volumetric".to_string(), our_volumetric);
        features.insert(
            "RQ".to_string(),
            if our > 0.0 { cer / our } else { f64::NAN },
        );

        debug!(cer, our, "Gas balance computed");
    }

    /// Specific growth rate μ (h⁻¹) from d(ln OD)/dt.
    fn compute_growth_rate(
        &self,
        windows: &BTreeMap<SensorTag, Window>,
        features: &mut FeatureSet,
    ) {
        let Some(od) = windows.get(&SensorTag::Od) else {
            return;
        };
        if od.len() < SAVGOL_WINDOW {
            return;
        }

        // Floor before the log; gaps stay NaN and poison only their
        // neighborhood of the derivative.
        let ln_od: Vec<f64> = od
            .values()
            .iter()
            .map(|&v| {
                if v.is_finite() {
                    v.max(OD_LOG_FLOOR).ln()
                } else {
                    f64::NAN
                }
            })
            .collect();

        let Some(deriv) = savgol_derivative(&ln_od, SAVGOL_WINDOW) else {
            return;
        };

        // Per-second derivative -> per-hour; most recent sample wins
        let per_hour: Vec<f64> = deriv.iter().map(|d| d * 3600.0).collect();
        if let Some(&mu) = per_hour.last() {
            features.insert("mu".to_string(), mu);
        }
        if let Some(mu_mean) = stats::mean(&per_hour) {
            features.insert("mu_mean".to_string(), mu_mean);
        }
        if let Some(mu_std) = stats::population_std(&per_hour) {
            features.insert("mu_std".to_string(), mu_std);
        }
    }

    /// qO₂ and qCO₂ per estimated dry cell weight (DCW ≈ 0.4 × OD).
    fn compute_specific_rates(&self, features: &mut FeatureSet) {
        let (Some(our), Some(od_mean)) = (
            features.get("OUR").copied(),
            features.get("OD_mean").copied(),
        ) else {
            return;
        };

        let dcw = OD_TO_DCW * od_mean;
        if dcw <= DCW_FLOOR {
            return;
        }

        let cer = features.get("CER").copied();
        features.insert("qO2".to_string(), our / dcw);
        if let Some(cer) = cer {
            features.insert("qCO2".to_string(), cer / dcw);
        }
    }

    /// Volumetric oxygen mass-transfer coefficient kLa (h⁻¹) from the oxygen
    /// balance: kLa = OUR / (C* − C), with C* pressure-corrected.
    fn compute_kla(&self, features: &mut FeatureSet) {
        let (Some(our), Some(do_percent)) = (
            features.get("OUR").copied(),
            features.get("DO_mean").copied(),
        ) else {
            return;
        };
        let pressure = features
            .get("Reactor_Pressure_mean")
            .copied()
            .unwrap_or(self.settings.standard_pressure_bar);

        let c_star = DO_SATURATION_MG_L * (pressure / self.settings.standard_pressure_bar);
        let c_o2 = (do_percent / 100.0) * c_star;
        let driving_force = c_star - c_o2;

        if driving_force > KLA_MIN_DRIVING_FORCE {
            let our_mg = our * O2_MG_PER_MOL;
            features.insert("kLa".to_string(), our_mg / driving_force);
        }
    }

    /// Temperature gradients, probe agreement and motor thermal state.
    fn compute_thermal(&self, windows: &BTreeMap<SensorTag, Window>, features: &mut FeatureSet) {
        let t_broth = window_mean(windows, SensorTag::TempBroth);
        let t_exhaust = window_mean(windows, SensorTag::TempExhaust);
        let t_ph = window_mean(windows, SensorTag::TempPhProbe);
        let t_do = window_mean(windows, SensorTag::TempDoProbe);
        let t_motor = window_mean(windows, SensorTag::TempStirrerMotor);

        // Broth-to-exhaust gradient tracks metabolic heat
        if let (Some(broth), Some(exhaust)) = (t_broth, t_exhaust) {
            features.insert("temp_gradient_broth_exhaust".to_string(), broth - exhaust);
        }

        // Immersed probes should agree with the broth sensor
        if let (Some(broth), Some(ph)) = (t_broth, t_ph) {
            features.insert("temp_deviation_ph_probe".to_string(), (broth - ph).abs());
        }
        if let (Some(broth), Some(do_probe)) = (t_broth, t_do) {
            features.insert(
                "temp_deviation_do_probe".to_string(),
                (broth - do_probe).abs(),
            );
        }

        if let Some(motor) = t_motor {
            features.insert("motor_temp".to_string(), motor);
            features.insert(
                "motor_temp_warning".to_string(),
                if motor > MOTOR_TEMP_WARNING_C { 1.0 } else { 0.0 },
            );
        }
    }

    /// Pressure deviation from standard and the anomaly flag (foam or
    /// filter-blockage indicator).
    fn compute_pressure(&self, windows: &BTreeMap<SensorTag, Window>, features: &mut FeatureSet) {
        let Some(pressure) = window_mean(windows, SensorTag::ReactorPressure) else {
            return;
        };

        let deviation = pressure - self.settings.standard_pressure_bar;
        features.insert("pressure_deviation".to_string(), deviation);
        features.insert(
            "pressure_anomaly".to_string(),
            if deviation.abs() > PRESSURE_ANOMALY_BAR { 1.0 } else { 0.0 },
        );
    }

    /// Mutually exclusive phase one-hot, only when μ is known.
    fn compute_phase(&self, features: &mut FeatureSet) {
        let Some(mu) = features.get("mu").copied() else {
            return;
        };
        if !mu.is_finite() {
            return;
        }

        let (lag, exp, stationary) = classify_phase(mu);
        features.insert("phase_lag".to_string(), lag);
        features.insert("phase_exp".to_string(), exp);
        features.insert("phase_stationary".to_string(), stationary);
    }

    /// Batch-wide integrals; absent rates integrate as zero.
    fn compute_cumulative(&mut self, features: &mut FeatureSet) {
        let dt_hours = self.settings.window_size_seconds as f64 / 3600.0;

        let cer = finite_or_zero(features.get("CER"));
        let our = finite_or_zero(features.get("OUR"));
        let od_mean = finite_or_zero(features.get("OD_mean"));

        self.history.integrate(cer, our, od_mean, dt_hours);

        features.insert("cumulative_CO2".to_string(), self.history.co2());
        features.insert("cumulative_O2".to_string(), self.history.o2());
        features.insert("cumulative_OD".to_string(), self.history.od());
    }
}

/// Phase one-hot `(lag, exp, stationary)` for a known growth rate.
/// μ = 0.02 classifies as stationary, μ = 0.08 as exponential.
pub(crate) fn classify_phase(mu: f64) -> (f64, f64, f64) {
    if mu < MU_LAG_THRESHOLD {
        (1.0, 0.0, 0.0)
    } else if mu >= MU_EXP_THRESHOLD {
        (0.0, 1.0, 0.0)
    } else {
        (0.0, 0.0, 1.0)
    }
}

/// Mean of a tag's finite values, `None` when the window is absent or empty.
fn window_mean(windows: &BTreeMap<SensorTag, Window>, tag: SensorTag) -> Option<f64> {
    windows
        .get(&tag)
        .and_then(|w| stats::mean(&w.finite_values()))
}

fn finite_or_zero(value: Option<&f64>) -> f64 {
    value.copied().filter(|v| v.is_finite()).unwrap_or(0.0)
}
