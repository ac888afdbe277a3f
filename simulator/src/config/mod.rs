//! Run configuration, read from JSON or from the key/value input format.
mod input_file;

use crate::{
    error::{SimulationError, SimulationResult},
    particle::{ParticleSelection, ParticleType},
    tables::{CoefficientTable, DecayModel, EnergySpectrum, Tables},
};
use dacsim_common::{Code, MAX_BIT_DEPTH, Real};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

pub use input_file::{DECAY_MODEL_FILE, ENERGY_SPECTRUM_FILE};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ScintillatorParameters {
    /// In ns
    pub time_step: Real,
    /// In ns
    pub pulse_length: Real,
    /// Photons emitted per event when no energy spectrum is given.
    pub mean_photons: Real,
    pub quantum_efficiency: Real,
    pub light_collection: Real,
    /// Photons emitted per unit of deposited energy, used with an energy spectrum.
    pub photons_per_energy: Real,
}

impl Default for ScintillatorParameters {
    fn default() -> Self {
        Self {
            time_step: 0.05,
            pulse_length: 600.0,
            mean_photons: 10000.0,
            quantum_efficiency: 1.0,
            light_collection: 1.0,
            photons_per_energy: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PmtParameters {
    pub dynodes: u32,
    pub dynode_gain: Real,
    /// Transit time spread, in ns
    pub jitter_sigma: Real,
    /// In ns
    pub transit_time: Real,
    /// Fluctuate the multiplication of the first dynode.
    pub gain_noise: bool,
}

impl Default for PmtParameters {
    fn default() -> Self {
        Self {
            dynodes: 10,
            dynode_gain: 4.0,
            jitter_sigma: 5.0,
            transit_time: 0.0,
            gain_noise: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CableParameters {
    /// In GHz
    pub cutoff: Real,
    /// In ohms
    pub impedance: Real,
    /// In volts
    pub noise_level: Real,
}

impl Default for CableParameters {
    fn default() -> Self {
        Self {
            cutoff: 0.1,
            impedance: 50.0,
            noise_level: 0.02,
        }
    }
}

/// Trigger level, either as an absolute code or relative to the code of 0 V.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerThreshold {
    Code(Code),
    AboveBaseline(Code),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TriggerParameters {
    pub threshold: TriggerThreshold,
    #[serde(default)]
    pub pretrigger_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DigitizerParameters {
    pub bits: u32,
    pub min_voltage: Real,
    pub max_voltage: Real,
    /// In GHz
    pub sampling_frequency: Real,
    /// Fixed number of samples in each digitized pulse.
    pub samples: Option<usize>,
    pub trigger: Option<TriggerParameters>,
}

impl Default for DigitizerParameters {
    fn default() -> Self {
        Self {
            bits: 8,
            min_voltage: -1.0,
            max_voltage: 1.0,
            sampling_frequency: 0.5,
            samples: None,
            trigger: None,
        }
    }
}

impl DigitizerParameters {
    pub fn validate(&self) -> SimulationResult<()> {
        if !(1..=MAX_BIT_DEPTH).contains(&self.bits) {
            return Err(SimulationError::invalid(
                "bits",
                format!("{} is outside 1..={MAX_BIT_DEPTH}", self.bits),
            ));
        }
        if !(self.min_voltage < self.max_voltage) {
            return Err(SimulationError::invalid(
                "min-voltage",
                "must be below max-voltage",
            ));
        }
        if !(self.sampling_frequency > 0.0) || !self.sampling_frequency.is_finite() {
            return Err(SimulationError::invalid(
                "sampling-frequency",
                "must be positive",
            ));
        }
        if self.samples == Some(0) {
            return Err(SimulationError::invalid("samples", "must be positive"));
        }
        if let Some(trigger) = &self.trigger {
            let samples = self
                .samples
                .ok_or_else(|| SimulationError::invalid("samples", "required by the trigger"))?;
            if trigger.pretrigger_samples >= samples {
                return Err(SimulationError::invalid(
                    "pretrigger-samples",
                    format!("must be fewer than the {samples} samples"),
                ));
            }
        }
        Ok(())
    }
}

/// Where a coefficient table comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TableSource<T> {
    /// A `.dat` file, relative paths are resolved against the configuration's directory.
    File(PathBuf),
    Inline(T),
}

impl<T: CoefficientTable + Clone> TableSource<T> {
    pub fn resolve(&self, base_dir: &Path) -> SimulationResult<T> {
        match self {
            Self::File(path) => T::load(&base_dir.join(path)),
            Self::Inline(table) => table.clone().prepare(),
        }
    }
}

fn default_pulses() -> usize {
    1
}

fn default_particle() -> ParticleSelection {
    ParticleSelection::Electron
}

///
/// This struct is created from the configuration file.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Seeds the run, drawn from the OS when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_pulses")]
    pub pulses: usize,
    #[serde(default = "default_particle")]
    pub particle: ParticleSelection,
    /// Event rate of each particle type, in Hz.
    #[serde(default)]
    pub count_rates: BTreeMap<ParticleType, Real>,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub scintillator: ScintillatorParameters,
    #[serde(default)]
    pub pmt: PmtParameters,
    #[serde(default)]
    pub cable: CableParameters,
    #[serde(default)]
    pub digitizer: DigitizerParameters,
    pub decay_model: TableSource<DecayModel>,
    #[serde(default)]
    pub energy_spectrum: Option<TableSource<EnergySpectrum>>,
}

impl Config {
    /// Reads JSON when the extension is `.json`, the key/value input format otherwise.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> SimulationResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| SimulationError::io(path, e))?;
        let is_json = path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
        let config = if is_json {
            serde_json::from_str::<Self>(&text)?
        } else {
            let base_dir = path.parent().unwrap_or(Path::new("."));
            input_file::parse(&text, base_dir)?
        };
        config.validate()?;
        info!("Loaded configuration");
        Ok(config)
    }

    /// Event rate in Hz, summed over every particle type whether simulated or not.
    pub fn total_rate(&self) -> Real {
        self.count_rates.values().sum()
    }

    pub fn validate(&self) -> SimulationResult<()> {
        let scintillator = &self.scintillator;
        for (field, value) in [
            ("time-step", scintillator.time_step),
            ("pulse-length", scintillator.pulse_length),
        ] {
            if !(value > 0.0) || !value.is_finite() {
                return Err(SimulationError::invalid(field, "must be positive"));
            }
        }
        for (field, value) in [
            ("mean-photons", scintillator.mean_photons),
            ("quantum-efficiency", scintillator.quantum_efficiency),
            ("light-collection", scintillator.light_collection),
            ("photons-per-energy", scintillator.photons_per_energy),
            ("jitter-sigma", self.pmt.jitter_sigma),
            ("transit-time", self.pmt.transit_time),
            ("impedance", self.cable.impedance),
            ("noise-level", self.cable.noise_level),
        ] {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(SimulationError::invalid(field, "must be non-negative"));
            }
        }
        for (field, value) in [
            ("quantum-efficiency", scintillator.quantum_efficiency),
            ("light-collection", scintillator.light_collection),
        ] {
            if value > 1.0 {
                return Err(SimulationError::invalid(field, "must not exceed 1"));
            }
        }
        if !(self.pmt.dynode_gain > 0.0) {
            return Err(SimulationError::invalid("dynode-gain", "must be positive"));
        }
        if !(self.cable.cutoff > 0.0) {
            return Err(SimulationError::invalid("cutoff", "must be positive"));
        }
        if let Some((particle, rate)) = self
            .count_rates
            .iter()
            .find(|(_, rate)| !(**rate >= 0.0) || !rate.is_finite())
        {
            return Err(SimulationError::invalid(
                "count-rates",
                format!("{particle} rate {rate} must be non-negative"),
            ));
        }
        if self.particle == ParticleSelection::All
            && self.pulses > 0
            && self.particle.particles(&self.count_rates).is_empty()
        {
            return Err(SimulationError::invalid(
                "count-rates",
                "selecting all particles needs a positive rate",
            ));
        }
        if self.digitizer.sampling_frequency * scintillator.time_step > 1.0 {
            return Err(SimulationError::invalid(
                "sampling-frequency",
                "must not exceed the native sampling frequency",
            ));
        }
        self.digitizer.validate()
    }

    /// Resolves the coefficient tables, relative to `base_dir`.
    pub fn load_tables(&self, base_dir: &Path) -> SimulationResult<Tables> {
        Ok(Tables {
            decay_model: self.decay_model.resolve(base_dir)?,
            energy_spectrum: self
                .energy_spectrum
                .as_ref()
                .map(|source| source.resolve(base_dir))
                .transpose()?,
        })
    }
}
