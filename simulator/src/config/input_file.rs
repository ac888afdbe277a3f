//! The `key value` input format.
//! ```text
//! # general parameters
//! nps 10
//! ptype electron
//! cre 20000
//! crp 0
//! ```
//! Coefficient tables are taken from [DECAY_MODEL_FILE] next to the input file,
//! and from [ENERGY_SPECTRUM_FILE] when it exists.
use super::{
    CableParameters, Config, DigitizerParameters, PmtParameters, ScintillatorParameters,
    TableSource, TriggerParameters, TriggerThreshold,
};
use crate::{
    error::{SimulationError, SimulationResult},
    particle::{ParticleSelection, ParticleType},
};
use dacsim_common::{Code, Real};
use std::{collections::HashMap, fmt::Display, path::Path, str::FromStr};
use tracing::{debug, warn};

pub const DECAY_MODEL_FILE: &str = "scintillator.dat";
pub const ENERGY_SPECTRUM_FILE: &str = "spectrum.dat";

/// Keys which are accepted but have no effect.
const IGNORED_KEYS: [&str; 1] = ["fp"];

struct Entries<'a> {
    values: HashMap<&'a str, (usize, &'a str)>,
}

impl<'a> Entries<'a> {
    fn parse(text: &'a str) -> SimulationResult<Self> {
        let mut values = HashMap::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_whitespace().collect::<Vec<_>>().as_slice() {
                [key, value] => {
                    values.insert(*key, (index + 1, *value));
                }
                tokens => {
                    return Err(SimulationError::InputParse {
                        line: index + 1,
                        reason: format!("expected 'key value', found {} tokens", tokens.len()),
                    });
                }
            }
        }
        Ok(Self { values })
    }

    fn optional<T>(&mut self, key: &'static str) -> SimulationResult<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.values
            .remove(key)
            .map(|(line, value)| {
                value.parse().map_err(|e| SimulationError::InputParse {
                    line,
                    reason: format!("{key} '{value}': {e}"),
                })
            })
            .transpose()
    }

    fn required<T>(&mut self, key: &'static str) -> SimulationResult<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.optional(key)?
            .ok_or(SimulationError::MissingParameter(key))
    }

    fn warn_unused(self) {
        for (key, (line, _)) in self.values {
            if IGNORED_KEYS.contains(&key) {
                debug!("Ignoring {key} at line {line}");
            } else {
                warn!("Unknown parameter {key} at line {line}");
            }
        }
    }
}

/// `+N` means `N` codes above the baseline, a bare number is an absolute code.
fn parse_threshold(value: &str) -> Result<TriggerThreshold, std::num::ParseIntError> {
    match value.strip_prefix('+') {
        Some(relative) => relative.parse().map(TriggerThreshold::AboveBaseline),
        None => value.parse::<Code>().map(TriggerThreshold::Code),
    }
}

pub(super) fn parse(text: &str, base_dir: &Path) -> SimulationResult<Config> {
    let mut entries = Entries::parse(text)?;

    let pulses = entries.required("nps")?;
    let particle: ParticleSelection = entries.required("ptype")?;
    let count_rates = [
        (ParticleType::Electron, entries.required::<Real>("cre")?),
        (ParticleType::Proton, entries.required::<Real>("crp")?),
    ]
    .into_iter()
    .collect();

    let scintillator = ScintillatorParameters {
        time_step: entries.required("dt")?,
        pulse_length: entries.required("plen")?,
        quantum_efficiency: entries.required("qeff")?,
        mean_photons: entries.required("nphots")?,
        light_collection: entries.optional("lc")?.unwrap_or(1.0),
        ..Default::default()
    };
    let pmt = PmtParameters {
        dynodes: entries.required("ndyn")?,
        dynode_gain: entries.required("delta")?,
        jitter_sigma: entries.required("sigma")?,
        transit_time: entries.required("tt")?,
        ..Default::default()
    };
    let cable = CableParameters {
        cutoff: entries.required("cutoff")?,
        impedance: entries.required("imp")?,
        noise_level: entries.required("noise")?,
    };

    let trigger = match entries.values.remove("trigger") {
        Some((line, value)) => Some(TriggerParameters {
            threshold: parse_threshold(value).map_err(|e| SimulationError::InputParse {
                line,
                reason: format!("trigger '{value}': {e}"),
            })?,
            pretrigger_samples: entries.optional("pretrig")?.unwrap_or_default(),
        }),
        None => None,
    };
    let digitizer = DigitizerParameters {
        bits: entries.required("bits")?,
        min_voltage: entries.required("minV")?,
        max_voltage: entries.required("maxV")?,
        sampling_frequency: entries.required("sampf")?,
        samples: entries.optional("samples")?,
        trigger,
    };

    let seed = entries.optional("seed")?;
    let output = entries
        .optional::<String>("output")?
        .map(|name| Path::new("output").join(name).with_extension("json"));
    entries.warn_unused();

    let energy_spectrum = base_dir
        .join(ENERGY_SPECTRUM_FILE)
        .is_file()
        .then(|| TableSource::File(ENERGY_SPECTRUM_FILE.into()));

    Ok(Config {
        seed,
        pulses,
        particle,
        count_rates,
        output,
        scintillator,
        pmt,
        cable,
        digitizer,
        decay_model: TableSource::File(DECAY_MODEL_FILE.into()),
        energy_spectrum,
    })
}
