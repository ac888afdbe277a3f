//! Coefficient tables shared read-only by every stage of a run.
//!
//! Tables are read from a whitespace-delimited text format:
//! ```text
//! # comment
//! electron
//! 5.0 1.0
//! 40.0 0.1
//! proton
//! 8.0 1.0
//! ```
//! A line holding a single token opens the section of that particle type,
//! a line holding two numbers appends a pair to the open section.
use crate::{
    error::{SimulationError, SimulationResult},
    particle::ParticleType,
};
use dacsim_common::Real;
use rand::{Rng, distr::weighted::WeightedIndex};
use rand_distr::Distribution;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};
use strum::IntoEnumIterator;
use tracing::{debug, instrument};

/// Implemented by tables which are loaded from the `.dat` text format.
pub trait CoefficientTable: Sized {
    fn parse(text: &str) -> SimulationResult<Self>;

    fn validate(&self) -> SimulationResult<()>;

    /// Validates the table and brings it to its canonical form.
    fn prepare(self) -> SimulationResult<Self> {
        self.validate()?;
        Ok(self)
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    fn load(path: &Path) -> SimulationResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| SimulationError::io(path, e))?;
        let table = Self::parse(&text)?.prepare()?;
        debug!("Loaded coefficient table");
        Ok(table)
    }
}

struct Section {
    particle: Option<ParticleType>,
    line: usize,
    pairs: Vec<(Real, Real)>,
}

fn parse_number(token: &str, line: usize) -> SimulationResult<Real> {
    token.parse().map_err(|e| SimulationError::TableParse {
        line,
        reason: format!("'{token}' is not a number: {e}"),
    })
}

fn parse_sections(text: &str) -> SimulationResult<Vec<Section>> {
    let mut sections = Vec::<Section>::new();
    for (index, line) in text.lines().enumerate() {
        let line_number = index + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tokens = line.split_whitespace().collect::<Vec<_>>();
        match tokens.as_slice() {
            [name] => sections.push(Section {
                particle: Some(ParticleType::parse(name)?),
                line: line_number,
                pairs: Vec::new(),
            }),
            [first, second] => {
                let pair = (
                    parse_number(first, line_number)?,
                    parse_number(second, line_number)?,
                );
                match sections.last_mut() {
                    Some(section) => section.pairs.push(pair),
                    None => sections.push(Section {
                        particle: None,
                        line: line_number,
                        pairs: vec![pair],
                    }),
                }
            }
            _ => {
                return Err(SimulationError::TableParse {
                    line: line_number,
                    reason: format!(
                        "expected a particle type or a pair of numbers, found {} fields",
                        tokens.len()
                    ),
                });
            }
        }
    }
    Ok(sections)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DecayComponent {
    pub amplitude: Real,
    /// In nanoseconds
    pub decay_constant: Real,
}

impl DecayComponent {
    pub fn value_at(&self, time: Real) -> Real {
        self.amplitude * f64::exp(-time / self.decay_constant)
    }
}

/// Multi-exponential scintillation decay coefficients of each particle type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecayModel {
    components: BTreeMap<ParticleType, Vec<DecayComponent>>,
}

impl DecayModel {
    pub fn new(components: BTreeMap<ParticleType, Vec<DecayComponent>>) -> SimulationResult<Self> {
        let model = Self { components };
        model.validate()?;
        Ok(model)
    }

    pub fn components(&self, particle: ParticleType) -> SimulationResult<&[DecayComponent]> {
        self.components
            .get(&particle)
            .map(Vec::as_slice)
            .ok_or_else(|| SimulationError::UnknownParticleType(particle.to_string()))
    }

    pub fn particles(&self) -> impl Iterator<Item = ParticleType> + '_ {
        self.components.keys().copied()
    }
}

impl CoefficientTable for DecayModel {
    /// Pairs are given as `decay-constant amplitude`.
    fn parse(text: &str) -> SimulationResult<Self> {
        let mut components = BTreeMap::<ParticleType, Vec<DecayComponent>>::new();
        for section in parse_sections(text)? {
            let particle = section.particle.ok_or_else(|| SimulationError::TableParse {
                line: section.line,
                reason: "decay coefficients must follow a particle type header".to_owned(),
            })?;
            components.entry(particle).or_default().extend(
                section
                    .pairs
                    .into_iter()
                    .map(|(decay_constant, amplitude)| DecayComponent {
                        amplitude,
                        decay_constant,
                    }),
            );
        }
        Ok(Self { components })
    }

    fn validate(&self) -> SimulationResult<()> {
        for (particle, components) in &self.components {
            if components.is_empty() {
                return Err(SimulationError::invalid(
                    "decay-model",
                    format!("{particle} has no decay components"),
                ));
            }
            for component in components {
                if !(component.amplitude >= 0.0 && component.amplitude.is_finite()) {
                    return Err(SimulationError::invalid(
                        "decay-model",
                        format!("{particle} amplitude {} is negative", component.amplitude),
                    ));
                }
                if !(component.decay_constant > 0.0) {
                    return Err(SimulationError::invalid(
                        "decay-model",
                        format!(
                            "{particle} decay constant {} is not positive",
                            component.decay_constant
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SpectrumBin {
    pub energy: Real,
    pub intensity: Real,
}

/// Energy histogram of each particle type, used to scale the photon yield of an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnergySpectrum {
    bins: BTreeMap<ParticleType, Vec<SpectrumBin>>,
}

impl EnergySpectrum {
    pub fn new(bins: BTreeMap<ParticleType, Vec<SpectrumBin>>) -> SimulationResult<Self> {
        Self { bins }.prepare()
    }

    fn normalize(&mut self) {
        for bins in self.bins.values_mut() {
            let total: Real = bins.iter().map(|bin| bin.intensity).sum();
            if total > 0.0 {
                bins.iter_mut().for_each(|bin| bin.intensity /= total);
            }
        }
    }

    pub fn bins(&self, particle: ParticleType) -> SimulationResult<&[SpectrumBin]> {
        self.bins
            .get(&particle)
            .map(Vec::as_slice)
            .ok_or_else(|| SimulationError::UnknownParticleType(particle.to_string()))
    }

    pub fn sampler(&self, particle: ParticleType) -> SimulationResult<EnergySampler> {
        let bins = self.bins(particle)?;
        Ok(EnergySampler {
            energies: bins.iter().map(|bin| bin.energy).collect(),
            index: WeightedIndex::new(bins.iter().map(|bin| bin.intensity))?,
        })
    }
}

impl CoefficientTable for EnergySpectrum {
    /// Pairs are given as `energy intensity`, pairs outside any section apply to every particle type.
    fn parse(text: &str) -> SimulationResult<Self> {
        let mut bins = BTreeMap::<ParticleType, Vec<SpectrumBin>>::new();
        for section in parse_sections(text)? {
            let section_bins = section
                .pairs
                .into_iter()
                .map(|(energy, intensity)| SpectrumBin { energy, intensity })
                .collect::<Vec<_>>();
            match section.particle {
                Some(particle) => bins.entry(particle).or_default().extend(section_bins),
                None => {
                    for particle in ParticleType::iter() {
                        bins.entry(particle)
                            .or_default()
                            .extend(section_bins.iter().copied());
                    }
                }
            }
        }
        let mut spectrum = Self { bins };
        spectrum.normalize();
        Ok(spectrum)
    }

    fn validate(&self) -> SimulationResult<()> {
        for (particle, bins) in &self.bins {
            if bins.iter().any(|bin| !(bin.energy >= 0.0) || !(bin.intensity >= 0.0)) {
                return Err(SimulationError::invalid(
                    "energy-spectrum",
                    format!("{particle} has a negative energy or intensity"),
                ));
            }
            if !(bins.iter().map(|bin| bin.intensity).sum::<Real>() > 0.0) {
                return Err(SimulationError::invalid(
                    "energy-spectrum",
                    format!("{particle} has no intensity"),
                ));
            }
        }
        Ok(())
    }

    fn prepare(mut self) -> SimulationResult<Self> {
        self.validate()?;
        self.normalize();
        Ok(self)
    }
}

/// Draws event energies from one particle type's spectrum.
#[derive(Debug, Clone)]
pub struct EnergySampler {
    energies: Vec<Real>,
    index: WeightedIndex<Real>,
}

impl EnergySampler {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Real {
        self.energies
            .get(self.index.sample(rng))
            .copied()
            .unwrap_or_default()
    }
}

/// The tables a run reads, resolved from the configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Tables {
    pub decay_model: DecayModel,
    pub energy_spectrum: Option<EnergySpectrum>,
}
