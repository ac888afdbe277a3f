use crate::{
    config::ScintillatorParameters,
    error::{SimulationError, SimulationResult},
    particle::{ParticleSelection, ParticleType, split_counts},
    pulse::{SparseEvent, TimeAxis},
    tables::{DecayModel, EnergySampler, EnergySpectrum},
};
use dacsim_common::Real;
use rand::{Rng, distr::weighted::WeightedIndex, seq::SliceRandom};
use rand_distr::{Distribution, Poisson};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Normalized scintillation pulse shape of one particle type.
#[derive(Debug, Clone)]
pub struct PulseShape {
    axis: TimeAxis,
    density: Vec<Real>,
    sampler: WeightedIndex<Real>,
}

/// Sums the decay components of `particle` over `[0, pulse_length)` and
/// normalizes the result into a probability mass function.
pub fn build_shape(
    model: &DecayModel,
    particle: ParticleType,
    time_step: Real,
    pulse_length: Real,
) -> SimulationResult<PulseShape> {
    let components = model.components(particle)?;
    let axis = TimeAxis::from_length(time_step, pulse_length)?;

    let amplitude = axis
        .iter()
        .map(|time| components.iter().map(|c| c.value_at(time)).sum::<Real>())
        .collect::<Vec<_>>();
    let total: Real = amplitude.iter().sum();
    if !(total > 0.0) || !total.is_finite() {
        return Err(SimulationError::invalid(
            "decay-model",
            format!("{particle} pulse shape cannot be normalized"),
        ));
    }
    let density = amplitude.into_iter().map(|a| a / total).collect::<Vec<_>>();
    let sampler = WeightedIndex::new(&density)?;
    Ok(PulseShape {
        axis,
        density,
        sampler,
    })
}

impl PulseShape {
    pub fn axis(&self) -> &TimeAxis {
        &self.axis
    }

    pub fn density(&self) -> &[Real] {
        &self.density
    }

    /// Draws `n` emission times from the shape, with replacement.
    pub fn sample_photon_times<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> SparseEvent {
        SparseEvent::new(
            (0..n)
                .map(|_| self.axis.time(self.sampler.sample(rng)))
                .collect(),
        )
    }
}

fn sample_photon_count<R: Rng + ?Sized>(mean: Real, rng: &mut R) -> SimulationResult<usize> {
    if mean <= 0.0 {
        return Ok(0);
    }
    Ok(Poisson::new(mean)?.sample(rng) as usize)
}

/// Generates batches of scintillation events, one [PulseShape] per particle type.
pub struct PhotonGenerator {
    shapes: BTreeMap<ParticleType, PulseShape>,
    energies: BTreeMap<ParticleType, EnergySampler>,
    parameters: ScintillatorParameters,
}

impl PhotonGenerator {
    pub fn new(
        model: &DecayModel,
        spectrum: Option<&EnergySpectrum>,
        parameters: &ScintillatorParameters,
        particles: &[ParticleType],
    ) -> SimulationResult<Self> {
        let mut shapes = BTreeMap::new();
        let mut energies = BTreeMap::new();
        for &particle in particles {
            shapes.insert(
                particle,
                build_shape(
                    model,
                    particle,
                    parameters.time_step,
                    parameters.pulse_length,
                )?,
            );
            if let Some(spectrum) = spectrum {
                energies.insert(particle, spectrum.sampler(particle)?);
            }
        }
        Ok(Self {
            shapes,
            energies,
            parameters: parameters.clone(),
        })
    }

    pub fn shape(&self, particle: ParticleType) -> SimulationResult<&PulseShape> {
        self.shapes
            .get(&particle)
            .ok_or_else(|| SimulationError::UnknownParticleType(particle.to_string()))
    }

    /// Mean number of detected photons for an event, before Poisson fluctuation.
    fn mean_photons<R: Rng + ?Sized>(&self, particle: ParticleType, rng: &mut R) -> Real {
        let efficiency = self.parameters.quantum_efficiency * self.parameters.light_collection;
        match self.energies.get(&particle) {
            Some(sampler) => sampler.sample(rng) * self.parameters.photons_per_energy * efficiency,
            None => self.parameters.mean_photons * efficiency,
        }
    }

    #[instrument(skip(self, rng), level = "debug")]
    pub fn generate<R: Rng + ?Sized>(
        &self,
        particle: ParticleType,
        n: usize,
        rng: &mut R,
    ) -> SimulationResult<Vec<SparseEvent>> {
        let shape = self.shape(particle)?;
        (0..n)
            .map(|_| {
                let mean = self.mean_photons(particle, rng);
                let count = sample_photon_count(mean, rng)?;
                Ok(shape.sample_photon_times(count, rng))
            })
            .collect()
    }

    /// Generates `n` events of the selected particle types. When several types
    /// are selected the batch is split by count rate and shuffled.
    #[instrument(skip(self, rates, rng))]
    pub fn generate_selection<R: Rng + ?Sized>(
        &self,
        selection: ParticleSelection,
        rates: &BTreeMap<ParticleType, Real>,
        n: usize,
        rng: &mut R,
    ) -> SimulationResult<Vec<SparseEvent>> {
        let particles = selection.particles(rates);
        let split = match particles.as_slice() {
            [single] => vec![(*single, n)],
            _ => split_counts(n, rates, &particles),
        };
        let mut batch = Vec::with_capacity(n);
        for (particle, count) in split {
            debug!("Generating {count} {particle} events");
            batch.extend(self.generate(particle, count, rng)?);
        }
        if particles.len() > 1 {
            batch.shuffle(rng);
        }
        Ok(batch)
    }
}
