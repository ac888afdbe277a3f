use crate::error::{SimulationError, SimulationResult};
use dacsim_common::Real;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, str::FromStr};
use strum::IntoEnumIterator;

/// The particle depositing energy in the scintillator.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ParticleType {
    Electron,
    Proton,
}

impl ParticleType {
    pub(crate) fn parse(name: &str) -> SimulationResult<Self> {
        Self::from_str(name).map_err(|_| SimulationError::UnknownParticleType(name.to_owned()))
    }
}

/// Which particle types make up a generated batch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ParticleSelection {
    Electron,
    Proton,
    All,
}

impl ParticleSelection {
    /// Particle types which contribute pulses, given the count rate of each type.
    /// A single type is always selected, `all` selects every type with a positive rate.
    pub fn particles(&self, rates: &BTreeMap<ParticleType, Real>) -> Vec<ParticleType> {
        match self {
            Self::Electron => vec![ParticleType::Electron],
            Self::Proton => vec![ParticleType::Proton],
            Self::All => ParticleType::iter()
                .filter(|particle| rates.get(particle).is_some_and(|&rate| rate > 0.0))
                .collect(),
        }
    }
}

/// Splits `total` pulses between particle types in proportion to their count rates.
/// Largest-remainder rounding keeps the sum of the returned counts equal to `total`.
pub fn split_counts(
    total: usize,
    rates: &BTreeMap<ParticleType, Real>,
    particles: &[ParticleType],
) -> Vec<(ParticleType, usize)> {
    let rate_sum: Real = particles
        .iter()
        .filter_map(|particle| rates.get(particle))
        .sum();
    if particles.is_empty() || rate_sum <= 0.0 {
        return Vec::new();
    }

    let mut shares = particles
        .iter()
        .map(|particle| {
            let exact = total as Real * rates.get(particle).copied().unwrap_or_default() / rate_sum;
            (*particle, exact.floor() as usize, exact - exact.floor())
        })
        .collect::<Vec<_>>();

    let assigned: usize = shares.iter().map(|(_, count, _)| count).sum();
    let mut order = (0..shares.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| shares[b].2.total_cmp(&shares[a].2));
    for &index in order.iter().cycle().take(total.saturating_sub(assigned)) {
        shares[index].1 += 1;
    }

    shares
        .into_iter()
        .map(|(particle, count, _)| (particle, count))
        .collect()
}
