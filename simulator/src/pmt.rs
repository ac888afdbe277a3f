use crate::{
    config::PmtParameters,
    error::{SimulationError, SimulationResult},
    pulse::{DenseWaveform, SparseEvent, TimeAxis},
};
use dacsim_common::{ELEMENTARY_CHARGE, Real, ns_to_seconds};
use rand::Rng;
use rand_distr::{Distribution, Poisson};

/// Width of the transit time spread kernel, in standard deviations either side of its centre.
const KERNEL_HALF_WIDTH_SIGMAS: Real = 5.0;

/// Unit area gaussian sampled every `step`, centred on its middle element.
fn gaussian_kernel(sigma: Real, step: Real) -> Vec<Real> {
    if sigma <= 0.0 {
        return vec![1.0];
    }
    let half = (KERNEL_HALF_WIDTH_SIGMAS * sigma / step).ceil() as isize;
    let kernel = (-half..=half)
        .map(|i| {
            let x = i as Real * step / sigma;
            Real::exp(-0.5 * x * x)
        })
        .collect::<Vec<_>>();
    let area: Real = kernel.iter().sum();
    kernel.into_iter().map(|k| k / area).collect()
}

/// Photomultiplier converting photon arrival times into an anode current.
#[derive(Debug, Clone)]
pub struct Pmt {
    /// Mean charge multiplication of the full dynode chain.
    multiplication: Real,
    /// Multiplication after the first dynode, used when the first stage fluctuates.
    later_stages: Real,
    gain_noise: Option<Poisson<Real>>,
    kernel: Vec<Real>,
    delay_bins: isize,
    /// Converts electrons per bin into amperes.
    scale: Real,
}

impl Pmt {
    pub fn new(parameters: &PmtParameters, axis: &TimeAxis) -> SimulationResult<Self> {
        if !(parameters.dynode_gain > 0.0) {
            return Err(SimulationError::invalid("dynode-gain", "must be positive"));
        }
        let stages = parameters.dynodes as i32;
        let gain_noise = (parameters.gain_noise && stages > 0 && parameters.dynode_gain > 1.0)
            .then(|| Poisson::new(parameters.dynode_gain - 1.0))
            .transpose()?;
        Ok(Self {
            multiplication: parameters.dynode_gain.powi(stages),
            later_stages: parameters.dynode_gain.powi((stages - 1).max(0)),
            gain_noise,
            kernel: gaussian_kernel(parameters.jitter_sigma, axis.step()),
            delay_bins: (parameters.transit_time / axis.step()).round() as isize,
            scale: ELEMENTARY_CHARGE / ns_to_seconds(axis.step()),
        })
    }

    pub fn multiplication(&self) -> Real {
        self.multiplication
    }

    pub fn kernel(&self) -> &[Real] {
        &self.kernel
    }

    fn photon_weight<R: Rng + ?Sized>(&self, rng: &mut R) -> Real {
        match &self.gain_noise {
            Some(first_stage) => (first_stage.sample(rng) + 1.0) * self.later_stages,
            None => self.multiplication,
        }
    }

    /// Histograms the photons onto the bins of `axis`, then spreads and delays
    /// the charge by the transit time. The result has one sample per bin.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        event: SparseEvent,
        axis: &TimeAxis,
        rng: &mut R,
    ) -> DenseWaveform {
        let bins = axis.bin_count();
        let mut charge = vec![Real::default(); bins];
        for &time in event.photon_times() {
            if let Some(bin) = axis.bin_index(time).and_then(|index| charge.get_mut(index)) {
                *bin += self.photon_weight(rng);
            }
        }

        let centre = (self.kernel.len() / 2) as isize;
        let mut current = vec![Real::default(); bins];
        for (index, &electrons) in charge.iter().enumerate() {
            if electrons == 0.0 {
                continue;
            }
            let first = index as isize + self.delay_bins - centre;
            for (offset, &weight) in self.kernel.iter().enumerate() {
                let target = first + offset as isize;
                if let Some(sample) = usize::try_from(target)
                    .ok()
                    .and_then(|target| current.get_mut(target))
                {
                    *sample += electrons * weight * self.scale;
                }
            }
        }
        DenseWaveform::new(current)
    }
}
