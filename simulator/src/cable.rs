use crate::{
    config::CableParameters,
    error::{SimulationError, SimulationResult},
    pulse::{DenseWaveform, TimeAxis},
};
use dacsim_common::Real;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;

/// First order Butterworth low-pass filter, discretised with the bilinear transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LowPassFilter {
    b: [Real; 2],
    a1: Real,
}

impl LowPassFilter {
    /// `normalized_cutoff` is the cutoff as a fraction of the Nyquist frequency.
    pub fn butterworth(normalized_cutoff: Real) -> SimulationResult<Self> {
        if !(normalized_cutoff > 0.0 && normalized_cutoff < 1.0) {
            return Err(SimulationError::invalid(
                "cutoff",
                format!("normalized cutoff {normalized_cutoff} must lie in (0, 1)"),
            ));
        }
        let k = Real::tan(PI * normalized_cutoff / 2.0);
        let b = k / (1.0 + k);
        Ok(Self {
            b: [b, b],
            a1: (k - 1.0) / (k + 1.0),
        })
    }

    pub fn numerator(&self) -> [Real; 2] {
        self.b
    }

    pub fn denominator(&self) -> [Real; 2] {
        [1.0, self.a1]
    }

    /// Filters `input` causally, starting from rest.
    pub fn apply(&self, input: &[Real]) -> Vec<Real> {
        let mut previous_input = Real::default();
        let mut previous_output = Real::default();
        input
            .iter()
            .map(|&x| {
                let y = self.b[0] * x + self.b[1] * previous_input - self.a1 * previous_output;
                previous_input = x;
                previous_output = y;
                y
            })
            .collect()
    }
}

/// Signal cable between photomultiplier anode and digitizer input.
#[derive(Debug, Clone)]
pub struct Cable {
    filter: LowPassFilter,
    impedance: Real,
    noise: Option<Normal<Real>>,
}

impl Cable {
    pub fn new(parameters: &CableParameters, axis: &TimeAxis) -> SimulationResult<Self> {
        let normalized_cutoff = parameters.cutoff / (2.0 * PI * axis.sampling_frequency());
        let noise = (parameters.noise_level > 0.0)
            .then(|| Normal::new(0.0, parameters.noise_level))
            .transpose()?;
        Ok(Self {
            filter: LowPassFilter::butterworth(normalized_cutoff)?,
            impedance: parameters.impedance,
            noise,
        })
    }

    pub fn low_pass(&self) -> &LowPassFilter {
        &self.filter
    }

    /// Turns anode current (A) into the voltage (V) seen at the digitizer.
    pub fn filter(&self, waveform: DenseWaveform) -> DenseWaveform {
        DenseWaveform::new(self.filter.apply(waveform.samples())).map(|v| v * self.impedance)
    }

    pub fn add_noise<R: Rng + ?Sized>(&self, waveform: DenseWaveform, rng: &mut R) -> DenseWaveform {
        match &self.noise {
            Some(noise) => waveform.map(|v| v + noise.sample(rng)),
            None => waveform,
        }
    }
}
