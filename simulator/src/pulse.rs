use crate::{
    error::{SimulationError, SimulationResult},
    pmt::Pmt,
};
use dacsim_common::{Code, Real};
use rand::Rng;
use serde::Serialize;

/// Tolerance used when mapping a time onto the grid, so that times generated
/// from the grid land in their own bin despite rounding.
const GRID_TOLERANCE: Real = 1e-9;

/// Evenly spaced time samples, in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TimeAxis {
    start: Real,
    step: Real,
    len: usize,
}

impl TimeAxis {
    pub fn new(start: Real, step: Real, len: usize) -> Self {
        Self { start, step, len }
    }

    /// Samples `[0, length)` every `step`.
    pub fn from_length(step: Real, length: Real) -> SimulationResult<Self> {
        if !(step > 0.0) || !step.is_finite() {
            return Err(SimulationError::invalid("time-step", "must be positive"));
        }
        if !(length > 0.0) || !length.is_finite() {
            return Err(SimulationError::invalid("pulse-length", "must be positive"));
        }
        let len = (length / step - GRID_TOLERANCE).ceil().max(1.0) as usize;
        Ok(Self::new(0.0, step, len))
    }

    pub fn start(&self) -> Real {
        self.start
    }

    pub fn step(&self) -> Real {
        self.step
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of histogram bins delimited by the samples.
    pub fn bin_count(&self) -> usize {
        self.len.saturating_sub(1)
    }

    /// In GHz
    pub fn sampling_frequency(&self) -> Real {
        1.0 / self.step
    }

    pub fn time(&self, index: usize) -> Real {
        self.start + index as Real * self.step
    }

    pub fn iter(&self) -> impl Iterator<Item = Real> + '_ {
        (0..self.len).map(|index| self.time(index))
    }

    /// The bin containing `time`. The last bin includes its right edge,
    /// times outside the axis have no bin.
    pub fn bin_index(&self, time: Real) -> Option<usize> {
        let bins = self.bin_count();
        if bins == 0 || !time.is_finite() {
            return None;
        }
        let position = (time - self.start) / self.step + GRID_TOLERANCE;
        if position < 0.0 || position > bins as Real + 2.0 * GRID_TOLERANCE {
            return None;
        }
        Some((position.floor() as usize).min(bins - 1))
    }

    /// Axis of the left edges of the bins, which dense waveforms are aligned to.
    pub fn bin_axis(&self) -> Self {
        Self::new(self.start, self.step, self.bin_count())
    }

    /// Every `ratio`-th sample of this axis.
    pub fn strided(&self, ratio: usize) -> Self {
        let ratio = ratio.max(1);
        Self::new(self.start, self.step * ratio as Real, self.len.div_ceil(ratio))
    }
}

/// Photon emission timestamps of one event, before the photomultiplier.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SparseEvent {
    photon_times: Vec<Real>,
}

impl SparseEvent {
    pub fn new(photon_times: Vec<Real>) -> Self {
        Self { photon_times }
    }

    pub fn photon_times(&self) -> &[Real] {
        &self.photon_times
    }

    pub fn photon_count(&self) -> usize {
        self.photon_times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.photon_times.is_empty()
    }

    /// Appends the photons of `other`, delayed by `offset` nanoseconds.
    pub fn append_delayed(&mut self, other: SparseEvent, offset: Real) {
        self.photon_times
            .extend(other.photon_times.into_iter().map(|time| time + offset));
    }
}

/// Amplitude samples aligned to the bins of a [TimeAxis].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DenseWaveform {
    samples: Vec<Real>,
}

impl DenseWaveform {
    pub fn new(samples: Vec<Real>) -> Self {
        Self { samples }
    }

    pub fn zeros(len: usize) -> Self {
        Self::new(vec![Real::default(); len])
    }

    pub fn samples(&self) -> &[Real] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<Real> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn peak(&self) -> Option<Real> {
        self.samples.iter().copied().reduce(Real::max)
    }

    pub fn map(self, f: impl FnMut(Real) -> Real) -> Self {
        Self::new(self.samples.into_iter().map(f).collect())
    }
}

/// A pulse is sparse until the photomultiplier turns it dense, which happens exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPulse {
    Sparse(SparseEvent),
    Dense(DenseWaveform),
}

impl EventPulse {
    pub fn is_dense(&self) -> bool {
        matches!(self, Self::Dense(_))
    }

    /// Runs sparse pulses through the photomultiplier, dense pulses pass unchanged.
    pub fn into_dense<R: Rng + ?Sized>(
        self,
        pmt: &Pmt,
        axis: &TimeAxis,
        rng: &mut R,
    ) -> DenseWaveform {
        match self {
            Self::Sparse(event) => pmt.apply(event, axis, rng),
            Self::Dense(waveform) => waveform,
        }
    }
}

impl From<SparseEvent> for EventPulse {
    fn from(event: SparseEvent) -> Self {
        Self::Sparse(event)
    }
}

impl From<DenseWaveform> for EventPulse {
    fn from(waveform: DenseWaveform) -> Self {
        Self::Dense(waveform)
    }
}

/// Fixed length sequence of quantization codes produced by the digitizer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DigitizedPulse {
    codes: Vec<Code>,
}

impl DigitizedPulse {
    pub(crate) fn new(codes: Vec<Code>) -> Self {
        Self { codes }
    }

    pub fn codes(&self) -> &[Code] {
        &self.codes
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn axis_from_length() {
        let axis = TimeAxis::from_length(0.05, 600.0).unwrap();
        assert_eq!(axis.len(), 12000);
        assert_eq!(axis.bin_count(), 11999);
        assert_approx_eq!(axis.sampling_frequency(), 20.0);
        assert_approx_eq!(axis.time(11999), 599.95, 1e-9);

        assert_eq!(TimeAxis::from_length(0.3, 1.0).unwrap().len(), 4);
        assert!(TimeAxis::from_length(0.0, 1.0).is_err());
        assert!(TimeAxis::from_length(0.1, -1.0).is_err());
    }

    #[test]
    fn grid_times_land_in_their_own_bin() {
        let axis = TimeAxis::from_length(0.05, 600.0).unwrap();
        for index in (0..axis.bin_count()).step_by(7) {
            assert_eq!(axis.bin_index(axis.time(index)), Some(index));
        }
        // The right edge belongs to the last bin
        assert_eq!(axis.bin_index(axis.time(11999)), Some(11998));
        assert_eq!(axis.bin_index(-0.01), None);
        assert_eq!(axis.bin_index(600.5), None);
    }

    #[test]
    fn strided_axis() {
        let axis = TimeAxis::new(0.0, 0.5, 11).strided(4);
        assert_eq!(axis.len(), 3);
        assert_eq!(axis.step(), 2.0);
        assert_eq!(axis.iter().collect::<Vec<_>>(), vec![0.0, 2.0, 4.0]);
    }

    #[test]
    fn append_delayed_offsets_photons() {
        let mut event = SparseEvent::new(vec![1.0, 2.0]);
        event.append_delayed(SparseEvent::new(vec![0.5]), 10.0);
        assert_eq!(event.photon_times(), &[1.0, 2.0, 10.5]);
        assert_eq!(event.photon_count(), 3);
    }

    #[test]
    fn dense_waveform_helpers() {
        let waveform = DenseWaveform::new(vec![0.0, 3.0, -1.0]).map(|x| 2.0 * x);
        assert_eq!(waveform.samples(), &[0.0, 6.0, -2.0]);
        assert_eq!(waveform.peak(), Some(6.0));
        assert_eq!(DenseWaveform::zeros(0).peak(), None);
        assert!(EventPulse::from(waveform).is_dense());
        assert!(!EventPulse::from(SparseEvent::default()).is_dense());
    }
}
