use crate::{
    error::{SimulationError, SimulationResult},
    pulse::SparseEvent,
};
use dacsim_common::{Real, ns_to_seconds, seconds_to_ns};
use rand::Rng;
use rand_distr::{Distribution, Exp};
use serde::Serialize;
use std::iter;
use tracing::{debug, instrument};

/// How one composite pulse was assembled.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PileupEntry {
    /// Number of primitive pulses merged into the composite.
    pub pulses: usize,
    /// Arrival of each primitive pulse, in ns after the composite start.
    pub offsets: Vec<Real>,
    /// Interval, in seconds, separating this composite from the previous one.
    pub lead_interval: Option<Real>,
}

impl PileupEntry {
    fn new(lead_interval: Option<Real>) -> Self {
        Self {
            pulses: 1,
            offsets: vec![0.0],
            lead_interval,
        }
    }

    fn push(&mut self, offset: Real) {
        self.pulses += 1;
        self.offsets.push(offset);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PileupLog {
    entries: Vec<PileupEntry>,
}

impl PileupLog {
    pub fn entries(&self) -> &[PileupEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn counts(&self) -> Vec<usize> {
        self.entries.iter().map(|entry| entry.pulses).collect()
    }

    pub fn total_pulses(&self) -> usize {
        self.entries.iter().map(|entry| entry.pulses).sum()
    }

    /// Keeps only the entries whose index appears in `keep`, which must be sorted.
    pub fn retain_indices(&mut self, keep: &[usize]) {
        let mut index = 0;
        self.entries.retain(|_| {
            let kept = keep.binary_search(&index).is_ok();
            index += 1;
            kept
        });
    }
}

#[derive(Debug, Clone, Default)]
pub struct PileupOutcome {
    pub pulses: Vec<SparseEvent>,
    pub log: PileupLog,
    /// The raw inter-arrival draws, in seconds.
    pub intervals: Vec<Real>,
}

/// Merges events whose arrivals fall within one pulse length of each other.
#[derive(Debug, Clone)]
pub struct PileUp {
    arrivals: Option<Exp<Real>>,
    /// Seconds
    window: Real,
}

impl PileUp {
    /// `total_rate` is in Hz, `pulse_length` in ns. A non-positive rate disables pile-up.
    pub fn new(total_rate: Real, pulse_length: Real) -> SimulationResult<Self> {
        if !total_rate.is_finite() {
            return Err(SimulationError::invalid("count-rates", "must be finite"));
        }
        let arrivals = (total_rate > 0.0)
            .then(|| Exp::new(total_rate))
            .transpose()?;
        Ok(Self {
            arrivals,
            window: ns_to_seconds(pulse_length),
        })
    }

    #[instrument(skip_all, fields(num_pulses = batch.len()))]
    pub fn merge<R: Rng + ?Sized>(&self, batch: Vec<SparseEvent>, rng: &mut R) -> PileupOutcome {
        let draws = batch.len().saturating_sub(1);
        let intervals = match &self.arrivals {
            Some(arrivals) => (0..draws).map(|_| arrivals.sample(rng)).collect(),
            None => vec![Real::INFINITY; draws],
        };
        let outcome = self.merge_with_intervals(batch, intervals);
        debug!(
            "Merged {} pulses into {} composites",
            outcome.log.total_pulses(),
            outcome.log.len()
        );
        outcome
    }

    /// Merges `batch` given the interval preceding each pulse after the first.
    /// Missing intervals are treated as infinite.
    pub fn merge_with_intervals(
        &self,
        batch: Vec<SparseEvent>,
        intervals: Vec<Real>,
    ) -> PileupOutcome {
        let mut pulses = Vec::new();
        let mut entries = Vec::new();
        let mut events = batch.into_iter();

        if let Some(first) = events.next() {
            let mut composite = first;
            let mut entry = PileupEntry::new(None);
            let mut elapsed = Real::default();

            let gaps = intervals.iter().copied().chain(iter::repeat(Real::INFINITY));
            for (event, interval) in events.zip(gaps) {
                if elapsed + interval < self.window {
                    elapsed += interval;
                    let offset = seconds_to_ns(elapsed);
                    composite.append_delayed(event, offset);
                    entry.push(offset);
                } else {
                    pulses.push(std::mem::replace(&mut composite, event));
                    entries.push(std::mem::replace(&mut entry, PileupEntry::new(Some(interval))));
                    elapsed = Real::default();
                }
            }
            pulses.push(composite);
            entries.push(entry);
        }

        PileupOutcome {
            pulses,
            log: PileupLog { entries },
            intervals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::{SeedableRng, rngs::StdRng};

    fn batch(n: usize) -> Vec<SparseEvent> {
        (0..n).map(|i| SparseEvent::new(vec![i as Real])).collect()
    }

    #[test]
    fn empty_batch() {
        let pileup = PileUp::new(20000.0, 600.0).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let outcome = pileup.merge(Vec::new(), &mut rng);
        assert!(outcome.pulses.is_empty());
        assert!(outcome.log.is_empty());
        assert!(outcome.intervals.is_empty());
    }

    #[test]
    fn single_pulse() {
        let pileup = PileUp::new(20000.0, 600.0).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let outcome = pileup.merge(batch(1), &mut rng);
        assert_eq!(outcome.pulses.len(), 1);
        assert_eq!(outcome.log.counts(), vec![1]);
        assert!(outcome.intervals.is_empty());
    }

    #[test]
    fn log_accounts_for_every_pulse() {
        // A high rate makes pile-up frequent.
        let pileup = PileUp::new(5e6, 600.0).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for n in [2, 3, 10, 257] {
            let outcome = pileup.merge(batch(n), &mut rng);
            assert_eq!(outcome.intervals.len(), n - 1);
            assert_eq!(outcome.pulses.len(), outcome.log.len());
            assert_eq!(outcome.log.total_pulses(), n);
            let photons: usize = outcome.pulses.iter().map(SparseEvent::photon_count).sum();
            assert_eq!(photons, n);
        }
    }

    #[test]
    fn merges_within_window() {
        let pileup = PileUp::new(1.0, 600.0).unwrap();
        let intervals = vec![100e-9, 600e-9, 200e-9, 1e-6];
        let outcome = pileup.merge_with_intervals(batch(5), intervals);

        assert_eq!(outcome.log.counts(), vec![2, 2, 1]);
        let entries = outcome.log.entries();
        assert_eq!(entries[0].lead_interval, None);
        assert_approx_eq!(entries[0].offsets[1], 100.0, 1e-6);
        assert_eq!(entries[1].lead_interval, Some(600e-9));
        assert_approx_eq!(entries[1].offsets[1], 200.0, 1e-6);

        let times = outcome.pulses[0].photon_times();
        assert_approx_eq!(times[1], 101.0, 1e-6);
    }

    #[test]
    fn accumulated_delay_closes_composite() {
        let pileup = PileUp::new(1.0, 600.0).unwrap();
        let outcome = pileup.merge_with_intervals(batch(3), vec![300e-9, 350e-9]);
        assert_eq!(outcome.log.counts(), vec![2, 1]);
    }

    #[test]
    fn no_rate_means_no_pileup() {
        let pileup = PileUp::new(0.0, 600.0).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let outcome = pileup.merge(batch(4), &mut rng);
        assert_eq!(outcome.log.counts(), vec![1, 1, 1, 1]);
        assert!(outcome.intervals.iter().all(|i| i.is_infinite()));
    }

    #[test]
    fn retain_prunes_entries() {
        let pileup = PileUp::new(0.0, 600.0).unwrap();
        let mut outcome = pileup.merge_with_intervals(batch(4), Vec::new());
        outcome.log.retain_indices(&[0, 2]);
        assert_eq!(outcome.log.len(), 2);
        assert_eq!(outcome.log.entries()[1].lead_interval, Some(Real::INFINITY));
    }
}
