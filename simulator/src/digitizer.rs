use crate::{
    config::{DigitizerParameters, TriggerThreshold},
    error::{SimulationError, SimulationResult},
    pulse::{DenseWaveform, DigitizedPulse, TimeAxis},
};
use dacsim_common::{Code, Real};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Trigger {
    threshold: Code,
    pretrigger_samples: usize,
    samples: usize,
}

/// Samples, triggers on and quantizes a voltage waveform.
#[derive(Debug, Clone)]
pub struct Digitizer {
    ratio: usize,
    min_voltage: Real,
    max_voltage: Real,
    full_scale: Code,
    samples: Option<usize>,
    trigger: Option<Trigger>,
    baseline_noise: Option<Normal<Real>>,
}

impl Digitizer {
    /// `native_axis` is the axis the incoming waveforms are sampled on,
    /// `noise_level` the spread (V) of the synthetic baseline used for padding.
    pub fn new(
        parameters: &DigitizerParameters,
        native_axis: &TimeAxis,
        noise_level: Real,
    ) -> SimulationResult<Self> {
        parameters.validate()?;
        let native_frequency = native_axis.sampling_frequency();
        if parameters.sampling_frequency > native_frequency {
            return Err(SimulationError::invalid(
                "sampling-frequency",
                format!("must not exceed the native {native_frequency} GHz"),
            ));
        }
        let ratio = ((native_frequency / parameters.sampling_frequency).round() as usize).max(1);
        let full_scale = ((1u32 << parameters.bits) - 1) as Code;

        let mut digitizer = Self {
            ratio,
            min_voltage: parameters.min_voltage,
            max_voltage: parameters.max_voltage,
            full_scale,
            samples: parameters.samples,
            trigger: None,
            baseline_noise: (noise_level > 0.0)
                .then(|| Normal::new(0.0, noise_level))
                .transpose()?,
        };

        if let Some(trigger) = &parameters.trigger {
            let samples = parameters
                .samples
                .ok_or_else(|| SimulationError::invalid("samples", "required by the trigger"))?;
            let threshold = match trigger.threshold {
                TriggerThreshold::Code(code) => code,
                TriggerThreshold::AboveBaseline(codes) => digitizer.baseline_code().saturating_add(codes),
            };
            if threshold > full_scale {
                return Err(SimulationError::invalid(
                    "threshold",
                    format!("code {threshold} exceeds full scale {full_scale}"),
                ));
            }
            digitizer.trigger = Some(Trigger {
                threshold,
                pretrigger_samples: trigger.pretrigger_samples,
                samples,
            });
        }
        Ok(digitizer)
    }

    /// Number of native samples per digitized sample.
    pub fn ratio(&self) -> usize {
        self.ratio
    }

    pub fn full_scale(&self) -> Code {
        self.full_scale
    }

    pub fn threshold(&self) -> Option<Code> {
        self.trigger.map(|trigger| trigger.threshold)
    }

    pub fn quantize(&self, voltage: Real) -> Code {
        let fraction = (voltage - self.min_voltage) / (self.max_voltage - self.min_voltage);
        (fraction * self.full_scale as Real)
            .round()
            .clamp(0.0, self.full_scale as Real) as Code
    }

    /// Code of a zero volt input.
    pub fn baseline_code(&self) -> Code {
        self.quantize(0.0)
    }

    pub fn resample(&self, samples: &[Real]) -> Vec<Real> {
        samples.iter().step_by(self.ratio).copied().collect()
    }

    /// First native sample whose code reaches the trigger threshold.
    pub fn find_trigger(&self, samples: &[Real]) -> Option<usize> {
        let threshold = self.trigger?.threshold;
        samples
            .iter()
            .position(|&voltage| self.quantize(voltage) >= threshold)
    }

    fn baseline_sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Real {
        self.baseline_noise
            .as_ref()
            .map(|noise| noise.sample(rng))
            .unwrap_or_default()
    }

    /// Pads the tail with baseline noise or truncates it.
    fn fit<R: Rng + ?Sized>(&self, voltages: &mut Vec<Real>, samples: usize, rng: &mut R) {
        voltages.truncate(samples);
        while voltages.len() < samples {
            voltages.push(self.baseline_sample(rng));
        }
    }

    /// Returns `None` when a trigger is configured and the waveform never reaches it.
    pub fn digitize<R: Rng + ?Sized>(
        &self,
        waveform: DenseWaveform,
        rng: &mut R,
    ) -> Option<DigitizedPulse> {
        let samples = waveform.into_samples();
        let voltages = match &self.trigger {
            None => {
                let mut voltages = self.resample(&samples);
                if let Some(count) = self.samples {
                    self.fit(&mut voltages, count, rng);
                }
                voltages
            }
            Some(trigger) => {
                let Some(index) = self.find_trigger(&samples) else {
                    trace!("No trigger crossing");
                    return None;
                };
                let mut voltages = Vec::with_capacity(trigger.samples);
                for back in (1..=trigger.pretrigger_samples).rev() {
                    let sample = index
                        .checked_sub(back * self.ratio)
                        .and_then(|earlier| samples.get(earlier).copied());
                    voltages.push(match sample {
                        Some(voltage) => voltage,
                        None => self.baseline_sample(rng),
                    });
                }
                voltages.extend(samples.iter().skip(index).step_by(self.ratio));
                self.fit(&mut voltages, trigger.samples, rng);
                voltages
            }
        };
        Some(DigitizedPulse::new(
            voltages.into_iter().map(|v| self.quantize(v)).collect(),
        ))
    }

    /// Time axis of the digitized pulses, given the axis of the incoming waveforms.
    pub fn time_axis(&self, native_axis: &TimeAxis) -> TimeAxis {
        let step = native_axis.step() * self.ratio as Real;
        match (&self.trigger, self.samples) {
            (Some(trigger), _) => TimeAxis::new(
                -((trigger.pretrigger_samples * self.ratio) as Real) * native_axis.step(),
                step,
                trigger.samples,
            ),
            (None, Some(samples)) => TimeAxis::new(native_axis.start(), step, samples),
            (None, None) => native_axis.strided(self.ratio),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TriggerParameters;
    use assert_approx_eq::assert_approx_eq;
    use rand::{SeedableRng, rngs::StdRng};

    fn native_axis() -> TimeAxis {
        TimeAxis::from_length(0.05, 600.0).unwrap().bin_axis()
    }

    fn parameters(trigger: Option<TriggerParameters>) -> DigitizerParameters {
        DigitizerParameters {
            bits: 12,
            min_voltage: -0.1,
            max_voltage: 1.2,
            sampling_frequency: 0.4,
            samples: trigger.is_some().then_some(256),
            trigger,
        }
    }

    fn triggered(pretrigger_samples: usize) -> Digitizer {
        Digitizer::new(
            &parameters(Some(TriggerParameters {
                threshold: TriggerThreshold::AboveBaseline(50),
                pretrigger_samples,
            })),
            &native_axis(),
            0.0,
        )
        .unwrap()
    }

    /// A flat baseline with a step up to `height` volts at `onset`.
    fn step(onset: usize, height: Real) -> DenseWaveform {
        DenseWaveform::new(
            (0..native_axis().len())
                .map(|i| if i < onset { 0.0 } else { height })
                .collect(),
        )
    }

    #[test]
    fn quantization_boundaries() {
        let digitizer = Digitizer::new(&parameters(None), &native_axis(), 0.0).unwrap();
        assert_eq!(digitizer.full_scale(), 4095);
        assert_eq!(digitizer.quantize(-0.1), 0);
        assert_eq!(digitizer.quantize(1.2), 4095);
        assert_eq!(digitizer.quantize(-3.0), 0);
        assert_eq!(digitizer.quantize(3.0), 4095);
        assert_eq!(digitizer.baseline_code(), 315);
    }

    #[test]
    fn untriggered_length() {
        let digitizer = Digitizer::new(&parameters(None), &native_axis(), 0.0).unwrap();
        assert_eq!(digitizer.ratio(), 50);
        let mut rng = StdRng::seed_from_u64(0);
        let pulse = digitizer.digitize(step(0, 0.5), &mut rng).unwrap();
        assert_eq!(pulse.len(), 11999usize.div_ceil(50));
        assert_eq!(pulse.len(), digitizer.time_axis(&native_axis()).len());
    }

    #[test]
    fn untriggered_fixed_length() {
        let parameters = DigitizerParameters {
            samples: Some(300),
            ..parameters(None)
        };
        let digitizer = Digitizer::new(&parameters, &native_axis(), 0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let pulse = digitizer.digitize(step(0, 0.5), &mut rng).unwrap();
        assert_eq!(pulse.len(), 300);
        assert_eq!(pulse.codes()[299], digitizer.baseline_code());
    }

    #[test]
    fn triggered_window() {
        let digitizer = triggered(64);
        assert_eq!(digitizer.threshold(), Some(365));
        let mut rng = StdRng::seed_from_u64(1);
        let pulse = digitizer.digitize(step(5000, 0.5), &mut rng).unwrap();
        assert_eq!(pulse.len(), 256);
        assert!(pulse.codes()[..64].iter().all(|&c| c == 315));
        // 140 post-trigger samples remain before the waveform ends, then baseline padding.
        assert!(pulse.codes()[64..204].iter().all(|&c| c == digitizer.quantize(0.5)));
        assert!(pulse.codes()[204..].iter().all(|&c| c == 315));
    }

    #[test]
    fn no_crossing_drops_pulse() {
        let digitizer = triggered(64);
        let mut rng = StdRng::seed_from_u64(2);
        assert!(digitizer.digitize(step(0, 0.0), &mut rng).is_none());
        assert!(digitizer.digitize(DenseWaveform::default(), &mut rng).is_none());
    }

    #[test]
    fn early_trigger_is_padded() {
        let digitizer = Digitizer::new(
            &DigitizerParameters {
                min_voltage: -1.0,
                max_voltage: 1.0,
                ..parameters(Some(TriggerParameters {
                    threshold: TriggerThreshold::Code(3000),
                    pretrigger_samples: 4,
                }))
            },
            &native_axis(),
            0.02,
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let pulse = digitizer.digitize(step(60, 0.8), &mut rng).unwrap();
        assert_eq!(pulse.len(), 256);
        // One real baseline sample precedes the trigger, the rest is synthetic noise.
        let baseline = digitizer.baseline_code() as i32;
        for &code in &pulse.codes()[..4] {
            assert!((code as i32 - baseline).abs() < 250);
        }
        assert_eq!(pulse.codes()[4], digitizer.quantize(0.8));
    }

    #[test]
    fn trigger_time_axis() {
        let digitizer = triggered(64);
        let axis = digitizer.time_axis(&native_axis());
        assert_eq!(axis.len(), 256);
        assert_approx_eq!(axis.start(), -160.0, 1e-9);
        assert_approx_eq!(axis.step(), 2.5, 1e-9);
    }

    #[test]
    fn invalid_parameters() {
        let axis = native_axis();
        let too_fast = DigitizerParameters {
            sampling_frequency: 40.0,
            ..parameters(None)
        };
        assert!(Digitizer::new(&too_fast, &axis, 0.0).is_err());

        let no_samples = DigitizerParameters {
            samples: None,
            ..parameters(Some(TriggerParameters {
                threshold: TriggerThreshold::Code(10),
                pretrigger_samples: 0,
            }))
        };
        assert!(Digitizer::new(&no_samples, &axis, 0.0).is_err());

        let out_of_range = parameters(Some(TriggerParameters {
            threshold: TriggerThreshold::Code(5000),
            pretrigger_samples: 0,
        }));
        assert!(Digitizer::new(&out_of_range, &axis, 0.0).is_err());
    }
}
