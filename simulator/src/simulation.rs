use crate::{
    cable::Cable,
    config::Config,
    digitizer::Digitizer,
    error::{SimulationError, SimulationResult},
    pileup::{PileUp, PileupLog, PileupOutcome},
    pmt::Pmt,
    pulse::{DigitizedPulse, EventPulse, SparseEvent, TimeAxis},
    scintillator::PhotonGenerator,
    tables::{DecayModel, Tables},
};
use dacsim_common::Real;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
use serde::Serialize;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunSummary {
    /// Primitive pulses generated by the scintillator.
    pub generated: usize,
    /// Pulses left after pile-up.
    pub composites: usize,
    /// Composites which never reached the trigger.
    pub dropped: usize,
    pub written: usize,
}

/// Everything a run produces, in the shape it is written out.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SimulationOutput {
    pub seed: u64,
    /// Sample times of the digitized pulses, in ns.
    pub time_axis: Vec<Real>,
    pub pulses: Vec<DigitizedPulse>,
    pub pileup_log: PileupLog,
    /// Inter-arrival times drawn by the pile-up stage, in seconds. Infinite values are written as null.
    pub intervals: Vec<Real>,
    pub summary: RunSummary,
    pub config: Config,
    pub decay_model: DecayModel,
}

impl SimulationOutput {
    pub fn write_json<W: Write>(&self, writer: W) -> SimulationResult<()> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Writes to `path`, creating its directory if needed.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn save(&self, path: &Path) -> SimulationResult<()> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| SimulationError::io(dir, e))?;
        }
        let file = File::create(path).map_err(|e| SimulationError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        self.write_json(&mut writer)?;
        writer.flush().map_err(|e| SimulationError::io(path, e))?;
        info!("Output written");
        Ok(())
    }
}

/// One configured run of the acquisition chain.
pub struct Simulation {
    config: Config,
    tables: Tables,
    axis: TimeAxis,
    generator: PhotonGenerator,
    pileup: PileUp,
    pmt: Pmt,
    cable: Cable,
    digitizer: Digitizer,
}

impl Simulation {
    #[instrument(skip_all)]
    pub fn new(config: Config, tables: Tables) -> SimulationResult<Self> {
        config.validate()?;
        let scintillator = &config.scintillator;
        let axis = TimeAxis::from_length(scintillator.time_step, scintillator.pulse_length)?;
        let particles = config.particle.particles(&config.count_rates);
        let generator = PhotonGenerator::new(
            &tables.decay_model,
            tables.energy_spectrum.as_ref(),
            scintillator,
            &particles,
        )?;
        let pileup = PileUp::new(config.total_rate(), scintillator.pulse_length)?;
        let pmt = Pmt::new(&config.pmt, &axis)?;
        let cable = Cable::new(&config.cable, &axis)?;
        let digitizer = Digitizer::new(
            &config.digitizer,
            &axis.bin_axis(),
            config.cable.noise_level,
        )?;
        debug!(
            "Native axis of {} samples, digitizer ratio {}",
            axis.len(),
            digitizer.ratio()
        );
        Ok(Self {
            config,
            tables,
            axis,
            generator,
            pileup,
            pmt,
            cable,
            digitizer,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn time_axis(&self) -> &TimeAxis {
        &self.axis
    }

    pub fn digitizer(&self) -> &Digitizer {
        &self.digitizer
    }

    /// Runs with the configured seed, or with one drawn from the OS.
    pub fn run(&self) -> SimulationResult<SimulationOutput> {
        let seed = self.config.seed.unwrap_or_else(|| {
            let seed = rand::random();
            info!("No seed configured, using {seed}");
            seed
        });
        self.run_with_seed(seed)
    }

    /// Photomultiplier, cable and digitizer, for one composite pulse.
    fn process(&self, pulse: SparseEvent, seed: u64) -> Option<DigitizedPulse> {
        let mut rng = StdRng::seed_from_u64(seed);
        let current = EventPulse::from(pulse).into_dense(&self.pmt, &self.axis, &mut rng);
        let voltage = self.cable.add_noise(self.cable.filter(current), &mut rng);
        self.digitizer.digitize(voltage, &mut rng)
    }

    #[instrument(skip(self), fields(pulses = self.config.pulses))]
    pub fn run_with_seed(&self, seed: u64) -> SimulationResult<SimulationOutput> {
        let mut rng = StdRng::seed_from_u64(seed);
        let batch = self.generator.generate_selection(
            self.config.particle,
            &self.config.count_rates,
            self.config.pulses,
            &mut rng,
        )?;
        let generated = batch.len();

        let PileupOutcome {
            pulses,
            mut log,
            intervals,
        } = self.pileup.merge(batch, &mut rng);
        let composites = pulses.len();

        // Each composite has its own stream so the result does not depend on scheduling.
        let seeds = (0..composites).map(|_| rng.random()).collect::<Vec<u64>>();
        let digitized = pulses
            .into_par_iter()
            .zip(seeds)
            .map(|(pulse, seed)| self.process(pulse, seed))
            .collect::<Vec<_>>();

        let kept = digitized
            .iter()
            .enumerate()
            .filter_map(|(index, pulse)| pulse.is_some().then_some(index))
            .collect::<Vec<_>>();
        log.retain_indices(&kept);
        let pulses = digitized.into_iter().flatten().collect::<Vec<_>>();

        let summary = RunSummary {
            generated,
            composites,
            dropped: composites - pulses.len(),
            written: pulses.len(),
        };
        info!(
            "Generated {}, composites {}, dropped {}, written {}",
            summary.generated, summary.composites, summary.dropped, summary.written
        );

        Ok(SimulationOutput {
            seed,
            time_axis: self
                .digitizer
                .time_axis(&self.axis.bin_axis())
                .iter()
                .collect(),
            pulses,
            pileup_log: log,
            intervals,
            summary,
            config: Config {
                seed: Some(seed),
                ..self.config.clone()
            },
            decay_model: self.tables.decay_model.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{DigitizerParameters, TableSource, TriggerParameters, TriggerThreshold},
        particle::{ParticleSelection, ParticleType},
        tables::{CoefficientTable, EnergySpectrum},
    };

    fn config() -> Config {
        serde_json::from_str(
            r#"{
                "pulses": 20,
                "particle": "electron",
                "count-rates": { "electron": 20000 },
                "scintillator": { "pulse-length": 200, "mean-photons": 2000 },
                "pmt": { "jitter-sigma": 2 },
                "cable": { "cutoff": 0.5, "noise-level": 0.005 },
                "decay-model": { "inline": { "electron": [ { "amplitude": 1, "decay-constant": 5 } ] } }
            }"#,
        )
        .unwrap()
    }

    fn simulation(config: Config) -> Simulation {
        let tables = config.load_tables(Path::new(".")).unwrap();
        Simulation::new(config, tables).unwrap()
    }

    #[test]
    fn same_seed_same_output() {
        let simulation = simulation(config());
        let first = simulation.run_with_seed(11).unwrap();
        let second = simulation.run_with_seed(11).unwrap();
        assert_eq!(first.pulses, second.pulses);
        assert_eq!(first.pileup_log, second.pileup_log);
        assert_eq!(first.summary.generated, 20);
        assert_eq!(first.config.seed, Some(11));
    }

    #[test]
    fn untriggered_run_keeps_every_composite() {
        let simulation = simulation(config());
        let output = simulation.run_with_seed(3).unwrap();
        assert_eq!(output.summary.dropped, 0);
        assert_eq!(output.pulses.len(), output.pileup_log.len());
        assert_eq!(output.pileup_log.total_pulses(), 20);
        for pulse in &output.pulses {
            assert_eq!(pulse.len(), output.time_axis.len());
        }
    }

    #[test]
    fn unreachable_trigger_drops_everything() {
        let config = Config {
            digitizer: DigitizerParameters {
                samples: Some(32),
                trigger: Some(TriggerParameters {
                    threshold: TriggerThreshold::Code(255),
                    pretrigger_samples: 4,
                }),
                max_voltage: 100.0,
                ..Default::default()
            },
            ..config()
        };
        let output = simulation(config).run_with_seed(5).unwrap();
        assert_eq!(output.summary.written, 0);
        assert_eq!(output.summary.dropped, output.summary.composites);
        assert!(output.pileup_log.is_empty());
    }

    #[test]
    fn mixed_particles_with_spectrum() {
        let config = Config {
            particle: ParticleSelection::All,
            count_rates: [(ParticleType::Electron, 3.0), (ParticleType::Proton, 1.0)]
                .into_iter()
                .collect(),
            decay_model: TableSource::Inline(
                DecayModel::parse("electron\n5 1\nproton\n5 1\n50 0.2\n").unwrap(),
            ),
            ..config()
        };
        let mut tables = config.load_tables(Path::new(".")).unwrap();
        tables.energy_spectrum = Some(EnergySpectrum::parse("100 1\n200 1\n").unwrap());
        let simulation = Simulation::new(config, tables).unwrap();

        let output = simulation.run_with_seed(9).unwrap();
        assert_eq!(output.summary.generated, 20);
        assert_eq!(output.pileup_log.total_pulses(), 20);
    }

    #[test]
    fn output_is_json() {
        let output = simulation(config()).run_with_seed(1).unwrap();
        let mut buffer = Vec::new();
        output.write_json(&mut buffer).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(value["seed"], 1);
        assert_eq!(value["summary"]["generated"], 20);
        assert!(value["pulses"].is_array());
        assert!(value["pileup-log"].is_array());
    }
}
