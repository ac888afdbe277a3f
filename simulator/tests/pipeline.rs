use dacsim::{Config, Simulation, config::DECAY_MODEL_FILE};
use std::{fs, path::Path};

const SCENARIO: &str = r#"
{
    "seed": 2024,
    "pulses": 100,
    "particle": "electron",
    "count-rates": { "electron": 20000 },
    "scintillator": { "time-step": 0.05, "pulse-length": 600, "mean-photons": 10000 },
    "pmt": { "dynodes": 10, "dynode-gain": 4, "jitter-sigma": 5 },
    "cable": { "cutoff": 0.2, "impedance": 50, "noise-level": 0.01 },
    "digitizer": {
        "bits": 12,
        "min-voltage": -0.1,
        "max-voltage": 1.2,
        "sampling-frequency": 0.4,
        "samples": 256,
        "trigger": { "threshold": { "above-baseline": 50 }, "pretrigger-samples": 64 }
    },
    "decay-model": { "inline": { "electron": [ { "amplitude": 1.0, "decay-constant": 5.0 } ] } }
}
"#;

#[test]
fn example_scenario() {
    let config: Config = serde_json::from_str(SCENARIO).unwrap();
    let tables = config.load_tables(Path::new(".")).unwrap();
    let simulation = Simulation::new(config, tables).unwrap();
    let output = simulation.run().unwrap();

    assert_eq!(output.seed, 2024);
    assert_eq!(output.summary.generated, 100);
    assert_eq!(output.intervals.len(), 99);
    assert_eq!(
        output.summary.written + output.summary.dropped,
        output.summary.composites
    );
    assert!(output.summary.written > 0);

    assert_eq!(output.time_axis.len(), 256);
    for pulse in &output.pulses {
        assert_eq!(pulse.len(), 256);
        assert!(pulse.codes().iter().all(|&code| code < 4096));
    }

    assert_eq!(output.pileup_log.len(), output.pulses.len());
    if output.summary.dropped == 0 {
        assert_eq!(output.pileup_log.total_pulses(), 100);
    }
    for entry in output.pileup_log.entries() {
        assert_eq!(entry.offsets.len(), entry.pulses);
    }
}

#[test]
fn results_do_not_depend_on_thread_count() {
    let config: Config = serde_json::from_str(SCENARIO).unwrap();
    let config = Config {
        pulses: 12,
        ..config
    };
    let tables = config.load_tables(Path::new(".")).unwrap();
    let simulation = Simulation::new(config, tables).unwrap();

    let parallel = simulation.run_with_seed(77).unwrap();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(1)
        .build()
        .unwrap();
    let sequential = pool.install(|| simulation.run_with_seed(77)).unwrap();
    assert_eq!(parallel.pulses, sequential.pulses);
    assert_eq!(parallel.pileup_log, sequential.pileup_log);
}

#[test]
fn legacy_input_file() {
    let dir = std::env::temp_dir().join(format!("dacsim-legacy-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join(DECAY_MODEL_FILE),
        "# decay-constant amplitude\nelectron\n5.0 1.0\nproton\n5.0 1.0\n50.0 0.3\n",
    )
    .unwrap();
    let input = dir.join("input.txt");
    fs::write(
        &input,
        "nps 5\nptype all\ncre 20000\ncrp 5000\nseed 3\n\
         dt 0.05\nplen 300\nqeff 0.26\nnphots 4000\n\
         ndyn 10\ndelta 4\nsigma 5.2\ntt 17.5\n\
         cutoff 0.2\nimp 50\nnoise 0.01\n\
         bits 12\nminV -0.1\nmaxV 1.2\nsampf 0.4\n",
    )
    .unwrap();

    let config = Config::load(&input).unwrap();
    let tables = config.load_tables(&dir).unwrap();
    assert!(tables.energy_spectrum.is_none());
    let output = Simulation::new(config, tables).unwrap().run().unwrap();

    assert_eq!(output.summary.generated, 5);
    assert_eq!(output.summary.dropped, 0);
    assert_eq!(output.pileup_log.total_pulses(), 5);
    for pulse in &output.pulses {
        assert_eq!(pulse.len(), output.time_axis.len());
    }
    fs::remove_dir_all(&dir).unwrap();
}
