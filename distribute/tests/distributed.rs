use std::fs;

use cc_scattering::{
    binary::{
        FileHeader,
        basis_file::write_basis,
        inspect,
        potential_file::write_potential,
        ratio_file::RatioFileReader,
        scattering_file::{ScatteringFileReader, ScatteringRecord},
    },
    channels::{Channel, ChannelBasis},
    faer::MatMut,
    grid::GridRange,
    observables::s_matrix::ScatteringSummary,
    potential::FunctionPotential,
};
use distribute::{
    config::RunConfig,
    run::{WorkerPool, match_files, run_config},
};
use quantum::assert_approx_eq;

const MASS: f64 = 8.;
const SPLITTING: f64 = 0.004;

fn basis() -> ChannelBasis {
    (0..2)
        .map(|i| Channel {
            total_j: 1,
            j: i,
            v: 0,
            l: 1,
            parity: -1,
            index: i,
            threshold: SPLITTING * i as f64,
        })
        .collect()
}

fn potential(r: f64, mut out: MatMut<f64>) {
    let well = 0.02 * ((2. / r).powi(12) - 2. * (2. / r).powi(6));
    let centrifugal = 2. / (2. * MASS * r * r);
    let coupling = 0.005 * f64::exp(-(r - 2.));

    out[(0, 0)] = well + centrifugal;
    out[(1, 1)] = SPLITTING + well + centrifugal;
    out[(0, 1)] = coupling;
    out[(1, 0)] = coupling;
}

fn worker_processes() -> WorkerPool {
    WorkerPool::Processes {
        program: env!("CARGO_BIN_EXE_ccprop").into(),
    }
}

fn read_scattering(path: &std::path::Path) -> Vec<ScatteringRecord> {
    ScatteringFileReader::open(path)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[test]
fn test_distributed_run() {
    let dir = tempfile::tempdir().unwrap();
    let grid = GridRange::new(1.4, 30., 0.004);
    write_potential(
        dir.path().join("potential.bin"),
        &mut FunctionPotential::new(MASS, grid, 2, potential),
    )
    .unwrap();
    write_basis(dir.path().join("basis.bin"), &basis()).unwrap();

    let config_path = dir.path().join("run.json");
    fs::write(
        &config_path,
        r#"{
            "potential": "potential.bin",
            "basis": "basis.bin",
            "output": "three",
            "energies": { "min": 0.001, "max": 0.009, "step": 0.002 },
            "workers": 3,
            "parallel": true
        }"#,
    )
    .unwrap();

    let config = RunConfig::load(&config_path).unwrap();
    let distributed = run_config(&config, &worker_processes()).unwrap();

    let mut threaded = config.clone();
    threaded.output = dir.path().join("threads");
    let threaded = run_config(&threaded, &WorkerPool::Threads).unwrap();

    let mut single = config.clone();
    single.workers = 1;
    single.parallel = false;
    single.output = dir.path().join("one");
    let serial = run_config(&single, &WorkerPool::Threads).unwrap();

    let records = read_scattering(&distributed.scattering);
    let expected = read_scattering(&serial.scattering);
    assert_eq!(records.len(), 5);
    assert_eq!(
        fs::read(&distributed.ratio).unwrap(),
        fs::read(&threaded.ratio).unwrap()
    );

    let indices: Vec<_> = records.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);

    let open: Vec<_> = records.iter().map(|r| r.open_count).collect();
    assert_eq!(open, vec![1, 1, 2, 2, 2]);

    for (record, expected) in records.iter().zip(&expected) {
        assert_eq!(record.energy, expected.energy);
        assert_eq!(record.reaction, expected.reaction);

        let s = record.scattering.as_ref().unwrap();
        assert!(s.unitarity_deviation() < 1e-8);
        assert_eq!(s.re, expected.scattering.as_ref().unwrap().re);
    }

    let ratios = RatioFileReader::open(&distributed.ratio)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(ratios.len(), 5);
    for ratio in &ratios {
        assert_approx_eq!(ratio.ratio[(0, 1)], ratio.ratio[(1, 0)], 1e-12);
    }

    let summary: Vec<ScatteringSummary> =
        serde_json::from_str(&fs::read_to_string(&distributed.summary).unwrap()).unwrap();
    assert_eq!(summary.len(), 5);
    assert_eq!(summary[0].open_channels, vec![0]);
    assert_approx_eq!(summary[0].probabilities[0][0], 1., 1e-10);
    for entry in &summary[2..] {
        let total: f64 = entry.probabilities[0].iter().sum();
        assert_approx_eq!(total, 1., 1e-8);
    }

    let rematched = dir.path().join("rematched.bin");
    let count = match_files(&distributed.ratio, &dir.path().join("basis.bin"), &rematched).unwrap();
    assert_eq!(count, 5);
    for (record, expected) in read_scattering(&rematched).iter().zip(&records) {
        assert_eq!(record.reaction, expected.reaction);
    }
    assert!(rematched.with_extension("json").exists());

    match inspect(&distributed.ratio).unwrap() {
        FileHeader::Ratio(header) => {
            assert_eq!(header.channels, 2);
            assert_eq!(header.mass, MASS);
            assert_eq!(header.energies.len(), 5);
        }
        other => panic!("unexpected header {other:?}"),
    }
}

#[test]
fn test_mismatched_basis() {
    let dir = tempfile::tempdir().unwrap();
    let grid = GridRange::new(1.4, 5., 0.01);
    write_potential(
        dir.path().join("potential.bin"),
        &mut FunctionPotential::new(MASS, grid, 2, potential),
    )
    .unwrap();

    let single: ChannelBasis = basis().channels()[..1].iter().cloned().collect();
    write_basis(dir.path().join("basis.bin"), &single).unwrap();

    let config_path = dir.path().join("run.json");
    fs::write(
        &config_path,
        r#"{
            "potential": "potential.bin",
            "basis": "basis.bin",
            "output": "out",
            "energies": { "min": 1, "max": 4, "step": 1, "unit": "kelvin" },
            "workers": 2
        }"#,
    )
    .unwrap();

    let config = RunConfig::load(&config_path).unwrap();
    for pool in [worker_processes(), WorkerPool::Threads] {
        let error = run_config(&config, &pool).unwrap_err();
        assert!(error.to_string().contains("channel basis vs potential file"));

        let out = dir.path().join("out");
        assert!(!out.join("ratio.bin").exists());
        assert!(!out.join("scattering.bin").exists());
        assert!(!out.join("summary.json").exists());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }
}
