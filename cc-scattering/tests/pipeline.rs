use cc_scattering::{
    binary::{
        basis_file::{read_basis, write_basis},
        potential_file::{PotentialFileReader, write_potential},
        ratio_file::{RatioFileReader, RatioFileWriter, RatioHeader},
        scattering_file::{ScatteringFileReader, ScatteringFileWriter, ScatteringHeader},
    },
    boundary::BoundaryMatcher,
    channels::{Channel, ChannelBasis},
    faer::MatMut,
    grid::GridRange,
    observables::outcome::EnergyOutcome,
    potential::{FunctionPotential, GridPotentialSource},
    propagator::EnergyTask,
    sweep::Sweep,
    sweep_watcher::SweepLogging,
};
use quantum::assert_approx_eq;

const MASS: f64 = 8.;
const SPLITTING: f64 = 0.004;

fn basis() -> ChannelBasis {
    ChannelBasis::new(vec![
        Channel {
            total_j: 1,
            j: 0,
            v: 0,
            l: 1,
            parity: -1,
            index: 0,
            threshold: 0.,
        },
        Channel {
            total_j: 1,
            j: 1,
            v: 0,
            l: 1,
            parity: -1,
            index: 1,
            threshold: SPLITTING,
        },
    ])
}

fn potential(r: f64, mut out: MatMut<f64>) {
    let well = 0.02 * ((2. / r).powi(12) - 2. * (2. / r).powi(6));
    let centrifugal = 2. / (2. * MASS * r * r);

    out[(0, 0)] = well + centrifugal;
    out[(1, 1)] = SPLITTING + well + centrifugal;
    out[(0, 1)] = 0.005 * f64::exp(-(r - 2.));
    out[(1, 0)] = 0.005 * f64::exp(-(r - 2.));
}

#[test]
fn test_file_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let potential_path = dir.path().join("potential.bin");
    let basis_path = dir.path().join("basis.bin");
    let ratio_path = dir.path().join("ratio.bin");
    let scattering_path = dir.path().join("scattering.bin");

    let grid = GridRange::new(1.4, 30., 0.004);
    let energies = GridRange::new(0.001, 0.009, 0.002);

    write_potential(&potential_path, &mut FunctionPotential::new(MASS, grid, 2, potential)).unwrap();
    write_basis(&basis_path, &basis()).unwrap();

    let mut source = PotentialFileReader::open(&potential_path).unwrap();
    let mut tasks: Vec<EnergyTask> = energies
        .values()
        .enumerate()
        .map(|(i, e)| EnergyTask::new(i, e, source.channel_count()))
        .collect();

    let mut logging = SweepLogging::default();
    Sweep::new(true)
        .run(&mut source, &mut tasks, &mut logging)
        .unwrap();

    let mut ratio_writer = RatioFileWriter::create(
        &ratio_path,
        RatioHeader {
            channels: 2,
            mass: MASS,
            grid,
            energies,
        },
    )
    .unwrap();
    for task in &tasks {
        ratio_writer.write(task.index, task.energy, task.ratio()).unwrap();
    }
    ratio_writer.finish().unwrap();

    // matching from the stored ratios reproduces matching from memory
    let basis = read_basis(&basis_path).unwrap();
    let matcher = BoundaryMatcher::from_grid(MASS, &grid);
    let mut scattering_writer = ScatteringFileWriter::create(
        &scattering_path,
        ScatteringHeader {
            channels: 2,
            mass: MASS,
            energies,
        },
    )
    .unwrap();

    let reader = RatioFileReader::open(&ratio_path).unwrap();
    let mut outcomes = Vec::new();
    for (record, task) in reader.zip(tasks) {
        let record = record.unwrap();
        assert_eq!(record.ratio.as_ref(), task.ratio());

        let outcome =
            EnergyOutcome::compute(record.index, record.energy, record.ratio, &matcher, &basis).unwrap();
        scattering_writer.write(&outcome).unwrap();
        outcomes.push(outcome);
    }
    scattering_writer.finish().unwrap();

    let open_counts: Vec<usize> = outcomes.iter().map(|o| o.open_count()).collect();
    assert_eq!(open_counts, vec![1, 1, 2, 2, 2]);

    for outcome in &outcomes {
        let s = outcome.scattering.as_ref().unwrap();
        assert!(s.unitarity_deviation() < 1e-8);
    }
    assert_approx_eq!(outcomes[0].scattering.as_ref().unwrap().transition_probability(0, 0), 1., 1e-10);

    let records = ScatteringFileReader::open(&scattering_path)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(records.len(), 5);
    assert_eq!(records[3].open_count, 2);
    assert_eq!(records[3].scattering.as_ref().unwrap().re, outcomes[3].scattering.as_ref().unwrap().re);
}
