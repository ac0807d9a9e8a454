use std::path::Path;

use faer::{Mat, MatMut, MatRef};
use serde::Serialize;

use crate::{
    binary::{BinaryReader, BinaryWriter, POTENTIAL_MAGIC, matrix_bytes},
    error::{FormatError, ScatteringError},
    grid::GridRange,
    potential::GridPotentialSource,
};

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PotentialHeader {
    pub channels: usize,
    pub mass: f64,
    pub grid: GridRange,
}

/// Streams a tabulated potential one grid point at a time.
pub struct PotentialFileReader {
    reader: BinaryReader,
    header: PotentialHeader,
    next_index: usize,
}

impl PotentialFileReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ScatteringError> {
        let mut reader = BinaryReader::open(path.as_ref())?;
        reader.check_preamble(POTENTIAL_MAGIC)?;

        let channels = reader.read_u32("header")?;
        let channels = reader.check_channels(channels, matrix_bytes)?;
        let mass = reader.read_f64("header")?;
        let grid = reader.read_range("header")?;

        if !(mass.is_finite() && mass > 0.) {
            return Err(reader.invalid_header(format!("reduced mass {mass} is not positive")));
        }
        reader.check_range(&grid, "distance grid")?;

        Ok(Self {
            reader,
            header: PotentialHeader {
                channels,
                mass,
                grid,
            },
            next_index: 0,
        })
    }

    pub fn header(&self) -> PotentialHeader {
        self.header
    }
}

impl GridPotentialSource for PotentialFileReader {
    fn channel_count(&self) -> usize {
        self.header.channels
    }

    fn reduced_mass(&self) -> f64 {
        self.header.mass
    }

    fn grid(&self) -> GridRange {
        self.header.grid
    }

    fn load(&mut self, index: usize, out: MatMut<f64>) -> Result<f64, ScatteringError> {
        if index != self.next_index {
            return Err(ScatteringError::OutOfOrder {
                expected: self.next_index,
                index,
            });
        }
        ScatteringError::check_dimension("potential record", self.header.channels, out.nrows())?;
        if index >= self.header.grid.len() {
            return Err(self
                .reader
                .invalid_header(format!("grid has no point with index {index}")));
        }

        let section = format!("potential record {index}");
        let stored = self
            .reader
            .read_record_start(index)?
            .ok_or_else(|| FormatError::Truncated {
                path: self.reader.path().to_path_buf(),
                section: section.clone(),
            })?;
        self.reader.check_record_index(index, index, stored)?;

        let distance = self.reader.read_f64(&section)?;
        self.reader.read_matrix(out, &section)?;
        self.next_index += 1;

        Ok(distance)
    }
}

pub struct PotentialFileWriter {
    writer: BinaryWriter,
    header: PotentialHeader,
    next_index: usize,
}

impl PotentialFileWriter {
    pub fn create(path: impl AsRef<Path>, header: PotentialHeader) -> Result<Self, ScatteringError> {
        header.grid.validate("distance grid")?;

        let mut writer = BinaryWriter::create(path.as_ref(), POTENTIAL_MAGIC)?;
        writer.write_u32(header.channels as u32)?;
        writer.write_f64(header.mass)?;
        writer.write_range(&header.grid)?;

        Ok(Self {
            writer,
            header,
            next_index: 0,
        })
    }

    pub fn write_point(&mut self, distance: f64, value: MatRef<f64>) -> Result<(), ScatteringError> {
        ScatteringError::check_dimension("potential record", self.header.channels, value.nrows())?;
        ScatteringError::check_dimension("potential record", self.header.channels, value.ncols())?;

        self.writer.write_u32(self.next_index as u32)?;
        self.writer.write_f64(distance)?;
        self.writer.write_matrix(value)?;
        self.next_index += 1;

        Ok(())
    }

    pub fn finish(mut self) -> Result<(), ScatteringError> {
        self.writer.finish()
    }
}

/// Tabulates `source` on its whole grid into a potential file.
pub fn write_potential(
    path: impl AsRef<Path>,
    source: &mut impl GridPotentialSource,
) -> Result<(), ScatteringError> {
    let header = PotentialHeader {
        channels: source.channel_count(),
        mass: source.reduced_mass(),
        grid: source.grid(),
    };

    let mut writer = PotentialFileWriter::create(path, header)?;
    let mut value = Mat::zeros(header.channels, header.channels);
    for index in 0..header.grid.len() {
        let distance = source.load(index, value.as_mut())?;
        writer.write_point(distance, value.as_ref())?;
    }

    writer.finish()
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use faer::{Mat, MatMut};

    use crate::{
        binary::inspect,
        error::{FormatError, ScatteringError},
        grid::GridRange,
        potential::{FunctionPotential, GridPotentialSource, TabulatedPotential},
    };

    use super::{PotentialFileReader, write_potential};

    fn coupling(r: f64, mut out: MatMut<f64>) {
        out[(0, 0)] = 1. / r;
        out[(1, 1)] = 2. / r;
        out[(0, 1)] = 0.5 / (r * r);
        out[(1, 0)] = 0.5 / (r * r);
    }

    #[test]
    fn test_potential_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("potential.bin");

        let grid = GridRange::new(1., 3., 0.5);
        let mut function = FunctionPotential::new(7.5, grid, 2, coupling);
        write_potential(&path, &mut function).unwrap();

        let mut reader = PotentialFileReader::open(&path).unwrap();
        assert_eq!(reader.channel_count(), 2);
        assert_eq!(reader.reduced_mass(), 7.5);
        assert_eq!(reader.grid(), grid);

        let table = TabulatedPotential::sample(&mut reader).unwrap();
        let mut expected = Mat::zeros(2, 2);
        coupling(2.5, expected.as_mut());
        assert_eq!(table.distances()[3], 2.5);
        assert_eq!(table.values()[3], expected);

        let header = inspect(&path).unwrap();
        assert!(matches!(header, crate::binary::FileHeader::Potential(h) if h.channels == 2));
    }

    #[test]
    fn test_out_of_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("potential.bin");

        let grid = GridRange::new(1., 3., 0.5);
        write_potential(&path, &mut FunctionPotential::new(1., grid, 2, coupling)).unwrap();

        let mut reader = PotentialFileReader::open(&path).unwrap();
        let mut out = Mat::zeros(2, 2);
        reader.load(0, out.as_mut()).unwrap();

        assert!(matches!(
            reader.load(2, out.as_mut()),
            Err(ScatteringError::OutOfOrder { expected: 1, index: 2 })
        ));
    }

    #[test]
    fn test_bad_files() {
        let dir = tempfile::tempdir().unwrap();

        let wrong_tag = dir.path().join("wrong_tag.bin");
        std::fs::write(&wrong_tag, b"CCRT\x01rest").unwrap();
        let err = PotentialFileReader::open(&wrong_tag).err().unwrap();
        assert!(matches!(err, ScatteringError::Format(FormatError::BadMagic { .. })));
        assert!(err.to_string().contains("wrong_tag.bin"));

        let wrong_version = dir.path().join("wrong_version.bin");
        std::fs::write(&wrong_version, b"CCPT\x02").unwrap();
        let err = PotentialFileReader::open(&wrong_version).err().unwrap();
        assert!(matches!(
            err,
            ScatteringError::Format(FormatError::BadVersion { expected: 1, actual: 2, .. })
        ));

        // header complete, records cut in the middle of the second point
        let grid = GridRange::new(1., 3., 0.5);
        let full = dir.path().join("full.bin");
        write_potential(&full, &mut FunctionPotential::new(1., grid, 2, coupling)).unwrap();
        let bytes = std::fs::read(&full).unwrap();

        let truncated = dir.path().join("truncated.bin");
        let header_len = 4 + 1 + 4 + 8 + 3 * 8;
        let record_len = 4 + 8 + 4 * 8;
        let mut file = std::fs::File::create(&truncated).unwrap();
        file.write_all(&bytes[..header_len + record_len + 10]).unwrap();
        drop(file);

        let mut reader = PotentialFileReader::open(&truncated).unwrap();
        let mut out = Mat::zeros(2, 2);
        reader.load(0, out.as_mut()).unwrap();
        let err = reader.load(1, out.as_mut()).err().unwrap();
        assert!(matches!(
            err,
            ScatteringError::Format(FormatError::Truncated { .. })
        ));
    }
}
