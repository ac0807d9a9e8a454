use std::path::Path;

use faer::{Mat, MatRef};
use serde::Serialize;

use crate::{
    binary::{BinaryReader, BinaryWriter, RATIO_MAGIC, matrix_bytes},
    error::{FormatError, ScatteringError},
    grid::{EnergyRange, GridRange},
};

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RatioHeader {
    pub channels: usize,
    pub mass: f64,
    pub grid: GridRange,
    pub energies: EnergyRange,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RatioRecord {
    pub index: usize,
    pub energy: f64,
    pub ratio: Mat<f64>,
}

/// Final ratio matrices of a sweep, one record per energy in index order.
pub struct RatioFileWriter {
    writer: BinaryWriter,
    header: RatioHeader,
    next_index: usize,
}

impl RatioFileWriter {
    pub fn create(path: impl AsRef<Path>, header: RatioHeader) -> Result<Self, ScatteringError> {
        header.grid.validate("distance grid")?;
        header.energies.validate("energy")?;

        let mut writer = BinaryWriter::create(path.as_ref(), RATIO_MAGIC)?;
        writer.write_u32(header.channels as u32)?;
        writer.write_f64(header.mass)?;
        writer.write_range(&header.grid)?;
        writer.write_range(&header.energies)?;

        Ok(Self {
            writer,
            header,
            next_index: 0,
        })
    }

    pub fn header(&self) -> RatioHeader {
        self.header
    }

    pub fn write(&mut self, index: usize, energy: f64, ratio: MatRef<f64>) -> Result<(), ScatteringError> {
        ScatteringError::check_dimension("ratio record", self.header.channels, ratio.nrows())?;
        if index != self.next_index {
            return Err(ScatteringError::OutOfOrder {
                expected: self.next_index,
                index,
            });
        }

        self.writer.write_u32(index as u32)?;
        self.writer.write_f64(energy)?;
        self.writer.write_matrix(ratio)?;
        self.next_index += 1;

        Ok(())
    }

    pub fn finish(&mut self) -> Result<(), ScatteringError> {
        self.writer.finish()
    }
}

pub struct RatioFileReader {
    reader: BinaryReader,
    header: RatioHeader,
    position: usize,
}

impl RatioFileReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ScatteringError> {
        let mut reader = BinaryReader::open(path.as_ref())?;
        reader.check_preamble(RATIO_MAGIC)?;

        let channels = reader.read_u32("header")?;
        let channels = reader.check_channels(channels, matrix_bytes)?;
        let mass = reader.read_f64("header")?;
        let grid = reader.read_range("header")?;
        let energies = reader.read_range("header")?;

        reader.check_range(&grid, "distance grid")?;
        reader.check_range(&energies, "energy")?;

        Ok(Self {
            reader,
            header: RatioHeader {
                channels,
                mass,
                grid,
                energies,
            },
            position: 0,
        })
    }

    pub fn header(&self) -> RatioHeader {
        self.header
    }

    /// Next record, `None` once every energy of the header was read.
    pub fn next_record(&mut self) -> Result<Option<RatioRecord>, ScatteringError> {
        let position = self.position;
        let expected_records = self.header.energies.len();
        if position == expected_records {
            return Ok(None);
        }

        let index = match self.reader.read_record_start(position)? {
            Some(index) => index,
            None => {
                return Err(FormatError::Truncated {
                    path: self.reader.path().to_path_buf(),
                    section: format!("ratio record {position} of {expected_records}"),
                }
                .into());
            }
        };
        self.reader.check_record_index(position, position, index)?;

        let section = format!("ratio record {position}");
        let energy = self.reader.read_f64(&section)?;
        let mut ratio = Mat::zeros(self.header.channels, self.header.channels);
        self.reader.read_matrix(ratio.as_mut(), &section)?;
        self.position += 1;

        Ok(Some(RatioRecord {
            index: index as usize,
            energy,
            ratio,
        }))
    }
}

impl Iterator for RatioFileReader {
    type Item = Result<RatioRecord, ScatteringError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
mod test {
    use faer::Mat;

    use crate::{
        error::{FormatError, ScatteringError},
        grid::GridRange,
    };

    use super::{RatioFileReader, RatioFileWriter, RatioHeader};

    fn header() -> RatioHeader {
        RatioHeader {
            channels: 3,
            mass: 1234.5,
            grid: GridRange::new(3., 50., 0.01),
            energies: GridRange::new(1e-6, 4e-6, 1e-6),
        }
    }

    #[test]
    fn test_ratio_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratio.bin");

        let matrices: Vec<Mat<f64>> = (0..4)
            .map(|k| Mat::from_fn(3, 3, |i, j| (k * 10 + i + j) as f64 / 7.))
            .collect();

        let mut writer = RatioFileWriter::create(&path, header()).unwrap();
        for (index, ratio) in matrices.iter().enumerate() {
            writer
                .write(index, header().energies.value(index), ratio.as_ref())
                .unwrap();
        }
        writer.finish().unwrap();

        let reader = RatioFileReader::open(&path).unwrap();
        assert_eq!(reader.header(), header());

        let records: Vec<_> = reader.collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 4);
        for (record, expected) in records.iter().zip(&matrices) {
            assert_eq!(&record.ratio, expected);
        }
        assert_eq!(records[2].index, 2);
        assert_eq!(records[2].energy, header().energies.value(2));
    }

    #[test]
    fn test_ratio_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratio.bin");

        let mut writer = RatioFileWriter::create(&path, header()).unwrap();
        let ratio = Mat::<f64>::identity(3, 3);
        writer.write(0, 1e-6, ratio.as_ref()).unwrap();
        assert!(matches!(
            writer.write(2, 3e-6, ratio.as_ref()),
            Err(ScatteringError::OutOfOrder { expected: 1, index: 2 })
        ));
        writer.finish().unwrap();

        // only one of four records present
        let mut reader = RatioFileReader::open(&path).unwrap();
        assert!(reader.next_record().unwrap().is_some());
        assert!(matches!(
            reader.next_record(),
            Err(ScatteringError::Format(FormatError::Truncated { .. }))
        ));
    }

    #[test]
    fn test_unfinished_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratio.bin");

        let mut writer = RatioFileWriter::create(&path, header()).unwrap();
        writer.write(0, 1e-6, Mat::<f64>::identity(3, 3).as_ref()).unwrap();
        assert!(!path.exists());
        drop(writer);

        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_oversized_channel_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratio.bin");

        let mut writer = RatioFileWriter::create(&path, header()).unwrap();
        for index in 0..4 {
            let ratio = Mat::<f64>::identity(3, 3);
            writer.write(index, header().energies.value(index), ratio.as_ref()).unwrap();
        }
        writer.finish().unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[5..9].copy_from_slice(&u32::MAX.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            RatioFileReader::open(&path),
            Err(ScatteringError::Format(FormatError::InvalidHeader { .. }))
        ));
    }
}
