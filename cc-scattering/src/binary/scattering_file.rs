use std::path::Path;

use faer::{Mat, MatRef};
use serde::Serialize;

use crate::{
    binary::{BinaryReader, BinaryWriter, SCATTERING_MAGIC, matrix_bytes},
    error::{FormatError, ScatteringError},
    grid::EnergyRange,
    observables::{outcome::EnergyOutcome, s_matrix::ScatteringMatrix},
};

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ScatteringHeader {
    pub channels: usize,
    pub mass: f64,
    pub energies: EnergyRange,
}

/// Reaction and scattering matrices of one energy restricted to its open channels.
#[derive(Clone, Debug)]
pub struct ScatteringRecord {
    pub index: usize,
    pub energy: f64,
    pub open_count: usize,
    pub reaction: Mat<f64>,
    pub scattering: Option<ScatteringMatrix>,
}

pub struct ScatteringFileWriter {
    writer: BinaryWriter,
    header: ScatteringHeader,
    next_index: usize,
}

impl ScatteringFileWriter {
    pub fn create(
        path: impl AsRef<Path>,
        header: ScatteringHeader,
    ) -> Result<Self, ScatteringError> {
        header.energies.validate("energy")?;

        let mut writer = BinaryWriter::create(path.as_ref(), SCATTERING_MAGIC)?;
        writer.write_u32(header.channels as u32)?;
        writer.write_f64(header.mass)?;
        writer.write_range(&header.energies)?;

        Ok(Self {
            writer,
            header,
            next_index: 0,
        })
    }

    pub fn header(&self) -> ScatteringHeader {
        self.header
    }

    pub fn write(&mut self, outcome: &EnergyOutcome) -> Result<(), ScatteringError> {
        ScatteringError::check_dimension(
            "scattering record",
            self.header.channels,
            outcome.reaction.full.nrows(),
        )?;
        if outcome.index != self.next_index {
            return Err(ScatteringError::OutOfOrder {
                expected: self.next_index,
                index: outcome.index,
            });
        }

        let open = outcome.open_count();
        self.writer.write_u32(outcome.index as u32)?;
        self.writer.write_f64(outcome.energy)?;
        self.writer.write_u32(open as u32)?;

        match &outcome.scattering {
            Some(s) => {
                self.write_padded(outcome.reaction.open_block().as_ref())?;
                self.write_padded(s.re.as_ref())?;
                self.write_padded(s.im.as_ref())?;
            }
            None => self.writer.write_zeros(3 * self.header.channels * self.header.channels)?,
        }
        self.next_index += 1;

        Ok(())
    }

    fn write_padded(&mut self, block: MatRef<f64>) -> Result<(), ScatteringError> {
        let channels = self.header.channels;
        for i in 0..channels {
            for j in 0..channels {
                let value = if i < block.nrows() && j < block.ncols() {
                    block[(i, j)]
                } else {
                    0.
                };
                self.writer.write_f64(value)?;
            }
        }

        Ok(())
    }

    pub fn finish(&mut self) -> Result<(), ScatteringError> {
        self.writer.finish()
    }
}

pub struct ScatteringFileReader {
    reader: BinaryReader,
    header: ScatteringHeader,
    position: usize,
}

impl ScatteringFileReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ScatteringError> {
        let mut reader = BinaryReader::open(path.as_ref())?;
        reader.check_preamble(SCATTERING_MAGIC)?;

        let channels = reader.read_u32("header")?;
        let channels = reader.check_channels(channels, matrix_bytes)?;
        let mass = reader.read_f64("header")?;
        let energies = reader.read_range("header")?;
        reader.check_range(&energies, "energy")?;

        Ok(Self {
            reader,
            header: ScatteringHeader {
                channels,
                mass,
                energies,
            },
            position: 0,
        })
    }

    pub fn header(&self) -> ScatteringHeader {
        self.header
    }

    pub fn next_record(&mut self) -> Result<Option<ScatteringRecord>, ScatteringError> {
        let position = self.position;
        let expected_records = self.header.energies.len();
        if position == expected_records {
            return Ok(None);
        }

        let section = format!("scattering record {position} of {expected_records}");
        let index = self
            .reader
            .read_record_start(position)?
            .ok_or_else(|| FormatError::Truncated {
                path: self.reader.path().to_path_buf(),
                section: section.clone(),
            })?;
        self.reader.check_record_index(position, position, index)?;

        let energy = self.reader.read_f64(&section)?;
        let open = self.reader.read_u32(&section)? as usize;
        let channels = self.header.channels;
        if open > channels {
            return Err(self.reader.invalid_header(format!(
                "record {position} declares {open} open channels out of {channels}"
            )));
        }

        let reaction = self.read_block(open, &section)?;
        let re = self.read_block(open, &section)?;
        let im = self.read_block(open, &section)?;
        self.position += 1;

        let scattering = (open > 0).then_some(ScatteringMatrix { re, im });

        Ok(Some(ScatteringRecord {
            index: index as usize,
            energy,
            open_count: open,
            reaction,
            scattering,
        }))
    }

    fn read_block(&mut self, open: usize, section: &str) -> Result<Mat<f64>, ScatteringError> {
        let channels = self.header.channels;
        let mut padded = Mat::zeros(channels, channels);
        self.reader.read_matrix(padded.as_mut(), section)?;

        Ok(padded.as_ref().submatrix(0, 0, open, open).to_owned())
    }
}

impl Iterator for ScatteringFileReader {
    type Item = Result<ScatteringRecord, ScatteringError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
