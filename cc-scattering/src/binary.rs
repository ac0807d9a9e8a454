pub mod basis_file;
pub mod potential_file;
pub mod ratio_file;
pub mod scattering_file;

use std::{
    fs::File,
    io::{BufReader, BufWriter, ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

use faer::{MatMut, MatRef};
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::{
    error::{FormatError, ScatteringError},
    grid::GridRange,
};

pub const FORMAT_VERSION: u8 = 1;

pub const POTENTIAL_MAGIC: &[u8; 4] = b"CCPT";
pub const BASIS_MAGIC: &[u8; 4] = b"CCBS";
pub const RATIO_MAGIC: &[u8; 4] = b"CCRT";
pub const SCATTERING_MAGIC: &[u8; 4] = b"CCSM";

/// Bytes of one square `f64` matrix of `channels` rows.
pub(crate) fn matrix_bytes(channels: u64) -> Option<u64> {
    channels.checked_mul(channels)?.checked_mul(8)
}

/// Little endian reader that names its file in every error.
pub(crate) struct BinaryReader {
    path: PathBuf,
    reader: BufReader<File>,
    len: u64,
}

impl BinaryReader {
    pub(crate) fn open(path: &Path) -> Result<Self, ScatteringError> {
        let file = File::open(path).map_err(|e| ScatteringError::io(path, e))?;
        let len = file
            .metadata()
            .map_err(|e| ScatteringError::io(path, e))?
            .len();

        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            len,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Checks the format tag and version before anything else is read.
    pub(crate) fn check_preamble(&mut self, magic: &[u8; 4]) -> Result<(), ScatteringError> {
        let actual = self.read_bytes::<4>("format tag")?;
        if &actual != magic {
            return Err(FormatError::BadMagic {
                path: self.path.clone(),
                expected: String::from_utf8_lossy(magic).into_owned(),
                actual: String::from_utf8_lossy(&actual).into_owned(),
            }
            .into());
        }

        let [version] = self.read_bytes::<1>("format version")?;
        if version != FORMAT_VERSION {
            return Err(FormatError::BadVersion {
                path: self.path.clone(),
                expected: FORMAT_VERSION,
                actual: version,
            }
            .into());
        }

        Ok(())
    }

    fn read_bytes<const N: usize>(&mut self, section: &str) -> Result<[u8; N], ScatteringError> {
        let mut bytes = [0; N];
        self.reader
            .read_exact(&mut bytes)
            .map_err(|e| self.read_error(e, section))?;

        Ok(bytes)
    }

    fn read_error(&self, error: std::io::Error, section: &str) -> ScatteringError {
        if error.kind() == ErrorKind::UnexpectedEof {
            FormatError::Truncated {
                path: self.path.clone(),
                section: section.to_string(),
            }
            .into()
        } else {
            ScatteringError::io(&self.path, error)
        }
    }

    pub(crate) fn read_u32(&mut self, section: &str) -> Result<u32, ScatteringError> {
        Ok(u32::from_le_bytes(self.read_bytes(section)?))
    }

    pub(crate) fn read_i32(&mut self, section: &str) -> Result<i32, ScatteringError> {
        Ok(i32::from_le_bytes(self.read_bytes(section)?))
    }

    pub(crate) fn read_f64(&mut self, section: &str) -> Result<f64, ScatteringError> {
        Ok(f64::from_le_bytes(self.read_bytes(section)?))
    }

    pub(crate) fn read_range(&mut self, section: &str) -> Result<GridRange, ScatteringError> {
        Ok(GridRange {
            min: self.read_f64(section)?,
            max: self.read_f64(section)?,
            step: self.read_f64(section)?,
        })
    }

    /// Reads a square row-major matrix into `out`.
    pub(crate) fn read_matrix(
        &mut self,
        mut out: MatMut<f64>,
        section: &str,
    ) -> Result<(), ScatteringError> {
        for i in 0..out.nrows() {
            for j in 0..out.ncols() {
                out[(i, j)] = self.read_f64(section)?;
            }
        }

        Ok(())
    }

    /// Reads the index opening the record at `position`,
    /// `None` on a clean end of file.
    pub(crate) fn read_record_start(
        &mut self,
        position: usize,
    ) -> Result<Option<u32>, ScatteringError> {
        let mut bytes = [0; 4];
        let mut filled = 0;
        while filled < bytes.len() {
            match self.reader.read(&mut bytes[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(FormatError::Truncated {
                        path: self.path.clone(),
                        section: format!("record {position}"),
                    }
                    .into());
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(ScatteringError::io(&self.path, e)),
            }
        }

        Ok(Some(u32::from_le_bytes(bytes)))
    }

    pub(crate) fn check_record_index(
        &self,
        position: usize,
        expected: usize,
        actual: u32,
    ) -> Result<(), ScatteringError> {
        if actual as usize != expected {
            return Err(FormatError::RecordIndex {
                path: self.path.clone(),
                position,
                expected,
                actual: actual as usize,
            }
            .into());
        }

        Ok(())
    }

    pub(crate) fn invalid_header(&self, reason: impl Into<String>) -> ScatteringError {
        FormatError::InvalidHeader {
            path: self.path.clone(),
            reason: reason.into(),
        }
        .into()
    }

    /// Rejects a channel count whose smallest record, `record_bytes` long,
    /// cannot fit in the file.
    pub(crate) fn check_channels(
        &self,
        channels: u32,
        record_bytes: impl FnOnce(u64) -> Option<u64>,
    ) -> Result<usize, ScatteringError> {
        if channels == 0 {
            return Err(self.invalid_header("channel count is zero"));
        }
        if !record_bytes(channels as u64).is_some_and(|bytes| bytes <= self.len) {
            return Err(self.invalid_header(format!(
                "channel count {channels} does not fit in a file of {} bytes",
                self.len
            )));
        }

        Ok(channels as usize)
    }

    pub(crate) fn check_range(&self, range: &GridRange, what: &'static str) -> Result<(), ScatteringError> {
        range
            .validate(what)
            .map_err(|e| self.invalid_header(e.to_string()))
    }
}

/// Little endian writer staged in a temporary file next to `path`.
///
/// The file only appears at `path` once [`BinaryWriter::finish`] succeeds,
/// a writer dropped before that leaves nothing behind.
pub(crate) struct BinaryWriter {
    path: PathBuf,
    writer: Option<BufWriter<NamedTempFile>>,
}

impl BinaryWriter {
    pub(crate) fn create(path: &Path, magic: &[u8; 4]) -> Result<Self, ScatteringError> {
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let file = tempfile::Builder::new()
            .prefix(".ccprop-")
            .suffix(".part")
            .tempfile_in(directory)
            .map_err(|e| ScatteringError::io(path, e))?;

        let mut writer = Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
        };
        writer.write_bytes(magic)?;
        writer.write_bytes(&[FORMAT_VERSION])?;

        Ok(writer)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ScatteringError> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            ScatteringError::io(&self.path, std::io::Error::other("write after finish"))
        })?;

        writer
            .write_all(bytes)
            .map_err(|e| ScatteringError::io(&self.path, e))
    }

    pub(crate) fn write_u32(&mut self, value: u32) -> Result<(), ScatteringError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub(crate) fn write_i32(&mut self, value: i32) -> Result<(), ScatteringError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub(crate) fn write_f64(&mut self, value: f64) -> Result<(), ScatteringError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub(crate) fn write_range(&mut self, range: &GridRange) -> Result<(), ScatteringError> {
        self.write_f64(range.min)?;
        self.write_f64(range.max)?;
        self.write_f64(range.step)
    }

    pub(crate) fn write_matrix(&mut self, matrix: MatRef<f64>) -> Result<(), ScatteringError> {
        for i in 0..matrix.nrows() {
            for j in 0..matrix.ncols() {
                self.write_f64(matrix[(i, j)])?;
            }
        }

        Ok(())
    }

    pub(crate) fn write_zeros(&mut self, count: usize) -> Result<(), ScatteringError> {
        for _ in 0..count {
            self.write_f64(0.)?;
        }

        Ok(())
    }

    /// Flushes the staged file and moves it to its final path.
    pub(crate) fn finish(&mut self) -> Result<(), ScatteringError> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };

        let file = writer
            .into_inner()
            .map_err(|e| ScatteringError::io(&self.path, e.into_error()))?;
        file.persist(&self.path)
            .map_err(|e| ScatteringError::io(&self.path, e.error))?;

        Ok(())
    }
}

/// Header of any of the binary kinds, as reported by `inspect`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileHeader {
    Potential(potential_file::PotentialHeader),
    Basis(basis_file::BasisHeader),
    Ratio(ratio_file::RatioHeader),
    Scattering(scattering_file::ScatteringHeader),
}

/// Reads the header of a binary file of unknown kind.
pub fn inspect(path: impl AsRef<Path>) -> Result<FileHeader, ScatteringError> {
    let path = path.as_ref();
    let mut reader = BinaryReader::open(path)?;
    let magic = reader.read_bytes::<4>("format tag")?;

    let header = match &magic {
        POTENTIAL_MAGIC => FileHeader::Potential(potential_file::PotentialFileReader::open(path)?.header()),
        BASIS_MAGIC => FileHeader::Basis(basis_file::read_basis_header(path)?),
        RATIO_MAGIC => FileHeader::Ratio(ratio_file::RatioFileReader::open(path)?.header()),
        SCATTERING_MAGIC => {
            FileHeader::Scattering(scattering_file::ScatteringFileReader::open(path)?.header())
        }
        _ => {
            return Err(FormatError::BadMagic {
                path: path.to_path_buf(),
                expected: "one of CCPT, CCBS, CCRT, CCSM".to_string(),
                actual: String::from_utf8_lossy(&magic).into_owned(),
            }
            .into());
        }
    };

    Ok(header)
}
