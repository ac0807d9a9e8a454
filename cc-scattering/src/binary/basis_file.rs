use std::path::Path;

use serde::Serialize;

use crate::{
    binary::{BASIS_MAGIC, BinaryReader, BinaryWriter},
    channels::{Channel, ChannelBasis},
    error::{FormatError, ScatteringError},
};

/// Four quantum numbers, parity, index and threshold.
const CHANNEL_RECORD_BYTES: u64 = 6 * 4 + 8;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BasisHeader {
    pub channels: usize,
}

pub fn write_basis(path: impl AsRef<Path>, basis: &ChannelBasis) -> Result<(), ScatteringError> {
    let mut writer = BinaryWriter::create(path.as_ref(), BASIS_MAGIC)?;
    writer.write_u32(basis.len() as u32)?;

    for channel in basis.channels() {
        writer.write_u32(channel.total_j)?;
        writer.write_u32(channel.j)?;
        writer.write_u32(channel.v)?;
        writer.write_u32(channel.l)?;
        writer.write_i32(channel.parity)?;
        writer.write_u32(channel.index)?;
        writer.write_f64(channel.threshold)?;
    }

    writer.finish()
}

fn open_basis(path: &Path) -> Result<(BinaryReader, BasisHeader), ScatteringError> {
    let mut reader = BinaryReader::open(path)?;
    reader.check_preamble(BASIS_MAGIC)?;

    let channels = reader.read_u32("header")?;
    let channels = reader.check_channels(channels, |n| n.checked_mul(CHANNEL_RECORD_BYTES))?;

    Ok((reader, BasisHeader { channels }))
}

pub fn read_basis_header(path: impl AsRef<Path>) -> Result<BasisHeader, ScatteringError> {
    open_basis(path.as_ref()).map(|(_, header)| header)
}

pub fn read_basis(path: impl AsRef<Path>) -> Result<ChannelBasis, ScatteringError> {
    let (mut reader, header) = open_basis(path.as_ref())?;

    let mut channels = Vec::with_capacity(header.channels);
    for position in 0..header.channels {
        let section = format!("channel record {position}");
        let total_j = reader
            .read_record_start(position)?
            .ok_or_else(|| FormatError::Truncated {
                path: reader.path().to_path_buf(),
                section: section.clone(),
            })?;

        channels.push(Channel {
            total_j,
            j: reader.read_u32(&section)?,
            v: reader.read_u32(&section)?,
            l: reader.read_u32(&section)?,
            parity: reader.read_i32(&section)?,
            index: reader.read_u32(&section)?,
            threshold: reader.read_f64(&section)?,
        });
    }

    Ok(ChannelBasis::new(channels))
}

#[cfg(test)]
mod test {
    use crate::{
        binary::{FORMAT_VERSION, FileHeader, inspect},
        channels::{Channel, ChannelBasis},
        error::{FormatError, ScatteringError},
    };

    use super::{read_basis, write_basis};

    #[test]
    fn test_basis_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("basis.bin");

        let basis = ChannelBasis::new(vec![
            Channel {
                total_j: 2,
                j: 0,
                v: 0,
                l: 2,
                parity: 1,
                index: 0,
                threshold: 0.,
            },
            Channel {
                total_j: 2,
                j: 2,
                v: 1,
                l: 1,
                parity: -1,
                index: 1,
                threshold: 3.5e-4,
            },
        ]);

        write_basis(&path, &basis).unwrap();
        assert_eq!(read_basis(&path).unwrap(), basis);
        assert_eq!(
            inspect(&path).unwrap(),
            FileHeader::Basis(super::BasisHeader { channels: 2 })
        );

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        assert!(matches!(
            read_basis(&path),
            Err(ScatteringError::Format(FormatError::Truncated { .. }))
        ));
    }

    #[test]
    fn test_oversized_channel_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("basis.bin");

        let mut bytes = b"CCBS".to_vec();
        bytes.push(FORMAT_VERSION);
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            read_basis(&path),
            Err(ScatteringError::Format(FormatError::InvalidHeader { .. }))
        ));
    }
}
