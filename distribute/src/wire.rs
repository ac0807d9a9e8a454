//! Point to point message frames: a little endian `u64` element count
//! followed by that many `u64` or `f64` elements.

use cc_scattering::{
    boundary::ReactionMatrix,
    faer::{Mat, MatRef},
    observables::{outcome::EnergyOutcome, s_matrix::ScatteringMatrix},
};

use crate::error::DistributeError;

/// Coordinator asks a worker for its results.
pub const REQUEST: u64 = 1;

const WORD: usize = 8;

pub fn encode_u64s(values: &[u64]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(WORD * (values.len() + 1));
    frame.extend_from_slice(&(values.len() as u64).to_le_bytes());
    for value in values {
        frame.extend_from_slice(&value.to_le_bytes());
    }

    frame
}

pub fn encode_f64s(values: &[f64]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(WORD * (values.len() + 1));
    frame.extend_from_slice(&(values.len() as u64).to_le_bytes());
    for value in values {
        frame.extend_from_slice(&value.to_le_bytes());
    }

    frame
}

fn elements(frame: &[u8]) -> Result<impl Iterator<Item = [u8; WORD]> + '_, DistributeError> {
    let (count, body) = frame
        .split_first_chunk::<WORD>()
        .ok_or_else(|| DistributeError::frame(format!("{} bytes cannot hold a count", frame.len())))?;
    let count = u64::from_le_bytes(*count);

    let needed = usize::try_from(count)
        .ok()
        .and_then(|count| count.checked_mul(WORD));
    if needed != Some(body.len()) {
        return Err(DistributeError::frame(format!(
            "count {count} does not match the {} bytes the frame carries",
            body.len()
        )));
    }

    Ok(body.chunks_exact(WORD).map(|chunk| {
        let mut bytes = [0; WORD];
        bytes.copy_from_slice(chunk);
        bytes
    }))
}

pub fn decode_u64s(frame: &[u8]) -> Result<Vec<u64>, DistributeError> {
    Ok(elements(frame)?.map(u64::from_le_bytes).collect())
}

pub fn decode_f64s(frame: &[u8]) -> Result<Vec<f64>, DistributeError> {
    Ok(elements(frame)?.map(f64::from_le_bytes).collect())
}

/// Task indices travel shifted by one so that `0` marks a missing task.
pub fn encode_task_index(index: Option<usize>) -> u64 {
    index.map_or(0, |i| i as u64 + 1)
}

pub fn decode_task_index(value: u64) -> Option<usize> {
    value.checked_sub(1).map(|i| i as usize)
}

fn push_matrix(values: &mut Vec<f64>, matrix: MatRef<f64>) {
    for i in 0..matrix.nrows() {
        for j in 0..matrix.ncols() {
            values.push(matrix[(i, j)]);
        }
    }
}

fn take_matrix<'a>(values: &mut impl Iterator<Item = &'a f64>, size: usize) -> Mat<f64> {
    let mut matrix = Mat::zeros(size, size);
    for i in 0..size {
        for j in 0..size {
            matrix[(i, j)] = values.next().copied().unwrap_or(f64::NAN);
        }
    }

    matrix
}

/// Encodes one energy's outcome as an index frame and a value frame.
///
/// Index frame: `[task index + 1, open count, open mask...]`,
/// value frame: `[energy, ratio, K, Re S, Im S]` with the S blocks over open channels only.
pub fn encode_outcome(outcome: &EnergyOutcome) -> (Vec<u8>, Vec<u8>) {
    let reaction = &outcome.reaction;

    let mut indices = Vec::with_capacity(2 + reaction.open_mask.len());
    indices.push(encode_task_index(Some(outcome.index)));
    indices.push(reaction.open_count as u64);
    indices.extend(reaction.open_mask.iter().map(|&open| u64::from(open)));

    let mut values = vec![outcome.energy];
    push_matrix(&mut values, outcome.ratio.as_ref());
    push_matrix(&mut values, reaction.full.as_ref());
    if let Some(s) = &outcome.scattering {
        push_matrix(&mut values, s.re.as_ref());
        push_matrix(&mut values, s.im.as_ref());
    }

    (encode_u64s(&indices), encode_f64s(&values))
}

pub fn decode_outcome(
    index_frame: &[u8],
    value_frame: &[u8],
    channels: usize,
) -> Result<EnergyOutcome, DistributeError> {
    let indices = decode_u64s(index_frame)?;
    if indices.len() != 2 + channels {
        return Err(DistributeError::frame(format!(
            "outcome index frame has {} elements for {channels} channels",
            indices.len()
        )));
    }

    let index = decode_task_index(indices[0])
        .ok_or_else(|| DistributeError::frame("outcome record without a task index"))?;
    let open_count = indices[1] as usize;
    let open_mask: Vec<bool> = indices[2..].iter().map(|&m| m != 0).collect();
    if open_mask.iter().filter(|&&o| o).count() != open_count {
        return Err(DistributeError::frame(format!(
            "task {index}: open mask disagrees with open count {open_count}"
        )));
    }

    let values = decode_f64s(value_frame)?;
    let expected = 1 + 2 * channels * channels + 2 * open_count * open_count;
    let has_scattering = open_count > 0;
    if values.len() != expected {
        return Err(DistributeError::frame(format!(
            "task {index}: value frame has {} elements, expected {expected}",
            values.len()
        )));
    }

    let mut values = values.iter();
    let energy = values.next().copied().unwrap_or(f64::NAN);
    let ratio = take_matrix(&mut values, channels);
    let full = take_matrix(&mut values, channels);
    let scattering = has_scattering.then(|| ScatteringMatrix {
        re: take_matrix(&mut values, open_count),
        im: take_matrix(&mut values, open_count),
    });

    Ok(EnergyOutcome {
        index,
        energy,
        ratio,
        reaction: ReactionMatrix {
            full,
            open_mask,
            open_count,
        },
        scattering,
    })
}
