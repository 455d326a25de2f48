//! Clock-drift correction for high-resolution recordings.
//!
//! When the per-sample timestamps of a segment span more (or less) time than
//! its sample count implies at the nominal rate, samples are duplicated (or
//! dropped) at evenly spaced points so the decoded length matches the
//! elapsed time. This is a sample-level approximation, not resampling.

use ndarray::{Array1, Axis};

use crate::types::*;

/// Rate implied by a segment's timestamps, relative to the nominal rate.
pub fn observed_rate(segment: &Segment, time_resolution: u32, sampling_frequency: f64) -> f64 {
    if segment.sample_count == 0 || time_resolution == 0 {
        return 1.0;
    }
    let ticks_per_sample = time_resolution as f64 / sampling_frequency;
    segment.duration_ticks(ticks_per_sample) / segment.sample_count as f64
        / time_resolution as f64
        * sampling_frequency
}

/// Samples to add (positive) or remove (negative) from a buffer of `len`.
pub fn samples_to_adjust(rate: f64, len: usize) -> i64 {
    ((rate - 1.0) * len as f64).round() as i64
}

/// Source index of every output sample after adjusting a buffer of `len` by `adjust`.
///
/// The buffer is cut into `|adjust| + 1` sub-blocks of `round(len / (|adjust| + 1))`
/// samples. At each inner boundary the last sample of the sub-block before it
/// is duplicated (insertion) or dropped (removal). Boundaries at or past the
/// buffer edges are skipped.
pub fn adjustment_index_map(len: usize, adjust: i64) -> Vec<usize> {
    let count = adjust.unsigned_abs() as usize;
    if count == 0 || len == 0 {
        return (0..len).collect();
    }
    let gap = (len as f64 / (count + 1) as f64).round() as usize;
    if gap == 0 {
        return (0..len).collect();
    }

    let marked: Vec<usize> = (1..=count)
        .map(|k| k * gap)
        .filter(|&b| b > 0 && b < len)
        .map(|b| b - 1)
        .collect();

    let mut map = Vec::with_capacity((len as i64 + adjust).max(0) as usize);
    let mut next = marked.iter().peekable();
    for i in 0..len {
        let at_mark = next.peek().is_some_and(|&&m| m == i);
        if at_mark {
            next.next();
            if adjust > 0 {
                map.push(i);
                map.push(i);
            }
        } else {
            map.push(i);
        }
    }
    map
}

/// Corrects one decoded block in place and updates its segment.
///
/// Returns the applied adjustment, or `None` when the block already matches
/// its timestamps.
pub fn correct_block(
    block: &mut DecodedBlock,
    segment: &mut Segment,
    header: &FormatHeader,
    skip_factor: usize,
) -> Option<i64> {
    let len = block.samples.num_samples();
    let rate = observed_rate(segment, header.time_resolution(), header.sampling_frequency());
    let adjust = samples_to_adjust(rate, len);
    if adjust == 0 {
        return None;
    }

    let map = adjustment_index_map(len, adjust);
    let applied = map.len() as i64 - len as i64;
    if applied == 0 {
        return None;
    }

    block.samples = match &block.samples {
        SampleMatrix::Int16(a) => SampleMatrix::Int16(a.select(Axis(1), &map)),
        SampleMatrix::Float64(a) => SampleMatrix::Float64(a.select(Axis(1), &map)),
    };
    if let Some(stamps) = block.timestamps.as_ref() {
        block.timestamps = Some(map.iter().map(|&i| stamps[i]).collect::<Array1<u64>>());
    }

    let corrected = segment.sample_count as i64 + applied * skip_factor.max(1) as i64;
    segment.sample_count = corrected.max(0) as u64;
    segment.last_timestamp = segment.timestamp
        + (segment.sample_count.saturating_sub(1) as f64 * header.ticks_per_sample()).round()
            as u64;

    log::debug!(
        "segment {}: observed rate {:.6}, adjusted by {} samples",
        block.segment,
        rate,
        applied
    );
    Some(applied)
}
