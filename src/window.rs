use crate::error::{NsxError, Result};
use crate::types::*;

/// Converts a window request into a 1-based inclusive sample range and
/// splits it over the segments it touches.
///
/// Sample indices run across all segments as if they were concatenated.
/// Segments outside the range do not appear in the result.
pub fn resolve_window(
    request: &WindowRequest,
    segments: &[Segment],
    sampling_frequency: f64,
    truncate_to_file_end: bool,
    warnings: &mut Vec<Warning>,
    quiet: bool,
) -> Result<TimeWindow> {
    let available: u64 = segments.iter().map(|s| s.sample_count).sum();

    let (start, end) = match request {
        WindowRequest::All => {
            return Ok(distribute(1, available, segments));
        }
        WindowRequest::Samples { start, end } => (*start, *end),
        WindowRequest::Time { start, end, unit } => {
            // Time t falls in sample round(t * fs) + 1, so [0, 1) s at 1 kHz is 1..=1000.
            let ticks = |value: f64| (value * sampling_frequency * unit.scale()).round() as i64;
            let first = ticks(*start) + 1;
            if start > end {
                return Err(NsxError::InvalidRange {
                    start: first,
                    end: ticks(*end),
                });
            }
            (first, ticks(*end).max(first))
        }
    };

    if start > end {
        return Err(NsxError::InvalidRange { start, end });
    }

    let start = if start < 1 {
        emit(warnings, Warning::StartClamped { requested: start }, quiet);
        1
    } else {
        start as u64
    };
    if end < start as i64 {
        return Err(NsxError::InvalidRange {
            start: start as i64,
            end,
        });
    }
    let mut end = end as u64;

    if start > available {
        return Err(NsxError::RangeExceedsFile {
            requested: start,
            available,
        });
    }
    if end > available {
        if !truncate_to_file_end {
            return Err(NsxError::RangeExceedsFile {
                requested: end,
                available,
            });
        }
        emit(
            warnings,
            Warning::RangeTruncated {
                requested: end,
                available,
            },
            quiet,
        );
        end = available;
    }

    Ok(distribute(start, end, segments))
}

fn distribute(start: u64, end: u64, segments: &[Segment]) -> TimeWindow {
    let mut parts = Vec::new();
    let mut first = 1u64;

    for (index, segment) in segments.iter().enumerate() {
        let last = first + segment.sample_count - 1;
        let lo = start.max(first);
        let hi = end.min(last);
        if segment.sample_count > 0 && lo <= hi {
            parts.push(SegmentWindow {
                segment: index,
                start_offset: lo - first,
                count: hi - lo + 1,
            });
        }
        first += segment.sample_count;
    }

    TimeWindow { start, end, parts }
}
