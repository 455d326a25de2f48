use std::collections::HashMap;

use crate::error::{NsxError, Result};
use crate::types::*;

/// Lookup from electrode number to channel id.
///
/// The mapping itself (array map files and the like) lives outside this
/// crate; anything that can answer the question can be passed in.
pub trait ElectrodeMap {
    fn channel_for(&self, electrode: u16) -> Option<u16>;
}

impl ElectrodeMap for HashMap<u16, u16> {
    fn channel_for(&self, electrode: u16) -> Option<u16> {
        self.get(&electrode).copied()
    }
}

impl<F> ElectrodeMap for F
where
    F: Fn(u16) -> Option<u16>,
{
    fn channel_for(&self, electrode: u16) -> Option<u16> {
        self(electrode)
    }
}

/// Rows to decode and the contiguous on-disk span that holds them.
///
/// Every packet is read from `first_row` through `last_row` into a span-sized
/// buffer; rows inside that span that were not requested are dropped before
/// they reach the output. Asking for two channels far apart therefore costs
/// as much I/O as asking for every channel between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPlan {
    /// Requested rows in requested order
    pub rows: Vec<usize>,
    pub first_row: usize,
    pub last_row: usize,
}

impl ChannelPlan {
    /// Number of channels read per packet.
    pub fn span(&self) -> usize {
        if self.rows.is_empty() {
            0
        } else {
            self.last_row - self.first_row + 1
        }
    }

    /// Requested rows relative to `first_row`.
    pub fn relative_rows(&self) -> Vec<usize> {
        self.rows.iter().map(|r| r - self.first_row).collect()
    }

    /// True when the span is exactly the requested rows in on-disk order.
    pub fn is_contiguous(&self) -> bool {
        self.rows.len() == self.span() && self.rows.windows(2).all(|w| w[1] == w[0] + 1)
    }
}

/// Resolves a channel selection against the channels of a file.
pub fn resolve_channels(
    channels: &[ChannelInfo],
    selection: &ChannelSelection,
    electrode_map: Option<&dyn ElectrodeMap>,
) -> Result<ChannelPlan> {
    let rows = match selection {
        ChannelSelection::All => (0..channels.len()).collect(),
        ChannelSelection::Rows(rows) => {
            if let Some(row) = rows.iter().find(|&&r| r >= channels.len()) {
                return Err(NsxError::ChannelOutOfRange(format!("row {}", row)));
            }
            rows.clone()
        }
        ChannelSelection::Ids(ids) => ids
            .iter()
            .map(|&id| row_of(channels, id).ok_or_else(|| out_of_range("id", id)))
            .collect::<Result<Vec<usize>>>()?,
        ChannelSelection::Electrodes(electrodes) => {
            let map = electrode_map.ok_or_else(|| {
                NsxError::InvalidOption(
                    "electrode selection needs an electrode map".to_string(),
                )
            })?;
            electrodes
                .iter()
                .map(|&electrode| {
                    map.channel_for(electrode)
                        .and_then(|id| row_of(channels, id))
                        .ok_or_else(|| out_of_range("electrode", electrode))
                })
                .collect::<Result<Vec<usize>>>()?
        }
    };

    if rows.is_empty() && !channels.is_empty() {
        return Err(NsxError::InvalidOption("no channels selected".to_string()));
    }

    let first_row = rows.iter().copied().min().unwrap_or(0);
    let last_row = rows.iter().copied().max().unwrap_or(0);
    let plan = ChannelPlan {
        rows,
        first_row,
        last_row,
    };

    if plan.span() > plan.rows.len() {
        log::debug!(
            "reading {} channels per packet to return {}",
            plan.span(),
            plan.rows.len()
        );
    }

    Ok(plan)
}

fn row_of(channels: &[ChannelInfo], id: u16) -> Option<usize> {
    channels.iter().position(|c| c.id == id)
}

fn out_of_range(kind: &str, value: u16) -> NsxError {
    NsxError::ChannelOutOfRange(format!("{} {}", kind, value))
}
