use tracing::info;

use certel_core::Timestamp;

/// Windowed difficulty retargeting.
///
/// Every `window` blocks the wall time spanned by the window is compared to
/// `target_block_time * window`: finishing in under half the expected time
/// raises `bits` by one, taking more than double lowers it by one, anything
/// in between holds. The result is clamped to `[min_bits, max_bits]`.
#[derive(Clone, Debug)]
pub struct DifficultySchedule {
    pub window: u64,
    pub target_block_time: Timestamp,
    pub min_bits: u32,
    pub max_bits: u32,
}

impl DifficultySchedule {
    pub fn new(window: u64, target_block_time: Timestamp, min_bits: u32, max_bits: u32) -> Self {
        Self {
            window,
            target_block_time,
            min_bits,
            max_bits,
        }
    }

    /// Heights at which a retarget fires (every `window` blocks, never at 0).
    pub fn is_boundary(&self, height: u64) -> bool {
        height > 0 && self.window > 0 && height % self.window == 0
    }

    /// New `bits` from the timestamps of the first and last block in the
    /// closed window.
    pub fn retarget(
        &self,
        current_bits: u32,
        window_start: Timestamp,
        window_end: Timestamp,
    ) -> u32 {
        let actual = (window_end - window_start).max(0);
        let expected = self.target_block_time * self.window as i64;

        let next = if actual * 2 < expected {
            current_bits.saturating_add(1)
        } else if actual > expected * 2 {
            current_bits.saturating_sub(1)
        } else {
            current_bits
        };
        let next = next.clamp(self.min_bits, self.max_bits);

        if next != current_bits {
            info!(from = current_bits, to = next, actual, expected, "difficulty retarget");
        }
        next
    }
}
