//! Trigger configuration and its encoding into the four match registers

use crate::{
    core::{
        ATOMIC_MASK,
        ATOMIC_SAMPLES,
        MAX_CHANNELS,
        MAX_TRIG_PERCENT,
        NUM_TRIGGER_STAGES,
        STREAM_TRIG_PERCENT,
    },
    error::Error,
};
use tracing::debug;

/// Condition a single channel must meet in one trigger stage
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Match {
    /// Don't care
    #[default]
    X,
    Zero,
    One,
    Rise,
    Fall,
    /// Rising or falling edge
    Either,
}

impl TryFrom<char> for Match {
    type Error = Error;

    fn try_from(value: char) -> Result<Self, Self::Error> {
        Ok(match value {
            'X' | 'x' => Self::X,
            '0' => Self::Zero,
            '1' => Self::One,
            'R' | 'r' => Self::Rise,
            'F' | 'f' => Self::Fall,
            'C' | 'c' => Self::Either,
            c => return Err(Error::unsupported(format!("trigger symbol {c:?}"))),
        })
    }
}

/// Index of the stage the hardware's simple trigger is taken from
pub const SIMPLE_STAGE: usize = NUM_TRIGGER_STAGES;

/// Per-stage, per-channel trigger conditions and the requested position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSpec {
    /// Position of the trigger within the capture, in percent
    pub percent: u8,
    stages: [[Match; MAX_CHANNELS]; NUM_TRIGGER_STAGES + 1],
}

impl Default for TriggerSpec {
    fn default() -> Self {
        Self {
            percent: 0,
            stages: [[Match::X; MAX_CHANNELS]; NUM_TRIGGER_STAGES + 1],
        }
    }
}

impl TriggerSpec {
    /// Set the conditions of `stage` from a pattern like `"X1RF"`, channel 0 first. Channels past
    /// the end of the pattern are left as they were.
    /// # Errors
    /// Returns an error on an unknown symbol, a pattern wider than the instrument or a bad stage
    pub fn set_stage(&mut self, stage: usize, pattern: &str) -> Result<(), Error> {
        let row = self
            .stages
            .get_mut(stage)
            .ok_or_else(|| Error::unsupported(format!("trigger stage {stage}")))?;
        if pattern.chars().count() > MAX_CHANNELS {
            return Err(Error::unsupported("trigger pattern wider than 32 channels"));
        }
        let parsed = pattern
            .chars()
            .map(Match::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        row[..parsed.len()].copy_from_slice(&parsed);
        Ok(())
    }

    /// # Errors
    /// Returns an error if the stage or channel is out of range
    pub fn set(&mut self, stage: usize, channel: usize, cond: Match) -> Result<(), Error> {
        let slot = self
            .stages
            .get_mut(stage)
            .and_then(|row| row.get_mut(channel))
            .ok_or_else(|| Error::unsupported(format!("trigger stage {stage} channel {channel}")))?;
        *slot = cond;
        Ok(())
    }

    #[must_use]
    pub fn get(&self, stage: usize, channel: usize) -> Option<Match> {
        self.stages.get(stage)?.get(channel).copied()
    }
}

/// The four trigger match registers
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct TriggerMasks {
    pub zero: u32,
    pub one: u32,
    pub rise: u32,
    pub fall: u32,
}

impl TriggerMasks {
    /// Whether any condition is set at all
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.zero | self.one | self.rise | self.fall != 0
    }
}

/// Build the match masks from the simple stage, ignoring channels outside `ch_en`
#[must_use]
pub fn encode(spec: &TriggerSpec, ch_en: u32) -> TriggerMasks {
    let mut masks = TriggerMasks::default();
    for (i, cond) in spec.stages[SIMPLE_STAGE].iter().enumerate() {
        let bit = 1u32 << i;
        if ch_en & bit == 0 {
            continue;
        }
        match cond {
            Match::X => (),
            Match::Zero => masks.zero |= bit,
            Match::One => masks.one |= bit,
            Match::Rise => masks.rise |= bit,
            Match::Fall => masks.fall |= bit,
            Match::Either => {
                masks.rise |= bit;
                masks.fall |= bit;
            }
        }
    }
    debug!(
        "trigger masks zero {:#010x} one {:#010x} rise {:#010x} fall {:#010x}",
        masks.zero, masks.one, masks.rise, masks.fall
    );
    masks
}

/// Samples each enabled channel can hold in the onboard buffer
#[must_use]
pub fn channel_depth(hw_depth: u64, ch_num: u32) -> u64 {
    (hw_depth / u64::from(ch_num.max(1))) & ATOMIC_MASK
}

/// Sample index the hardware should place the trigger at
#[must_use]
pub fn position(percent: u8, limit_samples: u64, channel_depth: u64, stream: bool) -> u64 {
    let requested =
        u64::try_from(u128::from(limit_samples) * u128::from(percent.min(100)) / 100)
            .unwrap_or(u64::MAX);
    let max_percent = if stream {
        STREAM_TRIG_PERCENT
    } else {
        MAX_TRIG_PERCENT
    };
    requested
        .min(channel_depth / 100 * max_percent + channel_depth % 100 * max_percent / 100)
        .max(ATOMIC_SAMPLES)
}
