//! FIFO pattern geometry and demultiplexing.
//!
//! The hardware packs samples from every FIFO-batched channel into one
//! repeating pattern, tagged only by position. The engine here owns the
//! per-channel walk state (samples-in-pattern, inter-sample period,
//! timestamp cursor, transient discard budget) and fans decoded samples out
//! to the subscribed endpoints. Timestamps are reconstructed backward from
//! the single host-observed read timestamp; per-sample latch times are not
//! available from the hardware, so the error is bounded by one pattern
//! period.

use log::trace;

use crate::registers::{FifoDecimation, Odr, FIFO_ELEMENT_LEN};
use crate::types::{SampleSink, SensorId};

pub const FIFO_CHANNEL_COUNT: usize = 4;

/// Hardware packing priority of the interleaved channels, and the wakeup
/// endpoint sharing each physical channel's samples.
pub(crate) const CHANNEL_ENDPOINTS: [(SensorId, Option<SensorId>); FIFO_CHANNEL_COUNT] = [
    (SensorId::Accel, Some(SensorId::AccelWk)),
    (SensorId::Gyro, Some(SensorId::GyroWk)),
    (SensorId::Ext0, None),
    (SensorId::Ext1, None),
];

/// Physical FIFO channel an endpoint's samples travel through, if any.
pub fn channel_index(sensor: SensorId) -> Option<usize> {
    match sensor {
        SensorId::Accel | SensorId::AccelWk => Some(0),
        SensorId::Gyro | SensorId::GyroWk => Some(1),
        SensorId::Ext0 => Some(2),
        SensorId::Ext1 => Some(3),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Enabled rates are not integer multiples of the slowest enabled rate.
    OdrNotMultiple,
    /// Computed pattern geometry disagrees with the hardware decimators.
    PatternMismatch { computed: u16, reported: u16 },
}

/// Samples of each channel inside one repeating pattern: the ratio of the
/// channel's rate to the slowest enabled rate. Every enabled rate must
/// divide evenly; the LSM6DS3 rate ladder always does.
pub fn samples_in_pattern(
    odrs: &[Option<Odr>; FIFO_CHANNEL_COUNT],
) -> Result<[u8; FIFO_CHANNEL_COUNT], ConfigError> {
    let mut min_hz = 0u32;
    for odr in odrs.iter().flatten() {
        let hz = odr.hz();
        if hz == 0 {
            continue;
        }
        if min_hz == 0 || hz < min_hz {
            min_hz = hz;
        }
    }

    let mut sips = [0u8; FIFO_CHANNEL_COUNT];
    if min_hz == 0 {
        return Ok(sips);
    }
    for (i, odr) in odrs.iter().enumerate() {
        if let Some(odr) = odr {
            let hz = odr.hz();
            if hz == 0 {
                continue;
            }
            if hz % min_hz != 0 {
                return Err(ConfigError::OdrNotMultiple);
            }
            sips[i] = (hz / min_hz) as u8;
        }
    }
    Ok(sips)
}

/// Per-channel FIFO decimation against the fastest enabled rate.
pub fn decimations(
    odrs: &[Option<Odr>; FIFO_CHANNEL_COUNT],
) -> Result<[FifoDecimation; FIFO_CHANNEL_COUNT], ConfigError> {
    let mut max_hz = 0u32;
    for odr in odrs.iter().flatten() {
        if odr.hz() > max_hz {
            max_hz = odr.hz();
        }
    }

    let mut decs = [FifoDecimation::NotInFifo; FIFO_CHANNEL_COUNT];
    if max_hz == 0 {
        return Ok(decs);
    }
    for (i, odr) in odrs.iter().enumerate() {
        if let Some(odr) = odr {
            let hz = odr.hz();
            if hz == 0 {
                continue;
            }
            if max_hz % hz != 0 {
                return Err(ConfigError::OdrNotMultiple);
            }
            decs[i] =
                FifoDecimation::from_factor(max_hz / hz).ok_or(ConfigError::OdrNotMultiple)?;
        }
    }
    Ok(decs)
}

/// Inverse of [`decimations`]: the pattern the hardware will emit for a set
/// of programmed decimators. Used to cross-check the registers actually in
/// effect against the computed geometry.
pub fn pattern_from_decimation(
    decs: &[FifoDecimation; FIFO_CHANNEL_COUNT],
) -> [u8; FIFO_CHANNEL_COUNT] {
    let mut max_factor = 0u32;
    for dec in decs.iter() {
        if dec.factor() > max_factor {
            max_factor = dec.factor();
        }
    }

    let mut sips = [0u8; FIFO_CHANNEL_COUNT];
    if max_factor == 0 {
        return sips;
    }
    for (i, dec) in decs.iter().enumerate() {
        let factor = dec.factor();
        if factor != 0 {
            sips[i] = (max_factor / factor) as u8;
        }
    }
    sips
}

pub fn bytes_in_pattern(sips: &[u8; FIFO_CHANNEL_COUNT]) -> u16 {
    sips.iter().map(|&s| s as u16).sum::<u16>() * FIFO_ELEMENT_LEN as u16
}

#[derive(Debug, Default, Clone, Copy)]
struct ChannelState {
    samples_in_pattern: u8,
    delta_ns: i64,
    timestamp: i64,
    samples_to_discard: u16,
}

/// Demultiplexer state for one device instance. Mutated only inside a
/// single serialized read+decode pass (`&mut self`).
pub struct FifoEngine {
    channels: [ChannelState; FIFO_CHANNEL_COUNT],
    pattern_en: u16,
    bytes_in_pattern: u16,
    last_timestamp: i64,
}

impl FifoEngine {
    pub fn new() -> Self {
        Self {
            channels: [ChannelState::default(); FIFO_CHANNEL_COUNT],
            pattern_en: 0,
            bytes_in_pattern: 0,
            last_timestamp: 0,
        }
    }

    /// Install freshly computed geometry. Discard budgets and cursors are
    /// kept; cursors are re-anchored on the next length-checked read.
    pub fn set_pattern(
        &mut self,
        sips: [u8; FIFO_CHANNEL_COUNT],
        deltas: [i64; FIFO_CHANNEL_COUNT],
    ) {
        for (i, ch) in self.channels.iter_mut().enumerate() {
            ch.samples_in_pattern = sips[i];
            ch.delta_ns = deltas[i];
        }
        self.bytes_in_pattern = bytes_in_pattern(&sips);
    }

    pub fn bytes_in_pattern(&self) -> u16 {
        self.bytes_in_pattern
    }

    pub fn set_endpoint_enabled(&mut self, sensor: SensorId, enabled: bool) {
        if enabled {
            self.pattern_en |= sensor.mask();
        } else {
            self.pattern_en &= !sensor.mask();
        }
    }

    pub fn endpoints(&self) -> u16 {
        self.pattern_en
    }

    pub fn set_samples_to_discard(&mut self, sensor: SensorId, count: u16) {
        if let Some(idx) = channel_index(sensor) {
            self.channels[idx].samples_to_discard = count;
        }
    }

    pub fn samples_to_discard(&self, sensor: SensorId) -> u16 {
        channel_index(sensor).map_or(0, |idx| self.channels[idx].samples_to_discard)
    }

    pub fn set_last_timestamp(&mut self, timestamp: i64) {
        self.last_timestamp = timestamp;
    }

    pub fn last_timestamp(&self) -> i64 {
        self.last_timestamp
    }

    pub fn channel_timestamp(&self, sensor: SensorId) -> i64 {
        channel_index(sensor).map_or(0, |idx| self.channels[idx].timestamp)
    }

    /// Walk `data` pattern by pattern and dispatch every sample to the
    /// subscribed endpoints. `rebase` re-anchors each channel's timestamp
    /// cursor from the snapshot timestamp; a continuation pass keeps the
    /// cursors running. Trailing bytes short of a full pattern are never
    /// parsed. An empty buffer is a no-op, not an error.
    pub fn decode<S: SampleSink>(&mut self, data: &[u8], rebase: bool, sink: &mut S) {
        let bip = self.bytes_in_pattern as usize;
        if bip == 0 || data.len() < bip {
            return;
        }
        let pattern_num = (data.len() / bip) as i64;

        if rebase {
            for ch in self.channels.iter_mut() {
                if ch.samples_in_pattern > 0 {
                    ch.timestamp = self.last_timestamp
                        - pattern_num * ch.samples_in_pattern as i64 * ch.delta_ns;
                }
            }
        }

        trace!(
            "decode: len={} patterns={} pattern_en={:#06x}",
            data.len(),
            pattern_num,
            self.pattern_en
        );

        let pattern_en = self.pattern_en;
        let mut offset = 0usize;
        while offset + bip <= data.len() {
            let mut remaining = [0u8; FIFO_CHANNEL_COUNT];
            for (i, ch) in self.channels.iter().enumerate() {
                remaining[i] = ch.samples_in_pattern;
            }

            // One sample per channel per round, in packing priority order,
            // until the pattern is consumed.
            loop {
                let mut progressed = false;
                for idx in 0..FIFO_CHANNEL_COUNT {
                    if remaining[idx] == 0 {
                        continue;
                    }
                    let end = offset + FIFO_ELEMENT_LEN;
                    let Some(bytes) = data.get(offset..end) else {
                        return;
                    };

                    if self.channels[idx].samples_to_discard > 0 {
                        self.channels[idx].samples_to_discard -= 1;
                    } else {
                        let timestamp = self.channels[idx].timestamp;
                        let (plain, wakeup) = CHANNEL_ENDPOINTS[idx];
                        if pattern_en & plain.mask() != 0 {
                            sink.deliver(plain, bytes, timestamp);
                        }
                        if let Some(wk) = wakeup {
                            if pattern_en & wk.mask() != 0 {
                                sink.deliver(wk, bytes, timestamp);
                            }
                        }
                    }

                    // cursor and offset advance whether or not we dispatched
                    self.channels[idx].timestamp += self.channels[idx].delta_ns;
                    offset = end;
                    remaining[idx] -= 1;
                    progressed = true;
                }
                if !progressed {
                    break;
                }
            }
        }
    }
}

impl Default for FifoEngine {
    fn default() -> Self {
        Self::new()
    }
}
