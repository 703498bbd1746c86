#![cfg_attr(not(test), no_std)]
#![allow(dead_code)]
#![allow(unused_imports)]

pub mod registers;
pub mod configs;
pub mod types;
pub mod fifo;
pub mod steps;

use core::marker::PhantomData;

use embedded_hal::i2c::{I2c, SevenBitAddress};
use log::{debug, error, info, warn};

use registers::*;
pub use crate::types::*;

pub use crate::fifo::{ConfigError, FifoEngine};
pub use crate::steps::{StepCompensator, StepReading};
pub use configs::{
    CONFIG_EMB_FUNCS, CONFIG_INT_NOTIFICATION, CONFIG_RESET, CONFIG_SENSOR_HUB_MAG,
    CONFIG_STREAMING, CONFIG_WAKEUP_LSM6DS3,
};

use crate::fifo::{channel_index, CHANNEL_ENDPOINTS};

/// Trait alias to support both I2c<SevenBitAddress> and I2c without address mode.
pub trait CompatibleI2c<E>: I2c<Error = E> {}
impl<T, E> CompatibleI2c<E> for T where T: I2c<Error = E> {}

pub const DEFAULT_ADDRESS: u8 = 0x6A;

/// Local drain buffer; the watermark is clamped to this.
pub const FIFO_BUFFER_LEN: usize = 2048;

const DEFAULT_WATERMARK_BYTES: u16 = 1024;
const RESET_RETRIES: usize = 50;

// Settle samples eaten after (re)enable; hardware may emit samples latched
// before the configuration took effect.
const ACCEL_STD_DISCARD: u16 = 1;
const GYRO_STD_DISCARD: u16 = 6;

#[derive(Debug)]
pub enum Error<E> {
    I2c(E),
    InvalidDevice,
    ResetTimeout,
    Config(ConfigError),
}

pub struct Lsm6ds3<I2C, E> {
    i2c: I2C,
    address: u8,
    fifo: FifoEngine,
    steps: StepCompensator,
    fifo_buf: [u8; FIFO_BUFFER_LEN],
    fifo_threshold: u16,
    last_read_len: u16,
    watermark: u16,
    odrs: [Odr; fifo::FIFO_CHANNEL_COUNT],
    sensors_enabled: u16,
    reset_steps: bool,
    sign_motion_event_ready: bool,
    _error: PhantomData<E>,
}

impl<I2C, E> Lsm6ds3<I2C, E> {
    pub fn i2c(&mut self) -> &mut I2C {
        &mut self.i2c
    }
}

const EMB_FUNC_MASK: u16 = SensorId::StepCounter.mask()
    | SensorId::StepDetector.mask()
    | SensorId::Tilt.mask()
    | SensorId::SignMotion.mask();

const PEDO_MASK: u16 = SensorId::StepCounter.mask() | SensorId::StepDetector.mask();

impl<I2C, E> Lsm6ds3<I2C, E>
where
    I2C: CompatibleI2c<E>,
    E: core::fmt::Debug,
{
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self {
            i2c,
            address,
            fifo: FifoEngine::new(),
            steps: StepCompensator::new(),
            fifo_buf: [0; FIFO_BUFFER_LEN],
            fifo_threshold: 0,
            last_read_len: 0,
            watermark: DEFAULT_WATERMARK_BYTES,
            odrs: [Odr::Hz26; fifo::FIFO_CHANNEL_COUNT],
            sensors_enabled: 0,
            reset_steps: false,
            sign_motion_event_ready: false,
            _error: PhantomData,
        }
    }

    pub fn default(i2c: I2C) -> Self {
        Self::new(i2c, DEFAULT_ADDRESS)
    }

    pub fn destroy(self) -> I2C {
        self.i2c
    }

    pub fn who_am_i(&mut self) -> Result<u8, Error<E>> {
        self.read_reg(MainReg::WhoAmI as u8)
    }

    /// Reset the device, verify its identity and apply the baseline wakeup
    /// configuration.
    pub fn init(&mut self) -> Result<(), Error<E>> {
        self.apply_config(CONFIG_RESET)?;
        self.wait_for_reset_complete()?;
        let id = self.who_am_i()?;
        if id != WHO_AM_I_VAL {
            return Err(Error::InvalidDevice);
        }
        self.apply_config(CONFIG_WAKEUP_LSM6DS3)?;
        Ok(())
    }

    fn wait_for_reset_complete(&mut self) -> Result<(), Error<E>> {
        for _ in 0..RESET_RETRIES {
            let ctrl = self.read_reg(MainReg::Ctrl3C as u8)?;
            if ctrl & Ctrl3CFlags::SW_RESET.bits() == 0 {
                return Ok(());
            }
        }
        Err(Error::ResetTimeout)
    }

    pub fn read_reg(&mut self, reg: u8) -> Result<u8, Error<E>> {
        let mut buf = [0u8];
        self.i2c
            .write_read(self.address, &[reg], &mut buf)
            .map_err(Error::I2c)?;
        Ok(buf[0])
    }

    pub fn write_reg(&mut self, reg: u8, val: u8) -> Result<(), Error<E>> {
        self.i2c
            .write(self.address, &[reg, val])
            .map_err(Error::I2c)?;
        Ok(())
    }

    pub fn read_bytes(&mut self, start_reg: u8, buffer: &mut [u8]) -> Result<(), Error<E>> {
        self.i2c
            .write_read(self.address, &[start_reg], buffer)
            .map_err(Error::I2c)
    }

    fn update_reg(&mut self, reg: u8, mask: u8, value: u8) -> Result<(), Error<E>> {
        let current = self.read_reg(reg)?;
        self.write_reg(reg, (current & !mask) | (value & mask))
    }

    /// Accepts any register type that implements the `Register` trait
    pub fn apply_config<R>(&mut self, config: &[RegConfig<R>]) -> Result<(), Error<E>>
    where
        R: Register + NamedRegister + Copy,
    {
        for entry in config {
            let addr = entry.reg.addr();
            match entry.op {
                RegOp::Write => {
                    debug!("write_reg {:<21}({:#04X}) = {:#04x}", entry.reg.name(), addr, entry.value);
                    self.write_reg(addr, entry.value)?
                }
                RegOp::Read => {
                    let data = self.read_reg(addr)?;
                    debug!("read_reg {:<21}({:#04X}) = {:#04x}", entry.reg.name(), addr, data);
                }
            }
        }
        Ok(())
    }

    pub fn apply_any_config(&mut self, config: &[AnyRegConfig]) -> Result<(), Error<E>> {
        for entry in config {
            let addr = entry.reg.addr();
            match entry.op {
                RegOp::Write => {
                    debug!("write_reg {:<21}({:#04X}) = {:#04x}", entry.reg.name(), addr, entry.value);
                    self.write_reg(addr, entry.value)?;
                }
                RegOp::Read => {
                    let data = self.read_reg(addr)?;
                    debug!("read_reg {:<21}({:#04X}) = {:#04x}", entry.reg.name(), addr, data);
                }
            }
        }
        Ok(())
    }

    pub fn dump_config<R>(&mut self, regs: &[R]) -> Result<(), Error<E>>
    where
        R: NamedRegister + Copy,
    {
        fn show(label: &str, reg: u8, val: Result<u8, impl core::fmt::Debug>) {
            match val {
                Ok(v) => debug!("{:<21}({:#04x}): 0x{:02X} ({:>3}) 0b{:08b}", label, reg, v, v, v),
                Err(e) => debug!("{:<16}: Error: {:?}", label, e),
            }
        }

        for reg in regs {
            let label = reg.name();
            let addr = reg.addr();
            show(label, addr, self.read_reg(addr));
        }

        Ok(())
    }

    pub fn read_temperature(&mut self) -> Result<Option<f32>, Error<E>> {
        let ctrl1_xl = self.read_reg(MainReg::Ctrl1Xl as u8)?;
        let ctrl2_g = self.read_reg(MainReg::Ctrl2G as u8)?;

        let accel_on = (ctrl1_xl & CTRL_ODR_MASK) != 0;
        let gyro_on = (ctrl2_g & CTRL_ODR_MASK) != 0;

        if !(accel_on || gyro_on) {
            return Ok(None); // temperature not valid if no sensor is active
        }

        let temp_l = self.read_reg(MainReg::OutTempL as u8)?;
        let temp_h = self.read_reg(MainReg::OutTempH as u8)?;

        let raw = i16::from_le_bytes([temp_l, temp_h]);
        Ok(Some((raw as f32) / 16.0 + 25.0))
    }

    pub fn enabled_sensors(&self) -> u16 {
        self.sensors_enabled
    }

    pub fn fifo_threshold(&self) -> u16 {
        self.fifo_threshold
    }

    pub fn fifo_engine(&self) -> &FifoEngine {
        &self.fifo
    }

    pub fn step_compensator(&self) -> &StepCompensator {
        &self.steps
    }

    /// Override the remaining transient-discard budget of a channel.
    pub fn set_samples_to_discard(&mut self, sensor: SensorId, count: u16) {
        self.fifo.set_samples_to_discard(sensor, count);
    }

    pub fn set_fifo_watermark(&mut self, bytes: u16) -> Result<(), Error<E>> {
        self.watermark = bytes;
        self.reconfigure_fifo()
    }

    /// Configure an endpoint's output rate. Interleaved channels reprogram
    /// the hardware and the pattern geometry when currently enabled.
    pub fn set_sensor_odr(&mut self, sensor: SensorId, odr: Odr) -> Result<(), Error<E>> {
        let Some(idx) = channel_index(sensor) else {
            return Ok(());
        };
        self.odrs[idx] = odr;
        if self.sensors_enabled & sensor.mask() != 0 {
            self.program_channel_odr(idx)?;
            self.reconfigure_fifo()?;
        }
        Ok(())
    }

    pub fn enable_sensor(&mut self, sensor: SensorId, enable: bool) -> Result<(), Error<E>> {
        if enable {
            self.sensors_enabled |= sensor.mask();
        } else {
            self.sensors_enabled &= !sensor.mask();
        }
        debug!("enable_sensor {} {}: enabled={:#06x}", sensor.name(), enable, self.sensors_enabled);

        if let Some(idx) = channel_index(sensor) {
            self.fifo.set_endpoint_enabled(sensor, enable);
            if enable {
                let discard = match idx {
                    0 => ACCEL_STD_DISCARD,
                    1 => GYRO_STD_DISCARD,
                    _ => 0,
                };
                self.fifo.set_samples_to_discard(sensor, discard);
            }
            self.program_channel_odr(idx)?;
            self.reconfigure_fifo()?;
            return Ok(());
        }

        if sensor == SensorId::SignMotion {
            self.sign_motion_event_ready = enable;
        }
        self.program_embedded_funcs()
    }

    fn program_channel_odr(&mut self, idx: usize) -> Result<(), Error<E>> {
        let (plain, wakeup) = CHANNEL_ENDPOINTS[idx];
        let mut mask = plain.mask();
        if let Some(wk) = wakeup {
            mask |= wk.mask();
        }
        let odr = if self.sensors_enabled & mask != 0 {
            self.odrs[idx]
        } else {
            Odr::PowerDown
        };

        match idx {
            0 => self.update_reg(MainReg::Ctrl1Xl as u8, CTRL_ODR_MASK, (odr as u8) << CTRL_ODR_LOC),
            1 => self.update_reg(MainReg::Ctrl2G as u8, CTRL_ODR_MASK, (odr as u8) << CTRL_ODR_LOC),
            // external channels follow the sensor-hub slave configuration
            _ => Ok(()),
        }
    }

    fn program_embedded_funcs(&mut self) -> Result<(), Error<E>> {
        let mut tap_cfg = 0u8;
        if self.sensors_enabled & PEDO_MASK != 0 {
            tap_cfg |= TapCfgFlags::PEDO_EN.bits();
        }
        if self.sensors_enabled & SensorId::Tilt.mask() != 0 {
            tap_cfg |= TapCfgFlags::TILT_EN.bits();
        }
        self.update_reg(
            MainReg::TapCfg as u8,
            TapCfgFlags::PEDO_EN.bits() | TapCfgFlags::TILT_EN.bits(),
            tap_cfg,
        )?;

        let mut ctrl10 = 0u8;
        if self.sensors_enabled & EMB_FUNC_MASK != 0 {
            ctrl10 |= Ctrl10CFlags::FUNC_EN.bits();
        }
        if self.sensors_enabled & SensorId::SignMotion.mask() != 0 {
            ctrl10 |= Ctrl10CFlags::SIGN_MOTION_EN.bits();
        }
        self.update_reg(
            MainReg::Ctrl10C as u8,
            Ctrl10CFlags::FUNC_EN.bits() | Ctrl10CFlags::SIGN_MOTION_EN.bits(),
            ctrl10,
        )
    }

    /// Recompute the pattern geometry from the enabled channel set and push
    /// it to the hardware. Must complete before the next FIFO read: stale
    /// geometry misattributes bytes to the wrong channel. The programmed
    /// decimators are read back and cross-checked against the computed
    /// pattern.
    pub fn reconfigure_fifo(&mut self) -> Result<(), Error<E>> {
        let mut odrs: [Option<Odr>; fifo::FIFO_CHANNEL_COUNT] = [None; fifo::FIFO_CHANNEL_COUNT];
        for (idx, odr) in odrs.iter_mut().enumerate() {
            let (plain, wakeup) = CHANNEL_ENDPOINTS[idx];
            let mut mask = plain.mask();
            if let Some(wk) = wakeup {
                mask |= wk.mask();
            }
            if self.sensors_enabled & mask != 0 {
                *odr = Some(self.odrs[idx]);
            }
        }

        let sips = fifo::samples_in_pattern(&odrs).map_err(Error::Config)?;
        let computed = fifo::bytes_in_pattern(&sips);

        // bypass clears stale content while the pattern changes
        self.write_reg(MainReg::FifoCtrl5 as u8, FifoMode::Bypass as u8)?;

        if computed == 0 {
            self.fifo.set_pattern([0; fifo::FIFO_CHANNEL_COUNT], [0; fifo::FIFO_CHANNEL_COUNT]);
            self.fifo_threshold = 0;
            self.last_read_len = 0;
            return Ok(());
        }

        let decs = fifo::decimations(&odrs).map_err(Error::Config)?;
        self.write_reg(
            MainReg::FifoCtrl3 as u8,
            (decs[1] as u8) << DEC_FIFO_GYRO_LOC | (decs[0] as u8) << DEC_FIFO_XL_LOC,
        )?;
        self.write_reg(
            MainReg::FifoCtrl4 as u8,
            (decs[3] as u8) << DEC_DS4_FIFO_LOC | (decs[2] as u8) << DEC_DS3_FIFO_LOC,
        )?;

        // watermark in whole patterns, at least one, clamped to the buffer
        let mut threshold = self.watermark.min(FIFO_BUFFER_LEN as u16);
        threshold = (threshold / computed) * computed;
        if threshold == 0 {
            threshold = computed;
        }
        let threshold_words = threshold / BYTES_PER_WORD;
        self.write_reg(MainReg::FifoCtrl1 as u8, (threshold_words & 0xFF) as u8)?;
        self.update_reg(
            MainReg::FifoCtrl2 as u8,
            FIFO_FTH_H_MASK,
            (threshold_words >> 8) as u8,
        )?;

        let mut fifo_odr = Odr::PowerDown;
        for odr in odrs.iter().flatten() {
            if odr.hz() > fifo_odr.hz() {
                fifo_odr = *odr;
            }
        }
        self.write_reg(
            MainReg::FifoCtrl5 as u8,
            (fifo_odr as u8) << FIFO_ODR_LOC | FifoMode::Continuous as u8,
        )?;

        // what the hardware will actually emit
        let ctrl3 = self.read_reg(MainReg::FifoCtrl3 as u8)?;
        let ctrl4 = self.read_reg(MainReg::FifoCtrl4 as u8)?;
        let programmed = [
            FifoDecimation::from_bits(ctrl3 >> DEC_FIFO_XL_LOC),
            FifoDecimation::from_bits(ctrl3 >> DEC_FIFO_GYRO_LOC),
            FifoDecimation::from_bits(ctrl4 >> DEC_DS3_FIFO_LOC),
            FifoDecimation::from_bits(ctrl4 >> DEC_DS4_FIFO_LOC),
        ];
        let reported = fifo::bytes_in_pattern(&fifo::pattern_from_decimation(&programmed));
        if reported != computed {
            return Err(Error::Config(ConfigError::PatternMismatch { computed, reported }));
        }

        let mut deltas = [0i64; fifo::FIFO_CHANNEL_COUNT];
        for (idx, odr) in odrs.iter().enumerate() {
            deltas[idx] = odr.map_or(0, |o| o.period_ns());
        }
        self.fifo.set_pattern(sips, deltas);
        self.fifo_threshold = threshold;
        self.last_read_len = threshold;
        debug!(
            "reconfigure_fifo: sips={:?} bytes_in_pattern={} threshold={}",
            sips, computed, threshold
        );
        Ok(())
    }

    /// Clear the hardware FIFO and restore the configured streaming mode.
    pub fn flush_fifo(&mut self) -> Result<(), Error<E>> {
        self.reconfigure_fifo()
    }

    /// Drain the hardware FIFO and demultiplex it into `sink`.
    ///
    /// With `check_len` the hardware byte count is read back, trimmed to
    /// whole patterns and the snapshot timestamp is captured; without it
    /// the previously computed length is reused and timestamp cursors keep
    /// running (secondary drain of a burst). The exclusive borrow is the
    /// per-instance serialization: one read+decode pass at a time.
    pub fn read_fifo<T, S>(
        &mut self,
        check_len: bool,
        clock: &mut T,
        sink: &mut S,
    ) -> Result<(), Error<E>>
    where
        T: TimeSource,
        S: SampleSink,
    {
        let bytes_in_pattern = self.fifo.bytes_in_pattern();
        let mut read_len = self.last_read_len;
        let mut overrun = false;

        if check_len {
            let mut raw = [0u8; 2];
            self.read_bytes(MainReg::FifoStatus1 as u8, &mut raw)?;
            let diff = u16::from_le_bytes(raw);
            if diff & FIFO_OVERRUN_FLAG != 0 {
                overrun = true;
                error!("data fifo overrun, failed to read it, diff={:#06x}", diff);
            }
            if bytes_in_pattern == 0 {
                return Ok(());
            }
            read_len = (diff & FIFO_DIFF_MASK) * BYTES_PER_WORD;
            read_len = (read_len / bytes_in_pattern) * bytes_in_pattern;
            if read_len > self.fifo_threshold {
                read_len = self.fifo_threshold;
            }
            self.last_read_len = read_len;
        } else if bytes_in_pattern == 0 {
            return Ok(());
        }

        if read_len == 0 {
            return Ok(());
        }

        // the one observed timestamp; samples are always seen later than
        // they were latched, so it is never advanced forward
        if check_len {
            self.fifo.set_last_timestamp(clock.now_ns());
        }

        let mut len = read_len as usize;
        self.i2c
            .write_read(
                self.address,
                &[MainReg::FifoDataOutL as u8],
                &mut self.fifo_buf[..len],
            )
            .map_err(Error::I2c)?;

        let mut start = 0usize;
        if overrun {
            let mut raw = [0u8; 2];
            self.read_bytes(MainReg::FifoStatus3 as u8, &mut raw)?;
            let position = u16::from_le_bytes(raw) & FIFO_PATTERN_MASK;
            let words_in_pattern = bytes_in_pattern / BYTES_PER_WORD;
            if position > words_in_pattern {
                warn!("implausible fifo pattern position {}, dropping read", position);
                return Ok(());
            }
            // leading bytes up to the next pattern boundary were already
            // overwritten; never parse them
            start = ((words_in_pattern - position) * BYTES_PER_WORD) as usize;
            len -= bytes_in_pattern as usize;
            info!("FIFO overrun, offset={}", start);
        }

        self.fifo
            .decode(&self.fifo_buf[start..start + len], check_len, sink);
        Ok(())
    }

    /// Event bottom-half: dispatch whatever the status registers report.
    /// Schedule-agnostic; call from an interrupt handler, a work queue or a
    /// polling loop.
    pub fn handle_interrupt<T, S>(&mut self, clock: &mut T, sink: &mut S) -> Result<(), Error<E>>
    where
        T: TimeSource,
        S: SampleSink,
    {
        let src = self.read_reg(MainReg::FuncSrc as u8)?;
        let fifo_src = self.read_reg(MainReg::FifoStatus2 as u8)?;
        debug!("handle_interrupt: src={:#04x} fifo_src={:#04x}", src, fifo_src);

        if fifo_src & FifoStatus2Flags::FTH.bits() != 0 {
            if fifo_src & FifoStatus2Flags::FIFO_OVER_RUN.bits() != 0 {
                error!("data fifo overrun, reduce fifo threshold");
            }
            self.read_fifo(true, clock, sink)?;
        }

        if src & FuncSrcFlags::STEP_DETECTED.bits() != 0 {
            let now = clock.now_ns();
            if self.sensors_enabled & SensorId::StepDetector.mask() != 0 {
                sink.deliver(SensorId::StepDetector, &[], now);
            }
            if self.sign_motion_event_ready {
                sink.deliver(SensorId::SignMotion, &[], now);
                self.sign_motion_event_ready = false;
            }
        }

        if src & FuncSrcFlags::STEP_COUNT_DELTA_IA.bits() != 0 {
            self.read_step_counter(clock, sink)?;
        }

        if src & FuncSrcFlags::TILT_IA.bits() != 0
            && self.sensors_enabled & SensorId::Tilt.mask() != 0
        {
            sink.deliver(SensorId::Tilt, &[], clock.now_ns());
        }

        Ok(())
    }

    /// Independent single-sample path for the step counter: read, run the
    /// discontinuity compensator, deliver unless suppressed.
    pub fn read_step_counter<T, S>(&mut self, clock: &mut T, sink: &mut S) -> Result<(), Error<E>>
    where
        T: TimeSource,
        S: SampleSink,
    {
        let raw;
        let timestamp;
        if self.reset_steps {
            raw = 0;
            timestamp = clock.now_ns();
            self.reset_steps = false;
        } else {
            let mut buf = [0u8; 2];
            self.read_bytes(MainReg::StepCounterL as u8, &mut buf)?;
            raw = u16::from_le_bytes(buf);
            timestamp = clock.now_ns();
        }

        let reading = self.steps.compensate(raw, timestamp);
        debug!("step_counter={} -> {} tm={}", raw, reading.value, timestamp);

        if reading.report && self.sensors_enabled & SensorId::StepCounter.mask() != 0 {
            sink.deliver(
                SensorId::StepCounter,
                &reading.value.to_le_bytes(),
                timestamp,
            );
        }
        Ok(())
    }

    /// Zero the hardware pedometer. The next step-counter read reports a
    /// zeroed sample stamped "now" and bypasses the suppression check.
    pub fn reset_step_counter(&mut self) -> Result<(), Error<E>> {
        self.update_reg(
            MainReg::Ctrl10C as u8,
            Ctrl10CFlags::PEDO_RST_STEP.bits(),
            Ctrl10CFlags::PEDO_RST_STEP.bits(),
        )?;
        self.reset_steps = true;
        self.steps.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct BusFault;

    impl embedded_hal::i2c::Error for BusFault {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    /// Register-map bus double: writes land in `regs` (unless
    /// write-protected), reads come back from it, and bulk reads of
    /// FIFO_DATA_OUT_L stream from `fifo`.
    struct FakeBus {
        regs: [u8; 256],
        wp: [bool; 256],
        fifo: Vec<u8>,
        fail_bulk: bool,
    }

    impl FakeBus {
        fn new() -> Self {
            let mut bus = Self {
                regs: [0; 256],
                wp: [false; 256],
                fifo: Vec::new(),
                fail_bulk: false,
            };
            bus.regs[MainReg::WhoAmI as usize] = WHO_AM_I_VAL;
            bus
        }

        fn set_word(&mut self, reg: MainReg, value: u16) {
            let bytes = value.to_le_bytes();
            self.regs[reg as usize] = bytes[0];
            self.regs[reg as usize + 1] = bytes[1];
        }
    }

    impl ErrorType for FakeBus {
        type Error = BusFault;
    }

    impl I2c for FakeBus {
        fn transaction(
            &mut self,
            _address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), BusFault> {
            let mut reg: Option<u8> = None;
            for op in operations {
                match op {
                    Operation::Write(bytes) => {
                        if bytes.len() == 1 {
                            reg = Some(bytes[0]);
                        } else if bytes.len() >= 2 {
                            let base = bytes[0] as usize;
                            for (i, value) in bytes[1..].iter().enumerate() {
                                if !self.wp[base + i] {
                                    self.regs[base + i] = *value;
                                }
                            }
                            // reset completes instantly
                            self.regs[MainReg::Ctrl3C as usize] &= !Ctrl3CFlags::SW_RESET.bits();
                            reg = Some(bytes[0]);
                        }
                    }
                    Operation::Read(buf) => {
                        let base = reg.unwrap_or(0);
                        if base == MainReg::FifoDataOutL as u8 {
                            if self.fail_bulk {
                                return Err(BusFault);
                            }
                            for (i, b) in buf.iter_mut().enumerate() {
                                *b = self.fifo.get(i).copied().unwrap_or(0);
                            }
                        } else {
                            for (i, b) in buf.iter_mut().enumerate() {
                                *b = self.regs[(base as usize + i) & 0xFF];
                            }
                        }
                    }
                }
            }
            Ok(())
        }
    }

    struct FakeClock {
        now: i64,
    }

    impl TimeSource for FakeClock {
        fn now_ns(&mut self) -> i64 {
            self.now
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        items: Vec<(SensorId, Vec<u8>, i64)>,
    }

    impl RecordingSink {
        fn of(&self, sensor: SensorId) -> Vec<(Vec<u8>, i64)> {
            self.items
                .iter()
                .filter(|(s, _, _)| *s == sensor)
                .map(|(_, d, t)| (d.clone(), *t))
                .collect()
        }
    }

    impl SampleSink for RecordingSink {
        fn deliver(&mut self, sensor: SensorId, data: &[u8], timestamp: i64) {
            self.items.push((sensor, data.to_vec(), timestamp));
        }
    }

    const D104: i64 = Odr::Hz104.period_ns();
    const D52: i64 = Odr::Hz52.period_ns();

    fn driver() -> Lsm6ds3<FakeBus, BusFault> {
        let mut dev = Lsm6ds3::new(FakeBus::new(), DEFAULT_ADDRESS);
        dev.init().unwrap();
        dev
    }

    /// accel @104 Hz + gyro @52 Hz: pattern [A G A], 18 bytes
    fn streaming_driver() -> Lsm6ds3<FakeBus, BusFault> {
        let mut dev = driver();
        dev.set_sensor_odr(SensorId::Accel, Odr::Hz104).unwrap();
        dev.set_sensor_odr(SensorId::Gyro, Odr::Hz52).unwrap();
        dev.enable_sensor(SensorId::Accel, true).unwrap();
        dev.enable_sensor(SensorId::Gyro, true).unwrap();
        dev.set_samples_to_discard(SensorId::Accel, 0);
        dev.set_samples_to_discard(SensorId::Gyro, 0);
        dev
    }

    fn numbered(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    #[test]
    fn init_checks_device_identity() {
        let mut bus = FakeBus::new();
        bus.regs[MainReg::WhoAmI as usize] = 0x00;
        let mut dev = Lsm6ds3::new(bus, DEFAULT_ADDRESS);
        assert!(matches!(dev.init(), Err(Error::InvalidDevice)));
    }

    #[test]
    fn enable_programs_fifo_geometry() {
        let mut dev = streaming_driver();

        let regs = &dev.i2c().regs;
        // accel undecimated, gyro halved
        assert_eq!(regs[MainReg::FifoCtrl3 as usize], 0x11);
        assert_eq!(regs[MainReg::FifoCtrl4 as usize], 0x00);
        // continuous mode at the fastest enabled rate
        assert_eq!(
            regs[MainReg::FifoCtrl5 as usize],
            (Odr::Hz104 as u8) << FIFO_ODR_LOC | FifoMode::Continuous as u8
        );
        // 1024-byte watermark rounded down to whole 18-byte patterns
        assert_eq!(dev.fifo_threshold(), 1008);
        let words = 1008 / BYTES_PER_WORD;
        assert_eq!(dev.i2c().regs[MainReg::FifoCtrl1 as usize], (words & 0xFF) as u8);
        assert_eq!(
            dev.i2c().regs[MainReg::FifoCtrl2 as usize] & FIFO_FTH_H_MASK,
            (words >> 8) as u8
        );
        // ODR fields programmed
        assert_eq!(
            dev.i2c().regs[MainReg::Ctrl1Xl as usize] & CTRL_ODR_MASK,
            (Odr::Hz104 as u8) << CTRL_ODR_LOC
        );
        assert_eq!(
            dev.i2c().regs[MainReg::Ctrl2G as usize] & CTRL_ODR_MASK,
            (Odr::Hz52 as u8) << CTRL_ODR_LOC
        );
        assert_eq!(dev.fifo_engine().bytes_in_pattern(), 18);
    }

    #[test]
    fn disabling_everything_powers_the_fifo_down() {
        let mut dev = streaming_driver();
        dev.enable_sensor(SensorId::Accel, false).unwrap();
        dev.enable_sensor(SensorId::Gyro, false).unwrap();

        assert_eq!(dev.fifo_engine().bytes_in_pattern(), 0);
        assert_eq!(dev.fifo_threshold(), 0);
        assert_eq!(
            dev.i2c().regs[MainReg::FifoCtrl5 as usize],
            FifoMode::Bypass as u8
        );
        assert_eq!(
            dev.i2c().regs[MainReg::Ctrl1Xl as usize] & CTRL_ODR_MASK,
            0x00
        );
    }

    #[test]
    fn read_fifo_demultiplexes_and_timestamps() {
        let mut dev = streaming_driver();
        let data = numbered(36); // two patterns
        dev.i2c().fifo = data.clone();
        dev.i2c().set_word(MainReg::FifoStatus1, 18); // 18 words available

        let mut clock = FakeClock { now: 1_000_000_000 };
        let mut sink = RecordingSink::default();
        dev.read_fifo(true, &mut clock, &mut sink).unwrap();

        let accel = sink.of(SensorId::Accel);
        let gyro = sink.of(SensorId::Gyro);
        assert_eq!(accel.len(), 4);
        assert_eq!(gyro.len(), 2);

        assert_eq!(accel[0].0, data[0..6]);
        assert_eq!(gyro[0].0, data[6..12]);
        assert_eq!(accel[1].0, data[12..18]);
        assert_eq!(accel[2].0, data[18..24]);

        let accel_start = 1_000_000_000 - 2 * 2 * D104;
        let gyro_start = 1_000_000_000 - 2 * D52;
        assert_eq!(accel[0].1, accel_start);
        assert_eq!(accel[3].1, accel_start + 3 * D104);
        assert_eq!(gyro[0].1, gyro_start);
        assert_eq!(gyro[1].1, gyro_start + D52);
    }

    #[test]
    fn read_fifo_overrun_trims_leading_bytes() {
        let mut dev = streaming_driver();
        let data = numbered(36);
        dev.i2c().fifo = data.clone();
        dev.i2c()
            .set_word(MainReg::FifoStatus1, 18 | FIFO_OVERRUN_FLAG);
        // 9 words per pattern, position 6: discard (9-6)*2 = 6 bytes
        dev.i2c().set_word(MainReg::FifoStatus3, 6);

        let mut clock = FakeClock { now: 1_000_000_000 };
        let mut sink = RecordingSink::default();
        dev.read_fifo(true, &mut clock, &mut sink).unwrap();

        // one pattern parsed, starting right after the trimmed bytes
        let accel = sink.of(SensorId::Accel);
        let gyro = sink.of(SensorId::Gyro);
        assert_eq!(accel.len(), 2);
        assert_eq!(gyro.len(), 1);
        assert_eq!(accel[0].0, data[6..12]);
        assert_eq!(gyro[0].0, data[12..18]);
        assert_eq!(accel[1].0, data[18..24]);
    }

    #[test]
    fn overrun_at_pattern_boundary_drops_one_whole_pattern() {
        let mut dev = streaming_driver();
        let data = numbered(36);
        dev.i2c().fifo = data.clone();
        dev.i2c()
            .set_word(MainReg::FifoStatus1, 18 | FIFO_OVERRUN_FLAG);
        dev.i2c().set_word(MainReg::FifoStatus3, 0);

        let mut clock = FakeClock { now: 1_000_000_000 };
        let mut sink = RecordingSink::default();
        dev.read_fifo(true, &mut clock, &mut sink).unwrap();

        let accel = sink.of(SensorId::Accel);
        assert_eq!(accel.len(), 2);
        assert_eq!(accel[0].0, data[18..24]); // the stale pattern is gone
    }

    #[test]
    fn transport_failure_aborts_without_dispatch() {
        let mut dev = streaming_driver();
        dev.i2c().set_word(MainReg::FifoStatus1, 18);
        dev.i2c().fail_bulk = true;

        let mut clock = FakeClock { now: 1_000_000_000 };
        let mut sink = RecordingSink::default();
        assert!(matches!(
            dev.read_fifo(true, &mut clock, &mut sink),
            Err(Error::I2c(BusFault))
        ));
        assert!(sink.items.is_empty());
    }

    #[test]
    fn read_fifo_without_channels_is_a_no_op() {
        let mut dev = driver();
        dev.i2c().set_word(MainReg::FifoStatus1, 18);

        let mut clock = FakeClock { now: 1_000_000_000 };
        let mut sink = RecordingSink::default();
        dev.read_fifo(true, &mut clock, &mut sink).unwrap();
        assert!(sink.items.is_empty());
    }

    #[test]
    fn pattern_mismatch_is_surfaced() {
        let mut dev = driver();
        dev.i2c().wp[MainReg::FifoCtrl3 as usize] = true; // decimators stuck at zero
        assert!(matches!(
            dev.enable_sensor(SensorId::Accel, true),
            Err(Error::Config(ConfigError::PatternMismatch { .. }))
        ));
    }

    #[test]
    fn enable_seeds_transient_discards() {
        let mut dev = driver();
        dev.enable_sensor(SensorId::Gyro, true).unwrap();
        assert_eq!(dev.fifo_engine().samples_to_discard(SensorId::Gyro), 6);
        dev.enable_sensor(SensorId::Accel, true).unwrap();
        assert_eq!(dev.fifo_engine().samples_to_discard(SensorId::Accel), 1);
    }

    #[test]
    fn step_counter_read_compensates_and_delivers() {
        let mut dev = driver();
        dev.enable_sensor(SensorId::StepCounter, true).unwrap();
        dev.i2c().set_word(MainReg::StepCounterL, 10);

        let mut clock = FakeClock { now: 1_000_000_000 };
        let mut sink = RecordingSink::default();
        dev.read_step_counter(&mut clock, &mut sink).unwrap();

        // an implausible jump two seconds later comes out compensated
        dev.i2c().set_word(MainReg::StepCounterL, 500);
        clock.now += 2_000_000_000;
        dev.read_step_counter(&mut clock, &mut sink).unwrap();

        let steps = sink.of(SensorId::StepCounter);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].0, 10u16.to_le_bytes());
        assert_eq!(steps[1].0, 10u16.to_le_bytes());
    }

    #[test]
    fn duplicate_step_count_is_not_delivered() {
        let mut dev = driver();
        dev.enable_sensor(SensorId::StepCounter, true).unwrap();
        dev.i2c().set_word(MainReg::StepCounterL, 7);

        let mut clock = FakeClock { now: 1_000_000_000 };
        let mut sink = RecordingSink::default();
        dev.read_step_counter(&mut clock, &mut sink).unwrap();
        clock.now += 2_000_000_000;
        dev.read_step_counter(&mut clock, &mut sink).unwrap();

        assert_eq!(sink.of(SensorId::StepCounter).len(), 1);
    }

    #[test]
    fn step_counter_reset_reports_a_zeroed_sample() {
        let mut dev = driver();
        dev.enable_sensor(SensorId::StepCounter, true).unwrap();
        dev.i2c().set_word(MainReg::StepCounterL, 42);

        let mut clock = FakeClock { now: 1_000_000_000 };
        let mut sink = RecordingSink::default();
        dev.read_step_counter(&mut clock, &mut sink).unwrap();

        dev.reset_step_counter().unwrap();
        assert_ne!(
            dev.i2c().regs[MainReg::Ctrl10C as usize] & Ctrl10CFlags::PEDO_RST_STEP.bits(),
            0
        );

        clock.now += 1_000_000_000;
        dev.read_step_counter(&mut clock, &mut sink).unwrap();

        let steps = sink.of(SensorId::StepCounter);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].0, 0u16.to_le_bytes());
        assert_eq!(steps[1].1, 2_000_000_000);
    }

    #[test]
    fn interrupt_dispatches_events_and_chains_the_step_counter() {
        let mut dev = driver();
        dev.enable_sensor(SensorId::StepDetector, true).unwrap();
        dev.enable_sensor(SensorId::Tilt, true).unwrap();
        dev.enable_sensor(SensorId::SignMotion, true).unwrap();
        dev.enable_sensor(SensorId::StepCounter, true).unwrap();
        dev.i2c().set_word(MainReg::StepCounterL, 3);
        dev.i2c().regs[MainReg::FuncSrc as usize] = (FuncSrcFlags::STEP_DETECTED
            | FuncSrcFlags::TILT_IA
            | FuncSrcFlags::STEP_COUNT_DELTA_IA)
            .bits();

        let mut clock = FakeClock { now: 5_000_000_000 };
        let mut sink = RecordingSink::default();
        dev.handle_interrupt(&mut clock, &mut sink).unwrap();

        assert_eq!(sink.of(SensorId::StepDetector).len(), 1);
        assert_eq!(sink.of(SensorId::Tilt).len(), 1);
        assert_eq!(sink.of(SensorId::StepCounter).len(), 1);
        assert_eq!(sink.of(SensorId::StepDetector)[0].0.len(), 0);

        // significant motion is one-shot
        assert_eq!(sink.of(SensorId::SignMotion).len(), 1);
        dev.handle_interrupt(&mut clock, &mut sink).unwrap();
        assert_eq!(sink.of(SensorId::SignMotion).len(), 1);
    }

    #[test]
    fn interrupt_drains_the_fifo_on_watermark() {
        let mut dev = streaming_driver();
        let data = numbered(18);
        dev.i2c().fifo = data.clone();
        dev.i2c().set_word(MainReg::FifoStatus1, 9);
        dev.i2c().regs[MainReg::FifoStatus2 as usize] |= FifoStatus2Flags::FTH.bits();

        let mut clock = FakeClock { now: 1_000_000_000 };
        let mut sink = RecordingSink::default();
        dev.handle_interrupt(&mut clock, &mut sink).unwrap();

        assert_eq!(sink.of(SensorId::Accel).len(), 2);
        assert_eq!(sink.of(SensorId::Gyro).len(), 1);
    }

    #[test]
    fn sensor_hub_config_programs_slave_zero_through_bank_a() {
        let mut dev = driver();
        dev.apply_any_config(CONFIG_SENSOR_HUB_MAG).unwrap();

        let regs = &dev.i2c().regs;
        assert_eq!(regs[BankAReg::Slv0Add as usize], (configs::MAG_SLAVE_ADDRESS << 1) | 0x01);
        assert_eq!(regs[BankAReg::Slv0Subadd as usize], 0x28);
        assert_eq!(regs[BankAReg::Slave0Config as usize], 0x06);
        // bank access released, hub master running
        assert_eq!(regs[MainReg::FuncCfgAccess as usize], FuncCfgAccessMode::User as u8);
        assert_ne!(
            regs[MainReg::MasterConfig as usize] & MasterConfigFlags::MASTER_ON.bits(),
            0
        );

        dev.dump_config(MAIN_REGS).unwrap();
    }

    #[test]
    fn sample_queue_collects_decoded_samples() {
        let mut dev = streaming_driver();
        dev.i2c().fifo = vec![1, 0, 2, 0, 3, 0, 4, 0, 5, 0, 6, 0, 7, 0, 8, 0, 9, 0];
        dev.i2c().set_word(MainReg::FifoStatus1, 9); // one pattern

        let mut clock = FakeClock { now: 1_000_000_000 };
        let mut queue: SampleQueue<16> = SampleQueue::new();
        dev.read_fifo(true, &mut clock, &mut queue).unwrap();

        let first = queue.pop().unwrap();
        assert_eq!(first.sensor, SensorId::Accel);
        assert_eq!(first.axes(), [1, 2, 3]);
        let second = queue.pop().unwrap();
        assert_eq!(second.sensor, SensorId::Gyro);
        assert_eq!(second.axes(), [4, 5, 6]);
        let third = queue.pop().unwrap();
        assert_eq!(third.axes(), [7, 8, 9]);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn temperature_needs_an_active_sensor() {
        let mut dev = driver();
        assert_eq!(dev.read_temperature().unwrap(), None);

        dev.set_sensor_odr(SensorId::Accel, Odr::Hz104).unwrap();
        dev.enable_sensor(SensorId::Accel, true).unwrap();
        dev.i2c().set_word(MainReg::OutTempL, 160); // 10 degC above the offset
        assert_eq!(dev.read_temperature().unwrap(), Some(35.0));
    }

    #[test]
    fn wakeup_endpoints_fan_out_from_the_same_channel() {
        let mut dev = driver();
        dev.set_sensor_odr(SensorId::Accel, Odr::Hz104).unwrap();
        dev.enable_sensor(SensorId::Accel, true).unwrap();
        dev.enable_sensor(SensorId::AccelWk, true).unwrap();
        dev.set_samples_to_discard(SensorId::Accel, 0);

        let data = numbered(6);
        dev.i2c().fifo = data.clone();
        dev.i2c().set_word(MainReg::FifoStatus1, 3);

        let mut clock = FakeClock { now: 1_000_000_000 };
        let mut sink = RecordingSink::default();
        dev.read_fifo(true, &mut clock, &mut sink).unwrap();

        let plain = sink.of(SensorId::Accel);
        let wakeup = sink.of(SensorId::AccelWk);
        assert_eq!(plain.len(), 1);
        assert_eq!(plain, wakeup);
    }
}
