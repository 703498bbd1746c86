#![allow(unused_imports)]
use core::convert::TryFrom;
use bitflags::bitflags;

use paste::paste;

macro_rules! registers {
    (
        $enum_name:ident, $slice_name:ident {
            $($name:ident = $val:expr),* $(,)?
        }
    ) => {
        #[repr(u8)]
        #[derive(Copy, Clone, Debug, PartialEq, Eq)]
        pub enum $enum_name {
            $($name = $val),*
        }

        pub const $slice_name: &[$enum_name] = &[
            $($enum_name::$name),*
        ];

        impl $enum_name {
            pub fn name(&self) -> &'static str {
                match self {
                    $($enum_name::$name => stringify!($name),)*
                }
            }
        }

        impl Register for $enum_name {
            fn addr(self) -> u8 {
                self as u8
            }
        }

        impl NamedRegister for $enum_name {
            fn name(&self) -> &'static str {
                self.name()
            }
        }

        impl From<$enum_name> for u8 {
            fn from(r: $enum_name) -> u8 {
                r as u8
            }
        }

        paste! {
            #[allow(non_snake_case)]
            pub fn [<$enum_name _Stringify_From_u8>](value: u8) -> Option<&'static str> {
                $slice_name.iter().find(|r| r.addr() == value).map(|r| r.name())
            }
        }
    };
}

#[derive(Clone, Copy, Debug)]
pub enum RegOp {
    Read,
    Write,
}

pub trait NamedRegister: Register {
    fn name(&self) -> &'static str;
}

pub trait Register: Copy {
    fn addr(self) -> u8;
}

pub struct RegConfig<R: Register> {
    pub op: RegOp,
    pub reg: R,
    pub value: u8,
}

pub struct AnyRegConfig {
    pub op: RegOp,
    pub reg: UnifiedRegister,
    pub value: u8,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnifiedRegister {
    Main(MainReg),
    BankA(BankAReg),
}

impl Register for UnifiedRegister {
    fn addr(self) -> u8 {
        match self {
            UnifiedRegister::Main(r) => r.addr(),
            UnifiedRegister::BankA(r) => r.addr(),
        }
    }
}

impl NamedRegister for UnifiedRegister {
    fn name(&self) -> &'static str {
        match self {
            UnifiedRegister::Main(r) => r.name(),
            UnifiedRegister::BankA(r) => r.name(),
        }
    }
}

registers! {
    MainReg, MAIN_REGS {
        FuncCfgAccess       = 0x01,
        SensorSyncTimeFrame = 0x04,
        FifoCtrl1           = 0x06,
        FifoCtrl2           = 0x07,
        FifoCtrl3           = 0x08,
        FifoCtrl4           = 0x09,
        FifoCtrl5           = 0x0A,
        OrientCfgG          = 0x0B,
        Int1Ctrl            = 0x0D,
        Int2Ctrl            = 0x0E,
        WhoAmI              = 0x0F,
        Ctrl1Xl             = 0x10,
        Ctrl2G              = 0x11,
        Ctrl3C              = 0x12,
        Ctrl4C              = 0x13,
        Ctrl5C              = 0x14,
        Ctrl6C              = 0x15,
        Ctrl7G              = 0x16,
        Ctrl8Xl             = 0x17,
        Ctrl9Xl             = 0x18,
        Ctrl10C             = 0x19,
        MasterConfig        = 0x1A,
        WakeUpSrc           = 0x1B,
        TapSrc              = 0x1C,
        D6DSrc              = 0x1D,
        StatusReg           = 0x1E,
        OutTempL            = 0x20,
        OutTempH            = 0x21,
        OutxLG              = 0x22,
        OutxHG              = 0x23,
        OutyLG              = 0x24,
        OutyHG              = 0x25,
        OutzLG              = 0x26,
        OutzHG              = 0x27,
        OutxLXl             = 0x28,
        OutxHXl             = 0x29,
        OutyLXl             = 0x2A,
        OutyHXl             = 0x2B,
        OutzLXl             = 0x2C,
        OutzHXl             = 0x2D,
        SensorHub1Reg       = 0x2E,
        SensorHub2Reg       = 0x2F,
        SensorHub3Reg       = 0x30,
        SensorHub4Reg       = 0x31,
        SensorHub5Reg       = 0x32,
        SensorHub6Reg       = 0x33,
        SensorHub7Reg       = 0x34,
        SensorHub8Reg       = 0x35,
        SensorHub9Reg       = 0x36,
        SensorHub10Reg      = 0x37,
        SensorHub11Reg      = 0x38,
        SensorHub12Reg      = 0x39,
        FifoStatus1         = 0x3A,
        FifoStatus2         = 0x3B,
        FifoStatus3         = 0x3C,
        FifoStatus4         = 0x3D,
        FifoDataOutL        = 0x3E,
        FifoDataOutH        = 0x3F,
        Timestamp0Reg       = 0x40,
        Timestamp1Reg       = 0x41,
        Timestamp2Reg       = 0x42,
        StepTimestampL      = 0x49,
        StepTimestampH      = 0x4A,
        StepCounterL        = 0x4B,
        StepCounterH        = 0x4C,
        SensorHub13Reg      = 0x4D,
        SensorHub14Reg      = 0x4E,
        SensorHub15Reg      = 0x4F,
        SensorHub16Reg      = 0x50,
        SensorHub17Reg      = 0x51,
        SensorHub18Reg      = 0x52,
        FuncSrc             = 0x53,
        TapCfg              = 0x58,
        TapThs6D            = 0x59,
        IntDur2             = 0x5A,
        WakeUpThs           = 0x5B,
        WakeUpDur           = 0x5C,
        FreeFall            = 0x5D,
        Md1Cfg              = 0x5E,
        Md2Cfg              = 0x5F,
        OutMagRawXL         = 0x66,
        OutMagRawXH         = 0x67,
        OutMagRawYL         = 0x68,
        OutMagRawYH         = 0x69,
        OutMagRawZL         = 0x6A,
        OutMagRawZH         = 0x6B,
    }
}

// Embedded-functions bank A, reachable while FuncCfgAccess = BankA
registers! {
    BankAReg, BANK_A_REGS {
        Slv0Add             = 0x02,
        Slv0Subadd          = 0x03,
        Slave0Config        = 0x04,
        Slv1Add             = 0x05,
        Slv1Subadd          = 0x06,
        Slave1Config        = 0x07,
        Slv2Add             = 0x08,
        Slv2Subadd          = 0x09,
        Slave2Config        = 0x0A,
        Slv3Add             = 0x0B,
        Slv3Subadd          = 0x0C,
        Slave3Config        = 0x0D,
        DatawriteSrcModeSubSlv0 = 0x0E,
        ConfigPedoThsMin    = 0x0F,
        SmThs               = 0x13,
        PedoDebReg          = 0x14,
        StepCountDelta      = 0x15,
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FuncCfgAccessMode {
    User = 0x00,
    BankA = 0x80,
    BankB = 0xA0,
}

bitflags::bitflags! {
    pub struct Ctrl3CFlags: u8 {
        const BOOT      = 1 << 7;
        const BDU       = 1 << 6;
        const H_LACTIVE = 1 << 5;
        const PP_OD     = 1 << 4;
        const SIM       = 1 << 3;
        const IF_INC    = 1 << 2;
        const BLE       = 1 << 1;
        const SW_RESET  = 1 << 0;
    }
}

bitflags::bitflags! {
    pub struct Ctrl9XlFlags: u8 {
        const ZEN_XL    = 1 << 5;
        const YEN_XL    = 1 << 4;
        const XEN_XL    = 1 << 3;
        const SOFT_EN   = 1 << 2;
    }
}

bitflags::bitflags! {
    pub struct Ctrl10CFlags: u8 {
        const ZEN_G          = 1 << 5;
        const YEN_G          = 1 << 4;
        const XEN_G          = 1 << 3;
        const FUNC_EN        = 1 << 2;
        const PEDO_RST_STEP  = 1 << 1;
        const SIGN_MOTION_EN = 1 << 0;
    }
}

bitflags::bitflags! {
    pub struct TapCfgFlags: u8 {
        const TIMER_EN   = 1 << 7;
        const PEDO_EN    = 1 << 6;
        const TILT_EN    = 1 << 5;
        const SLOPE_FDS  = 1 << 4;
        const TAP_X_EN   = 1 << 3;
        const TAP_Y_EN   = 1 << 2;
        const TAP_Z_EN   = 1 << 1;
        const LIR        = 1 << 0;
    }
}

bitflags::bitflags! {
    pub struct Int1CtrlFlags: u8 {
        const INT1_STEP_DETECTOR = 1 << 7;
        const INT1_SIGN_MOT      = 1 << 6;
        const INT1_FULL_FLAG     = 1 << 5;
        const INT1_FIFO_OVR      = 1 << 4;
        const INT1_FTH           = 1 << 3;
        const INT1_BOOT          = 1 << 2;
        const INT1_DRDY_G        = 1 << 1;
        const INT1_DRDY_XL       = 1 << 0;
    }
}

bitflags::bitflags! {
    pub struct FuncSrcFlags: u8 {
        const STEP_COUNT_DELTA_IA = 1 << 7;
        const SIGN_MOTION_IA      = 1 << 6;
        const TILT_IA             = 1 << 5;
        const STEP_DETECTED       = 1 << 4;
        const STEP_OVERFLOW       = 1 << 3;
        const SENS_HUB_END_OP     = 1 << 0;
    }
}

bitflags::bitflags! {
    pub struct FifoStatus2Flags: u8 {
        const FTH           = 1 << 7;
        const FIFO_OVER_RUN = 1 << 6;
        const FIFO_FULL     = 1 << 5;
        const FIFO_EMPTY    = 1 << 4;
    }
}

bitflags::bitflags! {
    pub struct MasterConfigFlags: u8 {
        const DRDY_ON_INT1        = 1 << 7;
        const DATA_VALID_SEL_FIFO = 1 << 6;
        const START_CONFIG        = 1 << 4;
        const PULL_UP_EN          = 1 << 3;
        const PASS_THROUGH_MODE   = 1 << 2;
        const IRON_EN             = 1 << 1;
        const MASTER_ON           = 1 << 0;
    }
}

pub const CTRL_ODR_MASK: u8 = 0xF0;
pub const CTRL_ODR_LOC: u8 = 4;
pub const CTRL1_XL_FS_MASK: u8 = 0x0C;
pub const CTRL1_XL_FS_LOC: u8 = 2;
pub const CTRL2_G_FS_MASK: u8 = 0x0C;
pub const CTRL2_G_FS_LOC: u8 = 2;

pub const FIFO_MODE_MASK: u8 = 0x07;
pub const FIFO_MODE_LOC: u8 = 0;
pub const FIFO_ODR_MASK: u8 = 0x78;
pub const FIFO_ODR_LOC: u8 = 3;
pub const DEC_FIFO_XL_LOC: u8 = 0;
pub const DEC_FIFO_XL_MASK: u8 = 0x07;
pub const DEC_FIFO_GYRO_LOC: u8 = 3;
pub const DEC_FIFO_GYRO_MASK: u8 = 0x38;
pub const DEC_DS3_FIFO_LOC: u8 = 0;
pub const DEC_DS3_FIFO_MASK: u8 = 0x07;
pub const DEC_DS4_FIFO_LOC: u8 = 3;
pub const DEC_DS4_FIFO_MASK: u8 = 0x38;
pub const FIFO_FTH_H_MASK: u8 = 0x0F;

pub const WHO_AM_I_VAL: u8 = 0x69;

// 16-bit little-endian FIFO bookkeeping words
pub const FIFO_DIFF_MASK: u16 = 0x0FFF;
pub const FIFO_OVERRUN_FLAG: u16 = 0x4000;
pub const FIFO_PATTERN_MASK: u16 = 0x03FF;

pub const BYTES_PER_WORD: u16 = 2;
/// One FIFO sample: three little-endian 16-bit words.
pub const FIFO_ELEMENT_LEN: usize = 6;

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Odr {
    PowerDown = 0x00,
    Hz13 = 0x01,
    Hz26 = 0x02,
    Hz52 = 0x03,
    Hz104 = 0x04,
    Hz208 = 0x05,
    Hz416 = 0x06,
}

impl Odr {
    pub const fn hz(self) -> u32 {
        match self {
            Odr::PowerDown => 0,
            Odr::Hz13 => 13,
            Odr::Hz26 => 26,
            Odr::Hz52 => 52,
            Odr::Hz104 => 104,
            Odr::Hz208 => 208,
            Odr::Hz416 => 416,
        }
    }

    /// Nominal distance between two consecutive samples at this rate.
    pub const fn period_ns(self) -> i64 {
        match self.hz() {
            0 => 0,
            hz => 1_000_000_000 / hz as i64,
        }
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccelFullScale {
    G2 = 0x00,
    G16 = 0x01,
    G4 = 0x02,
    G8 = 0x03,
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GyroFullScale {
    Dps245 = 0x00,
    Dps500 = 0x01,
    Dps1000 = 0x02,
    Dps2000 = 0x03,
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FifoMode {
    Bypass = 0x00,
    Fifo = 0x01,
    ContinuousToFifo = 0x03,
    BypassToContinuous = 0x04,
    Continuous = 0x06,
}

/// Per-channel FIFO decimation field (FIFO_CTRL3/FIFO_CTRL4).
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FifoDecimation {
    NotInFifo = 0x00,
    NoDecimation = 0x01,
    Dec2 = 0x02,
    Dec3 = 0x03,
    Dec4 = 0x04,
    Dec8 = 0x05,
    Dec16 = 0x06,
    Dec32 = 0x07,
}

impl FifoDecimation {
    pub const fn factor(self) -> u32 {
        match self {
            FifoDecimation::NotInFifo => 0,
            FifoDecimation::NoDecimation => 1,
            FifoDecimation::Dec2 => 2,
            FifoDecimation::Dec3 => 3,
            FifoDecimation::Dec4 => 4,
            FifoDecimation::Dec8 => 8,
            FifoDecimation::Dec16 => 16,
            FifoDecimation::Dec32 => 32,
        }
    }

    pub fn from_factor(factor: u32) -> Option<Self> {
        match factor {
            1 => Some(FifoDecimation::NoDecimation),
            2 => Some(FifoDecimation::Dec2),
            3 => Some(FifoDecimation::Dec3),
            4 => Some(FifoDecimation::Dec4),
            8 => Some(FifoDecimation::Dec8),
            16 => Some(FifoDecimation::Dec16),
            32 => Some(FifoDecimation::Dec32),
            _ => None,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0x00 => FifoDecimation::NotInFifo,
            0x01 => FifoDecimation::NoDecimation,
            0x02 => FifoDecimation::Dec2,
            0x03 => FifoDecimation::Dec3,
            0x04 => FifoDecimation::Dec4,
            0x05 => FifoDecimation::Dec8,
            0x06 => FifoDecimation::Dec16,
            _ => FifoDecimation::Dec32,
        }
    }
}
