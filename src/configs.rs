#![allow(unused_imports)]

use crate::registers::*;

// Trigger software reset
pub const CONFIG_RESET: &[RegConfig<MainReg>] = &[RegConfig {
    op: RegOp::Write,
    reg: MainReg::Ctrl3C,
    value: Ctrl3CFlags::SW_RESET.bits(),
}];

pub const CONFIG_WAKEUP_LSM6DS3: &[RegConfig<MainReg>] = &[
    RegConfig {
        op: RegOp::Write,
        reg: MainReg::Ctrl3C,
        value: Ctrl3CFlags::BDU.bits() | Ctrl3CFlags::IF_INC.bits(),
    },
    RegConfig {
        op: RegOp::Write,
        reg: MainReg::Ctrl9Xl,
        value: Ctrl9XlFlags::ZEN_XL.bits() | Ctrl9XlFlags::YEN_XL.bits() | Ctrl9XlFlags::XEN_XL.bits(),
    },
    RegConfig {
        op: RegOp::Write,
        reg: MainReg::Ctrl10C,
        value: Ctrl10CFlags::ZEN_G.bits() | Ctrl10CFlags::YEN_G.bits() | Ctrl10CFlags::XEN_G.bits(),
    },
    RegConfig {
        op: RegOp::Write,
        reg: MainReg::Ctrl4C,
        value: 0x00, // default, LPF1 off
    },
    RegConfig {
        op: RegOp::Write,
        reg: MainReg::Ctrl6C,
        value: 0x00,
    },
    RegConfig {
        op: RegOp::Write,
        reg: MainReg::Ctrl7G,
        value: 0x00,
    },
    RegConfig {
        op: RegOp::Write,
        reg: MainReg::Int1Ctrl,
        value: Int1CtrlFlags::INT1_FTH.bits(),
    },
    RegConfig {
        op: RegOp::Write,
        reg: MainReg::Int2Ctrl,
        value: 0x00, // No Int2
    },
];

// Stand-alone streaming setup for bring-up: 504-word watermark, both
// high-rate channels undecimated, continuous mode at 104 Hz. Normal
// operation programs these registers through reconfigure_fifo instead.
pub const CONFIG_STREAMING: &[RegConfig<MainReg>] = &[
    RegConfig {
        op: RegOp::Write,
        reg: MainReg::FifoCtrl1,
        value: 0xF8,
    },
    RegConfig {
        op: RegOp::Write,
        reg: MainReg::FifoCtrl2,
        value: 0x01,
    },
    RegConfig {
        op: RegOp::Write,
        reg: MainReg::FifoCtrl3,
        value: (FifoDecimation::NoDecimation as u8) << DEC_FIFO_GYRO_LOC
            | (FifoDecimation::NoDecimation as u8) << DEC_FIFO_XL_LOC,
    },
    RegConfig {
        op: RegOp::Write,
        reg: MainReg::FifoCtrl4,
        value: 0x00, // no external datasets
    },
    RegConfig {
        op: RegOp::Write,
        reg: MainReg::FifoCtrl5,
        value: (Odr::Hz104 as u8) << FIFO_ODR_LOC | FifoMode::Continuous as u8,
    },
];

pub const CONFIG_INT_NOTIFICATION: &[RegConfig<MainReg>] = &[RegConfig {
    op: RegOp::Write,
    reg: MainReg::TapCfg,
    value: TapCfgFlags::LIR.bits(),
}];

// Pedometer, tilt and significant motion in one shot
pub const CONFIG_EMB_FUNCS: &[RegConfig<MainReg>] = &[
    RegConfig {
        op: RegOp::Write,
        reg: MainReg::TapCfg,
        value: TapCfgFlags::PEDO_EN.bits() | TapCfgFlags::TILT_EN.bits() | TapCfgFlags::LIR.bits(),
    },
    RegConfig {
        op: RegOp::Write,
        reg: MainReg::Ctrl10C,
        value: Ctrl10CFlags::ZEN_G.bits()
            | Ctrl10CFlags::YEN_G.bits()
            | Ctrl10CFlags::XEN_G.bits()
            | Ctrl10CFlags::FUNC_EN.bits()
            | Ctrl10CFlags::SIGN_MOTION_EN.bits(),
    },
];

pub const MAG_SLAVE_ADDRESS: u8 = 0x1C;

// External magnetometer on sensor-hub slave 0: six output bytes per hub
// cycle, read transactions, bus pull-ups on.
pub const CONFIG_SENSOR_HUB_MAG: &[AnyRegConfig] = &[
    AnyRegConfig {
        op: RegOp::Write,
        reg: UnifiedRegister::Main(MainReg::FuncCfgAccess),
        value: FuncCfgAccessMode::BankA as u8,
    },
    AnyRegConfig {
        op: RegOp::Write,
        reg: UnifiedRegister::BankA(BankAReg::Slv0Add),
        value: (MAG_SLAVE_ADDRESS << 1) | 0x01,
    },
    AnyRegConfig {
        op: RegOp::Write,
        reg: UnifiedRegister::BankA(BankAReg::Slv0Subadd),
        value: 0x28, // magnetometer OUT_X_L
    },
    AnyRegConfig {
        op: RegOp::Write,
        reg: UnifiedRegister::BankA(BankAReg::Slave0Config),
        value: 0x06,
    },
    AnyRegConfig {
        op: RegOp::Write,
        reg: UnifiedRegister::Main(MainReg::FuncCfgAccess),
        value: FuncCfgAccessMode::User as u8,
    },
    AnyRegConfig {
        op: RegOp::Write,
        reg: UnifiedRegister::Main(MainReg::MasterConfig),
        value: MasterConfigFlags::PULL_UP_EN.bits() | MasterConfigFlags::MASTER_ON.bits(),
    },
];
