//! IM401 register map
//!
//! Register addresses, the status value domains the host understands, and the
//! ordered control sequences each mode transition writes.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const RESET: u32 = 0x00;
pub const ANA_CIRCUIT_CTRL_LDO1: u32 = 0x02;
pub const ANA_CIRCUIT_CTRL_LDO2: u32 = 0x03;
pub const ANA_CIRCUIT_CTRL_LDO3: u32 = 0x04;
pub const ANA_CIRCUIT_CTRL_ADC1_1: u32 = 0x05;
pub const ANA_CIRCUIT_CTRL_ADC1_2: u32 = 0x06;
pub const ANA_CIRCUIT_CTRL_ADC2_1: u32 = 0x07;
pub const ANA_CIRCUIT_CTRL_ADC2_2: u32 = 0x08;
pub const ANA_CIRCUIT_CTRL_ADC2_3: u32 = 0x09;
pub const ANA_CIRCUIT_CTRL_MICBST: u32 = 0x0a;
pub const ANA_CIRCUIT_CTRL_ADCFED: u32 = 0x0b;
pub const ANA_CIRCUIT_CTRL_INPUTBUF: u32 = 0x0c;
pub const ANA_CIRCUIT_CTRL_VREF: u32 = 0x0d;
pub const ANA_CIRCUIT_CTRL_MBIAS: u32 = 0x0e;
pub const AD_DIG_FILTER_CTRL1: u32 = 0x2a;
pub const AD_DIG_FILTER_CTRL2: u32 = 0x2b;
pub const DFT_BIST_SCAN: u32 = 0x2c;
pub const UPFILTER_CTRL1: u32 = 0x2d;
pub const UPFILTER_CTRL2: u32 = 0x2e;
pub const GPIO_CTRL1: u32 = 0x40;
pub const GPIO_CTRL2: u32 = 0x41;
pub const GPIO_CTRL3: u32 = 0x42;
pub const GPIO_STATUS: u32 = 0x43;
pub const DIG_PAD_CTRL1: u32 = 0x44;
pub const DIG_PAD_CTRL2: u32 = 0x45;
pub const DMIC_DATA_CTRL: u32 = 0x46;
pub const TEST_MODE_CTRL1: u32 = 0x4c;
pub const TEST_MODE_CTRL2: u32 = 0x4d;
pub const TEST_MODE_CTRL3: u32 = 0x4e;
pub const VAD_CTRL1: u32 = 0x50;
pub const VAD_CTRL2: u32 = 0x51;
pub const VAD_CTRL3: u32 = 0x52;
pub const VAD_CTRL4: u32 = 0x53;
pub const VAD_STATUS1: u32 = 0x54;
pub const VAD_STATUS2: u32 = 0x55;
pub const BUF_SRAM_CTRL1: u32 = 0x57;
pub const BUF_SRAM_CTRL2: u32 = 0x58;
pub const BUF_SRAM_CTRL3: u32 = 0x59;
pub const BUF_SRAM_CTRL4: u32 = 0x5a;
pub const BUF_SRAM_CTRL5: u32 = 0x5b;
pub const BUF_SRAM_CTRL6: u32 = 0x5c;
pub const BUF_SRAM_CTRL7: u32 = 0x5d;
pub const AUTO_MODE_CTRL: u32 = 0x60;
pub const PWR_ANLG1: u32 = 0x61;
pub const PWR_ANLG2: u32 = 0x62;
pub const PWR_DIG: u32 = 0x64;
pub const PWR_DSP: u32 = 0x65;
pub const PRIV_INDEX: u32 = 0x6a;
pub const PRIV_DATA: u32 = 0x6c;
pub const BUF_MODE_CTRL_PLL_CAL1: u32 = 0x73;
pub const BUF_MODE_CTRL_PLL_CAL2: u32 = 0x74;
pub const BUF_MODE_CTRL_PLL_CAL3: u32 = 0x75;
pub const BUF_MODE_CTRL_PLL_CAL4: u32 = 0x76;
pub const BUF_MODE_CTRL_PLL_CAL5: u32 = 0x78;
pub const BUF_MODE_CTRL_PLL_CAL6: u32 = 0x79;
pub const KEY_FHRASE_CTRL_AVD: u32 = 0x7b;
pub const AUTO_CLK_SEL_STATUS1: u32 = 0x7c;
pub const AUTO_CLK_SEL_STATUS2: u32 = 0x7d;
pub const AUTO_CLK_SEL_STATUS3: u32 = 0x7e;
pub const AUTO_CLK_SEL_STATUS4: u32 = 0x7f;
pub const PLL_CLOCK_CTRL1: u32 = 0x80;
pub const PLL_CLOCK_CTRL2: u32 = 0x81;
pub const PLL_CLOCK_CTRL3: u32 = 0x82;
pub const PLL_CAL_CTRL1: u32 = 0x83;
pub const PLL_CAL_CTRL2: u32 = 0x84;
pub const PLL_CAL_CTRL3: u32 = 0x85;
pub const PLL_CAL_CTRL4: u32 = 0x86;
pub const PLL_CAL_CTRL5: u32 = 0x87;
pub const PLL_CAL_CTRL6: u32 = 0x88;
pub const PLL_CAL_CTRL7: u32 = 0x89;
pub const PLL_CAL_CTRL8: u32 = 0x8a;
pub const PLL_CAL_CTRL9: u32 = 0x8b;
pub const PLL_CAL_STATUS1: u32 = 0x8c;
pub const PLL_CAL_STATUS2: u32 = 0x8d;
pub const PLL_CAL_STATUS3: u32 = 0x8e;
pub const DSP_CTRL1: u32 = 0x90;
pub const DSP_CTRL2: u32 = 0x91;
pub const DSP_CTRL3: u32 = 0x92;
pub const DSP_CTRL4: u32 = 0x93;
pub const DSP_CTRL5: u32 = 0x94;
pub const DSP_CTRL6: u32 = 0x95;
pub const DSP_CTRL7: u32 = 0x96;
pub const DSP_CTRL8: u32 = 0x97;
pub const DSP_CTRL9: u32 = 0x98;
pub const DSP_CTRL10: u32 = 0x99;
pub const DSP_CTRL11: u32 = 0x9a;
pub const DSP_CTRL12: u32 = 0x9b;
pub const DSP_CTRL13: u32 = 0x9c;
pub const DSP_CTRL14: u32 = 0x9d;
pub const DSP_CTRL15: u32 = 0x9e;
pub const PLL_CLK_EXT_CTRL1: u32 = 0xc0;
pub const PLL_CLK_EXT_CTRL2: u32 = 0xc1;
pub const ADC_EXT_CTRL1: u32 = 0xc2;
pub const DUMMY_RTK1: u32 = 0xd0;
pub const DUMMY_RTK2: u32 = 0xd1;
pub const DUMMY_RTK3: u32 = 0xd2;
pub const DUMMY_RTK4: u32 = 0xd3;
pub const DUMMY_RTK5: u32 = 0xd4;
pub const DUMMY_RTK6: u32 = 0xd5;
pub const DUMMY_RTK7: u32 = 0xd6;
pub const DUMMY_RTK8: u32 = 0xd7;
pub const DUMMY_RTK9: u32 = 0xd8;
pub const DUMMY_RTK10: u32 = 0xd9;
pub const DUMMY_RTK11: u32 = 0xda;
pub const DUMMY_RTK12: u32 = 0xdb;
pub const DUMMY_RTK13: u32 = 0xdc;
pub const DUMMY_RTK14: u32 = 0xdd;
pub const DUMMY_RTK15: u32 = 0xde;
pub const DUMMY_RTK16: u32 = 0xdf;
pub const DUMMY_CUSTOMER1: u32 = 0xe0;
pub const DUMMY_CUSTOMER2: u32 = 0xe1;
pub const DUMMY_CUSTOMER3: u32 = 0xe2;
pub const DUMMY_CUSTOMER4: u32 = 0xe3;
pub const DUMMY_CUSTOMER5: u32 = 0xe4;
pub const DUMMY_CUSTOMER6: u32 = 0xe5;
pub const DUMMY_CUSTOMER7: u32 = 0xe6;
pub const DUMMY_CUSTOMER8: u32 = 0xe7;
pub const DUMMY_CUSTOMER9: u32 = 0xe8;
pub const DUMMY_CUSTOMER10: u32 = 0xe9;
pub const DUMMY_CUSTOMER11: u32 = 0xea;
pub const DUMMY_CUSTOMER12: u32 = 0xeb;
pub const DUMMY_CUSTOMER13: u32 = 0xec;
pub const DUMMY_CUSTOMER14: u32 = 0xed;
pub const DUMMY_CUSTOMER15: u32 = 0xee;
pub const DUMMY_CUSTOMER16: u32 = 0xef;
pub const DSP_MEM_CTRL1: u32 = 0xf0;
pub const DSP_MEM_CTRL2: u32 = 0xf1;
pub const DSP_MEM_CTRL3: u32 = 0xf2;
pub const DSP_MEM_CTRL4: u32 = 0xf3;
pub const DSP_MEM_CTRL5: u32 = 0xf4;
pub const DSP_MEM_CTRL6: u32 = 0xf7;
pub const DSP_MEM_CTRL7: u32 = 0xf8;
pub const DUMMY1: u32 = 0xfa;
pub const DUMMY2: u32 = 0xfb;
pub const DUMMY3: u32 = 0xfc;
pub const VENDOR_ID: u32 = 0xfd;
pub const VENDOR_ID1: u32 = 0xfe;
pub const VENDOR_ID2: u32 = 0xff;

/// Number of registers covered by the diagnostic dump
pub const DUMP_REGISTER_COUNT: usize = 138;

/// Registers read by the diagnostic dump, in output order
pub static DUMP_REGISTERS: [u32; DUMP_REGISTER_COUNT] = [
    RESET, ANA_CIRCUIT_CTRL_LDO1, ANA_CIRCUIT_CTRL_LDO2, ANA_CIRCUIT_CTRL_LDO3,
    ANA_CIRCUIT_CTRL_ADC1_1, ANA_CIRCUIT_CTRL_ADC1_2, ANA_CIRCUIT_CTRL_ADC2_1,
    ANA_CIRCUIT_CTRL_ADC2_2, ANA_CIRCUIT_CTRL_ADC2_3, ANA_CIRCUIT_CTRL_MICBST,
    ANA_CIRCUIT_CTRL_ADCFED, ANA_CIRCUIT_CTRL_INPUTBUF, ANA_CIRCUIT_CTRL_VREF,
    ANA_CIRCUIT_CTRL_MBIAS, AD_DIG_FILTER_CTRL1, AD_DIG_FILTER_CTRL2, DFT_BIST_SCAN,
    UPFILTER_CTRL1, UPFILTER_CTRL2, GPIO_CTRL1, GPIO_CTRL2, GPIO_CTRL3, GPIO_STATUS,
    DIG_PAD_CTRL1, DIG_PAD_CTRL2, DMIC_DATA_CTRL, TEST_MODE_CTRL1, TEST_MODE_CTRL2,
    TEST_MODE_CTRL3, VAD_CTRL1, VAD_CTRL2, VAD_CTRL3, VAD_CTRL4, VAD_STATUS1, VAD_STATUS2,
    BUF_SRAM_CTRL1, BUF_SRAM_CTRL2, BUF_SRAM_CTRL3, BUF_SRAM_CTRL4, BUF_SRAM_CTRL5,
    BUF_SRAM_CTRL6, BUF_SRAM_CTRL7, AUTO_MODE_CTRL, PWR_ANLG1, PWR_ANLG2, PWR_DIG, PWR_DSP,
    PRIV_INDEX, PRIV_DATA, BUF_MODE_CTRL_PLL_CAL1, BUF_MODE_CTRL_PLL_CAL2,
    BUF_MODE_CTRL_PLL_CAL3, BUF_MODE_CTRL_PLL_CAL4, BUF_MODE_CTRL_PLL_CAL5,
    BUF_MODE_CTRL_PLL_CAL6, KEY_FHRASE_CTRL_AVD, AUTO_CLK_SEL_STATUS1, AUTO_CLK_SEL_STATUS2,
    AUTO_CLK_SEL_STATUS3, AUTO_CLK_SEL_STATUS4, PLL_CLOCK_CTRL1, PLL_CLOCK_CTRL2,
    PLL_CLOCK_CTRL3, PLL_CAL_CTRL1, PLL_CAL_CTRL2, PLL_CAL_CTRL3, PLL_CAL_CTRL4, PLL_CAL_CTRL5,
    PLL_CAL_CTRL6, PLL_CAL_CTRL7, PLL_CAL_CTRL8, PLL_CAL_CTRL9, PLL_CAL_STATUS1,
    PLL_CAL_STATUS2, PLL_CAL_STATUS3, DSP_CTRL1, DSP_CTRL2, DSP_CTRL3, DSP_CTRL4, DSP_CTRL5,
    DSP_CTRL6, DSP_CTRL7, DSP_CTRL8, DSP_CTRL9, DSP_CTRL10, DSP_CTRL11, DSP_CTRL12, DSP_CTRL13,
    DSP_CTRL14, DSP_CTRL15, PLL_CLK_EXT_CTRL1, PLL_CLK_EXT_CTRL2, ADC_EXT_CTRL1, DUMMY_RTK1,
    DUMMY_RTK2, DUMMY_RTK3, DUMMY_RTK4, DUMMY_RTK5, DUMMY_RTK6, DUMMY_RTK7, DUMMY_RTK8,
    DUMMY_RTK9, DUMMY_RTK10, DUMMY_RTK11, DUMMY_RTK12, DUMMY_RTK13, DUMMY_RTK14, DUMMY_RTK15,
    DUMMY_RTK16, DUMMY_CUSTOMER1, DUMMY_CUSTOMER2, DUMMY_CUSTOMER3, DUMMY_CUSTOMER4,
    DUMMY_CUSTOMER5, DUMMY_CUSTOMER6, DUMMY_CUSTOMER7, DUMMY_CUSTOMER8, DUMMY_CUSTOMER9,
    DUMMY_CUSTOMER10, DUMMY_CUSTOMER11, DUMMY_CUSTOMER12, DUMMY_CUSTOMER13, DUMMY_CUSTOMER14,
    DUMMY_CUSTOMER15, DUMMY_CUSTOMER16, DSP_MEM_CTRL1, DSP_MEM_CTRL2, DSP_MEM_CTRL3,
    DSP_MEM_CTRL4, DSP_MEM_CTRL5, DSP_MEM_CTRL6, DSP_MEM_CTRL7, DUMMY1, DUMMY2, DUMMY3,
    VENDOR_ID, VENDOR_ID1, VENDOR_ID2,
];

/// Firmware state register written by the DSP once it has booted
pub const FW_STATUS: u32 = DUMMY_CUSTOMER1;
pub const FW_STATUS_MASK: u8 = 0xff;
pub const FW_STATUS_SHIFT: u8 = 0;

/// Interrupt status latched by the DSP when a trigger fires
pub const IRQ_STATUS: u32 = GPIO_STATUS;
pub const IRQ_CLEAR: u8 = 0x00;

/// Firmware state reported through [`FW_STATUS`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FwStatus {
    NotReady,
    InitSuccess,
    /// Training data did not fit the DSP memory reserved for it
    TdOversize,
    Trap,
}

impl FwStatus {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match (raw & FW_STATUS_MASK) >> FW_STATUS_SHIFT {
            0x0 => Some(Self::NotReady),
            0x1 => Some(Self::InitSuccess),
            0x2 => Some(Self::TdOversize),
            0x3 => Some(Self::Trap),
            _ => None,
        }
    }
}

impl fmt::Display for FwStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotReady => "not ready",
            Self::InitSuccess => "init success",
            Self::TdOversize => "training data oversize",
            Self::Trap => "trap",
        };
        f.write_str(name)
    }
}

/// Trigger state reported through [`IRQ_STATUS`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IrqStatus {
    Idle,
    Triggered,
}

impl IrqStatus {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x0 => Some(Self::Idle),
            0x1 => Some(Self::Triggered),
            _ => None,
        }
    }
}

/// Single-byte register write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegWrite {
    pub register: u32,
    pub value: u8,
}

const fn w(register: u32, value: u8) -> RegWrite {
    RegWrite { register, value }
}

pub static START_ONESHOT: &[RegWrite] = &[w(DSP_CTRL1, 0x01), w(GPIO_CTRL1, 0x01)];

pub static STOP_ONESHOT: &[RegWrite] = &[
    w(GPIO_CTRL1, 0x00),
    w(DSP_CTRL1, 0x00),
    w(IRQ_STATUS, IRQ_CLEAR),
];

pub static START_LISTENING: &[RegWrite] = &[w(AUTO_MODE_CTRL, 0x01), w(GPIO_CTRL1, 0x01)];

pub static STOP_LISTENING: &[RegWrite] = &[w(GPIO_CTRL1, 0x00), w(AUTO_MODE_CTRL, 0x00)];

pub static FACTORY_ENTER: &[RegWrite] = &[w(TEST_MODE_CTRL1, 0x01)];

pub static FACTORY_QUIT: &[RegWrite] = &[w(TEST_MODE_CTRL1, 0x00)];

pub static IRQ_RESET: &[RegWrite] = &[w(IRQ_STATUS, IRQ_CLEAR)];

/// Hard reset: clears the register file and powers the DSP down
pub static BOOST_RESET: &[RegWrite] = &[w(RESET, 0x00), w(PWR_DSP, 0x00)];
