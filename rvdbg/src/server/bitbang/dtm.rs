//! RISC-V debug transport module behind the bitbang TAP.
//!
//! The DMI register is mapped onto register accesses of the session's
//! [`DebugContext`], so a debugger talking to the TAP reaches the debug
//! module of the selected hart.

use bitfield::bitfield;

use crate::config::JtagTapConfig;
use crate::dsu::DebugContext;
use crate::registers::{DebugRegister, Dmcontrol};

use super::tap::DataRegisters;

/// Instruction selecting the IDCODE register.
pub const IDCODE: u32 = 0x01;

/// Instruction selecting `dtmcs`.
pub const DTMCS: u32 = 0x10;

/// Instruction selecting `dmi`.
pub const DMI: u32 = 0x11;

const DTMCS_WIDTH: u32 = 32;

/// Offset of the `address` field in the `dmi` JTAG register.
const DMI_ADDRESS_BIT_OFFSET: u32 = 34;

/// Offset of the `value` field in the `dmi` JTAG register.
const DMI_VALUE_BIT_OFFSET: u32 = 2;

const DMI_OP_MASK: u128 = 0x3;

/// Version 0.13 of the debug specification.
const DTM_VERSION: u32 = 1;

bitfield! {
    /// The `dtmcs` register.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Dtmcs(u32);
    impl Debug;

    pub dmihardreset, set_dmihardreset: 17;
    pub dmireset, set_dmireset: 16;
    pub idle, set_idle: 14, 12;
    pub dmistat, set_dmistat: 11, 10;
    pub abits, set_abits: 9, 4;
    pub version, set_version: 3, 0;
}

impl From<u32> for Dtmcs {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dtmcs> for u32 {
    fn from(register: Dtmcs) -> Self {
        register.0
    }
}

/// Status reported in the `op` field of `dmi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmiOperationStatus {
    Ok = 0,
    OperationFailed = 2,
}

/// Operation requested in the `op` field of `dmi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmiOperation {
    NoOp,
    Read { address: u32 },
    Write { address: u32, value: u32 },
}

impl DmiOperation {
    fn parse(value: u128, abits: u32) -> Option<Self> {
        let address = ((value >> DMI_ADDRESS_BIT_OFFSET) & ((1 << abits) - 1)) as u32;
        let data = (value >> DMI_VALUE_BIT_OFFSET) as u32;

        match value & DMI_OP_MASK {
            0 => Some(Self::NoOp),
            1 => Some(Self::Read { address }),
            2 => Some(Self::Write {
                address,
                value: data,
            }),
            _ => None,
        }
    }
}

/// The registers of a debug transport module.
#[derive(Debug)]
pub struct Dtm {
    context: DebugContext,
    config: JtagTapConfig,
    status: DmiOperationStatus,
    address: u32,
    data: u32,
}

impl Dtm {
    pub fn new(config: JtagTapConfig, context: DebugContext) -> Self {
        Self {
            context,
            config,
            status: DmiOperationStatus::Ok,
            address: 0,
            data: 0,
        }
    }

    pub fn context(&self) -> &DebugContext {
        &self.context
    }

    pub fn status(&self) -> DmiOperationStatus {
        self.status
    }

    fn abits(&self) -> u32 {
        self.config.abits.clamp(1, 32)
    }

    fn dtmcs(&self) -> Dtmcs {
        let mut dtmcs = Dtmcs(0);
        dtmcs.set_version(DTM_VERSION);
        dtmcs.set_abits(self.abits());
        dtmcs.set_dmistat(self.status as u32);
        dtmcs.set_idle(self.config.idle.min(7));
        dtmcs
    }

    fn dmi(&self) -> u128 {
        ((self.address as u128) << DMI_ADDRESS_BIT_OFFSET)
            | ((self.data as u128) << DMI_VALUE_BIT_OFFSET)
            | self.status as u128
    }

    fn write_dtmcs(&mut self, dtmcs: Dtmcs) {
        if dtmcs.dmireset() || dtmcs.dmihardreset() {
            tracing::debug!("DMI error cleared");
            self.status = DmiOperationStatus::Ok;
        }
    }

    fn write_dmi(&mut self, value: u128) {
        // An error is sticky until it is cleared through dtmcs.
        if self.status != DmiOperationStatus::Ok {
            return;
        }

        let Some(operation) = DmiOperation::parse(value, self.abits()) else {
            tracing::warn!("Reserved DMI operation");
            return;
        };

        match operation {
            DmiOperation::NoOp => {}
            DmiOperation::Read { address } => {
                self.address = address;
                let Some(register) = self.register(address) else {
                    return;
                };
                match self.context.try_read_register(register) {
                    Ok(value) => self.data = value as u32,
                    Err(e) => {
                        tracing::warn!("DMI read of {address:#x} failed: {e}");
                        self.status = DmiOperationStatus::OperationFailed;
                    }
                }
            }
            DmiOperation::Write { address, value } => {
                self.address = address;
                self.data = value;
                let Some(register) = self.register(address) else {
                    return;
                };
                if register == Dmcontrol::ADDRESS {
                    self.follow_hartsel(Dmcontrol::from(value));
                }
                if let Err(e) = self.context.try_write_register(register, value as u64) {
                    tracing::warn!("DMI write of {address:#x} failed: {e}");
                    self.status = DmiOperationStatus::OperationFailed;
                }
            }
        }
    }

    /// Debug register addressed by a DMI access, failing the operation if
    /// the address is out of range.
    fn register(&mut self, address: u32) -> Option<u16> {
        let register = u16::try_from(address).ok();
        if register.is_none() {
            tracing::warn!("DMI address {address:#x} is out of range");
            self.status = DmiOperationStatus::OperationFailed;
        }
        register
    }

    /// Route the following accesses to the hart a `dmcontrol` write selects.
    fn follow_hartsel(&mut self, control: Dmcontrol) {
        let hart = control.hartsel();
        if hart < self.context.dsu().hart_count() && hart != self.context.selection().current()
        {
            let _ = self.context.select(hart);
        }
    }
}

impl DataRegisters for Dtm {
    fn reset_instruction(&self) -> u32 {
        IDCODE
    }

    fn width(&self, instruction: u32) -> u32 {
        match instruction {
            IDCODE | DTMCS => DTMCS_WIDTH,
            DMI => self.abits() + DMI_ADDRESS_BIT_OFFSET,
            _ => 1,
        }
    }

    fn capture(&mut self, instruction: u32) -> u128 {
        match instruction {
            IDCODE => self.config.idcode as u128,
            DTMCS => u32::from(self.dtmcs()) as u128,
            DMI => self.dmi(),
            _ => 0,
        }
    }

    fn update(&mut self, instruction: u32, value: u128) {
        match instruction {
            DTMCS => self.write_dtmcs(Dtmcs(value as u32)),
            DMI => self.write_dmi(value),
            _ => {}
        }
    }
}
