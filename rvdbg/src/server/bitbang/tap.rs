//! A JTAG test access port driven pin by pin.

/// The 16 states of the TAP controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapState {
    TestLogicReset,
    RunTestIdle,
    SelectDrScan,
    CaptureDr,
    ShiftDr,
    Exit1Dr,
    PauseDr,
    Exit2Dr,
    UpdateDr,
    SelectIrScan,
    CaptureIr,
    ShiftIr,
    Exit1Ir,
    PauseIr,
    Exit2Ir,
    UpdateIr,
}

impl TapState {
    /// The state entered on a rising TCK edge with `tms`.
    pub fn next(self, tms: bool) -> Self {
        match (self, tms) {
            (Self::TestLogicReset, false) => Self::RunTestIdle,
            (Self::TestLogicReset, true) => Self::TestLogicReset,
            (Self::RunTestIdle, false) => Self::RunTestIdle,
            (Self::RunTestIdle, true) => Self::SelectDrScan,
            (Self::SelectDrScan, false) => Self::CaptureDr,
            (Self::SelectDrScan, true) => Self::SelectIrScan,
            (Self::CaptureDr, false) => Self::ShiftDr,
            (Self::CaptureDr, true) => Self::Exit1Dr,
            (Self::ShiftDr, false) => Self::ShiftDr,
            (Self::ShiftDr, true) => Self::Exit1Dr,
            (Self::Exit1Dr, false) => Self::PauseDr,
            (Self::Exit1Dr, true) => Self::UpdateDr,
            (Self::PauseDr, false) => Self::PauseDr,
            (Self::PauseDr, true) => Self::Exit2Dr,
            (Self::Exit2Dr, false) => Self::ShiftDr,
            (Self::Exit2Dr, true) => Self::UpdateDr,
            (Self::UpdateDr, false) => Self::RunTestIdle,
            (Self::UpdateDr, true) => Self::SelectDrScan,
            (Self::SelectIrScan, false) => Self::CaptureIr,
            (Self::SelectIrScan, true) => Self::TestLogicReset,
            (Self::CaptureIr, false) => Self::ShiftIr,
            (Self::CaptureIr, true) => Self::Exit1Ir,
            (Self::ShiftIr, false) => Self::ShiftIr,
            (Self::ShiftIr, true) => Self::Exit1Ir,
            (Self::Exit1Ir, false) => Self::PauseIr,
            (Self::Exit1Ir, true) => Self::UpdateIr,
            (Self::PauseIr, false) => Self::PauseIr,
            (Self::PauseIr, true) => Self::Exit2Ir,
            (Self::Exit2Ir, false) => Self::ShiftIr,
            (Self::Exit2Ir, true) => Self::UpdateIr,
            (Self::UpdateIr, false) => Self::RunTestIdle,
            (Self::UpdateIr, true) => Self::SelectDrScan,
        }
    }
}

/// The data registers behind a TAP, selected by the current instruction.
pub trait DataRegisters {
    /// Instruction loaded in Test-Logic-Reset.
    fn reset_instruction(&self) -> u32;

    /// Length in bits of the register selected by `instruction`, at least 1.
    fn width(&self, instruction: u32) -> u32;

    /// Value loaded into the shift register in Capture-DR.
    fn capture(&mut self, instruction: u32) -> u128;

    /// Called in Update-DR with the shifted in value.
    fn update(&mut self, instruction: u32, value: u128);
}

/// Shift register, LSB first out, new bits enter at the top.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ShiftRegister {
    value: u128,
    len: u32,
}

impl ShiftRegister {
    fn load(&mut self, value: u128, len: u32) {
        self.len = len.clamp(1, u128::BITS);
        self.value = value & mask(self.len);
    }

    fn out(&self) -> bool {
        self.value & 1 != 0
    }

    fn shift(&mut self, tdi: bool) {
        self.value >>= 1;
        if tdi {
            self.value |= 1 << (self.len - 1);
        }
    }
}

fn mask(len: u32) -> u128 {
    u128::MAX.checked_shr(u128::BITS - len).unwrap_or(0)
}

/// Pin level TAP model in front of a set of data registers.
#[derive(Debug)]
pub struct JtagTap<R> {
    state: TapState,
    ir_len: u32,
    instruction: u32,
    ir: ShiftRegister,
    dr: ShiftRegister,
    tck: bool,
    registers: R,
}

impl<R: DataRegisters> JtagTap<R> {
    pub fn new(ir_len: u32, registers: R) -> Self {
        let mut tap = Self {
            state: TapState::TestLogicReset,
            ir_len: ir_len.clamp(1, 32),
            instruction: 0,
            ir: ShiftRegister::default(),
            dr: ShiftRegister::default(),
            tck: false,
            registers,
        };
        tap.reset();
        tap
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    pub fn registers(&self) -> &R {
        &self.registers
    }

    /// Asynchronous reset through TRST.
    pub fn reset(&mut self) {
        self.state = TapState::TestLogicReset;
        self.instruction = self.registers.reset_instruction();
    }

    /// Current level of TDO.
    pub fn tdo(&self) -> bool {
        match self.state {
            TapState::ShiftDr => self.dr.out(),
            TapState::ShiftIr => self.ir.out(),
            _ => false,
        }
    }

    /// Drive the input pins. The TAP advances on a rising TCK edge.
    pub fn set_pins(&mut self, tck: bool, tms: bool, tdi: bool) {
        let rising = tck && !self.tck;
        self.tck = tck;
        if rising {
            self.clock(tms, tdi);
        }
    }

    fn clock(&mut self, tms: bool, tdi: bool) {
        match self.state {
            TapState::ShiftDr => self.dr.shift(tdi),
            TapState::ShiftIr => self.ir.shift(tdi),
            _ => {}
        }

        self.state = self.state.next(tms);

        match self.state {
            TapState::TestLogicReset => {
                self.instruction = self.registers.reset_instruction();
            }
            TapState::CaptureDr => {
                let width = self.registers.width(self.instruction);
                let value = self.registers.capture(self.instruction);
                self.dr.load(value, width);
            }
            TapState::UpdateDr => {
                self.registers.update(self.instruction, self.dr.value);
            }
            TapState::CaptureIr => {
                // Fixed 0b01 pattern in the two least significant bits.
                self.ir.load(0b01, self.ir_len);
            }
            TapState::UpdateIr => {
                self.instruction = (self.ir.value & mask(self.ir_len)) as u32;
                tracing::trace!("Instruction {:#x}", self.instruction);
            }
            _ => {}
        }
    }
}
