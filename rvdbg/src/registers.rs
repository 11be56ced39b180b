//! Debug module registers used for run-control.

use bitfield::bitfield;

/// A register of the debug module with a fixed address.
pub trait DebugRegister: Into<u32> + From<u32> {
    /// Address in the debug port's register space.
    const ADDRESS: u16;
    /// Name used in log messages.
    const NAME: &'static str;
}

/// Mask of one hart-select half in `dmcontrol`.
pub const HARTSEL_FIELD_MASK: u32 = 0x3ff;

bitfield! {
    /// `dmcontrol` register, located at address 0x10.
    ///
    /// Halt and resume requests for any hart go through this register. The
    /// hart they apply to is chosen by `hartsello`/`hartselhi`.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Dmcontrol(u32);
    impl Debug;

    pub haltreq, set_haltreq: 31;
    pub resumereq, set_resumereq: 30;
    pub hartreset, set_hartreset: 29;
    pub ackhavereset, set_ackhavereset: 28;
    pub hasel, set_hasel: 26;
    pub hartsello, set_hartsello: 25, 16;
    pub hartselhi, set_hartselhi: 15, 6;
    pub ndmreset, set_ndmreset: 1;
    pub dmactive, set_dmactive: 0;
}

impl Dmcontrol {
    /// Active `dmcontrol` value selecting `hart`.
    pub fn select(hart: usize) -> Self {
        let mut control = Dmcontrol(0);
        control.set_dmactive(true);
        control.set_hartsel(hart);
        control
    }

    /// Split `hart` over the low and high select fields.
    pub fn set_hartsel(&mut self, hart: usize) {
        let hart = hart as u32;
        self.set_hartsello(hart & HARTSEL_FIELD_MASK);
        self.set_hartselhi((hart >> 10) & HARTSEL_FIELD_MASK);
    }

    /// Hart index encoded in the select fields.
    pub fn hartsel(&self) -> usize {
        ((self.hartselhi() << 10) | self.hartsello()) as usize
    }
}

impl DebugRegister for Dmcontrol {
    const ADDRESS: u16 = 0x10;
    const NAME: &'static str = "dmcontrol";
}

impl From<Dmcontrol> for u32 {
    fn from(register: Dmcontrol) -> Self {
        register.0
    }
}

impl From<u32> for Dmcontrol {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

bitfield! {
    /// Readonly `dmstatus` register, located at address 0x11.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Dmstatus(u32);
    impl Debug;

    pub allhavereset, set_allhavereset: 19;
    pub anyhavereset, set_anyhavereset: 18;
    pub allresumeack, set_allresumeack: 17;
    pub anyresumeack, set_anyresumeack: 16;
    pub allnonexistent, set_allnonexistent: 15;
    pub anynonexistent, set_anynonexistent: 14;
    pub allrunning, set_allrunning: 11;
    pub anyrunning, set_anyrunning: 10;
    pub allhalted, set_allhalted: 9;
    pub anyhalted, set_anyhalted: 8;
    pub authenticated, set_authenticated: 7;
    pub version, set_version: 3, 0;
}

impl DebugRegister for Dmstatus {
    const ADDRESS: u16 = 0x11;
    const NAME: &'static str = "dmstatus";
}

impl From<u32> for Dmstatus {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dmstatus> for u32 {
    fn from(register: Dmstatus) -> Self {
        register.0
    }
}

#[cfg(test)]
mod test {
    use super::{DebugRegister, Dmcontrol};
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case(0, 0, 0; "hart zero")]
    #[test_case(2, 2, 0; "low field only")]
    #[test_case(0x3ff, 0x3ff, 0; "low field full")]
    #[test_case(0x400, 0, 1; "first high index")]
    #[test_case(0x0c05, 5, 3; "both fields")]
    fn hartsel_split(hart: usize, lo: u32, hi: u32) {
        let control = Dmcontrol::select(hart);

        assert_eq!(control.hartsello(), lo);
        assert_eq!(control.hartselhi(), hi);
        assert_eq!(control.hartsel(), hart);
        assert!(control.dmactive());
    }

    #[test]
    fn halt_request_layout() {
        let mut control = Dmcontrol::select(2);
        control.set_haltreq(true);

        assert_eq!(u32::from(control), (1 << 31) | (2 << 16) | 1);
        assert_eq!(Dmcontrol::ADDRESS, 0x10);
    }

    #[test]
    fn resume_request_layout() {
        let mut control = Dmcontrol::select(0x401);
        control.set_resumereq(true);

        assert_eq!(u32::from(control), (1 << 30) | (1 << 16) | (1 << 6) | 1);
    }
}
