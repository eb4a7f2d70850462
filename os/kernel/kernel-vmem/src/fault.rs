use crate::Mmu;
use bitfield_struct::bitfield;
use kernel_interrupts::{InterruptFrame, InterruptHandler};

/// Page-fault error code layout (32-bit x86).
///
/// Pushed by the processor with exception 14.
/// Reference: Intel SDM Vol. 3A, §6.15 "Page-Fault Exception (#PF)".
#[bitfield(u32)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor.
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = a reserved bit was set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch.
    pub instruction_fetch: bool, // bit 4

    #[bits(27)]
    __: u32,
}

impl PageFaultError {
    /// Who accessed what, and whether the page was missing or protected.
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        match (self.user(), self.write(), self.present()) {
            (false, false, false) => "Supervisory process tried to read a non-present page entry",
            (false, false, true) => {
                "Supervisory process tried to read a page and caused a protection fault"
            }
            (false, true, false) => "Supervisory process tried to write to a non-present page entry",
            (false, true, true) => {
                "Supervisory process tried to write a page and caused a protection fault"
            }
            (true, false, false) => "User process tried to read a non-present page entry",
            (true, false, true) => "User process tried to read a page and caused a protection fault",
            (true, true, false) => "User process tried to write to a non-present page entry",
            (true, true, true) => "User process tried to write a page and caused a protection fault",
        }
    }

    /// The secondary causes: instruction fetch and reserved bits.
    #[must_use]
    pub const fn extra(&self) -> &'static str {
        match (self.instruction_fetch(), self.reserved_bit()) {
            (false, false) => {
                "Page Fault was not caused by an instruction fetch or overwrite of reserved bits"
            }
            (true, false) => "Page Fault was caused by an instruction fetch",
            (false, true) => "Page Fault was caused by an overwrite of reserved bits",
            (true, true) => {
                "Page Fault was caused by both an instruction fetch and an overwrite of reserved bits"
            }
        }
    }
}

/// Handler for exception 14. Every page fault is fatal.
pub struct PageFaultHandler<M> {
    mmu: M,
}

impl<M: Mmu> PageFaultHandler<M> {
    pub const fn new(mmu: M) -> Self {
        Self { mmu }
    }
}

impl<M: Mmu + Sync> InterruptHandler for PageFaultHandler<M> {
    fn handle(&self, frame: &mut InterruptFrame) {
        let address = self.mmu.fault_address();
        let error = PageFaultError::from_bits(frame.err_code);
        log::error!("page fault at {address} (error code {:#x})", error.into_bits());
        panic!(
            "Page fault at {address}: {}. {}.\n{frame}",
            error.explain(),
            error.extra()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

    struct FaultAt(u32);

    impl Mmu for FaultAt {
        fn page_directory_base(&self) -> PhysicalAddress {
            PhysicalAddress::zero()
        }
        unsafe fn load_page_directory(&self, _base: PhysicalAddress) {}
        unsafe fn enable_paging(&self) {}
        fn invalidate_page(&self, _va: VirtualAddress) {}
        fn fault_address(&self) -> VirtualAddress {
            VirtualAddress::new(self.0)
        }
    }

    #[test]
    fn explains_every_access_kind() {
        let e = PageFaultError::from_bits(0b000);
        assert_eq!(e.explain(), "Supervisory process tried to read a non-present page entry");
        let e = PageFaultError::from_bits(0b011);
        assert_eq!(
            e.explain(),
            "Supervisory process tried to write a page and caused a protection fault"
        );
        let e = PageFaultError::from_bits(0b101);
        assert_eq!(e.explain(), "User process tried to read a page and caused a protection fault");
        let e = PageFaultError::from_bits(0b110);
        assert_eq!(e.explain(), "User process tried to write to a non-present page entry");
    }

    #[test]
    fn instruction_fetch_is_bit_four() {
        let e = PageFaultError::from_bits(0x10);
        assert!(e.instruction_fetch());
        assert_eq!(e.extra(), "Page Fault was caused by an instruction fetch");
        let e = PageFaultError::from_bits(0x18);
        assert_eq!(
            e.extra(),
            "Page Fault was caused by both an instruction fetch and an overwrite of reserved bits"
        );
        assert_eq!(
            PageFaultError::from_bits(0).extra(),
            "Page Fault was not caused by an instruction fetch or overwrite of reserved bits"
        );
    }

    #[test]
    #[should_panic(expected = "Supervisory process tried to write to a non-present page entry")]
    fn handler_is_fatal() {
        let handler = PageFaultHandler::new(FaultAt(0xDEAD_B000));
        let mut frame = InterruptFrame::for_vector(14);
        frame.err_code = 0b010;
        handler.handle(&mut frame);
    }

    #[test]
    #[should_panic(expected = "Page fault at 0xDEADB000")]
    fn handler_reports_cr2() {
        let handler = PageFaultHandler::new(FaultAt(0xDEAD_B000));
        let mut frame = InterruptFrame::for_vector(14);
        handler.handle(&mut frame);
    }
}
