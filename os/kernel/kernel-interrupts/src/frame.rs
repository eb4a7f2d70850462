use core::fmt;

/// Register state saved by the ISR stubs.
///
/// The layout is fixed by the assembly: the stub pushes the vector number
/// and an error code (a dummy `0` for vectors without one), then `pushad`,
/// then `ds`. The CPU itself pushed `eip`, `cs` and `eflags` before, plus
/// `useresp` and `ss` on a privilege change only.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct InterruptFrame {
    pub ds: u32,

    // pushad
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,

    pub vector: u32,
    pub err_code: u32,

    // pushed by the CPU
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub useresp: u32,
    pub ss: u32,
}

const _: () = assert!(size_of::<InterruptFrame>() == 16 * 4);

impl InterruptFrame {
    /// An otherwise empty frame for `vector`, handy for synthetic dispatch.
    #[must_use]
    pub const fn for_vector(vector: u8) -> Self {
        Self {
            ds: 0,
            edi: 0,
            esi: 0,
            ebp: 0,
            esp: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            vector: vector as u32,
            err_code: 0,
            eip: 0,
            cs: 0,
            eflags: 0,
            useresp: 0,
            ss: 0,
        }
    }

    /// The vector number as pushed by the stub.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn vector(&self) -> u8 {
        self.vector as u8
    }
}

impl fmt::Display for InterruptFrame {
    /// Multi-line register dump for fatal diagnostics.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "vector={} err={:#010x} eip={:#010x} cs={:#06x} eflags={:#010x}",
            self.vector, self.err_code, self.eip, self.cs, self.eflags
        )?;
        writeln!(
            f,
            "eax={:#010x} ebx={:#010x} ecx={:#010x} edx={:#010x}",
            self.eax, self.ebx, self.ecx, self.edx
        )?;
        write!(
            f,
            "esi={:#010x} edi={:#010x} ebp={:#010x} esp={:#010x} user_esp={:#010x} ds={:#06x} ss={:#06x}",
            self.esi, self.edi, self.ebp, self.esp, self.useresp, self.ds, self.ss
        )
    }
}
