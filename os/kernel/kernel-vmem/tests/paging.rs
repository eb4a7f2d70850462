use core::cell::{Cell, RefCell};
use core::ptr::NonNull;
use kernel_interrupts::{InterruptFrame, InterruptHandler, InterruptRegistry, vectors};
use kernel_memory_addresses::{PhysicalAddress, Size4M, VirtualAddress};
use kernel_vmem::{
    DirectoryEntry, Mmu, PageDirectory, PageDirectoryEntries, PageManager, PageTable,
    PagingError, PagingState, TableAlloc,
};

const MIB: u32 = 1024 * 1024;

/// Hands out leaked host allocations with made-up physical addresses
/// above the identity-mapped range.
struct HostTables {
    next_phys: u32,
}

impl HostTables {
    fn new() -> Self {
        Self {
            next_phys: 0x4000_0000,
        }
    }

    fn phys(&mut self, size: usize) -> PhysicalAddress {
        let pa = PhysicalAddress::new(self.next_phys);
        self.next_phys += u32::try_from(size.next_multiple_of(4096)).unwrap();
        pa
    }
}

impl TableAlloc for HostTables {
    fn alloc_table(&mut self) -> Option<(NonNull<PageTable>, PhysicalAddress)> {
        let table = NonNull::from(Box::leak(Box::new(PageTable::zeroed())));
        Some((table, self.phys(size_of::<PageTable>())))
    }

    fn alloc_directory(&mut self) -> Option<(NonNull<PageDirectory>, PhysicalAddress)> {
        let dir = NonNull::from(Box::leak(Box::new(PageDirectory::zeroed())));
        Some((dir, self.phys(size_of::<PageDirectory>())))
    }

    fn alloc_bitmap(&mut self, words: usize) -> Option<&'static mut [u32]> {
        Some(vec![0u32; words].leak())
    }
}

/// Records what the manager asked of the hardware.
#[derive(Default)]
struct RecordingMmu {
    cr3: Cell<u32>,
    paging: Cell<bool>,
    invalidated: RefCell<Vec<u32>>,
}

impl Mmu for RecordingMmu {
    fn page_directory_base(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.cr3.get())
    }

    unsafe fn load_page_directory(&self, base: PhysicalAddress) {
        self.cr3.set(base.as_u32());
    }

    unsafe fn enable_paging(&self) {
        self.paging.set(true);
    }

    fn invalidate_page(&self, va: VirtualAddress) {
        self.invalidated.borrow_mut().push(va.as_u32());
    }

    fn fault_address(&self) -> VirtualAddress {
        VirtualAddress::zero()
    }
}

#[derive(Default)]
struct Registry(Vec<u8>);

impl InterruptRegistry for Registry {
    fn register_interrupt_handler(&mut self, vector: u8, _handler: &'static dyn InterruptHandler) {
        self.0.push(vector);
    }
}

static FAULT: fn(&mut InterruptFrame) = |_| panic!("page fault");

fn active(
    memory: u32,
    bootstrap: Option<&PageDirectoryEntries>,
) -> PageManager<HostTables, RecordingMmu> {
    let mut pm = PageManager::new(HostTables::new(), RecordingMmu::default());
    let mut registry = Registry::default();
    unsafe { pm.page_init(memory, &mut registry, &FAULT, bootstrap) }.unwrap();
    assert_eq!(registry.0, vec![vectors::PAGE_FAULT]);
    pm
}

#[test]
fn page_init_identity_maps_all_ram() {
    let pm = active(8 * MIB, None);
    assert_eq!(pm.frame_count(), 2048);
    assert_eq!(pm.used_frames(), 2048);

    let kernel = unsafe { pm.kernel_directory().unwrap().as_ref() };
    for addr in [0, 0x1000, 0x0012_3456, 8 * MIB - 1] {
        let va = VirtualAddress::new(addr);
        assert_eq!(kernel.translate(va), Some(PhysicalAddress::new(addr)));
    }
    assert_eq!(kernel.translate(VirtualAddress::new(8 * MIB)), None);

    // two tables cover 8 MiB
    assert!(kernel.table(0).is_some());
    assert!(kernel.table(1).is_some());
    assert!(kernel.table(2).is_none());
}

#[test]
fn page_init_switches_to_kernel_directory() {
    let pm = active(4 * MIB, None);
    let kernel = unsafe { pm.kernel_directory().unwrap().as_ref() };

    assert!(pm.mmu().paging.get());
    assert_eq!(pm.mmu().cr3.get(), kernel.physical_addr().as_u32());
    assert_eq!(
        pm.state(),
        PagingState::Active {
            directory: kernel.physical_addr(),
            kernel: true
        }
    );
}

#[test]
fn frame_zero_is_mapped() {
    let pm = active(4 * MIB, None);
    let kernel = unsafe { pm.kernel_directory().unwrap().as_ref() };
    let entry = kernel.table(0).unwrap().get(0);
    assert!(entry.present());
    assert_eq!(entry.frame_index(), 0);
}

#[test]
fn kernel_large_pages_are_inherited() {
    let mut boot = PageDirectoryEntries::zeroed();
    let identity = DirectoryEntry::large(PhysicalAddress::zero().page::<Size4M>());
    boot.set(0, identity);
    boot.set(768, identity);
    boot.set(769, DirectoryEntry::large(PhysicalAddress::new(4 * MIB).page()));
    boot.set(832, DirectoryEntry::large(PhysicalAddress::new(8 * MIB).page()));
    boot.set(900, DirectoryEntry::table(PhysicalAddress::new(0x0030_0000)));

    let pm = active(4 * MIB, Some(&boot));
    let kernel = unsafe { pm.kernel_directory().unwrap().as_ref() };

    // slot 0 is covered by the identity map's table, not the boot page
    assert!(!kernel.entries().get(0).large_page());
    assert_eq!(kernel.entries().get(768).into_bits(), identity.into_bits());
    assert_eq!(
        kernel.translate(VirtualAddress::new(0xC040_0010)),
        Some(PhysicalAddress::new(4 * MIB + 0x10))
    );
    assert_eq!(
        kernel.translate(VirtualAddress::new(0xD000_0000)),
        Some(PhysicalAddress::new(8 * MIB))
    );
    assert!(!kernel.entries().get(900).present());
}

#[test]
fn identity_map_stops_below_kernel_space() {
    let mut boot = PageDirectoryEntries::zeroed();
    let kernel_page = DirectoryEntry::large(PhysicalAddress::zero().page::<Size4M>());
    boot.set(768, kernel_page);

    let pm = active(3584 * MIB, Some(&boot));
    assert_eq!(pm.frame_count(), 768 * 1024);

    let kernel = unsafe { pm.kernel_directory().unwrap().as_ref() };
    assert!(kernel.table(767).is_some());
    assert!(kernel.table(768).is_none());
    assert_eq!(kernel.entries().get(768).into_bits(), kernel_page.into_bits());
    assert_eq!(
        kernel.translate(VirtualAddress::new(0xC000_1234)),
        Some(PhysicalAddress::new(0x1234))
    );
    assert_eq!(
        kernel.translate(VirtualAddress::new(0xBFFF_F000)),
        Some(PhysicalAddress::new(0xBFFF_F000))
    );
}

#[test]
fn page_alloc_is_idempotent() {
    let mut pm = active(4 * MIB, None);
    let mut kernel = pm.kernel_directory().unwrap();
    let kernel = unsafe { kernel.as_mut() };

    // make room: release the frame behind 0x5000
    let low = pm.get_page(VirtualAddress::new(0x5000), false, kernel).unwrap().unwrap();
    pm.page_free(low).unwrap();
    assert!(!low.present());
    assert_eq!(pm.used_frames(), 1023);

    let entry = pm
        .get_page(VirtualAddress::new(0x4000_0000), true, kernel)
        .unwrap()
        .unwrap();
    pm.page_alloc(entry, false, true).unwrap();
    assert!(entry.present());
    assert!(entry.user());
    assert!(entry.writable());
    assert_eq!(entry.frame_index(), 5);

    let before = entry.into_bits();
    pm.page_alloc(entry, true, false).unwrap();
    assert_eq!(entry.into_bits(), before);
    assert_eq!(pm.used_frames(), 1024);
}

#[test]
fn out_of_frames_is_reported() {
    let mut pm = active(4 * MIB, None);
    let mut kernel = pm.kernel_directory().unwrap();
    let kernel = unsafe { kernel.as_mut() };

    let entry = pm
        .get_page(VirtualAddress::new(0x4000_0000), true, kernel)
        .unwrap()
        .unwrap();
    assert_eq!(pm.page_alloc(entry, true, true), Err(PagingError::OutOfFrames));
    assert!(!entry.present());
}

#[test]
fn page_free_on_unmapped_entry_is_a_noop() {
    let mut pm = active(4 * MIB, None);
    let mut kernel = pm.kernel_directory().unwrap();
    let kernel = unsafe { kernel.as_mut() };

    let entry = pm
        .get_page(VirtualAddress::new(0x4000_0000), true, kernel)
        .unwrap()
        .unwrap();
    pm.page_free(entry).unwrap();
    assert_eq!(pm.used_frames(), 1024);
}

#[test]
fn get_page_without_create() {
    let mut pm = active(4 * MIB, None);
    let mut kernel = pm.kernel_directory().unwrap();
    let kernel = unsafe { kernel.as_mut() };

    let missing = pm.get_page(VirtualAddress::new(0x8000_0000), false, kernel).unwrap();
    assert!(missing.is_none());
    assert!(kernel.table(512).is_none());

    let created = pm.get_page(VirtualAddress::new(0x8000_0000), true, kernel).unwrap();
    assert!(created.is_some_and(|e| !e.present()));
    assert!(kernel.table(512).is_some());
    assert!(kernel.entries().get(512).table_address().is_some());
}

#[test]
fn switch_directory_changes_state() {
    let mut pm = active(4 * MIB, None);
    let other = pm.create_directory().unwrap();
    let other_pa = unsafe { other.as_ref() }.physical_addr();

    unsafe { pm.switch_directory(other) };
    assert_eq!(pm.mmu().cr3.get(), other_pa.as_u32());
    assert_eq!(
        pm.state(),
        PagingState::Active {
            directory: other_pa,
            kernel: false
        }
    );

    let kernel = pm.kernel_directory().unwrap();
    unsafe { pm.switch_directory(kernel) };
    assert!(matches!(pm.state(), PagingState::Active { kernel: true, .. }));
}

#[test]
fn uninitialized_manager() {
    let mut pm = PageManager::new(HostTables::new(), RecordingMmu::default());
    assert_eq!(pm.state(), PagingState::Uninitialized);

    let mut entry = kernel_vmem::PageEntry::new();
    assert_eq!(pm.page_alloc(&mut entry, true, true), Err(PagingError::NotInitialized));
    assert!(!pm.mmu().paging.get());
}
