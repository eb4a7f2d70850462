use kernel_info::memory;
use std::{env, path::PathBuf};

fn main() {
    // Point to the linker script
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let ld = manifest_dir.join("kernel.ld");

    // Sanity checks (fail fast during build)
    let kernel_base = memory::KERNEL_VIRTUAL_BASE;
    let phys_load = memory::KERNEL_PHYS_LOAD;
    assert_eq!(
        kernel_base % memory::BLOCK_SIZE,
        0,
        "KERNEL_VIRTUAL_BASE must be 4 MiB aligned (got {kernel_base:#x})"
    );
    assert_eq!(
        phys_load & 0xfff,
        0,
        "KERNEL_PHYS_LOAD must be 4 KiB aligned (got {phys_load:#x})"
    );

    // Rebuild when inputs change
    println!("cargo:rerun-if-changed={}", ld.display());

    // The linker script only applies to the bare-metal image; host builds of
    // the binary just run its unit tests.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("none") {
        return;
    }

    // Linker script
    println!("cargo:rustc-link-arg-bins=-T{}", ld.display());

    // Provide symbols to the linker script
    // (cargo:rustc-link-arg-bins passes args directly to the linker)
    println!("cargo:rustc-link-arg-bins=--defsym=KERNEL_VIRTUAL_BASE={kernel_base:#x}");
    println!("cargo:rustc-link-arg-bins=--defsym=KERNEL_PHYS_LOAD={phys_load:#x}");
}
