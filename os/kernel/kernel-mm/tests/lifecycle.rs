mod common;

use common::*;
use kernel_info::memory::{LOW_CLONE_ENTRIES, MAX_ARG_PAGES, PAGE_SIZE, TASK_SIZE};
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};
use kernel_mm::env::ProcessImage;
use kernel_mm::{FaultKind, Resolution};
use kernel_vmem::{DirIndex, PhysMapper};

const PAGE: usize = PAGE_SIZE as usize;

#[test]
fn first_process_inherits_low_kernel_memory() {
    let mut mm = manager();
    let kernel_space = mm.init_kernel_space();
    let low = LOW_CLONE_ENTRIES as u32 * PAGE_SIZE;

    let task = mm
        .create_address_space(Some(kernel_space), VirtualAddress::zero(), low)
        .unwrap();

    let last = VirtualAddress::new(low - PAGE_SIZE);
    let entry = mm.entry(task, last).unwrap();
    assert_eq!(entry.page(), Some(PhysicalPage::from_index(LOW_CLONE_ENTRIES as u32 - 1)));
    assert!(!entry.is_writable());
    assert!(mm.entry(task, VirtualAddress::new(low)).is_some_and(|e| !e.is_present()));

    // The kernel keeps writing through its own entries; nothing is counted.
    assert!(mm.entry(kernel_space, last).unwrap().is_writable());
    assert_eq!(mm.ref_count(entry.page().unwrap()), None);
    mm.check_refcounts(&[task]).unwrap();

    mm.destroy_address_space(task, VirtualAddress::zero(), low);
    assert_eq!(mm.frames().stats().used, 0);
}

#[test]
fn writing_inherited_kernel_memory_copies_it() {
    let mut mm = manager();
    let kernel_space = mm.init_kernel_space();
    let low = LOW_CLONE_ENTRIES as u32 * PAGE_SIZE;
    let task = mm
        .create_address_space(Some(kernel_space), VirtualAddress::zero(), low)
        .unwrap();

    let mut kernel = FakeKernel::new();
    kernel.processes.insert(0, Process { space: task, image: ProcessImage::anonymous(VirtualAddress::zero()) });

    let va = VirtualAddress::new(0x9000);
    mm.memory_mut().frame_mut(PhysicalPage::from_index(9))[..4].copy_from_slice(b"boot");
    let resolution = mm.handle_fault(kernel.run(0), FaultKind::WriteProtect, va).unwrap();
    assert_eq!(resolution, Resolution::Copied);

    let copy = mm.translate(task, va).unwrap().page();
    assert_ne!(copy, PhysicalPage::from_index(9));
    assert_eq!(&mm.memory().frame(copy)[..4], b"boot");
    assert_eq!(mm.ref_count(copy), Some(1));
}

#[test]
fn exec_replaces_the_image() {
    let mut mm = manager();
    let mut kernel = FakeKernel::new();
    let old = kernel.install_executable(1, &image_bytes(2 * PAGE), &[]);
    let new = kernel.install_executable(2, &vec![0x42; PAGE], &[]);
    kernel.spawn(&mut mm, 1, Some(old), 2 * PAGE_SIZE);
    write(&mut mm, &mut kernel, 1, 0, b"old");
    write(&mut mm, &mut kernel, 1, 0x20_0000, b"stack");

    // Arguments are copied into fresh pages before the old image goes.
    let arg = mm.alloc_page().unwrap();
    mm.memory_mut().frame_mut(arg)[..5].copy_from_slice(b"argv\0");
    let mut pages = [None; MAX_ARG_PAGES];
    pages[MAX_ARG_PAGES - 1] = Some(arg);

    let space = kernel.space(1);
    let base = slot(1);
    mm.clear_address_space(space, base, TASK_SIZE);
    mm.install_arg_pages(space, base, &pages).unwrap();
    let process = kernel.processes.get_mut(&1).unwrap();
    process.image.executable = Some(new);
    process.image.end_data = PAGE_SIZE;
    kernel.executables.get_mut(&old).unwrap().open_count -= 1;
    kernel.executables.get_mut(&new).unwrap().open_count += 1;

    assert_eq!(read(&mut mm, &mut kernel, 1, 0, 3), [0x42_u8; 3]);
    assert_eq!(read(&mut mm, &mut kernel, 1, 0x20_0000, 5), [0_u8; 5]);
    assert_eq!(read(&mut mm, &mut kernel, 1, TASK_SIZE - PAGE_SIZE, 5), b"argv\0");
    mm.check_refcounts(&kernel.spaces()).unwrap();

    kernel.exit(&mut mm, 1);
    assert_eq!(mm.frames().stats().used, 0);
}

#[test]
fn verify_area_unshares_before_kernel_writes() {
    let mut mm = manager();
    let mut kernel = FakeKernel::new();
    kernel.spawn(&mut mm, 1, None, 0);
    write(&mut mm, &mut kernel, 1, PAGE_SIZE - 2, b"span");
    kernel.fork(&mut mm, 1, 2).unwrap();
    let shared = [frame_at(&mm, &kernel, 1, 0), frame_at(&mm, &kernel, 1, PAGE_SIZE)];

    // Two bytes at the end of page 0 reach into page 1; page 2 is untouched.
    write(&mut mm, &mut kernel, 1, 2 * PAGE_SIZE, b"x");
    let va = kernel.at(1, PAGE_SIZE - 2);
    mm.verify_area(kernel.run(1), va, 4).unwrap();

    for (page, frame) in [0, PAGE_SIZE].into_iter().zip(shared) {
        let entry = mm.entry(kernel.space(1), kernel.at(1, page)).unwrap();
        assert!(entry.is_writable());
        assert_ne!(entry.page(), Some(frame));
        assert_eq!(mm.ref_count(frame), Some(1));
    }
    mm.check_refcounts(&kernel.spaces()).unwrap();
}

#[test]
fn verify_area_skips_unmapped_pages() {
    let mut mm = manager();
    let mut kernel = FakeKernel::new();
    kernel.spawn(&mut mm, 1, None, 0);
    let used = mm.frames().stats().used;

    let va = kernel.at(1, 0x1000);
    mm.verify_area(kernel.run(1), va, 3 * PAGE_SIZE).unwrap();
    assert_eq!(mm.frames().stats().used, used);
}

#[test]
fn report_counts_pages_per_table() {
    let mut mm = manager();
    let mut kernel = FakeKernel::new();
    kernel.spawn(&mut mm, 1, None, 0);
    for page in 0..3 {
        write(&mut mm, &mut kernel, 1, page * PAGE_SIZE, b"a");
    }
    write(&mut mm, &mut kernel, 1, 0x0050_0000, b"b");

    let report = mm.report(kernel.space(1));
    let first = DirIndex::from(slot(1));
    let second = DirIndex::from(slot(1) + 0x0050_0000);
    assert_eq!(report.tables, [(first, 3), (second, 1)]);
    assert_eq!(report.frames.used, 1 + 2 + 4);
    assert_eq!(report.frames.free + report.frames.used, report.frames.total);
}

#[test]
fn refcount_audit_finds_stray_references() {
    let mut mm = manager();
    let mut kernel = FakeKernel::new();
    kernel.spawn(&mut mm, 1, None, 0);
    write(&mut mm, &mut kernel, 1, 0, b"a");
    let page = frame_at(&mm, &kernel, 1, 0);

    // An extra reference nothing in the page tables accounts for.
    let extra = mm.alloc_page().unwrap();
    let err = mm.check_refcounts(&kernel.spaces()).unwrap_err();
    assert_eq!((err.page, err.expected, err.actual), (extra, 0, 1));

    mm.free_page(extra);
    mm.check_refcounts(&kernel.spaces()).unwrap();
    assert_eq!(mm.ref_count(page), Some(1));
}
