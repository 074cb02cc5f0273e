//! Cross-subsystem integration tests: the parts of C1-C6 that only show
//! bugs when exercised together (an address space actually backed by
//! freed frames, a scheduler actually parking and waking a forked thread,
//! a filesystem actually mounted on a registered device).

#![cfg(all(test, not(target_os = "none")))]

use alloc::boxed::Box;

use crate::{
    fs::{self, blockdev, hfs, FsType},
    mm::{frame_allocator, page_table::PageFlags, vmm, MemoryRegion, VirtAddr, FRAME_SIZE},
    sched,
};

/// Brings up the frame allocator and kernel address space exactly once for
/// this process, the way [`crate::mm::init`] does at boot, so tests that
/// need a live [`vmm::AddressSpace`] have one to build on.
fn ensure_mm_ready() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let region_bytes: u64 = 16 * 1024 * 1024;
        let map = [MemoryRegion { base: 0, length: region_bytes, usable: true }];
        let bitmap: &'static mut [u8] =
            alloc::vec![0u8; (region_bytes as usize / FRAME_SIZE).div_ceil(8)].leak();
        frame_allocator::init(&map, bitmap);
        vmm::init();
    });
}

/// The frame allocator and kernel address space are process-wide statics;
/// serialize the tests that read `used_frames()` around their own
/// allocations so they don't observe each other's frames under cargo's
/// default parallel test runner.
static MM_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[test]
fn address_space_clone_copies_mapped_data_into_distinct_frames() {
    let _guard = MM_TEST_LOCK.lock().unwrap();
    ensure_mm_ready();
    let mut parent = vmm::new_user_space().expect("new_user_space");
    parent
        .map_anonymous(VirtAddr::new(0x4000_0000), 0x1000, PageFlags::WRITABLE | PageFlags::USER)
        .expect("map");

    let parent_phys = parent.translate(VirtAddr::new(0x4000_0000)).expect("translate");

    let child = parent.clone_address_space().expect("clone");
    let child_phys = child.translate(VirtAddr::new(0x4000_0000)).expect("translate child");

    assert_ne!(parent_phys, child_phys, "clone must not alias the parent's frames");

    parent.destroy();
    child.destroy();
}

#[test]
fn frame_allocator_frames_freed_by_address_space_destroy_are_reusable() {
    let _guard = MM_TEST_LOCK.lock().unwrap();
    ensure_mm_ready();
    let before = frame_allocator::used_frames();

    let mut space = vmm::new_user_space().expect("new_user_space");
    space
        .map_anonymous(VirtAddr::new(0x5000_0000), 0x3000, PageFlags::WRITABLE | PageFlags::USER)
        .expect("map");
    assert!(frame_allocator::used_frames() > before);

    space.destroy();
    assert_eq!(frame_allocator::used_frames(), before);
}

#[test]
fn forked_thread_is_owned_by_its_new_pid_and_remains_wakeable() {
    sched::init();
    let parent = sched::current_tid().expect("current_tid");
    let parent_pid = sched::pid_of(parent).expect("pid_of");

    let child_pid = parent_pid + 1;
    let child = sched::fork_thread(parent, child_pid).expect("fork_thread");
    assert_eq!(sched::pid_of(child), Some(child_pid));
    assert_ne!(child, parent, "fork must allocate a distinct tid");

    sched::wake(child).expect("a freshly forked thread is a valid wake target");
}

#[test]
fn hfs_mounted_over_a_registered_block_device_round_trips_a_file() {
    let device = blockdev::register("integration-disk0", Box::new(blockdev::RamBlockDevice::new(alloc::string::String::from("integration-disk0"), 512, 256))).expect("register");
    hfs::format(&device, 32).expect("format");
    fs::mount("/integration", FsType::Hfs, device).expect("mount");

    let mut f = fs::create("/integration/greeting.txt").expect("create");
    fs::write(&mut f, b"paged, scheduled, and stored").expect("write");
    fs::close(f);

    let mut f = fs::open("/integration/greeting.txt").expect("open");
    let mut buf = [0u8; 64];
    let n = fs::read(&mut f, &mut buf).expect("read");
    assert_eq!(&buf[..n], b"paged, scheduled, and stored");

    fs::unmount("integration").expect("unmount");
}

#[test]
fn frame_allocator_never_hands_out_the_same_frame_twice() {
    let _guard = MM_TEST_LOCK.lock().unwrap();
    ensure_mm_ready();
    let a = frame_allocator::alloc_frame().expect("alloc a");
    let b = frame_allocator::alloc_frame().expect("alloc b");
    assert_ne!(a, b);
    frame_allocator::free_frame(a);
    frame_allocator::free_frame(b);
}
