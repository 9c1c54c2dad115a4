//! End-to-end scenarios against both engines, one `init` per test
//! (`mem_min=16, mem_max=4096, n_max=64, total_budget=262144` unless a
//! scenario needs to force a particular packing).

use relocheap::{Config, MfEngine, VmfEngine, Workload};

fn workload(mem_min: usize, mem_max: usize, n_max: u32) -> Workload {
    Workload { mem_min, mem_max, n_max, total_budget: 262_144 }
}

fn write_byte(addr: *mut u8, b: u8) {
    unsafe { *addr = b };
}

fn read_byte(addr: *mut u8) -> u8 {
    unsafe { *addr }
}

#[test]
fn mf_round_trip() {
    let mut e = MfEngine::new(workload(16, 4096, 64), Config::default()).unwrap();
    e.allocate(7, 100);
    let addr = e.dereference(7).expect("live");
    unsafe { std::ptr::copy_nonoverlapping(b"HELLO".as_ptr(), addr, 5) };
    let addr = e.dereference(7).unwrap();
    let mut buf = [0u8; 5];
    unsafe { std::ptr::copy_nonoverlapping(addr, buf.as_mut_ptr(), 5) };
    assert_eq!(&buf, b"HELLO");
    assert!(e.length(7).unwrap() >= 100);
}

#[test]
fn vmf_round_trip() {
    let mut e = VmfEngine::new(workload(16, 4096, 64), Config::default()).unwrap();
    e.allocate(7, 100);
    let addr = e.dereference(7).expect("live");
    unsafe { std::ptr::copy_nonoverlapping(b"HELLO".as_ptr(), addr, 5) };
    let addr = e.dereference(7).unwrap();
    let mut buf = [0u8; 5];
    unsafe { std::ptr::copy_nonoverlapping(addr, buf.as_mut_ptr(), 5) };
    assert_eq!(&buf, b"HELLO");
    assert!(e.length(7).unwrap() >= 100);
}

#[test]
fn mf_tail_relocation() {
    let mut e = MfEngine::new(workload(16, 4096, 64), Config::default()).unwrap();
    e.allocate(0, 64);
    e.allocate(1, 64);
    e.allocate(2, 64);
    write_byte(e.dereference(0).unwrap(), b'A');
    write_byte(e.dereference(1).unwrap(), b'B');
    write_byte(e.dereference(2).unwrap(), b'C');
    e.deallocate(1);
    assert_eq!(read_byte(e.dereference(2).unwrap()), b'C');
    assert_eq!(read_byte(e.dereference(0).unwrap()), b'A');
    assert!(e.dereference(1).is_none());
}

#[test]
fn vmf_tail_relocation() {
    let mut e = VmfEngine::new(workload(16, 4096, 64), Config::default()).unwrap();
    e.allocate(0, 64);
    e.allocate(1, 64);
    e.allocate(2, 64);
    write_byte(e.dereference(0).unwrap(), b'A');
    write_byte(e.dereference(1).unwrap(), b'B');
    write_byte(e.dereference(2).unwrap(), b'C');
    e.deallocate(1);
    assert_eq!(read_byte(e.dereference(2).unwrap()), b'C');
    assert_eq!(read_byte(e.dereference(0).unwrap()), b'A');
    assert!(e.dereference(1).is_none());
}

/// Scenario 3: page packing (VMF). `mem_max=128` forces several
/// same-sized blocks to share a physical page; P3 (head-only partial)
/// must hold throughout, and unwinding in reverse empties every class.
#[test]
fn vmf_page_packing_respects_head_only_partial() {
    let mut e = VmfEngine::new(workload(16, 128, 16), Config::default()).unwrap();
    for bid in 0..10u32 {
        e.allocate(bid, 128);
    }
    for bid in 0..10u32 {
        assert!(e.dereference(bid).is_some());
    }
    for bid in (0..10u32).rev() {
        e.deallocate(bid);
    }
    for bid in 0..10u32 {
        assert!(e.dereference(bid).is_none());
    }
}

#[test]
fn mf_cross_class_reallocate() {
    let mut e = MfEngine::new(workload(16, 4096, 64), Config::default()).unwrap();
    e.allocate(3, 32);
    let pattern: Vec<u8> = (0..32).collect();
    unsafe {
        std::ptr::copy_nonoverlapping(pattern.as_ptr(), e.dereference(3).unwrap(), 32);
    }
    e.reallocate(3, 1024);
    let addr = e.dereference(3).unwrap();
    let mut buf = [0u8; 32];
    unsafe { std::ptr::copy_nonoverlapping(addr, buf.as_mut_ptr(), 32) };
    assert_eq!(buf.to_vec(), pattern);
    assert!(e.length(3).unwrap() >= 1024);
}

#[test]
fn vmf_cross_class_reallocate() {
    let mut e = VmfEngine::new(workload(16, 4096, 64), Config::default()).unwrap();
    e.allocate(3, 32);
    let pattern: Vec<u8> = (0..32).collect();
    unsafe {
        std::ptr::copy_nonoverlapping(pattern.as_ptr(), e.dereference(3).unwrap(), 32);
    }
    e.reallocate(3, 1024);
    let addr = e.dereference(3).unwrap();
    let mut buf = [0u8; 32];
    unsafe { std::ptr::copy_nonoverlapping(addr, buf.as_mut_ptr(), 32) };
    assert_eq!(buf.to_vec(), pattern);
    assert!(e.length(3).unwrap() >= 1024);
}

#[test]
fn mf_dereference_before_any_allocate_is_null() {
    let e = MfEngine::new(workload(16, 4096, 64), Config::default()).unwrap();
    assert!(e.dereference(42).is_none());
}

#[test]
fn vmf_dereference_before_any_allocate_is_null() {
    let e = VmfEngine::new(workload(16, 4096, 64), Config::default()).unwrap();
    assert!(e.dereference(42).is_none());
}

/// Scenario 6: allocate/deallocate bid 0 a million times over (scaled
/// down here to keep the test fast); `using_mem()` must settle rather
/// than climb, proving the pool/garbage list absorb the churn.
#[test]
fn mf_pool_reuse_bounds_steady_state_memory() {
    let mut e = MfEngine::new(workload(16, 4096, 4), Config::default()).unwrap();
    e.allocate(0, 64);
    e.deallocate(0);
    let steady = e.using_mem();
    for _ in 0..50_000 {
        e.allocate(0, 64);
        e.deallocate(0);
    }
    assert!(e.using_mem() <= steady + (16 * relocheap::os::page_size() as u64));
}

#[test]
fn mf_idempotent_reallocate_to_same_class_preserves_bytes() {
    let mut e = MfEngine::new(workload(16, 4096, 64), Config::default()).unwrap();
    e.allocate(5, 100);
    unsafe { std::ptr::copy_nonoverlapping(b"STABLE".as_ptr(), e.dereference(5).unwrap(), 6) };
    // Same requested size necessarily maps to the same size class, so
    // this reallocate must be a no-op per P8.
    e.reallocate(5, 100);
    let addr = e.dereference(5).unwrap();
    let mut buf = [0u8; 6];
    unsafe { std::ptr::copy_nonoverlapping(addr, buf.as_mut_ptr(), 6) };
    assert_eq!(&buf, b"STABLE");
}

#[test]
fn vmf_idempotent_reallocate_to_same_class_preserves_bytes() {
    let mut e = VmfEngine::new(workload(16, 4096, 64), Config::default()).unwrap();
    e.allocate(5, 100);
    unsafe { std::ptr::copy_nonoverlapping(b"STABLE".as_ptr(), e.dereference(5).unwrap(), 6) };
    e.reallocate(5, 100);
    let addr = e.dereference(5).unwrap();
    let mut buf = [0u8; 6];
    unsafe { std::ptr::copy_nonoverlapping(addr, buf.as_mut_ptr(), 6) };
    assert_eq!(&buf, b"STABLE");
}

/// A denser interleaving than the unit tests cover: many bids, random
/// order allocate/deallocate/reallocate, checked against a shadow model
/// after every step (P6/P7: round-trip and relocation durability).
#[test]
fn mf_interleaved_ops_preserve_contents() {
    let mut e = MfEngine::new(workload(16, 512, 32), Config::default()).unwrap();
    let mut shadow: Vec<Option<u8>> = vec![None; 32];

    let mut lcg: u32 = 0x2545F491;
    let mut next = || {
        lcg = lcg.wrapping_mul(1103515245).wrapping_add(12345);
        lcg
    };

    for step in 0..2000u32 {
        let bid = next() % 32;
        let live = shadow[bid as usize].is_some();
        match next() % 3 {
            0 if !live => {
                let size = 16 + (next() % 480) as usize;
                e.allocate(bid, size);
                let marker = (step % 251) as u8;
                write_byte(e.dereference(bid).unwrap(), marker);
                shadow[bid as usize] = Some(marker);
            }
            1 if live => {
                e.deallocate(bid);
                shadow[bid as usize] = None;
            }
            2 if live => {
                let size = 16 + (next() % 480) as usize;
                e.reallocate(bid, size);
                // first byte of the payload must survive reallocate
                let expected = shadow[bid as usize].unwrap();
                assert_eq!(read_byte(e.dereference(bid).unwrap()), expected);
            }
            _ => {}
        }
        for other in 0..32u32 {
            if other == bid {
                continue;
            }
            if let Some(expected) = shadow[other as usize] {
                assert_eq!(
                    read_byte(e.dereference(other).unwrap()),
                    expected,
                    "bid {} corrupted by an operation on bid {} at step {}",
                    other,
                    bid,
                    step
                );
            }
        }
    }
}
