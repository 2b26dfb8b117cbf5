use std::sync::{Arc, Mutex};

use perch::protocol::shm::ShmPool;

fn backing_file(len: u64) -> std::fs::File {
    let file = tempfile::tempfile().unwrap();
    file.set_len(len).unwrap();
    file
}

#[test]
fn should_map_a_client_fd_read_only() {
    let pool = ShmPool::new(backing_file(4096).into(), 4096).unwrap();
    assert_eq!(pool.size(), 4096);
    let bytes = pool.bytes(0, 4096).unwrap();
    assert!(bytes.iter().all(|b| *b == 0));
}

#[test]
fn should_grow_but_never_see_out_of_bounds() {
    let mut pool = ShmPool::new(backing_file(16384).into(), 4096).unwrap();
    assert!(pool.bytes(0, 8192).is_none());

    pool.resize(8192).unwrap();
    assert_eq!(pool.size(), 8192);
    assert!(pool.bytes(0, 8192).is_some());
    assert!(pool.bytes(8192, 1).is_none());
}

#[test]
fn should_keep_the_mapping_alive_for_outstanding_buffers() {
    // Same ownership shape as the protocol layer: the pool resource holds
    // one strong reference, each buffer another.
    let pool = Arc::new(Mutex::new(ShmPool::new(backing_file(4096).into(), 4096).unwrap()));
    let buffer = pool.clone();

    drop(pool); // client destroys the wl_shm_pool
    assert!(buffer.lock().unwrap().bytes(0, 4096).is_some());
    drop(buffer); // last buffer gone: unmapped exactly once
}
