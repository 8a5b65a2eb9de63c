use std::sync::Arc;

use ntposix_native::pipe::{NamedPipeState, PipeSide};
use ntposix_native::status::NtStatus;
use ntposix_native::{KernelBuilder, OwnedHandle};

#[test]
fn pipe_end_outlives_parent_handle_in_child() {
    let kernel = KernelBuilder::new().build().unwrap();
    let parent = kernel.spawn_process(0);
    let (read, write) = kernel
        .create_pipe(&parent, "\\\\.\\pipe\\lifetime", 4096, true)
        .unwrap();
    let child = kernel.fork_process(&parent);
    let child_read = OwnedHandle::adopt(&child, read.raw()).unwrap();
    assert_eq!(child.release_unclaimed(), 1);
    drop(read);

    write.object().as_pipe().unwrap().write(b"ping").unwrap();
    let mut buf = [0u8; 8];
    let n = child_read.object().as_pipe().unwrap().read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"ping");

    drop(write);
    let end = child_read.object().as_pipe().unwrap();
    assert_eq!(end.query_local().state, NamedPipeState::Closing);
    assert_eq!(end.read(&mut buf), Err(NtStatus::PIPE_BROKEN));
}

#[test]
fn duplicated_handle_keeps_object_alive() {
    let kernel = KernelBuilder::new().build().unwrap();
    let p = kernel.spawn_process(0);
    kernel.create_fifo("/f", 4096).unwrap();
    let reader = kernel.open_fifo(&p, "/f", PipeSide::Read, false).unwrap();
    let dup = reader.duplicate(false);
    let object = Arc::clone(reader.object());
    drop(reader);
    assert_eq!(object.handle_count(), 1);
    assert_eq!(kernel.fifo("/f").unwrap().readers(), 1);
    drop(dup);
    drop(object);
    assert_eq!(kernel.fifo("/f").unwrap().readers(), 0);
    assert_eq!(p.handle_count(), 0);
}
