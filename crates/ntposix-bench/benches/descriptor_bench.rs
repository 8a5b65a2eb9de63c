//! Descriptor table benchmarks: dispatch, dup/close, fork, and the
//! extern "C" entry overhead.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ntposix_abi::io_abi::{ntp_close, ntp_dup};
use ntposix_core::flags::{F_GETFL, O_RDWR};
use ntposix_core::testing::TestRig;

fn bench_dispatch(c: &mut Criterion) {
    let rig = TestRig::new().build();
    let ctx = rig.context();
    let fd = ctx.open("/dev/zero", O_RDWR, 0).expect("open");
    let mut buf = [0u8; 64];
    c.bench_function("read_dev_zero_64", |b| {
        b.iter(|| black_box(ctx.read(fd, &mut buf).expect("read")));
    });
    c.bench_function("fcntl_getfl", |b| {
        b.iter(|| black_box(ctx.fcntl(fd, F_GETFL, 0).expect("fcntl")));
    });
}

fn bench_dup_close(c: &mut Criterion) {
    let rig = TestRig::new().build();
    let ctx = rig.context();
    let fd = ctx.open("/dev/null", O_RDWR, 0).expect("open");
    c.bench_function("dup_close", |b| {
        b.iter(|| {
            let copy = ctx.dup(fd).expect("dup");
            ctx.close(copy).expect("close");
        });
    });
}

fn bench_fork(c: &mut Criterion) {
    let rig = TestRig::new().build();
    let ctx = rig.context();
    for _ in 0..8 {
        ctx.pipe(0).expect("pipe");
    }
    ctx.open("/dev/tty", O_RDWR, 0).expect("open");
    c.bench_function("fork_with_17_descriptors", |b| {
        b.iter(|| {
            let child = ctx.fork().expect("fork");
            child.exit();
        });
    });
}

fn bench_abi_dup_close(c: &mut Criterion) {
    let mut fds = [0; 2];
    // SAFETY: `fds` has room for two descriptors.
    assert_eq!(unsafe { ntposix_abi::io_abi::ntp_pipe(fds.as_mut_ptr()) }, 0);
    c.bench_function("abi_dup_close", |b| {
        b.iter(|| {
            let copy = ntp_dup(fds[0]);
            black_box(ntp_close(copy));
        });
    });
}

criterion_group!(
    benches,
    bench_dispatch,
    bench_dup_close,
    bench_fork,
    bench_abi_dup_close
);
criterion_main!(benches);
