/*!
 * Lifecycle Benchmarks
 *
 * Hot paths: identity allocation, registry lookup, signal routing and the
 * spawn/retire cycle
 */

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use vesper_kernel::process::{Lifecycle, Process};
use vesper_kernel::{CpuAffinity, IdAllocator, Signal};

fn entry(_argument: usize) {}

/// Exit and retire every process so their destructors see empty groups.
fn wind_down(lifecycle: &Arc<Lifecycle>, processes: &[Arc<Process>]) {
    for process in processes {
        if let Some(main) = process.main_thread() {
            lifecycle.exit(&main, 0);
        }
        lifecycle.retire_marked_threads(process);
    }
    lifecycle.drain_finalizer();
}

fn bench_identity_allocation(c: &mut Criterion) {
    c.bench_function("allocate_pid", |b| {
        let ids = IdAllocator::new();
        b.iter(|| black_box(ids.allocate_pid()));
    });
}

fn bench_registry_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_lookup");

    for population in [16usize, 256, 4096] {
        let lifecycle = Lifecycle::new();
        let processes: Vec<_> = (0..population)
            .map(|i| {
                lifecycle.create_kernel_process(&format!("svc{i}"), entry, i, CpuAffinity::ANY)
            })
            .collect();
        let target = processes[population / 2].pid();

        group.bench_with_input(
            BenchmarkId::from_parameter(population),
            &target,
            |b, &pid| {
                b.iter(|| black_box(lifecycle.find(pid)));
            },
        );

        wind_down(&lifecycle, &processes);
    }

    group.finish();
}

fn bench_signal_routing(c: &mut Criterion) {
    let mut group = c.benchmark_group("signal_routing");

    for threads in [1usize, 4, 16] {
        let lifecycle = Lifecycle::new();
        // Burn the bootstrap identity so the target is a registered pid.
        let init = lifecycle.create_kernel_process("init", entry, 0, CpuAffinity::ANY);
        let process = lifecycle.create_kernel_process("target", entry, 0, CpuAffinity::ANY);
        for i in 1..threads {
            lifecycle
                .create_kernel_thread(&process, &format!("t{i}"), entry, i)
                .unwrap();
        }
        let pid = process.pid();
        let main = process.main_thread().unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(threads), &pid, |b, &pid| {
            b.iter(|| {
                lifecycle.send_signal(pid, Signal::SIGUSR1, None).unwrap();
                black_box(main.take_pending_signals());
            });
        });

        wind_down(&lifecycle, &[process, init]);
    }

    group.finish();
}

fn bench_spawn_exit_finalize(c: &mut Criterion) {
    let lifecycle = Lifecycle::new();
    let init = lifecycle.create_kernel_process("init", entry, 0, CpuAffinity::ANY);

    c.bench_function("spawn_exit_finalize", |b| {
        b.iter(|| {
            let process = lifecycle.create_kernel_process("churn", entry, 0, CpuAffinity::ANY);
            lifecycle.exit(&process.main_thread().unwrap(), 0);
            // The scheduling boundary observes the death mark and retires.
            while let Some(thread) = lifecycle.scheduler().take_next() {
                if thread.should_die() {
                    lifecycle.retire_thread(&thread);
                }
            }
            lifecycle.drain_finalizer();
            black_box(process.pid());
        });
    });

    wind_down(&lifecycle, &[init]);
}

criterion_group!(
    benches,
    bench_identity_allocation,
    bench_registry_lookup,
    bench_signal_routing,
    bench_spawn_exit_finalize
);

criterion_main!(benches);
