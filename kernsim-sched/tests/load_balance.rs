//! Integration tests for task placement and load balancing.

use kernsim_sched::{CpuScheduler, SchedulerConfig, Task, TaskKind};

fn scheduler(cpus: usize) -> CpuScheduler {
    CpuScheduler::new(SchedulerConfig {
        num_cpus: cpus,
        max_tasks: 256,
        default_timeslice_ms: 5,
        balance_interval_ms: 10_000,
    })
    .expect("scheduler config is valid")
}

fn task(id: u64) -> Task {
    Task::new(id, TaskKind::Normal, 50, 1_000)
        .expect("task args are valid")
        .with_timeslice(5)
}

mod balancing {
    use super::*;

    #[test]
    fn one_pass_moves_one_task_from_longest_to_shortest() {
        // Arrange: a pathological layout with everything on CPU 0.
        let s = scheduler(4);
        for id in 0..10 {
            s.schedule_on(0, task(id)).expect("within capacity");
        }

        // Act: one balancer pass.
        s.balance_once();

        // Assert: exactly one task moved, to the lowest-indexed idle CPU.
        let stats = s.stats();
        assert_eq!(stats.cpus[0].queue_len, 9);
        assert_eq!(stats.cpus[1].queue_len, 1);
        assert_eq!(stats.cpus[2].queue_len, 0);
        assert_eq!(stats.cpus[3].queue_len, 0);
        assert_eq!(stats.migrations, 1);
        assert_eq!(stats.load_balances, 1);
    }

    #[test]
    fn repeated_passes_converge_without_thrashing() {
        let s = scheduler(2);
        for id in 0..6 {
            s.schedule_on(0, task(id)).expect("within capacity");
        }

        for _ in 0..10 {
            s.balance_once();
        }

        // 6 tasks settle at 4/2 or 3/3; the balancer never over-corrects
        // past a difference of one.
        let stats = s.stats();
        let (a, b) = (stats.cpus[0].queue_len, stats.cpus[1].queue_len);
        assert_eq!(a + b, 6);
        assert!(a.abs_diff(b) <= 1, "queues {a} and {b} still imbalanced");
    }
}

mod execution {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn tasks_retire_once_runtime_reaches_deadline() {
        // Arrange: two short tasks on two CPUs.
        let mut s = scheduler(2);
        for id in 0..2 {
            let t = Task::new(id, TaskKind::Normal, 10, 10)
                .expect("task args are valid")
                .with_timeslice(5);
            s.schedule(t).expect("within capacity");
        }

        // Act: run long enough for both to hit their 10 ms deadline.
        s.start().expect("threads spawn");
        thread::sleep(Duration::from_millis(300));
        s.stop();

        // Assert.
        let stats = s.stats();
        assert_eq!(stats.tasks_completed, 2);
        assert_eq!(stats.tasks_live, 0);
        assert!(stats.context_switches >= 2);
        let busy: u64 = stats.cpus.iter().map(|c| c.busy_time_ms).sum();
        assert!(busy >= 20, "expected at least 20ms of busy time, got {busy}");
    }

    #[test]
    fn idle_cpus_accumulate_idle_time() {
        let mut s = scheduler(2);
        s.start().expect("threads spawn");
        thread::sleep(Duration::from_millis(100));
        s.stop();

        let stats = s.stats();
        for cpu in &stats.cpus {
            assert!(cpu.idle_time_ms > 0, "cpu{} never idled", cpu.id);
            assert_eq!(cpu.busy_time_ms, 0);
        }
    }
}
