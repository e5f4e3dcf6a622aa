//! Scheduler behavior through the public API

mod common;

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use common::{drain, runtime, Trace};
use udthread::{Priority, Runtime, RuntimeConfig, RuntimeError, ThreadId};

#[test]
fn test_high_priority_cycles_before_low() {
    let rt = runtime();
    let trace = Trace::new();

    for (id, priority) in [(1, Priority::High), (2, Priority::Low), (3, Priority::High)] {
        let (worker, trace) = (rt.clone(), trace.clone());
        rt.create(id, priority, move |id| {
            for _ in 0..3 {
                trace.push(id.0);
                worker.yield_now();
            }
        });
    }
    drain(&rt);

    assert_eq!(trace.events(), vec![1, 3, 1, 3, 1, 3, 2, 2, 2]);
    let stats = rt.stats().unwrap();
    assert_eq!(stats.threads_created, 3);
    assert_eq!(stats.threads_terminated, 3);
    rt.shutdown();
}

#[test]
fn test_yield_alone_is_noop() {
    let rt = runtime();
    rt.yield_now();
    assert_eq!(rt.current_id(), Some(ThreadId::MAIN));
    assert_eq!(rt.stats().unwrap().context_switches, 0);
    rt.shutdown();
}

#[test]
fn test_entry_receives_its_id() {
    let rt = runtime();
    let trace = Trace::new();
    for id in [7, 11] {
        let (worker, trace) = (rt.clone(), trace.clone());
        rt.create(id, Priority::Low, move |id| {
            trace.push((id, worker.current_id()));
        });
    }
    drain(&rt);
    assert_eq!(
        trace.events(),
        vec![
            (ThreadId(7), Some(ThreadId(7))),
            (ThreadId(11), Some(ThreadId(11)))
        ]
    );
    rt.shutdown();
}

#[test]
fn test_create_rejects_bad_ids() {
    let rt = runtime();
    assert_eq!(
        rt.try_create(0, Priority::High, |_| {}),
        Err(RuntimeError::InvalidThreadId(ThreadId(0)))
    );
    assert_eq!(
        rt.try_create(ThreadId::MAIN, Priority::High, |_| {}),
        Err(RuntimeError::InvalidThreadId(ThreadId::MAIN))
    );
    assert_eq!(rt.try_create(5, Priority::Low, |_| {}), Ok(()));
    assert_eq!(
        rt.try_create(5, Priority::High, |_| {}),
        Err(RuntimeError::DuplicateThreadId(ThreadId(5)))
    );
    assert_eq!(rt.thread_count(), 2);
    assert_eq!(rt.ready_count(Priority::Low), 1);
    assert_eq!(rt.ready_count(Priority::High), 0);
    rt.shutdown();
}

#[test]
fn test_id_reusable_after_termination() {
    let rt = runtime();
    rt.create(3, Priority::Low, |_| {});
    drain(&rt);
    assert_eq!(rt.try_create(3, Priority::Low, |_| {}), Ok(()));
    drain(&rt);
    assert_eq!(rt.stats().unwrap().threads_terminated, 2);
    rt.shutdown();
}

#[test]
fn test_return_continues_with_creator() {
    let rt = runtime();
    let trace = Trace::new();

    let (worker, outer) = (rt.clone(), trace.clone());
    rt.create(1, Priority::High, move |_| {
        outer.push("1 start");
        for id in [2, 3] {
            let trace = outer.clone();
            worker.create(id, Priority::High, move |id| {
                trace.push(if id.0 == 2 { "2" } else { "3" });
            });
        }
        worker.yield_now();
        outer.push("1 end");
    });

    rt.yield_now();
    trace.push("main");
    drain(&rt);

    // Thread 2 returns into its creator (1) even though 3 is queued first
    assert_eq!(trace.events(), vec!["1 start", "2", "1 end", "main", "3"]);
    rt.shutdown();
}

struct DropFlag(Rc<Cell<bool>>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.set(true);
    }
}

#[test]
fn test_terminate_unwinds_thread() {
    let rt = runtime();
    let dropped = Rc::new(Cell::new(false));
    let trace = Trace::new();

    let (worker, flag, inner) = (rt.clone(), dropped.clone(), trace.clone());
    rt.create(1, Priority::High, move |_| {
        let _guard = DropFlag(flag);
        inner.push("before");
        worker.terminate();
        inner.push("after");
    });
    drain(&rt);

    assert!(dropped.get());
    assert_eq!(trace.events(), vec!["before"]);
    assert_eq!(rt.stats().unwrap().threads_terminated, 1);
    rt.shutdown();
}

#[test]
fn test_terminate_uses_normal_dispatch() {
    let rt = runtime();
    let trace = Trace::new();

    let (worker, outer) = (rt.clone(), trace.clone());
    rt.create(1, Priority::High, move |_| {
        let (exiting, trace) = (worker.clone(), outer.clone());
        worker.create(2, Priority::High, move |_| {
            trace.push(2);
            exiting.terminate();
        });
        let trace = outer.clone();
        worker.create(3, Priority::High, move |_| trace.push(3));
        worker.yield_now();
        outer.push(1);
    });
    drain(&rt);

    // 2 exits through terminate, so the head of the ready queue (3) runs
    // instead of its creator (1); 3 then returns into 1
    assert_eq!(trace.events(), vec![2, 3, 1]);
    rt.shutdown();
}

#[test]
fn test_shutdown_makes_calls_noops() {
    let rt = runtime();
    rt.create(1, Priority::High, |_| {});
    rt.shutdown();

    assert!(!rt.is_live());
    assert_eq!(rt.current_id(), None);
    assert_eq!(rt.thread_count(), 0);
    assert!(rt.stats().is_none());
    rt.yield_now();
    rt.checkpoint();
    assert_eq!(rt.try_create(2, Priority::Low, |_| {}), Ok(()));
    assert_eq!(rt.thread_count(), 0);
    rt.send(ThreadId::MAIN, b"ignored");
    assert_eq!(rt.receive(ThreadId::WILDCARD), None);
    assert_eq!(rt.pending(), 0);
    rt.terminate();
    rt.shutdown();
}

#[test]
fn test_shutdown_destroys_unstarted_threads() {
    let rt = runtime();
    let dropped = Rc::new(Cell::new(false));
    let ran = Rc::new(Cell::new(false));

    let (flag, ran_flag) = (DropFlag(dropped.clone()), ran.clone());
    rt.create(1, Priority::High, move |_| {
        let _flag = flag;
        ran_flag.set(true);
    });
    rt.shutdown();

    assert!(dropped.get());
    assert!(!ran.get());
}

#[test]
fn test_single_running_thread_invariant() {
    let rt = runtime();
    let trace = Trace::new();
    for id in 1..=6 {
        let (worker, trace) = (rt.clone(), trace.clone());
        let priority = if id % 2 == 0 { Priority::High } else { Priority::Low };
        rt.create(id, priority, move |id| {
            for _ in 0..2 {
                trace.push((id, worker.current_id()));
                worker.yield_now();
            }
        });
    }
    drain(&rt);

    assert_eq!(trace.len(), 12);
    for (id, current) in trace.events() {
        assert_eq!(current, Some(id));
    }
    rt.shutdown();
}

#[test]
fn test_many_threads_reuse_slots() {
    let rt = runtime();
    let total = Rc::new(Cell::new(0));
    for round in 0..4 {
        for id in 1..=16 {
            let total = total.clone();
            rt.create(id, Priority::Low, move |id| total.set(total.get() + id.0 + round));
        }
        drain(&rt);
    }
    assert_eq!(total.get(), 4 * 136 + 16 * 6);
    rt.shutdown();
}

#[test]
fn test_preemption_interrupts_busy_thread() {
    let rt = Runtime::with_config(RuntimeConfig::default().with_quantum(Duration::from_millis(1)));
    let done = Rc::new(Cell::new(false));
    let saw_done = Rc::new(Cell::new(false));

    let (worker, flag, seen) = (rt.clone(), done.clone(), saw_done.clone());
    rt.create(1, Priority::High, move |_| {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !flag.get() && Instant::now() < deadline {
            worker.checkpoint();
        }
        seen.set(flag.get());
    });
    let flag = done.clone();
    rt.create(2, Priority::High, move |_| flag.set(true));
    drain(&rt);

    assert!(saw_done.get());
    let stats = rt.stats().unwrap();
    assert!(stats.preemptions >= 1);
    assert!(stats.ticks >= 1);
    rt.shutdown();
}

#[test]
fn test_checkpoint_without_ticker_never_yields() {
    let rt = runtime();
    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    rt.create(1, Priority::High, move |_| flag.set(true));
    for _ in 0..100 {
        rt.checkpoint();
    }
    assert!(!ran.get());
    drain(&rt);
    assert!(ran.get());
    assert_eq!(rt.stats().unwrap().preemptions, 0);
    rt.shutdown();
}
