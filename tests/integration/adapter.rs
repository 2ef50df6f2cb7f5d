use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use affinity_pump::WorkScheduler;
use crossbeam::channel;

use crate::scheduler;

/// Code written against the generic work-target trait.
fn post_increment(target: &dyn WorkScheduler, counter: Arc<AtomicUsize>) {
    target.schedule(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
}

#[test]
fn test_work_target_executes_on_affinity_thread() {
    let s = scheduler();
    let s2 = s.clone();
    let affinity = thread::current().id();
    s.run_synchronously(move || async move {
        let target = s2.as_work_scheduler();
        let (tx, rx) = channel::bounded(1);
        s2.switch_to_background().await?;
        target.schedule(Box::new(move || {
            let _ = tx.send(thread::current().id());
        }));
        assert_eq!(rx.recv()?, affinity);
        anyhow::Ok(())
    })
    .unwrap();
}

#[test]
fn test_work_target_via_trait_object() {
    let s = scheduler();
    let s2 = s.clone();
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    s.run_synchronously(move || async move {
        let target = s2.as_work_scheduler();
        for _ in 0..3 {
            post_increment(&target, counter.clone());
        }
        s2.switch_to_background().await?;
        while counter.load(Ordering::SeqCst) < 3 {
            thread::yield_now();
        }
        anyhow::Ok(())
    })
    .unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[test]
fn test_run_returns_closure_value() {
    let s = scheduler();
    let s2 = s.clone();
    let name = s
        .run_synchronously_with_result(move || async move {
            s2.switch_to_background().await?;
            let name = s2
                .as_work_scheduler()
                .run(|| thread::current().name().map(str::to_owned))
                .await?;
            anyhow::Ok(name)
        })
        .unwrap();
    assert_eq!(name, thread::current().name().map(str::to_owned));
}

#[test]
fn test_work_target_preserves_submission_order() {
    let s = scheduler();
    let s2 = s.clone();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let log = seen.clone();
    s.run_synchronously(move || async move {
        s2.switch_to_background().await?;
        let target = s2.as_work_scheduler();
        for i in 0..20 {
            let log = log.clone();
            post_with(&target, move || log.lock().push(i));
        }
        while log.lock().len() < 20 {
            thread::yield_now();
        }
        anyhow::Ok(())
    })
    .unwrap();
    assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
}

fn post_with(target: &dyn WorkScheduler, work: impl FnOnce() + Send + 'static) {
    target.schedule(Box::new(work));
}
