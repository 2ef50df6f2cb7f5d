use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::{scheduler, QUIET_PERIOD};

#[test]
fn test_leave_and_return_repeatedly() {
    let s = scheduler();
    let s2 = s.clone();
    let affinity = thread::current().id();
    let hops = s
        .run_synchronously_with_result(move || async move {
            let mut hops = 0;
            for _ in 0..5 {
                s2.switch_to_background().await?;
                assert_ne!(thread::current().id(), affinity);
                s2.switch_to_affinity_thread().await?;
                assert_eq!(thread::current().id(), affinity);
                hops += 1;
            }
            anyhow::Ok(hops)
        })
        .unwrap();
    assert_eq!(hops, 5);
}

#[test]
fn test_run_result_from_background() {
    let s = scheduler();
    let s2 = s.clone();
    let value = s
        .run_synchronously_with_result(move || async move {
            s2.switch_to_background().await?;
            anyhow::Ok((1..=5).product::<u64>())
        })
        .unwrap();
    assert_eq!(value, 120);
}

#[test]
fn test_yield_lets_other_relevant_work_run() {
    let s = scheduler();
    let s2 = s.clone();
    s.run_synchronously(move || async move {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let s3 = s2.clone();
        let child = s2.spawn(async move {
            s3.switch_to_affinity_thread().await?;
            flag.store(true, Ordering::SeqCst);
            anyhow::Ok(())
        });
        while !ran.load(Ordering::SeqCst) {
            affinity_pump::yield_now().await;
        }
        assert!(s2.is_affinity_thread());
        child.await?;
        anyhow::Ok(())
    })
    .unwrap();
}

#[test]
fn test_nested_run_completes() {
    let s = scheduler();
    let outer = s.clone();
    let affinity = thread::current().id();
    s.run_synchronously(move || async move {
        let inner = outer.clone();
        let value = outer.run_synchronously_with_result(move || async move {
            inner.switch_to_background().await?;
            inner.switch_to_affinity_thread().await?;
            assert_eq!(thread::current().id(), affinity);
            anyhow::Ok(7)
        })?;
        assert_eq!(value, 7);
        outer.switch_to_background().await?;
        outer.switch_to_affinity_thread().await?;
        anyhow::Ok(())
    })
    .unwrap();
    assert_eq!(s.live_nodes(), 0);
}

#[test]
fn test_nested_run_does_not_service_sibling() {
    let s = scheduler();
    let outer = s.clone();
    s.run_synchronously(move || async move {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let s3 = outer.clone();
        let sibling = outer.spawn(async move {
            s3.switch_to_affinity_thread().await?;
            flag.store(true, Ordering::SeqCst);
            anyhow::Ok(())
        });

        let inner = outer.clone();
        let seen = ran.clone();
        outer.run_synchronously(move || async move {
            inner.switch_to_background().await?;
            thread::sleep(QUIET_PERIOD);
            anyhow::ensure!(!seen.load(Ordering::SeqCst), "sibling ran inside nested run");
            anyhow::Ok(())
        })?;

        // The outer run can reach its own child.
        sibling.await?;
        assert!(ran.load(Ordering::SeqCst));
        anyhow::Ok(())
    })
    .unwrap();
}

#[test]
fn test_nested_run_failure_propagates_to_outer() {
    let s = scheduler();
    let outer = s.clone();
    let err = s
        .run_synchronously(move || async move {
            outer.run_synchronously(|| async { Err(anyhow::anyhow!("inner failed")) })?;
            anyhow::Ok(())
        })
        .unwrap_err();
    assert!(err.is_operation_failure());
    assert!(format!("{:#}", anyhow::Error::from(err)).contains("inner failed"));
}
