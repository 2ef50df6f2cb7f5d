use std::thread;

use crossbeam::channel;

use crate::{scheduler, QUIET_PERIOD};

#[test]
fn test_releasing_join_hides_later_work() {
    let s = scheduler();
    let s2 = s.clone();
    s.run_synchronously(move || async move {
        s2.switch_to_background().await?;

        let (step_tx, step_rx) = channel::unbounded();
        let (go_tx, go_rx) = channel::bounded::<()>(0);
        let other = {
            let _suppressed = s2.suppress_relevance();
            let s3 = s2.clone();
            s2.spawn(async move {
                s3.switch_to_affinity_thread().await?;
                step_tx.send(1)?;
                s3.switch_to_background().await?;
                go_rx.recv()?;
                s3.switch_to_affinity_thread().await?;
                step_tx.send(2)?;
                anyhow::Ok(())
            })
        };

        let join = s2.join(other.node())?;
        assert_eq!(step_rx.recv()?, 1);
        join.release();

        go_tx.send(())?;
        anyhow::ensure!(
            step_rx.recv_timeout(QUIET_PERIOD).is_err(),
            "work queued after the release ran"
        );

        // Joining again lets it finish.
        let _join = s2.join(other.node())?;
        assert_eq!(step_rx.recv()?, 2);
        other.await?;
        anyhow::Ok(())
    })
    .unwrap();
}

#[test]
fn test_join_from_nested_run_services_outer_child() {
    let s = scheduler();
    let outer = s.clone();
    s.run_synchronously(move || async move {
        let s3 = outer.clone();
        let sibling = outer.spawn(async move {
            s3.switch_to_affinity_thread().await?;
            anyhow::Ok(9)
        });
        let node = sibling.node();

        let inner = outer.clone();
        let value = outer.run_synchronously_with_result(move || async move {
            let _join = inner.join(node)?;
            anyhow::Ok(sibling.await?)
        })?;
        assert_eq!(value, 9);
        anyhow::Ok(())
    })
    .unwrap();
}

#[test]
fn test_joins_form_cycles_safely() {
    let s = scheduler();
    let s2 = s.clone();
    s.run_synchronously(move || async move {
        let (a_tx, a_rx) = channel::bounded(1);
        let (b_tx, b_rx) = channel::bounded(1);
        let (done_tx, done_rx) = channel::bounded::<()>(0);
        let (done2_tx, done2_rx) = channel::bounded::<()>(0);

        let sa = s2.clone();
        let a = s2.spawn(async move {
            sa.switch_to_background().await?;
            let b = b_rx.recv()?;
            let _join = sa.join(b)?;
            done_rx.recv()?;
            anyhow::Ok(())
        });
        let sb = s2.clone();
        let b = s2.spawn(async move {
            sb.switch_to_background().await?;
            let a = a_rx.recv()?;
            let _join = sb.join(a)?;
            done2_rx.recv()?;
            anyhow::Ok(())
        });
        a_tx.send(a.node())?;
        b_tx.send(b.node())?;

        s2.switch_to_background().await?;
        let run = s2
            .current_node()
            .ok_or_else(|| anyhow::anyhow!("no ambient node"))?;
        // Both edges exist once each side has joined; traversal still ends.
        while s2.reachable(a.node())?.len() < 2 || s2.reachable(b.node())?.len() < 2 {
            thread::yield_now();
        }
        let reachable = s2.reachable(run)?;
        assert!(reachable.contains(&a.node()));
        assert!(reachable.contains(&b.node()));

        done_tx.send(())?;
        done2_tx.send(())?;
        a.await?;
        b.await?;
        anyhow::Ok(())
    })
    .unwrap();
}
