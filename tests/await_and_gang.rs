//! Blocking reads, wakeups and gangs

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use plasma::pool::{Awaited, Gang, PoolError, PoolOptions, Pools, Timeout};
use plasma::{Protein, Slaw};
use tracing_test::traced_test;

const PATIENCE: Timeout = Timeout::After(Duration::from_secs(10));

fn pools_with(tmp: &tempfile::TempDir, names: &[&str]) -> anyhow::Result<Pools> {
    let pools = Pools::in_dir(tmp.path());
    for name in names {
        pools.create(name, Some(&PoolOptions::mmap().size(64 * 1024)))?;
    }
    Ok(pools)
}

fn tagged(tag: &str) -> Protein {
    Protein::builder().descrip(tag).build()
}

#[test]
fn test_await_on_empty_pool_times_out() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let pools = pools_with(&tmp, &["p"])?;
    let mut hose = pools.participate("p")?;

    assert_eq!(hose.await_next(Timeout::NoWait)?, Awaited::TimedOut);

    let start = Instant::now();
    assert_eq!(hose.await_next(Timeout::After(Duration::from_millis(50)))?, Awaited::TimedOut);
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(hose.index(), 0);
    Ok(())
}

#[test]
fn test_await_returns_pending_protein_without_blocking() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let pools = pools_with(&tmp, &["p"])?;
    let mut hose = pools.participate("p")?;
    hose.deposit(&tagged("ready"))?;
    let got = hose.await_next(Timeout::NoWait)?.ready();
    assert_eq!(got.map(|r| r.index), Some(0));
    Ok(())
}

#[test]
#[traced_test]
fn test_deposit_from_another_thread_wakes_waiter() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let pools = pools_with(&tmp, &["p"])?;
    let mut reader = pools.participate("p")?;
    let writer = pools.participate("p")?;

    let depositor = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        writer.deposit(&tagged("late")).map(|(index, _)| index)
    });
    let got = reader.await_next(PATIENCE)?;
    assert_eq!(depositor.join().map_err(|_| anyhow::anyhow!("depositor panicked"))??, 0);

    let r = got.ready().ok_or_else(|| anyhow::anyhow!("await did not return a protein"))?;
    assert!(r.protein.has_descrip(&Slaw::from("late")));
    assert_eq!(reader.index(), 1);
    Ok(())
}

#[test]
fn test_await_probe_skips_non_matching() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let pools = pools_with(&tmp, &["p"])?;
    let mut reader = pools.participate("p")?;
    let writer = pools.participate("p")?;

    let depositor = thread::spawn(move || -> plasma::pool::Result<()> {
        for tag in ["noise", "noise", "signal"] {
            thread::sleep(Duration::from_millis(20));
            writer.deposit(&tagged(tag))?;
        }
        Ok(())
    });
    let got = reader.await_probe_frwd(&Slaw::from("signal"), PATIENCE)?;
    depositor.join().map_err(|_| anyhow::anyhow!("depositor panicked"))??;
    assert_eq!(got.ready().map(|r| r.index), Some(2));

    let start = reader.index();
    assert_eq!(
        reader.await_probe_frwd(&Slaw::from("signal"), Timeout::After(Duration::from_millis(30)))?,
        Awaited::TimedOut
    );
    assert_eq!(reader.index(), start);
    Ok(())
}

#[test]
fn test_waker_interrupts_wait_once_enabled() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let pools = pools_with(&tmp, &["p"])?;
    let mut hose = pools.participate("p")?;

    // not enabled: the wake is dropped and the wait runs out
    hose.waker()?.wake()?;
    assert_eq!(hose.await_next(Timeout::After(Duration::from_millis(50)))?, Awaited::TimedOut);

    hose.enable_wakeup()?;
    let waker = hose.waker()?;
    let nudger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        waker.wake()
    });
    assert_eq!(hose.await_next(PATIENCE)?, Awaited::Woken);
    nudger.join().map_err(|_| anyhow::anyhow!("waker panicked"))??;

    hose.wake_up()?;
    assert_eq!(hose.await_next(Timeout::NoWait)?, Awaited::TimedOut);
    assert_eq!(hose.await_next(PATIENCE)?, Awaited::Woken);
    Ok(())
}

#[test]
fn test_concurrent_depositors_get_contiguous_indices() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let pools = Pools::in_dir(tmp.path());
    pools.create("busy", Some(&PoolOptions::mmap()))?;

    let workers: Vec<_> = (0..4)
        .map(|w| {
            let pools = pools.clone();
            thread::spawn(move || -> plasma::pool::Result<Vec<u64>> {
                let hose = pools.participate("busy")?;
                (0..50)
                    .map(|i| {
                        let p = Protein::builder().ingest("worker", w as u64).ingest("i", i as u64).build();
                        hose.deposit(&p).map(|(index, _)| index)
                    })
                    .collect()
            })
        })
        .collect();

    let mut indices = Vec::new();
    for worker in workers {
        indices.extend(worker.join().map_err(|_| anyhow::anyhow!("worker panicked"))??);
    }
    indices.sort_unstable();
    assert_eq!(indices, (0..200).collect::<Vec<u64>>());
    Ok(())
}

#[test]
#[traced_test]
fn test_gang_reads_whichever_pool_has_data() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let pools = pools_with(&tmp, &["left", "right"])?;
    let gang = Gang::new()?;
    let left = gang.join(Arc::new(Mutex::new(pools.participate("left")?)))?;
    let right = gang.join(Arc::new(Mutex::new(pools.participate("right")?)))?;
    assert_eq!(gang.len(), 2);

    assert_eq!(gang.await_next_multi(Timeout::NoWait)?, Awaited::TimedOut);

    let writer = pools.participate("right")?;
    let depositor = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        writer.deposit(&tagged("to-right")).map(|(index, _)| index)
    });
    let got = gang.await_next_multi(PATIENCE)?;
    depositor.join().map_err(|_| anyhow::anyhow!("depositor panicked"))??;
    let (who, r) = got.ready().ok_or_else(|| anyhow::anyhow!("gang did not return a protein"))?;
    assert_eq!(who, right);
    assert!(r.protein.has_descrip(&Slaw::from("to-right")));

    // the member's own cursor moved with the gang read
    let right_hose = gang.member(right).ok_or_else(|| anyhow::anyhow!("right left the gang"))?;
    assert_eq!(right_hose.lock().index(), 1);

    pools.participate("left")?.deposit(&tagged("to-left"))?;
    let (who, _) = gang
        .await_next_multi(Timeout::NoWait)?
        .ready()
        .ok_or_else(|| anyhow::anyhow!("left protein missing"))?;
    assert_eq!(who, left);
    Ok(())
}

#[test]
fn test_gang_membership() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let pools = pools_with(&tmp, &["p"])?;
    let gang = Gang::new()?;
    assert!(gang.is_empty());
    assert!(matches!(gang.await_next_multi(Timeout::NoWait), Err(PoolError::EmptyGang)));

    let hose = Arc::new(Mutex::new(pools.participate("p")?));
    let id = gang.join(Arc::clone(&hose))?;
    assert!(matches!(gang.join(Arc::clone(&hose)), Err(PoolError::AlreadyGangMember)));

    let back = gang.leave(id)?;
    assert!(Arc::ptr_eq(&back, &hose));
    assert!(matches!(gang.leave(id), Err(PoolError::NotAGangMember)));
    assert!(gang.member(id).is_none());

    // a reused slot does not answer to the old id
    let again = gang.join(hose)?;
    assert_ne!(again, id);
    assert!(gang.member(id).is_none());
    assert_eq!(gang.len(), 1);
    Ok(())
}

#[test]
fn test_gang_waker() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let pools = pools_with(&tmp, &["p"])?;
    let gang = Arc::new(Gang::new()?);
    gang.join(Arc::new(Mutex::new(pools.participate("p")?)))?;

    let waker = gang.waker();
    let nudger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        waker.wake()
    });
    assert_eq!(gang.await_next_multi(PATIENCE)?, Awaited::Woken);
    nudger.join().map_err(|_| anyhow::anyhow!("waker panicked"))??;

    gang.wake_up()?;
    assert_eq!(gang.await_next_multi(Timeout::NoWait)?, Awaited::Woken);
    assert_eq!(
        gang.await_next_multi(Timeout::After(Duration::from_millis(20)))?,
        Awaited::TimedOut
    );
    Ok(())
}

#[test]
fn test_gang_keeps_wakeup_that_arrives_with_data() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let pools = pools_with(&tmp, &["p"])?;
    let gang = Gang::new()?;
    let id = gang.join(Arc::new(Mutex::new(pools.participate("p")?)))?;

    pools.participate("p")?.deposit(&tagged("with-wake"))?;
    gang.wake_up()?;
    let (who, r) = gang
        .await_next_multi(Timeout::NoWait)?
        .ready()
        .ok_or_else(|| anyhow::anyhow!("pending protein not returned"))?;
    assert_eq!((who, r.index), (id, 0));
    assert_eq!(gang.await_next_multi(Timeout::NoWait)?, Awaited::Woken);
    assert_eq!(gang.await_next_multi(Timeout::NoWait)?, Awaited::TimedOut);
    Ok(())
}

#[test]
fn test_hose_keeps_wakeup_that_arrives_with_data() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let pools = pools_with(&tmp, &["p"])?;
    let mut hose = pools.participate("p")?;
    hose.enable_wakeup()?;

    pools.participate("p")?.deposit(&tagged("with-wake"))?;
    hose.wake_up()?;
    assert_eq!(hose.await_next(PATIENCE)?.ready().map(|r| r.index), Some(0));
    assert_eq!(hose.await_next(PATIENCE)?, Awaited::Woken);
    assert_eq!(hose.await_next(Timeout::After(Duration::from_millis(20)))?, Awaited::TimedOut);
    Ok(())
}
