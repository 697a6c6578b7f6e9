use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cells::{CoreError, CoreResult, Identifier};
use supervisor::{ChildFuture, ChildHandle, Strategy, Supervisor};

fn looping_child(counter: Arc<AtomicUsize>) -> supervisor::ChildFactory {
    Arc::new(move |mut handle: ChildHandle| {
        let counter = counter.clone();
        let fut: ChildFuture = Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            loop {
                if handle.is_terminated() {
                    return Ok(());
                }
                let outcome: CoreResult<()> = tokio::select! {
                    _ = handle.terminated() => Ok(()),
                    _ = tokio::time::sleep(Duration::from_millis(5)) => continue,
                };
                return outcome;
            }
        });
        fut
    })
}

fn panics_after(counter: Arc<AtomicUsize>, delay: Duration) -> supervisor::ChildFactory {
    Arc::new(move |_handle: ChildHandle| {
        let counter = counter.clone();
        let fut: ChildFuture = Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            panic!("scheduled failure")
        });
        fut
    })
}

#[tokio::test]
async fn one_for_one_restarts_only_the_failing_child() {
    let x_count = Arc::new(AtomicUsize::new(0));
    let y_count = Arc::new(AtomicUsize::new(0));

    let (sup, _fatal) = Supervisor::new(
        Identifier::from("sup/s3"),
        Strategy::OneForOne,
        5,
        Duration::from_secs(1),
    );
    sup.go(Identifier::from("sup/s3/x"), looping_child(x_count.clone()))
        .await
        .unwrap();
    sup.go(
        Identifier::from("sup/s3/y"),
        panics_after(y_count.clone(), Duration::from_millis(100)),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(x_count.load(Ordering::SeqCst), 1);
    assert!(y_count.load(Ordering::SeqCst) >= 5, "y only restarted {} times", y_count.load(Ordering::SeqCst));

    sup.stop().await;
}

#[tokio::test]
async fn one_for_all_restarts_every_child_together() {
    let x_count = Arc::new(AtomicUsize::new(0));
    let y_count = Arc::new(AtomicUsize::new(0));

    let (sup, _fatal) = Supervisor::new(
        Identifier::from("sup/s4"),
        Strategy::OneForAll,
        5,
        Duration::from_secs(1),
    );
    sup.go(Identifier::from("sup/s4/x"), looping_child(x_count.clone()))
        .await
        .unwrap();
    sup.go(
        Identifier::from("sup/s4/y"),
        panics_after(y_count.clone(), Duration::from_millis(100)),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    let x = x_count.load(Ordering::SeqCst);
    let y = y_count.load(Ordering::SeqCst);
    assert!(x >= 5, "x only restarted {x} times");
    assert!((x as i64 - y as i64).abs() <= 1, "x={x} y={y} should track together");

    sup.stop().await;
}

#[tokio::test]
async fn exceeding_the_restart_budget_fails_the_supervisor() {
    let z_count = Arc::new(AtomicUsize::new(0));

    let (sup, fatal) = Supervisor::new(
        Identifier::from("sup/s5"),
        Strategy::OneForOne,
        3,
        Duration::from_secs(1),
    );
    sup.go(
        Identifier::from("sup/s5/z"),
        panics_after(z_count.clone(), Duration::from_millis(10)),
    )
    .await
    .unwrap();

    let reason = tokio::time::timeout(Duration::from_secs(1), fatal)
        .await
        .expect("supervisor should fail within a second")
        .expect("fatal channel should resolve");

    match reason {
        CoreError::TooManyRestarts { count, elapsed } => {
            assert_eq!(count, 3);
            assert!(elapsed <= Duration::from_secs(1));
        }
        other => panic!("expected TooManyRestarts, got {other:?}"),
    }
}

#[tokio::test]
async fn terminate_rejects_an_unknown_child() {
    let (sup, _fatal) = Supervisor::new(
        Identifier::from("sup/unknown"),
        Strategy::OneForOne,
        5,
        Duration::from_secs(1),
    );
    let result = sup.terminate(&Identifier::from("sup/unknown/ghost")).await;
    assert!(matches!(result, Err(CoreError::InvalidChildId(_))));
    sup.stop().await;
}

#[tokio::test]
async fn nested_supervisor_failure_propagates_to_the_parent() {
    let z_count = Arc::new(AtomicUsize::new(0));

    let (parent, parent_fatal) = Supervisor::new(
        Identifier::from("sup/nested"),
        Strategy::OneForOne,
        1,
        Duration::from_secs(5),
    );
    let child = parent
        .supervisor(
            Identifier::from("sup/nested/inner"),
            Strategy::OneForOne,
            2,
            Duration::from_millis(200),
        )
        .await
        .unwrap();
    child
        .go(
            Identifier::from("sup/nested/inner/z"),
            panics_after(z_count.clone(), Duration::from_millis(5)),
        )
        .await
        .unwrap();

    let reason = tokio::time::timeout(Duration::from_secs(2), parent_fatal)
        .await
        .expect("parent should observe the nested failure")
        .expect("fatal channel should resolve");
    assert!(matches!(reason, CoreError::TooManyRestarts { .. }));
}
