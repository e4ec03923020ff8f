mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{Event, HookLog, RecordingDriver};
use futures::FutureExt;
use sqlx_transacter::{AsyncTransacter, Error, TransactionCallbacks};

fn transacter() -> (Arc<RecordingDriver>, Arc<AsyncTransacter>) {
    let driver = RecordingDriver::new();
    let transacter = Arc::new(AsyncTransacter::new(driver.clone()));
    (driver, transacter)
}

#[tokio::test]
async fn test_commit_runs_nested_hooks_once() {
    let (driver, transacter) = transacter();
    let log = HookLog::default();

    transacter
        .transaction(false, |tx| {
            let log = log.clone();
            async move {
                tx.after_commit(log.record("root"));
                tx.transaction(|nested| {
                    let log = log.clone();
                    async move {
                        nested.after_commit(log.record("nested"));
                        nested.after_rollback(log.record("rollback"));
                        Ok(())
                    }
                    .boxed()
                })
                .await?;
                Ok::<_, Error>(())
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(log.entries(), vec!["root", "nested"]);
    assert_eq!(driver.events(), vec![Event::Begin, Event::Commit]);
    assert_eq!(driver.active(), 0);
}

#[tokio::test]
async fn test_nested_rollback_runs_rollback_hooks() {
    let (driver, transacter) = transacter();
    let log = HookLog::default();
    let reached = Arc::new(AtomicUsize::new(0));

    transacter
        .transaction(false, |tx| {
            let log = log.clone();
            let reached = reached.clone();
            async move {
                tx.after_commit(log.record("commit"));
                tx.after_rollback(log.record("root-rollback"));
                tx.transaction(|nested| {
                    let log = log.clone();
                    async move {
                        nested.after_rollback(log.record("nested-rollback"));
                        nested.rollback()
                    }
                    .boxed()
                })
                .await?;
                reached.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(())
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(reached.load(Ordering::SeqCst), 0);
    assert_eq!(log.entries(), vec!["root-rollback", "nested-rollback"]);
    assert_eq!(driver.events(), vec![Event::Begin, Event::Rollback]);
}

#[tokio::test]
async fn test_rollback_with_value_is_returned() {
    let (_driver, transacter) = transacter();

    let value = transacter
        .transaction_with_result(false, |tx| async move { tx.rollback(42) }.boxed())
        .await
        .unwrap();

    assert_eq!(value, 42);
}

#[tokio::test]
async fn test_no_enclosing_inside_transaction_is_rejected() {
    let (driver, transacter) = transacter();
    let inner = transacter.clone();

    let err = transacter
        .transaction(true, |_tx| {
            async move {
                inner
                    .transaction(true, |_nested| async move { Ok(()) }.boxed())
                    .await
            }
            .boxed()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::AlreadyInTransaction));
    assert_eq!(driver.events(), vec![Event::Begin, Event::Rollback]);
    assert_eq!(driver.active(), 0);
}

#[tokio::test]
async fn test_repeated_statement_notifies_once_after_commit() {
    let (driver, transacter) = transacter();
    let inner = transacter.clone();

    transacter
        .transaction(false, |_tx| {
            async move {
                for _ in 0..1000 {
                    inner.notify_queries(17, |emit| emit("users"));
                }
                Ok(())
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(driver.notifications(), vec![vec!["users".to_string()]]);
}

#[tokio::test]
async fn test_composite_rollback_error() {
    let (_driver, transacter) = transacter();

    let err = transacter
        .transaction(false, |tx| {
            async move {
                tx.after_rollback(|| Err("ExceptionA".into()));
                Err(Error::other("ExceptionB"))
            }
            .boxed()
        })
        .await
        .unwrap_err();

    let text = err.to_string();
    assert!(text.contains("ExceptionA"), "{text}");
    assert!(text.contains("ExceptionB"), "{text}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_tasks_keep_separate_batches() {
    let (driver, transacter) = transacter();

    let tasks: Vec<_> = ["users", "profiles"]
        .into_iter()
        .map(|table| {
            let transacter = transacter.clone();
            tokio::spawn(async move {
                let inner = transacter.clone();
                transacter
                    .transaction(false, move |_tx| {
                        async move {
                            inner.notify_queries(1, |emit| emit(table));
                            tokio::task::yield_now().await;
                            inner.notify_queries(2, |emit| emit(table));
                            Ok(())
                        }
                        .boxed()
                    })
                    .await
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let mut notifications = driver.notifications();
    notifications.sort();
    assert_eq!(
        notifications,
        vec![vec!["profiles".to_string()], vec!["users".to_string()]]
    );
    assert_eq!(driver.count(&Event::Begin), 2);
    assert_eq!(driver.active(), 0);
}

#[tokio::test]
async fn test_joined_roots_on_one_task_are_isolated() {
    let (driver, transacter) = transacter();
    let first = transacter.clone();
    let second = transacter.clone();

    let (a, b) = tokio::join!(
        transacter.transaction(false, |_tx| {
            async move {
                tokio::task::yield_now().await;
                first.notify_queries(1, |emit| emit("users"));
                Ok(())
            }
            .boxed()
        }),
        transacter.transaction(false, |_tx| {
            async move {
                second.notify_queries(2, |emit| emit("profiles"));
                tokio::task::yield_now().await;
                Ok(())
            }
            .boxed()
        }),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(driver.count(&Event::Begin), 2);
    assert_eq!(driver.count(&Event::Commit), 2);
    assert_eq!(driver.notifications().len(), 2);
}

#[tokio::test]
async fn test_timed_out_transactions_release_their_slots() {
    let (driver, transacter) = transacter();
    let log = HookLog::default();

    for _ in 0..3 {
        let log = log.clone();
        let timed_out = tokio::time::timeout(
            Duration::from_millis(5),
            transacter.transaction(false, move |tx| {
                async move {
                    tx.after_rollback(log.record("rollback"));
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                }
                .boxed()
            }),
        )
        .await;
        assert!(timed_out.is_err());
    }

    assert_eq!(driver.active(), 0);
    assert_eq!(driver.count(&Event::Rollback), 3);
    assert_eq!(log.entries(), vec!["rollback"; 3]);

    let hooks = log.clone();
    transacter
        .transaction(false, move |tx| {
            async move {
                tx.after_commit(hooks.record("commit"));
                Ok(())
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(driver.count(&Event::Begin), 4);
    assert_eq!(driver.events().last(), Some(&Event::Commit));
    assert_eq!(log.entries().last().map(String::as_str), Some("commit"));
}

#[tokio::test]
async fn test_timed_out_nested_frame_rolls_back_the_tree() {
    let (driver, transacter) = transacter();
    let log = HookLog::default();

    transacter
        .transaction(false, |tx| {
            let log = log.clone();
            async move {
                tx.after_commit(log.record("commit"));
                let timed_out = tokio::time::timeout(
                    Duration::from_millis(5),
                    tx.transaction(|nested| {
                        let log = log.clone();
                        async move {
                            nested.after_rollback(log.record("nested-rollback"));
                            tokio::time::sleep(Duration::from_secs(10)).await;
                            Ok(())
                        }
                        .boxed()
                    }),
                )
                .await;
                assert!(timed_out.is_err());
                Ok(())
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(log.entries(), vec!["nested-rollback"]);
    assert_eq!(driver.events(), vec![Event::Begin, Event::Rollback]);
    assert_eq!(driver.active(), 0);
}

#[tokio::test]
async fn test_wrapper_used_off_its_task_panics() {
    let (driver, transacter) = transacter();

    transacter
        .transaction(false, |tx| {
            async move {
                let joined =
                    std::thread::scope(|s| s.spawn(|| tx.after_commit(|| Ok(()))).join());
                assert!(joined.is_err());
                let joined = std::thread::scope(|s| s.spawn(|| tx.rollback::<()>()).join());
                assert!(joined.is_err());
                Ok(())
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(driver.events(), vec![Event::Begin, Event::Commit]);
}

#[tokio::test]
async fn test_failed_commit_hook_stops_later_hooks() {
    let (_driver, transacter) = transacter();
    let log = HookLog::default();

    let err = transacter
        .transaction(false, |tx| {
            let log = log.clone();
            async move {
                tx.after_commit(log.record("first"));
                tx.after_commit(|| Err("hook failed".into()));
                tx.after_commit(log.record("third"));
                Ok(())
            }
            .boxed()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Hook(_)));
    assert_eq!(log.entries(), vec!["first"]);
}
