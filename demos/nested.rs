use std::sync::Arc;

use futures::FutureExt;
use sqlx_transacter::{AsyncTransacter, Error, MySqlDriver, TransactionCallbacks};

const INSERT_USER: i32 = 1;
const INSERT_AUDIT_LOG: i32 = 2;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "mysql://localhost/test".to_string());
    let driver = Arc::new(MySqlDriver::connect(&database_url).await?);
    driver.add_listener(
        &["users", "audit_log"],
        Arc::new(|| println!("   Listener: users/audit_log changed")),
    );
    let transacter = Arc::new(AsyncTransacter::new(driver.clone()));

    println!("=== Nested Transaction Example ===\n");

    // Example 1: nested frame commits together with the outer one
    println!("1. Nested transaction - both succeed...");
    let sql = driver.clone();
    let queries = transacter.clone();
    transacter
        .transaction(false, |tx| {
            async move {
                let result = sql
                    .execute(
                        sqlx::query("INSERT INTO users (name, email) VALUES (?, ?)")
                            .bind("David")
                            .bind("david@example.com"),
                    )
                    .await?;
                queries.notify_queries(INSERT_USER, |emit| emit("users"));
                let user_id = result.last_insert_id() as i64;
                println!("   Outer: Created user with ID {}", user_id);

                tx.after_commit(|| {
                    println!("   ✓ Both frames committed");
                    Ok(())
                });

                tx.transaction(|nested| {
                    let sql = sql.clone();
                    let queries = queries.clone();
                    async move {
                        sql.execute(
                            sqlx::query("INSERT INTO audit_log (user_id, action) VALUES (?, ?)")
                                .bind(user_id)
                                .bind("User created"),
                        )
                        .await?;
                        queries.notify_queries(INSERT_AUDIT_LOG, |emit| emit("audit_log"));
                        nested.after_rollback(|| {
                            println!("   Audit log rolled back");
                            Ok(())
                        });
                        println!("   Nested: Created audit log");
                        Ok::<_, Error>(())
                    }
                    .boxed()
                })
                .await?;
                Ok::<_, Error>(())
            }
            .boxed()
        })
        .await?;

    // Example 2: rolling back from a nested frame discards everything
    println!("\n2. Nested frame rolls back with a value...");
    let sql = driver.clone();
    let outcome = transacter
        .transaction_with_result(false, |tx| {
            async move {
                sql.execute(
                    sqlx::query("INSERT INTO users (name, email) VALUES (?, ?)")
                        .bind("Eve")
                        .bind("eve@example.com"),
                )
                .await?;
                tx.after_rollback(|| {
                    println!("   ✓ Eve was rolled back");
                    Ok(())
                });

                tx.transaction_with_result(|nested| {
                    async move { nested.rollback("duplicate email".to_string()) }.boxed()
                })
                .await?;

                Ok::<_, Error>("inserted".to_string())
            }
            .boxed()
        })
        .await?;
    println!("   Outcome: {}", outcome);

    // Example 3: an exclusive transaction cannot be opened inside another one
    println!("\n3. Exclusive transaction inside a transaction...");
    let inner = transacter.clone();
    let result = transacter
        .transaction(false, |_tx| {
            async move {
                inner
                    .transaction(true, |_nested| async move { Ok(()) }.boxed())
                    .await
            }
            .boxed()
        })
        .await;
    match result {
        Err(Error::AlreadyInTransaction) => println!("   ✓ Rejected: {}", Error::AlreadyInTransaction),
        other => println!("   ✗ Unexpected outcome: {:?}", other),
    }

    println!("\n=== All nested transaction examples completed ===");

    driver.pool().close().await;
    Ok(())
}
