//! PostgreSQL connection implementation

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio_postgres::{CancelToken, Client, NoTls, Row as PgRow, Statement};
use templar_core::{
    ColumnMeta, Connection, ProcedureCall, QueryCancelHandle, QueryResult, Result, Row,
    RowCursor, SqlType, StatementResult, TemplarError, Transaction, Value, row_channel,
};

use crate::types::{as_refs, bind_params, map_postgres_error, pg_type_name, postgres_to_value};

/// Cancel handle for PostgreSQL queries.
///
/// This wraps the tokio-postgres `CancelToken` and can be called from any thread
/// to send a cancel request to the PostgreSQL server.
pub struct PostgresCancelHandle {
    cancel_token: CancelToken,
    runtime: tokio::runtime::Handle,
}

impl QueryCancelHandle for PostgresCancelHandle {
    fn cancel(&self) {
        tracing::debug!("Sending cancel request to PostgreSQL server");
        let cancel_token = self.cancel_token.clone();
        self.runtime.spawn(async move {
            if let Err(e) = cancel_token.cancel_query(NoTls).await {
                tracing::warn!(error = %e, "Failed to cancel PostgreSQL query");
            }
        });
    }
}

/// PostgreSQL connection wrapper
pub struct PostgresConnection {
    client: Arc<Mutex<Client>>,
    cancel_token: CancelToken,
    runtime: tokio::runtime::Handle,
    closed: Arc<AtomicBool>,
}

impl PostgresConnection {
    /// Connect to a PostgreSQL database
    ///
    /// Must be called from within a Tokio runtime; the connection task is
    /// spawned onto it.
    pub async fn connect(
        host: &str,
        port: u16,
        database: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self> {
        tracing::info!(host = %host, port = %port, database = %database, "connecting to PostgreSQL database");

        let mut config = tokio_postgres::Config::new();
        config.host(host).port(port).dbname(database);
        if let Some(u) = user {
            config.user(u);
        }
        if let Some(p) = password {
            config.password(p);
        }

        let (client, connection) = config.connect(NoTls).await.map_err(|e| {
            TemplarError::Connection(format!("Failed to connect to PostgreSQL: {}", e))
        })?;

        let closed = Arc::new(AtomicBool::new(false));
        let runtime = tokio::runtime::Handle::current();
        runtime.spawn({
            let closed = Arc::clone(&closed);
            async move {
                if let Err(e) = connection.await {
                    tracing::error!(error = %e, "PostgreSQL connection error");
                }
                closed.store(true, Ordering::SeqCst);
            }
        });

        tracing::info!(host = %host, port = %port, database = %database, "PostgreSQL connection established");
        Ok(Self {
            cancel_token: client.cancel_token(),
            client: Arc::new(Mutex::new(client)),
            runtime,
            closed,
        })
    }
}

/// `CALL proc($1, .., $n, NULL::type, ..)`: OUT arguments are passed as typed
/// NULLs and come back as the columns of the single result row
fn build_call_sql(call: &ProcedureCall) -> String {
    let args: Vec<String> = (1..=call.in_values.len())
        .map(|position| format!("${}", position))
        .chain(
            call.out_slots
                .iter()
                .map(|slot| format!("NULL::{}", pg_type_name(slot.sql_type))),
        )
        .collect();
    format!("CALL {}({})", call.procedure, args.join(", "))
}

fn escape_identifier_pg(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn describe_columns(statement: &Statement) -> (Vec<String>, Vec<ColumnMeta>) {
    statement
        .columns()
        .iter()
        .enumerate()
        .map(|(ordinal, col)| {
            (
                col.name().to_string(),
                ColumnMeta {
                    name: col.name().to_string(),
                    data_type: col.type_().name().to_string(),
                    nullable: true,
                    ordinal,
                },
            )
        })
        .unzip()
}

fn convert_row(pg_row: &PgRow, column_names: &[String]) -> Result<Row> {
    let values = (0..column_names.len())
        .map(|idx| postgres_to_value(pg_row, idx))
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::new(column_names.to_vec(), values))
}

async fn query_on(client: &Client, sql: &str, params: &[Value]) -> Result<QueryResult> {
    let start_time = std::time::Instant::now();

    // Prepare first so we know the target types for each parameter
    let statement = client
        .prepare(sql)
        .await
        .map_err(|e| map_postgres_error("Failed to prepare query", &e))?;
    let pg_params = bind_params(&statement, params);

    let pg_rows = client
        .query(&statement, &as_refs(&pg_params))
        .await
        .map_err(|e| map_postgres_error("Failed to execute query", &e))?;

    // Columns come from the statement so empty results still describe them
    let (column_names, columns) = describe_columns(&statement);
    let rows = pg_rows
        .iter()
        .map(|pg_row| convert_row(pg_row, &column_names))
        .collect::<Result<Vec<_>>>()?;

    Ok(QueryResult {
        id: uuid::Uuid::new_v4(),
        columns,
        rows,
        affected_rows: 0,
        execution_time_ms: start_time.elapsed().as_millis() as u64,
    })
}

async fn execute_on(client: &Client, sql: &str, params: &[Value]) -> Result<StatementResult> {
    let statement = client
        .prepare(sql)
        .await
        .map_err(|e| map_postgres_error("Failed to prepare statement", &e))?;
    let pg_params = bind_params(&statement, params);

    let rows_affected = client
        .execute(&statement, &as_refs(&pg_params))
        .await
        .map_err(|e| map_postgres_error("Failed to execute statement", &e))?;

    Ok(StatementResult {
        affected_rows: rows_affected,
    })
}

#[async_trait]
impl Connection for PostgresConnection {
    fn driver_name(&self) -> &str {
        "postgresql"
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let client = self.client.lock().await;
        let result = execute_on(&client, sql, params).await?;
        tracing::debug!(affected_rows = result.affected_rows, "statement executed");
        Ok(result)
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let client = self.client.lock().await;
        let result = query_on(&client, sql, params).await?;
        tracing::debug!(
            row_count = result.rows.len(),
            execution_time_ms = result.execution_time_ms,
            "query executed successfully"
        );
        Ok(result)
    }

    /// Streams through a portal inside a transaction, pulling `fetch_size`
    /// rows per round trip. The client stays locked until the portal is done.
    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query_stream(
        &self,
        sql: &str,
        params: &[Value],
        fetch_size: usize,
    ) -> Result<RowCursor> {
        let mut client = Arc::clone(&self.client).lock_owned().await;
        let statement = client
            .prepare(sql)
            .await
            .map_err(|e| map_postgres_error("Failed to prepare query", &e))?;
        let pg_params = bind_params(&statement, params);
        let (column_names, _) = describe_columns(&statement);

        let (tx, cursor) = row_channel(fetch_size);
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<Result<()>>();
        let batch_size = fetch_size.clamp(1, i32::MAX as usize) as i32;

        self.runtime.spawn(async move {
            let transaction = match client.transaction().await {
                Ok(transaction) => transaction,
                Err(e) => {
                    let _ = ready_tx.send(Err(map_postgres_error("Failed to begin stream", &e)));
                    return;
                }
            };
            let portal = match transaction.bind(&statement, &as_refs(&pg_params)).await {
                Ok(portal) => portal,
                Err(e) => {
                    let _ = ready_tx.send(Err(map_postgres_error("Failed to execute query", &e)));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            let mut delivered = 0usize;
            let mut completed = false;
            'fetch: loop {
                let batch = match transaction.query_portal(&portal, batch_size).await {
                    Ok(batch) => batch,
                    Err(e) => {
                        let _ = tx.send(Err(map_postgres_error("Failed to fetch rows", &e))).await;
                        break;
                    }
                };
                let last_batch = batch.len() < batch_size as usize;
                for pg_row in &batch {
                    let item = convert_row(pg_row, &column_names);
                    let failed = item.is_err();
                    if !tx.send(item).await || failed {
                        break 'fetch;
                    }
                    delivered += 1;
                }
                if last_batch {
                    completed = true;
                    break;
                }
            }

            let finished = if completed {
                transaction.commit().await
            } else {
                transaction.rollback().await
            };
            if let Err(e) = finished {
                tracing::warn!(error = %e, "failed to close PostgreSQL stream transaction");
            }
            tracing::debug!(delivered, completed, "PostgreSQL stream producer finished");
        });

        ready_rx
            .await
            .map_err(|_| TemplarError::Query("PostgreSQL stream task exited early".into()))??;

        Ok(cursor.with_cancel_handle(self.cancel_handle()))
    }

    /// Runs the call in a transaction so refcursor OUT values can still be
    /// fetched before they are closed at commit.
    #[tracing::instrument(skip(self, call), fields(procedure = %call.procedure))]
    async fn call(&self, call: &ProcedureCall) -> Result<Vec<Value>> {
        let sql = build_call_sql(call);
        let mut client = self.client.lock().await;
        let transaction = client
            .transaction()
            .await
            .map_err(|e| map_postgres_error("Failed to begin call", &e))?;

        let statement = transaction
            .prepare(&sql)
            .await
            .map_err(|e| map_postgres_error("Failed to prepare call", &e))?;
        let pg_params = bind_params(&statement, &call.in_values);
        let result_row = transaction
            .query_opt(&statement, &as_refs(&pg_params))
            .await
            .map_err(|e| map_postgres_error("Failed to execute call", &e))?;

        let mut out_values = Vec::with_capacity(call.out_slots.len());
        if !call.out_slots.is_empty() {
            let row = result_row.ok_or_else(|| {
                TemplarError::Query(format!("{} returned no OUT values", call.procedure))
            })?;
            if row.len() < call.out_slots.len() {
                return Err(TemplarError::Query(format!(
                    "{} returned {} OUT values, expected {}",
                    call.procedure,
                    row.len(),
                    call.out_slots.len()
                )));
            }

            for (idx, slot) in call.out_slots.iter().enumerate() {
                let value = postgres_to_value(&row, idx)?;
                let value = match (slot.sql_type, value) {
                    (SqlType::Cursor, Value::Text(portal_name)) => {
                        let fetch = format!("FETCH ALL FROM {}", escape_identifier_pg(&portal_name));
                        let cursor_rows = transaction
                            .query(fetch.as_str(), &[])
                            .await
                            .map_err(|e| map_postgres_error("Failed to fetch cursor", &e))?;
                        let names: Vec<String> = cursor_rows
                            .first()
                            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
                            .unwrap_or_default();
                        let rows = cursor_rows
                            .iter()
                            .map(|r| convert_row(r, &names))
                            .collect::<Result<Vec<_>>>()?;
                        Value::Cursor(rows)
                    }
                    (_, value) => value,
                };
                out_values.push(value);
            }
        }

        transaction
            .commit()
            .await
            .map_err(|e| map_postgres_error("Failed to commit call", &e))?;

        tracing::debug!(out_count = out_values.len(), "procedure call completed");
        Ok(out_values)
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        tracing::debug!("beginning PostgreSQL transaction");
        {
            let client = self.client.lock().await;
            client
                .batch_execute("BEGIN")
                .await
                .map_err(|e| map_postgres_error("Failed to begin transaction", &e))?;
        }

        Ok(Box::new(PostgresTransaction {
            client: Arc::clone(&self.client),
            finished: false,
        }))
    }

    async fn close(&self) -> Result<()> {
        tracing::info!("closing PostgreSQL connection");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn cancel_handle(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        Some(Arc::new(PostgresCancelHandle {
            cancel_token: self.cancel_token.clone(),
            runtime: self.runtime.clone(),
        }))
    }
}

/// PostgreSQL transaction wrapper
///
/// Statements take the client lock one at a time; the pooled connection is
/// held exclusively by its caller, so nothing interleaves between them.
pub struct PostgresTransaction {
    client: Arc<Mutex<Client>>,
    finished: bool,
}

impl PostgresTransaction {
    async fn finish(&mut self, sql: &str) -> Result<()> {
        if self.finished {
            return Err(TemplarError::Query("Transaction already finished".into()));
        }
        let client = self.client.lock().await;
        client
            .batch_execute(sql)
            .await
            .map_err(|e| map_postgres_error("Failed to finish transaction", &e))?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::warn!("PostgreSQL transaction dropped without commit or rollback, rolling back");
        let client = Arc::clone(&self.client);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let client = client.lock().await;
                if let Err(e) = client.batch_execute("ROLLBACK").await {
                    tracing::error!(error = %e, "automatic rollback on drop failed");
                }
            });
        }
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        tracing::debug!("committing PostgreSQL transaction");
        self.finish("COMMIT").await
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        tracing::debug!("rolling back PostgreSQL transaction");
        self.finish("ROLLBACK").await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        tracing::debug!(sql_preview = %sql.chars().take(100).collect::<String>(), "executing query in transaction");
        let client = self.client.lock().await;
        query_on(&client, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        tracing::debug!(sql_preview = %sql.chars().take(100).collect::<String>(), "executing statement in transaction");
        let client = self.client.lock().await;
        execute_on(&client, sql, params).await
    }
}
