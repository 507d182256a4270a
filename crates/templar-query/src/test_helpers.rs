//! Mock backend for executor, batch, stream and procedure tests
//!
//! The mock recognises a few markers in the SQL text:
//!
//! - `FAIL` fails the statement with a backend error
//! - `EMPTY` returns no rows
//! - `SERIES` returns rows `n = 1..=k`, `k` being the first parameter (default 5)
//!
//! Any other query returns one row echoing its parameters as `p1..pn`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use templar_connection::{ConnectionFactory, ConnectionPool, PoolConfig};
use templar_core::{
    Connection, ProcedureCall, QueryCancelHandle, QueryResult, Result, Row, SqlType, StatementResult,
    TemplarError, Transaction, Value,
};
use templar_templates::{Template, TemplateRegistry};

use crate::{EngineConfig, QueryService};

/// Shared record of everything the mock connections saw
#[derive(Default)]
pub struct MockState {
    pub statements: Mutex<Vec<(String, Vec<Value>)>>,
    pub created: AtomicUsize,
    pub cancels: AtomicUsize,
    pub latency: Mutex<Option<Duration>>,
    pub unsupported_out: Mutex<Vec<SqlType>>,
}

impl MockState {
    pub fn sql_log(&self) -> Vec<String> {
        self.statements.lock().iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub fn params_of(&self, index: usize) -> Vec<Value> {
        self.statements.lock()[index].1.clone()
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    fn record(&self, sql: &str, params: &[Value]) {
        self.statements.lock().push((sql.to_string(), params.to_vec()));
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

struct MockCancelHandle {
    state: Arc<MockState>,
}

impl QueryCancelHandle for MockCancelHandle {
    fn cancel(&self) {
        self.state.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockConnection {
    state: Arc<MockState>,
    closed: AtomicBool,
}

impl MockConnection {
    pub fn new(state: Arc<MockState>) -> Self {
        Self {
            state,
            closed: AtomicBool::new(false),
        }
    }
}

fn mock_query(sql: &str, params: &[Value]) -> Result<QueryResult> {
    if sql.contains("FAIL") {
        return Err(TemplarError::Query("mock failure".into()));
    }
    if sql.contains("EMPTY") {
        return Ok(QueryResult::from_rows(vec!["value".into()], Vec::new()));
    }
    if sql.contains("SERIES") {
        let count = params.first().and_then(Value::as_i64).unwrap_or(5);
        let rows = (1..=count).map(|n| vec![Value::Int(n)]).collect();
        return Ok(QueryResult::from_rows(vec!["n".into()], rows));
    }
    let columns = (1..=params.len()).map(|i| format!("p{}", i)).collect();
    Ok(QueryResult::from_rows(columns, vec![params.to_vec()]))
}

fn mock_out_value(position: usize, sql_type: SqlType) -> Value {
    let date = NaiveDate::from_ymd_opt(2024, 1, 31).expect("valid date");
    match sql_type {
        SqlType::Integer => Value::Int(position as i64),
        SqlType::Float => Value::Float(position as f64 + 0.5),
        SqlType::Numeric => Value::Decimal("10.50".into()),
        SqlType::Text => Value::Text(format!("out{}", position)),
        SqlType::Boolean => Value::Bool(true),
        SqlType::Binary => Value::Bytes(vec![position as u8]),
        SqlType::Date => Value::Date(date),
        SqlType::Timestamp => Value::Timestamp(date.and_time(chrono::NaiveTime::MIN)),
        SqlType::Cursor => Value::Cursor(vec![Row::new(vec!["id".into()], vec![Value::Int(1)])]),
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.state.record(sql, params);
        self.state.delay().await;
        if sql.contains("FAIL") {
            return Err(TemplarError::Query("mock failure".into()));
        }
        Ok(StatementResult { affected_rows: 1 })
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.state.record(sql, params);
        self.state.delay().await;
        mock_query(sql, params)
    }

    async fn call(&self, call: &ProcedureCall) -> Result<Vec<Value>> {
        self.state.record(&call.call_sql, &call.in_values);
        self.state.delay().await;
        if call.procedure.contains("FAIL") {
            return Err(TemplarError::Query("procedure raised an exception".into()));
        }
        Ok(call
            .out_slots
            .iter()
            .map(|slot| mock_out_value(slot.position, slot.sql_type))
            .collect())
    }

    fn supports_out_type(&self, ty: SqlType) -> bool {
        !self.state.unsupported_out.lock().contains(&ty)
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        self.state.record("BEGIN", &[]);
        Ok(Box::new(MockTransaction {
            state: Arc::clone(&self.state),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn cancel_handle(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        Some(Arc::new(MockCancelHandle {
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct MockTransaction {
    state: Arc<MockState>,
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.state.record("COMMIT", &[]);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.state.record("ROLLBACK", &[]);
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.state.record(sql, params);
        mock_query(sql, params)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.state.record(sql, params);
        if sql.contains("FAIL") {
            return Err(TemplarError::Query("mock failure".into()));
        }
        Ok(StatementResult { affected_rows: 1 })
    }
}

pub struct MockConnectionFactory {
    state: Arc<MockState>,
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockConnection::new(Arc::clone(&self.state))))
    }
}

/// A pool of `max_size` mock connections sharing one `MockState`
pub fn mock_pool(max_size: usize) -> (Arc<MockState>, ConnectionPool) {
    let state = Arc::new(MockState::default());
    let factory = MockConnectionFactory {
        state: Arc::clone(&state),
    };
    let config = PoolConfig::new(0, max_size).with_acquire_timeout_ms(200);
    (state, ConnectionPool::new(config, factory))
}

/// A service over a mock pool with the given templates loaded
pub fn mock_service(templates: &[(&str, &str)], pool_size: usize) -> (Arc<MockState>, QueryService) {
    mock_service_with_config(templates, pool_size, EngineConfig::default())
}

pub fn mock_service_with_config(
    templates: &[(&str, &str)],
    pool_size: usize,
    config: EngineConfig,
) -> (Arc<MockState>, QueryService) {
    let (state, pool) = mock_pool(pool_size);
    let registry = Arc::new(TemplateRegistry::new());
    registry.replace(
        templates
            .iter()
            .map(|(id, sql)| Template::new(*id, *sql))
            .collect(),
    );
    let service = QueryService::with_registry(config, pool, registry)
        .expect("valid engine config");
    (state, service)
}

/// Route `tracing` output to the test harness, once per process
pub fn init_test_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
