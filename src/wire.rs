use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::AulasAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, Table};

/// Who is running a command, taken from the verified startup packet.
/// Logged with every command; the engine never sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user: String,
    pub database: String,
}

impl Principal {
    fn from_client<C: ClientInfo>(client: &C) -> Self {
        let meta = client.metadata();
        let get = |key: &str| meta.get(key).cloned().unwrap_or_default();
        Self {
            user: get("user"),
            database: get("database"),
        }
    }
}

pub struct AulasHandler {
    engine: Arc<Engine>,
    query_parser: Arc<AulasQueryParser>,
}

impl AulasHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(AulasQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, principal: &Principal, sql: &str) -> PgWireResult<Response> {
        let cmd = match sql::parse_sql(sql) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(QUERIES_TOTAL, "command" => "parse", "status" => "error")
                    .increment(1);
                return Err(sql_err(e));
            }
        };
        let label = command_label(&cmd);
        tracing::debug!("{}@{}: {label}", principal.user, principal.database);

        let start = std::time::Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertRoom(room) => {
                engine.create_room(room).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertSlot(slot) => {
                engine.create_slot(slot).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertUser(user) => {
                engine.create_user(user).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertReservation(draft) => {
                let r = engine.create_reservation(draft).await.map_err(engine_err)?;
                Ok(reservation_rows(vec![r]))
            }
            Command::UpdateRoom { id, patch } => {
                engine.update_room(id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::UpdateSlot { id, patch } => {
                engine.update_slot(id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::UpdateUser { id, patch } => {
                engine.update_user(id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::UpdateReservation { id, patch } => {
                let r = engine
                    .update_reservation(id, patch)
                    .await
                    .map_err(engine_err)?;
                Ok(reservation_rows(vec![r]))
            }
            Command::DeleteRoom { id } => {
                engine.delete_room(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::DeleteSlot { id } => {
                engine.delete_slot(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::DeleteUser { id } => {
                engine.delete_user(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::DeleteReservation { id } => {
                engine.delete_reservation(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectRooms { id, filter } => {
                let rooms = match id {
                    Some(id) => found(engine.get_room(id).await)?
                        .into_iter()
                        .filter(|r| filter.matches(r))
                        .collect(),
                    None => engine.list_rooms(filter).await.map_err(engine_err)?,
                };
                Ok(room_rows(rooms))
            }
            Command::SelectSlots { id } => {
                let slots = match id {
                    Some(id) => found(engine.get_slot(id).await)?,
                    None => engine.list_slots().await.map_err(engine_err)?,
                };
                Ok(slot_rows(slots))
            }
            Command::SelectUsers { id } => {
                let users = match id {
                    Some(id) => found(engine.get_user(id).await)?,
                    None => engine.list_users().await.map_err(engine_err)?,
                };
                Ok(user_rows(users))
            }
            Command::SelectReservations { id, filter } => {
                let reservations = match id {
                    Some(id) => found(engine.get_reservation(id).await)?
                        .into_iter()
                        .filter(|r| filter.matches(r))
                        .collect(),
                    None => engine.list_reservations(filter).await.map_err(engine_err)?,
                };
                Ok(reservation_rows(reservations))
            }
        }
    }
}

/// A lookup by id that misses is an empty result set, not an error.
fn found<T>(result: Result<T, EngineError>) -> PgWireResult<Vec<T>> {
    match result {
        Ok(row) => Ok(vec![row]),
        Err(EngineError::NotFound(..)) => Ok(Vec::new()),
        Err(e) => Err(engine_err(e)),
    }
}

// ── Result schemas and row encoding ──────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

pub fn table_schema(table: Table) -> Vec<FieldInfo> {
    match table {
        Table::Rooms => vec![text("id"), text("name"), int8("capacity"), boolean("has_computers")],
        Table::Slots => vec![
            text("id"),
            text("weekday"),
            text("kind"),
            text("start"),
            text("end"),
            int8("session"),
        ],
        Table::Users => vec![text("id"), text("name"), text("email"), text("role")],
        Table::Reservations => vec![
            text("id"),
            text("room_id"),
            text("slot_id"),
            text("user_id"),
            text("date"),
            text("motive"),
            int8("attendees"),
            int8("created_at"),
        ],
    }
}

fn fmt_time(t: chrono::NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

fn fmt_date(d: chrono::NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn encode_rows<T>(
    table: Table,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(table_schema(table));
    let rows: Vec<PgWireResult<DataRow>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn room_rows(rooms: Vec<Room>) -> Response {
    encode_rows(Table::Rooms, rooms, |e, r| {
        e.encode_field(&r.id.to_string())?;
        e.encode_field(&r.name)?;
        e.encode_field(&i64::from(r.capacity))?;
        e.encode_field(&r.has_computers)
    })
}

fn slot_rows(slots: Vec<TimeSlot>) -> Response {
    encode_rows(Table::Slots, slots, |e, s| {
        e.encode_field(&s.id.to_string())?;
        e.encode_field(&format!("{:?}", s.weekday))?;
        e.encode_field(&s.kind.as_str())?;
        e.encode_field(&fmt_time(s.span.start))?;
        e.encode_field(&fmt_time(s.span.end))?;
        e.encode_field(&i64::from(s.session))
    })
}

fn user_rows(users: Vec<User>) -> Response {
    encode_rows(Table::Users, users, |e, u| {
        e.encode_field(&u.id.to_string())?;
        e.encode_field(&u.name)?;
        e.encode_field(&u.email)?;
        e.encode_field(&u.role.as_str())
    })
}

fn reservation_rows(reservations: Vec<Reservation>) -> Response {
    encode_rows(Table::Reservations, reservations, |e, r| {
        e.encode_field(&r.id.to_string())?;
        e.encode_field(&r.room_id.to_string())?;
        e.encode_field(&r.slot_id.to_string())?;
        e.encode_field(&r.user_id.to_string())?;
        e.encode_field(&fmt_date(r.date))?;
        e.encode_field(&r.motive)?;
        e.encode_field(&i64::from(r.attendees))?;
        e.encode_field(&r.created_at)
    })
}

fn describe_schema(sql: &str) -> Vec<FieldInfo> {
    sql::result_table(sql).map(table_schema).unwrap_or_default()
}

#[async_trait]
impl SimpleQueryHandler for AulasHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let principal = Principal::from_client(&*client);
        Ok(vec![self.run(&principal, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct AulasQueryParser;

#[async_trait]
impl QueryParser for AulasQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(describe_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for AulasHandler {
    type Statement = String;
    type QueryParser = AulasQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let principal = Principal::from_client(&*client);
        let sql = substitute_params(portal);
        self.run(&principal, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            describe_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(describe_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound parameters (text format) as quoted literals.
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<&[u8]>> = portal.parameters.iter().map(|p| p.as_deref()).collect();
    substitute(&portal.statement.statement, &params)
}

/// One pass over the statement text: placeholders inside string literals
/// and text that came from a bound value are never rewritten. `$N` past the
/// end of `params` is left as written.
fn substitute(sql: &str, params: &[Option<&[u8]>]) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                let param = sql[start..end]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|n| params.get(n));
                if let Some(param) = param {
                    out.push_str(&sql[copied..i]);
                    match param {
                        Some(value) => {
                            out.push('\'');
                            out.push_str(&String::from_utf8_lossy(value).replace('\'', "''"));
                            out.push('\'');
                        }
                        None => out.push_str("NULL"),
                    }
                    copied = end;
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct AulasFactory {
    handler: Arc<AulasHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<AulasAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl AulasFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        Self {
            handler: Arc::new(AulasHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                AulasAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for AulasFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(AulasFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for an engine error.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(..) | EngineError::InvalidReference(..) => "P0002",
        EngineError::PastDate { .. } | EngineError::CapacityExceeded { .. } => "23514",
        EngineError::Overlap(_) => "23P01",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::HasReservations(..) => "23503",
        EngineError::InvalidInput(_) | EngineError::LimitExceeded(_) => "22023",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    #[test]
    fn count_params_finds_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM rooms"), 0);
        assert_eq!(count_params("DELETE FROM rooms WHERE id = $1"), 1);
        assert_eq!(count_params("UPDATE rooms SET name = $2, capacity = $12 WHERE id = $1"), 12);
    }

    #[test]
    fn bound_values_are_inlined_once() {
        let sql = "UPDATE reservations SET motive = $1, attendees = $2 WHERE id = $3";
        let params = [Some("costs $2 or $3".as_bytes()), Some("12".as_bytes()), Some("01J".as_bytes())];
        let out = substitute(sql, &params);
        assert_eq!(
            out,
            "UPDATE reservations SET motive = 'costs $2 or $3', attendees = '12' WHERE id = '01J'"
        );
    }

    #[test]
    fn two_digit_placeholders_and_nulls() {
        let mut params: Vec<Option<&[u8]>> = vec![Some("a".as_bytes()); 10];
        params[0] = None;
        params[9] = Some("it's".as_bytes());
        let out = substitute("SELECT $1, $10, $11", &params);
        assert_eq!(out, "SELECT NULL, 'it''s', $11");
    }

    #[test]
    fn placeholders_inside_literals_are_kept() {
        let params = [Some("x".as_bytes())];
        let out = substitute("SELECT * FROM rooms WHERE name = '$1' AND id = $1", &params);
        assert_eq!(out, "SELECT * FROM rooms WHERE name = '$1' AND id = 'x'");
        assert_eq!(substitute("SELECT $", &params), "SELECT $");
    }

    #[test]
    fn sqlstates_follow_postgres_classes() {
        let id = Ulid::new();
        let d = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert_eq!(sqlstate(&EngineError::NotFound(Entity::Room, id)), "P0002");
        assert_eq!(sqlstate(&EngineError::InvalidReference(Entity::Slot, id)), "P0002");
        assert_eq!(sqlstate(&EngineError::PastDate { date: d, today: d }), "23514");
        assert_eq!(
            sqlstate(&EngineError::CapacityExceeded {
                attendees: 2,
                capacity: 1
            }),
            "23514"
        );
        assert_eq!(sqlstate(&EngineError::Overlap(id)), "23P01");
        assert_eq!(sqlstate(&EngineError::AlreadyExists(id)), "23505");
        assert_eq!(sqlstate(&EngineError::HasReservations(Entity::User, id)), "23503");
        assert_eq!(sqlstate(&EngineError::WalError("disk".into())), "58030");
    }

    #[test]
    fn describe_uses_table_schema() {
        let schema = describe_schema("SELECT * FROM reservations WHERE room_id = $1");
        assert_eq!(schema.len(), 8);
        assert!(describe_schema("DELETE FROM slots WHERE id = $1").is_empty());
        assert!(describe_schema("not sql at all").is_empty());
    }
}
