use chrono::{NaiveDate, NaiveTime, Weekday};
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Tables exposed over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Rooms,
    Slots,
    Users,
    Reservations,
}

impl Table {
    fn from_name(name: &str) -> Result<Self, SqlError> {
        match name {
            "rooms" => Ok(Table::Rooms),
            "slots" => Ok(Table::Slots),
            "users" => Ok(Table::Users),
            "reservations" => Ok(Table::Reservations),
            _ => Err(SqlError::UnknownTable(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Table::Rooms => "rooms",
            Table::Slots => "slots",
            Table::Users => "users",
            Table::Reservations => "reservations",
        }
    }

    /// Columns accepted by INSERT, in positional order.
    fn insert_columns(&self) -> &'static [&'static str] {
        match self {
            Table::Rooms => &["id", "name", "capacity", "has_computers"],
            Table::Slots => &["id", "weekday", "kind", "start", "end", "session"],
            Table::Users => &["id", "name", "email", "role"],
            Table::Reservations => &["room_id", "slot_id", "user_id", "date", "motive", "attendees"],
        }
    }
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom(Room),
    InsertSlot(TimeSlot),
    InsertUser(User),
    InsertReservation(ReservationDraft),
    UpdateRoom { id: Ulid, patch: RoomPatch },
    UpdateSlot { id: Ulid, patch: SlotPatch },
    UpdateUser { id: Ulid, patch: UserPatch },
    UpdateReservation { id: Ulid, patch: ReservationPatch },
    DeleteRoom { id: Ulid },
    DeleteSlot { id: Ulid },
    DeleteUser { id: Ulid },
    DeleteReservation { id: Ulid },
    SelectRooms { id: Option<Ulid>, filter: RoomFilter },
    SelectSlots { id: Option<Ulid> },
    SelectUsers { id: Option<Ulid> },
    SelectReservations { id: Option<Ulid>, filter: ReservationFilter },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    match parse_statement(sql)? {
        Statement::Insert(insert) => parse_insert(&insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table, &assignments, &selection),
        Statement::Delete(delete) => parse_delete(&delete),
        Statement::Query(query) => parse_select(&query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table whose rows a statement returns, if it returns any. Used to
/// describe statements that still contain `$n` placeholders.
pub fn result_table(sql: &str) -> Option<Table> {
    match parse_statement(sql).ok()? {
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => {
                let from = select.from.first()?;
                Table::from_name(&table_factor_name(&from.relation).ok()?).ok()
            }
            _ => None,
        },
        Statement::Insert(insert) => {
            let table = Table::from_name(&insert_table_name(&insert).ok()?).ok()?;
            (table == Table::Reservations).then_some(table)
        }
        Statement::Update { table, .. } => {
            let table = Table::from_name(&table_factor_name(&table.relation).ok()?).ok()?;
            (table == Table::Reservations).then_some(table)
        }
        _ => None,
    }
}

fn parse_statement(sql: &str) -> Result<Statement, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut stmts =
        Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }
    Ok(stmts.remove(0))
}

// ── INSERT ────────────────────────────────────────────────────

/// Column → value pairs of one INSERT row or one UPDATE SET list.
struct Fields<'a> {
    table: Table,
    values: Vec<(String, &'a Expr)>,
}

impl<'a> Fields<'a> {
    fn new(table: Table, values: Vec<(String, &'a Expr)>, allowed: &[&str]) -> Result<Self, SqlError> {
        for (col, _) in &values {
            if !allowed.contains(&col.as_str()) {
                return Err(SqlError::UnknownColumn(format!("{}.{col}", table.name())));
            }
        }
        Ok(Self { table, values })
    }

    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.values.iter().find(|(c, _)| c == col).map(|(_, e)| *e)
    }

    fn require(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col)
            .ok_or_else(|| SqlError::MissingColumn(format!("{}.{col}", self.table.name())))
    }

    fn opt<T>(
        &self,
        col: &str,
        parse: impl Fn(&Expr) -> Result<T, SqlError>,
    ) -> Result<Option<T>, SqlError> {
        self.get(col).map(parse).transpose()
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = Table::from_name(&insert_table_name(insert)?)?;
    let row = extract_insert_row(insert)?;
    let columns: Vec<String> = if insert.columns.is_empty() {
        table.insert_columns().iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if columns.len() != row.len() {
        return Err(SqlError::WrongArity(table.name(), columns.len(), row.len()));
    }
    let f = Fields::new(
        table,
        columns.into_iter().zip(row.iter()).collect(),
        table.insert_columns(),
    )?;

    match table {
        Table::Rooms => Ok(Command::InsertRoom(Room {
            id: parse_ulid(f.require("id")?)?,
            name: parse_string(f.require("name")?)?,
            capacity: parse_u32(f.require("capacity")?)?,
            has_computers: f.opt("has_computers", parse_bool)?.unwrap_or(false),
        })),
        Table::Slots => Ok(Command::InsertSlot(TimeSlot {
            id: parse_ulid(f.require("id")?)?,
            weekday: parse_weekday(f.require("weekday")?)?,
            kind: f.opt("kind", parse_slot_kind)?.unwrap_or(SlotKind::Teaching),
            span: Span {
                start: parse_time(f.require("start")?)?,
                end: parse_time(f.require("end")?)?,
            },
            session: f.opt("session", parse_u32)?.unwrap_or(1),
        })),
        Table::Users => Ok(Command::InsertUser(User {
            id: parse_ulid(f.require("id")?)?,
            name: parse_string(f.require("name")?)?,
            email: parse_string(f.require("email")?)?,
            role: f.opt("role", parse_role)?.unwrap_or(Role::Teacher),
        })),
        Table::Reservations => Ok(Command::InsertReservation(ReservationDraft {
            room_id: parse_ulid(f.require("room_id")?)?,
            slot_id: parse_ulid(f.require("slot_id")?)?,
            user_id: parse_ulid(f.require("user_id")?)?,
            date: parse_date(f.require("date")?)?,
            motive: f.opt("motive", parse_string)?.unwrap_or_default(),
            attendees: parse_u32(f.require("attendees")?)?,
        })),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = Table::from_name(&table_factor_name(&table.relation)?)?;
    let id = extract_where_id(selection)?;

    let mut values = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        values.push((col, &a.value));
    }
    if values.is_empty() {
        return Err(SqlError::Parse("UPDATE without SET".into()));
    }
    let allowed: &[&str] = match table {
        Table::Reservations => &["room_id", "slot_id", "user_id", "date", "motive", "attendees"],
        // Catalog ids are immutable.
        _ => &table.insert_columns()[1..],
    };
    let f = Fields::new(table, values, allowed)?;

    match table {
        Table::Rooms => Ok(Command::UpdateRoom {
            id,
            patch: RoomPatch {
                name: f.opt("name", parse_string)?,
                capacity: f.opt("capacity", parse_u32)?,
                has_computers: f.opt("has_computers", parse_bool)?,
            },
        }),
        Table::Slots => Ok(Command::UpdateSlot {
            id,
            patch: SlotPatch {
                weekday: f.opt("weekday", parse_weekday)?,
                kind: f.opt("kind", parse_slot_kind)?,
                start: f.opt("start", parse_time)?,
                end: f.opt("end", parse_time)?,
                session: f.opt("session", parse_u32)?,
            },
        }),
        Table::Users => Ok(Command::UpdateUser {
            id,
            patch: UserPatch {
                name: f.opt("name", parse_string)?,
                email: f.opt("email", parse_string)?,
                role: f.opt("role", parse_role)?,
            },
        }),
        Table::Reservations => Ok(Command::UpdateReservation {
            id,
            patch: ReservationPatch {
                date: f.opt("date", parse_date)?,
                motive: f.opt("motive", parse_string)?,
                attendees: f.opt("attendees", parse_u32)?,
                room_id: f.opt("room_id", parse_ulid)?,
                slot_id: f.opt("slot_id", parse_ulid)?,
                user_id: f.opt("user_id", parse_ulid)?,
            },
        }),
    }
}

// ── DELETE / SELECT ───────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = Table::from_name(&delete_table_name(delete)?)?;
    let id = extract_where_id(&delete.selection)?;

    Ok(match table {
        Table::Rooms => Command::DeleteRoom { id },
        Table::Slots => Command::DeleteSlot { id },
        Table::Users => Command::DeleteUser { id },
        Table::Reservations => Command::DeleteReservation { id },
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let from = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    let table = Table::from_name(&table_factor_name(&from.relation)?)?;

    let mut predicates = Vec::new();
    if let Some(selection) = &select.selection {
        collect_predicates(selection, &mut predicates)?;
    }

    let mut id = None;
    let mut rooms = RoomFilter::default();
    let mut reservations = ReservationFilter::default();
    for (col, op, value) in predicates {
        match (table, col.as_str(), op) {
            (_, "id", BinaryOperator::Eq) => id = Some(parse_ulid(value)?),
            (Table::Rooms, "capacity", BinaryOperator::Gt) => {
                rooms.capacity_above = Some(parse_u32(value)?)
            }
            (Table::Rooms, "has_computers", BinaryOperator::Eq) => {
                rooms.has_computers = Some(parse_bool(value)?)
            }
            (Table::Reservations, "room_id", BinaryOperator::Eq) => {
                reservations.room_id = Some(parse_ulid(value)?)
            }
            (Table::Reservations, "date", BinaryOperator::Eq) => {
                reservations.date = Some(parse_date(value)?)
            }
            _ => {
                return Err(SqlError::Unsupported(format!(
                    "filter {col} {op} on {}",
                    table.name()
                )));
            }
        }
    }

    Ok(match table {
        Table::Rooms => Command::SelectRooms { id, filter: rooms },
        Table::Slots => Command::SelectSlots { id },
        Table::Users => Command::SelectUsers { id },
        Table::Reservations => Command::SelectReservations {
            id,
            filter: reservations,
        },
    })
}

/// Flatten `a AND b AND ...` into `(column, op, value)` triples.
fn collect_predicates<'a>(
    expr: &'a Expr,
    out: &mut Vec<(String, &'a BinaryOperator, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_predicates(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_predicates(left, out)?;
            collect_predicates(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("predicate {expr}")))?;
            out.push((col, op, right));
            Ok(())
        }
        _ => Err(SqlError::Unsupported(format!("predicate {expr}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_row(insert: &ast::Insert) -> Result<&Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    match selection {
        Some(Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

/// Text of a quoted string literal. NULL is rejected: no column is nullable.
fn parse_text(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.as_str()),
        Some(Value::Null) => Err(SqlError::Parse("NULL not allowed".into())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    parse_text(expr).map(str::to_string)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => match expr {
            Expr::UnaryOp {
                op: ast::UnaryOperator::Minus,
                expr,
            } => Ok(-parse_i64(expr)?),
            _ => Err(SqlError::Parse(format!("expected value, got {expr}"))),
        },
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// `YYYY-MM-DD`, or `DD/MM/YYYY`.
pub fn parse_date_str(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%d/%m/%Y"))
        .ok()
}

/// `HH:MM` or `HH:MM:SS`.
pub fn parse_time_str(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_text(expr)?;
    parse_date_str(s).ok_or_else(|| SqlError::Parse(format!("bad date: {s}")))
}

fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_text(expr)?;
    parse_time_str(s).ok_or_else(|| SqlError::Parse(format!("bad time: {s}")))
}

fn parse_weekday(expr: &Expr) -> Result<Weekday, SqlError> {
    let s = parse_text(expr)?;
    s.parse::<Weekday>()
        .map_err(|_| SqlError::Parse(format!("bad weekday: {s}")))
}

fn parse_slot_kind(expr: &Expr) -> Result<SlotKind, SqlError> {
    let s = parse_text(expr)?;
    SlotKind::parse(s).ok_or_else(|| SqlError::Parse(format!("bad slot kind: {s}")))
}

fn parse_role(expr: &Expr) -> Result<Role, SqlError> {
    let s = parse_text(expr)?;
    Role::parse(s).ok_or_else(|| SqlError::Parse(format!("bad role: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    MissingColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::MissingColumn(c) => write!(f, "missing column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
