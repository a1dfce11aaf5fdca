use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, UnaryOperator, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// A booking request as written in SQL. The mentee is the caller, filled in
/// by the connection layer.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingInsert {
    pub mentor_id: String,
    pub mentee_email: String,
    pub mentor_email: Option<String>,
    pub span: Span,
    /// Explicit `date` column, else the date the start timestamp was written on.
    pub date: NaiveDate,
    pub notes: Option<String>,
    pub timezone: Option<String>,
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    SetAvailability {
        mentor_id: String,
        date: NaiveDate,
        timezone: Option<String>,
        slots: Vec<Slot>,
        expected_version: Option<u64>,
    },
    ClearAvailability {
        mentor_id: String,
        date: NaiveDate,
    },
    SelectFreeSlots {
        mentor_id: String,
        date: NaiveDate,
    },
    SelectDay {
        mentor_id: String,
        date: NaiveDate,
    },
    SelectAvailableDates {
        mentor_id: String,
        year: i32,
        month: u32,
    },
    InsertBooking(BookingInsert),
    CancelBooking {
        id: Ulid,
    },
    SelectBooking {
        id: Ulid,
    },
    SelectBookings {
        party: Party,
        from: Option<Ms>,
        to: Option<Ms>,
    },
    ConnectCalendar {
        mentor_id: String,
        credentials: CalendarCredentials,
    },
    DisconnectCalendar {
        mentor_id: String,
    },
    SelectNotifications {
        unread_only: bool,
    },
    MarkNotificationRead {
        id: Ulid,
    },
}

/// Default column order for INSERTs without a column list.
const AVAILABILITY_COLUMNS: &[&str] = &["mentor_id", "date", "start", "end", "booked", "timezone", "version"];
const BOOKING_COLUMNS: &[&str] = &[
    "mentor_id",
    "mentee_email",
    "start",
    "end",
    "mentor_email",
    "notes",
    "timezone",
    "date",
];
const CALENDAR_COLUMNS: &[&str] = &[
    "mentor_id",
    "access_token",
    "refresh_token",
    "expires_at",
    "calendar_id",
    "email",
];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [stmt] => stmt,
        _ => return Err(SqlError::Unsupported("multiple statements".into())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection.as_ref()),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row with its column names.
struct Row<'a> {
    table: &'static str,
    columns: &'a [String],
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn get(&self, column: &str) -> Option<&'a Expr> {
        let i = self.columns.iter().position(|c| c == column)?;
        self.values.get(i)
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(self.table, column))
    }

    fn text(&self, column: &'static str) -> Result<String, SqlError> {
        parse_text(self.required(column)?)
    }

    fn opt_text(&self, column: &str) -> Result<Option<String>, SqlError> {
        self.get(column).map(parse_opt_text).transpose().map(Option::flatten)
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let (table, defaults): (&'static str, &[&str]) = match table.as_str() {
        "availability" => ("availability", AVAILABILITY_COLUMNS),
        "bookings" => ("bookings", BOOKING_COLUMNS),
        "calendar_connections" => ("calendar_connections", CALENDAR_COLUMNS),
        _ => return Err(SqlError::UnknownTable(table)),
    };

    let columns: Vec<String> = if insert.columns.is_empty() {
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if let Some(unknown) = columns.iter().find(|c| !defaults.contains(&c.as_str())) {
        return Err(SqlError::UnknownColumn(table, unknown.clone()));
    }

    let rows = extract_insert_rows(insert)?;
    let rows: Vec<Row<'_>> = rows
        .iter()
        .map(|values| {
            if values.len() > columns.len() || (!insert.columns.is_empty() && values.len() != columns.len()) {
                return Err(SqlError::WrongArity(table, columns.len(), values.len()));
            }
            Ok(Row {
                table,
                columns: &columns,
                values,
            })
        })
        .collect::<Result<_, _>>()?;

    match table {
        "availability" => parse_availability_rows(&rows),
        "bookings" => match rows.as_slice() {
            [row] => parse_booking_row(row),
            _ => Err(SqlError::Unsupported("one booking per INSERT".into())),
        },
        _ => match rows.as_slice() {
            [row] => parse_calendar_row(row),
            _ => Err(SqlError::Unsupported("one calendar connection per INSERT".into())),
        },
    }
}

/// All rows describe one day; each row is one slot.
fn parse_availability_rows(rows: &[Row<'_>]) -> Result<Command, SqlError> {
    let first = &rows[0];
    let mentor_id = first.text("mentor_id")?;
    let date = parse_date_expr(first.required("date")?)?;
    let timezone = first.opt_text("timezone")?;
    let expected_version = first.get("version").map(parse_opt_u64).transpose()?.flatten();

    let mut slots = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let at_row = |e: SqlError| SqlError::Parse(format!("row {i}: {e}"));
        if row.text("mentor_id").map_err(at_row)? != mentor_id
            || parse_date_expr(row.required("date").map_err(at_row)?).map_err(at_row)? != date
        {
            return Err(SqlError::Parse(format!(
                "row {i}: all rows must share mentor_id and date"
            )));
        }
        if row.opt_text("timezone").map_err(at_row)? != timezone
            || row.get("version").map(parse_opt_u64).transpose().map_err(at_row)?.flatten() != expected_version
        {
            return Err(SqlError::Parse(format!(
                "row {i}: timezone and version must match the first row"
            )));
        }
        let start = parse_timestamp_expr(row.required("start").map_err(at_row)?).map_err(at_row)?;
        let end = parse_timestamp_expr(row.required("end").map_err(at_row)?).map_err(at_row)?;
        let booked = match row.get("booked") {
            Some(e) => parse_bool(e).map_err(at_row)?,
            None => false,
        };
        slots.push(Slot {
            span: Span { start: start.ms, end: end.ms },
            booked,
            holder: None,
        });
    }

    Ok(Command::SetAvailability {
        mentor_id,
        date,
        timezone,
        slots,
        expected_version,
    })
}

fn parse_booking_row(row: &Row<'_>) -> Result<Command, SqlError> {
    let start = parse_timestamp_expr(row.required("start")?)?;
    let end = parse_timestamp_expr(row.required("end")?)?;
    let date = match row.get("date").map(parse_opt_text).transpose()?.flatten() {
        Some(d) => parse_date(&d).ok_or_else(|| SqlError::Parse(format!("bad date: {d}")))?,
        None => start.date,
    };
    Ok(Command::InsertBooking(BookingInsert {
        mentor_id: row.text("mentor_id")?,
        mentee_email: row.text("mentee_email")?,
        mentor_email: row.opt_text("mentor_email")?,
        span: Span { start: start.ms, end: end.ms },
        date,
        notes: row.opt_text("notes")?,
        timezone: row.opt_text("timezone")?,
    }))
}

fn parse_calendar_row(row: &Row<'_>) -> Result<Command, SqlError> {
    let expires_at = match row.get("expires_at") {
        Some(e) if !is_null(e) => Some(parse_timestamp_expr(e)?.ms),
        _ => None,
    };
    Ok(Command::ConnectCalendar {
        mentor_id: row.text("mentor_id")?,
        credentials: CalendarCredentials {
            access_token: row.text("access_token")?,
            refresh_token: row.opt_text("refresh_token")?,
            expires_at,
            calendar_id: row
                .opt_text("calendar_id")?
                .unwrap_or_else(|| DEFAULT_CALENDAR_ID.to_string()),
            email: row.opt_text("email")?,
        },
    })
}

// ── DELETE / UPDATE ───────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::collect(delete.selection.as_ref())?;

    match table.as_str() {
        "availability" => Ok(Command::ClearAvailability {
            mentor_id: filters.text("mentor_id")?,
            date: filters.date("date")?,
        }),
        "bookings" => Ok(Command::CancelBooking {
            id: filters.ulid("id")?,
        }),
        "calendar_connections" => Ok(Command::DisconnectCalendar {
            mentor_id: filters.text("mentor_id")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    if table != "notifications" {
        return Err(SqlError::UnknownTable(table));
    }
    let [assignment] = assignments else {
        return Err(SqlError::Unsupported("UPDATE notifications sets exactly read = true".into()));
    };
    let column = match &assignment.target {
        AssignmentTarget::ColumnName(name) => object_name_last(name),
        AssignmentTarget::Tuple(_) => None,
    };
    if column.as_deref() != Some("read") || !parse_bool(&assignment.value)? {
        return Err(SqlError::Unsupported("UPDATE notifications sets exactly read = true".into()));
    }
    let filters = Filters::collect(selection)?;
    Ok(Command::MarkNotificationRead {
        id: filters.ulid("id")?,
    })
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = Filters::collect(select.selection.as_ref())?;

    match table.as_str() {
        "availability" => Ok(Command::SelectFreeSlots {
            mentor_id: filters.text("mentor_id")?,
            date: filters.date("date")?,
        }),
        "slots" => Ok(Command::SelectDay {
            mentor_id: filters.text("mentor_id")?,
            date: filters.date("date")?,
        }),
        "available_dates" => {
            let month = filters.text("month")?;
            let (year, month) =
                parse_month(&month).ok_or_else(|| SqlError::Parse(format!("bad month: {month}")))?;
            Ok(Command::SelectAvailableDates {
                mentor_id: filters.text("mentor_id")?,
                year,
                month,
            })
        }
        "bookings" => parse_select_bookings(&filters),
        "notifications" => {
            let unread_only = match filters.find("read", BinaryOperator::Eq) {
                None => false,
                Some(e) => {
                    if parse_bool(e)? {
                        return Err(SqlError::Unsupported(
                            "notifications can only be filtered by read = false".into(),
                        ));
                    }
                    true
                }
            };
            Ok(Command::SelectNotifications { unread_only })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select_bookings(filters: &Filters<'_>) -> Result<Command, SqlError> {
    if filters.find("id", BinaryOperator::Eq).is_some() {
        return Ok(Command::SelectBooking {
            id: filters.ulid("id")?,
        });
    }
    let mentor = filters.find("mentor_id", BinaryOperator::Eq);
    let mentee = filters.find("mentee_id", BinaryOperator::Eq);
    let party = match (mentor, mentee) {
        (Some(m), None) => Party::Mentor(parse_text(m)?),
        (None, Some(m)) => Party::Mentee(parse_text(m)?),
        (Some(_), Some(_)) => {
            return Err(SqlError::Unsupported(
                "filter bookings by mentor_id or mentee_id, not both".into(),
            ));
        }
        (None, None) => return Err(SqlError::MissingFilter("mentor_id or mentee_id")),
    };
    let from = filters
        .find("start", BinaryOperator::GtEq)
        .map(|e| parse_timestamp_expr(e).map(|t| t.ms))
        .transpose()?;
    let to = filters
        .find("end", BinaryOperator::LtEq)
        .map(|e| parse_timestamp_expr(e).map(|t| t.ms))
        .transpose()?;
    Ok(Command::SelectBookings { party, from, to })
}

/// `column op value` conjuncts from a WHERE clause.
struct Filters<'a> {
    terms: Vec<(String, BinaryOperator, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn collect(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut terms = Vec::new();
        if let Some(expr) = selection {
            Self::walk(expr, &mut terms)?;
        }
        Ok(Self { terms })
    }

    fn walk(expr: &'a Expr, terms: &mut Vec<(String, BinaryOperator, &'a Expr)>) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => Self::walk(inner, terms),
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                Self::walk(left, terms)?;
                Self::walk(right, terms)
            }
            Expr::BinaryOp { left, op, right } => {
                let column = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
                terms.push((column, op.clone(), right.as_ref()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("filter {other}"))),
        }
    }

    fn find(&self, column: &str, op: BinaryOperator) -> Option<&'a Expr> {
        self.terms
            .iter()
            .find(|(c, o, _)| c == column && *o == op)
            .map(|(_, _, e)| *e)
    }

    fn eq(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.find(column, BinaryOperator::Eq)
            .ok_or(SqlError::MissingFilter(column))
    }

    fn text(&self, column: &'static str) -> Result<String, SqlError> {
        parse_text(self.eq(column)?)
    }

    fn date(&self, column: &'static str) -> Result<NaiveDate, SqlError> {
        parse_date_expr(self.eq(column)?)
    }

    fn ulid(&self, column: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid_expr(self.eq(column)?)
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
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables.first() {
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

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if values.rows.is_empty() => Err(SqlError::Parse("empty VALUES".into())),
        SetExpr::Values(values) => Ok(values.rows.as_slice()),
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    parse_opt_text(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

fn parse_opt_text(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_text(expr)?;
    parse_date(&s).ok_or_else(|| SqlError::Parse(format!("bad date: {s}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64_expr(expr)?);
    }
    let s = parse_text(expr)?;
    s.parse().map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}")))
}

fn parse_opt_u64(expr: &Expr) -> Result<Option<u64>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    let v = parse_i64_expr(expr)?;
    u64::try_from(v)
        .map(Some)
        .map_err(|_| SqlError::Parse(format!("{v} is not a valid version")))
}

/// RFC 3339 string or integer milliseconds.
fn parse_timestamp_expr(expr: &Expr) -> Result<Timestamp, SqlError> {
    let raw = match expr {
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            ..
        } => parse_i64_expr(expr)?.to_string(),
        _ => parse_text(expr)?,
    };
    parse_timestamp(&raw).ok_or_else(|| SqlError::Parse(format!("bad timestamp: {raw}")))
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

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    MissingColumn(&'static str, &'static str),
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
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
