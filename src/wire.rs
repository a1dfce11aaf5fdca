use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

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
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::TandemAuthSource;
use crate::coordinator::{BookingReceipt, BookingRequest, Coordinator};
use crate::engine::EngineError;
use crate::model::*;
use crate::observability::{self, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

pub struct TandemHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<TandemQueryParser>,
}

impl TandemHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(TandemQueryParser),
        }
    }

    /// Tenant from the `database` startup parameter, caller from `user`.
    fn resolve<C: ClientInfo>(&self, client: &C) -> PgWireResult<(Arc<Coordinator>, String)> {
        let metadata = client.metadata();
        let db = metadata
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        let caller = metadata.get("user").cloned().unwrap_or_default();
        let coordinator = self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })?;
        Ok((coordinator, caller))
    }

    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Vec<Response>> {
        let (coordinator, caller) = self.resolve(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();

        let result = self.execute_command(&coordinator, &caller, cmd).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        coordinator: &Coordinator,
        caller: &str,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::SetAvailability {
                mentor_id,
                date,
                timezone,
                slots,
                expected_version,
            } => {
                let count = slots.len();
                coordinator
                    .set_availability(caller, &mentor_id, date, timezone, slots, expected_version)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
            }
            Command::ClearAvailability { mentor_id, date } => {
                let removed = coordinator
                    .clear_availability(caller, &mentor_id, date)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(removed))])
            }
            Command::SelectFreeSlots { mentor_id, date } => {
                let spans = coordinator
                    .engine()
                    .free_slots(&mentor_id, date)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(free_slot_schema());
                let date = date.to_string();
                let rows: Vec<PgWireResult<_>> = spans
                    .into_iter()
                    .map(|span| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&date)?;
                        encoder.encode_field(&format_ms(span.start))?;
                        encoder.encode_field(&format_ms(span.end))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectDay { mentor_id, date } => {
                let day = coordinator
                    .engine()
                    .get_day(&mentor_id, date)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(day_schema());
                let date = day.date.to_string();
                let version = day.version as i64;
                let rows: Vec<PgWireResult<_>> = day
                    .slots
                    .iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&date)?;
                        encoder.encode_field(&format_ms(slot.span.start))?;
                        encoder.encode_field(&format_ms(slot.span.end))?;
                        encoder.encode_field(&slot.booked)?;
                        encoder.encode_field(&day.timezone)?;
                        encoder.encode_field(&version)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectAvailableDates {
                mentor_id,
                year,
                month,
            } => {
                let dates = coordinator
                    .engine()
                    .list_month(&mentor_id, year, month)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(dates_schema());
                let rows: Vec<PgWireResult<_>> = dates
                    .into_iter()
                    .map(|date| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&date.to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::InsertBooking(insert) => {
                let receipt = coordinator
                    .create_booking(BookingRequest {
                        mentor_id: insert.mentor_id,
                        mentee_id: caller.to_string(),
                        mentee_email: insert.mentee_email,
                        mentor_email: insert.mentor_email,
                        span: insert.span,
                        date: Some(insert.date),
                        timezone: insert.timezone,
                        notes: insert.notes,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(vec![receipt_response(receipt)?])
            }
            Command::CancelBooking { id } => {
                coordinator
                    .cancel_booking(caller, id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectBooking { id } => {
                let booking = coordinator.booking(caller, id).map_err(engine_err)?;
                Ok(vec![bookings_response(vec![booking])])
            }
            Command::SelectBookings { party, from, to } => {
                let bookings = coordinator
                    .list_bookings(caller, &party, from, to)
                    .map_err(engine_err)?;
                Ok(vec![bookings_response(bookings)])
            }
            Command::ConnectCalendar {
                mentor_id,
                credentials,
            } => {
                coordinator
                    .connect_calendar(caller, &mentor_id, credentials)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DisconnectCalendar { mentor_id } => {
                let removed = coordinator
                    .disconnect_calendar(caller, &mentor_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(
                    Tag::new("DELETE").with_rows(usize::from(removed)),
                )])
            }
            Command::SelectNotifications { unread_only } => {
                let notifications = coordinator
                    .notifications(caller, unread_only)
                    .map_err(engine_err)?;
                Ok(vec![notifications_response(notifications)])
            }
            Command::MarkNotificationRead { id } => {
                coordinator.mark_read(caller, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
        }
    }
}

// ── Result rows ──────────────────────────────────────────────────

fn receipt_response(receipt: BookingReceipt) -> PgWireResult<Response> {
    let schema = Arc::new(receipt_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&receipt.booking_id.to_string())?;
    encoder.encode_field(&receipt.meet_url)?;
    encoder.encode_field(&receipt.calendar_html_link)?;
    encoder.encode_field(&receipt.message)?;
    let rows = vec![Ok(encoder.take_row())];
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn bookings_response(bookings: Vec<Booking>) -> Response {
    let schema = Arc::new(booking_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.mentor_id)?;
            encoder.encode_field(&b.mentee_id)?;
            encoder.encode_field(&b.mentee_email)?;
            encoder.encode_field(&b.mentor_email)?;
            encoder.encode_field(&format_ms(b.span.start))?;
            encoder.encode_field(&format_ms(b.span.end))?;
            encoder.encode_field(&b.date.to_string())?;
            encoder.encode_field(&b.timezone)?;
            encoder.encode_field(&b.notes)?;
            encoder.encode_field(&b.status.as_str().to_string())?;
            encoder.encode_field(&b.meet_url)?;
            encoder.encode_field(&b.calendar_html_link)?;
            encoder.encode_field(&format_ms(b.created_at))?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn notifications_response(notifications: Vec<Notification>) -> Response {
    let schema = Arc::new(notification_schema());
    let rows: Vec<PgWireResult<_>> = notifications
        .into_iter()
        .map(|n| {
            let meta = serde_json::to_string(&n.meta).unwrap_or_else(|_| "{}".to_string());
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&n.id.to_string())?;
            encoder.encode_field(&n.kind.as_str().to_string())?;
            encoder.encode_field(&n.title)?;
            encoder.encode_field(&n.body)?;
            encoder.encode_field(&meta)?;
            encoder.encode_field(&n.read)?;
            encoder.encode_field(&format_ms(n.created_at))?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn text_fields(names: &[&str]) -> Vec<FieldInfo> {
    names.iter().map(|n| field(n, Type::VARCHAR)).collect()
}

fn free_slot_schema() -> Vec<FieldInfo> {
    text_fields(&["date", "start", "end"])
}

fn day_schema() -> Vec<FieldInfo> {
    let mut fields = text_fields(&["date", "start", "end"]);
    fields.push(field("booked", Type::BOOL));
    fields.push(field("timezone", Type::VARCHAR));
    fields.push(field("version", Type::INT8));
    fields
}

fn dates_schema() -> Vec<FieldInfo> {
    text_fields(&["date"])
}

fn receipt_schema() -> Vec<FieldInfo> {
    text_fields(&["booking_id", "meet_url", "calendar_html_link", "message"])
}

fn booking_schema() -> Vec<FieldInfo> {
    text_fields(&[
        "id",
        "mentor_id",
        "mentee_id",
        "mentee_email",
        "mentor_email",
        "start",
        "end",
        "date",
        "timezone",
        "notes",
        "status",
        "meet_url",
        "calendar_html_link",
        "created_at",
    ])
}

fn notification_schema() -> Vec<FieldInfo> {
    let mut fields = text_fields(&["id", "kind", "title", "body", "meta"]);
    fields.push(field("read", Type::BOOL));
    fields.push(field("created_at", Type::VARCHAR));
    fields
}

/// Row shape of a statement, judged from its verb and table before parameters
/// are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    let table_after = |keyword: &str| {
        words
            .windows(2)
            .find(|w| w[0] == keyword)
            .map(|w| {
                w[1].split('(')
                    .next()
                    .unwrap_or_default()
                    .trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            })
    };
    match words.first().copied() {
        Some("select") => match table_after("from") {
            Some("availability") => free_slot_schema(),
            Some("slots") => day_schema(),
            Some("available_dates") => dates_schema(),
            Some("bookings") => booking_schema(),
            Some("notifications") => notification_schema(),
            _ => vec![],
        },
        Some("insert") if table_after("into") == Some("bookings") => receipt_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for TandemHandler {
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
        self.run(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct TandemQueryParser;

#[async_trait]
impl QueryParser for TandemQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for TandemHandler {
    type Statement = String;
    type QueryParser = TandemQueryParser;

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
        let sql = substitute_params(portal);
        self.run(client, &sql)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| sql_err(SqlError::Empty))
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
            result_schema(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
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

/// Inline bound text parameters as quoted literals. One left-to-right pass:
/// each `$N` is replaced once and inserted text is never scanned again.
fn substitute_params(portal: &Portal<String>) -> String {
    inline_params(&portal.statement.statement, &portal.parameters)
}

fn inline_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let param = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match param {
            Some(Some(bytes)) => {
                out.push('\'');
                out.push_str(&String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''"));
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => out.push_str(&rest[pos..pos + 1 + digits]),
        }
        rest = &after[digits..];
    }
    out.push_str(rest);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct TandemFactory {
    handler: Arc<TandemHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<TandemAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl TandemFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(TandemHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                TandemAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for TandemFactory {
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

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    factory: Arc<TandemFactory>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidArgument(_) => "22023",
        EngineError::Unauthenticated => "28000",
        EngineError::Unauthorized(_) => "42501",
        EngineError::NotFound(_) => "P0002",
        EngineError::SlotUnavailable { .. } => "23P01",
        EngineError::VersionConflict { .. } => "40001",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if matches!(e, EngineError::WalError(_)) {
        tracing::error!(error = %e, "storage failure");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
