use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::calendar::{CalendarAdapter, CalendarProvider};
use crate::compactor;
use crate::coordinator::Coordinator;
use crate::engine::{Engine, EngineOptions};
use crate::limits::*;
use crate::notify::{DisabledSink, NotificationSink, Notifier};

/// Manages per-tenant coordinators. Each tenant gets its own Engine + WAL +
/// compactor; the calendar provider is shared.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    coordinators: DashMap<String, Arc<Coordinator>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    calendar: Option<Arc<dyn CalendarProvider>>,
    notifications: bool,
    engine_options: EngineOptions,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            coordinators: DashMap::new(),
            data_dir,
            compact_threshold,
            calendar: None,
            notifications: true,
            engine_options: EngineOptions::default(),
        }
    }

    pub fn with_calendar(mut self, provider: Arc<dyn CalendarProvider>) -> Self {
        self.calendar = Some(provider);
        self
    }

    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.notifications = enabled;
        self
    }

    pub fn with_engine_options(mut self, options: EngineOptions) -> Self {
        self.engine_options = options;
        self
    }

    /// Get or lazily create the coordinator for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Coordinator>> {
        if let Some(coordinator) = self.coordinators.get(tenant) {
            return Ok(coordinator.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if self.coordinators.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many tenants"));
        }

        // Tenant names become file names.
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }

        // The held entry keeps two first connections from opening one WAL twice.
        let entry = self.coordinators.entry(tenant.to_string());
        if let dashmap::Entry::Occupied(existing) = &entry {
            return Ok(existing.get().clone());
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let engine = Arc::new(Engine::with_options(wal_path, self.engine_options)?);

        let sink: Arc<dyn NotificationSink> = if self.notifications {
            engine.clone()
        } else {
            Arc::new(DisabledSink)
        };
        let coordinator = Arc::new(Coordinator::new(
            engine.clone(),
            CalendarAdapter::new(self.calendar.clone(), engine.clone()),
            Notifier::new(sink),
        ));

        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(engine, threshold).await;
        });

        entry.or_insert(coordinator.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.coordinators.len() as f64);
        tracing::info!(tenant, "tenant loaded");
        Ok(coordinator)
    }
}
