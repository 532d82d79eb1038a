use crate::error::StorageError;
use crate::models::{
    ChannelTarget, ChannelUpdate, CheckResult, CheckSample, CheckStatus, EventKind, HISTORY_LIMIT,
    LastCheck, NewChannel, NewCheckResult, NotificationChannel, Service, ServiceStats,
    ServiceStatus, ServiceWithLastCheck, TelegramConfig,
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;
use uuid::Uuid;

/// Read/write access to services and their check history, as consumed by
/// the poll cycle.
pub trait ServiceStore: Send + Sync {
    /// Every service together with its single most recent check, if any.
    fn list_services_with_last_check(&self) -> Result<Vec<ServiceWithLastCheck>, StorageError>;

    /// Appends one check result. Results are never updated afterwards.
    fn create_check_result(&self, result: &NewCheckResult) -> Result<(), StorageError>;
}

/// Read-only access to notification channels.
pub trait ChannelStore: Send + Sync {
    fn list_enabled_channels(&self) -> Result<Vec<NotificationChannel>, StorageError>;
}

#[derive(Debug)]
pub struct Storage {
    conn: Mutex<Connection>,
}

/// Result of [`Storage::upsert_service_by_url`].
#[derive(Debug, Clone)]
pub struct UpsertedService {
    pub service: Service,
    pub created: bool,
}

impl Storage {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                fs::create_dir_all(parent).map_err(|source| StorageError::Directory {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            _ => {}
        }

        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        let storage = Storage {
            conn: Mutex::new(conn),
        };
        storage.run_migrations()?;
        Ok(storage)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS services (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                expected_version TEXT,
                environment TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS check_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                service_id TEXT NOT NULL REFERENCES services(id) ON DELETE CASCADE,
                status TEXT NOT NULL,
                latency INTEGER,
                detected_version TEXT,
                error_message TEXT,
                timestamp INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_check_results_service_time
                ON check_results (service_id, timestamp DESC);

            CREATE TABLE IF NOT EXISTS channels (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                type TEXT NOT NULL,
                url TEXT,
                config TEXT,
                events TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Creates the service or refreshes the descriptive fields of the one
    /// already registered under `url`.
    pub fn upsert_service_by_url(
        &self,
        name: &str,
        url: &str,
        expected_version: Option<&str>,
        environment: Option<&str>,
    ) -> Result<UpsertedService, StorageError> {
        let conn = self.conn()?;
        let existing = conn
            .query_row(
                "SELECT id FROM services WHERE url = ?1",
                params![url],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        let (id, created) = match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE services SET name = ?2, expected_version = ?3, environment = ?4
                     WHERE id = ?1",
                    params![id, name, expected_version, environment],
                )?;
                (id, false)
            }
            None => {
                let id = Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO services (id, name, url, expected_version, environment, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        id,
                        name,
                        url,
                        expected_version,
                        environment,
                        Utc::now().timestamp_millis()
                    ],
                )?;
                (id, true)
            }
        };

        Ok(UpsertedService {
            service: Service {
                id,
                name: name.to_string(),
                url: url.to_string(),
                expected_version: expected_version.map(str::to_string),
                environment: environment.map(str::to_string),
            },
            created,
        })
    }

    pub fn create_channel(
        &self,
        channel: &NewChannel,
    ) -> Result<NotificationChannel, StorageError> {
        let id = Uuid::new_v4().to_string();
        let (url, config) = match &channel.target {
            ChannelTarget::Webhook { url } => (Some(url.clone()), None),
            ChannelTarget::Telegram { config } => {
                let config = serde_json::to_string(config)
                    .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
                (None, Some(config))
            }
        };

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO channels (id, name, type, url, config, events, enabled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                channel.name,
                channel.target.type_name(),
                url,
                config,
                join_events(&channel.events),
                channel.enabled,
                Utc::now().timestamp_millis()
            ],
        )?;

        Ok(NotificationChannel {
            id,
            name: channel.name.clone(),
            enabled: channel.enabled,
            events: channel.events.clone(),
            target: channel.target.clone(),
        })
    }

    /// Looks a channel up by id regardless of whether it is enabled.
    pub fn find_channel(&self, id: &str) -> Result<Option<NotificationChannel>, StorageError> {
        let conn = self.conn()?;
        find_channel_internal(&conn, id)
    }

    /// Every channel, newest first. Misconfigured rows are skipped.
    pub fn list_channels(&self) -> Result<Vec<NotificationChannel>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, type, url, config, events, enabled
             FROM channels
             ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map([], ChannelRow::read)?;
        collect_channels(rows)
    }

    /// Applies `update` and returns the stored channel, or `None` if `id` is unknown.
    pub fn update_channel(
        &self,
        id: &str,
        update: &ChannelUpdate,
    ) -> Result<Option<NotificationChannel>, StorageError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE channels
             SET enabled = COALESCE(?2, enabled), events = COALESCE(?3, events)
             WHERE id = ?1",
            params![id, update.enabled, update.events.as_ref().map(join_events)],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        find_channel_internal(&conn, id)
    }

    /// Returns whether a channel was removed.
    pub fn delete_channel(&self, id: &str) -> Result<bool, StorageError> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM channels WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    pub fn list_services(&self) -> Result<Vec<Service>, StorageError> {
        let conn = self.conn()?;
        list_services_internal(&conn)
    }

    pub fn latest_check(&self, service_id: &str) -> Result<Option<CheckResult>, StorageError> {
        let conn = self.conn()?;
        latest_check_internal(&conn, service_id)
    }

    /// Latest check and rolling statistics since `since` for every service.
    pub fn status_overview(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ServiceStatus>, StorageError> {
        let conn = self.conn()?;
        let services = list_services_internal(&conn)?;

        let mut overview = Vec::with_capacity(services.len());
        for service in services {
            let latest_check = latest_check_internal(&conn, &service.id)?;
            let stats = stats_since_internal(&conn, &service.id, since)?;
            let history = history_since_internal(&conn, &service.id, since)?;
            overview.push(ServiceStatus {
                service,
                latest_check,
                stats,
                history,
            });
        }
        Ok(overview)
    }
}

impl ServiceStore for Storage {
    fn list_services_with_last_check(&self) -> Result<Vec<ServiceWithLastCheck>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT s.id, s.name, s.url, s.expected_version, s.environment,
                   c.status, c.detected_version
            FROM services s
            LEFT JOIN check_results c ON c.id = (
                SELECT id FROM check_results
                WHERE service_id = s.id
                ORDER BY timestamp DESC, id DESC
                LIMIT 1
            )
            ORDER BY s.created_at ASC, s.name ASC
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                read_service(row)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut services = Vec::new();
        for row in rows {
            let (service, status, detected_version) = row?;
            let last_check = match status {
                Some(raw) => Some(LastCheck {
                    status: parse_status(raw)?,
                    detected_version,
                }),
                None => None,
            };
            services.push(ServiceWithLastCheck {
                service,
                last_check,
            });
        }
        Ok(services)
    }

    fn create_check_result(&self, result: &NewCheckResult) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO check_results
                (service_id, status, latency, detected_version, error_message, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                result.service_id,
                result.status.as_str(),
                result.latency_ms.map(|v| v as i64),
                result.detected_version,
                result.error_message,
                Utc::now().timestamp_millis()
            ],
        )?;
        Ok(())
    }
}

impl ChannelStore for Storage {
    fn list_enabled_channels(&self) -> Result<Vec<NotificationChannel>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, type, url, config, events, enabled
             FROM channels
             WHERE enabled = 1
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], ChannelRow::read)?;
        collect_channels(rows)
    }
}

fn collect_channels(
    rows: impl Iterator<Item = rusqlite::Result<ChannelRow>>,
) -> Result<Vec<NotificationChannel>, StorageError> {
    let mut channels = Vec::new();
    for row in rows {
        let row = row?;
        let id = row.id.clone();
        match row.into_channel() {
            Ok(channel) => channels.push(channel),
            Err(err) => warn!("Skipping misconfigured channel {id}: {err}"),
        }
    }
    Ok(channels)
}

fn find_channel_internal(
    conn: &Connection,
    id: &str,
) -> Result<Option<NotificationChannel>, StorageError> {
    let row = conn
        .query_row(
            "SELECT id, name, type, url, config, events, enabled FROM channels WHERE id = ?1",
            params![id],
            ChannelRow::read,
        )
        .optional()?;

    match row {
        Some(row) => row.into_channel().map(Some),
        None => Ok(None),
    }
}

struct ChannelRow {
    id: String,
    name: String,
    kind: String,
    url: Option<String>,
    config: Option<String>,
    events: String,
    enabled: bool,
}

impl ChannelRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ChannelRow {
            id: row.get(0)?,
            name: row.get(1)?,
            kind: row.get(2)?,
            url: row.get(3)?,
            config: row.get(4)?,
            events: row.get(5)?,
            enabled: row.get(6)?,
        })
    }

    fn into_channel(self) -> Result<NotificationChannel, StorageError> {
        let target = match self.kind.as_str() {
            "WEBHOOK" => match self.url {
                Some(url) if !url.trim().is_empty() => ChannelTarget::Webhook { url },
                _ => {
                    return Err(StorageError::InvalidValue {
                        field: "channels.url",
                        value: String::new(),
                    });
                }
            },
            "TELEGRAM" => {
                let raw = self.config.unwrap_or_default();
                let telegram = serde_json::from_str::<TelegramConfig>(&raw).map_err(|_| {
                    StorageError::InvalidValue {
                        field: "channels.config",
                        value: raw.clone(),
                    }
                })?;
                ChannelTarget::Telegram { config: telegram }
            }
            other => {
                return Err(StorageError::InvalidValue {
                    field: "channels.type",
                    value: other.to_string(),
                });
            }
        };

        Ok(NotificationChannel {
            id: self.id,
            name: self.name,
            enabled: self.enabled,
            events: split_events(&self.events),
            target,
        })
    }
}

fn read_service(row: &Row<'_>) -> rusqlite::Result<Service> {
    Ok(Service {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        expected_version: row.get(3)?,
        environment: row.get(4)?,
    })
}

fn list_services_internal(conn: &Connection) -> Result<Vec<Service>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, url, expected_version, environment
         FROM services
         ORDER BY created_at ASC, name ASC",
    )?;
    let rows = stmt.query_map([], read_service)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn history_since_internal(
    conn: &Connection,
    service_id: &str,
    since: DateTime<Utc>,
) -> Result<Vec<CheckSample>, StorageError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT status, latency, timestamp
        FROM check_results
        WHERE service_id = ?1 AND timestamp >= ?2
        ORDER BY timestamp DESC, id DESC
        LIMIT ?3
        "#,
    )?;
    let rows = stmt.query_map(
        params![service_id, since.timestamp_millis(), HISTORY_LIMIT as i64],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, i64>(2)?,
            ))
        },
    )?;

    let mut history = Vec::new();
    for row in rows {
        let (status, latency, timestamp) = row?;
        history.push(CheckSample {
            status: parse_status(status)?,
            latency: latency.map(|v| v.max(0) as u64),
            timestamp: parse_timestamp(timestamp)?,
        });
    }
    Ok(history)
}

fn latest_check_internal(
    conn: &Connection,
    service_id: &str,
) -> Result<Option<CheckResult>, StorageError> {
    let row = conn
        .query_row(
            r#"
            SELECT id, service_id, status, latency, detected_version, error_message, timestamp
            FROM check_results
            WHERE service_id = ?1
            ORDER BY timestamp DESC, id DESC
            LIMIT 1
            "#,
            params![service_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            },
        )
        .optional()?;

    let Some((id, service_id, status, latency, detected_version, error_message, timestamp)) = row
    else {
        return Ok(None);
    };

    Ok(Some(CheckResult {
        id,
        service_id,
        status: parse_status(status)?,
        latency: latency.map(|v| v.max(0) as u64),
        detected_version,
        error_message,
        timestamp: parse_timestamp(timestamp)?,
    }))
}

fn parse_timestamp(millis: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| StorageError::InvalidValue {
        field: "check_results.timestamp",
        value: millis.to_string(),
    })
}

fn stats_since_internal(
    conn: &Connection,
    service_id: &str,
    since: DateTime<Utc>,
) -> Result<ServiceStats, StorageError> {
    let (total, up, avg_latency) = conn.query_row(
        r#"
        SELECT COUNT(*),
               COALESCE(SUM(CASE WHEN status = 'UP' THEN 1 ELSE 0 END), 0),
               AVG(latency)
        FROM check_results
        WHERE service_id = ?1 AND timestamp >= ?2
        "#,
        params![service_id, since.timestamp_millis()],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<f64>>(2)?,
            ))
        },
    )?;

    let total_checks = total.max(0) as u64;
    let up_checks = up.max(0) as u64;
    let uptime_percentage = if total_checks > 0 {
        (up_checks as f64 / total_checks as f64) * 100.0
    } else {
        0.0
    };

    Ok(ServiceStats {
        total_checks,
        up_checks,
        uptime_percentage,
        avg_latency_ms: avg_latency,
    })
}

fn parse_status(raw: String) -> Result<CheckStatus, StorageError> {
    raw.parse().map_err(|value| StorageError::InvalidValue {
        field: "check_results.status",
        value,
    })
}

fn join_events(events: &BTreeSet<EventKind>) -> String {
    events
        .iter()
        .map(|event| event.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

// Unknown names are dropped so a stale subscription cannot disable a channel.
fn split_events(raw: &str) -> BTreeSet<EventKind> {
    raw.split(',')
        .filter_map(|name| name.parse::<EventKind>().ok())
        .collect()
}
