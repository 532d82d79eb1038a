#[macro_use]
extern crate rocket;

use chrono::{Duration as ChronoDuration, Utc};
use dotenvy::dotenv;
use pulsewatch::checker::Checker;
use pulsewatch::config::{ServiceCatalog, Settings};
use pulsewatch::models::{ChannelUpdate, NewChannel, NotificationChannel, StatusSnapshot};
use pulsewatch::notifier::Notifier;
use pulsewatch::poller::{Poller, PollerHandle, run_polling_loop};
use pulsewatch::storage::Storage;
use pulsewatch::sync::{dependency_map, sync_services};
use reqwest::Client;
use rocket::fairing::AdHoc;
use rocket::http::Status as HttpStatus;
use rocket::serde::json::{Json, Value, json};
use rocket::tokio;
use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use tracing::{error, info, warn};

type ApiError = (HttpStatus, Json<Value>);

fn api_error(status: HttpStatus, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "success": false, "error": message.into() })))
}

#[get("/api/status")]
fn status(storage: &rocket::State<Arc<Storage>>) -> Result<Json<StatusSnapshot>, ApiError> {
    let since = Utc::now() - ChronoDuration::hours(24);
    match storage.status_overview(since) {
        Ok(services) => Ok(Json(StatusSnapshot {
            services,
            timestamp: Utc::now(),
        })),
        Err(err) => {
            error!("Failed to build status overview: {err}");
            Err(api_error(HttpStatus::InternalServerError, "Failed to fetch status"))
        }
    }
}

#[get("/api/dependencies")]
fn dependencies(
    storage: &rocket::State<Arc<Storage>>,
    catalog: &rocket::State<Arc<ServiceCatalog>>,
) -> Result<Json<BTreeMap<String, Vec<String>>>, ApiError> {
    let definitions = catalog.get().map_err(|err| {
        error!("Failed to load service catalog: {err}");
        api_error(HttpStatus::InternalServerError, "Failed to fetch dependencies")
    })?;
    let services = storage.list_services().map_err(|err| {
        error!("Failed to list services: {err}");
        api_error(HttpStatus::InternalServerError, "Failed to fetch dependencies")
    })?;
    Ok(Json(dependency_map(&services, &definitions)))
}

#[post("/api/refresh")]
async fn refresh(handle: &rocket::State<PollerHandle>) -> HttpStatus {
    match handle.refresh().await {
        Ok(()) => HttpStatus::Accepted,
        Err(err) => {
            error!("Failed to enqueue refresh request: {err}");
            HttpStatus::InternalServerError
        }
    }
}

#[get("/api/webhooks")]
fn list_channels(
    storage: &rocket::State<Arc<Storage>>,
) -> Result<Json<Vec<NotificationChannel>>, ApiError> {
    storage.list_channels().map(Json).map_err(|err| {
        error!("Failed to list channels: {err}");
        api_error(HttpStatus::InternalServerError, "Failed to fetch webhooks")
    })
}

#[post("/api/webhooks", data = "<channel>")]
fn create_channel(
    channel: Json<NewChannel>,
    storage: &rocket::State<Arc<Storage>>,
) -> Result<(HttpStatus, Json<NotificationChannel>), ApiError> {
    if !channel.is_complete() {
        return Err(api_error(HttpStatus::BadRequest, "Missing required fields"));
    }
    match storage.create_channel(&channel) {
        Ok(created) => {
            info!("Created {} channel {}", created.target.type_name(), created.name);
            Ok((HttpStatus::Created, Json(created)))
        }
        Err(err) => {
            error!("Failed to create channel: {err}");
            Err(api_error(HttpStatus::InternalServerError, "Failed to create webhook"))
        }
    }
}

#[patch("/api/webhooks/<id>", data = "<update>")]
fn update_channel(
    id: &str,
    update: Json<ChannelUpdate>,
    storage: &rocket::State<Arc<Storage>>,
) -> Result<Json<NotificationChannel>, ApiError> {
    match storage.update_channel(id, &update) {
        Ok(Some(channel)) => Ok(Json(channel)),
        Ok(None) => Err(api_error(HttpStatus::NotFound, "Webhook not found")),
        Err(err) => {
            error!("Failed to update channel {id}: {err}");
            Err(api_error(HttpStatus::InternalServerError, "Failed to update webhook"))
        }
    }
}

#[delete("/api/webhooks/<id>")]
fn delete_channel(
    id: &str,
    storage: &rocket::State<Arc<Storage>>,
) -> Result<Json<Value>, ApiError> {
    match storage.delete_channel(id) {
        Ok(true) => Ok(Json(json!({ "success": true }))),
        Ok(false) => Err(api_error(HttpStatus::NotFound, "Webhook not found")),
        Err(err) => {
            error!("Failed to delete channel {id}: {err}");
            Err(api_error(HttpStatus::InternalServerError, "Failed to delete webhook"))
        }
    }
}

#[post("/api/webhooks/<id>/test")]
async fn test_channel(
    id: &str,
    storage: &rocket::State<Arc<Storage>>,
    notifier: &rocket::State<Notifier>,
) -> Result<Json<Value>, ApiError> {
    let channel = match storage.find_channel(id) {
        Ok(Some(channel)) => channel,
        Ok(None) => return Err(api_error(HttpStatus::NotFound, "Webhook not found")),
        Err(err) => {
            error!("Failed to load channel {id}: {err}");
            return Err(api_error(HttpStatus::InternalServerError, "Internal server error"));
        }
    };

    match notifier.send_test(&channel).await {
        Ok(()) => Ok(Json(json!({ "success": true }))),
        Err(err) => {
            warn!("Test notification to {} failed: {err}", channel.name);
            Err(api_error(HttpStatus::BadRequest, err.to_string()))
        }
    }
}

#[post("/api/config/reload")]
fn reload_config(
    storage: &rocket::State<Arc<Storage>>,
    catalog: &rocket::State<Arc<ServiceCatalog>>,
) -> Result<Json<Value>, ApiError> {
    let definitions = catalog.reload().map_err(|err| {
        warn!("Service catalog reload failed: {err}");
        api_error(HttpStatus::BadRequest, err.to_string())
    })?;
    let summary = sync_services(storage, &definitions).map_err(|err| {
        error!("Service sync failed: {err}");
        api_error(HttpStatus::InternalServerError, "Failed to sync services")
    })?;
    Ok(Json(json!({
        "success": true,
        "created": summary.created,
        "updated": summary.updated,
    })))
}

#[launch]
fn rocket() -> _ {
    dotenv().ok();
    init_tracing();
    let settings = Settings::from_env();

    let storage = Arc::new(
        Storage::new(&settings.database_path).expect("failed to initialize SQLite storage"),
    );
    let catalog = Arc::new(ServiceCatalog::new(&settings.services_config_path));
    sync_catalog(&storage, &catalog);

    let http_client = Client::builder()
        .build()
        .expect("failed to build reqwest client");
    let notifier = Notifier::new(http_client.clone(), storage.clone())
        .with_telegram_api_base(settings.telegram_api_base.clone());
    let poller = Arc::new(Poller::new(
        storage.clone(),
        Checker::new(http_client),
        notifier.clone(),
    ));
    let (handle, poll_rx) = PollerHandle::new(4);
    let poll_settings = settings.poll.clone();

    rocket::build()
        .manage(Arc::clone(&storage))
        .manage(Arc::clone(&catalog))
        .manage(notifier)
        .manage(handle)
        .mount(
            "/",
            routes![
                status,
                dependencies,
                refresh,
                list_channels,
                create_channel,
                update_channel,
                delete_channel,
                test_channel,
                reload_config
            ],
        )
        .attach(AdHoc::on_liftoff("Polling Engine", move |_| {
            Box::pin(async move {
                tokio::spawn(run_polling_loop(poller, poll_settings, poll_rx));
            })
        }))
}

fn sync_catalog(storage: &Storage, catalog: &ServiceCatalog) {
    info!("Loading service catalog from {}", catalog.path().display());
    let definitions = match catalog.get() {
        Ok(definitions) => definitions,
        Err(err) => {
            warn!("Skipping service sync: {err}");
            return;
        }
    };

    match sync_services(storage, &definitions) {
        Ok(summary) => info!(
            "Service sync completed ({} created, {} updated)",
            summary.created, summary.updated
        ),
        Err(err) => error!("Service sync failed: {err}"),
    }
}

fn init_tracing() {
    let filter = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
