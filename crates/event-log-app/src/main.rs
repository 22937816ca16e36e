use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};

use event_log_api::{metrics as api_metrics, routes, Config, Consumer};
use event_log_core::{StatusChanger, ZombieCleaner};
use event_log_dispatch::{Category, Finder, LeastOccupiedFirst, NotificationDispatcher, Sender, SendingResult};
use event_log_registry::SubscribersRegistry;

/// One category's finder + sender dispatch loop, §4.5 / §5: pop an
/// event, hand it to a subscriber, react to the outcome, repeat.
async fn run_dispatch_loop(
    category_name: &'static str,
    finder: Arc<Finder>,
    sender: Arc<Sender>,
    registry: Arc<SubscribersRegistry>,
    pool: event_log_db::DbPool,
    retry_interval: Duration,
) {
    loop {
        let subscriber_url = registry.find_available_subscriber().await;
        let Some(delivery_id) = registry.delivery_id_for(&subscriber_url) else {
            tracing::warn!(category_name, subscriber_url, "subscriber vanished between lookup and dispatch");
            continue;
        };

        let popped = match finder.pop_event(&pool, delivery_id).await {
            Ok(popped) => popped,
            Err(e) => {
                tracing::error!(category_name, error = %e, "finder loop: pop_event failed");
                tokio::time::sleep(retry_interval).await;
                continue;
            }
        };

        let Some((event, payload)) = popped else {
            tokio::time::sleep(retry_interval).await;
            continue;
        };

        match sender.send_event(&subscriber_url, &event, payload).await {
            Ok(SendingResult::Delivered) => {
                api_metrics::record_sent(category_name);
                api_metrics::record_delivery_outcome(category_name, "delivered");
            }
            Ok(SendingResult::TemporarilyUnavailable) => {
                api_metrics::record_delivery_outcome(category_name, "temporarily_unavailable");
                registry.mark_busy(&subscriber_url);
            }
            Ok(SendingResult::Misdelivered) => {
                api_metrics::record_delivery_outcome(category_name, "misdelivered");
                registry.delete(&subscriber_url);
            }
            Err(e) => {
                api_metrics::record_delivery_outcome(category_name, "fatal_client_error");
                tracing::error!(category_name, error = %e, "sender loop: fatal client error, event not retried");
            }
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if std::env::var("RUST_BACKTRACE").is_err() {
        std::env::set_var("RUST_BACKTRACE", "1");
    }
    dotenvy::dotenv().ok();

    event_log_api::logging::init_logging();

    let config = Config::from_env().map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("invalid configuration: {e}")))?;

    api_metrics::init_metrics().map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("failed to init metrics: {e}")))?;

    let pool = event_log_db::init_pool(&config.database.database_url)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("failed to init database pool: {e}")))?;

    tracing::info!("running schema migrations");
    let migration_pool = pool.clone();
    let reports = tokio::task::spawn_blocking(move || event_log_db::migration::run(&migration_pool))
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("migration task panicked: {e}")))?
        .map_err(|e| {
            tracing::error!(error = %e, "schema migration failed; refusing to serve");
            std::io::Error::new(std::io::ErrorKind::Other, format!("migration failed: {e}"))
        })?;
    for report in &reports {
        tracing::info!(version = report.version, outcome = ?report.outcome, execution_time_ms = report.execution_time_ms, "migration");
    }

    let gauges_updater: Arc<dyn event_log_core::GaugesUpdater> = Arc::new(api_metrics::PrometheusGaugesUpdater);

    let status_changer = Arc::new(StatusChanger::new(pool.clone(), gauges_updater.clone()));
    let consumer = Arc::new(Consumer::new(status_changer, config.dispatch.per_category_concurrency_limit, 4));

    let generation_registry = Arc::new(SubscribersRegistry::new(config.registry.busy_sleep));
    let transformation_registry = Arc::new(SubscribersRegistry::new(config.registry.busy_sleep));

    let _generation_checker = event_log_registry::spawn_checker(generation_registry.clone(), config.registry.checkup_interval);
    let _transformation_checker =
        event_log_registry::spawn_checker(transformation_registry.clone(), config.registry.checkup_interval);

    let zombie_cleaner = Arc::new(ZombieCleaner::new(pool.clone(), gauges_updater.clone(), Duration::from_secs(3600)));
    let _zombie_sweep = event_log_core::zombie_cleaner::spawn(zombie_cleaner, Duration::from_secs(300));

    let generation_finder = Arc::new(Finder::new(
        Category::AwaitingGeneration,
        Arc::new(LeastOccupiedFirst),
        gauges_updater.clone(),
        config.dispatch.projects_fetching_limit,
    ));
    let transformation_finder = Arc::new(Finder::new(
        Category::AwaitingTransformation,
        Arc::new(LeastOccupiedFirst),
        gauges_updater.clone(),
        config.dispatch.projects_fetching_limit,
    ));

    let sender = Arc::new(Sender::new(config.dispatch.request_timeout));

    tokio::spawn(run_dispatch_loop(
        "awaiting_generation",
        generation_finder,
        sender.clone(),
        generation_registry.clone(),
        pool.clone(),
        config.dispatch.retry_interval,
    ));
    tokio::spawn(run_dispatch_loop(
        "awaiting_transformation",
        transformation_finder,
        sender.clone(),
        transformation_registry,
        pool.clone(),
        config.dispatch.retry_interval,
    ));

    let notification_dispatcher = Arc::new(NotificationDispatcher::new(pool.clone(), generation_registry, sender));
    let _notification_dispatch = event_log_dispatch::notifier::spawn(notification_dispatcher, config.dispatch.retry_interval);

    let bind_address = config.http.bind_address();
    tracing::info!(bind_address, "starting HTTP server");

    let pool_data = web::Data::new(pool);
    let consumer_data = web::Data::new(consumer);

    HttpServer::new(move || {
        let cors = Cors::default().allow_any_origin().allow_any_method().allow_any_header().max_age(3600);

        App::new()
            .app_data(pool_data.clone())
            .app_data(consumer_data.clone())
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .configure(routes::configure)
    })
    .bind(bind_address)?
    .run()
    .await
}
