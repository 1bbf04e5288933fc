use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use reconciler::billing::scheduler;
use reconciler::gateway::OrderGateway;
use reconciler::notifications::{Mailer, MailgunMailer, NotificationDispatcher};
use reconciler::routes::api_routes;
use reconciler::webhooks::WebhookState;
use reconciler::{config, CycleScheduler, Provisioning, ReminderEngine, ShopifyGateway};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Fail fast on missing platform or mail credentials
    config::ensure_required();

    let pool = PgPoolOptions::new()
        .max_connections(*config::DATABASE_MAX_CONNECTIONS)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(Box::new(error) as Box<dyn std::error::Error>);
        }
    }

    let settings = config::billing_settings();
    let gateway: Arc<dyn OrderGateway> = Arc::new(ShopifyGateway::new(config::shopify_settings())?);
    let mailer: Arc<dyn Mailer> = Arc::new(MailgunMailer::new(config::mailgun_settings())?);
    let dispatcher = NotificationDispatcher::start(mailer, config::dispatcher_settings());

    let provisioning = Arc::new(Provisioning::new(
        pool.clone(),
        gateway.clone(),
        dispatcher.handle(),
        settings.clone(),
    ));

    if *config::SCHEDULER_ENABLED {
        let cycles = Arc::new(CycleScheduler::new(
            pool.clone(),
            gateway.clone(),
            dispatcher.handle(),
            settings.clone(),
        ));
        let reminders = Arc::new(ReminderEngine::new(
            pool.clone(),
            dispatcher.handle(),
            settings.clone(),
        ));
        scheduler::spawn(
            cycles,
            reminders,
            settings.timezone,
            config::CYCLE_SCHEDULE.as_str(),
            config::REMINDER_SCHEDULE.as_str(),
        )?;
    } else {
        tracing::info!("billing schedules disabled");
    }

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(WebhookState::new(
            provisioning,
            config::SHOPIFY_HMAC_SECRET.as_str(),
        )));

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
