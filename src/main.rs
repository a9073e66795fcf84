//! FleetKeeper - Main Entry Point

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use rand::Rng;

use fleetkeeper_backend::{
    api,
    config::Config,
    db,
    error::Result,
    services::{auth_service::AuthService, dns_service::HickoryDnsResolver},
    telemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    telemetry::init_tracing();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Starting FleetKeeper backend");

    // Connect to database
    let db_pool = db::create_pool(&config).await?;
    tracing::info!("Connected to database");

    // Run migrations
    sqlx::migrate!("./migrations").run(&db_pool).await?;
    tracing::info!("Database migrations complete");

    // Provision the Super Admin account on first boot
    provision_super_admin(&db_pool, &config).await?;

    // Create application state
    let dns = Arc::new(HickoryDnsResolver::new(&config));
    let state = Arc::new(api::AppState::new(config.clone(), db_pool, dns));

    // Build router
    let app = api::routes::create_router(state)
        .layer({
            // In production the frontend is served from the same origin, so
            // credentials + same-origin work without an explicit allow-origin.
            // In development the frontend dev server runs on a different port,
            // so we must whitelist that origin and enable credentials.
            if config.environment == "development" {
                let origins: Vec<_> = config
                    .cors_origins
                    .iter()
                    .map(|s| s.parse().expect("invalid CORS origin"))
                    .collect();
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods([
                        Method::GET,
                        Method::POST,
                        Method::PUT,
                        Method::PATCH,
                        Method::DELETE,
                        Method::OPTIONS,
                    ])
                    .allow_headers([
                        header::CONTENT_TYPE,
                        header::AUTHORIZATION,
                        header::ACCEPT,
                        header::COOKIE,
                    ])
                    .allow_credentials(true)
            } else {
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any)
            }
        })
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Provision the Super Admin account on first boot.
///
/// When no Super Admin exists, one is created with the password from
/// `SUPERADMIN_PASSWORD` or a generated one that is logged exactly once.
async fn provision_super_admin(db: &sqlx::PgPool, config: &Config) -> Result<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'Super Admin'")
        .fetch_one(db)
        .await?;
    if count > 0 {
        return Ok(());
    }

    let (password, generated) = match std::env::var("SUPERADMIN_PASSWORD") {
        Ok(p) if !p.is_empty() => (p, false),
        _ => {
            const CHARSET: &[u8] =
                b"abcdefghijkmnopqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ23456789!@#$%&*";
            let mut rng = rand::rng();
            let p: String = (0..20)
                .map(|_| {
                    let idx = rng.random_range(0..CHARSET.len());
                    CHARSET[idx] as char
                })
                .collect();
            (p, true)
        }
    };

    let password_hash = AuthService::hash_password(&password)?;

    sqlx::query(
        r#"
        INSERT INTO users (username, email, password_hash, role, status)
        VALUES ('superadmin', $1, $2, 'Super Admin', 'active')
        ON CONFLICT (username) DO NOTHING
        "#,
    )
    .bind(&config.superadmin_email)
    .bind(&password_hash)
    .execute(db)
    .await?;

    if generated {
        tracing::warn!(
            "\n\
            ===========================================================\n\
            \n\
              Super Admin account created.\n\
            \n\
              Username:  superadmin\n\
              Password:  {}\n\
            \n\
              Store this password now; it is not shown again.\n\
            \n\
            ===========================================================",
            password
        );
    } else {
        tracing::info!("Super Admin created with password from SUPERADMIN_PASSWORD env var");
    }

    Ok(())
}
