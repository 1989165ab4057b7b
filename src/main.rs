use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskboard::auth::password;
use taskboard::models::user::{NewUser, UserPayload};
use taskboard::notification::push::ExpoPushDispatcher;
use taskboard::store::postgres::PgStore;
use taskboard::{cli, config, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::User { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_user_command(&db, command).await
        }
        Some(cli::Commands::Notification { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_notification_command(&db, command).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        tracing::error!("command failed: {:#}", e);
    }

    opentelemetry::global::shutdown_tracer_provider();
    result
}

/// fmt logging filtered by RUST_LOG, plus an OTLP exporter when
/// OTEL_EXPORTER_OTLP_ENDPOINT is set.
fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "taskboard"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "taskboard=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    Ok(())
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    let push = ExpoPushDispatcher::from_config(&cfg)?;
    if !cfg.push_enabled {
        tracing::warn!("push delivery disabled (TASKBOARD_PUSH_ENABLED)");
    }

    let prune_secs = cfg.orphan_prune_secs;
    let environment = cfg.environment.clone();
    let state = Arc::new(AppState::new(db, Arc::new(push), cfg));

    jobs::cleanup::spawn(state.db.pool().clone(), prune_secs);

    let app = taskboard::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%environment, "taskboard listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_user_command(db: &PgStore, cmd: cli::UserCommands) -> anyhow::Result<()> {
    match cmd {
        cli::UserCommands::Create {
            name,
            email,
            password: plain,
            department_id,
            admin,
        } => {
            if plain.len() < 8 {
                anyhow::bail!("password must be at least 8 characters");
            }
            if db.find_user_by_email(&email).await?.is_some() {
                anyhow::bail!("a user with email {} already exists", email);
            }
            let id = db
                .insert_user(&NewUser {
                    name: name.clone(),
                    email: email.clone(),
                    password_hash: password::hash_password(&plain)?,
                    department_id,
                    is_admin: admin,
                })
                .await?;
            println!(
                "User created:\n  ID:     {}\n  Name:   {}\n  Email:  {}\n  Admin:  {}",
                id, name, email, admin
            );
        }
        cli::UserCommands::List => {
            let users = db.list_users().await?;
            if users.is_empty() {
                println!("No users found.");
            } else {
                println!("{:<8} {:<24} {:<32} {:<16} {:<6}", "ID", "NAME", "EMAIL", "DEPARTMENT", "ADMIN");
                for u in users.into_iter().map(UserPayload::from) {
                    println!(
                        "{:<8} {:<24} {:<32} {:<16} {:<6}",
                        u.id,
                        u.name,
                        u.email,
                        u.department.name.unwrap_or_else(|| "-".into()),
                        u.is_admin
                    );
                }
            }
        }
    }
    Ok(())
}

async fn handle_notification_command(
    db: &PgStore,
    cmd: cli::NotificationCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::NotificationCommands::Prune => {
            let deleted = jobs::cleanup::prune_orphaned_notifications(db.pool()).await?;
            println!("Pruned {} notification(s) without recipients.", deleted);
        }
    }
    Ok(())
}
