pub mod api;
pub mod authz;
pub mod config;
pub mod crypto;
pub mod db;
pub mod domain;
pub mod entities;
pub mod services;
pub mod state;

use std::sync::Arc;
use tokio::signal;

use anyhow::Context;
pub use config::Config;
use state::SharedState;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub async fn run() -> anyhow::Result<()> {
    let config = Config::load()?;

    let prometheus_handle = if config.observability.metrics_enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let builder = PrometheusBuilder::new();
        let handle = builder
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        info!("Prometheus metrics recorder initialized");
        Some(handle)
    } else {
        None
    };

    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let mut log_level = config.general.log_level.clone();
    if config.general.suppress_connection_errors {
        log_level.push_str(",hyper_util=off");
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    let fmt_layer = tracing_subscriber::fmt::layer();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if config.observability.loki_enabled {
        let url = url::Url::parse(&config.observability.loki_url).context("Invalid Loki URL")?;

        let (layer, task) = tracing_loki::builder()
            .label("app", "opsdesk")?
            .extra_field("env", "production")?
            .build_url(url)?;

        tokio::spawn(task);

        registry.with(layer).init();
        info!(
            "Loki logging initialized at {}",
            config.observability.loki_url
        );
    } else {
        registry.init();
    }

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "daemon" | "-d" | "--daemon" => {
            config.validate()?;
            run_daemon(config, prometheus_handle).await
        }

        "init" | "--init" => {
            if Config::create_default_if_missing()? {
                println!("✓ Config file created with a fresh signing key.");
                println!("  Edit config.toml and run `opsdesk daemon`.");
            } else {
                println!("config.toml already exists; nothing to do.");
            }
            Ok(())
        }

        "user" | "u" => {
            if args.len() < 3 {
                println!("Usage: opsdesk user <subcommand>");
                println!("Subcommands: create, list, unlock, set-password");
                return Ok(());
            }
            match args[2].as_str() {
                "create" => {
                    if args.len() < 4 {
                        println!("Usage: opsdesk user create <email> [--admin]");
                        return Ok(());
                    }
                    let email = &args[3];
                    let admin = args.iter().any(|a| a == "--admin");
                    cmd_user_create(config, email, admin).await
                }
                "list" | "ls" => cmd_user_list(config).await,
                "unlock" => {
                    if args.len() < 4 {
                        println!("Usage: opsdesk user unlock <email>");
                        return Ok(());
                    }
                    let email = &args[3];
                    cmd_user_unlock(config, email).await
                }
                "set-password" => {
                    if args.len() < 4 {
                        println!("Usage: opsdesk user set-password <email>");
                        return Ok(());
                    }
                    let email = &args[3];
                    cmd_user_set_password(config, email).await
                }
                _ => {
                    println!("Unknown user subcommand: {}", args[2]);
                    println!("Use: create, list, unlock, set-password");
                    Ok(())
                }
            }
        }

        "sessions" | "s" => {
            if args.len() < 3 {
                println!("Usage: opsdesk sessions <email>");
                return Ok(());
            }
            let email = &args[2];
            cmd_sessions_list(config, email).await
        }

        "help" | "-h" | "--help" => {
            print_help();
            Ok(())
        }

        _ => {
            println!("Unknown command: {}", args[1]);
            println!();
            print_help();
            Ok(())
        }
    }
}

fn print_help() {
    println!("Opsdesk - Internal Tooling Portal");
    println!("Accounts, sessions and role-based access for internal tools");
    println!();
    println!("USAGE:");
    println!("  opsdesk <COMMAND> [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("  daemon                     Run the web service");
    println!("  init                       Create default config file (with signing key)");
    println!("  user create <email>        Create a user (add --admin for the admin role)");
    println!("  user list                  List all users");
    println!("  user unlock <email>        Clear a lockout immediately");
    println!("  user set-password <email>  Reset a user's password");
    println!("  sessions <email>           List a user's active sessions");
    println!("  help                       Show this help message");
    println!();
    println!("EXAMPLES:");
    println!("  opsdesk init                          # Create config.toml");
    println!("  opsdesk user create ops@example.com --admin");
    println!("  opsdesk user unlock ops@example.com   # After too many failed logins");
    println!("  opsdesk daemon                        # Start the service");
    println!();
    println!("CONFIG:");
    println!("  Edit config.toml to configure the server, security policy, etc.");
}

fn read_password_from_stdin(prompt: &str) -> anyhow::Result<String> {
    println!("{prompt}");
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    let password = input.trim_end_matches(['\r', '\n']).to_string();
    if password.len() < 8 {
        anyhow::bail!("Password must be at least 8 characters");
    }
    Ok(password)
}

async fn cmd_user_create(config: Config, email: &str, admin: bool) -> anyhow::Result<()> {
    let password = read_password_from_stdin("Enter password for the new user:")?;

    let shared = SharedState::new(config).await?;

    let registered = shared
        .auth_service
        .register(email, &password, "")
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create user: {e}"))?;

    if admin {
        shared
            .store
            .assign_role(registered.user_id, authz::ADMIN_ROLE)
            .await?;
    }

    println!();
    println!(
        "✓ Created: {} (ID: {})",
        registered.email, registered.user_id
    );
    if admin {
        println!("  Role: admin");
    }
    println!("  Confirmation token: {}", registered.confirmation_token);
    println!();
    println!("Deliver the confirmation token to the user to activate the account.");

    Ok(())
}

async fn cmd_user_list(config: Config) -> anyhow::Result<()> {
    let shared = SharedState::new(config).await?;
    let users = shared.store.list_users().await?;

    if users.is_empty() {
        println!("No users yet.");
        println!();
        println!("Create one with: opsdesk user create <email>");
        return Ok(());
    }

    println!("Users ({} total)", users.len());
    println!("{:-<70}", "");

    let lockout_minutes = i64::from(shared.config.read().await.security.lockout_minutes);
    for user in users {
        let roles = shared.store.roles_for_user(user.id).await?;
        let locked =
            services::lockout::is_locked(user.locked_at, chrono::Utc::now(), lockout_minutes);

        let status = if locked {
            "🔒"
        } else if user.confirmed_at.is_some() {
            "✓"
        } else {
            "✉"
        };

        println!("{} {} (ID: {})", status, user.email, user.id);
        println!(
            "  Roles: {} | Failed attempts: {}",
            if roles.is_empty() {
                "none".to_string()
            } else {
                roles.join(", ")
            },
            user.failed_login_attempts
        );
    }

    println!();
    println!("Legend: ✓ Confirmed | ✉ Awaiting confirmation | 🔒 Locked");

    Ok(())
}

async fn cmd_user_unlock(config: Config, email: &str) -> anyhow::Result<()> {
    let shared = SharedState::new(config).await?;

    shared
        .auth_service
        .unlock(email, "cli")
        .await
        .map_err(|e| anyhow::anyhow!("Failed to unlock: {e}"))?;

    println!("✓ Unlocked: {email}");
    Ok(())
}

async fn cmd_user_set_password(config: Config, email: &str) -> anyhow::Result<()> {
    let password = read_password_from_stdin("Enter new password:")?;

    let shared = SharedState::new(config).await?;
    let security = shared.config.read().await.security.clone();

    let user = shared
        .store
        .get_user_by_email(email)
        .await?
        .ok_or_else(|| anyhow::anyhow!("User not found: {email}"))?;

    shared
        .store
        .user_repo()
        .update_password(user.id, &password, &security)
        .await?;

    println!("✓ Password updated for {email}");
    Ok(())
}

async fn cmd_sessions_list(config: Config, email: &str) -> anyhow::Result<()> {
    let shared = SharedState::new(config).await?;

    let user = shared
        .store
        .get_user_by_email(email)
        .await?
        .ok_or_else(|| anyhow::anyhow!("User not found: {email}"))?;

    let sessions = shared.store.list_active_sessions_for_user(user.id).await?;

    if sessions.is_empty() {
        println!("No active sessions for {email}.");
        return Ok(());
    }

    println!("Active sessions for {} ({} total)", email, sessions.len());
    println!("{:-<70}", "");

    for session in sessions {
        let remembered = if session.remember_token.is_some() {
            " [remembered]"
        } else {
            ""
        };
        let last_activity = session
            .last_activity_at
            .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());

        println!("• Session #{}{}", session.id, remembered);
        println!("  From: {} | {}", session.ip_address, session.user_agent);
        println!(
            "  Started: {} | Last activity: {}",
            session.created_at.to_rfc3339(),
            last_activity
        );
    }

    Ok(())
}

async fn run_daemon(
    config: Config,
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
) -> anyhow::Result<()> {
    info!(
        "Opsdesk v{} starting in daemon mode...",
        env!("CARGO_PKG_VERSION")
    );

    let shared = Arc::new(SharedState::new(config.clone()).await?);
    let api_state = api::create_app_state(shared, prometheus_handle).await?;

    let server_handle: Option<tokio::task::JoinHandle<()>> = if config.server.enabled {
        let port = config.server.port;
        info!("Starting Web API on port {}", port);

        let app = api::router(api_state).await;
        let addr = format!("0.0.0.0:{}", port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        Some(tokio::spawn(async move {
            info!("🌐 Web Server running at http://0.0.0.0:{}", port);
            if let Err(e) = axum::serve(listener, app).await {
                error!("Web server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!("Daemon running. Press Ctrl+C to stop.");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received");
        }
        Err(e) => {
            error!("Error listening for shutdown: {}", e);
        }
    }

    if let Some(handle) = server_handle {
        handle.abort();
    }
    info!("Daemon stopped");

    Ok(())
}
