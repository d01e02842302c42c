use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use kura::{
    Config, auth::{TokenDatabase, TokenEntry, generate_token}, create_app, library::Library,
    startup_checks, sweep::Sweeper,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Global options that apply to all commands
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the photo store server (default if no command specified)
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long)]
        host: Option<String>,

        /// Automatically quit after specified number of seconds (useful for testing)
        #[arg(long)]
        quit_after: Option<u64>,
    },

    /// Manage API tokens
    #[command(subcommand)]
    Token(TokenCommands),
}

#[derive(Subcommand, Debug)]
enum TokenCommands {
    /// List all tokens
    List {
        /// Path to token database file
        #[arg(short, long, default_value = "tokens.toml")]
        database: String,
    },
    /// Add a token for a principal
    Add {
        /// Principal id the token authenticates as
        principal: String,
        /// Token value (generated if not given)
        #[arg(long)]
        token: Option<String>,
        /// Expiry in days from now (never expires if not given)
        #[arg(long)]
        expires_in_days: Option<i64>,
        /// Path to token database file
        #[arg(short, long, default_value = "tokens.toml")]
        database: String,
    },
    /// Remove a token
    Remove {
        /// Token value to remove
        token: String,
        /// Path to token database file
        #[arg(short, long, default_value = "tokens.toml")]
        database: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Set up logging first
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Some(Commands::Token(token_cmd)) => handle_token_command(token_cmd).await,
        Some(Commands::Serve {
            port,
            host,
            quit_after,
        }) => run_server(cli.config, port, host, quit_after).await,
        None => {
            // Default to serve command if no subcommand specified
            run_server(cli.config, None, None, None).await
        }
    }
}

async fn handle_token_command(cmd: TokenCommands) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        TokenCommands::List { database } => {
            let db_path = std::path::Path::new(&database);
            let db = if db_path.exists() {
                TokenDatabase::load_from_file(db_path).await?
            } else {
                println!("No token database found at: {}", database);
                return Ok(());
            };

            if db.tokens.is_empty() {
                println!("No tokens in database");
            } else {
                println!("Tokens in database:");
                for (token, entry) in &db.tokens {
                    match entry.expires_at {
                        Some(expires_at) => {
                            println!("  {} -> {} (expires at {})", token, entry.principal, expires_at)
                        }
                        None => println!("  {} -> {}", token, entry.principal),
                    }
                }
            }
        }
        TokenCommands::Add {
            principal,
            token,
            expires_in_days,
            database,
        } => {
            let db_path = std::path::Path::new(&database);
            let mut db = if db_path.exists() {
                TokenDatabase::load_from_file(db_path).await?
            } else {
                println!("Creating new token database at: {}", database);
                TokenDatabase::new()
            };

            let token = token.unwrap_or_else(generate_token);
            if db.tokens.contains_key(&token) {
                eprintln!("Error: token already exists");
                std::process::exit(1);
            }

            let expires_at =
                expires_in_days.map(|days| chrono::Utc::now().timestamp() + days * 86400);

            db.add_token(
                token.clone(),
                TokenEntry {
                    principal: principal.clone(),
                    expires_at,
                },
            );
            db.save_to_file(db_path).await?;
            println!("Added token for principal '{}': {}", principal, token);
        }
        TokenCommands::Remove { token, database } => {
            let db_path = std::path::Path::new(&database);
            let mut db = if db_path.exists() {
                TokenDatabase::load_from_file(db_path).await?
            } else {
                eprintln!("Error: No token database found at: {}", database);
                std::process::exit(1);
            };

            if db.remove_token(&token).is_some() {
                db.save_to_file(db_path).await?;
                println!("Removed token");
            } else {
                eprintln!("Error: token not found");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn run_server(
    config_path: PathBuf,
    port: Option<u16>,
    host: Option<String>,
    quit_after: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = if config_path.exists() {
        let config_content = std::fs::read_to_string(&config_path)?;
        toml_edit::de::from_str::<Config>(&config_content)?
    } else {
        info!("Config file not found at {:?}, using defaults", config_path);
        Config::default()
    };

    let host = host.unwrap_or(config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    info!("Starting {} server", config.app.name);
    info!("Configuration loaded from: {:?}", config_path);
    info!("Storage root: {:?}", config.storage.root_directory);
    info!("Token database: {:?}", config.app.token_database);

    // Perform startup checks
    match startup_checks::perform_startup_checks(&config).await {
        Ok(()) => info!("All startup checks passed"),
        Err(errors) => {
            for error in &errors {
                tracing::error!("Startup check failed: {}", error);
            }
            let critical_error = errors.iter().any(|e| {
                matches!(
                    e,
                    startup_checks::StartupCheckError::StorageRootCreationFailed(_)
                        | startup_checks::StartupCheckError::StorageRootNotAccessible(_)
                )
            });

            if critical_error {
                tracing::error!("Critical startup check failed, exiting");
                return Err("Critical startup check failed".into());
            } else {
                tracing::warn!("Non-critical startup checks failed, continuing");
            }
        }
    }

    let app = create_app(config.clone()).await;

    // The sweeper gets its own library handle over the same storage root.
    // This avoids threading state out of create_app.
    let sweep_library = std::sync::Arc::new(Library::new(
        config.storage.clone(),
        config.thumbnails.clone(),
    ));
    let sweeper = std::sync::Arc::new(Sweeper::new(sweep_library));

    if let Some(interval_minutes) = config.sweep.interval_minutes
        && interval_minutes > 0
    {
        info!(
            "Starting consistency sweep at startup, then every {} minutes",
            interval_minutes
        );
        Sweeper::start_background(sweeper, interval_minutes);
    } else {
        info!("Periodic consistency sweep disabled, running once at startup");
        tokio::spawn(async move {
            sweeper.run_once().await;
        });
    }

    let addr = SocketAddr::from((host.parse::<std::net::IpAddr>()?, port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let app = app.into_make_service_with_connect_info::<SocketAddr>();

    // Set up graceful shutdown
    let server = axum::serve(listener, app);
    let graceful = server.with_graceful_shutdown(shutdown_signal(quit_after));

    if let Err(e) = graceful.await {
        tracing::error!("Server error: {}", e);
    }

    info!("Shutting down");
    Ok(())
}

async fn shutdown_signal(quit_after: Option<u64>) {
    use tokio::signal;
    use tokio::time::{Duration, sleep};

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let quit_timer = async {
        if let Some(seconds) = quit_after {
            info!(
                "Server will automatically shut down after {} seconds",
                seconds
            );
            sleep(Duration::from_secs(seconds)).await;
            info!("Quit timer expired, shutting down");
        } else {
            std::future::pending::<()>().await
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        },
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        },
        _ = quit_timer => {},
    }
}
