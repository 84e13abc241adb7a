use std::{net::SocketAddr, path::Path, sync::Arc};

use breakwater::{
    adapters::{
        GatewayHttpHandler, HealthAggregator, RedisRateStore, UpstreamHttpClient, middleware,
    },
    config::{GatewayConfigValidator, loader::load_config, models::GatewayConfig},
    core::{CircuitBreakerRegistry, RateLimiter, RequestRouter, TokenService},
    metrics,
    ports::{http_client::HttpClient, rate_store::RateStore},
    tracing_setup,
    utils::graceful_shutdown::GracefulShutdown,
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
    /// Start the gateway server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let (command, config_path) = match args.command {
        Some(Commands::Validate { config }) => ("validate", config),
        Some(Commands::Init { config }) => ("init", config),
        Some(Commands::Serve { config }) => ("serve", config),
        None => ("serve", args.config), // Default to serve with config from args
    };

    match command {
        "validate" => return validate_config_command(&config_path),
        "init" => return init_config_command(&config_path).await,
        "serve" => serve(&config_path).await,
        _ => unreachable!(),
    }
}

async fn serve(config_path: &str) -> Result<()> {
    tracing_setup::init_tracing().map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    metrics::init_metrics();

    tracing::info!("loading configuration from {config_path}");
    let config = load_config(config_path)
        .with_context(|| format!("Failed to load config from {config_path}"))?;
    GatewayConfigValidator::validate(&config).context("Configuration validation failed")?;
    let config = Arc::new(config);

    let upstream_timeout_ms = humantime::parse_duration(&config.server.upstream_timeout)
        .context("Failed to parse server.upstream_timeout")?
        .as_millis() as u64;
    let health_export_interval = humantime::parse_duration(&config.server.health_export_interval)
        .context("Failed to parse server.health_export_interval")?;

    let http_client: Arc<dyn HttpClient> = Arc::new(
        UpstreamHttpClient::new(upstream_timeout_ms)
            .context("Failed to create the upstream HTTP client")?,
    );

    let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker.clone()));
    let router = Arc::new(
        RequestRouter::new(&config.routes, Arc::clone(&breakers), http_client)
            .map_err(|e| eyre!("Failed to build the route table: {e}"))?,
    );
    let tokens = Arc::new(
        TokenService::new(&config.tokens).map_err(|e| eyre!("Failed to set up tokens: {e}"))?,
    );

    // A shared rate store that cannot be reached at startup is not fatal: the
    // gateway serves with per-process counters until a restart.
    let rate_store: Option<Arc<dyn RateStore>> = match &config.rate_limits.store_url {
        Some(url) => {
            match RedisRateStore::connect(url, config.rate_limits.store_timeout_ms).await {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "shared rate store unavailable at startup, using in-memory counters"
                    );
                    None
                }
            }
        }
        None => None,
    };
    let limiter = Arc::new(
        RateLimiter::new(&config.rate_limits, rate_store)
            .map_err(|e| eyre!("Failed to set up rate limiting: {e}"))?,
    );

    let aggregator = Arc::new(HealthAggregator::new(
        Arc::clone(&breakers),
        Arc::clone(&limiter),
    ));

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let aggregator_task = Arc::clone(&aggregator);
    let aggregator_shutdown = graceful_shutdown.shutdown_token();
    tokio::spawn(async move {
        aggregator_task
            .run(health_export_interval, aggregator_shutdown)
            .await;
    });

    let handler = Arc::new(GatewayHttpHandler::new(router, tokens, limiter, aggregator));
    let app = build_app(handler, &config);

    let addr: SocketAddr = config
        .server
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    for route in &config.routes {
        tracing::info!(
            prefix = route.prefix,
            service = route.service,
            backend = route.backend_url,
            requires_auth = route.requires_auth,
            "configured route"
        );
    }
    tracing::info!("Breakwater gateway starting on {addr}");
    println!("Breakwater gateway listening on {addr}");

    let server_result = tokio::select! {
        result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        ) => {
            result.context("Server error")
        },
        shutdown_reason = graceful_shutdown.wait_for_shutdown_signal() => {
            tracing::info!("Shutdown signal received: {:?}", shutdown_reason);
            Ok(())
        }
    };
    server_result?;

    tracing::info!("Graceful shutdown completed");
    Ok(())
}

fn build_app(handler: Arc<GatewayHttpHandler>, config: &GatewayConfig) -> axum::Router {
    use std::convert::Infallible;

    use axum::{
        Router,
        body::Body,
        extract::{ConnectInfo, Request},
        middleware::from_fn,
        response::Response,
        routing::any,
    };
    use tower_http::compression::CompressionLayer;

    let make_request_route = |handler: Arc<GatewayHttpHandler>| {
        any(
            move |ConnectInfo(client_addr): ConnectInfo<SocketAddr>, req: Request| {
                let handler = handler.clone();
                async move {
                    match handler.handle_request(req, Some(client_addr)).await {
                        Ok(response) => Ok::<Response<Body>, Infallible>(response),
                        Err(e) => {
                            tracing::error!("Request handling error: {:?}", e);
                            let error_response = Response::builder()
                                .status(500)
                                .body(Body::from("Internal Server Error"))
                                .unwrap_or_else(|_| {
                                    Response::new(Body::from("Internal Server Error"))
                                });
                            Ok(error_response)
                        }
                    }
                }
            },
        )
    };

    let cors = middleware::create_cors_middleware(Arc::new(
        config.server.cors_allowed_origins.clone(),
    ));

    Router::new()
        .route("/{*path}", make_request_route(handler.clone()))
        .route("/", make_request_route(handler))
        .layer(CompressionLayer::new())
        .layer(from_fn(middleware::security_headers_middleware))
        .layer(from_fn(move |req, next| {
            let cors = cors.clone();
            async move { cors(req, next).await }
        }))
        .layer(from_fn(middleware::request_timing_middleware))
        .layer(from_fn(middleware::request_id_middleware))
}

/// Validate configuration file and exit
fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path) {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match GatewayConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.server.listen_addr);
            println!("   • Routes: {}", config.routes.len());
            println!(
                "   • Breaker: opens after {} failures, retries after {}ms",
                config.breaker.failure_threshold, config.breaker.reset_timeout_ms
            );
            println!(
                "   • Rate Limits: general {}/{}, sensitive {}/{}",
                config.rate_limits.general.max,
                config.rate_limits.general.window,
                config.rate_limits.sensitive.max,
                config.rate_limits.sensitive.window
            );
            println!(
                "   • Shared Rate Store: {}",
                config.rate_limits.store_url.is_some()
            );
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure backend URLs start with http:// or https://");
            println!("   • Verify listen address format (e.g., '127.0.0.1:8080')");
            println!("   • Set BREAKWATER JWT secrets (distinct access and refresh)");
            println!("   • Ensure durations use valid units (e.g., '30s', '15m')");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Breakwater Gateway Configuration

[server]
listen_addr = "127.0.0.1:8080"
upstream_timeout = "30s"
health_export_interval = "10s"
cors_allowed_origins = []

# Secrets come from the environment:
#   JWT_SECRET, JWT_REFRESH_SECRET (required, must differ)
#   REDIS_URL (optional shared rate-limit store)
[tokens]
access_expiry = "15m"
refresh_expiry = "7d"
issuer = "breakwater"

[breaker]
failure_threshold = 5
reset_timeout_ms = 60000
monitoring_period_ms = 120000

[rate_limits.general]
window = "15m"
max = 100

[rate_limits.sensitive]
window = "15m"
max = 5

[[routes]]
prefix = "/api/auth"
service = "auth-service"
backend_url = "http://localhost:5001/api/auth"

[[routes]]
prefix = "/api/jobs"
service = "job-service"
backend_url = "http://localhost:5003/api/jobs"
requires_auth = true
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'breakwater serve --config {config_path}' to start the server");
    Ok(())
}
