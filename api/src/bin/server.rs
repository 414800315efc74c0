//! Confidential Payment Gateway API Server
//!
//! Hosts one confidential ledger on the local development backend and
//! exposes it over REST.
//!
//! Run this server using:
//! ```shell
//! cd api && cargo run --bin server
//! ```

use clap::Parser;
use gateway_api::{ApiConfig, ApiServer, ApiServerConfig};
use gateway_lib::GatewayConfig;
use tracing::{error, info};

/// Command line arguments for the server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host to bind to
    #[arg(long, env = "GATEWAY_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind to
    #[arg(long, env = "GATEWAY_PORT", default_value = "8080")]
    port: u16,

    /// Enable CORS for all origins
    #[arg(long, default_value = "true")]
    cors: bool,

    /// Maximum request size in bytes
    #[arg(long, default_value = "1048576")]
    max_request_size: usize,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    request_timeout: u64,

    /// Serve the network key to encryption clients
    #[arg(long, env = "GATEWAY_SERVE_NETWORK_KEY", default_value = "true")]
    serve_network_key: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Parse command line arguments
    let args = Args::parse();

    info!("🚀 Starting Confidential Payment Gateway API Server");
    info!("📍 Server will bind to {}:{}", args.host, args.port);

    let gateway_config = match GatewayConfig::from_env() {
        Ok(config) => {
            info!(
                "✅ Configuration loaded: network={} chain={}",
                config.network.name, config.network.chain_id
            );
            config
        }
        Err(e) => {
            error!("❌ Invalid configuration: {}", e);
            error!("💡 Check GATEWAY_NETWORK, CHAIN_ID and GATEWAY_CONTRACT_ADDRESS");
            std::process::exit(1);
        }
    };

    // Create server configuration
    let server_config = ApiServerConfig {
        api_config: ApiConfig::default(),
        host: args.host.clone(),
        port: args.port,
        enable_compression: true,
        enable_cors: args.cors,
        request_timeout_seconds: args.request_timeout,
        max_request_size_bytes: args.max_request_size,
        cors_origins: if args.cors {
            vec!["*".to_string()]
        } else {
            vec![]
        },
        serve_network_key: args.serve_network_key,
    };

    // Create API server
    let server = match ApiServer::new(&gateway_config, server_config) {
        Ok(server) => server,
        Err(e) => {
            error!("❌ Failed to start the gateway: {}", e);
            error!("💡 Set CHAIN_ID to 31337 or 1337 for the local backend");
            std::process::exit(1);
        }
    };
    let _event_logger = server.spawn_event_logger();

    // Create router
    let app = server.create_router();

    // Bind address
    let bind_address = server.bind_address();
    info!("🎯 Binding to address: {}", bind_address);

    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => {
            info!("✅ Successfully bound to {bind_address}");
            listener
        }
        Err(e) => {
            error!("❌ Failed to bind to {bind_address}: {e}");
            error!("💡 Make sure the port is not already in use");
            std::process::exit(1);
        }
    };

    let ledger = server.state().ledger.clone();

    // Print startup information
    println!();
    println!("🌟 Confidential Payment Gateway Running!");
    println!("📍 Server Address: http://{bind_address}");
    println!("📜 Ledger Address: {}", ledger.address());
    println!("⛓️  Chain ID:       {}", ledger.chain_id());
    println!("🔐 Balance Type:   {}", ledger.balance_type());
    println!();
    println!("📚 Available Endpoints:");
    println!("   • GET    /api/v1/health                 - Health check");
    println!("   • GET    /api/v1/info                   - API information");
    println!("   • GET    /api/v1/address                - Ledger address and chain");
    if args.serve_network_key {
        println!("   • GET    /api/v1/keys                   - Network key material");
    }
    println!("   • POST   /api/v1/payments               - addPayment");
    println!("   • POST   /api/v1/rates                  - applyRate");
    println!("   • GET    /api/v1/balances/{{user}}        - getEncryptedBalance");
    println!("   • POST   /api/v1/decrypt                - User decryption");
    println!("   • GET    /health                        - Health check (legacy path)");
    println!();
    println!("🔗 Example:");
    println!("   cli add-payment --value 100");
    println!("   cli decrypt-balance");
    println!();
    println!("🎊 Server ready for requests!");
    println!();

    // Start server
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("❌ Server error: {e}");
        std::process::exit(1);
    }

    info!("👋 Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("❌ Failed to listen for shutdown signal: {e}");
    }
}
