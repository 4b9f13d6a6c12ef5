use clap::Parser;
use log::{error, info};
use server::http::{self, AppState};
use server::rooms::RoomStore;
use std::sync::Arc;

/// Main-method of the application.
/// Parses command-line arguments, then serves the WebSocket and REST
/// endpoints until interrupted.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Teacher dashboard password (falls back to the
        /// TEACHER_PASSWORD environment variable)
        #[clap(long)]
        teacher_password: Option<String>,
    }

    env_logger::init();

    // Parse command line arguments
    let args = Args::parse();

    let teacher_password = args
        .teacher_password
        .or_else(|| std::env::var("TEACHER_PASSWORD").ok())
        .unwrap_or_else(|| "teach123".to_string());

    let state = AppState {
        store: Arc::new(RoomStore::new()),
        teacher_secret: Arc::new(teacher_password),
    };
    let app = http::router(state);

    let address = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("classroom server listening on {}", address);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("server error: {}", e);
        }
    });

    // Handle shutdown gracefully
    tokio::select! {
        result = server_handle => {
            if let Err(e) = result {
                error!("server task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
