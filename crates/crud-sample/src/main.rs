//! # CRUD Sample Server
//!
//! Serves the [`Sample`](crud_sample::model::Sample) resource over HTTP:
//!
//! - REST under the configured base URI (`/api/v1/sample` by default)
//! - GraphQL at `--graphql-path` (`/graphql` by default)
//!
//! ```bash
//! RUST_LOG=info cargo run -p crud-sample -- --bind 127.0.0.1:8080 --token secret=alice:admin
//! curl -X POST localhost:8080/api/v1/sample -H 'content-type: application/json' -d '{"name":"A"}'
//! ```

use clap::Parser;
use crud_framework::logging::setup_tracing;
use crud_sample::config::SampleArgs;
use crud_sample::lifecycle::SampleSystem;
use std::error::Error;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    setup_tracing();

    let args = SampleArgs::parse();
    let config = args.resource_config()?;
    let resolver = Arc::new(args.token_registry()?);

    let system = SampleSystem::with_resolver(config, resolver);
    let app = system.router(&args.graphql_path);

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    info!(
        addr = %listener.local_addr()?,
        base_uri = %system.config().base_uri,
        graphql = %args.graphql_path,
        "Listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Cannot listen for shutdown signal");
            }
        })
        .await?;

    system.shutdown().await?;
    info!("Server stopped");
    Ok(())
}
