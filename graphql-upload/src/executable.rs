//! Main entry point for the upload server.

use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use clap::Parser;
use futures::FutureExt;
use futures::future::BoxFuture;
use http::HeaderValue;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use tower::BoxError;
use tower::ServiceBuilder;
use tower::ServiceExt;
use tower::util::BoxCloneSyncService;
use tracing_subscriber::EnvFilter;

use crate::body;
use crate::file_uploads::FileUploadsConfig;
use crate::file_uploads::FileUploadsLayer;
use crate::file_uploads::UploadedFiles;
use crate::services;

/// Options for the upload server
#[derive(Parser, Debug)]
#[clap(name = "upload-server", about = "GraphQL multipart request server")]
pub(crate) struct Opt {
    /// Log level (off|error|warn|info|debug|trace).
    #[clap(
        long = "log",
        default_value = "info",
        alias = "log-level",
        env = "UPLOAD_SERVER_LOG"
    )]
    log_level: String,

    /// Configuration file location.
    #[clap(short, long = "config", env = "UPLOAD_SERVER_CONFIG_PATH")]
    config_path: Option<PathBuf>,

    /// Address to listen on.
    #[clap(long, default_value = "127.0.0.1:4000", env = "UPLOAD_SERVER_LISTEN")]
    listen: SocketAddr,

    /// Print the configuration JSON schema and exit.
    #[clap(long)]
    schema: bool,
}

/// Starts the upload server, blocking until it stops.
pub fn main() -> Result<()> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(nb) = std::env::var("UPLOAD_SERVER_NUM_CORES")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
    {
        builder.worker_threads(nb);
    }
    let runtime = builder.build()?;
    runtime.block_on(rt_main(Opt::parse()))
}

async fn rt_main(opt: Opt) -> Result<()> {
    if opt.schema {
        let schema = FileUploadsConfig::json_schema();
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let env_filter = std::env::var("RUST_LOG").ok().unwrap_or(opt.log_level);
    let builder = tracing_subscriber::fmt::fmt()
        .with_env_filter(EnvFilter::try_new(&env_filter).context("could not parse log")?);
    if std::io::stdout().is_terminal() {
        builder.init();
    } else {
        builder.json().init();
    }

    let config = match &opt.config_path {
        Some(path) => {
            let yaml = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("could not read {}", path.display()))?;
            FileUploadsConfig::from_yaml(&yaml)
                .with_context(|| format!("invalid configuration in {}", path.display()))?
        }
        None => FileUploadsConfig::default(),
    };
    tracing::debug!(?config, "loaded configuration");

    let router = app(config);

    let listener = tokio::net::TcpListener::bind(opt.listen)
        .await
        .with_context(|| format!("could not listen on {}", opt.listen))?;
    tracing::info!("Listening on http://{}/graphql", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Stopped");
        })
        .await?;
    Ok(())
}

type GraphQLService = BoxCloneSyncService<services::Request, services::Response, BoxError>;

/// Routes `POST /graphql` through the upload layer to a service echoing the rewritten request.
pub(crate) fn app(config: FileUploadsConfig) -> Router {
    let service = ServiceBuilder::new()
        .layer(FileUploadsLayer::new(config))
        .service_fn(echo);
    Router::new()
        .route("/graphql", post(graphql))
        .with_state(BoxCloneSyncService::new(service))
}

async fn graphql(
    State(service): State<GraphQLService>,
    request: axum::extract::Request,
) -> axum::response::Response {
    match service.oneshot(request.map(body::from_axum)).await {
        Ok(response) => response.map(axum::body::Body::new),
        Err(err) => {
            tracing::error!(error = %err, "could not handle GraphQL request");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

/// Responds with the GraphQL request it received.
fn echo(request: services::Request) -> BoxFuture<'static, Result<services::Response, BoxError>> {
    async move {
        let (parts, body) = request.into_parts();
        if let Some(files) = parts.extensions.get::<UploadedFiles>() {
            for (field, upload) in files.iter() {
                tracing::info!(
                    %field,
                    filename = upload.filename(),
                    path = %upload.filepath().display(),
                    "received file"
                );
            }
        }

        let bytes = body::into_bytes(body).await?;
        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("application/json"));
        let mut response = http::Response::new(body::full(bytes));
        response.headers_mut().insert(CONTENT_TYPE, content_type);
        Ok::<_, BoxError>(response)
    }
    .boxed()
}
