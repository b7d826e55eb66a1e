mod error;
mod handlers;

use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    body::Bytes,
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use burn::tensor::backend::Backend;
use tokio::{net::TcpListener, signal};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use error::AppError;
pub use handlers::{PredictResponse, INDEX_HTML};

use crate::{
    classifier::{ImageClassifier, Prediction},
    config::ServerConfig,
};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState<B: Backend> {
    classifier: Arc<Mutex<ImageClassifier<B>>>,
}

impl<B: Backend> AppState<B> {
    pub fn new(classifier: ImageClassifier<B>) -> Self {
        Self {
            classifier: Arc::new(Mutex::new(classifier)),
        }
    }

    /// Run the classifier on the blocking thread pool.
    pub async fn classify(&self, bytes: Bytes) -> Result<Vec<Prediction>, AppError> {
        let classifier = self.classifier.clone();

        let predictions = tokio::task::spawn_blocking(move || {
            // Classification only reads the model, a panicked request leaves it intact
            let classifier = classifier.lock().unwrap_or_else(PoisonError::into_inner);
            classifier.classify(&bytes)
        })
        .await
        .map_err(|err| AppError::Internal(format!("Prediction task failed: {err}")))??;

        Ok(predictions)
    }
}

/// Routes of the classifier front-end.
pub fn router<B: Backend>(state: AppState<B>, body_limit: usize) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/predict", post(handlers::predict::<B>))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind to the configured address and serve until Ctrl-C or SIGTERM.
pub async fn serve<B: Backend>(
    config: &ServerConfig,
    classifier: ImageClassifier<B>,
) -> std::io::Result<()> {
    let app = router(AppState::new(classifier), config.body_limit);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutting down");
}
