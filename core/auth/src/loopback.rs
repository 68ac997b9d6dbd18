//! Loopback redirect listener for the browser sign-in flow.

use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use integrator_common::{Error, Result};

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct AuthCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

type CallbackSlot = Arc<Mutex<Option<oneshot::Sender<AuthCallback>>>>;

/// One-shot HTTP listener on `127.0.0.1` with an ephemeral port.
pub struct LoopbackListener {
    listener: TcpListener,
    port: u16,
}

impl LoopbackListener {
    /// Bind to an ephemeral local port.
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Redirect URI to register with the authorization request.
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/", self.port)
    }

    /// Serve until the first callback arrives and return its parameters.
    ///
    /// Waits without a deadline; callers wanting one wrap this in a timeout.
    pub async fn wait(self) -> Result<AuthCallback> {
        let (tx, rx) = oneshot::channel();
        let slot: CallbackSlot = Arc::new(Mutex::new(Some(tx)));

        let app = Router::new()
            .route("/", get(receive_callback))
            .with_state(slot);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let listener = self.listener;
        tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::warn!("Loopback listener stopped: {}", e);
            }
        });

        let callback = rx
            .await
            .map_err(|_| Error::Authentication("Sign-in callback listener closed".to_string()));
        let _ = shutdown_tx.send(());
        callback
    }
}

async fn receive_callback(
    State(slot): State<CallbackSlot>,
    Query(params): Query<AuthCallback>,
) -> Html<&'static str> {
    let sender = slot.lock().ok().and_then(|mut s| s.take());
    if let Some(sender) = sender {
        let _ = sender.send(params);
    }
    Html("<html><body><p>Sign-in complete. You can close this window.</p></body></html>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receives_callback() {
        let listener = LoopbackListener::bind().await.unwrap();
        let port = listener.port();
        assert_eq!(listener.redirect_uri(), format!("http://localhost:{}/", port));

        let waiter = tokio::spawn(listener.wait());

        let response = reqwest::get(format!(
            "http://127.0.0.1:{}/?code=M.C507_BAY&state=xyz",
            port
        ))
        .await
        .unwrap();
        assert!(response.status().is_success());

        let callback = waiter.await.unwrap().unwrap();
        assert_eq!(callback.code.as_deref(), Some("M.C507_BAY"));
        assert_eq!(callback.state.as_deref(), Some("xyz"));
        assert!(callback.error.is_none());
    }

    #[tokio::test]
    async fn test_receives_error_callback() {
        let listener = LoopbackListener::bind().await.unwrap();
        let port = listener.port();
        let waiter = tokio::spawn(listener.wait());

        reqwest::get(format!(
            "http://127.0.0.1:{}/?error=access_denied&error_description=User%20cancelled",
            port
        ))
        .await
        .unwrap();

        let callback = waiter.await.unwrap().unwrap();
        assert_eq!(callback.error.as_deref(), Some("access_denied"));
        assert_eq!(callback.error_description.as_deref(), Some("User cancelled"));
        assert!(callback.code.is_none());
    }
}
