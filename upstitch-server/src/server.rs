//! HTTP server for the upload receiver

use hyper::server::conn::AddrIncoming;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use upstitch_engine::UploadAssembler;
use crate::handlers::{handle_request, AppState};

pub struct UploadServer {
    state: Arc<AppState>,
}

impl UploadServer {
    pub fn new(assembler: UploadAssembler, upload_path: impl Into<String>) -> Self {
        Self {
            state: Arc::new(AppState {
                assembler,
                upload_path: upload_path.into(),
            }),
        }
    }

    /// Serve until Ctrl-C
    pub async fn serve(self, addr: SocketAddr) -> Result<(), hyper::Error> {
        let (_, server) = self.bind(addr, shutdown_signal())?;
        server.await
    }

    /// Bind the listener and return the bound address with the server future.
    ///
    /// The future completes once `shutdown` resolves and in-flight requests finish.
    pub fn bind<F>(
        self,
        addr: SocketAddr,
        shutdown: F,
    ) -> Result<(SocketAddr, impl Future<Output = Result<(), hyper::Error>>), hyper::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let state = self.state;

        let make_svc = make_service_fn(move |_conn| {
            let state = state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| handle_request(req, state.clone())))
            }
        });

        let builder: hyper::server::Builder<AddrIncoming> = Server::try_bind(&addr)?;
        let server = builder.serve(make_svc);
        let local_addr = server.local_addr();

        info!("upstitch server listening on {}", local_addr);

        Ok((local_addr, server.with_graceful_shutdown(shutdown)))
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
