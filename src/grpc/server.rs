//! gRPC server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::{error, info};

use super::proto::turnstile::v1::turnstile_server::TurnstileServer;
use super::service::TurnstileService;
use crate::error::{Result, TurnstileError};
use crate::pipeline::Pipeline;

/// gRPC server for the governance service.
pub struct GrpcServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The shared request pipeline
    pipeline: Arc<Pipeline>,
}

impl GrpcServer {
    /// Create a new gRPC server over a started pipeline.
    pub fn new(addr: SocketAddr, pipeline: Arc<Pipeline>) -> Self {
        Self { addr, pipeline }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Start the gRPC server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the gRPC server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send,
    {
        let service = TurnstileService::new(self.pipeline);

        info!(addr = %self.addr, "Starting gRPC server for Turnstile");

        Server::builder()
            .add_service(TurnstileServer::new(service))
            .serve_with_shutdown(self.addr, signal)
            .await
            .map_err(|e| {
                error!(error = %e, "gRPC server failed");
                TurnstileError::Grpc(e)
            })
    }
}
