//! gRPC surface exposing the request pipeline to gateways.

mod server;
mod service;

pub use server::GrpcServer;
pub use service::TurnstileService;

// Include the generated protobuf code
pub mod proto {
    pub mod turnstile {
        pub mod v1 {
            tonic::include_proto!("turnstile.v1");
        }
    }
}

// Re-export commonly used types
pub use proto::turnstile::v1::{
    turnstile_server::TurnstileServer, AdmitRequest, AdmitResponse, RejectionCode,
};
