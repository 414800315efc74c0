#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::unused_self)]

pub mod client;
pub mod rest;
pub mod server;


// Re-export main API types for convenience
pub use client::{ApiClientError, GatewayApiClient, RemoteKeyLoader};
pub use rest::{
    create_router, error_response, AddressResponse, ApiConfig, ApiInfoResponse, ApiState,
    BalanceResponse, DecryptRequest, DecryptResponse, ErrorResponse, HealthResponse,
    SubmitInputRequest,
};
pub use server::{ApiServer, ApiServerBuilder, ApiServerConfig};
