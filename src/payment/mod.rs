//! Two-phase gateway payments: authorize when funding, capture on completion

pub mod coordinator;
pub mod gateway;
pub mod http;
pub mod model;

pub use coordinator::{CaptureReceipt, PaymentCoordinator};
pub use gateway::{GatewayError, PaymentGateway};
pub use http::HttpGateway;
pub use model::{PaymentAuthorization, PaymentPhase};
