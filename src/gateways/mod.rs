pub mod adapter;
pub mod error;
pub mod factory;
pub mod providers;
pub mod types;
pub mod utils;

pub use adapter::GatewayAdapter;
pub use error::{GatewayError, GatewayResult};
pub use factory::GatewayRegistry;
pub use types::{
    ChargeRequest, ChargeResponse, CorrelationToken, NotificationEvent, NotificationOutcome,
    PaymentRail,
};
