//! Payment gateway integration

pub mod error;
pub mod provider;
pub mod providers;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use provider::PaymentGateway;
pub use providers::cashfree::{CashfreeConfig, CashfreeGateway};
