pub mod checkout;
pub mod daraja;

pub use checkout::{CheckoutAdapter, CheckoutConfig};
pub use daraja::{DarajaAdapter, DarajaConfig};
