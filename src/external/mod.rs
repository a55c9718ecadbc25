pub mod directory;
pub mod payments;

pub use directory::{Contact, Directory, HttpDirectory, NullDirectory};
pub use payments::{
    normalize_msisdn, GatewayReceipt, HttpPaymentProvider, PaymentProvider, PaymentRequest,
    UnconfiguredPaymentProvider,
};
