mod assignment;
pub mod booking;
mod commission;
mod driver;
mod location;
mod trip;
pub mod wallet;

pub use assignment::{Assignment, AssignmentStatus, Priority};
pub use booking::{Booking, CanceledBy, Cancellation, Rating, Status as BookingStatus};
pub use commission::{earnings_rows, latest_commission, AdminEarnings, Commission, DriverEarnings};
pub use driver::{Driver, VehicleType};
pub use location::{Coordinates, Location};
pub use trip::{TripLog, Waypoint};
pub use wallet::{
    PaymentMethod, Role, Transaction, TransactionKind, TransactionStatus, Wallet,
};
