pub mod stale_donation_sweeper;

pub use stale_donation_sweeper::{StaleDonationSweeper, SweeperConfig};
