pub mod units;
pub mod utility;
