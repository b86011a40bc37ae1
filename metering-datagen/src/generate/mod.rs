mod customer_dim;
mod date_dim;
mod metering_fact;

pub use customer_dim::CustomerDimensionGenerator;
pub use date_dim::{date_row, DateDimensionGenerator};
pub use metering_fact::{FactModel, MeteringFactGenerator};
