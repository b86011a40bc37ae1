mod customer_dim;
mod date_dim;
mod metering_fact;

pub use customer_dim::CustomerDimRow;
pub use date_dim::DateDimRow;
pub use metering_fact::MeteringFactRow;

/// Tables of the metering star schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StarTable {
    DateDim,
    CustomerDim,
    MeteringFact,
}

impl StarTable {
    pub fn name(self) -> &'static str {
        match self {
            Self::DateDim => DateDimRow::TABLE,
            Self::CustomerDim => CustomerDimRow::TABLE,
            Self::MeteringFact => MeteringFactRow::TABLE,
        }
    }

    /// Column names in load order.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Self::DateDim => DateDimRow::COLUMNS,
            Self::CustomerDim => CustomerDimRow::COLUMNS,
            Self::MeteringFact => MeteringFactRow::COLUMNS,
        }
    }
}
