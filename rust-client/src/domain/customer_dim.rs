#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CustomerDimRow {
    pub skey: i32,
    pub zipcode: String,
    pub county: String,
    pub state: String,
}

impl CustomerDimRow {
    pub const TABLE: &'static str = "customer_dim";
    pub const COLUMNS: &'static [&'static str] = &["skey", "zipcode", "county", "state"];
}
