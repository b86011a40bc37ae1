/// Daily consumption and voltage envelope for one customer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MeteringFactRow {
    pub customer_skey: i32,
    pub date_skey: i32,
    pub consumption: f64,
    pub min_voltage: f64,
    pub max_voltage: f64,
    /// 1 when the customer saw an outage that day, otherwise 0.
    pub outage: i16,
}

impl MeteringFactRow {
    pub const TABLE: &'static str = "metering_fact";
    pub const COLUMNS: &'static [&'static str] = &[
        "customer_skey",
        "date_skey",
        "consumption",
        "min_voltage",
        "max_voltage",
        "outage",
    ];
}
