use time::Date;

/// One calendar day of the date dimension. `skey` is the date as `YYYYMMDD`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DateDimRow {
    pub skey: i32,
    pub date: Date,
    pub day: i16,
    pub month: i16,
    pub year: i32,
    pub day_of_week: i16,
    pub week: i16,
    pub quarter: i16,
}

impl DateDimRow {
    pub const TABLE: &'static str = "date_dim";
    pub const COLUMNS: &'static [&'static str] =
        &["skey", "date", "day", "month", "year", "day_of_week", "week", "quarter"];
}
