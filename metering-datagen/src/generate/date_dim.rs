use rust_client::domain::DateDimRow;
use time::Date;

use crate::pipeline::{BatchLoader, PipelineError, Sink};

/// Calendar attributes for one day. `skey` is `YYYYMMDD`.
pub fn date_row(date: Date) -> DateDimRow {
    let month = u8::from(date.month());
    DateDimRow {
        skey: date.year() * 10_000 + i32::from(month) * 100 + i32::from(date.day()),
        date,
        day: i16::from(date.day()),
        month: i16::from(month),
        year: date.year(),
        day_of_week: i16::from(date.weekday().number_from_monday()),
        week: i16::from(date.iso_week()),
        quarter: i16::from((month - 1) / 3 + 1),
    }
}

/// One row per day of an inclusive date range. No randomness.
#[derive(Debug, Clone, Copy)]
pub struct DateDimensionGenerator {
    start: Date,
    end: Date,
}

impl DateDimensionGenerator {
    pub fn new(start: Date, end: Date) -> Result<Self, PipelineError> {
        if end < start {
            return Err(PipelineError::Configuration(format!(
                "date range ends ({end}) before it starts ({start})"
            )));
        }
        Ok(Self { start, end })
    }

    /// Number of days in the range.
    pub fn days(&self) -> usize {
        ((self.end - self.start).whole_days() + 1) as usize
    }

    pub fn rows(&self) -> impl Iterator<Item = DateDimRow> {
        let end = self.end;
        std::iter::successors(Some(self.start), move |d| d.next_day().filter(|next| *next <= end))
            .map(date_row)
    }

    /// Streams every row into `loader` and returns the emitted keys in order.
    pub async fn generate<K>(&self, loader: &mut BatchLoader<'_, DateDimRow, K>) -> Result<Vec<i32>, PipelineError>
    where
        K: Sink<DateDimRow> + ?Sized,
    {
        let mut keys = Vec::with_capacity(self.days());
        for row in self.rows() {
            keys.push(row.skey);
            loader.append(row).await?;
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn skey_and_calendar_fields() {
        let row = date_row(date!(2015 - 12 - 31));
        assert_eq!(row.skey, 20151231);
        assert_eq!((row.day, row.month, row.year), (31, 12, 2015));
        assert_eq!(row.quarter, 4);
        // Thursday, in ISO week 53 of 2015.
        assert_eq!(row.day_of_week, 4);
        assert_eq!(row.week, 53);

        let row = date_row(date!(2016 - 01 - 03));
        assert_eq!(row.skey, 20160103);
        assert_eq!(row.day_of_week, 7);
        assert_eq!(row.week, 53);
    }

    #[test]
    fn quarter_follows_month() {
        let gen = DateDimensionGenerator::new(date!(2015 - 01 - 01), date!(2015 - 12 - 31)).unwrap();
        for row in gen.rows() {
            assert_eq!(row.quarter, (row.month - 1) / 3 + 1);
        }
    }

    #[test]
    fn range_is_inclusive_and_ascending() {
        let gen = DateDimensionGenerator::new(date!(2016 - 02 - 27), date!(2016 - 03 - 01)).unwrap();
        let keys: Vec<i32> = gen.rows().map(|r| r.skey).collect();

        assert_eq!(keys, vec![20160227, 20160228, 20160229, 20160301]);
        assert_eq!(gen.days(), 4);
    }

    #[test]
    fn full_year_has_one_row_per_day() {
        let gen = DateDimensionGenerator::new(date!(2015 - 01 - 01), date!(2016 - 12 - 31)).unwrap();
        assert_eq!(gen.rows().count(), 731);
        assert_eq!(gen.days(), 731);
    }

    #[test]
    fn single_day_range() {
        let gen = DateDimensionGenerator::new(date!(2015 - 06 - 15), date!(2015 - 06 - 15)).unwrap();
        assert_eq!(gen.rows().count(), 1);
    }

    #[test]
    fn reversed_range_is_a_configuration_error() {
        let res = DateDimensionGenerator::new(date!(2015 - 01 - 02), date!(2015 - 01 - 01));
        assert!(matches!(res, Err(PipelineError::Configuration(_))));
    }
}
