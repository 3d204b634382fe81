//! Time helpers shared by the worker and cron jobs.

use chrono::{DateTime, NaiveDate, Utc};

pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

pub fn utc_today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn today_matches_now() {
        assert_eq!(utc_today(), utc_now().date_naive());
    }
}
