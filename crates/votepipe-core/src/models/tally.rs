use serde::{Deserialize, Serialize};

use super::Choice;

/// Vote counts per choice, computed on read from the stored records.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Tally {
    pub count_a: i64,
    pub count_b: i64,
}

impl Tally {
    pub fn new(count_a: i64, count_b: i64) -> Self {
        Self { count_a, count_b }
    }

    pub fn record(&mut self, choice: Choice) {
        match choice {
            Choice::A => self.count_a += 1,
            Choice::B => self.count_b += 1,
        }
    }

    pub fn count(&self, choice: Choice) -> i64 {
        match choice {
            Choice::A => self.count_a,
            Choice::B => self.count_b,
        }
    }

    pub fn total(&self) -> i64 {
        self.count_a + self.count_b
    }
}

impl FromIterator<Choice> for Tally {
    fn from_iter<I: IntoIterator<Item = Choice>>(iter: I) -> Self {
        let mut tally = Tally::default();
        for choice in iter {
            tally.record(choice);
        }
        tally
    }
}
