//! Date detection in extracted document text.
//!
//! Recognized forms:
//! - ISO: `2005-03-14`
//! - US numeric: `03/14/2005`, `3/14/05`
//! - long form: `March 14, 2005`, `Mar. 14th 2005`, `14 March 2005`
//!
//! Matches that are not real calendar dates (`02/30/2005`) or fall outside
//! [`MIN_YEAR`]..=[`MAX_YEAR`] are dropped.

use anyhow::Result;
use chrono::NaiveDate;
use regex::{Captures, Regex};

pub const MIN_YEAR: i32 = 1900;
pub const MAX_YEAR: i32 = 2100;

/// Two-digit years at or below this map to 20xx, above to 19xx.
const TWO_DIGIT_PIVOT: i32 = 30;

const MONTHS: &str = r"jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?";

#[derive(Debug, Clone)]
pub struct DateDetector {
    iso: Regex,
    us: Regex,
    month_first: Regex,
    day_first: Regex,
}

impl DateDetector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            iso: Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b")?,
            us: Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4}|\d{2})\b")?,
            month_first: Regex::new(&format!(
                r"(?i)\b({MONTHS})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})\b"
            ))?,
            day_first: Regex::new(&format!(
                r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+({MONTHS})\.?,?\s+(\d{{4}})\b"
            ))?,
        })
    }

    /// Every date found in `text`, sorted and de-duplicated.
    pub fn detect(&self, text: &str) -> Vec<NaiveDate> {
        let mut out: Vec<NaiveDate> = self.scan(text).into_iter().map(|(_, d)| d).collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// First date appearing in the text (by position), if any.
    pub fn first_in_text(&self, text: &str) -> Option<NaiveDate> {
        self.scan(text)
            .into_iter()
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, d)| d)
    }

    /// Every valid date with the byte offset of its match, form by form.
    fn scan(&self, text: &str) -> Vec<(usize, NaiveDate)> {
        let mut out = Vec::new();
        let mut push = |c: &Captures<'_>, date: Option<NaiveDate>| {
            if let (Some(m), Some(date)) = (c.get(0), date) {
                out.push((m.start(), date));
            }
        };

        for c in self.iso.captures_iter(text) {
            push(&c, ymd(num(&c[1]), num(&c[2]), num(&c[3])));
        }
        for c in self.us.captures_iter(text) {
            let year = match c[3].len() {
                2 => num(&c[3]).map(expand_two_digit_year),
                _ => num(&c[3]),
            };
            push(&c, ymd(year, num(&c[1]), num(&c[2])));
        }
        for c in self.month_first.captures_iter(text) {
            push(&c, ymd(num(&c[3]), month_number(&c[1]), num(&c[2])));
        }
        for c in self.day_first.captures_iter(text) {
            push(&c, ymd(num(&c[3]), month_number(&c[2]), num(&c[1])));
        }
        out
    }
}

fn num(s: &str) -> Option<i32> {
    s.parse().ok()
}

fn expand_two_digit_year(y: i32) -> i32 {
    if y <= TWO_DIGIT_PIVOT {
        2000 + y
    } else {
        1900 + y
    }
}

fn month_number(name: &str) -> Option<i32> {
    let lower = name.to_ascii_lowercase();
    let m = match lower.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(m)
}

fn ymd(year: Option<i32>, month: Option<i32>, day: Option<i32>) -> Option<NaiveDate> {
    let (year, month, day) = (year?, month?, day?);
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, u32::try_from(month).ok()?, u32::try_from(day).ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn detects_all_forms() {
        let det = DateDetector::new().unwrap();
        let text = "Flight on 2002-09-21, returned 09/24/2002. Memo dated March 3, 2003 \
                    and again 4th July 2004; note from 1/2/99.";
        assert_eq!(
            det.detect(text),
            vec![d(1999, 1, 2), d(2002, 9, 21), d(2002, 9, 24), d(2003, 3, 3), d(2004, 7, 4)]
        );
    }

    #[test]
    fn rejects_impossible_dates() {
        let det = DateDetector::new().unwrap();
        assert!(det.detect("02/30/2005 and 2005-13-01 and 1776-07-04").is_empty());
    }

    #[test]
    fn first_in_text_is_positional() {
        let det = DateDetector::new().unwrap();
        let text = "Signed Dec. 1st 2010, amended 2009-05-05";
        assert_eq!(det.first_in_text(text), Some(d(2010, 12, 1)));
        assert_eq!(det.first_in_text("no dates here"), None);
    }

    #[test]
    fn first_in_text_skips_invalid_matches_like_detect() {
        let det = DateDetector::new().unwrap();
        let text = "Filed 02/30/2005, received 14 March 2005, logged 2001-01-01";
        assert_eq!(det.detect(text), vec![d(2001, 1, 1), d(2005, 3, 14)]);
        assert_eq!(det.first_in_text(text), Some(d(2005, 3, 14)));
    }
}
