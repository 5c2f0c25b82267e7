//! Schema normalizer.
//!
//! Rewrites provider-specific bar spellings into [`Bar`]. Pure: no I/O,
//! no clock.

use chrono::{DateTime, NaiveDate};
use serde_json::Value;

use super::{Bar, DataSet, RawBar, RawDataSet, SymbolRecord};

// ============================================================================
// Field Aliases
// ============================================================================

/// Canonical key first, then alternates in lookup order.
const DATE_KEYS: &[&str] = &["date", "Date", "DATE", "datetime", "Datetime", "timestamp", "Timestamp", "t"];
const OPEN_KEYS: &[&str] = &["open", "Open", "OPEN", "o"];
const HIGH_KEYS: &[&str] = &["high", "High", "HIGH", "h"];
const LOW_KEYS: &[&str] = &["low", "Low", "LOW", "l"];
const CLOSE_KEYS: &[&str] = &["close", "Close", "CLOSE", "c"];
const VOLUME_KEYS: &[&str] = &["volume", "Volume", "VOLUME", "v"];
const ADJ_CLOSE_KEYS: &[&str] = &["adj_close", "adjClose", "Adj Close", "AdjClose", "adjclose", "adj close"];

/// Epoch values above this are milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

fn lookup<'a>(bar: &'a RawBar, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| bar.get(*k).filter(|v| !v.is_null()))
}

fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn from_epoch(epoch: i64) -> Option<NaiveDate> {
    let secs = if epoch.abs() >= EPOCH_MILLIS_THRESHOLD {
        epoch / 1000
    } else {
        epoch
    };
    DateTime::from_timestamp(secs, 0).map(|dt| dt.date_naive())
}

fn as_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(from_epoch),
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                return s.parse::<i64>().ok().and_then(from_epoch);
            }
            // ISO date, or the date part of an RFC 3339 timestamp
            s.get(..10)
                .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
        }
        _ => None,
    }
}

/// Normalize one bar. `None` when the date or any price is missing.
fn normalize_bar(raw: &RawBar) -> Option<(NaiveDate, Bar)> {
    let date = lookup(raw, DATE_KEYS).and_then(as_date)?;
    let open = lookup(raw, OPEN_KEYS).and_then(as_number)?;
    let high = lookup(raw, HIGH_KEYS).and_then(as_number)?;
    let low = lookup(raw, LOW_KEYS).and_then(as_number)?;
    let close = lookup(raw, CLOSE_KEYS).and_then(as_number)?;
    let volume = lookup(raw, VOLUME_KEYS).and_then(as_number).unwrap_or(0.0);
    let adj_close = lookup(raw, ADJ_CLOSE_KEYS).and_then(as_number);

    Some((
        date,
        Bar {
            date: date.format("%Y-%m-%d").to_string(),
            open,
            high,
            low,
            close,
            volume,
            adj_close,
        },
    ))
}

/// Normalize a bar series: canonical keys, ascending dates, one bar per date.
///
/// When a date repeats, the first occurrence in input order is kept.
pub fn normalize_bars(raw: &[RawBar]) -> Vec<Bar> {
    let mut keyed: Vec<(NaiveDate, usize, Bar)> = raw
        .iter()
        .enumerate()
        .filter_map(|(i, bar)| normalize_bar(bar).map(|(d, b)| (d, i, b)))
        .collect();

    keyed.sort_by_key(|(date, idx, _)| (*date, *idx));
    keyed.dedup_by_key(|(date, _, _)| *date);

    keyed.into_iter().map(|(_, _, bar)| bar).collect()
}

/// Normalize every record in a data set.
pub fn normalize(raw: &RawDataSet) -> DataSet {
    raw.iter()
        .map(|(symbol, record)| {
            (
                symbol.clone(),
                SymbolRecord {
                    price: record.price,
                    volume: record.volume,
                    name: record.name.clone(),
                    market_cap: record.market_cap,
                    historical: normalize_bars(&record.historical),
                    source: record.source.clone(),
                    placeholder: record.placeholder,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RawSymbolRecord;
    use serde_json::json;

    fn bars(values: Vec<Value>) -> Vec<RawBar> {
        values
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect()
    }

    #[test]
    fn test_capitalized_keys() {
        let out = normalize_bars(&bars(vec![json!({
            "Date": "2024-01-02", "Open": 1.0, "High": 2.0, "Low": 0.5, "Close": 1.5,
            "Volume": 1000, "Adj Close": 1.4
        })]));

        assert_eq!(
            out,
            vec![Bar {
                date: "2024-01-02".into(),
                open: 1.0,
                high: 2.0,
                low: 0.5,
                close: 1.5,
                volume: 1000.0,
                adj_close: Some(1.4),
            }]
        );
    }

    #[test]
    fn test_single_letter_keys_and_rfc3339() {
        let out = normalize_bars(&bars(vec![json!({
            "t": "2024-01-02T05:00:00Z", "o": 1, "h": 2, "l": 0.5, "c": 1.5, "v": 10
        })]));
        assert_eq!(out[0].date, "2024-01-02");
        assert_eq!(out[0].close, 1.5);
        assert_eq!(out[0].adj_close, None);
    }

    #[test]
    fn test_canonical_key_wins_over_alias() {
        let out = normalize_bars(&bars(vec![json!({
            "date": "2024-01-02", "open": 1.0, "Open": 99.0, "high": 2, "low": 0.5, "close": 1.5
        })]));
        assert_eq!(out[0].open, 1.0);
    }

    #[test]
    fn test_null_canonical_value_falls_back_to_alias() {
        let out = normalize_bars(&bars(vec![json!({
            "date": "2024-01-02", "open": 1.0, "high": 2.0, "low": 0.5,
            "close": null, "Close": 1.5, "volume": null, "Volume": 500
        })]));

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].close, 1.5);
        assert_eq!(out[0].volume, 500.0);
    }

    #[test]
    fn test_numeric_strings_and_epoch_dates() {
        let out = normalize_bars(&bars(vec![
            json!({"timestamp": 1704153600, "open": "1.5", "high": "2", "low": "1", "close": "1,234.5"}),
            json!({"timestamp": 1704240000000i64, "open": 1, "high": 2, "low": 1, "close": 2}),
        ]));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].date, "2024-01-02");
        assert_eq!(out[0].open, 1.5);
        assert_eq!(out[0].close, 1234.5);
        assert_eq!(out[1].date, "2024-01-03");
    }

    #[test]
    fn test_incomplete_bars_dropped_and_volume_defaults() {
        let out = normalize_bars(&bars(vec![
            json!({"date": "2024-01-02", "open": 1, "high": 2, "low": 0.5}),
            json!({"open": 1, "high": 2, "low": 0.5, "close": 1}),
            json!({"date": "2024-01-03", "open": 1, "high": 2, "low": 0.5, "close": null}),
            json!({"date": "2024-01-04", "open": 1, "high": 2, "low": 0.5, "close": 1}),
        ]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].date, "2024-01-04");
        assert_eq!(out[0].volume, 0.0);
    }

    #[test]
    fn test_sorted_and_unique_first_wins() {
        let out = normalize_bars(&bars(vec![
            json!({"date": "2024-01-03", "open": 3, "high": 3, "low": 3, "close": 3}),
            json!({"date": "2024-01-02", "open": 1, "high": 1, "low": 1, "close": 1}),
            json!({"date": "2024-01-03", "open": 9, "high": 9, "low": 9, "close": 9}),
        ]));
        let dates: Vec<&str> = out.iter().map(|b| b.date.as_str()).collect();
        assert_eq!(dates, vec!["2024-01-02", "2024-01-03"]);
        assert_eq!(out[1].close, 3.0);
    }

    #[test]
    fn test_normalize_keeps_record_fields() {
        let mut raw = RawDataSet::new();
        let mut record = RawSymbolRecord::new("tiingo");
        record.price = Some(10.0);
        record.name = Some("Acme".into());
        raw.insert("ACME".into(), record);
        raw.insert("NONE".into(), RawSymbolRecord::placeholder("yahoo"));

        let out = normalize(&raw);
        assert_eq!(out["ACME"].price, Some(10.0));
        assert_eq!(out["ACME"].source, "tiingo");
        assert!(out["ACME"].historical.is_empty());
        assert!(out["NONE"].placeholder);
    }
}
