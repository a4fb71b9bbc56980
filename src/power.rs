//! Decoder for the `hundredDaysKwhData` energy log.
//!
//! The log is a hex string with one 6-character block per day, most recent
//! day first. Each block holds three bytes: the integer part, the first
//! decimal digits and the trailing decimal digit of the day's usage in kWh.

use crate::error::{EwelinkError, Result};

const BLOCK_LEN: usize = 6;

/// Usage reported for one day of the current month
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyUsage {
    /// Day of month (1-based)
    pub day: u32,
    /// Energy used that day, in kWh
    pub usage: f64,
}

/// Decoded energy usage for the current month
#[derive(Debug, Clone, PartialEq)]
pub struct PowerUsage {
    /// Sum of the daily values
    pub monthly: f64,
    /// One entry per day, most recent first
    pub daily: Vec<DailyUsage>,
}

/// Decode the first `day_count` days of an energy log
///
/// `day_count` is the number of days elapsed in the current month; the
/// entries are labelled `day_count, day_count - 1, ..., 1`.
pub fn decode(hex: &str, day_count: u32) -> Result<PowerUsage> {
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(EwelinkError::MalformedPayload(
            "energy log contains non-hex characters".to_string(),
        ));
    }
    if hex.len() % BLOCK_LEN != 0 {
        return Err(EwelinkError::MalformedPayload(format!(
            "energy log length {} is not a multiple of {BLOCK_LEN}",
            hex.len()
        )));
    }

    let available = hex.len() / BLOCK_LEN;
    let days = day_count as usize;
    if days > available {
        return Err(EwelinkError::MalformedPayload(format!(
            "energy log holds {available} days, {days} required"
        )));
    }

    let mut daily = Vec::with_capacity(days);
    let mut monthly = 0.0;
    for (offset, day) in (1..=day_count).rev().enumerate() {
        let block = &hex[offset * BLOCK_LEN..(offset + 1) * BLOCK_LEN];
        let usage = decode_block(block)?;
        monthly += usage;
        daily.push(DailyUsage { day, usage });
    }

    Ok(PowerUsage { monthly, daily })
}

fn decode_block(block: &str) -> Result<f64> {
    let byte = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&block[range], 16).map_err(|e| {
            EwelinkError::MalformedPayload(format!("invalid hex block `{block}`: {e}"))
        })
    };
    let integer = byte(0..2)?;
    let tenths = byte(2..4)?;
    let rest = byte(4..6)?;

    // the firmware concatenates the decimal fields as digits
    format!("{integer}.{tenths}{rest}")
        .parse()
        .map_err(|e| EwelinkError::MalformedPayload(format!("invalid usage `{block}`: {e}")))
}
