use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{EdfError, Result};
use crate::TIME_DIMENSION;

/// Decodes a fixed-width ASCII field, dropping the space padding
pub fn text_field(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_string()
}

/// 非本地化的整数解析（避免受系统locale影响）
pub fn parse_int_field(field: &'static str, raw: &[u8]) -> Result<i64> {
    let text = text_field(raw);
    let digits = text.strip_prefix('+').unwrap_or(&text);

    digits
        .parse::<i64>()
        .map_err(|_| EdfError::malformed(field, text.clone()))
}

/// 非本地化的浮点数解析
pub fn parse_float_field(field: &'static str, raw: &[u8]) -> Result<f64> {
    let text = text_field(raw);

    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(EdfError::malformed(field, text)),
    }
}

/// 解析EDF时间字符串为100纳秒单位
pub fn parse_edf_time(field: &'static str, s: &str) -> Result<i64> {
    let s = s.trim();
    let malformed = || EdfError::malformed(field, s);

    if s.is_empty() {
        return Err(malformed());
    }

    // 处理符号
    let (negative, body) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    let (integer_part, decimal_part) = match body.find('.') {
        Some(dot_pos) => (&body[..dot_pos], &body[dot_pos + 1..]),
        None => (body, ""),
    };

    if integer_part.is_empty() && decimal_part.is_empty() {
        return Err(malformed());
    }
    if !integer_part.bytes().chain(decimal_part.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }

    let mut value = 0i64;

    if !integer_part.is_empty() {
        value = integer_part
            .parse::<i64>()
            .ok()
            .and_then(|v| v.checked_mul(TIME_DIMENSION))
            .ok_or_else(malformed)?;
    }

    // 解析小数部分（最多7位精度）
    if !decimal_part.is_empty() {
        let decimal_str = &decimal_part[..decimal_part.len().min(7)];
        let decimal_value = decimal_str.parse::<i64>().map_err(|_| malformed())?;
        value = value
            .checked_add(decimal_value * 10i64.pow(7 - decimal_str.len() as u32))
            .ok_or_else(malformed)?;
    }

    Ok(if negative { -value } else { value })
}

/// Formats 100ns ticks as seconds text without trailing zeros
pub fn format_edf_time(ticks: i64) -> String {
    let sign = if ticks < 0 { "-" } else { "" };
    let abs = ticks.unsigned_abs();
    let seconds = abs / TIME_DIMENSION as u64;
    let fraction = abs % TIME_DIMENSION as u64;

    if fraction == 0 {
        format!("{}{}", sign, seconds)
    } else {
        let digits = format!("{:07}", fraction);
        format!("{}{}.{}", sign, seconds, digits.trim_end_matches('0'))
    }
}

/// 解析日期时间: "dd.mm.yy" + "hh.mm.ss"
pub fn parse_start_datetime(date_str: &str, time_str: &str) -> Result<NaiveDateTime> {
    let date_err = || EdfError::malformed("start_date", date_str.trim());
    let time_err = || EdfError::malformed("start_time", time_str.trim());

    let date_parts = split_triplet(date_str).ok_or_else(date_err)?;
    let year = if date_parts[2] > 84 {
        1900 + date_parts[2]
    } else {
        2000 + date_parts[2]
    };
    let date = NaiveDate::from_ymd_opt(year as i32, date_parts[1], date_parts[0])
        .ok_or_else(date_err)?;

    let time_parts = split_triplet(time_str).ok_or_else(time_err)?;
    let time = NaiveTime::from_hms_opt(time_parts[0], time_parts[1], time_parts[2])
        .ok_or_else(time_err)?;

    Ok(NaiveDateTime::new(date, time))
}

fn split_triplet(s: &str) -> Option<[u32; 3]> {
    let mut parts = s.trim().split('.');
    let mut out = [0u32; 3];
    for slot in out.iter_mut() {
        *slot = parts.next()?.trim().parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

/// Absolute 100ns ticks since the Unix epoch, reading the datetime as UTC
pub fn datetime_to_ticks(datetime: &NaiveDateTime) -> i64 {
    let utc = datetime.and_utc();
    utc.timestamp() * TIME_DIMENSION + (utc.timestamp_subsec_nanos() / 100) as i64
}

/// 将字符串转换为ASCII（非ASCII字符替换为'_'）
pub fn to_ascii(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '_' })
        .collect()
}
