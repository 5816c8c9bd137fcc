use chrono::{DateTime, TimeZone, Utc};

/// 毫秒时间戳转 UTC 时间，OKX 报文和数据库都用毫秒
pub fn millis_to_datetime(timestamp_ms: i64) -> Option<DateTime<Utc>> {
    match Utc.timestamp_millis_opt(timestamp_ms) {
        chrono::LocalResult::Single(datetime) => Some(datetime),
        _ => None,
    }
}
