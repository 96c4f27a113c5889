//! Cached `Date` header value.
//!
//! Formatting an HTTP date on every response is wasteful, so the formatted value is kept in an
//! [`ArcSwap`] and refreshed at most once per second by whichever thread notices it is stale.
//! Nothing runs in the background, which keeps the service usable from backends without a
//! runtime.

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::HeaderValue;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

struct CachedDate {
    second: u64,
    value: HeaderValue,
}

pub struct DateService {
    current: ArcSwap<CachedDate>,
}

static DATE_SERVICE: Lazy<DateService> = Lazy::new(DateService::new);

impl DateService {
    pub fn get_global_instance() -> &'static DateService {
        &DATE_SERVICE
    }

    fn new() -> Self {
        Self { current: ArcSwap::from_pointee(format_now(now_second())) }
    }

    /// The current date, formatted as an RFC 9110 `IMF-fixdate`.
    pub fn http_date(&self) -> HeaderValue {
        let second = now_second();
        let cached = self.current.load();
        if cached.second == second {
            return cached.value.clone();
        }

        let fresh = Arc::new(format_now(second));
        let value = fresh.value.clone();
        self.current.store(fresh);
        value
    }
}

fn now_second() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}

fn format_now(second: u64) -> CachedDate {
    let mut buf = faf_http_date::get_date_buff_no_key();
    faf_http_date::get_date_no_key(&mut buf);
    let value = HeaderValue::from_maybe_shared(Bytes::copy_from_slice(&buf))
        .unwrap_or_else(|_| HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"));
    CachedDate { second, value }
}

#[cfg(test)]
mod tests {
    use super::DateService;

    #[test]
    fn test_http_date_format() {
        let date = DateService::get_global_instance().http_date();
        let date = date.to_str().unwrap();
        assert_eq!(date.len(), 29);
        assert!(date.ends_with(" GMT"));
    }
}
