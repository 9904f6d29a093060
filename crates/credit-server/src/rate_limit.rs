//! Per-client checkout rate limiting
//!
//! Fixed window per client IP: at most `max_requests` checkouts in each
//! `window`, with the count starting over when the next window opens.
//! Buckets are keyed by `(ip, window index)` and never refill within
//! their own window.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::config::RateLimitConfig;
use crate::error::AppError;

type WindowKey = (IpAddr, u64);

#[derive(Clone)]
pub struct CheckoutRateLimit {
    limiter: Arc<DefaultKeyedRateLimiter<WindowKey>>,
    origin: Instant,
    window: Duration,
}

impl CheckoutRateLimit {
    pub fn new(config: RateLimitConfig) -> Self {
        // One cell per window: a bucket cannot regain capacity before its window closes
        let quota = Quota::with_period(config.window)
            .unwrap_or_else(|| Quota::per_second(config.max_requests))
            .allow_burst(config.max_requests);

        Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            origin: Instant::now(),
            window: config.window,
        }
    }

    /// Take a slot for `ip`, or report how long until its window resets
    pub fn check(&self, ip: IpAddr) -> Result<(), Duration> {
        let elapsed = self.origin.elapsed();
        let window_nanos = self.window.as_nanos().max(1);
        let index = u64::try_from(elapsed.as_nanos() / window_nanos).unwrap_or(u64::MAX);

        self.limiter.check_key(&(ip, index)).map_err(|_| {
            let into_window =
                Duration::from_nanos(u64::try_from(elapsed.as_nanos() % window_nanos).unwrap_or(0));
            self.window.saturating_sub(into_window)
        })
    }

    /// Drop buckets from windows that have fully drained
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    #[cfg(test)]
    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }
}

/// Client address: the peer socket, else the first `X-Forwarded-For` hop
pub fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .or_else(|| {
            request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|ip| ip.trim().parse().ok())
        })
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

pub async fn limit_checkout(
    State(limit): State<CheckoutRateLimit>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request);
    match limit.check(ip) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            tracing::debug!(client = %ip, "Checkout request over limit");
            AppError::RateLimited { retry_after }.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use std::num::NonZeroU32;

    fn limit(max: u32) -> CheckoutRateLimit {
        CheckoutRateLimit::new(RateLimitConfig {
            max_requests: NonZeroU32::new(max).unwrap(),
            window: Duration::from_secs(900),
        })
    }

    #[test]
    fn test_limit_then_reject() {
        let limit = limit(10);
        let client: IpAddr = "203.0.113.7".parse().unwrap();
        let other: IpAddr = "203.0.113.8".parse().unwrap();

        for _ in 0..10 {
            assert!(limit.check(client).is_ok());
        }
        let wait = limit.check(client).unwrap_err();
        assert!(wait > Duration::ZERO && wait <= Duration::from_secs(900));

        // Other clients have their own bucket
        assert!(limit.check(other).is_ok());
        assert_eq!(limit.tracked_clients(), 2);
    }

    #[test]
    fn test_window_never_admits_more_than_limit() {
        let started = Instant::now();
        let limit = CheckoutRateLimit::new(RateLimitConfig {
            max_requests: NonZeroU32::new(5).unwrap(),
            window: Duration::from_millis(500),
        });
        let client: IpAddr = "203.0.113.9".parse().unwrap();

        let mut accepted = 0;
        while started.elapsed() < Duration::from_millis(450) {
            if limit.check(client).is_ok() {
                accepted += 1;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(accepted, 5);
    }

    #[test]
    fn test_next_window_starts_fresh() {
        let limit = CheckoutRateLimit::new(RateLimitConfig {
            max_requests: NonZeroU32::new(2).unwrap(),
            window: Duration::from_millis(200),
        });
        let client: IpAddr = "203.0.113.10".parse().unwrap();

        let wait = loop {
            if let Err(wait) = limit.check(client) {
                break wait;
            }
        };
        assert!(wait <= Duration::from_millis(200));

        std::thread::sleep(wait + Duration::from_millis(20));
        assert!(limit.check(client).is_ok());
        assert!(limit.check(client).is_ok());
        assert!(limit.check(client).is_err());
    }

    #[test]
    fn test_client_ip_sources() {
        let mut request = Request::builder()
            .header("x-forwarded-for", "198.51.100.1, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), "198.51.100.1".parse::<IpAddr>().unwrap());

        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));
        assert_eq!(client_ip(&request), "192.0.2.1".parse::<IpAddr>().unwrap());

        let bare = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&bare), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }
}
