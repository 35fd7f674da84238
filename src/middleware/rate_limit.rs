//! Per-IP rate limiting and connection counting.
//!
//! A token bucket per client IP throttles upgrade attempts; a per-IP
//! connection counter caps concurrent sessions. Stale entries are swept
//! by a periodic cleanup task. Violations are rejected with HTTP 429
//! before a session is ever constructed.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use tracing::warn;

use crate::config::RateSettings;
use crate::state::AppState;

/// Entries with no connections and no recent activity are swept after
/// this long.
const STALE_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Carries the client IP to the WebSocket handler so it can release the
/// connection slot when the socket closes.
#[derive(Clone, Copy, Debug)]
pub struct ClientIp(pub IpAddr);

#[derive(Debug)]
struct ClientState {
    connections: u32,
    tokens: f64,
    last_update: Instant,
}

pub struct RateLimiter {
    settings: RateSettings,
    clients: Mutex<HashMap<IpAddr, ClientState>>,
    cleanup_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RateLimiter {
    pub fn new(settings: RateSettings) -> Self {
        Self {
            settings,
            clients: Mutex::new(HashMap::new()),
            cleanup_task: Mutex::new(None),
        }
    }

    /// Starts the periodic stale-entry sweep. Call once, from a runtime.
    pub fn spawn_cleanup(self: &Arc<Self>) {
        let limiter = Arc::downgrade(self);
        let interval = self.settings.cleanup_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match limiter.upgrade() {
                    Some(limiter) => limiter.cleanup(),
                    None => return,
                }
            }
        });
        *self.cleanup_task.lock() = Some(handle);
    }

    /// Token-bucket check for one request from the given IP.
    pub fn allow(&self, ip: IpAddr) -> bool {
        let mut clients = self.clients.lock();
        let state = clients.entry(ip).or_insert_with(|| ClientState {
            connections: 0,
            tokens: f64::from(self.settings.burst_size),
            last_update: Instant::now(),
        });

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_update).as_secs_f64();
        state.tokens = (state.tokens + elapsed * f64::from(self.settings.requests_per_second))
            .min(f64::from(self.settings.burst_size));
        state.last_update = now;

        if state.tokens < 1.0 {
            return false;
        }
        state.tokens -= 1.0;
        true
    }

    /// Claims a connection slot. `false` when the per-IP cap is reached.
    pub fn add_connection(&self, ip: IpAddr) -> bool {
        let mut clients = self.clients.lock();
        let state = clients.entry(ip).or_insert_with(|| ClientState {
            connections: 0,
            tokens: f64::from(self.settings.burst_size),
            last_update: Instant::now(),
        });

        if state.connections >= self.settings.max_connections_per_ip {
            return false;
        }
        state.connections += 1;
        true
    }

    pub fn remove_connection(&self, ip: IpAddr) {
        let mut clients = self.clients.lock();
        if let Some(state) = clients.get_mut(&ip) {
            state.connections = state.connections.saturating_sub(1);
        }
    }

    pub fn connection_count(&self, ip: IpAddr) -> u32 {
        self.clients
            .lock()
            .get(&ip)
            .map(|state| state.connections)
            .unwrap_or(0)
    }

    fn cleanup(&self) {
        let mut clients = self.clients.lock();
        clients.retain(|_, state| {
            state.connections > 0 || state.last_update.elapsed() <= STALE_THRESHOLD
        });
    }

    pub fn close(&self) {
        if let Some(handle) = self.cleanup_task.lock().take() {
            handle.abort();
        }
    }
}

/// Enforces the per-IP token bucket and connection cap for WebSocket
/// upgrade requests; other requests pass through. On success the client
/// IP is attached as a [`ClientIp`] extension so the handler can release
/// the slot when the socket closes.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let is_ws_upgrade = request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade {
        return next.run(request).await;
    }

    let client_ip = addr.ip();

    if !state.limiter.allow(client_ip) {
        warn!(ip = %client_ip, "rate limit exceeded");
        return (StatusCode::TOO_MANY_REQUESTS, "Too many requests").into_response();
    }

    if !state.limiter.add_connection(client_ip) {
        warn!(ip = %client_ip, "connection limit exceeded");
        return (StatusCode::TOO_MANY_REQUESTS, "Too many connections").into_response();
    }

    request.extensions_mut().insert(ClientIp(client_ip));
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn limiter(max_conns: u32, rps: u32, burst: u32) -> RateLimiter {
        RateLimiter::new(RateSettings {
            max_connections_per_ip: max_conns,
            requests_per_second: rps,
            burst_size: burst,
            cleanup_interval: Duration::from_secs(60),
        })
    }

    fn ip(last: u8) -> IpAddr {
        Ipv4Addr::new(192, 168, 1, last).into()
    }

    #[test]
    fn test_burst_then_throttle() {
        let limiter = limiter(10, 1, 3);
        let client = ip(1);

        assert!(limiter.allow(client));
        assert!(limiter.allow(client));
        assert!(limiter.allow(client));
        // Bucket drained.
        assert!(!limiter.allow(client));
    }

    #[test]
    fn test_buckets_are_per_ip() {
        let limiter = limiter(10, 1, 1);
        assert!(limiter.allow(ip(1)));
        assert!(!limiter.allow(ip(1)));
        assert!(limiter.allow(ip(2)));
    }

    #[test]
    fn test_connection_cap() {
        let limiter = limiter(2, 100, 100);
        let client = ip(1);

        assert!(limiter.add_connection(client));
        assert!(limiter.add_connection(client));
        assert!(!limiter.add_connection(client));
        assert_eq!(limiter.connection_count(client), 2);

        limiter.remove_connection(client);
        assert!(limiter.add_connection(client));
    }

    #[test]
    fn test_remove_never_goes_negative() {
        let limiter = limiter(2, 100, 100);
        limiter.remove_connection(ip(1));
        assert_eq!(limiter.connection_count(ip(1)), 0);
    }

    #[test]
    fn test_cleanup_keeps_active_connections() {
        let limiter = limiter(2, 100, 100);
        limiter.add_connection(ip(1));
        assert!(limiter.allow(ip(2)));

        limiter.cleanup();
        // ip(1) has a live connection and must survive; ip(2) is recent
        // and also survives the stale threshold.
        assert_eq!(limiter.connection_count(ip(1)), 1);
    }
}
