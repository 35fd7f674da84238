pub mod realtime;

/// Liveness probe. Plain `OK`, no auth.
pub async fn health() -> &'static str {
    "OK"
}
