//! HTTP plumbing shared by the REST adapters.

use nst_core::{NstError, StorageError, Tier};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tokio::sync::watch;

pub(crate) fn build_client(tier: Tier, timeout: Duration) -> Result<Client, NstError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| unavailable(tier, format!("HTTP client setup failed: {}", e)))
}

pub(crate) fn unavailable(tier: Tier, reason: impl Into<String>) -> NstError {
    NstError::Storage(StorageError::Unavailable {
        tier,
        reason: reason.into(),
    })
}

/// Map a transport failure, flagging the store as disconnected.
pub(crate) fn transport_error(tier: Tier, connected: &watch::Sender<bool>, e: reqwest::Error) -> NstError {
    connected.send_if_modified(|c| std::mem::replace(c, false));
    if e.is_timeout() {
        unavailable(tier, format!("request timed out: {}", e))
    } else {
        unavailable(tier, format!("request failed: {}", e))
    }
}

/// Record that the server answered.
pub(crate) fn mark_reachable(connected: &watch::Sender<bool>) {
    connected.send_if_modified(|c| !std::mem::replace(c, true));
}

/// Turn a non-success response into a tier error, keeping the server's message.
pub(crate) async fn status_error(tier: Tier, response: Response) -> NstError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("error").and_then(|e| {
                e.as_str()
                    .map(str::to_string)
                    .or_else(|| e.get("message").and_then(|m| m.as_str()).map(str::to_string))
            })
        })
        .unwrap_or(body);
    unavailable(tier, format!("HTTP {}: {}", status.as_u16(), detail))
}

pub(crate) fn is_not_found(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reachability_flags_only_notify_on_change() {
        let (tx, mut rx) = watch::channel(true);
        mark_reachable(&tx);
        assert!(!rx.has_changed().unwrap());

        tx.send_if_modified(|c| std::mem::replace(c, false));
        assert!(rx.has_changed().unwrap());
        assert!(!*rx.borrow_and_update());

        mark_reachable(&tx);
        assert!(*rx.borrow_and_update());
    }
}
