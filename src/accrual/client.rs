use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::ledger::models::OrderStatus;

/// Status values the accrual service reports for an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccrualStatus {
    Registered,
    Invalid,
    Processing,
    Processed,
}

/// Wire format of a 200 response from the accrual service
#[derive(Debug, Clone, Deserialize)]
pub struct AccrualReply {
    pub order: String,
    pub status: AccrualStatus,
    #[serde(with = "rust_decimal::serde::float_option", default)]
    pub accrual: Option<Decimal>,
}

/// Outcome of one resolution attempt against the accrual service.
///
/// The polymorphic 200/204/429 response is folded into a tagged variant here
/// so the reconciliation loop never branches on transport details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The service resolved the order to a status, with an amount iff PROCESSED
    Resolved {
        status: OrderStatus,
        accrual: Option<Decimal>,
    },
    /// The service has no record of the order yet; no-op this cycle
    NotRegistered,
    /// The service is throttling; retry this order after the given pause
    RateLimited { retry_after: Duration },
    /// Network or parse failure; the order stays pending and is retried next tick
    TransientError,
}

impl Resolution {
    /// Interpret a parsed 200 body.
    ///
    /// REGISTERED is mapped to PROCESSING internally - both mean "still
    /// pending" and keep the order in the polling set. A PROCESSED reply
    /// without an amount is malformed and treated as transient.
    fn from_reply(reply: AccrualReply) -> Self {
        match reply.status {
            AccrualStatus::Registered | AccrualStatus::Processing => Resolution::Resolved {
                status: OrderStatus::Processing,
                accrual: None,
            },
            AccrualStatus::Invalid => Resolution::Resolved {
                status: OrderStatus::Invalid,
                accrual: None,
            },
            AccrualStatus::Processed => match reply.accrual {
                Some(amount) => Resolution::Resolved {
                    status: OrderStatus::Processed,
                    accrual: Some(amount),
                },
                None => {
                    warn!("PROCESSED reply for order {} carries no accrual", reply.order);
                    Resolution::TransientError
                }
            },
        }
    }
}

/// Accrual service client - translates one order number into a Resolution
pub struct AccrualClient {
    address: String,
    http: Client,
}

impl AccrualClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            http: Client::new(),
        }
    }

    /// GET {base}/api/orders/{number} and normalize the response.
    ///
    /// Never returns an error: every failure mode collapses into a
    /// Resolution variant the caller schedules around.
    pub async fn resolve(&self, number: &str) -> Resolution {
        let url = format!("{}/api/orders/{}", self.address, number);

        let resp = match self.http.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Accrual request for order {} failed: {}", number, e);
                return Resolution::TransientError;
            }
        };

        match resp.status() {
            StatusCode::OK => match resp.json::<AccrualReply>().await {
                Ok(reply) => Resolution::from_reply(reply),
                Err(e) => {
                    warn!("Malformed accrual response for order {}: {}", number, e);
                    Resolution::TransientError
                }
            },
            StatusCode::NO_CONTENT => Resolution::NotRegistered,
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = resp
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok());

                match retry_after {
                    Some(seconds) => Resolution::RateLimited {
                        retry_after: Duration::from_secs(seconds),
                    },
                    None => {
                        // Unparsable Retry-After: fall back to next-tick retry
                        // instead of dropping the order
                        warn!("429 without usable Retry-After for order {}", number);
                        Resolution::TransientError
                    }
                }
            }
            other => {
                warn!("Unexpected accrual status {} for order {}", other, number);
                Resolution::TransientError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::header, routing::get, Json, Router};
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_registered_maps_to_processing() {
        let reply = AccrualReply {
            order: "1".to_string(),
            status: AccrualStatus::Registered,
            accrual: None,
        };
        assert_eq!(
            Resolution::from_reply(reply),
            Resolution::Resolved {
                status: OrderStatus::Processing,
                accrual: None,
            }
        );
    }

    #[test]
    fn test_processed_requires_accrual() {
        let reply = AccrualReply {
            order: "1".to_string(),
            status: AccrualStatus::Processed,
            accrual: None,
        };
        assert_eq!(Resolution::from_reply(reply), Resolution::TransientError);
    }

    #[test]
    fn test_invalid_carries_no_amount() {
        let reply = AccrualReply {
            order: "1".to_string(),
            status: AccrualStatus::Invalid,
            accrual: Some(dec!(10)),
        };
        assert_eq!(
            Resolution::from_reply(reply),
            Resolution::Resolved {
                status: OrderStatus::Invalid,
                accrual: None,
            }
        );
    }

    #[test]
    fn test_reply_parses_from_wire_json() {
        let reply: AccrualReply = serde_json::from_value(json!({
            "order": "79927398713",
            "status": "PROCESSED",
            "accrual": 500.0,
        }))
        .unwrap();
        assert_eq!(reply.status, AccrualStatus::Processed);
        assert_eq!(reply.accrual, Some(dec!(500)));

        let reply: AccrualReply = serde_json::from_value(json!({
            "order": "79927398713",
            "status": "REGISTERED",
        }))
        .unwrap();
        assert_eq!(reply.status, AccrualStatus::Registered);
        assert_eq!(reply.accrual, None);
    }

    async fn spawn_stub(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_resolve_processed_order() {
        let router = Router::new().route(
            "/api/orders/:number",
            get(|| async {
                Json(json!({"order": "79927398713", "status": "PROCESSED", "accrual": 500.0}))
            }),
        );
        let base = spawn_stub(router).await;

        let client = AccrualClient::new(base);
        assert_eq!(
            client.resolve("79927398713").await,
            Resolution::Resolved {
                status: OrderStatus::Processed,
                accrual: Some(dec!(500)),
            }
        );
    }

    #[tokio::test]
    async fn test_resolve_unknown_order() {
        let router = Router::new().route(
            "/api/orders/:number",
            get(|| async { axum::http::StatusCode::NO_CONTENT }),
        );
        let base = spawn_stub(router).await;

        let client = AccrualClient::new(base);
        assert_eq!(client.resolve("79927398713").await, Resolution::NotRegistered);
    }

    #[tokio::test]
    async fn test_resolve_rate_limited() {
        let router = Router::new().route(
            "/api/orders/:number",
            get(|| async {
                (
                    axum::http::StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, "2")],
                )
            }),
        );
        let base = spawn_stub(router).await;

        let client = AccrualClient::new(base);
        assert_eq!(
            client.resolve("79927398713").await,
            Resolution::RateLimited {
                retry_after: Duration::from_secs(2),
            }
        );
    }

    #[tokio::test]
    async fn test_resolve_rate_limited_without_header() {
        let router = Router::new().route(
            "/api/orders/:number",
            get(|| async { axum::http::StatusCode::TOO_MANY_REQUESTS }),
        );
        let base = spawn_stub(router).await;

        let client = AccrualClient::new(base);
        assert_eq!(client.resolve("79927398713").await, Resolution::TransientError);
    }

    #[tokio::test]
    async fn test_resolve_server_error() {
        let router = Router::new().route(
            "/api/orders/:number",
            get(|| async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let base = spawn_stub(router).await;

        let client = AccrualClient::new(base);
        assert_eq!(client.resolve("79927398713").await, Resolution::TransientError);
    }

    #[tokio::test]
    async fn test_resolve_unreachable_service() {
        let client = AccrualClient::new("http://127.0.0.1:1");
        assert_eq!(client.resolve("79927398713").await, Resolution::TransientError);
    }
}
