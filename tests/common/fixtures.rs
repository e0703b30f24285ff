//! Mock source payloads and mounting helpers

use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path of the default endpoint for an identifier
pub fn security_path(identifier: &str) -> String {
    format!(
        "/liquidity/v1/securities/{}",
        urlencoding::encode(identifier)
    )
}

/// A liquidity record with `transactions` transaction entries
pub fn record(isin: &str, transactions: usize) -> Value {
    let transactions: Vec<Value> = (1..=transactions)
        .map(|n| {
            json!({
                "transactionId": format!("{isin}-T{n}"),
                "transactionDate": "2024-01-15",
                "quantity": n * 100,
                "cashAmount": 1234.5,
                "cashSettlementCurrency": "EUR"
            })
        })
        .collect();
    json!({
        "isin": isin,
        "referenceDate": "2024-01-15",
        "compositeLiquidityScore": 7.25,
        "aggregatedHoldingData": {
            "concentration": 0.4,
            "simpleMovingAverage": {"30": {"volume": 12}}
        },
        "transactions": transactions
    })
}

/// Answer every request for `identifier` with `body`
pub async fn mount_record(server: &MockServer, identifier: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(security_path(identifier)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Answer requests for `identifier` on one date with a bare status and body
pub async fn mount_status_on(
    server: &MockServer,
    identifier: &str,
    date: &str,
    status: u16,
    body: &str,
) {
    Mock::given(method("GET"))
        .and(path(security_path(identifier)))
        .and(query_param("referenceDate", date))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}
