// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Integration tests for the HTTP intake.
//!
//! Each test serves the real router on an ephemeral port, backed by a
//! dispatcher over the in-memory ledger.

use faucet_dispatch::server::{
    AppState, AskMoneyResponse, AvailabilityResponse, ErrorResponse, create_router,
};
use faucet_dispatch::{AssetId, Dispatcher, FaucetConfig, MemoryLedger};
use reqwest::{Client, StatusCode};
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;

const CONFIG: &str = r#"
    [dispatch]
    poll_interval_ms = 5
    monitor_interval_ms = 20
    confirm_base_ms = 5
    confirm_cap_ms = 20

    [[assets]]
    asset_id = "ETH"
    amount = "1"

    [[assets]]
    asset_id = "DAI"
    symbol = "DAI"
    amount = "300"

    [[identities]]
    address = "0x6c10d9c1744f149d4b17660e14faa247964749c7"

    [[identities]]
    address = "0x2b5ad5c4795c026514f8317c7a215e218dccd6cf"
"#;

/// Test server that binds to an ephemeral port.
struct TestServer {
    base_url: String,
    ledger: Arc<MemoryLedger>,
    dispatcher: Arc<Dispatcher>,
}

impl TestServer {
    async fn new() -> Self {
        let config = FaucetConfig::from_toml_str(CONFIG).unwrap();
        let ledger = Arc::new(MemoryLedger::new());
        for identity in &config.identities {
            ledger.set_balance(identity, &AssetId::new("ETH"), dec!(100));
            ledger.set_balance(identity, &AssetId::new("DAI"), dec!(30000));
        }

        let dispatcher = Arc::new(Dispatcher::new(&config, ledger.clone()).unwrap());
        dispatcher.start();

        let app = create_router(AppState {
            dispatcher: dispatcher.clone(),
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            base_url: format!("http://{}", addr),
            ledger,
            dispatcher,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn ask(&self, client: &Client, address: &str) -> reqwest::Response {
        client
            .post(self.url("/ask_money"))
            .json(&json!({ "receiverAddress": address }))
            .send()
            .await
            .unwrap()
    }
}

// === Tests ===

#[tokio::test]
async fn ask_money_pays_every_asset() {
    let server = TestServer::new().await;
    let client = Client::new();

    let response = server
        .ask(&client, "  0xC6464BF44801F25D68F43E3D4A44BA9CD6259147 ")
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: AskMoneyResponse = response.json().await.unwrap();
    assert_eq!(body.status, "ok");
    assert_eq!(body.recipient, "0xc6464bf44801f25d68f43e3d4a44ba9cd6259147");
    assert_eq!(body.transfers.len(), 2);
    assert_eq!(
        server
            .ledger
            .balance_of(&body.recipient, &AssetId::new("DAI")),
        dec!(300)
    );
}

#[tokio::test]
async fn repeated_request_conflicts() {
    let server = TestServer::new().await;
    let client = Client::new();
    let address = "0xc6464bf44801f25d68f43e3d4a44ba9cd6259147";

    assert_eq!(server.ask(&client, address).await.status(), StatusCode::OK);

    let response = server.ask(&client, address).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: ErrorResponse = response.json().await.unwrap();
    assert_eq!(body.code, "DUPLICATE_REQUEST");
}

#[tokio::test]
async fn malformed_address_is_bad_request() {
    let server = TestServer::new().await;
    let client = Client::new();

    let response = server.ask(&client, "0x1234").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = response.json().await.unwrap();
    assert_eq!(body.code, "INVALID_RECIPIENT");
    assert!(server.dispatcher.guard().is_empty());
}

#[tokio::test]
async fn missing_address_is_json_bad_request() {
    let server = TestServer::new().await;
    let client = Client::new();

    for body in [json!({}), json!({ "receiverAddress": 42 }), json!([1, 2])] {
        let response = client
            .post(server.url("/ask_money"))
            .json(&body)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = response.json().await.unwrap();
        assert_eq!(body.code, "INVALID_RECIPIENT");
        assert_eq!(body.error, "invalid recipient address: missing receiver address");
    }

    let response = client
        .post(server.url("/ask_money"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = response.json().await.unwrap();
    assert_eq!(body.code, "INVALID_RECIPIENT");
    assert!(server.dispatcher.guard().is_empty());
}

#[tokio::test]
async fn failed_transfer_is_bad_gateway() {
    let server = TestServer::new().await;
    let client = Client::new();
    server.ledger.reject_next_transfer(&AssetId::new("ETH"));

    let response = server
        .ask(&client, "0xc6464bf44801f25d68f43e3d4a44ba9cd6259147")
        .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: ErrorResponse = response.json().await.unwrap();
    assert_eq!(body.code, "TRANSFER_FAILURE");
    assert!(server.dispatcher.guard().is_empty());
}

#[tokio::test]
async fn no_available_identity_is_service_unavailable() {
    let server = TestServer::new().await;
    let client = Client::new();
    for address in [
        "0x6c10d9c1744f149d4b17660e14faa247964749c7",
        "0x2b5ad5c4795c026514f8317c7a215e218dccd6cf",
    ] {
        let identity = faucet_dispatch::FundingIdentity::new(address);
        server
            .ledger
            .set_balance(&identity, &AssetId::new("ETH"), dec!(0));
    }

    let mut drained = false;
    for _ in 0..200 {
        let body: AvailabilityResponse = client
            .get(server.url("/available"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if body.available_queues == 0 {
            assert_eq!(body.identities, 2);
            drained = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(drained, "monitor never excluded the drained identities");

    let response = server
        .ask(&client, "0xc6464bf44801f25d68f43e3d4a44ba9cd6259147")
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: ErrorResponse = response.json().await.unwrap();
    assert_eq!(body.code, "QUEUE_EXHAUSTED");
}

#[tokio::test]
async fn tokens_lists_configured_assets() {
    let server = TestServer::new().await;
    let client = Client::new();

    let tokens: serde_json::Value = client
        .get(server.url("/tokens"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(tokens[0]["asset_id"], "ETH");
    assert_eq!(tokens[1]["symbol"], "DAI");
    assert_eq!(tokens[1]["amount"], "300");
}

/// Concurrent distinct recipients are all paid, spread over both identities.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_are_all_paid() {
    let server = Arc::new(TestServer::new().await);
    let client = Client::new();

    const REQUESTS: u32 = 40;
    let mut handles = Vec::with_capacity(REQUESTS as usize);
    for n in 0..REQUESTS {
        let server = server.clone();
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let address = format!("0x{:040x}", 0x1000 + n);
            let response = server.ask(&client, &address).await;
            assert_eq!(response.status(), StatusCode::OK);
            response.json::<AskMoneyResponse>().await.unwrap().queue
        }));
    }

    let mut per_queue = [0u32; 2];
    for handle in handles {
        per_queue[handle.await.unwrap().0] += 1;
    }

    assert_eq!(per_queue.iter().sum::<u32>(), REQUESTS);
    assert_eq!(per_queue, [REQUESTS / 2, REQUESTS / 2]);
}
