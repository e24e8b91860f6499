use chrono::NaiveDate;
use config::shared::KiotVietConfig;
use telemetry::tracing::init_test_tracing;
use websync::error::ErrorKind;
use websync::remote::{KiotVietClient, TransferApi};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> KiotVietConfig {
    serde_json::from_value(serde_json::json!({
        "retailer": "giakho",
        "client_id": "client",
        "client_secret": "secret",
        "username": "admin",
        "password": "hunter2",
        "token_url": format!("{}/connect/token", server.uri()),
        "public_api_url": server.uri(),
        "web_api_url": format!("{}/api/", server.uri()),
    }))
    .unwrap()
}

async fn mock_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/connect/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "access_token": "t" })),
        )
        .mount(server)
        .await;
}

async fn mock_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/account/login"))
        .and(query_param("quan-ly", "true"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "ss-id=abc; Path=/")
                .set_body_json(serde_json::json!({ "token": "session" })),
        )
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn lists_transfers_newest_first() {
    init_test_tracing();
    let server = MockServer::start().await;
    mock_token(&server).await;

    Mock::given(method("GET"))
        .and(path("/transfers"))
        .and(query_param("pageSize", "100"))
        .and(query_param("currentItem", "200"))
        .and(query_param("orderBy", "id"))
        .and(query_param("orderDirection", "DESC"))
        .and(header("retailer", "giakho"))
        .and(header("authorization", "Bearer t"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total": 201,
            "pageSize": 1,
            "data": [{
                "id": 9001,
                "code": "TRF000123",
                "fromBranchId": 1,
                "toBranchId": 2,
                "status": 3,
                "dispatchedDate": "2024-03-09T08:15:00.1230000",
                "receivedDate": "",
                "retailerId": 7,
                "transferDetails": [{
                    "productId": 11,
                    "productCode": "SP0011",
                    "productName": "Tea",
                    "sendQuantity": 2.0,
                    "receiveQuantity": 0.0,
                    "sendPrice": 10.5,
                    "receivePrice": 0.0,
                    "price": 12.0
                }]
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = KiotVietClient::new(&config(&server)).unwrap();
    let page = client.list_transfers(100, 200).await.unwrap();

    assert_eq!(page.total, 201);
    assert_eq!(page.data.len(), 1);

    let transfer = &page.data[0];
    assert_eq!(transfer.id, 9001);
    assert_eq!(
        transfer.dispatched_date.unwrap().date(),
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    );
    assert_eq!(transfer.received_date, None);
    assert_eq!(transfer.transfer_details[0].send_quantity, 2.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn list_error_status_carries_response_body() {
    init_test_tracing();
    let server = MockServer::start().await;
    mock_token(&server).await;

    Mock::given(method("GET"))
        .and(path("/transfers"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .expect(1)
        .mount(&server)
        .await;

    let client = KiotVietClient::new(&config(&server)).unwrap();
    let err = client.list_transfers(100, 0).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnexpectedResponseStatus);
    assert!(err.detail().unwrap().contains("upstream exploded"));
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_page_is_a_deserialization_error() {
    init_test_tracing();
    let server = MockServer::start().await;
    mock_token(&server).await;

    Mock::given(method("GET"))
        .and(path("/transfers"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let client = KiotVietClient::new(&config(&server)).unwrap();
    let err = client.list_transfers(100, 0).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DeserializationError);
}

#[tokio::test(flavor = "multi_thread")]
async fn fetches_transfer_details_through_back_office_session() {
    init_test_tracing();
    let server = MockServer::start().await;
    mock_login(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/transferDetails/9001"))
        .and(query_param("Includes", "Product"))
        .and(header("authorization", "Bearer session"))
        .and(header("cookie", "ss-id=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Data": [
                {
                    "SerialNumbers": "SN1,SN2",
                    "ReceiveSerialNumbers": null,
                    "Product": { "Barcode": "8930000000011" }
                },
                {
                    "SerialNumbers": null,
                    "ReceiveSerialNumbers": null,
                    "Product": null
                }
            ]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = KiotVietClient::new(&config(&server)).unwrap();

    // The second call reuses the session acquired by the first.
    client.transfer_details(9001).await.unwrap();
    let details = client.transfer_details(9001).await.unwrap();

    assert_eq!(details.data.len(), 2);
    assert_eq!(details.data[0].serial_numbers.as_deref(), Some("SN1,SN2"));
    assert_eq!(
        details.data[0]
            .product
            .as_ref()
            .and_then(|product| product.barcode.as_deref()),
        Some("8930000000011")
    );
    assert!(details.data[1].product.is_none());
    assert_eq!(client.web_client().credentials().acquisitions(), 1);
}
