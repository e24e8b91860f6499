use secrecy::SecretString;
use telemetry::tracing::init_test_tracing;
use websync::error::ErrorKind;
use websync::remote::{AuthenticatedClient, ClientCredentialsAuth, SessionLoginAuth};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN_ENDPOINT: &str = "/connect/token";
const RESOURCE_ENDPOINT: &str = "/transfers";

fn client_credentials(server: &MockServer) -> ClientCredentialsAuth {
    ClientCredentialsAuth {
        token_url: format!("{}{TOKEN_ENDPOINT}", server.uri()),
        client_id: "client".to_owned(),
        client_secret: SecretString::new("secret".to_owned()),
    }
}

/// Serves `first` on the first token request and `second` on every later one.
async fn mock_tokens(server: &MockServer, first: &str, second: &str) {
    Mock::given(method("POST"))
        .and(path(TOKEN_ENDPOINT))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "access_token": first })),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(TOKEN_ENDPOINT))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "access_token": second })),
        )
        .mount(server)
        .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unauthorized_request_is_retried_once_with_refreshed_token() {
    init_test_tracing();
    let server = MockServer::start().await;
    mock_tokens(&server, "expired", "fresh").await;

    Mock::given(method("GET"))
        .and(path(RESOURCE_ENDPOINT))
        .and(header("authorization", "Bearer expired"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(RESOURCE_ENDPOINT))
        .and(header("authorization", "Bearer fresh"))
        .and(header("retailer", "giakho"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        AuthenticatedClient::new(reqwest::Client::new(), "giakho", client_credentials(&server));
    let url = format!("{}{RESOURCE_ENDPOINT}", server.uri());

    let response = client.call(|http| http.get(&url)).await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");
    assert_eq!(client.credentials().acquisitions(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn second_unauthorized_response_is_returned_without_another_retry() {
    init_test_tracing();
    let server = MockServer::start().await;
    mock_tokens(&server, "first", "second").await;

    Mock::given(method("GET"))
        .and(path(RESOURCE_ENDPOINT))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let client =
        AuthenticatedClient::new(reqwest::Client::new(), "giakho", client_credentials(&server));
    let url = format!("{}{RESOURCE_ENDPOINT}", server.uri());

    let response = client.call(|http| http.get(&url)).await.unwrap();

    assert_eq!(response.status(), 401);
    assert_eq!(client.credentials().acquisitions(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn other_error_statuses_do_not_refresh_the_token() {
    init_test_tracing();
    let server = MockServer::start().await;
    mock_tokens(&server, "first", "second").await;

    Mock::given(method("GET"))
        .and(path(RESOURCE_ENDPOINT))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        AuthenticatedClient::new(reqwest::Client::new(), "giakho", client_credentials(&server));
    let url = format!("{}{RESOURCE_ENDPOINT}", server.uri());

    let response = client.call(|http| http.get(&url)).await.unwrap();

    assert_eq!(response.status(), 503);
    assert_eq!(client.credentials().acquisitions(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn token_is_reused_across_requests() {
    init_test_tracing();
    let server = MockServer::start().await;
    mock_tokens(&server, "first", "second").await;

    Mock::given(method("GET"))
        .and(path(RESOURCE_ENDPOINT))
        .and(header("authorization", "Bearer first"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&server)
        .await;

    let client =
        AuthenticatedClient::new(reqwest::Client::new(), "giakho", client_credentials(&server));
    let url = format!("{}{RESOURCE_ENDPOINT}", server.uri());

    for _ in 0..3 {
        let response = client.call(|http| http.get(&url)).await.unwrap();
        assert_eq!(response.status(), 200);
    }

    assert_eq!(client.credentials().acquisitions(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn client_credentials_grant_sends_form() {
    init_test_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(TOKEN_ENDPOINT))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("scopes=PublicApi.Access"))
        .and(body_string_contains("client_id=client"))
        .and(body_string_contains("client_secret=secret"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "access_token": "t" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(RESOURCE_ENDPOINT))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client =
        AuthenticatedClient::new(reqwest::Client::new(), "giakho", client_credentials(&server));
    let url = format!("{}{RESOURCE_ENDPOINT}", server.uri());

    client.call(|http| http.get(&url)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_token_request_is_an_authentication_error() {
    init_test_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(TOKEN_ENDPOINT))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid_client"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(RESOURCE_ENDPOINT))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client =
        AuthenticatedClient::new(reqwest::Client::new(), "giakho", client_credentials(&server));
    let url = format!("{}{RESOURCE_ENDPOINT}", server.uri());

    let err = client.call(|http| http.get(&url)).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AuthenticationError);
    assert!(err.detail().unwrap().contains("invalid_client"));
    assert_eq!(client.credentials().acquisitions(), 0);
}

fn session_login(server: &MockServer) -> SessionLoginAuth {
    SessionLoginAuth {
        login_url: format!("{}/account/login", server.uri()),
        retailer: "giakho".to_owned(),
        username: "admin".to_owned(),
        password: SecretString::new("hunter2".to_owned()),
        latest_branch_id: 14628,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn session_login_sends_token_and_cookies() {
    init_test_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/account/login"))
        .and(header("retailer", "giakho"))
        .and(body_string_contains("\"UserName\":\"admin\""))
        .and(body_string_contains("\"LatestBranchId\":14628"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "ss-id=abc; Path=/")
                .set_body_json(serde_json::json!({ "token": "session-token" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/transferDetails/42"))
        .and(header("authorization", "Bearer session-token"))
        .and(header("cookie", "ss-id=abc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = AuthenticatedClient::new(reqwest::Client::new(), "giakho", session_login(&server));
    let url = format!("{}/transferDetails/42", server.uri());

    let response = client.call(|http| http.get(&url)).await.unwrap();

    assert_eq!(response.status(), 200);
}

#[tokio::test(flavor = "multi_thread")]
async fn unauthorized_session_logs_in_again_and_retries_with_new_cookies() {
    init_test_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/account/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "ss-id=one; Path=/")
                .set_body_json(serde_json::json!({ "token": "s1" })),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/account/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "ss-id=two; Path=/")
                .set_body_json(serde_json::json!({ "token": "s2" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/transferDetails/42"))
        .and(header("authorization", "Bearer s1"))
        .and(header("cookie", "ss-id=one"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/transferDetails/42"))
        .and(header("authorization", "Bearer s2"))
        .and(header("cookie", "ss-id=two"))
        .respond_with(ResponseTemplate::new(200).set_body_string("details"))
        .expect(1)
        .mount(&server)
        .await;

    let client = AuthenticatedClient::new(reqwest::Client::new(), "giakho", session_login(&server));
    let url = format!("{}/transferDetails/42", server.uri());

    let response = client.call(|http| http.get(&url)).await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "details");
    assert_eq!(client.credentials().acquisitions(), 2);
}
