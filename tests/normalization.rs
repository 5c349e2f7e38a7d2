use std::collections::BTreeMap;

use http::Method;
use masquerade::{
    build_request_descriptor, format_response, ClientOptions, Error, RawOptions, RequestDescriptor,
    ResponseData, ResponseDescriptor, ResponseType,
};

const URL: &str = "https://example.test/path?q=1&r=a%20b";

#[test]
fn method_and_url_pass_through() {
    for method in [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::HEAD,
        Method::OPTIONS,
    ] {
        let desc = build_request_descriptor(&method, URL, &ClientOptions::new()).unwrap();
        assert_eq!(desc.request_method, method.as_str().to_uppercase());
        assert_eq!(desc.request_url, URL);
    }
    let custom = Method::from_bytes(b"purge").unwrap();
    let desc = build_request_descriptor(&custom, URL, &ClientOptions::new()).unwrap();
    assert_eq!(desc.request_method, "PURGE");
}

#[test]
fn structured_body_keeps_caller_content_type() {
    let opts = ClientOptions::new()
        .header("Content-Type", "application/vnd.api+json")
        .body(serde_json::json!({"name": "x", "tags": [1, 2]}));
    let desc = build_request_descriptor(&Method::POST, URL, &opts).unwrap();
    let body: serde_json::Value = serde_json::from_str(desc.request_body.as_deref().unwrap()).unwrap();
    assert_eq!(body, serde_json::json!({"name": "x", "tags": [1, 2]}));
    assert_eq!(desc.headers.get("content-type").unwrap(), ["application/vnd.api+json"]);
    assert_eq!(desc.headers.len(), 1);
}

#[test]
fn typed_json_helper() {
    #[derive(serde::Serialize)]
    struct Login<'a> {
        user: &'a str,
    }
    let opts = ClientOptions::new().json(&Login { user: "u" }).unwrap();
    let desc = build_request_descriptor(&Method::POST, URL, &opts).unwrap();
    assert_eq!(desc.request_body.as_deref(), Some(r#"{"user":"u"}"#));
}

#[test]
fn binary_body_is_byte_safe() {
    let bytes: Vec<u8> = (0..=255).collect();
    let opts = ClientOptions::new().body(bytes.clone());
    let desc = build_request_descriptor(&Method::PUT, URL, &opts).unwrap();
    assert!(desc.is_byte_request);
    assert_eq!(desc.headers.get("content-type").unwrap(), ["application/octet-stream"]);
    use base64::Engine as _;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(desc.request_body.unwrap())
        .unwrap();
    assert_eq!(decoded, bytes);
}

#[test]
fn cookie_map_becomes_entries() {
    let opts = ClientOptions::new().cookies([("a", "1"), ("b", "2")]);
    let desc = build_request_descriptor(&Method::GET, URL, &opts).unwrap();
    assert_eq!(desc.request_cookies.len(), 2);
    let pairs: BTreeMap<_, _> = desc
        .request_cookies
        .iter()
        .map(|c| (c.name.as_str(), c.value.as_str()))
        .collect();
    assert_eq!(pairs, BTreeMap::from([("a", "1"), ("b", "2")]));
}

#[test]
fn raw_fields_always_win() {
    let opts = ClientOptions::browser_defaults()
        .timeout(std::time::Duration::from_secs(3))
        .proxy("http://127.0.0.1:9")
        .verify_tls(false)
        .raw(RawOptions {
            force_http1: Some(true),
            session_id: Some("X".into()),
            is_byte_response: Some(true),
            ..Default::default()
        });
    let desc = build_request_descriptor(&Method::GET, URL, &opts).unwrap();
    assert!(desc.force_http1);
    assert_eq!(desc.session_id.as_deref(), Some("X"));
    assert!(desc.is_byte_response);
    assert_eq!(desc.tls_client_identifier.as_deref(), Some("chrome_146"));
    assert_eq!(desc.timeout_milliseconds, Some(3000));
    assert!(desc.insecure_skip_verify);
}

#[test]
fn defaults_then_call_then_raw() {
    let defaults = ClientOptions::browser_defaults().raw(RawOptions {
        session_id: Some("default".into()),
        with_debug: Some(true),
        ..Default::default()
    });
    let call = ClientOptions::new().raw(RawOptions {
        session_id: Some("call".into()),
        ..Default::default()
    });
    let merged = defaults.merged_with(&call);
    let desc = build_request_descriptor(&Method::GET, URL, &merged).unwrap();
    assert_eq!(desc.session_id.as_deref(), Some("call"));
    assert!(desc.with_debug);
    assert_eq!(
        desc.headers.get("User-Agent").unwrap()[0],
        masquerade::normalize::DEFAULT_USER_AGENT
    );
}

#[test]
fn unknown_profile_is_validation_error() {
    let err = build_request_descriptor(&Method::GET, URL, &ClientOptions::new().impersonate("lynx_2")).unwrap_err();
    assert!(matches!(err, Error::ProfileNotFound(ref name) if name == "lynx_2"));
    assert!(err.is_validation());
}

#[test]
fn descriptor_wire_names() {
    let mut desc = RequestDescriptor::new("GET", URL);
    desc.with_random_tls_extension_order = true;
    desc.disable_ipv6 = true;
    desc.headers.insert("Accept", "*/*");
    let json = serde_json::to_value(&desc).unwrap();
    assert_eq!(json["requestMethod"], "GET");
    assert_eq!(json["requestUrl"], URL);
    assert_eq!(json["withRandomTLSExtensionOrder"], true);
    assert_eq!(json["disableIPV6"], true);
    assert_eq!(json["headers"]["Accept"], serde_json::json!(["*/*"]));

    let parsed: RequestDescriptor = serde_json::from_str(
        r#"{
            "requestMethod": "post",
            "requestUrl": "https://example.test/",
            "tlsClientIdentifier": "firefox_135",
            "headers": {"X-One": "1", "X-Many": ["a", "b"]},
            "headerOrder": ["x-many", "x-one"],
            "requestCookies": [{"name": "c", "value": "v"}],
            "isByteRequest": true,
            "timeoutSeconds": 5
        }"#,
    )
    .unwrap();
    assert_eq!(parsed.request_method, "post");
    assert_eq!(parsed.headers.get("x-many").unwrap(), ["a", "b"]);
    assert_eq!(parsed.request_cookies[0].path, "");
    assert!(parsed.is_byte_request);
    assert_eq!(parsed.timeout_seconds, Some(5));
}

fn engine_response(status: u16, body: &str) -> ResponseDescriptor {
    ResponseDescriptor {
        id: "r".into(),
        status,
        body: body.into(),
        target: URL.into(),
        used_protocol: "HTTP/1.1".into(),
        ..Default::default()
    }
}

#[test]
fn response_decoding() {
    let json = ClientOptions::new().response_type(ResponseType::Json);
    let out = format_response(engine_response(200, r#"{"a":[1,2]}"#), &json).unwrap();
    assert_eq!(out.data.as_json().unwrap()["a"][1], 2);

    let bin = ClientOptions::new().response_type(ResponseType::ArrayBuffer);
    let out = format_response(engine_response(200, "data:text/plain;base64,aGVsbG8gd29ybGQ="), &bin).unwrap();
    assert_eq!(String::from_utf8(out.data.as_bytes().unwrap().to_vec()).unwrap(), "hello world");

    let text = ClientOptions::new().response_type(ResponseType::Text);
    let out = format_response(engine_response(404, r#"{"a":1}"#), &text).unwrap();
    assert_eq!(out.status, 404);
    assert_eq!(out.data, ResponseData::Text(r#"{"a":1}"#.into()));
}

#[test]
fn engine_failure_is_distinct() {
    let err = format_response(engine_response(0, "connection refused"), &ClientOptions::new()).unwrap_err();
    assert!(err.is_engine_failure());
    assert!(!err.is_http_status());
    assert!(err.response().is_none());
}
