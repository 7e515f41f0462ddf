use bytes::BytesMut;
use ember::http::request::HeaderMap;
use ember::http::response::{Response, ResponseBuilder, StatusCode};
use ember::http::writer::{LAST_CHUNK, encode_chunk, serialize_head, serialize_response};

#[test]
fn test_status_codes_round_trip() {
    let cases = [
        (StatusCode::Ok, 200, "OK"),
        (StatusCode::NoContent, 204, "No Content"),
        (StatusCode::BadRequest, 400, "Bad Request"),
        (StatusCode::NotFound, 404, "Not Found"),
        (StatusCode::NotAcceptable, 406, "Not Acceptable"),
        (StatusCode::InternalServerError, 500, "Internal Server Error"),
        (StatusCode::ServiceUnavailable, 503, "Service Unavailable"),
    ];
    for (status, code, reason) in cases {
        assert_eq!(status.as_u16(), code);
        assert_eq!(status.reason_phrase(), reason);
        assert_eq!(StatusCode::from_u16(code), Some(status));
    }
    assert_eq!(StatusCode::from_u16(299), None);
}

#[test]
fn test_builder_fills_content_length() {
    let response = ResponseBuilder::new(StatusCode::Created)
        .header("Content-Type", "application/json")
        .body(b"{\"id\":1}".to_vec())
        .build();

    assert_eq!(response.status, StatusCode::Created);
    assert_eq!(response.headers.get("Content-Length"), Some("8"));
    assert_eq!(response.headers.len(), 2);

    let empty = ResponseBuilder::new(StatusCode::NoContent).build();
    assert_eq!(empty.headers.get("Content-Length"), Some("0"));
}

#[test]
fn test_builder_keeps_explicit_content_length() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("content-length", "999")
        .body(b"test".to_vec())
        .build();

    assert_eq!(response.headers.get("Content-Length"), Some("999"));
}

#[test]
fn test_response_ok_helper() {
    let response = Response::ok(b"test content".to_vec());

    assert_eq!(response.status, StatusCode::Ok);
    assert_eq!(response.body, b"test content".to_vec());
}

#[test]
fn test_response_not_found_helper() {
    let response = Response::not_found();

    assert_eq!(response.status, StatusCode::NotFound);
    assert_eq!(response.body, b"404 Not Found".to_vec());
    assert_eq!(response.headers.get("Connection"), Some("close"));
}

#[test]
fn test_response_bad_request_helper() {
    let response = Response::bad_request();

    assert_eq!(response.status, StatusCode::BadRequest);
    assert_eq!(response.headers.get("Connection"), Some("close"));
    assert_eq!(response.headers.get("Content-Length"), Some("15"));
}

#[test]
fn test_response_internal_error_helper() {
    let response = Response::internal_error();

    assert_eq!(response.status, StatusCode::InternalServerError);
    assert_eq!(response.body, b"500 Internal Server Error".to_vec());
}

#[test]
fn test_serialize_response_wire_format() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "text/plain")
        .body(b"hi".to_vec())
        .build();

    assert_eq!(
        serialize_response(&response),
        b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nhi".to_vec()
    );
}

#[test]
fn test_serialize_head_with_extra_lines() {
    let mut headers = HeaderMap::new();
    headers.insert("Connection", "close");
    let extra = vec!["Set-Cookie: a=1\r\n".to_string(), "Set-Cookie: b=2".to_string()];

    let head = String::from_utf8(serialize_head(StatusCode::NotFound, &headers, &extra)).unwrap();

    assert_eq!(
        head,
        "HTTP/1.1 404 Not Found\r\nConnection: close\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\n"
    );
}

#[test]
fn test_chunk_encoding_and_terminator() {
    let mut out = BytesMut::new();
    encode_chunk(b"hello", &mut out);
    encode_chunk(b"", &mut out);
    encode_chunk(&[b'x'; 16], &mut out);
    out.extend_from_slice(LAST_CHUNK);

    let mut expected = b"5\r\nhello\r\n10\r\n".to_vec();
    expected.extend_from_slice(&[b'x'; 16]);
    expected.extend_from_slice(b"\r\n0\r\n\r\n");
    assert_eq!(&out[..], &expected[..]);
}
