use crate::http::request::HeaderMap;

/// HTTP status codes the server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 201 Created
    Created,
    /// 202 Accepted
    Accepted,
    /// 204 No Content
    NoContent,
    /// 301 Moved Permanently
    MovedPermanently,
    /// 302 Found
    Found,
    /// 303 See Other
    SeeOther,
    /// 304 Not Modified
    NotModified,
    /// 307 Temporary Redirect
    TemporaryRedirect,
    /// 400 Bad Request
    BadRequest,
    /// 401 Unauthorized
    Unauthorized,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 406 Not Acceptable
    NotAcceptable,
    /// 408 Request Timeout
    RequestTimeout,
    /// 413 Payload Too Large
    PayloadTooLarge,
    /// 500 Internal Server Error
    InternalServerError,
    /// 502 Bad Gateway
    BadGateway,
    /// 503 Service Unavailable
    ServiceUnavailable,
}

const STATUS_TABLE: &[(StatusCode, u16, &str)] = &[
    (StatusCode::Ok, 200, "OK"),
    (StatusCode::Created, 201, "Created"),
    (StatusCode::Accepted, 202, "Accepted"),
    (StatusCode::NoContent, 204, "No Content"),
    (StatusCode::MovedPermanently, 301, "Moved Permanently"),
    (StatusCode::Found, 302, "Found"),
    (StatusCode::SeeOther, 303, "See Other"),
    (StatusCode::NotModified, 304, "Not Modified"),
    (StatusCode::TemporaryRedirect, 307, "Temporary Redirect"),
    (StatusCode::BadRequest, 400, "Bad Request"),
    (StatusCode::Unauthorized, 401, "Unauthorized"),
    (StatusCode::Forbidden, 403, "Forbidden"),
    (StatusCode::NotFound, 404, "Not Found"),
    (StatusCode::MethodNotAllowed, 405, "Method Not Allowed"),
    (StatusCode::NotAcceptable, 406, "Not Acceptable"),
    (StatusCode::RequestTimeout, 408, "Request Timeout"),
    (StatusCode::PayloadTooLarge, 413, "Payload Too Large"),
    (StatusCode::InternalServerError, 500, "Internal Server Error"),
    (StatusCode::BadGateway, 502, "Bad Gateway"),
    (StatusCode::ServiceUnavailable, 503, "Service Unavailable"),
];

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use ember::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        STATUS_TABLE
            .iter()
            .find(|(s, _, _)| s == self)
            .map(|(_, code, _)| *code)
            .unwrap_or(500)
    }

    /// Returns the standard HTTP reason phrase for this status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use ember::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    /// assert_eq!(StatusCode::NotFound.reason_phrase(), "Not Found");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        STATUS_TABLE
            .iter()
            .find(|(s, _, _)| s == self)
            .map(|(_, _, reason)| *reason)
            .unwrap_or("Internal Server Error")
    }

    pub fn from_u16(code: u16) -> Option<Self> {
        STATUS_TABLE
            .iter()
            .find(|(_, c, _)| *c == code)
            .map(|(s, _, _)| *s)
    }
}

/// Represents a complete HTTP response ready to be sent to a client.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(b"{}".to_vec())
///     .build();
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// Adds or replaces a header.
    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Builds the final Response.
    ///
    /// Adds Content-Length from the body size unless already present.
    pub fn build(mut self) -> Response {
        self.headers
            .insert_default("Content-Length", self.body.len().to_string());

        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    /// Creates a simple 200 OK response with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        ResponseBuilder::new(StatusCode::Ok)
            .body(body.into())
            .build()
    }

    /// The terse answer for a request no route accepts.
    pub fn not_found() -> Self {
        Self::closing(StatusCode::NotFound)
    }

    /// The terse answer for a request the parser rejected.
    pub fn bad_request() -> Self {
        Self::closing(StatusCode::BadRequest)
    }

    /// The answer for a body over the configured limit.
    pub fn payload_too_large() -> Self {
        Self::closing(StatusCode::PayloadTooLarge)
    }

    pub fn internal_error() -> Self {
        Self::closing(StatusCode::InternalServerError)
    }

    fn closing(status: StatusCode) -> Self {
        let body = format!("{} {}", status.as_u16(), status.reason_phrase());
        ResponseBuilder::new(status)
            .header("Connection", "close")
            .header("Content-Type", "text/plain")
            .body(body.into_bytes())
            .build()
    }
}
