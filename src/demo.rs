//! Routes served by the `ember` binary.

use std::time::Duration;

use ember::http::exchange::Exchange;
use ember::http::request::Method;
use ember::http::task::{HandlerError, HandlerRef, handler};
use ember::routing::RouteTable;

pub fn routes() -> RouteTable<HandlerRef> {
    RouteTable::new()
        .get("/", handler(index))
        .get("/hello", handler(hello))
        .get("/users/%d", handler(user))
        .route(Method::GET, "/report", handler(report), &["json", "xml"])
        .get("/stream", handler(stream))
        .get("/slow", handler(slow))
        .post("/echo", handler(echo))
}

async fn index(ex: Exchange) -> Result<(), HandlerError> {
    ex.content_type("text/plain")?;
    ex.respond("ember\n").await
}

async fn hello(ex: Exchange) -> Result<(), HandlerError> {
    ex.respond("<h1>hello, world</h1>\n").await
}

async fn user(ex: Exchange) -> Result<(), HandlerError> {
    let id = ex
        .capture(0)
        .and_then(|c| c.as_int())
        .ok_or_else(|| HandlerError::msg("user id out of range"))?;
    ex.content_type("text/plain")?;
    ex.respond(format!("user {id}\n")).await
}

async fn report(ex: Exchange) -> Result<(), HandlerError> {
    let body = match ex.format() {
        "xml" => "<report><status>ok</status></report>\n",
        _ => "{\"status\":\"ok\"}\n",
    };
    ex.respond(body).await
}

async fn stream(ex: Exchange) -> Result<(), HandlerError> {
    ex.content_type("text/plain")?;
    for i in 0..3 {
        ex.send_chunk(format!("chunk {i}\n").as_bytes()).await?;
        ex.sleep(Duration::from_millis(200)).await;
    }
    Ok(())
}

async fn slow(ex: Exchange) -> Result<(), HandlerError> {
    ex.sleep(Duration::from_secs(1)).await;
    ex.content_type("text/plain")?;
    ex.respond("done\n").await
}

async fn echo(ex: Exchange) -> Result<(), HandlerError> {
    let body = ex.body().await;
    ex.content_type("application/octet-stream")?;
    ex.respond(body).await
}
