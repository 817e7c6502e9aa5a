use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use serde_json::json;
use strata::{Application, Router, Server, Settings, middleware};
use tokio::net::{TcpListener, TcpStream};

async fn start() -> std::net::SocketAddr {
    let router = Router::new()
        .get("/hello/:name", |ctx| Box::pin(async move {
            let name = ctx.request().param("name").unwrap_or_default().to_owned();
            ctx.set_body(format!("hello {name}"));
            Ok(())
        }))
        .post("/echo", |ctx| Box::pin(async move {
            let body = ctx.request().body().cloned().unwrap_or_default();
            ctx.set_body(json!({ "echo": body }));
            Ok(())
        }));

    let app = Application::new()
        .settings(Settings { silent: true, ..Settings::default() })
        .use_middleware(middleware::BodyParser::new())
        .use_middleware(router);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(Server::serve_on(listener, app.callback()));
    addr
}

async fn client(addr: std::net::SocketAddr) -> http1::SendRequest<Full<Bytes>> {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (sender, conn) = http1::handshake(TokioIo::new(stream)).await.unwrap();
    tokio::spawn(conn);
    sender
}

#[tokio::test]
async fn serves_over_tcp() {
    let addr = start().await;
    let mut sender = client(addr).await;

    let req = http::Request::get("/hello/tobi")
        .header("host", "localhost")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let res = sender.send_request(req).await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-type"], "text/plain; charset=utf-8");
    assert_eq!(res.into_body().collect().await.unwrap().to_bytes(), "hello tobi");

    let req = http::Request::post("/echo")
        .header("host", "localhost")
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from_static(br#"{"n":1}"#)))
        .unwrap();
    let res = sender.send_request(req).await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.into_body().collect().await.unwrap().to_bytes(), r#"{"echo":{"n":1}}"#);

    let req = http::Request::get("/missing")
        .header("host", "localhost")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let res = sender.send_request(req).await.unwrap();
    assert_eq!(res.status(), 404);
    assert_eq!(res.into_body().collect().await.unwrap().to_bytes(), "Not Found");
}

#[tokio::test]
async fn head_requests_get_headers_only() {
    let addr = start().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut sender, conn) = http1::handshake::<_, Empty<Bytes>>(TokioIo::new(stream)).await.unwrap();
    tokio::spawn(conn);

    let req = http::Request::head("/hello/ferret")
        .header("host", "localhost")
        .body(Empty::new())
        .unwrap();
    let res = sender.send_request(req).await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-length"], "12");
    assert!(res.into_body().collect().await.unwrap().to_bytes().is_empty());
}
