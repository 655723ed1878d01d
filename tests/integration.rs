use redis::aio::MultiplexedConnection;
use redis::{RedisResult, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use kvlog::codec::FrameCodec;
use kvlog::frame::MAX_ARRAY_DEPTH;
use kvlog::server::serve;
use kvlog::{Db, Error};

struct TestServer {
    addr: SocketAddr,
    db: Db,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), Error>>,
}

impl TestServer {
    async fn start(dir: &TempDir) -> TestServer {
        let db = Db::open(dir.path().join("database.aof"), Duration::from_millis(50))
            .await
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(serve(listener, db.clone(), FrameCodec::default(), rx));

        TestServer {
            addr,
            db,
            shutdown,
            handle,
        }
    }

    async fn connect(&self) -> MultiplexedConnection {
        let client = redis::Client::open(format!("redis://{}/", self.addr)).unwrap();
        client.get_multiplexed_async_connection().await.unwrap()
    }

    async fn stop(self) {
        self.shutdown.send(()).unwrap();
        self.handle.await.unwrap().unwrap();
        self.db.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_ping() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(&dir).await;
    let mut con = server.connect().await;

    let pong: String = redis::cmd("PING").query_async(&mut con).await.unwrap();
    let echo: String = redis::cmd("PING")
        .arg("hello")
        .query_async(&mut con)
        .await
        .unwrap();

    assert_eq!(pong, "PONG");
    assert_eq!(echo, "hello");

    server.stop().await;
}

#[tokio::test]
async fn test_set_and_get() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(&dir).await;
    let mut con = server.connect().await;

    let ok: String = redis::cmd("SET")
        .arg("a")
        .arg("1")
        .query_async(&mut con)
        .await
        .unwrap();
    let a: Option<String> = redis::cmd("GET").arg("a").query_async(&mut con).await.unwrap();
    let missing: Option<String> = redis::cmd("GET")
        .arg("missing")
        .query_async(&mut con)
        .await
        .unwrap();

    assert_eq!(ok, "OK");
    assert_eq!(a, Some("1".to_string()));
    assert_eq!(missing, None);

    server.stop().await;
}

#[tokio::test]
async fn test_hashes() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(&dir).await;
    let mut con = server.connect().await;

    let _: () = redis::pipe()
        .cmd("HSET")
        .arg("h")
        .arg("f1")
        .arg("v1")
        .ignore()
        .cmd("HSET")
        .arg("h")
        .arg("f2")
        .arg("v2")
        .ignore()
        .query_async(&mut con)
        .await
        .unwrap();

    let all: HashMap<String, String> = redis::cmd("HGETALL")
        .arg("h")
        .query_async(&mut con)
        .await
        .unwrap();
    let f1: Option<String> = redis::cmd("HGET")
        .arg("h")
        .arg("f1")
        .query_async(&mut con)
        .await
        .unwrap();
    let missing: Option<String> = redis::cmd("HGET")
        .arg("missing")
        .arg("f")
        .query_async(&mut con)
        .await
        .unwrap();
    let missing_hash: Value = redis::cmd("HGETALL")
        .arg("missing")
        .query_async(&mut con)
        .await
        .unwrap();

    assert_eq!(
        all,
        HashMap::from([
            ("f1".to_string(), "v1".to_string()),
            ("f2".to_string(), "v2".to_string()),
        ])
    );
    assert_eq!(f1, Some("v1".to_string()));
    assert_eq!(missing, None);
    assert_eq!(missing_hash, Value::Nil);

    server.stop().await;
}

#[tokio::test]
async fn test_wrong_number_of_arguments() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(&dir).await;
    let mut con = server.connect().await;

    let res: RedisResult<String> = redis::cmd("SET").arg("onlykey").query_async(&mut con).await;
    let err = res.unwrap_err();

    assert!(err
        .to_string()
        .contains("wrong number of arguments for the 'set' command"));

    // The connection stays usable after an error reply.
    let pong: String = redis::cmd("PING").query_async(&mut con).await.unwrap();
    assert_eq!(pong, "PONG");

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_command() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(&dir).await;
    let mut con = server.connect().await;

    let res: RedisResult<Value> = redis::cmd("FLUSHALL").query_async(&mut con).await;

    assert!(res.unwrap_err().to_string().contains("unknown command"));

    server.stop().await;
}

#[tokio::test]
async fn test_data_survives_restart() {
    let dir = TempDir::new().unwrap();

    {
        let server = TestServer::start(&dir).await;
        let mut con = server.connect().await;

        let _: () = redis::pipe()
            .cmd("SET")
            .arg("name")
            .arg("kvlog")
            .ignore()
            .cmd("SET")
            .arg("name")
            .arg("kvlog2")
            .ignore()
            .cmd("HSET")
            .arg("user:1")
            .arg("email")
            .arg("a@b.c")
            .ignore()
            .cmd("GET")
            .arg("name")
            .ignore()
            .query_async(&mut con)
            .await
            .unwrap();

        server.stop().await;
    }

    let server = TestServer::start(&dir).await;
    let mut con = server.connect().await;

    let name: Option<String> = redis::cmd("GET")
        .arg("name")
        .query_async(&mut con)
        .await
        .unwrap();
    let email: Option<String> = redis::cmd("HGET")
        .arg("user:1")
        .arg("email")
        .query_async(&mut con)
        .await
        .unwrap();

    assert_eq!(name, Some("kvlog2".to_string()));
    assert_eq!(email, Some("a@b.c".to_string()));

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_clients() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(&dir).await;

    let mut tasks = Vec::new();
    for client in 0..8 {
        let mut con = server.connect().await;
        tasks.push(tokio::spawn(async move {
            for i in 0..20 {
                let key = format!("client{}:{}", client, i);
                let _: () = redis::cmd("SET")
                    .arg(&key)
                    .arg(i)
                    .query_async(&mut con)
                    .await
                    .unwrap();
                let value: Option<String> =
                    redis::cmd("GET").arg(&key).query_async(&mut con).await.unwrap();
                assert_eq!(value, Some(i.to_string()));
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(server.db.store.len(), 160);

    server.stop().await;
}

#[tokio::test]
async fn test_protocol_error_drops_only_that_connection() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(&dir).await;
    let mut healthy = server.connect().await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b":12\r\n").await.unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    let reply = String::from_utf8(reply).unwrap();

    assert!(reply.starts_with("-ERR Protocol error"), "{reply}");
    assert!(reply.ends_with("\r\n"));

    let pong: String = redis::cmd("PING").query_async(&mut healthy).await.unwrap();
    assert_eq!(pong, "PONG");

    server.stop().await;
}

#[tokio::test]
async fn test_deeply_nested_request_drops_only_that_connection() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(&dir).await;
    let mut healthy = server.connect().await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    // Exactly one level too many, so the server has read everything when it hangs up.
    stream
        .write_all(&b"*1\r\n".repeat(MAX_ARRAY_DEPTH + 1))
        .await
        .unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    let reply = String::from_utf8(reply).unwrap();

    assert!(reply.starts_with("-ERR Protocol error"), "{reply}");

    let pong: String = redis::cmd("PING").query_async(&mut healthy).await.unwrap();
    assert_eq!(pong, "PONG");

    server.stop().await;
}

#[tokio::test]
async fn test_binary_keys() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(&dir).await;
    let mut con = server.connect().await;

    let key: &[u8] = b"\xff\xfe\r\n";
    let _: () = redis::cmd("SET")
        .arg(key)
        .arg("v")
        .query_async(&mut con)
        .await
        .unwrap();
    let _: () = redis::cmd("HSET")
        .arg(key)
        .arg(key)
        .arg("w")
        .query_async(&mut con)
        .await
        .unwrap();

    let value: Vec<u8> = redis::cmd("GET").arg(key).query_async(&mut con).await.unwrap();
    let field: Vec<u8> = redis::cmd("HGET")
        .arg(key)
        .arg(key)
        .query_async(&mut con)
        .await
        .unwrap();

    assert_eq!(value, b"v");
    assert_eq!(field, b"w");

    server.stop().await;
}

#[tokio::test]
async fn test_raw_wire_replies() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(&dir).await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();

    let exchanges: [(&[u8], &[u8]); 4] = [
        (&b"*1\r\n$4\r\nPING\r\n"[..], &b"+PONG\r\n"[..]),
        (&b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$2\r\n\r\n\r\n"[..], &b"+OK\r\n"[..]),
        (&b"*2\r\n$3\r\nget\r\n$1\r\nk\r\n"[..], &b"$2\r\n\r\n\r\n"[..]),
        (&b"*2\r\n$3\r\nGET\r\n$1\r\nx\r\n"[..], &b"$-1\r\n"[..]),
    ];

    for (request, expected) in exchanges {
        stream.write_all(request).await.unwrap();

        let mut reply = vec![0; expected.len()];
        stream.read_exact(&mut reply).await.unwrap();

        assert_eq!(reply, expected);
    }

    server.stop().await;
}
