use crate::cli::ServerConfig;
use crate::server::handler::Server;
use minkv_types::protocol::{self, HEADER_SIZE, MAX_MSG_SIZE};
use minkv_types::reply::Reply;
use once_cell::sync::Lazy;
use pretty_assertions::assert_eq;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Duration, sleep, timeout};
use tokio_util::sync::CancellationToken;

static CONFIG: Lazy<ServerConfig> = Lazy::new(|| {
    ServerConfig::default()
        .os_select_port()
        .host(String::from("127.0.0.1"))
});

static CONFIG_WITH_MAX_CLIENTS: Lazy<ServerConfig> = Lazy::new(|| {
    ServerConfig::default()
        .os_select_port()
        .host(String::from("127.0.0.1"))
        .maximum_clients(2)
});

/// Boots a server on its own single-threaded runtime, the same shape the
/// binary runs in production, and hands back the bound address.
fn start_server(config: ServerConfig) -> (SocketAddr, CancellationToken) {
    let server = Server::new(&config).expect("Could not initialize server");
    let address = server.local_addr().expect("Could not get local addr");
    let cancellation_token = server.cancellation_token();
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("Could not build server runtime");
        runtime.block_on(server.start())
    });
    (address, cancellation_token)
}

async fn send_query(stream: &mut TcpStream, args: &[&str]) {
    let frame = protocol::encode_request(args).expect("request within frame limits");
    stream.write_all(&frame).await.expect("request written");
}

async fn read_reply(stream: &mut TcpStream) -> Reply {
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).await.expect("reply header");
    let len = u32::from_le_bytes(header) as usize;
    assert!(len <= MAX_MSG_SIZE, "reply exceeds the frame cap");
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.expect("reply payload");
    let (reply, consumed) = Reply::decode(&payload).expect("decodable reply");
    assert_eq!(consumed, payload.len(), "reply decoding must consume the frame");
    reply
}

async fn query(stream: &mut TcpStream, args: &[&str]) -> Reply {
    send_query(stream, args).await;
    read_reply(stream).await
}

/// True once the peer has closed the connection (clean EOF or reset).
async fn connection_closed(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 1];
    match timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
        Ok(Ok(0)) => true,
        Ok(Ok(_)) => false,
        Ok(Err(_)) => true,
        Err(_) => false,
    }
}

#[tokio::test]
async fn test_string_commands_end_to_end() {
    let (address, cancellation_token) = start_server(CONFIG.clone());
    let mut stream = TcpStream::connect(address).await.expect("connect");

    assert_eq!(query(&mut stream, &["set", "k", "v"]).await, Reply::str("OK"));
    assert_eq!(query(&mut stream, &["get", "k"]).await, Reply::str("v"));
    assert_eq!(query(&mut stream, &["get", "missing"]).await, Reply::Nil);
    assert_eq!(query(&mut stream, &["del", "k"]).await, Reply::Int(1));
    assert_eq!(query(&mut stream, &["del", "k"]).await, Reply::Int(0));
    assert_eq!(query(&mut stream, &["get", "k"]).await, Reply::Nil);

    cancellation_token.cancel();
}

#[tokio::test]
async fn test_sorted_set_commands_end_to_end() {
    let (address, cancellation_token) = start_server(CONFIG.clone());
    let mut stream = TcpStream::connect(address).await.expect("connect");

    assert_eq!(
        query(&mut stream, &["zadd", "z", "1.5", "a", "2.5", "b"]).await,
        Reply::Int(2)
    );
    assert_eq!(query(&mut stream, &["zscore", "z", "a"]).await, Reply::Dbl(1.5));
    assert_eq!(
        query(&mut stream, &["zrange", "z", "0", "-1", "WITHSCORES"]).await,
        Reply::Arr(vec![
            Reply::str("a"),
            Reply::Dbl(1.5),
            Reply::str("b"),
            Reply::Dbl(2.5),
        ])
    );
    // wrong-type access carries the error code and message
    assert_eq!(
        query(&mut stream, &["get", "z"]).await,
        Reply::Err {
            code: 1,
            message: String::from("Expecting string type"),
        }
    );

    cancellation_token.cancel();
}

#[tokio::test]
async fn test_semantic_error_keeps_connection_open() {
    let (address, cancellation_token) = start_server(CONFIG.clone());
    let mut stream = TcpStream::connect(address).await.expect("connect");

    assert_eq!(
        query(&mut stream, &["zadd", "z", "forty", "a"]).await,
        Reply::err("value is not a valid float")
    );
    assert_eq!(
        query(&mut stream, &["bogus"]).await,
        Reply::err("Unknown command or wrong number of arguments")
    );
    // the connection is still in its read state and keeps serving
    assert_eq!(query(&mut stream, &["set", "k", "v"]).await, Reply::str("OK"));
    assert_eq!(query(&mut stream, &["get", "k"]).await, Reply::str("v"));

    cancellation_token.cancel();
}

#[tokio::test]
async fn test_oversize_frame_closes_connection() {
    let (address, cancellation_token) = start_server(CONFIG.clone());
    let mut stream = TcpStream::connect(address).await.expect("connect");

    let declared = (MAX_MSG_SIZE as u32) + 1;
    stream
        .write_all(&declared.to_le_bytes())
        .await
        .expect("oversize header written");
    // the server may already be closing; the trailing bytes are best effort
    let _ = stream.write_all(&[0u8; 32]).await;
    assert!(connection_closed(&mut stream).await);

    cancellation_token.cancel();
}

#[tokio::test]
async fn test_malformed_frame_closes_connection() {
    let (address, cancellation_token) = start_server(CONFIG.clone());
    let mut stream = TcpStream::connect(address).await.expect("connect");

    // one argument of one byte, then a trailing byte the parser must reject
    let payload: Vec<u8> = [
        &1u32.to_le_bytes()[..],
        &1u32.to_le_bytes()[..],
        b"x",
        &[0u8],
    ]
    .concat();
    let mut frame = (payload.len() as u32).to_le_bytes().to_vec();
    frame.extend(&payload);
    stream.write_all(&frame).await.expect("frame written");
    assert!(connection_closed(&mut stream).await);

    cancellation_token.cancel();
}

#[tokio::test]
async fn test_pipelined_frames_are_answered_in_order() {
    let (address, cancellation_token) = start_server(CONFIG.clone());
    let mut stream = TcpStream::connect(address).await.expect("connect");

    let mut batch = protocol::encode_request(&["set", "a", "1"]).expect("frame");
    batch.extend(protocol::encode_request(&["set", "b", "2"]).expect("frame"));
    batch.extend(protocol::encode_request(&["get", "a"]).expect("frame"));
    stream.write_all(&batch).await.expect("batch written");

    assert_eq!(read_reply(&mut stream).await, Reply::str("OK"));
    assert_eq!(read_reply(&mut stream).await, Reply::str("OK"));
    assert_eq!(read_reply(&mut stream).await, Reply::str("1"));

    cancellation_token.cancel();
}

#[tokio::test]
async fn test_request_split_across_writes_is_buffered() {
    let (address, cancellation_token) = start_server(CONFIG.clone());
    let mut stream = TcpStream::connect(address).await.expect("connect");

    let frame = protocol::encode_request(&["set", "slow", "v"]).expect("frame");
    let (head, tail) = frame.split_at(3);
    stream.write_all(head).await.expect("first chunk written");
    sleep(Duration::from_millis(50)).await;
    stream.write_all(tail).await.expect("second chunk written");
    assert_eq!(read_reply(&mut stream).await, Reply::str("OK"));

    cancellation_token.cancel();
}

#[tokio::test]
async fn test_maximum_client_restriction_works() {
    let (address, cancellation_token) = start_server(CONFIG_WITH_MAX_CLIENTS.clone());
    let mut first = TcpStream::connect(address).await.expect("first connect");
    let mut second = TcpStream::connect(address).await.expect("second connect");
    // make sure both connections have been accepted and registered
    assert_eq!(query(&mut second, &["keys"]).await, Reply::Arr(Vec::new()));

    let mut third = TcpStream::connect(address).await.expect("third connect");
    assert!(connection_closed(&mut third).await);

    // the earlier connections still serve requests
    assert_eq!(query(&mut first, &["set", "k", "v"]).await, Reply::str("OK"));

    // a freed slot becomes usable again
    drop(first);
    // allow the server loop to observe the close and deregister
    sleep(Duration::from_millis(100)).await;
    assert_eq!(query(&mut second, &["get", "k"]).await, Reply::str("v"));
    let mut fourth = TcpStream::connect(address).await.expect("fourth connect");
    assert_eq!(query(&mut fourth, &["get", "k"]).await, Reply::str("v"));

    cancellation_token.cancel();
}

#[tokio::test]
async fn test_cancellation_tears_down_connections() {
    let (address, cancellation_token) = start_server(CONFIG.clone());
    let mut stream = TcpStream::connect(address).await.expect("connect");
    assert_eq!(query(&mut stream, &["set", "k", "v"]).await, Reply::str("OK"));

    cancellation_token.cancel();
    assert!(connection_closed(&mut stream).await);
}
