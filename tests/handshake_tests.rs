//! Tests for the login handshake against a scripted server
//!
//! These tests cover priming, the challenge/response exchange, redirects and
//! the session setup that follows login, without a MonetDB server.

mod common;

use std::time::Duration;

use common::{config, connect, pipe, MockServer, CHALLENGE};
use monetdb_rs::crypto::{credential_digest, prehash_password, HashAlgorithm};
use monetdb_rs::{Connection, ConnectionState, Error};

fn digest(salt: &str) -> String {
    let prehashed = prehash_password(HashAlgorithm::Sha512, "monetdb");
    credential_digest(HashAlgorithm::Sha512, &prehashed, salt)
}

#[tokio::test]
async fn test_login_sends_options_in_response() {
    let (conn, server) = connect(config(), |mut server| async move {
        let response = server.login(CHALLENGE).await;
        assert_eq!(
            response,
            format!(
                "BIG:monetdb:{}:sql:demo:FILETRANS:auto_commit=0,reply_size=100,size_header=1,time_zone=0:",
                digest("s4lt")
            )
        );
    })
    .await;
    server.await.unwrap();

    let info = conn.server_info().await;
    assert_eq!(info.server_type, "mserver");
    assert_eq!(info.hash_algorithm, "SHA512");
    assert_eq!(info.redirects, 0);
    assert_eq!(info.capabilities.options_level, 6);
    assert!(!info.capabilities.client_info);
    assert_eq!(conn.state().await, ConnectionState::Ready);

    conn.close().await.unwrap();
    assert!(conn.is_closed());
    // closing twice is a no-op
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_file_transfer_disabled_is_not_announced() {
    let config = config().file_transfer(false);
    let (conn, server) = connect(config, |mut server| async move {
        let response = server.login(CHALLENGE).await;
        assert_eq!(
            response,
            format!(
                "BIG:monetdb:{}:sql:demo::auto_commit=0,reply_size=100,size_header=1,time_zone=0:",
                digest("s4lt")
            )
        );
    })
    .await;
    server.await.unwrap();

    assert!(!conn.server_info().await.capabilities.file_transfer);
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_old_server_gets_options_after_login() {
    let (conn, server) = connect(config(), |mut server| async move {
        let response = server.login("s4lt:mserver:9:SHA512:LIT:SHA512:").await;
        assert!(response.ends_with(":sql:demo:"), "{}", response);
        assert!(!response.contains("FILETRANS"));

        server.expect("Xauto_commit 0", "").await;
        server.expect("Xreply_size 100", "").await;
        server.expect("Xsizeheader 1", "").await;
        server
            .expect("sSET TIME ZONE INTERVAL '+00:00' HOUR TO MINUTE\n;", "&3\n")
            .await;
    })
    .await;
    server.await.unwrap();
    assert!(!conn.server_info().await.capabilities.file_transfer);
}

#[tokio::test]
async fn test_partial_options_level() {
    let (_conn, server) = connect(config().timezone_minutes(90), |mut server| async move {
        let response = server
            .login("s4lt:mserver:9:SHA512:LIT:SHA512:sql=3:")
            .await;
        assert!(
            response.ends_with(":FILETRANS:auto_commit=0,reply_size=100:"),
            "{}",
            response
        );
        server.expect("Xsizeheader 1", "").await;
        server
            .expect("sSET TIME ZONE INTERVAL '+01:30' HOUR TO MINUTE\n;", "&3\n")
            .await;
    })
    .await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_proxy_redirect_logs_in_again() {
    let (conn, server) = connect(config(), |mut server| async move {
        server
            .send("pr0xy:merovingian:9:SHA512:LIT:SHA512:sql=6:")
            .await;
        let first = server.recv().await;
        assert!(first.contains(&digest("pr0xy")));
        server.send("^mapi:merovingian://proxy?database=demo\n").await;

        let second = server.login(CHALLENGE).await;
        assert!(second.contains(&digest("s4lt")));
    })
    .await;
    server.await.unwrap();
    assert_eq!(conn.server_info().await.redirects, 1);
}

#[tokio::test]
async fn test_too_many_redirects() {
    let (transport, io) = pipe();
    let server = tokio::spawn(async move {
        let (mut server, _) = MockServer::accept(io).await;
        for _ in 0..2 {
            server.send(CHALLENGE).await;
            server.recv().await;
            server.send("^mapi:merovingian://proxy\n").await;
        }
    });

    let result = Connection::connect_with_transport(transport, config().max_redirects(1)).await;
    assert!(matches!(result, Err(Error::TooManyRedirects(1))));
    server.await.unwrap();
}

#[tokio::test]
async fn test_server_redirect_reconnects() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let target = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (mut server, prime) = MockServer::accept(socket).await;
        assert_eq!(prime, vec![0, 0]);
        let response = server.login(CHALLENGE).await;
        assert!(response.contains(":sql:other:"), "{}", response);
    });

    let (conn, first) = connect(config(), move |mut server| async move {
        server.send(CHALLENGE).await;
        server.recv().await;
        server
            .send(&format!("^mapi:monetdb://127.0.0.1:{}/other\n", port))
            .await;
    })
    .await;
    first.await.unwrap();
    target.await.unwrap();

    let info = conn.server_info().await;
    assert_eq!(info.host, "127.0.0.1");
    assert_eq!(info.port, port);
    assert_eq!(info.database, "other");
    assert_eq!(info.redirects, 1);
}

#[tokio::test]
async fn test_rejected_credentials() {
    let (transport, io) = pipe();
    let server = tokio::spawn(async move {
        let (mut server, _) = MockServer::accept(io).await;
        server.send(CHALLENGE).await;
        server.recv().await;
        server
            .send("!InvalidCredentialsException:checkCredentials:invalid credentials for user 'monetdb'\n")
            .await;
    });

    let result = Connection::connect_with_transport(transport, config()).await;
    match result {
        Err(Error::AuthenticationFailed(message)) => {
            assert!(message.contains("invalid credentials"))
        }
        other => panic!("expected authentication failure, got {:?}", other.err()),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn test_no_supported_hash_algorithm() {
    let (transport, io) = pipe();
    let server = tokio::spawn(async move {
        let (mut server, _) = MockServer::accept(io).await;
        server
            .send("s4lt:mserver:9:RIPEMD160:LIT:SHA512:sql=6:")
            .await;
        // hold the pipe open until the client gives up
        let _ = server.stream.read_message().await;
    });

    let result = Connection::connect_with_transport(transport, config()).await;
    assert!(matches!(result, Err(Error::UnsupportedHashAlgorithms(_))));
    server.await.unwrap();
}

#[tokio::test]
async fn test_unsupported_protocol_version() {
    let (transport, io) = pipe();
    let server = tokio::spawn(async move {
        let (mut server, _) = MockServer::accept(io).await;
        server.send("s4lt:mserver:8:SHA512:LIT:SHA512:").await;
        let _ = server.stream.read_message().await;
    });

    let result = Connection::connect_with_transport(transport, config()).await;
    assert!(matches!(result, Err(Error::UnsupportedProtocol(v)) if v == "8"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_client_info_rejection_is_not_fatal() {
    let (conn, server) = connect(config().client_application("handshake-test"), |mut server| async move {
        server
            .login("s4lt:mserver:9:SHA512:LIT:SHA512:sql=6:CLIENTINFO:")
            .await;
        let info = server.recv().await;
        assert!(info.starts_with("Xclientinfo "));
        assert!(info.contains("ApplicationName=handshake-test\n"));
        assert!(info.contains("ClientLibrary=monetdb-rs "));
        server.send("!42000!client info not accepted\n").await;
    })
    .await;
    server.await.unwrap();
    assert!(conn.server_info().await.capabilities.client_info);
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn test_schema_is_set_after_login() {
    let (_conn, server) = connect(config().schema("we\"ird"), |mut server| async move {
        server.login(CHALLENGE).await;
        server.expect("sSET SCHEMA \"we\"\"ird\"\n;", "&3\n").await;
    })
    .await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_login_timeout() {
    let (transport, io) = pipe();
    let server = tokio::spawn(async move {
        let (_server, _) = MockServer::accept(io).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let config = config().connect_timeout(Duration::from_millis(100));
    let result = Connection::connect_with_transport(transport, config).await;
    assert!(matches!(result, Err(Error::ConnectionTimeout(_))));
    server.abort();
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_socket_prime() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".s.monetdb.50000");
    let listener = tokio::net::UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (mut server, prime) = MockServer::accept_primed(socket, 1).await;
        assert_eq!(prime, b"0".to_vec());
        server.login(CHALLENGE).await;
    });

    let config = monetdb_rs::Config::unix(&path, "demo", "monetdb", "monetdb").timezone_minutes(0);
    let conn = Connection::connect_with_config(config).await.unwrap();
    server.await.unwrap();
    assert_eq!(conn.state().await, ConnectionState::Ready);
}
