//! Tests for result set retrieval against a scripted server
//!
//! The server side asserts the exact export commands the client sends, so
//! these tests pin down batch sizes, binary negotiation and result set
//! cleanup.

mod common;

use std::num::NonZeroUsize;

use common::{config, connect, int_block, int_table, BINARY_CHALLENGE, CHALLENGE};
use monetdb_rs::{BinaryMode, Error, ExecuteResult, FetchPolicy, ResultSetInfo};

fn result_set(outcome: ExecuteResult) -> ResultSetInfo {
    match outcome {
        ExecuteResult::ResultSet(info) => info,
        other => panic!("expected a result set, got {:?}", other),
    }
}

/// Binary batch of int values `first..first + count` with its trailer
fn int_binary(first: i32, count: i32) -> Vec<u8> {
    let mut data = Vec::new();
    for value in first..first + count {
        data.extend_from_slice(&value.to_le_bytes());
    }
    data.extend_from_slice(&0i64.to_le_bytes());
    data.extend_from_slice(&(count as i64 * 4).to_le_bytes());
    data
}

#[tokio::test]
async fn test_fetch_one_past_initial_reply_requests_one_window() {
    let (conn, server) = connect(config(), |mut server| async move {
        server.login(CHALLENGE).await;
        server
            .expect("sSELECT n FROM t\n;", &int_table(7, 1000, 100))
            .await;
        server.expect("Xexport 7 100 200", &int_block(7, 100, 200)).await;
        server.expect("Xclose 7", "").await;
    })
    .await;

    let rs = result_set(conn.execute("SELECT n FROM t").await.unwrap());
    assert_eq!(rs.id, 7);
    assert_eq!(rs.row_count, 1000);
    assert_eq!(rs.rows_in_reply, 100);
    assert_eq!(rs.columns[0].name, "n");

    for expected in 0..101 {
        let row = conn.fetch_one(rs.id).await.unwrap().unwrap();
        assert_eq!(row.get_i64(0), Some(expected));
    }
    assert_eq!(conn.rows_remaining(rs.id).await.unwrap(), 899);

    conn.close_result(rs.id).await.unwrap();
    server.await.unwrap();
    assert!(matches!(
        conn.fetch_one(rs.id).await,
        Err(Error::ResultSetClosed(7))
    ));
}

#[tokio::test]
async fn test_fetch_many_aligns_to_stride() {
    let (conn, server) = connect(config(), |mut server| async move {
        server.login(CHALLENGE).await;
        server.expect("sSELECT n FROM t\n;", &int_table(7, 1000, 100)).await;
        server.expect("Xexport 7 100 220", &int_block(7, 100, 220)).await;
    })
    .await;

    let rs = result_set(conn.execute("SELECT n FROM t").await.unwrap());
    assert_eq!(conn.fetch_many(rs.id, 40).await.unwrap().len(), 40);
    assert_eq!(conn.fetch_many(rs.id, 40).await.unwrap().len(), 40);
    let rows = conn.fetch_many(rs.id, 40).await.unwrap();
    assert_eq!(rows.len(), 40);
    assert_eq!(rows[0].get_i64(0), Some(80));
    assert_eq!(rows[39].get_i64(0), Some(119));
    server.await.unwrap();
}

#[tokio::test]
async fn test_fetch_all_requests_remainder_and_skips_close() {
    let (conn, server) = connect(config(), |mut server| async move {
        server.login(CHALLENGE).await;
        server.expect("sSELECT n FROM t\n;", &int_table(3, 250, 100)).await;
        server.expect("Xexport 3 100 150", &int_block(3, 100, 150)).await;
        // nothing else arrives before the client hangs up
        assert!(server.stream.read_message().await.is_err());
    })
    .await;

    let rs = result_set(conn.execute("SELECT n FROM t").await.unwrap());
    conn.fetch_one(rs.id).await.unwrap();
    let rows = conn.fetch_all(rs.id).await.unwrap();
    assert_eq!(rows.len(), 249);
    assert_eq!(rows.last().unwrap().get_i64(0), Some(249));
    assert!(conn.fetch_one(rs.id).await.unwrap().is_none());

    conn.close_result(rs.id).await.unwrap();
    conn.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_query_materializes_all_rows() {
    let (conn, server) = connect(config(), |mut server| async move {
        server.login(CHALLENGE).await;
        server.expect("sSELECT n FROM t\n;", &int_table(3, 250, 100)).await;
        server.expect("Xexport 3 100 150", &int_block(3, 100, 150)).await;
        server.expect("sINSERT INTO t VALUES (1)\n;", "&2 1 -1\n").await;
    })
    .await;

    let result = conn.query("SELECT n FROM t").await.unwrap();
    assert_eq!(result.row_count(), 250);
    assert_eq!(result.column_index("N"), Some(0));
    assert!(conn.open_result_sets().await.is_empty());

    let result = conn.query("INSERT INTO t VALUES (1)").await.unwrap();
    assert_eq!(result.rows_affected, 1);
    assert_eq!(result.last_id, None);
    assert!(result.is_empty());
    server.await.unwrap();
}

#[tokio::test]
async fn test_fetch_next_batch_uses_arraysize() {
    let (conn, server) = connect(config(), |mut server| async move {
        server.login(CHALLENGE).await;
        server.expect("sSELECT n FROM t\n;", &int_table(5, 30, 30)).await;
    })
    .await;

    conn.set_arraysize(NonZeroUsize::new(12).unwrap()).await;
    let rs = result_set(conn.execute("SELECT n FROM t").await.unwrap());
    assert_eq!(conn.fetch_next_batch(rs.id).await.unwrap().len(), 12);
    conn.set_result_arraysize(rs.id, NonZeroUsize::new(7).unwrap())
        .await
        .unwrap();
    assert_eq!(conn.fetch_next_batch(rs.id).await.unwrap().len(), 7);
    assert_eq!(conn.fetch_next_batch(rs.id).await.unwrap().len(), 11);
    assert!(conn.fetch_next_batch(rs.id).await.unwrap().is_empty());
    server.await.unwrap();
}

#[tokio::test]
async fn test_reply_size_follows_policy() {
    let (conn, server) = connect(config(), |mut server| async move {
        server.login(CHALLENGE).await;
        server.expect("Xreply_size 5", "").await;
        server.expect("sSELECT 1\n;", "&3\n").await;
        // unchanged, nothing to send
        server.expect("sSELECT 2\n;", "&3\n").await;
        server.expect("Xreply_size -1", "").await;
        server.expect("sSELECT 3\n;", "&3\n").await;
        // replysize 0 goes out as is
        server.expect("Xreply_size 0", "").await;
        server.expect("sSELECT n FROM t\n;", &int_table(4, 20, 3)).await;
    })
    .await;

    conn.set_replysize(5).await;
    assert_eq!(conn.execute("SELECT 1").await.unwrap(), ExecuteResult::Schema);
    conn.execute("SELECT 2").await.unwrap();

    let all = FetchPolicy::default().replysize(-1).binary(BinaryMode::Off);
    conn.execute_with("SELECT 3", &all).await.unwrap();

    let server_defined = FetchPolicy::default().replysize(0);
    let rs = result_set(
        conn.execute_with("SELECT n FROM t", &server_defined)
            .await
            .unwrap(),
    );
    assert_eq!(rs.rows_in_reply, 3);
    assert_eq!(conn.fetch_policy().await.replysize, 5);
    server.await.unwrap();
}

#[tokio::test]
async fn test_binary_batches() {
    let (conn, server) = connect(config(), |mut server| async move {
        server.login(BINARY_CHALLENGE).await;
        server.expect("sSELECT n FROM t\n;", &int_table(9, 150, 100)).await;
        assert_eq!(server.recv().await, "Xexportbin 9 100 50");
        server.send_bytes(&int_binary(100, 50)).await;
        assert!(server.stream.read_message().await.is_err());
    })
    .await;

    assert!(conn.server_info().await.capabilities.supports_binary());
    let rs = result_set(conn.execute("SELECT n FROM t").await.unwrap());
    assert_eq!(conn.fetch_many(rs.id, 100).await.unwrap().len(), 100);
    assert!(!conn.last_batch_binary(rs.id).await.unwrap());

    let row = conn.fetch_one(rs.id).await.unwrap().unwrap();
    assert_eq!(row.get_i64(0), Some(100));
    assert!(conn.last_batch_binary(rs.id).await.unwrap());
    let rest = conn.fetch_all(rs.id).await.unwrap();
    assert_eq!(rest.len(), 49);
    assert_eq!(rest[48].get_i64(0), Some(149));

    // every row arrived, so closing needs no round trip
    conn.close_result(rs.id).await.unwrap();
    conn.close().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_binary_request_answered_with_text() {
    let (conn, server) = connect(config(), |mut server| async move {
        server.login(BINARY_CHALLENGE).await;
        server.expect("sSELECT n FROM t\n;", &int_table(9, 150, 100)).await;
        server
            .expect("Xexportbin 9 100 50", &int_block(9, 100, 50))
            .await;
    })
    .await;

    let rs = result_set(conn.execute("SELECT n FROM t").await.unwrap());
    conn.fetch_many(rs.id, 100).await.unwrap();
    let row = conn.fetch_one(rs.id).await.unwrap().unwrap();
    assert_eq!(row.get_i64(0), Some(100));
    assert!(!conn.last_batch_binary(rs.id).await.unwrap());
    server.await.unwrap();
}

#[tokio::test]
async fn test_binary_off_uses_text_export() {
    let config = config().binary(BinaryMode::Off);
    let (conn, server) = connect(config, |mut server| async move {
        server.login(BINARY_CHALLENGE).await;
        server.expect("sSELECT n FROM t\n;", &int_table(9, 150, 100)).await;
        server.expect("Xexport 9 100 50", &int_block(9, 100, 50)).await;
    })
    .await;

    assert!(!conn.server_info().await.capabilities.supports_binary());
    let rs = result_set(conn.execute("SELECT n FROM t").await.unwrap());
    assert_eq!(conn.fetch_all(rs.id).await.unwrap().len(), 150);
    server.await.unwrap();
}

#[tokio::test]
async fn test_unlimited_reply_size_with_binary() {
    let config = config().replysize(-1);
    let (conn, server) = connect(config, |mut server| async move {
        let response = server.login(BINARY_CHALLENGE).await;
        assert!(response.contains("reply_size=10,"), "{}", response);
        server.expect("sSELECT n FROM t\n;", &int_table(9, 5000, 10)).await;
        assert_eq!(server.recv().await, "Xexportbin 9 10 4990");
        server.send_bytes(&int_binary(10, 4990)).await;
    })
    .await;

    let rs = result_set(conn.execute("SELECT n FROM t").await.unwrap());
    conn.fetch_many(rs.id, 10).await.unwrap();
    let rows = conn.fetch_many(rs.id, 2).await.unwrap();
    assert_eq!(rows[1].get_i64(0), Some(11));
    assert_eq!(conn.rows_remaining(rs.id).await.unwrap(), 4988);
    server.await.unwrap();
}

#[tokio::test]
async fn test_next_result_walks_queued_results() {
    let (conn, server) = connect(config(), |mut server| async move {
        server.login(CHALLENGE).await;
        let reply = format!("&2 2 -1\n{}&4 f\n", int_table(4, 50, 10));
        server.expect("sINSERT ...; SELECT ...; START TRANSACTION\n;", &reply).await;
        // the open result set is closed when moving on
        server.expect("Xclose 4", "").await;
    })
    .await;

    let first = conn
        .execute("INSERT ...; SELECT ...; START TRANSACTION")
        .await
        .unwrap();
    assert_eq!(
        first,
        ExecuteResult::Update {
            affected: 2,
            last_id: None
        }
    );

    let rs = result_set(conn.next_result().await.unwrap().unwrap());
    assert_eq!(rs.id, 4);
    assert_eq!(conn.fetch_one(4).await.unwrap().unwrap().get_i64(0), Some(0));

    assert_eq!(
        conn.next_result().await.unwrap(),
        Some(ExecuteResult::Transaction { autocommit: false })
    );
    assert!(conn.open_result_sets().await.is_empty());
    assert_eq!(conn.next_result().await.unwrap(), None);
    server.await.unwrap();
}

#[tokio::test]
async fn test_new_query_discards_queued_results() {
    let (conn, server) = connect(config(), |mut server| async move {
        server.login(CHALLENGE).await;
        let reply = format!("&3\n{}{}", int_table(4, 50, 10), int_table(5, 3, 3));
        server.expect("sSELECT a; SELECT b; SELECT c\n;", &reply).await;
        server.expect("Xclose 4", "").await;
        server.expect("sSELECT 1\n;", "&3\n").await;
    })
    .await;

    assert_eq!(
        conn.execute("SELECT a; SELECT b; SELECT c").await.unwrap(),
        ExecuteResult::Schema
    );
    conn.execute("SELECT 1").await.unwrap();
    assert_eq!(conn.next_result().await.unwrap(), None);
    server.await.unwrap();
}

/// `&1` reply for one `varchar` column `s` whose first `rows` of `total`
/// values are `v0, v1, ...`
fn varchar_table(id: u64, total: u64, rows: u64) -> String {
    let mut text = format!(
        "&1 {} {} 1 {}\n% sys.t # table_name\n% s # name\n% varchar # type\n% 5 # length\n% 5 0 # typesizes\n",
        id, total, rows
    );
    for i in 0..rows {
        text.push_str(&format!("[ \"v{}\"\t]\n", i));
    }
    text
}

/// Binary batch of one string column in `endian` byte order
fn string_binary(values: &[&str], big_endian: bool) -> Vec<u8> {
    let mut data = Vec::new();
    for value in values {
        data.extend_from_slice(value.as_bytes());
        data.push(0);
    }
    let (start, length) = (0i64, data.len() as i64);
    if big_endian {
        data.extend_from_slice(&start.to_be_bytes());
        data.extend_from_slice(&length.to_be_bytes());
    } else {
        data.extend_from_slice(&start.to_le_bytes());
        data.extend_from_slice(&length.to_le_bytes());
    }
    data
}

#[tokio::test]
async fn test_binary_batch_starting_with_error_marker() {
    let (conn, server) = connect(config(), |mut server| async move {
        server.login(BINARY_CHALLENGE).await;
        server.expect("sSELECT s FROM t\n;", &varchar_table(7, 101, 100)).await;
        assert_eq!(server.recv().await, "Xexportbin 7 100 1");
        server.send_bytes(&string_binary(&["!bang"], false)).await;
    })
    .await;

    let rs = result_set(conn.execute("SELECT s FROM t").await.unwrap());
    assert_eq!(conn.fetch_many(rs.id, 100).await.unwrap().len(), 100);
    let row = conn.fetch_one(rs.id).await.unwrap().unwrap();
    assert_eq!(row.get_string(0), Some("!bang"));
    assert!(conn.last_batch_binary(rs.id).await.unwrap());
    server.await.unwrap();
}

#[tokio::test]
async fn test_binary_batch_shaped_like_a_text_line() {
    // big endian: the trailer's last byte is the column length, here '\n'
    let challenge = "s4lt:mserver:9:SHA512:BIG:SHA512:sql=6:BINARY=1:";
    let (conn, server) = connect(config(), move |mut server| async move {
        server.login(challenge).await;
        server.expect("sSELECT s FROM t\n;", &varchar_table(7, 102, 100)).await;
        assert_eq!(server.recv().await, "Xexportbin 7 100 2");
        let batch = string_binary(&["!bang", "abc"], true);
        assert_eq!(batch.last(), Some(&b'\n'));
        server.send_bytes(&batch).await;
    })
    .await;

    let rs = result_set(conn.execute("SELECT s FROM t").await.unwrap());
    conn.fetch_many(rs.id, 100).await.unwrap();
    let rows = conn.fetch_all(rs.id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get_string(0), Some("!bang"));
    assert_eq!(rows[1].get_string(0), Some("abc"));
    server.await.unwrap();
}

#[tokio::test]
async fn test_binary_request_answered_with_error() {
    let (conn, server) = connect(config(), |mut server| async move {
        server.login(BINARY_CHALLENGE).await;
        server.expect("sSELECT s FROM t\n;", &varchar_table(7, 101, 100)).await;
        server
            .expect("Xexportbin 7 100 1", "!42000!export failed\n")
            .await;
    })
    .await;

    let rs = result_set(conn.execute("SELECT s FROM t").await.unwrap());
    conn.fetch_many(rs.id, 100).await.unwrap();
    let err = conn.fetch_one(rs.id).await.unwrap_err();
    assert!(matches!(err, Error::Server { .. }), "{:?}", err);
    assert!(!conn.is_closed());
    server.await.unwrap();
}

#[tokio::test]
async fn test_results_before_an_error_are_closed() {
    let (conn, server) = connect(config(), |mut server| async move {
        server.login(CHALLENGE).await;
        let reply = format!("{}!42000!syntax error in third statement\n", int_table(4, 50, 10));
        server.expect("sSELECT a; SELECT b; SELEC c\n;", &reply).await;
        server.expect("Xclose 4", "").await;
        server.expect("sSELECT 1\n;", "&3\n").await;
    })
    .await;

    let err = conn.execute("SELECT a; SELECT b; SELEC c").await.unwrap_err();
    assert_eq!(err.sqlstate(), Some("42000"));
    assert_eq!(conn.execute("SELECT 1").await.unwrap(), ExecuteResult::Schema);
    server.await.unwrap();
}

#[tokio::test]
async fn test_unconvertible_result_is_closed_on_teardown() {
    let (conn, server) = connect(config(), |mut server| async move {
        server.login(CHALLENGE).await;
        let reply = "&1 6 50 1 1\n% sys.t # table_name\n% n # name\n% int # type\n% 1 # length\n% 32 0 # typesizes\n[ seven\t]\n";
        server.expect("sSELECT n FROM t\n;", reply).await;
        server.expect("Xclose 6", "").await;
        assert!(server.stream.read_message().await.is_err());
    })
    .await;

    let err = conn.execute("SELECT n FROM t").await.unwrap_err();
    assert!(matches!(err, Error::DataConversion(_)), "{:?}", err);
    assert!(conn.open_result_sets().await.is_empty());
    conn.close().await.unwrap();
    server.await.unwrap();
}
