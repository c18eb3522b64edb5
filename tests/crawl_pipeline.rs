//! Integration tests for sequence discovery against a mock Graph API.

use std::time::Duration;

use seqacquire::client::ApiClient;
use seqacquire::crawler::{crawl_user_sequences, list_sequence_images, CrawlOptions, SequenceBucket};
use seqacquire::writer::{RunHeader, SequenceWriter};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// 2024-01-01T10:00:00Z, 2024-01-02T10:00:00Z
const JAN_1: i64 = 1_704_103_200_000;
const JAN_2: i64 = 1_704_189_600_000;
const HOUR: i64 = 3_600_000;

fn client(server: &MockServer) -> ApiClient {
    ApiClient::with_base_url(&server.uri(), "test-token", Duration::from_secs(5))
        .expect("client")
}

fn options() -> CrawlOptions {
    CrawlOptions {
        page_delay: Duration::ZERO,
        ..Default::default()
    }
}

fn image(id: &str, sequence: &str, captured_at: i64, camera: &str) -> Value {
    json!({
        "id": id,
        "sequence": sequence,
        "captured_at": captured_at,
        "camera_type": camera,
        "creator": {"username": "walker", "id": "1"}
    })
}

fn page(data: Vec<Value>, next: Option<String>) -> Value {
    match next {
        Some(next) => json!({"data": data, "paging": {"next": next}}),
        None => json!({"data": data}),
    }
}

async fn mount_first_page(server: &MockServer, body: Value) {
    Mock::given(method("GET"))
        .and(path("/images"))
        .and(query_param("creator_username", "walker"))
        .and(header("Authorization", "OAuth test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_cursor(server: &MockServer, cursor: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(format!("/cursor/{}", cursor)))
        .respond_with(response)
        .mount(server)
        .await;
}

fn cursor_url(server: &MockServer, cursor: &str) -> Option<String> {
    Some(format!("{}/cursor/{}", server.uri(), cursor))
}

#[tokio::test]
async fn test_three_pages_produce_unmerged_date_blocks() {
    let server = MockServer::start().await;
    mount_first_page(
        &server,
        page(
            vec![
                image("1", "seqA", JAN_1, "perspective"),
                image("2", "seqB", JAN_1 + HOUR, "perspective"),
            ],
            cursor_url(&server, "2"),
        ),
    )
    .await;
    mount_cursor(
        &server,
        "2",
        ResponseTemplate::new(200).set_body_json(page(
            vec![image("3", "seqC", JAN_2, "perspective")],
            cursor_url(&server, "3"),
        )),
    )
    .await;
    mount_cursor(
        &server,
        "3",
        ResponseTemplate::new(200).set_body_json(page(
            vec![image("4", "seqD", JAN_1 + 2 * HOUR, "perspective")],
            None,
        )),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("sequences_walker.txt");
    let header = RunHeader {
        username: "walker".into(),
        started_at: chrono::Local::now().naive_local(),
        max_pages: None,
        camera_type: None,
        filter_name: "all".into(),
    };
    let mut writer = SequenceWriter::create(&output, &header).unwrap();

    let outcome = crawl_user_sequences(&client(&server), "walker", &options(), &mut writer)
        .await
        .unwrap();
    writer.finish(&outcome).unwrap();

    assert_eq!(outcome.pages, 3);
    assert_eq!(outcome.sequence_count(), 4);
    assert_eq!(outcome.buckets_flushed, 3);
    assert!(outcome.aborted.is_none());

    let content = std::fs::read_to_string(&output).unwrap();
    let body = content.split_once("# Filter Type: all\n\n").unwrap().1;
    assert_eq!(
        body,
        "# 20240101\nseqB\nseqA\n\n\
         # 20240102\nseqC\n\n\
         # 20240101\nseqD\n\n\
         # Total: 4 sequences, 4 images, 3 pages\n"
    );
}

#[tokio::test]
async fn test_page_error_keeps_flushed_buckets_and_stops() {
    let server = MockServer::start().await;
    mount_first_page(
        &server,
        page(
            vec![
                image("1", "seqA", JAN_1, "spherical"),
                image("2", "seqB", JAN_2, "spherical"),
            ],
            cursor_url(&server, "2"),
        ),
    )
    .await;
    mount_cursor(&server, "2", ResponseTemplate::new(500)).await;
    Mock::given(path("/cursor/3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(vec![], None)))
        .expect(0)
        .mount(&server)
        .await;

    let mut buckets: Vec<SequenceBucket> = Vec::new();
    let outcome = crawl_user_sequences(&client(&server), "walker", &options(), &mut buckets)
        .await
        .unwrap();

    assert_eq!(outcome.pages, 1);
    assert!(outcome.aborted.as_deref().unwrap().contains("500"));
    // The boundary flush plus the open bucket flushed on abort.
    let dates: Vec<&str> = buckets.iter().map(|b| b.date.as_str()).collect();
    assert_eq!(dates, vec!["20240101", "20240102"]);
    assert_eq!(outcome.sequence_count(), 2);
}

#[tokio::test]
async fn test_malformed_page_aborts() {
    let server = MockServer::start().await;
    Mock::given(path("/images"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let mut buckets: Vec<SequenceBucket> = Vec::new();
    let outcome = crawl_user_sequences(&client(&server), "walker", &options(), &mut buckets)
        .await
        .unwrap();

    assert_eq!(outcome.pages, 0);
    assert!(outcome.aborted.is_some());
    assert!(buckets.is_empty());
}

#[tokio::test]
async fn test_camera_filter_and_undated_records() {
    let server = MockServer::start().await;
    mount_first_page(
        &server,
        page(
            vec![
                image("1", "pano", JAN_1, "Spherical"),
                image("2", "flat", JAN_1, "perspective"),
                json!({"id": "3", "sequence": "nocam", "captured_at": JAN_1}),
                json!({"id": "4", "sequence": "undated", "camera_type": "spherical"}),
                json!({"id": "5", "camera_type": "spherical", "captured_at": JAN_1}),
            ],
            None,
        ),
    )
    .await;

    let mut opts = options();
    opts.camera_type = Some("SPHERICAL".into());
    let mut buckets: Vec<SequenceBucket> = Vec::new();
    let outcome = crawl_user_sequences(&client(&server), "walker", &opts, &mut buckets)
        .await
        .unwrap();

    assert_eq!(outcome.images_seen, 5);
    assert_eq!(outcome.images_matched, 3);
    // Undated sequences are counted but never bucketed.
    assert_eq!(outcome.sequence_count(), 2);
    assert_eq!(outcome.sequences["undated"].latest, None);
    assert_eq!(outcome.sequences["undated"].images, 1);
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].sorted_sequences(), vec!["pano"]);
}

#[tokio::test]
async fn test_page_cap_stops_before_next_page() {
    let server = MockServer::start().await;
    mount_first_page(
        &server,
        page(
            vec![image("1", "seqA", JAN_1, "perspective")],
            cursor_url(&server, "2"),
        ),
    )
    .await;
    Mock::given(path("/cursor/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(vec![], None)))
        .expect(0)
        .mount(&server)
        .await;

    let mut opts = options();
    opts.max_pages = Some(1);
    let mut buckets: Vec<SequenceBucket> = Vec::new();
    let outcome = crawl_user_sequences(&client(&server), "walker", &opts, &mut buckets)
        .await
        .unwrap();

    assert_eq!(outcome.pages, 1);
    assert!(outcome.aborted.is_none());
    assert_eq!(buckets.len(), 1);
}

#[tokio::test]
async fn test_list_mode_follows_cursor() {
    let server = MockServer::start().await;
    Mock::given(path("/image_ids"))
        .and(query_param("sequence_id", "seqA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![json!({"id": "1"}), json!({"id": 2})],
            cursor_url(&server, "ids2"),
        )))
        .mount(&server)
        .await;
    mount_cursor(
        &server,
        "ids2",
        ResponseTemplate::new(200).set_body_json(page(vec![json!({"id": "3"})], None)),
    )
    .await;

    let ids = list_sequence_images(&client(&server), "seqA").await.unwrap();
    assert_eq!(ids, vec!["1", "2", "3"]);
}
