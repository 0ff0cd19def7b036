// tests/pipeline.rs

use md5::{Digest, Md5};
use purchase_mirror::config::FileConfig;
use purchase_mirror::prelude::*;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const BOOK: &[u8] = b"%PDF-1.4 a great book";

fn order(created: &str, bundle: &str, url: &str, size: usize, md5: &str) -> String {
    format!(
        r#"{{
            "created": "{created}",
            "product": {{"human_name": "{bundle}"}},
            "subproducts": [{{
                "human_name": "Great Book",
                "downloads": [{{
                    "machine_name": "greatbook_ebook",
                    "platform": "ebook",
                    "download_struct": [{{"url": {{"web": "{url}"}}, "file_size": {size}, "md5": "{md5}"}}]
                }}]
            }}]
        }}"#
    )
}

fn run_config(root: &Path) -> RunConfig {
    let file = FileConfig {
        session_cookie: "secret".into(),
        download_folder: root.to_path_buf(),
        retries: 0,
        retry_delay_secs: 0,
        ..FileConfig::default()
    };
    RunConfig::from_file_config(file, BTreeSet::from([Platform::Ebook])).unwrap()
}

async fn mirror(server: &mockito::ServerGuard, root: &Path) -> Result<RunSummary, ManagerError> {
    let config = run_config(root);
    let catalog = HumbleCatalog::new(&config.session_cookie, 2, false)
        .unwrap()
        .with_base_url(server.url());
    let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
    let inventory = Inventory::open(&config.inventory_path).await.unwrap();
    RunManager::new(
        config,
        Arc::new(transport),
        Some(inventory),
        CancellationToken::new(),
    )
    .mirror(&catalog)
    .await
}

#[tokio::test]
async fn shared_file_is_fetched_once_and_never_again() {
    let dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new_async().await;
    let url = format!("{}/files/book.pdf?t=1", server.url());
    let md5 = hex::encode(Md5::digest(BOOK));

    let _orders = server
        .mock("GET", "/api/v1/user/order")
        .match_query(mockito::Matcher::Any)
        .with_body(r#"[{"gamekey": "a"}, {"gamekey": "b"}]"#)
        .create_async()
        .await;
    let _a = server
        .mock("GET", "/api/v1/order/a")
        .match_query(mockito::Matcher::Any)
        .with_body(order("2020-01-01T08:00:00", "Bundle A", &url, BOOK.len(), &md5))
        .create_async()
        .await;
    let _b = server
        .mock("GET", "/api/v1/order/b")
        .match_query(mockito::Matcher::Any)
        .with_body(order("2020-06-01T08:00:00", "Bundle B", &url, BOOK.len(), &md5))
        .create_async()
        .await;
    let download = server
        .mock("GET", "/files/book.pdf")
        .match_query(mockito::Matcher::Any)
        .with_body(BOOK)
        .expect(1)
        .create_async()
        .await;

    let first = mirror(&server, dir.path()).await.unwrap();
    assert_eq!(first.downloaded, 1);
    assert_eq!(first.bytes_downloaded, BOOK.len() as u64);
    assert!(first.is_success());

    let placed = dir.path().join("ebook/2020-01-01-bundle-a/great-book/book.pdf");
    assert_eq!(tokio::fs::read(&placed).await.unwrap(), BOOK.to_vec());
    assert!(!dir.path().join("ebook/2020-06-01-bundle-b").exists());
    assert!(!dir.path().join("ebook/2020-01-01-bundle-a/great-book/book.pdf.part").exists());

    let second = mirror(&server, dir.path()).await.unwrap();
    assert_eq!(second.downloaded, 0);
    assert_eq!(second.already_present, 1);

    download.assert_async().await;
}

#[tokio::test]
async fn server_errors_fail_the_file_not_the_run() {
    let dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new_async().await;
    let url = format!("{}/files/book.pdf", server.url());

    let _orders = server
        .mock("GET", "/api/v1/user/order")
        .match_query(mockito::Matcher::Any)
        .with_body(r#"[{"gamekey": "a"}]"#)
        .create_async()
        .await;
    let _a = server
        .mock("GET", "/api/v1/order/a")
        .match_query(mockito::Matcher::Any)
        .with_body(order("2020-01-01T08:00:00", "Bundle A", &url, 10, "0123456789abcdef0123456789abcdef"))
        .create_async()
        .await;
    let _download = server
        .mock("GET", "/files/book.pdf")
        .with_status(500)
        .create_async()
        .await;

    let summary = mirror(&server, dir.path()).await.unwrap();

    assert_eq!(summary.downloaded, 0);
    assert_eq!(summary.failed.len(), 1);
    assert!(!summary.is_success());
    assert!(!dir.path().join("ebook/2020-01-01-bundle-a/great-book/book.pdf").exists());
}

#[tokio::test]
async fn expired_session_aborts_the_run() {
    let dir = TempDir::new().unwrap();
    let mut server = mockito::Server::new_async().await;
    let _login = server
        .mock("GET", "/api/v1/user/order")
        .match_query(mockito::Matcher::Any)
        .with_body("<html>please log in</html>")
        .create_async()
        .await;

    let err = mirror(&server, dir.path()).await.unwrap_err();

    assert!(matches!(err, ManagerError::Catalog(CatalogError::Auth(_))));
    assert!(!dir.path().join("ebook").exists());
}
