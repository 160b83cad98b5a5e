use pressclip::error::HarvestError;
use pressclip::scraping::{ArticleFetch, HttpArticleFetcher};

// A page with enough article text for readability to keep it, wrapped
// in the usual navigation chrome it should strip.
fn article_page() -> String {
    let paragraph = "Chip makers are still quoting long lead times for mature nodes, \
        and buyers report that inventories cover less than six weeks of production. \
        Analysts expect the squeeze to persist through the holiday quarter as automotive \
        demand keeps climbing and new fab capacity stays more than a year away. "
        .repeat(3);
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Chip shortage deepens</title></head>
<body>
  <nav><a href="/">Home</a> <a href="/tech">Tech</a></nav>
  <article>
    <h1>Chip shortage deepens</h1>
    <p>{p}</p>
    <p>{p}</p>
    <p>{p}</p>
  </article>
  <footer>All rights reserved.</footer>
</body>
</html>"#,
        p = paragraph
    )
}

#[tokio::test]
async fn test_fetch_extracts_readable_text() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("GET", "/story")
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body(article_page())
        .create_async()
        .await;

    let fetcher = HttpArticleFetcher::new(5, "Pressclip/0.1.0").expect("client");
    let text = fetcher
        .fetch(&format!("{}/story", server.url()))
        .await
        .expect("fetch");

    assert!(text.contains("long lead times"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_empty_pages_are_fetch_failures() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("GET", "/story")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html><head><title>x</title></head><body></body></html>")
        .create_async()
        .await;

    let fetcher = HttpArticleFetcher::new(5, "Pressclip/0.1.0").expect("client");
    let err = fetcher
        .fetch(&format!("{}/story", server.url()))
        .await
        .expect_err("should fail");

    assert!(matches!(err, HarvestError::FetchTimeout(_)));
}

#[tokio::test]
async fn test_http_error_statuses_are_fetch_failures() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("GET", "/story")
        .with_status(404)
        .create_async()
        .await;

    let fetcher = HttpArticleFetcher::new(5, "Pressclip/0.1.0").expect("client");
    let err = fetcher
        .fetch(&format!("{}/story", server.url()))
        .await
        .expect_err("should fail");

    match err {
        HarvestError::FetchTimeout(detail) => assert!(detail.contains("404")),
        other => panic!("unexpected error: {:?}", other),
    }
}
