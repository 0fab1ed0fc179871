use std::fs;
use std::io::Read as _;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use predicates::prelude::*;

static LOGO_PNG: &[u8] = &[
    137, 80, 78, 71, 13, 10, 26, 10, 0, 0, 0, 13, 73, 72, 68, 82, 0, 0, 0, 1, 0, 0, 0, 1, 8, 4, 0,
    0, 0, 181, 28, 12, 2, 0, 0, 0, 11, 73, 68, 65, 84, 120, 218, 99, 252, 255, 23, 0, 2, 3, 1, 128,
    110, 220, 25, 0, 0, 0, 0, 73, 69, 78, 68, 174, 66, 96, 130,
];

const EPUB_BYTES: &[u8] = b"PK\x03\x04fake-epub-for-test";

/// Serves the forum thread and the conversion backend from one
/// tiny_http server; `fail_convert` switches `/convert` to a 500.
fn spawn_stub_server(
    fail_convert: bool,
) -> (String, mpsc::Sender<()>, thread::JoinHandle<()>) {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let addr = server.server_addr();
    let base_url = format!("http://{addr}");
    let own_base = base_url.clone();

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let handle = thread::spawn(move || {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };

            let url = request.url().to_string();
            let path = url.split('?').next().unwrap_or(&url).to_owned();

            let mut body = String::new();
            let _ = request.as_reader().read_to_string(&mut body);

            match path.as_str() {
                "/ping" => {
                    let _ = request.respond(tiny_http::Response::from_string("pong"));
                }
                "/convert" => {
                    if fail_convert {
                        let _ = request.respond(
                            tiny_http::Response::from_string("driver exploded: boom")
                                .with_status_code(500),
                        );
                        continue;
                    }

                    // The payload must be well-formed JSON carrying the
                    // crawled source and its resolved assets.
                    let payload: serde_json::Value =
                        serde_json::from_str(&body).expect("parse conversion payload");
                    let source = &payload["sources"][0];
                    assert_eq!(source["is_forum"], serde_json::Value::Bool(true));
                    let assets = source["assets"].as_array().expect("assets array");
                    assert!(
                        !assets.is_empty(),
                        "expected at least one resolved asset in payload"
                    );

                    let response = tiny_http::Response::from_data(EPUB_BYTES.to_vec())
                        .with_header(
                            tiny_http::Header::from_bytes(
                                &b"Content-Type"[..],
                                &b"application/epub+zip"[..],
                            )
                            .expect("content-type header"),
                        )
                        .with_header(
                            tiny_http::Header::from_bytes(
                                &b"Content-Disposition"[..],
                                &b"attachment; filename=\"widget-thread.epub\""[..],
                            )
                            .expect("content-disposition header"),
                        );
                    let _ = request.respond(response);
                }
                "/helper/extract-links" => {
                    let req: serde_json::Value =
                        serde_json::from_str(&body).expect("parse extract-links request");
                    assert!(req["html"].as_str().is_some_and(|h| h.contains("bbWrapper")));

                    let links = serde_json::json!({
                        "assets": [{
                            "url": format!("{own_base}/attachments/remote-png.50/"),
                            "canonical_url": format!("{own_base}/attachments/remote-png.50/"),
                            "all_url_variants": [format!("{own_base}/attachments/remote-png.50/")],
                            "filename_hint": "remote-png.50",
                        }],
                        "externals": [],
                        "next_page_num": null,
                    });
                    let _ = request.respond(
                        tiny_http::Response::from_string(links.to_string()).with_header(
                            tiny_http::Header::from_bytes(
                                &b"Content-Type"[..],
                                &b"application/json"[..],
                            )
                            .expect("content-type header"),
                        ),
                    );
                }
                "/threads/gadgets.7/" => {
                    let _ = request.respond(
                        tiny_http::Response::from_string(
                            r##"<html><body><div class="bbWrapper">
  <img src="/attachments/direct-png.40/" />
</div></body></html>
"##,
                        )
                        .with_header(
                            tiny_http::Header::from_bytes(
                                &b"Content-Type"[..],
                                &b"text/html"[..],
                            )
                            .expect("content-type header"),
                        ),
                    );
                }
                "/attachments/direct-png.40/" | "/attachments/remote-png.50/" => {
                    let _ = request.respond(
                        tiny_http::Response::from_data(LOGO_PNG.to_vec()).with_header(
                            tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"image/png"[..])
                                .expect("content-type header"),
                        ),
                    );
                }
                _ => {
                    let _ = request.respond(
                        tiny_http::Response::from_string("not found").with_status_code(404),
                    );
                }
            }
        }
    });

    (base_url, shutdown_tx, handle)
}

#[test]
fn download_writes_epub_with_suggested_filename() -> anyhow::Result<()> {
    let (base_url, shutdown_tx, handle) = spawn_stub_server(false);
    let temp = tempfile::TempDir::new()?;
    let out_dir = temp.path().join("books");
    fs::create_dir_all(&out_dir)?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("forumclip");
    cmd.args([
        "download",
        "--url",
        &format!("{base_url}/threads/gadgets.7/"),
        "--backend",
        &base_url,
        "--max-pages",
        "2",
        "--out",
        out_dir.to_str().unwrap(),
    ])
    .assert()
    .success();

    let epub_path = out_dir.join("widget-thread.epub");
    assert_eq!(fs::read(&epub_path)?, EPUB_BYTES);

    // Existing outputs MUST NOT be overwritten without --force.
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("forumclip");
    cmd.args([
        "download",
        "--url",
        &format!("{base_url}/threads/gadgets.7/"),
        "--backend",
        &base_url,
        "--max-pages",
        "2",
        "--out",
        epub_path.to_str().unwrap(),
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("open output"));

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("forumclip");
    cmd.args([
        "download",
        "--url",
        &format!("{base_url}/threads/gadgets.7/"),
        "--backend",
        &base_url,
        "--max-pages",
        "2",
        "--force",
        "--out",
        epub_path.to_str().unwrap(),
    ])
    .assert()
    .success();

    let _ = shutdown_tx.send(());
    let _ = handle.join();
    Ok(())
}

#[test]
fn backend_error_body_is_surfaced() -> anyhow::Result<()> {
    let (base_url, shutdown_tx, handle) = spawn_stub_server(true);
    let temp = tempfile::TempDir::new()?;

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("forumclip");
    cmd.args([
        "download",
        "--url",
        &format!("{base_url}/threads/gadgets.7/"),
        "--backend",
        &base_url,
        "--max-pages",
        "2",
        "--out",
        temp.path().join("out.epub").to_str().unwrap(),
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("driver exploded: boom"));

    let _ = shutdown_tx.send(());
    let _ = handle.join();
    Ok(())
}

#[test]
fn remote_extractor_matches_dom_semantics() -> anyhow::Result<()> {
    let (base_url, shutdown_tx, handle) = spawn_stub_server(false);
    let temp = tempfile::TempDir::new()?;
    let payload_path = temp.path().join("payload.json");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("forumclip");
    cmd.args([
        "gather",
        "--url",
        &format!("{base_url}/threads/gadgets.7/"),
        "--backend",
        &base_url,
        "--remote-extract",
        "--max-pages",
        "2",
        "--out",
        payload_path.to_str().unwrap(),
    ])
    .assert()
    .success();

    let payload: forumclip::model::ConversionPayload =
        serde_json::from_str(&fs::read_to_string(&payload_path)?)?;
    let assets = &payload.sources[0].assets;
    assert_eq!(assets.len(), 1);
    assert!(assets[0].original_url.contains("remote-png.50"));

    let _ = shutdown_tx.send(());
    let _ = handle.join();
    Ok(())
}

#[test]
fn ping_reports_backend_liveness() -> anyhow::Result<()> {
    let (base_url, shutdown_tx, handle) = spawn_stub_server(false);

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("forumclip");
    cmd.args(["ping", "--backend", &base_url])
        .assert()
        .success()
        .stdout(predicate::str::contains("backend is up"));

    let _ = shutdown_tx.send(());
    let _ = handle.join();

    // A dead backend is a user-visible failure.
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("forumclip");
    cmd.args(["ping", "--backend", "http://127.0.0.1:9"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ping backend"));

    Ok(())
}
