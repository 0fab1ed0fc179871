use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;

use anyhow::Context as _;
use url::Url;

use crate::backend::{BackendClient, ConvertOutcome, ConvertedFile};
use crate::cli::{DownloadArgs, GatherArgs};
use crate::context::RequestContext;
use crate::crawl::crawl_thread;
use crate::extractor::{DomLinkExtractor, LinkExtractor, RemoteLinkExtractor};
use crate::merge::merge_assets;
use crate::model::{
    ConversionOptions, ConversionPayload, ResolvedAsset, SourceRecord,
};

pub async fn run(args: DownloadArgs) -> anyhow::Result<()> {
    let backend = BackendClient::new(&args.backend).context("backend client")?;

    let gather = GatherArgs {
        url: args.url.clone(),
        pages: args.pages.clone(),
        max_pages: args.max_pages,
        cookies: args.cookies.clone(),
        seed_assets: args.seed_assets.clone(),
        backend: args.backend.clone(),
        remote_extract: args.remote_extract,
        out: None,
    };
    let (ctx, payload) = build_payload(&gather, &backend).await?;

    // Ctrl-C aborts the backend request only; a crawl already in
    // flight above has run to completion by this point.
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("cancellation requested");
            cancel.cancel();
        }
    });

    tracing::info!(backend = %args.backend, "request conversion");
    match backend.convert(&payload, &ctx.cancel).await.context("convert")? {
        ConvertOutcome::Cancelled => {
            tracing::info!("conversion cancelled");
            Ok(())
        }
        ConvertOutcome::File(file) => deliver(&args.out, file, args.force),
    }
}

pub async fn gather(args: GatherArgs) -> anyhow::Result<()> {
    let backend = BackendClient::new(&args.backend).context("backend client")?;
    let (_ctx, payload) = build_payload(&args, &backend).await?;

    let json = serde_json::to_string_pretty(&payload).context("serialize payload")?;
    match &args.out {
        Some(out) => {
            std::fs::write(out, json.as_bytes())
                .with_context(|| format!("write payload: {out}"))?;
            tracing::info!(out = %out, "wrote conversion payload");
        }
        None => println!("{json}"),
    }
    Ok(())
}

pub async fn ping(backend: &str) -> anyhow::Result<()> {
    let backend = BackendClient::new(backend).context("backend client")?;
    backend.ping().await.context("ping backend")?;
    println!("backend is up");
    Ok(())
}

async fn build_payload(
    args: &GatherArgs,
    backend: &BackendClient,
) -> anyhow::Result<(RequestContext, ConversionPayload)> {
    let thread_url = Url::parse(&args.url).context("parse --url")?;
    if thread_url.scheme() != "http" && thread_url.scheme() != "https" {
        anyhow::bail!("--url must be http/https: {thread_url}");
    }

    let cookies = match &args.cookies {
        Some(path) => Some(load_cookies(path)?),
        None => None,
    };
    let seeds = match &args.seed_assets {
        Some(path) => load_seed_assets(path)?,
        None => Vec::new(),
    };
    let explicit_pages = match &args.pages {
        Some(spec) => crate::pages::parse_page_spec(spec).context("parse --pages")?,
        None => Vec::new(),
    };

    let ctx = RequestContext::new(cookies.as_ref()).context("build request context")?;
    let extractor: Box<dyn LinkExtractor> = if args.remote_extract {
        Box::new(RemoteLinkExtractor::new(backend.clone()))
    } else {
        Box::new(DomLinkExtractor)
    };

    let outcome = crawl_thread(
        &ctx,
        extractor.as_ref(),
        &thread_url,
        &explicit_pages,
        Some(args.max_pages),
    )
    .await
    .context("crawl thread")?;

    let assets = merge_assets(seeds, outcome.assets);
    tracing::info!(
        assets = assets.len(),
        pages = outcome.pages_visited.len(),
        "payload assembled"
    );

    let payload = ConversionPayload {
        sources: vec![SourceRecord {
            url: args.url.clone(),
            html: outcome.first_page_html,
            cookies,
            assets,
            is_forum: true,
        }],
        options: ConversionOptions {
            pages: explicit_pages,
            max_pages: Some(args.max_pages),
        },
        requested_at: chrono::Utc::now(),
    };

    Ok((ctx, payload))
}

fn load_cookies(path: &str) -> anyhow::Result<HashMap<String, String>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read cookies: {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("parse cookies: {path}"))
}

fn load_seed_assets(path: &str) -> anyhow::Result<Vec<ResolvedAsset>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read seed assets: {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("parse seed assets: {path}"))
}

fn deliver(out: &str, file: ConvertedFile, force: bool) -> anyhow::Result<()> {
    let out_path = PathBuf::from(out);
    let target = if out_path.is_dir() {
        out_path.join(file.filename.as_deref().unwrap_or("thread.epub"))
    } else {
        out_path
    };

    if let Some(parent) = target.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir: {}", parent.display()))?;
    }

    let mut options = OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    let mut handle = options
        .open(&target)
        .with_context(|| format!("open output: {}", target.display()))?;
    handle
        .write_all(&file.bytes)
        .with_context(|| format!("write output: {}", target.display()))?;
    handle
        .flush()
        .with_context(|| format!("flush output: {}", target.display()))?;

    tracing::info!(out = %target.display(), bytes = file.bytes.len(), "wrote epub");
    Ok(())
}
