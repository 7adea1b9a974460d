use std::io::Write as _;

use anyhow::{bail, Context, Result};
use clap::Args;
use haven_assets::{AssetSpec, AssetStatus, AssetStorage, IntegrityVerifier, MetadataStore};
use haven_core::{bootstrap, Settings, DEMO_ASSET_URL};
use serde_json::json;
use tracing::info;

use super::{print_json, JsonArgs};

#[derive(Args)]
pub struct DownloadArgs {
    /// Source URL (http or https)
    #[arg(long, default_value = DEMO_ASSET_URL)]
    pub url: String,
    /// File name inside the asset directory
    #[arg(long, default_value = "model.bin")]
    pub file: String,
    /// Version recorded in the descriptor
    #[arg(long = "asset-version", default_value = "1.0")]
    pub asset_version: String,
    /// Expected size in bytes
    #[arg(long)]
    pub size: Option<u64>,
    /// Expected SHA-256 (hex)
    #[arg(long)]
    pub sha256: Option<String>,
    /// Do not draw progress on stderr
    #[arg(long)]
    pub quiet: bool,
}

pub async fn status(settings: Settings, args: JsonArgs) -> Result<()> {
    let runtime = bootstrap(settings).await?;
    let manager = &runtime.manager;
    print_json(
        &json!({
            "state": manager.state(),
            "assetPath": manager.asset_path(),
            "downloader": manager.downloader_kind(),
        }),
        args.pretty,
    );
    Ok(())
}

pub async fn download(settings: Settings, args: DownloadArgs) -> Result<()> {
    let runtime = bootstrap(settings).await?;
    let manager = runtime.manager;

    let mut spec = AssetSpec::new(args.asset_version);
    if let Some(size) = args.size {
        spec = spec.with_size(size);
    }
    if let Some(sha) = args.sha256 {
        spec = spec.with_checksum(sha);
    }
    manager
        .download(&args.url, &args.file, spec)
        .await
        .context("start download")?;

    let mut rx = manager.subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut shown = -1i64;
    loop {
        {
            let state = rx.borrow_and_update();
            if state.status != AssetStatus::Downloading {
                break;
            }
            let whole = state.progress.floor() as i64;
            if !args.quiet && whole > shown {
                shown = whole;
                eprint!("\rdownloading {:>3}%", whole);
                let _ = std::io::stderr().flush();
            }
        }
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                if !args.quiet {
                    eprintln!();
                }
                manager.cancel().await;
                bail!("download canceled");
            }
        }
    }
    if !args.quiet && shown >= 0 {
        eprintln!();
    }

    let state = manager.wait().await;
    match state.status {
        AssetStatus::Ready => {
            info!(file = %args.file, "download complete");
            print_json(&json!({ "state": state, "counters": manager.counters() }), false);
            Ok(())
        }
        _ => bail!(
            "download failed: {}",
            state.last_error.as_deref().unwrap_or("unknown error")
        ),
    }
}

pub async fn delete(settings: Settings) -> Result<()> {
    let runtime = bootstrap(settings).await?;
    runtime.manager.delete().await.context("delete asset")?;
    println!("deleted");
    Ok(())
}

/// Inspects the descriptor without going through the manager, so a failing
/// asset is reported as-is and nothing on disk changes.
pub async fn verify(settings: &Settings, args: JsonArgs) -> Result<()> {
    let storage = AssetStorage::new(&settings.asset_dir);
    let store = MetadataStore::new(storage.clone(), settings.metadata_file.clone());
    let Some(meta) = store.load().await else {
        bail!(
            "no readable descriptor {} in {}",
            settings.metadata_file,
            settings.asset_dir.display()
        );
    };
    let outcome = IntegrityVerifier::new(storage)
        .require_checksum(settings.require_checksum)
        .check(&meta)
        .await;
    print_json(
        &json!({
            "filename": meta.filename,
            "version": meta.version,
            "passed": outcome.passed(),
            "detail": outcome.describe(),
        }),
        args.pretty,
    );
    if !outcome.passed() {
        bail!("verification failed: {}", outcome.describe());
    }
    Ok(())
}
