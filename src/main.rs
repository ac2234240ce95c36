use std::io::{Write, stdout};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, bail};
use crossterm::{cursor, execute, terminal};
use tracing_subscriber::EnvFilter;
use upload_scheduler::utils::{format_bytes, format_status};
use upload_scheduler::{
    AppConfig, Dimensions, HttpRecordCreator, SimpleConfig, SimpleUploader, UploadManager, UploadPayload,
};

/// `photo.jpg=1920x1080`, optionally with a sibling `photo.thumb.jpg`.
struct ImageArg {
    path: PathBuf,
    dimensions: Dimensions,
}

fn parse_image_arg(arg: &str) -> anyhow::Result<ImageArg> {
    let (path, size) = arg
        .split_once('=')
        .with_context(|| format!("expected PATH=WIDTHxHEIGHT, got {arg}"))?;
    let (width, height) = size
        .split_once('x')
        .with_context(|| format!("expected WIDTHxHEIGHT, got {size}"))?;

    Ok(ImageArg {
        path: PathBuf::from(path),
        dimensions: Dimensions::new(width.parse()?, height.parse()?),
    })
}

fn thumbnail_path(path: &Path) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}.thumb.{ext}"),
        None => format!("{stem}.thumb"),
    };
    path.with_file_name(name)
}

async fn load_payload(image: &ImageArg) -> anyhow::Result<UploadPayload> {
    let full = tokio::fs::read(&image.path)
        .await
        .with_context(|| format!("reading {}", image.path.display()))?;

    let thumb_path = thumbnail_path(&image.path);
    let thumbnail = match tokio::fs::read(&thumb_path).await {
        Ok(bytes) => bytes,
        Err(_) => full.clone(),
    };

    let title = image.path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
    Ok(UploadPayload::new(full, thumbnail, image.dimensions).with_title(title))
}

fn render(manager: &UploadManager, lines_drawn: &mut u16) -> anyhow::Result<()> {
    let mut out = stdout();
    if *lines_drawn > 0 {
        execute!(out, cursor::MoveUp(*lines_drawn), terminal::Clear(terminal::ClearType::FromCursorDown))?;
    }

    let tasks = manager.snapshot();
    for task in &tasks {
        let name = task.payload().title.as_deref().unwrap_or("untitled");
        let size = format_bytes(task.payload().total_bytes() as u64);
        writeln!(out, "{name:<24} {size:>10}  {}", format_status(task.status()))?;
    }
    out.flush()?;

    *lines_drawn = tasks.len() as u16;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("upload_scheduler=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| "config.toml".to_string());
    let images = args.map(|arg| parse_image_arg(&arg)).collect::<anyhow::Result<Vec<_>>>()?;

    let config = AppConfig::load_config(&config_path).with_context(|| format!("loading {config_path}"))?;
    let transfer = SimpleUploader::new(&config.storage_endpoint, &config.token, SimpleConfig::default())?;
    let records = HttpRecordCreator::new(&config.records_endpoint, &config.token, Duration::from_secs(30))?;

    let manager = UploadManager::builder()
        .config(config.scheduler.clone())
        .transfer(Arc::new(transfer))
        .records(Arc::new(records))
        .build()
        .await?;
    manager.sign_in(&config.owner_id);

    let restored = manager.restore().await?;
    let mut payloads = Vec::with_capacity(images.len());
    for image in &images {
        payloads.push(load_payload(image).await?);
    }
    manager.enqueue(payloads);

    if restored == 0 && images.is_empty() {
        bail!("nothing to upload: pass PATH=WIDTHxHEIGHT arguments after the config path");
    }

    let mut lines_drawn = 0;
    loop {
        render(&manager, &mut lines_drawn)?;

        if !manager.snapshot().iter().any(|task| task.status().is_outstanding()) {
            break;
        }

        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    manager.flush().await?;

    let failed = manager.snapshot().iter().filter(|task| task.status().is_failed()).count();
    if failed > 0 {
        bail!("{failed} upload(s) failed, they will be retried on the next run");
    }

    Ok(())
}
