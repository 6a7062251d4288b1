use clap::Parser;
use cutout_relay::client::{Placement, RelayClient, ScaleMode};
use dotenvy::dotenv;
use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Uploads an image to the relay and saves the background-removed result.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Image to upload (jpg, jpeg, png or gif)
    input: PathBuf,

    /// Relay base URL
    #[arg(long, env = "RELAY_URL", default_value = "http://localhost:3333")]
    server: String,

    /// Where to write the processed PNG (default: <input>.cutout.png)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Cover the frame instead of fitting inside it
    #[arg(long)]
    fill: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let client = RelayClient::new(&args.server)?;

    info!("📤 Uploading {} to {}", args.input.display(), args.server);
    let response = match client.upload(&args.input).await {
        Ok(response) => response,
        Err(e) => {
            error!("❌ {}: {}", e.notice(), e);
            std::process::exit(1);
        }
    };
    info!(
        "✅ Processed in {}ms: {}",
        response.processing_time.unwrap_or_default(),
        response.image_url
    );

    let image = match client.fetch_image(&response.image_url).await {
        Ok(image) => image,
        Err(e) => {
            error!("❌ {}: {}", e.notice(), e);
            std::process::exit(1);
        }
    };

    let output = args
        .output
        .unwrap_or_else(|| args.input.with_extension("cutout.png"));
    tokio::fs::write(&output, &image.encoded).await?;

    let placement = Placement {
        scale_mode: if args.fill { ScaleMode::Fill } else { ScaleMode::Fit },
        ..Placement::default()
    };
    let (width, height) = placement.fit(image.width, image.height);
    info!(
        "🖼️  Saved {} ({}x{}), drawn at {}x{} in a {}x{} frame",
        output.display(),
        image.width,
        image.height,
        width,
        height,
        placement.width,
        placement.height
    );

    Ok(())
}
