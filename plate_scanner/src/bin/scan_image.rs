use std::num::NonZeroU64;
use std::path::PathBuf;

use clap::Parser;
use env_logger::Env;
use log::{error, info};
use opencv::core::Vector;
use opencv::imgcodecs::{imread, imwrite, IMREAD_COLOR};
use opencv::prelude::MatTraitConst;
use plate_scanner::config::ScannerConfig;
use plate_scanner::plate_detection::frame_processor::FrameProcessor;
use plate_scanner::plate_detection::sinks::{EventDispatcher, SnapshotStore};
use plate_scanner::{Result, ScannerError};

/// Runs a single still image through the plate pipeline.
#[derive(Debug, Parser)]
#[command(name = "scan_image")]
struct Args {
    image: PathBuf,
    /// Write the annotated frame here.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Report detections to the plate API as the live scanner would.
    #[arg(long)]
    send: bool,
}

fn run(args: Args) -> Result<()> {
    let mut config = ScannerConfig::from_env()?;
    config.pipeline.frame_skip = NonZeroU64::MIN;

    let path = args.image.to_string_lossy();
    let image = imread(&path, IMREAD_COLOR)?;
    if image.empty() {
        return Err(ScannerError::Config(format!("cannot read image {}", path)));
    }
    info!("Loaded {} ({}x{})", path, image.cols(), image.rows());

    let mut processor = FrameProcessor::from_config(&config)?;
    let processed = processor.process(&image, 0)?;

    for (index, outcome) in processed.outcomes.iter().enumerate() {
        info!("Candidate {}: {:?}", index, outcome);
    }
    for event in &processed.events {
        info!(
            "Plate {} at {:?} (confidence {:.2})",
            event.plate_text(),
            event.bounding_box(),
            event.confidence()
        );
    }
    if processed.events.is_empty() {
        info!("No plate found");
    }

    if let Some(output) = &args.output {
        imwrite(
            &output.to_string_lossy(),
            &processed.annotated,
            &Vector::new(),
        )?;
        info!("Annotated image written to {:?}", output);
    }

    if args.send {
        let snapshots = if config.save_snapshots {
            Some(SnapshotStore::new(&config.snapshot_dir)?)
        } else {
            None
        };
        let dispatcher = EventDispatcher::new(&config.api_url, &config.gate_id)?;
        for event in &processed.events {
            let stored = snapshots.as_ref().and_then(|store| store.store(event));
            dispatcher.dispatch(event, stored.as_ref());
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Args::parse()) {
        error!("{}", e);
        std::process::exit(1);
    }
}
