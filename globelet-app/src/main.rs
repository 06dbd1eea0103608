use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use globelet::prelude::*;
use std::path::PathBuf;
use std::time::SystemTime;

#[derive(Parser)]
#[command(author, version, about = "Render a view of the globe into a PNG file")]
struct Arguments {
    /// Directory holding the `maps` tree of installed themes.
    #[arg(long, value_parser, default_value = "data")]
    data_root: PathBuf,
    /// Theme id, such as `earth/bluemarble`.
    #[arg(long, default_value = "earth/bluemarble")]
    theme: String,
    /// Longitude of the view center in degrees.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    lon: f64,
    /// Latitude of the view center in degrees.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    lat: f64,
    /// Globe radius in pixels.
    #[arg(long, default_value_t = 300.0)]
    radius: f64,
    #[arg(long, default_value_t = 800)]
    width: u32,
    #[arg(long, default_value_t = 600)]
    height: u32,
    #[arg(long, value_enum, default_value = "spherical")]
    projection: ProjectionArg,
    #[arg(long, value_enum, default_value = "normal")]
    quality: QualityArg,
    /// Output image, the format follows the extension.
    #[arg(long, short = 'o', value_parser, default_value = "globe.png")]
    output: PathBuf,
    /// Stamp zoom/x/y onto every tile.
    #[arg(long)]
    show_tile_id: bool,
    /// Darken the night side for the current time.
    #[arg(long)]
    sun_shading: bool,
    /// Never touch the network, missing tiles stay placeholders.
    #[arg(long)]
    offline: bool,
    /// Wait this long for downloads and render again if tiles arrived.
    #[arg(long, default_value_t = 0)]
    settle_ms: u64,
    /// Scanline worker threads, all cores when omitted.
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum ProjectionArg {
    Spherical,
    Gnomonic,
}

impl From<ProjectionArg> for Projection {
    fn from(value: ProjectionArg) -> Self {
        match value {
            ProjectionArg::Spherical => Projection::Spherical,
            ProjectionArg::Gnomonic => Projection::Gnomonic,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum QualityArg {
    Outline,
    Low,
    Normal,
    High,
    Print,
}

impl From<QualityArg> for MapQuality {
    fn from(value: QualityArg) -> Self {
        match value {
            QualityArg::Outline => MapQuality::Outline,
            QualityArg::Low => MapQuality::LowQuality,
            QualityArg::Normal => MapQuality::Normal,
            QualityArg::High => MapQuality::HighQuality,
            QualityArg::Print => MapQuality::PrintQuality,
        }
    }
}

fn download_manager(offline: bool) -> Result<Arc<dyn DownloadManager>> {
    let manager: Arc<dyn DownloadManager> = if offline {
        Arc::new(OfflineDownloadManager)
    } else {
        Arc::new(HttpDownloadManager::new().context("start the download runtime")?)
    };
    Ok(manager)
}

fn main() -> Result<()> {
    env_logger::init();
    let arguments = Arguments::parse();

    let mut options = MapPerformanceProfile::Balanced.resolve();
    options.rendering.quality = arguments.quality.into();
    if let Some(threads) = arguments.threads {
        options.rendering.worker_threads = threads;
    }
    options.tile_loader.show_tile_id = arguments.show_tile_id;
    options.sun.show_shading = arguments.sun_shading;

    let loader = StackedTileLoader::open(
        &arguments.data_root,
        &arguments.theme,
        download_manager(arguments.offline)?,
        &options,
    )
    .with_context(|| format!("open theme {} below {}", arguments.theme, arguments.data_root.display()))?;

    if arguments.sun_shading {
        let mut sun = SunLocator::new(&options.sun);
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .context("system clock before 1970")?;
        sun.update_position(now.as_secs_f64());
        log::info!(
            "subsolar point at {:.2}, {:.2}",
            sun.position().lon_degrees(),
            sun.position().lat_degrees()
        );
        loader.set_sun_locator(sun);
    }

    let updates = loader.subscribe();
    let view = ViewParams::new(
        GeoPoint::from_degrees(arguments.lon, arguments.lat),
        arguments.radius,
        arguments.width,
        arguments.height,
    )
    .with_projection(arguments.projection.into())
    .with_quality(options.rendering.quality);
    anyhow::ensure!(view.is_valid(), "invalid view, check size, radius and center");

    let mut mapper = create_mapper(view.projection, Arc::clone(&loader), &options.rendering)?;
    let mut canvas = CanvasImage::new(view.width, view.height);
    let full = canvas.rect();
    mapper
        .map_texture(&mut canvas, &view, full, None)
        .context("render the globe")?;

    if arguments.settle_ms > 0 {
        let deadline = Instant::now() + Duration::from_millis(arguments.settle_ms);
        let mut arrived = 0;
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            match updates.recv_timeout(left) {
                Ok(_) => arrived += 1,
                Err(_) => break,
            }
        }
        if arrived > 0 {
            log::info!("{} tile updates arrived, rendering again", arrived);
            mapper.set_repaint_needed();
            mapper
                .map_texture(&mut canvas, &view, full, None)
                .context("render the globe again")?;
        }
    }

    canvas
        .save(&arguments.output)
        .with_context(|| format!("write {}", arguments.output.display()))?;
    log::info!(
        "wrote {}x{} view to {}, {} KiB of tiles cached",
        view.width,
        view.height,
        arguments.output.display(),
        loader.volatile_cache_usage()
    );
    Ok(())
}
