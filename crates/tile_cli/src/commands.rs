use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use render_driver::{OutputImage, ProgressReceiver, RenderSession, SessionConfig, SessionSummary};
use scheduler::TileManager;
use serde::Serialize;
use tiles::{Tile, Tiling};

use crate::config::CliConfig;
use crate::synthetic::GradientRenderer;

const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Serialize)]
struct PlanStep {
    step: u32,
    sample: i64,
    num_samples: u32,
    resolution_divider: u32,
    width: u32,
    height: u32,
    tiles: usize,
    total_pixel_samples: u64,
}

pub fn plan(config: &CliConfig, max_steps: Option<u32>, out: &mut impl Write) -> Result<()> {
    if config.scheduler.samples.is_unlimited() && max_steps.is_none() {
        bail!("an unlimited sample count needs --max-steps");
    }
    let mut manager = TileManager::new(config.scheduler).context("create tile manager")?;
    manager.reset(config.buffer_params(), config.scheduler.samples);

    let mut step = 0;
    while max_steps.is_none_or(|max_steps| step < max_steps) && manager.next() {
        step += 1;
        let state = manager.state();
        let line = PlanStep {
            step,
            sample: state.sample,
            num_samples: state.num_samples,
            resolution_divider: state.resolution_divider,
            width: state.buffer.width,
            height: state.buffer.height,
            tiles: state.num_tiles,
            total_pixel_samples: state.total_pixel_samples,
        };
        serde_json::to_writer(&mut *out, &line).context("serialize plan step")?;
        writeln!(out).context("write plan step")?;
    }
    tracing::info!(steps = step, "planned session");
    Ok(())
}

#[derive(Debug, Serialize)]
struct OrderReport<'a> {
    width: u32,
    height: u32,
    order: tiles::TileOrder,
    tiles: &'a [Tile],
    queues: &'a [Vec<usize>],
}

pub fn order(config: &CliConfig, grid: bool, out: &mut impl Write) -> Result<()> {
    let params = config
        .scheduler
        .tiling_params(config.image.width, config.image.height);
    let tiling = Tiling::generate(&params).context("generate tiling")?;

    if grid {
        write_rank_grid(&tiling, out)
    } else {
        let report = OrderReport {
            width: tiling.image_width(),
            height: tiling.image_height(),
            order: params.order,
            tiles: tiling.tiles(),
            queues: tiling.generated_order(),
        };
        serde_json::to_writer_pretty(&mut *out, &report).context("serialize tile order")?;
        writeln!(out).context("write tile order")
    }
}

/// Prints one cell per tile holding its queue and its position in that queue.
fn write_rank_grid(tiling: &Tiling, out: &mut impl Write) -> Result<()> {
    let mut cells = vec![String::new(); tiling.len()];
    for (queue, indices) in tiling.generated_order().iter().enumerate() {
        for (rank, &index) in indices.iter().enumerate() {
            cells[index] = if tiling.queue_count() > 1 {
                format!("{queue}:{rank}")
            } else {
                rank.to_string()
            };
        }
    }

    let cell_width = cells.iter().map(String::len).max().unwrap_or(1);
    for row in cells.chunks(tiling.tile_stride().max(1)) {
        let line = row
            .iter()
            .map(|cell| format!("{cell:>cell_width$}"))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(out, "{line}").context("write tile grid")?;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct RenderReport<'a> {
    #[serde(flatten)]
    summary: &'a SessionSummary,
    width: u32,
    height: u32,
    channel_means: Vec<f64>,
}

pub fn render(
    config: &CliConfig,
    workers: Option<usize>,
    pretty: bool,
    out: &mut impl Write,
) -> Result<()> {
    if config.scheduler.samples.is_unlimited() {
        bail!("render needs a finite sample count");
    }
    let workers = workers.unwrap_or(config.scheduler.num_devices).max(1);
    if config.scheduler.preserve_tile_device && workers < config.scheduler.num_devices {
        bail!(
            "--preserve-device needs at least {} workers, got {workers}",
            config.scheduler.num_devices
        );
    }
    let manager = TileManager::new(config.scheduler).context("create tile manager")?;
    let renderer = GradientRenderer::new(
        config.image.width,
        config.image.height,
        config.scheduler.schedule_denoising,
    );
    let session_config = SessionConfig {
        workers,
        ..SessionConfig::default()
    };
    let (mut session, progress) = RenderSession::new(manager, renderer, session_config);

    let finished = AtomicBool::new(false);
    let summary = thread::scope(|scope| {
        thread::Builder::new()
            .name("progress-reporter".to_owned())
            .spawn_scoped(scope, || report_progress(progress, &finished))
            .context("spawn progress reporter thread")?;
        let result = session.run(config.buffer_params(), config.scheduler.samples);
        finished.store(true, Ordering::Release);
        result.context("run render session")
    })?;

    let report = RenderReport {
        summary: &summary,
        width: summary.image.width(),
        height: summary.image.height(),
        channel_means: channel_means(&summary.image),
    };
    if pretty {
        serde_json::to_writer_pretty(&mut *out, &report).context("serialize render summary")?;
    } else {
        serde_json::to_writer(&mut *out, &report).context("serialize render summary")?;
    }
    writeln!(out).context("write render summary")
}

fn report_progress(mut progress: ProgressReceiver, finished: &AtomicBool) {
    loop {
        let done = finished.load(Ordering::Acquire);
        for sample in progress.drain() {
            tracing::debug!(
                step = sample.step,
                sample = sample.sample,
                divider = sample.resolution_divider,
                tiles_written = sample.tiles_written,
                fraction = ?sample.progress.fraction,
                "render progress"
            );
        }
        if done {
            break;
        }
        thread::sleep(PROGRESS_POLL_INTERVAL);
    }
}

fn channel_means(image: &OutputImage) -> Vec<f64> {
    let channels = image.channels();
    let pixels = image.pixels().len() / channels.max(1);
    if pixels == 0 {
        return vec![0.0; channels];
    }
    let mut sums = vec![0.0f64; channels];
    for pixel in image.pixels().chunks_exact(channels) {
        for (sum, value) in sums.iter_mut().zip(pixel) {
            *sum += f64::from(*value);
        }
    }
    sums.into_iter().map(|sum| sum / pixels as f64).collect()
}

#[cfg(test)]
mod tests {
    use model::ResolutionLimit;
    use scheduler::SampleLimit;
    use tiles::{TileOrder, TileSize};

    use super::*;
    use crate::config::ImageSize;

    fn small(width: u32, height: u32) -> CliConfig {
        let mut config = CliConfig {
            image: ImageSize { width, height },
            ..CliConfig::default()
        };
        config.scheduler.tile_size = TileSize::square(16);
        config
    }

    fn output(write: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut buffer = Vec::new();
        write(&mut buffer).expect("command succeeds");
        String::from_utf8(buffer).expect("utf-8 output")
    }

    #[test]
    fn plan_prints_one_line_per_step() {
        let mut config = small(128, 128);
        config.scheduler.samples = SampleLimit::Finite(4);
        config.scheduler.start_resolution = ResolutionLimit::Limited(32);

        let text = output(|out| plan(&config, None, out));
        let steps: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        // Half resolution, then four full resolution samples.
        assert_eq!(steps.len(), 5);
        assert_eq!(steps[0]["resolution_divider"], 2);
        assert_eq!(steps[0]["width"], 64);
        assert_eq!(steps[0]["tiles"], 16);
        assert_eq!(steps[1]["resolution_divider"], 1);
        assert_eq!(steps[1]["sample"], 0);
        assert_eq!(steps[4]["sample"], 3);
        assert_eq!(steps[4]["num_samples"], 1);
    }

    #[test]
    fn unlimited_plan_needs_a_step_limit() {
        let mut config = small(16, 16);
        config.scheduler.samples = SampleLimit::Unlimited;
        let mut sink = Vec::new();
        assert!(plan(&config, None, &mut sink).is_err());

        let text = output(|out| plan(&config, Some(3), out));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn order_grid_ranks_tiles_from_the_center() {
        let mut config = small(48, 48);
        config.scheduler.background = true;
        config.scheduler.tile_order = TileOrder::Center;

        let text = output(|out| order(&config, true, out));
        let rows: Vec<Vec<&str>> = text
            .lines()
            .map(|line| line.split_whitespace().collect())
            .collect();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.len() == 3));
        assert_eq!(rows[1][1], "0");
    }

    #[test]
    fn order_json_lists_every_tile() {
        // Two device bands of 32 rows, each two tiles high and two wide.
        let mut config = small(32, 64);
        config.scheduler.num_devices = 2;

        let text = output(|out| order(&config, false, out));
        let report: serde_json::Value = serde_json::from_str(&text).expect("json report");
        assert_eq!(report["tiles"].as_array().map(Vec::len), Some(8));
        let queued: usize = report["queues"]
            .as_array()
            .expect("queues")
            .iter()
            .map(|queue| queue.as_array().map_or(0, Vec::len))
            .sum();
        assert_eq!(queued, 8);
        assert_eq!(report["queues"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn render_reports_a_finished_gradient() {
        let mut config = small(32, 32);
        config.scheduler.samples = SampleLimit::Finite(2);
        config.scheduler.schedule_denoising = true;
        config.scheduler.progressive = false;
        config.scheduler.background = true;

        let text = output(|out| render(&config, Some(2), false, out));
        let report: serde_json::Value = serde_json::from_str(text.trim()).expect("json summary");
        assert_eq!(report["steps"], 1);
        assert_eq!(report["tiles_written"], 4);
        assert_eq!(report["tiles_denoised"], 4);
        assert_eq!(report["cancelled"], false);
        assert_eq!(report["progress"]["fraction"], 1.0);
        assert_eq!(report["width"], 32);

        let red = report["channel_means"][0].as_f64().expect("red mean");
        assert!((red - 0.5).abs() < 0.05, "red mean {red}");
    }

    #[test]
    fn channel_means_of_an_empty_image_are_zero() {
        assert_eq!(channel_means(&OutputImage::new(0, 0, 3)), vec![0.0; 3]);
    }
}
