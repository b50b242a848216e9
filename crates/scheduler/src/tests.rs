use std::collections::HashSet;
use std::sync::Mutex;

use model::{BufferParams, ResolutionLimit};
use proptest::prelude::*;
use tiles::{TileOrder, TileSize};

use super::*;

fn manager(config: SchedulerConfig) -> TileManager {
    TileManager::new(config).expect("valid scheduler config")
}

fn progressive(samples: u32, start_resolution: u32) -> SchedulerConfig {
    SchedulerConfig {
        progressive: true,
        samples: SampleLimit::Finite(samples),
        start_resolution: ResolutionLimit::Limited(start_resolution),
        tile_size: TileSize::square(32),
        ..SchedulerConfig::default()
    }
}

fn offline(samples: u32) -> SchedulerConfig {
    SchedulerConfig {
        progressive: false,
        samples: SampleLimit::Finite(samples),
        start_resolution: ResolutionLimit::Unlimited,
        background: true,
        tile_size: TileSize::square(32),
        ..SchedulerConfig::default()
    }
}

/// Pulls and finishes every tile of the current step on one worker. Returns `(handed, written)`.
fn run_step(manager: &mut TileManager, need_denoise: bool) -> (usize, usize) {
    let mut handed = 0;
    let mut written = 0;
    while let Some(task) = manager.next_tile(0, TileKinds::RENDER | TileKinds::DENOISE) {
        handed += 1;
        let finish = manager.finish_tile(task.index, need_denoise);
        if finish.write {
            written += 1;
        }
        if finish.free {
            manager.take_tile_buffer(task.index);
        }
    }
    (handed, written)
}

#[test]
fn square_image_refines_once_then_counts_samples() {
    let mut manager = manager(progressive(4, 32));
    manager.reset(BufferParams::new(64, 64), SampleLimit::Finite(4));
    assert_eq!(manager.state().resolution_divider, 2);
    assert_eq!(manager.state().sample, -1);
    assert!(!manager.done());

    assert!(manager.next());
    let state = manager.state();
    assert_eq!(
        (state.resolution_divider, state.sample, state.num_samples),
        (1, 0, 1)
    );
    assert_eq!((state.buffer.width, state.buffer.height), (64, 64));

    for expected_sample in 1..=3 {
        assert!(!manager.done());
        assert!(manager.next());
        let state = manager.state();
        assert_eq!(state.sample, expected_sample);
        assert_eq!(state.num_samples, 1);
        assert_eq!(state.resolution_divider, 1);
    }

    assert!(manager.done());
    assert!(!manager.next());
}

#[test]
fn done_waits_for_pixel_size_even_when_samples_suffice() {
    let mut manager = manager(progressive(1, 8));
    manager.reset(BufferParams::new(64, 64), SampleLimit::Finite(1));
    assert_eq!(manager.state().resolution_divider, 8);

    let mut widths = Vec::new();
    while manager.next() {
        let state = manager.state();
        widths.push(state.buffer.width);
        if state.resolution_divider > 1 {
            assert!(!manager.done());
        }
    }
    assert_eq!(widths, vec![16, 32, 64]);
    assert!(manager.done());
}

#[test]
fn coarse_steps_regenerate_tiles_at_each_resolution() {
    let mut manager = manager(progressive(2, 16));
    manager.reset(BufferParams::new(128, 64), SampleLimit::Finite(2));

    let mut tile_counts = Vec::new();
    while manager.next() {
        let state = manager.state();
        let area = manager.tiling().covered_area();
        assert_eq!(area, state.buffer.pixel_count());
        tile_counts.push((state.resolution_divider, state.num_tiles));
        run_step(&mut manager, false);
    }
    // 128 x 64 at start resolution 16 divides by 8; steps at 4, 2, 1, then one more sample.
    assert_eq!(tile_counts, vec![(4, 1), (2, 2), (1, 8), (1, 8)]);
}

#[test]
fn offline_session_renders_everything_in_one_step() {
    let mut manager = manager(offline(8));
    manager.reset(BufferParams::new(96, 64), SampleLimit::Finite(8));

    assert!(manager.next());
    let state = manager.state();
    assert_eq!((state.sample, state.num_samples), (0, 8));
    assert!(manager.done());
    assert_eq!(run_step(&mut manager, false), (6, 6));
    assert!(!manager.next());
}

#[test]
fn sample_range_starts_the_counter_inside_the_range() {
    let mut manager = manager(SchedulerConfig {
        sample_range: Some(SampleRange { start: 8, num: 4 }),
        ..offline(100)
    });
    manager.reset(BufferParams::new(32, 32), SampleLimit::Finite(100));
    assert_eq!(manager.state().sample, 7);
    assert_eq!(manager.num_effective_samples(), 4);

    assert!(manager.next());
    let state = manager.state();
    assert_eq!((state.sample, state.num_samples), (8, 4));
    assert_eq!(state.num_tiles, 1);
    assert!(manager.done());
}

#[test]
fn progressive_range_regenerates_only_on_entering_the_range() {
    let mut manager = manager(SchedulerConfig {
        start_resolution: ResolutionLimit::Unlimited,
        sample_range: Some(SampleRange { start: 2, num: 2 }),
        ..progressive(10, 64)
    });
    manager.reset(BufferParams::new(64, 64), SampleLimit::Finite(10));

    assert!(manager.next());
    assert_eq!(manager.state().sample, 2);
    let (handed, _) = run_step(&mut manager, false);
    assert_eq!(handed, 4);
    assert!(!manager.has_tiles());

    assert!(manager.next());
    assert_eq!(manager.state().sample, 3);
    assert!(manager.has_tiles());
    assert_eq!(manager.tiling().pending_render(), 4);
    assert!(manager.done());
}

#[test]
fn unlimited_samples_never_finish_and_report_no_fraction() {
    let mut manager = manager(SchedulerConfig {
        samples: SampleLimit::Unlimited,
        ..progressive(1, 16)
    });
    manager.reset(BufferParams::new(64, 64), SampleLimit::Unlimited);
    for _ in 0..50 {
        assert!(manager.next());
        run_step(&mut manager, false);
    }
    assert!(!manager.done());
    assert_eq!(manager.state().total_pixel_samples, 0);
    assert!(manager.progress().is_indeterminate());
}

#[test]
fn unlimited_offline_step_is_done_after_one_call() {
    let mut manager = manager(SchedulerConfig {
        samples: SampleLimit::Unlimited,
        ..offline(1)
    });
    manager.reset(BufferParams::new(32, 32), SampleLimit::Unlimited);
    assert!(manager.next());
    assert_eq!(manager.state().num_samples, u32::MAX);
    assert!(manager.done());
}

#[test]
fn progress_reaches_exactly_one_for_a_full_progressive_session() {
    let mut manager = manager(progressive(3, 32));
    manager.reset(BufferParams::new(128, 128), SampleLimit::Finite(3));
    assert_eq!(manager.state().total_pixel_samples, 64 * 64 + 3 * 128 * 128);

    let mut steps = 0;
    while manager.next() {
        run_step(&mut manager, false);
        steps += 1;
    }
    assert_eq!(steps, 4);
    let progress = manager.progress();
    assert_eq!(progress.completed_pixel_samples, progress.total_pixel_samples);
    assert_eq!(progress.fraction, Some(1.0));
}

#[test]
fn next_tile_without_affinity_scans_later_queues() {
    // Interactive tiling: two bands, one queue per band.
    let mut manager = manager(SchedulerConfig {
        num_devices: 2,
        background: false,
        tile_size: TileSize::square(16),
        ..offline(1)
    });
    manager.reset(BufferParams::new(32, 32), SampleLimit::Finite(1));
    assert!(manager.next());
    assert_eq!(manager.tiling().queue_count(), 2);

    let devices = std::iter::from_fn(|| manager.next_tile(0, TileKinds::RENDER))
        .map(|task| task.device)
        .collect::<Vec<_>>();
    assert_eq!(devices, vec![0, 0, 1, 1]);
    assert_eq!(manager.next_tile(0, TileKinds::RENDER), None);
    assert_eq!(manager.next_tile(1, TileKinds::RENDER | TileKinds::DENOISE), None);
}

#[test]
fn next_tile_with_affinity_stays_on_own_queue_for_primary_devices() {
    let mut manager = manager(SchedulerConfig {
        num_devices: 2,
        preserve_tile_device: true,
        tile_size: TileSize::square(16),
        ..offline(1)
    });
    manager.reset(BufferParams::new(32, 32), SampleLimit::Finite(1));
    assert!(manager.next());

    let first = manager.next_tile(0, TileKinds::RENDER).expect("device 0 tile");
    let second = manager.next_tile(0, TileKinds::RENDER).expect("device 0 tile");
    assert_eq!((first.device, second.device), (0, 0));
    assert_eq!(manager.next_tile(0, TileKinds::RENDER), None);

    // A device id past the primary devices grabs whatever is pending.
    let extra = manager.next_tile(5, TileKinds::RENDER).expect("remaining tile");
    assert_eq!(extra.device, 1);
}

#[test]
fn denoising_requires_the_scheduler_switch() {
    let mut manager = manager(offline(1));
    manager.reset(BufferParams::new(64, 32), SampleLimit::Finite(1));
    manager.next();
    let task = manager.next_tile(0, TileKinds::RENDER).expect("tile");
    let finish = manager.finish_tile(task.index, true);
    assert_eq!(finish, TileFinish { write: true, free: true });
    assert_eq!(manager.tiling().pending_denoise(), 0);
}

#[test]
fn denoise_chain_writes_and_frees_every_tile_once() {
    let mut manager = manager(SchedulerConfig {
        schedule_denoising: true,
        ..offline(4)
    });
    manager.reset(BufferParams::new(64, 32), SampleLimit::Finite(4));
    assert_eq!(manager.state().total_pixel_samples, 4 * 64 * 32 + 64 * 32);
    manager.next();

    let a = manager.next_tile(0, TileKinds::RENDER).expect("first tile");
    let b = manager.next_tile(0, TileKinds::RENDER).expect("second tile");
    for task in [a, b] {
        let mut buffer = manager.acquire_buffer(task.index, 1).expect("allocation");
        buffer.data_mut().fill(task.index as f32);
        buffer.add_samples(task.num_samples);
        manager.release_buffer(task.index, buffer);
    }

    assert_eq!(manager.finish_tile(a.index, true), TileFinish::default());
    assert_eq!(manager.next_tile(0, TileKinds::DENOISE), None);
    assert_eq!(manager.finish_tile(b.index, true), TileFinish::default());
    assert_eq!(manager.next_tile(0, TileKinds::RENDER), None);

    let first = manager
        .next_tile(0, TileKinds::RENDER | TileKinds::DENOISE)
        .expect("denoise work");
    assert_eq!(first.work, TileWork::Denoise);
    let neighborhood = manager.neighborhood_buffers(first.index);
    assert_eq!(neighborhood.iter().flatten().count(), 2);
    let center = neighborhood[tiles::CENTER_NEIGHBOR]
        .as_ref()
        .expect("own buffer");
    assert_eq!(center.index, first.index);
    assert_eq!(center.buffer.sample_count(), 4);

    manager.store_denoised(first.index, vec![0.5; 32 * 32]);
    let first_finish = manager.finish_tile(first.index, true);
    assert_eq!(first_finish, TileFinish { write: true, free: false });
    assert_eq!(
        manager.tile_buffer(first.index).and_then(TileBuffer::denoised),
        Some(&[0.5; 32 * 32][..])
    );

    let second = manager.next_tile(0, TileKinds::DENOISE).expect("denoise work");
    let second_finish = manager.finish_tile(second.index, true);
    assert_eq!(second_finish, TileFinish { write: true, free: true });
    assert!(manager.tile_buffer(first.index).is_none());
    assert!(manager.take_tile_buffer(second.index).is_some());
    assert_eq!(manager.stored_buffers(), 0);
    assert!(!manager.has_tiles());
    assert_eq!(manager.progress().fraction, Some(1.0));
}

#[test]
fn tile_skipping_denoise_releases_its_waiting_neighbor() {
    let mut manager = manager(SchedulerConfig {
        schedule_denoising: true,
        tile_size: TileSize::square(16),
        ..offline(1)
    });
    manager.reset(BufferParams::new(32, 16), SampleLimit::Finite(1));
    manager.next();

    let a = manager.next_tile(0, TileKinds::RENDER).expect("first tile");
    let b = manager.next_tile(0, TileKinds::RENDER).expect("second tile");
    for task in [a, b] {
        let mut buffer = manager.acquire_buffer(task.index, 1).expect("allocation");
        buffer.add_samples(task.num_samples);
        manager.release_buffer(task.index, buffer);
    }

    assert_eq!(manager.finish_tile(a.index, true), TileFinish::default());
    let skipped = manager.finish_tile(b.index, false);
    assert_eq!(skipped, TileFinish { write: true, free: false });
    assert!(manager.has_tiles());

    let denoise = manager.next_tile(0, TileKinds::DENOISE).expect("waiting neighbor");
    assert_eq!((denoise.index, denoise.work), (a.index, TileWork::Denoise));
    assert_eq!(
        manager
            .neighborhood_buffers(a.index)
            .iter()
            .flatten()
            .count(),
        2
    );

    let finish = manager.finish_tile(a.index, true);
    assert_eq!(finish, TileFinish { write: true, free: true });
    assert!(manager.tile_buffer(b.index).is_none());
    manager.take_tile_buffer(a.index);
    assert!(!manager.has_tiles());
    assert_eq!(manager.stored_buffers(), 0);
    assert_eq!(manager.progress().fraction, Some(1.0));
}

#[test]
fn progressive_denoise_progress_stays_below_one_until_done() {
    let mut manager = manager(SchedulerConfig {
        schedule_denoising: true,
        ..progressive(4, 32)
    });
    manager.reset(BufferParams::new(128, 128), SampleLimit::Finite(4));
    assert_eq!(
        manager.state().total_pixel_samples,
        2 * 64 * 64 + 4 * 2 * 128 * 128
    );

    let mut steps = 0;
    while manager.next() {
        run_step(&mut manager, true);
        steps += 1;
        if !manager.done() {
            assert!(
                manager.progress().fraction < Some(1.0),
                "step {steps} reports {:?}",
                manager.progress()
            );
        }
    }
    assert_eq!(steps, 5);
    let progress = manager.progress();
    assert_eq!(progress.completed_pixel_samples, progress.total_pixel_samples);
    assert_eq!(progress.fraction, Some(1.0));
}

#[test]
fn progressive_buffers_accumulate_until_regeneration() {
    let mut manager = manager(SchedulerConfig {
        start_resolution: ResolutionLimit::Unlimited,
        ..progressive(3, 64)
    });
    manager.reset(BufferParams::new(32, 32), SampleLimit::Finite(3));

    for _ in 0..3 {
        assert!(manager.next());
        let task = manager.next_tile(0, TileKinds::RENDER).expect("single tile");
        let mut buffer = manager.acquire_buffer(task.index, 1).expect("allocation");
        buffer.add_samples(task.num_samples);
        manager.release_buffer(task.index, buffer);
        let finish = manager.finish_tile(task.index, false);
        assert_eq!(finish, TileFinish { write: true, free: false });
    }
    assert_eq!(manager.tile_buffer(0).map(TileBuffer::sample_count), Some(3));

    manager.reset(BufferParams::new(32, 32), SampleLimit::Finite(3));
    assert_eq!(manager.stored_buffers(), 0);
    assert!(manager.tile_buffer(0).is_none());
}

#[test]
fn has_tiles_tracks_unfinished_work() {
    let mut manager = manager(offline(1));
    manager.reset(BufferParams::new(64, 64), SampleLimit::Finite(1));
    assert!(!manager.has_tiles());
    manager.next();
    assert!(manager.has_tiles());
    run_step(&mut manager, false);
    assert!(!manager.has_tiles());
}

#[test]
fn sample_range_setter_validates_and_updates_estimate() {
    let mut manager = manager(offline(10));
    manager.reset(BufferParams::new(10, 10), SampleLimit::Finite(10));
    assert_eq!(manager.state().total_pixel_samples, 1_000);

    assert_eq!(
        manager.set_sample_range(Some(SampleRange { start: 1, num: 0 })),
        Err(SchedulerConfigError::EmptySampleRange)
    );
    manager
        .set_sample_range(Some(SampleRange { start: 2, num: 3 }))
        .expect("valid range");
    assert_eq!(manager.state().total_pixel_samples, 300);
    assert_eq!(manager.num_effective_samples(), 3);

    manager.reset(BufferParams::new(10, 10), SampleLimit::Finite(10));
    assert_eq!(manager.state().sample, 1);
}

#[test]
fn invalid_config_is_rejected_by_new() {
    let error = TileManager::new(SchedulerConfig {
        tile_order: TileOrder::HilbertSpiral,
        background: false,
        ..SchedulerConfig::default()
    })
    .unwrap_err();
    assert_eq!(error, SchedulerConfigError::HilbertSpiralRequiresUnslicedTiling);
}

#[test]
#[should_panic(expected = "finish_tile called for tile 0 in state Done")]
fn finishing_a_done_tile_panics() {
    let mut manager = manager(offline(1));
    manager.reset(BufferParams::new(16, 16), SampleLimit::Finite(1));
    manager.next();
    manager.finish_tile(0, false);
    manager.finish_tile(0, false);
}

#[test]
fn shared_manager_hands_each_tile_to_one_worker() {
    let mut inner = manager(SchedulerConfig {
        schedule_denoising: true,
        tile_size: TileSize::square(8),
        ..offline(2)
    });
    inner.reset(BufferParams::new(64, 64), SampleLimit::Finite(2));
    inner.next();
    let shared = SharedTileManager::new(inner);
    let handed = Mutex::new(Vec::new());

    std::thread::scope(|scope| {
        for worker in 0..4 {
            let shared = shared.clone();
            let handed = &handed;
            scope.spawn(move || {
                while shared.has_tiles() {
                    let Some(task) =
                        shared.next_tile(worker, TileKinds::RENDER | TileKinds::DENOISE)
                    else {
                        std::thread::yield_now();
                        continue;
                    };
                    let buffer = shared
                        .acquire_buffer(task.index, 1)
                        .expect("small allocation");
                    shared.release_buffer(task.index, buffer);
                    let finished = shared.finish_tile(task.index, true);
                    assert_eq!(finished.finish.write, finished.buffer.is_some());
                    handed
                        .lock()
                        .expect("test lock poisoned")
                        .push((task.index, task.work));
                }
            });
        }
    });

    let handed = handed.into_inner().expect("test lock poisoned");
    let distinct = handed.iter().copied().collect::<HashSet<_>>();
    assert_eq!(handed.len(), 128);
    assert_eq!(distinct.len(), 128);
    let manager = shared.try_unwrap().expect("last handle");
    assert_eq!(manager.stored_buffers(), 0);
    assert_eq!(manager.progress().fraction, Some(1.0));
}

proptest! {
    #[test]
    fn sessions_refine_monotonically_and_terminate(
        width in 1u32..300,
        height in 1u32..300,
        samples in 1u32..6,
        start in 1u32..64,
        pixel_size in 1u32..4,
        progressive in any::<bool>(),
    ) {
        let mut manager = manager(SchedulerConfig {
            progressive,
            samples: SampleLimit::Finite(samples),
            start_resolution: ResolutionLimit::Limited(start),
            pixel_size,
            tile_size: TileSize::square(24),
            ..SchedulerConfig::default()
        });
        manager.reset(BufferParams::new(width, height), SampleLimit::Finite(samples));

        let mut previous_divider = u32::MAX;
        let mut steps = 0;
        while manager.next() {
            let state = manager.state();
            prop_assert!(state.resolution_divider <= previous_divider);
            prop_assert!(state.resolution_divider >= pixel_size);
            if state.resolution_divider > pixel_size {
                prop_assert!(!manager.done());
            }
            prop_assert_eq!(manager.tiling().covered_area(), state.buffer.pixel_count());
            previous_divider = state.resolution_divider;
            run_step(&mut manager, false);
            steps += 1;
            prop_assert!(steps <= 64, "session did not terminate");
        }
        prop_assert!(manager.done());
        prop_assert_eq!(manager.state().resolution_divider, pixel_size);
    }
}
