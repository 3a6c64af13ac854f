use glam::{uvec2, vec3, UVec2, Vec3};
use irradia::{
    generate_dispatch, CacheSample, Camera, Device, Error, Frame,
    FrameContext, GBuffer, GBufferEntry, Gi, GiConfig, HashGridCache, Kernel,
    Light, PopulateReport, ProbeSamplingMode, Ray, RayHit, ScreenProbes,
    TraceFlags, Tracer,
};

/// Floor at `y = 0` and ceiling at `y = 6`, both infinite.
struct Room;

impl Room {
    const PLANES: [(f32, Vec3); 2] = [(0.0, Vec3::Y), (6.0, Vec3::NEG_Y)];
}

impl Tracer for Room {
    fn trace(&self, ray: &Ray, _: TraceFlags) -> Option<RayHit> {
        Self::PLANES
            .into_iter()
            .filter_map(|(height, normal)| {
                let denom = normal.dot(ray.direction());

                if denom > -1e-4 {
                    return None;
                }

                let distance = (height - ray.origin().y) / ray.direction().y;

                (distance > 0.0 && distance < ray.len()).then(|| RayHit {
                    position: ray.at(distance),
                    normal,
                    albedo: Vec3::splat(0.5),
                    roughness: 1.0,
                    distance,
                })
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }
}

struct Sky;

impl Tracer for Sky {
    fn trace(&self, _: &Ray, _: TraceFlags) -> Option<RayHit> {
        None
    }
}

struct Scene {
    camera: Camera,
    gbuffer: GBuffer,
    lights: Vec<Light>,
    frame: Frame,
}

impl Scene {
    fn new(size: UVec2) -> Self {
        let camera = Camera::new(
            vec3(0.0, 4.0, 4.0),
            Vec3::ZERO,
            Vec3::Y,
            1.0,
            size,
        );

        let gbuffer = GBuffer::from_fn(size, |pixel| {
            match Room.trace(&camera.ray(pixel), Default::default()) {
                Some(hit) => GBufferEntry {
                    albedo: hit.albedo,
                    depth: hit.distance,
                    normal: hit.normal,
                    roughness: hit.roughness,
                    material_id: 0,
                },
                None => Default::default(),
            }
        });

        Self {
            camera,
            gbuffer,
            lights: vec![Light::point(
                vec3(0.0, 2.0, 0.0),
                0.1,
                Vec3::splat(10.0),
            )],
            frame: Frame::new(0),
        }
    }

    fn ctx(&self) -> FrameContext<'_> {
        FrameContext {
            camera: self.camera,
            prev_camera: self.camera,
            gbuffer: &self.gbuffer,
            lights: &self.lights,
            frame: self.frame,
        }
    }

    fn next_frame(&mut self) {
        self.frame = self.frame.next();
    }
}

#[test]
fn probe_hits_fill_and_recycle_cache_tiles() {
    let size = uvec2(16, 16);
    let mut config = GiConfig::default();

    config.hash_grid_cache.cell_size = 1.0;
    config.hash_grid_cache.num_buckets = 0;
    config.hash_grid_cache.num_tiles_per_bucket = 4;
    config.screen_probes.sampling_mode = ProbeSamplingMode::QuarterSpp;

    let device = Device::default();
    let mut scene = Scene::new(size);
    let mut probes = ScreenProbes::new(&device, &config, size).unwrap();
    let mut cache = HashGridCache::new(&device, &config).unwrap();

    // Frame 0: one probe per 8x8 tile, each probe reporting a single hit
    probes.reproject(&scene.ctx());
    probes.spawn(&scene.ctx(), 0);

    assert_eq!(4, probes.compact());

    probes.generate_rays(0);
    probes.trace(&Sky, TraceFlags::default());

    assert_eq!(4 * 16, probes.rays().len());
    assert!(probes.rays().iter().all(|ray| !ray.is_hit()));

    let hits = [
        vec3(-30.0, 0.0, -30.0),
        vec3(30.0, 0.0, -30.0),
        vec3(-30.0, 0.0, 30.0),
        vec3(30.0, 0.0, 30.0),
    ];

    let mut hit_probes = Vec::new();

    for ray in probes.rays_mut() {
        if hit_probes.contains(&ray.probe) {
            continue;
        }

        ray.hit_position = hits[hit_probes.len()];
        ray.hit_normal = Vec3::Y;
        ray.hit_distance = 1.0;
        hit_probes.push(ray.probe);
    }

    assert_eq!(4, hit_probes.len());

    let samples: Vec<_> = probes
        .rays()
        .iter()
        .filter(|ray| ray.is_hit())
        .map(|ray| CacheSample {
            position: ray.hit_position,
            normal: ray.hit_normal,
            radiance: Vec3::ONE,
        })
        .collect();

    cache.begin_frame(&scene.ctx());

    assert_eq!(
        PopulateReport {
            accepted: 4,
            allocated: 4,
            evicted: 0,
            overflowed: 0,
        },
        cache.populate(&samples),
    );

    cache.resolve();

    let params = *cache.params();

    let keys: Vec<_> = samples
        .iter()
        .map(|sample| params.tile_key(sample.position))
        .collect();

    for (slot, key) in keys.iter().enumerate() {
        let tile_index = cache.primary().find_tile(&params, *key).unwrap();

        assert_eq!(slot as u32, tile_index);

        let mip0 = &cache.primary().tile_cells(&params, tile_index)
            [..params.mip_size(0).pow(2) as usize];

        let populated: Vec<_> =
            mip0.iter().filter(|cell| !cell.is_empty()).collect();

        assert_eq!(1, populated.len());
        assert_eq!(1.0, populated[0].sample_count);
        assert_eq!(Vec3::ONE, populated[0].radiance);
    }

    cache.decay_and_evict();
    cache.purge_stale_tiles();
    cache.end_frame();
    probes.end_frame();

    // Frames 1..=10: nobody touches the cache
    for _ in 0..10 {
        scene.next_frame();

        cache.begin_frame(&scene.ctx());
        cache.populate(&[]);
        cache.resolve();
        cache.decay_and_evict();

        assert_eq!(0, cache.purge_stale_tiles());

        cache.end_frame();
    }

    assert_eq!(4, cache.primary().packed_tiles().len());
    assert!(cache.primary().tiles().iter().all(|tile| tile.decay == 10));

    // Frame 11: the bucket is full, so a new tile takes the oldest slot
    scene.next_frame();
    cache.begin_frame(&scene.ctx());

    let sample = CacheSample {
        position: vec3(0.0, 0.0, -60.0),
        normal: Vec3::Y,
        radiance: Vec3::ONE,
    };

    let key = params.tile_key(sample.position);

    assert!(!keys.contains(&key));

    assert_eq!(
        PopulateReport {
            accepted: 1,
            allocated: 1,
            evicted: 1,
            overflowed: 0,
        },
        cache.populate(&[sample]),
    );

    assert_eq!(4, cache.primary().live_tile_count());
    assert_eq!(0, cache.primary().bucket_overflows()[0]);
    assert_eq!(Some(0), cache.primary().find_tile(&params, key));
    assert_eq!(None, cache.primary().find_tile(&params, keys[0]));

    for key in &keys[1..] {
        assert!(cache.primary().find_tile(&params, *key).is_some());
    }
}

#[test]
fn passes_reading_unproduced_counts_are_skipped() {
    const PASS: Kernel = Kernel::new("dependent_pass", 64);

    let device = Device::default();
    let mut count = device.create_count_buffer("count").unwrap();

    assert!(matches!(
        generate_dispatch(&count, 64),
        Err(Error::CountNotProduced { .. })
    ));

    let mut threads = 0;

    PASS.run_indirect(&count, |_| threads += 1);

    assert_eq!(0, threads);

    count.reset();
    count.fetch_add(65);

    assert_eq!(2, generate_dispatch(&count, 64).unwrap().group_count());

    PASS.run_indirect(&count, |_| threads += 1);

    assert_eq!(65, threads);

    count.poison();

    PASS.run_indirect(&count, |_| threads += 1);

    assert_eq!(65, threads);
}

#[test]
fn lit_room_stays_within_bounds() {
    let size = uvec2(16, 16);
    let mut config = GiConfig::default();

    config.use_resampling = true;
    config.use_direct_lighting = true;
    config.hash_grid_cache.num_buckets = 4;
    config.reservoirs.num_cells = 64;
    config.reservoirs.num_entries_per_cell = 4;
    config.screen_probes.cached_tile_capacity = 16;
    config.screen_probes.cached_tile_max_age = 0;

    let max_entries = config.reservoirs.num_entries_per_cell as usize;

    // Temporal history is clamped before merging; on top of it come the
    // fresh candidates and the spatial neighbours
    let max_m = (1.0
        + config.reservoirs.max_temporal_m
        + config.reservoirs.spatial_samples as f32)
        * config.reservoirs.initial_candidates as f32;

    let device = Device::default();
    let mut scene = Scene::new(size);
    let mut gi = Gi::new(&device, config.clone(), size).unwrap();

    for _ in 0..8 {
        let irradiance = gi.render(&scene.ctx(), &Room);

        assert_eq!((size.x * size.y) as usize, irradiance.len());
        assert!(irradiance.iter().all(|i| i.is_finite()));
        assert!(irradiance.iter().all(|i| i.min_element() >= 0.0));

        let stats = gi.stats();

        assert_eq!(4, stats.live_probes);
        assert!(stats.reservoirs.candidates > 0);

        assert!(
            gi.hash_grid_cache().primary().live_tile_count()
                <= config.hash_grid_cache.num_tiles()
        );

        let mut seen_entries = 0;

        for x in -8..=8 {
            for z in -8..=8 {
                let position = vec3(x as f32, 6.0, z as f32);
                let entries = gi.reservoirs().cell_entries(position);

                assert!(entries.len() <= max_entries);

                for entry in entries {
                    assert!(entry.reservoir().m <= max_m);
                }

                seen_entries += entries.len();
            }
        }

        assert!(seen_entries > 0);

        scene.next_frame();
    }

    assert!(gi.irradiance().iter().any(|i| i.x > 0.0));
}
