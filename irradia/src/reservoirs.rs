//! World-space reservoirs used to pick lights for secondary hits.
//!
//! Each frame, every shaded hit generates a candidate reservoir through RIS
//! over a handful of random lights; candidates are then scattered into
//! hashed world-space cells (keyed the same way as the radiance cache's
//! tiles, just with a different cell size) and resampled against the
//! previous frame's cell and the other entries of the same cell.

use glam::{uvec2, Vec3};
use irradia_gpu::{
    HashGridParams, Light, LightReservoir, LightSample, Noise,
    Provenance, ReservoirCandidate, ReservoirCell, ReservoirEntry, TileKey,
};
use log::{debug, warn};

use crate::{
    Buffer, CountBuffer, Device, DoubleBuffered, FrameContext, GiConfig,
    Kernel, ReservoirConfig, Result, Tracer,
};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ReservoirHit {
    pub position: Vec3,
    pub normal: Vec3,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReservoirStats {
    pub candidates: u32,
    pub live_cells: u32,

    /// Candidates dropped because probing didn't find any room for their
    /// cell.
    pub overflowed: u32,

    /// Candidates dropped because their cell was full of better entries.
    pub rejected: u32,
}

#[derive(Debug)]
pub struct ReservoirResampler {
    config: ReservoirConfig,
    enabled: bool,
    params: HashGridParams,
    candidates: Buffer<ReservoirCandidate>,
    candidate_count: CountBuffer,
    cells: DoubleBuffered<Buffer<ReservoirCell>>,
    entries: DoubleBuffered<Buffer<ReservoirEntry>>,
    live_cells: Buffer<u32>,
    live_cell_count: CountBuffer,
    stats: ReservoirStats,
}

impl ReservoirResampler {
    const GENERATE: Kernel = Kernel::new("reservoirs_generate", 64);
    const COMPACT: Kernel = Kernel::new("reservoirs_compact", 64);
    const RESAMPLE: Kernel = Kernel::new("reservoirs_resample", 64);

    pub fn new(
        device: &Device,
        config: &GiConfig,
        max_candidates: usize,
    ) -> Result<Self> {
        let reservoirs = &config.reservoirs;
        let num_cells = reservoirs.num_cells as usize;

        debug!(
            "Creating reservoirs: cells={}, entries_per_cell={}, \
             max_candidates={}",
            reservoirs.num_cells,
            reservoirs.num_entries_per_cell,
            max_candidates
        );

        Ok(Self {
            config: reservoirs.clone(),
            enabled: config.use_resampling,
            params: Self::params(config, Default::default(), 0.0),
            candidates: device.create_buffer(
                "irradia_reservoir_candidates",
                max_candidates,
            )?,
            candidate_count: device
                .create_count_buffer("irradia_reservoir_candidate_count")?,
            cells: DoubleBuffered::try_new(|suffix| {
                device.create_buffer(
                    format!("irradia_reservoir_hash_{suffix}"),
                    num_cells,
                )
            })?,
            entries: DoubleBuffered::try_new(|suffix| {
                device.create_buffer(
                    format!("irradia_reservoirs_{suffix}"),
                    reservoirs.num_entries() as usize,
                )
            })?,
            live_cells: device
                .create_buffer("irradia_reservoir_live_cells", num_cells)?,
            live_cell_count: device
                .create_count_buffer("irradia_reservoir_live_cell_count")?,
            stats: Default::default(),
        })
    }

    fn params(
        config: &GiConfig,
        camera_origin: Vec3,
        pixel_angle: f32,
    ) -> HashGridParams {
        let mut params =
            config.hash_grid_cache.params(camera_origin, pixel_angle);

        params.cell_size = config.reservoirs.cell_size;
        params
    }

    pub fn update_config(&mut self, config: &GiConfig) {
        self.enabled = config.use_resampling;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn stats(&self) -> ReservoirStats {
        self.stats
    }

    pub fn begin_frame(&mut self, ctx: &FrameContext) {
        self.params.camera = ctx
            .camera
            .origin()
            .extend(ctx.camera.pixel_angle());

        self.cells.flip();
        self.entries.flip();
        self.cells.curr_mut().clear();
        self.candidate_count.reset();
        self.live_cell_count.reset();
        self.stats = Default::default();
    }

    /// Generates candidate reservoirs for given hits.
    pub fn generate(
        &mut self,
        ctx: &FrameContext,
        hits: &[ReservoirHit],
        seed: u32,
    ) {
        if ctx.lights.is_empty() {
            return;
        }

        let params = &self.params;
        let initial_candidates = self.config.initial_candidates;
        let candidates = &mut self.candidates;
        let candidate_count = &mut self.candidate_count;
        let light_count = ctx.lights.len() as u32;

        Self::GENERATE.run(hits.len() as u32, |id| {
            let hit = hits[id as usize];

            if candidate_count.get_or_zero(candidates.len()) >= candidates.len()
            {
                return;
            }

            let key = params.tile_key(hit.position);
            let anchor = params.tile_center(key);
            let mut noise = Noise::from_id(seed, id);
            let mut reservoir = LightReservoir::default();

            for _ in 0..initial_candidates {
                let light_id = noise.sample_below(light_count);
                let pdf = ctx.lights[light_id as usize]
                    .target_pdf(anchor, hit.normal);

                reservoir.update(
                    &mut noise,
                    LightSample { light_id, pdf },
                    pdf * light_count as f32,
                );
            }

            let pdf = reservoir.sample.pdf;

            reservoir.normalize(pdf);

            if reservoir.w <= 0.0 {
                return;
            }

            let idx = candidate_count.fetch_add(1);

            candidates[idx as usize] = ReservoirCandidate {
                key,
                entry: ReservoirEntry::new(reservoir, hit.normal),
            };
        });

        self.stats.candidates = self.candidate_count.get().unwrap_or(0);
    }

    /// Scatters candidates into their cells.
    ///
    /// A cell holds at most `num_entries_per_cell` entries; once it's full,
    /// a candidate replaces the lowest-weight entry, but only if the
    /// candidate itself weighs more.
    pub fn compact(&mut self) {
        let num_cells = self.config.num_cells;
        let entries_per_cell = self.config.num_entries_per_cell;
        let candidates = &self.candidates;
        let cells = self.cells.curr_mut();
        let entries = self.entries.curr_mut();
        let live_cells = &mut self.live_cells;
        let live_cell_count = &mut self.live_cell_count;
        let stats = &mut self.stats;

        Self::COMPACT.run_indirect(&self.candidate_count, |id| {
            let candidate = candidates[id as usize];

            let slot = (0..ReservoirCell::MAX_PROBES).find_map(|nth| {
                let slot = ReservoirCell::probe(candidate.key, nth, num_cells);
                let cell = &mut cells[slot as usize];

                if !cell.is_valid() {
                    *cell = ReservoirCell::new(candidate.key);

                    live_cells[live_cell_count.fetch_add(1) as usize] = slot;
                }

                cell.matches(candidate.key).then_some(slot)
            });

            let Some(slot) = slot else {
                stats.overflowed += 1;
                return;
            };

            // -----------------------------------------------------------------

            let cell = &mut cells[slot as usize];
            let first = (slot * entries_per_cell) as usize;

            if cell.entry_count < entries_per_cell {
                entries[first + cell.entry_count as usize] = candidate.entry;
                cell.entry_count += 1;
                return;
            }

            let cell_entries =
                &mut entries[first..first + entries_per_cell as usize];

            let lowest = cell_entries
                .iter()
                .enumerate()
                .map(|(idx, entry)| (idx, entry.reservoir().weight()))
                .min_by(|(_, a), (_, b)| a.total_cmp(b));

            match lowest {
                Some((idx, weight))
                    if candidate.entry.reservoir().weight() > weight =>
                {
                    cell_entries[idx] = candidate.entry;
                }

                _ => {
                    stats.rejected += 1;
                }
            }
        });

        self.stats.live_cells = self.live_cell_count.get().unwrap_or(0);

        if self.stats.overflowed > 0 {
            warn!(
                "Reservoir store overflowed; dropped {} candidates",
                self.stats.overflowed
            );
        }
    }

    /// Resamples each entry against the previous frame's entries of the same
    /// cell (temporal) and against other entries of its cell (spatial).
    pub fn resample(
        &mut self,
        ctx: &FrameContext,
        seed: u32,
        spatial: bool,
        temporal: bool,
    ) {
        let params = &self.params;
        let config = &self.config;
        let entries_per_cell = config.num_entries_per_cell;
        let live_cells = &self.live_cells;
        let (cells, prev_cells) = self.cells.split_mut();
        let (entries, prev_entries) = self.entries.split_mut();

        let target_pdf = |light_id: u32, anchor: Vec3, normal: Vec3| {
            ctx.lights
                .get(light_id as usize)
                .map_or(0.0, |light| light.target_pdf(anchor, normal))
        };

        Self::RESAMPLE.run_indirect(&self.live_cell_count, |id| {
            let slot = live_cells[id as usize];
            let cell = cells[slot as usize];
            let anchor = params.tile_center(cell.key);
            let first = (slot * entries_per_cell) as usize;
            let count = cell.entry_count as usize;

            // Spatial reuse reads entries as they were before resampling
            let candidates: Vec<_> = entries[first..first + count].to_vec();

            let prev_cell = temporal
                .then(|| {
                    Self::find_cell(prev_cells, cell.key, config.num_cells)
                })
                .flatten()
                .map(|prev_slot| {
                    let first = (prev_slot * entries_per_cell) as usize;
                    let count = prev_cells[prev_slot as usize].entry_count;

                    &prev_entries[first..first + count as usize]
                });

            for (idx, candidate) in candidates.iter().enumerate() {
                let normal = candidate.normal();
                let mut noise = Noise::new(seed, uvec2(slot, idx as u32));
                let mut reservoir = LightReservoir::default();
                let initial = candidate.reservoir();

                reservoir.merge(&mut noise, &initial, initial.sample.pdf);
                reservoir.provenance = Provenance::Initial;

                // -------------------------------------------------------------

                let prev = prev_cell.and_then(|prev_entries| {
                    prev_entries.iter().max_by(|a, b| {
                        let a = a.normal().dot(normal);
                        let b = b.normal().dot(normal);

                        a.total_cmp(&b)
                    })
                });

                if let Some(prev) = prev {
                    let mut prev_reservoir = prev.reservoir();

                    prev_reservoir.clamp_m(config.max_temporal_m * initial.m);

                    let pdf = target_pdf(
                        prev_reservoir.sample.light_id,
                        anchor,
                        normal,
                    );

                    if reservoir.merge(&mut noise, &prev_reservoir, pdf) {
                        reservoir.sample.pdf = pdf;
                        reservoir.provenance = Provenance::Temporal;
                    }
                }

                // -------------------------------------------------------------

                if spatial && count > 1 {
                    for _ in 0..config.spatial_samples {
                        let other_idx = noise.sample_below(count as u32);

                        if other_idx as usize == idx {
                            continue;
                        }

                        let other = candidates[other_idx as usize].reservoir();
                        let pdf =
                            target_pdf(other.sample.light_id, anchor, normal);

                        if reservoir.merge(&mut noise, &other, pdf) {
                            reservoir.sample.pdf = pdf;
                            reservoir.provenance = Provenance::Spatial;
                        }
                    }
                }

                // -------------------------------------------------------------

                let pdf = reservoir.sample.pdf;

                reservoir.normalize(pdf);

                entries[first + idx] = ReservoirEntry::new(reservoir, normal);
            }
        });
    }

    fn find_cell(
        cells: &[ReservoirCell],
        key: TileKey,
        num_cells: u32,
    ) -> Option<u32> {
        (0..ReservoirCell::MAX_PROBES)
            .map(|nth| ReservoirCell::probe(key, nth, num_cells))
            .find(|&slot| cells[slot as usize].matches(key))
    }

    /// Returns the entries of the cell covering given position.
    pub fn cell_entries(&self, position: Vec3) -> &[ReservoirEntry] {
        let key = self.params.tile_key(position);
        let cells = self.cells.curr();

        let Some(slot) = Self::find_cell(cells, key, self.config.num_cells)
        else {
            return &[];
        };

        let first = (slot * self.config.num_entries_per_cell) as usize;
        let count = cells[slot as usize].entry_count as usize;

        &self.entries.curr()[first..first + count]
    }

    /// Returns the reservoir best suited for shading given surface, i.e. the
    /// one generated for the most similar normal.
    pub fn lookup(
        &self,
        position: Vec3,
        normal: Vec3,
    ) -> Option<LightReservoir> {
        self.cell_entries(position)
            .iter()
            .filter(|entry| entry.normal().dot(normal) > 0.0)
            .max_by(|a, b| {
                a.normal().dot(normal).total_cmp(&b.normal().dot(normal))
            })
            .map(|entry| entry.reservoir())
            .filter(|reservoir| reservoir.w > 0.0)
    }

    /// Estimates direct irradiance arriving at given surface.
    ///
    /// With resampling enabled the light comes from the surface's cell (if
    /// there's one); otherwise a single light is picked uniformly.
    pub fn direct_irradiance(
        &self,
        ctx: &FrameContext,
        tracer: &impl Tracer,
        position: Vec3,
        normal: Vec3,
        noise: &mut Noise,
    ) -> Vec3 {
        if ctx.lights.is_empty() {
            return Vec3::ZERO;
        }

        let reservoir = if self.enabled {
            self.lookup(position, normal)
        } else {
            None
        };

        let (light, weight) = match reservoir {
            Some(reservoir) => {
                let Some(light) =
                    ctx.lights.get(reservoir.sample.light_id as usize)
                else {
                    return Vec3::ZERO;
                };

                (light, reservoir.w)
            }

            None => {
                let light_id = noise.sample_below(ctx.lights.len() as u32);

                (&ctx.lights[light_id as usize], ctx.lights.len() as f32)
            }
        };

        if weight <= 0.0 {
            return Vec3::ZERO;
        }

        Self::shade(tracer, light, position, normal) * weight
    }

    fn shade(
        tracer: &impl Tracer,
        light: &Light,
        position: Vec3,
        normal: Vec3,
    ) -> Vec3 {
        let origin = position + normal * 0.001;

        if tracer.is_occluded(origin, light.center()) {
            Vec3::ZERO
        } else {
            light.radiance(position, normal)
        }
    }

    pub fn end_frame(&mut self) {
        self.candidate_count.poison();
        self.live_cell_count.poison();
    }

    pub fn clear(&mut self) {
        debug!("Clearing reservoirs");

        for cells in self.cells.iter_mut() {
            cells.clear();
        }

        for entries in self.entries.iter_mut() {
            entries.clear();
        }

        self.candidate_count.poison();
        self.live_cell_count.poison();
        self.stats = Default::default();
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::{uvec2, vec3};

    use super::*;
    use crate::test_utils::TestScene;

    fn config(num_cells: u32, num_entries_per_cell: u32) -> GiConfig {
        let mut config = GiConfig {
            use_resampling: true,
            ..Default::default()
        };

        config.reservoirs.num_cells = num_cells;
        config.reservoirs.num_entries_per_cell = num_entries_per_cell;
        config
    }

    fn hit(position: Vec3) -> ReservoirHit {
        ReservoirHit {
            position,
            normal: Vec3::Y,
        }
    }

    fn frame(
        target: &mut ReservoirResampler,
        scene: &mut TestScene,
        hits: &[ReservoirHit],
        temporal: bool,
    ) {
        let ctx = scene.ctx();
        let seed = ctx.frame.get();

        target.begin_frame(&ctx);
        target.generate(&ctx, hits, seed);
        target.compact();
        target.resample(&ctx, seed, false, temporal);
        target.end_frame();

        scene.next_frame();
    }

    #[test]
    fn generate_and_lookup() {
        let device = Device::default();
        let mut scene = TestScene::room(uvec2(16, 16));
        let mut target =
            ReservoirResampler::new(&device, &config(64, 4), 16).unwrap();

        let pos = vec3(0.5, 0.0, -1.0);

        frame(&mut target, &mut scene, &[hit(pos)], true);

        let stats = target.stats();

        assert_eq!(1, stats.candidates);
        assert_eq!(1, stats.live_cells);
        assert_eq!(0, stats.overflowed);

        let reservoir = target.lookup(pos, Vec3::Y).unwrap();

        assert_eq!(0, reservoir.sample.light_id);
        assert_relative_eq!(reservoir.w, 1.0, epsilon = 0.001);

        // Surfaces facing the other way don't share reservoirs
        assert!(target.lookup(pos, Vec3::NEG_Y).is_none());
        assert!(target.lookup(vec3(3.0, 0.0, 3.0), Vec3::Y).is_none());
    }

    #[test]
    fn cells_never_exceed_their_capacity() {
        let device = Device::default();
        let mut scene = TestScene::room(uvec2(16, 16));
        let mut target =
            ReservoirResampler::new(&device, &config(64, 4), 64).unwrap();

        let pos = vec3(0.5, 0.0, -1.0);
        let hits = vec![hit(pos); 12];

        for _ in 0..3 {
            frame(&mut target, &mut scene, &hits, true);

            assert_eq!(4, target.cell_entries(pos).len());
            assert_eq!(12, target.stats().candidates);
            assert_eq!(1, target.stats().live_cells);
        }
    }

    #[test]
    fn full_probe_sequence_overflows() {
        let device = Device::default();
        let mut scene = TestScene::room(uvec2(16, 16));
        let mut target =
            ReservoirResampler::new(&device, &config(1, 4), 16).unwrap();

        let hits = [hit(vec3(-2.0, 0.0, -2.0)), hit(vec3(2.0, 0.0, 2.0))];

        frame(&mut target, &mut scene, &hits, true);

        assert_eq!(1, target.stats().live_cells);
        assert_eq!(1, target.stats().overflowed);
        assert_eq!(1, target.cell_entries(hits[0].position).len());
        assert!(target.cell_entries(hits[1].position).is_empty());
    }

    #[test]
    fn temporal_resampling_accumulates_history() {
        let device = Device::default();
        let mut scene = TestScene::room(uvec2(16, 16));
        let mut target =
            ReservoirResampler::new(&device, &config(64, 4), 16).unwrap();

        let pos = vec3(0.5, 0.0, -1.0);
        let initial_candidates =
            GiConfig::default().reservoirs.initial_candidates;

        frame(&mut target, &mut scene, &[hit(pos)], true);

        assert_eq!(
            initial_candidates as f32,
            target.lookup(pos, Vec3::Y).unwrap().m
        );

        frame(&mut target, &mut scene, &[hit(pos)], true);

        assert_eq!(
            2.0 * initial_candidates as f32,
            target.lookup(pos, Vec3::Y).unwrap().m
        );

        frame(&mut target, &mut scene, &[hit(pos)], false);

        assert_eq!(
            initial_candidates as f32,
            target.lookup(pos, Vec3::Y).unwrap().m
        );
    }

    #[test]
    fn resampled_and_uniform_lighting_agree_for_single_light() {
        let device = Device::default();
        let mut scene = TestScene::room(uvec2(16, 16));
        let mut target =
            ReservoirResampler::new(&device, &config(64, 4), 16).unwrap();

        let pos = vec3(0.5, 0.0, -1.0);

        frame(&mut target, &mut scene, &[hit(pos)], true);

        let ctx = scene.ctx();
        let mut noise = Noise::from_id(0, 0);
        let expected = ctx.lights[0].radiance(pos, Vec3::Y);

        let resampled =
            target.direct_irradiance(&ctx, &scene, pos, Vec3::Y, &mut noise);

        target.update_config(&GiConfig::default());

        let uniform =
            target.direct_irradiance(&ctx, &scene, pos, Vec3::Y, &mut noise);

        assert_relative_eq!(resampled.x, expected.x, epsilon = 0.001);
        assert_relative_eq!(uniform.x, expected.x, epsilon = 0.001);
    }

    #[test]
    fn occluded_lights_dont_contribute() {
        let device = Device::default();
        let mut scene = TestScene::room(uvec2(16, 16));

        scene.lights = vec![Light::point(
            vec3(0.0, 5.0, -1.0),
            0.1,
            Vec3::splat(10.0),
        )];

        let target =
            ReservoirResampler::new(&device, &config(64, 4), 16).unwrap();

        let mut noise = Noise::from_id(0, 0);

        let irradiance = target.direct_irradiance(
            &scene.ctx(),
            &scene,
            Vec3::ZERO,
            Vec3::Y,
            &mut noise,
        );

        assert_eq!(Vec3::ZERO, irradiance);
    }
}
