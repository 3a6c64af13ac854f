use core::ops::{Deref, DerefMut};

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

use crate::{Noise, Normal, TileKey};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Reservoir<T> {
    pub sample: T,
    pub m: f32,
    pub w: f32,
}

impl<T> Reservoir<T>
where
    T: Clone + Copy,
{
    /// Streams a new candidate through this reservoir; returns whether the
    /// candidate has replaced the held sample.
    pub fn update(
        &mut self,
        noise: &mut Noise,
        sample: T,
        weight: f32,
    ) -> bool {
        self.m += 1.0;
        self.w += weight;

        if weight > 0.0 && noise.sample() * self.w <= weight {
            self.sample = sample;
            true
        } else {
            false
        }
    }

    /// Merges another, already normalized, reservoir into this one; `pdf` is
    /// the target function of `rhs.sample` evaluated at this reservoir's
    /// location.
    pub fn merge(&mut self, noise: &mut Noise, rhs: &Self, pdf: f32) -> bool {
        if rhs.m <= 0.0 {
            return false;
        }

        self.m += rhs.m - 1.0;
        self.update(noise, rhs.sample, rhs.w * rhs.m * pdf)
    }

    /// Turns the sum of weights into the unbiased contribution weight.
    pub fn normalize(&mut self, pdf: f32) {
        let t = self.m * pdf;

        self.w = if t == 0.0 { 0.0 } else { self.w / t };
    }

    pub fn clamp_m(&mut self, max: f32) {
        self.m = self.m.min(max);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Provenance {
    /// Sample comes straight from the candidate generation.
    #[default]
    Initial,

    /// Sample has been carried over from the previous frame.
    Temporal,

    /// Sample has been borrowed from another entry of the same cell.
    Spatial,
}

impl Provenance {
    pub fn from_u32(val: u32) -> Self {
        match val {
            1 => Self::Temporal,
            2 => Self::Spatial,
            _ => Self::Initial,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LightSample {
    pub light_id: u32,

    /// Target function of this sample, evaluated at cell's anchor.
    pub pdf: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LightReservoir {
    pub reservoir: Reservoir<LightSample>,
    pub provenance: Provenance,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct LightReservoirData {
    pub light_id: u32,
    pub pdf: f32,
    pub m: f32,
    pub w: f32,
    pub provenance: u32,
}

impl LightReservoir {
    pub fn from_data(data: LightReservoirData) -> Self {
        Self {
            reservoir: Reservoir {
                sample: LightSample {
                    light_id: data.light_id,
                    pdf: data.pdf,
                },
                m: data.m,
                w: data.w,
            },
            provenance: Provenance::from_u32(data.provenance),
        }
    }

    pub fn into_data(self) -> LightReservoirData {
        LightReservoirData {
            light_id: self.sample.light_id,
            pdf: self.sample.pdf,
            m: self.m,
            w: self.w,
            provenance: self.provenance as u32,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.m == 0.0
    }

    /// Returns the weight this reservoir would have when merged into another
    /// reservoir at the same location.
    pub fn weight(&self) -> f32 {
        self.w * self.m * self.sample.pdf
    }
}

impl Deref for LightReservoir {
    type Target = Reservoir<LightSample>;

    fn deref(&self) -> &Self::Target {
        &self.reservoir
    }
}

impl DerefMut for LightReservoir {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.reservoir
    }
}

/// Header of a world-space reservoir cell; the cell's entries are stored
/// separately, `num_entries_per_cell` of them per cell.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ReservoirCell {
    pub key: TileKey,
    pub entry_count: u32,
    pub flags: u32,
}

impl ReservoirCell {
    pub const FLAG_VALID: u32 = 1;

    /// Maximum number of slots visited while looking for a cell.
    pub const MAX_PROBES: u32 = 8;

    pub fn new(key: TileKey) -> Self {
        Self {
            key,
            entry_count: 0,
            flags: Self::FLAG_VALID,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.flags & Self::FLAG_VALID != 0
    }

    pub fn matches(&self, key: TileKey) -> bool {
        self.is_valid() && self.key == key
    }

    /// Returns the slot visited during `nth` probe for given key.
    pub fn probe(key: TileKey, nth: u32, num_cells: u32) -> u32 {
        key.spatial_hash().wrapping_add(nth) % num_cells.max(1)
    }
}

/// Reservoir stored within a cell, together with the normal of the surface
/// it's been generated for.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ReservoirEntry {
    pub reservoir: LightReservoirData,
    pub normal: Vec2,
}

impl ReservoirEntry {
    pub fn new(reservoir: LightReservoir, normal: Vec3) -> Self {
        Self {
            reservoir: reservoir.into_data(),
            normal: Normal::encode(normal),
        }
    }

    pub fn reservoir(&self) -> LightReservoir {
        LightReservoir::from_data(self.reservoir)
    }

    pub fn normal(&self) -> Vec3 {
        Normal::decode(self.normal)
    }
}

/// Reservoir generated for a single hit, waiting to be scattered into its
/// cell.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ReservoirCandidate {
    pub key: TileKey,
    pub entry: ReservoirEntry,
}

/// Decides whether a ray's secondary vertex should gather multi-bounce
/// lighting; shared by the radiance cache and the reservoirs, so that both
/// see the same set of vertices.
pub fn routes_to_multibounce(
    noise: &mut Noise,
    discard_probability: f32,
) -> bool {
    noise.sample() >= discard_probability
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn storage() {
        fn target(idx: usize) -> LightReservoir {
            LightReservoir {
                reservoir: Reservoir {
                    sample: LightSample {
                        light_id: 3 * idx as u32,
                        pdf: 0.5 + idx as f32,
                    },
                    m: 11.0,
                    w: 12.0 + (idx as f32),
                },
                provenance: if idx % 2 == 0 {
                    Provenance::Temporal
                } else {
                    Provenance::Spatial
                },
            }
        }

        let entries: Vec<_> = (0..4)
            .map(|idx| ReservoirEntry::new(target(idx), Vec3::Y))
            .collect();

        for (idx, entry) in entries.iter().enumerate() {
            assert_eq!(target(idx), entry.reservoir());
        }
    }

    #[test]
    fn zero_weight_candidates_never_win() {
        let mut noise = Noise::from_id(1, 2);
        let mut target = Reservoir::<u32>::default();

        assert!(target.update(&mut noise, 1, 1.0));
        assert!(!target.update(&mut noise, 2, 0.0));
        assert_eq!(1, target.sample);
        assert_eq!(2.0, target.m);
    }

    #[test]
    fn selection_is_proportional_to_weight() {
        let mut noise = Noise::from_id(7, 0);
        let mut hits = 0;

        for _ in 0..10_000 {
            let mut target = Reservoir::<u32>::default();

            target.update(&mut noise, 0, 1.0);
            target.update(&mut noise, 1, 3.0);

            hits += target.sample;
        }

        assert_relative_eq!(hits as f32 / 10_000.0, 0.75, epsilon = 0.03);
    }

    #[test]
    fn normalization() {
        let mut target = Reservoir {
            sample: 0u32,
            m: 4.0,
            w: 8.0,
        };

        target.normalize(0.5);
        assert_eq!(4.0, target.w);

        target.normalize(0.0);
        assert_eq!(0.0, target.w);
    }

    #[test]
    fn entry_keeps_reservoir_and_normal() {
        let reservoir = LightReservoir {
            reservoir: Reservoir {
                sample: LightSample {
                    light_id: 7,
                    pdf: 0.25,
                },
                m: 3.0,
                w: 2.0,
            },
            provenance: Provenance::Spatial,
        };

        let target = ReservoirEntry::new(reservoir, Vec3::NEG_Z);

        assert_eq!(reservoir, target.reservoir());
        assert_relative_eq!(target.normal().z, -1.0, epsilon = 0.001);
        assert_relative_eq!(reservoir.weight(), 1.5);
    }

    #[test]
    fn probing_wraps_around() {
        let key = TileKey::new(glam::IVec3::new(1, 2, 3), 0);
        let first = ReservoirCell::probe(key, 0, 16);

        for nth in 0..ReservoirCell::MAX_PROBES {
            assert_eq!((first + nth) % 16, ReservoirCell::probe(key, nth, 16));
        }
    }
}
