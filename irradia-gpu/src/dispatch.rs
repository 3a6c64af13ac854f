use bytemuck::{Pod, Zeroable};

/// Value stored inside count buffers before their producing pass runs.
///
/// Sizing a dispatch from a count equal to this value means that the pass
/// which should've produced the count hasn't been executed yet.
pub const POISONED_COUNT: u32 = u32::MAX;

/// Returns the number of work groups needed to process `count` elements,
/// i.e. `ceil(count / group_size)`.
pub fn group_count(count: u32, group_size: u32) -> u32 {
    let group_size = group_size.max(1);

    count / group_size + (count % group_size != 0) as u32
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchArgs {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchArgs {
    pub fn new(count: u32, group_size: u32) -> Self {
        Self {
            x: group_count(count, group_size),
            y: 1,
            z: 1,
        }
    }

    pub fn group_count(&self) -> u32 {
        self.x * self.y * self.z
    }

    pub fn is_empty(&self) -> bool {
        self.group_count() == 0
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchRaysArgs {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl DispatchRaysArgs {
    pub fn new(count: u32) -> Self {
        Self {
            width: count,
            height: 1,
            depth: 1,
        }
    }

    pub fn ray_count(&self) -> u32 {
        self.width * self.height * self.depth
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

impl DrawArgs {
    pub fn new(count: u32, vertices_per_element: u32) -> Self {
        Self {
            vertex_count: vertices_per_element,
            instance_count: count,
            first_vertex: 0,
            first_instance: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_count_is_ceil() {
        assert_eq!(0, group_count(0, 64));
        assert_eq!(1, group_count(1, 64));
        assert_eq!(1, group_count(64, 64));
        assert_eq!(2, group_count(65, 64));
        assert_eq!(67_108_864, group_count(u32::MAX - 1, 64));
    }

    #[test]
    fn dispatch_args() {
        let args = DispatchArgs::new(100, 32);

        assert_eq!(4, args.x);
        assert_eq!(4, args.group_count());
        assert!(DispatchArgs::new(0, 32).is_empty());
    }
}
