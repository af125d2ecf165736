//! Texel storage shared by the CPU reference path and GPU read-back

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

/// One RGBA float texel. Matches `vec4<f32>` in WGSL.
pub type Texel = [f32; 4];

/// A row-major 2D array of texels.
///
/// Row `y` holds one history step for every column; column `x` is one
/// vertex (or one trail line). Index = `y * width + x`.
#[derive(Clone, Debug, PartialEq)]
pub struct TexelGrid {
    width: u32,
    height: u32,
    texels: Vec<Texel>,
}

impl TexelGrid {
    /// Create a zero-filled grid
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            texels: vec![[0.0; 4]; (width as usize) * (height as usize)],
        }
    }

    /// Wrap existing texels. Returns `None` if the length doesn't match.
    pub fn from_texels(width: u32, height: u32, texels: Vec<Texel>) -> Option<Self> {
        if texels.len() != (width as usize) * (height as usize) {
            return None;
        }
        Some(Self {
            width,
            height,
            texels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn texels(&self) -> &[Texel] {
        &self.texels
    }

    pub fn texels_mut(&mut self) -> &mut [Texel] {
        &mut self.texels
    }

    /// Read a texel with clamp-to-edge addressing (point sampling)
    pub fn get(&self, x: u32, y: u32) -> Texel {
        let x = x.min(self.width.saturating_sub(1));
        let y = y.min(self.height.saturating_sub(1));
        self.texels[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, value: Texel) {
        let index = self.index(x, y);
        self.texels[index] = value;
    }

    /// Fill every texel by evaluating `f(x, y)`
    pub fn fill_with(&mut self, mut f: impl FnMut(u32, u32) -> Texel) {
        for y in 0..self.height {
            for x in 0..self.width {
                let value = f(x, y);
                self.set(x, y, value);
            }
        }
    }

    /// Size of the grid on the GPU, in bytes
    pub fn byte_size(width: u32, height: u32) -> u64 {
        (width as u64) * (height as u64) * std::mem::size_of::<Texel>() as u64
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }
}

/// Read the xyz part of a texel
pub fn texel_xyz(texel: Texel) -> Vec3 {
    Vec3::new(texel[0], texel[1], texel[2])
}

/// Build a texel from a vector and an explicit w
pub fn texel_from(v: Vec3, w: f32) -> Texel {
    [v.x, v.y, v.z, w]
}

/// Deformed vertex as captured by the baking pass.
///
/// Aligned for WGSL: three `vec4<f32>` (48 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub _padding0: f32,
    pub normal: [f32; 3],
    pub _padding1: f32,
    /// xyz = tangent, w = handedness
    pub tangent: [f32; 4],
}

const _: () = assert!(std::mem::size_of::<MeshVertex>() == 48);

impl MeshVertex {
    pub fn new(position: Vec3, normal: Vec3, tangent: Vec4) -> Self {
        Self {
            position: position.to_array(),
            _padding0: 0.0,
            normal: normal.to_array(),
            _padding1: 0.0,
            tangent: tangent.to_array(),
        }
    }

    /// Texel written into the position snapshot
    pub fn position_texel(&self) -> Texel {
        texel_from(Vec3::from_array(self.position), 1.0)
    }

    /// Texel written into the normal snapshot
    pub fn normal_texel(&self) -> Texel {
        texel_from(Vec3::from_array(self.normal), 0.0)
    }

    /// Texel written into the tangent snapshot
    pub fn tangent_texel(&self) -> Texel {
        self.tangent
    }
}

/// Horizontal texel coordinate of vertex `index` in a buffer `count` wide
pub fn texel_u(index: u32, count: u32) -> f32 {
    (index as f32 + 0.5) / count as f32
}
