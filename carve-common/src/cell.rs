//! the packed 16-bit cell format.
//!
//! every voxel cell is one [`PackedCell`], laid out most-significant-first as
//! `WWWW MMMMMMM LLLLL`: a 4-bit quantized signed density ("weight"), a 7-bit
//! material id, and a 5-bit light level. the hot predicates ([`is_solid`],
//! [`is_air`]) operate on the raw weight bits and never unpack to floats.
//!
//! [`is_solid`]: PackedCell::is_solid
//! [`is_air`]: PackedCell::is_air

pub const WEIGHT_BITS: u16 = 4;
pub const MATERIAL_BITS: u16 = 7;
pub const LIGHT_BITS: u16 = 5;

pub const WEIGHT_SHIFT: u16 = MATERIAL_BITS + LIGHT_BITS;
pub const MATERIAL_SHIFT: u16 = LIGHT_BITS;

pub const WEIGHT_MAX: u16 = (1 << WEIGHT_BITS) - 1;
pub const MATERIAL_MAX: u16 = (1 << MATERIAL_BITS) - 1;
pub const LIGHT_MAX: u16 = (1 << LIGHT_BITS) - 1;

/// continuous weights live in `[WEIGHT_MIN_F, WEIGHT_MAX_F]`; the isosurface
/// sits at weight zero, positive is inside the terrain.
pub const WEIGHT_MIN_F: f32 = -0.5;
pub const WEIGHT_MAX_F: f32 = 0.5;

/// the smallest packed weight that counts as solid. the quantized midpoint is
/// treated as "just solid" so the surface-crossing test can compare raw bits.
pub const WEIGHT_SOLID_BITS: u16 = 8;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
#[repr(transparent)]
pub struct PackedCell(u16);

impl PackedCell {
    /// weight −0.5 (fully outside), material 0, light 0.
    pub const EMPTY: PackedCell = PackedCell(0);

    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    /// packs a continuous weight, material id, and light level, clamping every
    /// field into range.
    pub fn pack(weight: f32, material: u8, light: u8) -> Self {
        Self::from_fields(quantize_weight(weight), material as u16, light as u16)
    }

    pub const fn from_fields(weight_bits: u16, material: u16, light: u16) -> Self {
        let weight = if weight_bits > WEIGHT_MAX { WEIGHT_MAX } else { weight_bits };
        let material = if material > MATERIAL_MAX { MATERIAL_MAX } else { material };
        let light = if light > LIGHT_MAX { LIGHT_MAX } else { light };
        Self(weight << WEIGHT_SHIFT | material << MATERIAL_SHIFT | light)
    }

    pub const fn weight_bits(self) -> u16 {
        self.0 >> WEIGHT_SHIFT
    }

    pub fn weight(self) -> f32 {
        unquantize_weight(self.weight_bits())
    }

    pub const fn material(self) -> u8 {
        ((self.0 >> MATERIAL_SHIFT) & MATERIAL_MAX) as u8
    }

    pub const fn light(self) -> u8 {
        (self.0 & LIGHT_MAX) as u8
    }

    #[inline(always)]
    pub const fn is_solid(self) -> bool {
        self.0 >> WEIGHT_SHIFT >= WEIGHT_SOLID_BITS
    }

    #[inline(always)]
    pub const fn is_air(self) -> bool {
        self.0 >> WEIGHT_SHIFT < WEIGHT_SOLID_BITS
    }

    /// the isosurface passes through this cell's neighborhood: its density is
    /// partial, neither fully inside nor fully outside.
    #[inline(always)]
    pub const fn is_surface(self) -> bool {
        let bits = self.0 >> WEIGHT_SHIFT;
        bits > 0 && bits < WEIGHT_MAX
    }

    pub const fn with_weight_bits(self, weight_bits: u16) -> Self {
        let weight = if weight_bits > WEIGHT_MAX { WEIGHT_MAX } else { weight_bits };
        Self(self.0 & !(WEIGHT_MAX << WEIGHT_SHIFT) | weight << WEIGHT_SHIFT)
    }

    pub fn with_weight(self, weight: f32) -> Self {
        self.with_weight_bits(quantize_weight(weight))
    }

    pub const fn with_material(self, material: u8) -> Self {
        let material = if material as u16 > MATERIAL_MAX { MATERIAL_MAX } else { material as u16 };
        Self(self.0 & !(MATERIAL_MAX << MATERIAL_SHIFT) | material << MATERIAL_SHIFT)
    }

    pub const fn with_light(self, light: u8) -> Self {
        let light = if light as u16 > LIGHT_MAX { LIGHT_MAX } else { light as u16 };
        Self(self.0 & !LIGHT_MAX | light)
    }
}

/// maps `[-0.5, 0.5]` onto the 16 quantized weight steps, clamping out-of-range
/// inputs first.
pub fn quantize_weight(weight: f32) -> u16 {
    let t = (weight - WEIGHT_MIN_F) / (WEIGHT_MAX_F - WEIGHT_MIN_F);
    let t = t.clamp(0.0, 1.0);
    (t * WEIGHT_MAX as f32).round() as u16
}

pub fn unquantize_weight(bits: u16) -> f32 {
    (bits.min(WEIGHT_MAX) as f32 / WEIGHT_MAX as f32) * (WEIGHT_MAX_F - WEIGHT_MIN_F) + WEIGHT_MIN_F
}
