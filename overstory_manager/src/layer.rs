// Copyright 2025 the Overstory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Spatial layers and layer masks.

use bitflags::bitflags;

/// Object category used for query filtering.
///
/// A layer is a single index in `0..64`; the first sixteen have engine
/// meanings and may carry dedicated sub-indices in the manager.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Layer {
    /// Uncategorized objects.
    Default = 0,
    /// Mobile game units.
    Units = 1,
    /// Static structures.
    Buildings = 2,
    /// Short-lived fast movers.
    Projectiles = 3,
    /// Terrain chunks.
    Terrain = 4,
    /// Trigger volumes.
    Triggers = 5,
    /// Particle emitters.
    Particles = 6,
    /// Non-interactive decorations.
    Decorations = 7,
    /// Navigation helpers.
    Navigation = 8,
    /// Physics proxies.
    Physics = 9,
    /// Game-defined category.
    Custom0 = 10,
    /// Game-defined category.
    Custom1 = 11,
    /// Game-defined category.
    Custom2 = 12,
    /// Game-defined category.
    Custom3 = 13,
    /// Game-defined category.
    Custom4 = 14,
    /// Game-defined category.
    Custom5 = 15,
}

impl Layer {
    /// Layer index in `0..64`.
    #[inline]
    pub const fn index(self) -> u64 {
        self as u64
    }

    /// Single-bit mask for this layer.
    #[inline]
    pub const fn mask(self) -> LayerMask {
        LayerMask::from_bits_retain(1 << self.index())
    }
}

bitflags! {
    /// 64-bit bitfield selecting which object layers a query admits.
    ///
    /// Bits beyond the named engine layers are preserved, so game-defined
    /// layers above [`Layer::Custom5`] filter the same way.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct LayerMask: u64 {
        /// [`Layer::Default`].
        const DEFAULT = 1 << 0;
        /// [`Layer::Units`].
        const UNITS = 1 << 1;
        /// [`Layer::Buildings`].
        const BUILDINGS = 1 << 2;
        /// [`Layer::Projectiles`].
        const PROJECTILES = 1 << 3;
        /// [`Layer::Terrain`].
        const TERRAIN = 1 << 4;
        /// [`Layer::Triggers`].
        const TRIGGERS = 1 << 5;
        /// [`Layer::Particles`].
        const PARTICLES = 1 << 6;
        /// [`Layer::Decorations`].
        const DECORATIONS = 1 << 7;
        /// [`Layer::Navigation`].
        const NAVIGATION = 1 << 8;
        /// [`Layer::Physics`].
        const PHYSICS = 1 << 9;

        // Keep every bit representable so unnamed game layers survive
        // set operations.
        const _ = !0;
    }
}

impl From<Layer> for LayerMask {
    fn from(layer: Layer) -> Self {
        layer.mask()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_match_indices() {
        assert_eq!(Layer::Units.mask().bits(), 1 << 1);
        assert_eq!(Layer::Custom5.mask().bits(), 1 << 15);
        assert_eq!(LayerMask::all().bits(), u64::MAX);
    }

    #[test]
    fn unnamed_bits_survive() {
        let high = LayerMask::from_bits_retain(1 << 40);
        let combined = high | LayerMask::UNITS;
        assert!(combined.contains(high));
        assert_eq!(combined.bits(), (1 << 40) | (1 << 1));
    }
}
