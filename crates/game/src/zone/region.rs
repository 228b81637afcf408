use crate::math::FxVec3;

pub const DEFAULT_AURA_M: f32 = 50.0;
pub const DEFAULT_TRANSFER_M: f32 = 25.0;

/// Planar (x, z) rectangle; zone partitioning ignores height.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ZoneRect {
    pub min_x: f32,
    pub min_z: f32,
    pub max_x: f32,
    pub max_z: f32,
}

impl ZoneRect {
    pub fn new(min_x: f32, min_z: f32, max_x: f32, max_z: f32) -> Self {
        Self {
            min_x,
            min_z,
            max_x,
            max_z,
        }
    }

    pub fn contains(&self, pos: FxVec3) -> bool {
        let (x, z) = (pos.x.to_f32(), pos.z.to_f32());
        x >= self.min_x && x <= self.max_x && z >= self.min_z && z <= self.max_z
    }

    /// Signed planar distance to this rect: negative inside (depth to the
    /// nearest edge), positive outside.
    pub fn signed_distance(&self, pos: FxVec3) -> f32 {
        let (x, z) = (pos.x.to_f32(), pos.z.to_f32());

        let dx = (self.min_x - x).max(x - self.max_x);
        let dz = (self.min_z - z).max(z - self.max_z);

        if dx <= 0.0 && dz <= 0.0 {
            // Inside: depth to nearest edge.
            dx.max(dz)
        } else {
            let ox = dx.max(0.0);
            let oz = dz.max(0.0);
            (ox * ox + oz * oz).sqrt()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NeighborZone {
    pub zone_id: u32,
    pub core: ZoneRect,
    /// Where to redirect handed-off clients.
    pub host: [u8; 4],
    pub port: u16,
}

impl NeighborZone {
    pub fn host_string(&self) -> String {
        let [a, b, c, d] = self.host;
        format!("{a}.{b}.{c}.{d}")
    }
}

/// Where a position sits relative to a zone's core and aura band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    Core,
    /// Outside the core but within the aura buffer; carries the distance
    /// past the border.
    Aura(f32),
    Outside,
}

/// This zone's geometry plus its adjacency table. All the boundary rules
/// live here: who ghosts where, and when ownership transfers.
#[derive(Debug, Clone)]
pub struct ZoneRegion {
    pub zone_id: u32,
    pub core: ZoneRect,
    pub aura_m: f32,
    pub transfer_m: f32,
    pub neighbors: Vec<NeighborZone>,
}

impl ZoneRegion {
    pub fn new(zone_id: u32, core: ZoneRect) -> Self {
        Self {
            zone_id,
            core,
            aura_m: DEFAULT_AURA_M,
            transfer_m: DEFAULT_TRANSFER_M,
            neighbors: Vec::new(),
        }
    }

    pub fn with_neighbors(mut self, neighbors: Vec<NeighborZone>) -> Self {
        self.neighbors = neighbors;
        self
    }

    pub fn classify(&self, pos: FxVec3) -> Placement {
        let d = self.core.signed_distance(pos);
        if d <= 0.0 {
            Placement::Core
        } else if d <= self.aura_m {
            Placement::Aura(d)
        } else {
            Placement::Outside
        }
    }

    /// Neighbors whose aura band covers `pos`: an owned entity here must
    /// be published to them as a ghost. Being at exactly the aura distance
    /// still counts.
    pub fn aura_targets(&self, pos: FxVec3) -> Vec<u32> {
        self.neighbors
            .iter()
            .filter(|n| {
                let d = n.core.signed_distance(pos);
                d > -self.transfer_m && d <= self.aura_m
            })
            .map(|n| n.zone_id)
            .collect()
    }

    /// The neighbor an owned entity has pushed into past the ownership
    /// threshold, if any. Deepest wins when corners overlap.
    pub fn migration_target(&self, pos: FxVec3) -> Option<&NeighborZone> {
        self.neighbors
            .iter()
            .map(|n| (n, n.core.signed_distance(pos)))
            .filter(|(_, d)| *d <= -self.transfer_m)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(n, _)| n)
    }

    pub fn neighbor(&self, zone_id: u32) -> Option<&NeighborZone> {
        self.neighbors.iter().find(|n| n.zone_id == zone_id)
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    fn fx(x: f32, z: f32) -> FxVec3 {
        FxVec3::from_vec3(Vec3::new(x, 0.0, z))
    }

    /// Two zones side by side sharing the x=0 border.
    fn west_east() -> ZoneRegion {
        let west = ZoneRect::new(-1000.0, -500.0, 0.0, 500.0);
        let east = ZoneRect::new(0.0, -500.0, 1000.0, 500.0);
        ZoneRegion::new(1, west).with_neighbors(vec![NeighborZone {
            zone_id: 2,
            core: east,
            host: [10, 0, 0, 2],
            port: 27016,
        }])
    }

    #[test]
    fn signed_distance_signs() {
        let rect = ZoneRect::new(0.0, 0.0, 100.0, 100.0);
        assert!(rect.signed_distance(fx(50.0, 50.0)) < 0.0);
        assert_eq!(rect.signed_distance(fx(150.0, 50.0)), 50.0);
        assert_eq!(rect.signed_distance(fx(50.0, 50.0)), -50.0);
    }

    #[test]
    fn classify_core_aura_outside() {
        let region = west_east();
        assert_eq!(region.classify(fx(-100.0, 0.0)), Placement::Core);
        assert!(matches!(region.classify(fx(30.0, 0.0)), Placement::Aura(d) if (d - 30.0).abs() < 0.01));
        assert_eq!(region.classify(fx(80.0, 0.0)), Placement::Outside);
    }

    #[test]
    fn aura_band_publishes_to_neighbor() {
        let region = west_east();
        // Inside own core, within 50 m of the neighbor border.
        assert_eq!(region.aura_targets(fx(-20.0, 0.0)), vec![2]);
        // Exactly at the aura distance still ghosts.
        assert_eq!(region.aura_targets(fx(-50.0, 0.0)), vec![2]);
        // Deep in own core: nothing to publish.
        assert!(region.aura_targets(fx(-200.0, 0.0)).is_empty());
    }

    #[test]
    fn migration_fires_past_transfer_threshold() {
        let region = west_east();
        // 24 m into the neighbor: not yet.
        assert!(region.migration_target(fx(24.0, 0.0)).is_none());
        // 25 m in: ownership transfer begins.
        assert_eq!(region.migration_target(fx(25.0, 0.0)).unwrap().zone_id, 2);
        assert_eq!(region.migration_target(fx(60.0, 0.0)).unwrap().zone_id, 2);
    }

    #[test]
    fn corner_overlap_prefers_deepest_neighbor() {
        let west = ZoneRect::new(-1000.0, -500.0, 0.0, 500.0);
        let east = ZoneRect::new(0.0, -500.0, 1000.0, 500.0);
        let north = ZoneRect::new(-1000.0, 500.0, 1000.0, 1500.0);
        let region = ZoneRegion::new(1, west).with_neighbors(vec![
            NeighborZone {
                zone_id: 2,
                core: east,
                host: [10, 0, 0, 2],
                port: 27016,
            },
            NeighborZone {
                zone_id: 3,
                core: north,
                host: [10, 0, 0, 3],
                port: 27016,
            },
        ]);

        // 40 m into east, 30 m into... not north; east is the only hit.
        assert_eq!(region.migration_target(fx(40.0, 0.0)).unwrap().zone_id, 2);
        // Deep into north near the corner: deepest rect wins.
        let target = region.migration_target(fx(26.0, 540.0)).unwrap();
        assert_eq!(target.zone_id, 3);
    }
}
