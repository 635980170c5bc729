use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bounds::Bounds;
use crate::endpoint::{ensure_put, Endpoint, EndpointError};
use crate::id::Id;

/// Tiled-visualization configuration, carried under `formats.cesium` in the
/// metadata. The tileset writer itself is an external collaborator; when
/// these settings are present the core emits one summary per chunk for it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CesiumSettings {
    pub tileset_split: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coloring: Option<String>,
}

/// Per-chunk summary handed to the visualization layer: point counts
/// bucketed by tick, plus the chunk's placement.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TileInfo {
    pub id: String,
    pub depth: u64,
    pub ticks: BTreeMap<u64, u64>,
    pub bounds: Bounds,
}

impl TileInfo {
    pub fn new(id: &Id, depth: u64, ticks: BTreeMap<u64, u64>, bounds: Bounds) -> Self {
        TileInfo {
            id: id.to_string(),
            depth,
            ticks,
            bounds,
        }
    }

    pub fn num_points(&self) -> u64 {
        self.ticks.values().sum()
    }

    /// Write this summary under the visualization sub-endpoint.
    pub fn save(&self, cesium: &Endpoint) -> Result<(), EndpointError> {
        let body = serde_json::to_vec(self)?;
        ensure_put(cesium, &format!("{}.json", self.id), &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    #[test]
    fn summary_round_trip() {
        let ep = Endpoint::memory().sub_endpoint("cesium");
        let mut ticks = BTreeMap::new();
        ticks.insert(0, 3);
        ticks.insert(5, 2);

        let info = TileInfo::new(
            &Id::new(42),
            3,
            ticks,
            Bounds::new(DVec3::ZERO, DVec3::ONE),
        );
        assert_eq!(info.num_points(), 5);
        info.save(&ep).unwrap();

        let v: serde_json::Value = ep.get_json("42.json").unwrap();
        assert_eq!(v["depth"], 3);
        assert_eq!(v["ticks"]["0"], 3);
    }
}
