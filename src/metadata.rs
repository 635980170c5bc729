use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::bounds::{Bounds, Delta, Point};
use crate::cesium::CesiumSettings;
use crate::endpoint::{ensure_put, Endpoint};
use crate::error::IndexError;
use crate::format::{Format, FormatConfig};
use crate::manifest::Manifest;
use crate::id::Id;
use crate::schema::Schema;
use crate::structure::{Structure, StructureConfig};
use crate::subset::{Span, Subset};

/// Padding ratio applied to the conforming bounds for point acceptance, so
/// samples sitting exactly on the declared maximum still index.
const EPSILON: f64 = 0.005;

/// Metadata blob name at the output root; the manifest rides next to it.
pub const METADATA_FILE: &str = "cairn";
pub const MANIFEST_FILE: &str = "cairn-manifest";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reprojection {
    #[serde(skip_serializing_if = "Option::is_none", rename = "in")]
    pub in_srs: Option<String>,
    #[serde(rename = "out")]
    pub out_srs: String,
    /// Use the declared input SRS even when headers carry their own.
    #[serde(default)]
    pub hammer: bool,
}

/// Everything needed to start a fresh build.
pub struct MetadataConfig {
    pub bounds_native: Bounds,
    pub schema: Schema,
    pub structure: StructureConfig,
    pub hierarchy_structure: Option<StructureConfig>,
    pub manifest: Manifest,
    pub format: FormatConfig,
    pub delta: Option<Delta>,
    pub reprojection: Option<Reprojection>,
    pub subset: Option<Subset>,
    pub transformation: Option<Vec<f64>>,
    pub cesium: Option<CesiumSettings>,
}

/// The immutable bundle describing one build: bounds in all their forms,
/// schema, tree structures, and the chunk format. The manifest travels in a
/// separate blob so that per-file updates never rewrite the metadata.
#[derive(Clone, Debug)]
pub struct Metadata {
    bounds_native: Bounds,
    bounds_conforming: Bounds,
    bounds_epsilon: Bounds,
    bounds: Bounds,
    schema: Schema,
    structure: Structure,
    hierarchy_structure: Structure,
    delta: Option<Delta>,
    format: Format,
    reprojection: Option<Reprojection>,
    subset: Option<Subset>,
    bounds_subset: Option<Bounds>,
    transformation: Option<Vec<f64>>,
    cesium: Option<CesiumSettings>,
}

impl Metadata {
    pub fn new(config: MetadataConfig) -> Result<(Metadata, Manifest), IndexError> {
        if config.bounds_native.is_empty() {
            return Err(IndexError::input("bounds are empty"));
        }
        if !config.schema.is_normal() {
            return Err(IndexError::input(
                "schema must begin with X, Y, Z double dimensions",
            ));
        }

        let structure = Structure::new(config.structure.clone())?;
        let hierarchy_structure = Structure::new(
            config
                .hierarchy_structure
                .unwrap_or_else(|| default_hierarchy(&config.structure)),
        )?;

        let delta = config.delta;
        let bounds_conforming = match &delta {
            Some(d) => config.bounds_native.deltify(d),
            None => config.bounds_native,
        };
        let bounds = config.bounds_native.cubeify(delta.as_ref());
        let bounds_subset = match &config.subset {
            Some(s) => {
                // Fail early when the base cannot split this many ways.
                let spans = s.calc_spans(&structure)?;
                if structure.bump_depth() != 0 {
                    // Bumped-depth merges promote whole chunks; a single
                    // subset span wider than a chunk cannot fold back.
                    let deepest = spans.last().map(Span::width).unwrap_or_else(Id::zero);
                    if deepest > structure.base_points_per_chunk() {
                        return Err(IndexError::config(
                            "bump depth requires subset spans no wider than a chunk",
                        ));
                    }
                }
                Some(s.bounds(&bounds))
            }
            None => None,
        };

        let format = Format::new(config.schema.clone(), delta, config.format)?;

        let metadata = Metadata {
            bounds_native: config.bounds_native,
            bounds_conforming,
            bounds_epsilon: bounds_conforming.grow_by(EPSILON),
            bounds,
            schema: config.schema,
            structure,
            hierarchy_structure,
            delta,
            format,
            reprojection: config.reprojection,
            subset: config.subset,
            bounds_subset,
            transformation: config.transformation,
            cesium: config.cesium,
        };

        Ok((metadata, config.manifest))
    }

    pub fn bounds_native(&self) -> &Bounds {
        &self.bounds_native
    }

    pub fn bounds_conforming(&self) -> &Bounds {
        &self.bounds_conforming
    }

    /// Acceptance bounds: conforming, padded.
    pub fn bounds_epsilon(&self) -> &Bounds {
        &self.bounds_epsilon
    }

    /// The traversal cube.
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn bounds_subset(&self) -> Option<&Bounds> {
        self.bounds_subset.as_ref()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn structure(&self) -> &Structure {
        &self.structure
    }

    pub fn hierarchy_structure(&self) -> &Structure {
        &self.hierarchy_structure
    }

    pub fn delta(&self) -> Option<&Delta> {
        self.delta.as_ref()
    }

    pub fn format(&self) -> &Format {
        &self.format
    }

    pub fn set_srs(&mut self, srs: String) {
        self.format.set_srs(srs);
    }

    pub fn reprojection(&self) -> Option<&Reprojection> {
        self.reprojection.as_ref()
    }

    pub fn subset(&self) -> Option<&Subset> {
        self.subset.as_ref()
    }

    pub fn transformation(&self) -> Option<&[f64]> {
        self.transformation.as_deref()
    }

    pub fn cesium(&self) -> Option<&CesiumSettings> {
        self.cesium.as_ref()
    }

    /// Postfix applied to stored names. Cold data chunks skip the subset
    /// postfix: their id ranges never collide across subsets, so colocated
    /// subsets share one chunk namespace.
    pub fn postfix_for(&self, is_cold_chunk: bool) -> String {
        match &self.subset {
            Some(s) if !is_cold_chunk => s.postfix(),
            _ => String::new(),
        }
    }

    pub fn postfix(&self) -> String {
        self.postfix_for(false)
    }

    /// Strip subset state after a completed merge.
    pub fn make_whole(&mut self) {
        self.subset = None;
        self.bounds_subset = None;
        self.structure.unbump();
        self.hierarchy_structure.unbump();
    }

    pub fn to_json(&self, errors: &[String]) -> Value {
        let mut doc = json!({
            "boundsNative": self.bounds_native,
            "boundsConforming": self.bounds_conforming,
            "bounds": self.bounds,
            "schema": self.schema,
            "structure": self.structure,
            "hierarchyStructure": self.hierarchy_structure,
            "format": self.format.to_config(),
        });

        if let Some(r) = &self.reprojection {
            doc["reprojection"] = json!(r);
        }
        if let Some(s) = &self.subset {
            doc["subset"] = json!(s);
        }
        if let Some(d) = &self.delta {
            doc["scale"] = point_json(d.scale);
            doc["offset"] = point_json(d.offset);
        }
        if let Some(t) = &self.transformation {
            doc["transformation"] = json!(t);
        }
        if let Some(c) = &self.cesium {
            doc["formats"] = json!({ "cesium": c });
        }
        if !errors.is_empty() {
            doc["errors"] = json!(errors);
        }

        doc
    }

    pub fn from_json(doc: &Value) -> Result<(Metadata, Vec<String>), IndexError> {
        let bounds_native: Bounds =
            field(doc, "boundsNative").or_else(|_| field(doc, "boundsConforming"))?;
        let bounds_conforming: Bounds = field(doc, "boundsConforming")?;
        let bounds: Bounds = field(doc, "bounds")?;
        let schema: Schema = field(doc, "schema")?;
        let structure: Structure = field(doc, "structure")?;
        let hierarchy_structure: Structure = field(doc, "hierarchyStructure")?;
        let format_config: FormatConfig = field(doc, "format")?;

        let delta = if Delta::exists_in(doc) {
            Some(Delta::new(
                point_field(doc, "scale", Point::ONE)?,
                point_field(doc, "offset", Point::ZERO)?,
            ))
        } else {
            None
        };

        let reprojection = optional(doc, "reprojection")?;
        let subset: Option<Subset> = optional(doc, "subset")?;
        let transformation = optional(doc, "transformation")?;
        let cesium = match doc.get("formats").and_then(|f| f.get("cesium")) {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| IndexError::corrupt(format!("metadata key formats.cesium: {e}")))?,
            None => None,
        };
        let errors: Vec<String> = optional(doc, "errors")?.unwrap_or_default();

        let bounds_subset = subset.as_ref().map(|s: &Subset| s.bounds(&bounds));
        let format = Format::new(schema.clone(), delta, format_config)?;

        Ok((
            Metadata {
                bounds_native,
                bounds_conforming,
                bounds_epsilon: bounds_conforming.grow_by(EPSILON),
                bounds,
                schema,
                structure,
                hierarchy_structure,
                delta,
                format,
                reprojection,
                subset,
                bounds_subset,
                transformation,
                cesium,
            },
            errors,
        ))
    }

    pub fn save(
        &self,
        endpoint: &Endpoint,
        manifest: &Manifest,
        errors: &[String],
    ) -> Result<(), IndexError> {
        let pf = self.postfix();

        let doc = serde_json::to_vec_pretty(&self.to_json(errors))
            .map_err(|e| IndexError::Input(e.to_string()))?;
        ensure_put(endpoint, &format!("{METADATA_FILE}{pf}"), &doc)?;

        let manifest =
            serde_json::to_vec(manifest).map_err(|e| IndexError::Input(e.to_string()))?;
        ensure_put(endpoint, &format!("{MANIFEST_FILE}{pf}"), &manifest)?;

        Ok(())
    }

    pub fn load(
        endpoint: &Endpoint,
        subset_id: Option<u64>,
    ) -> Result<(Metadata, Manifest, Vec<String>), IndexError> {
        let pf = match subset_id {
            Some(id) => format!("-{id}"),
            None => String::new(),
        };

        let doc: Value = endpoint.get_json(&format!("{METADATA_FILE}{pf}"))?;
        let (metadata, errors) = Metadata::from_json(&doc)?;
        let manifest: Manifest = endpoint.get_json(&format!("{MANIFEST_FILE}{pf}"))?;

        Ok((metadata, manifest, errors))
    }
}

/// Hierarchy counting mirrors the main tree but always bounds its depth.
fn default_hierarchy(s: &StructureConfig) -> StructureConfig {
    StructureConfig {
        cold_depth: if s.cold_depth == 0 {
            s.base_depth + 6
        } else {
            s.cold_depth
        },
        ..s.clone()
    }
}

fn point_json(p: Point) -> Value {
    json!([p.x, p.y, p.z])
}

fn field<T: serde::de::DeserializeOwned>(doc: &Value, name: &str) -> Result<T, IndexError> {
    let v = doc
        .get(name)
        .ok_or_else(|| IndexError::corrupt(format!("metadata missing key: {name}")))?;
    serde_json::from_value(v.clone())
        .map_err(|e| IndexError::corrupt(format!("metadata key {name}: {e}")))
}

fn optional<T: serde::de::DeserializeOwned>(
    doc: &Value,
    name: &str,
) -> Result<Option<T>, IndexError> {
    match doc.get(name) {
        Some(v) => Ok(Some(serde_json::from_value(v.clone()).map_err(|e| {
            IndexError::corrupt(format!("metadata key {name}: {e}"))
        })?)),
        None => Ok(None),
    }
}

fn point_field(doc: &Value, name: &str, default: Point) -> Result<Point, IndexError> {
    match doc.get(name) {
        Some(v) => {
            let arr: [f64; 3] = serde_json::from_value(v.clone())
                .map_err(|e| IndexError::corrupt(format!("metadata key {name}: {e}")))?;
            Ok(Point::from_array(arr))
        }
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use glam::DVec3;

    fn config() -> MetadataConfig {
        MetadataConfig {
            bounds_native: Bounds::new(DVec3::ZERO, DVec3::splat(10.0)),
            schema: schema::xyz(),
            structure: StructureConfig {
                null_depth: 1,
                base_depth: 5,
                cold_depth: 9,
                points_per_chunk: 256,
                ..StructureConfig::default()
            },
            hierarchy_structure: None,
            manifest: Manifest::new(vec!["a.bin".into()]),
            format: FormatConfig::default(),
            delta: None,
            reprojection: None,
            subset: None,
            transformation: None,
            cesium: None,
        }
    }

    #[test]
    fn bounds_derivation() {
        let (m, _) = Metadata::new(config()).unwrap();
        // Max extent 10 rounds up to a 16-sided cube about the center.
        assert_eq!(m.bounds().max() - m.bounds().min(), DVec3::splat(16.0));
        assert!(m.bounds_epsilon().contains(DVec3::splat(10.0)));
        assert!(!m.bounds_conforming().contains(DVec3::splat(10.0)));
    }

    #[test]
    fn delta_makes_conforming_integral() {
        let mut c = config();
        c.delta = Some(Delta::new(DVec3::splat(0.5), DVec3::ZERO));
        let (m, _) = Metadata::new(c).unwrap();
        assert_eq!(m.bounds_conforming().max(), DVec3::splat(20.0));
    }

    #[test]
    fn json_round_trip_preserves_everything() {
        let mut c = config();
        c.delta = Some(Delta::new(DVec3::splat(0.01), DVec3::splat(1.0)));
        c.subset = Some(Subset::new(2, 4).unwrap());
        c.cesium = Some(CesiumSettings::default());
        let (m, _) = Metadata::new(c).unwrap();

        let doc = m.to_json(&["boom".to_string()]);
        for key in [
            "boundsNative",
            "boundsConforming",
            "bounds",
            "schema",
            "structure",
            "hierarchyStructure",
            "format",
            "subset",
            "scale",
            "offset",
        ] {
            assert!(doc.get(key).is_some(), "missing {key}");
        }

        let (back, errors) = Metadata::from_json(&doc).unwrap();
        assert_eq!(errors, vec!["boom".to_string()]);
        assert_eq!(back.bounds(), m.bounds());
        assert_eq!(back.schema(), m.schema());
        assert_eq!(back.structure(), m.structure());
        assert_eq!(back.delta(), m.delta());
        assert_eq!(back.subset(), m.subset());
        assert_eq!(back.bounds_subset(), m.bounds_subset());
    }

    #[test]
    fn save_and_load() {
        let ep = Endpoint::memory();
        let (m, manifest) = Metadata::new(config()).unwrap();
        m.save(&ep, &manifest, &[]).unwrap();
        assert!(ep.exists(METADATA_FILE));
        assert!(ep.exists(MANIFEST_FILE));

        let (back, manifest, errors) = Metadata::load(&ep, None).unwrap();
        assert!(errors.is_empty());
        assert_eq!(manifest.len(), 1);
        assert_eq!(back.structure(), m.structure());
    }

    #[test]
    fn subset_postfix_rules() {
        let mut c = config();
        c.subset = Some(Subset::new(1, 4).unwrap());
        let (m, _) = Metadata::new(c).unwrap();
        assert_eq!(m.postfix(), "-1");
        assert_eq!(m.postfix_for(true), "");

        let mut whole = m.clone();
        whole.make_whole();
        assert_eq!(whole.postfix(), "");
    }

    #[test]
    fn rejects_bad_input() {
        let mut c = config();
        c.bounds_native = Bounds::new(DVec3::ONE, DVec3::ONE);
        assert!(Metadata::new(c).is_err());

        let mut c = config();
        c.schema = Schema::new(vec![crate::schema::DimInfo::new(
            "Intensity",
            crate::schema::DimType::UInt16,
        )]);
        assert!(Metadata::new(c).is_err());
    }
}
