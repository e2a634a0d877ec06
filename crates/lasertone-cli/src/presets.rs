//! Material preset table.
//!
//! Maps material + variant (+ optionally laser type) to the base
//! [`ProcessingParams`] a run starts from. The built-in table ships in
//! `presets.json` next to this crate's manifest; `--presets` replaces it
//! with a file of the same schema:
//!
//! ```json
//! {
//!   "wood": {
//!     "light": {
//!       "params": { "contrast": 1.2, "ditherEnabled": true },
//!       "lasers": { "co2": { "contrast": 1.1 } }
//!     }
//!   }
//! }
//! ```
//!
//! A laser entry replaces the variant's `params` wholesale. Unknown keys
//! are ignored and missing parameter keys take their defaults.

use std::collections::HashMap;
use std::path::Path;

use lasertone_pipeline::{LaserType, MaterialContext, PipelineError, ProcessingParams};
use serde::{Deserialize, Serialize};

const BUILTIN: &str = include_str!("../presets.json");

/// Presets keyed by material id, then variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresetTable {
    materials: HashMap<String, HashMap<String, VariantPreset>>,
}

/// Parameters for one material variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantPreset {
    /// Parameters used for any laser without its own entry.
    #[serde(default)]
    pub params: ProcessingParams,
    /// Laser-specific replacements for `params`.
    #[serde(default)]
    pub lasers: HashMap<LaserType, ProcessingParams>,
}

impl VariantPreset {
    fn for_laser(&self, laser: LaserType) -> &ProcessingParams {
        self.lasers.get(&laser).unwrap_or(&self.params)
    }
}

impl PresetTable {
    /// The table compiled into the binary.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the embedded JSON is
    /// malformed.
    pub fn builtin() -> Result<Self, PipelineError> {
        Self::from_json(BUILTIN)
    }

    /// Parse a table from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `json` does not match
    /// the table schema.
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(json)
            .map_err(|e| PipelineError::InvalidConfig(format!("preset table: {e}")))
    }

    /// Read and parse a table from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the file cannot be read
    /// or parsed.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::InvalidConfig(format!("reading {}: {e}", path.display()))
        })?;
        let table = Self::from_json(&content)?;
        tracing::info!(
            path = %path.display(),
            materials = table.materials.len(),
            "loaded preset table"
        );
        Ok(table)
    }

    /// Material ids in the table, sorted.
    #[must_use]
    pub fn material_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.materials.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Look up the base parameters for `material`.
    ///
    /// Material and variant names match case-insensitively. A laser entry
    /// wins over the variant's shared parameters.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the known choices
    /// when the material or variant is not in the table.
    pub fn resolve(&self, material: &MaterialContext) -> Result<ProcessingParams, PipelineError> {
        let variants = find_ignore_case(&self.materials, &material.material_id).ok_or_else(|| {
            PipelineError::InvalidConfig(format!(
                "unknown material `{}` (known: {})",
                material.material_id,
                self.material_ids().join(", ")
            ))
        })?;
        let preset = find_ignore_case(variants, &material.variant).ok_or_else(|| {
            let mut known: Vec<&str> = variants.keys().map(String::as_str).collect();
            known.sort_unstable();
            PipelineError::InvalidConfig(format!(
                "unknown variant `{}` for material `{}` (known: {})",
                material.variant,
                material.material_id,
                known.join(", ")
            ))
        })?;
        let params = preset.for_laser(material.laser_type).clone();
        tracing::debug!(
            material = %material.material_id,
            variant = %material.variant,
            laser = %material.laser_type,
            laser_specific = preset.lasers.contains_key(&material.laser_type),
            "resolved preset"
        );
        Ok(params)
    }
}

fn find_ignore_case<'a, V>(map: &'a HashMap<String, V>, key: &str) -> Option<&'a V> {
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lasertone_pipeline::DitherType;

    use super::*;

    fn ctx(material: &str, variant: &str, laser: LaserType) -> MaterialContext {
        MaterialContext::new(material, variant, laser)
    }

    #[test]
    fn builtin_table_parses() {
        let table = PresetTable::builtin().unwrap();
        assert!(table.material_ids().contains(&"wood"));
        assert!(table.material_ids().contains(&"metal"));
    }

    #[test]
    fn builtin_params_are_already_in_range() {
        let table = PresetTable::builtin().unwrap();
        for variants in table.materials.values() {
            for preset in variants.values() {
                assert_eq!(preset.params, preset.params.clamped());
                for params in preset.lasers.values() {
                    assert_eq!(*params, params.clamped());
                }
            }
        }
    }

    #[test]
    fn laser_entry_wins_over_shared_params() {
        let table = PresetTable::builtin().unwrap();
        let co2 = table.resolve(&ctx("wood", "light", LaserType::Co2)).unwrap();
        assert_eq!(co2.brightness, 5);
        assert_eq!(co2.dither_type, DitherType::FloydSteinberg);

        let diode = table.resolve(&ctx("wood", "light", LaserType::Diode)).unwrap();
        assert_eq!(diode.brightness, 0);
        assert_eq!(diode.dither_type, DitherType::JarvisJudiceNinke);
    }

    #[test]
    fn lookup_ignores_case() {
        let table = PresetTable::builtin().unwrap();
        let params = table.resolve(&ctx("Slate", "DARK", LaserType::Diode)).unwrap();
        assert!(params.invert);
    }

    #[test]
    fn unknown_material_lists_choices() {
        let table = PresetTable::builtin().unwrap();
        let err = table
            .resolve(&ctx("granite", "light", LaserType::Diode))
            .unwrap_err();
        let PipelineError::InvalidConfig(msg) = err else {
            unreachable!("expected InvalidConfig, got {err:?}");
        };
        assert!(msg.contains("granite"));
        assert!(msg.contains("wood"));
    }

    #[test]
    fn unknown_variant_is_rejected() {
        let table = PresetTable::builtin().unwrap();
        let result = table.resolve(&ctx("wood", "burnt", LaserType::Diode));
        assert!(matches!(result, Err(PipelineError::InvalidConfig(msg)) if msg.contains("burnt")));
    }

    #[test]
    fn malformed_json_is_invalid_config() {
        let result = PresetTable::from_json("{\"wood\": [1, 2]}");
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn custom_table_ignores_unknown_keys() {
        let json = r#"{
            "cork": {
                "natural": {
                    "params": { "contrast": 1.7, "powerPercent": 60 },
                    "notes": "test piece first"
                }
            }
        }"#;
        let table = PresetTable::from_json(json).unwrap();
        let params = table.resolve(&ctx("cork", "natural", LaserType::Fiber)).unwrap();
        assert!((params.contrast - 1.7).abs() < f64::EPSILON);
        assert_eq!(params.level_in_high, 255);
    }

    #[test]
    fn load_reports_missing_file() {
        let result = PresetTable::load(Path::new("/nonexistent/presets.json"));
        assert!(matches!(result, Err(PipelineError::InvalidConfig(msg)) if msg.contains("reading")));
    }
}
