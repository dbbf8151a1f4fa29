/// Entity registry for the Surfline bronze extractor.
///
/// Defines the Surfline entities this service knows how to land, along with
/// the JSON path each payload keeps its records under, how those records
/// are flattened, and which column anchors them in time for deduplication.
/// Config entries override these defaults; entities configured but absent
/// from the registry get the default profile.

use serde::Deserialize;

use crate::flatten::FlattenRules;

/// Column derived from the source timestamp, in the configured local zone.
pub const LOCAL_TIME_COLUMN: &str = "datetime";

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// Which cells identify a duplicate row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupStrategy {
    /// One row per derived local time (`datetime`).
    Time,
    /// One row per value of the entity's own time anchor column.
    Anchor,
    /// Whole-row identity, ignoring time-zone offset columns. For entities
    /// with several legitimate rows per timestamp.
    Row,
}

/// Consolidation behaviour for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityProfile {
    /// Column used for sorting and for the range-end filter.
    pub time_anchor: String,
    pub dedup: DedupStrategy,
    /// Columns holding epoch seconds that are converted to local time.
    pub epoch_columns: Vec<String>,
}

impl Default for EntityProfile {
    fn default() -> Self {
        Self {
            time_anchor: LOCAL_TIME_COLUMN.to_string(),
            dedup: DedupStrategy::Time,
            epoch_columns: Vec::new(),
        }
    }
}

/// `utcOffset`, `total_utcOffset`, `midnightUTCOffset` and the like.
pub fn is_offset_column(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with("utcoffset")
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Defaults for a single Surfline entity.
pub struct EntityDefaults {
    /// Entity name; also the last segment of the endpoint URL.
    pub name: &'static str,
    pub description: &'static str,
    /// Keys leading from the response root to the record list.
    pub json_path: &'static [&'static str],
    pub record_path: &'static [&'static str],
    pub meta: &'static [&'static str],
    pub meta_prefix: Option<&'static str>,
    pub time_anchor: &'static str,
    pub dedup: DedupStrategy,
    pub epoch_columns: &'static [&'static str],
}

impl EntityDefaults {
    pub fn json_path(&self) -> Vec<String> {
        self.json_path.iter().map(|s| s.to_string()).collect()
    }

    pub fn flatten_rules(&self) -> FlattenRules {
        FlattenRules {
            record_path: self.record_path.iter().map(|s| s.to_string()).collect(),
            meta: self.meta.iter().map(|s| s.to_string()).collect(),
            meta_prefix: self.meta_prefix.map(str::to_string),
            record_prefix: None,
            sep: None,
        }
    }

    pub fn profile(&self) -> EntityProfile {
        EntityProfile {
            time_anchor: self.time_anchor.to_string(),
            dedup: self.dedup,
            epoch_columns: self.epoch_columns.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// All Surfline forecast entities this service knows the shape of.
pub static ENTITY_REGISTRY: &[EntityDefaults] = &[
    EntityDefaults {
        name: "wind",
        description: "Hourly wind speed, gust and direction.",
        json_path: &["data", "wind"],
        record_path: &[],
        meta: &[],
        meta_prefix: None,
        time_anchor: LOCAL_TIME_COLUMN,
        dedup: DedupStrategy::Time,
        epoch_columns: &[],
    },
    EntityDefaults {
        name: "swells",
        description: "Hourly swell components; several rows share one timestamp.",
        json_path: &["data", "swells"],
        record_path: &["swells"],
        meta: &["timestamp", "utcOffset", "probability"],
        meta_prefix: Some("total_"),
        time_anchor: LOCAL_TIME_COLUMN,
        dedup: DedupStrategy::Row,
        epoch_columns: &[],
    },
    EntityDefaults {
        name: "sunlight",
        description: "Daily dawn/sunrise/sunset/dusk times, anchored on local midnight.",
        json_path: &["data", "sunlight"],
        record_path: &[],
        meta: &[],
        meta_prefix: None,
        time_anchor: "midnight",
        dedup: DedupStrategy::Anchor,
        epoch_columns: &["midnight", "dawn", "sunrise", "sunset", "dusk"],
    },
    EntityDefaults {
        name: "tides",
        description: "Tide heights with NORMAL/HIGH/LOW markers.",
        json_path: &["data", "tides"],
        record_path: &[],
        meta: &[],
        meta_prefix: None,
        time_anchor: LOCAL_TIME_COLUMN,
        dedup: DedupStrategy::Time,
        epoch_columns: &[],
    },
    EntityDefaults {
        name: "surf",
        description: "Hourly surf height range and human-readable relation.",
        json_path: &["data", "surf"],
        record_path: &[],
        meta: &[],
        meta_prefix: None,
        time_anchor: LOCAL_TIME_COLUMN,
        dedup: DedupStrategy::Time,
        epoch_columns: &[],
    },
    EntityDefaults {
        name: "rating",
        description: "Hourly spot condition rating.",
        json_path: &["data", "rating"],
        record_path: &[],
        meta: &[],
        meta_prefix: None,
        time_anchor: LOCAL_TIME_COLUMN,
        dedup: DedupStrategy::Time,
        epoch_columns: &[],
    },
    EntityDefaults {
        name: "weather",
        description: "Hourly air temperature, pressure and condition.",
        json_path: &["data", "weather"],
        record_path: &[],
        meta: &[],
        meta_prefix: None,
        time_anchor: LOCAL_TIME_COLUMN,
        dedup: DedupStrategy::Time,
        epoch_columns: &[],
    },
];

/// Looks up registry defaults by entity name. Returns `None` if unknown.
pub fn find_entity(name: &str) -> Option<&'static EntityDefaults> {
    ENTITY_REGISTRY.iter().find(|e| e.name == name)
}

pub fn all_entity_names() -> Vec<&'static str> {
    ENTITY_REGISTRY.iter().map(|e| e.name).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
