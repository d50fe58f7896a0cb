use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::NeuroVoxelError;
use crate::types::{Entities, ImageRecord};

pub const UNNAMED_IMAGE_TYPE: &str = "Enter name here";

const DATATYPES: &[&str] = &[
    "anat", "beh", "dwi", "eeg", "fmap", "func", "ieeg", "meg", "micr", "motion", "mrs",
    "nirs", "perf", "pet",
];
const IGNORED_DIRS: &[&str] = &["code", "models", "sourcedata", "stimuli"];
const IGNORED_TYPE_ENTITIES: &[&str] = &["SpatialReference", "extension", "tracer"];
const SORT_ENTITIES: &[&str] = &["datatype", "suffix", "desc", "param", "trc"];
const NAME_ENTITIES: &[&str] = &["desc", "param", "trc", "meas", "suffix"];

pub trait DatasetCatalog {
    fn records(&self) -> &[ImageRecord];

    fn get(&self, filter: &EntityFilter) -> Vec<ImageRecord> {
        self.records()
            .iter()
            .filter(|record| filter.matches(&record.entities))
            .cloned()
            .collect()
    }
}

/// Entity constraints; a record matches when it carries every key with an equal value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityFilter {
    constraints: BTreeMap<String, String>,
}

impl EntityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.constraints.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, entities: &Entities) -> bool {
        self.constraints
            .iter()
            .all(|(key, value)| entities.get(key) == Some(value))
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct LayoutConfigFile {
    #[serde(default)]
    entities: Vec<EntitySpec>,
}

#[derive(Debug, Deserialize)]
struct EntitySpec {
    name: String,
    key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EntityNames {
    aliases: HashMap<String, String>,
}

impl Default for EntityNames {
    fn default() -> Self {
        let aliases = [
            ("sub", "subject"),
            ("ses", "session"),
            ("acq", "acquisition"),
            ("rec", "reconstruction"),
            ("ce", "ceagent"),
            ("dir", "direction"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self { aliases }
    }
}

impl EntityNames {
    pub fn from_config(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let parsed: LayoutConfigFile = serde_json::from_str(&text)
            .with_context(|| format!("parse dataset config {}", path.display()))?;
        let mut names = Self::default();
        for spec in parsed.entities {
            let key = spec.key.unwrap_or_else(|| spec.name.clone());
            names.aliases.insert(key, spec.name);
        }
        Ok(names)
    }

    fn resolve(&self, key: &str) -> String {
        self.aliases
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct BidsLayout {
    root: PathBuf,
    records: Vec<ImageRecord>,
}

impl BidsLayout {
    pub fn scan(root: &Path, derivatives: bool) -> Result<Self> {
        Self::scan_with(root, derivatives, &EntityNames::default())
    }

    pub fn scan_with(root: &Path, derivatives: bool, names: &EntityNames) -> Result<Self> {
        if !root.is_dir() {
            return Err(anyhow::anyhow!(
                "dataset root {} is not a directory",
                root.display()
            ));
        }
        let mut files = Vec::new();
        collect_images(root, root, derivatives, &mut files)?;
        files.sort();
        let records: Vec<ImageRecord> = files
            .into_iter()
            .filter_map(|path| {
                let entities = parse_entities(&path, names)?;
                Some(ImageRecord { path, entities })
            })
            .collect();
        info!(
            "Indexed {} image files under {}",
            records.len(),
            root.display()
        );
        Ok(Self {
            root: root.to_path_buf(),
            records,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DatasetCatalog for BidsLayout {
    fn records(&self) -> &[ImageRecord] {
        &self.records
    }
}

fn collect_images(root: &Path, dir: &Path, derivatives: bool, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            let top_level = dir == root;
            if top_level && IGNORED_DIRS.contains(&name.as_str()) {
                continue;
            }
            if top_level && name == "derivatives" && !derivatives {
                continue;
            }
            collect_images(root, &path, derivatives, out)?;
        } else if name.ends_with(".nii") || name.ends_with(".nii.gz") {
            out.push(path);
        }
    }
    Ok(())
}

pub fn parse_entities(path: &Path, names: &EntityNames) -> Option<Entities> {
    let file_name = path.file_name()?.to_str()?;
    let (stem, extension) = if let Some(stem) = file_name.strip_suffix(".nii.gz") {
        (stem, "nii.gz")
    } else {
        (file_name.strip_suffix(".nii")?, "nii")
    };

    let mut entities = Entities::new();
    let tokens: Vec<&str> = stem.split('_').filter(|t| !t.is_empty()).collect();
    for (i, token) in tokens.iter().enumerate() {
        match token.split_once('-') {
            Some((key, value)) if !key.is_empty() && !value.is_empty() => {
                entities.insert(names.resolve(key), value.to_string());
            }
            _ if i + 1 == tokens.len() => {
                entities.insert("suffix".to_string(), token.to_string());
            }
            _ => debug!("Ignoring filename token `{token}` in {}", path.display()),
        }
    }
    entities.insert("extension".to_string(), extension.to_string());

    if let Some(parent) = path.parent().and_then(|p| p.file_name()).and_then(|p| p.to_str())
        && DATATYPES.contains(&parent)
    {
        entities.insert("datatype".to_string(), parent.to_string());
    }
    Some(entities)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageType {
    pub name: String,
    pub entities: Entities,
    pub n_images: usize,
}

impl ImageType {
    pub fn filter(&self) -> EntityFilter {
        self.entities
            .iter()
            .fold(EntityFilter::new(), |f, (k, v)| f.with(k.clone(), v.clone()))
    }
}

pub fn image_types(catalog: &dyn DatasetCatalog) -> Vec<ImageType> {
    let mut order: Vec<Entities> = Vec::new();
    let mut counts: HashMap<Entities, usize> = HashMap::new();
    for record in catalog.records() {
        let mut key = record.entities.clone();
        key.remove("subject");
        key.remove("session");
        let count = counts.entry(key.clone()).or_insert(0);
        if *count == 0 {
            order.push(key);
        }
        *count += 1;
    }

    let mut types: Vec<ImageType> = order
        .into_iter()
        .map(|key| {
            let n_images = counts.get(&key).copied().unwrap_or(0);
            let mut entities = key;
            for ignored in IGNORED_TYPE_ENTITIES {
                entities.remove(*ignored);
            }
            ImageType {
                name: type_name(&entities),
                entities,
                n_images,
            }
        })
        .collect();

    types.sort_by(|a, b| {
        let key = |t: &ImageType| {
            SORT_ENTITIES
                .iter()
                .map(|e| match t.entities.get(*e) {
                    Some(v) => (false, v.clone()),
                    None => (true, String::new()),
                })
                .collect::<Vec<_>>()
        };
        key(a).cmp(&key(b))
    });
    types
}

fn type_name(entities: &Entities) -> String {
    let parts: Vec<&str> = NAME_ENTITIES
        .iter()
        .filter_map(|e| entities.get(*e).map(String::as_str))
        .collect();
    if parts.is_empty() {
        UNNAMED_IMAGE_TYPE.to_string()
    } else {
        parts.join("_")
    }
}

/// Hand-assigned name for the image type carrying these entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageTypeLabel {
    pub name: String,
    pub entities: Entities,
}

pub fn apply_labels(types: &mut [ImageType], labels: &[ImageTypeLabel]) -> crate::error::Result<()> {
    for label in labels {
        let filter = label
            .entities
            .iter()
            .fold(EntityFilter::new(), |f, (k, v)| f.with(k.clone(), v.clone()));
        let matched: Vec<usize> = types
            .iter()
            .enumerate()
            .filter(|(_, t)| filter.matches(&t.entities))
            .map(|(i, _)| i)
            .collect();
        match matched.as_slice() {
            [index] => {
                debug!("Image type `{}` labelled `{}`", types[*index].name, label.name);
                types[*index].name = label.name.clone();
            }
            [] => {
                return Err(NeuroVoxelError::Configuration(format!(
                    "label `{}` matches no image type ({:?})",
                    label.name, label.entities
                )));
            }
            _ => {
                return Err(NeuroVoxelError::Configuration(format!(
                    "label `{}` matches {} image types; add entities to single one out",
                    label.name,
                    matched.len()
                )));
            }
        }
    }
    Ok(())
}

pub fn validate_labels(types: &[ImageType]) -> crate::error::Result<()> {
    let mut seen = HashSet::new();
    for t in types {
        if !seen.insert(t.name.as_str()) {
            return Err(NeuroVoxelError::Configuration(format!(
                "image type label `{}` is not unique; every image type needs a distinct name",
                t.name
            )));
        }
    }
    Ok(())
}

pub fn resolve_outcome<'a>(types: &'a [ImageType], label: &str) -> crate::error::Result<&'a ImageType> {
    types.iter().find(|t| t.name == label).ok_or_else(|| {
        let known: Vec<&str> = types.iter().map(|t| t.name.as_str()).collect();
        NeuroVoxelError::InvalidOutcome(format!(
            "`{label}` is not a known image type (available: {})",
            known.join(", ")
        ))
    })
}

pub fn image_types_frame(types: &[ImageType]) -> Result<DataFrame> {
    let mut keys: Vec<&str> = Vec::new();
    for t in types {
        for k in t.entities.keys() {
            if !keys.contains(&k.as_str()) {
                keys.push(k.as_str());
            }
        }
    }
    keys.sort_by_key(|k| {
        SORT_ENTITIES
            .iter()
            .position(|s| s == k)
            .unwrap_or(SORT_ENTITIES.len())
    });

    let mut columns: Vec<Column> = Vec::with_capacity(keys.len() + 2);
    columns.push(
        Series::new(
            "name".into(),
            types.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
        )
        .into_column(),
    );
    for key in keys {
        let values: Vec<Option<&str>> = types
            .iter()
            .map(|t| t.entities.get(key).map(String::as_str))
            .collect();
        columns.push(Series::new(key.into(), values).into_column());
    }
    columns.push(
        Series::new(
            "n_images".into(),
            types.iter().map(|t| t.n_images as u64).collect::<Vec<_>>(),
        )
        .into_column(),
    );
    Ok(DataFrame::new(columns)?)
}
