//! Field rename tables from the standardized dialect to the catalog dialect.

use crate::domain::EntityKind;

pub const DATASET_FIELDS: &[(&str, &str)] = &[
    ("pid", "pid"),
    ("title", "datasetName"),
    ("isPublic", "isPublished"),
    ("size", "size"),
    ("creationDate", "creationTime"),
];

pub const DOCUMENT_FIELDS: &[(&str, &str)] = &[
    ("pid", "doi"),
    ("title", "title"),
    ("summary", "abstract"),
    ("doi", "doi"),
];

pub const FILE_FIELDS: &[(&str, &str)] = &[
    ("id", "id"),
    ("name", "dataFileList.path"),
    ("path", "dataFileList.path"),
    ("size", "dataFileList.size"),
];

pub const SAMPLE_FIELDS: &[(&str, &str)] = &[
    ("name", "description"),
    ("pid", "sampleId"),
    ("description", "description"),
];

pub const TECHNIQUE_FIELDS: &[(&str, &str)] = &[
    ("pid", "techniques.pid"),
    ("name", "techniques.name"),
];

/// Parameters that datasets may also store as a `_min`/`_max` interval.
pub const RANGE_PARAMETERS: &[&str] = &[
    "sample_temperature",
    "incident_wavelength",
    "incident_photon_energy",
];

/// Storage paths used by the secondary metadata schema, relative to
/// `scientificMetadata`.
pub struct AlternatePath {
    pub value: &'static str,
    pub unit: &'static str,
    pub target_unit: &'static str,
    /// Spelling the secondary schema writes into the unit field.
    pub stored_unit: &'static str,
}

pub fn alternate_path(parameter: &str) -> Option<AlternatePath> {
    match parameter {
        "incident_photon_energy" | "incident_wavelength" => Some(AlternatePath {
            value: "beamlineParameters.Beam energy.v",
            unit: "beamlineParameters.Beam energy.u",
            target_unit: "keV",
            stored_unit: "keV",
        }),
        "sample_temperature" => Some(AlternatePath {
            value: "sampleTemperature.value",
            unit: "sampleTemperature.unit",
            target_unit: "kelvin",
            stored_unit: "Kelvin",
        }),
        _ => None,
    }
}

pub fn field_table(kind: EntityKind) -> Option<&'static [(&'static str, &'static str)]> {
    match kind {
        EntityKind::Dataset => Some(DATASET_FIELDS),
        EntityKind::Document => Some(DOCUMENT_FIELDS),
        EntityKind::File => Some(FILE_FIELDS),
        EntityKind::Sample => Some(SAMPLE_FIELDS),
        EntityKind::Technique => Some(TECHNIQUE_FIELDS),
        EntityKind::Instrument => None,
    }
}

/// Backend name for a standardized field. Instruments keep their names.
pub fn backend_field(kind: EntityKind, field: &str) -> Option<&'static str> {
    match field_table(kind) {
        Some(table) => table
            .iter()
            .find(|(standard, _)| *standard == field)
            .map(|(_, backend)| *backend),
        None => None,
    }
}

pub fn is_range_parameter(name: &str) -> bool {
    RANGE_PARAMETERS.contains(&name)
}
