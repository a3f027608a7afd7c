use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::domain::{EntityKind, Filter, Inclusion};
use crate::error::BridgeError;
use crate::mappings::{alternate_path, backend_field, is_range_parameter};
use crate::techniques::{TechniqueFilter, TechniqueStrategy};
use crate::units::{self, Quantity, number_value, unit_variants};

/// hc in J·m, used to turn a wavelength into a photon energy.
const PLANCK_TIMES_LIGHT_SPEED: f64 = 1.986e-25;

/// A filter in the catalog dialect. Only [`FilterMapper`] builds non-empty
/// instances.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatalogFilter {
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    where_clause: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    include: Vec<CatalogInclusion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skip: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<Value>,
}

impl CatalogFilter {
    pub fn where_clause(&self) -> Option<&Value> {
        self.where_clause.as_ref()
    }

    pub fn include(&self) -> &[CatalogInclusion] {
        &self.include
    }

    pub fn skip(&self) -> Option<u64> {
        self.skip
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn fields(&self) -> Option<&Value> {
        self.fields.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self == &CatalogFilter::default()
    }

    pub fn to_json(&self) -> Result<String, BridgeError> {
        serde_json::to_string(self).map_err(|err| BridgeError::EncodeFilter(err.to_string()))
    }

    /// The same filter narrowed to `key = value`, without paging.
    pub fn scoped_to(&self, key: &str, value: Value) -> CatalogFilter {
        let mut pinned = Map::new();
        pinned.insert(key.to_string(), value);
        let pinned = Value::Object(pinned);
        let where_clause = match &self.where_clause {
            None => pinned,
            Some(existing) => match existing.get("and").and_then(Value::as_array) {
                Some(items) => {
                    let mut all = vec![pinned];
                    all.extend(items.iter().cloned());
                    json!({ "and": all })
                }
                None => json!({ "and": [pinned, existing] }),
            },
        };
        CatalogFilter {
            where_clause: Some(where_clause),
            include: self.include.clone(),
            skip: None,
            limit: None,
            fields: self.fields.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogInclusion {
    pub relation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Value>,
}

/// Translates standardized filters into catalog filters.
#[derive(Default)]
pub struct FilterMapper {
    techniques: TechniqueStrategy,
}

impl FilterMapper {
    pub fn new(techniques: TechniqueStrategy) -> Self {
        Self { techniques }
    }

    pub fn techniques(&self) -> &TechniqueStrategy {
        &self.techniques
    }

    pub fn map(&self, kind: EntityKind, filter: &Filter) -> Result<CatalogFilter, BridgeError> {
        match kind {
            EntityKind::Dataset => self.dataset(filter),
            EntityKind::Document => self.document(filter),
            EntityKind::Instrument => self.instrument(filter),
            EntityKind::Sample => Ok(self.sample(filter)),
            EntityKind::File => Ok(self.files(filter)),
            EntityKind::Technique => Ok(CatalogFilter {
                where_clause: match &filter.where_clause {
                    Some(where_clause) => {
                        map_where(kind, &self.techniques.build_filter(where_clause)?)
                    }
                    None => None,
                },
                ..CatalogFilter::default()
            }),
        }
    }

    /// Parameter, sample and technique scopes become conditions on the
    /// dataset itself; files and instrument stay catalog includes.
    pub fn dataset(&self, filter: &Filter) -> Result<CatalogFilter, BridgeError> {
        let mut conjuncts = Vec::new();
        if let Some(mapped) = filter
            .where_clause
            .as_ref()
            .and_then(|where_clause| map_where(EntityKind::Dataset, where_clause))
        {
            conjuncts.push(mapped);
        }
        for inclusion in filter
            .include
            .iter()
            .filter(|inclusion| inclusion.relation == "parameters")
        {
            if let Some(where_clause) = scope_where(inclusion) {
                conjuncts.push(map_parameters(where_clause)?);
            }
        }
        if let Some(constraint) = filter.scoped_where("samples").and_then(sample_constraint) {
            conjuncts.push(constraint);
        }
        if let Some(where_clause) = filter.scoped_where("techniques") {
            let built = self.techniques.build_filter(where_clause)?;
            if let Some(mapped) = map_where(EntityKind::Technique, &built) {
                conjuncts.push(mapped);
            }
        }

        let mapped = CatalogFilter {
            where_clause: conjoin(conjuncts),
            include: map_inclusions(filter.include.iter())?,
            skip: filter.skip,
            limit: filter.limit,
            fields: None,
        };
        debug!(filter = %json!(mapped), "mapped dataset filter");
        Ok(mapped)
    }

    /// `isPublic` and `type` are dropped, members become `creator`/`authors`
    /// conditions, and thumbnails are never requested.
    pub fn document(&self, filter: &Filter) -> Result<CatalogFilter, BridgeError> {
        let mut where_clause = filter
            .where_clause
            .as_ref()
            .and_then(|where_clause| map_where(EntityKind::Document, where_clause));
        if let Some(members) = member_condition(filter) {
            where_clause = Some(match where_clause {
                None => members,
                Some(existing) => match existing.get("and").and_then(Value::as_array) {
                    Some(items) => {
                        let mut all = items.clone();
                        all.push(members);
                        json!({ "and": all })
                    }
                    None => json!({ "and": [members, existing] }),
                },
            });
        }

        let mapped = CatalogFilter {
            where_clause,
            include: map_inclusions(
                filter
                    .include
                    .iter()
                    .filter(|inclusion| inclusion.relation != "datasets" && inclusion.relation != "members"),
            )?,
            skip: filter.skip,
            limit: filter.limit,
            fields: Some(json!({ "thumbnail": false })),
        };
        debug!(filter = %json!(mapped), "mapped document filter");
        Ok(mapped)
    }

    pub fn files(&self, filter: &Filter) -> CatalogFilter {
        let scope = filter
            .where_clause
            .as_ref()
            .and_then(|where_clause| map_where(EntityKind::File, where_clause))
            .map(|where_clause| json!({ "where": where_clause }));
        CatalogFilter {
            include: vec![CatalogInclusion {
                relation: "origdatablocks".to_string(),
                scope,
            }],
            ..CatalogFilter::default()
        }
    }

    pub fn instrument(&self, filter: &Filter) -> Result<CatalogFilter, BridgeError> {
        let include = filter
            .include
            .iter()
            .map(|inclusion| {
                Ok(CatalogInclusion {
                    relation: inclusion.relation.clone(),
                    scope: inclusion.scope.as_ref().map(encode_scope).transpose()?,
                })
            })
            .collect::<Result<Vec<_>, BridgeError>>()?;
        Ok(CatalogFilter {
            where_clause: filter
                .where_clause
                .as_ref()
                .and_then(|where_clause| map_where(EntityKind::Instrument, where_clause)),
            include,
            skip: filter.skip,
            limit: filter.limit,
            fields: None,
        })
    }

    pub fn sample(&self, filter: &Filter) -> CatalogFilter {
        CatalogFilter {
            where_clause: filter
                .where_clause
                .as_ref()
                .and_then(|where_clause| map_where(EntityKind::Sample, where_clause)),
            skip: filter.skip,
            limit: filter.limit,
            ..CatalogFilter::default()
        }
    }
}

fn scope_where(inclusion: &Inclusion) -> Option<&Value> {
    inclusion
        .scope
        .as_ref()
        .and_then(|scope| scope.where_clause.as_ref())
}

fn conjoin(mut conjuncts: Vec<Value>) -> Option<Value> {
    match conjuncts.len() {
        0 => None,
        1 => conjuncts.pop(),
        _ => Some(json!({ "and": conjuncts })),
    }
}

fn backend_key(kind: EntityKind, key: &str) -> Option<String> {
    match kind {
        EntityKind::Instrument => (key != "facility").then(|| key.to_string()),
        _ => backend_field(kind, key).map(str::to_string),
    }
}

/// Renames the keys of a where clause through the entity's table. Unknown
/// keys are dropped, and boolean nodes left without children disappear.
pub fn map_where(kind: EntityKind, where_clause: &Value) -> Option<Value> {
    let object = where_clause.as_object()?;
    for operator in ["and", "or"] {
        if let Some(items) = object.get(operator).and_then(Value::as_array) {
            let mapped: Vec<Value> = items
                .iter()
                .filter_map(|item| map_where(kind, item))
                .collect();
            if mapped.is_empty() {
                return None;
            }
            let mut out = Map::new();
            out.insert(operator.to_string(), Value::Array(mapped));
            return Some(Value::Object(out));
        }
    }
    let mut out = Map::new();
    for (key, value) in object {
        if let Some(backend) = backend_key(kind, key) {
            out.insert(backend, value.clone());
        }
    }
    (!out.is_empty()).then_some(Value::Object(out))
}

fn encode_scope(scope: &Filter) -> Result<Value, BridgeError> {
    serde_json::to_value(scope).map_err(|err| BridgeError::EncodeFilter(err.to_string()))
}

fn map_inclusions<'a>(
    inclusions: impl Iterator<Item = &'a Inclusion>,
) -> Result<Vec<CatalogInclusion>, BridgeError> {
    inclusions
        .map(map_inclusion)
        .filter_map(Result::transpose)
        .collect()
}

fn map_inclusion(inclusion: &Inclusion) -> Result<Option<CatalogInclusion>, BridgeError> {
    Ok(match inclusion.relation.as_str() {
        "files" => Some(CatalogInclusion {
            relation: "origdatablocks".to_string(),
            scope: scope_where(inclusion)
                .and_then(|where_clause| map_where(EntityKind::File, where_clause))
                .map(|where_clause| json!({ "where": where_clause })),
        }),
        "instrument" => {
            let scope = inclusion
                .scope
                .as_ref()
                .map(|scope| {
                    let mut scope = scope.clone();
                    scope.where_clause = scope
                        .where_clause
                        .as_ref()
                        .and_then(|where_clause| map_where(EntityKind::Instrument, where_clause));
                    encode_scope(&scope)
                })
                .transpose()?;
            Some(CatalogInclusion {
                relation: "instrument".to_string(),
                scope,
            })
        }
        _ => None,
    })
}

/// Datasets only store the sample id, so only `sampleId` conditions of a
/// sample scope can narrow the dataset query.
fn sample_constraint(where_clause: &Value) -> Option<Value> {
    let mapped = map_where(EntityKind::Sample, where_clause)?;
    let pick = |item: &Value| {
        item.get("sampleId")
            .map(|value| json!({ "sampleId": value }))
    };
    if let Some(items) = mapped.get("and").and_then(Value::as_array) {
        return conjoin(items.iter().filter_map(pick).collect());
    }
    if let Some(items) = mapped.get("or").and_then(Value::as_array) {
        let picked: Vec<Value> = items.iter().filter_map(pick).collect();
        return (picked.len() == items.len() && !picked.is_empty())
            .then(|| json!({ "or": picked }));
    }
    pick(&mapped)
}

fn member_condition(filter: &Filter) -> Option<Value> {
    let members = filter.inclusion("members")?.scope.as_ref()?;
    let person_where = members.scoped_where("person")?.as_object()?;
    if person_where.contains_key("and") || person_where.contains_key("or") {
        return None;
    }
    let alternatives: Vec<Value> = person_where
        .values()
        .flat_map(|value| [json!({ "creator": value }), json!({ "authors": value })])
        .collect();
    (!alternatives.is_empty()).then(|| json!({ "or": alternatives }))
}

/// Name, value and unit pulled from a `{and: [{name}, {value}, {unit}]}` filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterPredicate {
    pub name: Option<String>,
    pub value: Option<Value>,
    pub unit: Option<String>,
}

pub fn extract_parameter(where_clause: &Value) -> ParameterPredicate {
    let mut predicate = ParameterPredicate::default();
    let parts: Vec<&Value> = match where_clause.get("and").and_then(Value::as_array) {
        Some(items) => items.iter().collect(),
        None => vec![where_clause],
    };
    for part in parts {
        if let Some(name) = part.get("name").and_then(Value::as_str) {
            predicate.name = Some(name.to_string());
        }
        if let Some(value) = part.get("value").filter(|value| !value.is_null()) {
            predicate.value = Some(value.clone());
        }
        if let Some(unit) = part
            .get("unit")
            .and_then(Value::as_str)
            .filter(|unit| !unit.is_empty())
        {
            predicate.unit = Some(unit.to_string());
        }
    }
    predicate
}

/// Parameter predicates of a parameters scope, keyed by parameter name.
pub fn parameter_predicates(where_clause: &Value) -> HashMap<String, ParameterPredicate> {
    let parts: Vec<&Value> = match where_clause.get("or").and_then(Value::as_array) {
        Some(items) => items.iter().collect(),
        None => vec![where_clause],
    };
    parts
        .into_iter()
        .map(extract_parameter)
        .filter_map(|predicate| predicate.name.clone().map(|name| (name, predicate)))
        .collect()
}

fn require_parameter(predicate: ParameterPredicate) -> Result<(String, Value, Option<String>), BridgeError> {
    let name = predicate
        .name
        .ok_or_else(|| BridgeError::filter("Parameter name was not provided"))?;
    let value = predicate
        .value
        .ok_or_else(|| BridgeError::filter("Parameter value was not provided"))?;
    Ok((name, value, predicate.unit))
}

/// Maps a parameters scope `where` onto `scientificMetadata` conditions.
pub fn map_parameters(where_clause: &Value) -> Result<Value, BridgeError> {
    if where_clause.get("and").is_some() {
        let (name, value, unit) = require_parameter(extract_parameter(where_clause))?;
        return parameter_condition(&name, &value, unit.as_deref());
    }
    if let Some(items) = where_clause.get("or").and_then(Value::as_array) {
        let branches = items
            .iter()
            .map(|item| {
                let (name, value, unit) = require_parameter(extract_parameter(item))?;
                parameter_condition(&name, &value, unit.as_deref())
            })
            .collect::<Result<Vec<_>, BridgeError>>()?;
        return Ok(json!({ "or": branches }));
    }
    Err(BridgeError::filter(
        "Parameter filter requires at least a name and a value",
    ))
}

fn metadata_field(name: &str, suffix: &str) -> String {
    format!("scientificMetadata.{name}.{suffix}")
}

fn condition(field: String, value: Value) -> Value {
    let mut out = Map::new();
    out.insert(field, value);
    Value::Object(out)
}

fn with_operator(operator: Option<&str>, value: Value) -> Value {
    match operator {
        Some(operator) => condition(operator.to_string(), value),
        None => value,
    }
}

fn unit_condition(unit: &str) -> Value {
    json!({ "inq": unit_variants(unit) })
}

fn stored_unit_condition(stored: &str, unit: &str) -> Value {
    let mut variants = vec![stored.to_string()];
    for variant in unit_variants(unit) {
        if !variants.contains(&variant) {
            variants.push(variant);
        }
    }
    json!({ "inq": variants })
}

fn flip(operator: &str) -> &str {
    match operator {
        "lt" => "gt",
        "gt" => "lt",
        "lte" => "gte",
        "gte" => "lte",
        other => other,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn not_numeric() -> BridgeError {
    BridgeError::filter("Parameter value must be numeric when a unit is given")
}

/// Expands one parameter predicate into catalog conditions over SI values.
pub fn parameter_condition(name: &str, value: &Value, unit: Option<&str>) -> Result<Value, BridgeError> {
    let Some(unit) = unit else {
        return Ok(json!({ "or": [
            condition(metadata_field(name, "value"), value.clone()),
            condition(metadata_field(name, "v"), value.clone()),
        ]}));
    };

    match value {
        Value::Object(operators) if !operators.is_empty() => {
            let mut parts = operators
                .iter()
                .map(|(operator, operand)| match operand {
                    Value::Array(bounds) => bounded_condition(name, operator, bounds, unit),
                    other => {
                        let scalar = numeric(other).ok_or_else(not_numeric)?;
                        scalar_condition(name, Some(operator), scalar, unit)
                    }
                })
                .collect::<Result<Vec<_>, BridgeError>>()?;
            Ok(if parts.len() == 1 {
                parts.remove(0)
            } else {
                json!({ "and": parts })
            })
        }
        other => {
            let scalar = numeric(other).ok_or_else(not_numeric)?;
            scalar_condition(name, None, scalar, unit)
        }
    }
}

fn si_match(name: &str, operator: Option<&str>, value: Value, unit: &str) -> Value {
    json!({ "and": [
        condition(metadata_field(name, "valueSI"), with_operator(operator, value)),
        condition(metadata_field(name, "unitSI"), unit_condition(unit)),
    ]})
}

fn scalar_condition(name: &str, operator: Option<&str>, value: f64, unit: &str) -> Result<Value, BridgeError> {
    let si = units::to_si(value, unit)?;
    let mut branches = vec![si_match(name, operator, number_value(si.value), &si.unit)];
    if let Some(extra) = alternate_condition(name, operator, &[si.value], &si.unit)? {
        branches.push(extra);
    }
    match operator {
        Some("lte") => branches.push(si_match(
            &format!("{name}_min"),
            Some("lte"),
            number_value(si.value),
            &si.unit,
        )),
        Some("gte") => branches.push(si_match(
            &format!("{name}_max"),
            Some("gte"),
            number_value(si.value),
            &si.unit,
        )),
        _ => {}
    }
    Ok(if branches.len() == 1 {
        branches.remove(0)
    } else {
        json!({ "or": branches })
    })
}

fn bound_to_si(bound: &Value, default_unit: &str) -> Result<Quantity, BridgeError> {
    match bound {
        Value::Object(object) => {
            let value = object.get("value").and_then(numeric).ok_or_else(not_numeric)?;
            let unit = object
                .get("unit")
                .and_then(Value::as_str)
                .unwrap_or(default_unit);
            units::to_si(value, unit)
        }
        other => units::to_si(numeric(other).ok_or_else(not_numeric)?, default_unit),
    }
}

fn bounded_condition(name: &str, operator: &str, bounds: &[Value], unit: &str) -> Result<Value, BridgeError> {
    let converted = bounds
        .iter()
        .map(|bound| bound_to_si(bound, unit))
        .collect::<Result<Vec<_>, BridgeError>>()?;
    let Some(canonical) = converted.first().map(|quantity| quantity.unit.clone()) else {
        return Err(BridgeError::filter("Parameter range requires at least one bound"));
    };
    if let Some(other) = converted.iter().find(|quantity| quantity.unit != canonical) {
        return Err(BridgeError::UnitMismatch {
            expected: canonical,
            found: other.unit.clone(),
        });
    }

    let values: Vec<f64> = converted.iter().map(|quantity| quantity.value).collect();
    let direct = si_match(
        name,
        Some(operator),
        Value::Array(values.iter().copied().map(number_value).collect()),
        &canonical,
    );
    if !(operator == "between" && is_range_parameter(name)) {
        return Ok(direct);
    }

    let low = values.iter().copied().fold(f64::INFINITY, f64::min);
    let high = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let straddle = json!({ "and": [
        si_match(&format!("{name}_min"), Some("lte"), number_value(high), &canonical),
        si_match(&format!("{name}_max"), Some("gte"), number_value(low), &canonical),
    ]});
    let mut branches = vec![direct, straddle];
    if let Some(extra) = alternate_condition(name, Some(operator), &[low, high], &canonical)? {
        branches.push(extra);
    }
    Ok(json!({ "or": branches }))
}

/// The same condition against the secondary metadata schema, which stores
/// beam energy in keV and temperatures in Kelvin.
fn alternate_condition(
    name: &str,
    operator: Option<&str>,
    si_values: &[f64],
    si_unit: &str,
) -> Result<Option<Value>, BridgeError> {
    let Some(path) = alternate_path(name) else {
        return Ok(None);
    };
    let wavelength = name == "incident_wavelength";
    if wavelength && si_unit != "m" {
        return Ok(None);
    }
    let (source_unit, operator) = if wavelength {
        ("(kg m^2) / s^2", operator.map(flip))
    } else {
        (si_unit, operator)
    };

    let mut converted = Vec::with_capacity(si_values.len());
    for value in si_values {
        let value = if wavelength {
            PLANCK_TIMES_LIGHT_SPEED / value
        } else {
            *value
        };
        match units::convert(value, source_unit, path.target_unit) {
            Ok(quantity) => converted.push(quantity.value),
            Err(BridgeError::IncompatibleUnits { .. }) => return Ok(None),
            Err(err) => return Err(err),
        }
    }
    if converted.len() > 1 {
        converted.sort_by(f64::total_cmp);
    }
    let value = match converted.as_slice() {
        [single] => number_value(*single),
        many => Value::Array(many.iter().copied().map(number_value).collect()),
    };

    Ok(Some(json!({ "and": [
        condition(
            format!("scientificMetadata.{}", path.value),
            with_operator(operator, value),
        ),
        condition(
            format!("scientificMetadata.{}", path.unit),
            stored_unit_condition(path.stored_unit, path.target_unit),
        ),
    ]})))
}
