//! Key-value mapper
//!
//! Turns one [`RawRow`] into a [`ParsedUnit`] using a data source's ordered
//! `(source key, target path)` pairs. The mapping is compiled once per job
//! against the static path tables in [`paths`], so the per-row work is a
//! lookup and a closure call per mapped column.
//!
//! Rules:
//! - unmapped keys are ignored
//! - empty values leave the field untouched
//! - values that do not parse set the field to `None`
//! - repeated targets (`Activities.*`, `Persons.*`) fill the element opened by
//!   the current row until a sub-field repeats, then open a new one

pub mod coerce;
pub mod paths;

use crate::ingest::types::{RawRow, VariableMapping};
use crate::ingest::units::{Activity, ActivityType, ParsedUnit, UnitKind};
use paths::UnitSetter;

/// Target path of the business identifier
pub const BUSINESS_ID_TARGET: &str = "StatId";

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("Unknown target path '{target}' for {kind} (source column '{source_key}')")]
    UnknownTarget {
        kind: UnitKind,
        source_key: String,
        target: String,
    },

    #[error("Data source mapping is empty")]
    EmptyMapping,
}

struct CompiledMapping {
    source: String,
    setter: UnitSetter,
}

/// Mapping of one data source compiled for its unit variant
pub struct Mapper {
    kind: UnitKind,
    mappings: Vec<CompiledMapping>,
    business_id_sources: Vec<String>,
}

impl std::fmt::Debug for Mapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapper")
            .field("kind", &self.kind)
            .field("mappings", &self.mappings.len())
            .field("business_id_sources", &self.business_id_sources)
            .finish()
    }
}

impl Mapper {
    pub fn compile(kind: UnitKind, mapping: &[VariableMapping]) -> Result<Self, MappingError> {
        if mapping.is_empty() {
            return Err(MappingError::EmptyMapping);
        }

        let business_id_target = coerce::normalize_path(BUSINESS_ID_TARGET);
        let mut mappings = Vec::with_capacity(mapping.len());
        let mut business_id_sources = Vec::new();

        for pair in mapping {
            let setter =
                paths::resolve(kind, &pair.target).ok_or_else(|| MappingError::UnknownTarget {
                    kind,
                    source_key: pair.source.clone(),
                    target: pair.target.clone(),
                })?;
            if coerce::normalize_path(&pair.target) == business_id_target {
                business_id_sources.push(pair.source.clone());
            }
            mappings.push(CompiledMapping {
                source: pair.source.clone(),
                setter,
            });
        }

        Ok(Self {
            kind,
            mappings,
            business_id_sources,
        })
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    /// Business identifier of a row, read through the `StatId` mapping
    pub fn business_id(&self, row: &RawRow) -> Option<String> {
        self.business_id_sources
            .iter()
            .filter_map(|source| row.get(source))
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(str::to_string)
    }

    /// Map a row, on top of the stored snapshot when the unit already exists
    pub fn map_row(&self, row: &RawRow, existing: Option<ParsedUnit>) -> ParsedUnit {
        let mut unit = existing
            .filter(|unit| unit.kind() == self.kind)
            .unwrap_or_else(|| ParsedUnit::empty(self.kind));
        self.apply(&mut unit, row);
        finalize(&mut unit);
        unit
    }

    fn apply(&self, unit: &mut ParsedUnit, row: &RawRow) {
        for mapping in &self.mappings {
            let Some(value) = row.get(&mapping.source) else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            (mapping.setter)(unit, value);
        }
    }
}

/// Post-row normalisation: collapse primary activities, close open elements
pub fn finalize(unit: &mut ParsedUnit) {
    let core = unit.core_mut();
    collapse_primary_activities(&mut core.activities);
    core.close_elements();
}

/// Keep a single primary activity
///
/// A later primary with a newer year replaces the first one; a later primary
/// that is not newer is dropped.
fn collapse_primary_activities(activities: &mut Vec<Activity>) {
    let is_primary = |a: &Activity| a.activity_type == Some(ActivityType::Primary);
    let Some(first) = activities.iter().position(is_primary) else {
        return;
    };

    let mut index = first + 1;
    while index < activities.len() {
        if is_primary(&activities[index]) {
            let candidate = activities.remove(index);
            if candidate.activity_year > activities[first].activity_year {
                activities[first] = candidate;
            }
        } else {
            index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(pairs: &[(&str, &str)]) -> Vec<VariableMapping> {
        pairs
            .iter()
            .map(|(source, target)| VariableMapping::new(*source, *target))
            .collect()
    }

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_numeric_value_overwrites_prior_value() {
        let mapper =
            Mapper::compile(UnitKind::LegalUnit, &mapping(&[("peopleNum", "NumOfPeopleEmp")]))
                .unwrap();
        let mut existing = ParsedUnit::empty(UnitKind::LegalUnit);
        existing.core_mut().num_of_people_emp = Some(2);

        let unit = mapper.map_row(&row(&[("peopleNum", "17")]), Some(existing));
        assert_eq!(unit.core().num_of_people_emp, Some(17));
    }

    #[test]
    fn test_unparseable_numeric_yields_none() {
        let mapper =
            Mapper::compile(UnitKind::LegalUnit, &mapping(&[("peopleNum", "NumOfPeopleEmp")]))
                .unwrap();
        let mut existing = ParsedUnit::empty(UnitKind::LegalUnit);
        existing.core_mut().num_of_people_emp = Some(2);

        let unit = mapper.map_row(&row(&[("peopleNum", "a dozen")]), Some(existing));
        assert_eq!(unit.core().num_of_people_emp, None);
    }

    #[test]
    fn test_empty_value_leaves_field_untouched() {
        let mapper =
            Mapper::compile(UnitKind::LegalUnit, &mapping(&[("title", "Name")])).unwrap();
        let mut existing = ParsedUnit::empty(UnitKind::LegalUnit);
        existing.core_mut().name = Some("Old name".into());

        let unit = mapper.map_row(&row(&[("title", "  ")]), Some(existing));
        assert_eq!(unit.name(), Some("Old name"));
    }

    #[test]
    fn test_flat_nested_path() {
        let mapper =
            Mapper::compile(UnitKind::LegalUnit, &mapping(&[("region", "Address.Region.Name")]))
                .unwrap();
        let unit = mapper.map_row(&row(&[("region", "X")]), None);
        let region = unit.core().address.as_ref().and_then(|a| a.region.as_ref()).unwrap();
        assert_eq!(region.name.as_deref(), Some("X"));
    }

    #[test]
    fn test_unmapped_keys_are_ignored() {
        let mapper = Mapper::compile(UnitKind::LegalUnit, &mapping(&[("id", "StatId")])).unwrap();
        let unit = mapper.map_row(&row(&[("id", "100"), ("colour", "blue")]), None);
        assert_eq!(unit.business_id(), Some("100"));
        assert_eq!(unit.name(), None);
    }

    #[test]
    fn test_unknown_target_fails_compilation() {
        let err = Mapper::compile(UnitKind::LegalUnit, &mapping(&[("x", "Address.Planet")]))
            .unwrap_err();
        assert!(matches!(err, MappingError::UnknownTarget { .. }));
        assert!(matches!(
            Mapper::compile(UnitKind::LegalUnit, &[]).unwrap_err(),
            MappingError::EmptyMapping
        ));
    }

    #[test]
    fn test_business_id_uses_first_non_empty_source() {
        let mapper = Mapper::compile(
            UnitKind::LocalUnit,
            &mapping(&[("okpo", "StatId"), ("code", "StatId")]),
        )
        .unwrap();
        assert_eq!(
            mapper.business_id(&row(&[("okpo", ""), ("code", " 777 ")])),
            Some("777".to_string())
        );
        assert_eq!(mapper.business_id(&row(&[("name", "x")])), None);
    }

    #[test]
    fn test_existing_snapshot_of_other_kind_is_ignored() {
        let mapper = Mapper::compile(UnitKind::LegalUnit, &mapping(&[("id", "StatId")])).unwrap();
        let mut other = ParsedUnit::empty(UnitKind::LocalUnit);
        other.core_mut().name = Some("Local".into());
        let unit = mapper.map_row(&row(&[("id", "1")]), Some(other));
        assert_eq!(unit.kind(), UnitKind::LegalUnit);
        assert_eq!(unit.name(), None);
    }

    #[test]
    fn test_newer_primary_activity_replaces_existing() {
        let mapper = Mapper::compile(
            UnitKind::LegalUnit,
            &mapping(&[
                ("code", "Activities.ActivityCategory.Code"),
                ("type", "Activities.ActivityType"),
                ("year", "Activities.ActivityYear"),
            ]),
        )
        .unwrap();

        let first = mapper.map_row(&row(&[("code", "01"), ("type", "Primary"), ("year", "2019")]), None);
        let second = mapper.map_row(
            &row(&[("code", "02"), ("type", "Primary"), ("year", "2021")]),
            Some(first.clone()),
        );
        let activities = &second.core().activities;
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].activity_year, Some(2021));

        let older = mapper.map_row(
            &row(&[("code", "03"), ("type", "Primary"), ("year", "2010")]),
            Some(second.clone()),
        );
        assert_eq!(older.core().activities.len(), 1);
        assert_eq!(older.core().activities[0].activity_year, Some(2021));
    }

    #[test]
    fn test_new_row_never_extends_stored_elements() {
        let mapper = Mapper::compile(
            UnitKind::LegalUnit,
            &mapping(&[("person", "Persons.GivenName"), ("role", "Persons.Role")]),
        )
        .unwrap();
        let first = mapper.map_row(&row(&[("person", "Aida")]), None);
        let second = mapper.map_row(&row(&[("role", "Owner")]), Some(first));
        let persons = &second.core().persons;
        assert_eq!(persons.len(), 2);
        assert_eq!(persons[0].role, None);
        assert_eq!(persons[1].role.as_deref(), Some("Owner"));
    }
}
