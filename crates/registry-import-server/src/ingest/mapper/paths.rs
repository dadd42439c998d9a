//! Target path tables
//!
//! One table per unit variant maps a dotted target path (`Address.Region.Name`,
//! `Activities.ActivityYear`, ...) to a setter closure. Tables are built once,
//! on first use, and shared by every job.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use super::coerce::{boolean, date, decimal, int, list, normalize_key, normalize_path, text};
use crate::ingest::units::{
    Activity, Address, CodeLookup, CoreFields, Country, ParsedUnit, Person, RepeatedElement,
    UnitKind,
};

/// Setter applied to a unit with a trimmed, non-empty raw value
pub type UnitSetter = Arc<dyn Fn(&mut ParsedUnit, &str) + Send + Sync>;

type FieldSetter<T> = fn(&mut T, &str);

/// Sub-field of a repeated element
struct ElementField<T> {
    path: &'static str,
    set: fn(&mut T, &str),
    is_set: fn(&T) -> bool,
}

const CORE_SCALARS: &[(&str, FieldSetter<CoreFields>)] = &[
    ("StatId", |c, v| c.stat_id = text(v)),
    ("Name", |c, v| c.name = text(v)),
    ("ShortName", |c, v| c.short_name = text(v)),
    ("TaxRegId", |c, v| c.tax_reg_id = text(v)),
    ("ExternalId", |c, v| c.external_id = text(v)),
    ("ExternalIdType", |c, v| c.external_id_type = text(v)),
    ("DataSource", |c, v| c.data_source = text(v)),
    ("WebAddress", |c, v| c.web_address = text(v)),
    ("TelephoneNo", |c, v| c.telephone_no = text(v)),
    ("EmailAddress", |c, v| c.email_address = text(v)),
    ("ContactPerson", |c, v| c.contact_person = text(v)),
    ("NumOfPeopleEmp", |c, v| c.num_of_people_emp = int(v)),
    ("Employees", |c, v| c.employees = int(v)),
    ("EmployeesYear", |c, v| c.employees_year = int(v)),
    ("Turnover", |c, v| c.turnover = decimal(v)),
    ("TurnoverYear", |c, v| c.turnover_year = int(v)),
    ("Notes", |c, v| c.notes = text(v)),
    ("Classified", |c, v| c.classified = boolean(v)),
    ("FreeEconZone", |c, v| c.free_econ_zone = boolean(v)),
    ("StatusDate", |c, v| c.status_date = date(v)),
    ("RegistrationDate", |c, v| c.registration_date = date(v)),
];

const ADDRESS_FIELDS: &[(&str, FieldSetter<Address>)] = &[
    ("AddressPart1", |a, v| a.address_part1 = text(v)),
    ("AddressPart2", |a, v| a.address_part2 = text(v)),
    ("AddressPart3", |a, v| a.address_part3 = text(v)),
    ("Region.Code", |a, v| {
        a.region.get_or_insert_with(CodeLookup::default).code = text(v)
    }),
    ("Region.Name", |a, v| {
        a.region.get_or_insert_with(CodeLookup::default).name = text(v)
    }),
    ("Latitude", |a, v| a.latitude = decimal(v)),
    ("Longitude", |a, v| a.longitude = decimal(v)),
];

const LOOKUP_FIELDS: &[(&str, FieldSetter<CodeLookup>)] = &[
    ("Code", |l, v| l.code = text(v)),
    ("Name", |l, v| l.name = text(v)),
];

const ACTIVITY_FIELDS: &[ElementField<Activity>] = &[
    ElementField {
        path: "ActivityCategory.Code",
        set: |a, v| a.activity_category.get_or_insert_with(CodeLookup::default).code = text(v),
        is_set: |a| a.activity_category.as_ref().is_some_and(|c| c.code.is_some()),
    },
    ElementField {
        path: "ActivityCategory.Name",
        set: |a, v| a.activity_category.get_or_insert_with(CodeLookup::default).name = text(v),
        is_set: |a| a.activity_category.as_ref().is_some_and(|c| c.name.is_some()),
    },
    ElementField {
        path: "ActivityType",
        set: |a, v| a.activity_type = v.parse().ok(),
        is_set: |a| a.activity_type.is_some(),
    },
    ElementField {
        path: "ActivityYear",
        set: |a, v| a.activity_year = int(v),
        is_set: |a| a.activity_year.is_some(),
    },
    ElementField {
        path: "Employees",
        set: |a, v| a.employees = int(v),
        is_set: |a| a.employees.is_some(),
    },
    ElementField {
        path: "Turnover",
        set: |a, v| a.turnover = decimal(v),
        is_set: |a| a.turnover.is_some(),
    },
];

const PERSON_FIELDS: &[ElementField<Person>] = &[
    ElementField {
        path: "GivenName",
        set: |p, v| p.given_name = text(v),
        is_set: |p| p.given_name.is_some(),
    },
    ElementField {
        path: "Surname",
        set: |p, v| p.surname = text(v),
        is_set: |p| p.surname.is_some(),
    },
    ElementField {
        path: "PersonalId",
        set: |p, v| p.personal_id = text(v),
        is_set: |p| p.personal_id.is_some(),
    },
    ElementField {
        path: "Role",
        set: |p, v| p.role = text(v),
        is_set: |p| p.role.is_some(),
    },
];

const COUNTRY_FIELDS: &[ElementField<Country>] = &[
    ElementField {
        path: "Code",
        set: |c, v| c.code = text(v),
        is_set: |c| c.code.is_some(),
    },
    ElementField {
        path: "Name",
        set: |c, v| c.name = text(v),
        is_set: |c| c.name.is_some(),
    },
];

macro_rules! slot {
    ($name:ident, $field:ident, $ty:ty) => {
        fn $name(core: &mut CoreFields) -> &mut $ty {
            &mut core.$field
        }
    };
}

slot!(address, address, Option<Address>);
slot!(actual_address, actual_address, Option<Address>);
slot!(postal_address, postal_address, Option<Address>);
slot!(legal_form, legal_form, Option<CodeLookup>);
slot!(inst_sector_code, inst_sector_code, Option<CodeLookup>);
slot!(data_source_classification, data_source_classification, Option<CodeLookup>);
slot!(size, size, Option<CodeLookup>);
slot!(unit_status, unit_status, Option<CodeLookup>);
slot!(reorg_type, reorg_type, Option<CodeLookup>);
slot!(registration_reason, registration_reason, Option<CodeLookup>);
slot!(foreign_participation, foreign_participation, Option<CodeLookup>);
slot!(activities, activities, Vec<Activity>);
slot!(persons, persons, Vec<Person>);
slot!(countries, foreign_participation_countries, Vec<Country>);

type Slot<T> = fn(&mut CoreFields) -> &mut Option<T>;

const ADDRESS_SLOTS: &[(&str, Slot<Address>)] = &[
    ("Address", address),
    ("ActualAddress", actual_address),
    ("PostalAddress", postal_address),
];

const LOOKUP_SLOTS: &[(&str, Slot<CodeLookup>)] = &[
    ("LegalForm", legal_form),
    ("InstSectorCode", inst_sector_code),
    ("DataSourceClassification", data_source_classification),
    ("Size", size),
    ("UnitStatus", unit_status),
    ("ReorgType", reorg_type),
    ("RegistrationReason", registration_reason),
    ("ForeignParticipation", foreign_participation),
];

static TABLES: LazyLock<HashMap<UnitKind, HashMap<String, UnitSetter>>> = LazyLock::new(|| {
    UnitKind::ALL
        .into_iter()
        .map(|kind| (kind, build_table(kind)))
        .collect()
});

/// Resolve a target path for a unit variant
///
/// Exact matches win; otherwise paths compare case-insensitively and ignore
/// `_`/`-` separators, so `address.address_part1` finds `Address.AddressPart1`.
pub fn resolve(kind: UnitKind, path: &str) -> Option<UnitSetter> {
    let table = TABLES.get(&kind)?;
    if let Some(setter) = table.get(path.trim()) {
        return Some(setter.clone());
    }
    let wanted = normalize_path(path.trim());
    table
        .iter()
        .find(|(candidate, _)| normalize_path(candidate) == wanted)
        .map(|(_, setter)| setter.clone())
}

fn build_table(kind: UnitKind) -> HashMap<String, UnitSetter> {
    let mut table: HashMap<String, UnitSetter> = HashMap::new();

    for &(path, set) in CORE_SCALARS {
        table.insert(path.to_string(), on_core(set));
    }
    for &(prefix, slot) in ADDRESS_SLOTS {
        insert_single(&mut table, prefix, slot, ADDRESS_FIELDS);
    }
    for &(prefix, slot) in LOOKUP_SLOTS {
        insert_single(&mut table, prefix, slot, LOOKUP_FIELDS);
    }
    insert_repeated(&mut table, "Activities", activities, ACTIVITY_FIELDS);
    insert_repeated(&mut table, "Persons", persons, PERSON_FIELDS);
    insert_repeated(&mut table, "ForeignParticipationCountries", countries, COUNTRY_FIELDS);

    match kind {
        UnitKind::LocalUnit => {
            table.insert(
                "LegalUnitStatId".to_string(),
                Arc::new(|unit: &mut ParsedUnit, value: &str| {
                    if let ParsedUnit::LocalUnit(local) = unit {
                        local.legal_unit_stat_id = text(value);
                    }
                }),
            );
        },
        UnitKind::LegalUnit => {
            table.insert(
                "EnterpriseUnitStatId".to_string(),
                Arc::new(|unit: &mut ParsedUnit, value: &str| {
                    if let ParsedUnit::LegalUnit(legal) = unit {
                        legal.enterprise_unit_stat_id = text(value);
                    }
                }),
            );
        },
        UnitKind::EnterpriseUnit => {
            table.insert(
                "LegalUnits".to_string(),
                Arc::new(|unit: &mut ParsedUnit, value: &str| {
                    if let ParsedUnit::EnterpriseUnit(enterprise) = unit {
                        append_unique(&mut enterprise.legal_units, value);
                    }
                }),
            );
            table.insert(
                "EntGroupStatId".to_string(),
                Arc::new(|unit: &mut ParsedUnit, value: &str| {
                    if let ParsedUnit::EnterpriseUnit(enterprise) = unit {
                        enterprise.ent_group_stat_id = text(value);
                    }
                }),
            );
        },
        UnitKind::EnterpriseGroup => {
            table.insert(
                "EnterpriseUnits".to_string(),
                Arc::new(|unit: &mut ParsedUnit, value: &str| {
                    if let ParsedUnit::EnterpriseGroup(group) = unit {
                        append_unique(&mut group.enterprise_units, value);
                    }
                }),
            );
        },
    }

    table
}

fn on_core<F>(set: F) -> UnitSetter
where
    F: Fn(&mut CoreFields, &str) + Send + Sync + 'static,
{
    Arc::new(move |unit: &mut ParsedUnit, value: &str| set(unit.core_mut(), value))
}

fn append_unique(ids: &mut Vec<String>, value: &str) {
    for id in list(value) {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
}

fn insert_single<T: Default + 'static>(
    table: &mut HashMap<String, UnitSetter>,
    prefix: &'static str,
    slot: Slot<T>,
    fields: &'static [(&'static str, FieldSetter<T>)],
) {
    table.insert(
        prefix.to_string(),
        on_core(move |core: &mut CoreFields, value: &str| {
            apply_single_blob(slot(core), value, fields)
        }),
    );
    for &(sub, set) in fields {
        table.insert(
            format!("{prefix}.{sub}"),
            on_core(move |core: &mut CoreFields, value: &str| {
                set(slot(core).get_or_insert_with(T::default), value)
            }),
        );
    }
}

fn insert_repeated<T: RepeatedElement + 'static>(
    table: &mut HashMap<String, UnitSetter>,
    prefix: &'static str,
    items: fn(&mut CoreFields) -> &mut Vec<T>,
    fields: &'static [ElementField<T>],
) {
    table.insert(
        prefix.to_string(),
        on_core(move |core: &mut CoreFields, value: &str| {
            apply_repeated_blob(items(core), value, fields)
        }),
    );
    for field in fields {
        let (set, is_set) = (field.set, field.is_set);
        table.insert(
            format!("{prefix}.{}", field.path),
            on_core(move |core: &mut CoreFields, value: &str| {
                set(open_element(items(core), is_set), value)
            }),
        );
    }
}

/// Element the current row writes into
///
/// The last element is reused while it is open (created by this row) and the
/// sub-field is still empty; otherwise a new open element is appended.
fn open_element<T: RepeatedElement>(items: &mut Vec<T>, is_set: fn(&T) -> bool) -> &mut T {
    let reuse = items
        .last()
        .is_some_and(|last| last.is_open() && !is_set(last));
    if !reuse {
        let mut element = T::default();
        element.set_open(true);
        items.push(element);
    }
    let last = items.len() - 1;
    &mut items[last]
}

/// Embedded JSON object for a single-valued target; anything else clears it
fn apply_single_blob<T: Default>(
    slot: &mut Option<T>,
    value: &str,
    fields: &[(&'static str, FieldSetter<T>)],
) {
    match serde_json::from_str::<Value>(value) {
        Ok(Value::Object(map)) => {
            let target = slot.get_or_insert_with(T::default);
            for (path, leaf) in flatten(&Value::Object(map)) {
                if let Some(&(_, set)) = fields.iter().find(|(p, _)| normalize_path(p) == path) {
                    set(target, &leaf);
                }
            }
        },
        _ => *slot = None,
    }
}

/// Embedded JSON object or array for a repeated target; each element is appended
fn apply_repeated_blob<T: RepeatedElement>(
    items: &mut Vec<T>,
    value: &str,
    fields: &[ElementField<T>],
) {
    let Ok(parsed) = serde_json::from_str::<Value>(value) else {
        return;
    };
    for element in blob_elements(parsed, fields) {
        let leaves = flatten(&element);
        if leaves.is_empty() {
            continue;
        }
        let mut item = T::default();
        for (path, leaf) in leaves {
            if let Some(field) = fields.iter().find(|f| normalize_path(f.path) == path) {
                (field.set)(&mut item, &leaf);
            }
        }
        items.push(item);
    }
}

/// Elements of a repeated blob
///
/// A single-key object whose key is not a field of the element is treated as
/// a wrapper, e.g. `{"Activity": [...]}` as produced from nested XML.
fn blob_elements<T>(value: Value, fields: &[ElementField<T>]) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some((key, inner)) = map.iter().next() {
                    let key = normalize_key(key);
                    let is_field = fields.iter().any(|f| {
                        normalize_path(f.path).split('.').next() == Some(key.as_str())
                    });
                    if !is_field && matches!(inner, Value::Array(_) | Value::Object(_)) {
                        return blob_elements(inner.clone(), fields);
                    }
                }
            }
            vec![Value::Object(map)]
        },
        _ => Vec::new(),
    }
}

/// Leaf values of a JSON object keyed by normalized dotted path
fn flatten(value: &Value) -> Vec<(String, String)> {
    fn walk(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let key = normalize_key(key);
                    let path = if prefix.is_empty() {
                        key
                    } else {
                        format!("{prefix}.{key}")
                    };
                    walk(&path, child, out);
                }
            },
            Value::String(s) if !s.trim().is_empty() => {
                out.push((prefix.to_string(), s.trim().to_string()))
            },
            Value::Number(n) => out.push((prefix.to_string(), n.to_string())),
            Value::Bool(b) => out.push((prefix.to_string(), b.to_string())),
            _ => {},
        }
    }

    let mut out = Vec::new();
    if value.is_object() {
        walk("", value, &mut out);
    }
    out
}
