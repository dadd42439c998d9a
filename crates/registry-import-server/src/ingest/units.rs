//! Typed statistical units produced by the mapper
//!
//! [`ParsedUnit`] is a closed union over the four unit variants. Fields shared
//! by every variant live in [`CoreFields`]; each variant adds its relations.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::types::UnknownVariant;

/// Variant tag of a statistical unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    LocalUnit,
    LegalUnit,
    EnterpriseUnit,
    EnterpriseGroup,
}

impl UnitKind {
    pub const ALL: [UnitKind; 4] = [
        UnitKind::LocalUnit,
        UnitKind::LegalUnit,
        UnitKind::EnterpriseUnit,
        UnitKind::EnterpriseGroup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::LocalUnit => "local_unit",
            UnitKind::LegalUnit => "legal_unit",
            UnitKind::EnterpriseUnit => "enterprise_unit",
            UnitKind::EnterpriseGroup => "enterprise_group",
        }
    }
}

impl FromStr for UnitKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local_unit" => Ok(UnitKind::LocalUnit),
            "legal_unit" => Ok(UnitKind::LegalUnit),
            "enterprise_unit" => Ok(UnitKind::EnterpriseUnit),
            "enterprise_group" => Ok(UnitKind::EnterpriseGroup),
            other => Err(UnknownVariant {
                kind: "stat unit type",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier reference such as a legal form or a region
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeLookup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl CodeLookup {
    pub fn is_empty(&self) -> bool {
        self.code.is_none() && self.name.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_part1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_part2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_part3: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<CodeLookup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl Address {
    /// Number of populated `address_part` lines
    pub fn populated_parts(&self) -> usize {
        [&self.address_part1, &self.address_part2, &self.address_part3]
            .into_iter()
            .filter(|part| part.as_deref().is_some_and(|p| !p.trim().is_empty()))
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Primary,
    Secondary,
    Ancillary,
}

impl FromStr for ActivityType {
    type Err = UnknownVariant;

    /// Accepts the names case-insensitively as well as the numeric codes 1-3.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" | "1" => Ok(ActivityType::Primary),
            "secondary" | "2" => Ok(ActivityType::Secondary),
            "ancillary" | "ancilliary" | "3" => Ok(ActivityType::Ancillary),
            other => Err(UnknownVariant {
                kind: "activity type",
                value: other.to_string(),
            }),
        }
    }
}

/// Elements of repeated targets carry a transient flag marking the element
/// opened by the row currently being mapped.
pub trait RepeatedElement: Default {
    fn is_open(&self) -> bool;
    fn set_open(&mut self, open: bool);
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_category: Option<CodeLookup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_type: Option<ActivityType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employees: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turnover: Option<f64>,
    #[serde(skip)]
    pub open: bool,
}

impl RepeatedElement for Activity {
    fn is_open(&self) -> bool {
        self.open
    }

    fn set_open(&mut self, open: bool) {
        self.open = open;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip)]
    pub open: bool,
}

impl RepeatedElement for Person {
    fn is_open(&self) -> bool {
        self.open
    }

    fn set_open(&mut self, open: bool) {
        self.open = open;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Country {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip)]
    pub open: bool,
}

impl RepeatedElement for Country {
    fn is_open(&self) -> bool {
        self.open
    }

    fn set_open(&mut self, open: bool) {
        self.open = open;
    }
}

/// Identification and descriptive fields shared by every variant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreFields {
    pub stat_id: Option<String>,
    pub name: Option<String>,
    pub short_name: Option<String>,
    pub tax_reg_id: Option<String>,
    pub external_id: Option<String>,
    pub external_id_type: Option<String>,
    pub data_source: Option<String>,
    pub web_address: Option<String>,
    pub telephone_no: Option<String>,
    pub email_address: Option<String>,
    pub contact_person: Option<String>,
    pub num_of_people_emp: Option<i32>,
    pub employees: Option<i32>,
    pub employees_year: Option<i32>,
    pub turnover: Option<f64>,
    pub turnover_year: Option<i32>,
    pub notes: Option<String>,
    pub classified: Option<bool>,
    pub free_econ_zone: Option<bool>,
    pub status_date: Option<NaiveDate>,
    pub registration_date: Option<NaiveDate>,
    pub address: Option<Address>,
    pub actual_address: Option<Address>,
    pub postal_address: Option<Address>,
    pub legal_form: Option<CodeLookup>,
    pub inst_sector_code: Option<CodeLookup>,
    pub data_source_classification: Option<CodeLookup>,
    pub size: Option<CodeLookup>,
    pub unit_status: Option<CodeLookup>,
    pub reorg_type: Option<CodeLookup>,
    pub registration_reason: Option<CodeLookup>,
    pub foreign_participation: Option<CodeLookup>,
    pub foreign_participation_countries: Vec<Country>,
    pub activities: Vec<Activity>,
    pub persons: Vec<Person>,
}

impl CoreFields {
    /// Clear the transient open flags of every repeated element
    pub fn close_elements(&mut self) {
        self.activities.iter_mut().for_each(|a| a.set_open(false));
        self.persons.iter_mut().for_each(|p| p.set_open(false));
        self.foreign_participation_countries
            .iter_mut()
            .for_each(|c| c.set_open(false));
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalUnit {
    pub core: CoreFields,
    #[serde(default)]
    pub legal_unit_stat_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegalUnit {
    pub core: CoreFields,
    #[serde(default)]
    pub enterprise_unit_stat_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnterpriseUnit {
    pub core: CoreFields,
    /// Stat ids of member legal units
    #[serde(default)]
    pub legal_units: Vec<String>,
    #[serde(default)]
    pub ent_group_stat_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnterpriseGroup {
    pub core: CoreFields,
    /// Stat ids of member enterprise units
    #[serde(default)]
    pub enterprise_units: Vec<String>,
}

/// Typed record produced by mapping one raw row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "unit_type", rename_all = "snake_case")]
pub enum ParsedUnit {
    LocalUnit(LocalUnit),
    LegalUnit(LegalUnit),
    EnterpriseUnit(EnterpriseUnit),
    EnterpriseGroup(EnterpriseGroup),
}

impl ParsedUnit {
    /// Empty unit of the given variant
    pub fn empty(kind: UnitKind) -> Self {
        match kind {
            UnitKind::LocalUnit => ParsedUnit::LocalUnit(LocalUnit::default()),
            UnitKind::LegalUnit => ParsedUnit::LegalUnit(LegalUnit::default()),
            UnitKind::EnterpriseUnit => ParsedUnit::EnterpriseUnit(EnterpriseUnit::default()),
            UnitKind::EnterpriseGroup => ParsedUnit::EnterpriseGroup(EnterpriseGroup::default()),
        }
    }

    pub fn kind(&self) -> UnitKind {
        match self {
            ParsedUnit::LocalUnit(_) => UnitKind::LocalUnit,
            ParsedUnit::LegalUnit(_) => UnitKind::LegalUnit,
            ParsedUnit::EnterpriseUnit(_) => UnitKind::EnterpriseUnit,
            ParsedUnit::EnterpriseGroup(_) => UnitKind::EnterpriseGroup,
        }
    }

    pub fn core(&self) -> &CoreFields {
        match self {
            ParsedUnit::LocalUnit(u) => &u.core,
            ParsedUnit::LegalUnit(u) => &u.core,
            ParsedUnit::EnterpriseUnit(u) => &u.core,
            ParsedUnit::EnterpriseGroup(u) => &u.core,
        }
    }

    pub fn core_mut(&mut self) -> &mut CoreFields {
        match self {
            ParsedUnit::LocalUnit(u) => &mut u.core,
            ParsedUnit::LegalUnit(u) => &mut u.core,
            ParsedUnit::EnterpriseUnit(u) => &mut u.core,
            ParsedUnit::EnterpriseGroup(u) => &mut u.core,
        }
    }

    /// Business identifier used for existence probing
    pub fn business_id(&self) -> Option<&str> {
        self.core()
            .stat_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn name(&self) -> Option<&str> {
        self.core().name.as_deref()
    }
}
