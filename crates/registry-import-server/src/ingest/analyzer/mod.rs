//! Unit analyzer
//!
//! Pure checks over a [`ParsedUnit`]:
//!
//! 1. **Mandatory fields**: every enabled flag must be non-empty and non-zero.
//!    One of business id, tax id or external id is always required.
//! 2. **Connections**: variant-specific consistency (primary activity, owning
//!    legal unit, member units, contact person, address completeness).
//! 3. **Calculation**: optional business id check digit.
//!
//! The analyzer reports issues; deciding what an issue means for the row is
//! left to the processor.

pub mod checksum;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::ingest::mapper::coerce::normalize_key;
use crate::ingest::units::{ActivityType, Address, CodeLookup, ParsedUnit, UnitKind};
use checksum::ChecksumOutcome;

pub const MANDATORY_SUMMARY: &str = "Mandatory fields rules warnings";
pub const CONNECTION_SUMMARY: &str = "Connection rules warnings";
pub const CALCULATION_SUMMARY: &str = "Calculation fields rules warnings";

/// Field flags that can be made mandatory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MandatoryFields {
    pub data_source: bool,
    pub name: bool,
    pub short_name: bool,
    pub telephone_no: bool,
    pub email_address: bool,
    pub registration_reason: bool,
    pub contact_person: bool,
    pub address: bool,
    pub legal_form: bool,
    pub inst_sector_code: bool,
    pub size: bool,
    pub unit_status: bool,
    pub num_of_people_emp: bool,
    pub employees: bool,
    pub turnover: bool,
    pub activities: bool,
    /// Legal units need a person with the `Owner` role
    pub legal_unit_owner: bool,
}

impl MandatoryFields {
    /// Turn on the flag named `field`; returns false for unknown names
    pub fn enable(&mut self, field: &str) -> bool {
        let flag = match normalize_key(field).as_str() {
            "datasource" => &mut self.data_source,
            "name" => &mut self.name,
            "shortname" => &mut self.short_name,
            "telephoneno" => &mut self.telephone_no,
            "emailaddress" => &mut self.email_address,
            "registrationreason" => &mut self.registration_reason,
            "contactperson" => &mut self.contact_person,
            "address" => &mut self.address,
            "legalform" => &mut self.legal_form,
            "instsectorcode" => &mut self.inst_sector_code,
            "size" => &mut self.size,
            "unitstatus" => &mut self.unit_status,
            "numofpeopleemp" => &mut self.num_of_people_emp,
            "employees" => &mut self.employees,
            "turnover" => &mut self.turnover,
            "activities" => &mut self.activities,
            "legalunitowner" | "persons" => &mut self.legal_unit_owner,
            _ => return false,
        };
        *flag = true;
        true
    }

    pub fn is_known(field: &str) -> bool {
        MandatoryFields::default().enable(field)
    }
}

/// Analysis rules loaded from `ANALYSIS_CONFIG` or defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Flags for local, legal and enterprise units
    pub stat_unit: MandatoryFields,
    /// Flags for enterprise groups
    pub enterprise_group: MandatoryFields,
    pub validate_stat_id_checksum: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let only_name = MandatoryFields {
            name: true,
            ..MandatoryFields::default()
        };
        Self {
            stat_unit: only_name.clone(),
            enterprise_group: only_name,
            validate_stat_id_checksum: false,
        }
    }
}

impl AnalysisConfig {
    /// Load rules from a JSON file; missing keys take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read analysis config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse analysis config {}", path.display()))
    }

    /// Rules with the data source's attribute checklist switched on as well
    pub fn with_attributes(&self, attributes: &[String]) -> Self {
        let mut config = self.clone();
        for attribute in attributes {
            config.stat_unit.enable(attribute);
            config.enterprise_group.enable(attribute);
        }
        config
    }

    fn mandatory_for(&self, kind: UnitKind) -> &MandatoryFields {
        match kind {
            UnitKind::EnterpriseGroup => &self.enterprise_group,
            _ => &self.stat_unit,
        }
    }
}

/// Message codes attached to an analysed field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueCode {
    MissingDataSource,
    MissingName,
    MissingShortName,
    ShortNameSameAsName,
    MissingTelephoneNo,
    MissingEmailAddress,
    MissingRegistrationReason,
    MissingContactPerson,
    MissingAddress,
    MissingLegalForm,
    MissingInstSectorCode,
    MissingSize,
    MissingUnitStatus,
    MissingNumOfPeopleEmp,
    MissingEmployees,
    MissingTurnover,
    MissingActivities,
    MissingOwner,
    MissingIdentifier,
    NoMainActivity,
    NoLegalUnit,
    NoMemberLegalUnits,
    IncompleteAddress,
    StatIdNotNumeric,
    StatIdChecksum,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::MissingDataSource => "missing_data_source",
            IssueCode::MissingName => "missing_name",
            IssueCode::MissingShortName => "missing_short_name",
            IssueCode::ShortNameSameAsName => "short_name_same_as_name",
            IssueCode::MissingTelephoneNo => "missing_telephone_no",
            IssueCode::MissingEmailAddress => "missing_email_address",
            IssueCode::MissingRegistrationReason => "missing_registration_reason",
            IssueCode::MissingContactPerson => "missing_contact_person",
            IssueCode::MissingAddress => "missing_address",
            IssueCode::MissingLegalForm => "missing_legal_form",
            IssueCode::MissingInstSectorCode => "missing_inst_sector_code",
            IssueCode::MissingSize => "missing_size",
            IssueCode::MissingUnitStatus => "missing_unit_status",
            IssueCode::MissingNumOfPeopleEmp => "missing_num_of_people_emp",
            IssueCode::MissingEmployees => "missing_employees",
            IssueCode::MissingTurnover => "missing_turnover",
            IssueCode::MissingActivities => "missing_activities",
            IssueCode::MissingOwner => "missing_owner",
            IssueCode::MissingIdentifier => "missing_identifier",
            IssueCode::NoMainActivity => "no_main_activity",
            IssueCode::NoLegalUnit => "no_legal_unit",
            IssueCode::NoMemberLegalUnits => "no_member_legal_units",
            IssueCode::IncompleteAddress => "incomplete_address",
            IssueCode::StatIdNotNumeric => "stat_id_not_numeric",
            IssueCode::StatIdChecksum => "stat_id_checksum",
        }
    }
}

impl std::fmt::Display for IssueCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issues of one unit, keyed by field name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub issues: BTreeMap<String, Vec<String>>,
    pub summary: Vec<String>,
}

impl AnalysisResult {
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has(&self, field: &str, code: IssueCode) -> bool {
        self.issues
            .get(field)
            .is_some_and(|codes| codes.iter().any(|c| c == code.as_str()))
    }

    /// Log note such as `"Activities: no_main_activity; Name: missing_name"`
    pub fn note(&self) -> String {
        self.issues
            .iter()
            .map(|(field, codes)| format!("{field}: {}", codes.join(", ")))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn add(&mut self, field: &str, code: IssueCode) {
        let codes = self.issues.entry(field.to_string()).or_default();
        if !codes.iter().any(|c| c == code.as_str()) {
            codes.push(code.as_str().to_string());
        }
    }

    fn merge(&mut self, pass: AnalysisResult, summary: &str) {
        if pass.is_empty() {
            return;
        }
        for (field, codes) in pass.issues {
            let entry = self.issues.entry(field).or_default();
            for code in codes {
                if !entry.contains(&code) {
                    entry.push(code);
                }
            }
        }
        self.summary.push(summary.to_string());
    }
}

/// Run every pass over a unit
pub fn analyze(unit: &ParsedUnit, config: &AnalysisConfig) -> AnalysisResult {
    let mut result = AnalysisResult::default();
    result.merge(check_mandatory_fields(unit, config), MANDATORY_SUMMARY);
    result.merge(check_connections(unit), CONNECTION_SUMMARY);
    result.merge(check_calculation_fields(unit, config), CALCULATION_SUMMARY);
    result
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

fn blank_lookup(value: &Option<CodeLookup>) -> bool {
    value.as_ref().is_none_or(CodeLookup::is_empty)
}

fn blank_address(value: &Option<Address>) -> bool {
    value
        .as_ref()
        .is_none_or(|a| a.populated_parts() == 0 && a.region.as_ref().is_none_or(CodeLookup::is_empty))
}

pub fn check_mandatory_fields(unit: &ParsedUnit, config: &AnalysisConfig) -> AnalysisResult {
    let mut result = AnalysisResult::default();
    let core = unit.core();
    let flags = config.mandatory_for(unit.kind());
    let is_group = unit.kind() == UnitKind::EnterpriseGroup;

    if blank(&core.stat_id) && blank(&core.tax_reg_id) && blank(&core.external_id) {
        result.add("StatId", IssueCode::MissingIdentifier);
    }

    if flags.data_source && blank(&core.data_source) {
        result.add("DataSource", IssueCode::MissingDataSource);
    }
    if flags.name && blank(&core.name) {
        result.add("Name", IssueCode::MissingName);
    }
    if flags.short_name {
        if blank(&core.short_name) {
            result.add("ShortName", IssueCode::MissingShortName);
        } else if core.short_name == core.name {
            result.add("ShortName", IssueCode::ShortNameSameAsName);
        }
    }
    if flags.telephone_no && blank(&core.telephone_no) {
        result.add("TelephoneNo", IssueCode::MissingTelephoneNo);
    }
    if flags.email_address && blank(&core.email_address) {
        result.add("EmailAddress", IssueCode::MissingEmailAddress);
    }
    if flags.registration_reason && blank_lookup(&core.registration_reason) {
        result.add("RegistrationReason", IssueCode::MissingRegistrationReason);
    }
    if flags.contact_person && blank(&core.contact_person) {
        result.add("ContactPerson", IssueCode::MissingContactPerson);
    }
    if flags.address && blank_address(&core.address) && blank_address(&core.actual_address) {
        result.add("Address", IssueCode::MissingAddress);
    }
    if flags.size && blank_lookup(&core.size) {
        result.add("Size", IssueCode::MissingSize);
    }
    if flags.unit_status && blank_lookup(&core.unit_status) {
        result.add("UnitStatus", IssueCode::MissingUnitStatus);
    }
    if flags.num_of_people_emp && core.num_of_people_emp.unwrap_or(0) == 0 {
        result.add("NumOfPeopleEmp", IssueCode::MissingNumOfPeopleEmp);
    }
    if flags.employees && core.employees.unwrap_or(0) == 0 {
        result.add("Employees", IssueCode::MissingEmployees);
    }
    if flags.turnover && core.turnover.unwrap_or(0.0) == 0.0 {
        result.add("Turnover", IssueCode::MissingTurnover);
    }

    if is_group {
        return result;
    }

    if flags.legal_form && blank_lookup(&core.legal_form) {
        result.add("LegalForm", IssueCode::MissingLegalForm);
    }
    if flags.inst_sector_code && blank_lookup(&core.inst_sector_code) {
        result.add("InstSectorCode", IssueCode::MissingInstSectorCode);
    }
    if flags.activities && core.activities.is_empty() {
        result.add("Activities", IssueCode::MissingActivities);
    }
    if flags.legal_unit_owner && unit.kind() == UnitKind::LegalUnit {
        let has_owner = core.persons.iter().any(|p| {
            p.role
                .as_deref()
                .is_some_and(|role| role.trim().eq_ignore_ascii_case("owner"))
        });
        if !has_owner {
            result.add("Persons", IssueCode::MissingOwner);
        }
    }

    result
}

pub fn check_connections(unit: &ParsedUnit) -> AnalysisResult {
    let mut result = AnalysisResult::default();
    let core = unit.core();

    let has_primary = core
        .activities
        .iter()
        .any(|a| a.activity_type == Some(ActivityType::Primary));

    match unit {
        ParsedUnit::LocalUnit(local) => {
            if !has_primary {
                result.add("Activities", IssueCode::NoMainActivity);
            }
            if blank(&local.legal_unit_stat_id) {
                result.add("LegalUnitStatId", IssueCode::NoLegalUnit);
            }
        },
        ParsedUnit::LegalUnit(_) => {
            if !has_primary {
                result.add("Activities", IssueCode::NoMainActivity);
            }
        },
        ParsedUnit::EnterpriseUnit(enterprise) => {
            if !has_primary {
                result.add("Activities", IssueCode::NoMainActivity);
            }
            if enterprise.legal_units.is_empty() {
                result.add("LegalUnits", IssueCode::NoMemberLegalUnits);
            }
        },
        ParsedUnit::EnterpriseGroup(_) => {
            if blank(&core.contact_person) {
                result.add("ContactPerson", IssueCode::MissingContactPerson);
            }
        },
    }

    let complete_address = [&core.address, &core.actual_address]
        .into_iter()
        .flatten()
        .any(|address| address.populated_parts() >= 2);
    if !complete_address {
        result.add("Address", IssueCode::IncompleteAddress);
    }

    result
}

pub fn check_calculation_fields(unit: &ParsedUnit, config: &AnalysisConfig) -> AnalysisResult {
    let mut result = AnalysisResult::default();
    if !config.validate_stat_id_checksum {
        return result;
    }
    let Some(stat_id) = unit.business_id() else {
        return result;
    };
    match checksum::verify(stat_id) {
        ChecksumOutcome::Valid => {},
        ChecksumOutcome::NotNumeric => result.add("StatId", IssueCode::StatIdNotNumeric),
        ChecksumOutcome::Mismatch => result.add("StatId", IssueCode::StatIdChecksum),
    }
    result
}
