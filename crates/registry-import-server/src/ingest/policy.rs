//! Conflict resolution policy
//!
//! | Priority   | Exists | Action                  |
//! |------------|--------|-------------------------|
//! | Trusted    | either | Update if exists, else Create |
//! | Ok         | false  | Create                  |
//! | Ok         | true   | Reject                  |
//! | NotTrusted | either | Reject                  |
//!
//! The data source's allowed operations narrow the outcome further: a Create
//! on an alter-only source or an Update on a create-only source is rejected.

use crate::ingest::store::{StoreError, UnitStore};
use crate::ingest::types::{AllowedOperations, Priority};
use crate::ingest::units::ParsedUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Untrusted,
    ExistingRecord,
    CreateNotAllowed,
    AlterNotAllowed,
}

impl RejectReason {
    pub fn message(&self) -> &'static str {
        match self {
            RejectReason::Untrusted => "Data source is not trusted; unit was not written",
            RejectReason::ExistingRecord => {
                "Unit already exists and the data source may not overwrite it"
            },
            RejectReason::CreateNotAllowed => "Data source is not allowed to create units",
            RejectReason::AlterNotAllowed => "Data source is not allowed to alter units",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    Reject(RejectReason),
}

/// Pick the write action for a row
pub fn decide(priority: Priority, exists: bool, allowed: AllowedOperations) -> Action {
    let action = match (priority, exists) {
        (Priority::Trusted, true) => Action::Update,
        (Priority::Trusted, false) | (Priority::Ok, false) => Action::Create,
        (Priority::Ok, true) => Action::Reject(RejectReason::ExistingRecord),
        (Priority::NotTrusted, _) => Action::Reject(RejectReason::Untrusted),
    };

    match action {
        Action::Create if !allowed.can_create() => Action::Reject(RejectReason::CreateNotAllowed),
        Action::Update if !allowed.can_alter() => Action::Reject(RejectReason::AlterNotAllowed),
        other => other,
    }
}

/// Carry out a decided action against the store
///
/// Returns the action taken; a rejection performs no write.
pub async fn apply<S: UnitStore + ?Sized>(
    store: &S,
    action: Action,
    unit: &ParsedUnit,
    data_source: &str,
) -> Result<Action, StoreError> {
    match action {
        Action::Create => store.create(unit, data_source).await?,
        Action::Update => store.update(unit, data_source).await?,
        Action::Reject(_) => {},
    }
    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::store::RecordingStore;
    use crate::ingest::units::UnitKind;

    const ALL_OPS: AllowedOperations = AllowedOperations::CreateAndAlter;

    #[test]
    fn test_decision_table() {
        assert_eq!(decide(Priority::Trusted, true, ALL_OPS), Action::Update);
        assert_eq!(decide(Priority::Trusted, false, ALL_OPS), Action::Create);
        assert_eq!(decide(Priority::Ok, false, ALL_OPS), Action::Create);
        assert_eq!(
            decide(Priority::Ok, true, ALL_OPS),
            Action::Reject(RejectReason::ExistingRecord)
        );
        assert_eq!(
            decide(Priority::NotTrusted, false, ALL_OPS),
            Action::Reject(RejectReason::Untrusted)
        );
        assert_eq!(
            decide(Priority::NotTrusted, true, ALL_OPS),
            Action::Reject(RejectReason::Untrusted)
        );
    }

    #[test]
    fn test_allowed_operations_narrow_the_decision() {
        assert_eq!(
            decide(Priority::Trusted, false, AllowedOperations::Alter),
            Action::Reject(RejectReason::CreateNotAllowed)
        );
        assert_eq!(
            decide(Priority::Trusted, true, AllowedOperations::Create),
            Action::Reject(RejectReason::AlterNotAllowed)
        );
        assert_eq!(
            decide(Priority::Ok, false, AllowedOperations::Create),
            Action::Create
        );
    }

    #[tokio::test]
    async fn test_ok_source_with_existing_record_never_writes() {
        let store = RecordingStore::default();
        let mut unit = ParsedUnit::empty(UnitKind::LegalUnit);
        unit.core_mut().stat_id = Some("100".into());
        store.seed(&unit);

        let exists = store.exists(UnitKind::LegalUnit, "100").await.unwrap();
        let action = decide(Priority::Ok, exists, ALL_OPS);
        let taken = apply(&store, action, &unit, "registry").await.unwrap();

        assert!(matches!(taken, Action::Reject(RejectReason::ExistingRecord)));
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_trusted_source_updates_existing_record() {
        let store = RecordingStore::default();
        let mut unit = ParsedUnit::empty(UnitKind::LegalUnit);
        unit.core_mut().stat_id = Some("100".into());
        store.seed(&unit);

        let exists = store.exists(UnitKind::LegalUnit, "100").await.unwrap();
        apply(&store, decide(Priority::Trusted, exists, ALL_OPS), &unit, "registry")
            .await
            .unwrap();

        assert_eq!(store.writes(), vec![("update".to_string(), "100".to_string())]);
    }
}
