use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockroom_catalog::VariantId;
use stockroom_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use stockroom_events::Event;

use crate::code::{StockDirection, TransactionCode};

/// Stock record identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockRecordId(pub AggregateId);

impl StockRecordId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for StockRecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Record lifecycle status.
///
/// Drafts are editable working copies; submission freezes the record and is
/// the only point where stock levels move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Draft,
    Submitted,
}

/// One line of a stock record: a variant and a strictly positive quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub variant_id: VariantId,
    pub quantity: i64,
}

/// Aggregate root: StockRecord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockRecord {
    id: StockRecordId,
    tenant_id: Option<TenantId>,
    direction: StockDirection,
    status: RecordStatus,
    code: Option<TransactionCode>,
    entry_date: NaiveDate,
    note: String,
    lines: Vec<StockLine>,
    deleted_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl StockRecord {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: StockRecordId) -> Self {
        Self {
            id,
            tenant_id: None,
            direction: StockDirection::In,
            status: RecordStatus::Draft,
            code: None,
            entry_date: NaiveDate::default(),
            note: String::new(),
            lines: Vec::new(),
            deleted_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> StockRecordId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn direction(&self) -> StockDirection {
        self.direction
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    pub fn code(&self) -> Option<&TransactionCode> {
        self.code.as_ref()
    }

    pub fn entry_date(&self) -> NaiveDate {
        self.entry_date
    }

    pub fn note(&self) -> &str {
        &self.note
    }

    pub fn lines(&self) -> &[StockLine] {
        &self.lines
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl AggregateRoot for StockRecord {
    type Id = StockRecordId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenRecord (creates a draft).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRecord {
    pub tenant_id: TenantId,
    pub record_id: StockRecordId,
    pub direction: StockDirection,
    pub code: TransactionCode,
    pub entry_date: NaiveDate,
    pub note: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateDraft (replaces date, note, and lines).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDraft {
    pub tenant_id: TenantId,
    pub record_id: StockRecordId,
    pub entry_date: NaiveDate,
    pub note: String,
    pub lines: Vec<StockLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitRecord.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRecord {
    pub tenant_id: TenantId,
    pub record_id: StockRecordId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteRecord (soft delete, drafts only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRecord {
    pub tenant_id: TenantId,
    pub record_id: StockRecordId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RestoreRecord.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreRecord {
    pub tenant_id: TenantId,
    pub record_id: StockRecordId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockRecordCommand {
    OpenRecord(OpenRecord),
    UpdateDraft(UpdateDraft),
    SubmitRecord(SubmitRecord),
    DeleteRecord(DeleteRecord),
    RestoreRecord(RestoreRecord),
}

/// Event: RecordOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOpened {
    pub tenant_id: TenantId,
    pub record_id: StockRecordId,
    pub direction: StockDirection,
    pub code: TransactionCode,
    pub entry_date: NaiveDate,
    pub note: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DraftUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftUpdated {
    pub tenant_id: TenantId,
    pub record_id: StockRecordId,
    pub entry_date: NaiveDate,
    pub note: String,
    pub lines: Vec<StockLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RecordSubmitted.
///
/// Carries the direction and the final lines so the stock-levels projection
/// can apply the movement without loading the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSubmitted {
    pub tenant_id: TenantId,
    pub record_id: StockRecordId,
    pub direction: StockDirection,
    pub lines: Vec<StockLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RecordDeleted (soft delete tombstone).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDeleted {
    pub tenant_id: TenantId,
    pub record_id: StockRecordId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RecordRestored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRestored {
    pub tenant_id: TenantId,
    pub record_id: StockRecordId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockRecordEvent {
    RecordOpened(RecordOpened),
    DraftUpdated(DraftUpdated),
    RecordSubmitted(RecordSubmitted),
    RecordDeleted(RecordDeleted),
    RecordRestored(RecordRestored),
}

impl Event for StockRecordEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockRecordEvent::RecordOpened(_) => "stock.record.opened",
            StockRecordEvent::DraftUpdated(_) => "stock.record.draft_updated",
            StockRecordEvent::RecordSubmitted(_) => "stock.record.submitted",
            StockRecordEvent::RecordDeleted(_) => "stock.record.deleted",
            StockRecordEvent::RecordRestored(_) => "stock.record.restored",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockRecordEvent::RecordOpened(e) => e.occurred_at,
            StockRecordEvent::DraftUpdated(e) => e.occurred_at,
            StockRecordEvent::RecordSubmitted(e) => e.occurred_at,
            StockRecordEvent::RecordDeleted(e) => e.occurred_at,
            StockRecordEvent::RecordRestored(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockRecord {
    type Command = StockRecordCommand;
    type Event = StockRecordEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockRecordEvent::RecordOpened(e) => {
                self.id = e.record_id;
                self.tenant_id = Some(e.tenant_id);
                self.direction = e.direction;
                self.status = RecordStatus::Draft;
                self.code = Some(e.code.clone());
                self.entry_date = e.entry_date;
                self.note = e.note.clone();
                self.created = true;
            }
            StockRecordEvent::DraftUpdated(e) => {
                self.entry_date = e.entry_date;
                self.note = e.note.clone();
                self.lines = e.lines.clone();
            }
            StockRecordEvent::RecordSubmitted(_) => {
                self.status = RecordStatus::Submitted;
            }
            StockRecordEvent::RecordDeleted(e) => {
                self.deleted_at = Some(e.occurred_at);
            }
            StockRecordEvent::RecordRestored(_) => {
                self.deleted_at = None;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockRecordCommand::OpenRecord(cmd) => self.handle_open(cmd),
            StockRecordCommand::UpdateDraft(cmd) => self.handle_update_draft(cmd),
            StockRecordCommand::SubmitRecord(cmd) => self.handle_submit(cmd),
            StockRecordCommand::DeleteRecord(cmd) => self.handle_delete(cmd),
            StockRecordCommand::RestoreRecord(cmd) => self.handle_restore(cmd),
        }
    }
}

impl StockRecord {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_record_id(&self, record_id: StockRecordId) -> Result<(), DomainError> {
        if self.id != record_id {
            return Err(DomainError::invariant("record_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_not_deleted(&self) -> Result<(), DomainError> {
        if self.is_deleted() {
            return Err(DomainError::invariant("record is deleted"));
        }
        Ok(())
    }

    fn ensure_draft(&self) -> Result<(), DomainError> {
        if self.status != RecordStatus::Draft {
            return Err(DomainError::invariant("submitted records are immutable"));
        }
        Ok(())
    }

    fn validate_lines(lines: &[StockLine]) -> Result<(), DomainError> {
        for line in lines {
            if line.quantity <= 0 {
                return Err(DomainError::validation(
                    "line quantity must be strictly positive",
                ));
            }
        }
        for (i, line) in lines.iter().enumerate() {
            if lines[..i].iter().any(|l| l.variant_id == line.variant_id) {
                return Err(DomainError::validation(
                    "duplicate variant in record lines",
                ));
            }
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenRecord) -> Result<Vec<StockRecordEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("record already exists"));
        }

        if cmd.code.direction() != cmd.direction {
            return Err(DomainError::validation(
                "transaction code prefix does not match direction",
            ));
        }

        Ok(vec![StockRecordEvent::RecordOpened(RecordOpened {
            tenant_id: cmd.tenant_id,
            record_id: cmd.record_id,
            direction: cmd.direction,
            code: cmd.code.clone(),
            entry_date: cmd.entry_date,
            note: cmd.note.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_draft(&self, cmd: &UpdateDraft) -> Result<Vec<StockRecordEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_record_id(cmd.record_id)?;
        self.ensure_not_deleted()?;
        self.ensure_draft()?;

        Self::validate_lines(&cmd.lines)?;

        Ok(vec![StockRecordEvent::DraftUpdated(DraftUpdated {
            tenant_id: cmd.tenant_id,
            record_id: cmd.record_id,
            entry_date: cmd.entry_date,
            note: cmd.note.trim().to_string(),
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(&self, cmd: &SubmitRecord) -> Result<Vec<StockRecordEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_record_id(cmd.record_id)?;
        self.ensure_not_deleted()?;
        self.ensure_draft()?;

        if self.lines.is_empty() {
            return Err(DomainError::invariant(
                "cannot submit a record with no lines",
            ));
        }

        Ok(vec![StockRecordEvent::RecordSubmitted(RecordSubmitted {
            tenant_id: cmd.tenant_id,
            record_id: cmd.record_id,
            direction: self.direction,
            lines: self.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteRecord) -> Result<Vec<StockRecordEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_record_id(cmd.record_id)?;
        self.ensure_draft()?;

        if self.is_deleted() {
            return Err(DomainError::conflict("record is already deleted"));
        }

        Ok(vec![StockRecordEvent::RecordDeleted(RecordDeleted {
            tenant_id: cmd.tenant_id,
            record_id: cmd.record_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_restore(&self, cmd: &RestoreRecord) -> Result<Vec<StockRecordEvent>, DomainError> {
        self.ensure_exists()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_record_id(cmd.record_id)?;

        if !self.is_deleted() {
            return Err(DomainError::conflict("record is not deleted"));
        }

        Ok(vec![StockRecordEvent::RecordRestored(RecordRestored {
            tenant_id: cmd.tenant_id,
            record_id: cmd.record_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_core::AggregateId;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_record_id() -> StockRecordId {
        StockRecordId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn entry_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 30).unwrap()
    }

    fn opened_record(
        tenant_id: TenantId,
        record_id: StockRecordId,
        direction: StockDirection,
    ) -> StockRecord {
        let mut record = StockRecord::empty(record_id);
        let cmd = StockRecordCommand::OpenRecord(OpenRecord {
            tenant_id,
            record_id,
            direction,
            code: TransactionCode::generate(direction, entry_date(), 1),
            entry_date: entry_date(),
            note: "initial".to_string(),
            occurred_at: test_time(),
        });
        for event in record.handle(&cmd).unwrap() {
            record.apply(&event);
        }
        record
    }

    fn line(quantity: i64) -> StockLine {
        StockLine {
            variant_id: VariantId::new(),
            quantity,
        }
    }

    fn with_lines(record: &mut StockRecord, lines: Vec<StockLine>) {
        let cmd = StockRecordCommand::UpdateDraft(UpdateDraft {
            tenant_id: record.tenant_id().unwrap(),
            record_id: record.id_typed(),
            entry_date: record.entry_date(),
            note: record.note().to_string(),
            lines,
            occurred_at: test_time(),
        });
        for event in record.handle(&cmd).unwrap() {
            record.apply(&event);
        }
    }

    #[test]
    fn open_record_starts_as_draft() {
        let tenant_id = test_tenant_id();
        let record_id = test_record_id();
        let record = opened_record(tenant_id, record_id, StockDirection::In);

        assert_eq!(record.status(), RecordStatus::Draft);
        assert_eq!(record.direction(), StockDirection::In);
        assert_eq!(record.code().unwrap().as_str(), "SI-20260830-0001");
        assert!(record.lines().is_empty());
        assert_eq!(record.version(), 1);
    }

    #[test]
    fn open_record_rejects_code_direction_mismatch() {
        let record = StockRecord::empty(test_record_id());
        let cmd = StockRecordCommand::OpenRecord(OpenRecord {
            tenant_id: test_tenant_id(),
            record_id: record.id_typed(),
            direction: StockDirection::Out,
            code: TransactionCode::generate(StockDirection::In, entry_date(), 1),
            entry_date: entry_date(),
            note: String::new(),
            occurred_at: test_time(),
        });

        assert!(matches!(
            record.handle(&cmd).unwrap_err(),
            DomainError::Validation(_)
        ));
    }

    #[test]
    fn open_record_rejects_duplicate_creation() {
        let tenant_id = test_tenant_id();
        let record_id = test_record_id();
        let record = opened_record(tenant_id, record_id, StockDirection::In);

        let cmd = StockRecordCommand::OpenRecord(OpenRecord {
            tenant_id,
            record_id,
            direction: StockDirection::In,
            code: TransactionCode::generate(StockDirection::In, entry_date(), 2),
            entry_date: entry_date(),
            note: String::new(),
            occurred_at: test_time(),
        });
        assert!(matches!(
            record.handle(&cmd).unwrap_err(),
            DomainError::Conflict(_)
        ));
    }

    #[test]
    fn update_draft_replaces_lines() {
        let tenant_id = test_tenant_id();
        let record_id = test_record_id();
        let mut record = opened_record(tenant_id, record_id, StockDirection::In);

        with_lines(&mut record, vec![line(5), line(3)]);
        assert_eq!(record.lines().len(), 2);

        with_lines(&mut record, vec![line(10)]);
        assert_eq!(record.lines().len(), 1);
        assert_eq!(record.lines()[0].quantity, 10);
    }

    #[test]
    fn update_draft_rejects_nonpositive_quantity() {
        let tenant_id = test_tenant_id();
        let record_id = test_record_id();
        let record = opened_record(tenant_id, record_id, StockDirection::In);

        for bad in [0, -4] {
            let cmd = StockRecordCommand::UpdateDraft(UpdateDraft {
                tenant_id,
                record_id,
                entry_date: entry_date(),
                note: String::new(),
                lines: vec![line(bad)],
                occurred_at: test_time(),
            });
            assert!(matches!(
                record.handle(&cmd).unwrap_err(),
                DomainError::Validation(_)
            ));
        }
    }

    #[test]
    fn update_draft_rejects_duplicate_variant() {
        let tenant_id = test_tenant_id();
        let record_id = test_record_id();
        let record = opened_record(tenant_id, record_id, StockDirection::In);

        let variant_id = VariantId::new();
        let cmd = StockRecordCommand::UpdateDraft(UpdateDraft {
            tenant_id,
            record_id,
            entry_date: entry_date(),
            note: String::new(),
            lines: vec![
                StockLine {
                    variant_id,
                    quantity: 1,
                },
                StockLine {
                    variant_id,
                    quantity: 2,
                },
            ],
            occurred_at: test_time(),
        });
        assert!(matches!(
            record.handle(&cmd).unwrap_err(),
            DomainError::Validation(_)
        ));
    }

    #[test]
    fn submit_emits_direction_and_final_lines() {
        let tenant_id = test_tenant_id();
        let record_id = test_record_id();
        let mut record = opened_record(tenant_id, record_id, StockDirection::Out);
        with_lines(&mut record, vec![line(4), line(2)]);

        let cmd = StockRecordCommand::SubmitRecord(SubmitRecord {
            tenant_id,
            record_id,
            occurred_at: test_time(),
        });
        let events = record.handle(&cmd).unwrap();
        assert_eq!(events.len(), 1);

        match &events[0] {
            StockRecordEvent::RecordSubmitted(e) => {
                assert_eq!(e.direction, StockDirection::Out);
                assert_eq!(e.lines, record.lines().to_vec());
            }
            _ => panic!("Expected RecordSubmitted event"),
        }

        for event in events {
            record.apply(&event);
        }
        assert_eq!(record.status(), RecordStatus::Submitted);
    }

    #[test]
    fn submit_rejects_empty_record() {
        let tenant_id = test_tenant_id();
        let record_id = test_record_id();
        let record = opened_record(tenant_id, record_id, StockDirection::In);

        let cmd = StockRecordCommand::SubmitRecord(SubmitRecord {
            tenant_id,
            record_id,
            occurred_at: test_time(),
        });
        assert!(matches!(
            record.handle(&cmd).unwrap_err(),
            DomainError::InvariantViolation(_)
        ));
    }

    #[test]
    fn submitted_record_is_immutable() {
        let tenant_id = test_tenant_id();
        let record_id = test_record_id();
        let mut record = opened_record(tenant_id, record_id, StockDirection::In);
        with_lines(&mut record, vec![line(1)]);

        let submit = StockRecordCommand::SubmitRecord(SubmitRecord {
            tenant_id,
            record_id,
            occurred_at: test_time(),
        });
        for event in record.handle(&submit).unwrap() {
            record.apply(&event);
        }

        // No update, no delete, no re-submit.
        let update = StockRecordCommand::UpdateDraft(UpdateDraft {
            tenant_id,
            record_id,
            entry_date: entry_date(),
            note: String::new(),
            lines: vec![line(9)],
            occurred_at: test_time(),
        });
        assert!(record.handle(&update).is_err());

        let delete = StockRecordCommand::DeleteRecord(DeleteRecord {
            tenant_id,
            record_id,
            occurred_at: test_time(),
        });
        assert!(record.handle(&delete).is_err());

        assert!(record.handle(&submit).is_err());
    }

    #[test]
    fn delete_and_restore_draft() {
        let tenant_id = test_tenant_id();
        let record_id = test_record_id();
        let mut record = opened_record(tenant_id, record_id, StockDirection::In);
        with_lines(&mut record, vec![line(2)]);

        let delete = StockRecordCommand::DeleteRecord(DeleteRecord {
            tenant_id,
            record_id,
            occurred_at: test_time(),
        });
        for event in record.handle(&delete).unwrap() {
            record.apply(&event);
        }
        assert!(record.is_deleted());

        // Deleted drafts cannot be submitted or edited.
        let submit = StockRecordCommand::SubmitRecord(SubmitRecord {
            tenant_id,
            record_id,
            occurred_at: test_time(),
        });
        assert!(record.handle(&submit).is_err());

        let restore = StockRecordCommand::RestoreRecord(RestoreRecord {
            tenant_id,
            record_id,
            occurred_at: test_time(),
        });
        for event in record.handle(&restore).unwrap() {
            record.apply(&event);
        }
        assert!(!record.is_deleted());
        assert_eq!(record.lines().len(), 1);

        // Restore re-enables submission.
        assert!(record.handle(&submit).is_ok());
    }

    #[test]
    fn restore_rejects_live_record() {
        let tenant_id = test_tenant_id();
        let record_id = test_record_id();
        let record = opened_record(tenant_id, record_id, StockDirection::In);

        let restore = StockRecordCommand::RestoreRecord(RestoreRecord {
            tenant_id,
            record_id,
            occurred_at: test_time(),
        });
        assert!(matches!(
            record.handle(&restore).unwrap_err(),
            DomainError::Conflict(_)
        ));
    }

    #[test]
    fn mutations_reject_wrong_tenant() {
        let tenant_id = test_tenant_id();
        let record_id = test_record_id();
        let record = opened_record(tenant_id, record_id, StockDirection::In);

        let cmd = StockRecordCommand::SubmitRecord(SubmitRecord {
            tenant_id: test_tenant_id(),
            record_id,
            occurred_at: test_time(),
        });
        assert!(matches!(
            record.handle(&cmd).unwrap_err(),
            DomainError::InvariantViolation(_)
        ));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let tenant_id = test_tenant_id();
        let record_id = test_record_id();
        let mut record = opened_record(tenant_id, record_id, StockDirection::In);
        with_lines(&mut record, vec![line(3)]);
        let before = record.clone();

        let cmd = StockRecordCommand::SubmitRecord(SubmitRecord {
            tenant_id,
            record_id,
            occurred_at: test_time(),
        });
        let events1 = record.handle(&cmd).unwrap();
        let events2 = record.handle(&cmd).unwrap();

        assert_eq!(record, before);
        assert_eq!(events1, events2);
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: apply is deterministic (same events = same final state).
            #[test]
            fn apply_is_deterministic(
                quantities in proptest::collection::vec(1i64..10_000, 1..6)
            ) {
                let tenant_id = test_tenant_id();
                let record_id = test_record_id();
                let lines: Vec<StockLine> = quantities
                    .iter()
                    .map(|&quantity| StockLine {
                        variant_id: VariantId::new(),
                        quantity,
                    })
                    .collect();

                let events = vec![
                    StockRecordEvent::RecordOpened(RecordOpened {
                        tenant_id,
                        record_id,
                        direction: StockDirection::In,
                        code: TransactionCode::generate(StockDirection::In, entry_date(), 1),
                        entry_date: entry_date(),
                        note: String::new(),
                        occurred_at: Utc::now(),
                    }),
                    StockRecordEvent::DraftUpdated(DraftUpdated {
                        tenant_id,
                        record_id,
                        entry_date: entry_date(),
                        note: String::new(),
                        lines: lines.clone(),
                        occurred_at: Utc::now(),
                    }),
                    StockRecordEvent::RecordSubmitted(RecordSubmitted {
                        tenant_id,
                        record_id,
                        direction: StockDirection::In,
                        lines,
                        occurred_at: Utc::now(),
                    }),
                ];

                let mut a = StockRecord::empty(record_id);
                let mut b = StockRecord::empty(record_id);
                for event in &events {
                    a.apply(event);
                    b.apply(event);
                }

                prop_assert_eq!(&a, &b);
                prop_assert_eq!(a.status(), RecordStatus::Submitted);
                prop_assert_eq!(a.version(), 3);
            }

            /// Property: a submitted event always carries the draft's exact lines.
            #[test]
            fn submit_carries_final_lines(
                quantities in proptest::collection::vec(1i64..10_000, 1..6)
            ) {
                let tenant_id = test_tenant_id();
                let record_id = test_record_id();
                let mut record = opened_record(tenant_id, record_id, StockDirection::Out);

                let lines: Vec<StockLine> = quantities
                    .iter()
                    .map(|&quantity| StockLine {
                        variant_id: VariantId::new(),
                        quantity,
                    })
                    .collect();
                with_lines(&mut record, lines.clone());

                let cmd = StockRecordCommand::SubmitRecord(SubmitRecord {
                    tenant_id,
                    record_id,
                    occurred_at: Utc::now(),
                });
                let events = record.handle(&cmd).unwrap();
                match &events[0] {
                    StockRecordEvent::RecordSubmitted(e) => {
                        prop_assert_eq!(&e.lines, &lines);
                        prop_assert_eq!(e.direction, StockDirection::Out);
                    }
                    _ => prop_assert!(false, "expected RecordSubmitted"),
                }
            }

            /// Property: once submitted, every further command is rejected.
            #[test]
            fn submitted_rejects_all_commands(
                quantity in 1i64..10_000
            ) {
                let tenant_id = test_tenant_id();
                let record_id = test_record_id();
                let mut record = opened_record(tenant_id, record_id, StockDirection::In);
                with_lines(&mut record, vec![StockLine {
                    variant_id: VariantId::new(),
                    quantity,
                }]);

                let submit = StockRecordCommand::SubmitRecord(SubmitRecord {
                    tenant_id,
                    record_id,
                    occurred_at: Utc::now(),
                });
                for event in record.handle(&submit).unwrap() {
                    record.apply(&event);
                }

                let commands = vec![
                    StockRecordCommand::UpdateDraft(UpdateDraft {
                        tenant_id,
                        record_id,
                        entry_date: entry_date(),
                        note: String::new(),
                        lines: vec![],
                        occurred_at: Utc::now(),
                    }),
                    StockRecordCommand::SubmitRecord(SubmitRecord {
                        tenant_id,
                        record_id,
                        occurred_at: Utc::now(),
                    }),
                    StockRecordCommand::DeleteRecord(DeleteRecord {
                        tenant_id,
                        record_id,
                        occurred_at: Utc::now(),
                    }),
                ];
                for cmd in &commands {
                    prop_assert!(record.handle(cmd).is_err());
                }
            }
        }
    }
}
