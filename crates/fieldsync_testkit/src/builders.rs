//! Builders for entities and records.

use crate::fixtures::DEFAULT_TENANT;
use fieldsync_core::{
    Element, Entity, ImageMetadata, Record, Section, Survey, SurveyState, SyncStatus, TenantId,
    Timestamp,
};

/// Builds a [`Record`] as a server would hold it: `Synced`, owned by
/// [`DEFAULT_TENANT`], created and updated at 1 ms.
#[derive(Debug, Clone)]
pub struct RecordBuilder<T> {
    record: Record<T>,
}

impl<T: Entity> RecordBuilder<T> {
    /// Starts a record with `id` and `data`.
    pub fn new(id: impl Into<String>, data: T) -> Self {
        Self {
            record: Record {
                id: id.into(),
                tenant_id: TenantId::new(DEFAULT_TENANT),
                created_at: Timestamp::from_millis(1),
                updated_at: Timestamp::from_millis(1),
                sync_status: SyncStatus::Synced,
                sync_error: None,
                data,
            },
        }
    }

    /// Sets the owning tenant.
    pub fn tenant(mut self, tenant: &str) -> Self {
        self.record.tenant_id = TenantId::new(tenant);
        self
    }

    /// Sets `created_at`, in milliseconds.
    pub fn created_at(mut self, millis: i64) -> Self {
        self.record.created_at = Timestamp::from_millis(millis);
        self
    }

    /// Sets `updated_at`, in milliseconds.
    pub fn updated_at(mut self, millis: i64) -> Self {
        self.record.updated_at = Timestamp::from_millis(millis);
        self
    }

    /// Sets the sync status.
    pub fn status(mut self, status: SyncStatus) -> Self {
        self.record.sync_status = status;
        self
    }

    /// Finishes the record.
    pub fn build(self) -> Record<T> {
        self.record
    }
}

/// A section named `name`.
pub fn section(name: &str) -> Section {
    Section {
        name: name.into(),
        ..Section::default()
    }
}

/// An element named `name` under `section_id`.
pub fn element(section_id: &str, name: &str) -> Element {
    Element {
        section_id: section_id.into(),
        name: name.into(),
        ..Element::default()
    }
}

/// A draft survey of `address`.
pub fn survey(address: &str) -> Survey {
    Survey {
        address: address.into(),
        state: SurveyState::Draft,
        ..Survey::default()
    }
}

/// Metadata of a not yet uploaded image of `survey_id`.
pub fn image(survey_id: &str, file: &str) -> ImageMetadata {
    ImageMetadata {
        survey_id: survey_id.into(),
        path: format!("report-images/{survey_id}/{file}"),
        ..ImageMetadata::default()
    }
}
