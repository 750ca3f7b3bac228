//! Document search criteria and paging
use std::cmp::Ordering;

use crate::document::{AccessLevel, DocumentMetadata, DocumentStatus, DocumentType};
use crate::types::TimeStamp;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    CreatedAt,
    ModifiedAt,
    Title,
    FileSize,
    RetentionUntil,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub document_type: Option<DocumentType>,
    pub status: Option<DocumentStatus>,
    pub access_level: Option<AccessLevel>,
    pub owner_id: Option<String>,
    pub customer_id: Option<String>,
    pub created_from: Option<TimeStamp>,
    pub created_to: Option<TimeStamp>,
    pub tag: Option<String>,
    pub keyword: Option<String>,
    pub regulatory_only: bool,
    pub pending_approval: bool,
    pub expiring_soon: bool,
    pub sort_by: SortField,
    pub order: SortOrder,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl SearchCriteria {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_type(mut self, document_type: DocumentType) -> Self {
        self.document_type = Some(document_type);
        self
    }
    pub fn set_status(mut self, status: DocumentStatus) -> Self {
        self.status = Some(status);
        self
    }
    pub fn set_access_level(mut self, level: AccessLevel) -> Self {
        self.access_level = Some(level);
        self
    }
    pub fn set_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }
    pub fn set_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }
    pub fn set_created_between(mut self, from: TimeStamp, to: TimeStamp) -> Self {
        self.created_from = Some(from);
        self.created_to = Some(to);
        self
    }
    pub fn set_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
    pub fn set_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }
    pub fn regulatory_only(mut self) -> Self {
        self.regulatory_only = true;
        self
    }
    pub fn pending_approval(mut self) -> Self {
        self.pending_approval = true;
        self
    }
    pub fn expiring_soon(mut self) -> Self {
        self.expiring_soon = true;
        self
    }
    pub fn sort(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort_by = field;
        self.order = order;
        self
    }
    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// `expiring_before` is the end of the "expiring soon" window.
    pub(crate) fn matches(
        &self,
        doc: &DocumentMetadata,
        now: TimeStamp,
        expiring_before: TimeStamp,
    ) -> bool {
        if self.document_type.is_some_and(|t| t != doc.document_type) {
            return false;
        }
        if self.status.is_some_and(|s| s != doc.status) {
            return false;
        }
        if self.access_level.is_some_and(|l| l != doc.access_level) {
            return false;
        }
        if self.owner_id.as_ref().is_some_and(|o| *o != doc.owner_id) {
            return false;
        }
        if self
            .customer_id
            .as_ref()
            .is_some_and(|c| doc.customer_id.as_ref() != Some(c))
        {
            return false;
        }
        if self.created_from.is_some_and(|from| doc.created_at < from) {
            return false;
        }
        if self.created_to.is_some_and(|to| doc.created_at > to) {
            return false;
        }
        if self.tag.as_ref().is_some_and(|t| !doc.tags.contains(t)) {
            return false;
        }
        if self.keyword.as_ref().is_some_and(|k| !doc.matches_keyword(k)) {
            return false;
        }
        if self.regulatory_only && !doc.document_type.is_regulatory() {
            return false;
        }
        if self.pending_approval && !doc.is_pending_approval() {
            return false;
        }
        if self.expiring_soon {
            let expiring = doc
                .expires_at
                .is_some_and(|at| at >= now && at <= expiring_before);
            if !expiring {
                return false;
            }
        }
        true
    }

    pub(crate) fn compare(&self, a: &DocumentMetadata, b: &DocumentMetadata) -> Ordering {
        let ordering = match self.sort_by {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::ModifiedAt => a.modified_at.cmp(&b.modified_at),
            SortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            SortField::FileSize => a.file_size.cmp(&b.file_size),
            SortField::RetentionUntil => a.retention_until.cmp(&b.retention_until),
        }
        // ids are uuid7, so ties fall back to creation order
        .then_with(|| a.id.cmp(&b.id));

        match self.order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.offset + self.items.len() < self.total
    }

    /// ceil(total / limit)
    pub fn total_pages(&self) -> usize {
        if self.limit == 0 {
            return 0;
        }
        self.total.div_ceil(self.limit)
    }
}
