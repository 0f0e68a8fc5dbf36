//! In-process store backend.
//!
//! Used when no `DATABASE_URL` is configured and by tests. All state sits
//! behind one mutex; no lock is held across an await point.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use events::{CommentView, ReportStatus, Role, VoteView};
use uuid::Uuid;

use super::{Store, StoreError, Viewer, display_name};

struct UserRecord {
    name: Option<String>,
    email: Option<String>,
    role: Role,
}

struct ReportRecord {
    status: ReportStatus,
    comments: Vec<CommentView>,
    voters: HashSet<String>,
}

impl ReportRecord {
    fn new() -> Self {
        Self { status: ReportStatus::Pending, comments: Vec::new(), voters: HashSet::new() }
    }

    fn vote_view(&self, user_id: Option<&str>) -> VoteView {
        VoteView {
            voted: user_id.is_some_and(|id| self.voters.contains(id)),
            count: u32::try_from(self.voters.len()).unwrap_or(u32::MAX),
        }
    }
}

#[derive(Default)]
struct Inner {
    users: HashMap<String, UserRecord>,
    sessions: HashMap<String, String>,
    reports: HashMap<String, ReportRecord>,
    last_created_at: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-seeded for local runs: one citizen, one admin, three reports.
    ///
    /// Session tokens are `citizen-token` and `admin-token`.
    #[must_use]
    pub fn with_demo_data() -> Self {
        let store = Self::new();
        store.add_user("citizen-1", Some("Citizen"), Some("resident@example.com"), Role::Citizen);
        store.add_user("admin-1", Some("Ward Office"), Some("ward@example.com"), Role::Admin);
        store.add_session("citizen-token", "citizen-1");
        store.add_session("admin-token", "admin-1");
        for id in ["report-1", "report-2", "report-3"] {
            store.add_report(id);
        }
        store
    }

    pub fn add_user(&self, user_id: &str, name: Option<&str>, email: Option<&str>, role: Role) {
        let mut inner = self.lock();
        inner.users.insert(
            user_id.to_owned(),
            UserRecord { name: name.map(ToOwned::to_owned), email: email.map(ToOwned::to_owned), role },
        );
    }

    pub fn add_session(&self, token: &str, user_id: &str) {
        self.lock().sessions.insert(token.to_owned(), user_id.to_owned());
    }

    pub fn add_report(&self, report_id: &str) {
        self.lock()
            .reports
            .entry(report_id.to_owned())
            .or_insert_with(ReportRecord::new);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a panic happened mid-update in a test;
        // the maps themselves are still usable.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn report_mut<'a>(inner: &'a mut Inner, report_id: &str) -> Result<&'a mut ReportRecord, StoreError> {
    inner
        .reports
        .get_mut(report_id)
        .ok_or_else(|| StoreError::ReportNotFound(report_id.to_owned()))
}

#[async_trait]
impl Store for MemoryStore {
    async fn resolve_session(&self, token: &str) -> Result<Option<Viewer>, StoreError> {
        let inner = self.lock();
        let Some(user_id) = inner.sessions.get(token) else {
            return Ok(None);
        };
        let Some(user) = inner.users.get(user_id) else {
            return Ok(None);
        };
        Ok(Some(Viewer {
            user_id: user_id.clone(),
            display_name: display_name(user.name.as_deref(), user.email.as_deref()),
            role: user.role,
        }))
    }

    async fn list_comments(&self, report_id: &str) -> Result<Vec<CommentView>, StoreError> {
        let mut inner = self.lock();
        let report = report_mut(&mut inner, report_id)?;
        let mut comments = report.comments.clone();
        comments.sort_by_key(|c| c.created_at);
        Ok(comments)
    }

    async fn create_comment(
        &self,
        report_id: &str,
        author: &Viewer,
        body: &str,
    ) -> Result<CommentView, StoreError> {
        let mut inner = self.lock();
        if !inner.users.contains_key(&author.user_id) {
            return Err(StoreError::UnknownUser(author.user_id.clone()));
        }

        // Keep creation times strictly increasing so history order is stable.
        let created_at = events::now_ms().max(inner.last_created_at + 1);
        inner.last_created_at = created_at;

        let report = report_mut(&mut inner, report_id)?;
        let comment = CommentView {
            id: Uuid::new_v4().to_string(),
            report_id: report_id.to_owned(),
            author_id: author.user_id.clone(),
            author_display_name: author.display_name.clone(),
            author_role: author.role,
            body: body.to_owned(),
            created_at,
        };
        report.comments.push(comment.clone());
        Ok(comment)
    }

    async fn clear_comments(&self, report_id: &str) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let report = report_mut(&mut inner, report_id)?;
        let removed = report.comments.len();
        report.comments.clear();
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }

    async fn vote_status(&self, report_id: &str, user_id: Option<&str>) -> Result<VoteView, StoreError> {
        let mut inner = self.lock();
        Ok(report_mut(&mut inner, report_id)?.vote_view(user_id))
    }

    async fn toggle_vote(&self, report_id: &str, user_id: &str) -> Result<VoteView, StoreError> {
        let mut inner = self.lock();
        if !inner.users.contains_key(user_id) {
            return Err(StoreError::UnknownUser(user_id.to_owned()));
        }
        let report = report_mut(&mut inner, report_id)?;
        if !report.voters.remove(user_id) {
            report.voters.insert(user_id.to_owned());
        }
        Ok(report.vote_view(Some(user_id)))
    }

    async fn report_status(&self, report_id: &str) -> Result<ReportStatus, StoreError> {
        let mut inner = self.lock();
        Ok(report_mut(&mut inner, report_id)?.status)
    }

    async fn update_status(&self, report_id: &str, status: ReportStatus) -> Result<(), StoreError> {
        let mut inner = self.lock();
        report_mut(&mut inner, report_id)?.status = status;
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
