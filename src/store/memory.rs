// Copyright 2026 Pardosa Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::{
    ErrorEvent, LinkRecord, PageRecord, QueueCompletion, SessionMeta, SessionSummary, Storage,
    StoreError,
};
use crate::analyze::WordStats;
use crate::session::metrics::MetricsSnapshot;
use crate::session::SessionState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug)]
struct StoredPage {
    page: PageRecord,
    words: WordStats,
    links: Vec<LinkRecord>,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<Uuid, (SessionMeta, SessionState, Option<SessionSummary>)>,
    pages: HashMap<(Uuid, String), StoredPage>,
    metrics: Vec<(Uuid, MetricsSnapshot)>,
    errors: Vec<(Uuid, ErrorEvent)>,
}

/// The in-process store used with the memory queue backend and in tests.
/// Same records as the relational store, held in maps; completion hooks are
/// ignored because the memory queue completes outside the store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn page_count(&self, session_id: Uuid) -> usize {
        self.lock()
            .pages
            .keys()
            .filter(|(id, _)| *id == session_id)
            .count()
    }

    pub fn page(&self, session_id: Uuid, url: &str) -> Option<PageRecord> {
        self.lock()
            .pages
            .get(&(session_id, url.to_string()))
            .map(|stored| stored.page.clone())
    }

    pub fn word_frequencies(&self, session_id: Uuid, url: &str) -> Option<WordStats> {
        self.lock()
            .pages
            .get(&(session_id, url.to_string()))
            .map(|stored| stored.words.clone())
    }

    pub fn links_of(&self, session_id: Uuid, url: &str) -> Vec<LinkRecord> {
        self.lock()
            .pages
            .get(&(session_id, url.to_string()))
            .map(|stored| stored.links.clone())
            .unwrap_or_default()
    }

    pub fn session_state(&self, session_id: Uuid) -> Option<SessionState> {
        self.lock().sessions.get(&session_id).map(|(_, state, _)| *state)
    }

    pub fn session_summary(&self, session_id: Uuid) -> Option<SessionSummary> {
        self.lock()
            .sessions
            .get(&session_id)
            .and_then(|(_, _, summary)| summary.clone())
    }

    pub fn metric_count(&self, session_id: Uuid) -> usize {
        self.lock()
            .metrics
            .iter()
            .filter(|(id, _)| *id == session_id)
            .count()
    }

    pub fn error_events(&self, session_id: Uuid) -> Vec<ErrorEvent> {
        self.lock()
            .errors
            .iter()
            .filter(|(id, _)| *id == session_id)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn open_session(&self, meta: &SessionMeta) -> Result<(), StoreError> {
        self.lock()
            .sessions
            .insert(meta.session_id, (meta.clone(), SessionState::Running, None));
        Ok(())
    }

    async fn record_page(
        &self,
        page: &PageRecord,
        words: &WordStats,
        links: &[LinkRecord],
        _completion: Option<&QueueCompletion>,
    ) -> Result<(), StoreError> {
        self.lock().pages.insert(
            (page.session_id, page.url.as_str().to_string()),
            StoredPage {
                page: page.clone(),
                words: words.clone(),
                links: links.to_vec(),
            },
        );
        Ok(())
    }

    async fn record_metric(
        &self,
        session_id: Uuid,
        snapshot: &MetricsSnapshot,
    ) -> Result<(), StoreError> {
        self.lock().metrics.push((session_id, snapshot.clone()));
        Ok(())
    }

    async fn record_error_event(
        &self,
        session_id: Uuid,
        event: &ErrorEvent,
    ) -> Result<(), StoreError> {
        self.lock().errors.push((session_id, event.clone()));
        Ok(())
    }

    async fn close_session(
        &self,
        session_id: Uuid,
        state: SessionState,
        summary: &SessionSummary,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let entry = inner
            .sessions
            .get_mut(&session_id)
            .ok_or(StoreError::UnknownSession(session_id))?;
        entry.1 = state;
        entry.2 = Some(summary.clone());
        Ok(())
    }
}
