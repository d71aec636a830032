// SPDX-FileCopyrightText: 2025-2026 Zexin Yuan <aim@yzx9.xyz>
//
// SPDX-License-Identifier: Apache-2.0

//! Blocking I/O shell.
//!
//! A thin wrapper owning a single-threaded runtime and driving the async
//! client to completion, the same way reqwest's own blocking module works.
//! The protocol engine and operations layer are shared unchanged; only the
//! waiting strategy differs.

use std::future::Future;
use std::sync::Arc;

use crate::calendar::{Calendar, SyncBatch};
use crate::config::ClientConfig;
use crate::davobject::Principal;
use crate::error::DavError;
use crate::object::CalendarObject;
use crate::search::CalendarSearcher;

/// A blocking `CalDAV` session.
#[derive(Debug, Clone)]
pub struct Client {
    inner: crate::client::Client,
    runtime: Arc<tokio::runtime::Runtime>,
}

impl Client {
    fn runtime() -> Result<Arc<tokio::runtime::Runtime>, DavError> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map(Arc::new)
            .map_err(|e| DavError::Config(format!("cannot start runtime: {e}")))
    }

    /// Creates a blocking client from a configuration with a full URL.
    ///
    /// # Errors
    ///
    /// See [`crate::Client::new`].
    pub fn new(config: &ClientConfig) -> Result<Self, DavError> {
        let runtime = Self::runtime()?;
        let inner = crate::client::Client::new(config)?;
        Ok(Self { inner, runtime })
    }

    /// Creates a blocking client, running discovery for email/domain URLs.
    ///
    /// # Errors
    ///
    /// See [`crate::Client::connect`].
    pub fn connect(config: &ClientConfig) -> Result<Self, DavError> {
        let runtime = Self::runtime()?;
        let inner = runtime.block_on(crate::client::Client::connect(config))?;
        Ok(Self { inner, runtime })
    }

    /// The wrapped asynchronous client.
    #[must_use]
    pub fn async_client(&self) -> &crate::client::Client {
        &self.inner
    }

    /// Drives any future of the async API to completion.
    pub fn run<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Blocking mirror of [`crate::Client::principal`].
    ///
    /// # Errors
    ///
    /// See [`crate::Client::principal`].
    pub fn principal(&self) -> Result<Principal, DavError> {
        self.run(self.inner.principal())
    }

    /// Blocking mirror of [`crate::Client::calendar`].
    ///
    /// # Errors
    ///
    /// See [`crate::Client::calendar`].
    pub fn calendar(&self, url: &str) -> Result<Calendar, DavError> {
        self.inner.calendar(url)
    }

    /// Lists the principal's calendars.
    ///
    /// # Errors
    ///
    /// See [`Principal::calendars`].
    pub fn calendars(&self) -> Result<Vec<Calendar>, DavError> {
        self.run(async {
            let mut principal = self.inner.principal().await?;
            principal.calendars().await
        })
    }

    /// Runs a search against a calendar.
    ///
    /// # Errors
    ///
    /// See [`Calendar::search`].
    pub fn search(
        &self,
        calendar: &Calendar,
        searcher: &CalendarSearcher,
    ) -> Result<Vec<CalendarObject>, DavError> {
        self.run(calendar.search(searcher))
    }

    /// Fetches sync deltas for a calendar.
    ///
    /// # Errors
    ///
    /// See [`Calendar::objects_by_sync_token`].
    pub fn objects_by_sync_token(
        &self,
        calendar: &Calendar,
        sync_token: Option<&str>,
        load_objects: bool,
    ) -> Result<SyncBatch, DavError> {
        self.run(calendar.objects_by_sync_token(sync_token, load_objects))
    }

    /// Blocking mirror of [`crate::Client::check_dav_support`].
    ///
    /// # Errors
    ///
    /// See [`crate::Client::check_dav_support`].
    pub fn check_dav_support(&self) -> Result<Option<String>, DavError> {
        self.run(self.inner.check_dav_support())
    }
}
