// fadebin Ephemeral Paste Server
// Copyright (C) 2021  Edward Shen
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use chrono::{DateTime, Duration, Utc};
use fadebin_common::{PasteSummary, PasteView};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::short_code::PasteId;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Content is required")]
    BlankContent,
    #[error("ttl_seconds must be integer ≥ 1")]
    Ttl,
    #[error("max_views must be integer ≥ 1")]
    MaxViews,
}

/// Why a paste could not be served. Callers outside the server only ever see
/// "not found", whatever the reason.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    #[error("no such paste")]
    Missing,
    #[error("paste has expired")]
    Expired,
    #[error("paste has reached its view limit")]
    Exhausted,
}

/// A paste as submitted, before validation. Zero means "no limit" for both
/// `ttl_seconds` and `max_views`.
#[derive(Debug, Clone, Default)]
pub struct NewPaste {
    pub title: Option<String>,
    pub content: String,
    pub ttl_seconds: i64,
    pub max_views: i64,
}

impl NewPaste {
    pub fn validate(self, now: DateTime<Utc>) -> Result<Draft, ValidationError> {
        if self.content.trim().is_empty() {
            return Err(ValidationError::BlankContent);
        }

        let ttl_seconds = u64::try_from(self.ttl_seconds).map_err(|_| ValidationError::Ttl)?;
        let expires_at = if ttl_seconds == 0 {
            None
        } else {
            let expires_at = Duration::try_seconds(self.ttl_seconds)
                .and_then(|ttl| now.checked_add_signed(ttl))
                .ok_or(ValidationError::Ttl)?;
            Some(expires_at)
        };

        let max_views = u64::try_from(self.max_views).map_err(|_| ValidationError::MaxViews)?;

        Ok(Draft {
            title: self.title.as_deref().map(str::trim).unwrap_or_default().to_owned(),
            content: self.content,
            created_at: now,
            ttl_seconds,
            expires_at,
            max_views,
        })
    }
}

/// A validated paste that has not been given an id yet.
#[derive(Debug)]
pub struct Draft {
    title: String,
    content: String,
    created_at: DateTime<Utc>,
    ttl_seconds: u64,
    expires_at: Option<DateTime<Utc>>,
    max_views: u64,
}

impl Draft {
    pub fn into_paste(self, id: PasteId, seq: u64) -> Paste {
        Paste {
            id,
            seq,
            title: self.title,
            content: self.content,
            created_at: self.created_at,
            ttl_seconds: self.ttl_seconds,
            expires_at: self.expires_at,
            max_views: self.max_views,
            views_count: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Paste {
    pub id: PasteId,
    /// Store-assigned creation counter. Orders pastes created within the
    /// same millisecond.
    pub seq: u64,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_views: u64,
    pub views_count: u64,
}

impl Paste {
    /// Whether the paste's time to live has run out. The expiry instant itself
    /// already counts as expired.
    pub fn is_time_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expires_at| now >= expires_at)
    }

    pub const fn is_view_limited(&self) -> bool {
        self.max_views > 0
    }

    pub const fn is_exhausted(&self) -> bool {
        self.is_view_limited() && self.views_count >= self.max_views
    }

    /// Whether a consuming read at `now` may be served.
    pub fn availability(&self, now: DateTime<Utc>) -> Result<(), Unavailable> {
        if self.is_time_expired(now) {
            Err(Unavailable::Expired)
        } else if self.is_exhausted() {
            Err(Unavailable::Exhausted)
        } else {
            Ok(())
        }
    }

    /// Counts one view against the paste, if it is view limited.
    pub fn consume(&mut self, now: DateTime<Utc>) -> Result<(), Unavailable> {
        self.availability(now)?;
        if self.is_view_limited() {
            self.views_count += 1;
        }
        Ok(())
    }

    pub fn remaining_views(&self) -> Option<u64> {
        self.is_view_limited()
            .then(|| self.max_views.saturating_sub(self.views_count))
    }

    pub fn summary(&self) -> PasteSummary {
        PasteSummary {
            id: self.id.to_string(),
            title: self.title.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            remaining_views: self.remaining_views(),
        }
    }
}

impl From<Paste> for PasteView {
    fn from(paste: Paste) -> Self {
        let remaining_views = paste.remaining_views();
        Self {
            id: paste.id.to_string(),
            title: paste.title,
            content: paste.content,
            created_at: paste.created_at,
            expires_at: paste.expires_at,
            remaining_views,
        }
    }
}
