#![warn(clippy::nursery, clippy::pedantic)]

// Copyright (c) 2021 Edward Shen
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Contains common functions and structures used by the server and the CLI.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
pub use url::Url;

pub const API_ENDPOINT: &str = "/api";
pub const PASTES_ENDPOINT: &str = "/api/pastes";
/// Prefix of the human-facing, HTML rendered paste page.
pub const VIEW_ENDPOINT: &str = "/p";

/// Body of a paste creation request.
///
/// Leaving `ttl_seconds` or `max_views` out is the same as sending `0`: the
/// paste never expires, or may be viewed any number of times.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CreatePaste {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_views: Option<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CreatedPaste {
    pub id: String,
    /// Shareable link to the rendered paste.
    pub url: String,
}

/// A consumed paste, as returned by a successful fetch.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PasteView {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Views left after this one, or `None` if the paste is not view limited.
    pub remaining_views: Option<u64>,
}

impl PasteView {
    #[must_use]
    pub const fn lifetime(&self) -> Lifetime {
        Lifetime {
            expires_at: self.expires_at,
            remaining_views: self.remaining_views,
        }
    }
}

/// Listing entry. Listing never counts as a view, so it never carries content.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PasteSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub remaining_views: Option<u64>,
}

impl PasteSummary {
    #[must_use]
    pub const fn lifetime(&self) -> Lifetime {
        Lifetime {
            expires_at: self.expires_at,
            remaining_views: self.remaining_views,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Envelope<T> {
    Success { data: T },
    Error { message: String },
}

impl<T> Envelope<T> {
    pub const fn success(data: T) -> Self {
        Self::Success { data }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Unwraps the payload, handing back the server's message on failure.
    ///
    /// # Errors
    ///
    /// Returns the error message if the envelope carries an error.
    pub fn into_result(self) -> Result<T, String> {
        match self {
            Self::Success { data } => Ok(data),
            Self::Error { message } => Err(message),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Health {
    pub ok: bool,
}

/// How much longer a paste will stay readable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lifetime {
    pub expires_at: Option<DateTime<Utc>>,
    pub remaining_views: Option<u64>,
}

impl Display for Lifetime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.expires_at, self.remaining_views) {
            (None, None) => write!(f, "This paste will not expire."),
            (Some(time), None) => write!(
                f,
                "{}",
                time.format("This paste will expire on %A, %B %-d, %Y at %T %Z.")
            ),
            (_, Some(0)) => write!(f, "This was the last view. You now have the only copy."),
            (None, Some(views)) => write!(f, "This paste can be viewed {views} more time(s)."),
            (Some(time), Some(views)) => write!(
                f,
                "This paste can be viewed {} more time(s) until {}.",
                views,
                time.format("%A, %B %-d, %Y at %T %Z")
            ),
        }
    }
}
