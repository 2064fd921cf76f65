#![warn(clippy::nursery, clippy::pedantic)]
#![deny(unsafe_code)]

// fadebin CLI Client
// Copyright (C) 2021  Edward Shen
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use atty::Stream;
use clap::Parser;
use fadebin_common::{
    CreatePaste, CreatedPaste, Envelope, PasteSummary, PasteView, Url, PASTES_ENDPOINT,
};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;

#[derive(Parser)]
#[clap(version, about)]
struct Opts {
    #[clap(subcommand)]
    action: Action,
}

#[derive(Parser)]
enum Action {
    /// Uploads a paste and prints its shareable link.
    Create {
        /// The fadebin instance to upload data to.
        url: Url,
        #[clap(short, long)]
        title: Option<String>,
        /// Seconds until the paste expires. Never expires if omitted.
        #[clap(long)]
        ttl: Option<u64>,
        /// How many times the paste may be viewed. Unlimited if omitted.
        #[clap(short, long)]
        max_views: Option<u64>,
        /// File to upload. Read from stdin if omitted.
        path: Option<PathBuf>,
    },
    /// Lists pastes that have not expired yet. Does not use up any views.
    List {
        /// The fadebin instance to query.
        url: Url,
    },
    /// Prints a paste. This counts as a view.
    Get {
        /// The paste to fetch, as handed out on creation.
        url: Url,
    },
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    match opts.action {
        Action::Create {
            url,
            title,
            ttl,
            max_views,
            path,
        } => handle_create(url, title, ttl, max_views, path),
        Action::List { url } => handle_list(url),
        Action::Get { url } => handle_get(url),
    }?;

    Ok(())
}

fn handle_create(
    url: Url,
    title: Option<String>,
    ttl_seconds: Option<u64>,
    max_views: Option<u64>,
    path: Option<PathBuf>,
) -> Result<()> {
    let content = if let Some(path) = path {
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        if atty::is(Stream::Stdin) {
            bail!("Nothing to upload. Pass a file or pipe data to stdin.");
        }
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .context("Failed to read stdin")?;
        content
    };

    let request = CreatePaste {
        title,
        content,
        ttl_seconds,
        max_views,
    };

    let res = Client::new()
        .post(api_url(url, PASTES_ENDPOINT))
        .json(&request)
        .send()
        .context("Request to server failed")?;

    if res.status() != StatusCode::CREATED {
        return Err(server_error(res));
    }

    let created: CreatedPaste = res
        .json::<Envelope<CreatedPaste>>()
        .context("Server sent an unexpected response")?
        .into_result()
        .map_err(|message| anyhow!(message))?;

    println!("{}", created.url);

    Ok(())
}

fn handle_list(url: Url) -> Result<()> {
    let res = Client::new()
        .get(api_url(url, PASTES_ENDPOINT))
        .send()
        .context("Failed to get data")?;

    if res.status() != StatusCode::OK {
        return Err(server_error(res));
    }

    let summaries: Vec<PasteSummary> = res
        .json::<Envelope<Vec<PasteSummary>>>()
        .context("Server sent an unexpected response")?
        .into_result()
        .map_err(|message| anyhow!(message))?;

    for summary in summaries {
        let title = if summary.title.is_empty() {
            "Untitled"
        } else {
            summary.title.as_str()
        };
        println!("{}\t{}\t{}", summary.id, title, summary.lifetime());
    }

    Ok(())
}

fn handle_get(url: Url) -> Result<()> {
    let url = paste_api_url(url)?;
    let res = Client::new()
        .get(url)
        .send()
        .context("Failed to get data")?;

    if res.status() == StatusCode::NOT_FOUND {
        bail!("Paste not found. It may have expired or run out of views.");
    }

    if res.status() != StatusCode::OK {
        return Err(server_error(res));
    }

    let paste: PasteView = res.json().context("Server sent an unexpected response")?;

    std::io::stdout().write_all(paste.content.as_bytes())?;
    eprintln!("{}", paste.lifetime());

    Ok(())
}

fn api_url(mut url: Url, path: &str) -> Url {
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);
    url
}

/// Maps a shareable link (`…/p/<id>`) or an API link (`…/api/pastes/<id>`)
/// to the JSON endpoint of the paste.
fn paste_api_url(url: Url) -> Result<Url> {
    let id = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(ToOwned::to_owned)
        .ok_or_else(|| anyhow!("{} does not point at a paste", url))?;

    Ok(api_url(url, &format!("{}/{}", PASTES_ENDPOINT, id)))
}

fn server_error(res: Response) -> anyhow::Error {
    let status = res.status();
    match res.json::<Envelope<()>>() {
        Ok(Envelope::Error { message }) => anyhow!("{} (HTTP {})", message, status),
        _ => anyhow!("Got bad response from server: {}", status),
    }
}
