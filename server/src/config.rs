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

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use fadebin_common::Url;

#[derive(Parser, Debug)]
#[clap(version, about = "Ephemeral paste server")]
pub struct Config {
    /// Address to listen on.
    #[clap(long, env = "FADEBIN_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,
    /// Directory holding the paste database.
    #[clap(long, env = "FADEBIN_DATABASE", default_value = "database")]
    pub database: PathBuf,
    /// Base of the shareable links handed out on creation.
    #[clap(long, env = "FADEBIN_PUBLIC_URL", default_value = "http://localhost:8080")]
    pub public_url: Url,
    /// Origins browsers may call the API from. Any origin if none are given.
    #[clap(long = "cors-origin", env = "FADEBIN_CORS_ORIGINS", use_value_delimiter = true)]
    pub cors_origins: Vec<String>,
}
