#![warn(clippy::nursery, clippy::pedantic)]
#![deny(unsafe_code)]

// ttlpaste CLI Client
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

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use atty::Stream;
use chrono::{DateTime, Utc};
use clap::Parser;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use ttlpaste_common::{
    format_time_remaining, CreatePaste, CreatedPaste, ErrorBody, PasteView, Url, API_ENDPOINT,
};

#[derive(Parser)]
struct Opts {
    #[clap(subcommand)]
    action: Action,
}

#[derive(Parser)]
enum Action {
    Upload {
        /// The ttlpaste instance to upload data to.
        url: Url,
        /// Seconds until the paste expires.
        #[clap(short, long)]
        ttl: Option<u64>,
        /// How many times the paste may be read before it disappears.
        #[clap(short, long)]
        max_views: Option<u32>,
        path: PathBuf,
    },
    Download {
        /// The paste to download. Reading it uses up one view.
        url: Url,
    },
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    match opts.action {
        Action::Upload {
            url,
            ttl,
            max_views,
            path,
        } => handle_upload(url, ttl, max_views, path),
        Action::Download { url } => handle_download(url),
    }?;

    Ok(())
}

fn handle_upload(
    mut url: Url,
    ttl: Option<u64>,
    max_views: Option<u32>,
    path: PathBuf,
) -> Result<()> {
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {} as UTF-8 text", path.display()))?;

    let request = CreatePaste {
        content,
        ttl_seconds: ttl
            .map(i64::try_from)
            .transpose()
            .context("TTL is too large")?,
        max_views: max_views.map(i64::from),
    };
    // Catch bad input before it costs a round trip.
    request.clone().validate()?;

    url.set_path(&format!("{}/pastes", API_ENDPOINT));
    url.set_query(None);
    url.set_fragment(None);

    let res = Client::new()
        .post(url)
        .json(&request)
        .send()
        .context("Request to server failed")?;

    match res.status() {
        StatusCode::CREATED => (),
        StatusCode::BAD_REQUEST => {
            let body: ErrorBody = res.json().context("Failed to parse server error")?;
            bail!("Upload rejected: {}", body.error);
        }
        status => bail!("Upload failed. Got HTTP error {}", status),
    }

    let created: CreatedPaste = res.json().context("Failed to parse server response")?;
    println!("{}", created.url);

    Ok(())
}

fn handle_download(url: Url) -> Result<()> {
    let res = Client::new()
        .get(paste_api_url(url)?)
        .send()
        .context("Failed to get data")?;

    match res.status() {
        StatusCode::OK => (),
        StatusCode::NOT_FOUND => bail!("Paste not found or no longer available"),
        status => bail!("Got bad response from server: {}", status),
    }

    let view: PasteView = res.json().context("Failed to parse paste")?;

    let mut stdout = std::io::stdout();
    stdout.write_all(view.content.as_bytes())?;
    // Keep the shell prompt off the last line when printing to a terminal
    if atty::is(Stream::Stdout) && !view.content.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }

    for line in describe_limits(&view, Utc::now()) {
        eprintln!("{}", line);
    }

    Ok(())
}

/// Maps a shareable `/p/<id>` link (or an API link) to the API read endpoint.
fn paste_api_url(mut url: Url) -> Result<Url> {
    let segments: Vec<&str> = url
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let id = match segments.as_slice() {
        ["p", id] | ["api", "pastes", id] => (*id).to_string(),
        _ => bail!("URL does not point to a paste"),
    };

    url.set_path(&format!("{}/pastes/{}", API_ENDPOINT, id));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn describe_limits(view: &PasteView, now: DateTime<Utc>) -> Vec<String> {
    let views = match view.remaining_views {
        Some(0) => "This was the last view; the paste is now gone.".to_string(),
        Some(1) => "1 view remains.".to_string(),
        Some(n) => format!("{} views remain.", n),
        None => "This paste has no view limit.".to_string(),
    };

    let expiry = view.expires_at.map_or_else(
        || "This paste will not expire.".to_string(),
        |expires_at| {
            format!(
                "This paste expires in {} ({}).",
                format_time_remaining(expires_at, now),
                expires_at.to_rfc3339()
            )
        },
    );

    vec![views, expiry]
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    #[test]
    fn share_link_maps_to_api() {
        let url = paste_api_url("https://paste.example/p/CFGHJMPQRV#frag".parse().unwrap()).unwrap();
        assert_eq!(url.as_str(), "https://paste.example/api/pastes/CFGHJMPQRV");
    }

    #[test]
    fn api_link_is_kept() {
        let url = paste_api_url("http://localhost:8080/api/pastes/CFGHJMPQRV/".parse().unwrap()).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/pastes/CFGHJMPQRV");
    }

    #[test]
    fn bare_host_is_rejected() {
        assert!(paste_api_url("https://paste.example/".parse().unwrap()).is_err());
    }

    #[test]
    fn links_without_exactly_one_id_are_rejected() {
        for link in [
            "https://paste.example/api/",
            "https://paste.example/api/pastes/",
            "https://paste.example/p/",
            "https://paste.example/p/a/b",
            "https://paste.example/CFGHJMPQRV",
            "https://paste.example/api/healthz",
        ] {
            let err = paste_api_url(link.parse().unwrap()).unwrap_err();
            assert_eq!(err.to_string(), "URL does not point to a paste", "link: {}", link);
        }
    }

    #[test]
    fn limits_are_described() {
        let now = Utc.timestamp_millis_opt(0).unwrap();
        let view = PasteView {
            content: String::new(),
            remaining_views: Some(2),
            expires_at: Some(now + Duration::minutes(90)),
        };
        let lines = describe_limits(&view, now);
        assert_eq!(lines[0], "2 views remain.");
        assert!(lines[1].starts_with("This paste expires in 1h 30m"));

        let unlimited = PasteView {
            content: String::new(),
            remaining_views: None,
            expires_at: None,
        };
        assert_eq!(
            describe_limits(&unlimited, now),
            vec![
                "This paste has no view limit.".to_string(),
                "This paste will not expire.".to_string()
            ]
        );
    }
}
