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

use crate::paste::Paste;

/// Escapes `&`, `<` and `>`. Nothing else is touched.
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            c => escaped.push(c),
        }
    }
    escaped
}

pub fn render(paste: &Paste) -> String {
    let title = if paste.title.is_empty() {
        "Untitled".to_owned()
    } else {
        escape(&paste.title)
    };

    format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <title>{title}</title>
    <style>
      body {{ font-family: monospace; background: #0f172a; color: #e5e7eb; padding: 40px; }}
      pre {{ white-space: pre-wrap; background: #020617; padding: 20px; border-radius: 8px; }}
    </style>
  </head>
  <body>
    <h2>{title}</h2>
    <pre>{content}</pre>
  </body>
</html>
"#,
        content = escape(&paste.content),
    )
}
