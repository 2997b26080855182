//! Internet shortcuts (`.url`): a line-oriented `Key=Value` text file.

use std::fs;
use std::path::Path;

use super::IconLocation;
use crate::error::Result;

/// The keys of an internet shortcut that drive icon lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InternetShortcut {
    pub url: Option<String>,
    /// `IconFile=` as written, before environment expansion.
    pub icon_file: Option<String>,
    pub icon_index: i32,
}

fn value_of<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let head = line.get(..key.len())?;
    head.eq_ignore_ascii_case(key)
        .then(|| line[key.len()..].trim())
}

impl InternetShortcut {
    /// Keys match case-insensitively and a later line overrides an earlier
    /// one. Anything unrecognised, including section headers, is skipped.
    pub fn parse(text: &str) -> Self {
        let mut shortcut = Self::default();
        for line in text.lines() {
            if let Some(v) = value_of(line, "IconFile=") {
                shortcut.icon_file = Some(v.to_owned());
            } else if let Some(v) = value_of(line, "IconIndex=") {
                shortcut.icon_index = v.parse().unwrap_or(0);
            } else if let Some(v) = value_of(line, "URL=") {
                shortcut.url = Some(v.to_owned());
            }
        }
        shortcut
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Ok(Self::parse(&String::from_utf8_lossy(&bytes)))
    }

    /// `IconFile` with environment references expanded.
    pub fn icon_location(&self) -> Option<IconLocation> {
        IconLocation::expanded(self.icon_file.as_deref()?, self.icon_index)
    }

    /// Lower-cased URL scheme, if the URL has one.
    pub fn scheme(&self) -> Option<String> {
        let url = self.url.as_deref()?;
        let (scheme, _) = url.split_once(':')?;
        let valid = !scheme.is_empty()
            && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        valid.then(|| scheme.to_ascii_lowercase())
    }

    pub fn is_web(&self) -> bool {
        matches!(self.scheme().as_deref(), Some("http" | "https"))
    }
}

/// The `URL=` value of an internet shortcut, or `None` when the file is
/// missing, unreadable or has no URL.
pub fn read_url(path: &Path) -> Option<String> {
    InternetShortcut::read(path)
        .ok()?
        .url
        .filter(|url| !url.is_empty())
}
