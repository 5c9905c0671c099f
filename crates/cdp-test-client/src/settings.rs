//! Grouped key=value test-script files.
//!
//! `[Name]` opens a group, `key = value` lines belong to the most recent
//! group, lines starting with `#` or `;` are comments. Group order follows
//! the file; a re-opened `[Name]` continues the existing group.

use std::fs;
use std::io;
use std::path::Path;

use indexmap::IndexMap;

#[derive(Clone, Debug)]
pub struct TestGroup {
    pub name: String,
    entries: IndexMap<String, String>,
}

impl TestGroup {
    pub fn value(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

#[derive(Clone, Debug, Default)]
pub struct GroupedSettings {
    groups: Vec<TestGroup>,
}

impl GroupedSettings {
    pub fn load(path: &Path) -> io::Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    pub fn parse(input: &str) -> Self {
        let mut groups: Vec<TestGroup> = Vec::new();
        let mut current: Option<usize> = None;

        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                let name = line[1..line.len() - 1].trim();
                if name.is_empty() {
                    continue;
                }
                current = Some(match groups.iter().position(|g| g.name == name) {
                    Some(index) => index,
                    None => {
                        groups.push(TestGroup {
                            name: name.to_string(),
                            entries: IndexMap::new(),
                        });
                        groups.len() - 1
                    }
                });
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                if key.is_empty() {
                    continue;
                }
                // keys before the first group have nowhere to belong
                if let Some(index) = current {
                    groups[index]
                        .entries
                        .insert(key.to_string(), value.trim().to_string());
                }
            }
        }

        Self { groups }
    }

    pub fn groups(&self) -> &[TestGroup] {
        &self.groups
    }
}
