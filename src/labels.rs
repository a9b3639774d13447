use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufRead},
    path::{Path, PathBuf},
};

/// Parses the `names` entry Ultralytics embeds in exported models,
/// e.g. `{0: 'person', 1: 'bicycle'}`. Ids must be contiguous from zero.
pub fn parse_names_metadata(raw: &str) -> Option<Vec<String>> {
    let body = raw.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut labels = BTreeMap::new();
    let mut rest = body;

    while let Some(colon) = rest.find(':') {
        let key: usize = rest[..colon]
            .trim()
            .trim_start_matches(',')
            .trim()
            .parse()
            .ok()?;
        let value = rest[colon + 1..].trim_start();
        let quote = value.chars().next()?;
        if quote != '\'' && quote != '"' {
            return None;
        }
        let end = value[1..].find(quote)? + 1;
        labels.insert(key, value[1..end].to_string());
        rest = &value[end + 1..];
    }

    if labels.is_empty() || labels.keys().enumerate().any(|(i, key)| i != *key) {
        return None;
    }

    Some(labels.into_values().collect())
}

pub fn sidecar_path(model_path: &Path) -> PathBuf {
    model_path.with_extension("labels")
}

/// Reads one label per line; an optional `,r,g,b` colour suffix is ignored.
pub fn load_labels_file(filepath: &Path) -> io::Result<Vec<String>> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut labels = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        let label = line.split(',').next().unwrap_or_default().trim();
        if label.is_empty() {
            continue;
        }
        labels.push(label.to_string());
    }

    Ok(labels)
}
