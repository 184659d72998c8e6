use anyhow::{Context as AnyhowContext, Result};
use codefam_ingest::QueueItem;
use log::warn;
use std::io::Read;
use std::path::Path;

pub(crate) struct JsonLines {
    pub(crate) items: Vec<QueueItem>,
    pub(crate) skipped: usize,
}

/// Read JSON-lines items from `path`, or stdin when `path` is `-`. Blank
/// lines are ignored; malformed lines are skipped with a warning.
pub(crate) fn read_json_lines(path: &Path) -> Result<JsonLines> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    };
    Ok(parse_json_lines(&raw))
}

pub(crate) fn parse_json_lines(raw: &str) -> JsonLines {
    let mut items = Vec::new();
    let mut skipped = 0;
    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<QueueItem>(line) {
            Ok(item) => items.push(item),
            Err(err) => {
                warn!("Skipping line {}: {err}", idx + 1);
                skipped += 1;
            }
        }
    }
    JsonLines { items, skipped }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_lines_are_skipped() {
        let parsed = parse_json_lines(
            "{\"raw_text\": \"contract A{}\", \"metadata\": {\"name\": \"A\"}}\n\
             \n\
             not json\n\
             {\"raw_text\": \"contract B{}\"}\n\
             {\"metadata\": {}}\n",
        );
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.skipped, 2);
        assert_eq!(parsed.items[1].metadata, serde_json::Value::Null);
    }
}
