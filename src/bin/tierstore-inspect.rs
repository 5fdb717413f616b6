//! Operator utility that summarizes a metadata snapshot and its journal.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tierstore::metadata::{FileRecord, read_records};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let Some(options) = parse_args(std::env::args().skip(1).collect())? else {
        return Ok(());
    };
    println!("Snapshot: {}", options.snapshot_path.display());
    if let Ok(meta) = std::fs::metadata(&options.snapshot_path) {
        println!("Size: {} bytes", meta.len());
    }
    let records = read_records(&options.snapshot_path).map_err(|err| err.to_string())?;
    let summary = Summary::from_records(&records);

    println!("Records: {}", summary.total);
    println!("- raw: {} ({} bytes)", summary.raw, summary.raw_bytes);
    println!(
        "- compressed: {} ({} bytes)",
        summary.compressed, summary.compressed_bytes
    );
    println!();
    println!("Records by owner:");
    if summary.per_owner.is_empty() {
        println!("- (none)");
    }
    for (owner, (raw, compressed)) in &summary.per_owner {
        println!("- {owner}: raw={raw} compressed={compressed}");
    }
    if options.list {
        println!();
        for record in &records {
            println!("{}", list_line(record, record.current_path().exists()));
        }
    }
    Ok(())
}

/// Tab-separated tier, size, etag, key and the path holding the content.
fn list_line(record: &FileRecord, present: bool) -> String {
    let tier = if record.is_compressed { "cold" } else { "hot" };
    let mut line = format!(
        "{tier}\t{}\t{}\t{}\t{}",
        record.size,
        record.etag(),
        record.key,
        record.current_path().display()
    );
    if !present {
        line.push_str("\t(missing)");
    }
    line
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    total: usize,
    raw: usize,
    compressed: usize,
    raw_bytes: u64,
    compressed_bytes: u64,
    per_owner: BTreeMap<i64, (usize, usize)>,
}

impl Summary {
    fn from_records(records: &[FileRecord]) -> Self {
        let mut summary = Summary {
            total: records.len(),
            ..Summary::default()
        };
        for record in records {
            let owner = summary.per_owner.entry(record.owner_id).or_default();
            if record.is_compressed {
                summary.compressed += 1;
                summary.compressed_bytes += record.size;
                owner.1 += 1;
            } else {
                summary.raw += 1;
                summary.raw_bytes += record.size;
                owner.0 += 1;
            }
        }
        summary
    }
}

#[derive(Debug, Clone)]
struct CliOptions {
    snapshot_path: PathBuf,
    list: bool,
}

fn parse_args(args: Vec<String>) -> Result<Option<CliOptions>, String> {
    let mut snapshot_path: Option<PathBuf> = None;
    let mut list = false;
    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => {
                println!("{}", help_text());
                return Ok(None);
            }
            "--snapshot" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--snapshot requires a value".to_string())?;
                snapshot_path = Some(PathBuf::from(value));
            }
            "--list" => list = true,
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }
    let Some(snapshot_path) = snapshot_path else {
        return Err("--snapshot is required".to_string());
    };
    Ok(Some(CliOptions {
        snapshot_path,
        list,
    }))
}

fn help_text() -> String {
    [
        "tierstore-inspect",
        "",
        "Usage:",
        "  tierstore-inspect --snapshot <path-to-metadata.json> [--list]",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, owner_id: i64, size: u64, is_compressed: bool) -> FileRecord {
        FileRecord {
            key: key.to_string(),
            owner_id,
            raw_path: PathBuf::from(format!("/raw{key}")),
            compressed_path: PathBuf::from(format!("/pack{key}.zip")),
            size,
            last_access_time: 0,
            last_modified_time: 0,
            is_compressed,
            claim: None,
        }
    }

    #[test]
    fn summary_counts_tiers_per_owner() {
        let records = vec![
            record("/1/a", 1, 10, false),
            record("/1/b", 1, 20, true),
            record("/2/a", 2, 5, true),
        ];
        let summary = Summary::from_records(&records);
        assert_eq!(summary.total, 3);
        assert_eq!((summary.raw, summary.raw_bytes), (1, 10));
        assert_eq!((summary.compressed, summary.compressed_bytes), (2, 25));
        assert_eq!(summary.per_owner.get(&1), Some(&(1, 1)));
        assert_eq!(summary.per_owner.get(&2), Some(&(0, 1)));
    }

    #[test]
    fn listing_points_at_the_current_artifact() {
        let hot = record("/1/a", 1, 10, false);
        let cold = record("/1/b", 1, 20, true);
        assert_eq!(
            list_line(&hot, true),
            format!("hot\t10\t{}\t/1/a\t/raw/1/a", hot.etag())
        );
        assert_eq!(
            list_line(&cold, false),
            format!("cold\t20\t{}\t/1/b\t/pack/1/b.zip\t(missing)", cold.etag())
        );
    }

    #[test]
    fn snapshot_flag_is_required() {
        assert!(parse_args(Vec::new()).is_err());
        let options = parse_args(vec!["--snapshot".into(), "m.json".into(), "--list".into()])
            .unwrap()
            .unwrap();
        assert!(options.list);
    }
}
