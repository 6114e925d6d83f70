//! Output formatting for CLI operations.

use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};

use arcstream::{EntryInfo, PackResult};

/// Trait for output formatting
pub trait OutputFormatter {
    /// Formats a list of entries
    fn format_list(&self, entries: &[EntryInfo]) -> String;

    /// Formats the names written by an extraction
    fn format_extracted(&self, names: &[String]) -> String;

    /// Formats packing results
    fn format_packed(&self, result: &PackResult) -> String;

    /// Formats the filter and format code tables
    fn format_codes(&self, filters: &[(&str, i32)], formats: &[(&str, i32)]) -> String;
}

/// Human-readable output formatter
pub struct HumanFormatter;

impl OutputFormatter for HumanFormatter {
    fn format_list(&self, entries: &[EntryInfo]) -> String {
        let mut output = format!("{:>12} {:>19} {}\n", "Size", "Modified", "Name");
        output.push_str(&"-".repeat(70));
        output.push('\n');

        let mut total_size: u64 = 0;
        for entry in entries {
            total_size += entry.size.unwrap_or(0);
            let size_str = entry.size.map(humanize_bytes).unwrap_or_else(|| "-".to_string());
            let mtime_str = entry
                .modified
                .map(format_timestamp)
                .unwrap_or_else(|| "-".to_string());
            output.push_str(&format!("{size_str:>12} {mtime_str:>19} {}\n", entry.path));
        }

        output.push_str(&"-".repeat(70));
        output.push('\n');
        output.push_str(&format!(
            "{:>12} {:>19} {} entries\n",
            humanize_bytes(total_size),
            "",
            entries.len()
        ));
        output
    }

    fn format_extracted(&self, names: &[String]) -> String {
        format!("Extracted {} entries\n", names.len())
    }

    fn format_packed(&self, result: &PackResult) -> String {
        format!(
            "Packed {} entries ({})\n",
            result.entries.len(),
            humanize_bytes(result.bytes)
        )
    }

    fn format_codes(&self, filters: &[(&str, i32)], formats: &[(&str, i32)]) -> String {
        let mut output = String::from("Filters:\n");
        for (name, code) in filters {
            output.push_str(&format!("  {code:>8}  {name}\n"));
        }
        output.push_str("Formats:\n");
        for (name, code) in formats {
            output.push_str(&format!("  {code:>#8x}  {name}\n"));
        }
        output.push_str("Backends:\n");
        for (name, version) in backend_versions() {
            output.push_str(&format!(
                "  {name:<8}  {}\n",
                version.as_deref().unwrap_or("not compiled in")
            ));
        }
        output
    }
}

/// JSON output formatter
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn format_list(&self, entries: &[EntryInfo]) -> String {
        let items: Vec<_> = entries
            .iter()
            .map(|e| {
                json!({
                    "path": e.path,
                    "size": e.size,
                    "modified": e.modified.and_then(|t| t.duration_since(UNIX_EPOCH).ok()).map(|d| d.as_secs()),
                })
            })
            .collect();

        serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_extracted(&self, names: &[String]) -> String {
        let obj = json!({ "extracted": names });
        serde_json::to_string_pretty(&obj).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_packed(&self, result: &PackResult) -> String {
        let obj = json!({
            "entries": result.entries,
            "bytes": result.bytes,
        });
        serde_json::to_string_pretty(&obj).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_codes(&self, filters: &[(&str, i32)], formats: &[(&str, i32)]) -> String {
        let table = |rows: &[(&str, i32)]| -> Vec<_> {
            rows.iter()
                .map(|(name, code)| json!({ "name": name, "code": code }))
                .collect()
        };
        let backends: serde_json::Map<_, _> = backend_versions()
            .into_iter()
            .map(|(name, version)| (name.to_string(), json!(version)))
            .collect();
        let obj = json!({
            "filters": table(filters),
            "formats": table(formats),
            "backends": backends,
        });
        serde_json::to_string_pretty(&obj).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Creates a formatter for the selected output format
pub fn create_formatter(format: super::OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        super::OutputFormat::Human => Box::new(HumanFormatter),
        super::OutputFormat::Json => Box::new(JsonFormatter),
    }
}

fn backend_versions() -> Vec<(&'static str, Option<String>)> {
    use arcstream::versions;
    vec![
        ("library", Some(versions::library_version().to_string())),
        ("zlib", versions::zlib_version().map(str::to_string)),
        ("liblzma", versions::liblzma_version().map(str::to_string)),
        ("bzlib", versions::bzlib_version().map(str::to_string)),
        ("liblz4", versions::liblz4_version().map(str::to_string)),
        ("libzstd", versions::libzstd_version()),
    ]
}

/// Converts bytes to a human-readable string
pub fn humanize_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.1} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Formats a SystemTime as a UTC datetime string
pub fn format_timestamp(time: SystemTime) -> String {
    let Ok(duration) = time.duration_since(UNIX_EPOCH) else {
        return "-".to_string();
    };
    let secs = duration.as_secs();
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    let time_of_day = secs % 86_400;
    format!(
        "{year:04}-{month:02}-{day:02} {:02}:{:02}:{:02}",
        time_of_day / 3600,
        (time_of_day % 3600) / 60,
        time_of_day % 60
    )
}

/// Days since 1970-01-01 to a proleptic Gregorian date.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
