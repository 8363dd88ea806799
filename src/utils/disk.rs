use std::path::Path;
use tokio::process::Command;

/// Free space at `path` in bytes, via `df`. Returns `None` whenever the
/// figure cannot be computed; callers treat that as a pass.
pub async fn available_space(path: &Path) -> Option<u64> {
    let output = Command::new("df")
        .args(["-B1"])
        .arg(path)
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    parse_df_available(&String::from_utf8_lossy(&output.stdout))
}

/// Parse the "Available" column from `df -B1` output.
fn parse_df_available(output: &str) -> Option<u64> {
    let line = output.lines().nth(1)?;
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 4 {
        return None;
    }
    parts[3].parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_available_column() {
        let output = "\
Filesystem      1B-blocks       Used  Available Use% Mounted on
/dev/sda1    250790436864 9624816640 2288490188  81% /
";
        assert_eq!(parse_df_available(output), Some(2288490188));
    }

    #[test]
    fn malformed_output_yields_none() {
        assert_eq!(parse_df_available(""), None);
        assert_eq!(parse_df_available("Filesystem\nshort line"), None);
    }

    #[tokio::test]
    async fn root_has_reportable_space() {
        // df on / should work on any unix-ish test host
        let space = available_space(Path::new("/")).await;
        if let Some(space) = space {
            assert!(space > 0);
        }
    }
}
