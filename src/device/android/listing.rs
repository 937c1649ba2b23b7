//! Parsing of `ls` output from the device shell

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKind {
    Dir,
    File,
    Link,
}

/// One line of `ls -l`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub kind: EntryKind,
    pub name: String,
    pub permissions: String,
    pub owner: String,
    pub group: String,
    pub size: Option<u64>,
    pub date: String,
    pub time: String,
    /// Where a link points to
    pub target: Option<String>,
}

/// True when `ls` reported that the path cannot be listed
pub fn is_missing(output: &str) -> bool {
    output.contains("No such file or directory") || output.contains("Not a directory")
}

/// Strip leading and trailing slashes and re-root the path
pub fn normalize_dir(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Split a device path into parent directory and last component
pub fn split_path(path: &str) -> (String, String) {
    let trimmed = path.trim().trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, name)) => (normalize_dir(parent), name.to_string()),
        None => ("/".to_string(), trimmed.to_string()),
    }
}

/// Plain `ls` output, one name per line
pub fn parse_names(output: &str) -> Option<Vec<String>> {
    if is_missing(output) {
        return None;
    }
    Some(
        output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with("total "))
            .map(str::to_string)
            .collect(),
    )
}

/// Parse `ls -l`, directories first then files then links.
///
/// Toybox and older toolbox builds differ in whether a link count and a size
/// column are printed, so the optional numeric column after the permissions
/// is skipped and the date, time and name are taken from the end of the line.
pub fn parse_long_listing(output: &str) -> Option<Vec<RemoteEntry>> {
    if is_missing(output) {
        return None;
    }

    let mut entries: Vec<RemoteEntry> = output.lines().filter_map(parse_line).collect();
    entries.sort_by(|a, b| match a.kind.cmp(&b.kind) {
        Ordering::Equal => a.name.cmp(&b.name),
        other => other,
    });
    Some(entries)
}

fn parse_line(line: &str) -> Option<RemoteEntry> {
    let line = line.trim();
    if line.is_empty() || line.starts_with("total") {
        return None;
    }

    let fields: Vec<&str> = line.split_whitespace().collect();
    let permissions = *fields.first()?;
    let kind = match permissions.chars().next()? {
        'd' => EntryKind::Dir,
        'l' => EntryKind::Link,
        _ => EntryKind::File,
    };

    let mut idx = 1;
    if fields.get(idx).is_some_and(|f| f.parse::<u64>().is_ok()) {
        idx += 1;
    }
    let owner = fields.get(idx)?.to_string();
    let group = fields.get(idx + 1)?.to_string();
    let rest = &fields[idx + 2..];

    let (name, date, time, size, target) = if kind == EntryKind::Link {
        // ... date time name -> target
        let n = rest.len();
        if n < 5 || rest[n - 2] != "->" {
            return None;
        }
        let size = n.checked_sub(6).and_then(|i| rest[i].parse().ok());
        (
            rest[n - 3],
            rest[n - 5],
            rest[n - 4],
            size,
            Some(rest[n - 1].to_string()),
        )
    } else {
        let n = rest.len();
        if n < 3 {
            return None;
        }
        let size = n.checked_sub(4).and_then(|i| rest[i].parse().ok());
        (rest[n - 1], rest[n - 3], rest[n - 2], size, None)
    };

    Some(RemoteEntry {
        kind,
        name: name.to_string(),
        permissions: permissions.to_string(),
        owner,
        group,
        size,
        date: date.to_string(),
        time: time.to_string(),
        target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOYBOX: &str = "total 24\n\
drwxrwx--x 4 root sdcard_rw 4096 2024-03-02 10:15 Camera\n\
-rw-rw---- 1 root sdcard_rw 2514432 2024-03-02 10:16 IMG_0001.jpg\n\
lrwxrwxrwx 1 root root 21 2024-01-01 00:00 sdcard -> /storage/self/primary\n\
drwxrwx--x 2 root sdcard_rw 4096 2024-03-01 09:00 .thumbnails\n";

    #[test]
    fn test_toybox_listing_sorted_by_kind() {
        let entries = parse_long_listing(TOYBOX).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![".thumbnails", "Camera", "IMG_0001.jpg", "sdcard"]);

        let image = &entries[2];
        assert_eq!(image.kind, EntryKind::File);
        assert_eq!(image.size, Some(2514432));
        assert_eq!(image.date, "2024-03-02");
        assert_eq!(image.time, "10:16");
        assert_eq!(image.owner, "root");

        let link = &entries[3];
        assert_eq!(link.kind, EntryKind::Link);
        assert_eq!(link.target.as_deref(), Some("/storage/self/primary"));
        assert_eq!(link.date, "2024-01-01");
    }

    #[test]
    fn test_toolbox_listing_without_link_count() {
        let out = "drwxr-xr-x root     root              2014-01-01 00:00 acct\n\
                   -rw-r--r-- root     root          812 2014-01-01 00:00 init.rc\n";
        let entries = parse_long_listing(out).unwrap();
        assert_eq!(entries[0].name, "acct");
        assert_eq!(entries[0].size, None);
        assert_eq!(entries[1].size, Some(812));
        assert_eq!(entries[1].owner, "root");
    }

    #[test]
    fn test_missing_paths() {
        assert!(parse_long_listing("ls: /nope: No such file or directory").is_none());
        assert!(parse_names("ls: /a/b.jpg/*: Not a directory").is_none());
        assert_eq!(parse_names("total 0\n").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(normalize_dir("sdcard/DCIM/"), "/sdcard/DCIM");
        assert_eq!(normalize_dir("/"), "/");
        assert_eq!(
            split_path("/sdcard/DCIM/Camera/"),
            ("/sdcard/DCIM".to_string(), "Camera".to_string())
        );
        assert_eq!(split_path("/data"), ("/".to_string(), "data".to_string()));
    }
}
