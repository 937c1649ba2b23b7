//! Foreground app detection
//!
//! There is no single command that reports the focused app on every
//! Android release, so several diagnostic dumps are tried in order and the
//! first one that yields a `package/activity` pair wins.

use regex::Regex;
use std::sync::OnceLock;

/// App currently in front
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundApp {
    pub package: String,
    pub activity: String,
    pub pid: Option<u32>,
}

/// One way of asking the device what is in front
pub struct ForegroundStrategy {
    pub name: &'static str,
    pub command: &'static str,
    pub parse: fn(&str) -> Option<ForegroundApp>,
}

/// Strategies in the order they are tried
pub const STRATEGIES: [ForegroundStrategy; 3] = [
    ForegroundStrategy {
        name: "focused activity",
        command: "dumpsys activity | grep -E 'mFocusedActivity|top-activity'",
        parse: parse_focused_activity,
    },
    ForegroundStrategy {
        name: "focused app window",
        command: "dumpsys window windows | grep -E 'mFocusedApp'",
        parse: parse_first_component,
    },
    ForegroundStrategy {
        name: "activity record",
        command: "dumpsys window windows | grep -E 'ActivityRecord'",
        parse: parse_first_component,
    },
];

fn component_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"u\d+\s+([A-Za-z0-9_.]+)/([A-Za-z0-9_.$]+)").expect("component regex")
    })
}

fn top_activity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+):([A-Za-z0-9_.]+)/(\S+)\s+\(top-activity\)").expect("top-activity regex")
    })
}

fn component(line: &str) -> Option<(String, String)> {
    let caps = component_re().captures(line)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// `mFocusedActivity` names the activity; the process list marks the
/// top activity's process with its pid.
fn parse_focused_activity(output: &str) -> Option<ForegroundApp> {
    let top = output
        .lines()
        .find_map(|line| top_activity_re().captures(line))
        .map(|caps| (caps[1].parse::<u32>().ok(), caps[2].to_string(), caps[3].to_string()));

    let focused = output
        .lines()
        .filter(|line| line.contains("mFocusedActivity"))
        .find_map(component);

    match (focused, top) {
        (Some((package, activity)), top) => {
            let pid = top.and_then(|(pid, pkg, _)| if pkg == package { pid } else { None });
            Some(ForegroundApp {
                package,
                activity,
                pid,
            })
        }
        (None, Some((pid, package, activity))) => Some(ForegroundApp {
            package,
            activity,
            pid,
        }),
        (None, None) => None,
    }
}

fn parse_first_component(output: &str) -> Option<ForegroundApp> {
    output.lines().find_map(component).map(|(package, activity)| ForegroundApp {
        package,
        activity,
        pid: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_focused_activity_with_pid() {
        let out = "  mFocusedActivity: ActivityRecord{3b2f5a0 u0 com.android.camera/.CameraActivity t12}\n\
                   Proc # 0: fore  T/A/T  trm: 0 4312:com.android.camera/u0a45 (top-activity)\n";
        let app = parse_focused_activity(out).unwrap();
        assert_eq!(app.package, "com.android.camera");
        assert_eq!(app.activity, ".CameraActivity");
        assert_eq!(app.pid, Some(4312));
    }

    #[test]
    fn test_top_activity_alone() {
        let out = "Proc # 0: fore  T/A/T  trm: 0 977:com.sec.android.app.camera/u0a97 (top-activity)";
        let app = parse_focused_activity(out).unwrap();
        assert_eq!(app.package, "com.sec.android.app.camera");
        assert_eq!(app.pid, Some(977));
    }

    #[test]
    fn test_pid_from_other_package_is_dropped() {
        let out = "mFocusedActivity: ActivityRecord{1 u0 com.a/.Main t1}\n\
                   Proc # 0: fore  T/A/T  trm: 0 10:com.b/u0a1 (top-activity)";
        assert_eq!(parse_focused_activity(out).unwrap().pid, None);
    }

    #[test]
    fn test_focused_app_window() {
        let out = "  mFocusedApp=AppWindowToken{e2c1 token=Token{5a1 ActivityRecord{9c3 u0 org.lineageos.snap/com.android.camera.CameraLauncher t7}}}";
        let app = parse_first_component(out).unwrap();
        assert_eq!(app.package, "org.lineageos.snap");
        assert_eq!(app.activity, "com.android.camera.CameraLauncher");
    }

    #[test]
    fn test_empty_output_yields_nothing() {
        for strategy in &STRATEGIES {
            assert!((strategy.parse)("").is_none(), "{}", strategy.name);
        }
    }
}
