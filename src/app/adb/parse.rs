use std::collections::BTreeMap;

/// Extracts pid -> process name for every live process belonging to `package`.
///
/// Matches the main process (`com.example`) and its child processes
/// (`com.example:push`, `com.example:sandboxed_process0`), but not other
/// packages that merely share a prefix. Ordered map so "first pid" is
/// deterministic across iterations.
pub fn parse_process_list(output: &str, package: &str) -> BTreeMap<String, String> {
    let mut processes = BTreeMap::new();
    let child_prefix = format!("{package}:");
    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 2 {
            continue;
        }
        // Classic `ps -A` layout: USER PID PPID ... NAME. Header rows fail the
        // numeric pid check.
        let Some(pid) = tokens.get(1).filter(|t| t.parse::<u32>().is_ok()) else {
            continue;
        };
        let Some(name) = tokens.last() else {
            continue;
        };
        if *name == package || name.starts_with(&child_prefix) {
            processes.insert((*pid).to_string(), (*name).to_string());
        }
    }
    processes
}

/// From `dumpsys package <pkg>`: the `userId=NNNNN` assignment.
pub fn parse_package_uid(output: &str) -> Option<String> {
    for line in output.lines() {
        let trimmed = line.trim();
        if let Some(tail) = trimmed
            .strip_prefix("userId=")
            .or_else(|| trimmed.split_once("userId=").map(|(_, tail)| tail))
        {
            let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
            if !digits.is_empty() {
                return Some(digits);
            }
        }
    }
    None
}

/// From `dumpsys window`: the component inside `mCurrentFocus=Window{... pkg/Activity}`,
/// reduced to the activity short name after the slash.
pub fn parse_focused_activity(output: &str) -> Option<String> {
    for line in output.lines() {
        let trimmed = line.trim();
        if !trimmed.contains("mCurrentFocus") && !trimmed.contains("mFocusedWindow") {
            continue;
        }
        let inside = trimmed.split_once('{').map(|(_, tail)| tail)?;
        let inside = inside.trim_end_matches('}');
        let component = inside.split_whitespace().last()?;
        if component.is_empty() || component == "null" {
            continue;
        }
        let short = component
            .split_once('/')
            .map(|(_, act)| act)
            .unwrap_or(component);
        return Some(short.trim_end_matches('}').to_string());
    }
    None
}

/// From `/proc/<pid>/oom_adj`: a single signed integer.
pub fn parse_oom_adj(output: &str) -> Option<String> {
    let token = output.split_whitespace().next()?;
    token.parse::<i32>().ok()?;
    Some(token.to_string())
}

/// From `/proc/<pid>/status`: the `VmRSS` value in kB.
pub fn parse_vm_rss_kb(output: &str) -> Option<String> {
    for line in output.lines() {
        let trimmed = line.trim();
        if let Some(tail) = trimmed.strip_prefix("VmRSS:") {
            let value = tail.split_whitespace().next()?;
            if value.chars().all(|c| c.is_ascii_digit()) {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// From `pm list packages <pkg>`: true only on an exact `package:<pkg>` line.
pub fn parse_package_installed(output: &str, package: &str) -> bool {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .any(|name| name.trim() == package)
}
