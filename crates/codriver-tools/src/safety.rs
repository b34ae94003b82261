//! Shell command safety screening.
//!
//! Terminal commands are checked against an explicit blocklist and a table
//! of dangerous-operation patterns before any permission prompt or backend
//! dispatch.  Commands prefixed with `sudo` are re-checked with the prefix
//! stripped, and chained commands are split and checked segment by segment.

use std::sync::LazyLock;

use regex::Regex;

/// Commands that are always rejected, matched as substrings of the
/// normalized command.
const BLOCKED_COMMANDS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "rm -rf --no-preserve-root /",
    ":(){ :|:& };:",
    "crontab -r",
];

/// Dangerous operation patterns with human-readable reasons.
static DANGEROUS_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        // Data destruction
        (
            r"rm\s+-r?f\s+(/|/\*|/\.\.|--no-preserve-root)",
            "File system deletion",
        ),
        (
            r"dd\s+if=/dev/(zero|random|urandom)\s+of=/dev/([sh]d[a-z]|nvme|xvd)",
            "Disk overwrite",
        ),
        (
            r"mkfs\.[a-z0-9]+\s+/dev/([sh]d[a-z]|nvme|xvd)",
            "Disk formatting",
        ),
        (r"mv\s+.*\s+/dev/null", "Data deletion via /dev/null"),
        (r">\s+/dev/([sh]d[a-z]|nvme|xvd)", "Disk corruption"),
        (r"shred\s+.*\s+-z", "Secure data deletion"),
        // System destabilization
        (r":\(\)\s*\{\s*:\|:", "Fork bomb detection"),
        (r"kill\s+-9\s+-1", "Killing all processes"),
        (r"shutdown\s+(-h|-r)\s+now", "System shutdown"),
        (
            r"systemctl\s+(poweroff|halt|reboot)",
            "System power management",
        ),
        // Permission and security compromise
        (r"chmod\s+-R\s+777\s+/", "Recursive permission change"),
        (r"chmod\s+.*\s+/etc/sudoers", "Sudoers file modification"),
        (r"passwd\s+root", "Root password change"),
        // Remote execution
        (r"wget\s+.*\s+\|\s+([sb]a)?sh", "Piping web content to shell"),
        (r"curl\s+.*\s+\|\s+([sb]a)?sh", "Piping web content to shell"),
        // File system manipulation
        (
            r"find\s+/\s+-type\s+[fd]\s+-exec\s+.*\s+\{\}",
            "Dangerous find command",
        ),
        (r"find\s+/\s+.*\s+-delete", "Dangerous find deletion"),
        // Disk usage filling
        (r"fallocate\s+-l\s+\d+[gt]\s+", "Large file allocation"),
        (r"base64\s+/dev/urandom", "Random data generation"),
        // Network command abuse
        (r"nc\s+-e\s+/bin/([sb]a)?sh", "Netcat shell execution"),
        (
            r"telnet\s+.*\s+\|\s+/bin/([sb]a)?sh",
            "Telnet shell piping",
        ),
    ]
    .iter()
    .map(|(pattern, reason)| {
        (
            Regex::new(pattern).expect("pattern table is static and valid"),
            *reason,
        )
    })
    .collect()
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static SUDO_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^sudo\s+").unwrap());

/// Check a terminal command for dangerous operations.
///
/// Returns the reason a command is rejected, or `None` if it is allowed.
pub fn check_command(command: &str) -> Option<String> {
    let normalized = WHITESPACE
        .replace_all(command.trim(), " ")
        .to_lowercase();

    if let Some(reason) = check_normalized(&normalized) {
        return Some(reason);
    }

    // Chained commands: split and re-check each segment so a dangerous tail
    // cannot hide behind a harmless head.
    if ["|", ";", "&&", "||"].iter().any(|sep| normalized.contains(sep)) {
        for segment in normalized
            .split(['|', ';', '&'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            if let Some(reason) = check_normalized(segment) {
                return Some(format!("Dangerous operation in command chain: {reason}"));
            }
        }
    }

    None
}

fn check_normalized(normalized: &str) -> Option<String> {
    for blocked in BLOCKED_COMMANDS {
        if normalized.contains(blocked) {
            return Some(format!("Blocked command detected: '{blocked}'"));
        }
    }

    for (pattern, description) in DANGEROUS_PATTERNS.iter() {
        if pattern.is_match(normalized) {
            return Some(format!("Dangerous operation detected: {description}"));
        }
    }

    // `sudo` must not launder a dangerous command.
    if normalized.contains("sudo") {
        let without_sudo = SUDO_PREFIX.replace(normalized, "");
        if without_sudo != normalized
            && let Some(reason) = check_normalized(&without_sudo)
        {
            return Some(format!(
                "Privileged dangerous operation detected: {reason}"
            ));
        }
    }

    None
}

/// Render a rejection into the payload returned in place of a tool result.
pub fn rejection_payload(reason: &str) -> String {
    format!("SECURITY ALERT: Dangerous command detected. {reason}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
