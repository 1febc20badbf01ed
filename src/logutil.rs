//! Logging helpers: canonical node labels and single-line sanitising of
//! device-supplied text (long names, notification bodies) so one event stays one
//! log line.

use crate::types::NodeNum;

const MAX_PREVIEW: usize = 120;

/// Canonical `!xxxxxxxx` label Meshtastic clients use for a node number.
pub fn node_label(num: NodeNum) -> String {
    format!("!{:08x}", num)
}

/// Escape control characters and cap length for single-line logging.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// `long name (!xxxxxxxx)` when a name is known, otherwise just the label.
pub fn describe_node(num: NodeNum, long_name: Option<&str>) -> String {
    match long_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("{} ({})", escape_log(name), node_label(num)),
        None => node_label(num),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_zero_padded_hex() {
        assert_eq!(node_label(0x309), "!00000309");
        assert_eq!(node_label(0xDEADBEEF), "!deadbeef");
    }

    #[test]
    fn names_with_newlines_stay_on_one_line() {
        assert_eq!(
            describe_node(1, Some("Base\nCamp")),
            "Base\\nCamp (!00000001)"
        );
        assert_eq!(describe_node(1, Some("  ")), "!00000001");
    }
}
